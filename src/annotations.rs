use crate::classfile::{ClassReader, write_u16};
use crate::error::{PurgeError, PurgeResult};

/// Nesting limit for element values (`@` and `[` recurse).
const MAX_ELEMENT_VALUE_DEPTH: usize = 256;

/// Result of filtering one annotations attribute.
#[derive(Debug, Eq, PartialEq)]
pub(crate) enum Filtered {
    /// Nothing was removed; keep the attribute bytes as they are.
    Unchanged,
    /// Some annotations were removed; the attribute body to emit instead.
    Replaced(Vec<u8>),
    /// Every annotation was removed; drop the attribute.
    Emptied,
}

/// One annotation kept as the raw bytes it occupies in the attribute.
struct RawAnnotation<'a> {
    type_index: u16,
    bytes: &'a [u8],
}

fn read_annotation<'a>(reader: &mut ClassReader<'a>) -> PurgeResult<RawAnnotation<'a>> {
    let start = reader.offset();
    let type_index = read_annotation_body(reader, 0)?;
    Ok(RawAnnotation {
        type_index,
        bytes: reader.since(start),
    })
}

fn read_annotation_body(reader: &mut ClassReader<'_>, depth: usize) -> PurgeResult<u16> {
    let type_index = reader.u16()?;
    let pairs = reader.u16()?;
    for _ in 0..pairs {
        reader.skip(2)?;
        skip_element_value(reader, depth + 1)?;
    }
    Ok(type_index)
}

fn skip_element_value(reader: &mut ClassReader<'_>, depth: usize) -> PurgeResult<()> {
    if depth > MAX_ELEMENT_VALUE_DEPTH {
        return Err(PurgeError::malformed("annotation element values nested too deeply"));
    }
    let tag = reader.u8()?;
    match tag {
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' | b's' | b'c' => reader.skip(2),
        b'e' => reader.skip(4),
        b'@' => read_annotation_body(reader, depth).map(|_| ()),
        b'[' => {
            let count = reader.u16()?;
            for _ in 0..count {
                skip_element_value(reader, depth + 1)?;
            }
            Ok(())
        }
        other => Err(PurgeError::malformed(format!(
            "unknown element value tag 0x{other:02x}"
        ))),
    }
}

fn read_annotations<'a>(reader: &mut ClassReader<'a>) -> PurgeResult<Vec<RawAnnotation<'a>>> {
    let count = reader.u16()?;
    let mut annotations = Vec::with_capacity(count as usize);
    for _ in 0..count {
        annotations.push(read_annotation(reader)?);
    }
    Ok(annotations)
}

fn write_annotations(out: &mut Vec<u8>, annotations: &[RawAnnotation<'_>]) {
    // Bounded by the source count, which was itself a u16.
    write_u16(out, annotations.len() as u16);
    for annotation in annotations {
        out.extend_from_slice(annotation.bytes);
    }
}

/// Filter a `RuntimeVisibleAnnotations` / `RuntimeInvisibleAnnotations` body.
///
/// `remove` receives the constant pool index of each annotation's type
/// descriptor and decides whether that annotation is dropped.
pub(crate) fn filter_annotations<F>(info: &[u8], mut remove: F) -> PurgeResult<Filtered>
where
    F: FnMut(u16) -> PurgeResult<bool>,
{
    let mut reader = ClassReader::new(info);
    let annotations = read_annotations(&mut reader)?;
    reader.finish("annotations attribute")?;

    let total = annotations.len();
    let mut kept = Vec::with_capacity(total);
    for annotation in annotations {
        if !remove(annotation.type_index)? {
            kept.push(annotation);
        }
    }
    if kept.len() == total {
        return Ok(Filtered::Unchanged);
    }
    if kept.is_empty() {
        return Ok(Filtered::Emptied);
    }
    let mut out = Vec::with_capacity(info.len());
    write_annotations(&mut out, &kept);
    Ok(Filtered::Replaced(out))
}

/// Filter a `Runtime(In)VisibleParameterAnnotations` body.
///
/// `remove` receives the parameter index and the annotation type index. The
/// parameter count is preserved; the attribute is dropped only when no
/// parameter keeps any annotation.
pub(crate) fn filter_parameter_annotations<F>(info: &[u8], mut remove: F) -> PurgeResult<Filtered>
where
    F: FnMut(u8, u16) -> PurgeResult<bool>,
{
    let mut reader = ClassReader::new(info);
    let parameter_count = reader.u8()?;
    let mut parameters = Vec::with_capacity(parameter_count as usize);
    for _ in 0..parameter_count {
        parameters.push(read_annotations(&mut reader)?);
    }
    reader.finish("parameter annotations attribute")?;

    let mut removed = 0usize;
    let mut kept_total = 0usize;
    let mut filtered = Vec::with_capacity(parameters.len());
    for (parameter, annotations) in parameters.into_iter().enumerate() {
        let mut kept = Vec::with_capacity(annotations.len());
        for annotation in annotations {
            if remove(parameter as u8, annotation.type_index)? {
                removed += 1;
            } else {
                kept.push(annotation);
            }
        }
        kept_total += kept.len();
        filtered.push(kept);
    }
    if removed == 0 {
        return Ok(Filtered::Unchanged);
    }
    if kept_total == 0 {
        return Ok(Filtered::Emptied);
    }
    let mut out = Vec::with_capacity(info.len());
    out.push(parameter_count);
    for kept in &filtered {
        write_annotations(&mut out, kept);
    }
    Ok(Filtered::Replaced(out))
}
