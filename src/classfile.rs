//! Attribute-level class file codec.
//!
//! The reader splits a class file into its JVMS §4.1 sections and keeps every
//! attribute as an opaque `(name, info)` pair. The constant pool is decoded
//! only far enough to resolve names and is written back byte for byte, so any
//! section the caller leaves alone re-encodes to the exact input bytes.

use std::borrow::Cow;

use crate::error::{PurgeError, PurgeResult};
use crate::mutf8;

const MAGIC: u32 = 0xCAFE_BABE;

pub(crate) const CODE: &str = "Code";
pub(crate) const RECORD: &str = "Record";
pub(crate) const RUNTIME_VISIBLE_ANNOTATIONS: &str = "RuntimeVisibleAnnotations";
pub(crate) const RUNTIME_INVISIBLE_ANNOTATIONS: &str = "RuntimeInvisibleAnnotations";
pub(crate) const RUNTIME_VISIBLE_PARAMETER_ANNOTATIONS: &str =
    "RuntimeVisibleParameterAnnotations";
pub(crate) const RUNTIME_INVISIBLE_PARAMETER_ANNOTATIONS: &str =
    "RuntimeInvisibleParameterAnnotations";
pub(crate) const SOURCE_FILE: &str = "SourceFile";
pub(crate) const SOURCE_DEBUG_EXTENSION: &str = "SourceDebugExtension";
pub(crate) const METHOD_PARAMETERS: &str = "MethodParameters";
pub(crate) const LINE_NUMBER_TABLE: &str = "LineNumberTable";
pub(crate) const LOCAL_VARIABLE_TABLE: &str = "LocalVariableTable";
pub(crate) const LOCAL_VARIABLE_TYPE_TABLE: &str = "LocalVariableTypeTable";
pub(crate) const STACK_MAP_TABLE: &str = "StackMapTable";

/// Bounds-checked big-endian cursor over class file bytes.
pub(crate) struct ClassReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> ClassReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    pub(crate) fn offset(&self) -> usize {
        self.offset
    }

    pub(crate) fn u8(&mut self) -> PurgeResult<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> PurgeResult<u16> {
        let slice = self.bytes(2)?;
        Ok(u16::from_be_bytes([slice[0], slice[1]]))
    }

    pub(crate) fn u32(&mut self) -> PurgeResult<u32> {
        let slice = self.bytes(4)?;
        Ok(u32::from_be_bytes([slice[0], slice[1], slice[2], slice[3]]))
    }

    pub(crate) fn bytes(&mut self, len: usize) -> PurgeResult<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                PurgeError::malformed(format!(
                    "truncated data: need {len} bytes at offset {} of {}",
                    self.offset,
                    self.data.len()
                ))
            })?;
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    pub(crate) fn skip(&mut self, len: usize) -> PurgeResult<()> {
        self.bytes(len).map(|_| ())
    }

    /// Bytes consumed since `start`.
    pub(crate) fn since(&self, start: usize) -> &'a [u8] {
        &self.data[start..self.offset]
    }

    /// Fail unless every byte was consumed.
    pub(crate) fn finish(&self, what: &str) -> PurgeResult<()> {
        if self.offset == self.data.len() {
            Ok(())
        } else {
            Err(PurgeError::malformed(format!(
                "{} trailing bytes after {what}",
                self.data.len() - self.offset
            )))
        }
    }
}

#[derive(Clone, Debug)]
enum PoolEntry {
    Unusable,
    Utf8(String),
    Class { name_index: u16 },
    Other,
}

/// Constant pool kept as raw bytes plus the entries needed for name lookups.
#[derive(Debug)]
pub(crate) struct ConstantPool<'a> {
    count: u16,
    raw: &'a [u8],
    entries: Vec<PoolEntry>,
}

impl<'a> ConstantPool<'a> {
    fn parse(reader: &mut ClassReader<'a>) -> PurgeResult<Self> {
        let count = reader.u16()?;
        let start = reader.offset();
        let mut entries = Vec::with_capacity(count as usize);
        entries.push(PoolEntry::Unusable);
        let count_slots = usize::from(count);
        let mut index = 1usize;
        while index < count_slots {
            let tag = reader.u8()?;
            match tag {
                1 => {
                    let len = reader.u16()? as usize;
                    let bytes = reader.bytes(len)?;
                    entries.push(PoolEntry::Utf8(mutf8::decode(bytes)?));
                }
                7 => {
                    let name_index = reader.u16()?;
                    entries.push(PoolEntry::Class { name_index });
                }
                3 | 4 => {
                    reader.skip(4)?;
                    entries.push(PoolEntry::Other);
                }
                5 | 6 => {
                    if index + 1 >= count_slots {
                        return Err(PurgeError::malformed(format!(
                            "two-slot constant at index {index} overruns a pool of {count} slots"
                        )));
                    }
                    reader.skip(8)?;
                    entries.push(PoolEntry::Other);
                    entries.push(PoolEntry::Unusable);
                    index += 1;
                }
                8 | 16 | 19 | 20 => {
                    reader.skip(2)?;
                    entries.push(PoolEntry::Other);
                }
                9 | 10 | 11 | 12 | 17 | 18 => {
                    reader.skip(4)?;
                    entries.push(PoolEntry::Other);
                }
                15 => {
                    reader.skip(3)?;
                    entries.push(PoolEntry::Other);
                }
                _ => {
                    return Err(PurgeError::malformed(format!(
                        "unsupported constant pool tag {tag} at index {index}"
                    )));
                }
            }
            index += 1;
        }
        let raw = reader.since(start);
        Ok(Self {
            count,
            raw,
            entries,
        })
    }

    pub(crate) fn utf8(&self, index: u16) -> PurgeResult<&str> {
        match self.entries.get(index as usize) {
            Some(PoolEntry::Utf8(value)) => Ok(value),
            _ => Err(PurgeError::malformed(format!(
                "constant pool index {index} is not a Utf8 entry"
            ))),
        }
    }

    /// Internal name (`com/example/A`) of a `CONSTANT_Class` entry.
    pub(crate) fn class_name(&self, index: u16) -> PurgeResult<&str> {
        match self.entries.get(index as usize) {
            Some(PoolEntry::Class { name_index }) => self.utf8(*name_index),
            _ => Err(PurgeError::malformed(format!(
                "constant pool index {index} is not a Class entry"
            ))),
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        write_u16(out, self.count);
        out.extend_from_slice(self.raw);
    }
}

/// An attribute whose body is only interpreted on demand.
#[derive(Clone, Debug)]
pub(crate) struct Attribute<'a> {
    pub(crate) name_index: u16,
    pub(crate) info: Cow<'a, [u8]>,
}

impl<'a> Attribute<'a> {
    pub(crate) fn name<'p>(&self, pool: &'p ConstantPool<'_>) -> PurgeResult<&'p str> {
        pool.utf8(self.name_index)
    }
}

/// `field_info` or `method_info`.
#[derive(Clone, Debug)]
pub(crate) struct Member<'a> {
    pub(crate) access_flags: u16,
    pub(crate) name_index: u16,
    pub(crate) descriptor_index: u16,
    pub(crate) attributes: Vec<Attribute<'a>>,
}

impl<'a> Member<'a> {
    fn parse(reader: &mut ClassReader<'a>) -> PurgeResult<Self> {
        let access_flags = reader.u16()?;
        let name_index = reader.u16()?;
        let descriptor_index = reader.u16()?;
        let attributes = parse_attributes(reader)?;
        Ok(Self {
            access_flags,
            name_index,
            descriptor_index,
            attributes,
        })
    }

    fn write(&self, out: &mut Vec<u8>) -> PurgeResult<()> {
        write_u16(out, self.access_flags);
        write_u16(out, self.name_index);
        write_u16(out, self.descriptor_index);
        write_attributes(out, &self.attributes)
    }
}

#[derive(Debug)]
pub(crate) struct ClassFile<'a> {
    pub(crate) minor_version: u16,
    pub(crate) major_version: u16,
    pub(crate) constant_pool: ConstantPool<'a>,
    pub(crate) access_flags: u16,
    pub(crate) this_class: u16,
    pub(crate) super_class: u16,
    pub(crate) interfaces: Vec<u16>,
    pub(crate) fields: Vec<Member<'a>>,
    pub(crate) methods: Vec<Member<'a>>,
    pub(crate) attributes: Vec<Attribute<'a>>,
}

impl<'a> ClassFile<'a> {
    pub(crate) fn parse(data: &'a [u8]) -> PurgeResult<Self> {
        let mut reader = ClassReader::new(data);
        let magic = reader.u32()?;
        if magic != MAGIC {
            return Err(PurgeError::malformed(format!(
                "invalid class file magic 0x{magic:08X}"
            )));
        }
        let minor_version = reader.u16()?;
        let major_version = reader.u16()?;
        let constant_pool = ConstantPool::parse(&mut reader)?;
        let access_flags = reader.u16()?;
        let this_class = reader.u16()?;
        let super_class = reader.u16()?;
        let interface_count = reader.u16()?;
        let mut interfaces = Vec::with_capacity(interface_count as usize);
        for _ in 0..interface_count {
            interfaces.push(reader.u16()?);
        }
        let field_count = reader.u16()?;
        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            fields.push(Member::parse(&mut reader)?);
        }
        let method_count = reader.u16()?;
        let mut methods = Vec::with_capacity(method_count as usize);
        for _ in 0..method_count {
            methods.push(Member::parse(&mut reader)?);
        }
        let attributes = parse_attributes(&mut reader)?;
        reader.finish("class attributes")?;

        let class = Self {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        };
        class.constant_pool.class_name(class.this_class)?;
        Ok(class)
    }

    pub(crate) fn name(&self) -> PurgeResult<&str> {
        self.constant_pool.class_name(self.this_class)
    }

    pub(crate) fn to_bytes(&self) -> PurgeResult<Vec<u8>> {
        let mut out = Vec::new();
        write_u32(&mut out, MAGIC);
        write_u16(&mut out, self.minor_version);
        write_u16(&mut out, self.major_version);
        self.constant_pool.write(&mut out);
        write_u16(&mut out, self.access_flags);
        write_u16(&mut out, self.this_class);
        write_u16(&mut out, self.super_class);
        write_count(&mut out, self.interfaces.len(), "interfaces")?;
        for interface in &self.interfaces {
            write_u16(&mut out, *interface);
        }
        write_count(&mut out, self.fields.len(), "fields")?;
        for field in &self.fields {
            field.write(&mut out)?;
        }
        write_count(&mut out, self.methods.len(), "methods")?;
        for method in &self.methods {
            method.write(&mut out)?;
        }
        write_attributes(&mut out, &self.attributes)?;
        Ok(out)
    }
}

/// Body of a `Code` attribute with its nested attributes split out.
pub(crate) struct CodeAttribute<'a> {
    /// `max_stack` through the exception table, untouched.
    body: &'a [u8],
    pub(crate) attributes: Vec<Attribute<'a>>,
}

impl<'a> CodeAttribute<'a> {
    pub(crate) fn parse(info: &'a [u8]) -> PurgeResult<Self> {
        let mut reader = ClassReader::new(info);
        reader.skip(4)?;
        let code_length = reader.u32()? as usize;
        reader.skip(code_length)?;
        let exception_count = reader.u16()? as usize;
        reader.skip(exception_count * 8)?;
        let body = reader.since(0);
        let attributes = parse_attributes(&mut reader)?;
        reader.finish("Code attribute")?;
        Ok(Self { body, attributes })
    }

    pub(crate) fn to_bytes(&self) -> PurgeResult<Vec<u8>> {
        let mut out = Vec::with_capacity(self.body.len() + 2);
        out.extend_from_slice(self.body);
        write_attributes(&mut out, &self.attributes)?;
        Ok(out)
    }
}

/// `record_component_info` from the `Record` attribute.
#[derive(Clone, Debug)]
pub(crate) struct RecordComponent<'a> {
    pub(crate) name_index: u16,
    pub(crate) descriptor_index: u16,
    pub(crate) attributes: Vec<Attribute<'a>>,
}

pub(crate) fn parse_record(info: &[u8]) -> PurgeResult<Vec<RecordComponent<'_>>> {
    let mut reader = ClassReader::new(info);
    let count = reader.u16()?;
    let mut components = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name_index = reader.u16()?;
        let descriptor_index = reader.u16()?;
        let attributes = parse_attributes(&mut reader)?;
        components.push(RecordComponent {
            name_index,
            descriptor_index,
            attributes,
        });
    }
    reader.finish("Record attribute")?;
    Ok(components)
}

pub(crate) fn write_record(components: &[RecordComponent<'_>]) -> PurgeResult<Vec<u8>> {
    let mut out = Vec::new();
    write_count(&mut out, components.len(), "record components")?;
    for component in components {
        write_u16(&mut out, component.name_index);
        write_u16(&mut out, component.descriptor_index);
        write_attributes(&mut out, &component.attributes)?;
    }
    Ok(out)
}

fn parse_attributes<'a>(reader: &mut ClassReader<'a>) -> PurgeResult<Vec<Attribute<'a>>> {
    let count = reader.u16()?;
    let mut attributes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name_index = reader.u16()?;
        let len = reader.u32()? as usize;
        let info = reader.bytes(len)?;
        attributes.push(Attribute {
            name_index,
            info: Cow::Borrowed(info),
        });
    }
    Ok(attributes)
}

fn write_attributes(out: &mut Vec<u8>, attributes: &[Attribute<'_>]) -> PurgeResult<()> {
    write_count(out, attributes.len(), "attributes")?;
    for attribute in attributes {
        write_u16(out, attribute.name_index);
        let len = u32::try_from(attribute.info.len())
            .map_err(|_| PurgeError::malformed("attribute longer than 4 GiB"))?;
        write_u32(out, len);
        out.extend_from_slice(&attribute.info);
    }
    Ok(())
}

fn write_count(out: &mut Vec<u8>, count: usize, what: &str) -> PurgeResult<()> {
    let count = u16::try_from(count)
        .map_err(|_| PurgeError::malformed(format!("too many {what}: {count}")))?;
    write_u16(out, count);
    Ok(())
}

pub(crate) fn write_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

pub(crate) fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}
