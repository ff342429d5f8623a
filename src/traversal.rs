//! Single pass over one class that offers every annotation attachment point
//! to a decision callback and re-emits the class without the rejected ones.

use std::borrow::Cow;
use std::fmt;

use crate::annotations::{Filtered, filter_annotations, filter_parameter_annotations};
use crate::classfile::{
    Attribute, CODE, ClassFile, CodeAttribute, ConstantPool, LINE_NUMBER_TABLE,
    LOCAL_VARIABLE_TABLE, LOCAL_VARIABLE_TYPE_TABLE, METHOD_PARAMETERS, RECORD,
    RUNTIME_INVISIBLE_ANNOTATIONS, RUNTIME_INVISIBLE_PARAMETER_ANNOTATIONS,
    RUNTIME_VISIBLE_ANNOTATIONS, RUNTIME_VISIBLE_PARAMETER_ANNOTATIONS, SOURCE_DEBUG_EXTENSION,
    SOURCE_FILE, STACK_MAP_TABLE, parse_record, write_record,
};
use crate::config::RewriteFlags;
use crate::descriptor::annotation_class_name;
use crate::element::{ElementKind, executable_kind};
use crate::error::PurgeResult;

/// One annotation at one location, as offered to the decision callback.
#[derive(Clone, Copy, Debug)]
pub(crate) struct AttachmentPoint<'a> {
    pub(crate) kind: ElementKind,
    /// Dotted name of the class being traversed.
    pub(crate) class_name: &'a str,
    /// Field, method or record component name; `None` for the class itself.
    pub(crate) member_name: Option<&'a str>,
    pub(crate) member_descriptor: Option<&'a str>,
    pub(crate) parameter: Option<u8>,
    /// Dotted annotation type name.
    pub(crate) annotation: &'a str,
    /// `RuntimeVisible*` rather than `RuntimeInvisible*`.
    pub(crate) visible: bool,
}

impl AttachmentPoint<'_> {
    /// Human readable location, e.g. `com.example.A.run(I)V parameter 0`.
    pub(crate) fn location(&self) -> String {
        let mut location = self.class_name.to_string();
        if let Some(name) = self.member_name {
            location.push('.');
            location.push_str(name);
            if matches!(
                self.kind,
                ElementKind::Constructor | ElementKind::Method | ElementKind::Parameter
            ) {
                location.push_str(self.member_descriptor.unwrap_or_default());
            }
        }
        if let Some(parameter) = self.parameter {
            location.push_str(&format!(" parameter {parameter}"));
        }
        location
    }

    fn to_removal(self) -> Removal {
        Removal {
            kind: self.kind,
            location: self.location(),
            annotation: self.annotation.to_string(),
            visible: self.visible,
        }
    }
}

/// An annotation reference that was dropped.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Removal {
    pub(crate) kind: ElementKind,
    pub(crate) location: String,
    pub(crate) annotation: String,
    pub(crate) visible: bool,
}

impl fmt::Display for Removal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} @{}", self.kind, self.location, self.annotation)?;
        if !self.visible {
            f.write_str(" (invisible)")?;
        }
        Ok(())
    }
}

/// Outcome of one class traversal.
#[derive(Debug)]
pub(crate) struct Rewrite {
    /// Dotted name of the traversed class.
    pub(crate) class_name: String,
    /// Re-encoded class, or `None` when the input bytes stand unchanged.
    pub(crate) bytes: Option<Vec<u8>>,
    pub(crate) removed: Vec<Removal>,
}

/// Where an attribute list sits, which decides the kind of its annotations.
#[derive(Clone, Copy)]
struct Site<'s> {
    /// Kind for declaration annotations; `None` skips them (`<clinit>`).
    kind: Option<ElementKind>,
    member_name: Option<&'s str>,
    member_descriptor: Option<&'s str>,
    /// Parameter annotations are read only on methods.
    parameters: bool,
    /// Class-level lists own the `Record` attribute.
    class: bool,
}

enum Disposition {
    Keep,
    Drop,
    Replace(Vec<u8>),
}

impl From<Filtered> for Disposition {
    fn from(filtered: Filtered) -> Self {
        match filtered {
            Filtered::Unchanged => Disposition::Keep,
            Filtered::Replaced(info) => Disposition::Replace(info),
            Filtered::Emptied => Disposition::Drop,
        }
    }
}

struct Traversal<'c, 'd, F> {
    pool: &'c ConstantPool<'d>,
    class_name: &'c str,
    flags: RewriteFlags,
    decide: F,
    removed: Vec<Removal>,
}

impl<F> Traversal<'_, '_, F>
where
    F: FnMut(&AttachmentPoint<'_>) -> bool,
{
    /// Filter one attribute list in place; true when anything changed.
    fn attributes<'x>(
        &mut self,
        attributes: &mut Vec<Attribute<'x>>,
        site: Site<'_>,
    ) -> PurgeResult<bool> {
        let pool = self.pool;
        let mut changed = false;
        let mut kept = Vec::with_capacity(attributes.len());
        for mut attribute in attributes.drain(..) {
            let disposition = match attribute.name(pool)? {
                RUNTIME_VISIBLE_ANNOTATIONS => self.annotations(&attribute.info, site, true)?,
                RUNTIME_INVISIBLE_ANNOTATIONS => self.annotations(&attribute.info, site, false)?,
                RUNTIME_VISIBLE_PARAMETER_ANNOTATIONS if site.parameters => {
                    self.parameter_annotations(&attribute.info, site, true)?
                }
                RUNTIME_INVISIBLE_PARAMETER_ANNOTATIONS if site.parameters => {
                    self.parameter_annotations(&attribute.info, site, false)?
                }
                RECORD if site.class => self.record(&attribute.info)?,
                CODE if self.flags.skip_code => Disposition::Drop,
                CODE if self.flags.skip_debug || self.flags.skip_frames => {
                    self.code(&attribute.info)?
                }
                SOURCE_FILE | SOURCE_DEBUG_EXTENSION | METHOD_PARAMETERS
                    if self.flags.skip_debug =>
                {
                    Disposition::Drop
                }
                _ => Disposition::Keep,
            };
            match disposition {
                Disposition::Keep => kept.push(attribute),
                Disposition::Drop => changed = true,
                Disposition::Replace(info) => {
                    attribute.info = Cow::Owned(info);
                    kept.push(attribute);
                    changed = true;
                }
            }
        }
        *attributes = kept;
        Ok(changed)
    }

    fn annotations(
        &mut self,
        info: &[u8],
        site: Site<'_>,
        visible: bool,
    ) -> PurgeResult<Disposition> {
        let Some(kind) = site.kind else {
            return Ok(Disposition::Keep);
        };
        let filtered = filter_annotations(info, |type_index| {
            self.offer(kind, site, None, visible, type_index)
        })?;
        Ok(filtered.into())
    }

    fn parameter_annotations(
        &mut self,
        info: &[u8],
        site: Site<'_>,
        visible: bool,
    ) -> PurgeResult<Disposition> {
        let filtered = filter_parameter_annotations(info, |parameter, type_index| {
            self.offer(ElementKind::Parameter, site, Some(parameter), visible, type_index)
        })?;
        Ok(filtered.into())
    }

    fn offer(
        &mut self,
        kind: ElementKind,
        site: Site<'_>,
        parameter: Option<u8>,
        visible: bool,
        type_index: u16,
    ) -> PurgeResult<bool> {
        let annotation = annotation_class_name(self.pool.utf8(type_index)?)?;
        let point = AttachmentPoint {
            kind,
            class_name: self.class_name,
            member_name: site.member_name,
            member_descriptor: site.member_descriptor,
            parameter,
            annotation: &annotation,
            visible,
        };
        let remove = (self.decide)(&point);
        if remove {
            self.removed.push(point.to_removal());
        }
        Ok(remove)
    }

    fn record(&mut self, info: &[u8]) -> PurgeResult<Disposition> {
        let pool = self.pool;
        let mut components = parse_record(info)?;
        let mut changed = false;
        for component in &mut components {
            let site = Site {
                kind: Some(ElementKind::RecordComponent),
                member_name: Some(pool.utf8(component.name_index)?),
                member_descriptor: Some(pool.utf8(component.descriptor_index)?),
                parameters: false,
                class: false,
            };
            changed |= self.attributes(&mut component.attributes, site)?;
        }
        if changed {
            Ok(Disposition::Replace(write_record(&components)?))
        } else {
            Ok(Disposition::Keep)
        }
    }

    fn code(&mut self, info: &[u8]) -> PurgeResult<Disposition> {
        let pool = self.pool;
        let flags = self.flags;
        let mut code = CodeAttribute::parse(info)?;
        let before = code.attributes.len();
        let mut names = Vec::with_capacity(before);
        for attribute in &code.attributes {
            names.push(attribute.name(pool)?);
        }
        let mut names = names.into_iter();
        code.attributes.retain(|_| {
            let name = names.next().unwrap_or_default();
            let debug = matches!(
                name,
                LINE_NUMBER_TABLE | LOCAL_VARIABLE_TABLE | LOCAL_VARIABLE_TYPE_TABLE
            );
            let frames = name == STACK_MAP_TABLE;
            !((flags.skip_debug && debug) || (flags.skip_frames && frames))
        });
        if code.attributes.len() == before {
            Ok(Disposition::Keep)
        } else {
            Ok(Disposition::Replace(code.to_bytes()?))
        }
    }
}

/// Traverse `data`, dropping every annotation `decide` returns true for and
/// applying `flags`.
///
/// The class is re-encoded only when something changed, so a pass that
/// removes nothing returns `bytes: None` and callers keep the input as is.
pub(crate) fn rewrite_class<F>(data: &[u8], flags: RewriteFlags, decide: F) -> PurgeResult<Rewrite>
where
    F: FnMut(&AttachmentPoint<'_>) -> bool,
{
    let mut class = ClassFile::parse(data)?;
    let class_name = class.name()?.replace('/', ".");

    let (changed, removed) = {
        let ClassFile {
            constant_pool,
            fields,
            methods,
            attributes,
            ..
        } = &mut class;
        let pool: &ConstantPool<'_> = constant_pool;
        let mut traversal = Traversal {
            pool,
            class_name: &class_name,
            flags,
            decide,
            removed: Vec::new(),
        };

        let mut changed = traversal.attributes(
            attributes,
            Site {
                kind: Some(ElementKind::Type),
                member_name: None,
                member_descriptor: None,
                parameters: false,
                class: true,
            },
        )?;
        for field in fields.iter_mut() {
            let site = Site {
                kind: Some(ElementKind::Field),
                member_name: Some(pool.utf8(field.name_index)?),
                member_descriptor: Some(pool.utf8(field.descriptor_index)?),
                parameters: false,
                class: false,
            };
            changed |= traversal.attributes(&mut field.attributes, site)?;
        }
        for method in methods.iter_mut() {
            let name = pool.utf8(method.name_index)?;
            let site = Site {
                kind: executable_kind(name),
                member_name: Some(name),
                member_descriptor: Some(pool.utf8(method.descriptor_index)?),
                parameters: true,
                class: false,
            };
            changed |= traversal.attributes(&mut method.attributes, site)?;
        }
        (changed, traversal.removed)
    };

    let bytes = if changed {
        Some(class.to_bytes()?)
    } else {
        None
    };
    Ok(Rewrite {
        class_name,
        bytes,
        removed,
    })
}
