use std::str::FromStr;

use jdescriptor::TypeDescriptor;

use crate::error::{PurgeError, PurgeResult};

/// Translate an annotation type descriptor (`Lcom/example/Anno;`) into the
/// Java class name matchers are evaluated against (`com.example.Anno`).
pub(crate) fn annotation_class_name(descriptor: &str) -> PurgeResult<String> {
    let parsed = TypeDescriptor::from_str(descriptor).map_err(|err| {
        PurgeError::malformed(format!("invalid annotation descriptor {descriptor:?}: {err:?}"))
    })?;
    match parsed {
        TypeDescriptor::Object(internal) => Ok(internal.replace('/', ".")),
        _ => Err(PurgeError::malformed(format!(
            "annotation descriptor {descriptor:?} is not a class type"
        ))),
    }
}
