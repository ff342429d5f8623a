use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::PurgeError;

/// Class-file locations that can carry a retained annotation.
///
/// Local variables are absent: their annotations are not kept in class files
/// (JLS 9.6.4.2), so there is nothing to purge.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize)]
#[serde(try_from = "String")]
pub(crate) enum ElementKind {
    Type,
    Field,
    Constructor,
    Method,
    Parameter,
    RecordComponent,
}

impl ElementKind {
    /// Every kind, in dispatch order.
    pub(crate) const ALL: [ElementKind; 6] = [
        ElementKind::Type,
        ElementKind::Field,
        ElementKind::Constructor,
        ElementKind::Method,
        ElementKind::Parameter,
        ElementKind::RecordComponent,
    ];

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            ElementKind::Type => "type",
            ElementKind::Field => "field",
            ElementKind::Constructor => "constructor",
            ElementKind::Method => "method",
            ElementKind::Parameter => "parameter",
            ElementKind::RecordComponent => "record-component",
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ElementKind {
    type Err = PurgeError;

    /// Accepts singular and plural spellings with `-`, `_` or no separator,
    /// case-insensitively (`FIELDS`, `record_component`, `recordComponents`).
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized: String = value
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .flat_map(char::to_lowercase)
            .collect();
        let singular = normalized.strip_suffix('s').unwrap_or(&normalized);
        let kind = match singular {
            "type" => ElementKind::Type,
            "field" => ElementKind::Field,
            "constructor" => ElementKind::Constructor,
            "method" => ElementKind::Method,
            "parameter" => ElementKind::Parameter,
            "recordcomponent" => ElementKind::RecordComponent,
            _ => {
                return Err(PurgeError::configuration(format!(
                    "unknown element kind {value:?} (expected one of: {})",
                    ElementKind::ALL.map(ElementKind::as_str).join(", ")
                )));
            }
        };
        Ok(kind)
    }
}

impl TryFrom<String> for ElementKind {
    type Error = PurgeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Method names the JVM reserves for initializers.
pub(crate) const CONSTRUCTOR_NAME: &str = "<init>";
pub(crate) const STATIC_INITIALIZER_NAME: &str = "<clinit>";

/// Kind that annotations declared on an executable member belong to, or
/// `None` for the static initializer which never carries user annotations.
pub(crate) fn executable_kind(name: &str) -> Option<ElementKind> {
    match name {
        CONSTRUCTOR_NAME => Some(ElementKind::Constructor),
        STATIC_INITIALIZER_NAME => None,
        _ => Some(ElementKind::Method),
    }
}
