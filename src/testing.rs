//! Class file builder and inspection helpers shared by unit tests.

use std::collections::HashMap;

use crate::classfile::{write_u16, write_u32};
use crate::config::RewriteFlags;
use crate::traversal::rewrite_class;

/// Minimal class file writer for tests.
///
/// Utf8 entries are shared the way javac shares them, so an annotation type
/// used in several places resolves to one constant pool index.
pub(crate) struct ClassFileBuilder {
    major_version: u16,
    cp: Vec<CpEntry>,
    next_index: u16,
    utf8_indices: HashMap<String, u16>,
    this_class: u16,
    super_class: u16,
    fields: Vec<Vec<u8>>,
    methods: Vec<Vec<u8>>,
    attributes: Vec<Vec<u8>>,
    record_components: Option<Vec<Vec<u8>>>,
}

enum CpEntry {
    Utf8(String),
    Class(u16),
    Long(i64),
}

impl ClassFileBuilder {
    pub(crate) fn new(class_name: &str, super_name: &str) -> Self {
        let mut builder = Self {
            major_version: 52,
            cp: Vec::new(),
            next_index: 1,
            utf8_indices: HashMap::new(),
            this_class: 0,
            super_class: 0,
            fields: Vec::new(),
            methods: Vec::new(),
            attributes: Vec::new(),
            record_components: None,
        };
        builder.this_class = builder.add_class(class_name);
        builder.super_class = builder.add_class(super_name);
        builder
    }

    /// Record class file (Java 17) extending `java/lang/Record`.
    pub(crate) fn record(class_name: &str) -> Self {
        let mut builder = Self::new(class_name, "java/lang/Record");
        builder.major_version = 61;
        builder.record_components = Some(Vec::new());
        builder
    }

    pub(crate) fn add_utf8(&mut self, value: &str) -> u16 {
        if let Some(index) = self.utf8_indices.get(value) {
            return *index;
        }
        let index = self.push(CpEntry::Utf8(value.to_string()), 1);
        self.utf8_indices.insert(value.to_string(), index);
        index
    }

    pub(crate) fn add_class(&mut self, name: &str) -> u16 {
        let name_index = self.add_utf8(name);
        self.push(CpEntry::Class(name_index), 1)
    }

    pub(crate) fn add_long(&mut self, value: i64) -> u16 {
        self.push(CpEntry::Long(value), 2)
    }

    fn push(&mut self, entry: CpEntry, slots: u16) -> u16 {
        let index = self.next_index;
        self.cp.push(entry);
        self.next_index += slots;
        index
    }

    /// Marker annotation (no element values) of the given type descriptor.
    pub(crate) fn annotation(&mut self, descriptor: &str) -> Vec<u8> {
        let mut bytes = Vec::new();
        write_u16(&mut bytes, self.add_utf8(descriptor));
        write_u16(&mut bytes, 0);
        bytes
    }

    /// Annotation with a single `value` string element.
    pub(crate) fn annotation_with_value(&mut self, descriptor: &str, value: &str) -> Vec<u8> {
        let mut bytes = Vec::new();
        write_u16(&mut bytes, self.add_utf8(descriptor));
        write_u16(&mut bytes, 1);
        write_u16(&mut bytes, self.add_utf8("value"));
        bytes.push(b's');
        write_u16(&mut bytes, self.add_utf8(value));
        bytes
    }

    pub(crate) fn attribute(&mut self, name: &str, info: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        write_u16(&mut bytes, self.add_utf8(name));
        write_u32(&mut bytes, info.len() as u32);
        bytes.extend_from_slice(info);
        bytes
    }

    pub(crate) fn annotations(&mut self, visible: bool, annotations: Vec<Vec<u8>>) -> Vec<u8> {
        let name = if visible {
            "RuntimeVisibleAnnotations"
        } else {
            "RuntimeInvisibleAnnotations"
        };
        let mut info = Vec::new();
        write_u16(&mut info, annotations.len() as u16);
        for annotation in annotations {
            info.extend(annotation);
        }
        self.attribute(name, &info)
    }

    /// Parameter annotations attribute, one annotation list per parameter.
    pub(crate) fn parameter_annotations(
        &mut self,
        visible: bool,
        parameters: Vec<Vec<Vec<u8>>>,
    ) -> Vec<u8> {
        let name = if visible {
            "RuntimeVisibleParameterAnnotations"
        } else {
            "RuntimeInvisibleParameterAnnotations"
        };
        let mut info = vec![parameters.len() as u8];
        for annotations in parameters {
            write_u16(&mut info, annotations.len() as u16);
            for annotation in annotations {
                info.extend(annotation);
            }
        }
        self.attribute(name, &info)
    }

    pub(crate) fn add_class_annotations(&mut self, visible: bool, annotations: Vec<Vec<u8>>) {
        let attribute = self.annotations(visible, annotations);
        self.attributes.push(attribute);
    }

    pub(crate) fn add_source_file(&mut self, file_name: &str) {
        let mut info = Vec::new();
        write_u16(&mut info, self.add_utf8(file_name));
        let attribute = self.attribute("SourceFile", &info);
        self.attributes.push(attribute);
    }

    pub(crate) fn add_field(
        &mut self,
        access_flags: u16,
        name: &str,
        descriptor: &str,
        attributes: Vec<Vec<u8>>,
    ) {
        let member = self.member(access_flags, name, descriptor, attributes);
        self.fields.push(member);
    }

    /// Add a method. A non-empty `code` becomes a `Code` attribute carrying
    /// a `LineNumberTable` and an empty `StackMapTable`.
    pub(crate) fn add_method(
        &mut self,
        access_flags: u16,
        name: &str,
        descriptor: &str,
        code: Vec<u8>,
        mut attributes: Vec<Vec<u8>>,
    ) {
        if !code.is_empty() {
            let code_attribute = self.code(&code);
            attributes.insert(0, code_attribute);
        }
        let member = self.member(access_flags, name, descriptor, attributes);
        self.methods.push(member);
    }

    /// Add a record component; only valid on builders from [`Self::record`].
    pub(crate) fn add_record_component(
        &mut self,
        name: &str,
        descriptor: &str,
        attributes: Vec<Vec<u8>>,
    ) {
        let mut bytes = Vec::new();
        write_u16(&mut bytes, self.add_utf8(name));
        write_u16(&mut bytes, self.add_utf8(descriptor));
        write_u16(&mut bytes, attributes.len() as u16);
        for attribute in attributes {
            bytes.extend(attribute);
        }
        self.record_components
            .as_mut()
            .expect("record components need ClassFileBuilder::record")
            .push(bytes);
    }

    fn code(&mut self, code: &[u8]) -> Vec<u8> {
        let mut line_numbers = Vec::new();
        write_u16(&mut line_numbers, 1);
        write_u16(&mut line_numbers, 0);
        write_u16(&mut line_numbers, 1);
        let line_number_table = self.attribute("LineNumberTable", &line_numbers);
        let stack_map_table = self.attribute("StackMapTable", &[0, 0]);

        let mut info = Vec::new();
        write_u16(&mut info, 2);
        write_u16(&mut info, 4);
        write_u32(&mut info, code.len() as u32);
        info.extend_from_slice(code);
        write_u16(&mut info, 0);
        write_u16(&mut info, 2);
        info.extend(line_number_table);
        info.extend(stack_map_table);
        self.attribute("Code", &info)
    }

    fn member(
        &mut self,
        access_flags: u16,
        name: &str,
        descriptor: &str,
        attributes: Vec<Vec<u8>>,
    ) -> Vec<u8> {
        let mut bytes = Vec::new();
        write_u16(&mut bytes, access_flags);
        write_u16(&mut bytes, self.add_utf8(name));
        write_u16(&mut bytes, self.add_utf8(descriptor));
        write_u16(&mut bytes, attributes.len() as u16);
        for attribute in attributes {
            bytes.extend(attribute);
        }
        bytes
    }

    pub(crate) fn finish(mut self) -> Vec<u8> {
        if let Some(components) = self.record_components.take() {
            let mut info = Vec::new();
            write_u16(&mut info, components.len() as u16);
            for component in components {
                info.extend(component);
            }
            let record = self.attribute("Record", &info);
            self.attributes.push(record);
        }

        let mut bytes = Vec::new();
        write_u32(&mut bytes, 0xCAFEBABE);
        write_u16(&mut bytes, 0);
        write_u16(&mut bytes, self.major_version);
        write_u16(&mut bytes, self.next_index);
        for entry in &self.cp {
            entry.write(&mut bytes);
        }
        write_u16(&mut bytes, 0x0021);
        write_u16(&mut bytes, self.this_class);
        write_u16(&mut bytes, self.super_class);
        write_u16(&mut bytes, 0);
        for group in [&self.fields, &self.methods, &self.attributes] {
            write_u16(&mut bytes, group.len() as u16);
            for item in group {
                bytes.extend_from_slice(item);
            }
        }
        bytes
    }
}

impl CpEntry {
    fn write(&self, bytes: &mut Vec<u8>) {
        match self {
            CpEntry::Utf8(value) => {
                bytes.push(1);
                write_u16(bytes, value.len() as u16);
                bytes.extend_from_slice(value.as_bytes());
            }
            CpEntry::Class(name_index) => {
                bytes.push(7);
                write_u16(bytes, *name_index);
            }
            CpEntry::Long(value) => {
                bytes.push(5);
                bytes.extend_from_slice(&value.to_be_bytes());
            }
        }
    }
}

/// Every annotation still present in `bytes`, one `"<kind> <location> @<type>"`
/// line per attachment point, in traversal order.
pub(crate) fn annotation_census(bytes: &[u8]) -> Vec<String> {
    let mut seen = Vec::new();
    rewrite_class(bytes, RewriteFlags::default(), |point| {
        seen.push(format!(
            "{} {} @{}",
            point.kind,
            point.location(),
            point.annotation
        ));
        false
    })
    .expect("census parse");
    seen
}

/// Names of the attributes nested in the first method's `Code` attribute.
pub(crate) fn code_attribute_names(bytes: &[u8]) -> Vec<String> {
    use crate::classfile::{CODE, ClassFile, CodeAttribute};

    let class = ClassFile::parse(bytes).expect("parse");
    let pool = &class.constant_pool;
    let Some(code) = class.methods.first().and_then(|method| {
        method
            .attributes
            .iter()
            .find(|attribute| attribute.name(pool).ok() == Some(CODE))
    }) else {
        return Vec::new();
    };
    CodeAttribute::parse(&code.info)
        .expect("code")
        .attributes
        .iter()
        .map(|attribute| attribute.name(pool).expect("name").to_string())
        .collect()
}

/// Names of the class-level attributes.
pub(crate) fn class_attribute_names(bytes: &[u8]) -> Vec<String> {
    use crate::classfile::ClassFile;

    let class = ClassFile::parse(bytes).expect("parse");
    class
        .attributes
        .iter()
        .map(|attribute| {
            attribute
                .name(&class.constant_pool)
                .expect("name")
                .to_string()
        })
        .collect()
}
