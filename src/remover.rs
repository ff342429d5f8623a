use jclassfile::class_file;
use tracing::debug;

use crate::config::{Configuration, RewriteFlags};
#[cfg(test)]
use crate::element::ElementKind;
use crate::error::{PurgeError, PurgeResult};
use crate::filter::FilterSet;
#[cfg(test)]
use crate::matcher::Matcher;
use crate::traversal::{Rewrite, rewrite_class};

/// Per-class transform applied to every class an input yields.
pub(crate) trait ClassOptimizer: Sync {
    fn optimize(&self, data: &[u8]) -> PurgeResult<Rewrite>;
}

/// Strips annotation references selected by a [`FilterSet`].
#[derive(Clone, Debug, Default)]
pub(crate) struct AnnotationRemover {
    filters: FilterSet,
    flags: RewriteFlags,
}

impl AnnotationRemover {
    pub(crate) fn new(configuration: Configuration) -> Self {
        Self {
            filters: configuration.filters,
            flags: configuration.rewrite_flags,
        }
    }

    /// Remove annotations matching `matcher` from every kind of element.
    #[cfg(test)]
    pub(crate) fn remove(&mut self, matcher: Matcher) -> &mut Self {
        for kind in ElementKind::ALL {
            self.filters.add_filtered(kind, matcher.clone());
        }
        self
    }

    #[cfg(test)]
    pub(crate) fn remove_from(&mut self, kind: ElementKind, matcher: Matcher) -> &mut Self {
        self.filters.add_filtered(kind, matcher);
        self
    }

    #[cfg(test)]
    pub(crate) fn rewrite_flags(&mut self, flags: RewriteFlags) -> &mut Self {
        self.flags = flags;
        self
    }

    pub(crate) fn filters(&self) -> &FilterSet {
        &self.filters
    }
}

impl ClassOptimizer for AnnotationRemover {
    fn optimize(&self, data: &[u8]) -> PurgeResult<Rewrite> {
        let rewrite = rewrite_class(data, self.flags, |point| {
            self.filters.should_remove(point.kind, point.annotation)
        })?;
        validate(data)?;
        for removal in &rewrite.removed {
            debug!(class = %rewrite.class_name, "removed {removal}");
        }
        Ok(rewrite)
    }
}

/// Full structural parse of the input; the codec itself only looks at
/// attribute boundaries.
fn validate(data: &[u8]) -> PurgeResult<()> {
    match class_file::parse(data) {
        Ok(_) => Ok(()),
        Err(err) => {
            let message = format!("{err}");
            // The parser rejects attributes it has no model for; the codec
            // carries those through as opaque bytes.
            if message.contains("unmatched attribute") {
                debug!("tolerating class file parser error: {message}");
                return Ok(());
            }
            Err(PurgeError::malformed(format!("invalid class file: {message}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigBuilder, RewriteFlag, Targets};
    use crate::testing::{ClassFileBuilder, annotation_census};

    /// Type, field, constructor, method and parameter each carrying
    /// `com.example.Anno`, plus `java.lang.Deprecated` on the type and method.
    fn example_class() -> Vec<u8> {
        let mut builder = ClassFileBuilder::new("com/example/TestExample", "java/lang/Object");
        let anno = builder.annotation("Lcom/example/Anno;");
        let deprecated = builder.annotation("Ljava/lang/Deprecated;");
        builder.add_class_annotations(true, vec![anno.clone(), deprecated.clone()]);

        let field = builder.annotations(true, vec![anno.clone()]);
        builder.add_field(0x0002, "value", "Ljava/lang/String;", vec![field]);

        let ctor = builder.annotations(true, vec![anno.clone()]);
        let ctor_parameters = builder.parameter_annotations(true, vec![vec![anno.clone()]]);
        builder.add_method(
            0x0001,
            "<init>",
            "(Ljava/lang/String;)V",
            vec![0x2a, 0xb1],
            vec![ctor, ctor_parameters],
        );

        let method = builder.annotations(true, vec![anno.clone(), deprecated]);
        let method_parameters = builder.parameter_annotations(false, vec![vec![], vec![anno]]);
        builder.add_method(
            0x0001,
            "compute",
            "(IJ)V",
            vec![0xb1],
            vec![method, method_parameters],
        );
        builder.finish()
    }

    fn remover_for(kinds: &[ElementKind]) -> AnnotationRemover {
        let mut remover = AnnotationRemover::default();
        for kind in kinds {
            remover.remove_from(*kind, Matcher::literal("com.example.Anno"));
        }
        remover
    }

    fn census_after(remover: &AnnotationRemover, input: &[u8]) -> Vec<String> {
        let rewrite = remover.optimize(input).expect("optimize");
        annotation_census(rewrite.bytes.as_deref().unwrap_or(input))
    }

    fn anno_kinds(census: &[String]) -> Vec<&str> {
        census
            .iter()
            .filter(|line| line.ends_with("@com.example.Anno"))
            .filter_map(|line| line.split(' ').next())
            .collect()
    }

    #[test]
    fn each_kind_removes_only_its_own_references() {
        let input = example_class();
        for kind in ElementKind::ALL {
            if kind == ElementKind::RecordComponent {
                continue;
            }
            let census = census_after(&remover_for(&[kind]), &input);
            let remaining = anno_kinds(&census);
            assert!(
                !remaining.contains(&kind.as_str()),
                "{kind} should be removed: {census:?}"
            );
            let expected = if kind == ElementKind::Parameter { 4 } else { 5 };
            assert_eq!(remaining.len(), expected, "{kind}: {census:?}");
            assert!(
                census
                    .iter()
                    .filter(|line| line.ends_with("@java.lang.Deprecated"))
                    .count()
                    == 2,
                "unrelated annotations must survive: {census:?}"
            );
        }
    }

    #[test]
    fn type_only_removal_keeps_other_annotations() {
        let census = census_after(&remover_for(&[ElementKind::Type]), &example_class());
        assert_eq!(
            census,
            vec![
                "type com.example.TestExample @java.lang.Deprecated",
                "field com.example.TestExample.value @com.example.Anno",
                "constructor com.example.TestExample.<init>(Ljava/lang/String;)V @com.example.Anno",
                "parameter com.example.TestExample.<init>(Ljava/lang/String;)V parameter 0 @com.example.Anno",
                "method com.example.TestExample.compute(IJ)V @com.example.Anno",
                "method com.example.TestExample.compute(IJ)V @java.lang.Deprecated",
                "parameter com.example.TestExample.compute(IJ)V parameter 1 @com.example.Anno",
            ]
        );
    }

    #[test]
    fn removing_from_all_kinds_leaves_only_unrelated_annotations() {
        let mut remover = AnnotationRemover::default();
        remover.remove(Matcher::literal("com.example.Anno"));
        let rewrite = remover.optimize(&example_class()).unwrap();

        assert_eq!(rewrite.removed.len(), 6);
        assert_eq!(
            annotation_census(&rewrite.bytes.expect("rewritten")),
            vec![
                "type com.example.TestExample @java.lang.Deprecated",
                "method com.example.TestExample.compute(IJ)V @java.lang.Deprecated",
            ]
        );
    }

    #[test]
    fn all_target_matches_listing_every_kind() {
        let input = example_class();
        let mut all = ConfigBuilder::default();
        all.rule(Targets::All, Matcher::literal("com.example.Anno"));
        let mut listed = ConfigBuilder::default();
        listed.rule(
            Targets::Kinds(ElementKind::ALL.to_vec()),
            Matcher::literal("com.example.Anno"),
        );

        let all = AnnotationRemover::new(all.build().unwrap()).optimize(&input).unwrap();
        let listed = AnnotationRemover::new(listed.build().unwrap())
            .optimize(&input)
            .unwrap();

        assert_eq!(all.bytes, listed.bytes);
        assert_eq!(all.removed, listed.removed);
    }

    #[test]
    fn second_pass_is_byte_identical() {
        let mut remover = AnnotationRemover::default();
        remover.remove_from(ElementKind::Method, Matcher::regex("com\\.example\\..*").unwrap());
        remover.remove_from(ElementKind::Parameter, Matcher::literal("com.example.Anno"));

        let once = remover
            .optimize(&example_class())
            .unwrap()
            .bytes
            .expect("rewritten");
        let twice = remover.optimize(&once).unwrap();

        assert!(twice.bytes.is_none());
        assert!(twice.removed.is_empty());
    }

    #[test]
    fn no_match_round_trips_input() {
        let mut remover = AnnotationRemover::default();
        remover.remove(Matcher::literal("com.example.Other"));
        let rewrite = remover.optimize(&example_class()).unwrap();

        assert_eq!(rewrite.class_name, "com.example.TestExample");
        assert!(rewrite.bytes.is_none());
        assert!(rewrite.removed.is_empty());
    }

    #[test]
    fn empty_configuration_removes_nothing() {
        let rewrite = AnnotationRemover::default().optimize(&example_class()).unwrap();
        assert!(rewrite.bytes.is_none());
    }

    #[test]
    fn regex_must_match_whole_name() {
        let mut remover = AnnotationRemover::default();
        remover.remove(Matcher::regex("com\\.example").unwrap());
        let rewrite = remover.optimize(&example_class()).unwrap();
        assert!(rewrite.removed.is_empty());
    }

    #[test]
    fn record_component_scenario() {
        let mut builder = ClassFileBuilder::record("com/example/TestExampleRecord");
        let anno = builder.annotation("Lcom/example/Anno;");
        let component = builder.annotations(true, vec![anno.clone()]);
        builder.add_record_component("name", "Ljava/lang/String;", vec![component]);
        let field = builder.annotations(true, vec![anno.clone()]);
        builder.add_field(0x0012, "name", "Ljava/lang/String;", vec![field]);
        let parameters = builder.parameter_annotations(true, vec![vec![anno]]);
        builder.add_method(
            0x0001,
            "<init>",
            "(Ljava/lang/String;)V",
            vec![0x2a, 0xb1],
            vec![parameters],
        );
        let input = builder.finish();

        let census = census_after(&remover_for(&[ElementKind::RecordComponent]), &input);
        assert_eq!(
            census,
            vec![
                "field com.example.TestExampleRecord.name @com.example.Anno",
                "parameter com.example.TestExampleRecord.<init>(Ljava/lang/String;)V parameter 0 @com.example.Anno",
            ]
        );

        let census = census_after(&remover_for(&[ElementKind::Field]), &input);
        assert_eq!(
            census,
            vec![
                "record-component com.example.TestExampleRecord.name @com.example.Anno",
                "parameter com.example.TestExampleRecord.<init>(Ljava/lang/String;)V parameter 0 @com.example.Anno",
            ]
        );
    }

    #[test]
    fn rewrite_flags_apply_without_matches() {
        let mut remover = AnnotationRemover::default();
        remover.rewrite_flags([RewriteFlag::SkipCode].into_iter().collect());
        let rewrite = remover.optimize(&example_class()).unwrap();
        let output = rewrite.bytes.expect("rewritten");
        assert!(output.len() < example_class().len());
        assert_eq!(annotation_census(&output), annotation_census(&example_class()));
    }

    #[test]
    fn malformed_input_is_rejected() {
        let remover = remover_for(&ElementKind::ALL);
        let err = remover.optimize(b"\xCA\xFE\xBA\xBE\x00").unwrap_err();
        assert!(matches!(err, PurgeError::MalformedArtifact(_)));

        let mut truncated = example_class();
        truncated.truncate(truncated.len() / 2);
        let err = remover.optimize(&truncated).unwrap_err();
        assert!(matches!(err, PurgeError::MalformedArtifact(_)));
    }

    #[test]
    fn filters_reflect_configuration() {
        let mut builder = ConfigBuilder::default();
        builder.rule(
            Targets::Kinds(vec![ElementKind::Field]),
            Matcher::literal("com.example.Anno"),
        );
        let remover = AnnotationRemover::new(builder.build().unwrap());
        assert!(remover.filters().should_remove(ElementKind::Field, "com.example.Anno"));
        assert!(!remover.filters().should_remove(ElementKind::Type, "com.example.Anno"));
    }
}
