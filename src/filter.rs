use crate::element::ElementKind;
use crate::matcher::Matcher;

/// Matchers attached to one kind of attachment point.
#[derive(Clone, Debug, Default)]
pub(crate) struct ElementFilter {
    matchers: Vec<Matcher>,
}

impl ElementFilter {
    pub(crate) fn add_filtered(&mut self, matcher: Matcher) {
        self.matchers.push(matcher);
    }

    /// True when any attached matcher selects `annotation`.
    pub(crate) fn should_remove(&self, annotation: &str) -> bool {
        self.matchers.iter().any(|matcher| matcher.matches(annotation))
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }

    pub(crate) fn matchers(&self) -> &[Matcher] {
        &self.matchers
    }
}

/// One [`ElementFilter`] per [`ElementKind`].
#[derive(Clone, Debug, Default)]
pub(crate) struct FilterSet {
    filters: [ElementFilter; ElementKind::ALL.len()],
}

impl FilterSet {
    pub(crate) fn add_filtered(&mut self, kind: ElementKind, matcher: Matcher) {
        self.filters[kind.index()].add_filtered(matcher);
    }

    pub(crate) fn filter(&self, kind: ElementKind) -> &ElementFilter {
        &self.filters[kind.index()]
    }

    pub(crate) fn should_remove(&self, kind: ElementKind, annotation: &str) -> bool {
        self.filter(kind).should_remove(annotation)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.filters.iter().all(ElementFilter::is_empty)
    }
}
