use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::element::ElementKind;
use crate::error::{PurgeError, PurgeResult};
use crate::filter::FilterSet;
use crate::matcher::Matcher;

/// Codec hints that drop attributes unrelated to annotations.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum RewriteFlag {
    /// Drop source file, method parameter, line number and local variable tables.
    SkipDebug,
    /// Drop method bodies.
    SkipCode,
    /// Drop stack map frames.
    SkipFrames,
    /// Accepted for compatibility; frames are always re-emitted verbatim.
    ExpandFrames,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct RewriteFlags {
    pub(crate) skip_debug: bool,
    pub(crate) skip_code: bool,
    pub(crate) skip_frames: bool,
    pub(crate) expand_frames: bool,
}

impl RewriteFlags {
    pub(crate) fn insert(&mut self, flag: RewriteFlag) {
        match flag {
            RewriteFlag::SkipDebug => self.skip_debug = true,
            RewriteFlag::SkipCode => self.skip_code = true,
            RewriteFlag::SkipFrames => self.skip_frames = true,
            RewriteFlag::ExpandFrames => self.expand_frames = true,
        }
    }

    /// True when some flag changes the emitted bytes.
    pub(crate) fn rewrites_attributes(&self) -> bool {
        self.skip_debug || self.skip_code || self.skip_frames
    }

    /// Flags that are accepted but leave the emitted bytes as they are.
    pub(crate) fn inert(&self) -> Vec<RewriteFlag> {
        let mut inert = Vec::new();
        if self.expand_frames {
            inert.push(RewriteFlag::ExpandFrames);
        }
        inert
    }
}

impl FromIterator<RewriteFlag> for RewriteFlags {
    fn from_iter<I: IntoIterator<Item = RewriteFlag>>(iter: I) -> Self {
        let mut flags = RewriteFlags::default();
        for flag in iter {
            flags.insert(flag);
        }
        flags
    }
}

/// Element kinds a rule applies to.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(try_from = "TargetsRepr")]
pub(crate) enum Targets {
    #[default]
    All,
    Kinds(Vec<ElementKind>),
}

impl Targets {
    /// Expand to the explicit kind list; `All` never reaches dispatch.
    pub(crate) fn kinds(&self) -> Vec<ElementKind> {
        match self {
            Targets::All => ElementKind::ALL.to_vec(),
            Targets::Kinds(kinds) => {
                let mut unique = Vec::with_capacity(kinds.len());
                for kind in kinds {
                    if !unique.contains(kind) {
                        unique.push(*kind);
                    }
                }
                unique
            }
        }
    }

    /// Build from kind names as typed by a user, where `all` selects every kind.
    pub(crate) fn from_names<S: AsRef<str>>(names: &[S]) -> PurgeResult<Self> {
        let mut kinds = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            if name.eq_ignore_ascii_case("all") {
                return Ok(Targets::All);
            }
            kinds.push(name.parse()?);
        }
        if kinds.is_empty() {
            return Err(PurgeError::configuration("rule targets no element kinds"));
        }
        Ok(Targets::Kinds(kinds))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TargetsRepr {
    Keyword(String),
    Names(Vec<String>),
}

impl TryFrom<TargetsRepr> for Targets {
    type Error = PurgeError;

    fn try_from(value: TargetsRepr) -> Result<Self, Self::Error> {
        match value {
            TargetsRepr::Keyword(keyword) => Targets::from_names(&[keyword]),
            TargetsRepr::Names(names) => Targets::from_names(&names),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum MatcherKind {
    Literal,
    Regex,
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct MatcherSpec {
    pub(crate) kind: MatcherKind,
    pub(crate) value: String,
}

/// One removal rule as written in a configuration file.
///
/// The matcher is given either as `matcher: {kind, value}` or through the
/// `name` (literal) / `regexp` shorthands.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct RuleSpec {
    #[serde(default)]
    pub(crate) matcher: Option<MatcherSpec>,
    #[serde(default)]
    pub(crate) name: Option<String>,
    #[serde(default)]
    pub(crate) regexp: Option<String>,
    #[serde(default, alias = "from")]
    pub(crate) element_kinds: Targets,
}

impl RuleSpec {
    fn into_rule(self) -> PurgeResult<Rule> {
        let matcher = match (self.matcher, self.name, self.regexp) {
            (Some(spec), None, None) => match spec.kind {
                MatcherKind::Literal => Matcher::literal(spec.value),
                MatcherKind::Regex => Matcher::regex(spec.value)?,
            },
            (None, Some(name), None) => Matcher::literal(name),
            (None, None, Some(pattern)) => Matcher::regex(pattern)?,
            (None, None, None) => {
                return Err(PurgeError::configuration(
                    "rule needs a matcher: set either name or regexp",
                ));
            }
            _ => {
                return Err(PurgeError::configuration(
                    "rule sets more than one matcher: use only one of matcher, name or regexp",
                ));
            }
        };
        Ok(Rule {
            targets: self.element_kinds,
            matcher,
        })
    }
}

/// Contents of a JSON configuration file.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct ConfigFile {
    #[serde(default)]
    pub(crate) rules: Vec<RuleSpec>,
    #[serde(default)]
    pub(crate) rewrite_flags: Vec<RewriteFlag>,
    #[serde(default)]
    pub(crate) overwrite: bool,
}

pub(crate) fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    parse_config(&text).with_context(|| format!("failed to load {}", path.display()))
}

fn parse_config(text: &str) -> PurgeResult<ConfigFile> {
    let mut deserializer = serde_json::Deserializer::from_str(text);
    serde_path_to_error::deserialize(&mut deserializer).map_err(|err| {
        let path = err.path().to_string();
        PurgeError::configuration(format!("{path}: {}", err.into_inner()))
    })
}

/// A matcher paired with the element kinds it applies to.
#[derive(Clone, Debug)]
pub(crate) struct Rule {
    pub(crate) targets: Targets,
    pub(crate) matcher: Matcher,
}

/// Read-only filter set and codec hints for one run.
#[derive(Clone, Debug)]
pub(crate) struct Configuration {
    pub(crate) filters: FilterSet,
    pub(crate) rewrite_flags: RewriteFlags,
}

/// Collects rules from flags and configuration files.
#[derive(Debug, Default)]
pub(crate) struct ConfigBuilder {
    rules: Vec<Rule>,
    rewrite_flags: RewriteFlags,
}

impl ConfigBuilder {
    pub(crate) fn rule(&mut self, targets: Targets, matcher: Matcher) -> &mut Self {
        self.rules.push(Rule { targets, matcher });
        self
    }

    pub(crate) fn rule_spec(&mut self, spec: RuleSpec) -> PurgeResult<&mut Self> {
        self.rules.push(spec.into_rule()?);
        Ok(self)
    }

    pub(crate) fn rewrite_flag(&mut self, flag: RewriteFlag) -> &mut Self {
        self.rewrite_flags.insert(flag);
        self
    }

    pub(crate) fn config_file(&mut self, file: ConfigFile) -> PurgeResult<&mut Self> {
        for spec in file.rules {
            self.rule_spec(spec)?;
        }
        for flag in file.rewrite_flags {
            self.rewrite_flag(flag);
        }
        Ok(self)
    }

    pub(crate) fn build(&self) -> PurgeResult<Configuration> {
        if self.rules.is_empty() {
            return Err(PurgeError::configuration("no annotations set to be removed"));
        }
        let mut filters = FilterSet::default();
        for rule in &self.rules {
            for kind in rule.targets.kinds() {
                filters.add_filtered(kind, rule.matcher.clone());
            }
        }
        Ok(Configuration {
            filters,
            rewrite_flags: self.rewrite_flags,
        })
    }
}
