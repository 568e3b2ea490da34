//! Registration options, per-call overrides and skip rules.

use regex::RegexBuilder;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

use crate::cast::{truthy, value_text, Kind};
use crate::record::Record;
use crate::resolve::Shape;

// =============================================================================
// Registration
// =============================================================================

/// Load-time check of a raw configuration; the error is a human-readable reason.
pub type ConfCheck = fn(&Value) -> Result<(), String>;

/// What a pipe declares about itself when it is registered.
#[derive(Debug, Clone)]
pub struct Options {
    /// Cast applied to the extracted field; `none` marks a source pipe
    pub ftype: Kind,
    /// Cast applied to configuration values
    pub ptype: Kind,
    /// Default dotted path to read; the whole item when unset
    pub field: Option<String>,
    /// Configuration key resolved as a rule list
    pub extract: Option<String>,
    pub listize: bool,
    pub objectify: bool,
    pub pdictize: bool,
    /// Declared emit default; sources and operators emit unless told otherwise
    pub emit: Option<bool>,
    /// Configuration defaults, losing to whatever the caller resolves
    pub defaults: Map<String, Value>,
    pub check: Option<ConfCheck>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            ftype: Kind::Pass,
            ptype: Kind::Pass,
            field: None,
            extract: None,
            listize: false,
            objectify: true,
            pdictize: true,
            emit: None,
            defaults: Map::new(),
            check: None,
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// A source pipe: no field extraction, emits by default.
    pub fn source() -> Self {
        Self {
            ftype: Kind::None,
            ..Self::default()
        }
    }

    pub fn ftype(mut self, kind: Kind) -> Self {
        self.ftype = kind;
        self
    }

    pub fn ptype(mut self, kind: Kind) -> Self {
        self.ptype = kind;
        self
    }

    pub fn field(mut self, path: impl Into<String>) -> Self {
        self.field = Some(path.into());
        self
    }

    /// Resolve `key` as a list of rules.
    pub fn extract(mut self, key: impl Into<String>) -> Self {
        self.extract = Some(key.into());
        self.listize = true;
        self
    }

    pub fn listize(mut self, listize: bool) -> Self {
        self.listize = listize;
        self
    }

    pub fn objectify(mut self, objectify: bool) -> Self {
        self.objectify = objectify;
        self
    }

    pub fn pdictize(mut self, pdictize: bool) -> Self {
        self.pdictize = pdictize;
        self
    }

    pub fn emit(mut self, emit: bool) -> Self {
        self.emit = Some(emit);
        self
    }

    pub fn with_default(mut self, key: impl Into<String>, value: Value) -> Self {
        self.defaults.insert(key.into(), value);
        self
    }

    /// Reject bad literal configuration when the pipe is built.
    pub fn check(mut self, check: ConfCheck) -> Self {
        self.check = Some(check);
        self
    }

    pub fn is_source(&self) -> bool {
        self.ftype == Kind::None
    }

    pub fn shape(&self) -> Shape {
        Shape {
            ptype: self.ptype,
            objectify: self.objectify,
            pdictize: self.pdictize,
        }
    }
}

// =============================================================================
// Per-call overrides
// =============================================================================

/// How multiple results of one processor call are assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CountMode {
    /// Assign only the first result
    First,
    /// Assign every result as one list
    All,
}

/// Options a caller sets for one use of a pipe.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Overrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assign: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emit: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<CountMode>,
    #[serde(skip_serializing_if = "SkipIf::is_never")]
    pub skip_if: SkipIf,
}

// =============================================================================
// Skip rules
// =============================================================================

/// Comparison used by skip rules and the `filter` pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleOp {
    Contains,
    Eq,
    Ne,
    StartsWith,
    EndsWith,
    Matches,
    #[default]
    Truthy,
}

impl RuleOp {
    /// Compare a field against an operand; an absent field only matches `ne`.
    pub fn test(self, field: Option<&Value>, operand: &Value) -> bool {
        let Some(field) = field else {
            return self == RuleOp::Ne;
        };
        let text = value_text(field);
        let wanted = value_text(operand);

        match self {
            RuleOp::Contains => text.contains(&wanted),
            RuleOp::Eq => field == operand || text == wanted,
            RuleOp::Ne => field != operand && text != wanted,
            RuleOp::StartsWith => text.starts_with(&wanted),
            RuleOp::EndsWith => text.ends_with(&wanted),
            RuleOp::Matches => match RegexBuilder::new(&wanted).build() {
                Ok(re) => re.is_match(&text),
                Err(err) => {
                    warn!(pattern = %wanted, error = %err, "invalid match pattern");
                    false
                }
            },
            RuleOp::Truthy => truthy(field),
        }
    }
}

/// Declarative skip rule.
///
/// `include: false` skips items the rule matches; `include: true` skips the
/// ones it does not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SkipRule {
    pub field: String,
    #[serde(default)]
    pub op: RuleOp,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub include: bool,
}

impl SkipRule {
    pub fn skips(&self, item: &Record) -> bool {
        let matched = self.op.test(item.get(&self.field).as_ref(), &self.value);
        matched != self.include
    }
}

pub type Predicate = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

/// When to mark a processor call as skipped.
#[derive(Clone, Default)]
pub enum SkipIf {
    #[default]
    Never,
    /// Skip when any rule says so
    Rules(Vec<SkipRule>),
    Predicate(Predicate),
}

impl SkipIf {
    pub fn when<F>(predicate: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        SkipIf::Predicate(Arc::new(predicate))
    }

    pub fn is_never(&self) -> bool {
        match self {
            SkipIf::Never => true,
            SkipIf::Rules(rules) => rules.is_empty(),
            SkipIf::Predicate(_) => false,
        }
    }

    /// Evaluate against the unmodified item.
    pub fn evaluate(&self, item: &Record) -> bool {
        match self {
            SkipIf::Never => false,
            SkipIf::Rules(rules) => rules.iter().any(|r| r.skips(item)),
            SkipIf::Predicate(predicate) => predicate(item),
        }
    }
}

impl fmt::Debug for SkipIf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipIf::Never => f.write_str("Never"),
            SkipIf::Rules(rules) => f.debug_tuple("Rules").field(rules).finish(),
            SkipIf::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

impl Serialize for SkipIf {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SkipIf::Rules(rules) => rules.serialize(serializer),
            SkipIf::Never | SkipIf::Predicate(_) => serializer.collect_seq(std::iter::empty::<SkipRule>()),
        }
    }
}

impl<'de> Deserialize<'de> for SkipIf {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            One(SkipRule),
            Many(Vec<SkipRule>),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::One(rule) => SkipIf::Rules(vec![rule]),
            Repr::Many(rules) => SkipIf::Rules(rules),
        })
    }
}
