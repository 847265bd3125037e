use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{MalformedGrammar, ScopelineResult};
use crate::grammars::compiled::Grammar;

/// A capture group that assigns a scope name to matched text.
///
/// Both the short form and the TextMate object form are accepted:
///
/// ```json
/// {
///   "1": "storage.type.tilefile",
///   "2": { "name": "entity.name.tilefile" }
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawCapture {
    Scope(String),
    Object {
        #[serde(default)]
        name: Option<String>,
    },
}

impl RawCapture {
    pub fn scope(&self) -> Option<&str> {
        match self {
            RawCapture::Scope(s) => Some(s),
            RawCapture::Object { name } => name.as_deref(),
        }
    }
}

/// Capture group index (as a string, eg `"1"`) to the capture scope
pub type RawCaptures = BTreeMap<String, RawCapture>;

/// A single entry of a pattern list.
///
/// Which fields are set decides what the rule is:
///
/// * `match`: a single-line match rule
/// * `begin` + `end`: a region, possibly spanning several lines
/// * `include`: a reference to a repository rule set, `$self` or another grammar
/// * only `patterns`: a group whose children are spliced in place
///
/// ```json
/// {
///   "begin": "`",
///   "end": "`",
///   "scope": "meta.embedded.expression.tilefile",
///   "content_scope": "source.python.embedded",
///   "embedded_language": "python"
/// }
/// ```
///
/// TextMate spellings (`name`, `contentName`, `beginCaptures`...) are accepted as aliases.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRule {
    #[serde(default, alias = "name")]
    pub scope: Option<String>,
    #[serde(default, alias = "contentName")]
    pub content_scope: Option<String>,
    #[serde(default, rename = "match")]
    pub match_: Option<String>,
    #[serde(default)]
    pub begin: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    /// Fallback for `begin_captures` and `end_captures`, or the captures of a match rule
    #[serde(default)]
    pub captures: RawCaptures,
    #[serde(default, alias = "beginCaptures")]
    pub begin_captures: RawCaptures,
    #[serde(default, alias = "endCaptures")]
    pub end_captures: RawCaptures,
    #[serde(default)]
    pub patterns: Vec<RawRule>,
    #[serde(default)]
    pub include: Option<String>,
    /// Name or scope name of the grammar scanning the inside of this region
    #[serde(default, alias = "embeddedLanguage")]
    pub embedded_language: Option<String>,
}

impl RawRule {
    /// Only holds child patterns
    pub(crate) fn is_group(&self) -> bool {
        self.match_.is_none() && self.begin.is_none() && self.end.is_none() && self.include.is_none()
    }
}

/// Different ways to define a rule set in the repository
///
/// ```json
/// {
///   "repository": {
///     "keywords": [
///       { "match": "\\blet\\b", "scope": "keyword.other.tilefile" }
///     ],
///     "values": {
///       "patterns": [{ "include": "strings" }, { "include": "numbers" }]
///     },
///     "comment": { "match": "#.*", "scope": "comment.line.tilefile" }
///   }
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RepositoryEntry {
    /// Direct array of patterns
    List(Vec<RawRule>),
    /// Either a `{"patterns": [...]}` container or a single rule
    Rule(RawRule),
}

impl RepositoryEntry {
    pub(crate) fn into_rules(self) -> Vec<RawRule> {
        match self {
            RepositoryEntry::List(rules) => rules,
            RepositoryEntry::Rule(rule) if rule.is_group() => rule.patterns,
            RepositoryEntry::Rule(rule) => vec![rule],
        }
    }
}

/// Top-level structure of a grammar definition, as read from JSON or YAML
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawGrammar {
    /// Name other grammars use to delegate to this one, eg `python`
    #[serde(default)]
    pub name: String,
    /// Scope applied to every token, eg `source.python`
    #[serde(default, alias = "scopeName")]
    pub scope_name: Option<String>,
    /// Root patterns, tried when no region is open
    #[serde(default)]
    pub patterns: Vec<RawRule>,
    /// Named rule sets that can be included
    #[serde(default)]
    pub repository: BTreeMap<String, RepositoryEntry>,
}

impl RawGrammar {
    pub fn from_json_str(s: &str) -> ScopelineResult<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_yaml_str(s: &str) -> ScopelineResult<Self> {
        Ok(serde_yaml::from_str(s)?)
    }

    /// Loads a grammar file: YAML for `.yaml`/`.yml` extensions, JSON otherwise
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> ScopelineResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => Self::from_yaml_str(&content),
            _ => Self::from_json_str(&content),
        }
    }

    /// Compile this raw grammar into an immutable grammar ready for scanning
    pub fn compile(self) -> Result<Grammar, MalformedGrammar> {
        Grammar::from_raw(self)
    }
}
