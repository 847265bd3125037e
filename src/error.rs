use std::fmt;
use std::io;

use crate::tokenizer::ScannedLine;

pub(crate) type ScopelineResult<T> = Result<T, Error>;

/// Errors that can occur during scopeline usage
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error occurred when reading a grammar file
    Io(io::Error),

    /// JSON parsing failed when loading a grammar.
    Json(serde_json::Error),

    /// YAML parsing failed when loading a grammar.
    Yaml(serde_yaml::Error),

    /// The grammar definition was parsed but cannot be used.
    MalformedGrammar(MalformedGrammar),

    /// A grammar was not found in the registry.
    /// Only happens when asking to tokenize something with a grammar we can't find
    GrammarNotFound(String),

    /// A registry can hold at most `u16::MAX + 1` grammars
    TooManyGrammars,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Json(err) => write!(f, "JSON parsing error: {}", err),
            Error::Yaml(err) => write!(f, "YAML parsing error: {}", err),
            Error::MalformedGrammar(err) => write!(f, "malformed grammar: {}", err),
            Error::GrammarNotFound(name) => write!(f, "grammar '{}' not found", name),
            Error::TooManyGrammars => write!(f, "too many grammars in the registry"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Json(err) => Some(err),
            Error::Yaml(err) => Some(err),
            Error::MalformedGrammar(err) => Some(err),
            Error::GrammarNotFound(_) | Error::TooManyGrammars => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Yaml(err)
    }
}

impl From<MalformedGrammar> for Error {
    fn from(err: MalformedGrammar) -> Self {
        Error::MalformedGrammar(err)
    }
}

/// Why a grammar definition could not be turned into a [`Grammar`](crate::Grammar).
///
/// Rules are named by their path in the definition, eg `repository.strings[2]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MalformedGrammar {
    /// A region rule has an `end` but no `begin`
    MissingBegin { rule: String },
    /// A region rule has a `begin` but no `end`
    MissingEnd { rule: String },
    /// An include points to a rule set that is not in the repository
    UnknownInclude { rule: String, include: String },
    /// One of the regexes did not compile
    PatternCompile(PatternCompileError),
}

impl fmt::Display for MalformedGrammar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MalformedGrammar::MissingBegin { rule } => {
                write!(f, "rule '{}' has an `end` but no `begin`", rule)
            }
            MalformedGrammar::MissingEnd { rule } => {
                write!(f, "rule '{}' has a `begin` but no `end`", rule)
            }
            MalformedGrammar::UnknownInclude { rule, include } => {
                write!(f, "rule '{}' includes unknown rule set '{}'", rule, include)
            }
            MalformedGrammar::PatternCompile(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for MalformedGrammar {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MalformedGrammar::PatternCompile(err) => Some(err),
            _ => None,
        }
    }
}

impl From<PatternCompileError> for MalformedGrammar {
    fn from(err: PatternCompileError) -> Self {
        MalformedGrammar::PatternCompile(err)
    }
}

/// A regex of the grammar was rejected by the regex engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternCompileError {
    /// Path of the offending rule in the definition
    pub rule: String,
    /// The pattern as written in the definition
    pub pattern: String,
    /// Message from the regex engine
    pub message: String,
}

impl fmt::Display for PatternCompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid regex '{}' in rule '{}': {}",
            self.pattern, self.rule, self.message
        )
    }
}

impl std::error::Error for PatternCompileError {}

/// Which limit of [`ScanOptions`](crate::ScanOptions) stopped a scan
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BudgetKind {
    /// Too many regex match attempts
    Steps,
    /// The line took longer than the time budget
    Time,
    /// The line is longer than the maximum length and was not scanned at all
    LineLength,
}

impl fmt::Display for BudgetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BudgetKind::Steps => f.write_str("step budget"),
            BudgetKind::Time => f.write_str("time budget"),
            BudgetKind::LineLength => f.write_str("maximum line length"),
        }
    }
}

/// A line could not be scanned within the limits of the scan options.
///
/// This is never a grammar error: `partial` holds everything scanned before the limit was
/// hit, with the remainder of the line as a single background token, and the region stack
/// reached at that point. Callers can keep going with it.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanBudgetExceeded {
    pub kind: BudgetKind,
    pub partial: ScannedLine,
}

impl fmt::Display for ScanBudgetExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} exceeded, {} tokens scanned before falling back to plain text",
            self.kind,
            self.partial.tokens.len()
        )
    }
}

impl std::error::Error for ScanBudgetExceeded {}
