mod compiled;
mod pattern_set;
mod raw;
mod regex;

pub use compiled::*;
pub(crate) use pattern_set::PatternSet;
pub use raw::{RawCapture, RawCaptures, RawGrammar, RawRule, RepositoryEntry};
pub(crate) use regex::{Regex, RegexMatch, resolve_backreferences};

/// Index of a grammar in a [`GrammarSource`]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct GrammarId(pub u16);

impl GrammarId {
    /// The id of a grammar used on its own, outside of a registry
    pub const SINGLE: GrammarId = GrammarId(0);

    #[inline]
    pub fn as_index(self) -> usize {
        self.0 as usize
    }
}

/// Where the scanner finds grammars: the one it was asked to scan with, and the ones
/// delegated regions and cross-grammar includes refer to by name.
pub trait GrammarSource {
    fn grammar(&self, id: GrammarId) -> Option<&Grammar>;

    /// Finds a grammar by name, alias or scope name
    fn find_grammar(&self, language: &str) -> Option<GrammarId>;
}
