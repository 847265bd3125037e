//! A scanning engine for TextMate-style grammars.
//!
//! A grammar is a declarative rule set: single-line match rules, begin/end regions that
//! can span several lines, includes of named rule sets and regions delegated to another
//! grammar. Scanning a line returns tokens, each with the stack of scopes covering it, and
//! the stack of regions still open, to give when scanning the next line.
//!
//! ```
//! let grammar = scopeline::load_grammar(r##"{
//!     "patterns": [{"match": "#.*", "scope": "comment"}]
//! }"##).unwrap();
//!
//! let line = scopeline::scan_line(&grammar, &scopeline::initial_region_stack(), "x = 1 # note");
//! assert_eq!(line.tokens[1].span, 6..12);
//! assert_eq!(line.tokens[1].scopes[0].as_str(), "comment");
//! ```

mod document;
mod error;
mod grammars;
mod options;
mod registry;
mod scope;
mod tokenizer;

#[cfg(test)]
mod test_utils;

pub use document::Document;
pub use error::{BudgetKind, Error, MalformedGrammar, PatternCompileError, ScanBudgetExceeded};
pub use grammars::{
    GlobalRuleRef, Grammar, GrammarId, GrammarSource, Pattern, RawCapture, RawCaptures,
    RawGrammar, RawRule, Reference, RepositoryEntry, RuleId,
};
pub use options::ScanOptions;
pub use registry::Registry;
pub use scope::Scope;
pub use tokenizer::{RegionStack, ScannedLine, StackFrame, Token, TokenizedText};

/// Parses a JSON grammar definition and compiles it.
///
/// Use [`RawGrammar`] to load YAML or to tweak the definition before compiling it.
pub fn load_grammar(definition: &str) -> Result<Grammar, Error> {
    let raw = RawGrammar::from_json_str(definition)?;
    Ok(raw.compile()?)
}

/// The stack to give when scanning the first line of a text
pub fn initial_region_stack() -> RegionStack {
    RegionStack::new()
}

/// Scans one line, without its line terminator, starting with the regions of `stack` open.
///
/// This is a pure function: the same grammar, stack and line always give the same tokens
/// and the same output stack. Text no rule matches becomes background tokens with the
/// scopes of the innermost open region; this never fails.
///
/// Regions delegated to another grammar need a [`Registry`] to find that grammar: with
/// a single grammar, their content is scanned as background text.
pub fn scan_line(grammar: &Grammar, stack: &RegionStack, line: &str) -> ScannedLine {
    grammar.scan_line(stack, line)
}
