use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, ScanBudgetExceeded, ScopelineResult};
use crate::grammars::{Grammar, GrammarId, GrammarSource, RawGrammar};
use crate::options::ScanOptions;
use crate::tokenizer::{RegionStack, ScannedLine, TokenizedText, Tokenizer};

/// Holds several grammars so they can refer to each other.
///
/// Delegating regions (`embedded_language`) and includes of other grammars
/// (`source.python`, `python#strings`) are looked up by name, alias or scope name
/// when scanning. A grammar can be added before the grammars it refers to:
/// references that can't be resolved are ignored.
///
/// The registry is never mutated while scanning, so it can be shared between threads.
#[derive(Debug, Default)]
pub struct Registry {
    // Vector of compiled grammars for ID-based access
    grammars: Vec<Grammar>,
    // grammar name and aliases -> grammar ID lookup
    grammar_id_by_name: HashMap<String, GrammarId>,
    // grammar scope name -> grammar ID lookup, used by includes like `source.python`
    grammar_id_by_scope_name: HashMap<String, GrammarId>,
}

impl Registry {
    /// Adds a compiled grammar and returns its id.
    ///
    /// A grammar with the same name as an existing one replaces it and keeps its id, so
    /// stacks referring to that id now refer to the new grammar.
    ///
    /// Fails with [`Error::TooManyGrammars`] past `u16::MAX + 1` grammars.
    pub fn add_grammar(&mut self, grammar: Grammar) -> ScopelineResult<GrammarId> {
        let name = grammar.name().to_owned();
        let scope_name = grammar.scope_name().map(str::to_owned);

        let grammar_id = match self.grammars.iter().position(|g| g.name() == name) {
            Some(index) => {
                #[cfg(feature = "debug")]
                log::debug!("[add_grammar] replacing grammar '{name}'");
                let grammar_id = grammar_id_at(index)?;
                if let Some(old_scope) = self.grammars[index].scope_name()
                    && self.grammar_id_by_scope_name.get(old_scope) == Some(&grammar_id)
                {
                    self.grammar_id_by_scope_name.remove(old_scope);
                }
                self.grammars[index] = grammar;
                grammar_id
            }
            None => {
                let grammar_id = grammar_id_at(self.grammars.len())?;
                self.grammars.push(grammar);
                grammar_id
            }
        };

        self.grammar_id_by_name.insert(name, grammar_id);
        if let Some(scope_name) = scope_name {
            self.grammar_id_by_scope_name.insert(scope_name, grammar_id);
        }
        Ok(grammar_id)
    }

    /// Reads the file (YAML for `.yaml`/`.yml`, JSON otherwise), compiles it and adds it.
    pub fn add_grammar_from_path(&mut self, path: impl AsRef<Path>) -> ScopelineResult<GrammarId> {
        let raw_grammar = RawGrammar::load_from_file(path)?;
        let grammar = raw_grammar.compile()?;
        self.add_grammar(grammar)
    }

    /// Adds an alias for the given grammar.
    /// Does nothing if there is no grammar with that name.
    pub fn add_alias(&mut self, grammar_name: &str, alias: &str) {
        if let Some(grammar_id) = self.grammar_id(grammar_name) {
            self.grammar_id_by_name
                .insert(alias.to_string(), grammar_id);
        }
    }

    /// Finds a grammar by name, alias or scope name
    pub fn grammar_id(&self, name: &str) -> Option<GrammarId> {
        self.grammar_id_by_name
            .get(name)
            .or_else(|| self.grammar_id_by_scope_name.get(name))
            .copied()
    }

    /// Checks whether the given name is a grammar name, alias or scope name of the registry
    pub fn contains_grammar(&self, name: &str) -> bool {
        self.grammar_id(name).is_some()
    }

    pub fn get_grammar(&self, grammar_id: GrammarId) -> Option<&Grammar> {
        self.grammars.get(grammar_id.as_index())
    }

    /// Scans one line with the given grammar, see [`crate::scan_line`].
    ///
    /// An unknown grammar id scans everything as background text.
    pub fn scan_line(&self, grammar_id: GrammarId, stack: &RegionStack, line: &str) -> ScannedLine {
        Tokenizer::new(self, grammar_id)
            .scan_line(stack, line, &ScanOptions::default())
            .unwrap_or_else(|e| e.partial)
    }

    /// Same as [`Registry::scan_line`] with limits on the work done for the line.
    pub fn scan_line_with_options(
        &self,
        grammar_id: GrammarId,
        stack: &RegionStack,
        line: &str,
        options: &ScanOptions,
    ) -> Result<ScannedLine, ScanBudgetExceeded> {
        Tokenizer::new(self, grammar_id).scan_line(stack, line, options)
    }

    /// Scans a whole text with the grammar of that name, alias or scope name.
    pub fn tokenize(&self, name: &str, text: &str) -> ScopelineResult<TokenizedText> {
        self.tokenize_with_options(name, text, &ScanOptions::default())
    }

    /// Same as [`Registry::tokenize`] with limits on the work done for each line.
    /// Lines hitting a limit are listed in [`TokenizedText::exhausted_lines`].
    pub fn tokenize_with_options(
        &self,
        name: &str,
        text: &str,
        options: &ScanOptions,
    ) -> ScopelineResult<TokenizedText> {
        let grammar_id = self
            .grammar_id(name)
            .ok_or_else(|| Error::GrammarNotFound(name.to_string()))?;
        Ok(self.tokenize_grammar(grammar_id, text, options))
    }

    /// Scans a whole text with the grammar of that id.
    /// An unknown id scans everything as background text.
    pub fn tokenize_grammar(
        &self,
        grammar_id: GrammarId,
        text: &str,
        options: &ScanOptions,
    ) -> TokenizedText {
        Tokenizer::new(self, grammar_id).tokenize_string(text, options)
    }
}

/// The id of the grammar stored at `index`
fn grammar_id_at(index: usize) -> ScopelineResult<GrammarId> {
    u16::try_from(index)
        .map(GrammarId)
        .map_err(|_| Error::TooManyGrammars)
}

impl GrammarSource for Registry {
    fn grammar(&self, id: GrammarId) -> Option<&Grammar> {
        self.get_grammar(id)
    }

    fn find_grammar(&self, language: &str) -> Option<GrammarId> {
        self.grammar_id(language)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::load_grammar;
    use crate::test_utils::{format_tokens, get_registry, scopes_of};

    #[test]
    fn can_find_grammars_by_name_alias_and_scope() {
        let mut registry = get_registry();
        let id = registry.grammar_id("tilefile").unwrap();
        assert_eq!(registry.grammar_id("source.tilefile"), Some(id));
        assert_eq!(registry.grammar_id("tile"), None);

        registry.add_alias("tilefile", "tile");
        registry.add_alias("missing", "other");
        assert_eq!(registry.grammar_id("tile"), Some(id));
        assert!(!registry.contains_grammar("other"));
        assert_ne!(registry.grammar_id("python"), Some(id));
    }

    #[test]
    fn replacing_grammar_keeps_its_id() {
        let mut registry = Registry::default();
        let first = registry
            .add_grammar(
                load_grammar(r#"{"name": "demo", "scope_name": "source.demo", "patterns": []}"#)
                    .unwrap(),
            )
            .unwrap();
        let other = registry
            .add_grammar(load_grammar(r#"{"name": "other"}"#).unwrap())
            .unwrap();
        let second = registry
            .add_grammar(
                load_grammar(
                    r#"{"name": "demo", "scope_name": "source.demo2", "patterns": [{"match": "x", "scope": "x"}]}"#,
                )
                .unwrap(),
            )
            .unwrap();

        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(registry.grammar_id("source.demo"), None);
        assert_eq!(registry.grammar_id("source.demo2"), Some(first));
        let line = registry.scan_line(first, &RegionStack::new(), "x");
        assert_eq!(scopes_of(&line.tokens[0]), vec!["source.demo2", "x"]);
    }

    #[test]
    fn grammar_ids_do_not_wrap() {
        assert_eq!(grammar_id_at(0).unwrap(), GrammarId(0));
        assert_eq!(grammar_id_at(65_535).unwrap(), GrammarId(u16::MAX));
        assert!(matches!(grammar_id_at(65_536), Err(Error::TooManyGrammars)));
    }

    #[test]
    fn can_load_grammars_from_files() {
        let mut registry = Registry::default();
        let id = registry
            .add_grammar_from_path("src/fixtures/python.json")
            .unwrap();
        assert_eq!(registry.get_grammar(id).unwrap().name(), "python");

        let err = registry
            .add_grammar_from_path("src/fixtures/not-there.json")
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn can_tokenize_by_id() {
        let registry = get_registry();
        let id = registry.grammar_id("python").unwrap();
        let by_id = registry.tokenize_grammar(id, "def f(): 1", &ScanOptions::default());
        assert_eq!(by_id, registry.tokenize("python", "def f(): 1").unwrap());
        assert_eq!(
            scopes_of(&by_id.lines[0][0]),
            vec!["source.python", "keyword.control.python"]
        );

        let unknown = registry.tokenize_grammar(GrammarId(99), "def", &ScanOptions::default());
        assert_eq!(unknown.lines[0].len(), 1);
        assert!(unknown.lines[0][0].scopes.is_empty());
    }

    #[test]
    fn unknown_grammar_is_an_error() {
        let registry = get_registry();
        let err = registry.tokenize("cobol", "MOVE A TO B").unwrap_err();
        assert!(matches!(err, Error::GrammarNotFound(name) if name == "cobol"));
    }

    #[test]
    fn can_tokenize_tilefile() {
        let registry = get_registry();
        let text = include_str!("fixtures/inspector.tile");
        let tokenized = registry.tokenize("tilefile", text).unwrap();
        assert!(tokenized.unterminated_regions().is_empty());
        assert!(tokenized.exhausted_lines.is_empty());
        insta::assert_snapshot!(format_tokens(text, &tokenized.lines), @r##"
        0:0..17 '# inspector panel' [source.tilefile comment.line.number-sign.tilefile]
        1:0..3 'obj' [source.tilefile storage.type.obj.tilefile]
        1:3..4 ' ' [source.tilefile]
        1:4..10 'Header' [source.tilefile entity.name.type.tilefile]
        1:10..11 ' ' [source.tilefile]
        1:11..12 '{' [source.tilefile meta.block.tilefile]
        2:0..8 '  title ' [source.tilefile meta.block.tilefile]
        2:8..9 '"' [source.tilefile meta.block.tilefile string.quoted.double.tilefile punctuation.definition.string.begin.tilefile]
        2:9..15 'Name: ' [source.tilefile meta.block.tilefile string.quoted.double.tilefile]
        2:15..17 '\"' [source.tilefile meta.block.tilefile string.quoted.double.tilefile constant.character.escape.tilefile]
        2:17..18 'x' [source.tilefile meta.block.tilefile string.quoted.double.tilefile]
        2:18..20 '\"' [source.tilefile meta.block.tilefile string.quoted.double.tilefile constant.character.escape.tilefile]
        2:20..21 '"' [source.tilefile meta.block.tilefile string.quoted.double.tilefile punctuation.definition.string.end.tilefile]
        3:0..8 '  width ' [source.tilefile meta.block.tilefile]
        3:8..9 '(' [source.tilefile meta.block.tilefile meta.group.tilefile]
        3:9..10 '1' [source.tilefile meta.block.tilefile meta.group.tilefile constant.numeric.tilefile]
        3:10..13 ' + ' [source.tilefile meta.block.tilefile meta.group.tilefile]
        3:13..14 '(' [source.tilefile meta.block.tilefile meta.group.tilefile meta.group.tilefile]
        3:14..15 '2' [source.tilefile meta.block.tilefile meta.group.tilefile meta.group.tilefile constant.numeric.tilefile]
        3:15..16 ')' [source.tilefile meta.block.tilefile meta.group.tilefile meta.group.tilefile]
        3:16..17 ')' [source.tilefile meta.block.tilefile meta.group.tilefile]
        4:0..2 '  ' [source.tilefile meta.block.tilefile]
        4:2..5 '```' [source.tilefile meta.block.tilefile meta.embedded.block.tilefile]
        5:0..2 '  ' [source.tilefile meta.block.tilefile meta.embedded.block.tilefile source.python.embedded.tilefile]
        5:2..5 'def' [source.tilefile meta.block.tilefile meta.embedded.block.tilefile source.python.embedded.tilefile keyword.control.python]
        5:5..7 ' f' [source.tilefile meta.block.tilefile meta.embedded.block.tilefile source.python.embedded.tilefile]
        5:7..8 '(' [source.tilefile meta.block.tilefile meta.embedded.block.tilefile source.python.embedded.tilefile meta.group.python]
        5:8..9 'x' [source.tilefile meta.block.tilefile meta.embedded.block.tilefile source.python.embedded.tilefile meta.group.python]
        5:9..10 ')' [source.tilefile meta.block.tilefile meta.embedded.block.tilefile source.python.embedded.tilefile meta.group.python]
        5:10..12 ': ' [source.tilefile meta.block.tilefile meta.embedded.block.tilefile source.python.embedded.tilefile]
        5:12..18 'return' [source.tilefile meta.block.tilefile meta.embedded.block.tilefile source.python.embedded.tilefile keyword.control.python]
        5:18..20 ' x' [source.tilefile meta.block.tilefile meta.embedded.block.tilefile source.python.embedded.tilefile]
        6:0..2 '  ' [source.tilefile meta.block.tilefile meta.embedded.block.tilefile source.python.embedded.tilefile]
        6:2..5 '```' [source.tilefile meta.block.tilefile meta.embedded.block.tilefile]
        7:0..1 '}' [source.tilefile meta.block.tilefile]
        "##);
    }

    #[test]
    fn same_grammar_can_be_used_from_several_threads() {
        let registry = get_registry();
        let text = include_str!("fixtures/inspector.tile");
        let expected = registry.tokenize("tilefile", text).unwrap();

        thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| s.spawn(|| registry.tokenize("tilefile", text).unwrap()))
                .collect();
            for handle in handles {
                assert_eq!(handle.join().unwrap(), expected);
            }
        });
    }
}
