use crate::grammars::RawGrammar;
use crate::{Registry, Token};

/// A registry with the tilefile grammar and the python grammar it delegates to
pub(crate) fn get_registry() -> Registry {
    let mut registry = Registry::default();
    for definition in [
        include_str!("fixtures/tilefile.json"),
        include_str!("fixtures/python.json"),
    ] {
        let grammar = RawGrammar::from_json_str(definition)
            .unwrap()
            .compile()
            .unwrap();
        registry.add_grammar(grammar).unwrap();
    }
    registry
}

pub(crate) fn scopes_of(token: &Token) -> Vec<&str> {
    token.scopes.iter().map(|s| s.as_str()).collect()
}

/// One token per line: `{line}:{start}..{end} '{text}' [{scopes}]`
pub(crate) fn format_tokens(input: &str, lines_tokens: &[Vec<Token>]) -> String {
    let lines: Vec<&str> = input.split('\n').collect();
    let mut out = Vec::new();

    for (line_idx, line_tokens) in lines_tokens.iter().enumerate() {
        let line = lines.get(line_idx).unwrap_or(&"");
        for token in line_tokens {
            out.push(format!(
                "{}:{}..{} '{}' [{}]",
                line_idx,
                token.span.start,
                token.span.end,
                &line[token.span.clone()],
                scopes_of(token).join(" ")
            ));
        }
    }

    out.join("\n")
}

/// Tokens cover the whole line, in order, without gaps or empty tokens
pub(crate) fn assert_tiles(line: &str, tokens: &[Token]) {
    let mut pos = 0;
    for token in tokens {
        assert_eq!(token.span.start, pos, "gap or overlap in {tokens:?}");
        assert!(token.span.end > token.span.start, "empty token in {tokens:?}");
        pos = token.span.end;
    }
    assert_eq!(pos, line.len(), "tokens do not cover {line:?}: {tokens:?}");
}
