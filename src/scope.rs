//! Scope names attached to tokens.
//!
//! A scope is a dot-separated name like `string.quoted.double`. Tokens carry the full
//! stack of enclosing scopes, so scopes are cloned a lot: they are backed by an `Arc<str>`
//! and never interned in shared state.

use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};

/// A single scope name, eg `keyword.control.tilefile`
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Scope(Arc<str>);

impl Scope {
    pub fn new(s: &str) -> Scope {
        Scope(Arc::from(s.trim()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Scope(\"{}\")", self.0)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Scope {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum CaseCommand {
    Downcase,
    Upcase,
}

/// A scope name as written in a grammar.
///
/// Names can refer to capture groups of the match that applies them: `$1`, `${1}`,
/// `${1:/downcase}` and `${1:/upcase}`. Those are only known once the rule matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ScopeName {
    Static(Scope),
    Dynamic(String),
}

impl ScopeName {
    pub fn new(name: &str) -> Option<Self> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        if has_capture_refs(name) {
            Some(ScopeName::Dynamic(name.to_owned()))
        } else {
            Some(ScopeName::Static(Scope::new(name)))
        }
    }

    /// Returns `None` if the name resolves to nothing, eg `$3` when group 3 didn't participate.
    pub fn resolve(&self, line: &str, captures: &[Option<(usize, usize)>]) -> Option<Scope> {
        match self {
            ScopeName::Static(scope) => Some(scope.clone()),
            ScopeName::Dynamic(name) => {
                let resolved = substitute_captures(name, line, captures);
                if resolved.trim().is_empty() {
                    None
                } else {
                    Some(Scope::new(&resolved))
                }
            }
        }
    }
}

fn has_capture_refs(name: &str) -> bool {
    name.match_indices('$')
        .any(|(idx, _)| parse_capture_ref(&name[idx + 1..]).is_some())
}

/// Parses what follows a `$`, returning the group index, the optional case command and
/// how many bytes were consumed.
fn parse_capture_ref(s: &str) -> Option<(usize, Option<CaseCommand>, usize)> {
    if let Some(inner) = s.strip_prefix('{') {
        let close = inner.find('}')?;
        let body = &inner[..close];
        let (digits, command) = match body.split_once(":/") {
            Some((digits, command)) => (digits, Some(command)),
            None => (body, None),
        };
        let index = digits.parse().ok()?;
        let command = match command {
            None => None,
            Some("downcase") => Some(CaseCommand::Downcase),
            Some("upcase") => Some(CaseCommand::Upcase),
            Some(_) => return None,
        };
        Some((index, command, close + 2))
    } else {
        let len = s.bytes().take_while(u8::is_ascii_digit).count();
        if len == 0 {
            return None;
        }
        Some((s[..len].parse().ok()?, None, len))
    }
}

fn substitute_captures(name: &str, line: &str, captures: &[Option<(usize, usize)>]) -> String {
    let mut out = String::with_capacity(name.len());
    let mut rest = name;

    while let Some(idx) = rest.find('$') {
        out.push_str(&rest[..idx]);
        let after = &rest[idx + 1..];
        match parse_capture_ref(after) {
            Some((index, command, consumed)) => {
                if let Some(Some((start, end))) = captures.get(index)
                    && let Some(text) = line.get(*start..*end)
                {
                    // Leading dots would create empty atoms
                    let text = text.trim_start_matches('.');
                    match command {
                        Some(CaseCommand::Downcase) => out.push_str(&text.to_lowercase()),
                        Some(CaseCommand::Upcase) => out.push_str(&text.to_uppercase()),
                        None => out.push_str(text),
                    }
                }
                rest = &after[consumed..];
            }
            None => {
                out.push('$');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_names_do_not_look_at_captures() {
        let name = ScopeName::new("keyword.control.$").unwrap();
        assert!(matches!(name, ScopeName::Static(_)));
        assert_eq!(
            name.resolve("", &[]).unwrap().as_str(),
            "keyword.control.$"
        );
    }

    #[test]
    fn empty_names_are_ignored() {
        assert_eq!(ScopeName::new("  "), None);
    }

    #[test]
    fn can_substitute_captures() {
        let line = "obj Label {";
        let captures = [Some((0, 9)), Some((0, 3)), Some((4, 9))];
        let name = ScopeName::new("entity.name.$2.${1:/upcase}").unwrap();
        assert_eq!(
            name.resolve(line, &captures).unwrap().as_str(),
            "entity.name.Label.OBJ"
        );

        let name = ScopeName::new("storage.type.${2:/downcase}").unwrap();
        assert_eq!(
            name.resolve(line, &captures).unwrap().as_str(),
            "storage.type.label"
        );
    }

    #[test]
    fn missing_group_resolves_to_nothing() {
        let name = ScopeName::new("$3").unwrap();
        assert_eq!(name.resolve("abc", &[Some((0, 3)), None]), None);
    }

    #[test]
    fn displays_as_plain_string() {
        let scope = Scope::new(" comment.line ");
        assert_eq!(scope.to_string(), "comment.line");
        assert_eq!(format!("{scope:?}"), "Scope(\"comment.line\")");
    }
}
