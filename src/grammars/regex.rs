use std::fmt;

use onig::{Region, RegexOptions, SearchOptions, Syntax};

use crate::tokenizer::anchors::{AnchorActive, disable_g_anchor};

/// A successful search: byte offsets within the searched line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegexMatch {
    pub start: usize,
    pub end: usize,
    /// Index 0 is the whole match, `None` for groups that did not participate
    pub captures: Vec<Option<(usize, usize)>>,
}

/// A compiled regex that remembers the pattern it was built from.
///
/// Patterns using `\G` get a second compiled version where `\G` can never match,
/// see [`AnchorActive`].
pub struct Regex {
    pattern: String,
    compiled: onig::Regex,
    without_g: Option<onig::Regex>,
}

impl fmt::Debug for Regex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.pattern)
    }
}

impl PartialEq for Regex {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl Eq for Regex {}

fn compile(pattern: &str) -> Result<onig::Regex, onig::Error> {
    onig::Regex::with_options(
        pattern,
        RegexOptions::REGEX_OPTION_CAPTURE_GROUP,
        Syntax::default(),
    )
}

impl Regex {
    pub fn new(pattern: String) -> Result<Self, onig::Error> {
        let compiled = compile(&pattern)?;
        let without_g = match disable_g_anchor(&pattern) {
            std::borrow::Cow::Owned(p) => Some(compile(&p)?),
            std::borrow::Cow::Borrowed(_) => None,
        };

        Ok(Self {
            pattern,
            compiled,
            without_g,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Finds the first match starting at or after `pos`.
    ///
    /// The whole line is given to onig so lookbehinds can see what is before `pos`.
    pub fn search(&self, line: &str, pos: usize, anchor: AnchorActive) -> Option<RegexMatch> {
        if pos > line.len() {
            return None;
        }
        let re = match (&self.without_g, anchor) {
            (Some(re), AnchorActive::None) => re,
            _ => &self.compiled,
        };

        let mut region = Region::new();
        re.search_with_options(
            line,
            pos,
            line.len(),
            SearchOptions::SEARCH_OPTION_NONE,
            Some(&mut region),
        )?;
        let (start, end) = region.pos(0)?;
        let captures = (0..region.len()).map(|i| region.pos(i)).collect();

        Some(RegexMatch {
            start,
            end,
            captures,
        })
    }
}

/// Whether the pattern refers to groups of another match with `\1` to `\9`.
/// Only meaningful for `end` patterns.
pub fn has_backreferences(pattern: &str) -> bool {
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('1'..='9') => return true,
                _ => continue,
            }
        }
    }
    false
}

fn escape_regex(text: &str, out: &mut String) {
    for c in text.chars() {
        if matches!(
            c,
            '\\' | '|' | '(' | ')' | '[' | ']' | '{' | '}' | '.' | '?' | '*' | '+' | '^' | '$'
                | '#' | '-'
        ) {
            out.push('\\');
        }
        out.push(c);
    }
}

/// Replaces `\1` to `\9` in `pattern` by the escaped text of the corresponding groups
/// of the `begin` match. Groups that did not participate are replaced by nothing.
pub fn resolve_backreferences(
    pattern: &str,
    line: &str,
    captures: &[Option<(usize, usize)>],
) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(d @ '1'..='9') => {
                let index = d as usize - '0' as usize;
                if let Some(Some((start, end))) = captures.get(index)
                    && let Some(text) = line.get(*start..*end)
                {
                    escape_regex(text, &mut out);
                }
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }

    out
}
