use std::collections::{HashMap, HashSet};

use crate::error::{MalformedGrammar, PatternCompileError};
use crate::grammars::raw::{RawCaptures, RawGrammar, RawRule};
use crate::grammars::regex::{Regex, has_backreferences, resolve_backreferences};
use crate::grammars::{GrammarId, GrammarSource};
use crate::scope::{Scope, ScopeName};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct RuleId(pub u32);

impl RuleId {
    #[inline]
    pub fn as_index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct RegexId(u32);

impl RegexId {
    #[inline]
    pub fn as_index(self) -> usize {
        self.0 as usize
    }
}

/// A rule of a specific grammar
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct GlobalRuleRef {
    pub grammar: GrammarId,
    pub rule: RuleId,
}

/// What an `include` points to. Allowed values:
///  * Rule set name, e.g. `strings` or `#strings`
///  * self, e.g. `$self` or `$base`
///  * Another grammar by scope name, e.g. `source.python`
///  * A rule set of another grammar, e.g. `python#strings`
///
/// A bare name is a rule set when the repository has it, a grammar when it is dotted.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Reference {
    Self_,
    RuleSet(String),
    Foreign {
        language: String,
        rule_set: Option<String>,
    },
}

/// An entry of an ordered pattern list: either a rule of the arena or an include
/// resolved when scanning.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Pattern {
    Rule(RuleId),
    Include(Reference),
}

#[derive(Debug)]
pub(crate) struct MatchRule {
    pub scope: Option<ScopeName>,
    pub regex: RegexId,
    pub captures: Vec<Option<ScopeName>>,
}

/// The `end` of a region: either used as-is or with `\1`..`\9` replaced by what `begin` matched
#[derive(Debug)]
pub(crate) enum EndPattern {
    Static(RegexId),
    WithBackreferences(String),
}

#[derive(Debug)]
pub(crate) struct RegionRule {
    pub scope: Option<ScopeName>,
    pub content_scope: Option<ScopeName>,
    pub begin: RegexId,
    pub begin_captures: Vec<Option<ScopeName>>,
    pub end: EndPattern,
    pub end_captures: Vec<Option<ScopeName>>,
    pub patterns: Vec<Pattern>,
    pub embedded_language: Option<String>,
}

#[derive(Debug)]
pub(crate) enum Rule {
    Match(MatchRule),
    Region(RegionRule),
    /// Children spliced in place of the group
    Group(Vec<Pattern>),
}

/// A compiled, immutable grammar.
///
/// Rules live in a flat arena and refer to each other by [`RuleId`]. Includes are kept
/// as names and only looked up while scanning so cyclic grammars (a rule set including
/// itself, directly or not) need no special handling here.
#[derive(Debug)]
pub struct Grammar {
    name: String,
    scope_name: Option<String>,
    root_scopes: Vec<Scope>,
    regexes: Vec<Regex>,
    rules: Vec<Rule>,
    root: Vec<Pattern>,
    repository: HashMap<String, Vec<Pattern>>,
}

impl Grammar {
    pub fn from_raw(raw: RawGrammar) -> Result<Self, MalformedGrammar> {
        let mut compiler = Compiler {
            rule_set_names: raw.repository.keys().cloned().collect(),
            regexes: Vec::new(),
            rules: Vec::new(),
        };

        let root = compiler.compile_patterns(raw.patterns, "patterns")?;
        let mut repository = HashMap::with_capacity(raw.repository.len());
        for (name, entry) in raw.repository {
            let path = format!("repository.{name}");
            let patterns = compiler.compile_patterns(entry.into_rules(), &path)?;
            repository.insert(name, patterns);
        }

        let root_scopes = raw
            .scope_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Scope::new)
            .into_iter()
            .collect();

        #[cfg(feature = "debug")]
        log::debug!(
            "[Grammar::from_raw] compiled '{}': {} rules, {} regexes, {} rule sets",
            raw.name,
            compiler.rules.len(),
            compiler.regexes.len(),
            repository.len()
        );

        Ok(Self {
            name: raw.name,
            scope_name: raw.scope_name,
            root_scopes,
            regexes: compiler.regexes,
            rules: compiler.rules,
            root,
            repository,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope_name(&self) -> Option<&str> {
        self.scope_name.as_deref()
    }

    /// The patterns tried when no region is open
    pub fn root_patterns(&self) -> &[Pattern] {
        &self.root
    }

    /// Look up a rule set by name in the repository
    pub fn resolve(&self, rule_set: &str) -> Option<&[Pattern]> {
        self.repository.get(rule_set).map(Vec::as_slice)
    }

    /// Scopes every token of this grammar starts with
    pub(crate) fn root_scopes(&self) -> &[Scope] {
        &self.root_scopes
    }

    pub(crate) fn rule(&self, id: RuleId) -> &Rule {
        &self.rules[id.as_index()]
    }

    pub(crate) fn regex(&self, id: RegexId) -> &Regex {
        &self.regexes[id.as_index()]
    }
}

/// A single grammar is its own source: it can only delegate to itself.
impl GrammarSource for Grammar {
    fn grammar(&self, id: GrammarId) -> Option<&Grammar> {
        (id == GrammarId::SINGLE).then_some(self)
    }

    fn find_grammar(&self, language: &str) -> Option<GrammarId> {
        let is_self = language == self.name || Some(language) == self.scope_name.as_deref();
        is_self.then_some(GrammarId::SINGLE)
    }
}

struct Compiler {
    rule_set_names: HashSet<String>,
    regexes: Vec<Regex>,
    rules: Vec<Rule>,
}

impl Compiler {
    fn compile_patterns(
        &mut self,
        rules: Vec<RawRule>,
        path: &str,
    ) -> Result<Vec<Pattern>, MalformedGrammar> {
        rules
            .into_iter()
            .enumerate()
            .map(|(i, rule)| self.compile_rule(rule, &format!("{path}[{i}]")))
            .collect()
    }

    fn compile_rule(&mut self, raw: RawRule, path: &str) -> Result<Pattern, MalformedGrammar> {
        let rule = if let Some(pat) = raw.match_ {
            let captures = if raw.captures.is_empty() {
                raw.begin_captures
            } else {
                raw.captures
            };
            Rule::Match(MatchRule {
                scope: raw.scope.as_deref().and_then(ScopeName::new),
                regex: self.compile_regex(pat, path)?,
                captures: compile_captures(&captures),
            })
        } else if raw.begin.is_some() || raw.end.is_some() {
            let (begin, end) = match (raw.begin, raw.end) {
                (Some(begin), Some(end)) => (begin, end),
                (Some(_), None) => {
                    return Err(MalformedGrammar::MissingEnd {
                        rule: path.to_owned(),
                    });
                }
                (None, _) => {
                    return Err(MalformedGrammar::MissingBegin {
                        rule: path.to_owned(),
                    });
                }
            };

            // Children come from `patterns`, or from `include` when there are none
            let patterns = if raw.patterns.is_empty() {
                match raw.include {
                    Some(include) => vec![Pattern::Include(self.reference(&include, path)?)],
                    None => Vec::new(),
                }
            } else {
                self.compile_patterns(raw.patterns, &format!("{path}.patterns"))?
            };
            let begin_captures = if raw.begin_captures.is_empty() {
                &raw.captures
            } else {
                &raw.begin_captures
            };
            let end_captures = if raw.end_captures.is_empty() {
                &raw.captures
            } else {
                &raw.end_captures
            };

            Rule::Region(RegionRule {
                scope: raw.scope.as_deref().and_then(ScopeName::new),
                content_scope: raw.content_scope.as_deref().and_then(ScopeName::new),
                begin: self.compile_regex(begin, path)?,
                begin_captures: compile_captures(begin_captures),
                end: self.compile_end(end, path)?,
                end_captures: compile_captures(end_captures),
                patterns,
                embedded_language: raw.embedded_language,
            })
        } else if let Some(include) = raw.include {
            // Other fields of an include are ignored
            return Ok(Pattern::Include(self.reference(&include, path)?));
        } else {
            Rule::Group(self.compile_patterns(raw.patterns, &format!("{path}.patterns"))?)
        };

        let id = RuleId(self.rules.len() as u32);
        self.rules.push(rule);
        Ok(Pattern::Rule(id))
    }

    fn compile_regex(&mut self, pattern: String, path: &str) -> Result<RegexId, MalformedGrammar> {
        let re = Regex::new(pattern.clone()).map_err(|e| PatternCompileError {
            rule: path.to_owned(),
            pattern,
            message: e.to_string(),
        })?;
        let id = RegexId(self.regexes.len() as u32);
        self.regexes.push(re);
        Ok(id)
    }

    /// End patterns with back-references can only be compiled once `begin` matched.
    /// We still check them now, with every reference matching the empty string.
    fn compile_end(&mut self, pattern: String, path: &str) -> Result<EndPattern, MalformedGrammar> {
        if !has_backreferences(&pattern) {
            return Ok(EndPattern::Static(self.compile_regex(pattern, path)?));
        }

        let probe = resolve_backreferences(&pattern, "", &[]);
        if let Err(e) = Regex::new(probe) {
            return Err(PatternCompileError {
                rule: path.to_owned(),
                pattern,
                message: e.to_string(),
            }
            .into());
        }
        Ok(EndPattern::WithBackreferences(pattern))
    }

    fn reference(&self, include: &str, path: &str) -> Result<Reference, MalformedGrammar> {
        let include = include.trim();
        let unknown = || MalformedGrammar::UnknownInclude {
            rule: path.to_owned(),
            include: include.to_owned(),
        };

        match include {
            "$self" | "$base" => Ok(Reference::Self_),
            s if s.starts_with('#') => {
                let name = &s[1..];
                if self.rule_set_names.contains(name) {
                    Ok(Reference::RuleSet(name.to_owned()))
                } else {
                    Err(unknown())
                }
            }
            s if self.rule_set_names.contains(s) => Ok(Reference::RuleSet(s.to_owned())),
            s => match s.split_once('#') {
                Some((language, rule_set)) if !language.is_empty() && !rule_set.is_empty() => {
                    Ok(Reference::Foreign {
                        language: language.to_owned(),
                        rule_set: Some(rule_set.to_owned()),
                    })
                }
                Some(_) => Err(unknown()),
                // A bare name that isn't a rule set is only valid if it looks like a
                // grammar scope, eg `source.python`
                None if s.contains('.') => Ok(Reference::Foreign {
                    language: s.to_owned(),
                    rule_set: None,
                }),
                None => Err(unknown()),
            },
        }
    }
}

/// Maps group index to scope, ignoring keys that are not numbers
fn compile_captures(captures: &RawCaptures) -> Vec<Option<ScopeName>> {
    let parsed: Vec<(usize, ScopeName)> = captures
        .iter()
        .filter_map(|(key, capture)| {
            let index = key.trim().parse::<usize>().ok()?;
            let name = ScopeName::new(capture.scope()?)?;
            Some((index, name))
        })
        .collect();

    let Some(max) = parsed.iter().map(|(i, _)| *i).max() else {
        return Vec::new();
    };
    let mut out: Vec<Option<ScopeName>> = (0..=max).map(|_| None).collect();
    for (index, name) in parsed {
        out[index] = Some(name);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::load_grammar;

    fn compile_json(json: &str) -> Result<Grammar, MalformedGrammar> {
        RawGrammar::from_json_str(json).unwrap().compile()
    }

    #[test]
    fn region_without_end_is_malformed() {
        let err = compile_json(r#"{"patterns": [{"begin": "`", "scope": "embedded"}]}"#)
            .unwrap_err();
        assert_eq!(
            err,
            MalformedGrammar::MissingEnd {
                rule: "patterns[0]".to_owned()
            }
        );
    }

    #[test]
    fn region_without_begin_is_malformed() {
        let err = compile_json(
            r#"{"repository": {"block": {"patterns": [{"end": "\\}"}]}}, "patterns": []}"#,
        )
        .unwrap_err();
        assert_eq!(
            err,
            MalformedGrammar::MissingBegin {
                rule: "repository.block[0]".to_owned()
            }
        );
    }

    #[test]
    fn unknown_include_is_malformed() {
        let err = compile_json(r##"{"patterns": [{"include": "#nope"}]}"##).unwrap_err();
        assert_eq!(
            err,
            MalformedGrammar::UnknownInclude {
                rule: "patterns[0]".to_owned(),
                include: "#nope".to_owned()
            }
        );

        let err = compile_json(r#"{"patterns": [{"include": "nope"}]}"#).unwrap_err();
        assert!(matches!(err, MalformedGrammar::UnknownInclude { .. }));
    }

    #[test]
    fn invalid_regex_names_the_rule() {
        let err = compile_json(
            r#"{"patterns": [{"begin": "a", "end": "b", "patterns": [{"match": "(x"}]}]}"#,
        )
        .unwrap_err();
        let MalformedGrammar::PatternCompile(err) = err else {
            panic!("expected a compile error, got {err:?}");
        };
        assert_eq!(err.rule, "patterns[0].patterns[0]");
        assert_eq!(err.pattern, "(x");
        assert!(!err.message.is_empty());
    }

    #[test]
    fn end_with_backreferences_is_validated() {
        let grammar = compile_json(r#"{"patterns": [{"begin": "(\\w+)<<", "end": "^\\1$"}]}"#)
            .unwrap();
        let Pattern::Rule(id) = &grammar.root_patterns()[0] else {
            panic!("expected a rule");
        };
        let Rule::Region(region) = grammar.rule(*id) else {
            panic!("expected a region");
        };
        assert!(matches!(region.end, EndPattern::WithBackreferences(_)));

        let err = compile_json(r#"{"patterns": [{"begin": "a", "end": "\\1("}]}"#).unwrap_err();
        assert!(matches!(err, MalformedGrammar::PatternCompile(_)));
    }

    #[test]
    fn load_grammar_surfaces_malformed_grammar() {
        let err = load_grammar(r#"{"patterns": [{"begin": "`"}]}"#).unwrap_err();
        assert!(matches!(
            err,
            Error::MalformedGrammar(MalformedGrammar::MissingEnd { .. })
        ));
    }

    #[test]
    fn includes_are_kept_as_names() {
        let grammar = compile_json(
            r##"{
                "patterns": [{"include": "#parens"}, {"include": "$self"}, {"include": "source.python"}],
                "repository": {
                    "parens": {
                        "begin": "\\(", "end": "\\)",
                        "patterns": [{"include": "parens"}, {"include": "python#strings"}]
                    }
                }
            }"##,
        )
        .unwrap();

        assert_eq!(
            grammar.root_patterns()[..],
            [
                Pattern::Include(Reference::RuleSet("parens".to_owned())),
                Pattern::Include(Reference::Self_),
                Pattern::Include(Reference::Foreign {
                    language: "source.python".to_owned(),
                    rule_set: None
                }),
            ]
        );

        let parens = grammar.resolve("parens").unwrap();
        let Pattern::Rule(id) = parens[0] else {
            panic!("expected a rule");
        };
        let Rule::Region(region) = grammar.rule(id) else {
            panic!("expected a region");
        };
        assert_eq!(
            region.patterns,
            vec![
                Pattern::Include(Reference::RuleSet("parens".to_owned())),
                Pattern::Include(Reference::Foreign {
                    language: "python".to_owned(),
                    rule_set: Some("strings".to_owned())
                }),
            ]
        );
        assert!(grammar.resolve("missing").is_none());
    }

    #[test]
    fn captures_are_indexed_by_group() {
        let mut raw = RawCaptures::new();
        raw.insert(
            "2".to_owned(),
            crate::grammars::raw::RawCapture::Scope("b".to_owned()),
        );
        raw.insert(
            "x".to_owned(),
            crate::grammars::raw::RawCapture::Scope("ignored".to_owned()),
        );
        let captures = compile_captures(&raw);
        assert_eq!(captures.len(), 3);
        assert!(captures[0].is_none() && captures[1].is_none());
        assert!(captures[2].is_some());
    }
}
