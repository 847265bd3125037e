use std::fmt::{Debug, Formatter};

use crate::error::BudgetKind;
use crate::grammars::{GlobalRuleRef, GrammarSource, RegexMatch, Rule};
use crate::options::Budget;
use crate::tokenizer::anchors::AnchorActive;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PatternSetMatch {
    pub rule_ref: GlobalRuleRef,
    pub start: usize,
    pub end: usize,
    pub capture_pos: Vec<Option<(usize, usize)>>,
}

/// The flattened, ordered list of match and region rules active in some context.
///
/// Rules can come from several grammars when a foreign grammar is included, so they
/// are searched one by one with their own regex rather than as a single regex set.
pub struct PatternSet {
    rule_refs: Vec<GlobalRuleRef>,
}

impl PatternSet {
    pub fn new(rule_refs: Vec<GlobalRuleRef>) -> Self {
        Self { rule_refs }
    }

    /// Finds the match starting the earliest at or after `pos`.
    /// On a tie, the rule declared first wins.
    pub(crate) fn find_at(
        &self,
        source: &dyn GrammarSource,
        text: &str,
        pos: usize,
        anchor: AnchorActive,
        budget: &mut Budget,
    ) -> Result<Option<PatternSetMatch>, BudgetKind> {
        let mut best: Option<PatternSetMatch> = None;

        for rule_ref in &self.rule_refs {
            let Some(grammar) = source.grammar(rule_ref.grammar) else {
                continue;
            };
            let regex = match grammar.rule(rule_ref.rule) {
                Rule::Match(m) => m.regex,
                Rule::Region(r) => r.begin,
                Rule::Group(_) => continue,
            };

            budget.tick()?;
            let Some(RegexMatch {
                start,
                end,
                captures,
            }) = grammar.regex(regex).search(text, pos, anchor)
            else {
                continue;
            };

            if best.as_ref().is_some_and(|b| b.start <= start) {
                continue;
            }
            best = Some(PatternSetMatch {
                rule_ref: *rule_ref,
                start,
                end,
                capture_pos: captures,
            });
            // Nothing can start earlier
            if start == pos {
                break;
            }
        }

        Ok(best)
    }
}

impl Debug for PatternSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "PatternSet({} rules)", self.rule_refs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammars::{GrammarId, Pattern, RuleId};
    use crate::load_grammar;

    fn rule_refs(patterns: &[Pattern]) -> Vec<GlobalRuleRef> {
        patterns
            .iter()
            .map(|p| match p {
                Pattern::Rule(rule) => GlobalRuleRef {
                    grammar: GrammarId::SINGLE,
                    rule: *rule,
                },
                Pattern::Include(_) => panic!("expected rules only"),
            })
            .collect()
    }

    #[test]
    fn earliest_match_wins_then_declared_order() {
        let grammar = load_grammar(
            r#"{"patterns": [
                {"match": "b+", "scope": "bees"},
                {"match": "a", "scope": "a"},
                {"match": "ab", "scope": "ab"}
            ]}"#,
        )
        .unwrap();
        let set = PatternSet::new(rule_refs(grammar.root_patterns()));
        let mut budget = crate::ScanOptions::default().start();

        let found = set
            .find_at(&grammar, "xxabb", 0, AnchorActive::None, &mut budget)
            .unwrap()
            .unwrap();
        // `a` and `ab` both start at 2, `a` is declared first
        assert_eq!((found.start, found.end), (2, 3));
        assert_eq!(found.rule_ref.rule, RuleId(1));

        let found = set
            .find_at(&grammar, "xxabb", 3, AnchorActive::None, &mut budget)
            .unwrap()
            .unwrap();
        assert_eq!((found.start, found.end), (3, 5));
    }

    #[test]
    fn every_search_is_counted() {
        let grammar =
            load_grammar(r#"{"patterns": [{"match": "a"}, {"match": "b"}, {"match": "c"}]}"#)
                .unwrap();
        let set = PatternSet::new(rule_refs(grammar.root_patterns()));
        let mut budget = crate::ScanOptions::new().step_budget(2).start();
        assert_eq!(
            set.find_at(&grammar, "zzz", 0, AnchorActive::None, &mut budget),
            Err(BudgetKind::Steps)
        );
    }
}
