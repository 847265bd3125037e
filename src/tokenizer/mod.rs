//! The scanning loop follows the logic of <https://github.com/microsoft/vscode-textmate>,
//! without injections and begin/while rules, and with delegated regions.

use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{BudgetKind, ScanBudgetExceeded};
use crate::grammars::{
    EndPattern, GlobalRuleRef, Grammar, GrammarId, GrammarSource, Pattern, PatternSet, Reference,
    Regex, RegexMatch, Rule, resolve_backreferences,
};
use crate::options::{Budget, ScanOptions};
use crate::scope::{Scope, ScopeName};
use crate::tokenizer::anchors::AnchorActive;
use crate::tokenizer::stack::EndMatcher;

pub(crate) mod anchors;
mod stack;

pub use stack::{RegionStack, StackFrame};

/// Consecutive steps that do not advance in the line before we give up on it
const MAX_STALLED_STEPS: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Token {
    /// Byte span within the line (start inclusive, end exclusive, 0-based)
    pub span: Range<usize>,
    /// Hierarchical scope names, ordered from outermost to innermost
    /// (e.g., source.tilefile -> string.quoted.double -> constant.character.escape).
    pub scopes: Vec<Scope>,
}

impl Token {
    /// The span in characters (code points) rather than bytes, `line` being the scanned line
    pub fn char_span(&self, line: &str) -> Range<usize> {
        let start = line[..self.span.start].chars().count();
        start..start + line[self.span.clone()].chars().count()
    }
}

/// Small wrapper so we only produce valid tokens.
/// Called in the tokenizer a few times and easier to use a struct than pass
/// mutable vec and usize everywhere
#[derive(Debug, Clone, Default)]
struct TokenAccumulator {
    tokens: Vec<Token>,
    /// Position up to which tokens have been generated
    /// (start of next token to be produced)
    last_end_pos: usize,
}

impl TokenAccumulator {
    fn produce(&mut self, end_pos: usize, scopes: &[Scope]) {
        // Skip empty tokens (can happen with zero-width matches)
        if self.last_end_pos >= end_pos {
            return;
        }

        #[cfg(feature = "debug")]
        log::trace!(
            "[produce]: [{}..{end_pos}] {}",
            self.last_end_pos,
            scopes
                .iter()
                .map(Scope::as_str)
                .collect::<Vec<_>>()
                .join(" ")
        );
        self.tokens.push(Token {
            span: self.last_end_pos..end_pos,
            scopes: scopes.to_vec(),
        });
        self.last_end_pos = end_pos;
    }

    /// Removes the added newline from the tokens, dropping the token made only of it
    fn finalize(&mut self, line_len: usize) {
        if let Some(tok) = self.tokens.last()
            && tok.span.start == line_len - 1
        {
            self.tokens.pop();
        }

        if let Some(t) = self.tokens.last_mut()
            && t.span.end == line_len
        {
            t.span.end -= 1;
        }
    }
}

/// The tokens of a line and the stack to give when scanning the next one
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedLine {
    pub tokens: Vec<Token>,
    pub stack: RegionStack,
}

/// A whole text scanned line by line
#[derive(Debug, Clone, PartialEq)]
pub struct TokenizedText {
    /// Tokens of each line, with spans relative to the start of their line
    pub lines: Vec<Vec<Token>>,
    /// Regions still open at the end of the text
    pub final_stack: RegionStack,
    /// Lines that hit a limit of the scan options and were partially scanned
    pub exhausted_lines: Vec<usize>,
}

impl TokenizedText {
    /// Regions that were opened but never closed: they are implicitly closed at the end of
    /// the text. An empty slice means the text is well-formed for the grammar.
    pub fn unterminated_regions(&self) -> &[StackFrame] {
        self.final_stack.frames()
    }
}

/// The rule set a pattern set is built for
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
enum PatternContext {
    /// Root patterns of a grammar: no region open or inside a delegating region
    Root(GrammarId),
    /// Children of a region rule
    Rule(GlobalRuleRef),
}

/// What the winning match of a step is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Candidate {
    /// The `end` of the delegating region at that index of the stack
    DelegationEnd(usize),
    /// A match or region rule of the active pattern set
    Rule(GlobalRuleRef),
    /// The `end` of the innermost region
    End,
}

#[derive(Debug)]
struct NextMatch {
    candidate: Candidate,
    start: usize,
    end: usize,
    capture_pos: Vec<Option<(usize, usize)>>,
}

impl NextMatch {
    fn new(candidate: Candidate, m: RegexMatch) -> Self {
        Self {
            candidate,
            start: m.start,
            end: m.end,
            capture_pos: m.captures,
        }
    }
}

/// Scans lines for a grammar of a [`GrammarSource`].
///
/// Pattern sets are built lazily the first time a context is seen and kept for the
/// lifetime of the tokenizer: create one per document or per batch of lines, not per line.
pub(crate) struct Tokenizer<'g> {
    source: &'g dyn GrammarSource,
    /// The grammar used when no region is open
    base_grammar_id: GrammarId,
    root_scopes: &'g [Scope],
    pattern_cache: HashMap<PatternContext, PatternSet>,
}

impl<'g> Tokenizer<'g> {
    pub fn new(source: &'g dyn GrammarSource, base_grammar_id: GrammarId) -> Self {
        let root_scopes = source
            .grammar(base_grammar_id)
            .map(Grammar::root_scopes)
            .unwrap_or_default();
        Self {
            source,
            base_grammar_id,
            root_scopes,
            pattern_cache: HashMap::new(),
        }
    }

    /// Scans a single line, without its line terminator.
    ///
    /// With the default options, this cannot fail.
    pub fn scan_line(
        &mut self,
        stack: &RegionStack,
        line: &str,
        options: &ScanOptions,
    ) -> Result<ScannedLine, ScanBudgetExceeded> {
        if options.is_too_long(line) {
            #[cfg(feature = "debug")]
            log::debug!(
                "[scan_line] line of {} bytes is over the limit, not scanning it",
                line.len()
            );
            let mut acc = TokenAccumulator::default();
            acc.produce(line.len(), content_scopes(stack, self.root_scopes));
            return Err(ScanBudgetExceeded {
                kind: BudgetKind::LineLength,
                partial: ScannedLine {
                    tokens: acc.tokens,
                    stack: stack.clone(),
                },
            });
        }

        // Always add a new line, some regex expect it
        let line = format!("{line}\n");
        let mut budget = options.start();
        let (mut acc, mut stack, exhausted) =
            self.tokenize_line(stack.clone(), &line, &mut budget);
        acc.finalize(line.len());
        stack.reset();

        let scanned = ScannedLine {
            tokens: acc.tokens,
            stack,
        };
        match exhausted {
            None => Ok(scanned),
            Some(kind) => {
                #[cfg(feature = "debug")]
                log::debug!("[scan_line] {kind} exceeded, rest of the line is plain text");
                Err(ScanBudgetExceeded {
                    kind,
                    partial: scanned,
                })
            }
        }
    }

    /// Scans every line of `text`, lines being separated by `\n`.
    /// Lines exceeding the budget are kept with their partial tokens.
    pub fn tokenize_string(&mut self, text: &str, options: &ScanOptions) -> TokenizedText {
        let mut stack = RegionStack::new();
        let mut lines = Vec::new();
        let mut exhausted_lines = Vec::new();

        if text.is_empty() {
            return TokenizedText {
                lines,
                final_stack: stack,
                exhausted_lines,
            };
        }

        for (i, line) in text.split('\n').enumerate() {
            let scanned = match self.scan_line(&stack, line, options) {
                Ok(scanned) => scanned,
                Err(e) => {
                    exhausted_lines.push(i);
                    e.partial
                }
            };
            lines.push(scanned.tokens);
            stack = scanned.stack;
        }

        #[cfg(feature = "debug")]
        if !stack.is_empty() {
            log::debug!(
                "[tokenize_string] {} regions still open at end of input:\n{stack:?}",
                stack.len()
            );
        }

        TokenizedText {
            lines,
            final_stack: stack,
            exhausted_lines,
        }
    }

    /// Flattens a pattern list into the rules it contains, following includes.
    /// Each rule set, root included, is expanded at most once, which takes care of cycles.
    fn collect_patterns(
        &self,
        grammar_id: GrammarId,
        patterns: &[Pattern],
        visited: &mut HashSet<(GrammarId, Option<String>)>,
        out: &mut Vec<GlobalRuleRef>,
    ) {
        let Some(grammar) = self.source.grammar(grammar_id) else {
            return;
        };

        for pattern in patterns {
            match pattern {
                Pattern::Rule(rule) => match grammar.rule(*rule) {
                    Rule::Group(children) => {
                        self.collect_patterns(grammar_id, children, visited, out)
                    }
                    Rule::Match(_) | Rule::Region(_) => out.push(GlobalRuleRef {
                        grammar: grammar_id,
                        rule: *rule,
                    }),
                },
                Pattern::Include(reference) => {
                    let (target, rule_set) = match reference {
                        Reference::Self_ => (grammar_id, None),
                        Reference::RuleSet(name) => (grammar_id, Some(name.as_str())),
                        Reference::Foreign { language, rule_set } => {
                            let Some(target) = self.source.find_grammar(language) else {
                                #[cfg(feature = "debug")]
                                log::debug!(
                                    "[collect_patterns] grammar '{language}' not found, ignoring include"
                                );
                                continue;
                            };
                            (target, rule_set.as_deref())
                        }
                    };
                    if !visited.insert((target, rule_set.map(str::to_owned))) {
                        continue;
                    }
                    let Some(target_grammar) = self.source.grammar(target) else {
                        continue;
                    };
                    let included = match rule_set {
                        Some(name) => target_grammar.resolve(name),
                        None => Some(target_grammar.root_patterns()),
                    };
                    if let Some(included) = included {
                        self.collect_patterns(target, included, visited, out);
                    }
                }
            }
        }
    }

    fn pattern_set(&mut self, context: PatternContext) -> &PatternSet {
        if !self.pattern_cache.contains_key(&context) {
            let mut visited = HashSet::new();
            let mut rule_refs = Vec::new();

            match context {
                PatternContext::Root(grammar_id) => {
                    if let Some(grammar) = self.source.grammar(grammar_id) {
                        visited.insert((grammar_id, None));
                        self.collect_patterns(
                            grammar_id,
                            grammar.root_patterns(),
                            &mut visited,
                            &mut rule_refs,
                        );
                    }
                }
                PatternContext::Rule(rule_ref) => {
                    if let Some(grammar) = self.source.grammar(rule_ref.grammar)
                        && let Rule::Region(region) = grammar.rule(rule_ref.rule)
                    {
                        self.collect_patterns(
                            rule_ref.grammar,
                            &region.patterns,
                            &mut visited,
                            &mut rule_refs,
                        );
                    }
                }
            }

            #[cfg(feature = "debug")]
            log::debug!(
                "[pattern_set] {} rules active for {context:?}",
                rule_refs.len()
            );
            self.pattern_cache
                .insert(context, PatternSet::new(rule_refs));
        }

        &self.pattern_cache[&context]
    }

    fn search_end(
        source: &dyn GrammarSource,
        frame: &StackFrame,
        line: &str,
        pos: usize,
        anchor: AnchorActive,
        budget: &mut Budget,
    ) -> Result<Option<RegexMatch>, BudgetKind> {
        let regex = match &frame.end {
            EndMatcher::Static(id) => match source.grammar(frame.rule_ref.grammar) {
                Some(grammar) => grammar.regex(*id),
                None => return Ok(None),
            },
            EndMatcher::Resolved(re) => re.as_ref(),
            EndMatcher::Never => return Ok(None),
        };
        budget.tick()?;
        Ok(regex.search(line, pos, anchor))
    }

    /// Finds what matches next, trying in order: the `end` of the enclosing delegating
    /// region, the active patterns, the `end` of the innermost region.
    /// The earliest start wins, ties go to the first one tried.
    fn find_next(
        &mut self,
        stack: &RegionStack,
        line: &str,
        pos: usize,
        anchor_position: Option<usize>,
        budget: &mut Budget,
    ) -> Result<Option<NextMatch>, BudgetKind> {
        let source = self.source;
        let anchor = AnchorActive::new(anchor_position, pos);
        let mut best: Option<NextMatch> = None;

        if let Some(depth) = stack.delegating_frame_below_top()
            && let Some(m) = Self::search_end(source, &stack.frames[depth], line, pos, anchor, budget)?
        {
            best = Some(NextMatch::new(Candidate::DelegationEnd(depth), m));
        }
        if best.as_ref().is_some_and(|b| b.start == pos) {
            return Ok(best);
        }

        let context = match stack.top() {
            None => PatternContext::Root(self.base_grammar_id),
            Some(frame) => match frame.embedded {
                Some(grammar_id) => PatternContext::Root(grammar_id),
                None => PatternContext::Rule(frame.rule_ref),
            },
        };
        let found = self
            .pattern_set(context)
            .find_at(source, line, pos, anchor, budget)?;
        if let Some(found) = found
            && best.as_ref().is_none_or(|b| found.start < b.start)
        {
            best = Some(NextMatch {
                candidate: Candidate::Rule(found.rule_ref),
                start: found.start,
                end: found.end,
                capture_pos: found.capture_pos,
            });
        }
        if best.as_ref().is_some_and(|b| b.start == pos) {
            return Ok(best);
        }

        if let Some(top) = stack.top()
            && let Some(m) = Self::search_end(source, top, line, pos, anchor, budget)?
            && best.as_ref().is_none_or(|b| m.start < b.start)
        {
            best = Some(NextMatch::new(Candidate::End, m));
        }

        Ok(best)
    }

    /// Emits the tokens of the capture groups of a match, nesting groups contained in
    /// other groups. Uncaptured text inside the match is not emitted here.
    fn resolve_captures(
        base_scopes: &[Scope],
        line: &str,
        rule_captures: &[Option<ScopeName>],
        captures: &[Option<(usize, usize)>],
        accumulator: &mut TokenAccumulator,
    ) {
        if rule_captures.is_empty() {
            return;
        }

        // (scopes, end_pos)[]
        let mut local_stack: Vec<(Vec<Scope>, usize)> = Vec::with_capacity(2);

        for (name, capture) in rule_captures.iter().zip(captures) {
            let (Some(name), Some((cap_start, cap_end))) = (name, *capture) else {
                continue;
            };
            // Nothing captured
            if cap_start == cap_end {
                continue;
            }

            // pop captures while needed
            while let Some((scopes, end_pos)) = local_stack.last()
                && *end_pos <= cap_start
            {
                accumulator.produce(*end_pos, scopes);
                local_stack.pop();
            }

            let parent = local_stack.last().map_or(base_scopes, |(s, _)| s.as_slice());
            accumulator.produce(cap_start, parent);

            let Some(scope) = name.resolve(line, captures) else {
                continue;
            };
            let mut scopes = parent.to_vec();
            scopes.push(scope);
            local_stack.push((scopes, cap_end));
        }

        while let Some((scopes, end_pos)) = local_stack.pop() {
            accumulator.produce(end_pos, &scopes);
        }
    }

    /// Scans `line`, which ends with `\n`.
    /// Returns the budget limit that was hit, if any: the rest of the line is then a
    /// background token.
    fn tokenize_line(
        &mut self,
        stack: RegionStack,
        line: &str,
        budget: &mut Budget,
    ) -> (TokenAccumulator, RegionStack, Option<BudgetKind>) {
        let source = self.source;
        let root_scopes = self.root_scopes;
        let mut accumulator = TokenAccumulator::default();
        let mut stack = stack;
        let mut pos = 0;
        let mut stalled = 0;
        // Reset to 0 if the begin of the innermost region captured the end of the previous line
        let mut anchor_position = stack
            .top()
            .filter(|f| f.begin_rule_has_captured_eol)
            .map(|_| 0);

        loop {
            #[cfg(feature = "debug")]
            log::trace!("[tokenize_line] Scanning {pos}: |{:?}|", &line[pos..]);

            let m = match self.find_next(&stack, line, pos, anchor_position, budget) {
                Ok(Some(m)) => m,
                Ok(None) => {
                    #[cfg(feature = "debug")]
                    log::trace!("[tokenize_line] no more matches");
                    accumulator.produce(line.len(), content_scopes(&stack, root_scopes));
                    break;
                }
                Err(kind) => {
                    accumulator.produce(line.len(), content_scopes(&stack, root_scopes));
                    return (accumulator, stack, Some(kind));
                }
            };

            #[cfg(feature = "debug")]
            log::debug!(
                "[tokenize_line] Matched {:?} from {} to {} => {:?}",
                m.candidate,
                m.start,
                m.end,
                &line[m.start..m.end]
            );

            let has_advanced = m.end > pos;

            match m.candidate {
                Candidate::DelegationEnd(_) | Candidate::End => {
                    accumulator.produce(m.start, content_scopes(&stack, root_scopes));

                    if let Candidate::DelegationEnd(depth) = m.candidate {
                        // Regions of the embedded grammar are closed where the delegating one ends
                        while stack.len() > depth + 1 {
                            let _closed = stack.pop();
                            #[cfg(feature = "debug")]
                            log::debug!(
                                "[tokenize_line] Implicitly closing {:?} at {}",
                                _closed.map(|f| f.rule_ref),
                                m.start
                            );
                        }
                    }

                    let Some(popped) = stack.pop() else {
                        break;
                    };
                    if let Some(grammar) = source.grammar(popped.rule_ref.grammar)
                        && let Rule::Region(region) = grammar.rule(popped.rule_ref.rule)
                    {
                        Self::resolve_captures(
                            &popped.name_scopes,
                            line,
                            &region.end_captures,
                            &m.capture_pos,
                            &mut accumulator,
                        );
                    }
                    accumulator.produce(m.end, &popped.name_scopes);
                    anchor_position = popped.anchor_position;

                    #[cfg(feature = "debug")]
                    log::debug!("[tokenize_line] Popped, new stack: {stack:?}");

                    // Grammar pushed & popped a rule without advancing - infinite loop protection
                    if !has_advanced && popped.enter_position == Some(pos) {
                        // Like vscode-textmate, restore the popped frame to keep the rule active
                        stack.push(popped);
                        #[cfg(feature = "debug")]
                        log::debug!("[tokenize_line] Region closed where it opened, stopping");
                        accumulator.produce(line.len(), content_scopes(&stack, root_scopes));
                        break;
                    }
                }
                Candidate::Rule(rule_ref) => {
                    let Some(grammar) = source.grammar(rule_ref.grammar) else {
                        break;
                    };
                    let parent_scopes = content_scopes(&stack, root_scopes).to_vec();
                    accumulator.produce(m.start, &parent_scopes);

                    match grammar.rule(rule_ref.rule) {
                        Rule::Match(rule) => {
                            let mut scopes = parent_scopes.clone();
                            scopes.extend(
                                rule.scope
                                    .as_ref()
                                    .and_then(|s| s.resolve(line, &m.capture_pos)),
                            );
                            Self::resolve_captures(
                                &scopes,
                                line,
                                &rule.captures,
                                &m.capture_pos,
                                &mut accumulator,
                            );
                            accumulator.produce(m.end, &scopes);

                            // Protection: grammar is not advancing, nor is it pushing/popping
                            if !has_advanced {
                                #[cfg(feature = "debug")]
                                log::debug!("[tokenize_line] Match rule didn't advance, stopping");
                                accumulator.produce(line.len(), &parent_scopes);
                                break;
                            }
                        }
                        Rule::Region(rule) => {
                            let mut name_scopes = parent_scopes.clone();
                            name_scopes.extend(
                                rule.scope
                                    .as_ref()
                                    .and_then(|s| s.resolve(line, &m.capture_pos)),
                            );
                            Self::resolve_captures(
                                &name_scopes,
                                line,
                                &rule.begin_captures,
                                &m.capture_pos,
                                &mut accumulator,
                            );
                            accumulator.produce(m.end, &name_scopes);

                            let mut content = name_scopes.clone();
                            content.extend(
                                rule.content_scope
                                    .as_ref()
                                    .and_then(|s| s.resolve(line, &m.capture_pos)),
                            );

                            let end = match &rule.end {
                                EndPattern::Static(id) => EndMatcher::Static(*id),
                                EndPattern::WithBackreferences(pattern) => {
                                    let resolved =
                                        resolve_backreferences(pattern, line, &m.capture_pos);
                                    match Regex::new(resolved) {
                                        Ok(re) => EndMatcher::Resolved(Arc::new(re)),
                                        Err(_) => EndMatcher::Never,
                                    }
                                }
                            };
                            let embedded = rule
                                .embedded_language
                                .as_deref()
                                .and_then(|language| source.find_grammar(language));

                            // Same rule entered at the same position without advancing
                            let is_reentry = !has_advanced
                                && stack.top().is_some_and(|f| {
                                    f.rule_ref == rule_ref && f.enter_position == Some(pos)
                                });

                            #[cfg(feature = "debug")]
                            log::debug!(
                                "[tokenize_line] Pushing {rule_ref:?}, embedded={embedded:?}"
                            );
                            stack.push(StackFrame {
                                rule_ref,
                                name_scopes,
                                content_scopes: content,
                                end,
                                embedded,
                                begin_rule_has_captured_eol: m.end == line.len(),
                                anchor_position,
                                enter_position: Some(pos),
                            });
                            anchor_position = Some(m.end);

                            if is_reentry {
                                #[cfg(feature = "debug")]
                                log::debug!("[tokenize_line] Region re-entered without advancing, stopping");
                                stack.pop();
                                accumulator.produce(line.len(), &parent_scopes);
                                break;
                            }
                        }
                        Rule::Group(_) => break,
                    }
                }
            }

            if has_advanced {
                pos = m.end;
                stalled = 0;
            } else {
                stalled += 1;
                if stalled >= MAX_STALLED_STEPS {
                    #[cfg(feature = "debug")]
                    log::debug!("[tokenize_line] Stuck at {pos}, stopping");
                    accumulator.produce(line.len(), content_scopes(&stack, root_scopes));
                    break;
                }
            }
        }

        accumulator.produce(line.len(), content_scopes(&stack, root_scopes));
        (accumulator, stack, None)
    }
}

/// Scopes of text that is not matched by anything
fn content_scopes<'a>(stack: &'a RegionStack, root_scopes: &'a [Scope]) -> &'a [Scope] {
    stack.top().map_or(root_scopes, |f| f.content_scopes.as_slice())
}

impl Grammar {
    /// Scans one line of text with this grammar alone, see [`crate::scan_line`].
    pub fn scan_line(&self, stack: &RegionStack, line: &str) -> ScannedLine {
        Tokenizer::new(self, GrammarId::SINGLE)
            .scan_line(stack, line, &ScanOptions::default())
            .unwrap_or_else(|e| e.partial)
    }

    /// Scans a whole text with this grammar alone
    pub fn tokenize(&self, text: &str) -> TokenizedText {
        Tokenizer::new(self, GrammarId::SINGLE).tokenize_string(text, &ScanOptions::default())
    }
}
