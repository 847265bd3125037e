use std::fmt;
use std::sync::Arc;

use crate::grammars::{GlobalRuleRef, GrammarId, Regex, RegexId};
use crate::scope::Scope;

/// How the `end` of an open region is matched
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum EndMatcher {
    /// The `end` regex of the rule, used as is
    Static(RegexId),
    /// The `end` regex with back-references replaced by what `begin` captured
    Resolved(Arc<Regex>),
    /// The resolved `end` did not compile: the region can only be closed by
    /// the end of the input
    Never,
}

/// An open region
#[derive(Clone, Debug, PartialEq)]
pub struct StackFrame {
    /// The region rule that opened this frame
    pub(crate) rule_ref: GlobalRuleRef,
    /// Scopes applied to the begin/end delimiters
    pub(crate) name_scopes: Vec<Scope>,
    /// Scopes applied to the content between delimiters
    pub(crate) content_scopes: Vec<Scope>,
    pub(crate) end: EndMatcher,
    /// The grammar scanning the inside of the region, for delegating regions
    pub(crate) embedded: Option<GrammarId>,
    /// The `begin` match reached the end of the line.
    /// This means that the next line should start with an anchor_position of 0.
    pub(crate) begin_rule_has_captured_eol: bool,
    /// Anchor position of the parent when this frame was pushed, restored on pop
    pub(crate) anchor_position: Option<usize>,
    /// The position where this rule was entered during current line (for infinite loop detection)
    /// None at beginning of a line
    pub(crate) enter_position: Option<usize>,
}

impl StackFrame {
    /// The region rule that opened this frame
    pub fn rule(&self) -> GlobalRuleRef {
        self.rule_ref
    }

    /// Scopes of the begin and end delimiters of the region
    pub fn scopes(&self) -> &[Scope] {
        &self.name_scopes
    }

    /// Scopes of the text inside the region
    pub fn content_scopes(&self) -> &[Scope] {
        &self.content_scopes
    }

    /// Set when the inside of the region is scanned by another grammar
    pub fn embedded_grammar(&self) -> Option<GrammarId> {
        self.embedded
    }
}

/// The regions still open at the end of a line.
///
/// The stack returned when scanning a line is the one to give when scanning the next
/// line. It is a plain value owned by the caller: keep one per line to re-scan from
/// any line later on.
#[derive(Clone, Default, PartialEq)]
pub struct RegionStack {
    /// Frames from outermost to innermost
    pub(crate) frames: Vec<StackFrame>,
}

impl RegionStack {
    /// The state before the first line: no region open
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    /// The innermost open region
    pub fn top(&self) -> Option<&StackFrame> {
        self.frames.last()
    }

    pub(crate) fn push(&mut self, frame: StackFrame) {
        self.frames.push(frame);
    }

    /// Exits the current region, getting back to the parent
    pub(crate) fn pop(&mut self) -> Option<StackFrame> {
        self.frames.pop()
    }

    /// Index of the closest delegating region strictly below the innermost one.
    /// Its `end` is tried before anything else.
    pub(crate) fn delegating_frame_below_top(&self) -> Option<usize> {
        let below_top = self.frames.len().checked_sub(1)?;
        self.frames[..below_top]
            .iter()
            .rposition(|f| f.embedded.is_some())
    }

    /// Resets enter_position/anchor_position for all frames to None.
    /// Positions only make sense within the line that set them.
    pub(crate) fn reset(&mut self) {
        for frame in &mut self.frames {
            frame.enter_position = None;
            frame.anchor_position = None;
        }
    }
}

impl fmt::Debug for RegionStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "RegionStack:")?;

        for (depth, frame) in self.frames.iter().enumerate() {
            let indent = "  ".repeat(depth);
            write!(
                f,
                "{}grammar={}, rule={}",
                indent, frame.rule_ref.grammar.0, frame.rule_ref.rule.0
            )?;

            if !frame.name_scopes.is_empty() {
                let names: Vec<&str> = frame.name_scopes.iter().map(Scope::as_str).collect();
                write!(f, " name=[{}]", names.join(", "))?;
            }
            if frame.content_scopes != frame.name_scopes {
                let names: Vec<&str> = frame.content_scopes.iter().map(Scope::as_str).collect();
                write!(f, ", content=[{}]", names.join(", "))?;
            }
            match &frame.end {
                EndMatcher::Static(_) => (),
                EndMatcher::Resolved(re) => write!(f, ", end=\"{}\"", re.pattern())?,
                EndMatcher::Never => write!(f, ", end=never")?,
            }
            if let Some(embedded) = frame.embedded {
                write!(f, ", embedded={}", embedded.0)?;
            }
            if frame.begin_rule_has_captured_eol {
                write!(f, ", begin_rule_has_captured_eol")?;
            }

            writeln!(f)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammars::RuleId;

    fn frame(rule: u32, embedded: Option<GrammarId>) -> StackFrame {
        StackFrame {
            rule_ref: GlobalRuleRef {
                grammar: GrammarId(0),
                rule: RuleId(rule),
            },
            name_scopes: vec![Scope::new("meta.block")],
            content_scopes: vec![Scope::new("meta.block")],
            end: EndMatcher::Never,
            embedded,
            begin_rule_has_captured_eol: false,
            anchor_position: Some(3),
            enter_position: Some(2),
        }
    }

    #[test]
    fn reset_only_clears_positions() {
        let mut stack = RegionStack::new();
        stack.push(frame(0, None));
        let mut expected = stack.clone();
        expected.frames[0].anchor_position = None;
        expected.frames[0].enter_position = None;

        stack.reset();
        assert_eq!(stack, expected);
        assert_ne!(stack, RegionStack::new());
    }

    #[test]
    fn finds_delegating_frame_below_top() {
        let mut stack = RegionStack::new();
        assert_eq!(stack.delegating_frame_below_top(), None);

        stack.push(frame(0, Some(GrammarId(1))));
        // The delegating region is the innermost one
        assert_eq!(stack.delegating_frame_below_top(), None);

        stack.push(frame(1, None));
        stack.push(frame(2, None));
        assert_eq!(stack.delegating_frame_below_top(), Some(0));
        assert_eq!(stack.len(), 3);
        assert_eq!(stack.pop().map(|f| f.rule().rule), Some(RuleId(2)));
    }
}
