//! A text kept tokenized while it is edited line by line.
//!
//! Every line stores the region stack it ends with. After an edit, lines are re-scanned
//! from the edited one until a line ends with the same stack as before: the lines after
//! it would get the same input and produce the same tokens.

use std::ops::Range;

use crate::grammars::{GrammarId, GrammarSource};
use crate::options::ScanOptions;
use crate::tokenizer::{RegionStack, StackFrame, Token, Tokenizer};

#[derive(Debug, Clone)]
struct Line {
    text: String,
    tokens: Vec<Token>,
    end_stack: RegionStack,
    budget_exceeded: bool,
}

impl Line {
    fn new(text: String, end_stack: RegionStack) -> Self {
        Self {
            text,
            tokens: Vec::new(),
            end_stack,
            budget_exceeded: false,
        }
    }
}

/// A multi-line text and its tokens.
///
/// Lines are separated by `\n` and never contain it.
pub struct Document<'g> {
    tokenizer: Tokenizer<'g>,
    options: ScanOptions,
    lines: Vec<Line>,
}

impl<'g> Document<'g> {
    /// Scans every line of `text` with the grammar `grammar_id` of `source`.
    ///
    /// `source` is a [`Registry`](crate::Registry), or a [`Grammar`](crate::Grammar) used
    /// with [`GrammarId::SINGLE`].
    pub fn new(source: &'g dyn GrammarSource, grammar_id: GrammarId, text: &str) -> Self {
        Self::with_options(source, grammar_id, text, ScanOptions::default())
    }

    /// Same as [`Document::new`] with limits applied to every scanned line.
    pub fn with_options(
        source: &'g dyn GrammarSource,
        grammar_id: GrammarId,
        text: &str,
        options: ScanOptions,
    ) -> Self {
        let lines = text
            .split('\n')
            .map(|line| Line::new(line.to_owned(), RegionStack::new()))
            .collect();
        let mut doc = Self {
            tokenizer: Tokenizer::new(source, grammar_id),
            options,
            lines,
        };
        doc.rescan_all();
        doc
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    pub fn line(&self, index: usize) -> Option<&str> {
        self.lines.get(index).map(|l| l.text.as_str())
    }

    pub fn tokens(&self, index: usize) -> Option<&[Token]> {
        self.lines.get(index).map(|l| l.tokens.as_slice())
    }

    /// The whole text, lines joined with `\n`
    pub fn text(&self) -> String {
        self.lines
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Regions open at the end of the last line
    pub fn final_stack(&self) -> &RegionStack {
        // A document always has at least one line
        &self.lines[self.lines.len() - 1].end_stack
    }

    /// Regions that were opened but never closed, see
    /// [`TokenizedText::unterminated_regions`](crate::TokenizedText::unterminated_regions).
    pub fn unterminated_regions(&self) -> &[StackFrame] {
        self.final_stack().frames()
    }

    /// Lines that hit a limit of the scan options and were only partially scanned
    pub fn budget_exceeded_lines(&self) -> Vec<usize> {
        self.lines
            .iter()
            .enumerate()
            .filter(|(_, l)| l.budget_exceeded)
            .map(|(i, _)| i)
            .collect()
    }

    /// Replaces the text of a line and returns the lines that were re-scanned.
    ///
    /// # Panics
    /// If `index` is out of bounds.
    pub fn set_line(&mut self, index: usize, text: &str) -> Range<usize> {
        self.lines[index].text = text.to_owned();
        self.rescan_from(index)
    }

    /// Inserts a line before `index` and returns the lines that were re-scanned.
    ///
    /// # Panics
    /// If `index > line_count()`.
    pub fn insert_line(&mut self, index: usize, text: &str) -> Range<usize> {
        // Until it is scanned, the new line does not change the stack it starts with
        let end_stack = self.start_stack(index);
        self.lines
            .insert(index, Line::new(text.to_owned(), end_stack));
        self.rescan_from(index)
    }

    /// Removes a line and returns the lines that were re-scanned.
    /// Removing the only line leaves a single empty line.
    ///
    /// # Panics
    /// If `index` is out of bounds.
    pub fn remove_line(&mut self, index: usize) -> Range<usize> {
        self.lines.remove(index);
        if self.lines.is_empty() {
            self.lines.push(Line::new(String::new(), RegionStack::new()));
            return self.rescan_from(0);
        }
        if index == self.lines.len() {
            return index..index;
        }
        self.rescan_from(index)
    }

    fn start_stack(&self, index: usize) -> RegionStack {
        match index.checked_sub(1) {
            Some(previous) => self.lines[previous].end_stack.clone(),
            None => RegionStack::new(),
        }
    }

    fn rescan_all(&mut self) {
        let mut stack = RegionStack::new();
        for index in 0..self.lines.len() {
            self.scan(index, &stack);
            stack = self.lines[index].end_stack.clone();
        }
    }

    /// Scans a line and returns whether the stack it ends with changed
    fn scan(&mut self, index: usize, stack: &RegionStack) -> bool {
        let line = &mut self.lines[index];
        let (scanned, budget_exceeded) =
            match self.tokenizer.scan_line(stack, &line.text, &self.options) {
                Ok(scanned) => (scanned, false),
                Err(e) => {
                    #[cfg(feature = "debug")]
                    log::debug!("[Document::scan] line {index}: {e}");
                    (e.partial, true)
                }
            };
        line.tokens = scanned.tokens;
        line.budget_exceeded = budget_exceeded;
        let changed = line.end_stack != scanned.stack;
        line.end_stack = scanned.stack;
        changed
    }

    fn rescan_from(&mut self, start: usize) -> Range<usize> {
        let mut stack = self.start_stack(start);
        let mut index = start;

        while index < self.lines.len() {
            let changed = self.scan(index, &stack);
            index += 1;
            if !changed {
                break;
            }
            stack = self.lines[index - 1].end_stack.clone();
        }

        #[cfg(feature = "debug")]
        log::debug!("[Document::rescan_from] re-scanned lines {start}..{index}");
        start..index
    }
}
