//! Pluggable break iterator capabilities.
//!
//! The layout engine finds wrap points through a [`LineBreakIterator`] and
//! word boundaries through a [`WordBreakIterator`]. Both are pluggable so
//! callers can substitute locale- or content-specific segmentation; the
//! defaults use Unicode segmentation rules (UAX #14 for line breaks, UAX
//! #29 for word boundaries).

use unicode_segmentation::UnicodeSegmentation;

/// Reports positions at which a line of text may be wrapped.
///
/// Iteration protocol: [`set_text`](Self::set_text), then repeated
/// [`move_to_next`](Self::move_to_next) calls yielding strictly increasing
/// byte offsets (the last of which is the text length), then
/// [`clear_text`](Self::clear_text).
pub trait LineBreakIterator {
    /// Begin iterating break opportunities over `text`.
    fn set_text(&mut self, text: &str);

    /// Advance to the next break opportunity. Returns `None` once exhausted.
    fn move_to_next(&mut self) -> Option<usize>;

    /// Release the iteration state.
    fn clear_text(&mut self);
}

/// Reports word boundaries within a line of text.
pub trait WordBreakIterator {
    /// Begin iterating word boundaries over `text`.
    fn set_text(&mut self, text: &str);

    /// Position the cursor at the first boundary strictly after `offset`
    /// and return it, or `None` when no such boundary exists.
    fn move_to_candidate_after(&mut self, offset: usize) -> Option<usize>;

    /// Step the cursor back one boundary and return it, or `None` at the
    /// start of the text.
    fn move_to_previous(&mut self) -> Option<usize>;

    /// Release the iteration state.
    fn clear_text(&mut self);
}

/// Default line break iterator using UAX #14 break opportunities.
#[derive(Debug, Default)]
pub struct UnicodeLineBreakIterator {
    breaks: Vec<usize>,
    cursor: usize,
}

impl UnicodeLineBreakIterator {
    /// Create a new iterator with no text set.
    pub fn new() -> Self {
        Self::default()
    }
}

impl LineBreakIterator for UnicodeLineBreakIterator {
    fn set_text(&mut self, text: &str) {
        // The final mandatory break at end-of-text is kept; a break at
        // offset zero (empty text) produces no candidate.
        self.breaks = unicode_linebreak::linebreaks(text)
            .map(|(index, _)| index)
            .filter(|&index| index > 0)
            .collect();
        self.cursor = 0;
    }

    fn move_to_next(&mut self) -> Option<usize> {
        let next = self.breaks.get(self.cursor).copied();
        if next.is_some() {
            self.cursor += 1;
        }
        next
    }

    fn clear_text(&mut self) {
        self.breaks.clear();
        self.cursor = 0;
    }
}

/// Default word break iterator using UAX #29 word boundaries.
#[derive(Debug, Default)]
pub struct UnicodeWordBreakIterator {
    boundaries: Vec<usize>,
    cursor: usize,
}

impl UnicodeWordBreakIterator {
    /// Create a new iterator with no text set.
    pub fn new() -> Self {
        Self::default()
    }
}

impl WordBreakIterator for UnicodeWordBreakIterator {
    fn set_text(&mut self, text: &str) {
        self.boundaries.clear();
        self.boundaries.push(0);
        for (index, word) in text.split_word_bound_indices() {
            self.boundaries.push(index + word.len());
        }
        self.cursor = 0;
    }

    fn move_to_candidate_after(&mut self, offset: usize) -> Option<usize> {
        let position = self.boundaries.iter().position(|&b| b > offset)?;
        self.cursor = position;
        Some(self.boundaries[position])
    }

    fn move_to_previous(&mut self) -> Option<usize> {
        if self.cursor == 0 {
            return None;
        }
        self.cursor -= 1;
        Some(self.boundaries[self.cursor])
    }

    fn clear_text(&mut self) {
        self.boundaries.clear();
        self.cursor = 0;
    }
}
