//! The run capability: styled spans of text or inline objects.
//!
//! A [`Run`] is an opaque, contiguous span of content within one line. The
//! layout engine never inspects a run's styling; it only asks the run to
//! measure sub-ranges, report metrics, and move itself between line
//! buffers during structural edits. Two built-in run kinds are provided:
//! [`TextRun`] for plain styled text and [`ObjectRun`] for inline objects
//! (images, widgets) occupying exactly one placeholder character.
//!
//! Runs reference their line's text through a shared [`LineText`] buffer
//! rather than holding a copy, so byte offsets stay meaningful across
//! edits. Measurement itself is delegated to a pluggable [`TextMeasurer`]
//! so the engine stays independent of any particular font backend.

use std::cell::RefCell;
use std::rc::Rc;

use crate::block::LayoutBlock;
use crate::range::TextRange;
use crate::types::{Point, Size, TextHitPoint};

/// A line's backing text buffer, shared between the line model and every
/// run on that line.
pub type LineText = Rc<RefCell<String>>;

/// Shared handle to a run.
pub type RunRc = Rc<RefCell<dyn Run>>;

/// Shared handle to a measurer.
pub type MeasurerRc = Rc<dyn TextMeasurer>;

/// Create a new shared line buffer from a string.
pub fn line_text(text: impl Into<String>) -> LineText {
    Rc::new(RefCell::new(text.into()))
}

/// Capability bits reported by a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunAttributes {
    /// Whether text may be inserted into this run. Runs without this bit
    /// carry exactly one placeholder character; edits around them
    /// synthesize sibling text runs instead of growing the run.
    pub supports_text: bool,
}

/// Provides metrics for measuring text, independent of any font backend.
///
/// Baselines are negative offsets: the returned value is the distance from
/// the bottom of the measured box down to the baseline, negated.
pub trait TextMeasurer {
    /// Measure a piece of text at the given scale.
    fn measure(&self, text: &str, scale: f32) -> Size;

    /// The kerning adjustment between two adjacent characters.
    fn kerning(&self, _previous: char, _next: char, _scale: f32) -> f32 {
        0.0
    }

    /// The maximum height of any glyph at the given scale.
    fn max_height(&self, scale: f32) -> f32;

    /// The baseline offset at the given scale (negative).
    fn baseline(&self, scale: f32) -> f32;
}

/// A fixed-advance measurer: every character is `advance` wide.
///
/// Useful for headless layout and tests, where real font metrics are
/// unavailable or undesirable.
#[derive(Debug, Clone)]
pub struct FixedAdvanceMeasurer {
    pub advance: f32,
    pub max_height: f32,
    pub descent: f32,
}

impl Default for FixedAdvanceMeasurer {
    fn default() -> Self {
        Self {
            advance: 8.0,
            max_height: 16.0,
            descent: 4.0,
        }
    }
}

impl TextMeasurer for FixedAdvanceMeasurer {
    fn measure(&self, text: &str, scale: f32) -> Size {
        let count = text.chars().count() as f32;
        Size::new(count * self.advance * scale, self.max_height * scale)
    }

    fn max_height(&self, scale: f32) -> f32 {
        self.max_height * scale
    }

    fn baseline(&self, scale: f32) -> f32 {
        -self.descent * scale
    }
}

/// An opaque styled span of content within a line.
///
/// All offsets are byte offsets into the shared line buffer. `measure`
/// must return a zero size for empty ranges and be deterministic for a
/// given (range, scale) pair; the engine caches measurements on that
/// assumption.
pub trait Run {
    /// The range of the line buffer this run covers.
    fn text_range(&self) -> TextRange;

    /// Re-range the run within its current buffer.
    fn set_text_range(&mut self, range: TextRange);

    /// Measure the sub-range `[begin, end)` of the line buffer.
    fn measure(&self, begin: usize, end: usize, scale: f32) -> Size;

    /// The kerning adjustment for the character boundary at `index`.
    fn kerning_at(&self, index: usize, scale: f32) -> f32;

    /// The maximum glyph height of this run.
    fn max_height(&self, scale: f32) -> f32;

    /// The run's baseline (negative offset, see [`TextMeasurer`]).
    fn baseline(&self, scale: f32) -> f32;

    /// Capability bits for this run.
    fn attributes(&self) -> RunAttributes;

    /// Clone this run into a new shared handle (same buffer, same range).
    fn clone_run(&self) -> RunRc;

    /// Re-point the run at a new buffer and range. Called when lines are
    /// split or joined and ownership of the text moves.
    fn move_to(&mut self, text: LineText, range: TextRange);

    /// Append the run's whole text to `out`.
    fn append_text_to(&self, out: &mut String);

    /// Append the intersection of the run's text and `range` to `out`.
    fn append_range_to(&self, out: &mut String, range: TextRange);

    /// Hook called before a layout pass touches this run.
    fn begin_layout(&mut self) {}

    /// Hook called once a layout pass has finished with this run.
    fn end_layout(&mut self) {}

    /// Map a point to a byte offset within `block`, or `None` when the
    /// point lies outside the block's horizontal bounds.
    fn text_index_at(
        &self,
        block: &LayoutBlock,
        point: Point,
        scale: f32,
    ) -> Option<(usize, TextHitPoint)>;

    /// Map a byte offset (relative to the block's begin) to a point, or
    /// `None` when the run cannot position it.
    fn location_at(&self, block: &LayoutBlock, offset: usize, scale: f32) -> Option<Point>;
}

/// A plain text run: a styled span measured through a [`TextMeasurer`].
#[derive(Clone)]
pub struct TextRun {
    text: LineText,
    range: TextRange,
    measurer: MeasurerRc,
}

impl TextRun {
    /// Create a text run over `range` of the shared buffer.
    pub fn new(text: LineText, range: TextRange, measurer: MeasurerRc) -> Self {
        Self {
            text,
            range,
            measurer,
        }
    }

    /// Create a text run wrapped in a shared handle.
    pub fn shared(text: LineText, range: TextRange, measurer: MeasurerRc) -> RunRc {
        Rc::new(RefCell::new(Self::new(text, range, measurer)))
    }
}

impl Run for TextRun {
    fn text_range(&self) -> TextRange {
        self.range
    }

    fn set_text_range(&mut self, range: TextRange) {
        self.range = range;
    }

    fn measure(&self, begin: usize, end: usize, scale: f32) -> Size {
        if begin == end {
            return Size::ZERO;
        }
        let text = self.text.borrow();
        self.measurer.measure(&text[begin..end], scale)
    }

    fn kerning_at(&self, index: usize, scale: f32) -> f32 {
        let text = self.text.borrow();
        let previous = text[..index].chars().next_back();
        let next = text[index..].chars().next();
        match (previous, next) {
            (Some(previous), Some(next)) => self.measurer.kerning(previous, next, scale),
            _ => 0.0,
        }
    }

    fn max_height(&self, scale: f32) -> f32 {
        self.measurer.max_height(scale)
    }

    fn baseline(&self, scale: f32) -> f32 {
        self.measurer.baseline(scale)
    }

    fn attributes(&self) -> RunAttributes {
        RunAttributes {
            supports_text: true,
        }
    }

    fn clone_run(&self) -> RunRc {
        Rc::new(RefCell::new(self.clone()))
    }

    fn move_to(&mut self, text: LineText, range: TextRange) {
        self.text = text;
        self.range = range;
    }

    fn append_text_to(&self, out: &mut String) {
        let text = self.text.borrow();
        out.push_str(&text[self.range.begin..self.range.end]);
    }

    fn append_range_to(&self, out: &mut String, range: TextRange) {
        let clipped = self.range.intersect(range);
        if !clipped.is_empty() {
            let text = self.text.borrow();
            out.push_str(&text[clipped.begin..clipped.end]);
        }
    }

    fn text_index_at(
        &self,
        block: &LayoutBlock,
        point: Point,
        scale: f32,
    ) -> Option<(usize, TextHitPoint)> {
        let offset = block.location_offset();
        let size = block.size();
        if point.x < offset.x || point.x >= offset.x + size.width {
            return None;
        }

        let range = block.text_range();
        let target = point.x - offset.x;
        let text = self.text.borrow();

        let mut width_before = 0.0f32;
        for (index, ch) in text[range.begin..range.end].char_indices() {
            let char_begin = range.begin + index;
            let char_end = char_begin + ch.len_utf8();
            let width_after = self
                .measurer
                .measure(&text[range.begin..char_end], scale)
                .width;
            if target < width_after {
                let midpoint = (width_before + width_after) * 0.5;
                let hit_index = if target < midpoint { char_begin } else { char_end };
                let hit_point = if hit_index == self.range.end {
                    TextHitPoint::RightGutter
                } else {
                    TextHitPoint::WithinText
                };
                return Some((hit_index, hit_point));
            }
            width_before = width_after;
        }

        Some((range.end, TextHitPoint::WithinText))
    }

    fn location_at(&self, block: &LayoutBlock, offset: usize, scale: f32) -> Option<Point> {
        let range = block.text_range();
        let width = self
            .measure(range.begin, range.begin + offset, scale)
            .width;
        let location = block.location_offset();
        Some(Point::new(location.x + width, location.y))
    }
}

/// An inline object run (image, widget, ...) occupying exactly one
/// placeholder character in the line buffer.
#[derive(Clone)]
pub struct ObjectRun {
    text: LineText,
    range: TextRange,
    size: Size,
    baseline: f32,
}

impl ObjectRun {
    /// The placeholder character an object run covers in the line buffer.
    pub const PLACEHOLDER: char = '\u{FFFC}';

    /// Create an object run. `range` must cover exactly the placeholder
    /// character within the shared buffer.
    pub fn new(text: LineText, range: TextRange, size: Size, baseline: f32) -> Self {
        debug_assert_eq!(range.len(), Self::PLACEHOLDER.len_utf8());
        Self {
            text,
            range,
            size,
            baseline,
        }
    }

    /// Create an object run wrapped in a shared handle.
    pub fn shared(text: LineText, range: TextRange, size: Size, baseline: f32) -> RunRc {
        Rc::new(RefCell::new(Self::new(text, range, size, baseline)))
    }
}

impl Run for ObjectRun {
    fn text_range(&self) -> TextRange {
        self.range
    }

    fn set_text_range(&mut self, range: TextRange) {
        self.range = range;
    }

    fn measure(&self, begin: usize, end: usize, scale: f32) -> Size {
        if begin == end {
            return Size::ZERO;
        }
        Size::new(self.size.width * scale, self.size.height * scale)
    }

    fn kerning_at(&self, _index: usize, _scale: f32) -> f32 {
        0.0
    }

    fn max_height(&self, scale: f32) -> f32 {
        self.size.height * scale
    }

    fn baseline(&self, scale: f32) -> f32 {
        self.baseline * scale
    }

    fn attributes(&self) -> RunAttributes {
        RunAttributes {
            supports_text: false,
        }
    }

    fn clone_run(&self) -> RunRc {
        Rc::new(RefCell::new(self.clone()))
    }

    fn move_to(&mut self, text: LineText, range: TextRange) {
        self.text = text;
        self.range = range;
    }

    fn append_text_to(&self, out: &mut String) {
        let text = self.text.borrow();
        out.push_str(&text[self.range.begin..self.range.end]);
    }

    fn append_range_to(&self, out: &mut String, range: TextRange) {
        let clipped = self.range.intersect(range);
        if !clipped.is_empty() {
            let text = self.text.borrow();
            out.push_str(&text[clipped.begin..clipped.end]);
        }
    }

    fn text_index_at(
        &self,
        block: &LayoutBlock,
        point: Point,
        scale: f32,
    ) -> Option<(usize, TextHitPoint)> {
        let _ = scale;
        let offset = block.location_offset();
        let size = block.size();
        if point.x < offset.x || point.x >= offset.x + size.width {
            return None;
        }

        let range = block.text_range();
        let index = if point.x - offset.x < size.width * 0.5 {
            range.begin
        } else {
            range.end
        };
        Some((index, TextHitPoint::WithinText))
    }

    fn location_at(&self, block: &LayoutBlock, _offset: usize, _scale: f32) -> Option<Point> {
        Some(block.location_offset())
    }
}
