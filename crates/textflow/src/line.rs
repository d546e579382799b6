//! Per-line layout state: measured runs, break candidates, decorations.
//!
//! A [`LineModel`] owns everything the engine knows about one hard line:
//! the shared text buffer, the runs tiling it, the wrapping cache of
//! [`BreakCandidate`]s, and the renderers and highlights registered on it.
//! [`RunModel`] wraps each run with a measurement cache so that repeated
//! layout passes over unchanged text never re-measure the same range.

use std::rc::Rc;

use crate::block::{BlockDefinition, LayoutBlock};
use crate::highlight::{TextLineHighlight, TextRunRenderer};
use crate::range::TextRange;
use crate::run::{LineText, RunRc};
use crate::types::Size;

/// A run plus its measurement cache.
///
/// Measurements taken through [`measure`](Self::measure) are recorded as
/// (range, size) pairs in text order. [`create_block`](Self::create_block)
/// reuses them: a block range covered by cached sub-ranges is assembled by
/// summing widths, and only uncovered head or tail spans are measured
/// fresh.
pub struct RunModel {
    run: RunRc,
    measured_ranges: Vec<TextRange>,
    measured_sizes: Vec<Size>,
}

impl RunModel {
    /// Cache sizes above this use binary search to find the covered span.
    const BINARY_SEARCH_THRESHOLD: usize = 16;

    /// Wrap a run with an empty measurement cache.
    pub fn new(run: RunRc) -> Self {
        Self {
            run,
            measured_ranges: Vec::new(),
            measured_sizes: Vec::new(),
        }
    }

    /// The wrapped run.
    pub fn run(&self) -> &RunRc {
        &self.run
    }

    /// The range of the line buffer the wrapped run covers.
    pub fn text_range(&self) -> TextRange {
        self.run.borrow().text_range()
    }

    /// Re-range the wrapped run. Invalidates nothing; callers editing text
    /// are expected to clear the cache through the owning line.
    pub fn set_text_range(&self, range: TextRange) {
        self.run.borrow_mut().set_text_range(range);
    }

    /// Measure `[begin, end)` and record the result in the cache.
    pub fn measure(&mut self, begin: usize, end: usize, scale: f32) -> Size {
        let size = self.run.borrow().measure(begin, end, scale);
        self.measured_ranges.push(TextRange::new(begin, end));
        self.measured_sizes.push(size);
        size
    }

    /// Measure `[begin, end)` without touching the cache.
    pub fn measure_uncached(&self, begin: usize, end: usize, scale: f32) -> Size {
        self.run.borrow().measure(begin, end, scale)
    }

    /// The kerning adjustment at `index` within the wrapped run.
    pub fn kerning_at(&self, index: usize, scale: f32) -> f32 {
        self.run.borrow().kerning_at(index, scale)
    }

    /// The wrapped run's maximum glyph height.
    pub fn max_height(&self, scale: f32) -> f32 {
        self.run.borrow().max_height(scale)
    }

    /// The wrapped run's baseline.
    pub fn baseline(&self, scale: f32) -> f32 {
        self.run.borrow().baseline(scale)
    }

    /// Build a positioned block for `definition`, reusing cached
    /// measurements where they tile the requested range.
    pub fn create_block(&self, definition: &BlockDefinition, scale: f32) -> LayoutBlock {
        let size = self.measure_block_range(definition.range, scale);
        LayoutBlock::new(
            Rc::clone(&self.run),
            definition.range,
            size,
            definition.renderer.clone(),
        )
    }

    fn measure_block_range(&self, range: TextRange, scale: f32) -> Size {
        if range.is_empty() {
            return Size::ZERO;
        }
        if self.measured_ranges.is_empty() {
            return self.run.borrow().measure(range.begin, range.end, scale);
        }

        let (start_index, stop_index) = if self.measured_ranges.len() > Self::BINARY_SEARCH_THRESHOLD
        {
            (
                self.measured_ranges
                    .partition_point(|cached| cached.end <= range.begin),
                self.measured_ranges
                    .partition_point(|cached| cached.begin < range.end),
            )
        } else {
            (0, self.measured_ranges.len())
        };

        let mut size = Size::ZERO;
        let mut covered_begin = None;
        let mut covered_end = range.begin;
        for index in start_index..stop_index {
            let cached = self.measured_ranges[index];
            if cached.begin >= covered_end && cached.end <= range.end && !cached.is_empty() {
                if covered_begin.is_none() {
                    covered_begin = Some(cached.begin);
                }
                size.width += self.measured_sizes[index].width;
                size.height = size.height.max(self.measured_sizes[index].height);
                covered_end = cached.end;
            }
        }

        let Some(covered_begin) = covered_begin else {
            return self.run.borrow().measure(range.begin, range.end, scale);
        };

        if covered_begin > range.begin {
            let head = self.run.borrow().measure(range.begin, covered_begin, scale);
            size.width += head.width;
            size.height = size.height.max(head.height);
        }
        if covered_end < range.end {
            let tail = self.run.borrow().measure(covered_end, range.end, scale);
            size.width += tail.width;
            size.height = size.height.max(tail.height);
        }
        size
    }

    /// Drop all cached measurements.
    pub fn clear_cache(&mut self) {
        self.measured_ranges.clear();
        self.measured_sizes.clear();
    }

    /// Append the wrapped run's whole text to `out`.
    pub fn append_text_to(&self, out: &mut String) {
        self.run.borrow().append_text_to(out);
    }

    /// Append the intersection of the wrapped run's text and `range`.
    pub fn append_range_to(&self, out: &mut String, range: TextRange) {
        self.run.borrow().append_range_to(out, range);
    }

    /// Notify the wrapped run that a layout pass is starting.
    pub fn begin_layout(&self) {
        self.run.borrow_mut().begin_layout();
    }

    /// Notify the wrapped run that a layout pass has finished.
    pub fn end_layout(&self) {
        self.run.borrow_mut().end_layout();
    }
}

/// One wrap opportunity on a line, fully measured.
///
/// The actual range runs from the previous break to this one; the trimmed
/// range excludes trailing whitespace. Both sizes are cached along with
/// the metrics needed to place the candidate without re-measuring.
#[derive(Debug, Clone, Copy)]
pub struct BreakCandidate {
    /// Size of the full span, trailing whitespace included.
    pub actual_size: Size,
    /// Size of the span with trailing whitespace removed.
    pub trimmed_size: Size,
    /// The full span.
    pub actual_range: TextRange,
    /// The span with trailing whitespace removed.
    pub trimmed_range: TextRange,
    /// Width of the first whitespace character after the trimmed span,
    /// used to account for one space when a wrapped line ends here.
    pub first_trailing_whitespace_char_width: f32,
    /// Greatest ascent over the span (height above the baseline).
    pub max_above_baseline: f32,
    /// Greatest descent over the span (height below the baseline).
    pub max_below_baseline: f32,
    /// Kerning adjustment at the candidate's first character.
    pub kerning: f32,
}

/// Everything the engine tracks for one hard line.
pub struct LineModel {
    /// The shared text buffer, also referenced by every run on the line.
    pub text: LineText,
    /// Runs tiling the buffer in text order, gap-free.
    pub runs: Vec<RunModel>,
    /// The wrapping cache. Valid only when `has_wrapping_information`.
    pub break_candidates: Vec<BreakCandidate>,
    /// Renderers registered on this line, sorted by range, non-overlapping.
    pub run_renderers: Vec<TextRunRenderer>,
    /// Highlights registered on this line, sorted by registration order
    /// within equal z-order.
    pub line_highlights: Vec<TextLineHighlight>,
    /// Whether `break_candidates` reflects the current text and scale.
    pub has_wrapping_information: bool,
}

impl LineModel {
    /// Create a line model over a shared buffer with no runs yet.
    pub fn new(text: LineText) -> Self {
        Self {
            text,
            runs: Vec::new(),
            break_candidates: Vec::new(),
            run_renderers: Vec::new(),
            line_highlights: Vec::new(),
            has_wrapping_information: false,
        }
    }

    /// The total byte length of the line's text.
    pub fn text_len(&self) -> usize {
        self.text.borrow().len()
    }

    /// Drop the wrapping cache and every run's measurement cache. Called
    /// whenever the line's text, runs, or the layout scale change.
    pub fn clear_wrapping_information(&mut self) {
        tracing::debug!(
            candidates = self.break_candidates.len(),
            runs = self.runs.len(),
            "wrapping cache cleared"
        );
        self.break_candidates.clear();
        self.has_wrapping_information = false;
        for run in &mut self.runs {
            run.clear_cache();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::{FixedAdvanceMeasurer, MeasurerRc, TextRun, line_text};

    fn measurer() -> MeasurerRc {
        Rc::new(FixedAdvanceMeasurer {
            advance: 10.0,
            max_height: 16.0,
            descent: 4.0,
        })
    }

    #[test]
    fn cached_measurements_assemble_blocks() {
        let text = line_text("hello world");
        let run = TextRun::shared(text, TextRange::new(0, 11), measurer());
        let mut model = RunModel::new(run);

        assert_eq!(model.measure(0, 5, 1.0), Size::new(50.0, 16.0));
        assert_eq!(model.measure(5, 11, 1.0), Size::new(60.0, 16.0));

        // Covered exactly by the two cached spans.
        let block = model.create_block(
            &BlockDefinition {
                range: TextRange::new(0, 11),
                renderer: None,
            },
            1.0,
        );
        assert_eq!(block.size(), Size::new(110.0, 16.0));

        // Head of the range is uncovered and measured fresh.
        let block = model.create_block(
            &BlockDefinition {
                range: TextRange::new(2, 11),
                renderer: None,
            },
            1.0,
        );
        assert_eq!(block.size().width, 90.0);
    }

    #[test]
    fn uncovered_ranges_measure_directly() {
        let text = line_text("abcdef");
        let run = TextRun::shared(text, TextRange::new(0, 6), measurer());
        let model = RunModel::new(run);

        let block = model.create_block(
            &BlockDefinition {
                range: TextRange::new(1, 4),
                renderer: None,
            },
            1.0,
        );
        assert_eq!(block.size().width, 30.0);
    }

    #[test]
    fn clearing_wrapping_information_resets_caches() {
        let text = line_text("abc");
        let run = TextRun::shared(Rc::clone(&text), TextRange::new(0, 3), measurer());
        let mut line = LineModel::new(text);
        line.runs.push(RunModel::new(run));
        line.has_wrapping_information = true;
        line.runs[0].measure(0, 3, 1.0);

        line.clear_wrapping_information();
        assert!(!line.has_wrapping_information);
        assert!(line.break_candidates.is_empty());
        assert!(line.runs[0].measured_ranges.is_empty());
    }
}
