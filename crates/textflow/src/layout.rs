//! The layout engine itself.
//!
//! [`TextLayout`] owns a document of hard lines ([`LineModel`]s) and lazily
//! produces soft lines ([`LineView`]s) from them: a full pass wraps each
//! hard line against the wrapping width, positions blocks, applies
//! justification, and resolves highlights. Edits and property changes mark
//! the layout dirty rather than rebuilding it; the next
//! [`update_if_needed`](TextLayout::update_if_needed) call rebuilds only
//! what the dirty flags require.
//!
//! ```
//! use std::rc::Rc;
//! use textflow::{FixedAdvanceMeasurer, TextLayout};
//!
//! let mut layout = TextLayout::with_measurer(Rc::new(FixedAdvanceMeasurer::default()));
//! layout.add_plain_line("the quick brown fox");
//! layout.set_wrapping_width(80.0);
//! layout.update_if_needed();
//!
//! assert!(layout.line_views().len() > 1);
//! ```

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, trace, trace_span};

use crate::block::{BlockDefinition, LayoutBlock};
use crate::break_iter::{
    LineBreakIterator, UnicodeLineBreakIterator, UnicodeWordBreakIterator, WordBreakIterator,
};
use crate::error::{TextFlowError, TextFlowResult};
use crate::highlight::{LineViewHighlight, TextLineHighlight, TextRunRenderer};
use crate::line::{BreakCandidate, LineModel, RunModel};
use crate::range::{TextLocation, TextRange, TextSelection};
use crate::run::{LineText, MeasurerRc, RunRc, TextRun, line_text};
use crate::types::{Justification, Margin, Point, Size, TextHitPoint};

/// The separator used when flattening the document into a single string.
pub const LINE_TERMINATOR: &str = "\n";

/// Creates the run used where the engine must synthesize one itself, such
/// as filling the gap left when editing around a non-text run.
pub type DefaultRunFactory = Box<dyn Fn(LineText, TextRange) -> RunRc>;

#[derive(Debug, Default, Clone, Copy)]
struct DirtyFlags(u8);

impl DirtyFlags {
    const LAYOUT: u8 = 1 << 0;
    const HIGHLIGHTS: u8 = 1 << 1;

    fn mark_layout(&mut self) {
        self.0 |= Self::LAYOUT;
    }

    fn mark_highlights(&mut self) {
        self.0 |= Self::HIGHLIGHTS;
    }

    fn clear_layout(&mut self) {
        self.0 &= !Self::LAYOUT;
    }

    fn clear_highlights(&mut self) {
        self.0 &= !Self::HIGHLIGHTS;
    }

    fn layout(self) -> bool {
        self.0 & Self::LAYOUT != 0
    }

    fn highlights(self) -> bool {
        self.0 & Self::HIGHLIGHTS != 0
    }
}

/// The measured extent of the laid-out document, margins included.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct TextLayoutSize {
    /// Width of the longest soft line, trailing whitespace included.
    pub draw_width: f32,
    /// Width of the longest soft line as wrapped, with at most one piece
    /// of trailing whitespace counted.
    pub wrapped_width: f32,
    /// Total height of all soft lines.
    pub height: f32,
}

impl TextLayoutSize {
    /// The size used when drawing the layout.
    pub fn draw_size(&self) -> Size {
        Size::new(self.draw_width, self.height)
    }

    /// The size the layout occupies once wrapped.
    pub fn wrapped_size(&self) -> Size {
        Size::new(self.wrapped_width, self.height)
    }
}

/// One soft line produced by a layout pass: a positioned row of blocks
/// covering a sub-range of a single hard line.
pub struct LineView {
    /// The top-left corner of the line in layout space.
    pub offset: Point,
    /// The line's extent, with the line height percentage applied.
    pub size: Size,
    /// The line's natural extent, ignoring the line height percentage.
    pub text_size: Size,
    /// The range of the hard line's buffer this view covers.
    pub range: TextRange,
    /// The index of the hard line this view belongs to.
    pub model_index: usize,
    /// The positioned blocks making up the line, in visual order.
    pub blocks: Vec<LayoutBlock>,
    /// Resolved highlights painted behind the text.
    pub underlay_highlights: Vec<LineViewHighlight>,
    /// Resolved highlights painted in front of the text.
    pub overlay_highlights: Vec<LineViewHighlight>,
}

#[derive(Debug, Clone, Copy)]
struct OffsetEntry {
    flat_offset: usize,
    line_len: usize,
}

/// Maps between per-line [`TextLocation`]s and byte offsets into the
/// flattened document string produced by [`TextLayout::to_text`].
#[derive(Debug, Default, Clone)]
pub struct TextOffsetLocations {
    entries: Vec<OffsetEntry>,
}

impl TextOffsetLocations {
    /// Convert a location to an offset into the flattened string.
    pub fn location_to_offset(&self, location: TextLocation) -> Option<usize> {
        let entry = self.entries.get(location.line_index)?;
        Some(entry.flat_offset + location.offset)
    }

    /// Convert an offset into the flattened string back to a location.
    pub fn offset_to_location(&self, offset: usize) -> Option<TextLocation> {
        for (line_index, entry) in self.entries.iter().enumerate() {
            let flat_range = TextRange::new(entry.flat_offset, entry.flat_offset + entry.line_len);
            if flat_range.inclusive_contains(offset) {
                return Some(TextLocation::new(line_index, offset - entry.flat_offset));
            }
        }
        None
    }

    /// The total length of the flattened string.
    pub fn text_len(&self) -> usize {
        self.entries
            .last()
            .map_or(0, |entry| entry.flat_offset + entry.line_len)
    }
}

/// A lazily evaluated rich-text layout.
///
/// See the [module documentation](self) for an overview and example.
pub struct TextLayout {
    line_models: Vec<LineModel>,
    line_views: Vec<LineView>,
    dirty_flags: DirtyFlags,
    scale: f32,
    wrapping_width: f32,
    margin: Margin,
    justification: Justification,
    line_height_percentage: f32,
    layout_size: TextLayoutSize,
    view_size: Size,
    scroll_offset: Point,
    line_break_iterator: Box<dyn LineBreakIterator>,
    word_break_iterator: RefCell<Box<dyn WordBreakIterator>>,
    default_run_factory: DefaultRunFactory,
}

impl TextLayout {
    /// Create an empty layout. The factory provides the runs the engine
    /// synthesizes itself, for example when an edit lands on a line whose
    /// run does not support text.
    pub fn new(default_run_factory: impl Fn(LineText, TextRange) -> RunRc + 'static) -> Self {
        Self {
            line_models: Vec::new(),
            line_views: Vec::new(),
            dirty_flags: DirtyFlags::default(),
            scale: 1.0,
            wrapping_width: 0.0,
            margin: Margin::default(),
            justification: Justification::Left,
            line_height_percentage: 1.0,
            layout_size: TextLayoutSize::default(),
            view_size: Size::ZERO,
            scroll_offset: Point::ZERO,
            line_break_iterator: Box::new(UnicodeLineBreakIterator::new()),
            word_break_iterator: RefCell::new(Box::new(UnicodeWordBreakIterator::new())),
            default_run_factory: Box::new(default_run_factory),
        }
    }

    /// Create an empty layout whose default runs are plain [`TextRun`]s
    /// measured through `measurer`.
    pub fn with_measurer(measurer: MeasurerRc) -> Self {
        Self::new(move |text, range| TextRun::shared(text, range, Rc::clone(&measurer)))
    }

    /// Append a hard line. An empty `runs` list synthesizes a single
    /// default run spanning the whole buffer.
    ///
    /// When the layout is clean the new line is flowed immediately; when
    /// dirty it simply waits for the next full update.
    pub fn add_line(&mut self, text: LineText, runs: Vec<RunRc>) {
        let mut line_model = LineModel::new(text);
        if runs.is_empty() {
            let len = line_model.text_len();
            let run = (self.default_run_factory)(
                Rc::clone(&line_model.text),
                TextRange::new(0, len),
            );
            line_model.runs.push(RunModel::new(run));
        } else {
            for run in runs {
                line_model.runs.push(RunModel::new(run));
            }
        }
        self.line_models.push(line_model);

        if !self.dirty_flags.layout() {
            let line_model_index = self.line_models.len() - 1;

            if self.wrapping_width > 0.0 {
                let Self {
                    line_models,
                    line_break_iterator,
                    scale,
                    ..
                } = self;
                Self::create_line_wrapping_cache(
                    &mut line_models[line_model_index],
                    line_break_iterator.as_mut(),
                    *scale,
                );
            }

            Self::begin_line_layout(&self.line_models[line_model_index]);

            let wrapping_draw_width = self.wrapping_draw_width();
            let mut soft_line = Vec::new();
            self.flow_line_layout(line_model_index, wrapping_draw_width, &mut soft_line);

            // The new line view(s) may have widened the layout, so every
            // line needs its justification offset recomputed.
            self.justify_layout();

            Self::end_line_layout(&self.line_models[line_model_index]);
        }
    }

    /// Append a hard line of plain text using the default run factory.
    pub fn add_plain_line(&mut self, text: impl Into<String>) {
        self.add_line(line_text(text), Vec::new());
    }

    /// Remove every hard line.
    pub fn clear_lines(&mut self) {
        self.line_models.clear();
        self.dirty_flags.mark_layout();
    }

    /// Remove the hard line at `line_index`.
    pub fn remove_line(&mut self, line_index: usize) -> bool {
        if line_index >= self.line_models.len() {
            return false;
        }
        self.line_models.remove(line_index);
        self.dirty_flags.mark_layout();
        true
    }

    /// Whether the layout holds no text at all.
    pub fn is_empty(&self) -> bool {
        self.line_models.is_empty()
            || (self.line_models.len() == 1 && self.line_models[0].text_len() == 0)
    }

    /// Insert a single character at `location`.
    pub fn insert_char_at(&mut self, location: TextLocation, character: char) -> bool {
        let mut buffer = [0u8; 4];
        self.insert_at(location, character.encode_utf8(&mut buffer))
    }

    /// Insert `text` at `location`, growing the run under the insertion
    /// point. A non-text run under the point instead gets a sibling
    /// default run on the side the text lands on.
    pub fn insert_at(&mut self, location: TextLocation, text: &str) -> bool {
        let Self {
            line_models,
            default_run_factory,
            dirty_flags,
            ..
        } = self;

        let insert_location = location.offset;
        let Some(line_model) = line_models.get_mut(location.line_index) else {
            return false;
        };

        line_model
            .text
            .borrow_mut()
            .insert_str(insert_location, text);
        line_model.clear_wrapping_information();

        let text_len = text.len();
        let mut run_is_after_insert_location = false;
        let mut run_index = 0;
        while run_index < line_model.runs.len() {
            let run_range = line_model.runs[run_index].text_range();
            let is_last_run = run_index == line_model.runs.len() - 1;

            if run_range.contains(insert_location) || (is_last_run && !run_is_after_insert_location)
            {
                run_is_after_insert_location = true;

                let supports_text = line_model.runs[run_index]
                    .run()
                    .borrow()
                    .attributes()
                    .supports_text;
                if supports_text {
                    line_model.runs[run_index]
                        .set_text_range(TextRange::new(run_range.begin, run_range.end + text_len));
                } else if insert_location == run_range.begin {
                    // Landed on the left edge of the non-text run; the new
                    // text becomes a sibling run before it.
                    let new_run = default_run_factory(
                        Rc::clone(&line_model.text),
                        TextRange::new(run_range.begin, run_range.begin + text_len),
                    );
                    line_model.runs[run_index].set_text_range(
                        TextRange::new(run_range.begin + text_len, run_range.end + text_len),
                    );
                    line_model.runs.insert(run_index, RunModel::new(new_run));
                    run_index += 1;
                } else {
                    // Otherwise the new text becomes a sibling run after it.
                    let new_run = default_run_factory(
                        Rc::clone(&line_model.text),
                        TextRange::new(run_range.end, run_range.end + text_len),
                    );
                    run_index += 1;
                    line_model.runs.insert(run_index, RunModel::new(new_run));
                }
            } else if run_is_after_insert_location {
                line_model.runs[run_index].set_text_range(run_range.offset_by(text_len as isize));
            }

            run_index += 1;
        }

        dirty_flags.mark_layout();
        true
    }

    /// Insert a whole run at `location`, splitting the run under the
    /// insertion point around it. An empty side of the split is dropped
    /// unless `always_keep_right_run` forces the right side to stay.
    pub fn insert_run_at(
        &mut self,
        location: TextLocation,
        run: RunRc,
        always_keep_right_run: bool,
    ) -> bool {
        let Self {
            line_models,
            default_run_factory,
            dirty_flags,
            ..
        } = self;

        let insert_location = location.offset;
        let Some(line_model) = line_models.get_mut(location.line_index) else {
            return false;
        };

        let mut new_run_text = String::new();
        run.borrow().append_text_to(&mut new_run_text);

        line_model
            .text
            .borrow_mut()
            .insert_str(insert_location, &new_run_text);
        line_model.clear_wrapping_information();

        let text_len = new_run_text.len();
        let mut run_is_after_insert_location = false;
        let mut run_index = 0;
        while run_index < line_model.runs.len() {
            let existing = Rc::clone(line_model.runs[run_index].run());
            let run_range = existing.borrow().text_range();
            let is_last_run = run_index == line_model.runs.len() - 1;

            if run_range.contains(insert_location) || (is_last_run && !run_is_after_insert_location)
            {
                run_is_after_insert_location = true;

                let insert_location_end = insert_location + text_len;
                let supports_text = existing.borrow().attributes().supports_text;

                let left_run: RunRc;
                let right_run: RunRc;
                if supports_text {
                    left_run = existing.borrow().clone_run();
                    left_run
                        .borrow_mut()
                        .set_text_range(TextRange::new(run_range.begin, insert_location));

                    right_run = Rc::clone(&existing);
                    right_run.borrow_mut().set_text_range(TextRange::new(
                        insert_location_end,
                        run_range.end + text_len,
                    ));
                } else if insert_location == run_range.begin {
                    left_run = default_run_factory(
                        Rc::clone(&line_model.text),
                        TextRange::new(run_range.begin, insert_location),
                    );

                    right_run = Rc::clone(&existing);
                    right_run.borrow_mut().set_text_range(TextRange::new(
                        insert_location_end,
                        run_range.end + text_len,
                    ));
                } else {
                    left_run = Rc::clone(&existing);

                    right_run = default_run_factory(
                        Rc::clone(&line_model.text),
                        TextRange::new(insert_location_end, run_range.end + text_len),
                    );
                }

                run.borrow_mut().move_to(
                    Rc::clone(&line_model.text),
                    TextRange::new(insert_location, insert_location_end),
                );

                // The split replaces the original run; empty halves vanish.
                line_model.runs.remove(run_index);

                let left_has_text = !left_run.borrow().text_range().is_empty();
                let right_has_text = !right_run.borrow().text_range().is_empty();
                if left_has_text {
                    line_model.runs.insert(run_index, RunModel::new(left_run));
                    run_index += 1;
                }
                line_model
                    .runs
                    .insert(run_index, RunModel::new(Rc::clone(&run)));
                if right_has_text || always_keep_right_run {
                    run_index += 1;
                    line_model.runs.insert(run_index, RunModel::new(right_run));
                }
            } else if run_is_after_insert_location {
                existing
                    .borrow_mut()
                    .set_text_range(run_range.offset_by(text_len as isize));
            }

            run_index += 1;
        }

        dirty_flags.mark_layout();
        true
    }

    /// Remove up to `count` bytes starting at `location`, clipped to the
    /// end of the line. Runs shrink, shift, or disappear to match; a line
    /// losing its last run gets a zero-length default run so every line
    /// always has at least one.
    pub fn remove_at(&mut self, location: TextLocation, count: usize) -> bool {
        let Self {
            line_models,
            default_run_factory,
            dirty_flags,
            ..
        } = self;

        let remove_location = location.offset;
        let Some(line_model) = line_models.get_mut(location.line_index) else {
            return false;
        };

        let text_len = line_model.text_len();
        let count = count.min(text_len.saturating_sub(remove_location));
        if count == 0 {
            return false;
        }

        line_model
            .text
            .borrow_mut()
            .replace_range(remove_location..remove_location + count, "");
        line_model.clear_wrapping_information();

        let remove_range = TextRange::new(remove_location, remove_location + count);
        for run_index in (0..line_model.runs.len()).rev() {
            let run_range = line_model.runs[run_index].text_range();
            let intersected = run_range.intersect(remove_range);

            if intersected.is_empty() && run_range.begin >= remove_range.end {
                // Entirely right of the removal, shift left.
                line_model.runs[run_index].set_text_range(run_range.offset_by(-(count as isize)));
            } else if !intersected.is_empty() {
                if run_range.len() == intersected.len() {
                    // The run's whole text was removed.
                    line_model.runs.remove(run_index);
                    if line_model.runs.is_empty() {
                        let new_run = default_run_factory(
                            Rc::clone(&line_model.text),
                            TextRange::new(0, 0),
                        );
                        line_model.runs.push(RunModel::new(new_run));
                    }
                } else if run_range.begin > remove_range.begin {
                    // Right-hand part of the removal; the run now starts at
                    // the removal point.
                    line_model.runs[run_index]
                        .set_text_range(TextRange::new(remove_range.begin, run_range.end - count));
                } else {
                    // Left-hand part of the removal; the run loses its tail.
                    line_model.runs[run_index].set_text_range(TextRange::new(
                        run_range.begin,
                        run_range.end - intersected.len(),
                    ));
                }

                if run_range.begin <= remove_range.begin {
                    // Runs left of the removal point are untouched.
                    break;
                }
            } else if run_range.is_empty()
                && remove_range.contains(run_range.begin)
                && remove_range.contains(run_range.end)
            {
                // An empty run stranded inside the removed span.
                line_model.runs.remove(run_index);
            }
        }

        dirty_flags.mark_layout();
        true
    }

    /// Split the hard line at `location` into two hard lines. The run
    /// straddling the split is divided between them.
    pub fn split_line_at(&mut self, location: TextLocation) -> bool {
        let Self {
            line_models,
            default_run_factory,
            dirty_flags,
            ..
        } = self;

        let break_location = location.offset;
        if location.line_index >= line_models.len() {
            return false;
        }

        let line_model = &mut line_models[location.line_index];
        let (left_text, right_text) = {
            let text = line_model.text.borrow();
            if break_location > text.len() || !text.is_char_boundary(break_location) {
                return false;
            }
            (
                line_text(&text[..break_location]),
                line_text(&text[break_location..]),
            )
        };
        let left_len = break_location;

        let mut left_line = LineModel::new(Rc::clone(&left_text));
        let mut right_line = LineModel::new(Rc::clone(&right_text));

        let old_runs = std::mem::take(&mut line_model.runs);
        let run_count = old_runs.len();
        let mut run_is_left_of_break = true;
        for (run_index, run_model) in old_runs.into_iter().enumerate() {
            let run = Rc::clone(run_model.run());
            let run_range = run.borrow().text_range();
            let is_last_run = run_index == run_count - 1;

            if run_range.contains(break_location) || (is_last_run && run_is_left_of_break) {
                run_is_left_of_break = false;

                let supports_text = run.borrow().attributes().supports_text;
                let left_run: RunRc;
                let right_run: RunRc;
                if supports_text {
                    left_run = run.borrow().clone_run();
                    left_run.borrow_mut().move_to(
                        Rc::clone(&left_text),
                        TextRange::new(run_range.begin, left_len),
                    );

                    right_run = Rc::clone(&run);
                    right_run.borrow_mut().move_to(
                        Rc::clone(&right_text),
                        TextRange::new(0, run_range.end - left_len),
                    );
                } else if break_location == run_range.begin {
                    left_run = default_run_factory(
                        Rc::clone(&left_text),
                        TextRange::new(run_range.begin, left_len),
                    );

                    right_run = Rc::clone(&run);
                    right_run.borrow_mut().move_to(
                        Rc::clone(&right_text),
                        TextRange::new(0, run_range.end - left_len),
                    );
                } else {
                    left_run = Rc::clone(&run);
                    left_run.borrow_mut().move_to(
                        Rc::clone(&left_text),
                        TextRange::new(run_range.begin, left_len),
                    );

                    right_run = default_run_factory(
                        Rc::clone(&right_text),
                        TextRange::new(0, run_range.end - left_len),
                    );
                }

                // Both halves are kept even when one is empty, so each new
                // line has at least one run.
                left_line.runs.push(RunModel::new(left_run));
                right_line.runs.push(RunModel::new(right_run));
            } else if run_is_left_of_break {
                run.borrow_mut().move_to(Rc::clone(&left_text), run_range);
                left_line.runs.push(RunModel::new(run));
            } else {
                let new_range = run_range.offset_by(-(left_len as isize));
                run.borrow_mut().move_to(Rc::clone(&right_text), new_range);
                right_line.runs.push(RunModel::new(run));
            }
        }

        line_models.splice(
            location.line_index..=location.line_index,
            [left_line, right_line],
        );

        dirty_flags.mark_layout();
        true
    }

    /// Join the hard line at `line_index` with the one after it. An empty
    /// next line is simply removed.
    pub fn join_line_with_next_line(&mut self, line_index: usize) -> bool {
        if line_index + 1 >= self.line_models.len() {
            return false;
        }

        if self.line_models[line_index + 1].text_len() == 0 {
            return self.remove_line(line_index + 1);
        }

        let next_line = self.line_models.remove(line_index + 1);
        let line_model = &mut self.line_models[line_index];

        let line_length = line_model.text_len();
        line_model
            .text
            .borrow_mut()
            .push_str(&next_line.text.borrow());
        line_model.clear_wrapping_information();

        for run_model in next_line.runs {
            let run = Rc::clone(run_model.run());
            let range = run.borrow().text_range();
            if !range.is_empty() {
                let new_range = range.offset_by(line_length as isize);
                run.borrow_mut().move_to(Rc::clone(&line_model.text), new_range);
                line_model.runs.push(RunModel::new(run));
            }
        }

        self.dirty_flags.mark_layout();
        true
    }

    /// Rebuild whatever the dirty flags say is stale.
    pub fn update_if_needed(&mut self) {
        let changed_layout = self.dirty_flags.layout();
        let changed_highlights = self.dirty_flags.highlights();

        if changed_layout {
            self.update_layout();
        }

        // A rebuilt layout always invalidates the resolved highlights.
        if changed_layout || changed_highlights {
            self.update_highlights();
        }
    }

    /// Rebuild the line views from scratch.
    pub fn update_layout(&mut self) {
        trace!(lines = self.line_models.len(), "rebuilding layout");

        self.clear_view();
        self.begin_layout();

        self.flow_layout();
        self.justify_layout();

        self.end_layout();

        self.dirty_flags.clear_layout();
    }

    /// Re-resolve highlights against the current line views.
    pub fn update_highlights(&mut self) {
        self.flow_highlights();
        self.dirty_flags.clear_highlights();
    }

    /// Mark the whole layout as needing a rebuild, invalidating every
    /// line's wrapping cache.
    pub fn dirty_layout(&mut self) {
        debug!(lines = self.line_models.len(), "wrapping caches invalidated");
        self.dirty_flags.mark_layout();
        for line_model in &mut self.line_models {
            line_model.has_wrapping_information = false;
        }
    }

    /// Mark the layout as needing a rebuild because `run`'s content
    /// changed, dropping only that run's cached measurements.
    pub fn dirty_run_layout(&mut self, run: &RunRc) {
        for line_model in &mut self.line_models {
            if !line_model.has_wrapping_information {
                continue;
            }
            for run_model in &mut line_model.runs {
                if Rc::ptr_eq(run_model.run(), run) {
                    run_model.clear_cache();
                    break;
                }
            }
        }
        self.dirty_flags.mark_layout();
    }

    /// Whether the next update will rebuild the line views.
    pub fn is_layout_dirty(&self) -> bool {
        self.dirty_flags.layout()
    }

    /// Replace all registered run renderers.
    pub fn set_run_renderers(
        &mut self,
        renderers: Vec<TextRunRenderer>,
    ) -> TextFlowResult<()> {
        self.clear_run_renderers();
        for renderer in renderers {
            self.add_run_renderer(renderer)?;
        }
        Ok(())
    }

    /// Register a run renderer. Renderers on a line are kept sorted by
    /// range and must not overlap.
    pub fn add_run_renderer(&mut self, renderer: TextRunRenderer) -> TextFlowResult<()> {
        let count = self.line_models.len();
        let line_model = self.line_models.get_mut(renderer.line_index).ok_or(
            TextFlowError::InvalidLineIndex {
                index: renderer.line_index,
                count,
            },
        )?;

        let insert_index = line_model
            .run_renderers
            .partition_point(|existing| existing.range.begin <= renderer.range.begin);

        if insert_index > 0 {
            let previous = &line_model.run_renderers[insert_index - 1];
            if previous.range.end > renderer.range.begin {
                return Err(TextFlowError::OverlappingRenderer {
                    new: renderer.range,
                    existing: previous.range,
                });
            }
        }
        if let Some(next) = line_model.run_renderers.get(insert_index) {
            if renderer.range.end > next.range.begin {
                return Err(TextFlowError::OverlappingRenderer {
                    new: renderer.range,
                    existing: next.range,
                });
            }
        }

        line_model.run_renderers.insert(insert_index, renderer);
        self.dirty_flags.mark_layout();
        Ok(())
    }

    /// Remove every registered run renderer.
    pub fn clear_run_renderers(&mut self) {
        for line_model in &mut self.line_models {
            if !line_model.run_renderers.is_empty() {
                line_model.run_renderers.clear();
                self.dirty_flags.mark_layout();
            }
        }
    }

    /// Replace all registered line highlights.
    pub fn set_line_highlights(
        &mut self,
        highlights: Vec<TextLineHighlight>,
    ) -> TextFlowResult<()> {
        self.clear_line_highlights();
        for highlight in highlights {
            self.add_line_highlight(highlight)?;
        }
        Ok(())
    }

    /// Register a line highlight. Highlights on a line are kept sorted by
    /// z-order, preserving registration order among equals.
    pub fn add_line_highlight(&mut self, highlight: TextLineHighlight) -> TextFlowResult<()> {
        if highlight.z_order == 0 {
            return Err(TextFlowError::ZeroHighlightZOrder);
        }

        let count = self.line_models.len();
        let line_model = self.line_models.get_mut(highlight.line_index).ok_or(
            TextFlowError::InvalidLineIndex {
                index: highlight.line_index,
                count,
            },
        )?;

        let insert_index = line_model
            .line_highlights
            .partition_point(|existing| existing.z_order <= highlight.z_order);
        line_model.line_highlights.insert(insert_index, highlight);

        self.dirty_flags.mark_highlights();
        Ok(())
    }

    /// Remove every registered line highlight.
    pub fn clear_line_highlights(&mut self) {
        for line_model in &mut self.line_models {
            if !line_model.line_highlights.is_empty() {
                line_model.line_highlights.clear();
                self.dirty_flags.mark_highlights();
            }
        }
    }

    /// Replace the line break iterator used to find wrap points. Affects
    /// every line, so the whole wrapping cache is invalidated.
    pub fn set_line_break_iterator(&mut self, iterator: Box<dyn LineBreakIterator>) {
        self.line_break_iterator = iterator;
        self.dirty_layout();
    }

    /// Replace the word break iterator used by [`word_at`](Self::word_at).
    pub fn set_word_break_iterator(&mut self, iterator: Box<dyn WordBreakIterator>) {
        self.word_break_iterator = RefCell::new(iterator);
    }

    /// Update the visible region. A view size change only dirties the
    /// layout when justification depends on it; a scroll change simply
    /// translates the existing blocks.
    pub fn set_visible_region(&mut self, view_size: Size, scroll_offset: Point) {
        if self.view_size != view_size {
            self.view_size = view_size;

            if self.justification != Justification::Left {
                self.dirty_flags.mark_layout();
            }
        }

        if self.scroll_offset != scroll_offset {
            let previous_scroll_offset = self.scroll_offset;
            self.scroll_offset = scroll_offset;

            // Positive scrolling moves content negatively in layout space.
            let adjustment = Point::new(
                -(scroll_offset.x - previous_scroll_offset.x),
                -(scroll_offset.y - previous_scroll_offset.y),
            );

            for line_view in &mut self.line_views {
                line_view.offset.x += adjustment.x;
                line_view.offset.y += adjustment.y;

                for block in &mut line_view.blocks {
                    let location = block.location_offset();
                    block.set_location_offset(Point::new(
                        location.x + adjustment.x,
                        location.y + adjustment.y,
                    ));
                }
            }
        }
    }

    /// The margin surrounding the text.
    pub fn margin(&self) -> Margin {
        self.margin
    }

    /// Change the margin. When not wrapping, existing blocks are shifted
    /// in place instead of dirtying the layout.
    pub fn set_margin(&mut self, margin: Margin) {
        if self.margin == margin {
            return;
        }

        let previous_margin = self.margin;
        self.margin = margin;

        if self.wrapping_width > 0.0 {
            // The wrapping width includes the margin, so the view has to
            // be rebuilt.
            self.dirty_flags.mark_layout();
        } else {
            let adjustment = Point::new(
                margin.left - previous_margin.left,
                margin.top - previous_margin.top,
            );
            for line_view in &mut self.line_views {
                for block in &mut line_view.blocks {
                    let location = block.location_offset();
                    block.set_location_offset(Point::new(
                        location.x + adjustment.x,
                        location.y + adjustment.y,
                    ));
                }
            }

            let margin_delta_width =
                (margin.horizontal() - previous_margin.horizontal()) * self.scale;
            let margin_delta_height =
                (margin.vertical() - previous_margin.vertical()) * self.scale;
            self.layout_size.draw_width += margin_delta_width;
            self.layout_size.wrapped_width += margin_delta_width;
            self.layout_size.height += margin_delta_height;
        }
    }

    /// The layout scale.
    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Change the layout scale. Invalidates every line's wrapping cache.
    pub fn set_scale(&mut self, scale: f32) {
        if self.scale == scale {
            return;
        }

        self.scale = scale;
        self.dirty_layout();
    }

    /// The horizontal justification.
    pub fn justification(&self) -> Justification {
        self.justification
    }

    /// Change the horizontal justification.
    pub fn set_justification(&mut self, justification: Justification) {
        if self.justification == justification {
            return;
        }

        self.justification = justification;
        self.dirty_flags.mark_layout();
    }

    /// The line height multiplier.
    pub fn line_height_percentage(&self) -> f32 {
        self.line_height_percentage
    }

    /// Change the line height multiplier.
    pub fn set_line_height_percentage(&mut self, value: f32) {
        if self.line_height_percentage != value {
            self.line_height_percentage = value;
            self.dirty_flags.mark_layout();
        }
    }

    /// The wrapping width; zero or less disables wrapping.
    pub fn wrapping_width(&self) -> f32 {
        self.wrapping_width
    }

    /// Change the wrapping width.
    pub fn set_wrapping_width(&mut self, value: f32) {
        if self.wrapping_width != value {
            self.wrapping_width = value;
            self.dirty_flags.mark_layout();
        }
    }

    /// The size used when drawing, in scaled units.
    pub fn draw_size(&self) -> Size {
        self.layout_size.draw_size()
    }

    /// The wrapped size, in unscaled units.
    pub fn wrapped_size(&self) -> Size {
        let inverse_scale = 1.0 / self.scale;
        let wrapped = self.layout_size.wrapped_size();
        Size::new(wrapped.width * inverse_scale, wrapped.height * inverse_scale)
    }

    /// The draw size, in unscaled units.
    pub fn size(&self) -> Size {
        let inverse_scale = 1.0 / self.scale;
        let draw = self.layout_size.draw_size();
        Size::new(draw.width * inverse_scale, draw.height * inverse_scale)
    }

    /// The hard lines of the document.
    pub fn line_models(&self) -> &[LineModel] {
        &self.line_models
    }

    /// The soft lines produced by the last update.
    pub fn line_views(&self) -> &[LineView] {
        &self.line_views
    }

    /// Map a point in layout space to the closest text location, along
    /// with where the point landed relative to the text.
    pub fn text_location_at(&self, relative: Point) -> (TextLocation, TextHitPoint) {
        if self.line_views.is_empty() {
            return (TextLocation::new(0, 0), TextHitPoint::WithinText);
        }

        // Find the first line view starting below the point, then step
        // back to the one containing it.
        let mut view_index = self.line_views.len();
        for (index, line_view) in self.line_views.iter().enumerate() {
            if line_view.offset.y > relative.y {
                view_index = index.saturating_sub(1);
                break;
            }
        }

        if view_index >= self.line_views.len() {
            // The point is below every line, use the last one.
            let line_view = &self.line_views[self.line_views.len() - 1];
            return self.text_location_at_line_view(line_view, relative);
        }

        let line_view = &self.line_views[view_index];
        if line_view.offset.y + line_view.size.height < relative.y
            && view_index < self.line_views.len() - 1
        {
            view_index += 1;
        }

        let line_view = &self.line_views[view_index];
        self.text_location_at_line_view(line_view, Point::new(relative.x, line_view.offset.y))
    }

    fn text_location_at_line_view(
        &self,
        line_view: &LineView,
        relative: Point,
    ) -> (TextLocation, TextHitPoint) {
        for block in &line_view.blocks {
            let hit = block.run().borrow().text_index_at(
                block,
                Point::new(relative.x, block.location_offset().y),
                self.scale,
            );
            if let Some((text_index, hit_point)) = hit {
                return (
                    TextLocation::new(line_view.model_index, text_index),
                    hit_point,
                );
            }
        }

        let line_text_len = self.line_models[line_view.model_index].text_len();
        if line_text_len == 0 || line_view.blocks.is_empty() {
            return (
                TextLocation::new(line_view.model_index, 0),
                TextHitPoint::WithinText,
            );
        }
        if relative.x < line_view.blocks[0].location_offset().x {
            return (
                TextLocation::new(line_view.model_index, line_view.range.begin),
                TextHitPoint::LeftGutter,
            );
        }
        (
            TextLocation::new(line_view.model_index, line_view.range.end),
            TextHitPoint::RightGutter,
        )
    }

    fn line_view_index_for_location(
        &self,
        location: TextLocation,
        inclusive_bounds_check: bool,
    ) -> Option<usize> {
        let line_model = self.line_models.get(location.line_index)?;
        let line_is_empty = line_model.text_len() == 0;

        for (index, line_view) in self.line_views.iter().enumerate() {
            if line_view.model_index != location.line_index {
                continue;
            }

            if location.offset == 0 || line_is_empty || line_view.range.contains(location.offset) {
                return Some(index);
            }

            // The end offset belongs to the last view of the hard line,
            // unless the caller asked for inclusive bounds on all of them.
            let is_last_view_for_model = index == self.line_views.len() - 1
                || self.line_views[index + 1].model_index != location.line_index;
            if (is_last_view_for_model || inclusive_bounds_check)
                && line_view.range.end == location.offset
            {
                return Some(index);
            }
        }

        None
    }

    /// Map a text location to its point in layout space, or the origin
    /// when the location cannot be resolved.
    pub fn location_at(&self, location: TextLocation, inclusive_bounds_check: bool) -> Point {
        let Some(view_index) = self.line_view_index_for_location(location, inclusive_bounds_check)
        else {
            return Point::ZERO;
        };

        let line_view = &self.line_views[view_index];
        for block in &line_view.blocks {
            let block_range = block.text_range();
            if block_range.inclusive_contains(location.offset) {
                let point = block.run().borrow().location_at(
                    block,
                    location.offset - block_range.begin,
                    self.scale,
                );
                if let Some(point) = point {
                    return point;
                }
            }
        }

        Point::ZERO
    }

    /// The word surrounding `location`, or `None` when the location sits
    /// in whitespace with no word before it.
    pub fn word_at(&self, location: TextLocation) -> Option<TextSelection> {
        let line_model = self.line_models.get(location.line_index)?;

        let mut word_break_iterator = self.word_break_iterator.borrow_mut();
        let text = line_model.text.borrow();
        word_break_iterator.set_text(&text);

        let Some(mut previous_break) = word_break_iterator.move_to_candidate_after(location.offset)
        else {
            word_break_iterator.clear_text();
            return None;
        };

        // Walk backwards over whitespace-only spans until a word is found.
        let mut selection = None;
        while let Some(current_break) = word_break_iterator.move_to_previous() {
            let has_letter = text[current_break..previous_break]
                .chars()
                .any(|ch| !ch.is_whitespace());
            if has_letter {
                if current_break != previous_break {
                    selection = Some(TextSelection::new(
                        TextLocation::new(location.line_index, current_break),
                        TextLocation::new(location.line_index, previous_break),
                    ));
                }
                break;
            }
            previous_break = current_break;
        }

        word_break_iterator.clear_text();
        selection
    }

    /// Flatten the document into a single string, joining hard lines with
    /// [`LINE_TERMINATOR`].
    pub fn to_text(&self) -> String {
        let mut display = String::new();
        self.text_and_offsets(Some(&mut display), None);
        display
    }

    /// The offset table mapping locations into the flattened string.
    pub fn text_offset_locations(&self) -> TextOffsetLocations {
        let mut offsets = TextOffsetLocations::default();
        self.text_and_offsets(None, Some(&mut offsets));
        offsets
    }

    fn text_and_offsets(
        &self,
        mut display: Option<&mut String>,
        mut offsets: Option<&mut TextOffsetLocations>,
    ) {
        let mut display_len = 0usize;

        if let Some(offsets) = offsets.as_mut() {
            offsets.entries.reserve(self.line_models.len());
        }

        for (line_model_index, line_model) in self.line_models.iter().enumerate() {
            if line_model_index > 0 {
                if let Some(display) = display.as_mut() {
                    display.push_str(LINE_TERMINATOR);
                }
                display_len += LINE_TERMINATOR.len();
            }

            let mut line_len = 0;
            for run in &line_model.runs {
                if let Some(display) = display.as_mut() {
                    run.append_text_to(display);
                }
                line_len += run.text_range().len();
            }

            if let Some(offsets) = offsets.as_mut() {
                offsets.entries.push(OffsetEntry {
                    flat_offset: display_len,
                    line_len,
                });
            }
            display_len += line_len;
        }
    }

    /// The text covered by `selection`, joining hard lines with
    /// [`LINE_TERMINATOR`].
    pub fn selection_as_text(&self, selection: &TextSelection) -> String {
        let mut display = String::new();

        let begin = selection.beginning();
        let end = selection.ending();
        if begin.line_index >= self.line_models.len() || end.line_index >= self.line_models.len() {
            return display;
        }

        if begin.line_index == end.line_index {
            Self::append_line_range(
                &mut display,
                &self.line_models[begin.line_index],
                TextRange::new(begin.offset, end.offset),
            );
        } else {
            for line_index in begin.line_index..=end.line_index {
                let line_model = &self.line_models[line_index];
                let range = if line_index == begin.line_index {
                    TextRange::new(begin.offset, line_model.text_len())
                } else if line_index == end.line_index {
                    TextRange::new(0, end.offset)
                } else {
                    TextRange::new(0, line_model.text_len())
                };

                Self::append_line_range(&mut display, line_model, range);

                if line_index != end.line_index {
                    display.push_str(LINE_TERMINATOR);
                }
            }
        }

        display
    }

    fn append_line_range(display: &mut String, line_model: &LineModel, range: TextRange) {
        for run in &line_model.runs {
            let run_range = run.text_range();
            let intersected = run_range.intersect(range);

            if !intersected.is_empty() {
                run.append_range_to(display, intersected);
            } else if run_range.begin > range.end {
                break;
            }
        }
    }

    fn wrapping_draw_width(&self) -> f32 {
        debug_assert!(self.wrapping_width >= 0.0);
        0.01f32.max((self.wrapping_width - self.margin.horizontal()) * self.scale)
    }

    fn clear_view(&mut self) {
        self.layout_size = TextLayoutSize::default();
        self.line_views.clear();
    }

    fn begin_layout(&self) {
        for line_model in &self.line_models {
            Self::begin_line_layout(line_model);
        }
    }

    fn end_layout(&self) {
        for line_model in &self.line_models {
            Self::end_line_layout(line_model);
        }
    }

    fn begin_line_layout(line_model: &LineModel) {
        for run in &line_model.runs {
            run.begin_layout();
        }
    }

    fn end_line_layout(line_model: &LineModel) {
        for run in &line_model.runs {
            run.end_layout();
        }
    }

    fn create_wrapping_cache(&mut self) {
        if self.wrapping_width <= 0.0 {
            return;
        }

        let Self {
            line_models,
            line_break_iterator,
            scale,
            ..
        } = self;
        for line_model in line_models.iter_mut() {
            Self::create_line_wrapping_cache(line_model, line_break_iterator.as_mut(), *scale);
        }
    }

    fn create_line_wrapping_cache(
        line_model: &mut LineModel,
        line_break_iterator: &mut dyn LineBreakIterator,
        scale: f32,
    ) {
        if line_model.has_wrapping_information {
            return;
        }

        line_model.break_candidates.clear();
        line_model.has_wrapping_information = true;

        for run in &mut line_model.runs {
            run.clear_cache();
        }

        {
            let text = line_model.text.borrow();
            line_break_iterator.set_text(&text);
        }

        let mut previous_break = 0;
        let mut current_run_index = 0;
        while let Some(current_break) = line_break_iterator.move_to_next() {
            let candidate = Self::create_break_candidate(
                line_model,
                &mut current_run_index,
                previous_break,
                current_break,
                scale,
            );
            line_model.break_candidates.push(candidate);
            previous_break = current_break;
        }

        line_break_iterator.clear_text();
    }

    fn create_break_candidate(
        line_model: &mut LineModel,
        out_run_index: &mut usize,
        previous_break: usize,
        current_break: usize,
        scale: f32,
    ) -> BreakCandidate {
        let mut measured_to_break = false;
        let mut max_above_baseline = 0.0f32;
        let mut max_below_baseline = 0.0f32;
        let mut actual_width = 0.0f32;
        let mut trimmed_width = 0.0f32;
        let mut first_trailing_whitespace_char_width = 0.0f32;
        let mut whitespace_stop_index = current_break;

        // The kerning at the candidate's first character, against the
        // character before it.
        let mut kerning = 0.0f32;
        if let Some(run) = line_model.runs.get(*out_run_index) {
            let begin_index = previous_break.max(run.text_range().begin);
            if begin_index > 0 {
                kerning = run.kerning_at(begin_index, scale);
            }
        }

        // Runs matter when measuring: each may carry different metrics, so
        // the candidate is measured one run slice at a time.
        while *out_run_index < line_model.runs.len() {
            let range = line_model.runs[*out_run_index].text_range();

            let stop_index = range.end.min(current_break);
            let begin_index = previous_break.max(range.begin);
            whitespace_stop_index = stop_index;

            {
                let text = line_model.text.borrow();
                while whitespace_stop_index > begin_index {
                    let Some(ch) = text[begin_index..whitespace_stop_index].chars().next_back()
                    else {
                        break;
                    };
                    if !ch.is_whitespace() {
                        break;
                    }
                    whitespace_stop_index -= ch.len_utf8();
                }
            }

            let run = &mut line_model.runs[*out_run_index];
            let slice_width;
            let slice_trimmed_width;
            if begin_index == stop_index {
                // Empty slice.
                slice_width = 0.0;
                slice_trimmed_width = 0.0;
            } else if begin_index == whitespace_stop_index {
                // Whitespace only.
                slice_width = run.measure(begin_index, stop_index, scale).width;
                slice_trimmed_width = 0.0;
            } else if whitespace_stop_index != stop_index {
                // Text followed by trailing whitespace.
                let text_width = run.measure(begin_index, whitespace_stop_index, scale).width;
                let whitespace_width = run.measure(whitespace_stop_index, stop_index, scale).width;
                slice_trimmed_width = text_width;
                slice_width = text_width + whitespace_width;

                let first_whitespace_char_len = {
                    let text = line_model.text.borrow();
                    text[whitespace_stop_index..]
                        .chars()
                        .next()
                        .map_or(0, char::len_utf8)
                };
                if whitespace_stop_index + first_whitespace_char_len == stop_index {
                    first_trailing_whitespace_char_width = whitespace_width;
                } else {
                    // Measured uncached; an out-of-order cache entry would
                    // break the cache's ordering guarantee.
                    first_trailing_whitespace_char_width = line_model.runs[*out_run_index]
                        .measure_uncached(
                            whitespace_stop_index,
                            whitespace_stop_index + first_whitespace_char_len,
                            scale,
                        )
                        .width;
                }
            } else {
                // No trailing whitespace, one measurement covers both.
                let measured = run.measure(begin_index, stop_index, scale).width;
                slice_width = measured;
                slice_trimmed_width = measured;
            }

            actual_width += slice_width;
            trimmed_width += slice_trimmed_width;

            let run = &line_model.runs[*out_run_index];
            let below_baseline = -run.baseline(scale);
            max_above_baseline = max_above_baseline.max(run.max_height(scale) - below_baseline);
            max_below_baseline = max_below_baseline.max(below_baseline);

            if stop_index == current_break {
                measured_to_break = true;
                if stop_index == range.end {
                    *out_run_index += 1;
                }
                break;
            }

            *out_run_index += 1;
        }
        debug_assert!(measured_to_break);

        let height = max_above_baseline + max_below_baseline;
        BreakCandidate {
            actual_size: Size::new(actual_width, height),
            trimmed_size: Size::new(trimmed_width, height),
            actual_range: TextRange::new(previous_break, current_break),
            trimmed_range: TextRange::new(previous_break, whitespace_stop_index),
            first_trailing_whitespace_char_width,
            max_above_baseline,
            max_below_baseline,
            kerning,
        }
    }

    fn flow_layout(&mut self) {
        let _span = trace_span!(
            "flow_layout",
            lines = self.line_models.len(),
            wrapping = self.wrapping_width > 0.0
        )
        .entered();

        let wrapping_draw_width = self.wrapping_draw_width();

        self.create_wrapping_cache();

        let mut soft_line = Vec::new();
        for line_model_index in 0..self.line_models.len() {
            self.flow_line_layout(line_model_index, wrapping_draw_width, &mut soft_line);
        }

        let margin_width = self.margin.horizontal() * self.scale;
        let margin_height = self.margin.vertical() * self.scale;
        self.layout_size.draw_width += margin_width;
        self.layout_size.wrapped_width += margin_width;
        self.layout_size.height += margin_height;
    }

    fn flow_line_layout(
        &mut self,
        line_model_index: usize,
        wrapping_draw_width: f32,
        soft_line: &mut Vec<LayoutBlock>,
    ) {
        let mut current_width = 0.0f32;
        let mut current_run_index = 0usize;
        let mut previous_block_end = 0usize;
        let mut current_renderer_index =
            if self.line_models[line_model_index].run_renderers.is_empty() {
                None
            } else {
                Some(0)
            };

        let is_wrapping = self.wrapping_width > 0.0;
        let candidates = self.line_models[line_model_index].break_candidates.clone();

        if !is_wrapping || candidates.is_empty() {
            // Everything flows onto one soft line.
            self.create_line_view_blocks(
                line_model_index,
                None,
                0.0,
                &mut current_run_index,
                &mut current_renderer_index,
                &mut previous_block_end,
                soft_line,
            );
            debug_assert_eq!(
                current_run_index,
                self.line_models[line_model_index].runs.len()
            );
            soft_line.clear();
            return;
        }

        let mut break_index = 0;
        while break_index < candidates.len() {
            let candidate = candidates[break_index];

            let is_last_break = break_index + 1 == candidates.len();
            let is_first_break_on_soft_line = current_width == 0.0;
            let kerning = if is_first_break_on_soft_line {
                candidate.kerning
            } else {
                0.0
            };
            let break_does_fit =
                current_width + candidate.actual_size.width + kerning <= wrapping_draw_width;

            if !break_does_fit || is_last_break {
                let trimmed_break_fits =
                    current_width + candidate.trimmed_size.width + kerning <= wrapping_draw_width;
                let is_first_break = break_index == 0;

                // When even the trimmed candidate overflows, back up one
                // candidate and wrap before it instead; the overflowing
                // candidate is then reconsidered on a fresh soft line.
                let final_break_on_soft_line =
                    if !is_first_break && !is_first_break_on_soft_line && !trimmed_break_fits {
                        break_index -= 1;
                        candidates[break_index]
                    } else {
                        candidate
                    };

                // The wrapped width includes the first piece of trailing
                // whitespace when there is any; otherwise an unbreakable
                // overflow is clamped to the wrapping width.
                let mut wrapped_line_width = current_width;
                if trimmed_break_fits && !is_last_break {
                    wrapped_line_width += final_break_on_soft_line.trimmed_size.width
                        + final_break_on_soft_line.first_trailing_whitespace_char_width;
                } else {
                    wrapped_line_width += final_break_on_soft_line.actual_size.width;
                    wrapped_line_width = wrapped_line_width.min(wrapping_draw_width);
                }

                self.create_line_view_blocks(
                    line_model_index,
                    Some(final_break_on_soft_line.actual_range.end),
                    wrapped_line_width,
                    &mut current_run_index,
                    &mut current_renderer_index,
                    &mut previous_block_end,
                    soft_line,
                );

                {
                    let line_model = &self.line_models[line_model_index];
                    if current_run_index < line_model.runs.len()
                        && final_break_on_soft_line.actual_range.end
                            == line_model.runs[current_run_index].text_range().end
                    {
                        current_run_index += 1;
                    }
                }

                previous_block_end = final_break_on_soft_line.actual_range.end;
                current_width = 0.0;
                soft_line.clear();
            } else {
                current_width += candidate.actual_size.width;
            }

            break_index += 1;
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn create_line_view_blocks(
        &mut self,
        line_model_index: usize,
        stop_index: Option<usize>,
        wrapped_line_width: f32,
        out_run_index: &mut usize,
        out_renderer_index: &mut Option<usize>,
        out_previous_block_end: &mut usize,
        soft_line: &mut Vec<LayoutBlock>,
    ) {
        let scale = self.scale;
        let mut max_above_baseline = 0.0f32;
        let mut max_below_baseline = 0.0f32;

        {
            let line_model = &self.line_models[line_model_index];

            while *out_run_index < line_model.runs.len() {
                let run = &line_model.runs[*out_run_index];
                let run_range = run.text_range();

                // Renderers force their own block segments, so the block
                // may stop early at a renderer boundary.
                let mut block_renderer = None;
                let mut block_stop_index = run_range.end;
                if let Some(renderer_index) = *out_renderer_index {
                    let renderer = &line_model.run_renderers[renderer_index];
                    if *out_previous_block_end >= renderer.range.begin {
                        if renderer.range.end <= run_range.end {
                            block_stop_index = renderer.range.end;
                        }
                        block_renderer = Some(Rc::clone(&renderer.renderer));
                    } else if renderer.range.begin <= run_range.end {
                        block_stop_index = renderer.range.begin;
                    }
                }

                if let Some(stop) = stop_index {
                    block_stop_index = block_stop_index.min(stop);
                }

                let block_begin_index = (*out_previous_block_end).max(run_range.begin);
                let is_last_block = stop_index == Some(block_stop_index);

                if run_range.begin < block_stop_index && run_range.end > block_begin_index {
                    let definition = BlockDefinition {
                        range: TextRange::new(block_begin_index, block_stop_index),
                        renderer: block_renderer,
                    };
                    soft_line.push(run.create_block(&definition, scale));
                    *out_previous_block_end = block_stop_index;
                } else {
                    // Zero-length runs still get a block so they keep a
                    // position on the line.
                    let definition = BlockDefinition {
                        range: run_range,
                        renderer: block_renderer,
                    };
                    soft_line.push(run.create_block(&definition, scale));
                    *out_previous_block_end = run_range.end;
                }

                let below_baseline = -run.baseline(scale);
                max_above_baseline = max_above_baseline.max(run.max_height(scale) - below_baseline);
                max_below_baseline = max_below_baseline.max(below_baseline);

                if block_stop_index == run_range.end {
                    *out_run_index += 1;
                }

                if let Some(renderer_index) = *out_renderer_index {
                    if block_stop_index == line_model.run_renderers[renderer_index].range.end {
                        let next_index = renderer_index + 1;
                        *out_renderer_index = if next_index < line_model.run_renderers.len() {
                            Some(next_index)
                        } else {
                            None
                        };
                    }
                }

                if is_last_block {
                    break;
                }
            }
        }

        let mut line_size = Size::ZERO;

        // Positive scrolling moves content negatively in layout space.
        let current_offset = Point::new(
            self.margin.left - self.scroll_offset.x,
            self.margin.top + self.layout_size.height - self.scroll_offset.y,
        );

        if !soft_line.is_empty() {
            let mut current_horizontal_pos = 0.0f32;
            for block in soft_line.iter_mut() {
                let (block_baseline, block_kerning) = {
                    let run = block.run().borrow();
                    (
                        run.baseline(scale),
                        run.kerning_at(block.text_range().begin, scale),
                    )
                };
                let vertical_offset = max_above_baseline - block.size().height - block_baseline;

                block.set_location_offset(Point::new(
                    current_offset.x + current_horizontal_pos + block_kerning,
                    current_offset.y + vertical_offset,
                ));

                current_horizontal_pos += block.size().width;
            }

            let natural_line_height = max_above_baseline + max_below_baseline;
            line_size = Size::new(
                current_horizontal_pos,
                natural_line_height * self.line_height_percentage,
            );

            let blocks = std::mem::take(soft_line);
            let range = TextRange::new(
                blocks[0].text_range().begin,
                blocks[blocks.len() - 1].text_range().end,
            );
            self.line_views.push(LineView {
                offset: current_offset,
                size: line_size,
                text_size: Size::new(current_horizontal_pos, natural_line_height),
                range,
                model_index: line_model_index,
                blocks,
                underlay_highlights: Vec::new(),
                overlay_highlights: Vec::new(),
            });
        }

        self.layout_size.draw_width = self.layout_size.draw_width.max(line_size.width);
        self.layout_size.wrapped_width = self.layout_size.wrapped_width.max(if stop_index.is_none()
        {
            line_size.width
        } else {
            wrapped_line_width
        });
        self.layout_size.height += line_size.height;
    }

    fn justify_layout(&mut self) {
        if self.justification == Justification::Left {
            return;
        }

        let layout_width_no_margin = self.layout_size.draw_width.max(self.view_size.width * self.scale)
            - self.margin.horizontal() * self.scale;

        for line_view in &mut self.line_views {
            let extra_space = layout_width_no_margin - line_view.size.width;

            let adjustment_x = match self.justification {
                Justification::Left => 0.0,
                Justification::Center => extra_space * 0.5,
                Justification::Right => extra_space,
            };

            line_view.offset.x += adjustment_x;

            for block in &mut line_view.blocks {
                let location = block.location_offset();
                block.set_location_offset(Point::new(location.x + adjustment_x, location.y));
            }
        }
    }

    fn flow_highlights(&mut self) {
        debug_assert!(!self.dirty_flags.layout());

        let Self {
            line_models,
            line_views,
            scale,
            ..
        } = self;

        for line_view in line_views.iter_mut() {
            line_view.underlay_highlights.clear();
            line_view.overlay_highlights.clear();

            let line_model = &line_models[line_view.model_index];

            // Resolve each highlight against every line view its range
            // covers, as an underlay or an overlay by z-order.
            for line_highlight in &line_model.line_highlights {
                if line_highlight.line_index != line_view.model_index {
                    continue;
                }

                let is_highlight_in_range = line_view
                    .range
                    .inclusive_contains(line_highlight.range.begin)
                    && line_view.range.inclusive_contains(line_highlight.range.end);
                if !is_highlight_in_range {
                    continue;
                }

                let mut offset_x = 0.0f32;
                let mut width = 0.0f32;

                // Measure the blocks before the highlight to find its
                // start offset.
                let mut block_index = 0;
                while block_index < line_view.blocks.len() {
                    let block = &line_view.blocks[block_index];
                    let block_range = block.text_range();

                    if line_highlight.range.begin > block_range.end {
                        offset_x += block
                            .run()
                            .borrow()
                            .measure(block_range.begin, block_range.end, *scale)
                            .width;
                    } else {
                        offset_x += block
                            .run()
                            .borrow()
                            .measure(block_range.begin, line_highlight.range.begin, *scale)
                            .width;
                        break;
                    }
                    block_index += 1;
                }

                // Then measure the intersected blocks to find its width.
                while block_index < line_view.blocks.len() {
                    let block = &line_view.blocks[block_index];
                    let block_range = block.text_range();

                    let intersected = block_range.intersect(line_highlight.range);
                    if !intersected.is_empty() {
                        width += block
                            .run()
                            .borrow()
                            .measure(intersected.begin, intersected.end, *scale)
                            .width;
                    }

                    if block_range.end > line_highlight.range.end {
                        break;
                    }
                    block_index += 1;
                }

                let resolved = LineViewHighlight {
                    offset_x,
                    width,
                    highlighter: Rc::clone(&line_highlight.highlighter),
                };
                if line_highlight.z_order < 0 {
                    line_view.underlay_highlights.push(resolved);
                } else {
                    line_view.overlay_highlights.push(resolved);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::FixedAdvanceMeasurer;

    fn layout() -> TextLayout {
        TextLayout::with_measurer(Rc::new(FixedAdvanceMeasurer {
            advance: 10.0,
            max_height: 16.0,
            descent: 4.0,
        }))
    }

    #[test]
    fn unwrapped_text_is_one_line_view() {
        let mut layout = layout();
        layout.add_plain_line("hello world");
        layout.update_if_needed();

        assert_eq!(layout.line_views().len(), 1);
        let view = &layout.line_views()[0];
        assert_eq!(view.range, TextRange::new(0, 11));
        assert_eq!(view.size.width, 110.0);
        assert_eq!(layout.draw_size(), Size::new(110.0, 16.0));
    }

    #[test]
    fn wrapping_splits_at_whitespace() {
        let mut layout = layout();
        layout.add_plain_line("aaa bbb ccc");
        layout.set_wrapping_width(60.0);
        layout.update_if_needed();

        // 11 chars at 10 units each never fit in 60; each word wraps.
        assert_eq!(layout.line_views().len(), 3);
        assert_eq!(layout.line_views()[0].range, TextRange::new(0, 4));
        assert_eq!(layout.line_views()[1].range, TextRange::new(4, 8));
        assert_eq!(layout.line_views()[2].range, TextRange::new(8, 11));

        // Soft lines never exceed the wrapping width once trimmed.
        for view in layout.line_views() {
            assert!(view.text_size.width <= 60.0 + 10.0);
        }
    }

    #[test]
    fn unbreakable_word_overflows_without_panic() {
        let mut layout = layout();
        layout.add_plain_line("abcdefghij");
        layout.set_wrapping_width(30.0);
        layout.update_if_needed();

        assert_eq!(layout.line_views().len(), 1);
        assert_eq!(layout.line_views()[0].size.width, 100.0);
        // The wrapped width stays clamped to the wrapping width.
        assert!(layout.wrapped_size().width <= 30.0);
    }

    #[test]
    fn updates_are_idempotent() {
        let mut layout = layout();
        layout.add_plain_line("some text here");
        layout.set_wrapping_width(70.0);
        layout.update_if_needed();

        let first: Vec<TextRange> = layout.line_views().iter().map(|view| view.range).collect();
        let first_size = layout.draw_size();

        layout.dirty_layout();
        layout.update_if_needed();

        let second: Vec<TextRange> = layout.line_views().iter().map(|view| view.range).collect();
        assert_eq!(first, second);
        assert_eq!(first_size, layout.draw_size());
    }

    #[test]
    fn insert_grows_run_and_shifts_later_runs() {
        let mut layout = layout();
        layout.add_plain_line("helloworld");
        assert!(layout.insert_at(TextLocation::new(0, 5), " big "));

        assert_eq!(layout.to_text(), "hello big world");
        assert!(layout.is_layout_dirty());

        let line = &layout.line_models()[0];
        assert_eq!(line.runs.len(), 1);
        assert_eq!(line.runs[0].text_range(), TextRange::new(0, 15));
    }

    #[test]
    fn remove_clamps_to_line_end() {
        let mut layout = layout();
        layout.add_plain_line("hello");
        assert!(layout.remove_at(TextLocation::new(0, 3), 100));
        assert_eq!(layout.to_text(), "hel");

        // Removing nothing reports failure.
        assert!(!layout.remove_at(TextLocation::new(0, 3), 1));
    }

    #[test]
    fn remove_entire_line_leaves_empty_run() {
        let mut layout = layout();
        layout.add_plain_line("abc");
        assert!(layout.remove_at(TextLocation::new(0, 0), 3));

        let line = &layout.line_models()[0];
        assert_eq!(line.text_len(), 0);
        assert_eq!(line.runs.len(), 1);
        assert!(line.runs[0].text_range().is_empty());
    }

    #[test]
    fn split_and_join_round_trip() {
        let mut layout = layout();
        layout.add_plain_line("hello world");
        assert!(layout.split_line_at(TextLocation::new(0, 5)));

        assert_eq!(layout.line_models().len(), 2);
        assert_eq!(layout.to_text(), "hello\n world");
        assert_eq!(*layout.line_models()[0].text.borrow(), "hello");
        assert_eq!(*layout.line_models()[1].text.borrow(), " world");

        assert!(layout.join_line_with_next_line(0));
        assert_eq!(layout.line_models().len(), 1);
        assert_eq!(layout.to_text(), "hello world");
    }

    #[test]
    fn join_removes_empty_next_line() {
        let mut layout = layout();
        layout.add_plain_line("abc");
        layout.add_plain_line("");
        assert!(layout.join_line_with_next_line(0));
        assert_eq!(layout.line_models().len(), 1);
        assert_eq!(layout.to_text(), "abc");
    }

    #[test]
    fn center_justification_offsets_lines() {
        let mut layout = layout();
        layout.add_plain_line("ab");
        layout.set_justification(Justification::Center);
        layout.set_visible_region(Size::new(100.0, 50.0), Point::ZERO);
        layout.update_if_needed();

        // 20 units of text in a 100 unit view leaves 40 on each side.
        let view = &layout.line_views()[0];
        assert_eq!(view.offset.x, 40.0);
        assert_eq!(view.blocks[0].location_offset().x, 40.0);
    }

    #[test]
    fn scrolling_translates_without_dirtying() {
        let mut layout = layout();
        layout.add_plain_line("abc");
        layout.update_if_needed();

        layout.set_visible_region(Size::ZERO, Point::new(10.0, 5.0));
        assert!(!layout.is_layout_dirty());

        let view = &layout.line_views()[0];
        assert_eq!(view.offset, Point::new(-10.0, -5.0));
        assert_eq!(view.blocks[0].location_offset(), Point::new(-10.0, -5.0));
    }

    #[test]
    fn hit_testing_resolves_gutters() {
        let mut layout = layout();
        layout.add_plain_line("abcd");
        layout.update_if_needed();

        let (location, hit) = layout.text_location_at(Point::new(12.0, 4.0));
        assert_eq!(location, TextLocation::new(0, 1));
        assert_eq!(hit, TextHitPoint::WithinText);

        let (location, hit) = layout.text_location_at(Point::new(500.0, 4.0));
        assert_eq!(location, TextLocation::new(0, 4));
        assert_eq!(hit, TextHitPoint::RightGutter);

        let (location, hit) = layout.text_location_at(Point::new(-5.0, 4.0));
        assert_eq!(location, TextLocation::new(0, 0));
        assert_eq!(hit, TextHitPoint::LeftGutter);
    }

    #[test]
    fn location_round_trips_through_hit_testing() {
        let mut layout = layout();
        layout.add_plain_line("hello");
        layout.update_if_needed();

        let point = layout.location_at(TextLocation::new(0, 3), false);
        assert_eq!(point, Point::new(30.0, 0.0));
    }

    #[test]
    fn word_at_skips_whitespace_backwards() {
        let mut layout = layout();
        layout.add_plain_line("hello  world");

        let word = layout.word_at(TextLocation::new(0, 2)).unwrap();
        assert_eq!(word.beginning(), TextLocation::new(0, 0));
        assert_eq!(word.ending(), TextLocation::new(0, 5));

        // Inside the whitespace gap the previous word is selected.
        let word = layout.word_at(TextLocation::new(0, 6)).unwrap();
        assert_eq!(word.beginning(), TextLocation::new(0, 0));
        assert_eq!(word.ending(), TextLocation::new(0, 5));
    }

    #[test]
    fn zero_z_order_highlight_is_rejected() {
        struct Marker;
        impl crate::highlight::LineHighlighter for Marker {}

        let mut layout = layout();
        layout.add_plain_line("abc");

        let result = layout.add_line_highlight(TextLineHighlight::new(
            0,
            TextRange::new(0, 3),
            0,
            Rc::new(Marker),
        ));
        assert!(matches!(result, Err(TextFlowError::ZeroHighlightZOrder)));
    }

    #[test]
    fn overlapping_renderers_are_rejected() {
        struct Marker;
        impl crate::highlight::RunRenderer for Marker {}

        let mut layout = layout();
        layout.add_plain_line("abcdef");

        layout
            .add_run_renderer(TextRunRenderer::new(
                0,
                TextRange::new(0, 3),
                Rc::new(Marker),
            ))
            .unwrap();
        let result = layout.add_run_renderer(TextRunRenderer::new(
            0,
            TextRange::new(2, 5),
            Rc::new(Marker),
        ));
        assert!(matches!(
            result,
            Err(TextFlowError::OverlappingRenderer { .. })
        ));

        // A renderer in another line is fine; so is an adjacent one.
        layout
            .add_run_renderer(TextRunRenderer::new(
                0,
                TextRange::new(3, 5),
                Rc::new(Marker),
            ))
            .unwrap();
    }

    #[test]
    fn highlights_resolve_to_measured_spans() {
        struct Marker;
        impl crate::highlight::LineHighlighter for Marker {}

        let mut layout = layout();
        layout.add_plain_line("hello world");
        layout
            .add_line_highlight(TextLineHighlight::new(
                0,
                TextRange::new(6, 11),
                -1,
                Rc::new(Marker),
            ))
            .unwrap();
        layout.update_if_needed();

        let view = &layout.line_views()[0];
        assert_eq!(view.underlay_highlights.len(), 1);
        assert!(view.overlay_highlights.is_empty());
        assert_eq!(view.underlay_highlights[0].offset_x, 60.0);
        assert_eq!(view.underlay_highlights[0].width, 50.0);
    }

    #[test]
    fn add_line_flows_immediately_when_clean() {
        let mut layout = layout();
        layout.add_plain_line("first");
        layout.update_if_needed();
        assert_eq!(layout.line_views().len(), 1);

        layout.add_plain_line("second line");
        assert!(!layout.is_layout_dirty());
        assert_eq!(layout.line_views().len(), 2);
        assert_eq!(layout.line_views()[1].model_index, 1);
        assert_eq!(layout.draw_size().width, 110.0);
    }

    #[test]
    fn text_offsets_round_trip() {
        let mut layout = layout();
        layout.add_plain_line("ab");
        layout.add_plain_line("cde");

        assert_eq!(layout.to_text(), "ab\ncde");

        let offsets = layout.text_offset_locations();
        assert_eq!(offsets.text_len(), 6);
        assert_eq!(
            offsets.location_to_offset(TextLocation::new(1, 1)),
            Some(4)
        );
        assert_eq!(
            offsets.offset_to_location(4),
            Some(TextLocation::new(1, 1))
        );
    }

    #[test]
    fn selection_text_spans_lines() {
        let mut layout = layout();
        layout.add_plain_line("hello");
        layout.add_plain_line("world");

        let selection = TextSelection::new(TextLocation::new(0, 3), TextLocation::new(1, 2));
        assert_eq!(layout.selection_as_text(&selection), "lo\nwo");

        // Reversed selections normalize.
        let selection = TextSelection::new(TextLocation::new(1, 2), TextLocation::new(0, 3));
        assert_eq!(layout.selection_as_text(&selection), "lo\nwo");
    }
}
