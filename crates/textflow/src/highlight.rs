//! Style overlays: run renderers and line highlights.
//!
//! Both kinds of decoration are registered against a line and positioned by
//! the layout engine, but painted entirely by the caller:
//!
//! - A run renderer replaces how the blocks under its range are painted
//!   (e.g. syntax colouring). Renderers force block boundaries, so each
//!   block has at most one renderer active over its whole range.
//! - A line highlight draws a rectangle under (negative z-order) or over
//!   (positive z-order) the blocks intersecting its range (e.g. selection,
//!   search results).

use std::rc::Rc;

use crate::range::TextRange;

/// A paint-time capability that overrides how blocks under a range are
/// drawn. The layout engine only segments blocks around it.
pub trait RunRenderer {}

/// A paint-time capability that draws a decoration rectangle behind or in
/// front of a measured sub-range of a line view.
pub trait LineHighlighter {}

/// Shared handle to a run renderer.
pub type RunRendererRc = Rc<dyn RunRenderer>;

/// Shared handle to a line highlighter.
pub type LineHighlighterRc = Rc<dyn LineHighlighter>;

/// A renderer registered over a range of one line.
///
/// Within a line, renderer ranges are kept sorted and must not overlap.
#[derive(Clone)]
pub struct TextRunRenderer {
    pub line_index: usize,
    pub range: TextRange,
    pub renderer: RunRendererRc,
}

impl TextRunRenderer {
    /// Create a renderer registration.
    pub fn new(line_index: usize, range: TextRange, renderer: RunRendererRc) -> Self {
        Self {
            line_index,
            range,
            renderer,
        }
    }
}

/// A highlight registered over a range of one line.
///
/// The z-order must be non-zero: negative draws under the text, positive
/// over it. Highlights with equal z-order keep their registration order.
#[derive(Clone)]
pub struct TextLineHighlight {
    pub line_index: usize,
    pub range: TextRange,
    pub z_order: i32,
    pub highlighter: LineHighlighterRc,
}

impl TextLineHighlight {
    /// Create a highlight registration.
    pub fn new(
        line_index: usize,
        range: TextRange,
        z_order: i32,
        highlighter: LineHighlighterRc,
    ) -> Self {
        Self {
            line_index,
            range,
            z_order,
            highlighter,
        }
    }
}

/// A highlight resolved against one line view: a measured horizontal span
/// ready for painting.
#[derive(Clone)]
pub struct LineViewHighlight {
    /// Horizontal offset from the line view's origin to the highlight start.
    pub offset_x: f32,
    /// Measured width of the highlighted span.
    pub width: f32,
    /// The capability that paints this highlight.
    pub highlighter: LineHighlighterRc,
}
