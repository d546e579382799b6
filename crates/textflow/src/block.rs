//! Positioned, sized run fragments.
//!
//! Blocks are the leaves of a laid-out text view: each one covers a
//! sub-range of a single run, carries the measured size for that range,
//! and is assigned an absolute position during flow (later adjusted in
//! place by justification and scrolling). Blocks are ephemeral; every
//! layout pass rebuilds them from scratch.

use crate::highlight::RunRendererRc;
use crate::range::TextRange;
use crate::run::RunRc;
use crate::types::{Point, Size};

/// The requested shape of a block: a text range plus the renderer (if any)
/// active over that range.
#[derive(Clone)]
pub struct BlockDefinition {
    pub range: TextRange,
    pub renderer: Option<RunRendererRc>,
}

/// A positioned fragment of a single run within one soft line.
#[derive(Clone)]
pub struct LayoutBlock {
    run: RunRc,
    range: TextRange,
    size: Size,
    location_offset: Point,
    renderer: Option<RunRendererRc>,
}

impl LayoutBlock {
    /// Create a block at the origin; flow assigns the real offset.
    pub fn new(run: RunRc, range: TextRange, size: Size, renderer: Option<RunRendererRc>) -> Self {
        Self {
            run,
            range,
            size,
            location_offset: Point::ZERO,
            renderer,
        }
    }

    /// The run this block is a fragment of.
    pub fn run(&self) -> &RunRc {
        &self.run
    }

    /// The text range this block covers.
    pub fn text_range(&self) -> TextRange {
        self.range
    }

    /// The measured size of this block.
    pub fn size(&self) -> Size {
        self.size
    }

    /// The block's absolute position in layout space.
    pub fn location_offset(&self) -> Point {
        self.location_offset
    }

    /// Reposition the block. Used by flow, justification, and scrolling.
    pub fn set_location_offset(&mut self, offset: Point) {
        self.location_offset = offset;
    }

    /// The renderer active over this block, if any.
    pub fn renderer(&self) -> Option<&RunRendererRc> {
        self.renderer.as_ref()
    }
}
