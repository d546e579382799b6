//! Error types for the layout engine.

use thiserror::Error;

use crate::range::TextRange;

/// Errors that can occur when registering decorations against the layout.
#[derive(Error, Debug)]
pub enum TextFlowError {
    /// The referenced line does not exist.
    #[error("invalid line index {index} (layout has {count} lines)")]
    InvalidLineIndex { index: usize, count: usize },

    /// Run renderers on a line must not overlap one another.
    #[error("run renderer range {new:?} overlaps existing range {existing:?}")]
    OverlappingRenderer { new: TextRange, existing: TextRange },

    /// A highlight z-order of zero is neither an underlay nor an overlay.
    #[error("highlight z-order must be negative (underlay) or positive (overlay)")]
    ZeroHighlightZOrder,
}

/// Result type for layout registration operations.
pub type TextFlowResult<T> = Result<T, TextFlowError>;
