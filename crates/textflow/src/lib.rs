//! Incremental rich text layout.
//!
//! This crate lays out styled text documents without drawing them: callers
//! supply content as opaque [`Run`]s, and the engine produces positioned,
//! measured [`LineView`]s ready to paint with any backend.
//!
//! - **Runs**: Styled spans of text or inline objects, measured through a
//!   pluggable [`TextMeasurer`]
//! - **Wrapping**: Greedy line breaking over UAX #14 break opportunities,
//!   with cached measurements and break candidates
//! - **Justification**: Left, center, and right alignment against the view
//! - **Editing**: Incremental insert, remove, split, and join operations
//!   that preserve run structure and dirty only what changed
//! - **Decorations**: Run renderers and z-ordered line highlights resolved
//!   to measured spans
//! - **Hit testing**: Point-to-location and location-to-point mapping,
//!   including word selection
//!
//! # Example
//!
//! ```
//! use std::rc::Rc;
//! use textflow::{FixedAdvanceMeasurer, TextLayout, TextLocation};
//!
//! let mut layout = TextLayout::with_measurer(Rc::new(FixedAdvanceMeasurer::default()));
//! layout.add_plain_line("hello world");
//! layout.set_wrapping_width(50.0);
//! layout.update_if_needed();
//!
//! // "hello " and "world" each wrap onto their own line.
//! assert_eq!(layout.line_views().len(), 2);
//!
//! // The document remains editable in place.
//! layout.insert_at(TextLocation::new(0, 5), ",");
//! assert_eq!(layout.to_text(), "hello, world");
//! ```

mod block;
mod break_iter;
mod error;
mod highlight;
mod layout;
mod line;
mod range;
mod run;
mod types;

pub use block::{BlockDefinition, LayoutBlock};
pub use break_iter::{
    LineBreakIterator, UnicodeLineBreakIterator, UnicodeWordBreakIterator, WordBreakIterator,
};
pub use error::{TextFlowError, TextFlowResult};
pub use highlight::{
    LineHighlighter, LineHighlighterRc, LineViewHighlight, RunRenderer, RunRendererRc,
    TextLineHighlight, TextRunRenderer,
};
pub use layout::{
    DefaultRunFactory, LINE_TERMINATOR, LineView, TextLayout, TextLayoutSize, TextOffsetLocations,
};
pub use line::{BreakCandidate, LineModel, RunModel};
pub use range::{TextLocation, TextRange, TextSelection};
pub use run::{
    FixedAdvanceMeasurer, LineText, MeasurerRc, ObjectRun, Run, RunAttributes, RunRc, TextMeasurer,
    TextRun, line_text,
};
pub use types::{Justification, Margin, Point, Size, TextHitPoint};
