//! Text ranges, caret locations, and selections.
//!
//! Offsets are byte offsets into a line's UTF-8 buffer and must always lie
//! on `char` boundaries. Ranges are half-open: `[begin, end)`.

/// A half-open byte range `[begin, end)` over a line's text buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TextRange {
    pub begin: usize,
    pub end: usize,
}

impl TextRange {
    /// Create a new range. `begin` must not exceed `end`.
    #[inline]
    pub fn new(begin: usize, end: usize) -> Self {
        debug_assert!(begin <= end, "inverted text range {begin}..{end}");
        Self { begin, end }
    }

    /// The number of bytes covered by this range.
    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.begin
    }

    /// Check whether the range covers no text.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    /// Check whether `offset` lies within the half-open range.
    #[inline]
    pub fn contains(&self, offset: usize) -> bool {
        offset >= self.begin && offset < self.end
    }

    /// Check whether `offset` lies within the closed range `[begin, end]`.
    #[inline]
    pub fn inclusive_contains(&self, offset: usize) -> bool {
        offset >= self.begin && offset <= self.end
    }

    /// Intersect two ranges. Returns an empty range when they do not overlap.
    pub fn intersect(&self, other: TextRange) -> TextRange {
        let begin = self.begin.max(other.begin);
        let end = self.end.min(other.end);
        if begin > end {
            TextRange::new(0, 0)
        } else {
            TextRange::new(begin, end)
        }
    }

    /// Shift both endpoints by a signed delta.
    pub fn offset_by(&self, delta: isize) -> TextRange {
        TextRange::new(
            self.begin.checked_add_signed(delta).expect("range offset underflow"),
            self.end.checked_add_signed(delta).expect("range offset underflow"),
        )
    }
}

/// Identifies a caret position: a line index plus a byte offset within that
/// line. The offset is always within `[0, line_length]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TextLocation {
    pub line_index: usize,
    pub offset: usize,
}

impl TextLocation {
    /// Create a new location.
    #[inline]
    pub const fn new(line_index: usize, offset: usize) -> Self {
        Self { line_index, offset }
    }
}

/// A pair of locations bounding a selected region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TextSelection {
    pub begin: TextLocation,
    pub end: TextLocation,
}

impl TextSelection {
    /// Create a new selection.
    #[inline]
    pub const fn new(begin: TextLocation, end: TextLocation) -> Self {
        Self { begin, end }
    }

    /// The selection's beginning in document order.
    pub fn beginning(&self) -> TextLocation {
        if (self.begin.line_index, self.begin.offset) <= (self.end.line_index, self.end.offset) {
            self.begin
        } else {
            self.end
        }
    }

    /// The selection's end in document order.
    pub fn ending(&self) -> TextLocation {
        if (self.begin.line_index, self.begin.offset) <= (self.end.line_index, self.end.offset) {
            self.end
        } else {
            self.begin
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_containment() {
        let range = TextRange::new(2, 5);
        assert!(!range.contains(1));
        assert!(range.contains(2));
        assert!(range.contains(4));
        assert!(!range.contains(5));
        assert!(range.inclusive_contains(5));
        assert!(!range.inclusive_contains(6));
    }

    #[test]
    fn range_intersection() {
        let a = TextRange::new(0, 10);
        let b = TextRange::new(5, 15);
        assert_eq!(a.intersect(b), TextRange::new(5, 10));

        let disjoint = TextRange::new(20, 30);
        assert!(a.intersect(disjoint).is_empty());
    }

    #[test]
    fn range_offsetting() {
        let range = TextRange::new(3, 7);
        assert_eq!(range.offset_by(2), TextRange::new(5, 9));
        assert_eq!(range.offset_by(-3), TextRange::new(0, 4));
    }

    #[test]
    fn selection_normalization() {
        let forward = TextSelection::new(TextLocation::new(0, 1), TextLocation::new(1, 0));
        assert_eq!(forward.beginning(), TextLocation::new(0, 1));
        assert_eq!(forward.ending(), TextLocation::new(1, 0));

        let backward = TextSelection::new(TextLocation::new(1, 0), TextLocation::new(0, 1));
        assert_eq!(backward.beginning(), TextLocation::new(0, 1));
        assert_eq!(backward.ending(), TextLocation::new(1, 0));
    }
}
