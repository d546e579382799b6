//! End-to-end layout scenarios exercising wrapping, decorations, editing,
//! and hit testing through the public API.

use std::rc::Rc;

use textflow::{
    FixedAdvanceMeasurer, Justification, LINE_TERMINATOR, LineHighlighter, Margin, ObjectRun,
    Point, RunRenderer, Size, TextHitPoint, TextLayout, TextLineHighlight, TextLocation,
    TextRange, TextRun, TextRunRenderer, TextSelection, line_text,
};

struct Highlighter;
impl LineHighlighter for Highlighter {}

struct Renderer;
impl RunRenderer for Renderer {}

fn measurer() -> Rc<FixedAdvanceMeasurer> {
    Rc::new(FixedAdvanceMeasurer {
        advance: 10.0,
        max_height: 16.0,
        descent: 4.0,
    })
}

fn layout() -> TextLayout {
    TextLayout::with_measurer(measurer())
}

fn assert_runs_tile(layout: &TextLayout) {
    for line in layout.line_models() {
        let mut expected_begin = 0;
        for run in &line.runs {
            let range = run.text_range();
            assert_eq!(range.begin, expected_begin, "runs must tile the line");
            expected_begin = range.end;
        }
        assert_eq!(expected_begin, line.text_len(), "runs must cover the line");
    }
}

#[test]
fn test_wrapping_produces_expected_soft_lines() {
    let mut layout = layout();
    layout.add_plain_line("one two three four");
    layout.set_wrapping_width(80.0);
    layout.update_if_needed();

    let ranges: Vec<TextRange> = layout.line_views().iter().map(|view| view.range).collect();
    assert_eq!(
        ranges,
        vec![
            TextRange::new(0, 8),
            TextRange::new(8, 14),
            TextRange::new(14, 18),
        ]
    );
    assert_eq!(layout.draw_size().height, 48.0);
}

#[test]
fn test_margin_reduces_wrapping_space_and_pads_size() {
    let mut layout = layout();
    layout.add_plain_line("abcdefgh");
    layout.set_wrapping_width(50.0);
    layout.set_margin(Margin::uniform(5.0));
    layout.update_if_needed();

    // A single unbreakable word overflows the 40 units left by the margin.
    assert_eq!(layout.line_views().len(), 1);
    let view = &layout.line_views()[0];
    assert_eq!(view.offset, Point::new(5.0, 5.0));
    assert_eq!(view.size.width, 80.0);

    assert_eq!(layout.draw_size(), Size::new(90.0, 26.0));
    assert_eq!(layout.wrapped_size(), Size::new(50.0, 26.0));
}

#[test]
fn test_object_run_aligns_text_to_its_baseline() {
    let placeholder_len = ObjectRun::PLACEHOLDER.len_utf8();
    let text = line_text(format!("ab{}cd", ObjectRun::PLACEHOLDER));
    let runs = vec![
        TextRun::shared(Rc::clone(&text), TextRange::new(0, 2), measurer()),
        ObjectRun::shared(
            Rc::clone(&text),
            TextRange::new(2, 2 + placeholder_len),
            Size::new(30.0, 30.0),
            0.0,
        ),
        TextRun::shared(
            Rc::clone(&text),
            TextRange::new(2 + placeholder_len, 4 + placeholder_len),
            measurer(),
        ),
    ];

    let mut layout = layout();
    layout.add_line(text, runs);
    layout.update_if_needed();

    let view = &layout.line_views()[0];
    assert_eq!(view.blocks.len(), 3);
    assert_eq!(view.size, Size::new(70.0, 34.0));

    // The tall object sits at the top; text drops to share its baseline.
    assert_eq!(view.blocks[0].location_offset(), Point::new(0.0, 18.0));
    assert_eq!(view.blocks[1].location_offset(), Point::new(20.0, 0.0));
    assert_eq!(view.blocks[2].location_offset(), Point::new(50.0, 18.0));
}

#[test]
fn test_insert_next_to_object_run_creates_sibling_text_run() {
    let placeholder_len = ObjectRun::PLACEHOLDER.len_utf8();
    let text = line_text(format!("ab{}cd", ObjectRun::PLACEHOLDER));
    let runs = vec![
        TextRun::shared(Rc::clone(&text), TextRange::new(0, 2), measurer()),
        ObjectRun::shared(
            Rc::clone(&text),
            TextRange::new(2, 2 + placeholder_len),
            Size::new(30.0, 30.0),
            0.0,
        ),
        TextRun::shared(
            Rc::clone(&text),
            TextRange::new(2 + placeholder_len, 4 + placeholder_len),
            measurer(),
        ),
    ];

    let mut layout = layout();
    layout.add_line(text, runs);

    // Inserting at the object's left edge lands in a new run before it.
    assert!(layout.insert_at(TextLocation::new(0, 2), "XY"));
    assert_eq!(
        layout.to_text(),
        format!("abXY{}cd", ObjectRun::PLACEHOLDER)
    );
    assert_eq!(layout.line_models()[0].runs.len(), 4);
    assert_runs_tile(&layout);

    // Inserting at the end grows the trailing text run.
    let end = layout.line_models()[0].text_len();
    assert!(layout.insert_at(TextLocation::new(0, end), "ZZ"));
    assert_eq!(
        layout.to_text(),
        format!("abXY{}cdZZ", ObjectRun::PLACEHOLDER)
    );
    assert_eq!(layout.line_models()[0].runs.len(), 4);
    assert_runs_tile(&layout);
}

#[test]
fn test_insert_run_splits_the_run_under_it() {
    let mut layout = layout();
    layout.add_plain_line("hello");

    let placeholder_len = ObjectRun::PLACEHOLDER.len_utf8();
    let object_text = line_text(String::from(ObjectRun::PLACEHOLDER));
    let object = ObjectRun::shared(
        object_text,
        TextRange::new(0, placeholder_len),
        Size::new(24.0, 24.0),
        0.0,
    );

    assert!(layout.insert_run_at(TextLocation::new(0, 2), object, false));
    assert_eq!(layout.to_text(), format!("he{}llo", ObjectRun::PLACEHOLDER));

    let line = &layout.line_models()[0];
    assert_eq!(line.runs.len(), 3);
    assert_eq!(line.runs[0].text_range(), TextRange::new(0, 2));
    assert_eq!(
        line.runs[1].text_range(),
        TextRange::new(2, 2 + placeholder_len)
    );
    assert_eq!(
        line.runs[2].text_range(),
        TextRange::new(2 + placeholder_len, 5 + placeholder_len)
    );
    assert_runs_tile(&layout);
}

#[test]
fn test_remove_spanning_two_runs_shrinks_both() {
    let text = line_text("helloworld");
    let runs = vec![
        TextRun::shared(Rc::clone(&text), TextRange::new(0, 5), measurer()),
        TextRun::shared(Rc::clone(&text), TextRange::new(5, 10), measurer()),
    ];

    let mut layout = layout();
    layout.add_line(text, runs);

    assert!(layout.remove_at(TextLocation::new(0, 3), 4));
    assert_eq!(layout.to_text(), "helrld");

    let line = &layout.line_models()[0];
    assert_eq!(line.runs[0].text_range(), TextRange::new(0, 3));
    assert_eq!(line.runs[1].text_range(), TextRange::new(3, 6));
    assert_runs_tile(&layout);
}

#[test]
fn test_split_and_join_preserve_run_structure() {
    let text = line_text("abcdef");
    let runs = vec![
        TextRun::shared(Rc::clone(&text), TextRange::new(0, 3), measurer()),
        TextRun::shared(Rc::clone(&text), TextRange::new(3, 6), measurer()),
    ];

    let mut layout = layout();
    layout.add_line(text, runs);

    assert!(layout.split_line_at(TextLocation::new(0, 4)));
    assert_eq!(layout.line_models().len(), 2);
    assert_eq!(layout.to_text(), "abcd\nef");
    assert_runs_tile(&layout);

    assert!(layout.join_line_with_next_line(0));
    assert_eq!(layout.line_models().len(), 1);
    assert_eq!(layout.to_text(), "abcdef");
    assert_runs_tile(&layout);
}

#[test]
fn test_edit_sequence_keeps_runs_tiling() {
    let mut layout = layout();
    layout.add_plain_line("the quick brown fox");
    layout.add_plain_line("jumps over");

    assert!(layout.insert_at(TextLocation::new(0, 4), "very "));
    assert!(layout.remove_at(TextLocation::new(1, 0), 6));
    assert!(layout.split_line_at(TextLocation::new(0, 9)));
    assert!(layout.insert_char_at(TextLocation::new(2, 4), '!'));
    assert!(layout.join_line_with_next_line(1));

    assert_eq!(layout.to_text(), "the very \nquick brown foxover!");
    assert_runs_tile(&layout);

    layout.set_wrapping_width(60.0);
    layout.update_if_needed();
    assert!(!layout.is_layout_dirty());
    assert!(layout.line_views().len() >= 2);
}

#[test]
fn test_renderer_forces_block_boundaries() {
    let mut layout = layout();
    layout.add_plain_line("abcdefg");
    layout
        .add_run_renderer(TextRunRenderer::new(
            0,
            TextRange::new(2, 5),
            Rc::new(Renderer),
        ))
        .unwrap();
    layout.update_if_needed();

    let view = &layout.line_views()[0];
    assert_eq!(view.blocks.len(), 3);
    assert_eq!(view.blocks[0].text_range(), TextRange::new(0, 2));
    assert_eq!(view.blocks[1].text_range(), TextRange::new(2, 5));
    assert_eq!(view.blocks[2].text_range(), TextRange::new(5, 7));

    assert!(view.blocks[0].renderer().is_none());
    assert!(view.blocks[1].renderer().is_some());
    assert!(view.blocks[2].renderer().is_none());

    // Segmentation must not disturb positioning.
    assert_eq!(view.blocks[0].location_offset().x, 0.0);
    assert_eq!(view.blocks[1].location_offset().x, 20.0);
    assert_eq!(view.blocks[2].location_offset().x, 50.0);
}

#[test]
fn test_highlights_resolve_per_soft_line() {
    let mut layout = layout();
    layout.add_plain_line("aaa bbb");
    layout.set_wrapping_width(40.0);

    layout
        .add_line_highlight(TextLineHighlight::new(
            0,
            TextRange::new(1, 3),
            -1,
            Rc::new(Highlighter),
        ))
        .unwrap();
    layout
        .add_line_highlight(TextLineHighlight::new(
            0,
            TextRange::new(5, 7),
            2,
            Rc::new(Highlighter),
        ))
        .unwrap();
    layout.update_if_needed();

    assert_eq!(layout.line_views().len(), 2);

    let first = &layout.line_views()[0];
    assert_eq!(first.underlay_highlights.len(), 1);
    assert!(first.overlay_highlights.is_empty());
    assert_eq!(first.underlay_highlights[0].offset_x, 10.0);
    assert_eq!(first.underlay_highlights[0].width, 20.0);

    let second = &layout.line_views()[1];
    assert!(second.underlay_highlights.is_empty());
    assert_eq!(second.overlay_highlights.len(), 1);
    assert_eq!(second.overlay_highlights[0].offset_x, 10.0);
    assert_eq!(second.overlay_highlights[0].width, 20.0);
}

#[test]
fn test_highlight_updates_without_layout_rebuild() {
    let mut layout = layout();
    layout.add_plain_line("hello");
    layout.update_if_needed();
    assert!(layout.line_views()[0].underlay_highlights.is_empty());

    layout
        .add_line_highlight(TextLineHighlight::new(
            0,
            TextRange::new(0, 5),
            -1,
            Rc::new(Highlighter),
        ))
        .unwrap();
    assert!(!layout.is_layout_dirty());

    layout.update_if_needed();
    assert_eq!(layout.line_views()[0].underlay_highlights.len(), 1);
}

#[test]
fn test_hit_testing_below_last_line_targets_it() {
    let mut layout = layout();
    layout.add_plain_line("aaa bbb");
    layout.set_wrapping_width(40.0);
    layout.update_if_needed();

    // Both soft lines belong to hard line zero.
    let (location, hit) = layout.text_location_at(Point::new(3.0, 100.0));
    assert_eq!(location, TextLocation::new(0, 4));
    assert_eq!(hit, TextHitPoint::WithinText);

    // Above the first line resolves into it.
    let (location, _) = layout.text_location_at(Point::new(3.0, -5.0));
    assert_eq!(location, TextLocation::new(0, 0));
}

#[test]
fn test_location_at_respects_soft_line_bounds() {
    let mut layout = layout();
    layout.add_plain_line("aaa bbb");
    layout.set_wrapping_width(40.0);
    layout.update_if_needed();

    // Offset 5 lives on the second soft line, one character in.
    let point = layout.location_at(TextLocation::new(0, 5), false);
    assert_eq!(point.x, 10.0);
    assert_eq!(point.y, layout.line_views()[1].offset.y);
}

#[test]
fn test_word_selection_extracts_text() {
    let mut layout = layout();
    layout.add_plain_line("alpha beta gamma");

    let word = layout.word_at(TextLocation::new(0, 8)).unwrap();
    assert_eq!(layout.selection_as_text(&word), "beta");

    let selection = TextSelection::new(TextLocation::new(0, 6), TextLocation::new(0, 10));
    assert_eq!(layout.selection_as_text(&selection), "beta");
}

#[test]
fn test_scale_doubles_layout_but_not_reported_size() {
    let mut layout = layout();
    layout.add_plain_line("abc");
    layout.set_scale(2.0);
    layout.update_if_needed();

    assert_eq!(layout.draw_size(), Size::new(60.0, 32.0));
    assert_eq!(layout.size(), Size::new(30.0, 16.0));
}

#[test]
fn test_line_height_percentage_stretches_views() {
    let mut layout = layout();
    layout.add_plain_line("abc");
    layout.set_line_height_percentage(2.0);
    layout.update_if_needed();

    let view = &layout.line_views()[0];
    assert_eq!(view.text_size.height, 16.0);
    assert_eq!(view.size.height, 32.0);
    assert_eq!(layout.draw_size().height, 32.0);
}

#[test]
fn test_right_justification_aligns_to_view_edge() {
    let mut layout = layout();
    layout.add_plain_line("abcd");
    layout.set_justification(Justification::Right);
    layout.set_visible_region(Size::new(200.0, 50.0), Point::ZERO);
    layout.update_if_needed();

    let view = &layout.line_views()[0];
    assert_eq!(view.offset.x, 160.0);
    assert_eq!(view.blocks[0].location_offset().x, 160.0);
}

#[test]
fn test_add_line_while_dirty_defers_flow() {
    let mut layout = layout();
    layout.add_plain_line("first");
    layout.update_if_needed();
    assert_eq!(layout.line_views().len(), 1);

    layout.insert_at(TextLocation::new(0, 0), "x");
    assert!(layout.is_layout_dirty());

    // No immediate flow while dirty; the next update picks the line up.
    layout.add_plain_line("second");
    assert_eq!(layout.line_views().len(), 1);

    layout.update_if_needed();
    assert_eq!(layout.line_views().len(), 2);
    assert_eq!(layout.to_text(), "xfirst\nsecond");
}

#[test]
fn test_block_widths_sum_to_line_width() {
    let mut layout = layout();
    layout.add_plain_line("one two three four");
    layout.add_plain_line("abcdefg");
    layout
        .add_run_renderer(TextRunRenderer::new(
            1,
            TextRange::new(2, 5),
            Rc::new(Renderer),
        ))
        .unwrap();
    layout.set_wrapping_width(80.0);
    layout.update_if_needed();

    // Three soft lines from the wrapped first line, one segmented by the
    // renderer; every view's blocks must tile its width exactly.
    assert_eq!(layout.line_views().len(), 4);
    for view in layout.line_views() {
        let sum: f32 = view.blocks.iter().map(|block| block.size().width).sum();
        assert!(
            (sum - view.size.width).abs() < 1e-3,
            "block widths {sum} do not tile view width {}",
            view.size.width
        );
    }
}

#[test]
fn test_flattened_text_rebuilds_identical_document() {
    let mut first = layout();
    first.add_plain_line("the quick brown fox");
    first.add_plain_line("");
    first.add_plain_line("jumps over");
    assert!(first.insert_at(TextLocation::new(2, 5), " high"));

    let flat = first.to_text();
    assert_eq!(flat, "the quick brown fox\n\njumps high over");

    let mut second = layout();
    for line in flat.split(LINE_TERMINATOR) {
        second.add_plain_line(line);
    }
    assert_eq!(second.line_models().len(), first.line_models().len());
    assert_eq!(second.to_text(), flat);
}

#[test]
fn test_layout_rebuild_logs_under_a_subscriber() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();

    let mut layout = layout();
    layout.add_plain_line("one two three");
    layout.set_wrapping_width(60.0);
    layout.update_if_needed();
    assert_eq!(layout.line_views().len(), 3);

    // Invalidation and the rebuild both emit events; neither may change
    // the layout itself.
    layout.dirty_layout();
    layout.update_if_needed();
    assert!(!layout.is_layout_dirty());
    assert_eq!(layout.line_views().len(), 3);
}

#[test]
fn test_empty_lines_still_occupy_height() {
    let mut layout = layout();
    layout.add_plain_line("a");
    layout.add_plain_line("");
    layout.add_plain_line("b");
    layout.update_if_needed();

    assert_eq!(layout.line_views().len(), 3);
    assert_eq!(layout.draw_size().height, 48.0);
    assert_eq!(layout.line_views()[1].size.width, 0.0);
    assert_eq!(layout.line_views()[2].offset.y, 32.0);
}
