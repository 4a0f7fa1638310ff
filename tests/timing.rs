//! Playback timing: millisecond spans per note across tempo changes.

use assert_approx_eq::assert_approx_eq;
use scorch::{Compiler, Highlight};

fn timeline(source: &str) -> Vec<Highlight> {
    Compiler::default()
        .compute_timeline(source)
        .expect("compile failed")
}

#[test]
fn default_tempo_is_120() {
    let h = timeline("#1 (q=4) cd");
    assert_eq!(h.len(), 2);
    assert_approx_eq!(h[0].start_ms, 0.0);
    assert_approx_eq!(h[0].end_ms, 500.0);
    assert_approx_eq!(h[1].start_ms, 500.0);
    assert_approx_eq!(h[1].end_ms, 1000.0);
}

#[test]
fn tempo_changes_are_integrated() {
    let h = timeline("((bpm=60)) #1 (q=4) c ((bpm=120)) d");
    assert_approx_eq!(h[0].end_ms, 1000.0);
    assert_approx_eq!(h[1].start_ms, 1000.0);
    assert_approx_eq!(h[1].end_ms, 1500.0);
}

#[test]
fn simultaneous_notes_order_by_offset() {
    let source = "#1 (q=4) [[c|e]] g";
    let h = timeline(source);
    let offsets: Vec<usize> = h.iter().map(|h| h.offset).collect();
    assert_eq!(offsets, vec![11, 13, 17]);
    assert_approx_eq!(h[2].start_ms, 500.0);
}

#[test]
fn offsets_point_past_comments() {
    let source = "melody =/c /= d\ne";
    let h = timeline(source);
    let offsets: Vec<usize> = h.iter().map(|h| h.offset).collect();
    assert_eq!(offsets, vec![9, 16]);
}

#[test]
fn highlights_serialize_as_json() {
    let h = timeline("c");
    let json = serde_json::to_value(&h).unwrap();
    assert_eq!(json[0]["offset"], 0);
    assert_eq!(json[0]["start_ms"], 0.0);
    assert_eq!(json[0]["end_ms"], 125.0);
}
