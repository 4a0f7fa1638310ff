//! Ornament integration tests: diacritics, graces, arpeggios, user ranges
//! and emoji shortcuts, checked on the assembled tracks.

use scorch::{Compiler, Track, TrackEvent};

/// Helper: (start, pitch, duration, velocity) per note, first pitch only.
fn notes(track: &Track) -> Vec<(u32, u8, u32, u8)> {
    let mut cursor = 0;
    let mut out = Vec::new();
    for event in &track.events {
        if let TrackEvent::Note {
            pitches,
            wait,
            duration,
            velocity,
        } = event
        {
            let start = cursor + wait;
            out.push((start, pitches[0], *duration, *velocity));
            cursor = start + duration;
        }
    }
    out
}

fn tracks(source: &str) -> Vec<Track> {
    Compiler::default()
        .compile_tracks(source)
        .expect("compile failed")
}

#[test]
fn crescendo_spans_first_to_last_onset() {
    let tracks = tracks("#1 (q=4) <+ cdef 120> g");
    let velocities: Vec<u8> = notes(&tracks[1]).iter().map(|n| n.3).collect();
    assert_eq!(velocities, vec![80, 93, 107, 120, 120]);
}

#[test]
fn decrescendo_lands_on_target() {
    let tracks = tracks("#1 (v=100) <- cd 40> e");
    let velocities: Vec<u8> = notes(&tracks[1]).iter().map(|n| n.3).collect();
    assert_eq!(velocities, vec![100, 40, 40]);
}

#[test]
fn staccato_leaves_a_gap() {
    let tracks = tracks("#1 (q=4) <.c> d");
    let n = notes(&tracks[1]);
    assert_eq!((n[0].0, n[0].2), (0, 16));
    assert_eq!(n[1].0, 128);
}

#[test]
fn fermata_default_and_configured() {
    let tracks = tracks("#1 (q=4) <~c> d");
    let n = notes(&tracks[1]);
    assert_eq!(n[0].2, 256);
    assert_eq!(n[1].0, 256);

    let tracks = self::tracks("((fermata=1.5)) #1 (q=4) <~c> d");
    assert_eq!(notes(&tracks[1])[1].0, 192);
}

#[test]
fn sforzando_accents() {
    let tracks = tracks("#1 <!c> d");
    let velocities: Vec<u8> = notes(&tracks[1]).iter().map(|n| n.3).collect();
    assert_eq!(velocities, vec![100, 80]);
}

#[test]
fn trill_alternates_with_upper_neighbor() {
    let tracks = tracks("#1 (q=8) <tc> <te>");
    let pitches: Vec<u8> = notes(&tracks[1]).iter().map(|n| n.1).collect();
    assert_eq!(pitches, vec![60, 62, 60, 62, 64, 65, 64, 65]);
    assert!(notes(&tracks[1]).iter().all(|n| n.2 == 16));
}

#[test]
fn grace_notes_borrow_from_the_main_note() {
    let tracks = tracks("#1 (q=4) [>de]c");
    assert_eq!(
        notes(&tracks[1]),
        vec![(0, 62, 8, 80), (8, 64, 8, 80), (16, 60, 112, 80)]
    );
}

#[test]
fn grace_on_a_diacritic_is_shaped_by_it() {
    let tracks = tracks("#1 (q=4) [>d]<.c> e");
    let n = notes(&tracks[1]);
    assert_eq!((n[0].1, n[0].2), (62, 8));
    assert_eq!((n[1].1, n[1].2), (60, 16));
    assert_eq!(n[2].0, 128);
}

#[test]
fn staccato_arpeggio_tightens_spacing() {
    let tracks = tracks("#1 (q=4) <.[|ceg]>");
    let starts: Vec<u32> = tracks[1..].iter().map(|t| notes(t)[0].0).collect();
    assert_eq!(starts, vec![0, 4, 8]);
}

#[test]
fn pitch_bend_track_precedes_notes() {
    let tracks = tracks("#1 (q=4) <p c (1) d (0)>");
    assert_eq!(tracks.len(), 3);
    let bends: Vec<f64> = tracks[1]
        .events
        .iter()
        .map(|e| match e {
            TrackEvent::PitchBend { value, .. } => *value,
            other => panic!("unexpected {other:?}"),
        })
        .collect();
    assert_eq!(bends.first(), Some(&0.0));
    assert!(bends.contains(&1.0));
    assert_eq!(bends.last(), Some(&0.0));
    assert!(bends.iter().all(|v| (0.0..=1.0).contains(v)));
    assert_eq!(notes(&tracks[2]).len(), 2);
}

#[test]
fn user_range_substitutes_each_key() {
    let tracks = tracks("{{oct}} {x ^x} #1 {{oct}} (ce)");
    let pitches: Vec<u8> = notes(&tracks[1]).iter().map(|n| n.1).collect();
    assert_eq!(pitches, vec![60, 72, 64, 76]);
}

#[test]
fn user_range_follows_invocation_octave() {
    let tracks = tracks("{{fifth}} {xg} #1 {{fifth}} (^c)");
    let pitches: Vec<u8> = notes(&tracks[1]).iter().map(|n| n.1).collect();
    assert_eq!(pitches, vec![72, 67]);
}

#[test]
fn builtin_and_declared_emoji() {
    let tracks = tracks("((🐸=(p=30))) #1 (🎻) c (🐸) d");
    let programs: Vec<u8> = tracks[1]
        .events
        .iter()
        .filter_map(|e| match e {
            TrackEvent::Program { program, .. } => Some(*program),
            _ => None,
        })
        .collect();
    assert_eq!(programs, vec![40, 30]);
}

#[test]
fn group_declaration_plays_and_reference_replays() {
    let tracks = tracks("#1 {1 cd} e {=1}");
    let pitches: Vec<u8> = notes(&tracks[1]).iter().map(|n| n.1).collect();
    assert_eq!(pitches, vec![60, 62, 64, 60, 62]);
}

#[test]
fn prima_and_seconda_volta() {
    let tracks = tracks("#1 |: c /1 d :| /2 e");
    let pitches: Vec<u8> = notes(&tracks[1]).iter().map(|n| n.1).collect();
    assert_eq!(pitches, vec![60, 62, 60, 64]);
}
