//! Note names, MIDI pitch numbers and tick durations.

/// Ticks per quarter note.
pub const TICKS_PER_BEAT: u32 = 128;

/// Map a key character to its pitch class (0 = C, 11 = B).
///
/// Lowercase letters are naturals and `C D F G A` are their sharps. Korean
/// solfège syllables are accepted as naturals, sharps (`돗 렛 팟 솘 랏`) and
/// flats (`렢 밒 솚 랖 싶`).
pub fn pitch_class(key: char) -> Option<u8> {
    let class = match key {
        'c' | '도' => 0,
        'C' | '돗' | '렢' => 1,
        'd' | '레' => 2,
        'D' | '렛' | '밒' => 3,
        'e' | '미' => 4,
        'f' | '파' => 5,
        'F' | '팟' | '솚' => 6,
        'g' | '솔' => 7,
        'G' | '솘' | '랖' => 8,
        'a' | '라' => 9,
        'A' | '랏' | '싶' => 10,
        'b' | '시' => 11,
        _ => return None,
    };
    Some(class)
}

/// Compute a MIDI note number from octave, pitch class and a semitone shift.
///
/// C4 = 60. Returns `None` outside `0..=127`.
pub fn midi_pitch(octave: i32, class: u8, semitones: i32) -> Option<u8> {
    let midi = (octave + 1) * 12 + class as i32 + semitones;
    u8::try_from(midi).ok().filter(|m| *m <= 127)
}

/// The upper neighbor used by trills.
///
/// One semitone above E, B and sharps; a whole tone above everything else.
pub fn trill_neighbor(pitch: u8) -> Option<u8> {
    let step = match pitch % 12 {
        1 | 3 | 4 | 6 | 8 | 10 | 11 => 1,
        _ => 2,
    };
    Some(pitch + step).filter(|p| *p <= 127)
}

/// Parse a quantization value into ticks.
///
/// - `N`: a 1/N note (`4` = quarter, `16` = sixteenth)
/// - `dN` / `ddN`: dotted and double-dotted
/// - `TN`: raw ticks
pub fn parse_duration(value: &str) -> Option<u32> {
    if let Some(ticks) = value.strip_prefix('T') {
        return ticks.parse().ok();
    }
    let (dots, rest) = if let Some(rest) = value.strip_prefix("dd") {
        (2, rest)
    } else if let Some(rest) = value.strip_prefix('d') {
        (1, rest)
    } else {
        (0, value)
    };
    let denominator: u32 = rest.parse().ok()?;
    if denominator == 0 || (TICKS_PER_BEAT * 4) % denominator != 0 {
        return None;
    }
    let base = TICKS_PER_BEAT * 4 / denominator;
    Some(match dots {
        0 => base,
        1 => base + base / 2,
        _ => base + base / 2 + base / 4,
    })
}
