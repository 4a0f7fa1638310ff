//! Error reporting: every rejected program names the problem and points at
//! the offending character of the original source.

use scorch::{CompileError, Compiler, CompilerConfig, ErrorKind};

fn error(source: &str) -> CompileError {
    match scorch::compile(source) {
        Ok(_) => panic!("expected {source:?} to fail"),
        Err(e) => e,
    }
}

/// Helper: the source text starting at the error offset.
fn at(source: &str, error: &CompileError) -> String {
    source.chars().skip(error.offset).collect()
}

#[test]
fn parse_errors() {
    let e = error("#1 cdz");
    assert_eq!(e.kind, ErrorKind::Parse);
    assert_eq!(e.offset, 5);

    assert_eq!(error("[[cd]]").message, "Useless parallel");
    assert_eq!(error("(x cd)").message, "Unknown range type: 'x'");
    assert_eq!(error("<? c>").message, "Unknown diacritic: '?'");
}

#[test]
fn unknown_references_point_at_the_reference() {
    let source = "#1 cd {=4}";
    let e = error(source);
    assert_eq!(e.message, "No such group: 4");
    assert_eq!(at(source, &e), "{=4}");

    let source = "#1 c {{nope}} (c)";
    let e = error(source);
    assert_eq!(e.message, "No such UDR: nope");
    assert_eq!(at(source, &e), "{{nope}} (c)");

    let source = "#1 c (🐸)";
    let e = error(source);
    assert_eq!(e.message, "No such emoji: 🐸");
    assert_eq!(at(source, &e), "(🐸)");
}

#[test]
fn duplicate_declarations() {
    assert_eq!(error("{1 c} {1 d}").message, "Already declared group: 1");
    assert_eq!(
        error("{{a}} {x} {{a}} {x}").message,
        "Already defined UDR: a"
    );
    assert_eq!(
        error("((🐸=(p=1))) ((🐸=(p=2)))").message,
        "Already declared emoji: 🐸"
    );
}

#[test]
fn runaway_self_reference() {
    let e = error("{1 c {=1}}");
    assert_eq!(e.message, "Too many nested references");
}

#[test]
fn channel_errors() {
    assert_eq!(error("#17 c").message, "Invalid channel ID: 17");
    assert_eq!(error("#1 c #~2 d").message, "No such channel: 2");
}

#[test]
fn configuration_errors() {
    assert_eq!(
        error("#1 (v=300) c").message,
        "Malformed local configuration: (v=300)"
    );
    assert_eq!(error("#1 (z=1) c").message, "Unknown local configuration: z");
    assert_eq!(error("((swing=1))").message, "Unknown global configuration: swing");
    assert_eq!(
        error("((time-sig=3/5))").message,
        "Malformed global configuration: ((time-sig=3/5))"
    );
}

#[test]
fn global_configuration_can_not_move_backwards() {
    let source = "#1 cdef ((bpm=90)) #2 c ((bpm=100))";
    let e = error(source);
    assert_eq!(e.message, "Global variables can not intersect each other");
    assert_eq!(at(source, &e), "((bpm=100))");
}

#[test]
fn tie_needs_something_to_extend() {
    assert_eq!(error("#1 ~ c").message, "Malformed tie");
}

#[test]
fn tuplet_errors() {
    assert_eq!(error("#1 (3(3ccc))").message, "Tuplets can not be folded");
    assert_eq!(
        error("#1 (3c(q=8)cc)").message,
        "Quantization can not change inside a tuplet"
    );
}

#[test]
fn parallel_length_mismatch() {
    let source = "#1 [[cd|e]]";
    let e = error(source);
    assert_eq!(e.message, "Parallel branches differ in length: 64 and 32 ticks");
    assert_eq!(e.kind, ErrorKind::Semantic);
}

#[test]
fn ornament_errors() {
    assert_eq!(
        error("#1 (v=100) <+ cd 90>").message,
        "Useless crescendo: 100 to 90"
    );
    assert_eq!(error("#1 <+ __ 100>").message, "Dynamics without any note");
    assert_eq!(
        error("#1 (q=32) [>de]c").message,
        "Grace notes are longer than the note"
    );
    assert_eq!(
        error("#1 c [>d]~").message,
        "Grace notes can not decorate a tie"
    );
    assert_eq!(
        error("#1 (q=32) [|cegb]").message,
        "Arpeggio is longer than its chord"
    );
}

#[test]
fn placeholder_outside_user_range() {
    let e = error("#1 cx");
    assert_eq!(e.kind, ErrorKind::Structural);
    assert_eq!(e.offset, 4);
}

#[test]
fn repeat_errors() {
    let source = "#1 c |: d";
    let e = error(source);
    assert_eq!(e.message, "Incomplete repeat");
    assert_eq!(at(source, &e), "|: d");

    assert_eq!(error("#1 |: c |: d :|").message, "Already opened repeat");
    assert_eq!(error("#1 c /1 d").message, "Unexpected prima volta");
    assert_eq!(error("#1 |: c /1 d /1 e :|").message, "Duplicated prima volta");
    assert_eq!(error("#1 |: c :| /2 d").message, "Unexpected seconda volta");
    let source = "#1 |: c /1 d :| e /2 f";
    let e = error(source);
    assert_eq!(e.message, "Unexpected seconda volta");
    assert_eq!(at(source, &e), "/2 f");
    assert_eq!(
        error("#1 |: c /1 d :|3").message,
        "Prima volta can exist only if the repeat is played twice"
    );
}

#[test]
fn gas_runs_out() {
    let compiler = Compiler::new(CompilerConfig { gas: 50 });
    let source = "c".repeat(60);
    let e = compiler.compile(&source).unwrap_err();
    assert_eq!(e.message, "Not enough gas");
    assert_eq!(e.kind, ErrorKind::Resource);
    assert!(compiler.compile(&"c".repeat(40)).is_ok());

    let e = compiler.compile("{1 c {=1}}").unwrap_err();
    assert_eq!(e.kind, ErrorKind::Resource);
}

#[test]
fn huge_repeat_count_runs_out_of_gas() {
    let compiler = Compiler::new(CompilerConfig { gas: 50 });
    let source = "#1 |: c :|30000000";
    let e = compiler.compile(source).unwrap_err();
    assert_eq!(e.kind, ErrorKind::Resource);
    assert_eq!(at(source, &e), ":|30000000");
}

#[test]
fn dynamics_cost_one_pass_of_gas() {
    let source = "(v=40) <+ cdef 100>";
    assert!(Compiler::new(CompilerConfig { gas: 7 }).compile(source).is_ok());
    let e = Compiler::new(CompilerConfig { gas: 6 })
        .compile(source)
        .unwrap_err();
    assert_eq!(e.kind, ErrorKind::Resource);
}

#[test]
fn out_of_range_settings_are_malformed() {
    assert_eq!(
        error("#1 (o=2147483647) (^c)").message,
        "Malformed local configuration: (o=2147483647)"
    );
    assert_eq!(
        error("#1 (q=T3000000000) (3 c)").message,
        "Malformed local configuration: (q=T3000000000)"
    );
    assert_eq!(
        error("#1 (t=-128) c").message,
        "Malformed local configuration: (t=-128)"
    );
    assert_eq!(
        error("((fermata=17)) #1 <~c>").message,
        "Malformed global configuration: ((fermata=17))"
    );
}

#[test]
fn overlong_song() {
    let e = error("((fermata=16)) #1 (q=T8192) |: <~c> :|1100");
    assert_eq!(e.message, "Song is too long");
    assert_eq!(e.kind, ErrorKind::Semantic);
}

#[test]
fn offsets_skip_comments() {
    let source = "/= a comment with {=9}\n#1 c {=9}";
    let e = error(source);
    assert_eq!(at(source, &e), "{=9}");
}

#[test]
fn display_includes_offset_and_kind() {
    let e = error("#1 {=2}");
    assert_eq!(e.to_string(), "#3 Semantic: No such group: 2");
}
