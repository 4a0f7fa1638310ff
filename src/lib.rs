//! Scorch is a compiler from compact text music notation to multi-track
//! MIDI files.

pub mod compiler;
pub mod config;
pub mod dsl;
pub mod smf;

pub use compiler::{Compiler, Highlight, Track, TrackEvent};
pub use config::CompilerConfig;
pub use dsl::{CompileError, ErrorKind, Program};

/// Compile notation to Standard MIDI File bytes with the default
/// configuration.
pub fn compile(source: &str) -> Result<Vec<u8>, CompileError> {
    Compiler::default().compile(source)
}
