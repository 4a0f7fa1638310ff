//! Semantic compiler: turns parsed notation into tracks.
//!
//! [`Compiler`] wires the pipeline together: comment stripping and parsing
//! ([`crate::dsl`]), evaluation ([`session`]), track assembly ([`output`])
//! and serialization ([`crate::smf`]). Every offset handed back to callers
//! points into the original source.

pub mod channel;
pub mod diacritic;
pub mod output;
pub mod registry;
pub mod session;
pub mod timing;

pub use output::{Track, TrackEvent};
pub use timing::Highlight;

use tracing::debug;

use crate::config::CompilerConfig;
use crate::dsl::preprocess::Stripped;
use crate::dsl::{parse_source, CompileError, Program};
use crate::smf;

use session::Session;
use timing::TempoMap;

#[derive(Debug, Clone, Default)]
pub struct Compiler {
    config: CompilerConfig,
}

impl Compiler {
    pub fn new(config: CompilerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Parse only. Node offsets point into the comment-stripped text.
    pub fn parse(&self, source: &str) -> Result<Program, CompileError> {
        parse_source(source).map(|(program, _)| program)
    }

    /// Compile to the track list handed to the SMF writer.
    pub fn compile_tracks(&self, source: &str) -> Result<Vec<Track>, CompileError> {
        let (session, _) = self.evaluate(source)?;
        Ok(output::assemble(
            session.global(),
            session.timelines(),
            session.channels(),
        ))
    }

    /// Compile to Standard MIDI File bytes.
    pub fn compile(&self, source: &str) -> Result<Vec<u8>, CompileError> {
        let tracks = self.compile_tracks(source)?;
        smf::write(&tracks)
            .map_err(|e| CompileError::structural(format!("Failed to write MIDI: {e}"), 0))
    }

    /// When each note sounds, in milliseconds.
    pub fn compute_timeline(&self, source: &str) -> Result<Vec<Highlight>, CompileError> {
        let (session, stripped) = self.evaluate(source)?;
        let tempo = TempoMap::new(session.global().tempo_changes());
        let mut highlights = timing::highlights(session.timelines(), &tempo);
        for highlight in &mut highlights {
            highlight.offset = stripped.original_offset(highlight.offset);
        }
        Ok(highlights)
    }

    fn evaluate(&self, source: &str) -> Result<(Session, Stripped), CompileError> {
        let (program, stripped) = parse_source(source)?;
        let mut session = Session::new(self.config.gas);
        session
            .run(&program)
            .map_err(|e| e.remap(&stripped.map))?;
        debug!(
            channels = session.channels().len(),
            gas_left = session.gas(),
            "compiled"
        );
        Ok((session, stripped))
    }
}
