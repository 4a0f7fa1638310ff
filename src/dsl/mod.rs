//! Notation front end: comment stripping, then parsing into the AST.

pub mod ast;
pub mod error;
pub mod note;
pub mod parser;
pub mod preprocess;

pub use ast::*;
pub use error::{CompileError, ErrorKind};

use parser::Parser;
use preprocess::{strip_comments, Stripped};

/// Strip comments and parse.
///
/// Offsets inside the returned program point into `Stripped::text`; parse
/// errors are already remapped to the original source.
pub fn parse_source(source: &str) -> Result<(Program, Stripped), CompileError> {
    let stripped = strip_comments(source);
    let program = Parser::new(&stripped.text)
        .parse()
        .map_err(|e| e.remap(&stripped.map))?;
    Ok((program, stripped))
}
