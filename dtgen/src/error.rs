use std::{fmt, io, path::PathBuf};

use crate::{
    bindings::SchemaError, codegen::CodegenError, config::ConfigError, resolve::ResolveError,
    transform::TransformError,
};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Any failure of a compilation run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("syntax error in {}", path.display())]
    Syntax {
        path: PathBuf,
        /// The full source text, kept for error reporting.
        text: String,
        #[source]
        source: dts_parser::Error,
    },
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Codegen(#[from] CodegenError),
}

impl From<fmt::Error> for Error {
    fn from(err: fmt::Error) -> Self {
        Error::Codegen(CodegenError::Format(err))
    }
}
