//! Step-by-step, rewindable debugging of tapscript spends.
//!
//! Scripts and witnesses are written in a small assembly language
//! ([`compile_script`], [`compile_witness`]); `<sig:ID>` witness elements are
//! signed lazily by a [`SigningContext`] once the spending transaction is
//! known. A [`StepController`] runs an [`Interpreter`] on a worker thread and
//! lets the caller move forward and backward through the visible steps.

pub mod core;

pub use crate::core::*;

/// Any error the library can report to a command-line front end.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Signing(#[from] SigningError),
    #[error(transparent)]
    Spend(#[from] SpendError),
    #[error(transparent)]
    Interpreter(#[from] InterpreterError),
    #[error(transparent)]
    Merkle(#[from] MerkleError),
    #[error(transparent)]
    ScriptNum(#[from] ScriptNumError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Usage(String),
}
