use std::{fmt, io, path::PathBuf};

use thiserror::Error;

use crate::{ast::Location, config::ProofSystem, provenance::Digest};

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Catalog,
    Compilation,
    Witness,
    Setup,
    Proof,
    Verification,
    Export,
    Deployment,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Catalog => "catalog",
            Stage::Compilation => "compile",
            Stage::Witness => "witness",
            Stage::Setup => "setup",
            Stage::Proof => "prove",
            Stage::Verification => "verify",
            Stage::Export => "export",
            Stage::Deployment => "deploy",
        };
        f.write_str(name)
    }
}

/// Source-level failure reported by the parser and compiler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{location}: {message}")]
pub struct CompilationError {
    pub location: Location,
    pub message: String,
}

impl CompilationError {
    pub fn new(location: Location, message: impl Into<String>) -> Self {
        Self {
            location,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("[catalog] circuit `{name}` is not registered")]
    NotFound { name: String },

    #[error("[catalog] circuit `{name}` is registered twice")]
    DuplicateCircuit { name: String },

    #[error("[compile] circuit `{circuit}`: {error}")]
    Compilation {
        circuit: String,
        #[source]
        error: CompilationError,
    },

    #[error("[compile] circuit `{circuit}` targets {requested}, backend `{backend}` does not support it")]
    UnsupportedProofSystem {
        circuit: String,
        requested: ProofSystem,
        backend: String,
    },

    #[error("[witness] circuit `{circuit}`: {message}")]
    Arity { circuit: String, message: String },

    #[error("[witness] circuit `{circuit}`: {message}")]
    Range { circuit: String, message: String },

    #[error("[witness] circuit `{circuit}`: assertion `{assertion}` at {location} does not hold")]
    ConstraintViolation {
        circuit: String,
        location: Location,
        assertion: String,
    },

    #[error("[setup] circuit `{circuit}` has {constraints} constraints, capacity is {capacity}")]
    Setup {
        circuit: String,
        constraints: usize,
        capacity: usize,
    },

    #[error("[{stage}] {what} was derived from artifact {found}, expected {expected}")]
    ProvenanceMismatch {
        stage: Stage,
        what: &'static str,
        expected: Digest,
        found: Digest,
    },

    #[error("[{stage}] malformed input: {message}")]
    MalformedInput { stage: Stage, message: String },

    #[error("[{stage}] circuit `{circuit}` was cancelled")]
    Cancelled { stage: Stage, circuit: String },

    #[error("[compile] {} already holds artifact {existing}, refusing to replace it with {incoming}", .path.display())]
    ArtifactConflict {
        path: PathBuf,
        existing: Digest,
        incoming: Digest,
    },

    #[error("[{stage}] {} is not a valid artifact: {reason}", .path.display())]
    CorruptArtifact {
        stage: Stage,
        path: PathBuf,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("[{stage}] circuit `{circuit}`: backend failure: {message}")]
    Backend {
        stage: Stage,
        circuit: String,
        message: String,
    },

    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("encoding error: {0}")]
    Codec(#[from] bincode::Error),
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::NotFound { .. } | PipelineError::DuplicateCircuit { .. } => {
                Some(Stage::Catalog)
            }
            PipelineError::Compilation { .. }
            | PipelineError::UnsupportedProofSystem { .. }
            | PipelineError::ArtifactConflict { .. } => Some(Stage::Compilation),
            PipelineError::Arity { .. }
            | PipelineError::Range { .. }
            | PipelineError::ConstraintViolation { .. } => Some(Stage::Witness),
            PipelineError::Setup { .. } => Some(Stage::Setup),
            PipelineError::ProvenanceMismatch { stage, .. }
            | PipelineError::MalformedInput { stage, .. }
            | PipelineError::Cancelled { stage, .. }
            | PipelineError::CorruptArtifact { stage, .. }
            | PipelineError::Backend { stage, .. } => Some(*stage),
            PipelineError::Config(_) | PipelineError::Io { .. } | PipelineError::Codec(_) => {
                None
            }
        }
    }

    /// An assertion inside the circuit rejected otherwise well-formed inputs.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, PipelineError::ConstraintViolation { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled { .. })
    }
}
