use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    ast::Signature,
    bin_loader::{load_from_file, save_to_file},
    circuit::CompiledProgram,
    error::{PipelineError, Result, Stage},
    provenance::{Digest, Provenance},
    r1cs::{into_r1cs, R1csShape},
};

/// Abstract size of a compiled circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub num_constraints: usize,
    pub num_variables: usize,
    pub num_public_inputs: usize,
    pub num_private_arguments: usize,
    pub num_non_zero_entries: usize,
    /// Padded sizes handed to the proving system.
    pub shape: R1csShape,
}

impl ArtifactMetadata {
    pub fn of(program: &CompiledProgram) -> Self {
        let shape = into_r1cs(program).shape;
        Self {
            num_constraints: program.num_constraints(),
            num_variables: program.num_vars,
            num_public_inputs: program.num_inputs(),
            num_private_arguments: program.num_private_args(),
            num_non_zero_entries: shape.num_non_zero_entries,
            shape,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledArtifact {
    pub provenance: Provenance,
    pub contract_name: String,
    pub signature: Signature,
    pub program: CompiledProgram,
    pub metadata: ArtifactMetadata,
}

/// On-disk layout: provenance in the clear, the program as opaque bytes plus their digest.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedArtifact {
    provenance: Provenance,
    program_digest: Digest,
    program_bytes: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct ProgramPayload {
    contract_name: String,
    signature: Signature,
    program: CompiledProgram,
}

impl CompiledArtifact {
    pub fn new(
        provenance: Provenance,
        contract_name: impl Into<String>,
        signature: Signature,
        program: CompiledProgram,
    ) -> Self {
        let metadata = ArtifactMetadata::of(&program);
        Self {
            provenance,
            contract_name: contract_name.into(),
            signature,
            program,
            metadata,
        }
    }

    pub fn id(&self) -> Digest {
        self.provenance.artifact_id
    }

    pub fn name(&self) -> &str {
        &self.provenance.circuit
    }

    /// Writes the artifact atomically. A file holding the same artifact id is left as is;
    /// a file holding a different one is only replaced when `overwrite` is set.
    pub fn persist(&self, path: &Path, overwrite: bool) -> Result<()> {
        if path.exists() {
            match read_persisted(path) {
                Ok(existing) if existing.provenance.artifact_id == self.id() => {
                    debug!(path = %path.display(), "artifact already persisted");
                    return Ok(());
                }
                Ok(existing) if !overwrite => {
                    return Err(PipelineError::ArtifactConflict {
                        path: path.to_path_buf(),
                        existing: existing.provenance.artifact_id,
                        incoming: self.id(),
                    });
                }
                Err(e) if !overwrite => return Err(e),
                _ => warn!(
                    path = %path.display(),
                    artifact = %self.id(),
                    "overwriting existing artifact"
                ),
            }
        }

        let program_bytes = bincode::serialize(&ProgramPayload {
            contract_name: self.contract_name.clone(),
            signature: self.signature.clone(),
            program: self.program.clone(),
        })?;
        let persisted = PersistedArtifact {
            provenance: self.provenance.clone(),
            program_digest: Digest::of("compiled-program", &program_bytes),
            program_bytes,
        };
        save_to_file(&persisted, path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let persisted = read_persisted(path)?;
        let corrupt = |reason: String| PipelineError::CorruptArtifact {
            stage: Stage::Compilation,
            path: path.to_path_buf(),
            reason,
        };
        let payload: ProgramPayload = bincode::deserialize(&persisted.program_bytes)
            .map_err(|e| corrupt(format!("undecodable program: {e}")))?;
        payload
            .program
            .validate()
            .map_err(|e| corrupt(format!("malformed program: {e}")))?;
        Ok(Self::new(
            persisted.provenance,
            payload.contract_name,
            payload.signature,
            payload.program,
        ))
    }
}

fn read_persisted(path: &Path) -> Result<PersistedArtifact> {
    let corrupt = |reason: String| PipelineError::CorruptArtifact {
        stage: Stage::Compilation,
        path: path.to_path_buf(),
        reason,
    };
    let persisted: PersistedArtifact = load_from_file(path).map_err(|e| match e {
        PipelineError::Codec(e) => corrupt(e.to_string()),
        other => other,
    })?;
    if Digest::of("compiled-program", &persisted.program_bytes) != persisted.program_digest {
        return Err(corrupt("program digest mismatch".to_string()));
    }
    Ok(persisted)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::{
        compiler::compile_source,
        config::ProofSystem,
        provenance::COMPILER_VERSION,
    };

    fn artifact(source: &str) -> CompiledArtifact {
        let signature = Signature::new().private_field("a").returns_field();
        let program = compile_source(source, &signature, 64).unwrap();
        let provenance = Provenance::new(
            "a_square",
            source,
            COMPILER_VERSION,
            ProofSystem::SpartanSnark,
            64,
        );
        CompiledArtifact::new(provenance, "ASquareCircuit", signature, program)
    }

    const SQUARE: &str = "def main(private field a) -> field { return a * a; }";
    const CUBE: &str = "def main(private field a) -> field { return a * a * a; }";

    #[test]
    fn test_metadata() {
        let artifact = artifact(SQUARE);
        assert_eq!(artifact.metadata.num_constraints, 3);
        assert_eq!(artifact.metadata.num_variables, 2);
        assert_eq!(artifact.metadata.num_public_inputs, 1);
        assert_eq!(artifact.metadata.num_private_arguments, 1);
        assert_eq!(artifact.metadata.shape.num_cons, 4);
    }

    #[test]
    fn test_persist_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a_square.artifact");
        let artifact = artifact(SQUARE);
        artifact.persist(&path, false).unwrap();
        assert_eq!(CompiledArtifact::load(&path).unwrap(), artifact);
        // same provenance: idempotent
        artifact.persist(&path, false).unwrap();
    }

    #[test]
    fn test_persist_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a_square.artifact");
        let square = artifact(SQUARE);
        let cube = artifact(CUBE);
        square.persist(&path, false).unwrap();

        match cube.persist(&path, false) {
            Err(PipelineError::ArtifactConflict {
                existing, incoming, ..
            }) => {
                assert_eq!(existing, square.id());
                assert_eq!(incoming, cube.id());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(CompiledArtifact::load(&path).unwrap(), square);

        cube.persist(&path, true).unwrap();
        assert_eq!(CompiledArtifact::load(&path).unwrap(), cube);
    }

    #[test]
    fn test_load_detects_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a_square.artifact");
        artifact(SQUARE).persist(&path, false).unwrap();

        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            CompiledArtifact::load(&path),
            Err(PipelineError::CorruptArtifact { .. })
        ));

        fs::write(&path, b"garbage").unwrap();
        assert!(matches!(
            CompiledArtifact::load(&path),
            Err(PipelineError::CorruptArtifact { .. })
        ));
    }
}
