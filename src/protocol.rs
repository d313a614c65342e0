// Parties: Compiler, TrustedSetup, Prover, Verifier
//
// Circuit(arguments) -> outputs
// R1CS: Circuit(private, public) =?= outputs
//
// 1. Compiler
//     Source -> CompiledArtifact (program, provenance)
//
// 2. TrustedSetup
//     CompiledArtifact -> R1CS
//     R1CS -> Gens
//     R1CS, Gens -> Commitment            (spartan-snark only)
//     => ProvingKey, VerificationKey
//
// 3. Prover
//     CompiledArtifact, Arguments -> Witness (vars, public statement)
//     ProvingKey, Witness -> Proof
//
// 4. Verifier
//     VerificationKey, Proof, public statement -> accept / reject
use std::{
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
    time::Instant,
};

use curve25519_dalek::Scalar;
use libspartan::{
    ComputationCommitment, ComputationDecommitment, Instance, NIZKGens, SNARKGens, NIZK, SNARK,
};
use merlin::Transcript;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    artifact::CompiledArtifact,
    cancel::CancellationToken,
    catalog::CircuitDefinition,
    compiler::compile_source,
    config::ProofSystem,
    error::{PipelineError, Result, Stage},
    provenance::{Digest, Hasher, Provenance, COMPILER_VERSION},
    r1cs::{into_r1cs, R1csShape, R1CS},
    witness::{self, Argument, Witness},
};

/// The proving capability the pipeline drives. Provenance checks between stages
/// are the pipeline's job; implementations only transform their inputs.
pub trait ProvingBackend: Send + Sync {
    /// Versioned identity, recorded as the compiler version of every artifact.
    fn id(&self) -> &str;

    fn supports(&self, proof_system: ProofSystem) -> bool;

    fn compile(
        &self,
        definition: &CircuitDefinition,
        proof_system: ProofSystem,
        comparison_bits: u32,
        cancel: &CancellationToken,
    ) -> Result<CompiledArtifact>;

    fn compute_witness(&self, artifact: &CompiledArtifact, arguments: &[Argument])
        -> Result<Witness>;

    fn setup(&self, artifact: &CompiledArtifact, cancel: &CancellationToken) -> Result<KeyPair>;

    fn prove(&self, artifact: &CompiledArtifact, witness: &Witness, key: &ProvingKey)
        -> Result<Proof>;

    fn verify(&self, key: &VerificationKey, proof: &Proof, public_inputs: &[Scalar])
        -> Result<bool>;
}

enum ProverMaterial {
    Snark {
        gens: Arc<SNARKGens>,
        comm: Arc<ComputationCommitment>,
        decomm: Arc<ComputationDecommitment>,
    },
    Nizk {
        gens: Arc<NIZKGens>,
    },
}

enum VerifierMaterial {
    Snark {
        gens: Arc<SNARKGens>,
        comm: Arc<ComputationCommitment>,
    },
    Nizk {
        gens: Arc<NIZKGens>,
        instance: Arc<Instance>,
    },
}

pub struct ProvingKey {
    pub key_id: Digest,
    pub artifact_id: Digest,
    pub proof_system: ProofSystem,
    transcript_label: String,
    r1cs: Arc<R1CS>,
    instance: Arc<Instance>,
    material: ProverMaterial,
}

impl fmt::Debug for ProvingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvingKey")
            .field("key_id", &self.key_id)
            .field("artifact_id", &self.artifact_id)
            .field("proof_system", &self.proof_system)
            .field("shape", &self.r1cs.shape)
            .finish()
    }
}

/// Everything a third party needs to check proofs for one compiled artifact.
///
/// Only the constraint matrices are serialized; generators and the matrix
/// commitment are derived from them deterministically on first use.
#[derive(Clone, Serialize, Deserialize)]
pub struct VerificationKey {
    pub key_id: Digest,
    pub artifact_id: Digest,
    pub circuit: String,
    pub proof_system: ProofSystem,
    pub transcript_label: String,
    r1cs: R1CS,
    #[serde(skip)]
    material: Arc<OnceCell<VerifierMaterial>>,
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationKey")
            .field("key_id", &self.key_id)
            .field("artifact_id", &self.artifact_id)
            .field("circuit", &self.circuit)
            .field("proof_system", &self.proof_system)
            .field("shape", &self.r1cs.shape)
            .finish()
    }
}

impl VerificationKey {
    pub fn shape(&self) -> R1csShape {
        self.r1cs.shape
    }

    pub fn num_public_inputs(&self) -> usize {
        self.r1cs.shape.num_inputs
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decodes a key and checks that its id matches its contents.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let malformed = |message: String| PipelineError::MalformedInput {
            stage: Stage::Verification,
            message,
        };
        let key: VerificationKey = bincode::deserialize(bytes)
            .map_err(|e| malformed(format!("undecodable verification key: {e}")))?;
        let expected = derive_key_id(
            &key.artifact_id,
            key.proof_system,
            &key.transcript_label,
            &key.r1cs,
        )?;
        if expected != key.key_id {
            return Err(malformed(format!(
                "verification key claims id {} but its contents hash to {}",
                key.key_id, expected
            )));
        }
        Ok(key)
    }

    fn material(&self) -> Result<&VerifierMaterial> {
        self.material.get_or_try_init(|| {
            debug!(circuit = %self.circuit, "deriving verifier generators");
            let shape = self.r1cs.shape;
            let instance = self.r1cs.instance().map_err(|message| PipelineError::MalformedInput {
                stage: Stage::Verification,
                message,
            })?;
            Ok(match self.proof_system {
                ProofSystem::SpartanSnark => {
                    let gens = snark_gens(&shape);
                    let (comm, _) = SNARK::encode(&instance, &gens);
                    VerifierMaterial::Snark {
                        gens: Arc::new(gens),
                        comm: Arc::new(comm),
                    }
                }
                ProofSystem::SpartanNizk => VerifierMaterial::Nizk {
                    gens: Arc::new(nizk_gens(&shape)),
                    instance: Arc::new(instance),
                },
            })
        })
    }

    /// `Ok(false)` for a proof made under another key or failing the check; an error
    /// only when the public statement has the wrong length.
    pub fn verify(&self, proof: &Proof, public_inputs: &[Scalar]) -> Result<bool> {
        if proof.key_id != self.key_id || proof.artifact_id != self.artifact_id {
            warn!(
                circuit = %self.circuit,
                expected = %self.key_id,
                found = %proof.key_id,
                "proof was produced under a different key"
            );
            return Ok(false);
        }
        let inputs = self
            .r1cs
            .inputs_assignment(public_inputs)
            .map_err(|message| PipelineError::MalformedInput {
                stage: Stage::Verification,
                message,
            })?;
        let material = self.material()?;

        let mut transcript = transcript(&self.transcript_label, &self.key_id);
        // proofs are untrusted input; a malformed one must not take the verifier down
        let verified = catch_unwind(AssertUnwindSafe(|| match (&proof.inner, material) {
            (SchemeProof::Snark(proof), VerifierMaterial::Snark { gens, comm }) => {
                proof.verify(comm, &inputs, &mut transcript, gens).is_ok()
            }
            (SchemeProof::Nizk(proof), VerifierMaterial::Nizk { gens, instance }) => {
                proof.verify(instance, &inputs, &mut transcript, gens).is_ok()
            }
            _ => false,
        }))
        .unwrap_or(false);
        if !verified {
            warn!(circuit = %self.circuit, key = %self.key_id, "proof rejected");
        }
        Ok(verified)
    }
}

pub struct KeyPair {
    pub proving_key: ProvingKey,
    pub verification_key: VerificationKey,
}

impl KeyPair {
    pub fn key_id(&self) -> Digest {
        self.verification_key.key_id
    }

    pub fn artifact_id(&self) -> Digest {
        self.verification_key.artifact_id
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("key_id", &self.key_id())
            .field("artifact_id", &self.artifact_id())
            .finish()
    }
}

#[derive(Serialize, Deserialize)]
enum SchemeProof {
    Snark(SNARK),
    Nizk(NIZK),
}

#[derive(Serialize, Deserialize)]
pub struct Proof {
    pub circuit: String,
    pub artifact_id: Digest,
    pub key_id: Digest,
    pub witness_id: Digest,
    pub proof_system: ProofSystem,
    inner: SchemeProof,
}

impl Proof {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| PipelineError::MalformedInput {
            stage: Stage::Verification,
            message: format!("undecodable proof: {e}"),
        })
    }
}

impl fmt::Debug for Proof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proof")
            .field("circuit", &self.circuit)
            .field("artifact_id", &self.artifact_id)
            .field("key_id", &self.key_id)
            .field("witness_id", &self.witness_id)
            .field("proof_system", &self.proof_system)
            .finish()
    }
}

fn snark_gens(shape: &R1csShape) -> SNARKGens {
    SNARKGens::new(
        shape.num_cons,
        shape.num_vars,
        shape.num_inputs,
        shape.num_non_zero_entries,
    )
}

fn nizk_gens(shape: &R1csShape) -> NIZKGens {
    NIZKGens::new(shape.num_cons, shape.num_vars, shape.num_inputs)
}

fn transcript(label: &str, key_id: &Digest) -> Transcript {
    let mut transcript = Transcript::new(b"zk-circuit-pipeline");
    transcript.append_message(b"label", label.as_bytes());
    transcript.append_message(b"key", &key_id.0);
    transcript
}

fn derive_key_id(
    artifact_id: &Digest,
    proof_system: ProofSystem,
    transcript_label: &str,
    r1cs: &R1CS,
) -> Result<Digest> {
    let matrices = bincode::serialize(r1cs)?;
    Ok(Hasher::new("key-pair")
        .digest(artifact_id)
        .str(proof_system.as_str())
        .str(transcript_label)
        .digest(&Digest::of("r1cs", &matrices))
        .finish())
}

fn backend_error(stage: Stage, circuit: &str, message: String) -> PipelineError {
    PipelineError::Backend {
        stage,
        circuit: circuit.to_string(),
        message,
    }
}

/// Compiler for the circuit language plus both Spartan modes.
pub struct SpartanBackend {
    id: String,
    transcript_label: String,
}

impl SpartanBackend {
    pub fn new(transcript_label: impl Into<String>) -> Self {
        Self {
            id: COMPILER_VERSION.to_string(),
            transcript_label: transcript_label.into(),
        }
    }
}

impl ProvingBackend for SpartanBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn supports(&self, proof_system: ProofSystem) -> bool {
        matches!(
            proof_system,
            ProofSystem::SpartanSnark | ProofSystem::SpartanNizk
        )
    }

    fn compile(
        &self,
        definition: &CircuitDefinition,
        proof_system: ProofSystem,
        comparison_bits: u32,
        cancel: &CancellationToken,
    ) -> Result<CompiledArtifact> {
        cancel.check(Stage::Compilation, &definition.name)?;
        let program = compile_source(&definition.source, &definition.signature, comparison_bits)
            .map_err(|error| PipelineError::Compilation {
                circuit: definition.name.clone(),
                error,
            })?;
        cancel.check(Stage::Compilation, &definition.name)?;
        let provenance = Provenance::new(
            &definition.name,
            &definition.source,
            &self.id,
            proof_system,
            comparison_bits,
        );
        Ok(CompiledArtifact::new(
            provenance,
            &definition.contract_name,
            definition.signature.clone(),
            program,
        ))
    }

    fn compute_witness(
        &self,
        artifact: &CompiledArtifact,
        arguments: &[Argument],
    ) -> Result<Witness> {
        witness::compute(artifact, arguments)
    }

    fn setup(&self, artifact: &CompiledArtifact, cancel: &CancellationToken) -> Result<KeyPair> {
        let circuit = artifact.name();
        cancel.check(Stage::Setup, circuit)?;
        let r1cs = Arc::new(into_r1cs(&artifact.program));
        let shape = r1cs.shape;
        let instance = Arc::new(
            r1cs.instance()
                .map_err(|message| backend_error(Stage::Setup, circuit, message))?,
        );
        let proof_system = artifact.provenance.proof_system;
        let key_id = derive_key_id(&artifact.id(), proof_system, &self.transcript_label, &r1cs)?;
        cancel.check(Stage::Setup, circuit)?;

        let start = Instant::now();
        let (prover, verifier) = match proof_system {
            ProofSystem::SpartanSnark => {
                let gens = Arc::new(snark_gens(&shape));
                cancel.check(Stage::Setup, circuit)?;
                let (comm, decomm) = SNARK::encode(&instance, &gens);
                let comm = Arc::new(comm);
                (
                    ProverMaterial::Snark {
                        gens: Arc::clone(&gens),
                        comm: Arc::clone(&comm),
                        decomm: Arc::new(decomm),
                    },
                    VerifierMaterial::Snark { gens, comm },
                )
            }
            ProofSystem::SpartanNizk => {
                let gens = Arc::new(nizk_gens(&shape));
                (
                    ProverMaterial::Nizk {
                        gens: Arc::clone(&gens),
                    },
                    VerifierMaterial::Nizk {
                        gens,
                        instance: Arc::clone(&instance),
                    },
                )
            }
        };
        cancel.check(Stage::Setup, circuit)?;
        debug!(
            circuit,
            num_cons = shape.num_cons,
            num_vars = shape.num_vars,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "generators ready"
        );

        Ok(KeyPair {
            proving_key: ProvingKey {
                key_id,
                artifact_id: artifact.id(),
                proof_system,
                transcript_label: self.transcript_label.clone(),
                r1cs: Arc::clone(&r1cs),
                instance,
                material: prover,
            },
            verification_key: VerificationKey {
                key_id,
                artifact_id: artifact.id(),
                circuit: circuit.to_string(),
                proof_system,
                transcript_label: self.transcript_label.clone(),
                r1cs: R1CS::clone(&r1cs),
                material: Arc::new(OnceCell::with_value(verifier)),
            },
        })
    }

    fn prove(&self, artifact: &CompiledArtifact, witness: &Witness, key: &ProvingKey) -> Result<Proof> {
        let circuit = artifact.name();
        let vars = key
            .r1cs
            .vars_assignment(&witness.vars)
            .map_err(|message| backend_error(Stage::Proof, circuit, message))?;
        let inputs = key
            .r1cs
            .inputs_assignment(&witness.public_inputs)
            .map_err(|message| backend_error(Stage::Proof, circuit, message))?;

        let start = Instant::now();
        let mut transcript = transcript(&key.transcript_label, &key.key_id);
        let inner = match &key.material {
            ProverMaterial::Snark { gens, comm, decomm } => SchemeProof::Snark(SNARK::prove(
                &key.instance,
                comm,
                decomm,
                vars,
                &inputs,
                gens,
                &mut transcript,
            )),
            ProverMaterial::Nizk { gens } => SchemeProof::Nizk(NIZK::prove(
                &key.instance,
                vars,
                &inputs,
                gens,
                &mut transcript,
            )),
        };
        info!(
            circuit,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "proof generated"
        );
        Ok(Proof {
            circuit: circuit.to_string(),
            artifact_id: artifact.id(),
            key_id: key.key_id,
            witness_id: witness.witness_id,
            proof_system: key.proof_system,
            inner,
        })
    }

    fn verify(&self, key: &VerificationKey, proof: &Proof, public_inputs: &[Scalar]) -> Result<bool> {
        key.verify(proof, public_inputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ast::Signature, catalog::CircuitCatalog};

    fn backend() -> SpartanBackend {
        SpartanBackend::new("test")
    }

    fn a_square(proof_system: ProofSystem) -> CompiledArtifact {
        let def = CircuitCatalog::builtin().get("a_square").unwrap();
        backend()
            .compile(&def, proof_system, 64, &CancellationToken::new())
            .unwrap()
    }

    fn prove(artifact: &CompiledArtifact, keys: &KeyPair, a: u64) -> (Witness, Proof) {
        let backend = backend();
        let witness = backend.compute_witness(artifact, &[a.into()]).unwrap();
        let proof = backend.prove(artifact, &witness, &keys.proving_key).unwrap();
        (witness, proof)
    }

    #[test]
    fn test_snark_roundtrip() {
        let artifact = a_square(ProofSystem::SpartanSnark);
        let keys = backend().setup(&artifact, &CancellationToken::new()).unwrap();
        let (witness, proof) = prove(&artifact, &keys, 2);
        assert_eq!(witness.outputs, vec![Scalar::from(4u32)]);
        assert_eq!(proof.key_id, keys.key_id());
        assert!(keys.verification_key.verify(&proof, &witness.public_inputs).unwrap());
        assert!(!keys
            .verification_key
            .verify(&proof, &[Scalar::from(5u32)])
            .unwrap());
    }

    #[test]
    fn test_nizk_roundtrip() {
        let artifact = a_square(ProofSystem::SpartanNizk);
        let keys = backend().setup(&artifact, &CancellationToken::new()).unwrap();
        let (witness, proof) = prove(&artifact, &keys, 3);
        assert_eq!(proof.proof_system, ProofSystem::SpartanNizk);
        assert!(keys.verification_key.verify(&proof, &witness.public_inputs).unwrap());
        assert!(!keys
            .verification_key
            .verify(&proof, &[Scalar::from(10u32)])
            .unwrap());
    }

    #[test]
    fn test_wrong_statement_length_is_malformed() {
        let artifact = a_square(ProofSystem::SpartanSnark);
        let keys = backend().setup(&artifact, &CancellationToken::new()).unwrap();
        let (_, proof) = prove(&artifact, &keys, 2);
        let err = keys
            .verification_key
            .verify(&proof, &[Scalar::from(4u32), Scalar::ONE])
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::MalformedInput {
                stage: Stage::Verification,
                ..
            }
        ));
    }

    #[test]
    fn test_setup_is_deterministic() {
        let artifact = a_square(ProofSystem::SpartanSnark);
        let k1 = backend().setup(&artifact, &CancellationToken::new()).unwrap();
        let k2 = backend().setup(&artifact, &CancellationToken::new()).unwrap();
        assert_eq!(k1.key_id(), k2.key_id());

        // a proof made with one setup verifies under the other
        let (witness, proof) = prove(&artifact, &k1, 5);
        assert!(k2.verification_key.verify(&proof, &witness.public_inputs).unwrap());
    }

    #[test]
    fn test_key_id_tracks_label_and_system() {
        let snark = a_square(ProofSystem::SpartanSnark);
        let nizk = a_square(ProofSystem::SpartanNizk);
        let cancel = CancellationToken::new();
        let k1 = backend().setup(&snark, &cancel).unwrap();
        let k2 = SpartanBackend::new("other").setup(&snark, &cancel).unwrap();
        let k3 = backend().setup(&nizk, &cancel).unwrap();
        assert_ne!(k1.key_id(), k2.key_id());
        assert_ne!(k1.key_id(), k3.key_id());
    }

    #[test]
    fn test_verification_key_serialization() {
        let artifact = a_square(ProofSystem::SpartanSnark);
        let keys = backend().setup(&artifact, &CancellationToken::new()).unwrap();
        let (witness, proof) = prove(&artifact, &keys, 7);

        let bytes = keys.verification_key.to_bytes().unwrap();
        let restored = VerificationKey::from_bytes(&bytes).unwrap();
        assert_eq!(restored.key_id, keys.key_id());

        let proof = Proof::from_bytes(&proof.to_bytes().unwrap()).unwrap();
        assert!(restored.verify(&proof, &witness.public_inputs).unwrap());
    }

    #[test]
    fn test_verification_key_integrity() {
        let artifact = a_square(ProofSystem::SpartanSnark);
        let keys = backend().setup(&artifact, &CancellationToken::new()).unwrap();
        let mut forged = keys.verification_key.clone();
        forged.key_id = Digest([7; 32]);
        let err = VerificationKey::from_bytes(&forged.to_bytes().unwrap()).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedInput { .. }));
        assert!(VerificationKey::from_bytes(b"nope").is_err());
    }

    #[test]
    fn test_foreign_proof_is_rejected() {
        let square = a_square(ProofSystem::SpartanSnark);
        let def = CircuitDefinition::new(
            "a_cube",
            "ACubeCircuit",
            Signature::new().private_field("a").returns_field(),
            "def main(private field a) -> field { return a * a * a; }",
        );
        let cube = backend()
            .compile(&def, ProofSystem::SpartanSnark, 64, &CancellationToken::new())
            .unwrap();
        let cancel = CancellationToken::new();
        let square_keys = backend().setup(&square, &cancel).unwrap();
        let cube_keys = backend().setup(&cube, &cancel).unwrap();

        let (witness, proof) = prove(&cube, &cube_keys, 2);
        assert!(!square_keys
            .verification_key
            .verify(&proof, &witness.public_inputs)
            .unwrap());
    }

    #[test]
    fn test_setup_cancelled() {
        let artifact = a_square(ProofSystem::SpartanSnark);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = backend().setup(&artifact, &cancel).unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.stage(), Some(Stage::Setup));
    }

    #[test]
    fn test_compile_error() {
        let def = CircuitDefinition::new(
            "broken",
            "Broken",
            Signature::new().returns_field(),
            "def main() -> field { return x; }",
        );
        let err = backend()
            .compile(&def, ProofSystem::SpartanSnark, 64, &CancellationToken::new())
            .unwrap_err();
        match err {
            PipelineError::Compilation { circuit, error } => {
                assert_eq!(circuit, "broken");
                assert!(error.message.contains("undeclared variable `x`"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
