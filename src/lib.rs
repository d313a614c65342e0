pub mod artifact;
pub mod ast;
pub mod bin_loader;
pub mod cache;
pub mod cancel;
pub mod catalog;
pub mod circuit;
pub mod compiler;
pub mod config;
pub mod deploy;
pub mod error;
pub mod export;
pub mod parser;
pub mod pipeline;
pub mod protocol;
pub mod provenance;
pub mod r1cs;
pub mod scalar;
pub mod witness;

pub use artifact::CompiledArtifact;
pub use catalog::{CircuitCatalog, CircuitDefinition};
pub use config::{PipelineConfig, ProofSystem};
pub use error::{PipelineError, Result, Stage};
pub use pipeline::{CompileOptions, Pipeline, PipelineRun};
pub use protocol::{KeyPair, Proof, ProvingBackend, SpartanBackend, VerificationKey};
pub use witness::{Argument, Witness};

// Catalog, Compiler, TrustedSetup, Prover, Verifier
//
// Circuit(private, public) -> outputs
// R1CS: Circuit(private, public) = outputs

// 1. Catalog
// name -> CircuitDefinition (source, signature, contract name)
//
// 2. Compiler
// CircuitDefinition -> CompiledArtifact (program, provenance)
//
// 3. TrustedSetup
// CompiledArtifact -> R1CS -> Gens, Commitment
// => KeyPair (bound to the artifact id)
//
// 4. Prover
// CompiledArtifact, Arguments -> Witness (outputs, public statement)
// ProvingKey, Witness -> Proof
//
// 5. Verifier
// VerificationKey, Proof, public statement -> accept / reject
// VerificationKey -> VerifierArtifact (direct, wrapped) -> DeploymentUnit
