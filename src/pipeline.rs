use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Instant};

use curve25519_dalek::Scalar;
use rayon::prelude::*;
use tracing::{debug, info, instrument};

use crate::{
    artifact::CompiledArtifact,
    cache::ProvenanceCache,
    cancel::{BackgroundTask, CancellationToken},
    catalog::{CircuitCatalog, CircuitDefinition},
    config::{PipelineConfig, ProofSystem},
    deploy::DeploymentUnit,
    error::{PipelineError, Result, Stage},
    export::{self, TargetPlatform, VerifierArtifact},
    protocol::{KeyPair, Proof, ProvingBackend, ProvingKey, SpartanBackend, VerificationKey},
    provenance::{Digest, Hasher, Provenance},
    witness::{Argument, Witness},
};

#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Where to persist the artifact, if anywhere.
    pub output_location: Option<PathBuf>,
    /// Overrides the configured proof system.
    pub target_proof_system: Option<ProofSystem>,
    pub overwrite: bool,
}

/// Everything produced by one full pass over a circuit.
#[derive(Debug)]
pub struct PipelineRun {
    pub artifact: Arc<CompiledArtifact>,
    pub witness: Witness,
    pub keys: Arc<KeyPair>,
    pub proof: Proof,
    pub verified: bool,
}

impl PipelineRun {
    pub fn outputs(&self) -> &[Scalar] {
        &self.witness.outputs
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    backend: Arc<dyn ProvingBackend>,
    artifacts: ProvenanceCache<CompiledArtifact>,
    keys: ProvenanceCache<KeyPair>,
}

fn mismatch(stage: Stage, what: &'static str, expected: Digest, found: Digest) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(PipelineError::ProvenanceMismatch {
            stage,
            what,
            expected,
            found,
        })
    }
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let backend = Arc::new(SpartanBackend::new(config.transcript_label.clone()));
        Self::with_backend(config, backend)
    }

    pub fn with_backend(config: PipelineConfig, backend: Arc<dyn ProvingBackend>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            backend,
            artifacts: ProvenanceCache::new(),
            keys: ProvenanceCache::new(),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn backend(&self) -> &dyn ProvingBackend {
        self.backend.as_ref()
    }

    pub fn compile(
        &self,
        definition: &CircuitDefinition,
        options: &CompileOptions,
    ) -> Result<Arc<CompiledArtifact>> {
        self.compile_with(definition, options, &CancellationToken::new())
    }

    #[instrument(skip_all, fields(circuit = %definition.name))]
    pub fn compile_with(
        &self,
        definition: &CircuitDefinition,
        options: &CompileOptions,
        cancel: &CancellationToken,
    ) -> Result<Arc<CompiledArtifact>> {
        let proof_system = options
            .target_proof_system
            .unwrap_or(self.config.proof_system);
        if !self.backend.supports(proof_system) {
            return Err(PipelineError::UnsupportedProofSystem {
                circuit: definition.name.clone(),
                requested: proof_system,
                backend: self.backend.id().to_string(),
            });
        }
        let bits = self.config.compiler.comparison_bits;

        let start = Instant::now();
        let compile = || self.backend.compile(definition, proof_system, bits, cancel);
        let artifact = if self.config.cache.enabled {
            let provenance = Provenance::new(
                &definition.name,
                &definition.source,
                self.backend.id(),
                proof_system,
                bits,
            );
            let key = Hasher::new("compile-cache")
                .str(&definition.name)
                .str(&definition.contract_name)
                .str(&definition.signature.to_string())
                .digest(&provenance.artifact_id)
                .finish();
            let (artifact, hit) = self.artifacts.get_or_try_insert_with(key, compile)?;
            if hit {
                debug!(artifact = %artifact.id(), "compile cache hit");
            }
            artifact
        } else {
            Arc::new(compile()?)
        };

        // nothing reaches the disk once cancellation has been requested
        cancel.check(Stage::Compilation, &definition.name)?;
        if let Some(path) = &options.output_location {
            artifact.persist(path, options.overwrite)?;
        }
        info!(
            artifact = %artifact.id(),
            constraints = artifact.metadata.num_constraints,
            variables = artifact.metadata.num_variables,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "compiled"
        );
        Ok(artifact)
    }

    /// Returns the witness and the circuit outputs.
    #[instrument(skip_all, fields(circuit = artifact.name()))]
    pub fn compute_witness(
        &self,
        artifact: &CompiledArtifact,
        arguments: &[Argument],
    ) -> Result<(Witness, Vec<Scalar>)> {
        let witness = self.backend.compute_witness(artifact, arguments)?;
        mismatch(Stage::Witness, "witness", artifact.id(), witness.artifact_id)?;
        debug!(witness = %witness.witness_id, "witness computed");
        let outputs = witness.outputs.clone();
        Ok((witness, outputs))
    }

    pub fn setup(&self, artifact: &CompiledArtifact) -> Result<Arc<KeyPair>> {
        self.setup_with(artifact, &CancellationToken::new())
    }

    #[instrument(skip_all, fields(circuit = artifact.name(), artifact = %artifact.id()))]
    pub fn setup_with(
        &self,
        artifact: &CompiledArtifact,
        cancel: &CancellationToken,
    ) -> Result<Arc<KeyPair>> {
        let constraints = artifact.metadata.num_constraints;
        let capacity = self.config.setup.max_constraints;
        if constraints > capacity {
            return Err(PipelineError::Setup {
                circuit: artifact.name().to_string(),
                constraints,
                capacity,
            });
        }

        let start = Instant::now();
        let setup = || self.backend.setup(artifact, cancel);
        let keys = if self.config.cache.enabled {
            let (keys, hit) = self.keys.get_or_try_insert_with(artifact.id(), setup)?;
            if hit {
                debug!(key = %keys.key_id(), "setup cache hit");
            }
            keys
        } else {
            Arc::new(setup()?)
        };
        cancel.check(Stage::Setup, artifact.name())?;
        mismatch(Stage::Setup, "key pair", artifact.id(), keys.artifact_id())?;
        info!(
            key = %keys.key_id(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "setup finished"
        );
        Ok(keys)
    }

    #[instrument(skip_all, fields(circuit = artifact.name()))]
    pub fn prove(
        &self,
        artifact: &CompiledArtifact,
        witness: &Witness,
        proving_key: &ProvingKey,
    ) -> Result<Proof> {
        mismatch(Stage::Proof, "witness", artifact.id(), witness.artifact_id)?;
        mismatch(Stage::Proof, "proving key", artifact.id(), proving_key.artifact_id)?;
        self.backend.prove(artifact, witness, proving_key)
    }

    pub fn verify(
        &self,
        verification_key: &VerificationKey,
        proof: &Proof,
        public_inputs: &[Scalar],
    ) -> Result<bool> {
        self.backend.verify(verification_key, proof, public_inputs)
    }

    pub fn export_verifiers(
        &self,
        artifact: &CompiledArtifact,
        keys: &KeyPair,
        platform: TargetPlatform,
    ) -> Result<(VerifierArtifact, VerifierArtifact)> {
        mismatch(Stage::Export, "key pair", artifact.id(), keys.artifact_id())?;
        export::export_verifiers(&keys.verification_key, &artifact.contract_name, platform)
    }

    pub fn deployment_unit(
        &self,
        artifact: &CompiledArtifact,
        keys: &KeyPair,
        platform: TargetPlatform,
    ) -> Result<DeploymentUnit> {
        let (direct, wrapped) = self.export_verifiers(artifact, keys, platform)?;
        DeploymentUnit::new(direct, wrapped)
    }

    /// Compile, witness, setup, prove and verify in one go.
    #[instrument(skip_all, fields(circuit = %definition.name))]
    pub fn run(&self, definition: &CircuitDefinition, arguments: &[Argument]) -> Result<PipelineRun> {
        let artifact = self.compile(definition, &CompileOptions::default())?;
        let (witness, _) = self.compute_witness(&artifact, arguments)?;
        let keys = self.setup(&artifact)?;
        let proof = self.prove(&artifact, &witness, &keys.proving_key)?;
        let verified = self.verify(&keys.verification_key, &proof, &witness.public_inputs)?;
        info!(verified, "run finished");
        Ok(PipelineRun {
            artifact,
            witness,
            keys,
            proof,
            verified,
        })
    }

    /// Runs every catalog variant that has inputs, in parallel. Results follow catalog
    /// order; input names missing from the catalog come last as `NotFound`.
    pub fn run_catalog(
        &self,
        catalog: &CircuitCatalog,
        inputs: &HashMap<String, Vec<Argument>>,
    ) -> Vec<(String, Result<PipelineRun>)> {
        let selected: Vec<_> = catalog
            .iter()
            .filter_map(|definition| {
                inputs
                    .get(&definition.name)
                    .map(|arguments| (definition, arguments))
            })
            .collect();
        let mut results: Vec<_> = selected
            .par_iter()
            .map(|(definition, arguments)| (definition.name.clone(), self.run(definition, arguments)))
            .collect();

        let mut unknown: Vec<_> = inputs
            .keys()
            .filter(|name| catalog.get(name).is_err())
            .cloned()
            .collect();
        unknown.sort();
        results.extend(unknown.into_iter().map(|name| {
            let err = PipelineError::NotFound { name: name.clone() };
            (name, Err(err))
        }));
        results
    }

    pub fn spawn_compile(
        self: &Arc<Self>,
        definition: Arc<CircuitDefinition>,
        options: CompileOptions,
    ) -> BackgroundTask<Arc<CompiledArtifact>> {
        let pipeline = Arc::clone(self);
        let circuit = definition.name.clone();
        BackgroundTask::spawn(Stage::Compilation, &circuit, move |cancel| {
            pipeline.compile_with(&definition, &options, cancel)
        })
    }

    pub fn spawn_setup(self: &Arc<Self>, artifact: Arc<CompiledArtifact>) -> BackgroundTask<Arc<KeyPair>> {
        let pipeline = Arc::clone(self);
        let circuit = artifact.name().to_string();
        BackgroundTask::spawn(Stage::Setup, &circuit, move |cancel| {
            pipeline.setup_with(&artifact, cancel)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ast::Signature, catalog::CircuitCatalog};

    fn pipeline() -> Pipeline {
        Pipeline::new(PipelineConfig::default()).unwrap()
    }

    fn a_square() -> Arc<CircuitDefinition> {
        CircuitCatalog::builtin().get("a_square").unwrap()
    }

    struct SnarkOnly(SpartanBackend);

    impl ProvingBackend for SnarkOnly {
        fn id(&self) -> &str {
            self.0.id()
        }

        fn supports(&self, proof_system: ProofSystem) -> bool {
            proof_system == ProofSystem::SpartanSnark
        }

        fn compile(
            &self,
            definition: &CircuitDefinition,
            proof_system: ProofSystem,
            comparison_bits: u32,
            cancel: &CancellationToken,
        ) -> Result<CompiledArtifact> {
            self.0.compile(definition, proof_system, comparison_bits, cancel)
        }

        fn compute_witness(
            &self,
            artifact: &CompiledArtifact,
            arguments: &[Argument],
        ) -> Result<Witness> {
            self.0.compute_witness(artifact, arguments)
        }

        fn setup(&self, artifact: &CompiledArtifact, cancel: &CancellationToken) -> Result<KeyPair> {
            self.0.setup(artifact, cancel)
        }

        fn prove(
            &self,
            artifact: &CompiledArtifact,
            witness: &Witness,
            key: &ProvingKey,
        ) -> Result<Proof> {
            self.0.prove(artifact, witness, key)
        }

        fn verify(
            &self,
            key: &VerificationKey,
            proof: &Proof,
            public_inputs: &[Scalar],
        ) -> Result<bool> {
            self.0.verify(key, proof, public_inputs)
        }
    }

    #[test]
    fn test_run() {
        let run = pipeline().run(&a_square(), &[2u64.into()]).unwrap();
        assert!(run.verified);
        assert_eq!(run.outputs(), &[Scalar::from(4u32)]);
        assert_eq!(run.proof.artifact_id, run.artifact.id());
        assert_eq!(run.proof.key_id, run.keys.key_id());
    }

    #[test]
    fn test_unsupported_proof_system() {
        let pipeline = Pipeline::with_backend(
            PipelineConfig::default(),
            Arc::new(SnarkOnly(SpartanBackend::new("t"))),
        )
        .unwrap();
        let options = CompileOptions {
            target_proof_system: Some(ProofSystem::SpartanNizk),
            ..Default::default()
        };
        let err = pipeline.compile(&a_square(), &options).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::UnsupportedProofSystem {
                requested: ProofSystem::SpartanNizk,
                ..
            }
        ));
        assert!(pipeline.compile(&a_square(), &CompileOptions::default()).is_ok());
    }

    #[test]
    fn test_custom_backend_config_is_validated() {
        let mut config = PipelineConfig::default();
        config.compiler.comparison_bits = 300;
        let result = Pipeline::with_backend(config, Arc::new(SpartanBackend::new("t")));
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_provenance_mismatch() {
        let pipeline = pipeline();
        let cube = CircuitDefinition::new(
            "a_cube",
            "ACube",
            Signature::new().private_field("a").returns_field(),
            "def main(private field a) -> field { return a * a * a; }",
        );
        let square = pipeline.compile(&a_square(), &CompileOptions::default()).unwrap();
        let cube = pipeline.compile(&cube, &CompileOptions::default()).unwrap();
        let (square_witness, _) = pipeline.compute_witness(&square, &[3u64.into()]).unwrap();
        let (cube_witness, _) = pipeline.compute_witness(&cube, &[3u64.into()]).unwrap();
        let square_keys = pipeline.setup(&square).unwrap();
        let cube_keys = pipeline.setup(&cube).unwrap();

        match pipeline.prove(&square, &cube_witness, &square_keys.proving_key) {
            Err(PipelineError::ProvenanceMismatch {
                stage: Stage::Proof,
                what: "witness",
                expected,
                found,
            }) => {
                assert_eq!(expected, square.id());
                assert_eq!(found, cube.id());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            pipeline.prove(&square, &square_witness, &cube_keys.proving_key),
            Err(PipelineError::ProvenanceMismatch {
                what: "proving key",
                ..
            })
        ));
        assert!(matches!(
            pipeline.export_verifiers(&square, &cube_keys, TargetPlatform::Json),
            Err(PipelineError::ProvenanceMismatch {
                stage: Stage::Export,
                ..
            })
        ));
    }

    #[test]
    fn test_setup_capacity() {
        let mut config = PipelineConfig::default();
        config.setup.max_constraints = 2;
        let pipeline = Pipeline::new(config).unwrap();
        let artifact = pipeline.compile(&a_square(), &CompileOptions::default()).unwrap();
        match pipeline.setup(&artifact).unwrap_err() {
            PipelineError::Setup {
                constraints,
                capacity,
                ..
            } => {
                assert_eq!(constraints, 3);
                assert_eq!(capacity, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_cache() {
        let pipeline = pipeline();
        let a = pipeline.compile(&a_square(), &CompileOptions::default()).unwrap();
        let b = pipeline.compile(&a_square(), &CompileOptions::default()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        let k1 = pipeline.setup(&a).unwrap();
        let k2 = pipeline.setup(&b).unwrap();
        assert!(Arc::ptr_eq(&k1, &k2));

        let mut config = PipelineConfig::default();
        config.cache.enabled = false;
        let uncached = Pipeline::new(config).unwrap();
        let c = uncached.compile(&a_square(), &CompileOptions::default()).unwrap();
        let d = uncached.compile(&a_square(), &CompileOptions::default()).unwrap();
        assert!(!Arc::ptr_eq(&c, &d));
        assert_eq!(c.id(), d.id());
        assert_eq!(c.id(), a.id());
    }

    #[test]
    fn test_cancelled_compile_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a_square.artifact");
        let options = CompileOptions {
            output_location: Some(path.clone()),
            ..Default::default()
        };
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = pipeline()
            .compile_with(&a_square(), &options, &cancel)
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.stage(), Some(Stage::Compilation));
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_cancelled_setup_is_retried() {
        let pipeline = pipeline();
        let artifact = pipeline.compile(&a_square(), &CompileOptions::default()).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(pipeline.setup_with(&artifact, &cancel).unwrap_err().is_cancelled());
        assert!(pipeline.setup(&artifact).is_ok());
    }

    #[test]
    fn test_background_stages() {
        let pipeline = Arc::new(pipeline());
        let artifact = pipeline
            .spawn_compile(a_square(), CompileOptions::default())
            .join()
            .unwrap();
        let keys = pipeline.spawn_setup(Arc::clone(&artifact)).join().unwrap();
        assert_eq!(keys.artifact_id(), artifact.id());
    }

    #[test]
    fn test_run_catalog() {
        let catalog = CircuitCatalog::builtin();
        let inputs: HashMap<String, Vec<Argument>> = [
            ("a_square".to_string(), vec![5u64.into()]),
            ("only_assert".to_string(), vec![10u64.into()]),
            ("missing".to_string(), vec![]),
        ]
        .into_iter()
        .collect();
        let results = pipeline().run_catalog(&catalog, &inputs);
        let names: Vec<&str> = results.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["a_square", "only_assert", "missing"]);

        assert!(results[0].1.as_ref().unwrap().verified);
        assert!(results[1].1.as_ref().unwrap_err().is_constraint_violation());
        assert!(matches!(results[2].1, Err(PipelineError::NotFound { .. })));
    }
}
