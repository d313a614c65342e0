use serde::{Deserialize, Serialize};

use crate::{
    error::{PipelineError, Result, Stage},
    export::{VerifierArtifact, VerifierKind},
    provenance::Digest,
};

/// One circuit variant's verifiers, deployed together and independently of other variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentUnit {
    pub circuit: String,
    pub direct: VerifierArtifact,
    pub wrapped: VerifierArtifact,
}

impl DeploymentUnit {
    pub fn new(direct: VerifierArtifact, wrapped: VerifierArtifact) -> Result<Self> {
        let malformed = |message: String| PipelineError::MalformedInput {
            stage: Stage::Deployment,
            message,
        };
        if direct.kind != VerifierKind::Direct || wrapped.kind != VerifierKind::Wrapped {
            return Err(malformed(format!(
                "expected a direct and a wrapped verifier, got {:?} and {:?}",
                direct.kind, wrapped.kind
            )));
        }
        if direct.key_id != wrapped.key_id || direct.circuit != wrapped.circuit {
            return Err(malformed(format!(
                "{} and {} were exported from different keys",
                direct.contract_name, wrapped.contract_name
            )));
        }
        Ok(Self {
            circuit: direct.circuit.clone(),
            direct,
            wrapped,
        })
    }

    pub fn key_id(&self) -> Digest {
        self.direct.key_id
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentManifest {
    pub units: Vec<DeploymentUnit>,
}

impl DeploymentManifest {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| PipelineError::MalformedInput {
            stage: Stage::Deployment,
            message: e.to_string(),
        })
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| PipelineError::MalformedInput {
            stage: Stage::Deployment,
            message: format!("invalid deployment manifest: {e}"),
        })
    }

    pub fn unit(&self, circuit: &str) -> Option<&DeploymentUnit> {
        self.units.iter().find(|unit| unit.circuit == circuit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentReceipt {
    pub circuit: String,
    pub key_id: Digest,
    pub direct_address: String,
    pub wrapped_address: String,
}

/// Registers verifier contracts on some ledger.
pub trait VerifierDeployer {
    fn deploy(&mut self, unit: &DeploymentUnit) -> Result<DeploymentReceipt>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::TargetPlatform;

    fn artifact(kind: VerifierKind, key: u8) -> VerifierArtifact {
        VerifierArtifact {
            platform: TargetPlatform::Solidity,
            kind,
            contract_name: format!("ASquareCircuit{kind:?}"),
            circuit: "a_square".to_string(),
            key_id: Digest([key; 32]),
            artifact_id: Digest([9; 32]),
            source: String::new(),
        }
    }

    #[derive(Default)]
    struct RecordingDeployer {
        deployed: Vec<String>,
    }

    impl VerifierDeployer for RecordingDeployer {
        fn deploy(&mut self, unit: &DeploymentUnit) -> Result<DeploymentReceipt> {
            self.deployed.push(unit.circuit.clone());
            let n = self.deployed.len();
            Ok(DeploymentReceipt {
                circuit: unit.circuit.clone(),
                key_id: unit.key_id(),
                direct_address: format!("0x{:040x}", 2 * n),
                wrapped_address: format!("0x{:040x}", 2 * n + 1),
            })
        }
    }

    #[test]
    fn test_unit_checks_pairing() {
        let unit = DeploymentUnit::new(
            artifact(VerifierKind::Direct, 1),
            artifact(VerifierKind::Wrapped, 1),
        )
        .unwrap();
        assert_eq!(unit.circuit, "a_square");

        let swapped = DeploymentUnit::new(
            artifact(VerifierKind::Wrapped, 1),
            artifact(VerifierKind::Direct, 1),
        );
        assert!(matches!(
            swapped,
            Err(PipelineError::MalformedInput {
                stage: Stage::Deployment,
                ..
            })
        ));
        assert!(DeploymentUnit::new(
            artifact(VerifierKind::Direct, 1),
            artifact(VerifierKind::Wrapped, 2)
        )
        .is_err());
    }

    #[test]
    fn test_manifest_and_deployer() {
        let manifest = DeploymentManifest {
            units: vec![DeploymentUnit::new(
                artifact(VerifierKind::Direct, 1),
                artifact(VerifierKind::Wrapped, 1),
            )
            .unwrap()],
        };
        let restored = DeploymentManifest::from_json(&manifest.to_json().unwrap()).unwrap();
        assert_eq!(restored, manifest);
        assert!(DeploymentManifest::from_json("{").is_err());

        let mut deployer = RecordingDeployer::default();
        let unit = restored.unit("a_square").unwrap();
        let receipt = deployer.deploy(unit).unwrap();
        assert_eq!(receipt.key_id, Digest([1; 32]));
        assert_eq!(deployer.deployed, vec!["a_square"]);
        assert!(restored.unit("empty").is_none());
    }
}
