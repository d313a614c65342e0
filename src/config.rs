use std::{fmt, fs, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    compiler::MAX_COMPARISON_BITS,
    error::{PipelineError, Result},
};

/// Downstream proving scheme an artifact is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProofSystem {
    /// Spartan with a preprocessed commitment to the constraint matrices.
    #[default]
    SpartanSnark,
    /// Spartan without preprocessing; the verifier reads the matrices directly.
    SpartanNizk,
}

impl ProofSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProofSystem::SpartanSnark => "spartan-snark",
            ProofSystem::SpartanNizk => "spartan-nizk",
        }
    }
}

impl fmt::Display for ProofSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProofSystem {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "spartan-snark" => Ok(ProofSystem::SpartanSnark),
            "spartan-nizk" => Ok(ProofSystem::SpartanNizk),
            other => Err(PipelineError::Config(format!(
                "unknown proof system `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Bit width of the integer range used by `<`, `<=`, `>` and `>=`.
    pub comparison_bits: u32,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            comparison_bits: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetupConfig {
    pub max_constraints: usize,
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            max_constraints: 1 << 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub proof_system: ProofSystem,
    pub transcript_label: String,
    pub compiler: CompilerConfig,
    pub setup: SetupConfig,
    pub cache: CacheConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            proof_system: ProofSystem::default(),
            transcript_label: "zk-circuit-pipeline".to_string(),
            compiler: CompilerConfig::default(),
            setup: SetupConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: PipelineConfig =
            toml::from_str(raw).map_err(|e| PipelineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_COMPARISON_BITS).contains(&self.compiler.comparison_bits) {
            return Err(PipelineError::Config(format!(
                "compiler.comparison_bits must be within 1..={MAX_COMPARISON_BITS}, got {}",
                self.compiler.comparison_bits
            )));
        }
        if self.setup.max_constraints == 0 {
            return Err(PipelineError::Config(
                "setup.max_constraints must be positive".to_string(),
            ));
        }
        if self.transcript_label.is_empty() {
            return Err(PipelineError::Config(
                "transcript_label must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.proof_system, ProofSystem::SpartanSnark);
        assert_eq!(config.compiler.comparison_bits, 64);
        assert!(config.cache.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml() {
        let config = PipelineConfig::from_toml_str(
            r#"
            proof_system = "spartan-nizk"

            [compiler]
            comparison_bits = 32

            [setup]
            max_constraints = 4096
            "#,
        )
        .unwrap();
        assert_eq!(config.proof_system, ProofSystem::SpartanNizk);
        assert_eq!(config.compiler.comparison_bits, 32);
        assert_eq!(config.setup.max_constraints, 4096);
        assert!(config.cache.enabled);
        assert_eq!(config.transcript_label, "zk-circuit-pipeline");
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(matches!(
            PipelineConfig::from_toml_str("[compiler]\ncomparison_bits = 250"),
            Err(PipelineError::Config(_))
        ));
        assert!(matches!(
            PipelineConfig::from_toml_str("proof_system = \"groth16\""),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn test_proof_system_names() {
        assert_eq!(
            "spartan-nizk".parse::<ProofSystem>().unwrap(),
            ProofSystem::SpartanNizk
        );
        assert_eq!(ProofSystem::SpartanSnark.to_string(), "spartan-snark");
        assert!("plonk".parse::<ProofSystem>().is_err());
    }
}
