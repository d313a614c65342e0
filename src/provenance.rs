use std::fmt;

use serde::{Deserialize, Serialize};
use sha3::{Digest as _, Sha3_256};

use crate::config::ProofSystem;

/// Identifier of the compiler that produced an artifact.
pub const COMPILER_VERSION: &str =
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// SHA3-256 content digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Digest(pub [u8; 32]);

impl Digest {
    pub fn of(domain: &str, bytes: &[u8]) -> Self {
        Hasher::new(domain).bytes(bytes).finish()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(raw: &str) -> Option<Self> {
        let bytes = hex::decode(raw).ok()?;
        Some(Digest(bytes.try_into().ok()?))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", &self.to_hex()[..16])
    }
}

/// Domain-separated, length-prefixed hashing so that concatenated fields cannot collide.
pub struct Hasher(Sha3_256);

impl Hasher {
    pub fn new(domain: &str) -> Self {
        Hasher(Sha3_256::new()).str(domain)
    }

    pub fn bytes(mut self, bytes: &[u8]) -> Self {
        self.0.update((bytes.len() as u64).to_le_bytes());
        self.0.update(bytes);
        self
    }

    pub fn str(self, s: &str) -> Self {
        self.bytes(s.as_bytes())
    }

    pub fn digest(self, digest: &Digest) -> Self {
        self.bytes(&digest.0)
    }

    pub fn u64(mut self, value: u64) -> Self {
        self.0.update(value.to_le_bytes());
        self
    }

    pub fn finish(self) -> Digest {
        Digest(self.0.finalize().into())
    }
}

/// Where a compiled artifact came from. Two artifacts with the same `artifact_id`
/// are interchangeable for every downstream stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub circuit: String,
    pub source_hash: Digest,
    pub compiler_version: String,
    pub proof_system: ProofSystem,
    pub comparison_bits: u32,
    pub artifact_id: Digest,
}

impl Provenance {
    pub fn new(
        circuit: &str,
        source: &str,
        compiler_version: &str,
        proof_system: ProofSystem,
        comparison_bits: u32,
    ) -> Self {
        let source_hash = Digest::of("circuit-source", source.as_bytes());
        let artifact_id = Hasher::new("compiled-artifact")
            .digest(&source_hash)
            .str(compiler_version)
            .str(proof_system.as_str())
            .u64(comparison_bits as u64)
            .finish();
        Self {
            circuit: circuit.to_string(),
            source_hash,
            compiler_version: compiler_version.to_string(),
            proof_system,
            comparison_bits,
            artifact_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provenance(source: &str, version: &str, system: ProofSystem, bits: u32) -> Provenance {
        Provenance::new("a_square", source, version, system, bits)
    }

    #[test]
    fn test_provenance_is_deterministic() {
        let source = "def main(private field a) -> field { return a * a; }";
        let p1 = provenance(source, COMPILER_VERSION, ProofSystem::SpartanSnark, 64);
        let p2 = provenance(source, COMPILER_VERSION, ProofSystem::SpartanSnark, 64);
        assert_eq!(p1, p2);
    }

    #[test]
    fn test_provenance_tracks_inputs() {
        let source = "def main(private field a) -> field { return a * a; }";
        let base = provenance(source, COMPILER_VERSION, ProofSystem::SpartanSnark, 64);
        let others = [
            provenance("def main() { return; }", COMPILER_VERSION, ProofSystem::SpartanSnark, 64),
            provenance(source, "zkc/9.9.9", ProofSystem::SpartanSnark, 64),
            provenance(source, COMPILER_VERSION, ProofSystem::SpartanNizk, 64),
            provenance(source, COMPILER_VERSION, ProofSystem::SpartanSnark, 32),
        ];
        for other in others {
            assert_ne!(base.artifact_id, other.artifact_id);
        }
    }

    #[test]
    fn test_length_prefix_separates_fields() {
        let a = Hasher::new("t").str("ab").str("c").finish();
        let b = Hasher::new("t").str("a").str("bc").finish();
        assert_ne!(a, b);
    }

    #[test]
    fn test_hex_roundtrip() {
        let digest = Digest::of("x", b"payload");
        assert_eq!(Digest::from_hex(&digest.to_hex()), Some(digest));
        assert_eq!(Digest::from_hex("abcd"), None);
    }
}
