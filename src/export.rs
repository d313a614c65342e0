use std::{fmt, str::FromStr};

use curve25519_dalek::Scalar;
use serde::{Deserialize, Serialize};

use crate::{
    error::{PipelineError, Result, Stage},
    protocol::{Proof, VerificationKey},
    provenance::{Digest, COMPILER_VERSION},
};

const KEY_BEGIN: &str = "// BEGIN VERIFICATION KEY";
const KEY_END: &str = "// END VERIFICATION KEY";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetPlatform {
    Solidity,
    Json,
}

impl TargetPlatform {
    pub fn extension(&self) -> &'static str {
        match self {
            TargetPlatform::Solidity => "sol",
            TargetPlatform::Json => "json",
        }
    }
}

impl fmt::Display for TargetPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TargetPlatform::Solidity => "solidity",
            TargetPlatform::Json => "json",
        })
    }
}

impl FromStr for TargetPlatform {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "solidity" | "sol" => Ok(TargetPlatform::Solidity),
            "json" => Ok(TargetPlatform::Json),
            other => Err(PipelineError::Config(format!(
                "unknown target platform `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifierKind {
    /// Checks proofs against the embedded key.
    Direct,
    /// Delegates to the direct verifier of the same key.
    Wrapped,
}

impl VerifierKind {
    fn contract_suffix(&self) -> &'static str {
        match self {
            VerifierKind::Direct => "Verifier",
            VerifierKind::Wrapped => "WrappedVerifier",
        }
    }
}

/// Exported verifier for one key pair, ready to hand to a deployment tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifierArtifact {
    pub platform: TargetPlatform,
    pub kind: VerifierKind,
    pub contract_name: String,
    pub circuit: String,
    pub key_id: Digest,
    pub artifact_id: Digest,
    pub source: String,
}

#[derive(Serialize, Deserialize)]
struct JsonDescriptor {
    contract: String,
    kind: VerifierKind,
    circuit: String,
    proof_system: String,
    generator: String,
    key_id: String,
    artifact_id: String,
    num_public_inputs: usize,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    delegate: Option<String>,
    verification_key: String,
}

fn malformed(message: impl Into<String>) -> PipelineError {
    PipelineError::MalformedInput {
        stage: Stage::Export,
        message: message.into(),
    }
}

impl VerifierArtifact {
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.contract_name, self.platform.extension())
    }

    /// Recovers the verification key embedded in the source.
    pub fn verification_key(&self) -> Result<VerificationKey> {
        let encoded = match self.platform {
            TargetPlatform::Solidity => {
                let start = self
                    .source
                    .find(KEY_BEGIN)
                    .ok_or_else(|| malformed("verification key marker is missing"))?;
                let end = self.source[start..]
                    .find(KEY_END)
                    .map(|offset| start + offset)
                    .ok_or_else(|| malformed("verification key end marker is missing"))?;
                let block = &self.source[start..end];
                let literal = block
                    .split("hex\"")
                    .nth(1)
                    .and_then(|rest| rest.split('"').next())
                    .ok_or_else(|| malformed("verification key literal is missing"))?;
                literal.to_string()
            }
            TargetPlatform::Json => {
                let descriptor: JsonDescriptor = serde_json::from_str(&self.source)
                    .map_err(|e| malformed(format!("invalid verifier descriptor: {e}")))?;
                descriptor.verification_key
            }
        };
        let bytes = hex::decode(encoded)
            .map_err(|e| malformed(format!("verification key is not hex: {e}")))?;
        let key = VerificationKey::from_bytes(&bytes)?;
        if key.key_id != self.key_id {
            return Err(malformed(format!(
                "{} embeds key {} but is labelled {}",
                self.contract_name, key.key_id, self.key_id
            )));
        }
        Ok(key)
    }

    pub fn verify(&self, proof: &Proof, public_inputs: &[Scalar]) -> Result<bool> {
        self.verification_key()?.verify(proof, public_inputs)
    }
}

fn check_contract_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .map_or(false, |c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(malformed(format!("`{name}` is not a valid contract name")))
    }
}

pub fn export_verifier(
    key: &VerificationKey,
    contract_name: &str,
    platform: TargetPlatform,
    kind: VerifierKind,
) -> Result<VerifierArtifact> {
    check_contract_name(contract_name)?;
    let encoded_key = hex::encode(key.to_bytes()?);
    let direct_name = format!("{contract_name}{}", VerifierKind::Direct.contract_suffix());
    let name = format!("{contract_name}{}", kind.contract_suffix());

    let source = match platform {
        TargetPlatform::Solidity => match kind {
            VerifierKind::Direct => solidity_direct(key, &name, &encoded_key),
            VerifierKind::Wrapped => solidity_wrapped(key, &name, &direct_name, &encoded_key),
        },
        TargetPlatform::Json => {
            let descriptor = JsonDescriptor {
                contract: name.clone(),
                kind,
                circuit: key.circuit.clone(),
                proof_system: key.proof_system.to_string(),
                generator: COMPILER_VERSION.to_string(),
                key_id: key.key_id.to_hex(),
                artifact_id: key.artifact_id.to_hex(),
                num_public_inputs: key.num_public_inputs(),
                delegate: (kind == VerifierKind::Wrapped).then(|| direct_name.clone()),
                verification_key: encoded_key,
            };
            serde_json::to_string_pretty(&descriptor).map_err(|e| PipelineError::Backend {
                stage: Stage::Export,
                circuit: key.circuit.clone(),
                message: e.to_string(),
            })?
        }
    };

    Ok(VerifierArtifact {
        platform,
        kind,
        contract_name: name,
        circuit: key.circuit.clone(),
        key_id: key.key_id,
        artifact_id: key.artifact_id,
        source,
    })
}

/// The direct verifier followed by the wrapped one.
pub fn export_verifiers(
    key: &VerificationKey,
    contract_name: &str,
    platform: TargetPlatform,
) -> Result<(VerifierArtifact, VerifierArtifact)> {
    Ok((
        export_verifier(key, contract_name, platform, VerifierKind::Direct)?,
        export_verifier(key, contract_name, platform, VerifierKind::Wrapped)?,
    ))
}

/// Spartan has no EVM precompile, so the contract checks the statement length and
/// forwards the embedded key to an `ISpartanVerifier` deployment given at construction.
/// The JSON descriptor is the self-contained target.
fn solidity_direct(key: &VerificationKey, name: &str, encoded_key: &str) -> String {
    format!(
        r#"// SPDX-License-Identifier: MIT
pragma solidity ^0.8.0;

/// @title Verifier for circuit `{circuit}` ({proof_system})
/// @notice Generated by {generator}
interface ISpartanVerifier {{
    function verify(
        bytes calldata verificationKey,
        bytes calldata proof,
        uint256[] calldata publicInputs
    ) external view returns (bool);
}}

contract {name} {{
    bytes32 public constant KEY_ID = 0x{key_id};
    bytes32 public constant ARTIFACT_ID = 0x{artifact_id};
    uint256 public constant NUM_PUBLIC_INPUTS = {num_inputs};

    {KEY_BEGIN}
    bytes public constant VERIFICATION_KEY = hex"{encoded_key}";
    {KEY_END}

    ISpartanVerifier public immutable backend;

    constructor(ISpartanVerifier backend_) {{
        backend = backend_;
    }}

    /// @param publicInputs public arguments in declaration order, then the outputs
    function verifyProof(
        bytes calldata proof,
        uint256[] calldata publicInputs
    ) external view returns (bool) {{
        require(publicInputs.length == NUM_PUBLIC_INPUTS, "wrong number of public inputs");
        return backend.verify(VERIFICATION_KEY, proof, publicInputs);
    }}
}}
"#,
        circuit = key.circuit,
        proof_system = key.proof_system,
        generator = COMPILER_VERSION,
        key_id = key.key_id.to_hex(),
        artifact_id = key.artifact_id.to_hex(),
        num_inputs = key.num_public_inputs(),
    )
}

fn solidity_wrapped(key: &VerificationKey, name: &str, direct: &str, encoded_key: &str) -> String {
    format!(
        r#"// SPDX-License-Identifier: MIT
pragma solidity ^0.8.0;

import "./{direct}.sol";

/// @title Composable wrapper around {direct}
/// @notice Generated by {generator}
contract {name} {{
    bytes32 public constant KEY_ID = 0x{key_id};

    {KEY_BEGIN}
    bytes public constant VERIFICATION_KEY = hex"{encoded_key}";
    {KEY_END}

    {direct} public immutable inner;

    constructor({direct} inner_) {{
        require(inner_.KEY_ID() == KEY_ID, "verifier key mismatch");
        inner = inner_;
    }}

    function verifyProof(
        bytes calldata proof,
        uint256[] calldata publicInputs
    ) external view returns (bool) {{
        return inner.verifyProof(proof, publicInputs);
    }}
}}
"#,
        generator = COMPILER_VERSION,
        key_id = key.key_id.to_hex(),
    )
}
