use curve25519_dalek::Scalar;
use serde::{Deserialize, Serialize};

use crate::{
    artifact::CompiledArtifact,
    ast::{ParamType, Signature},
    circuit::SolveError,
    error::{PipelineError, Result, Stage},
    provenance::{Digest, Hasher},
    scalar,
};

/// One argument of `main`, given as decimal literals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Argument {
    Field(String),
    Array(Vec<String>),
}

impl Argument {
    pub fn array<T: ToString>(values: impl IntoIterator<Item = T>) -> Self {
        Argument::Array(values.into_iter().map(|v| v.to_string()).collect())
    }
}

impl From<u64> for Argument {
    fn from(value: u64) -> Self {
        Argument::Field(value.to_string())
    }
}

impl From<&str> for Argument {
    fn from(value: &str) -> Self {
        Argument::Field(value.to_string())
    }
}

impl From<String> for Argument {
    fn from(value: String) -> Self {
        Argument::Field(value)
    }
}

impl From<Vec<u64>> for Argument {
    fn from(values: Vec<u64>) -> Self {
        Argument::array(values)
    }
}

/// Full assignment for one compiled artifact and one set of arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Witness {
    pub artifact_id: Digest,
    pub witness_id: Digest,
    pub vars: Vec<Scalar>,
    /// Public arguments in declaration order followed by the outputs.
    pub public_inputs: Vec<Scalar>,
    pub outputs: Vec<Scalar>,
}

impl Witness {
    pub fn output_decimals(&self) -> Vec<String> {
        self.outputs.iter().map(scalar::to_decimal).collect()
    }
}

/// Checks the arguments against the signature and flattens them in declaration order.
pub fn flatten_arguments(
    circuit: &str,
    signature: &Signature,
    arguments: &[Argument],
) -> Result<Vec<Scalar>> {
    let arity = |message: String| PipelineError::Arity {
        circuit: circuit.to_string(),
        message,
    };
    if arguments.len() != signature.params.len() {
        return Err(arity(format!(
            "expected {} arguments {}, got {}",
            signature.params.len(),
            signature,
            arguments.len()
        )));
    }

    let parse = |name: &str, literal: &str| {
        scalar::parse_decimal(literal).map_err(|e| PipelineError::Range {
            circuit: circuit.to_string(),
            message: format!("argument `{name}`: {e}"),
        })
    };
    let mut values = vec![];
    for (param, argument) in signature.params.iter().zip(arguments) {
        match (param.ty, argument) {
            (ParamType::Field, Argument::Field(literal)) => values.push(parse(&param.name, literal)?),
            (ParamType::FieldArray(len), Argument::Array(literals)) => {
                if literals.len() != len {
                    return Err(arity(format!(
                        "argument `{}` expects {len} elements, got {}",
                        param.name,
                        literals.len()
                    )));
                }
                for literal in literals {
                    values.push(parse(&param.name, literal)?);
                }
            }
            (ty, _) => {
                return Err(arity(format!(
                    "argument `{}` must be a {ty}",
                    param.name
                )))
            }
        }
    }
    Ok(values)
}

pub fn compute(artifact: &CompiledArtifact, arguments: &[Argument]) -> Result<Witness> {
    let circuit = artifact.name();
    let values = flatten_arguments(circuit, &artifact.signature, arguments)?;
    let solution = artifact.program.solve(&values).map_err(|e| match e {
        SolveError::Assertion(site) => PipelineError::ConstraintViolation {
            circuit: circuit.to_string(),
            location: site.location,
            assertion: site.text,
        },
        SolveError::Range { .. } => PipelineError::Range {
            circuit: circuit.to_string(),
            message: e.to_string(),
        },
        SolveError::ArgumentCount { .. } => PipelineError::Arity {
            circuit: circuit.to_string(),
            message: e.to_string(),
        },
        other => PipelineError::Backend {
            stage: Stage::Witness,
            circuit: circuit.to_string(),
            message: other.to_string(),
        },
    })?;

    let outputs = solution.outputs(&artifact.program);
    let witness_id = solution
        .vars
        .iter()
        .chain(solution.inputs.iter())
        .fold(
            Hasher::new("witness").digest(&artifact.id()),
            |hasher, value| hasher.bytes(value.as_bytes()),
        )
        .finish();
    Ok(Witness {
        artifact_id: artifact.id(),
        witness_id,
        vars: solution.vars,
        public_inputs: solution.inputs,
        outputs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signature() -> Signature {
        Signature::new()
            .private_field("age")
            .public_field("challenge_id")
            .public_array("xs", 2)
            .returns_field()
    }

    #[test]
    fn test_flatten_arguments() {
        let values = flatten_arguments(
            "c",
            &signature(),
            &[20u64.into(), "5".into(), vec![1u64, 2].into()],
        )
        .unwrap();
        let expected: Vec<Scalar> = [20u64, 5, 1, 2].into_iter().map(Scalar::from).collect();
        assert_eq!(values, expected);
    }

    #[test]
    fn test_arity_errors() {
        let cases: Vec<Vec<Argument>> = vec![
            vec![20u64.into(), 5u64.into()],
            vec![20u64.into(), 5u64.into(), vec![1u64].into()],
            vec![20u64.into(), vec![5u64].into(), vec![1u64, 2].into()],
            vec![20u64.into(), 5u64.into(), 1u64.into()],
        ];
        for arguments in cases {
            let err = flatten_arguments("c", &signature(), &arguments).unwrap_err();
            assert!(matches!(err, PipelineError::Arity { .. }), "{arguments:?}: {err}");
        }
    }

    #[test]
    fn test_range_errors() {
        let overflow =
            "7237005577332262213973186563042994240857116359379907606001950938285454250989";
        for bad in ["-1", "abc", "1e3", overflow] {
            let err = flatten_arguments(
                "c",
                &signature(),
                &[bad.into(), 5u64.into(), vec![1u64, 2].into()],
            )
            .unwrap_err();
            assert!(matches!(err, PipelineError::Range { .. }), "{bad}: {err}");
        }
    }

    #[test]
    fn test_argument_json() {
        let arguments: Vec<Argument> = serde_json::from_str(r#"["20", "5", ["1", "2"]]"#).unwrap();
        assert_eq!(
            arguments,
            vec![
                Argument::Field("20".to_string()),
                Argument::Field("5".to_string()),
                Argument::Array(vec!["1".to_string(), "2".to_string()]),
            ]
        );
    }
}
