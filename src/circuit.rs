use curve25519_dalek::Scalar;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ast::Location, compiler::Id, scalar};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum Circuit {
    // x = a
    Eq(Id, CircuitValue),
    // x = a + b
    Add(Id, CircuitValue, CircuitValue),
    // x = a * b
    Mult(Id, CircuitValue, CircuitValue),
    // x = i-th bit of a (advice, constrained by the checks that follow it)
    Bit(Id, CircuitValue, u32),
    // x = a^-1, or 0 when a = 0 (advice)
    Inverse(Id, CircuitValue),
    // a * b = c
    Check(CircuitValue, CircuitValue, CircuitValue, Guard),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum CircuitValue {
    Variable(Id),
    Input(Id),
    Constant(Scalar),
}

impl CircuitValue {
    pub const ZERO: CircuitValue = CircuitValue::Constant(Scalar::ZERO);
    pub const ONE: CircuitValue = CircuitValue::Constant(Scalar::ONE);

    pub fn constant(&self) -> Option<Scalar> {
        match self {
            CircuitValue::Constant(c) => Some(*c),
            _ => None,
        }
    }
}

/// What a failing `Check` means to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum Guard {
    /// Holds for every honestly computed assignment.
    Internal,
    /// Index into `CompiledProgram::sites`.
    Site(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum SiteKind {
    Assertion,
    Range { bits: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct GuardSite {
    pub kind: SiteKind,
    pub location: Location,
    pub text: String,
}

/// Where one flattened argument element lives in the assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum Slot {
    Public(Id),
    Private(Id),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CompiledProgram {
    pub gates: Vec<Circuit>,
    pub num_vars: usize,
    pub arguments: Vec<Slot>,
    pub num_public_args: usize,
    /// Bound to the inputs that follow the public arguments.
    pub outputs: Vec<CircuitValue>,
    pub sites: Vec<GuardSite>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SolveError {
    #[error("expected {expected} argument values, got {found}")]
    ArgumentCount { expected: usize, found: usize },
    #[error("assertion `{}` at {} does not hold", .0.text, .0.location)]
    Assertion(GuardSite),
    #[error("{} at {} exceeds the {bits}-bit comparison range", .site.text, .site.location)]
    Range { site: GuardSite, bits: u32 },
    #[error("internal constraint of gate {0} is not satisfied")]
    Unsatisfied(usize),
    #[error("gate {gate} reads unassigned variable v{var}")]
    Unassigned { gate: usize, var: Id },
    #[error("gate {gate} reads input i{input}, only {available} are known")]
    UnknownInput {
        gate: usize,
        input: Id,
        available: usize,
    },
}

/// A satisfying assignment: private variables plus the public statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Solution {
    pub vars: Vec<Scalar>,
    /// Public arguments followed by outputs.
    pub inputs: Vec<Scalar>,
}

impl Solution {
    pub fn outputs(&self, program: &CompiledProgram) -> Vec<Scalar> {
        self.inputs[program.num_public_args..].to_vec()
    }
}

impl CompiledProgram {
    pub fn num_inputs(&self) -> usize {
        self.num_public_args + self.outputs.len()
    }

    pub fn num_private_args(&self) -> usize {
        self.arguments
            .iter()
            .filter(|slot| matches!(slot, Slot::Private(_)))
            .count()
    }

    /// Gates that become rows, plus one row per output and the constant row.
    pub fn num_constraints(&self) -> usize {
        self.gates
            .iter()
            .filter(|gate| !matches!(gate, Circuit::Bit(..) | Circuit::Inverse(..)))
            .count()
            + self.outputs.len()
            + 1
    }

    /// Structural well-formedness: every variable is defined exactly once before it
    /// is read, inputs stay within the public arguments and sites exist.
    pub fn validate(&self) -> Result<(), String> {
        let mut defined = vec![false; self.num_vars];
        let mut public = 0;
        for slot in self.arguments.iter() {
            match *slot {
                Slot::Private(var) => {
                    if var >= self.num_vars || defined[var] {
                        return Err(format!("argument slot v{var} is invalid"));
                    }
                    defined[var] = true;
                }
                Slot::Public(input) => {
                    if input != public {
                        return Err(format!("public argument i{input} is out of order"));
                    }
                    public += 1;
                }
            }
        }
        if public != self.num_public_args {
            return Err("public argument count does not match the slots".to_string());
        }

        let read = |value: &CircuitValue, defined: &[bool]| match *value {
            CircuitValue::Variable(var) if var >= defined.len() || !defined[var] => {
                Err(format!("v{var} is read before it is defined"))
            }
            CircuitValue::Input(input) if input >= self.num_public_args => {
                Err(format!("i{input} is not a public argument"))
            }
            _ => Ok(()),
        };
        for gate in self.gates.iter() {
            let target = match gate {
                Circuit::Eq(y, a) | Circuit::Bit(y, a, _) | Circuit::Inverse(y, a) => {
                    read(a, &defined)?;
                    Some(*y)
                }
                Circuit::Add(y, a, b) | Circuit::Mult(y, a, b) => {
                    read(a, &defined)?;
                    read(b, &defined)?;
                    Some(*y)
                }
                Circuit::Check(a, b, c, guard) => {
                    read(a, &defined)?;
                    read(b, &defined)?;
                    read(c, &defined)?;
                    if let Guard::Site(site) = guard {
                        if *site >= self.sites.len() {
                            return Err(format!("guard site {site} does not exist"));
                        }
                    }
                    None
                }
            };
            if let Some(y) = target {
                if y >= self.num_vars || defined[y] {
                    return Err(format!("v{y} is defined twice or out of range"));
                }
                defined[y] = true;
            }
        }
        for output in self.outputs.iter() {
            read(output, &defined)?;
        }
        Ok(())
    }

    /// Runs the gates in order over the flattened argument values.
    pub fn solve(&self, arguments: &[Scalar]) -> Result<Solution, SolveError> {
        if arguments.len() != self.arguments.len() {
            return Err(SolveError::ArgumentCount {
                expected: self.arguments.len(),
                found: arguments.len(),
            });
        }

        let mut vars: Vec<Option<Scalar>> = vec![None; self.num_vars];
        let mut inputs = Vec::with_capacity(self.num_inputs());
        for (slot, value) in self.arguments.iter().zip(arguments) {
            match *slot {
                Slot::Public(_) => inputs.push(*value),
                Slot::Private(var) => vars[var] = Some(*value),
            }
        }

        for (i, gate) in self.gates.iter().enumerate() {
            let eval = |value: &CircuitValue, vars: &[Option<Scalar>]| -> Result<Scalar, SolveError> {
                evaluate(value, vars, &inputs, i)
            };
            match *gate {
                Circuit::Eq(y, a) => vars[y] = Some(eval(&a, &vars)?),
                Circuit::Add(y, a, b) => vars[y] = Some(eval(&a, &vars)? + eval(&b, &vars)?),
                Circuit::Mult(y, a, b) => vars[y] = Some(eval(&a, &vars)? * eval(&b, &vars)?),
                Circuit::Bit(y, a, bit) => {
                    let bit = scalar::bit(&eval(&a, &vars)?, bit);
                    vars[y] = Some(if bit { Scalar::ONE } else { Scalar::ZERO });
                }
                Circuit::Inverse(y, a) => {
                    // Scalar::invert maps zero to zero
                    vars[y] = Some(eval(&a, &vars)?.invert());
                }
                Circuit::Check(a, b, c, guard) => {
                    if eval(&a, &vars)? * eval(&b, &vars)? != eval(&c, &vars)? {
                        return Err(self.guard_error(guard, i));
                    }
                }
            }
        }

        for (i, output) in self.outputs.iter().enumerate() {
            let value = evaluate(output, &vars, &inputs, self.gates.len() + i)?;
            inputs.push(value);
        }
        // private argument slots may be left unread; they still carry their value
        let vars = vars
            .into_iter()
            .map(|v| v.unwrap_or(Scalar::ZERO))
            .collect();
        Ok(Solution { vars, inputs })
    }

    fn guard_error(&self, guard: Guard, gate: usize) -> SolveError {
        match guard {
            Guard::Internal => SolveError::Unsatisfied(gate),
            Guard::Site(site) => {
                let site = self.sites[site].clone();
                match site.kind {
                    SiteKind::Assertion => SolveError::Assertion(site),
                    SiteKind::Range { bits } => SolveError::Range { site, bits },
                }
            }
        }
    }

    /// Re-checks every row of the constraint system against an assignment.
    pub fn is_satisfied(&self, solution: &Solution) -> bool {
        if solution.vars.len() != self.num_vars || solution.inputs.len() != self.num_inputs() {
            return false;
        }
        let vars: Vec<Option<Scalar>> = solution.vars.iter().copied().map(Some).collect();
        let value = |v: &CircuitValue| evaluate(v, &vars, &solution.inputs, 0).ok();
        let row = |a: Option<Scalar>, b: Option<Scalar>, c: Option<Scalar>| match (a, b, c) {
            (Some(a), Some(b), Some(c)) => a * b == c,
            _ => false,
        };
        let gates_hold = self.gates.iter().all(|gate| match gate {
            Circuit::Eq(y, a) => value(a).is_some() && value(a) == vars[*y],
            Circuit::Add(y, a, b) => match (value(a), value(b)) {
                (Some(a), Some(b)) => Some(a + b) == vars[*y],
                _ => false,
            },
            Circuit::Mult(y, a, b) => row(value(a), value(b), vars[*y]),
            Circuit::Bit(..) | Circuit::Inverse(..) => true,
            Circuit::Check(a, b, c, _) => row(value(a), value(b), value(c)),
        });
        let outputs_hold = self
            .outputs
            .iter()
            .enumerate()
            .all(|(i, output)| value(output) == Some(solution.inputs[self.num_public_args + i]));
        gates_hold && outputs_hold
    }
}

fn evaluate(
    value: &CircuitValue,
    vars: &[Option<Scalar>],
    inputs: &[Scalar],
    gate: usize,
) -> Result<Scalar, SolveError> {
    match *value {
        CircuitValue::Variable(var) => vars
            .get(var)
            .copied()
            .flatten()
            .ok_or(SolveError::Unassigned { gate, var }),
        CircuitValue::Input(input) => {
            inputs
                .get(input)
                .copied()
                .ok_or(SolveError::UnknownInput {
                    gate,
                    input,
                    available: inputs.len(),
                })
        }
        CircuitValue::Constant(c) => Ok(c),
    }
}
