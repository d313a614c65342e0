use std::collections::BTreeMap;

use curve25519_dalek::Scalar;
use libspartan::{Assignment, Instance};
use serde::{Deserialize, Serialize};

use crate::circuit::{Circuit, CircuitValue, CompiledProgram};

pub type Entry = (usize, usize, [u8; 32]);

/// Smallest padded row and column count handed to the proving system.
pub const MIN_PADDED_SIZE: usize = 4;

/// Sizes of the padded constraint system, as handed to the proving system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct R1csShape {
    pub num_cons: usize,
    pub num_vars: usize,
    pub num_inputs: usize,
    pub num_non_zero_entries: usize,
}

/// Sparse constraint matrices over z = (vars, 1, inputs).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct R1CS {
    pub shape: R1csShape,
    pub a: Vec<Entry>,
    pub b: Vec<Entry>,
    pub c: Vec<Entry>,
}

impl R1CS {
    pub fn instance(&self) -> Result<Instance, String> {
        Instance::new(
            self.shape.num_cons,
            self.shape.num_vars,
            self.shape.num_inputs,
            &self.a,
            &self.b,
            &self.c,
        )
        .map_err(|e| format!("{e:?}"))
    }

    /// Private assignment padded with zeros up to the padded variable count.
    pub fn vars_assignment(&self, vars: &[Scalar]) -> Result<Assignment, String> {
        if vars.len() > self.shape.num_vars {
            return Err(format!(
                "{} variables do not fit into {} columns",
                vars.len(),
                self.shape.num_vars
            ));
        }
        let bytes = vars
            .iter()
            .map(|x| x.to_bytes())
            .chain(std::iter::repeat([0u8; 32]))
            .take(self.shape.num_vars)
            .collect::<Vec<_>>();
        Assignment::new(&bytes).map_err(|e| format!("{e:?}"))
    }

    pub fn inputs_assignment(&self, inputs: &[Scalar]) -> Result<Assignment, String> {
        if inputs.len() != self.shape.num_inputs {
            return Err(format!(
                "expected {} public inputs, got {}",
                self.shape.num_inputs,
                inputs.len()
            ));
        }
        let bytes = inputs.iter().map(|x| x.to_bytes()).collect::<Vec<_>>();
        Assignment::new(&bytes).map_err(|e| format!("{e:?}"))
    }
}

#[derive(Default)]
struct Matrix(BTreeMap<(usize, usize), Scalar>);

impl Matrix {
    fn push(&mut self, row: usize, (col, coeff): (usize, Scalar)) {
        *self.0.entry((row, col)).or_insert(Scalar::ZERO) += coeff;
    }

    fn entries(self) -> Vec<Entry> {
        self.0
            .into_iter()
            .filter(|(_, coeff)| *coeff != Scalar::ZERO)
            .map(|((row, col), coeff)| (row, col, coeff.to_bytes()))
            .collect()
    }
}

/// Emits one row per arithmetic gate and check, one per output binding and a final
/// `1 * 1 = 1` row. Advice gates emit nothing.
pub fn into_r1cs(program: &CompiledProgram) -> R1CS {
    let num_inputs = program.num_inputs();
    let num_vars = program
        .num_vars
        .max(num_inputs + 1)
        .max(MIN_PADDED_SIZE)
        .next_power_of_two();
    let num_cons = program
        .num_constraints()
        .max(MIN_PADDED_SIZE)
        .next_power_of_two();

    let column = |value: &CircuitValue| match *value {
        CircuitValue::Variable(var) => (var, Scalar::ONE),
        CircuitValue::Constant(con) => (num_vars, con),
        CircuitValue::Input(input) => (num_vars + 1 + input, Scalar::ONE),
    };
    let one = column(&CircuitValue::ONE);

    let mut a = Matrix::default();
    let mut b = Matrix::default();
    let mut c = Matrix::default();
    let mut row = 0;
    for circuit in program.gates.iter() {
        match circuit {
            Circuit::Eq(y, x) => {
                a.push(row, column(x));
                b.push(row, one);
                c.push(row, (*y, Scalar::ONE));
            }
            Circuit::Add(y, x1, x2) => {
                a.push(row, column(x1));
                a.push(row, column(x2));
                b.push(row, one);
                c.push(row, (*y, Scalar::ONE));
            }
            Circuit::Mult(y, x1, x2) => {
                a.push(row, column(x1));
                b.push(row, column(x2));
                c.push(row, (*y, Scalar::ONE));
            }
            Circuit::Check(x1, x2, x3, _) => {
                a.push(row, column(x1));
                b.push(row, column(x2));
                c.push(row, column(x3));
            }
            Circuit::Bit(..) | Circuit::Inverse(..) => continue,
        }
        row += 1;
    }
    for (k, output) in program.outputs.iter().enumerate() {
        a.push(row, column(output));
        b.push(row, one);
        c.push(row, column(&CircuitValue::Input(program.num_public_args + k)));
        row += 1;
    }
    a.push(row, one);
    b.push(row, one);
    c.push(row, one);

    let (a, b, c) = (a.entries(), b.entries(), c.entries());
    let num_non_zero_entries = a.len().max(b.len()).max(c.len());
    R1CS {
        shape: R1csShape {
            num_cons,
            num_vars,
            num_inputs,
            num_non_zero_entries,
        },
        a,
        b,
        c,
    }
}
