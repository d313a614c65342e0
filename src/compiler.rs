use std::{
    cmp::Ordering,
    collections::{HashMap, HashSet},
};

use curve25519_dalek::Scalar;

use crate::{
    ast::{
        BinaryOp, Expr, ExprKind, LocalType, Location, ParamType, Program, Signature, Statement,
        UnaryOp, Visibility,
    },
    circuit::{Circuit, CircuitValue, CompiledProgram, Guard, GuardSite, SiteKind, Slot},
    error::CompilationError,
    parser, scalar,
};

pub type Id = usize;

/// Upper bound on the loop iterations unrolled into a single program.
pub const MAX_UNROLLED_ITERATIONS: u64 = 1 << 16;

/// Upper bound on the flattened field elements taken by `main`.
pub const MAX_ARGUMENT_ELEMENTS: usize = 1 << 16;

/// Widest comparison range; `2^(bits + 1)` must stay well below the field order.
pub const MAX_COMPARISON_BITS: u32 = 248;

type Result<T> = std::result::Result<T, CompilationError>;

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Field(CircuitValue),
    Bool(CircuitValue),
    Array(Vec<CircuitValue>),
}

impl Value {
    fn type_name(&self) -> String {
        match self {
            Value::Field(_) => "field".to_string(),
            Value::Bool(_) => "bool".to_string(),
            Value::Array(elems) => format!("field[{}]", elems.len()),
        }
    }
}

#[derive(Debug, Clone)]
struct Binding {
    value: Value,
    mutable: bool,
}

/// Parses `source`, checks it against the declared interface and lowers it to gates.
pub fn compile_source(
    source: &str,
    declared: &Signature,
    comparison_bits: u32,
) -> Result<CompiledProgram> {
    let program = parser::parse(source)?;
    if &program.signature != declared {
        return Err(CompilationError::new(
            program.location,
            format!(
                "source signature {} does not match the declared signature {}",
                program.signature, declared
            ),
        ));
    }
    Compiler::new(comparison_bits).compile(&program)
}

#[derive(Debug, Clone)]
pub struct Compiler {
    comparison_bits: u32,
    variables_counter: Id,
    gates: Vec<Circuit>,
    sites: Vec<GuardSite>,
    scopes: Vec<HashMap<String, Binding>>,
    // (is_input, id) of values already proven to fit the comparison range
    ranged: HashSet<(bool, Id)>,
    unrolled: u64,
}

impl Compiler {
    pub fn new(comparison_bits: u32) -> Self {
        Compiler {
            comparison_bits,
            variables_counter: 0,
            gates: vec![],
            sites: vec![],
            scopes: vec![HashMap::new()],
            ranged: HashSet::new(),
            unrolled: 0,
        }
    }

    pub fn compile(mut self, program: &Program) -> Result<CompiledProgram> {
        if !(1..=MAX_COMPARISON_BITS).contains(&self.comparison_bits) {
            return Err(CompilationError::new(
                program.location,
                format!(
                    "comparison width must be within 1..={MAX_COMPARISON_BITS} bits, got {}",
                    self.comparison_bits
                ),
            ));
        }
        let total = program
            .signature
            .params
            .iter()
            .try_fold(0usize, |acc, param| acc.checked_add(param.ty.width()))
            .filter(|&total| total <= MAX_ARGUMENT_ELEMENTS);
        if total.is_none() {
            return Err(CompilationError::new(
                program.location,
                format!("arguments of main exceed {MAX_ARGUMENT_ELEMENTS} field elements"),
            ));
        }

        let mut arguments = vec![];
        let mut num_public_args = 0;
        for param in program.signature.params.iter() {
            let mut elems = Vec::with_capacity(param.ty.width());
            for _ in 0..param.ty.width() {
                let value = match param.visibility {
                    Visibility::Public => {
                        arguments.push(Slot::Public(num_public_args));
                        num_public_args += 1;
                        CircuitValue::Input(num_public_args - 1)
                    }
                    Visibility::Private => {
                        let var = self.fresh();
                        arguments.push(Slot::Private(var));
                        CircuitValue::Variable(var)
                    }
                };
                elems.push(value);
            }
            let value = match param.ty {
                ParamType::Field => Value::Field(elems[0]),
                ParamType::FieldArray(_) => Value::Array(elems),
            };
            self.bind(&param.name, value, false, program.location)?;
        }

        let mut outputs = None;
        for statement in program.body.iter() {
            if outputs.is_some() {
                return Err(CompilationError::new(
                    statement.location(),
                    "unreachable statement after return",
                ));
            }
            match statement {
                Statement::Return { value, location } => {
                    outputs = Some(self.return_value(
                        value.as_ref(),
                        *location,
                        program.signature.returns_field,
                    )?);
                }
                other => self.statement(other)?,
            }
        }
        let outputs = outputs.ok_or_else(|| {
            CompilationError::new(program.location, "main must end with a return statement")
        })?;

        Ok(CompiledProgram {
            gates: self.gates,
            num_vars: self.variables_counter,
            arguments,
            num_public_args,
            outputs,
            sites: self.sites,
        })
    }

    fn return_value(
        &mut self,
        value: Option<&Expr>,
        location: Location,
        returns_field: bool,
    ) -> Result<Vec<CircuitValue>> {
        match (value, returns_field) {
            (Some(expr), true) => Ok(vec![self.field(expr)?]),
            (None, false) => Ok(vec![]),
            (Some(_), false) => Err(CompilationError::new(
                location,
                "main does not declare a return value",
            )),
            (None, true) => Err(CompilationError::new(
                location,
                "main must return a field value",
            )),
        }
    }

    fn statement(&mut self, statement: &Statement) -> Result<()> {
        match statement {
            Statement::Define {
                name,
                ty,
                mutable,
                value,
                location,
            } => {
                let value = match ty {
                    LocalType::Field => Value::Field(self.field(value)?),
                    LocalType::Bool => Value::Bool(self.boolean(value)?),
                };
                self.bind(name, value, *mutable, *location)
            }
            Statement::Assign {
                name,
                value,
                location,
            } => {
                let value = self.expr(value)?;
                let binding = self
                    .scopes
                    .iter_mut()
                    .rev()
                    .find_map(|scope| scope.get_mut(name))
                    .ok_or_else(|| {
                        CompilationError::new(*location, format!("undeclared variable `{name}`"))
                    })?;
                if !binding.mutable {
                    return Err(CompilationError::new(
                        *location,
                        format!("cannot assign twice to immutable variable `{name}`"),
                    ));
                }
                let compatible = matches!(
                    (&binding.value, &value),
                    (Value::Field(_), Value::Field(_)) | (Value::Bool(_), Value::Bool(_))
                );
                if !compatible {
                    return Err(CompilationError::new(
                        *location,
                        format!(
                            "cannot assign a {} to `{name}` of type {}",
                            value.type_name(),
                            binding.value.type_name()
                        ),
                    ));
                }
                binding.value = value;
                Ok(())
            }
            Statement::Assert {
                condition,
                text,
                location,
            } => {
                let condition = self.boolean(condition)?;
                if condition == CircuitValue::ONE {
                    return Ok(());
                }
                let site = self.site(SiteKind::Assertion, *location, text.clone());
                self.gates.push(Circuit::Check(
                    condition,
                    CircuitValue::ONE,
                    CircuitValue::ONE,
                    Guard::Site(site),
                ));
                Ok(())
            }
            Statement::For {
                var,
                start,
                end,
                body,
                location,
            } => {
                if self.lookup(var).is_some() {
                    return Err(CompilationError::new(
                        *location,
                        format!("`{var}` is already defined"),
                    ));
                }
                for i in *start..*end {
                    self.unrolled += 1;
                    if self.unrolled > MAX_UNROLLED_ITERATIONS {
                        return Err(CompilationError::new(
                            *location,
                            format!("more than {MAX_UNROLLED_ITERATIONS} loop iterations to unroll"),
                        ));
                    }
                    let mut scope = HashMap::new();
                    scope.insert(
                        var.clone(),
                        Binding {
                            value: Value::Field(CircuitValue::Constant(Scalar::from(i))),
                            mutable: false,
                        },
                    );
                    self.scopes.push(scope);
                    for statement in body.iter() {
                        self.statement(statement)?;
                    }
                    self.scopes.pop();
                }
                Ok(())
            }
            Statement::Return { location, .. } => Err(CompilationError::new(
                *location,
                "return is only allowed as the last statement of main",
            )),
        }
    }

    fn bind(&mut self, name: &str, value: Value, mutable: bool, location: Location) -> Result<()> {
        if self.lookup(name).is_some() {
            return Err(CompilationError::new(
                location,
                format!("`{name}` is already defined"),
            ));
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), Binding { value, mutable });
        }
        Ok(())
    }

    fn lookup(&self, name: &str) -> Option<&Binding> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    fn field(&mut self, expr: &Expr) -> Result<CircuitValue> {
        match self.expr(expr)? {
            Value::Field(value) => Ok(value),
            other => Err(CompilationError::new(
                expr.location,
                format!("expected field, found {}", other.type_name()),
            )),
        }
    }

    fn boolean(&mut self, expr: &Expr) -> Result<CircuitValue> {
        match self.expr(expr)? {
            Value::Bool(value) => Ok(value),
            other => Err(CompilationError::new(
                expr.location,
                format!("expected bool, found {}", other.type_name()),
            )),
        }
    }

    fn expr(&mut self, expr: &Expr) -> Result<Value> {
        match &expr.kind {
            ExprKind::Number(literal) => scalar::parse_decimal(literal)
                .map(|c| Value::Field(CircuitValue::Constant(c)))
                .map_err(|e| CompilationError::new(expr.location, e.to_string())),
            ExprKind::Bool(b) => Ok(Value::Bool(bool_constant(*b))),
            ExprKind::Ident(name) => self
                .lookup(name)
                .map(|binding| binding.value.clone())
                .ok_or_else(|| {
                    CompilationError::new(expr.location, format!("undeclared variable `{name}`"))
                }),
            ExprKind::Index(base, index) => {
                let elems = match self.expr(base)? {
                    Value::Array(elems) => elems,
                    other => {
                        return Err(CompilationError::new(
                            base.location,
                            format!("cannot index into a value of type {}", other.type_name()),
                        ))
                    }
                };
                let index_value = self.field(index)?;
                let i = index_value
                    .constant()
                    .ok_or_else(|| {
                        CompilationError::new(
                            index.location,
                            "array index must be known at compile time",
                        )
                    })?;
                scalar::to_u64(&i)
                    .and_then(|i| elems.get(i as usize).copied())
                    .map(Value::Field)
                    .ok_or_else(|| {
                        CompilationError::new(
                            index.location,
                            format!(
                                "index {} is out of bounds for field[{}]",
                                scalar::to_decimal(&i),
                                elems.len()
                            ),
                        )
                    })
            }
            ExprKind::Unary(UnaryOp::Neg, operand) => {
                let value = self.field(operand)?;
                Ok(Value::Field(self.neg(value)))
            }
            ExprKind::Unary(UnaryOp::Not, operand) => {
                let value = self.boolean(operand)?;
                Ok(Value::Bool(self.not(value)))
            }
            ExprKind::Binary(op, lhs, rhs) => self.binary(*op, lhs, rhs, expr.location),
            ExprKind::Ternary(condition, then, otherwise) => {
                let condition = self.boolean(condition)?;
                let then_value = self.expr(then)?;
                let else_value = self.expr(otherwise)?;
                match (then_value, else_value) {
                    (Value::Field(x), Value::Field(y)) => {
                        Ok(Value::Field(self.select(condition, x, y)))
                    }
                    (Value::Bool(x), Value::Bool(y)) => Ok(Value::Bool(self.select(condition, x, y))),
                    (x, y) => Err(CompilationError::new(
                        expr.location,
                        format!(
                            "ternary branches have different types: {} and {}",
                            x.type_name(),
                            y.type_name()
                        ),
                    )),
                }
            }
        }
    }

    fn binary(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr, location: Location) -> Result<Value> {
        match op {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul => {
                let a = self.field(lhs)?;
                let b = self.field(rhs)?;
                let value = match op {
                    BinaryOp::Add => self.add(a, b),
                    BinaryOp::Sub => self.sub(a, b),
                    _ => self.mul(a, b),
                };
                Ok(Value::Field(value))
            }
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                let a = self.field(lhs)?;
                let b = self.field(rhs)?;
                self.range_check(a, lhs, location)?;
                self.range_check(b, rhs, location)?;
                let value = match op {
                    BinaryOp::Gt => self.greater_or_equal(a, b, 1),
                    BinaryOp::Ge => self.greater_or_equal(a, b, 0),
                    BinaryOp::Lt => self.greater_or_equal(b, a, 1),
                    _ => self.greater_or_equal(b, a, 0),
                };
                Ok(Value::Bool(value))
            }
            BinaryOp::Eq | BinaryOp::Ne => {
                let (a, b) = match (self.expr(lhs)?, self.expr(rhs)?) {
                    (Value::Field(a), Value::Field(b)) | (Value::Bool(a), Value::Bool(b)) => (a, b),
                    (a, b) => {
                        return Err(CompilationError::new(
                            location,
                            format!("cannot compare {} with {}", a.type_name(), b.type_name()),
                        ))
                    }
                };
                let equal = self.equals(a, b);
                let value = if op == BinaryOp::Eq {
                    equal
                } else {
                    self.not(equal)
                };
                Ok(Value::Bool(value))
            }
            BinaryOp::And | BinaryOp::Or => {
                let a = self.boolean(lhs)?;
                let b = self.boolean(rhs)?;
                let value = if op == BinaryOp::And {
                    self.mul(a, b)
                } else {
                    // a + b - ab
                    let sum = self.add(a, b);
                    let product = self.mul(a, b);
                    self.sub(sum, product)
                };
                Ok(Value::Bool(value))
            }
        }
    }

    fn fresh(&mut self) -> Id {
        let id = self.variables_counter;
        self.variables_counter += 1;
        id
    }

    fn site(&mut self, kind: SiteKind, location: Location, text: String) -> usize {
        self.sites.push(GuardSite {
            kind,
            location,
            text,
        });
        self.sites.len() - 1
    }

    fn add(&mut self, a: CircuitValue, b: CircuitValue) -> CircuitValue {
        match (a.constant(), b.constant()) {
            (Some(x), Some(y)) => CircuitValue::Constant(x + y),
            (Some(x), _) if x == Scalar::ZERO => b,
            (_, Some(y)) if y == Scalar::ZERO => a,
            _ => {
                let y = self.fresh();
                self.gates.push(Circuit::Add(y, a, b));
                CircuitValue::Variable(y)
            }
        }
    }

    fn mul(&mut self, a: CircuitValue, b: CircuitValue) -> CircuitValue {
        match (a.constant(), b.constant()) {
            (Some(x), Some(y)) => CircuitValue::Constant(x * y),
            (Some(x), _) | (_, Some(x)) if x == Scalar::ZERO => CircuitValue::ZERO,
            (Some(x), _) if x == Scalar::ONE => b,
            (_, Some(y)) if y == Scalar::ONE => a,
            _ => {
                let y = self.fresh();
                self.gates.push(Circuit::Mult(y, a, b));
                CircuitValue::Variable(y)
            }
        }
    }

    fn neg(&mut self, a: CircuitValue) -> CircuitValue {
        self.mul(CircuitValue::Constant(scalar::from_i64(-1)), a)
    }

    fn sub(&mut self, a: CircuitValue, b: CircuitValue) -> CircuitValue {
        let minus_b = self.neg(b);
        self.add(a, minus_b)
    }

    fn not(&mut self, a: CircuitValue) -> CircuitValue {
        self.sub(CircuitValue::ONE, a)
    }

    // condition ? x : y == y + condition * (x - y)
    fn select(&mut self, condition: CircuitValue, x: CircuitValue, y: CircuitValue) -> CircuitValue {
        let diff = self.sub(x, y);
        let picked = self.mul(condition, diff);
        self.add(y, picked)
    }

    fn equals(&mut self, a: CircuitValue, b: CircuitValue) -> CircuitValue {
        let d = self.sub(a, b);
        if let Some(d) = d.constant() {
            return bool_constant(d == Scalar::ZERO);
        }
        let inverse = self.fresh();
        self.gates.push(Circuit::Inverse(inverse, d));
        let t = self.mul(d, CircuitValue::Variable(inverse));
        let out = self.sub(CircuitValue::ONE, t);
        // d != 0 forces out = 0, hence t = 1
        self.gates
            .push(Circuit::Check(d, out, CircuitValue::ZERO, Guard::Internal));
        out
    }

    /// Proves `value < 2^comparison_bits`, once per distinct value.
    fn range_check(&mut self, value: CircuitValue, operand: &Expr, location: Location) -> Result<()> {
        let bits = self.comparison_bits;
        let key = match value {
            CircuitValue::Constant(c) => {
                if scalar::fits_bits(&c, bits) {
                    return Ok(());
                }
                return Err(CompilationError::new(
                    operand.location,
                    format!(
                        "constant {} exceeds the {bits}-bit comparison range",
                        scalar::to_decimal(&c)
                    ),
                ));
            }
            CircuitValue::Variable(id) => (false, id),
            CircuitValue::Input(id) => (true, id),
        };
        if self.ranged.insert(key) {
            let site = self.site(SiteKind::Range { bits }, location, render(operand));
            self.decompose(value, bits, Guard::Site(site));
        }
        Ok(())
    }

    /// 1 iff `a >= b + offset`, for operands already known to fit in `k` bits:
    /// bit `k` of `a - b - offset + 2^k`.
    fn greater_or_equal(&mut self, a: CircuitValue, b: CircuitValue, offset: u64) -> CircuitValue {
        if let (Some(x), Some(y)) = (a.constant(), b.constant()) {
            let holds = scalar::cmp(&x, &(y + Scalar::from(offset))) != Ordering::Less;
            return bool_constant(holds);
        }
        let k = self.comparison_bits;
        let diff = self.sub(a, b);
        let shift = CircuitValue::Constant(scalar::pow2(k) - Scalar::from(offset));
        let shifted = self.add(diff, shift);
        let bits = self.decompose(shifted, k + 1, Guard::Internal);
        bits[k as usize]
    }

    fn decompose(&mut self, value: CircuitValue, num_bits: u32, guard: Guard) -> Vec<CircuitValue> {
        let mut bits = Vec::with_capacity(num_bits as usize);
        let mut acc = CircuitValue::ZERO;
        for i in 0..num_bits {
            let bit = self.fresh();
            self.gates.push(Circuit::Bit(bit, value, i));
            let bit = CircuitValue::Variable(bit);
            self.gates.push(Circuit::Check(bit, bit, bit, Guard::Internal));
            let weighted = self.mul(bit, CircuitValue::Constant(scalar::pow2(i)));
            acc = self.add(acc, weighted);
            bits.push(bit);
        }
        self.gates
            .push(Circuit::Check(acc, CircuitValue::ONE, value, guard));
        bits
    }
}

fn bool_constant(b: bool) -> CircuitValue {
    if b {
        CircuitValue::ONE
    } else {
        CircuitValue::ZERO
    }
}

/// Short source-like rendering of an expression for diagnostics.
fn render(expr: &Expr) -> String {
    match &expr.kind {
        ExprKind::Number(literal) => literal.clone(),
        ExprKind::Bool(b) => b.to_string(),
        ExprKind::Ident(name) => name.clone(),
        ExprKind::Index(base, index) => format!("{}[{}]", render(base), render(index)),
        ExprKind::Unary(UnaryOp::Neg, operand) => format!("-{}", render(operand)),
        ExprKind::Unary(UnaryOp::Not, operand) => format!("!{}", render(operand)),
        ExprKind::Binary(op, lhs, rhs) => format!("({} {op} {})", render(lhs), render(rhs)),
        ExprKind::Ternary(c, x, y) => {
            format!("({} ? {} : {})", render(c), render(x), render(y))
        }
    }
}
