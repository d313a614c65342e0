use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

impl Location {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Visibility {
    Public,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamType {
    Field,
    FieldArray(usize),
}

impl ParamType {
    /// Number of field elements the parameter occupies once flattened.
    pub fn width(&self) -> usize {
        match self {
            ParamType::Field => 1,
            ParamType::FieldArray(len) => *len,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamType::Field => f.write_str("field"),
            ParamType::FieldArray(len) => write!(f, "field[{len}]"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub visibility: Visibility,
    pub ty: ParamType,
}

/// Declared interface of a circuit's `main`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Signature {
    pub params: Vec<Param>,
    pub returns_field: bool,
}

impl Signature {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn private_field(mut self, name: &str) -> Self {
        self.params.push(Param {
            name: name.to_string(),
            visibility: Visibility::Private,
            ty: ParamType::Field,
        });
        self
    }

    pub fn public_field(mut self, name: &str) -> Self {
        self.params.push(Param {
            name: name.to_string(),
            visibility: Visibility::Public,
            ty: ParamType::Field,
        });
        self
    }

    pub fn public_array(mut self, name: &str, len: usize) -> Self {
        self.params.push(Param {
            name: name.to_string(),
            visibility: Visibility::Public,
            ty: ParamType::FieldArray(len),
        });
        self
    }

    pub fn private_array(mut self, name: &str, len: usize) -> Self {
        self.params.push(Param {
            name: name.to_string(),
            visibility: Visibility::Private,
            ty: ParamType::FieldArray(len),
        });
        self
    }

    pub fn returns_field(mut self) -> Self {
        self.returns_field = true;
        self
    }

    pub fn num_public_values(&self) -> usize {
        self.params
            .iter()
            .filter(|p| p.visibility == Visibility::Public)
            .map(|p| p.ty.width())
            .sum()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            if param.visibility == Visibility::Private {
                f.write_str("private ")?;
            }
            write!(f, "{} {}", param.ty, param.name)?;
        }
        f.write_str(")")?;
        if self.returns_field {
            f.write_str(" -> field")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalType {
    Field,
    Bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        };
        f.write_str(op)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprKind {
    Number(String),
    Bool(bool),
    Ident(String),
    Index(Box<Expr>, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expr {
    pub kind: ExprKind,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Define {
        name: String,
        ty: LocalType,
        mutable: bool,
        value: Expr,
        location: Location,
    },
    Assign {
        name: String,
        value: Expr,
        location: Location,
    },
    Assert {
        condition: Expr,
        /// Source text of the condition, kept for error reporting.
        text: String,
        location: Location,
    },
    For {
        var: String,
        start: u64,
        end: u64,
        body: Vec<Statement>,
        location: Location,
    },
    Return {
        value: Option<Expr>,
        location: Location,
    },
}

impl Statement {
    pub fn location(&self) -> Location {
        match self {
            Statement::Define { location, .. }
            | Statement::Assign { location, .. }
            | Statement::Assert { location, .. }
            | Statement::For { location, .. }
            | Statement::Return { location, .. } => *location,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    pub signature: Signature,
    pub body: Vec<Statement>,
    pub location: Location,
}
