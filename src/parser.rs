//! Lexer and recursive-descent parser for the circuit language.
//!
//! ```text
//! def main(private field age, field challenge_id, field[100] values) -> field {
//!     assert(age > 18 && challenge_id > 0);
//!     field mut acc = (age >= 18) ? 1 : 0;
//!     for u32 i in 0..100 { acc = acc + values[i]; }
//!     return acc * challenge_id;
//! }
//! ```

use crate::{
    ast::{
        BinaryOp, Expr, ExprKind, LocalType, Location, Param, ParamType, Program, Signature,
        Statement, UnaryOp, Visibility,
    },
    compiler::MAX_ARGUMENT_ELEMENTS,
    error::CompilationError,
};

const KEYWORDS: &[&str] = &[
    "def", "main", "private", "field", "bool", "mut", "assert", "return", "for", "in", "u32",
    "true", "false",
];

// longest first so that `<=` wins over `<`
const SYMBOLS: &[&str] = &[
    "->", "..", "==", "!=", "<=", ">=", "&&", "||", "(", ")", "{", "}", "[", "]", ",", ";", "=",
    "<", ">", "+", "-", "*", "!", "?", ":",
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Number(String),
    Symbol(&'static str),
    Eof,
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    location: Location,
    start: usize,
    end: usize,
}

fn tokenize(source: &str) -> Result<Vec<Spanned>, CompilationError> {
    let bytes = source.as_bytes();
    let mut tokens = vec![];
    let (mut pos, mut line, mut line_start) = (0, 1, 0);

    while pos < bytes.len() {
        let c = bytes[pos];
        let location = Location::new(line, pos - line_start + 1);
        if c == b'\n' {
            pos += 1;
            line += 1;
            line_start = pos;
        } else if c.is_ascii_whitespace() {
            pos += 1;
        } else if source[pos..].starts_with("//") {
            while pos < bytes.len() && bytes[pos] != b'\n' {
                pos += 1;
            }
        } else if c.is_ascii_digit() {
            let start = pos;
            while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                pos += 1;
            }
            tokens.push(Spanned {
                token: Token::Number(source[start..pos].to_string()),
                location,
                start,
                end: pos,
            });
        } else if c.is_ascii_alphabetic() || c == b'_' {
            let start = pos;
            while pos < bytes.len() && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_') {
                pos += 1;
            }
            tokens.push(Spanned {
                token: Token::Ident(source[start..pos].to_string()),
                location,
                start,
                end: pos,
            });
        } else {
            let symbol = SYMBOLS
                .iter()
                .find(|s| source[pos..].starts_with(**s))
                .ok_or_else(|| {
                    let found = source[pos..].chars().next().unwrap_or('?');
                    CompilationError::new(location, format!("unexpected character `{found}`"))
                })?;
            tokens.push(Spanned {
                token: Token::Symbol(symbol),
                location,
                start: pos,
                end: pos + symbol.len(),
            });
            pos += symbol.len();
        }
    }

    tokens.push(Spanned {
        token: Token::Eof,
        location: Location::new(line, pos - line_start + 1),
        start: pos,
        end: pos,
    });
    Ok(tokens)
}

pub fn parse(source: &str) -> Result<Program, CompilationError> {
    let mut parser = Parser {
        source,
        tokens: tokenize(source)?,
        pos: 0,
    };
    parser.program()
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> &Spanned {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Spanned {
        let token = self.peek().clone();
        if token.token != Token::Eof {
            self.pos += 1;
        }
        token
    }

    fn error<T>(&self, message: impl Into<String>) -> Result<T, CompilationError> {
        Err(CompilationError::new(self.peek().location, message))
    }

    fn describe(&self) -> String {
        match &self.peek().token {
            Token::Ident(name) => format!("`{name}`"),
            Token::Number(n) => format!("`{n}`"),
            Token::Symbol(s) => format!("`{s}`"),
            Token::Eof => "end of input".to_string(),
        }
    }

    fn at_symbol(&self, symbol: &str) -> bool {
        matches!(&self.peek().token, Token::Symbol(s) if *s == symbol)
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(&self.peek().token, Token::Ident(name) if name == keyword)
    }

    fn eat_symbol(&mut self, symbol: &str) -> bool {
        if self.at_symbol(symbol) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.at_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, symbol: &str) -> Result<Location, CompilationError> {
        let location = self.peek().location;
        if self.eat_symbol(symbol) {
            Ok(location)
        } else {
            self.error(format!("expected `{symbol}`, found {}", self.describe()))
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<Location, CompilationError> {
        let location = self.peek().location;
        if self.eat_keyword(keyword) {
            Ok(location)
        } else {
            self.error(format!("expected `{keyword}`, found {}", self.describe()))
        }
    }

    fn ident(&mut self) -> Result<String, CompilationError> {
        match self.peek().token.clone() {
            Token::Ident(name) if !KEYWORDS.contains(&name.as_str()) => {
                self.pos += 1;
                Ok(name)
            }
            _ => self.error(format!("expected identifier, found {}", self.describe())),
        }
    }

    fn integer(&mut self) -> Result<u64, CompilationError> {
        let Token::Number(digits) = self.peek().token.clone() else {
            return self.error(format!("expected integer, found {}", self.describe()));
        };
        let value = match digits.parse::<u64>() {
            Ok(value) => value,
            Err(_) => return self.error(format!("`{digits}` is too large for a u32 context")),
        };
        self.pos += 1;
        Ok(value)
    }

    fn program(&mut self) -> Result<Program, CompilationError> {
        let location = self.expect_keyword("def")?;
        self.expect_keyword("main")?;
        self.expect_symbol("(")?;
        let mut params: Vec<Param> = vec![];
        if !self.at_symbol(")") {
            loop {
                let param_location = self.peek().location;
                let param = self.param()?;
                if params.iter().any(|p| p.name == param.name) {
                    return Err(CompilationError::new(
                        param_location,
                        format!("parameter `{}` is declared twice", param.name),
                    ));
                }
                params.push(param);
                if !self.eat_symbol(",") {
                    break;
                }
            }
        }
        self.expect_symbol(")")?;
        let returns_field = if self.eat_symbol("->") {
            self.expect_keyword("field")?;
            true
        } else {
            false
        };
        let body = self.block()?;
        if self.peek().token != Token::Eof {
            return self.error(format!("unexpected {} after `main`", self.describe()));
        }
        Ok(Program {
            signature: Signature {
                params,
                returns_field,
            },
            body,
            location,
        })
    }

    fn param(&mut self) -> Result<Param, CompilationError> {
        let visibility = if self.eat_keyword("private") {
            Visibility::Private
        } else {
            Visibility::Public
        };
        self.expect_keyword("field")?;
        let ty = if self.eat_symbol("[") {
            let location = self.peek().location;
            let len = self.integer()?;
            self.expect_symbol("]")?;
            if len == 0 {
                return self.error("array parameters must have at least one element");
            }
            if len > MAX_ARGUMENT_ELEMENTS as u64 {
                return Err(CompilationError::new(
                    location,
                    format!("array parameters hold at most {MAX_ARGUMENT_ELEMENTS} elements, got {len}"),
                ));
            }
            ParamType::FieldArray(len as usize)
        } else {
            ParamType::Field
        };
        let name = self.ident()?;
        Ok(Param {
            name,
            visibility,
            ty,
        })
    }

    fn block(&mut self) -> Result<Vec<Statement>, CompilationError> {
        self.expect_symbol("{")?;
        let mut statements = vec![];
        while !self.at_symbol("}") {
            if self.peek().token == Token::Eof {
                return self.error("expected `}`, found end of input");
            }
            statements.push(self.statement()?);
        }
        self.expect_symbol("}")?;
        Ok(statements)
    }

    fn statement(&mut self) -> Result<Statement, CompilationError> {
        let location = self.peek().location;
        if self.at_keyword("field") || self.at_keyword("bool") {
            let ty = if self.eat_keyword("field") {
                LocalType::Field
            } else {
                self.advance();
                LocalType::Bool
            };
            let mutable = self.eat_keyword("mut");
            let name = self.ident()?;
            self.expect_symbol("=")?;
            let value = self.expr()?;
            self.expect_symbol(";")?;
            return Ok(Statement::Define {
                name,
                ty,
                mutable,
                value,
                location,
            });
        }
        if self.eat_keyword("assert") {
            self.expect_symbol("(")?;
            let start = self.peek().start;
            let condition = self.expr()?;
            let end = self.tokens[self.pos - 1].end;
            self.expect_symbol(")")?;
            self.expect_symbol(";")?;
            return Ok(Statement::Assert {
                condition,
                text: self.source[start..end].trim().to_string(),
                location,
            });
        }
        if self.eat_keyword("for") {
            self.expect_keyword("u32")?;
            let var = self.ident()?;
            self.expect_keyword("in")?;
            let start = self.integer()?;
            self.expect_symbol("..")?;
            let end = self.integer()?;
            if end < start {
                return Err(CompilationError::new(
                    location,
                    format!("loop range {start}..{end} is decreasing"),
                ));
            }
            let body = self.block()?;
            return Ok(Statement::For {
                var,
                start,
                end,
                body,
                location,
            });
        }
        if self.eat_keyword("return") {
            let value = if self.at_symbol(";") {
                None
            } else {
                Some(self.expr()?)
            };
            self.expect_symbol(";")?;
            return Ok(Statement::Return { value, location });
        }

        let name = self.ident()?;
        self.expect_symbol("=")?;
        let value = self.expr()?;
        self.expect_symbol(";")?;
        Ok(Statement::Assign {
            name,
            value,
            location,
        })
    }

    fn expr(&mut self) -> Result<Expr, CompilationError> {
        let condition = self.binary(0)?;
        if !self.at_symbol("?") {
            return Ok(condition);
        }
        let location = self.advance().location;
        let then = self.expr()?;
        self.expect_symbol(":")?;
        let otherwise = self.expr()?;
        Ok(Expr {
            kind: ExprKind::Ternary(Box::new(condition), Box::new(then), Box::new(otherwise)),
            location,
        })
    }

    /// Precedence climbing over the binary operators, loosest level first.
    fn binary(&mut self, level: usize) -> Result<Expr, CompilationError> {
        const LEVELS: &[&[(&str, BinaryOp)]] = &[
            &[("||", BinaryOp::Or)],
            &[("&&", BinaryOp::And)],
            &[("==", BinaryOp::Eq), ("!=", BinaryOp::Ne)],
            &[
                ("<=", BinaryOp::Le),
                (">=", BinaryOp::Ge),
                ("<", BinaryOp::Lt),
                (">", BinaryOp::Gt),
            ],
            &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
            &[("*", BinaryOp::Mul)],
        ];
        if level == LEVELS.len() {
            return self.unary();
        }

        let mut lhs = self.binary(level + 1)?;
        'outer: loop {
            for (symbol, op) in LEVELS[level] {
                if self.at_symbol(symbol) {
                    let location = self.advance().location;
                    let rhs = self.binary(level + 1)?;
                    lhs = Expr {
                        kind: ExprKind::Binary(*op, Box::new(lhs), Box::new(rhs)),
                        location,
                    };
                    continue 'outer;
                }
            }
            return Ok(lhs);
        }
    }

    fn unary(&mut self) -> Result<Expr, CompilationError> {
        let op = if self.at_symbol("-") {
            UnaryOp::Neg
        } else if self.at_symbol("!") {
            UnaryOp::Not
        } else {
            return self.postfix();
        };
        let location = self.advance().location;
        let operand = self.unary()?;
        Ok(Expr {
            kind: ExprKind::Unary(op, Box::new(operand)),
            location,
        })
    }

    fn postfix(&mut self) -> Result<Expr, CompilationError> {
        let mut expr = self.primary()?;
        while self.at_symbol("[") {
            let location = self.advance().location;
            let index = self.expr()?;
            self.expect_symbol("]")?;
            expr = Expr {
                kind: ExprKind::Index(Box::new(expr), Box::new(index)),
                location,
            };
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, CompilationError> {
        let location = self.peek().location;
        let kind = match self.peek().token.clone() {
            Token::Number(digits) => {
                self.advance();
                ExprKind::Number(digits)
            }
            Token::Ident(name) if name == "true" || name == "false" => {
                self.advance();
                ExprKind::Bool(name == "true")
            }
            Token::Ident(_) => ExprKind::Ident(self.ident()?),
            Token::Symbol("(") => {
                self.advance();
                let inner = self.expr()?;
                self.expect_symbol(")")?;
                return Ok(inner);
            }
            _ => return self.error(format!("expected expression, found {}", self.describe())),
        };
        Ok(Expr { kind, location })
    }
}
