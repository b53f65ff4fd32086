// src/ast.rs

use crate::error::Location;

#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    Number(f64),
    Str(String),
    Boolean(bool),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Exp,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
    Increment,
    Decrement,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(LiteralValue),
    Identifier(String),
    Binary { op: BinaryOp, left: Box<Expr>, right: Box<Expr> },
    /// `postfix` distinguishes `x++` from `++x`; only meaningful for increment and decrement.
    Unary { op: UnaryOp, operand: Box<Expr>, postfix: bool },
    Assignment { target: Box<Expr>, value: Box<Expr> },
    Call { callee: Box<Expr>, args: Vec<Expr> },
    Array(Vec<Expr>),
    Index { target: Box<Expr>, index: Box<Expr> },
    Function(Box<FunctionLiteral>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Block(Block),
    Expression(Expr),
    Print(Expr),
    Return { value: Option<Expr>, location: Location },
    If { condition: Expr, then_block: Block, else_block: Option<Block>, location: Location },
    While { condition: Expr, body: Block, location: Location },
    Function(FunctionLiteral),
}

/// A name introduced by a block before any of its statements run.
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub name: String,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    /// Named function definitions in this block, in source order.
    pub declarations: Vec<Declaration>,
    pub statements: Vec<Stmt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    TopLevel,
    Named,
    Anonymous,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionLiteral {
    pub kind: FunctionKind,
    pub name: String,
    pub params: Vec<Declaration>,
    pub body: Block,
    pub location: Location,
}

// --- Constant-foldability queries ---

impl Expr {
    pub fn new(kind: ExprKind, location: Location) -> Self {
        Expr { kind, location }
    }

    pub fn is_true(&self) -> bool {
        matches!(self.kind, ExprKind::Literal(LiteralValue::Boolean(true)))
    }

    pub fn is_false(&self) -> bool {
        matches!(self.kind, ExprKind::Literal(LiteralValue::Boolean(false)))
    }

    /// The truthiness of this expression is known without running it.
    pub fn to_boolean_is_true(&self) -> bool {
        self.known_truthiness() == Some(true)
    }

    pub fn to_boolean_is_false(&self) -> bool {
        self.known_truthiness() == Some(false)
    }

    fn known_truthiness(&self) -> Option<bool> {
        match &self.kind {
            ExprKind::Literal(LiteralValue::Boolean(b)) => Some(*b),
            ExprKind::Literal(LiteralValue::Null) => Some(false),
            ExprKind::Literal(LiteralValue::Number(n)) => Some(*n != 0.0),
            ExprKind::Literal(LiteralValue::Str(s)) => Some(!s.is_empty()),
            ExprKind::Binary { op: BinaryOp::And, left, right } => {
                match left.known_truthiness() {
                    Some(false) => Some(false),
                    Some(true) => right.known_truthiness(),
                    None => None,
                }
            }
            ExprKind::Binary { op: BinaryOp::Or, left, right } => {
                match left.known_truthiness() {
                    Some(true) => Some(true),
                    Some(false) => right.known_truthiness(),
                    None => None,
                }
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(value: LiteralValue) -> Expr {
        Expr::new(ExprKind::Literal(value), Location::default())
    }

    fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::new(ExprKind::Binary { op, left: Box::new(left), right: Box::new(right) }, Location::default())
    }

    #[test]
    fn test_literal_truthiness() {
        assert!(lit(LiteralValue::Boolean(true)).is_true());
        assert!(!lit(LiteralValue::Number(1.0)).is_true());
        assert!(lit(LiteralValue::Number(1.0)).to_boolean_is_true());
        assert!(lit(LiteralValue::Null).to_boolean_is_false());
        assert!(lit(LiteralValue::Str(String::new())).to_boolean_is_false());
    }

    #[test]
    fn test_logical_folding() {
        let ident = Expr::new(ExprKind::Identifier("x".into()), Location::default());
        let and = binary(BinaryOp::And, lit(LiteralValue::Boolean(false)), ident.clone());
        assert!(and.to_boolean_is_false());
        // The left operand may have effects, so nothing is known.
        let effectful = binary(BinaryOp::And, ident.clone(), lit(LiteralValue::Boolean(false)));
        assert!(!effectful.to_boolean_is_false());
        let or = binary(BinaryOp::Or, ident.clone(), lit(LiteralValue::Boolean(false)));
        assert!(!or.to_boolean_is_true());
        assert!(!or.to_boolean_is_false());
    }
}
