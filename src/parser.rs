// src/parser.rs

use std::rc::Rc;

use crate::ast::{
    BinaryOp, Block, Declaration, Expr, ExprKind, FunctionKind, FunctionLiteral, LiteralValue, Stmt, UnaryOp,
};
use crate::error::{Diagnostics, ErrorCategory, Location};
use crate::lexer::{tokenize, Token, TokenKind};

pub const MAIN_FUNCTION_NAME: &str = "@main";

// --- Precedence table ---
const PREC_ASSIGN: u8 = 2;
const PREC_OR: u8 = 4;
const PREC_AND: u8 = 5;
const PREC_EQUALITY: u8 = 9;
const PREC_COMPARISON: u8 = 10;
const PREC_TERM: u8 = 12;
const PREC_FACTOR: u8 = 13;
const PREC_EXP: u8 = 14;
const PREC_PREFIX: u8 = 15;
const PREC_POSTFIX: u8 = 16;

/// The error has already been reported; the parser only needs to unwind to a sync point.
#[derive(Debug)]
struct ParseError;

type ParseResult<T> = Result<T, ParseError>;

/// Parses a whole program into the implicit top-level function.
/// Lexical and syntax errors go to `diagnostics`; the returned tree is only meaningful when none were reported.
pub fn parse(source: &str, file: &str, diagnostics: &mut Diagnostics) -> FunctionLiteral {
    let file: Rc<str> = Rc::from(file);
    let tokens = tokenize(source, file.clone(), diagnostics);
    let mut parser = Parser::new(tokens, diagnostics);
    let body = parser.parse_block_body(TokenKind::Eof);
    FunctionLiteral {
        kind: FunctionKind::TopLevel,
        name: MAIN_FUNCTION_NAME.to_string(),
        params: Vec::new(),
        body,
        location: Location::new(file, 1, 1),
    }
}

// --- The Parser ---
pub struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    /// Depth of open `(` / `[`. Inside them a line break does not end the expression.
    nesting: usize,
    diagnostics: &'a mut Diagnostics,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: Vec<Token>, diagnostics: &'a mut Diagnostics) -> Self {
        Parser { tokens, pos: 0, nesting: 0, diagnostics }
    }

    fn current(&self) -> &Token {
        // The token stream always ends with Eof and `advance` never moves past it.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.current().kind == kind
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn matches(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> ParseResult<Token> {
        if self.check(&kind) {
            Ok(self.advance())
        } else {
            Err(self.error_at_current(&format!("Expected {}", what)))
        }
    }

    fn error_at_current(&mut self, message: &str) -> ParseError {
        let token = self.current().clone();
        let text = format!("{} but found {}", message, describe(&token.kind));
        self.diagnostics.report_error_at(&token.location, ErrorCategory::Syntax, text);
        ParseError
    }

    fn synchronize(&mut self) {
        while !self.check(&TokenKind::Eof) && !self.check(&TokenKind::RightBrace) {
            if self.current().had_newline_before {
                return;
            }
            if self.matches(&TokenKind::Semicolon) {
                return;
            }
            self.advance();
        }
    }

    // --- Statements ---

    fn parse_block_body(&mut self, terminator: TokenKind) -> Block {
        let saved_nesting = std::mem::replace(&mut self.nesting, 0);
        let mut block = Block::default();
        while !self.check(&terminator) && !self.check(&TokenKind::Eof) {
            let before = self.pos;
            match self.parse_statement() {
                Ok(Some(stmt)) => {
                    if let Stmt::Function(function) = &stmt {
                        block.declarations.push(Declaration {
                            name: function.name.clone(),
                            location: function.location.clone(),
                        });
                    }
                    block.statements.push(stmt);
                }
                Ok(None) => {}
                Err(ParseError) => {
                    self.synchronize();
                    if self.pos == before || (terminator == TokenKind::Eof && self.check(&TokenKind::RightBrace)) {
                        self.advance();
                    }
                }
            }
        }
        self.nesting = saved_nesting;
        block
    }

    fn parse_block(&mut self) -> ParseResult<Block> {
        self.expect(TokenKind::LeftBrace, "'{'")?;
        let block = self.parse_block_body(TokenKind::RightBrace);
        self.expect(TokenKind::RightBrace, "'}' after block")?;
        Ok(block)
    }

    fn parse_statement(&mut self) -> ParseResult<Option<Stmt>> {
        let location = self.current().location.clone();
        let kind = self.current().kind.clone();
        let stmt = match kind {
            TokenKind::Semicolon => {
                self.advance();
                return Ok(None);
            }
            TokenKind::LeftBrace => Stmt::Block(self.parse_block()?),
            TokenKind::Fn if matches!(self.peek_kind(1), Some(TokenKind::Identifier(_))) => {
                self.advance();
                Stmt::Function(self.parse_function_rest(FunctionKind::Named, location)?)
            }
            TokenKind::Ret => {
                self.advance();
                let value = if self.at_statement_end() { None } else { Some(self.parse_expression(PREC_ASSIGN)?) };
                self.end_statement()?;
                Stmt::Return { value, location }
            }
            TokenKind::Print => {
                self.advance();
                let value = self.parse_expression(PREC_ASSIGN)?;
                self.end_statement()?;
                Stmt::Print(value)
            }
            TokenKind::If => self.parse_if()?,
            TokenKind::While => {
                self.advance();
                let condition = self.parse_expression(PREC_ASSIGN)?;
                let body = self.parse_block()?;
                Stmt::While { condition, body, location }
            }
            TokenKind::Class => {
                self.skip_class();
                return Ok(None);
            }
            _ => {
                let expr = self.parse_expression(PREC_ASSIGN)?;
                self.end_statement()?;
                Stmt::Expression(expr)
            }
        };
        self.matches(&TokenKind::Semicolon);
        Ok(Some(stmt))
    }

    fn parse_if(&mut self) -> ParseResult<Stmt> {
        let location = self.advance().location;
        let condition = self.parse_expression(PREC_ASSIGN)?;
        let then_block = self.parse_block()?;
        let else_block = if self.matches(&TokenKind::Else) {
            if self.check(&TokenKind::If) {
                let nested = self.parse_if()?;
                Some(Block { declarations: Vec::new(), statements: vec![nested] })
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };
        Ok(Stmt::If { condition, then_block, else_block, location })
    }

    /// Reports the class and skips its header and body.
    fn skip_class(&mut self) {
        let location = self.advance().location;
        self.diagnostics.report_error_at(&location, ErrorCategory::Syntax, "classes are not supported");
        while !self.check(&TokenKind::LeftBrace) && !self.check(&TokenKind::Eof) {
            self.advance();
        }
        let mut depth = 0usize;
        loop {
            match self.advance().kind {
                TokenKind::LeftBrace => depth += 1,
                TokenKind::RightBrace => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return;
                    }
                }
                TokenKind::Eof => return,
                _ => {}
            }
        }
    }

    fn peek_kind(&self, ahead: usize) -> Option<&TokenKind> {
        self.tokens.get(self.pos + ahead).map(|t| &t.kind)
    }

    fn at_statement_end(&self) -> bool {
        let token = self.current();
        matches!(token.kind, TokenKind::Semicolon | TokenKind::RightBrace | TokenKind::Eof) || token.had_newline_before
    }

    fn end_statement(&mut self) -> ParseResult<()> {
        if self.at_statement_end() {
            Ok(())
        } else {
            Err(self.error_at_current("Expected end of statement"))
        }
    }

    // --- Functions ---

    /// Parses `[name] (params) { body }` after the `fn` keyword.
    fn parse_function_rest(&mut self, kind: FunctionKind, location: Location) -> ParseResult<FunctionLiteral> {
        let name = match self.current().kind.clone() {
            TokenKind::Identifier(name) => {
                self.advance();
                name
            }
            _ => "<anonymous>".to_string(),
        };
        self.expect(TokenKind::LeftParen, "'(' after function name")?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::RightParen) {
            loop {
                let token = self.current().clone();
                match token.kind {
                    TokenKind::Identifier(name) => {
                        self.advance();
                        params.push(Declaration { name, location: token.location });
                    }
                    _ => return Err(self.error_at_current("Expected parameter name")),
                }
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RightParen, "')' after parameters")?;
        let body = self.parse_block()?;
        Ok(FunctionLiteral { kind, name, params, body, location })
    }

    // --- Expressions ---

    fn parse_expression(&mut self, min_prec: u8) -> ParseResult<Expr> {
        let mut left = self.parse_prefix()?;
        loop {
            let token = self.current().clone();
            if token.had_newline_before && self.nesting == 0 {
                break;
            }
            let Some(prec) = infix_precedence(&token.kind) else { break };
            if prec < min_prec {
                break;
            }
            self.advance();
            let location = token.location;
            left = match token.kind {
                TokenKind::LeftParen => {
                    let args = self.parse_list(TokenKind::RightParen, "')' after arguments")?;
                    Expr::new(ExprKind::Call { callee: Box::new(left), args }, location)
                }
                TokenKind::LeftBracket => {
                    self.nesting += 1;
                    let index = self.parse_expression(PREC_ASSIGN);
                    self.nesting -= 1;
                    let index = index?;
                    self.expect(TokenKind::RightBracket, "']' after index")?;
                    Expr::new(ExprKind::Index { target: Box::new(left), index: Box::new(index) }, location)
                }
                TokenKind::PlusPlus | TokenKind::MinusMinus => {
                    let op = if token.kind == TokenKind::PlusPlus { UnaryOp::Increment } else { UnaryOp::Decrement };
                    Expr::new(ExprKind::Unary { op, operand: Box::new(left), postfix: true }, location)
                }
                TokenKind::Assign => {
                    let value = self.parse_expression(PREC_ASSIGN)?;
                    Expr::new(ExprKind::Assignment { target: Box::new(left), value: Box::new(value) }, location)
                }
                kind => {
                    let op = binary_op(&kind).ok_or(ParseError)?;
                    let next_min = if is_right_assoc(op) { prec } else { prec + 1 };
                    let right = self.parse_expression(next_min)?;
                    Expr::new(ExprKind::Binary { op, left: Box::new(left), right: Box::new(right) }, location)
                }
            };
        }
        Ok(left)
    }

    fn parse_prefix(&mut self) -> ParseResult<Expr> {
        let token = self.current().clone();
        let location = token.location.clone();
        let literal = |value: LiteralValue| -> ParseResult<Expr> { Ok(Expr::new(ExprKind::Literal(value), location.clone())) };
        match token.kind {
            TokenKind::Number(n) => {
                self.advance();
                literal(LiteralValue::Number(n))
            }
            TokenKind::Str(s) => {
                self.advance();
                literal(LiteralValue::Str(s))
            }
            TokenKind::True => {
                self.advance();
                literal(LiteralValue::Boolean(true))
            }
            TokenKind::False => {
                self.advance();
                literal(LiteralValue::Boolean(false))
            }
            TokenKind::Null => {
                self.advance();
                literal(LiteralValue::Null)
            }
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(Expr::new(ExprKind::Identifier(name), location))
            }
            TokenKind::LeftParen => {
                self.advance();
                self.nesting += 1;
                let inner = self.parse_expression(PREC_ASSIGN);
                self.nesting -= 1;
                let inner = inner?;
                self.expect(TokenKind::RightParen, "')' after expression")?;
                Ok(inner)
            }
            TokenKind::LeftBracket => {
                self.advance();
                let elements = self.parse_list(TokenKind::RightBracket, "']' after array elements")?;
                Ok(Expr::new(ExprKind::Array(elements), location))
            }
            TokenKind::Fn => {
                self.advance();
                let function = self.parse_function_rest(FunctionKind::Anonymous, location.clone())?;
                Ok(Expr::new(ExprKind::Function(Box::new(function)), location))
            }
            TokenKind::Plus => {
                self.advance();
                self.parse_expression(PREC_PREFIX)
            }
            TokenKind::Minus | TokenKind::Bang | TokenKind::PlusPlus | TokenKind::MinusMinus => {
                self.advance();
                let op = match token.kind {
                    TokenKind::Minus => UnaryOp::Negate,
                    TokenKind::Bang => UnaryOp::Not,
                    TokenKind::PlusPlus => UnaryOp::Increment,
                    _ => UnaryOp::Decrement,
                };
                let operand = self.parse_expression(PREC_PREFIX)?;
                Ok(Expr::new(ExprKind::Unary { op, operand: Box::new(operand), postfix: false }, location))
            }
            _ => Err(self.error_at_current("Expected expression")),
        }
    }

    /// Comma-separated expressions up to `close`, which is consumed.
    fn parse_list(&mut self, close: TokenKind, what: &str) -> ParseResult<Vec<Expr>> {
        self.nesting += 1;
        let result = self.parse_list_items(&close);
        self.nesting -= 1;
        let items = result?;
        self.expect(close, what)?;
        Ok(items)
    }

    fn parse_list_items(&mut self, close: &TokenKind) -> ParseResult<Vec<Expr>> {
        let mut items = Vec::new();
        if self.check(close) {
            return Ok(items);
        }
        loop {
            items.push(self.parse_expression(PREC_ASSIGN)?);
            if !self.matches(&TokenKind::Comma) {
                return Ok(items);
            }
        }
    }
}

fn infix_precedence(kind: &TokenKind) -> Option<u8> {
    let prec = match kind {
        TokenKind::Assign => PREC_ASSIGN,
        TokenKind::Or => PREC_OR,
        TokenKind::And => PREC_AND,
        TokenKind::EqualEqual | TokenKind::BangEqual => PREC_EQUALITY,
        TokenKind::Less | TokenKind::Greater | TokenKind::LessEqual | TokenKind::GreaterEqual => PREC_COMPARISON,
        TokenKind::Plus | TokenKind::Minus => PREC_TERM,
        TokenKind::Star | TokenKind::Slash | TokenKind::Percent => PREC_FACTOR,
        TokenKind::Caret => PREC_EXP,
        TokenKind::LeftParen | TokenKind::LeftBracket | TokenKind::PlusPlus | TokenKind::MinusMinus => PREC_POSTFIX,
        _ => return None,
    };
    Some(prec)
}

fn binary_op(kind: &TokenKind) -> Option<BinaryOp> {
    let op = match kind {
        TokenKind::Or => BinaryOp::Or,
        TokenKind::And => BinaryOp::And,
        TokenKind::EqualEqual => BinaryOp::Equal,
        TokenKind::BangEqual => BinaryOp::NotEqual,
        TokenKind::Less => BinaryOp::Less,
        TokenKind::Greater => BinaryOp::Greater,
        TokenKind::LessEqual => BinaryOp::LessEqual,
        TokenKind::GreaterEqual => BinaryOp::GreaterEqual,
        TokenKind::Plus => BinaryOp::Add,
        TokenKind::Minus => BinaryOp::Sub,
        TokenKind::Star => BinaryOp::Mul,
        TokenKind::Slash => BinaryOp::Div,
        TokenKind::Percent => BinaryOp::Mod,
        TokenKind::Caret => BinaryOp::Exp,
        _ => return None,
    };
    Some(op)
}

fn is_right_assoc(op: BinaryOp) -> bool {
    matches!(op, BinaryOp::Exp | BinaryOp::And | BinaryOp::Or)
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Eof => "end of input".to_string(),
        TokenKind::Identifier(name) => format!("'{}'", name),
        TokenKind::Number(n) => format!("number {}", n),
        TokenKind::Str(_) => "string literal".to_string(),
        other => format!("{:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> FunctionLiteral {
        let mut diagnostics = Diagnostics::new();
        let program = parse(source, "test.lin", &mut diagnostics);
        assert!(!diagnostics.has_errors(), "unexpected diagnostics: {:?}", diagnostics);
        program
    }

    fn single_expr(source: &str) -> Expr {
        let program = parse_ok(source);
        match program.body.statements.into_iter().next() {
            Some(Stmt::Expression(expr)) => expr,
            other => panic!("expected expression statement, got {:?}", other),
        }
    }

    #[test]
    fn test_top_level_is_implicit_main() {
        let program = parse_ok("print 1");
        assert_eq!(program.kind, FunctionKind::TopLevel);
        assert_eq!(program.name, MAIN_FUNCTION_NAME);
        assert!(program.params.is_empty());
        assert_eq!(program.body.statements.len(), 1);
    }

    #[test]
    fn test_precedence() {
        // 1 + 2 * 3 parses as 1 + (2 * 3)
        let expr = single_expr("1 + 2 * 3");
        match expr.kind {
            ExprKind::Binary { op: BinaryOp::Add, right, .. } => {
                assert!(matches!(right.kind, ExprKind::Binary { op: BinaryOp::Mul, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_right_associativity() {
        let expr = single_expr("a or b or c");
        match expr.kind {
            ExprKind::Binary { op: BinaryOp::Or, left, right } => {
                assert!(matches!(left.kind, ExprKind::Identifier(_)));
                assert!(matches!(right.kind, ExprKind::Binary { op: BinaryOp::Or, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
        let expr = single_expr("a = b = 1");
        match expr.kind {
            ExprKind::Assignment { value, .. } => {
                assert!(matches!(value.kind, ExprKind::Assignment { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_newline_ends_statement() {
        let program = parse_ok("a = 1\nb = 2\n-b");
        assert_eq!(program.body.statements.len(), 3);
        let program = parse_ok("f(1,\n 2)");
        assert_eq!(program.body.statements.len(), 1);
    }

    #[test]
    fn test_named_functions_are_declared() {
        let program = parse_ok("fn add(a, b) { ret a + b }\nprint add(1, 2)");
        assert_eq!(program.body.declarations.len(), 1);
        assert_eq!(program.body.declarations[0].name, "add");
        match &program.body.statements[0] {
            Stmt::Function(f) => {
                assert_eq!(f.kind, FunctionKind::Named);
                assert_eq!(f.params.len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_postfix_and_calls() {
        let expr = single_expr("make(5)()");
        match expr.kind {
            ExprKind::Call { callee, args } => {
                assert!(args.is_empty());
                assert!(matches!(callee.kind, ExprKind::Call { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
        let expr = single_expr("a[0]++");
        assert!(matches!(expr.kind, ExprKind::Unary { op: UnaryOp::Increment, postfix: true, .. }));
    }

    #[test]
    fn test_else_if_chain() {
        let program = parse_ok("if a { print 1 } else if b { print 2 } else { print 3 }");
        match &program.body.statements[0] {
            Stmt::If { else_block: Some(block), .. } => {
                assert!(matches!(block.statements[0], Stmt::If { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_bare_ret() {
        let program = parse_ok("fn f() { ret }");
        match &program.body.statements[0] {
            Stmt::Function(f) => assert!(matches!(f.body.statements[0], Stmt::Return { value: None, .. })),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_errors_accumulate_and_recover() {
        let mut diagnostics = Diagnostics::new();
        let program = parse("x = )\ny = 2\nz = (\nprint 4", "t.lin", &mut diagnostics);
        assert_eq!(diagnostics.len(), 2);
        assert!(diagnostics.iter().all(|d| d.category == ErrorCategory::Syntax));
        assert!(program.body.statements.iter().any(|s| matches!(s, Stmt::Print(_))));
    }

    #[test]
    fn test_class_is_rejected() {
        let mut diagnostics = Diagnostics::new();
        let program = parse("class A { field x }\nprint 1", "t.lin", &mut diagnostics);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics.iter().next().is_some_and(|d| d.message == "classes are not supported"));
        assert_eq!(program.body.statements.len(), 1);
    }
}
