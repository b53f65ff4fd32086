// src/lexer.rs

use std::rc::Rc;

use crate::error::{Diagnostics, ErrorCategory, Location};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // --- Literals ---
    Number(f64),
    Str(String),
    Identifier(String),

    // --- Keywords ---
    Fn,
    Ret,
    Print,
    If,
    Else,
    While,
    And,
    Or,
    True,
    False,
    Null,
    For,
    Break,
    Class,
    Method,
    Field,
    Constructor,
    Inherits,
    New,
    This,
    Super,

    // --- Punctuation ---
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    LeftBrace,
    RightBrace,
    Comma,
    Semicolon,
    Dot,
    Colon,

    // --- Operators ---
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    EqualEqual,
    BangEqual,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    Bang,
    PlusPlus,
    MinusMinus,

    Eof,
}

static KEYWORDS: phf::Map<&'static str, TokenKind> = phf::phf_map! {
    "fn" => TokenKind::Fn,
    "ret" => TokenKind::Ret,
    "print" => TokenKind::Print,
    "if" => TokenKind::If,
    "else" => TokenKind::Else,
    "while" => TokenKind::While,
    "and" => TokenKind::And,
    "or" => TokenKind::Or,
    "true" => TokenKind::True,
    "false" => TokenKind::False,
    "null" => TokenKind::Null,
    "for" => TokenKind::For,
    "break" => TokenKind::Break,
    "class" => TokenKind::Class,
    "method" => TokenKind::Method,
    "field" => TokenKind::Field,
    "constructor" => TokenKind::Constructor,
    "inherits" => TokenKind::Inherits,
    "new" => TokenKind::New,
    "this" => TokenKind::This,
    "super" => TokenKind::Super,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub location: Location,
    /// A line break separates this token from the previous one. Such a break ends a statement.
    pub had_newline_before: bool,
}

// --- The Lexer ---
pub struct Lexer<'a> {
    input: Vec<char>,
    pos: usize,
    line: u32,
    col: u32,
    file: Rc<str>,
    diagnostics: &'a mut Diagnostics,
}

/// Tokenizes `source`. Problems are reported to `diagnostics` and lexing continues;
/// the returned stream always ends with `Eof`.
pub fn tokenize(source: &str, file: Rc<str>, diagnostics: &mut Diagnostics) -> Vec<Token> {
    Lexer::new(source, file, diagnostics).run()
}

impl<'a> Lexer<'a> {
    pub fn new(source: &str, file: Rc<str>, diagnostics: &'a mut Diagnostics) -> Self {
        Lexer { input: source.chars().collect(), pos: 0, line: 1, col: 1, file, diagnostics }
    }

    fn current_char(&self) -> Option<char> { self.input.get(self.pos).copied() }
    fn peek_char(&self) -> Option<char> { self.input.get(self.pos + 1).copied() }

    fn advance(&mut self) -> Option<char> {
        let c = self.current_char()?;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        self.pos += 1;
        Some(c)
    }

    fn matches(&mut self, expected: char) -> bool {
        if self.current_char() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn location(&self) -> Location {
        Location::new(self.file.clone(), self.line, self.col)
    }

    /// Skips whitespace and `//` comments, returning whether a newline was crossed.
    fn skip_trivia(&mut self) -> bool {
        let mut newline = false;
        loop {
            match self.current_char() {
                Some('\n') => {
                    newline = true;
                    self.advance();
                }
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('/') if self.peek_char() == Some('/') => {
                    while let Some(c) = self.current_char() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => return newline,
            }
        }
    }

    pub fn run(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let had_newline_before = self.skip_trivia();
            let location = self.location();
            let Some(c) = self.advance() else {
                tokens.push(Token { kind: TokenKind::Eof, location, had_newline_before: true });
                return tokens;
            };
            if let Some(kind) = self.scan_token(c, &location) {
                tokens.push(Token { kind, location, had_newline_before });
            }
        }
    }

    fn scan_token(&mut self, c: char, start: &Location) -> Option<TokenKind> {
        let kind = match c {
            '(' => TokenKind::LeftParen,
            ')' => TokenKind::RightParen,
            '[' => TokenKind::LeftBracket,
            ']' => TokenKind::RightBracket,
            '{' => TokenKind::LeftBrace,
            '}' => TokenKind::RightBrace,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            '.' => TokenKind::Dot,
            ':' => TokenKind::Colon,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '^' => TokenKind::Caret,
            '+' => if self.matches('+') { TokenKind::PlusPlus } else { TokenKind::Plus },
            '-' => if self.matches('-') { TokenKind::MinusMinus } else { TokenKind::Minus },
            '=' => if self.matches('=') { TokenKind::EqualEqual } else { TokenKind::Assign },
            '!' => if self.matches('=') { TokenKind::BangEqual } else { TokenKind::Bang },
            '<' => if self.matches('=') { TokenKind::LessEqual } else { TokenKind::Less },
            '>' => if self.matches('=') { TokenKind::GreaterEqual } else { TokenKind::Greater },
            '"' => return self.scan_string(start),
            c if c.is_ascii_digit() => self.scan_number(c),
            c if c.is_ascii_alphabetic() || c == '_' => self.scan_word(c),
            other => {
                self.diagnostics.report_error_at(
                    start,
                    ErrorCategory::Lexical,
                    format!("Unexpected character '{}'", other),
                );
                return None;
            }
        };
        Some(kind)
    }

    fn scan_number(&mut self, first: char) -> TokenKind {
        let mut text = String::from(first);
        while let Some(c) = self.current_char().filter(|c| c.is_ascii_digit()) {
            text.push(c);
            self.advance();
        }
        if self.current_char() == Some('.') && self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
            text.push('.');
            self.advance();
            while let Some(c) = self.current_char().filter(|c| c.is_ascii_digit()) {
                text.push(c);
                self.advance();
            }
        }
        // Digits with at most one interior '.' always parse.
        TokenKind::Number(text.parse().unwrap_or(f64::NAN))
    }

    fn scan_word(&mut self, first: char) -> TokenKind {
        let mut word = String::from(first);
        while let Some(c) = self.current_char().filter(|c| c.is_ascii_alphanumeric() || *c == '_') {
            word.push(c);
            self.advance();
        }
        match KEYWORDS.get(word.as_str()) {
            Some(keyword) => keyword.clone(),
            None => TokenKind::Identifier(word),
        }
    }

    fn scan_string(&mut self, start: &Location) -> Option<TokenKind> {
        let mut text = String::new();
        loop {
            match self.advance() {
                None => {
                    self.diagnostics.report_error_at(start, ErrorCategory::Lexical, "Unterminated string literal");
                    return None;
                }
                Some('"') => return Some(TokenKind::Str(text)),
                Some('\\') => {
                    let escape_loc = self.location();
                    match self.advance() {
                        Some('n') => text.push('\n'),
                        Some('t') => text.push('\t'),
                        Some('r') => text.push('\r'),
                        Some('"') => text.push('"'),
                        Some('\\') => text.push('\\'),
                        Some('0') => text.push('\0'),
                        Some(other) => {
                            self.diagnostics.report_error_at(
                                &escape_loc,
                                ErrorCategory::Lexical,
                                format!("Unknown escape sequence '\\{}'", other),
                            );
                        }
                        None => {
                            self.diagnostics.report_error_at(start, ErrorCategory::Lexical, "Unterminated string literal");
                            return None;
                        }
                    }
                }
                Some(c) => text.push(c),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let mut diagnostics = Diagnostics::new();
        let tokens = tokenize(source, Rc::from("test.lin"), &mut diagnostics);
        assert!(!diagnostics.has_errors(), "unexpected diagnostics: {:?}", diagnostics);
        tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_operators_and_punctuation() {
        assert_eq!(
            kinds("a = b ++ -- <= >= == != ! ^ %"),
            vec![
                TokenKind::Identifier("a".into()),
                TokenKind::Assign,
                TokenKind::Identifier("b".into()),
                TokenKind::PlusPlus,
                TokenKind::MinusMinus,
                TokenKind::LessEqual,
                TokenKind::GreaterEqual,
                TokenKind::EqualEqual,
                TokenKind::BangEqual,
                TokenKind::Bang,
                TokenKind::Caret,
                TokenKind::Percent,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_keywords_vs_identifiers() {
        assert_eq!(
            kinds("fn fnord ret print_me while"),
            vec![
                TokenKind::Fn,
                TokenKind::Identifier("fnord".into()),
                TokenKind::Ret,
                TokenKind::Identifier("print_me".into()),
                TokenKind::While,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(kinds("12 3.5"), vec![TokenKind::Number(12.0), TokenKind::Number(3.5), TokenKind::Eof]);
        // A trailing dot is member access, not part of the number.
        assert_eq!(kinds("4."), vec![TokenKind::Number(4.0), TokenKind::Dot, TokenKind::Eof]);
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(kinds(r#""a\n\"b\"""#), vec![TokenKind::Str("a\n\"b\"".into()), TokenKind::Eof]);
    }

    #[test]
    fn test_comments_and_newline_flag() {
        let mut diagnostics = Diagnostics::new();
        let tokens = tokenize("x // note\ny", Rc::from("t"), &mut diagnostics);
        assert_eq!(tokens.len(), 3);
        assert!(!tokens[0].had_newline_before);
        assert!(tokens[1].had_newline_before);
        assert_eq!(tokens[1].location.line, 2);
        assert_eq!(tokens[1].location.col, 1);
    }

    #[test]
    fn test_lexical_errors_are_reported_and_skipped() {
        let mut diagnostics = Diagnostics::new();
        let tokens = tokenize("a @ b \"open", Rc::from("t"), &mut diagnostics);
        assert_eq!(diagnostics.len(), 2);
        assert!(diagnostics.iter().all(|d| d.category == ErrorCategory::Lexical));
        assert_eq!(tokens.len(), 3);
    }
}
