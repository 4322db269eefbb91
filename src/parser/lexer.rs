//! Lexer (tokenizer) for C source code
//!
//! Converts raw source text into a flat [`Token`] stream consumed by the parser.
//! Keywords and punctuators share the [`TokenKind::Reserved`] kind and are told
//! apart by their text. Directive lines are only tolerated when empty (a lone
//! `#`); anything else after the `#` is rejected.

use super::ast::SourceLocation;
use crate::error::CompileError;
use std::fmt;

const KEYWORDS: &[&str] = &[
    "int", "char", "short", "long", "void", "struct", "if", "else", "while", "for", "return",
    "break", "continue", "sizeof",
];

/// Longest punctuators first so that `...` wins over `.`
const PUNCTUATORS: &[&str] = &[
    "...", "->", "++", "--", "+=", "-=", "*=", "/=", "==", "!=", "<=", ">=", "&&", "||", "+", "-",
    "*", "/", "%", "=", "<", ">", "!", "&", "?", ":", ".", ",", ";", "(", ")", "{", "}", "[", "]",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    /// Keyword or punctuator
    Reserved,
    Ident,
    Num(i64),
    /// String literal contents, escapes already decoded, no trailing NUL
    Str(Vec<u8>),
    Eof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Source text of the token (literal text for strings, including quotes)
    pub text: String,
    pub location: SourceLocation,
}

impl Token {
    pub fn is(&self, text: &str) -> bool {
        self.kind == TokenKind::Reserved && self.text == text
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TokenKind::Reserved => write!(f, "'{}'", self.text),
            TokenKind::Ident => write!(f, "identifier '{}'", self.text),
            TokenKind::Num(n) => write!(f, "number {}", n),
            TokenKind::Str(_) => write!(f, "string literal {}", self.text),
            TokenKind::Eof => write!(f, "end of file"),
        }
    }
}

/// Lexer for C source code
pub struct Lexer {
    input: Vec<char>,
    position: usize,
    offset: usize,
    line: usize,
    column: usize,
    /// Only whitespace seen since the last newline
    at_line_start: bool,
}

impl Lexer {
    /// Create a new lexer for the given source string.
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            position: 0,
            offset: 0,
            line: 1,
            column: 1,
            at_line_start: true,
        }
    }

    /// Tokenize the entire input
    pub fn tokenize(&mut self) -> Result<Vec<Token>, CompileError> {
        let mut tokens = Vec::new();

        loop {
            self.skip_whitespace_and_comments()?;

            if self.is_at_end() {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    text: String::new(),
                    location: self.current_location(),
                });
                break;
            }

            if self.at_line_start && self.peek() == Some('#') {
                self.directive_line()?;
                continue;
            }

            self.at_line_start = false;
            tokens.push(self.next_token()?);
        }

        tracing::debug!(count = tokens.len(), "tokenized source");
        Ok(tokens)
    }

    fn next_token(&mut self) -> Result<Token, CompileError> {
        let loc = self.current_location();
        let ch = self
            .peek()
            .ok_or_else(|| CompileError::lex("Unexpected end of file", loc))?;

        match ch {
            '"' => self.string_literal(),
            '\'' => self.char_literal(),
            '0'..='9' => self.number_literal(),
            'a'..='z' | 'A'..='Z' | '_' => Ok(self.identifier_or_keyword()),
            _ => self.punctuator(),
        }
    }

    fn punctuator(&mut self) -> Result<Token, CompileError> {
        let loc = self.current_location();

        for punct in PUNCTUATORS {
            let matches = punct
                .chars()
                .enumerate()
                .all(|(i, c)| self.peek_ahead(i) == Some(c));
            if matches {
                for _ in 0..punct.len() {
                    self.advance();
                }
                return Ok(Token {
                    kind: TokenKind::Reserved,
                    text: punct.to_string(),
                    location: loc,
                });
            }
        }

        let ch = self.peek().unwrap_or('\0');
        Err(CompileError::lex(
            format!("Unexpected character: '{}'", ch),
            loc,
        ))
    }

    fn string_literal(&mut self) -> Result<Token, CompileError> {
        let loc = self.current_location();
        let start = self.position;
        self.advance(); // opening quote
        let mut bytes = Vec::new();

        while let Some(ch) = self.peek() {
            match ch {
                '"' => {
                    self.advance();
                    let text: String = self.input[start..self.position].iter().collect();
                    return Ok(Token {
                        kind: TokenKind::Str(bytes),
                        text,
                        location: loc,
                    });
                }
                '\n' => break,
                '\\' => {
                    self.advance();
                    bytes.push(self.escape()?);
                }
                _ => {
                    self.advance();
                    let mut buf = [0u8; 4];
                    bytes.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
                }
            }
        }

        Err(CompileError::lex("Unterminated string literal", loc))
    }

    fn char_literal(&mut self) -> Result<Token, CompileError> {
        let loc = self.current_location();
        let start = self.position;
        self.advance(); // opening quote

        let value = match self.advance() {
            Some('\\') => self.escape()?,
            Some(ch) if ch != '\'' && ch != '\n' && ch.is_ascii() => ch as u8,
            _ => return Err(CompileError::lex("Invalid character literal", loc)),
        };

        if self.advance() != Some('\'') {
            return Err(CompileError::lex(
                "Expected closing quote in character literal",
                loc,
            ));
        }

        let text: String = self.input[start..self.position].iter().collect();
        Ok(Token {
            // char literals are signed like `char`
            kind: TokenKind::Num(value as i8 as i64),
            text,
            location: loc,
        })
    }

    /// Decode the character after a backslash
    fn escape(&mut self) -> Result<u8, CompileError> {
        let loc = self.current_location();
        let escaped = self
            .advance()
            .ok_or_else(|| CompileError::lex("Unexpected end of file in escape", loc))?;

        match escaped {
            'n' => Ok(b'\n'),
            't' => Ok(b'\t'),
            'r' => Ok(b'\r'),
            '0' => Ok(0),
            '\\' => Ok(b'\\'),
            '\'' => Ok(b'\''),
            '"' => Ok(b'"'),
            _ => Err(CompileError::lex(
                format!("Unknown escape sequence: \\{}", escaped),
                loc,
            )),
        }
    }

    fn number_literal(&mut self) -> Result<Token, CompileError> {
        let loc = self.current_location();
        let mut text = String::new();

        while let Some(ch) = self.peek() {
            if !ch.is_ascii_digit() {
                break;
            }
            text.push(ch);
            self.advance();
        }

        if matches!(self.peek(), Some(c) if c.is_ascii_alphabetic() || c == '_') {
            return Err(CompileError::lex(
                format!("Invalid integer literal: {}{}", text, self.peek().unwrap_or(' ')),
                loc,
            ));
        }

        let value = text
            .parse::<i64>()
            .map_err(|_| CompileError::lex(format!("Integer literal out of range: {}", text), loc))?;

        Ok(Token {
            kind: TokenKind::Num(value),
            text,
            location: loc,
        })
    }

    fn identifier_or_keyword(&mut self) -> Token {
        let loc = self.current_location();
        let mut ident = String::new();

        while let Some(ch) = self.peek() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                ident.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        let kind = if KEYWORDS.contains(&ident.as_str()) {
            TokenKind::Reserved
        } else {
            TokenKind::Ident
        };

        Token {
            kind,
            text: ident,
            location: loc,
        }
    }

    /// Consume a `#` line. Only an empty directive is accepted.
    fn directive_line(&mut self) -> Result<(), CompileError> {
        let loc = self.current_location();
        self.advance(); // '#'

        while let Some(ch) = self.peek() {
            match ch {
                '\n' => break,
                ' ' | '\t' | '\r' => {
                    self.advance();
                }
                _ => {
                    return Err(CompileError::lex(
                        "Preprocessor directives are not supported",
                        loc,
                    ));
                }
            }
        }
        Ok(())
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), CompileError> {
        loop {
            match self.peek() {
                Some('\n') => {
                    self.advance();
                    self.at_line_start = true;
                }
                Some(' ') | Some('\t') | Some('\r') => {
                    self.advance();
                }
                Some('/') if self.peek_ahead(1) == Some('/') => self.skip_line_comment(),
                Some('/') if self.peek_ahead(1) == Some('*') => self.skip_block_comment()?,
                _ => break,
            }
        }
        Ok(())
    }

    /// Skip single-line comment (// ...), leaving the newline in place
    fn skip_line_comment(&mut self) {
        while let Some(ch) = self.peek() {
            if ch == '\n' {
                break;
            }
            self.advance();
        }
    }

    fn skip_block_comment(&mut self) -> Result<(), CompileError> {
        let start_loc = self.current_location();
        self.advance(); // skip '/'
        self.advance(); // skip '*'

        while !self.is_at_end() {
            if self.peek() == Some('*') && self.peek_ahead(1) == Some('/') {
                self.advance();
                self.advance();
                return Ok(());
            }
            self.advance();
        }

        Err(CompileError::lex("Unterminated block comment", start_loc))
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn peek_ahead(&self, n: usize) -> Option<char> {
        self.input.get(self.position + n).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.position += 1;
        self.offset += ch.len_utf8();

        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }

        Some(ch)
    }

    fn is_at_end(&self) -> bool {
        self.position >= self.input.len()
    }

    fn current_location(&self) -> SourceLocation {
        SourceLocation::new(self.line, self.column, self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(source: &str) -> Vec<Token> {
        Lexer::new(source).tokenize().unwrap()
    }

    #[test]
    fn test_simple_tokens() {
        let tokens = lex("int main() { return 0; }");

        assert!(tokens[0].is("int"));
        assert_eq!(tokens[1].kind, TokenKind::Ident);
        assert_eq!(tokens[1].text, "main");
        assert!(tokens[2].is("("));
        assert!(tokens[3].is(")"));
        assert!(tokens[4].is("{"));
        assert!(tokens[5].is("return"));
        assert_eq!(tokens[6].kind, TokenKind::Num(0));
        assert!(tokens[7].is(";"));
        assert!(tokens[8].is("}"));
        assert_eq!(tokens[9].kind, TokenKind::Eof);
    }

    #[test]
    fn test_operators() {
        let tokens = lex("++ -- += -= == != && || -> ... .");
        let texts: Vec<_> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(
            texts,
            vec!["++", "--", "+=", "-=", "==", "!=", "&&", "||", "->", "...", ".", ""]
        );
    }

    #[test]
    fn test_comments() {
        let tokens = lex("int x; // comment\nint y; /* block\ncomment */ int z;");
        let idents: Vec<_> = tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Ident)
            .map(|t| t.text.as_str())
            .collect();
        assert_eq!(idents, vec!["x", "y", "z"]);
    }

    #[test]
    fn test_string_literal_escapes() {
        let tokens = lex(r#""hi\n\"x\"""#);
        assert_eq!(tokens[0].kind, TokenKind::Str(b"hi\n\"x\"".to_vec()));
    }

    #[test]
    fn test_char_literal_is_number() {
        let tokens = lex(r"'A' '\n' '\0'");
        assert_eq!(tokens[0].kind, TokenKind::Num(65));
        assert_eq!(tokens[1].kind, TokenKind::Num(10));
        assert_eq!(tokens[2].kind, TokenKind::Num(0));
    }

    #[test]
    fn test_locations_track_lines_and_offsets() {
        let tokens = lex("int\n  x;");
        assert_eq!(tokens[1].location, SourceLocation::new(2, 3, 6));
    }

    #[test]
    fn test_empty_directive_tolerated() {
        let tokens = lex("#\n  #  \nint x;");
        assert!(tokens[0].is("int"));
    }

    #[test]
    fn test_non_empty_directive_rejected() {
        let err = Lexer::new("#include <stdio.h>\nint x;").tokenize().unwrap_err();
        assert!(matches!(err, CompileError::Lex { .. }));
    }

    #[test]
    fn test_unexpected_character() {
        let err = Lexer::new("int x = 1 @ 2;").tokenize().unwrap_err();
        assert_eq!(err.location().unwrap().column, 11);
    }

    #[test]
    fn test_unterminated_string() {
        assert!(Lexer::new("\"abc").tokenize().is_err());
    }
}
