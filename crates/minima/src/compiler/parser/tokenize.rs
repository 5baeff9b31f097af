// Hand-rolled lexer: byte buffer in, forward token stream out.
// Whitespace, // line comments and /* */ block comments are skipped.
// String literals support C escapes; the produced lexeme excludes the
// surrounding quotes and is already unescaped.

use smol_str::SmolStr;

use super::token::{Token, TokenKind, keyword_kind};

pub struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Lexer<'a> {
        Lexer { src: source.as_bytes(), pos: 0, line: 1, column: 1 }
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn peek(&self) -> u8 {
        if self.is_eof() { 0 } else { self.src[self.pos] }
    }

    fn peek_at(&self, off: usize) -> u8 {
        let p = self.pos + off;
        if p >= self.src.len() { 0 } else { self.src[p] }
    }

    fn advance(&mut self) -> u8 {
        if self.is_eof() {
            return 0;
        }
        let c = self.src[self.pos];
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        c
    }

    fn skip_ws_and_comments(&mut self) {
        loop {
            match self.peek() {
                b' ' | b'\t' | b'\r' | b'\n' => {
                    self.advance();
                }
                b'/' if self.peek_at(1) == b'/' => {
                    while !self.is_eof() && self.peek() != b'\n' {
                        self.advance();
                    }
                }
                b'/' if self.peek_at(1) == b'*' => {
                    self.advance();
                    self.advance();
                    while !self.is_eof() {
                        if self.peek() == b'*' && self.peek_at(1) == b'/' {
                            self.advance();
                            self.advance();
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn slice(&self, start: usize) -> &'a str {
        // The source is valid UTF-8 and token boundaries fall on ASCII.
        std::str::from_utf8(&self.src[start..self.pos]).unwrap_or("")
    }

    fn string_token(&mut self, line: u32, column: u32) -> Token {
        let mut out = String::new();
        loop {
            if self.is_eof() {
                return Token::error("Unterminated string literal", line, column);
            }
            let c = self.advance();
            match c {
                b'"' => break,
                b'\\' => {
                    let e = self.advance();
                    match e {
                        b'n' => out.push('\n'),
                        b't' => out.push('\t'),
                        b'r' => out.push('\r'),
                        b'\\' => out.push('\\'),
                        b'"' => out.push('"'),
                        0 => return Token::error("Unterminated string literal", line, column),
                        other => {
                            // Unknown escapes pass through verbatim.
                            out.push('\\');
                            out.push(other as char);
                        }
                    }
                }
                _ => out.push(c as char),
            }
        }
        Token { kind: TokenKind::String, lexeme: SmolStr::new(out), line, column }
    }

    pub fn next_token(&mut self) -> Token {
        self.skip_ws_and_comments();

        let line = self.line;
        let column = self.column;

        if self.is_eof() {
            return Token::new(TokenKind::Eof, "", line, column);
        }

        let start = self.pos;
        let c = self.advance();

        let simple = |kind: TokenKind, lexeme: &str| Token::new(kind, lexeme, line, column);

        match c {
            b';' => return simple(TokenKind::Semicolon, ";"),
            b'(' => return simple(TokenKind::LParen, "("),
            b')' => return simple(TokenKind::RParen, ")"),
            b'{' => return simple(TokenKind::LBrace, "{"),
            b'}' => return simple(TokenKind::RBrace, "}"),
            b'[' => return simple(TokenKind::LBracket, "["),
            b']' => return simple(TokenKind::RBracket, "]"),
            b',' => return simple(TokenKind::Comma, ","),
            b'+' => return simple(TokenKind::Plus, "+"),
            b'-' => return simple(TokenKind::Minus, "-"),
            b'*' => return simple(TokenKind::Star, "*"),
            b'/' => return simple(TokenKind::Slash, "/"),
            b'%' => return simple(TokenKind::Percent, "%"),
            b':' => {
                if self.peek() == b':' {
                    self.advance();
                    return simple(TokenKind::DoubleColon, "::");
                }
                return simple(TokenKind::Colon, ":");
            }
            b'=' => {
                if self.peek() == b'=' {
                    self.advance();
                    return simple(TokenKind::EqEq, "==");
                }
                return simple(TokenKind::Eq, "=");
            }
            b'!' => {
                if self.peek() == b'=' {
                    self.advance();
                    return simple(TokenKind::BangEq, "!=");
                }
                return simple(TokenKind::Bang, "!");
            }
            b'<' => {
                if self.peek() == b'=' {
                    self.advance();
                    return simple(TokenKind::LtEq, "<=");
                }
                return simple(TokenKind::Lt, "<");
            }
            b'>' => {
                if self.peek() == b'=' {
                    self.advance();
                    return simple(TokenKind::GtEq, ">=");
                }
                return simple(TokenKind::Gt, ">");
            }
            b'&' => {
                if self.peek() == b'&' {
                    self.advance();
                    return simple(TokenKind::AndAnd, "&&");
                }
                return Token::error("Unexpected '&'", line, column);
            }
            b'|' => {
                if self.peek() == b'|' {
                    self.advance();
                    return simple(TokenKind::OrOr, "||");
                }
                return Token::error("Unexpected '|'", line, column);
            }
            b'"' => return self.string_token(line, column),
            _ => {}
        }

        // Numeric literal: int unless a '.' followed by a digit appears.
        if c.is_ascii_digit() {
            let mut is_float = false;
            while self.peek().is_ascii_digit() {
                self.advance();
            }
            if self.peek() == b'.' && self.peek_at(1).is_ascii_digit() {
                is_float = true;
                self.advance();
                while self.peek().is_ascii_digit() {
                    self.advance();
                }
            }
            let kind = if is_float { TokenKind::Float } else { TokenKind::Int };
            return Token::new(kind, self.slice(start), line, column);
        }

        // Identifier / keyword
        if c.is_ascii_alphabetic() || c == b'_' {
            loop {
                let p = self.peek();
                if !(p.is_ascii_alphanumeric() || p == b'_') {
                    break;
                }
                self.advance();
            }
            let text = self.slice(start);
            let kind = keyword_kind(text).unwrap_or(TokenKind::Identifier);
            return Token::new(kind, text, line, column);
        }

        Token::error("Unexpected character", line, column)
    }
}
