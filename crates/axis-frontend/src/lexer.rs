use std::collections::VecDeque;

use crate::diag::{DiagKind, Diagnostic};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Func,
    Give,
    When,
    Else,
    While,
    Loop,
    Repeat,
    Break,
    Continue,
    Mode,
    True,
    False,
    Ident(String),
    Int { value: u64, radix: u8 },
    Str(Vec<u8>),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Amp,
    Pipe,
    Caret,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Bang,
    Assign,
    Arrow,
    Colon,
    LParen,
    RParen,
    Comma,
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
    pub col: u32,
}

/// Indentation-sensitive scanner. INDENT/DEDENT are synthesized against a
/// stack of indentation widths, NEWLINE terminates logical lines and is
/// suppressed inside parentheses.
pub struct Lexer<'a> {
    bytes: &'a [u8],
    pos: usize,
    line: u32,
    col: u32,
    indent_stack: Vec<u32>,
    at_line_start: bool,
    paren_depth: u32,
    pending: VecDeque<Token>,
}

impl<'a> Lexer<'a> {
    pub fn tokenize(src: &'a str) -> Result<Vec<Token>, Diagnostic> {
        let mut lx = Lexer {
            bytes: src.as_bytes(),
            pos: 0,
            line: 1,
            col: 1,
            indent_stack: vec![0],
            at_line_start: true,
            paren_depth: 0,
            pending: VecDeque::new(),
        };
        let mut toks = Vec::new();
        loop {
            let tok = lx.next_token()?;
            let done = tok.kind == TokenKind::Eof;
            toks.push(tok);
            if done {
                break;
            }
        }
        Ok(toks)
    }

    fn cur(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos + 1).copied()
    }

    fn advance(&mut self) {
        if self.cur() == Some(b'\n') {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        self.pos += 1;
    }

    fn error(&self, kind: DiagKind, msg: impl Into<String>) -> Diagnostic {
        Diagnostic::new(kind, self.line, self.col, msg)
    }

    fn tok(&self, kind: TokenKind, line: u32, col: u32) -> Token {
        Token { kind, line, col }
    }

    fn next_token(&mut self) -> Result<Token, Diagnostic> {
        if let Some(t) = self.pending.pop_front() {
            return Ok(t);
        }

        while self.cur().is_some() {
            if self.at_line_start && self.paren_depth == 0 {
                if let Some(t) = self.handle_indentation()? {
                    return Ok(t);
                }
            }

            let c = match self.cur() {
                Some(c) => c,
                None => break,
            };

            if c == b'\n' {
                let (line, col) = (self.line, self.col);
                self.advance();
                if self.paren_depth > 0 {
                    continue;
                }
                self.at_line_start = true;
                return Ok(self.tok(TokenKind::Newline, line, col));
            }

            if c == b' ' || c == b'\t' || c == b'\r' {
                self.advance();
                continue;
            }

            if (c == b'/' && self.peek() == Some(b'/')) || c == b'#' {
                self.skip_comment();
                continue;
            }

            if c == b'"' {
                return self.read_string();
            }

            if c.is_ascii_digit() {
                return self.read_number();
            }

            if c.is_ascii_alphabetic() || c == b'_' {
                return Ok(self.read_identifier());
            }

            return self.read_operator();
        }

        // Close every open block at end of input.
        let mut dedents = Vec::new();
        while self.indent_stack.len() > 1 {
            self.indent_stack.pop();
            dedents.push(self.tok(TokenKind::Dedent, self.line, self.col));
        }
        if let Some(first) = dedents.first().cloned() {
            self.pending.extend(dedents.into_iter().skip(1));
            return Ok(first);
        }
        Ok(self.tok(TokenKind::Eof, self.line, self.col))
    }

    /// Measure the indentation of the line about to start and compare it with
    /// the stack. Blank and comment-only lines emit nothing.
    fn handle_indentation(&mut self) -> Result<Option<Token>, Diagnostic> {
        self.at_line_start = false;
        let mut level: u32 = 0;
        loop {
            match self.cur() {
                Some(b' ') => level += 1,
                Some(b'\t') => level = (level / 8 + 1) * 8,
                _ => break,
            }
            self.advance();
        }

        match self.cur() {
            None | Some(b'\n') | Some(b'\r') => return Ok(None),
            Some(b'#') => {
                self.skip_comment();
                return Ok(None);
            }
            Some(b'/') if self.peek() == Some(b'/') => {
                self.skip_comment();
                return Ok(None);
            }
            _ => {}
        }

        let current = *self.indent_stack.last().unwrap();
        if level > current {
            self.indent_stack.push(level);
            return Ok(Some(self.tok(TokenKind::Indent, self.line, 1)));
        }
        if level < current {
            let mut dedents = Vec::new();
            while *self.indent_stack.last().unwrap() > level {
                self.indent_stack.pop();
                dedents.push(self.tok(TokenKind::Dedent, self.line, 1));
            }
            if *self.indent_stack.last().unwrap() != level {
                return Err(self.error(
                    DiagKind::Indentation,
                    format!("indent width {level} does not match any outer block"),
                ));
            }
            let first = dedents[0].clone();
            self.pending.extend(dedents.into_iter().skip(1));
            return Ok(Some(first));
        }
        Ok(None)
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.cur() {
            if c == b'\n' {
                break;
            }
            self.advance();
        }
    }

    fn read_number(&mut self) -> Result<Token, Diagnostic> {
        let (line, col) = (self.line, self.col);

        let radix: u8 = if self.cur() == Some(b'0') && matches!(self.peek(), Some(b'x') | Some(b'X'))
        {
            self.advance();
            self.advance();
            16
        } else if self.cur() == Some(b'0') && matches!(self.peek(), Some(b'b') | Some(b'B')) {
            self.advance();
            self.advance();
            2
        } else {
            10
        };

        let digits_start = self.pos;
        while let Some(c) = self.cur() {
            let ok = match radix {
                16 => c.is_ascii_hexdigit(),
                2 => c == b'0' || c == b'1',
                _ => c.is_ascii_digit(),
            };
            if !ok {
                break;
            }
            self.advance();
        }
        if self.pos == digits_start {
            return Err(Diagnostic::new(DiagKind::Lex, line, col, "invalid integer literal"));
        }
        // No underscore separators, no trailing identifier characters.
        if let Some(c) = self.cur() {
            if c.is_ascii_alphanumeric() || c == b'_' {
                return Err(self.error(
                    DiagKind::Lex,
                    format!("invalid character '{}' in integer literal", c as char),
                ));
            }
        }

        let text = std::str::from_utf8(&self.bytes[digits_start..self.pos]).unwrap();
        let value = u64::from_str_radix(text, radix as u32).map_err(|_| {
            Diagnostic::new(DiagKind::Lex, line, col, format!("integer literal too large: {text}"))
        })?;
        Ok(self.tok(TokenKind::Int { value, radix }, line, col))
    }

    fn read_identifier(&mut self) -> Token {
        let (line, col) = (self.line, self.col);
        let start = self.pos;
        while let Some(c) = self.cur() {
            if c.is_ascii_alphanumeric() || c == b'_' {
                self.advance();
            } else {
                break;
            }
        }
        let s = std::str::from_utf8(&self.bytes[start..self.pos]).unwrap();
        let kind = match s {
            "func" => TokenKind::Func,
            "give" => TokenKind::Give,
            "when" => TokenKind::When,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "loop" => TokenKind::Loop,
            "repeat" => TokenKind::Repeat,
            "break" | "stop" => TokenKind::Break,
            "continue" | "skip" => TokenKind::Continue,
            "mode" => TokenKind::Mode,
            "True" => TokenKind::True,
            "False" => TokenKind::False,
            _ => TokenKind::Ident(s.to_string()),
        };
        self.tok(kind, line, col)
    }

    fn read_string(&mut self) -> Result<Token, Diagnostic> {
        let (line, col) = (self.line, self.col);
        self.advance(); // opening quote
        let mut content = Vec::new();
        loop {
            match self.cur() {
                None | Some(b'\n') => {
                    return Err(Diagnostic::new(DiagKind::Lex, line, col, "unterminated string literal"))
                }
                Some(b'"') => {
                    self.advance();
                    break;
                }
                Some(b'\\') => {
                    self.advance();
                    let esc = match self.cur() {
                        Some(c) => c,
                        None => {
                            return Err(Diagnostic::new(
                                DiagKind::Lex,
                                line,
                                col,
                                "unterminated string escape",
                            ))
                        }
                    };
                    let b = match esc {
                        b'n' => b'\n',
                        b't' => b'\t',
                        b'r' => b'\r',
                        b'0' => 0,
                        b'\\' => b'\\',
                        b'"' => b'"',
                        other => {
                            return Err(self.error(
                                DiagKind::Lex,
                                format!("unknown escape sequence: \\{}", other as char),
                            ))
                        }
                    };
                    content.push(b);
                    self.advance();
                }
                Some(c) => {
                    content.push(c);
                    self.advance();
                }
            }
        }
        Ok(self.tok(TokenKind::Str(content), line, col))
    }

    fn read_operator(&mut self) -> Result<Token, Diagnostic> {
        let (line, col) = (self.line, self.col);
        let c = self.cur().unwrap();

        let two = match (c, self.peek()) {
            (b'=', Some(b'=')) => Some(TokenKind::Eq),
            (b'!', Some(b'=')) => Some(TokenKind::Ne),
            (b'<', Some(b'<')) => Some(TokenKind::Shl),
            (b'<', Some(b'=')) => Some(TokenKind::Le),
            (b'>', Some(b'>')) => Some(TokenKind::Shr),
            (b'>', Some(b'=')) => Some(TokenKind::Ge),
            (b'-', Some(b'>')) => Some(TokenKind::Arrow),
            _ => None,
        };
        if let Some(kind) = two {
            self.advance();
            self.advance();
            return Ok(self.tok(kind, line, col));
        }

        let kind = match c {
            b'+' => TokenKind::Plus,
            b'-' => TokenKind::Minus,
            b'*' => TokenKind::Star,
            b'/' => TokenKind::Slash,
            b'%' => TokenKind::Percent,
            b'&' => TokenKind::Amp,
            b'|' => TokenKind::Pipe,
            b'^' => TokenKind::Caret,
            b'=' => TokenKind::Assign,
            b'<' => TokenKind::Lt,
            b'>' => TokenKind::Gt,
            b'!' => TokenKind::Bang,
            b':' => TokenKind::Colon,
            b',' => TokenKind::Comma,
            b'(' => {
                self.paren_depth += 1;
                TokenKind::LParen
            }
            b')' => {
                self.paren_depth = self.paren_depth.saturating_sub(1);
                TokenKind::RParen
            }
            other => {
                return Err(self.error(
                    DiagKind::Lex,
                    format!("unexpected character: '{}'", other as char),
                ))
            }
        };
        self.advance();
        Ok(self.tok(kind, line, col))
    }
}
