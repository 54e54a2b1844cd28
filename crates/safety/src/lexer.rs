//! Tokenizer for Python payloads.
//!
//! Produces logical lines (physical lines joined across brackets and
//! backslash continuations) with their indentation. Strings and comments are
//! consumed here so later passes never see their contents as code.

use crate::SyntaxIssue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenKind {
    Name,
    Number,
    Str,
    Op,
}

#[derive(Debug, Clone)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub line: u32,
    pub col: u32,
}

impl Token {
    pub fn is_op(&self, op: &str) -> bool {
        self.kind == TokenKind::Op && self.text == op
    }

    pub fn is_name(&self, name: &str) -> bool {
        self.kind == TokenKind::Name && self.text == name
    }
}

#[derive(Debug, Clone)]
pub(crate) struct LogicalLine {
    pub indent: usize,
    pub line: u32,
    pub tokens: Vec<Token>,
}

impl LogicalLine {
    pub fn first_name(&self) -> Option<&str> {
        self.tokens
            .first()
            .filter(|t| t.kind == TokenKind::Name)
            .map(|t| t.text.as_str())
    }
}

const STRING_PREFIXES: &[&str] = &["r", "b", "u", "f", "rb", "br", "fr", "rf"];

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    col: u32,
    brackets: Vec<(char, u32, u32)>,
    lines: Vec<LogicalLine>,
    current: Vec<Token>,
    indent: usize,
    start_line: u32,
}

pub(crate) fn tokenize(source: &str) -> Result<Vec<LogicalLine>, SyntaxIssue> {
    let mut lexer = Lexer {
        chars: source.chars().collect(),
        pos: 0,
        line: 1,
        col: 1,
        brackets: Vec::new(),
        lines: Vec::new(),
        current: Vec::new(),
        indent: 0,
        start_line: 1,
    };
    lexer.run()?;
    Ok(lexer.lines)
}

impl Lexer {
    fn peek(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn push(&mut self, kind: TokenKind, text: String, line: u32, col: u32) {
        self.current.push(Token {
            kind,
            text,
            line,
            col,
        });
    }

    fn flush(&mut self) {
        if !self.current.is_empty() {
            self.lines.push(LogicalLine {
                indent: self.indent,
                line: self.start_line,
                tokens: std::mem::take(&mut self.current),
            });
        }
    }

    fn run(&mut self) -> Result<(), SyntaxIssue> {
        let mut at_line_start = true;

        while let Some(c) = self.peek(0) {
            if at_line_start {
                at_line_start = false;
                let mut width = 0;
                while let Some(ws @ (' ' | '\t')) = self.peek(0) {
                    width += if ws == '\t' { 8 - width % 8 } else { 1 };
                    self.bump();
                }
                if self.current.is_empty() {
                    self.indent = width;
                    self.start_line = self.line;
                }
                continue;
            }

            match c {
                '\n' => {
                    self.bump();
                    if self.brackets.is_empty() {
                        self.flush();
                    }
                    at_line_start = true;
                }
                '\\' if matches!(self.peek(1), Some('\n')) || self.peek(1) == Some('\r') => {
                    self.bump();
                    if self.peek(0) == Some('\r') {
                        self.bump();
                    }
                    self.bump();
                    at_line_start = true;
                }
                '#' => {
                    while !matches!(self.peek(0), None | Some('\n')) {
                        self.bump();
                    }
                }
                ' ' | '\t' | '\r' | '\x0c' => {
                    self.bump();
                }
                '"' | '\'' => self.string(self.line, self.col)?,
                c if c.is_alphabetic() || c == '_' => self.word()?,
                c if c.is_ascii_digit() => self.number(),
                '.' if self.peek(1).is_some_and(|n| n.is_ascii_digit()) => self.number(),
                '(' | '[' | '{' => {
                    let (line, col) = (self.line, self.col);
                    self.brackets.push((c, line, col));
                    self.bump();
                    self.push(TokenKind::Op, c.to_string(), line, col);
                }
                ')' | ']' | '}' => self.close(c)?,
                ':' if self.peek(1) == Some('=') => {
                    let (line, col) = (self.line, self.col);
                    self.bump();
                    self.bump();
                    self.push(TokenKind::Op, ":=".to_string(), line, col);
                }
                _ => {
                    let (line, col) = (self.line, self.col);
                    self.bump();
                    self.push(TokenKind::Op, c.to_string(), line, col);
                }
            }
        }

        if let Some((open, line, col)) = self.brackets.last() {
            return Err(SyntaxIssue::new(format!("'{}' was never closed", open), *line, *col));
        }
        self.flush();
        Ok(())
    }

    fn word(&mut self) -> Result<(), SyntaxIssue> {
        let (line, col) = (self.line, self.col);
        let mut text = String::new();
        while let Some(c) = self.peek(0).filter(|c| c.is_alphanumeric() || *c == '_') {
            text.push(c);
            self.bump();
        }

        let is_prefix = STRING_PREFIXES.contains(&text.to_lowercase().as_str());
        if is_prefix && matches!(self.peek(0), Some('"' | '\'')) {
            return self.string(line, col);
        }

        self.push(TokenKind::Name, text, line, col);
        Ok(())
    }

    fn number(&mut self) {
        let (line, col) = (self.line, self.col);
        let mut text = String::new();
        while let Some(c) = self
            .peek(0)
            .filter(|c| c.is_ascii_alphanumeric() || *c == '.' || *c == '_')
        {
            text.push(c);
            self.bump();
        }
        self.push(TokenKind::Number, text, line, col);
    }

    fn string(&mut self, line: u32, col: u32) -> Result<(), SyntaxIssue> {
        let Some(quote) = self.bump() else {
            return Ok(());
        };
        let triple = self.peek(0) == Some(quote) && self.peek(1) == Some(quote);
        if triple {
            self.bump();
            self.bump();
        }

        loop {
            match self.bump() {
                None => {
                    let message = if triple {
                        "unterminated triple-quoted string literal"
                    } else {
                        "unterminated string literal"
                    };
                    return Err(SyntaxIssue::new(message, line, col));
                }
                Some('\\') => {
                    self.bump();
                }
                Some('\n') if !triple => {
                    return Err(SyntaxIssue::new("unterminated string literal", line, col));
                }
                Some(c) if c == quote => {
                    if !triple {
                        break;
                    }
                    if self.peek(0) == Some(quote) && self.peek(1) == Some(quote) {
                        self.bump();
                        self.bump();
                        break;
                    }
                }
                Some(_) => {}
            }
        }

        self.push(TokenKind::Str, String::new(), line, col);
        Ok(())
    }

    fn close(&mut self, c: char) -> Result<(), SyntaxIssue> {
        let (line, col) = (self.line, self.col);
        let expected = match c {
            ')' => '(',
            ']' => '[',
            _ => '{',
        };
        match self.brackets.pop() {
            None => {
                return Err(SyntaxIssue::new(format!("unmatched '{}'", c), line, col));
            }
            Some((open, _, _)) if open != expected => {
                return Err(SyntaxIssue::new(
                    format!("closing '{}' does not match opening '{}'", c, open),
                    line,
                    col,
                ));
            }
            Some(_) => {}
        }
        self.bump();
        self.push(TokenKind::Op, c.to_string(), line, col);
        Ok(())
    }
}
