//! Minimal tokenizer for generated Python snippets.
//!
//! Produces logical lines: newlines inside brackets, strings or after a
//! backslash continuation do not end a line. Comments are dropped. The
//! tokenizer never fails; unterminated strings run to the end of their
//! physical line (or to the end of input for triple-quoted strings). An
//! unclosed bracket is abandoned when a later line starts a statement at
//! column 0, so stray prose cannot swallow the code after it.

/// Token classes the hygiene pass cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Identifier or keyword
    Ident,
    /// Numeric literal
    Number,
    /// String literal, including prefix and quotes
    Str,
    /// Any other single character
    Punct,
}

/// A token borrowed from the source text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    /// Zero-based physical line the token starts on
    pub line: usize,
}

impl<'a> Token<'a> {
    pub fn is_ident(&self, name: &str) -> bool {
        self.kind == TokenKind::Ident && self.text == name
    }

    pub fn is_punct(&self, c: char) -> bool {
        self.kind == TokenKind::Punct && self.text.len() == c.len_utf8() && self.text.starts_with(c)
    }
}

/// One logical statement line
#[derive(Debug, Clone)]
pub struct LogicalLine<'a> {
    pub tokens: Vec<Token<'a>>,
    pub start_line: usize,
    pub end_line: usize,
    /// Leading whitespace width of the first physical line
    pub indent: usize,
}

fn is_ident_start(c: char) -> bool {
    c == '_' || c.is_alphabetic()
}

fn is_ident_continue(c: char) -> bool {
    c == '_' || c.is_alphanumeric()
}

/// Keywords that open a top-level statement when found at column 0
const STATEMENT_KEYWORDS: [&str; 5] = ["def", "async", "import", "from", "class"];

fn starts_statement(rest: &str) -> bool {
    if rest.starts_with('@') {
        return true;
    }
    let end = rest
        .char_indices()
        .find(|(_, c)| !is_ident_continue(*c))
        .map(|(i, _)| i)
        .unwrap_or(rest.len());
    STATEMENT_KEYWORDS.contains(&&rest[..end])
}

fn is_string_prefix(s: &str) -> bool {
    s.len() <= 2 && s.chars().all(|c| matches!(c.to_ascii_lowercase(), 'r' | 'b' | 'f' | 'u'))
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    line: usize,
    depth: usize,
}

impl<'a> Lexer<'a> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.src[self.pos..].chars().nth(offset)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    /// Consume a string body starting at the opening quote
    fn string(&mut self) {
        let quote = match self.bump() {
            Some(q) => q,
            None => return,
        };
        let triple = self.peek() == Some(quote) && self.peek_at(1) == Some(quote);
        if triple {
            self.bump();
            self.bump();
        }

        while let Some(c) = self.peek() {
            if c == '\\' {
                self.bump();
                self.bump();
                continue;
            }
            if !triple && c == '\n' {
                return;
            }
            self.bump();
            if c == quote {
                if !triple {
                    return;
                }
                if self.peek() == Some(quote) && self.peek_at(1) == Some(quote) {
                    self.bump();
                    self.bump();
                    return;
                }
            }
        }
    }
}

/// Split source text into logical lines of tokens
pub fn logical_lines(src: &str) -> Vec<LogicalLine<'_>> {
    let physical: Vec<&str> = src.split('\n').collect();

    let mut lexer = Lexer {
        src,
        pos: 0,
        line: 0,
        depth: 0,
    };
    let mut lines = Vec::new();
    let mut current: Vec<Token<'_>> = Vec::new();
    let mut start_line = 0;

    while let Some(c) = lexer.peek() {
        let start = lexer.pos;
        let line = lexer.line;

        if c == '\n' {
            lexer.bump();
            if lexer.depth > 0 && starts_statement(&src[lexer.pos..]) {
                lexer.depth = 0;
            }
            if lexer.depth == 0 {
                flush(&mut current, start_line, line, &physical, &mut lines);
            }
            continue;
        }
        if c == '\\' && lexer.peek_at(1) == Some('\n') {
            lexer.bump();
            lexer.bump();
            continue;
        }
        if c.is_whitespace() {
            lexer.bump();
            continue;
        }
        if c == '#' {
            while let Some(n) = lexer.peek() {
                if n == '\n' {
                    break;
                }
                lexer.bump();
            }
            continue;
        }

        if current.is_empty() {
            start_line = line;
        }

        let kind = if c == '"' || c == '\'' {
            lexer.string();
            TokenKind::Str
        } else if is_ident_start(c) {
            while lexer.peek().is_some_and(is_ident_continue) {
                lexer.bump();
            }
            let word = &src[start..lexer.pos];
            if is_string_prefix(word) && matches!(lexer.peek(), Some('"') | Some('\'')) {
                lexer.string();
                TokenKind::Str
            } else {
                TokenKind::Ident
            }
        } else if c.is_ascii_digit() {
            while lexer.peek().is_some_and(|n| n.is_alphanumeric() || n == '.' || n == '_') {
                lexer.bump();
            }
            TokenKind::Number
        } else {
            lexer.bump();
            match c {
                '(' | '[' | '{' => lexer.depth += 1,
                ')' | ']' | '}' => lexer.depth = lexer.depth.saturating_sub(1),
                _ => {}
            }
            TokenKind::Punct
        };

        current.push(Token {
            kind,
            text: &src[start..lexer.pos],
            line,
        });
    }

    let end_line = lexer.line;
    flush(&mut current, start_line, end_line, &physical, &mut lines);
    lines
}

fn flush<'a>(
    current: &mut Vec<Token<'a>>,
    start_line: usize,
    end_line: usize,
    physical: &[&str],
    lines: &mut Vec<LogicalLine<'a>>,
) {
    if current.is_empty() {
        return;
    }
    let indent = physical
        .get(start_line)
        .map(|l| l.chars().take_while(|c| *c == ' ' || *c == '\t').count())
        .unwrap_or(0);
    lines.push(LogicalLine {
        tokens: std::mem::take(current),
        start_line,
        end_line,
        indent,
    });
}
