//! Tokenizer with indentation tracking

use std::fmt;

#[derive(Clone, Debug, PartialEq)]
pub enum Tok {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    /// Body of an f-string, escapes already processed
    FStr(String),
    Op(&'static str),
    Newline,
    Indent,
    Dedent,
    Eof,
}

impl fmt::Display for Tok {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tok::Name(n) => write!(f, "'{}'", n),
            Tok::Int(v) => write!(f, "{}", v),
            Tok::Float(v) => write!(f, "{}", v),
            Tok::Str(_) | Tok::FStr(_) => f.write_str("string"),
            Tok::Op(op) => write!(f, "'{}'", op),
            Tok::Newline => f.write_str("end of line"),
            Tok::Indent => f.write_str("indent"),
            Tok::Dedent => f.write_str("dedent"),
            Tok::Eof => f.write_str("end of input"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LexError {
    pub line: usize,
    pub message: String,
}

/// Operators, longest first so prefixes never shadow longer matches
const OPERATORS: &[&str] = &[
    "**=", "//=", "->", "**", "//", "==", "!=", "<=", ">=", "+=", "-=", "*=", "/=", "%=", "+",
    "-", "*", "/", "%", "<", ">", "=", "(", ")", "[", "]", "{", "}", ",", ":", ".", ";", "@",
];

const TAB_WIDTH: usize = 8;

pub fn tokenize(src: &str) -> Result<Vec<Token>, LexError> {
    Lexer::new(src).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    depth: usize,
    indents: Vec<usize>,
    at_line_start: bool,
    tokens: Vec<Token>,
}

impl Lexer {
    fn new(src: &str) -> Self {
        Self {
            chars: src.chars().collect(),
            pos: 0,
            line: 1,
            depth: 0,
            indents: vec![0],
            at_line_start: true,
            tokens: Vec::new(),
        }
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn error(&self, message: impl Into<String>) -> LexError {
        LexError {
            line: self.line,
            message: message.into(),
        }
    }

    fn push(&mut self, tok: Tok) {
        self.tokens.push(Token { tok, line: self.line });
    }

    fn run(mut self) -> Result<Vec<Token>, LexError> {
        while self.pos < self.chars.len() {
            if self.at_line_start && self.depth == 0 {
                self.indentation()?;
                if self.pos >= self.chars.len() {
                    break;
                }
                continue;
            }

            let c = self.chars[self.pos];
            match c {
                ' ' | '\t' | '\r' | '\x0c' => self.pos += 1,
                '#' => self.skip_comment(),
                '\\' if self.peek(1) == Some('\n') => {
                    self.pos += 2;
                    self.line += 1;
                }
                '\\' if self.peek(1) == Some('\r') && self.peek(2) == Some('\n') => {
                    self.pos += 3;
                    self.line += 1;
                }
                '\n' => {
                    if self.depth == 0 {
                        self.end_logical_line();
                        self.at_line_start = true;
                    }
                    self.pos += 1;
                    self.line += 1;
                }
                c if c.is_ascii_digit() => self.number()?,
                '.' if self.peek(1).is_some_and(|d| d.is_ascii_digit()) => self.number()?,
                c if c.is_alphabetic() || c == '_' => self.name_or_string()?,
                '"' | '\'' => {
                    let s = self.string(false)?;
                    self.push(Tok::Str(s));
                }
                _ => self.operator()?,
            }
        }

        if self.depth > 0 {
            return Err(self.error("unexpected end of input inside brackets"));
        }
        self.end_logical_line();
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Tok::Dedent);
        }
        self.push(Tok::Eof);
        Ok(self.tokens)
    }

    fn end_logical_line(&mut self) {
        let needs_newline = self
            .tokens
            .last()
            .is_some_and(|t| !matches!(t.tok, Tok::Newline | Tok::Indent | Tok::Dedent));
        if needs_newline {
            self.push(Tok::Newline);
        }
    }

    fn skip_comment(&mut self) {
        while self.pos < self.chars.len() && self.chars[self.pos] != '\n' {
            self.pos += 1;
        }
    }

    /// Measure leading whitespace of a physical line and emit indent tokens.
    /// Blank and comment-only lines are skipped.
    fn indentation(&mut self) -> Result<(), LexError> {
        let mut width = 0;
        while let Some(c) = self.peek(0) {
            match c {
                ' ' => width += 1,
                '\t' => width = (width / TAB_WIDTH + 1) * TAB_WIDTH,
                '\r' | '\x0c' => {}
                _ => break,
            }
            self.pos += 1;
        }

        match self.peek(0) {
            None => return Ok(()),
            Some('\n') => {
                self.pos += 1;
                self.line += 1;
                return Ok(());
            }
            Some('#') => {
                self.skip_comment();
                return Ok(());
            }
            _ => {}
        }

        self.at_line_start = false;
        let current = *self.indents.last().unwrap_or(&0);
        if width > current {
            self.indents.push(width);
            self.push(Tok::Indent);
        } else if width < current {
            while self.indents.last().is_some_and(|&w| w > width) {
                self.indents.pop();
                self.push(Tok::Dedent);
            }
            if self.indents.last() != Some(&width) {
                return Err(self.error("unindent does not match any outer indentation level"));
            }
        }
        Ok(())
    }

    fn number(&mut self) -> Result<(), LexError> {
        let start = self.pos;
        if self.peek(0) == Some('0') && matches!(self.peek(1), Some('x' | 'X' | 'o' | 'O' | 'b' | 'B')) {
            let radix = match self.peek(1) {
                Some('x' | 'X') => 16,
                Some('o' | 'O') => 8,
                _ => 2,
            };
            self.pos += 2;
            let digits_start = self.pos;
            while self.peek(0).is_some_and(|c| c.is_digit(radix) || c == '_') {
                self.pos += 1;
            }
            let digits: String = self.chars[digits_start..self.pos].iter().filter(|&&c| c != '_').collect();
            let value = i64::from_str_radix(&digits, radix)
                .map_err(|_| self.error("invalid integer literal"))?;
            self.push(Tok::Int(value));
            return Ok(());
        }

        let mut is_float = false;
        while self.peek(0).is_some_and(|c| c.is_ascii_digit() || c == '_') {
            self.pos += 1;
        }
        if self.peek(0) == Some('.') {
            is_float = true;
            self.pos += 1;
            while self.peek(0).is_some_and(|c| c.is_ascii_digit() || c == '_') {
                self.pos += 1;
            }
        }
        if matches!(self.peek(0), Some('e' | 'E')) {
            let sign = usize::from(matches!(self.peek(1), Some('+' | '-')));
            if self.peek(1 + sign).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                self.pos += 1 + sign;
                while self.peek(0).is_some_and(|c| c.is_ascii_digit()) {
                    self.pos += 1;
                }
            }
        }

        let text: String = self.chars[start..self.pos].iter().filter(|&&c| c != '_').collect();
        if is_float {
            let value: f64 = text.parse().map_err(|_| self.error("invalid float literal"))?;
            self.push(Tok::Float(value));
        } else {
            let value: i64 = text.parse().map_err(|_| self.error("integer literal too large"))?;
            self.push(Tok::Int(value));
        }
        Ok(())
    }

    fn name_or_string(&mut self) -> Result<(), LexError> {
        let start = self.pos;
        while self.peek(0).is_some_and(|c| c.is_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        let name: String = self.chars[start..self.pos].iter().collect();

        if matches!(self.peek(0), Some('"' | '\'')) {
            let prefix = name.to_ascii_lowercase();
            match prefix.as_str() {
                "r" | "u" => {
                    let s = self.string(prefix == "r")?;
                    self.push(Tok::Str(s));
                    return Ok(());
                }
                "f" | "rf" | "fr" => {
                    let s = self.string(prefix != "f")?;
                    self.push(Tok::FStr(s));
                    return Ok(());
                }
                "b" | "br" | "rb" => return Err(self.error("bytes literals are not supported")),
                _ => {}
            }
        }

        self.push(Tok::Name(name));
        Ok(())
    }

    fn string(&mut self, raw: bool) -> Result<String, LexError> {
        let quote = self.chars[self.pos];
        let triple = self.peek(1) == Some(quote) && self.peek(2) == Some(quote);
        self.pos += if triple { 3 } else { 1 };

        let mut out = String::new();
        loop {
            let Some(c) = self.peek(0) else {
                return Err(self.error("unterminated string literal"));
            };
            if c == quote {
                if !triple {
                    self.pos += 1;
                    return Ok(out);
                }
                if self.peek(1) == Some(quote) && self.peek(2) == Some(quote) {
                    self.pos += 3;
                    return Ok(out);
                }
            }
            if c == '\n' {
                if !triple {
                    return Err(self.error("unterminated string literal"));
                }
                self.line += 1;
            }
            if c == '\\' && !raw {
                self.pos += 1;
                self.escape(&mut out)?;
                continue;
            }
            if c == '\\' && raw && self.peek(1).is_some() {
                // A raw string still cannot end on an escaped quote
                out.push(c);
                out.push(self.chars[self.pos + 1]);
                self.pos += 2;
                continue;
            }
            out.push(c);
            self.pos += 1;
        }
    }

    fn escape(&mut self, out: &mut String) -> Result<(), LexError> {
        let Some(c) = self.peek(0) else {
            return Err(self.error("unterminated string literal"));
        };
        self.pos += 1;
        match c {
            '\n' => self.line += 1,
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'x' => out.push(self.hex_escape(2)?),
            'u' => out.push(self.hex_escape(4)?),
            other => {
                out.push('\\');
                out.push(other);
            }
        }
        Ok(())
    }

    fn hex_escape(&mut self, digits: usize) -> Result<char, LexError> {
        let end = self.pos + digits;
        if end > self.chars.len() {
            return Err(self.error("truncated escape sequence"));
        }
        let text: String = self.chars[self.pos..end].iter().collect();
        self.pos = end;
        u32::from_str_radix(&text, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| self.error("invalid escape sequence"))
    }

    fn operator(&mut self) -> Result<(), LexError> {
        for &op in OPERATORS {
            let len = op.len();
            let matches = op
                .chars()
                .enumerate()
                .all(|(i, ch)| self.peek(i) == Some(ch));
            if matches {
                self.pos += len;
                match op {
                    "(" | "[" | "{" => self.depth += 1,
                    ")" | "]" | "}" => {
                        if self.depth == 0 {
                            return Err(self.error(format!("unmatched '{}'", op)));
                        }
                        self.depth -= 1;
                    }
                    _ => {}
                }
                self.push(Tok::Op(op));
                return Ok(());
            }
        }
        Err(self.error(format!("unexpected character '{}'", self.chars[self.pos])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Tok> {
        tokenize(src).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn test_indent_dedent() {
        let t = toks("if x:\n    y = 1\nz = 2\n");
        assert_eq!(
            t,
            vec![
                Tok::Name("if".into()),
                Tok::Name("x".into()),
                Tok::Op(":"),
                Tok::Newline,
                Tok::Indent,
                Tok::Name("y".into()),
                Tok::Op("="),
                Tok::Int(1),
                Tok::Newline,
                Tok::Dedent,
                Tok::Name("z".into()),
                Tok::Op("="),
                Tok::Int(2),
                Tok::Newline,
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn test_blank_lines_and_comments_ignored() {
        let t = toks("x = 1  # one\n\n   # indented comment\ny = 2");
        assert_eq!(t.iter().filter(|t| **t == Tok::Newline).count(), 2);
        assert!(!t.contains(&Tok::Indent));
    }

    #[test]
    fn test_brackets_join_lines() {
        let t = toks("build.fill(0, 0, 0,\n           1, 1, 1, 'stone')\n");
        assert_eq!(t.iter().filter(|t| **t == Tok::Newline).count(), 1);
    }

    #[test]
    fn test_numbers() {
        assert_eq!(toks("1_000 0x1f 2.5 1e3 .5")[..5], [
            Tok::Int(1000),
            Tok::Int(31),
            Tok::Float(2.5),
            Tok::Float(1000.0),
            Tok::Float(0.5),
        ]);
    }

    #[test]
    fn test_strings() {
        assert_eq!(toks(r#"'a\n' "b" r'\d' f"{x}""#)[..4], [
            Tok::Str("a\n".into()),
            Tok::Str("b".into()),
            Tok::Str("\\d".into()),
            Tok::FStr("{x}".into()),
        ]);
        assert_eq!(toks("'''multi\nline'''")[0], Tok::Str("multi\nline".into()));
    }

    #[test]
    fn test_errors_carry_line() {
        let err = tokenize("x = 1\ny = 'open\n").unwrap_err();
        assert_eq!(err.line, 2);

        let err = tokenize("if x:\n        a = 1\n    b = 2\n").unwrap_err();
        assert_eq!(err.line, 3);

        assert!(tokenize("x = b'raw'").is_err());
        assert!(tokenize("x = 99999999999999999999").is_err());
        assert!(tokenize("x = (1, 2").is_err());
    }
}
