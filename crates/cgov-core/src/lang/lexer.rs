//! Tokenizer for the canonical policy language.

use super::SyntaxError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Tok {
    Ident(String),
    Str(String),
    Num(String),
    Dot,
    Comma,
    Colon,
    Semi,
    Newline,
    LBracket,
    RBracket,
    LParen,
    RParen,
    LBrace,
    RBrace,
    Assign,
    Define,
    EqEq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    Eof,
}

#[derive(Debug, Clone)]
pub(crate) struct Token {
    pub tok: Tok,
    pub line: usize,
    pub column: usize,
}

pub(crate) fn tokenize(src: &str) -> Result<Vec<Token>, SyntaxError> {
    Lexer::new(src).run()
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    column: usize,
    out: Vec<Token>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            chars: src.chars().peekable(),
            line: 1,
            column: 1,
            out: Vec::new(),
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn push(&mut self, tok: Tok, line: usize, column: usize) {
        self.out.push(Token { tok, line, column });
    }

    fn run(mut self) -> Result<Vec<Token>, SyntaxError> {
        while let Some(&c) = self.chars.peek() {
            let (line, column) = (self.line, self.column);
            match c {
                ' ' | '\t' | '\r' => {
                    self.bump();
                }
                '\n' => {
                    self.bump();
                    self.push(Tok::Newline, line, column);
                }
                '#' => {
                    while self.chars.peek().is_some_and(|&c| c != '\n') {
                        self.bump();
                    }
                }
                '"' => {
                    self.bump();
                    let s = self.string(line, column)?;
                    self.push(Tok::Str(s), line, column);
                }
                '0'..='9' | '-' => {
                    let n = self.number(line, column)?;
                    self.push(Tok::Num(n), line, column);
                }
                c if c.is_ascii_alphabetic() || c == '_' => {
                    let mut ident = String::new();
                    while let Some(&c) = self.chars.peek() {
                        if c.is_ascii_alphanumeric() || c == '_' {
                            ident.push(c);
                            self.bump();
                        } else {
                            break;
                        }
                    }
                    self.push(Tok::Ident(ident), line, column);
                }
                _ => {
                    self.bump();
                    let tok = match c {
                        '.' => Tok::Dot,
                        ',' => Tok::Comma,
                        ';' => Tok::Semi,
                        '[' => Tok::LBracket,
                        ']' => Tok::RBracket,
                        '(' => Tok::LParen,
                        ')' => Tok::RParen,
                        '{' => Tok::LBrace,
                        '}' => Tok::RBrace,
                        ':' if self.eat('=') => Tok::Define,
                        ':' => Tok::Colon,
                        '=' if self.eat('=') => Tok::EqEq,
                        '=' => Tok::Assign,
                        '!' if self.eat('=') => Tok::NotEq,
                        '<' if self.eat('=') => Tok::Lte,
                        '<' => Tok::Lt,
                        '>' if self.eat('=') => Tok::Gte,
                        '>' => Tok::Gt,
                        other => {
                            return Err(SyntaxError::new(
                                line,
                                column,
                                format!("unexpected character '{other}'"),
                            ))
                        }
                    };
                    self.push(tok, line, column);
                }
            }
        }
        let (line, column) = (self.line, self.column);
        self.push(Tok::Eof, line, column);
        Ok(self.out)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.chars.peek() == Some(&expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn number(&mut self, line: usize, column: usize) -> Result<String, SyntaxError> {
        let mut text = String::new();
        if self.eat('-') {
            text.push('-');
        }
        let digits_start = text.len();
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E' {
                text.push(c);
                self.bump();
            } else if (c == '+' || c == '-') && text.ends_with(['e', 'E']) {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }
        let body = &text[digits_start..];
        if body.is_empty() || body.parse::<f64>().is_err() || body.starts_with('.') {
            return Err(SyntaxError::new(
                line,
                column,
                format!("invalid number literal '{text}'"),
            ));
        }
        Ok(text)
    }

    fn string(&mut self, line: usize, column: usize) -> Result<String, SyntaxError> {
        let mut out = String::new();
        loop {
            let Some(c) = self.bump() else {
                return Err(SyntaxError::new(line, column, "unterminated string literal"));
            };
            match c {
                '"' => return Ok(out),
                '\n' => {
                    return Err(SyntaxError::new(line, column, "newline in string literal"));
                }
                '\\' => {
                    let esc = self
                        .bump()
                        .ok_or_else(|| SyntaxError::new(line, column, "unterminated escape"))?;
                    match esc {
                        '"' => out.push('"'),
                        '\\' => out.push('\\'),
                        '/' => out.push('/'),
                        'n' => out.push('\n'),
                        'r' => out.push('\r'),
                        't' => out.push('\t'),
                        'b' => out.push('\u{8}'),
                        'f' => out.push('\u{c}'),
                        'u' => out.push(self.unicode_escape(line, column)?),
                        other => {
                            return Err(SyntaxError::new(
                                self.line,
                                self.column,
                                format!("invalid escape '\\{other}'"),
                            ))
                        }
                    }
                }
                c => out.push(c),
            }
        }
    }

    fn hex4(&mut self, line: usize, column: usize) -> Result<u32, SyntaxError> {
        let mut v = 0u32;
        for _ in 0..4 {
            let d = self
                .bump()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| SyntaxError::new(line, column, "invalid \\u escape"))?;
            v = v * 16 + d;
        }
        Ok(v)
    }

    fn unicode_escape(&mut self, line: usize, column: usize) -> Result<char, SyntaxError> {
        let hi = self.hex4(line, column)?;
        let code = if (0xD800..0xDC00).contains(&hi) {
            if !(self.eat('\\') && self.eat('u')) {
                return Err(SyntaxError::new(line, column, "unpaired surrogate in \\u escape"));
            }
            let lo = self.hex4(line, column)?;
            if !(0xDC00..0xE000).contains(&lo) {
                return Err(SyntaxError::new(line, column, "invalid low surrogate"));
            }
            0x10000 + ((hi - 0xD800) << 10) + (lo - 0xDC00)
        } else {
            hi
        };
        char::from_u32(code).ok_or_else(|| SyntaxError::new(line, column, "invalid code point"))
    }
}
