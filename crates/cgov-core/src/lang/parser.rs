//! Recursive-descent parser for the canonical policy language.

use super::ast::{CanonicalRule, CmpOp, Expr, Import, Module, Ref, RefSegment, RuleHead, Scalar, Term};
use super::lexer::{tokenize, Tok, Token};
use super::SyntaxError;

/// Parse a complete module. The `package` declaration is required.
pub fn parse_module(src: &str) -> Result<Module, SyntaxError> {
    let mut p = Parser::new(src)?;
    p.skip_newlines();
    if !p.at_keyword("package") {
        return Err(p.error("expected 'package' declaration"));
    }
    let (package, imports) = p.preamble()?;
    let rules = p.rules()?;
    Ok(Module {
        package: package.unwrap_or_else(|| Ref::ident("")),
        imports,
        rules,
    })
}

/// Parse a sequence of rules. A leading `package`/`import` preamble is
/// accepted and discarded, so both bare rules and whole modules parse.
pub fn parse_rules(src: &str) -> Result<Vec<CanonicalRule>, SyntaxError> {
    let mut p = Parser::new(src)?;
    p.preamble()?;
    p.rules()
}

/// Parse exactly one rule.
pub fn parse_rule(src: &str) -> Result<CanonicalRule, SyntaxError> {
    let mut rules = parse_rules(src)?;
    match rules.len() {
        1 => Ok(rules.remove(0)),
        n => Err(SyntaxError::new(1, 1, format!("expected one rule, found {n}"))),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(src: &str) -> Result<Self, SyntaxError> {
        Ok(Self {
            tokens: tokenize(src)?,
            pos: 0,
        })
    }

    fn peek(&self) -> &Tok {
        self.tokens
            .get(self.pos)
            .map(|t| &t.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        let (line, column) = self
            .tokens
            .get(self.pos)
            .or(self.tokens.last())
            .map(|t| (t.line, t.column))
            .unwrap_or((1, 1));
        SyntaxError::new(line, column, message)
    }

    fn expect(&mut self, tok: Tok, what: &str) -> Result<(), SyntaxError> {
        if *self.peek() == tok {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("expected {what}, found {}", describe(self.peek()))))
        }
    }

    fn at_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Ident(s) if s == kw)
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek(), Tok::Newline | Tok::Semi) {
            self.advance();
        }
    }

    fn ident(&mut self) -> Result<String, SyntaxError> {
        match self.peek().clone() {
            Tok::Ident(s) if !is_reserved(&s) => {
                self.advance();
                Ok(s)
            }
            other => Err(self.error(format!("expected identifier, found {}", describe(&other)))),
        }
    }

    fn preamble(&mut self) -> Result<(Option<Ref>, Vec<Import>), SyntaxError> {
        self.skip_newlines();
        let mut package = None;
        if self.at_keyword("package") {
            self.advance();
            package = Some(self.reference()?);
            self.end_of_line()?;
        }
        let mut imports = Vec::new();
        loop {
            self.skip_newlines();
            if !self.at_keyword("import") {
                break;
            }
            self.advance();
            let path = self.reference()?;
            let alias = if self.at_keyword("as") {
                self.advance();
                Some(self.ident()?)
            } else {
                None
            };
            self.end_of_line()?;
            imports.push(Import { path, alias });
        }
        Ok((package, imports))
    }

    fn end_of_line(&mut self) -> Result<(), SyntaxError> {
        match self.peek() {
            Tok::Newline | Tok::Semi => {
                self.advance();
                Ok(())
            }
            Tok::Eof => Ok(()),
            other => Err(self.error(format!("expected end of line, found {}", describe(other)))),
        }
    }

    fn rules(&mut self) -> Result<Vec<CanonicalRule>, SyntaxError> {
        let mut rules = Vec::new();
        loop {
            self.skip_newlines();
            if *self.peek() == Tok::Eof {
                return Ok(rules);
            }
            rules.push(self.rule()?);
            self.end_of_line()?;
        }
    }

    fn rule(&mut self) -> Result<CanonicalRule, SyntaxError> {
        let is_default = if self.at_keyword("default") {
            self.advance();
            true
        } else {
            false
        };
        let name = self.ident()?;
        let key = if *self.peek() == Tok::LBracket {
            self.advance();
            let key = self.term()?;
            self.expect(Tok::RBracket, "']'")?;
            Some(key)
        } else {
            None
        };
        let value = if matches!(self.peek(), Tok::Assign | Tok::Define) {
            self.advance();
            Some(self.term()?)
        } else {
            None
        };
        let mut body = Vec::new();
        if *self.peek() == Tok::LBrace {
            self.advance();
            loop {
                self.skip_newlines();
                if *self.peek() == Tok::RBrace {
                    self.advance();
                    break;
                }
                body.push(self.expr()?);
                match self.peek() {
                    Tok::Newline | Tok::Semi | Tok::RBrace => {}
                    other => {
                        return Err(self.error(format!(
                            "expected end of expression, found {}",
                            describe(other)
                        )))
                    }
                }
            }
            if body.is_empty() {
                return Err(self.error(format!("rule '{name}' has an empty body")));
            }
        }
        Ok(CanonicalRule {
            is_default,
            head: RuleHead { name, key, value },
            body,
        })
    }

    fn expr(&mut self) -> Result<Expr, SyntaxError> {
        let negated = if self.at_keyword("not") {
            self.advance();
            true
        } else {
            false
        };
        let lhs = self.term()?;
        let op = match self.peek() {
            Tok::EqEq => Some(CmpOp::Eq),
            Tok::NotEq => Some(CmpOp::Neq),
            Tok::Lt => Some(CmpOp::Lt),
            Tok::Lte => Some(CmpOp::Lte),
            Tok::Gt => Some(CmpOp::Gt),
            Tok::Gte => Some(CmpOp::Gte),
            Tok::Assign | Tok::Define => {
                return Err(self.error("assignment is not supported in rule bodies"))
            }
            _ => None,
        };
        let cmp = match op {
            Some(op) => {
                self.advance();
                Some((op, self.term()?))
            }
            None => None,
        };
        Ok(Expr { negated, lhs, cmp })
    }

    fn term(&mut self) -> Result<Term, SyntaxError> {
        match self.peek().clone() {
            Tok::Str(s) => {
                self.advance();
                Ok(Term::Scalar(Scalar::String(s)))
            }
            Tok::Num(n) => {
                self.advance();
                Ok(Term::Scalar(Scalar::Number(n)))
            }
            Tok::Ident(s) if s == "true" || s == "false" => {
                self.advance();
                Ok(Term::Scalar(Scalar::Bool(s == "true")))
            }
            Tok::Ident(s) if s == "null" => {
                self.advance();
                Ok(Term::Scalar(Scalar::Null))
            }
            Tok::LBracket => {
                self.advance();
                let items = self.delimited(Tok::RBracket, "']'", Self::term)?;
                Ok(Term::Array(items))
            }
            Tok::LBrace => {
                self.advance();
                let pairs = self.delimited(Tok::RBrace, "'}'", |p| {
                    let k = p.term()?;
                    p.skip_newlines();
                    p.expect(Tok::Colon, "':'")?;
                    p.skip_newlines();
                    let v = p.term()?;
                    Ok((k, v))
                })?;
                Ok(Term::Object(pairs))
            }
            Tok::Ident(_) => {
                let r = self.reference()?;
                if *self.peek() == Tok::LParen {
                    self.advance();
                    let args = self.delimited(Tok::RParen, "')'", Self::term)?;
                    Ok(Term::Call { func: r, args })
                } else {
                    Ok(Term::Ref(r))
                }
            }
            other => Err(self.error(format!("expected term, found {}", describe(&other)))),
        }
    }

    /// Comma-separated items up to `close`; newlines inside are insignificant.
    fn delimited<T>(
        &mut self,
        close: Tok,
        what: &str,
        mut item: impl FnMut(&mut Self) -> Result<T, SyntaxError>,
    ) -> Result<Vec<T>, SyntaxError> {
        let mut out = Vec::new();
        loop {
            self.skip_newlines();
            if *self.peek() == close {
                self.advance();
                return Ok(out);
            }
            out.push(item(self)?);
            self.skip_newlines();
            match self.peek() {
                Tok::Comma => {
                    self.advance();
                }
                t if *t == close => {}
                other => {
                    return Err(self.error(format!("expected ',' or {what}, found {}", describe(other))))
                }
            }
        }
    }

    fn reference(&mut self) -> Result<Ref, SyntaxError> {
        let head = self.ident()?;
        let mut path = Vec::new();
        loop {
            match self.peek() {
                Tok::Dot => {
                    self.advance();
                    path.push(RefSegment::Field(self.ident()?));
                }
                Tok::LBracket => {
                    self.advance();
                    self.skip_newlines();
                    let idx = self.term()?;
                    self.skip_newlines();
                    self.expect(Tok::RBracket, "']'")?;
                    path.push(RefSegment::Index(idx));
                }
                _ => return Ok(Ref { head, path }),
            }
        }
    }
}

/// Keywords that cannot name a predicate, variable or field.
pub(crate) fn is_reserved(s: &str) -> bool {
    matches!(
        s,
        "package" | "import" | "as" | "default" | "not" | "true" | "false" | "null"
    )
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Ident(s) => format!("'{s}'"),
        Tok::Str(s) => format!("string \"{s}\""),
        Tok::Num(n) => format!("number {n}"),
        Tok::Newline => "end of line".into(),
        Tok::Eof => "end of input".into(),
        other => format!("{other:?}"),
    }
}
