//! Parser for fact programs and goals.

use std::collections::BTreeMap;

use crate::error::FactError;
use crate::term::{Atom, Clause, CmpOp, GroundAtom, Literal, Term, Value};

/// A parsed program: ground facts plus rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    /// Facts, in source order.
    pub facts: Vec<GroundAtom>,
    /// Rules, in source order.
    pub rules: Vec<Clause>,
}

impl Program {
    /// Check that every predicate keeps one arity throughout.
    pub fn check_arities(&self) -> Result<BTreeMap<String, usize>, FactError> {
        let mut arities = BTreeMap::new();
        let mut see = |predicate: &str, arity: usize| -> Result<(), FactError> {
            match arities.get(predicate) {
                Some(&expected) if expected != arity => Err(FactError::Arity {
                    predicate: predicate.to_string(),
                    expected,
                    found: arity,
                }),
                Some(_) => Ok(()),
                None => {
                    arities.insert(predicate.to_string(), arity);
                    Ok(())
                }
            }
        };
        for fact in &self.facts {
            see(&fact.predicate, fact.args.len())?;
        }
        for rule in &self.rules {
            see(&rule.head.predicate, rule.head.args.len())?;
            for lit in &rule.body {
                if let Literal::Pos(a) | Literal::Neg(a) = lit {
                    see(&a.predicate, a.args.len())?;
                }
            }
        }
        Ok(arities)
    }
}

/// Parse a program. Rules are checked for safety.
pub fn parse_program(src: &str) -> Result<Program, FactError> {
    let mut p = Parser::new(src)?;
    let mut program = Program::default();
    while p.peek() != &Tok::Eof {
        let head = p.atom()?;
        if p.eat(&Tok::Dot) {
            let fact = head.to_ground().ok_or_else(|| FactError::NonGroundFact(head.to_string()))?;
            program.facts.push(fact);
            continue;
        }
        p.expect(&Tok::If, "':-' or '.'")?;
        let mut body = vec![p.literal()?];
        while p.eat(&Tok::Comma) {
            body.push(p.literal()?);
        }
        p.expect(&Tok::Dot, "',' or '.'")?;
        let clause = Clause { head, body };
        if let Some(variable) = clause.unsafe_variable() {
            return Err(FactError::Unsafe {
                rule: clause.to_string(),
                variable: variable.to_string(),
            });
        }
        program.rules.push(clause);
    }
    program.check_arities()?;
    Ok(program)
}

/// Parse a single goal atom; a trailing `.` is allowed.
pub fn parse_goal(src: &str) -> Result<Atom, FactError> {
    let mut p = Parser::new(src)?;
    let atom = p.atom()?;
    p.eat(&Tok::Dot);
    p.expect(&Tok::Eof, "end of goal")?;
    Ok(atom)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Tok {
    Ident(String),
    Var(String),
    Str(String),
    Int(i64),
    LParen,
    RParen,
    Comma,
    Dot,
    If,
    Cmp(CmpOp),
    Eof,
}

struct Spanned {
    tok: Tok,
    line: usize,
    column: usize,
}

struct Parser {
    toks: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn new(src: &str) -> Result<Self, FactError> {
        Ok(Self {
            toks: lex(src)?,
            pos: 0,
        })
    }

    fn peek(&self) -> &Tok {
        &self.toks[self.pos.min(self.toks.len() - 1)].tok
    }

    fn peek2(&self) -> &Tok {
        &self.toks[(self.pos + 1).min(self.toks.len() - 1)].tok
    }

    fn next(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.toks.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == tok {
            self.next();
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> FactError {
        let at = &self.toks[self.pos.min(self.toks.len() - 1)];
        FactError::Syntax {
            line: at.line,
            column: at.column,
            message: message.into(),
        }
    }

    fn expect(&mut self, tok: &Tok, what: &str) -> Result<(), FactError> {
        if self.eat(tok) {
            Ok(())
        } else {
            Err(self.error(format!("expected {what}, found {:?}", self.peek())))
        }
    }

    fn atom(&mut self) -> Result<Atom, FactError> {
        let predicate = match self.next() {
            Tok::Ident(name) if name != "not" => name,
            other => return Err(self.error(format!("expected predicate name, found {other:?}"))),
        };
        let mut args = Vec::new();
        if self.eat(&Tok::LParen) {
            if !self.eat(&Tok::RParen) {
                args.push(self.term()?);
                while self.eat(&Tok::Comma) {
                    args.push(self.term()?);
                }
                self.expect(&Tok::RParen, "')'")?;
            }
        }
        Ok(Atom { predicate, args })
    }

    fn term(&mut self) -> Result<Term, FactError> {
        Ok(match self.next() {
            Tok::Var(v) => Term::Var(v),
            Tok::Ident(s) if s == "true" => Term::Const(Value::Bool(true)),
            Tok::Ident(s) if s == "false" => Term::Const(Value::Bool(false)),
            Tok::Ident(s) | Tok::Str(s) => Term::Const(Value::Str(s)),
            Tok::Int(n) => Term::Const(Value::Int(n)),
            other => return Err(self.error(format!("expected a term, found {other:?}"))),
        })
    }

    fn literal(&mut self) -> Result<Literal, FactError> {
        if matches!(self.peek(), Tok::Ident(s) if s == "not") {
            self.next();
            return Ok(Literal::Neg(self.atom()?));
        }
        let is_atom = matches!(self.peek(), Tok::Ident(_)) && !matches!(self.peek2(), Tok::Cmp(_));
        if is_atom {
            return Ok(Literal::Pos(self.atom()?));
        }
        let lhs = self.term()?;
        let op = match self.next() {
            Tok::Cmp(op) => op,
            other => return Err(self.error(format!("expected a comparison, found {other:?}"))),
        };
        Ok(Literal::Cmp(lhs, op, self.term()?))
    }
}

fn lex(src: &str) -> Result<Vec<Spanned>, FactError> {
    let mut out = Vec::new();
    let mut chars = src.chars().peekable();
    let (mut line, mut column) = (1usize, 1usize);
    let err = |line, column, message: String| FactError::Syntax { line, column, message };

    while let Some(&c) = chars.peek() {
        let (l, col) = (line, column);
        let mut bump = |chars: &mut std::iter::Peekable<std::str::Chars<'_>>| {
            let c = chars.next();
            if c == Some('\n') {
                line += 1;
                column = 1;
            } else {
                column += 1;
            }
            c
        };
        let tok = match c {
            c if c.is_whitespace() => {
                bump(&mut chars);
                continue;
            }
            '#' | '%' => {
                while chars.peek().is_some_and(|&c| c != '\n') {
                    bump(&mut chars);
                }
                continue;
            }
            '(' | ')' | ',' | '.' => {
                bump(&mut chars);
                match c {
                    '(' => Tok::LParen,
                    ')' => Tok::RParen,
                    ',' => Tok::Comma,
                    _ => Tok::Dot,
                }
            }
            ':' => {
                bump(&mut chars);
                if bump(&mut chars) != Some('-') {
                    return Err(err(l, col, "expected ':-'".into()));
                }
                Tok::If
            }
            '=' | '!' | '<' | '>' => {
                bump(&mut chars);
                let eq = chars.peek() == Some(&'=');
                if eq {
                    bump(&mut chars);
                }
                Tok::Cmp(match (c, eq) {
                    ('=', true) => CmpOp::Eq,
                    ('!', true) => CmpOp::Neq,
                    ('<', false) => CmpOp::Lt,
                    ('<', true) => CmpOp::Lte,
                    ('>', false) => CmpOp::Gt,
                    ('>', true) => CmpOp::Gte,
                    _ => return Err(err(l, col, format!("unexpected '{c}'"))),
                })
            }
            '"' => {
                bump(&mut chars);
                let mut s = String::new();
                loop {
                    match bump(&mut chars) {
                        Some('"') => break,
                        Some('\\') => match bump(&mut chars) {
                            Some('n') => s.push('\n'),
                            Some('t') => s.push('\t'),
                            Some(e @ ('"' | '\\')) => s.push(e),
                            _ => return Err(err(l, col, "invalid escape in string".into())),
                        },
                        Some(ch) => s.push(ch),
                        None => return Err(err(l, col, "unterminated string".into())),
                    }
                }
                Tok::Str(s)
            }
            c if c.is_ascii_digit() || c == '-' => {
                let mut text = String::new();
                text.push(c);
                bump(&mut chars);
                while chars.peek().is_some_and(char::is_ascii_digit) {
                    text.extend(bump(&mut chars));
                }
                let n = text
                    .parse::<i64>()
                    .map_err(|_| err(l, col, format!("invalid integer '{text}'")))?;
                Tok::Int(n)
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut name = String::new();
                while chars.peek().is_some_and(|&c| c.is_ascii_alphanumeric() || c == '_') {
                    name.extend(bump(&mut chars));
                }
                if name.starts_with(|c: char| c.is_ascii_uppercase() || c == '_') {
                    Tok::Var(name)
                } else {
                    Tok::Ident(name)
                }
            }
            other => return Err(err(l, col, format!("unexpected character '{other}'"))),
        };
        out.push(Spanned { tok, line: l, column: col });
    }
    out.push(Spanned {
        tok: Tok::Eof,
        line,
        column,
    });
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn facts_and_rules() {
        let p = parse_program(
            "employee(alice).\nshift(alice, 23).\n# rule\nnight(X) :- employee(X), shift(X, H), H >= 22, not exempt(X).\n",
        )
        .unwrap();
        assert_eq!(p.facts.len(), 2);
        assert_eq!(p.facts[1].args, vec![Value::str("alice"), Value::Int(23)]);
        assert_eq!(
            p.rules[0].to_string(),
            "night(X) :- employee(X), shift(X, H), H >= 22, not exempt(X)."
        );
    }

    #[test]
    fn unsafe_rules_rejected() {
        let err = parse_program("bad(X) :- not good(X).").unwrap_err();
        assert!(matches!(err, FactError::Unsafe { ref variable, .. } if variable == "X"));
        let err = parse_program("bad(Y) :- good(X).").unwrap_err();
        assert!(matches!(err, FactError::Unsafe { .. }));
    }

    #[test]
    fn non_ground_facts_and_arity_clashes() {
        assert!(matches!(parse_program("p(X)."), Err(FactError::NonGroundFact(_))));
        assert!(matches!(parse_program("p(a).\np(a, b)."), Err(FactError::Arity { .. })));
    }

    #[test]
    fn syntax_errors_carry_position() {
        match parse_program("p(a).\nq(b) :- p(a) p(b).") {
            Err(FactError::Syntax { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn goals() {
        let g = parse_goal("category(X, \"contractor\")").unwrap();
        assert_eq!(g.variables(), vec!["X"]);
        assert!(parse_goal("p(a) q(b)").is_err());
        assert_eq!(parse_goal("on_call.").unwrap().args.len(), 0);
    }
}
