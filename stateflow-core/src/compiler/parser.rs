use super::ast::{CompareOp, Condition, Statement, Term};
use super::path::JsonPath;
use crate::errors::CompileError;
use serde_json::Value;

/// Collapse whitespace runs to single spaces and trim, leaving quoted
/// string literals untouched. Statements that normalize to the same
/// text share a content hash.
pub fn normalize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_str = false;
    let mut pending_space = false;
    for c in raw.chars() {
        if in_str {
            out.push(c);
            if c == '\'' {
                in_str = false;
            }
            continue;
        }
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        if c == '\'' {
            in_str = true;
        }
        out.push(c);
    }
    out
}

/// Parse one normalized statement into its tree form.
///
/// Grammar:
///
/// ```text
/// statement  := branch | "when" condition "then" statement ["else" statement]
/// branch     := #tag | literal
/// condition  := or_expr
/// or_expr    := and_expr ("or" and_expr)*
/// and_expr   := not_expr ("and" not_expr)*
/// not_expr   := "not" not_expr | primary
/// primary    := "exist" path | "(" condition ")" | term op term
/// ```
///
/// `not` binds tightest of the boolean operators, then `and`, then
/// `or`; comparisons bind tighter than `not`. An `else` belongs to the
/// innermost open `when`.
pub fn parse_statement(statement: &str) -> Result<Statement, CompileError> {
    let tokens = tokenize(statement)?;
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        source: statement,
    };
    let parsed = parser.statement()?;
    if parser.pos != tokens.len() {
        return Err(parser.malformed("unexpected trailing tokens"));
    }
    Ok(parsed)
}

// ─── Tokenizer ────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
enum Tok {
    Word(String),
    Str(String),
    Num(Value),
    Path(String),
    Tag(String),
    /// Balanced `{…}` map literal, kept raw for JSON parsing.
    MapLit(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
}

fn tokenize(input: &str) -> Result<Vec<Tok>, CompileError> {
    let malformed = |reason: &str| {
        CompileError::MalformedStatement(format!("{reason} in: {input}"))
    };

    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' => i += 1,
            '(' => {
                tokens.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Tok::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Tok::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Tok::RBracket);
                i += 1;
            }
            ',' => {
                tokens.push(Tok::Comma);
                i += 1;
            }
            '\'' => {
                let mut literal = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        Some('\'') => {
                            i += 1;
                            break;
                        }
                        Some(&c) => {
                            literal.push(c);
                            i += 1;
                        }
                        None => return Err(malformed("unterminated string literal")),
                    }
                }
                tokens.push(Tok::Str(literal));
            }
            '$' => {
                let mut raw = String::from('$');
                i += 1;
                while let Some(&c) = chars.get(i) {
                    if c.is_ascii_alphanumeric()
                        || matches!(c, '_' | '-' | '.' | '[' | ']' | '*')
                    {
                        raw.push(c);
                        i += 1;
                    } else {
                        break;
                    }
                }
                tokens.push(Tok::Path(raw));
            }
            '#' => {
                let mut tag = String::new();
                i += 1;
                while let Some(&c) = chars.get(i) {
                    if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                        tag.push(c);
                        i += 1;
                    } else {
                        break;
                    }
                }
                if tag.is_empty() {
                    return Err(malformed("empty successor tag"));
                }
                tokens.push(Tok::Tag(tag));
            }
            '{' => {
                let mut raw = String::new();
                let mut depth = 0usize;
                let mut in_quotes = false;
                loop {
                    let Some(&c) = chars.get(i) else {
                        return Err(malformed("unterminated map literal"));
                    };
                    raw.push(c);
                    i += 1;
                    if in_quotes {
                        if c == '"' {
                            in_quotes = false;
                        }
                        continue;
                    }
                    match c {
                        '"' => in_quotes = true,
                        '{' => depth += 1,
                        '}' => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                }
                tokens.push(Tok::MapLit(raw));
            }
            c if c.is_ascii_digit() || (c == '-' && next_is_digit(&chars, i)) => {
                let mut raw = String::new();
                raw.push(c);
                i += 1;
                while let Some(&c) = chars.get(i) {
                    if c.is_ascii_digit() || c == '.' {
                        raw.push(c);
                        i += 1;
                    } else {
                        break;
                    }
                }
                tokens.push(Tok::Num(parse_number(&raw).ok_or_else(|| {
                    malformed(&format!("invalid number literal '{raw}'"))
                })?));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut word = String::new();
                word.push(c);
                i += 1;
                while let Some(&c) = chars.get(i) {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        word.push(c);
                        i += 1;
                    } else {
                        break;
                    }
                }
                tokens.push(Tok::Word(word));
            }
            other => return Err(malformed(&format!("unexpected character '{other}'"))),
        }
    }

    Ok(tokens)
}

fn next_is_digit(chars: &[char], i: usize) -> bool {
    chars.get(i + 1).is_some_and(|c| c.is_ascii_digit())
}

fn parse_number(raw: &str) -> Option<Value> {
    if raw.contains('.') {
        serde_json::Number::from_f64(raw.parse::<f64>().ok()?).map(Value::Number)
    } else {
        Some(Value::Number(raw.parse::<i64>().ok()?.into()))
    }
}

// ─── Parser ───────────────────────────────────────────────────

struct Parser<'a> {
    tokens: &'a [Tok],
    pos: usize,
    source: &'a str,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&Tok> {
        let tok = self.tokens.get(self.pos);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn peek_word(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Tok::Word(w)) if w == word)
    }

    fn expect_word(&mut self, word: &str) -> Result<(), CompileError> {
        if self.peek_word(word) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.malformed(&format!("expected '{word}'")))
        }
    }

    fn malformed(&self, reason: &str) -> CompileError {
        CompileError::MalformedStatement(format!("{reason} in: {}", self.source))
    }

    fn statement(&mut self) -> Result<Statement, CompileError> {
        if self.peek_word("when") {
            self.pos += 1;
            let condition = self.condition()?;
            self.expect_word("then")?;
            let then = Box::new(self.statement()?);
            let otherwise = if self.peek_word("else") {
                self.pos += 1;
                Some(Box::new(self.statement()?))
            } else {
                None
            };
            return Ok(Statement::When {
                condition,
                then,
                otherwise,
            });
        }

        let term = self.term()?;
        match term {
            Term::StateRef(_) | Term::Literal(_) => Ok(Statement::Branch(term)),
            Term::Path(path) => Err(self.malformed(&format!(
                "branch must be a '#tag' or a literal, got selector '{}'",
                path.raw()
            ))),
            Term::Param(_) => unreachable!("parser never produces Param terms"),
        }
    }

    fn condition(&mut self) -> Result<Condition, CompileError> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Result<Condition, CompileError> {
        let mut left = self.and_expr()?;
        while self.peek_word("or") {
            self.pos += 1;
            let right = self.and_expr()?;
            left = Condition::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Condition, CompileError> {
        let mut left = self.not_expr()?;
        while self.peek_word("and") {
            self.pos += 1;
            let right = self.not_expr()?;
            left = Condition::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Condition, CompileError> {
        if self.peek_word("not") {
            self.pos += 1;
            return Ok(Condition::Not(Box::new(self.not_expr()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Condition, CompileError> {
        if self.peek_word("exist") {
            self.pos += 1;
            match self.next().cloned() {
                Some(Tok::Path(raw)) => {
                    Ok(Condition::Exist(Term::Path(JsonPath::parse(&raw)?)))
                }
                _ => Err(self.malformed("'exist' must be followed by a '$.'-selector")),
            }
        } else if matches!(self.peek(), Some(Tok::LParen)) {
            self.pos += 1;
            let inner = self.condition()?;
            match self.next().cloned() {
                Some(Tok::RParen) => Ok(inner),
                _ => Err(self.malformed("unbalanced parentheses")),
            }
        } else {
            self.comparison()
        }
    }

    fn comparison(&mut self) -> Result<Condition, CompileError> {
        let left = self.term()?;
        let op = match self.next().cloned() {
            Some(Tok::Word(w)) => match CompareOp::parse(&w) {
                Some(op) => op,
                None if matches!(w.as_str(), "then" | "else" | "and" | "or" | "when") => {
                    return Err(
                        self.malformed("expected a comparison operator after term")
                    )
                }
                None => return Err(CompileError::InvalidOperator(w)),
            },
            _ => return Err(self.malformed("expected a comparison operator after term")),
        };
        let right = self.term()?;
        Ok(Condition::Compare { left, op, right })
    }

    fn term(&mut self) -> Result<Term, CompileError> {
        match self.next().cloned() {
            Some(Tok::Path(raw)) => Ok(Term::Path(JsonPath::parse(&raw)?)),
            Some(Tok::Tag(tag)) => Ok(Term::StateRef(tag)),
            Some(Tok::Str(s)) => Ok(Term::Literal(Value::String(s))),
            Some(Tok::Num(n)) => Ok(Term::Literal(n)),
            Some(Tok::Word(w)) => match w.as_str() {
                "true" => Ok(Term::Literal(Value::Bool(true))),
                "false" => Ok(Term::Literal(Value::Bool(false))),
                "null" => Ok(Term::Literal(Value::Null)),
                other => Err(self.malformed(&format!("unexpected word '{other}'"))),
            },
            Some(Tok::LBracket) => self.list_literal(),
            Some(Tok::MapLit(raw)) => {
                let value: Value = serde_json::from_str(&raw).map_err(|e| {
                    self.malformed(&format!("map literal is not valid JSON ({e})"))
                })?;
                Ok(Term::Literal(value))
            }
            _ => Err(self.malformed("expected a term")),
        }
    }

    /// `[ literal, literal, … ]` — elements must themselves be literals.
    fn list_literal(&mut self) -> Result<Term, CompileError> {
        let mut items = Vec::new();
        loop {
            if matches!(self.peek(), Some(Tok::RBracket)) {
                self.pos += 1;
                break;
            }
            match self.term()? {
                Term::Literal(v) => items.push(v),
                _ => {
                    return Err(
                        self.malformed("list literals may contain only literal values")
                    )
                }
            }
            match self.peek() {
                Some(Tok::Comma) => self.pos += 1,
                Some(Tok::RBracket) => {}
                _ => return Err(self.malformed("unterminated list literal")),
            }
        }
        Ok(Term::Literal(Value::Array(items)))
    }
}
