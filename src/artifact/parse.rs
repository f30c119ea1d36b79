//! Artifact reader: the exact inverse of the renderer, plus structural checks.
use std::collections::HashSet;
use std::path::Path;

use tracing::debug;

use super::FORMAT_MARKER;
use crate::error::{Error, Result};
use crate::ir::{Allocation, Expr, Instruction, Symbol};
use crate::runtime::types::{TypeName, is_identifier};
use crate::runtime::value::Key;
use crate::snapshot::buffer::{InstructionBuffer, Section};

pub fn read(path: impl AsRef<Path>) -> Result<InstructionBuffer> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .map_err(|source| Error::ArtifactRead { path: path.to_path_buf(), source })?;
    parse(&text)
}

pub fn parse(text: &str) -> Result<InstructionBuffer> {
    let mut lines = text.lines().enumerate().map(|(i, l)| (i + 1, l));
    match lines.next() {
        Some((_, first)) if first.trim_end() == FORMAT_MARKER => {}
        _ => return Err(syntax(1, "missing artifact format marker")),
    }

    let mut buffer = InstructionBuffer::new();
    let mut current: Option<Section> = None;

    for (line_no, raw) in lines {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.starts_with('[') {
            let Some(section) = Section::from_header(line) else {
                return Err(syntax(line_no, format!("unknown section header `{line}`")));
            };
            if current.is_some_and(|prev| section <= prev) {
                return Err(syntax(line_no, format!("section `{line}` is repeated or out of order")));
            }
            current = Some(section);
            continue;
        }
        let Some(section) = current else {
            return Err(syntax(line_no, "statement outside of any section"));
        };
        let instruction = Parser::new(line_no, line)?.statement()?;
        if section_of(&instruction) != section {
            return Err(syntax(
                line_no,
                format!("statement does not belong in the `{}` section", section.name()),
            ));
        }
        buffer.push(section, instruction);
    }

    debug!(instructions = buffer.len(), "artifact parsed");
    Ok(buffer)
}

/// Every symbol is allocated once, and before anything reads it.
pub fn verify(buffer: &InstructionBuffer) -> Result<()> {
    let mut defined: HashSet<Symbol> = HashSet::new();
    for instruction in buffer.iter() {
        if let Some(symbol) = instruction.uses().into_iter().find(|s| !defined.contains(s)) {
            return Err(Error::UndefinedSymbol(symbol));
        }
        if let Instruction::Allocate { symbol, .. } = instruction {
            if !defined.insert(*symbol) {
                return Err(Error::DuplicateSymbol(*symbol));
            }
        }
    }
    Ok(())
}

fn section_of(instruction: &Instruction) -> Section {
    match instruction {
        Instruction::Allocate { .. } => Section::Allocation,
        Instruction::SetField { .. } => Section::FieldSetup,
        Instruction::SetRootStatic { .. } => Section::StaticRoots,
        Instruction::SetRootGlobal { .. } => Section::GlobalRoots,
    }
}

fn syntax(line: usize, message: impl Into<String>) -> Error {
    Error::Syntax { line, message: message.into() }
}

// ————————————————————————————————————————————————————————————————————————————
// LEXER
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, PartialEq)]
enum Token {
    /// Identifier, possibly dotted (`app.Config`).
    Ident(String),
    Symbol(u64),
    Int(i64),
    Float(f64),
    Str(Vec<u8>),
    Note(String),
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    Arrow,
    Eq,
    PathSep,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Ident(s) => format!("`{s}`"),
            Token::Symbol(n) => format!("`${n}`"),
            Token::Int(i) => format!("`{i}`"),
            Token::Float(x) => format!("`{x}`"),
            Token::Str(_) => "string literal".to_string(),
            Token::Note(_) => "annotation".to_string(),
            Token::LBracket => "`[`".to_string(),
            Token::RBracket => "`]`".to_string(),
            Token::LParen => "`(`".to_string(),
            Token::RParen => "`)`".to_string(),
            Token::Comma => "`,`".to_string(),
            Token::Arrow => "`=>`".to_string(),
            Token::Eq => "`=`".to_string(),
            Token::PathSep => "`::`".to_string(),
        }
    }
}

fn lex(line_no: usize, line: &str) -> Result<Vec<Token>> {
    let bytes = line.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b' ' | b'\t' => i += 1,
            b'[' | b']' | b'(' | b')' | b',' | b'=' | b':' => {
                let (token, len) = match (b, bytes.get(i + 1)) {
                    (b'[', _) => (Token::LBracket, 1),
                    (b']', _) => (Token::RBracket, 1),
                    (b'(', _) => (Token::LParen, 1),
                    (b')', _) => (Token::RParen, 1),
                    (b',', _) => (Token::Comma, 1),
                    (b'=', Some(b'>')) => (Token::Arrow, 2),
                    (b'=', _) => (Token::Eq, 1),
                    (b':', Some(b':')) => (Token::PathSep, 2),
                    _ => return Err(syntax(line_no, "unexpected `:`")),
                };
                tokens.push(token);
                i += len;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let rest = &line[i + 2..];
                let Some(end) = rest.find("*/") else {
                    return Err(syntax(line_no, "unterminated annotation"));
                };
                let body = &rest[..end];
                let body = body.strip_prefix(' ').unwrap_or(body);
                let body = body.strip_suffix(' ').unwrap_or(body);
                tokens.push(Token::Note(body.to_string()));
                i += 2 + end + 2;
            }
            b'\'' => {
                let (value, next) = lex_string(line_no, bytes, i + 1)?;
                tokens.push(Token::Str(value));
                i = next;
            }
            b'$' => {
                let start = i + 1;
                let end = scan(bytes, start, |c| c.is_ascii_digit());
                let n = line[start..end]
                    .parse::<u64>()
                    .map_err(|_| syntax(line_no, "malformed symbol"))?;
                tokens.push(Token::Symbol(n));
                i = end;
            }
            b'-' if line[i + 1..].starts_with("inf") && !continues_ident(bytes, i + 4) => {
                tokens.push(Token::Float(f64::NEG_INFINITY));
                i += 4;
            }
            b'-' | b'0'..=b'9' => {
                let (token, next) = lex_number(line_no, line, i)?;
                tokens.push(token);
                i = next;
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                let end = scan(bytes, i, |c| c.is_ascii_alphanumeric() || c == b'_' || c == b'.');
                tokens.push(Token::Ident(line[i..end].to_string()));
                i = end;
            }
            _ => {
                let c = line[i..].chars().next().unwrap_or('?');
                return Err(syntax(line_no, format!("unexpected character `{c}`")));
            }
        }
    }
    Ok(tokens)
}

fn scan(bytes: &[u8], start: usize, accept: impl Fn(u8) -> bool) -> usize {
    let mut end = start;
    while end < bytes.len() && accept(bytes[end]) {
        end += 1;
    }
    end
}

fn continues_ident(bytes: &[u8], at: usize) -> bool {
    bytes.get(at).is_some_and(|c| c.is_ascii_alphanumeric() || *c == b'_')
}

fn lex_number(line_no: usize, line: &str, start: usize) -> Result<(Token, usize)> {
    let bytes = line.as_bytes();
    let mut end = start;
    if bytes[end] == b'-' {
        end += 1;
    }
    let digits = scan(bytes, end, |c| c.is_ascii_digit());
    if digits == end {
        return Err(syntax(line_no, "expected digits"));
    }
    end = digits;
    let mut is_float = false;
    if bytes.get(end) == Some(&b'.') {
        is_float = true;
        end = scan(bytes, end + 1, |c| c.is_ascii_digit());
    }
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        is_float = true;
        end += 1;
        if matches!(bytes.get(end), Some(b'+' | b'-')) {
            end += 1;
        }
        end = scan(bytes, end, |c| c.is_ascii_digit());
    }

    let text = &line[start..end];
    let token = if is_float {
        Token::Float(text.parse().map_err(|_| syntax(line_no, format!("malformed float `{text}`")))?)
    } else {
        Token::Int(text.parse().map_err(|_| syntax(line_no, format!("integer out of range `{text}`")))?)
    };
    Ok((token, end))
}

fn lex_string(line_no: usize, bytes: &[u8], mut i: usize) -> Result<(Vec<u8>, usize)> {
    let mut out = Vec::new();
    loop {
        match bytes.get(i) {
            None => return Err(syntax(line_no, "unterminated string literal")),
            Some(b'\'') => return Ok((out, i + 1)),
            Some(b'\\') => {
                let escaped = match bytes.get(i + 1) {
                    Some(b'\\') => b'\\',
                    Some(b'\'') => b'\'',
                    Some(b'n') => b'\n',
                    Some(b'r') => b'\r',
                    Some(b't') => b'\t',
                    Some(b'0') => 0,
                    Some(b'x') => {
                        let hex = bytes
                            .get(i + 2..i + 4)
                            .and_then(|h| std::str::from_utf8(h).ok())
                            .and_then(|h| u8::from_str_radix(h, 16).ok())
                            .ok_or_else(|| syntax(line_no, "malformed \\x escape"))?;
                        out.push(hex);
                        i += 4;
                        continue;
                    }
                    _ => return Err(syntax(line_no, "unknown escape sequence")),
                };
                out.push(escaped);
                i += 2;
            }
            Some(&b) => {
                out.push(b);
                i += 1;
            }
        }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// PARSER
// ————————————————————————————————————————————————————————————————————————————

struct Parser {
    line: usize,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(line: usize, text: &str) -> Result<Self> {
        Ok(Self { line, tokens: lex(line, text)?, pos: 0 })
    }

    fn error(&self, message: impl Into<String>) -> Error {
        syntax(self.line, message)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn next(&mut self) -> Result<Token> {
        let token = self.tokens.get(self.pos).cloned().ok_or_else(|| self.error("unexpected end of line"))?;
        self.pos += 1;
        Ok(token)
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        let token = self.next()?;
        if token == expected {
            Ok(())
        } else {
            Err(self.error(format!("expected {}, found {}", expected.describe(), token.describe())))
        }
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn ident(&mut self) -> Result<String> {
        match self.next()? {
            Token::Ident(s) => Ok(s),
            other => Err(self.error(format!("expected identifier, found {}", other.describe()))),
        }
    }

    fn field_name(&mut self) -> Result<String> {
        let name = self.ident()?;
        if is_identifier(&name) {
            Ok(name)
        } else {
            Err(self.error(format!("invalid member name `{name}`")))
        }
    }

    fn type_name(&mut self) -> Result<TypeName> {
        let name = self.ident()?;
        TypeName::parse(name).map_err(|e| self.error(e.to_string()))
    }

    fn symbol(&mut self) -> Result<Symbol> {
        match self.next()? {
            Token::Symbol(n) => Ok(Symbol(n)),
            other => Err(self.error(format!("expected symbol, found {}", other.describe()))),
        }
    }

    fn string(&mut self) -> Result<Vec<u8>> {
        match self.next()? {
            Token::Str(b) => Ok(b),
            other => Err(self.error(format!("expected string literal, found {}", other.describe()))),
        }
    }

    fn utf8_string(&mut self) -> Result<String> {
        let bytes = self.string()?;
        String::from_utf8(bytes).map_err(|_| self.error("name is not valid UTF-8"))
    }

    fn end(&self) -> Result<()> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(self.error(format!("unexpected trailing {}", token.describe()))),
        }
    }

    fn statement(mut self) -> Result<Instruction> {
        let keyword = self.ident()?;
        let instruction = match keyword.as_str() {
            "alloc" => {
                let symbol = self.symbol()?;
                let allocation = match self.ident()?.as_str() {
                    "new" => Allocation::Instance(self.type_name()?),
                    "placeholder" => Allocation::Placeholder(self.type_name()?),
                    "recreate" => {
                        let kind = self.utf8_string()?;
                        self.expect(Token::LParen)?;
                        let mut args = Vec::new();
                        if !self.eat(&Token::RParen) {
                            loop {
                                args.push(self.expr()?);
                                if self.eat(&Token::RParen) {
                                    break;
                                }
                                self.expect(Token::Comma)?;
                            }
                        }
                        Allocation::Recreate { kind, args }
                    }
                    "unavailable" => Allocation::Unavailable { reason: self.utf8_string()? },
                    other => return Err(self.error(format!("unknown allocation form `{other}`"))),
                };
                Instruction::Allocate { symbol, allocation }
            }
            "set" => {
                let symbol = self.symbol()?;
                let owner = self.type_name()?;
                self.expect(Token::PathSep)?;
                let field = self.field_name()?;
                self.expect(Token::Eq)?;
                Instruction::SetField { symbol, owner, field, value: self.expr()? }
            }
            "static" => {
                let ty = self.type_name()?;
                self.expect(Token::PathSep)?;
                let field = self.field_name()?;
                self.expect(Token::Eq)?;
                Instruction::SetRootStatic { ty, field, value: self.expr()? }
            }
            "global" => {
                let name = self.utf8_string()?;
                self.expect(Token::Eq)?;
                Instruction::SetRootGlobal { name, value: self.expr()? }
            }
            other => return Err(self.error(format!("unknown statement `{other}`"))),
        };
        self.end()?;
        Ok(instruction)
    }

    fn expr(&mut self) -> Result<Expr> {
        match self.next()? {
            Token::Note(note) => Ok(Expr::Annotated { note, expr: Box::new(self.expr()?) }),
            Token::Int(i) => Ok(Expr::Int(i)),
            Token::Float(x) => Ok(Expr::Float(x)),
            Token::Str(b) => Ok(Expr::Str(b)),
            Token::Symbol(n) => Ok(Expr::Symbol(Symbol(n))),
            Token::LBracket => self.sequence(),
            Token::Ident(name) if self.peek() != Some(&Token::PathSep) => match name.as_str() {
                "null" => Ok(Expr::Null),
                "true" => Ok(Expr::Bool(true)),
                "false" => Ok(Expr::Bool(false)),
                "nan" => Ok(Expr::Float(f64::NAN)),
                "inf" => Ok(Expr::Float(f64::INFINITY)),
                other => Err(self.error(format!("unknown literal `{other}`"))),
            },
            Token::Ident(name) => {
                let ty = TypeName::parse(name).map_err(|e| self.error(e.to_string()))?;
                self.expect(Token::PathSep)?;
                let is_backing = matches!(self.peek(), Some(Token::Ident(s)) if s == "from")
                    && self.peek_at(1) == Some(&Token::LParen);
                if is_backing {
                    self.pos += 2;
                    let backing = self.expr()?;
                    self.expect(Token::RParen)?;
                    Ok(Expr::FromBacking { ty, backing: Box::new(backing) })
                } else {
                    Ok(Expr::Variant { ty, variant: self.field_name()? })
                }
            }
            other => Err(self.error(format!("expected expression, found {}", other.describe()))),
        }
    }

    fn sequence(&mut self) -> Result<Expr> {
        let mut entries = Vec::new();
        if self.eat(&Token::RBracket) {
            return Ok(Expr::Seq(entries));
        }
        loop {
            let key = match self.next()? {
                Token::Int(i) => Key::Int(i),
                Token::Str(b) => Key::Str(b),
                other => return Err(self.error(format!("expected sequence key, found {}", other.describe()))),
            };
            self.expect(Token::Arrow)?;
            entries.push((key, self.expr()?));
            if self.eat(&Token::RBracket) {
                return Ok(Expr::Seq(entries));
            }
            self.expect(Token::Comma)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactWriter;

    fn parse_expr(text: &str) -> Expr {
        let line = format!("global 'x' = {text}");
        match Parser::new(1, &line).unwrap().statement().unwrap() {
            Instruction::SetRootGlobal { value, .. } => value,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn scalars_parse_back_exactly() {
        for expr in [
            Expr::Null,
            Expr::Bool(true),
            Expr::Int(-7),
            Expr::Int(i64::MIN),
            Expr::Float(3.14),
            Expr::Float(1.0),
            Expr::Float(-0.0),
            Expr::Float(2.5e-10),
            Expr::Float(f64::INFINITY),
            Expr::Float(f64::NEG_INFINITY),
            Expr::str(""),
            Expr::str("it's a test"),
            Expr::Str(b"\xff\x00\n\x1b end".to_vec()),
        ] {
            assert_eq!(parse_expr(&expr.to_string()), expr, "{expr}");
        }
        assert!(matches!(parse_expr("nan"), Expr::Float(x) if x.is_nan()));
        assert!(matches!(parse_expr("-0.0"), Expr::Float(x) if x.is_sign_negative()));
    }

    #[test]
    fn composite_expressions_parse_back() {
        let expr = Expr::Seq(vec![
            (Key::Int(0), Expr::Symbol(Symbol(3))),
            (Key::from("suit"), Expr::Variant { ty: TypeName::parse("app.Suit").unwrap(), variant: "Hearts".into() }),
            (
                Key::from("1"),
                Expr::FromBacking { ty: TypeName::parse("app.Level").unwrap(), backing: Box::new(Expr::Int(2)) },
            ),
            (Key::Int(7), Expr::annotated("callable f: cannot be captured", Expr::Null)),
            (Key::Int(8), Expr::Seq(vec![])),
        ]);
        assert_eq!(parse_expr(&expr.to_string()), expr);
    }

    #[test]
    fn rendered_buffers_parse_to_the_same_instructions() {
        let mut buffer = InstructionBuffer::new();
        let ty = TypeName::parse("app.Config").unwrap();
        buffer.push_allocation(Instruction::Allocate { symbol: Symbol(0), allocation: Allocation::Instance(ty.clone()) });
        buffer.push_allocation(Instruction::Allocate {
            symbol: Symbol(1),
            allocation: Allocation::Recreate {
                kind: "stream".into(),
                args: vec![Expr::str("/tmp/a b.txt"), Expr::str("r+"), Expr::Int(42)],
            },
        });
        buffer.push_field_setup(Instruction::SetField {
            symbol: Symbol(0),
            owner: ty.clone(),
            field: "log".into(),
            value: Expr::Symbol(Symbol(1)),
        });
        buffer.push_static_root(Instruction::SetRootStatic { ty, field: "current".into(), value: Expr::Symbol(Symbol(0)) });

        let parsed = parse(&ArtifactWriter::new().render(&buffer)).unwrap();
        assert_eq!(parsed, buffer);
        verify(&parsed).unwrap();
    }

    #[test]
    fn structural_errors_report_their_line() {
        let text = format!("{FORMAT_MARKER}\n[globals]\n[allocate]\n");
        assert!(matches!(parse(&text), Err(Error::Syntax { line: 3, .. })));

        let text = format!("{FORMAT_MARKER}\n[allocate]\nglobal 'x' = 1\n");
        assert!(matches!(parse(&text), Err(Error::Syntax { line: 3, .. })));

        let text = format!("{FORMAT_MARKER}\nalloc $0 new app.A\n");
        assert!(matches!(parse(&text), Err(Error::Syntax { line: 2, .. })));

        let text = format!("{FORMAT_MARKER}\n[globals]\nglobal 'x' = 'open\n");
        assert!(matches!(parse(&text), Err(Error::Syntax { line: 3, .. })));

        assert!(matches!(parse("[globals]\n"), Err(Error::Syntax { line: 1, .. })));
    }

    #[test]
    fn wide_symbols_and_multiline_notes_parse_back() {
        let wide = Expr::Symbol(Symbol(u64::from(u32::MAX) + 1));
        assert_eq!(parse_expr(&wide.to_string()), wide);

        let note = Expr::annotated("callable closure\n@main.rs:3", Expr::Null);
        assert_eq!(parse_expr(&note.to_string()), Expr::annotated("callable closure @main.rs:3", Expr::Null));
    }

    #[test]
    fn verify_catches_use_before_allocation_and_duplicates() {
        let text = format!("{FORMAT_MARKER}\n[fields]\nset $0 app.A::x = 1\n");
        assert!(matches!(verify(&parse(&text).unwrap()), Err(Error::UndefinedSymbol(Symbol(0)))));

        let text = format!("{FORMAT_MARKER}\n[allocate]\nalloc $0 new app.A\nalloc $0 new app.A\n");
        assert!(matches!(verify(&parse(&text).unwrap()), Err(Error::DuplicateSymbol(Symbol(0)))));

        let text = format!("{FORMAT_MARKER}\n[allocate]\nalloc $0 new app.A\n[globals]\nglobal 'a' = [0 => $1]\n");
        assert!(matches!(verify(&parse(&text).unwrap()), Err(Error::UndefinedSymbol(Symbol(1)))));
    }
}
