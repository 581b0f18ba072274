//! Command reader
//!
//! Reads one command at a time against the live `ParserConfig`, so notations
//! registered by a command take part in parsing the commands after it. Terms
//! are parsed with a Pratt loop: application binds tightest, `→` sits at
//! precedence 25, and registered notations supply the remaining leading and
//! trailing rules. Rules sharing a head token are tried in turn; the longest
//! successful parse wins and ties become a `term.choice` node.

use crate::parser_config::{
    NotationRule, ParserConfig, RuleItem, ARG_PREC, ARROW_PREC, LEAD_PREC, MAX_PREC, MIN_PREC,
};
use crate::surface::{PositionMap, Span, Syntax, SyntaxKind};
use kernel::Name;
use thiserror::Error;
use tracing::trace;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unexpected end of input, expected {expected}")]
    UnexpectedEof { expected: String, span: Span },
    #[error("unexpected token '{found}', expected {expected}")]
    UnexpectedToken {
        found: String,
        expected: String,
        span: Span,
    },
    #[error("unexpected character '{0}'")]
    UnexpectedChar(char, Span),
    #[error("unterminated string literal")]
    UnterminatedString(Span),
    #[error("unterminated comment")]
    UnterminatedComment(Span),
    #[error("numeric literal out of range")]
    NumberOutOfRange(Span),
    #[error("maximum term nesting depth ({limit}) exceeded")]
    NestingTooDeep { limit: usize, span: Span },
}

impl ParseError {
    pub fn span(&self) -> Span {
        match self {
            ParseError::UnexpectedEof { span, .. }
            | ParseError::UnexpectedToken { span, .. }
            | ParseError::NestingTooDeep { span, .. } => *span,
            ParseError::UnexpectedChar(_, span)
            | ParseError::UnterminatedString(span)
            | ParseError::UnterminatedComment(span)
            | ParseError::NumberOutOfRange(span) => *span,
        }
    }
}

/// Producer of parsed commands. The configuration passed in is the one in
/// force after the previous command was elaborated.
pub trait CommandSource {
    fn next_command(&mut self, config: &ParserConfig) -> Result<Syntax, ParseError>;
}

const BUILTIN_SYMBOLS: &[&str] = &[
    "(", ")", "{", "}", "[", "]", "⟨", "⟩", "⦃", "⦄", ",", ":", ":=", "::", "=>", "→", "->", "↦",
    "@", "@&", "@[", ".", ".(", ".{", "|", "λ", "Π", "∀", ";", "+", "#check", "#print",
];

const KEYWORDS: &[&str] = &[
    "namespace", "section", "end", "open", "export", "universe", "universes", "variable",
    "variables", "set_option", "def", "theorem", "lemma", "abbrev", "instance", "example",
    "axiom", "inductive", "structure", "class", "mutual", "attribute", "notation", "infix",
    "infixl", "infixr", "prefix", "postfix", "reserve", "local", "private", "protected",
    "noncomputable", "meta", "fun", "let", "have", "show", "from", "if", "then", "else", "match",
    "with", "Type", "Sort", "Prop", "where", "extends", "as", "hiding", "renaming", "in",
];

const COMMAND_KEYWORDS: &[&str] = &[
    "namespace", "section", "end", "open", "export", "universe", "universes", "variable",
    "variables", "set_option", "def", "theorem", "lemma", "abbrev", "instance", "example",
    "axiom", "inductive", "structure", "class", "mutual", "attribute", "notation", "infix",
    "infixl", "infixr", "prefix", "postfix", "reserve", "local", "private", "protected",
    "noncomputable", "meta", "@[", "#check", "#print",
];

/// Terms and universe levels nested deeper than this are rejected.
pub const MAX_NESTING_DEPTH: usize = 100;

const NOTATION_KINDS: &[&str] = &["notation", "infix", "infixl", "infixr", "prefix", "postfix"];

fn is_ident_start(c: char) -> bool {
    (c.is_alphabetic() || c == '_') && !matches!(c, 'λ' | 'Π' | 'Σ')
}

fn is_ident_rest(c: char) -> bool {
    (c.is_alphanumeric() || matches!(c, '_' | '\'' | '!' | '?')) && !matches!(c, 'λ' | 'Π' | 'Σ')
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenKind {
    Ident(String),
    Num(u64),
    Str(String),
    Symbol(String),
    Eof,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    span: Span,
    first_on_line: bool,
}

impl Token {
    fn is_symbol(&self, s: &str) -> bool {
        matches!(&self.kind, TokenKind::Symbol(t) if t == s)
    }

    fn symbol(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Symbol(s) => Some(s),
            _ => None,
        }
    }

    fn is_ident(&self) -> bool {
        matches!(self.kind, TokenKind::Ident(_))
    }

    fn describe(&self) -> String {
        match &self.kind {
            TokenKind::Ident(s) | TokenKind::Symbol(s) => s.clone(),
            TokenKind::Num(n) => n.to_string(),
            TokenKind::Str(s) => format!("{:?}", s),
            TokenKind::Eof => "end of input".to_string(),
        }
    }
}

/// Lean-flavoured reader over one source text.
pub struct Parser<'a> {
    source: &'a str,
    positions: PositionMap,
    pos: usize,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> Self {
        Parser {
            source,
            positions: PositionMap::new(source),
            pos: 0,
        }
    }

    pub fn positions(&self) -> &PositionMap {
        &self.positions
    }

    /// Read every remaining command against a fixed configuration.
    pub fn parse_all(&mut self, config: &ParserConfig) -> Result<Vec<Syntax>, ParseError> {
        let mut commands = Vec::new();
        loop {
            let command = self.next_command(config)?;
            if command.is_node("command.eoi") {
                return Ok(commands);
            }
            commands.push(command);
        }
    }

    /// Parse a single term; used by tests and the REPL.
    pub fn parse_term(&mut self, config: &ParserConfig) -> Result<Syntax, ParseError> {
        let mut cursor = Cursor::new(self.source, &self.positions, config, self.pos);
        let term = cursor.term(0)?;
        self.pos = cursor.pos;
        Ok(term)
    }
}

impl CommandSource for Parser<'_> {
    fn next_command(&mut self, config: &ParserConfig) -> Result<Syntax, ParseError> {
        let start = self.pos;
        let mut cursor = Cursor::new(self.source, &self.positions, config, self.pos);
        match cursor.command() {
            Ok(command) => {
                self.pos = cursor.pos;
                Ok(command)
            }
            Err(err) => {
                cursor.synchronize(start);
                self.pos = cursor.pos;
                Err(err)
            }
        }
    }
}

struct Cursor<'a> {
    source: &'a str,
    positions: &'a PositionMap,
    config: &'a ParserConfig,
    pos: usize,
    prev_end: usize,
    /// Tokens that start a line at or left of this column end the current construct.
    stop_col: usize,
    depth: usize,
}

impl<'a> Cursor<'a> {
    fn new(
        source: &'a str,
        positions: &'a PositionMap,
        config: &'a ParserConfig,
        pos: usize,
    ) -> Self {
        Cursor {
            source,
            positions,
            config,
            pos,
            prev_end: pos,
            stop_col: 0,
            depth: 0,
        }
    }

    // =========================================================================
    // Lexing
    // =========================================================================

    fn skip_trivia(&self, mut pos: usize) -> Result<usize, ParseError> {
        let bytes = self.source.as_bytes();
        loop {
            let rest = &self.source[pos..];
            let Some(c) = rest.chars().next() else {
                return Ok(pos);
            };
            if c.is_whitespace() {
                pos += c.len_utf8();
            } else if rest.starts_with("--") {
                pos += rest.find('\n').unwrap_or(rest.len());
            } else if rest.starts_with("/-") {
                let open = pos;
                let mut depth = 0usize;
                loop {
                    if pos >= bytes.len() {
                        return Err(ParseError::UnterminatedComment(
                            self.positions.span(open, open + 2),
                        ));
                    }
                    let here = &self.source[pos..];
                    if here.starts_with("/-") {
                        depth += 1;
                        pos += 2;
                    } else if here.starts_with("-/") {
                        depth -= 1;
                        pos += 2;
                        if depth == 0 {
                            break;
                        }
                    } else {
                        pos += here.chars().next().map_or(1, char::len_utf8);
                    }
                }
            } else {
                return Ok(pos);
            }
        }
    }

    fn first_on_line(&self, start: usize) -> bool {
        let line_start = self.source[..start].rfind('\n').map_or(0, |i| i + 1);
        self.source[line_start..start].trim().is_empty()
    }

    /// Lex the token starting at `pos`, returning it and the offset after it.
    fn lex(&self, pos: usize) -> Result<(Token, usize), ParseError> {
        let start = self.skip_trivia(pos)?;
        let rest = &self.source[start..];
        let first_on_line = self.first_on_line(start);
        let Some(c) = rest.chars().next() else {
            let token = Token {
                kind: TokenKind::Eof,
                span: self.positions.span(start, start),
                first_on_line: true,
            };
            return Ok((token, start));
        };

        let (kind, end) = if c == '"' {
            self.lex_string(start)?
        } else if c.is_ascii_digit() {
            let len = rest
                .find(|ch: char| !ch.is_ascii_digit())
                .unwrap_or(rest.len());
            let end = start + len;
            let value = rest[..len]
                .parse::<u64>()
                .map_err(|_| ParseError::NumberOutOfRange(self.positions.span(start, end)))?;
            (TokenKind::Num(value), end)
        } else if is_ident_start(c) {
            let end = self.ident_end(start);
            let text = &self.source[start..end];
            let kind = if text == "_" || KEYWORDS.contains(&text) || self.config.tokens.contains(text) {
                TokenKind::Symbol(text.to_string())
            } else {
                TokenKind::Ident(text.to_string())
            };
            (kind, end)
        } else {
            let best = BUILTIN_SYMBOLS
                .iter()
                .copied()
                .chain(self.config.tokens.iter().map(String::as_str))
                .filter(|sym| !sym.is_empty() && rest.starts_with(sym))
                .max_by_key(|sym| sym.len());
            match best {
                Some(sym) => (TokenKind::Symbol(sym.to_string()), start + sym.len()),
                None => {
                    return Err(ParseError::UnexpectedChar(
                        c,
                        self.positions.span(start, start + c.len_utf8()),
                    ))
                }
            }
        };
        let token = Token {
            kind,
            span: self.positions.span(start, end),
            first_on_line,
        };
        Ok((token, end))
    }

    fn ident_end(&self, start: usize) -> usize {
        let mut end = start;
        loop {
            let segment = &self.source[end..];
            let mut chars = segment.char_indices();
            match chars.next() {
                Some((_, c)) if is_ident_start(c) => {}
                _ => return end,
            }
            let len = segment
                .char_indices()
                .skip(1)
                .find(|(_, ch)| !is_ident_rest(*ch))
                .map_or(segment.len(), |(i, _)| i);
            end += len;
            let after = &self.source[end..];
            let mut next = after.chars();
            match (next.next(), next.next()) {
                (Some('.'), Some(c)) if is_ident_start(c) => end += 1,
                _ => return end,
            }
        }
    }

    fn lex_string(&self, start: usize) -> Result<(TokenKind, usize), ParseError> {
        let mut value = String::new();
        let mut chars = self.source[start + 1..].char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '"' => return Ok((TokenKind::Str(value), start + 1 + i + 1)),
                '\\' => match chars.next() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, 't')) => value.push('\t'),
                    Some((_, other)) => value.push(other),
                    None => break,
                },
                other => value.push(other),
            }
        }
        Err(ParseError::UnterminatedString(
            self.positions.span(start, start + 1),
        ))
    }

    fn peek(&self) -> Result<Token, ParseError> {
        self.lex(self.pos).map(|(token, _)| token)
    }

    /// The token after the next one.
    fn peek_second(&self) -> Result<Token, ParseError> {
        let (_, after) = self.lex(self.pos)?;
        self.lex(after).map(|(token, _)| token)
    }

    fn advance(&mut self) -> Result<Token, ParseError> {
        let (token, end) = self.lex(self.pos)?;
        self.pos = end;
        self.prev_end = token.span.end;
        Ok(token)
    }

    fn at_symbol(&self, s: &str) -> Result<bool, ParseError> {
        Ok(self.peek()?.is_symbol(s))
    }

    fn eat_symbol(&mut self, s: &str) -> Result<bool, ParseError> {
        if self.at_symbol(s)? {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn unexpected(token: &Token, expected: &str) -> ParseError {
        match token.kind {
            TokenKind::Eof => ParseError::UnexpectedEof {
                expected: expected.to_string(),
                span: token.span,
            },
            _ => ParseError::UnexpectedToken {
                found: token.describe(),
                expected: expected.to_string(),
                span: token.span,
            },
        }
    }

    fn expect_symbol(&mut self, s: &str) -> Result<Token, ParseError> {
        let token = self.peek()?;
        if token.is_symbol(s) {
            self.advance()
        } else {
            Err(Self::unexpected(&token, &format!("'{}'", s)))
        }
    }

    fn ident(&mut self) -> Result<Syntax, ParseError> {
        let token = self.peek()?;
        match &token.kind {
            TokenKind::Ident(text) => {
                let name = Name::parse(text);
                self.advance()?;
                Ok(Syntax::ident(name, token.span))
            }
            _ => Err(Self::unexpected(&token, "identifier")),
        }
    }

    fn stopped(&self, token: &Token) -> bool {
        token.first_on_line && token.span.col <= self.stop_col
    }

    fn with_stop_col<T>(
        &mut self,
        col: usize,
        f: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        let saved = self.stop_col;
        self.stop_col = col;
        let result = f(self);
        self.stop_col = saved;
        result
    }

    fn span_from(&self, start: Span) -> Span {
        Span {
            start: start.start,
            end: self.prev_end.max(start.start),
            line: start.line,
            col: start.col,
        }
    }

    /// Skip ahead to the next plausible command start, always making progress.
    fn synchronize(&mut self, command_start: usize) {
        if self.pos <= command_start {
            self.pos = command_start;
            match self.lex(self.pos) {
                Ok((token, end)) if token.kind != TokenKind::Eof => self.pos = end,
                Ok(_) => return,
                Err(err) => self.pos = self.skip_past(err.span()),
            }
        }
        loop {
            match self.lex(self.pos) {
                Ok((token, end)) => {
                    if token.kind == TokenKind::Eof {
                        return;
                    }
                    if let Some(sym) = token.symbol() {
                        if COMMAND_KEYWORDS.contains(&sym) {
                            return;
                        }
                    }
                    self.pos = end;
                }
                Err(err) => {
                    self.pos = self.skip_past(err.span());
                    if self.pos >= self.source.len() {
                        return;
                    }
                }
            }
        }
    }

    /// Offset just past a lexing error, at least one character ahead.
    fn skip_past(&self, span: Span) -> usize {
        if span.end > self.pos {
            return span.end.min(self.source.len());
        }
        let step = self.source[self.pos..]
            .chars()
            .next()
            .map_or(0, char::len_utf8);
        self.pos + step
    }

    // =========================================================================
    // Commands
    // =========================================================================

    fn command(&mut self) -> Result<Syntax, ParseError> {
        let token = self.peek()?;
        let start = token.span;
        let sym = match &token.kind {
            TokenKind::Eof => return Ok(Syntax::node("command.eoi", vec![], token.span)),
            TokenKind::Symbol(s) => s.clone(),
            _ => return Err(Self::unexpected(&token, "command")),
        };
        trace!(keyword = %sym, offset = start.start, "reading command");
        match sym.as_str() {
            "namespace" => {
                self.advance()?;
                let name = self.ident()?;
                Ok(Syntax::node("command.namespace", vec![name], self.span_from(start)))
            }
            "section" | "end" => {
                self.advance()?;
                let next = self.peek()?;
                let name = if next.is_ident() && !next.first_on_line {
                    self.ident()?
                } else {
                    Syntax::missing()
                };
                let kind = format!("command.{}", sym);
                Ok(Syntax::node(kind, vec![name], self.span_from(start)))
            }
            "open" => self.open_command(),
            "export" => {
                self.advance()?;
                let ns = self.ident()?;
                self.expect_symbol("(")?;
                let mut args = vec![ns];
                while self.peek()?.is_ident() {
                    args.push(self.ident()?);
                }
                self.expect_symbol(")")?;
                Ok(Syntax::node("command.export", args, self.span_from(start)))
            }
            "universe" | "universes" => {
                self.advance()?;
                let mut names = vec![self.ident()?];
                loop {
                    let next = self.peek()?;
                    if !next.is_ident() || self.stopped(&next) {
                        break;
                    }
                    names.push(self.ident()?);
                }
                Ok(Syntax::node("command.universe", names, self.span_from(start)))
            }
            "variable" | "variables" => {
                self.advance()?;
                let mut groups = Vec::new();
                loop {
                    let next = self.peek()?;
                    if self.stopped(&next) {
                        break;
                    }
                    match self.binder_group(false)? {
                        Some(group) => groups.push(group),
                        None => break,
                    }
                }
                if groups.is_empty() {
                    return Err(Self::unexpected(&self.peek()?, "binder"));
                }
                Ok(Syntax::node("command.variable", groups, self.span_from(start)))
            }
            "set_option" => {
                self.advance()?;
                let name = self.ident()?;
                let token = self.advance()?;
                let value = match token.kind {
                    TokenKind::Ident(text) => Syntax::ident(Name::parse(&text), token.span),
                    TokenKind::Num(n) => Syntax {
                        kind: SyntaxKind::Num(n),
                        span: token.span,
                        scopes: vec![],
                    },
                    TokenKind::Str(s) => Syntax {
                        kind: SyntaxKind::Str(s),
                        span: token.span,
                        scopes: vec![],
                    },
                    _ => return Err(Self::unexpected(&token, "option value")),
                };
                Ok(Syntax::node(
                    "command.set_option",
                    vec![name, value],
                    self.span_from(start),
                ))
            }
            "attribute" => {
                self.advance()?;
                self.expect_symbol("[")?;
                let attrs = self.attr_list(start)?;
                let mut args = vec![attrs];
                loop {
                    let next = self.peek()?;
                    if !next.is_ident() || (self.stopped(&next) && args.len() > 1) {
                        break;
                    }
                    args.push(self.ident()?);
                }
                if args.len() == 1 {
                    return Err(Self::unexpected(&self.peek()?, "identifier"));
                }
                Ok(Syntax::node("command.attribute", args, self.span_from(start)))
            }
            "mutual" => {
                self.advance()?;
                let mut decls = Vec::new();
                while !self.at_symbol("end")? {
                    let next = self.peek()?;
                    if next.kind == TokenKind::Eof {
                        return Err(Self::unexpected(&next, "'end'"));
                    }
                    decls.push(self.declaration()?);
                }
                self.advance()?;
                Ok(Syntax::node("command.mutual", decls, self.span_from(start)))
            }
            "#check" => {
                self.advance()?;
                let term = self.term(0)?;
                Ok(Syntax::node("command.check", vec![term], self.span_from(start)))
            }
            "#print" => {
                self.advance()?;
                let name = self.ident()?;
                Ok(Syntax::node("command.print", vec![name], self.span_from(start)))
            }
            "reserve" => self.notation_command(true),
            "local" => self.notation_command(false),
            s if NOTATION_KINDS.contains(&s) => self.notation_command(false),
            "@[" | "private" | "protected" | "noncomputable" | "meta" | "def" | "theorem"
            | "lemma" | "abbrev" | "instance" | "example" | "axiom" | "inductive"
            | "structure" | "class" => self.declaration(),
            _ => Err(Self::unexpected(&token, "command")),
        }
    }

    fn open_command(&mut self) -> Result<Syntax, ParseError> {
        let start = self.advance()?.span;
        let ns = self.ident()?;
        let decl_start = ns.span;
        let decl = if self.eat_symbol("as")? {
            let alias = self.ident()?;
            Syntax::node("open.as", vec![ns, alias], self.span_from(decl_start))
        } else if self.eat_symbol("(")? {
            let mut args = vec![ns];
            while self.peek()?.is_ident() {
                args.push(self.ident()?);
            }
            self.expect_symbol(")")?;
            Syntax::node("open.only", args, self.span_from(decl_start))
        } else if self.eat_symbol("hiding")? {
            let mut args = vec![ns];
            loop {
                let next = self.peek()?;
                if !next.is_ident() || (self.stopped(&next) && args.len() > 1) {
                    break;
                }
                args.push(self.ident()?);
            }
            Syntax::node("open.hiding", args, self.span_from(decl_start))
        } else if self.eat_symbol("renaming")? {
            let mut args = vec![ns];
            loop {
                let from = self.ident()?;
                if !self.eat_symbol("→")? {
                    self.expect_symbol("->")?;
                }
                let to = self.ident()?;
                let span = from.span.to(to.span);
                args.push(Syntax::node("open.rename", vec![from, to], span));
                if !self.eat_symbol(",")? {
                    break;
                }
            }
            Syntax::node("open.renaming", args, self.span_from(decl_start))
        } else {
            let mut args = vec![ns];
            loop {
                let next = self.peek()?;
                if !next.is_ident() || self.stopped(&next) {
                    break;
                }
                args.push(self.ident()?);
            }
            Syntax::node("open.simple", args, self.span_from(decl_start))
        };
        let body = if self.eat_symbol("in")? {
            self.nested(Self::command)?
        } else {
            Syntax::missing()
        };
        Ok(Syntax::node("command.open", vec![decl, body], self.span_from(start)))
    }

    /// Attribute instances after `@[` or `attribute [`, through the closing `]`.
    fn attr_list(&mut self, start: Span) -> Result<Syntax, ParseError> {
        let mut attrs = Vec::new();
        loop {
            let token = self.advance()?;
            let name = match &token.kind {
                TokenKind::Ident(text) => Name::parse(text),
                TokenKind::Symbol(s) if s == "instance" || s == "class" => Name::parse(s),
                _ => return Err(Self::unexpected(&token, "attribute")),
            };
            let mut args = vec![Syntax::ident(name, token.span)];
            loop {
                let next = self.peek()?;
                match &next.kind {
                    TokenKind::Ident(_) => args.push(self.ident()?),
                    TokenKind::Num(n) => {
                        self.advance()?;
                        args.push(Syntax {
                            kind: SyntaxKind::Num(*n),
                            span: next.span,
                            scopes: vec![],
                        });
                    }
                    _ => break,
                }
            }
            let span = self.span_from(token.span);
            attrs.push(Syntax::node("attr", args, span));
            if self.eat_symbol("]")? {
                break;
            }
            self.expect_symbol(",")?;
        }
        Ok(Syntax::node("decl.attrs", attrs, self.span_from(start)))
    }

    fn modifiers(&mut self) -> Result<Syntax, ParseError> {
        let start = self.peek()?.span;
        let attrs = if self.at_symbol("@[")? {
            let open = self.advance()?.span;
            self.attr_list(open)?
        } else {
            Syntax::missing()
        };
        let mut visibility = Syntax::missing();
        let mut noncomputable = Syntax::missing();
        let mut meta = Syntax::missing();
        loop {
            let token = self.peek()?;
            match token.symbol() {
                Some("private") | Some("protected") if visibility.is_missing() => {
                    self.advance()?;
                    visibility = Syntax::atom(token.describe(), token.span);
                }
                Some("noncomputable") if noncomputable.is_missing() => {
                    self.advance()?;
                    noncomputable = Syntax::atom("noncomputable", token.span);
                }
                Some("meta") if meta.is_missing() => {
                    self.advance()?;
                    meta = Syntax::atom("meta", token.span);
                }
                _ => break,
            }
        }
        Ok(Syntax::node(
            "decl.modifiers",
            vec![attrs, visibility, noncomputable, meta],
            self.span_from(start),
        ))
    }

    fn declaration(&mut self) -> Result<Syntax, ParseError> {
        let start = self.peek()?.span;
        let mods = self.modifiers()?;
        let keyword = self.advance()?;
        let kind = match keyword.symbol() {
            Some("def") => "command.def",
            Some("theorem") | Some("lemma") => "command.theorem",
            Some("abbrev") => "command.abbrev",
            Some("instance") => "command.instance",
            Some("example") => "command.example",
            Some("axiom") => "command.axiom",
            Some("inductive") => "command.inductive",
            Some("structure") => "command.structure",
            Some("class") => "command.class",
            _ => return Err(Self::unexpected(&keyword, "declaration")),
        };

        let name = match kind {
            "command.example" => Syntax::missing(),
            "command.instance" if !self.peek()?.is_ident() => Syntax::missing(),
            _ => self.ident()?,
        };
        let univs = self.decl_univs()?;
        let binders = self.decl_binders()?;

        let mut args = vec![mods, name, univs, binders];
        match kind {
            "command.inductive" => {
                args.push(self.optional_type()?);
                self.eat_symbol("where")?;
                while self.at_symbol("|")? {
                    args.push(self.inductive_ctor()?);
                }
            }
            "command.structure" | "command.class" => {
                let extends = if self.at_symbol("extends")? {
                    let ext_start = self.advance()?.span;
                    let mut parents = vec![self.term(0)?];
                    while self.eat_symbol(",")? {
                        parents.push(self.term(0)?);
                    }
                    Syntax::node("structure.extends", parents, self.span_from(ext_start))
                } else {
                    Syntax::missing()
                };
                args.push(extends);
                args.push(self.optional_type()?);
                if self.eat_symbol("where")? {
                    let next = self.peek()?;
                    let second = self.peek_second()?;
                    let ctor = if next.is_ident() && second.is_symbol("::") {
                        let ctor = self.ident()?;
                        self.advance()?;
                        ctor
                    } else {
                        Syntax::missing()
                    };
                    args.push(ctor);
                    args.extend(self.structure_fields()?);
                } else {
                    args.push(Syntax::missing());
                }
            }
            "command.axiom" => {
                self.expect_symbol(":")?;
                args.push(self.term(0)?);
            }
            _ => {
                args.push(self.optional_type()?);
                args.push(self.decl_body()?);
            }
        }
        Ok(Syntax::node(kind, args, self.span_from(start)))
    }

    fn decl_univs(&mut self) -> Result<Syntax, ParseError> {
        let next = self.peek()?;
        if !next.is_symbol(".{") || next.span.start != self.prev_end {
            return Ok(Syntax::missing());
        }
        let start = self.advance()?.span;
        let mut names = vec![self.ident()?];
        while self.eat_symbol(",")? {
            names.push(self.ident()?);
        }
        self.expect_symbol("}")?;
        Ok(Syntax::node("decl.univs", names, self.span_from(start)))
    }

    fn decl_binders(&mut self) -> Result<Syntax, ParseError> {
        let start = self.peek()?.span;
        let mut groups = Vec::new();
        while let Some(group) = self.binder_group(false)? {
            groups.push(group);
        }
        Ok(Syntax::node("decl.binders", groups, self.span_from(start)))
    }

    fn optional_type(&mut self) -> Result<Syntax, ParseError> {
        if self.eat_symbol(":")? {
            self.term(0)
        } else {
            Ok(Syntax::missing())
        }
    }

    fn decl_body(&mut self) -> Result<Syntax, ParseError> {
        let token = self.peek()?;
        if token.is_symbol(":=") {
            self.advance()?;
            let value = self.term(0)?;
            return Ok(Syntax::node("decl.val", vec![value], self.span_from(token.span)));
        }
        if token.is_symbol("|") {
            let mut alts = Vec::new();
            while self.at_symbol("|")? {
                alts.push(self.match_alt()?);
            }
            return Ok(Syntax::node("decl.eqns", alts, self.span_from(token.span)));
        }
        if token.is_symbol("where") {
            self.advance()?;
            let fields = self.where_fields()?;
            let span = self.span_from(token.span);
            let mut args = vec![Syntax::missing(), Syntax::missing()];
            args.extend(fields);
            let inst = Syntax::node("term.structInst", args, span);
            return Ok(Syntax::node("decl.val", vec![inst], span));
        }
        Err(Self::unexpected(&token, "':='"))
    }

    /// `field binders* := value` lines after `instance ... where`.
    fn where_fields(&mut self) -> Result<Vec<Syntax>, ParseError> {
        let mut fields = Vec::new();
        loop {
            let next = self.peek()?;
            if !next.is_ident() || self.stopped(&next) {
                break;
            }
            let col = next.span.col;
            let field = self.with_stop_col(col, |p| {
                let name = p.ident()?;
                let binders = p.decl_binders()?;
                p.expect_symbol(":=")?;
                let mut value = p.term(0)?;
                if !binders.args().is_empty() {
                    let mut fun_args = binders.args().to_vec();
                    let span = binders.span.to(value.span);
                    fun_args.push(value);
                    value = Syntax::node("term.fun", fun_args, span);
                }
                let span = name.span.to(value.span);
                Ok(Syntax::node("structInst.field", vec![name, value], span))
            })?;
            fields.push(field);
        }
        Ok(fields)
    }

    fn inductive_ctor(&mut self) -> Result<Syntax, ParseError> {
        let start = self.expect_symbol("|")?.span;
        let name = self.ident()?;
        let binders = self.decl_binders()?;
        let ty = self.optional_type()?;
        Ok(Syntax::node(
            "inductive.ctor",
            vec![name, binders, ty],
            self.span_from(start),
        ))
    }

    fn structure_fields(&mut self) -> Result<Vec<Syntax>, ParseError> {
        let mut fields = Vec::new();
        loop {
            let next = self.peek()?;
            if self.stopped(&next) {
                break;
            }
            let (info, close) = match next.symbol() {
                Some("(") => ("explicit", Some(")")),
                Some("{") => ("implicit", Some("}")),
                Some("⦃") => ("strict", Some("⦄")),
                Some("[") => ("inst", Some("]")),
                None if next.is_ident() => ("explicit", None),
                _ => break,
            };
            let col = next.span.col;
            let group = self.with_stop_col(col, |p| {
                if close.is_some() {
                    p.advance()?;
                }
                let mut names = vec![p.ident()?];
                while p.peek()?.is_ident() {
                    names.push(p.ident()?);
                }
                let binders = p.decl_binders()?;
                let ty = p.optional_type()?;
                let default = if p.eat_symbol(":=")? {
                    p.term(0)?
                } else {
                    Syntax::missing()
                };
                if let Some(close) = close {
                    p.expect_symbol(close)?;
                }
                Ok(names
                    .into_iter()
                    .map(|name| {
                        let span = name.span;
                        Syntax::node(
                            "structure.field",
                            vec![
                                name,
                                binders.clone(),
                                ty.clone(),
                                default.clone(),
                                Syntax::atom(info, span),
                            ],
                            span,
                        )
                    })
                    .collect::<Vec<_>>())
            })?;
            fields.extend(group);
        }
        Ok(fields)
    }

    fn notation_command(&mut self, reserved: bool) -> Result<Syntax, ParseError> {
        let start = self.peek()?.span;
        if reserved {
            self.expect_symbol("reserve")?;
        }
        let local = if self.at_symbol("local")? {
            let token = self.advance()?;
            Syntax::atom("local", token.span)
        } else {
            Syntax::missing()
        };
        let kind_token = self.advance()?;
        let kind = match kind_token.symbol() {
            Some(k) if NOTATION_KINDS.contains(&k) => Syntax::atom(k, kind_token.span),
            _ => return Err(Self::unexpected(&kind_token, "notation kind")),
        };
        let prec = if self.eat_symbol(":")? {
            self.precedence()?
        } else {
            Syntax::missing()
        };

        let items_start = self.peek()?.span;
        let mut items = Vec::new();
        let is_mixfix = kind.as_atom() == Some("notation");
        loop {
            let token = self.peek()?;
            match &token.kind {
                TokenKind::Str(s) => {
                    self.advance()?;
                    items.push(Syntax {
                        kind: SyntaxKind::Str(s.clone()),
                        span: token.span,
                        scopes: vec![],
                    });
                }
                TokenKind::Ident(_) if is_mixfix && !self.stopped(&token) => {
                    let name = self.ident()?;
                    let prec = if self.eat_symbol(":")? {
                        let next = self.peek()?;
                        let names_prec = matches!(&next.kind, TokenKind::Ident(t) if matches!(t.as_str(), "max" | "arg" | "lead" | "min"));
                        if matches!(next.kind, TokenKind::Num(_)) || names_prec {
                            self.precedence()?
                        } else {
                            Syntax::atom(":", next.span)
                        }
                    } else {
                        Syntax::missing()
                    };
                    let span = self.span_from(name.span);
                    items.push(Syntax::node("notation.param", vec![name, prec], span));
                }
                _ => break,
            }
            if !is_mixfix {
                break;
            }
        }
        if items.is_empty() {
            return Err(Self::unexpected(&self.peek()?, "notation item"));
        }
        let items = Syntax::node("notation.items", items, self.span_from(items_start));

        let body = if self.eat_symbol("=>")? || self.eat_symbol(":=")? {
            self.term(0)?
        } else if reserved {
            Syntax::missing()
        } else {
            return Err(Self::unexpected(&self.peek()?, "'=>'"));
        };
        let command = if reserved {
            "command.reserve"
        } else {
            "command.notation"
        };
        Ok(Syntax::node(
            command,
            vec![local, kind, prec, items, body],
            self.span_from(start),
        ))
    }

    fn precedence(&mut self) -> Result<Syntax, ParseError> {
        let token = self.advance()?;
        let value = match &token.kind {
            TokenKind::Num(n) => *n,
            TokenKind::Ident(name) => match name.as_str() {
                "max" => u64::from(MAX_PREC),
                "arg" => u64::from(ARG_PREC),
                "lead" => u64::from(LEAD_PREC),
                "min" => u64::from(MIN_PREC),
                _ => return Err(Self::unexpected(&token, "precedence")),
            },
            _ => return Err(Self::unexpected(&token, "precedence")),
        };
        Ok(Syntax {
            kind: SyntaxKind::Num(value),
            span: token.span,
            scopes: vec![],
        })
    }

    // =========================================================================
    // Binders and levels
    // =========================================================================

    /// One binder group. Bare identifiers are accepted only for `fun`/`∀`.
    fn binder_group(&mut self, allow_bare: bool) -> Result<Option<Syntax>, ParseError> {
        let token = self.peek()?;
        let (kind, close) = match token.symbol() {
            Some("(") => ("binder.explicit", ")"),
            Some("{") => ("binder.implicit", "}"),
            Some("⦃") => ("binder.strict", "⦄"),
            Some("[") => ("binder.inst", "]"),
            Some("_") if allow_bare => {
                self.advance()?;
                let hole = Syntax::ident(Name::parse("_"), token.span);
                return Ok(Some(Syntax::node(
                    "binder.explicit",
                    vec![hole, Syntax::missing()],
                    token.span,
                )));
            }
            None if allow_bare && token.is_ident() => {
                let name = self.ident()?;
                return Ok(Some(Syntax::node(
                    "binder.explicit",
                    vec![name, Syntax::missing()],
                    token.span,
                )));
            }
            _ => return Ok(None),
        };
        self.advance()?;
        if kind == "binder.inst" {
            let named = self.peek()?.is_ident() && self.peek_second()?.is_symbol(":");
            let name = if named {
                let name = self.ident()?;
                self.advance()?;
                name
            } else {
                Syntax::missing()
            };
            let ty = self.term(0)?;
            self.expect_symbol(close)?;
            return Ok(Some(Syntax::node(kind, vec![name, ty], self.span_from(token.span))));
        }
        let mut args = Vec::new();
        loop {
            let next = self.peek()?;
            if next.is_ident() {
                args.push(self.ident()?);
            } else if next.is_symbol("_") {
                self.advance()?;
                args.push(Syntax::ident(Name::parse("_"), next.span));
            } else {
                break;
            }
        }
        if args.is_empty() {
            return Err(Self::unexpected(&self.peek()?, "binder name"));
        }
        args.push(self.optional_type()?);
        self.expect_symbol(close)?;
        Ok(Some(Syntax::node(kind, args, self.span_from(token.span))))
    }

    fn is_level_start(&self, token: &Token) -> bool {
        !self.stopped(token)
            && (matches!(token.kind, TokenKind::Num(_) | TokenKind::Ident(_))
                || token.is_symbol("(")
                || token.is_symbol("_"))
    }

    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        if self.depth >= MAX_NESTING_DEPTH {
            let token = self.peek()?;
            return Err(ParseError::NestingTooDeep {
                limit: MAX_NESTING_DEPTH,
                span: token.span,
            });
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    /// Left-nested chains (`a + b + c`, `f a b c`, `e.1.2`) deepen the tree
    /// without recursing here, so their length counts against the limit too.
    fn check_chain(&self, links: usize, span: Span) -> Result<(), ParseError> {
        if self.depth + links > MAX_NESTING_DEPTH {
            return Err(ParseError::NestingTooDeep {
                limit: MAX_NESTING_DEPTH,
                span,
            });
        }
        Ok(())
    }

    fn level(&mut self) -> Result<Syntax, ParseError> {
        self.nested(Self::level_sum)
    }

    fn level_sum(&mut self) -> Result<Syntax, ParseError> {
        let base = self.level_atom()?;
        if self.at_symbol("+")? {
            self.advance()?;
            let token = self.advance()?;
            let TokenKind::Num(n) = token.kind else {
                return Err(Self::unexpected(&token, "numeral"));
            };
            let offset = Syntax {
                kind: SyntaxKind::Num(n),
                span: token.span,
                scopes: vec![],
            };
            let span = base.span.to(token.span);
            return Ok(Syntax::node("level.add", vec![base, offset], span));
        }
        Ok(base)
    }

    fn level_atom(&mut self) -> Result<Syntax, ParseError> {
        let token = self.advance()?;
        match &token.kind {
            TokenKind::Num(n) => Ok(Syntax {
                kind: SyntaxKind::Num(*n),
                span: token.span,
                scopes: vec![],
            }),
            TokenKind::Ident(text) if text == "max" || text == "imax" => {
                let mut args = Vec::new();
                while self.is_level_start(&self.peek()?) {
                    let arg = self.level_atom()?;
                    self.check_chain(args.len() + 1, arg.span)?;
                    args.push(arg);
                }
                if args.len() < 2 {
                    return Err(Self::unexpected(&self.peek()?, "universe level"));
                }
                let kind = format!("level.{}", text);
                Ok(Syntax::node(kind, args, self.span_from(token.span)))
            }
            TokenKind::Ident(text) => Ok(Syntax::ident(Name::parse(text), token.span)),
            TokenKind::Symbol(s) if s == "(" => {
                let inner = self.level()?;
                self.expect_symbol(")")?;
                Ok(inner)
            }
            TokenKind::Symbol(s) if s == "_" => Ok(Syntax::node("level.hole", vec![], token.span)),
            _ => Err(Self::unexpected(&token, "universe level")),
        }
    }

    // =========================================================================
    // Terms
    // =========================================================================

    fn term(&mut self, min_prec: u32) -> Result<Syntax, ParseError> {
        self.nested(|cursor| cursor.pratt(min_prec))
    }

    fn pratt(&mut self, min_prec: u32) -> Result<Syntax, ParseError> {
        let (mut lhs, mut lhs_prec) = self.leading(min_prec)?;
        let mut links = 0;
        loop {
            let token = self.peek()?;
            if self.stopped(&token) {
                break;
            }
            let Some(sym) = token.symbol() else {
                break;
            };
            if sym == "→" || sym == "->" {
                if ARROW_PREC < min_prec || lhs_prec <= ARROW_PREC {
                    break;
                }
                links += 1;
                self.check_chain(links, token.span)?;
                self.advance()?;
                let rhs = self.term(ARROW_PREC)?;
                let span = lhs.span.to(rhs.span);
                lhs = Syntax::node("term.arrow", vec![lhs, rhs], span);
                lhs_prec = ARROW_PREC;
                continue;
            }
            let rules: Vec<NotationRule> = self
                .config
                .trailing_rules(sym)
                .filter(|r| r.precedence >= min_prec && lhs_accepts(r, lhs_prec))
                .cloned()
                .collect();
            if rules.is_empty() {
                break;
            }
            match self.try_rules(&rules, Some(&lhs))? {
                Some((stx, prec)) => {
                    links += 1;
                    self.check_chain(links, token.span)?;
                    lhs = stx;
                    lhs_prec = prec;
                }
                None => break,
            }
        }
        Ok(lhs)
    }

    fn is_arg_start(&self, token: &Token) -> bool {
        if self.stopped(token) {
            return false;
        }
        match &token.kind {
            TokenKind::Ident(_) | TokenKind::Num(_) | TokenKind::Str(_) => true,
            TokenKind::Symbol(s) => {
                matches!(
                    s.as_str(),
                    "(" | "⟨" | "{" | "_" | "@" | "@&" | ".(" | "Type" | "Sort" | "Prop" | "fun" | "λ"
                ) || self
                    .config
                    .leading_rules(s)
                    .any(|r| r.precedence >= MAX_PREC)
            }
            TokenKind::Eof => false,
        }
    }

    fn leading(&mut self, min_prec: u32) -> Result<(Syntax, u32), ParseError> {
        let token = self.peek()?;
        let start = token.span;
        if let Some(sym) = token.symbol() {
            match sym {
                "fun" | "λ" => return Ok((self.fun_term()?, 0)),
                "∀" | "Π" => return Ok((self.pi_term()?, 0)),
                "let" => return Ok((self.let_term()?, 0)),
                "have" => return Ok((self.have_term()?, 0)),
                "show" => {
                    self.advance()?;
                    let ty = self.term(0)?;
                    let value = if self.eat_symbol("from")? {
                        self.term(0)?
                    } else {
                        Syntax::missing()
                    };
                    return Ok((
                        Syntax::node("term.show", vec![ty, value], self.span_from(start)),
                        0,
                    ));
                }
                "if" => return Ok((self.if_term()?, 0)),
                "match" => return Ok((self.match_term()?, 0)),
                "Type" | "Sort" => {
                    self.advance()?;
                    let level = if self.is_level_start(&self.peek()?) {
                        self.level_atom()?
                    } else {
                        Syntax::missing()
                    };
                    let kind = if sym == "Type" { "term.type" } else { "term.sort" };
                    return Ok((
                        Syntax::node(kind, vec![level], self.span_from(start)),
                        MAX_PREC,
                    ));
                }
                _ => {}
            }
            let builtin_atom = matches!(
                sym,
                "(" | "⟨" | "{" | "_" | "@" | "@&" | ".(" | "Prop"
            );
            if !builtin_atom {
                let rules: Vec<NotationRule> = self
                    .config
                    .leading_rules(sym)
                    .filter(|r| r.precedence >= min_prec)
                    .cloned()
                    .collect();
                if rules.is_empty() {
                    return Err(Self::unexpected(&token, "term"));
                }
                return match self.try_rules(&rules, None)? {
                    Some(result) => Ok(result),
                    None => Err(Self::unexpected(&token, "term")),
                };
            }
        }

        let head = self.arg()?;
        let mut args = Vec::new();
        while self.is_arg_start(&self.peek()?) {
            let arg = self.arg()?;
            self.check_chain(args.len() + 1, arg.span)?;
            args.push(arg);
        }
        if args.is_empty() {
            return Ok((head, MAX_PREC));
        }
        let span = self.span_from(head.span);
        let mut children = vec![head];
        children.extend(args);
        Ok((Syntax::node("term.app", children, span), MAX_PREC))
    }

    /// An application argument: an atom followed by projections.
    fn arg(&mut self) -> Result<Syntax, ParseError> {
        let token = self.peek()?;
        let start = token.span;
        let mut term = match &token.kind {
            TokenKind::Ident(text) => {
                let name = Name::parse(text);
                self.advance()?;
                let ident = Syntax::ident(name, token.span);
                let next = self.peek()?;
                if next.is_symbol(".{") && next.span.start == self.prev_end {
                    self.advance()?;
                    let mut args = vec![ident, self.level()?];
                    while self.eat_symbol(",")? {
                        args.push(self.level()?);
                    }
                    self.expect_symbol("}")?;
                    Syntax::node("term.explicitUniv", args, self.span_from(start))
                } else {
                    ident
                }
            }
            TokenKind::Num(n) => {
                self.advance()?;
                Syntax {
                    kind: SyntaxKind::Num(*n),
                    span: token.span,
                    scopes: vec![],
                }
            }
            TokenKind::Str(s) => {
                self.advance()?;
                Syntax {
                    kind: SyntaxKind::Str(s.clone()),
                    span: token.span,
                    scopes: vec![],
                }
            }
            TokenKind::Eof => return Err(Self::unexpected(&token, "term")),
            TokenKind::Symbol(sym) => match sym.as_str() {
                "(" => self.paren_term()?,
                "⟨" => {
                    self.advance()?;
                    let args = self.comma_terms("⟩")?;
                    Syntax::node("term.anonCtor", args, self.span_from(start))
                }
                "{" => self.struct_inst()?,
                "_" => {
                    self.advance()?;
                    Syntax::node("term.hole", vec![], token.span)
                }
                "@" | "@&" => {
                    self.advance()?;
                    let inner = self.arg()?;
                    let kind = if sym == "@" {
                        "term.explicit"
                    } else {
                        "term.borrowed"
                    };
                    Syntax::node(kind, vec![inner], self.span_from(start))
                }
                ".(" => {
                    self.advance()?;
                    let inner = self.term(0)?;
                    self.expect_symbol(")")?;
                    Syntax::node("term.inaccessible", vec![inner], self.span_from(start))
                }
                "Prop" => {
                    self.advance()?;
                    Syntax::node("term.prop", vec![], token.span)
                }
                "Type" | "Sort" => {
                    self.advance()?;
                    let kind = if sym == "Type" { "term.type" } else { "term.sort" };
                    Syntax::node(kind, vec![Syntax::missing()], token.span)
                }
                "fun" | "λ" => self.fun_term()?,
                _ => {
                    let rules: Vec<NotationRule> = self
                        .config
                        .leading_rules(sym)
                        .filter(|r| r.precedence >= MAX_PREC)
                        .cloned()
                        .collect();
                    match self.try_rules(&rules, None)? {
                        Some((stx, _)) => stx,
                        None => return Err(Self::unexpected(&token, "term")),
                    }
                }
            },
        };

        // `e.1`, `e.field`
        let mut links = 0;
        loop {
            let next = self.peek()?;
            if !next.is_symbol(".") || next.span.start != self.prev_end {
                break;
            }
            let (after, _) = self.lex(self.pos).and_then(|(_, end)| self.lex(end))?;
            if after.span.start != next.span.end {
                break;
            }
            match &after.kind {
                TokenKind::Num(n) => {
                    links += 1;
                    self.check_chain(links, after.span)?;
                    self.advance()?;
                    self.advance()?;
                    let index = Syntax {
                        kind: SyntaxKind::Num(*n),
                        span: after.span,
                        scopes: vec![],
                    };
                    term = Syntax::node("term.proj", vec![term, index], self.span_from(start));
                }
                TokenKind::Ident(text) => {
                    self.advance()?;
                    self.advance()?;
                    for component in Name::parse(text).components() {
                        links += 1;
                        self.check_chain(links, after.span)?;
                        let field = Syntax::ident(Name::parse(component), after.span);
                        term = Syntax::node("term.proj", vec![term, field], self.span_from(start));
                    }
                }
                _ => break,
            }
        }
        Ok(term)
    }

    fn comma_terms(&mut self, close: &str) -> Result<Vec<Syntax>, ParseError> {
        let mut items = Vec::new();
        if self.eat_symbol(close)? {
            return Ok(items);
        }
        loop {
            items.push(self.with_stop_col(0, |p| p.term(0))?);
            if self.eat_symbol(close)? {
                return Ok(items);
            }
            self.expect_symbol(",")?;
        }
    }

    fn paren_term(&mut self) -> Result<Syntax, ParseError> {
        let start = self.expect_symbol("(")?.span;
        if self.eat_symbol(")")? {
            return Ok(Syntax::node("term.unit", vec![], self.span_from(start)));
        }
        self.with_stop_col(0, |p| {
            let inner = p.term(0)?;
            if p.eat_symbol(":")? {
                let ty = p.term(0)?;
                p.expect_symbol(")")?;
                return Ok(Syntax::node(
                    "term.typeAscription",
                    vec![inner, ty],
                    p.span_from(start),
                ));
            }
            if p.eat_symbol(",")? {
                let mut items = vec![inner];
                items.extend(p.comma_terms(")")?);
                return Ok(Syntax::node("term.tuple", items, p.span_from(start)));
            }
            p.expect_symbol(")")?;
            Ok(inner)
        })
    }

    fn struct_inst(&mut self) -> Result<Syntax, ParseError> {
        let start = self.expect_symbol("{")?.span;
        self.with_stop_col(0, |p| {
            let mut source = Syntax::missing();
            let mut structure = Syntax::missing();
            let first = p.peek()?;
            let second = p.peek_second()?;
            if first.is_ident() && second.is_symbol(".") {
                structure = p.ident()?;
                p.advance()?;
            } else if !first.is_symbol("}")
                && !(first.is_ident()
                    && (second.is_symbol(":=") || second.is_symbol(",") || second.is_symbol("}")))
            {
                source = p.term(0)?;
                p.expect_symbol("with")?;
            }
            let mut fields = Vec::new();
            while p.peek()?.is_ident() {
                let name = p.ident()?;
                let value = if p.eat_symbol(":=")? {
                    p.term(0)?
                } else {
                    name.clone()
                };
                let span = name.span.to(value.span);
                fields.push(Syntax::node("structInst.field", vec![name, value], span));
                if !p.eat_symbol(",")? {
                    break;
                }
            }
            if p.eat_symbol(":")? {
                structure = p.term(0)?;
            }
            p.expect_symbol("}")?;
            let mut args = vec![source, structure];
            args.extend(fields);
            Ok(Syntax::node("term.structInst", args, p.span_from(start)))
        })
    }

    /// Binder groups up to (not including) a separator token.
    fn term_binders(&mut self) -> Result<Vec<Syntax>, ParseError> {
        let mut groups = Vec::new();
        let mut bare = Vec::new();
        loop {
            let token = self.peek()?;
            if token.is_ident() || token.is_symbol("_") {
                let name = if token.is_ident() {
                    self.ident()?
                } else {
                    self.advance()?;
                    Syntax::ident(Name::parse("_"), token.span)
                };
                bare.push(name);
                continue;
            }
            if !bare.is_empty() {
                if self.eat_symbol(":")? {
                    let ty = self.term(0)?;
                    let span = bare[0].span.to(ty.span);
                    let mut args = std::mem::take(&mut bare);
                    args.push(ty);
                    groups.push(Syntax::node("binder.explicit", args, span));
                    break;
                }
                for name in bare.drain(..) {
                    let span = name.span;
                    groups.push(Syntax::node(
                        "binder.explicit",
                        vec![name, Syntax::missing()],
                        span,
                    ));
                }
            }
            match self.binder_group(false)? {
                Some(group) => groups.push(group),
                None => break,
            }
        }
        for name in bare {
            let span = name.span;
            groups.push(Syntax::node(
                "binder.explicit",
                vec![name, Syntax::missing()],
                span,
            ));
        }
        if groups.is_empty() {
            return Err(Self::unexpected(&self.peek()?, "binder"));
        }
        Ok(groups)
    }

    fn fun_term(&mut self) -> Result<Syntax, ParseError> {
        let start = self.advance()?.span;
        let mut args = self.term_binders()?;
        if !self.eat_symbol("=>")? {
            self.expect_symbol("↦")?;
        }
        args.push(self.term(0)?);
        Ok(Syntax::node("term.fun", args, self.span_from(start)))
    }

    fn pi_term(&mut self) -> Result<Syntax, ParseError> {
        let start = self.advance()?.span;
        let mut args = self.term_binders()?;
        self.expect_symbol(",")?;
        args.push(self.term(0)?);
        Ok(Syntax::node("term.pi", args, self.span_from(start)))
    }

    fn let_term(&mut self) -> Result<Syntax, ParseError> {
        let start = self.advance()?.span;
        let name = self.ident()?;
        let binders = self.decl_binders()?;
        let ty = self.optional_type()?;
        self.expect_symbol(":=")?;
        let value = self.with_stop_col(start.col, |p| p.term(0))?;
        self.eat_symbol(";")?;
        let body = self.term(0)?;
        Ok(Syntax::node(
            "term.let",
            vec![name, binders, ty, value, body],
            self.span_from(start),
        ))
    }

    fn have_term(&mut self) -> Result<Syntax, ParseError> {
        let start = self.advance()?.span;
        let name = if self.peek()?.is_ident() {
            self.ident()?
        } else {
            Syntax::missing()
        };
        self.expect_symbol(":")?;
        let ty = self.term(0)?;
        self.expect_symbol(":=")?;
        let value = self.with_stop_col(start.col, |p| p.term(0))?;
        self.eat_symbol(";")?;
        let body = self.term(0)?;
        Ok(Syntax::node(
            "term.have",
            vec![name, ty, value, body],
            self.span_from(start),
        ))
    }

    fn if_term(&mut self) -> Result<Syntax, ParseError> {
        let start = self.advance()?.span;
        let hyp = if self.peek()?.is_ident() && self.peek_second()?.is_symbol(":") {
            let name = self.ident()?;
            self.advance()?;
            name
        } else {
            Syntax::missing()
        };
        let cond = self.term(0)?;
        self.expect_symbol("then")?;
        let then_branch = self.term(0)?;
        self.expect_symbol("else")?;
        let else_branch = self.term(0)?;
        Ok(Syntax::node(
            "term.if",
            vec![hyp, cond, then_branch, else_branch],
            self.span_from(start),
        ))
    }

    fn match_term(&mut self) -> Result<Syntax, ParseError> {
        let start = self.advance()?.span;
        let discr_start = self.peek()?.span;
        let mut discrs = vec![self.term(0)?];
        while self.eat_symbol(",")? {
            discrs.push(self.term(0)?);
        }
        let discrs = Syntax::node("match.discrs", discrs, self.span_from(discr_start));
        self.expect_symbol("with")?;
        let mut args = vec![discrs];
        while self.at_symbol("|")? {
            args.push(self.match_alt()?);
        }
        if args.len() == 1 {
            return Err(Self::unexpected(&self.peek()?, "'|'"));
        }
        Ok(Syntax::node("term.match", args, self.span_from(start)))
    }

    fn match_alt(&mut self) -> Result<Syntax, ParseError> {
        let start = self.expect_symbol("|")?.span;
        let pats_start = self.peek()?.span;
        let mut pats = vec![self.term(0)?];
        while self.eat_symbol(",")? {
            pats.push(self.term(0)?);
        }
        let pats = Syntax::node("match.pats", pats, self.span_from(pats_start));
        self.expect_symbol("=>")?;
        let rhs = self.term(0)?;
        Ok(Syntax::node("match.alt", vec![pats, rhs], self.span_from(start)))
    }

    // =========================================================================
    // Notations
    // =========================================================================

    /// Try every rule from the current position and keep the longest parses.
    fn try_rules(
        &mut self,
        rules: &[NotationRule],
        lhs: Option<&Syntax>,
    ) -> Result<Option<(Syntax, u32)>, ParseError> {
        let start_pos = self.pos;
        let start_prev = self.prev_end;
        let mut successes: Vec<(usize, usize, Syntax, u32)> = Vec::new();
        let mut last_err = None;
        for rule in rules {
            self.pos = start_pos;
            self.prev_end = start_prev;
            match self.match_rule(rule, lhs) {
                Ok(stx) => successes.push((self.pos, self.prev_end, stx, rule.precedence)),
                Err(err) => last_err = Some(err),
            }
        }
        self.pos = start_pos;
        self.prev_end = start_prev;

        let Some(best_end) = successes.iter().map(|s| s.0).max() else {
            return match (last_err, lhs) {
                (Some(err), None) => Err(err),
                _ => Ok(None),
            };
        };
        let mut winners: Vec<(usize, usize, Syntax, u32)> =
            successes.into_iter().filter(|s| s.0 == best_end).collect();
        self.pos = best_end;
        self.prev_end = winners[0].1;
        if winners.len() == 1 {
            let (_, _, stx, prec) = winners.remove(0);
            return Ok(Some((stx, prec)));
        }
        let prec = winners.iter().map(|w| w.3).min().unwrap_or(0);
        let span = winners[0].2.span;
        let alternatives = winners.into_iter().map(|w| w.2).collect();
        Ok(Some((Syntax::node("term.choice", alternatives, span), prec)))
    }

    fn match_rule(&mut self, rule: &NotationRule, lhs: Option<&Syntax>) -> Result<Syntax, ParseError> {
        let mut items = rule.items.iter();
        let mut args = Vec::new();
        let start = match lhs {
            Some(lhs) => {
                items.next();
                args.push(lhs.clone());
                lhs.span
            }
            None => self.peek()?.span,
        };
        for item in items {
            match item {
                RuleItem::Token(t) => {
                    self.expect_symbol(t)?;
                }
                RuleItem::Placeholder { prec, .. } => args.push(self.term(*prec)?),
            }
        }
        Ok(Syntax::node(rule.kind_tag.clone(), args, self.span_from(start)))
    }
}

fn lhs_accepts(rule: &NotationRule, lhs_prec: u32) -> bool {
    match rule.items.first() {
        Some(RuleItem::Placeholder { prec, .. }) => lhs_prec >= *prec,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(src: &str, config: &ParserConfig) -> Syntax {
        let mut parser = Parser::new(src);
        parser.next_command(config).expect("parse failed")
    }

    fn plus_rule() -> NotationRule {
        NotationRule {
            kind_tag: "infixl#0".to_string(),
            items: vec![
                RuleItem::Placeholder { prec: 65, explicit: false },
                RuleItem::Token("+".to_string()),
                RuleItem::Placeholder { prec: 66, explicit: false },
            ],
            precedence: 65,
            explicit_precedence: true,
            reserved: false,
            order: 0,
        }
    }

    #[test]
    fn def_command_shape() {
        let cmd = parse_one("def id (x : Nat) : Nat := x", &ParserConfig::new());
        assert_eq!(
            cmd.pretty_print(),
            "(command.def (decl.modifiers <missing> <missing> <missing> <missing>) id <missing> \
             (decl.binders (binder.explicit x Nat)) Nat (decl.val x))"
        );
    }

    #[test]
    fn application_binds_tighter_than_arrow() {
        let cmd = parse_one("#check List Nat → Nat", &ParserConfig::new());
        assert_eq!(
            cmd.pretty_print(),
            "(command.check (term.arrow (term.app List Nat) Nat))"
        );
    }

    #[test]
    fn notation_tokens_come_from_the_config() {
        let config = ParserConfig::from_rules([plus_rule()]);
        let cmd = parse_one("#check a + b + f c", &config);
        assert_eq!(
            cmd.pretty_print(),
            "(command.check (infixl#0 (infixl#0 a b) (term.app f c)))"
        );

        // without the rule the term ends before `+` and the leftover is not a command
        let mut parser = Parser::new("#check a + b");
        let empty = ParserConfig::new();
        let first = parser.next_command(&empty).unwrap();
        assert_eq!(first.pretty_print(), "(command.check a)");
        let err = parser.next_command(&empty).unwrap_err();
        assert_eq!(err.to_string(), "unexpected token '+', expected command");
    }

    #[test]
    fn projections_and_universe_instances() {
        let cmd = parse_one("#check (f x).1.snd List.{u+1} p.fst", &ParserConfig::new());
        assert_eq!(
            cmd.pretty_print(),
            "(command.check (term.app (term.proj (term.proj (term.app f x) 1) snd) \
             (term.explicitUniv List (level.add u 1)) p.fst))"
        );
    }

    #[test]
    fn commands_are_read_one_at_a_time() {
        let src = "namespace Foo\n def x := 1\nend Foo\n";
        let mut parser = Parser::new(src);
        let config = ParserConfig::new();
        let kinds: Vec<String> = std::iter::from_fn(|| {
            let cmd = parser.next_command(&config).ok()?;
            let kind = cmd.node_kind()?.to_string();
            (kind != "command.eoi").then_some(kind)
        })
        .collect();
        assert_eq!(kinds, vec!["command.namespace", "command.def", "command.end"]);
    }

    #[test]
    fn errors_skip_to_the_next_command() {
        let src = "def := 1\ndef y := 2";
        let mut parser = Parser::new(src);
        let config = ParserConfig::new();
        assert!(parser.next_command(&config).is_err());
        let next = parser.next_command(&config).expect("recovered");
        assert!(next.is_node("command.def"));
    }

    #[test]
    fn match_and_structure_layout() {
        let src = "structure Point where\n  x : Nat\n  y : Nat := 0\n#check match p with | 0 => a | n => b";
        let mut parser = Parser::new(src);
        let config = ParserConfig::new();
        let structure = parser.next_command(&config).unwrap();
        let fields: Vec<&Syntax> = structure
            .args()
            .iter()
            .filter(|a| a.is_node("structure.field"))
            .collect();
        assert_eq!(fields.len(), 2);
        assert!(fields[1].args()[3].present().is_some());
        let check = parser.next_command(&config).unwrap();
        assert_eq!(check.args()[0].args().len(), 3);
    }

    fn parens(depth: usize) -> String {
        format!("{}1{}", "(".repeat(depth), ")".repeat(depth))
    }

    #[test]
    fn deep_nesting_is_an_error_not_a_crash() {
        let src = format!("def x := {}
def y := 2", parens(20_000));
        let mut parser = Parser::new(&src);
        let config = ParserConfig::new();
        let err = parser.next_command(&config).unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("maximum term nesting depth ({}) exceeded", MAX_NESTING_DEPTH)
        );
        let next = parser.next_command(&config).expect("recovered");
        assert_eq!(next.args()[1].as_ident().map(|n| n.to_string()).as_deref(), Some("y"));
    }

    #[test]
    fn moderate_nesting_still_parses() {
        let src = format!("#check {}", parens(60));
        let cmd = parse_one(&src, &ParserConfig::new());
        assert_eq!(cmd.pretty_print(), "(command.check 1)");

        let chains = [
            format!("#check f{}", " a".repeat(500)),
            format!("#check a{}", " → a".repeat(500)),
            format!("#check Sort (max{})", " u".repeat(500)),
        ];
        for src in &chains {
            let mut parser = Parser::new(src);
            let err = parser.next_command(&ParserConfig::new()).unwrap_err();
            assert!(matches!(err, ParseError::NestingTooDeep { .. }), "{}", err);
        }
        let cmd = parse_one(&format!("#check f{}", " a".repeat(40)), &ParserConfig::new());
        assert_eq!(cmd.args()[0].args().len(), 41);

        let levels = format!("#check Sort {}u{}", "(".repeat(500), ")".repeat(500));
        let mut parser = Parser::new(&levels);
        let err = parser.next_command(&ParserConfig::new()).unwrap_err();
        assert!(matches!(err, ParseError::NestingTooDeep { .. }));
    }
}
