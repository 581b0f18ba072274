//! Surface syntax trees
//!
//! The reader produces one `Syntax` tree per command. Interior nodes carry a
//! dotted kind string (`command.def`, `term.app`, ...); notation uses carry
//! the kind tag their registration was given (`infixl#3`). Children follow
//! fixed layouts per kind, with `SyntaxKind::Missing` filling optional slots:
//!
//! | kind | children |
//! |------|----------|
//! | `term.app` | head, args... |
//! | `term.fun`, `term.pi` | binder groups..., body |
//! | `term.arrow` | domain, codomain |
//! | `term.let` | name, binders (`decl.binders`), type?, value, body |
//! | `term.have` | name?, type, value, body |
//! | `term.show` | type, value? |
//! | `term.if` | hypothesis?, cond, then, else |
//! | `term.sort` / `term.type` | level? |
//! | `term.explicitUniv` | ident, levels... |
//! | `term.anonCtor` | args... |
//! | `term.structInst` | source?, structure?, `structInst.field`... |
//! | `term.match` | `match.discrs`, `match.alt`... |
//! | `term.proj` | target, `Num` index or `Ident` field |
//! | `term.explicit` / `term.borrowed` / `term.inaccessible` | term |
//! | `term.typeAscription` | term, type |
//! | `term.tuple` | components... |
//! | `term.choice` | alternatives... |
//!
//! Binder groups are `binder.explicit`, `binder.implicit`, `binder.strict`
//! and `binder.inst` with children `idents..., type?`.

use kernel::Name;
use std::fmt;

/// Source location info
#[derive(Debug, Clone, PartialEq, Eq, Copy, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub col: usize,
}

impl Span {
    /// Smallest span covering both.
    pub fn to(self, other: Span) -> Span {
        let (first, _) = if other.start < self.start {
            (other, self)
        } else {
            (self, other)
        };
        Span {
            start: first.start,
            end: self.end.max(other.end),
            line: first.line,
            col: first.col,
        }
    }

    pub fn to_source_pos(self) -> kernel::SourcePos {
        kernel::SourcePos {
            start: self.start,
            end: self.end,
            line: self.line,
            col: self.col,
        }
    }
}

/// Scope identifier (for hygiene)
#[derive(Debug, Clone, PartialEq, Eq, Copy, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub usize);

pub fn normalize_scopes(scopes: &[ScopeId]) -> Vec<ScopeId> {
    let mut out = scopes.to_vec();
    out.sort();
    out.dedup();
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyntaxKind {
    Node(String, Vec<Syntax>),
    Ident(Name),
    /// Keyword or symbol kept in the tree (`private`, `infixl`, ...)
    Atom(String),
    Num(u64),
    Str(String),
    /// Absent optional part
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Syntax {
    pub kind: SyntaxKind,
    pub span: Span,
    pub scopes: Vec<ScopeId>,
}

impl Syntax {
    pub fn node(kind: impl Into<String>, args: Vec<Syntax>, span: Span) -> Self {
        Syntax {
            kind: SyntaxKind::Node(kind.into(), args),
            span,
            scopes: Vec::new(),
        }
    }

    pub fn ident(name: Name, span: Span) -> Self {
        Syntax {
            kind: SyntaxKind::Ident(name),
            span,
            scopes: Vec::new(),
        }
    }

    pub fn atom(text: impl Into<String>, span: Span) -> Self {
        Syntax {
            kind: SyntaxKind::Atom(text.into()),
            span,
            scopes: Vec::new(),
        }
    }

    pub fn missing() -> Self {
        Syntax {
            kind: SyntaxKind::Missing,
            span: Span::default(),
            scopes: Vec::new(),
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self.kind, SyntaxKind::Missing)
    }

    /// Kind string of an interior node.
    pub fn node_kind(&self) -> Option<&str> {
        match &self.kind {
            SyntaxKind::Node(kind, _) => Some(kind),
            _ => None,
        }
    }

    pub fn is_node(&self, kind: &str) -> bool {
        self.node_kind() == Some(kind)
    }

    pub fn args(&self) -> &[Syntax] {
        match &self.kind {
            SyntaxKind::Node(_, args) => args,
            _ => &[],
        }
    }

    pub fn as_ident(&self) -> Option<&Name> {
        match &self.kind {
            SyntaxKind::Ident(name) => Some(name),
            _ => None,
        }
    }

    pub fn as_atom(&self) -> Option<&str> {
        match &self.kind {
            SyntaxKind::Atom(text) => Some(text),
            _ => None,
        }
    }

    /// `None` for `Missing`, the syntax itself otherwise.
    pub fn present(&self) -> Option<&Syntax> {
        if self.is_missing() {
            None
        } else {
            Some(self)
        }
    }

    pub fn add_scope(&self, scope: ScopeId) -> Syntax {
        let mut new_scopes = self.scopes.clone();
        if !new_scopes.contains(&scope) {
            new_scopes.push(scope);
        }
        Syntax {
            scopes: new_scopes,
            ..self.clone()
        }
    }

    pub fn pretty_print(&self) -> String {
        match &self.kind {
            SyntaxKind::Node(kind, args) => {
                if args.is_empty() {
                    return format!("({})", kind);
                }
                let inner: Vec<String> = args.iter().map(|s| s.pretty_print()).collect();
                format!("({} {})", kind, inner.join(" "))
            }
            SyntaxKind::Ident(name) => name.to_string(),
            SyntaxKind::Atom(text) => text.clone(),
            SyntaxKind::Num(n) => n.to_string(),
            SyntaxKind::Str(s) => format!("{:?}", s),
            SyntaxKind::Missing => "<missing>".to_string(),
        }
    }

    /// Pretty-printed syntax cut down to `max_len` characters, for error messages.
    pub fn excerpt(&self, max_len: usize) -> String {
        let full = self.pretty_print();
        if full.chars().count() <= max_len {
            return full;
        }
        let cut: String = full.chars().take(max_len).collect();
        format!("{}...", cut)
    }
}

impl fmt::Display for Syntax {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pretty_print())
    }
}

/// Maps byte offsets of one source text to 1-based lines and 0-based columns.
#[derive(Debug, Clone)]
pub struct PositionMap {
    line_starts: Vec<usize>,
    source: String,
}

impl PositionMap {
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        for (i, c) in source.char_indices() {
            if c == '\n' {
                line_starts.push(i + 1);
            }
        }
        PositionMap {
            line_starts,
            source: source.to_string(),
        }
    }

    /// `(line, col)` of a byte offset; the column counts characters.
    pub fn line_col(&self, offset: usize) -> (usize, usize) {
        let line_idx = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        let start = self.line_starts[line_idx];
        let end = offset.min(self.source.len());
        let col = self
            .source
            .get(start..end)
            .map(|s| s.chars().count())
            .unwrap_or(end - start);
        (line_idx + 1, col)
    }

    pub fn span(&self, start: usize, end: usize) -> Span {
        let (line, col) = self.line_col(start);
        Span {
            start,
            end,
            line,
            col,
        }
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_map_counts_characters() {
        let map = PositionMap::new("def x := 1\n  λ y");
        assert_eq!(map.line_col(0), (1, 0));
        assert_eq!(map.line_col(4), (1, 4));
        assert_eq!(map.line_col(11), (2, 0));
        // `λ` is two bytes wide
        assert_eq!(map.line_col(16), (2, 4));
        assert_eq!(map.line_count(), 2);
    }

    #[test]
    fn excerpt_truncates_long_syntax() {
        let span = Span::default();
        let args = (0..20)
            .map(|i| Syntax::ident(Name::parse(&format!("x{}", i)), span))
            .collect();
        let node = Syntax::node("term.app", args, span);
        let excerpt = node.excerpt(16);
        assert_eq!(excerpt, "(term.app x0 x1 ...");
    }
}
