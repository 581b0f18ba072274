//! Sections and namespaces
//!
//! Entering a scope records a save-point of the scoped tables; leaving it
//! restores them. Declarations made inside a namespace persist under its
//! qualified path, while opens, variables, universes and local notations end
//! with the scope that introduced them.

use crate::elab::{ElabContext, ElabError, ElabResult, OptionValue, VarBinding};
use crate::notation::NotationEntry;
use crate::surface::Span;
use crate::symbol_map::SymbolMap;
use kernel::{Level, Name};
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Section,
    Namespace,
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeKind::Section => write!(f, "section"),
            ScopeKind::Namespace => write!(f, "namespace"),
        }
    }
}

/// Tables restored when a scope ends.
#[derive(Debug, Clone, Default)]
struct SavePoint {
    universes: SymbolMap<Level>,
    vars: Vec<VarBinding>,
    notations: SymbolMap<NotationEntry>,
    options: SymbolMap<OptionValue>,
    namespace_path: Name,
}

#[derive(Debug, Clone)]
pub struct Scope {
    pub kind: ScopeKind,
    pub name: Option<Name>,
    /// Where the scope was opened; unterminated-scope errors point here.
    pub span: Span,
    /// In the order they were opened.
    pub opened_namespaces: Vec<Name>,
    /// `open N as A`: `(A, N)`.
    pub namespace_aliases: Vec<(Name, Name)>,
    /// `open N (x)` and `open N renaming x → y`: `(short, full)`.
    pub local_aliases: Vec<(Name, Name)>,
    /// Fully qualified names excluded from opened namespaces (`open N hiding x`).
    pub hidden: Vec<Name>,
    saved: SavePoint,
}

impl Scope {
    /// The file-level namespace at the bottom of the stack.
    pub fn root() -> Self {
        Scope {
            kind: ScopeKind::Namespace,
            name: None,
            span: Span::default(),
            opened_namespaces: Vec::new(),
            namespace_aliases: Vec::new(),
            local_aliases: Vec::new(),
            hidden: Vec::new(),
            saved: SavePoint::default(),
        }
    }

    pub fn open_namespace(&mut self, ns: Name) {
        if !self.opened_namespaces.contains(&ns) {
            self.opened_namespaces.push(ns);
        }
    }

    pub fn is_hidden(&self, name: &Name) -> bool {
        self.hidden.contains(name)
    }
}

/// Push a new scope. A namespace extends the qualification path by `name`.
pub fn enter(ctx: &mut ElabContext, kind: ScopeKind, name: Option<Name>, span: Span) {
    let saved = SavePoint {
        universes: ctx.universes.clone(),
        vars: ctx.vars.clone(),
        notations: ctx.notations.clone(),
        options: ctx.options.clone(),
        namespace_path: ctx.namespace_path.clone(),
    };
    if kind == ScopeKind::Namespace {
        if let Some(ns) = &name {
            let path = ctx.namespace_path.append(ns);
            ctx.register_namespace(&path);
            ctx.namespace_path = path;
        }
    }
    debug!(%kind, name = ?name, depth = ctx.scopes.len(), "entering scope");
    ctx.scopes.push(Scope {
        kind,
        name,
        span,
        opened_namespaces: Vec::new(),
        namespace_aliases: Vec::new(),
        local_aliases: Vec::new(),
        hidden: Vec::new(),
        saved,
    });
}

/// Pop the innermost scope, checking the name given at `end`.
pub fn leave(ctx: &mut ElabContext, expected: Option<&Name>, span: Span) -> ElabResult<Scope> {
    if ctx.scopes.len() <= 1 {
        return Err(ElabError::NoOpenScope { span });
    }
    let top = ctx.current_scope();
    if top.name.as_ref() != expected {
        return Err(ElabError::ScopeMismatch {
            kind: top.kind,
            expected: top.name.clone(),
            span,
        });
    }
    let Some(scope) = ctx.scopes.pop() else {
        return Err(ElabError::NoOpenScope { span });
    };
    let saved = scope.saved.clone();

    // Notations registered inside survive unless they were `local`. A
    // surviving implementation of a reservation replaces it outside too.
    let mut notations = saved.notations;
    let mut dropped = 0usize;
    for (tag, entry) in ctx.notations.iter() {
        if notations.contains(tag) {
            continue;
        }
        if entry.local {
            dropped += 1;
            continue;
        }
        if let Some(reservation) = &entry.implements {
            notations.remove(reservation);
        }
        notations.insert(tag.clone(), entry.clone());
    }
    ctx.notations = notations;
    ctx.universes = saved.universes;
    ctx.vars = saved.vars;
    ctx.options = saved.options;
    ctx.namespace_path = saved.namespace_path;
    if dropped > 0 {
        ctx.mark_parser_config_dirty();
    }
    debug!(kind = %scope.kind, name = ?scope.name, dropped_notations = dropped, "leaving scope");
    Ok(scope)
}

/// Scopes still open, innermost first, for the end-of-input check.
pub fn unterminated(ctx: &ElabContext) -> impl Iterator<Item = &Scope> {
    ctx.scopes.iter().skip(1).rev()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notation;
    use crate::parser::{CommandSource, Parser};

    #[test]
    fn nested_namespaces_restore_the_path() {
        let mut ctx = ElabContext::default();
        let span = Span::default();
        enter(&mut ctx, ScopeKind::Namespace, Some(Name::parse("A")), span);
        enter(&mut ctx, ScopeKind::Namespace, Some(Name::parse("B")), span);
        assert_eq!(ctx.namespace_path.to_string(), "A.B");
        leave(&mut ctx, Some(&Name::parse("B")), span).unwrap();
        assert_eq!(ctx.namespace_path.to_string(), "A");
        leave(&mut ctx, Some(&Name::parse("A")), span).unwrap();
        assert!(ctx.namespace_path.is_anonymous());
        assert_eq!(ctx.scopes.len(), 1);
        assert!(ctx.is_namespace(&Name::parse("A.B")));
    }

    #[test]
    fn leaving_the_root_is_an_error() {
        let mut ctx = ElabContext::default();
        let err = leave(&mut ctx, None, Span::default()).unwrap_err();
        assert_eq!(err.to_string(), "invalid end, no open scope to end");
    }

    #[test]
    fn mismatched_end_keeps_the_scope() {
        let mut ctx = ElabContext::default();
        let span = Span::default();
        enter(&mut ctx, ScopeKind::Section, Some(Name::parse("S")), span);
        let err = leave(&mut ctx, Some(&Name::parse("T")), span).unwrap_err();
        assert_eq!(err.to_string(), "invalid end of section, expected name 'S'");
        assert_eq!(ctx.scopes.len(), 2);
    }

    fn register(ctx: &mut ElabContext, src: &str) {
        let config = ctx.parser_config.clone();
        let stx = Parser::new(src).next_command(&config).unwrap();
        notation::register(&stx, ctx).unwrap();
    }

    fn notation_summary(ctx: &ElabContext) -> Vec<String> {
        ctx.notations
            .iter()
            .map(|(tag, entry)| format!("{} reserved={}", tag, entry.is_reserved()))
            .collect()
    }

    #[test]
    fn implemented_reservation_stays_replaced_after_the_section() {
        let mut ctx = ElabContext::default();
        let span = Span::default();
        register(&mut ctx, "reserve infixl:65 \" ⊕ \"");
        enter(&mut ctx, ScopeKind::Section, None, span);
        register(&mut ctx, "infixl \" ⊕ \" => HXor.hXor");
        leave(&mut ctx, None, span).unwrap();
        ctx.flush_parser_config();
        assert_eq!(notation_summary(&ctx), vec!["infixl#1 reserved=false"]);
        assert_eq!(ctx.parser_config.rules.len(), 1);

        register(&mut ctx, "infixr:80 \" ^ \" => HPow.hPow");
        assert_eq!(ctx.parser_config.rules.len(), 2);
        assert!(ctx.parser_config.rules.iter().all(|r| !r.reserved));
    }

    #[test]
    fn local_implementation_brings_the_reservation_back() {
        let mut ctx = ElabContext::default();
        let span = Span::default();
        register(&mut ctx, "reserve infixl:65 \" ⊕ \"");
        enter(&mut ctx, ScopeKind::Section, None, span);
        register(&mut ctx, "local infixl \" ⊕ \" => HXor.hXor");
        assert_eq!(notation_summary(&ctx), vec!["infixl#1 reserved=false"]);
        leave(&mut ctx, None, span).unwrap();
        assert!(ctx.flush_parser_config());
        assert_eq!(notation_summary(&ctx), vec!["infixl#0 reserved=true"]);
        assert_eq!(ctx.parser_config.rules.len(), 1);
        assert!(ctx.parser_config.rules[0].reserved);
    }

    #[test]
    fn section_universes_are_discarded() {
        let mut ctx = ElabContext::default();
        let span = Span::default();
        enter(&mut ctx, ScopeKind::Section, None, span);
        ctx.universes.insert(Name::parse("u"), Level::param("u"));
        leave(&mut ctx, None, span).unwrap();
        assert!(ctx.universes.is_empty());
    }
}
