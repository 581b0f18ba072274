//! Identifier resolution
//!
//! Candidates come from, in order: the current namespace path (innermost
//! prefix that hits), then each scope from the innermost outward (explicit
//! aliases, `open ... as` prefixes, opened namespaces). Every candidate found
//! is kept, so a second `open` that brings a colliding name into view can
//! only grow an ambiguity. `_root_`-anchored names skip all of it.

use crate::elab::{ElabContext, ElabError, ElabResult};
use crate::surface::Span;
use kernel::Name;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Unique(Name),
    Ambiguous(Vec<Name>),
    Unknown,
}

impl Resolution {
    fn from_candidates(mut candidates: Vec<Name>) -> Self {
        match candidates.len() {
            0 => Resolution::Unknown,
            1 => Resolution::Unique(candidates.remove(0)),
            _ => Resolution::Ambiguous(candidates),
        }
    }

    pub fn candidates(&self) -> Vec<Name> {
        match self {
            Resolution::Unique(name) => vec![name.clone()],
            Resolution::Ambiguous(names) => names.clone(),
            Resolution::Unknown => Vec::new(),
        }
    }
}

/// Push the constants `full` denotes: itself if declared, plus alias targets.
fn add_candidate(ctx: &ElabContext, full: &Name, out: &mut Vec<Name>) -> bool {
    let mut found = false;
    if ctx.env.contains(full) {
        found = true;
        if !out.contains(full) {
            out.push(full.clone());
        }
    }
    if let Some(targets) = ctx.aliases.get(full) {
        for target in targets {
            found = true;
            if !out.contains(target) {
                out.push(target.clone());
            }
        }
    }
    found
}

/// Protected names need at least their last namespace component.
fn blocked_by_protection(ctx: &ElabContext, ident: &Name, full: &Name) -> bool {
    ident.is_atomic() && full.len() > 1 && ctx.protected.contains(full)
}

pub fn resolve(ident: &Name, ctx: &ElabContext) -> Resolution {
    if ident.is_atomic() && ctx.universes.contains(ident) {
        return Resolution::Unique(ident.clone());
    }

    let mut candidates = Vec::new();
    if ident.is_root_anchored() {
        add_candidate(ctx, &ident.strip_root_anchor(), &mut candidates);
        return Resolution::from_candidates(candidates);
    }

    for prefix in ctx.namespace_path.prefixes() {
        let full = prefix.append(ident);
        if blocked_by_protection(ctx, ident, &full) {
            continue;
        }
        if add_candidate(ctx, &full, &mut candidates) {
            break;
        }
    }

    for scope in ctx.scopes.iter().rev() {
        for (short, full) in &scope.local_aliases {
            if short == ident {
                add_candidate(ctx, full, &mut candidates);
            }
        }
        for (alias, ns) in &scope.namespace_aliases {
            if let Some(rest) = ident.strip_prefix(alias) {
                if !rest.is_anonymous() {
                    add_candidate(ctx, &ns.append(&rest), &mut candidates);
                }
            }
        }
        for ns in &scope.opened_namespaces {
            let full = ns.append(ident);
            if scope.is_hidden(&full) || blocked_by_protection(ctx, ident, &full) {
                continue;
            }
            add_candidate(ctx, &full, &mut candidates);
        }
    }

    trace!(%ident, candidates = candidates.len(), "resolved identifier");
    Resolution::from_candidates(candidates)
}

/// Resolve a reference that must name exactly one constant
/// (`export`, `attribute`, `#print`).
pub fn resolve_unique(ident: &Name, ctx: &ElabContext, span: Span) -> ElabResult<Name> {
    match resolve(ident, ctx) {
        Resolution::Unique(name) => Ok(name),
        Resolution::Ambiguous(candidates) => Err(ElabError::AmbiguousIdentifier {
            name: ident.clone(),
            candidates,
            span,
        }),
        Resolution::Unknown => Err(ElabError::UnknownIdentifier {
            name: ident.clone(),
            span,
        }),
    }
}

/// Namespaces `ns` may refer to, for `open` and `export`.
pub fn resolve_namespace(ns: &Name, ctx: &ElabContext, span: Span) -> ElabResult<Vec<Name>> {
    let mut found: Vec<Name> = Vec::new();
    let mut push = |name: Name| {
        if !found.contains(&name) {
            found.push(name);
        }
    };
    if ns.is_root_anchored() {
        let full = ns.strip_root_anchor();
        if ctx.is_namespace(&full) {
            push(full);
        }
    } else {
        for prefix in ctx.namespace_path.prefixes() {
            let full = prefix.append(ns);
            if ctx.is_namespace(&full) {
                push(full);
                break;
            }
        }
        for scope in ctx.scopes.iter().rev() {
            for (alias, target) in &scope.namespace_aliases {
                if let Some(rest) = ns.strip_prefix(alias) {
                    let full = target.append(&rest);
                    if ctx.is_namespace(&full) {
                        push(full);
                    }
                }
            }
            for opened in &scope.opened_namespaces {
                let full = opened.append(ns);
                if ctx.is_namespace(&full) {
                    push(full);
                }
            }
        }
    }
    if found.is_empty() {
        return Err(ElabError::UnknownNamespace {
            name: ns.clone(),
            span,
        });
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::{self, ScopeKind};
    use kernel::{ConstantInfo, ConstantKind, Expr};

    fn declare(ctx: &mut ElabContext, name: &str) {
        let name = Name::parse(name);
        ctx.register_namespace(&name.prefix());
        ctx.env = ctx.env.insert(ConstantInfo {
            name,
            univ_params: vec![],
            ty: Expr::hole(),
            value: None,
            kind: ConstantKind::Axiom,
        });
    }

    fn n(s: &str) -> Name {
        Name::parse(s)
    }

    #[test]
    fn opens_collect_every_candidate() {
        let mut ctx = ElabContext::default();
        declare(&mut ctx, "Foo.f");
        declare(&mut ctx, "Bar.f");
        ctx.current_scope_mut().open_namespace(n("Foo"));
        assert_eq!(resolve(&n("f"), &ctx), Resolution::Unique(n("Foo.f")));
        ctx.current_scope_mut().open_namespace(n("Bar"));
        assert_eq!(
            resolve(&n("f"), &ctx),
            Resolution::Ambiguous(vec![n("Foo.f"), n("Bar.f")])
        );
    }

    #[test]
    fn namespace_path_is_searched_innermost_first() {
        let mut ctx = ElabContext::default();
        declare(&mut ctx, "A.x");
        declare(&mut ctx, "A.B.x");
        scope::enter(&mut ctx, ScopeKind::Namespace, Some(n("A")), Span::default());
        scope::enter(&mut ctx, ScopeKind::Namespace, Some(n("B")), Span::default());
        assert_eq!(resolve(&n("x"), &ctx), Resolution::Unique(n("A.B.x")));
    }

    #[test]
    fn root_anchor_ignores_opens() {
        let mut ctx = ElabContext::default();
        declare(&mut ctx, "x");
        declare(&mut ctx, "Foo.x");
        ctx.current_scope_mut().open_namespace(n("Foo"));
        assert_eq!(resolve(&n("_root_.x"), &ctx), Resolution::Unique(n("x")));
        assert_eq!(
            resolve(&n("x"), &ctx),
            Resolution::Ambiguous(vec![n("x"), n("Foo.x")])
        );
    }

    #[test]
    fn hidden_and_protected_names_stay_out_of_opens() {
        let mut ctx = ElabContext::default();
        declare(&mut ctx, "Foo.a");
        declare(&mut ctx, "Foo.b");
        ctx.protected.insert(n("Foo.b"));
        let root = ctx.current_scope_mut();
        root.open_namespace(n("Foo"));
        root.hidden.push(n("Foo.a"));
        assert_eq!(resolve(&n("a"), &ctx), Resolution::Unknown);
        assert_eq!(resolve(&n("b"), &ctx), Resolution::Unknown);
        assert_eq!(resolve(&n("Foo.b"), &ctx), Resolution::Unique(n("Foo.b")));
    }

    #[test]
    fn aliases_expand_to_their_targets() {
        let mut ctx = ElabContext::default();
        declare(&mut ctx, "Data.List.map");
        ctx.current_scope_mut()
            .namespace_aliases
            .push((n("L"), n("Data.List")));
        assert_eq!(resolve(&n("L.map"), &ctx), Resolution::Unique(n("Data.List.map")));
        ctx.add_alias(n("map"), n("Data.List.map"));
        assert_eq!(resolve(&n("map"), &ctx), Resolution::Unique(n("Data.List.map")));
    }

    #[test]
    fn unknown_namespaces_are_reported() {
        let ctx = ElabContext::default();
        let err = resolve_namespace(&n("Nope"), &ctx, Span::default()).unwrap_err();
        assert_eq!(err.to_string(), "unknown namespace 'Nope'");
    }
}
