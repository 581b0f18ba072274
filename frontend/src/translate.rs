//! Surface-to-core translation
//!
//! A structural recursion over `Syntax` producing kernel pre-terms with named
//! locals. Every translated node is wrapped in a position annotation so later
//! stages can point back at the source. Binders introduced by notation bodies
//! carry macro scopes and get fresh core names, which keeps them from
//! capturing identifiers the user wrote.

use crate::elab::{ElabContext, ElabError, ElabResult};
use crate::resolve::{resolve, Resolution};
use crate::surface::{ScopeId, Span, Syntax, SyntaxKind};
use kernel::{
    Annotation, Binder, BinderInfo, ConstantKind, Equation, Equations, Expr, FieldRef, Level,
    Literal, Name, StructInstanceInfo,
};
use std::rc::Rc;
use tracing::trace;

const MAX_TERM_DEPTH: usize = 512;

#[derive(Debug, Clone)]
struct Local {
    surface: Name,
    scopes: Vec<ScopeId>,
    core: Name,
}

/// A binding site is visible from a reference when the site's macro scopes
/// are among the reference's, and user-written sites stay invisible to
/// notation-introduced references.
fn hygienic_match(def_scopes: &[ScopeId], ref_scopes: &[ScopeId]) -> bool {
    if def_scopes.is_empty() {
        return ref_scopes.is_empty();
    }
    def_scopes.iter().all(|s| ref_scopes.contains(s))
}

fn with_position(span: Span, e: Rc<Expr>) -> Rc<Expr> {
    if span == Span::default() {
        return e;
    }
    Expr::annotate(Annotation::Position(span.to_source_pos()), e)
}

fn binder_info(kind: &str) -> Option<BinderInfo> {
    match kind {
        "binder.explicit" => Some(BinderInfo::Default),
        "binder.implicit" => Some(BinderInfo::Implicit),
        "binder.strict" => Some(BinderInfo::StrictImplicit),
        "binder.inst" => Some(BinderInfo::InstImplicit),
        _ => None,
    }
}

pub struct Translator<'a> {
    ctx: &'a mut ElabContext,
    locals: Vec<Local>,
    gensym: usize,
    /// Declarations being defined, with the term their name stands for.
    self_refs: Vec<(Name, Rc<Expr>)>,
    /// `.{u v}` parameters of the enclosing declaration.
    univ_params: Vec<Name>,
    /// Structure an anonymous `{ ... }` instance defaults to.
    struct_hint: Option<Name>,
    /// Set while translating the left-hand side of a match alternative:
    /// the variables bound so far, by surface name.
    pattern_vars: Option<Vec<(Name, Binder)>>,
    depth: usize,
}

/// Translate a closed term in the current context.
pub fn to_core(term: &Syntax, ctx: &mut ElabContext) -> ElabResult<Rc<Expr>> {
    Translator::new(ctx).term(term)
}

impl<'a> Translator<'a> {
    pub fn new(ctx: &'a mut ElabContext) -> Self {
        Translator {
            ctx,
            locals: Vec::new(),
            gensym: 0,
            self_refs: Vec::new(),
            univ_params: Vec::new(),
            struct_hint: None,
            pattern_vars: None,
            depth: 0,
        }
    }

    pub fn ctx(&mut self) -> &mut ElabContext {
        self.ctx
    }

    pub fn set_univ_params(&mut self, params: Vec<Name>) {
        self.univ_params = params;
    }

    pub fn add_self_ref(&mut self, name: Name, replacement: Rc<Expr>) {
        self.self_refs.push((name, replacement));
    }

    pub fn clear_self_refs(&mut self) {
        self.self_refs.clear();
    }

    pub fn set_struct_hint(&mut self, hint: Option<Name>) {
        self.struct_hint = hint;
    }

    fn fresh_name(&mut self, base: &str) -> Name {
        let n = self.gensym;
        self.gensym += 1;
        Name::parse(&format!("{}_g{}", base, n))
    }

    /// Bring a binder into scope; returns the core name it gets.
    pub fn push_local(&mut self, surface: &Name, scopes: &[ScopeId]) -> Name {
        let core = if scopes.is_empty() {
            surface.clone()
        } else {
            self.fresh_name(&surface.to_string())
        };
        self.locals.push(Local {
            surface: surface.clone(),
            scopes: scopes.to_vec(),
            core: core.clone(),
        });
        core
    }

    pub fn pop_locals(&mut self, n: usize) {
        let keep = self.locals.len().saturating_sub(n);
        self.locals.truncate(keep);
    }

    fn find_local(&self, name: &str, scopes: &[ScopeId]) -> Option<&Local> {
        self.locals.iter().rev().find(|l| {
            l.surface.is_atomic()
                && l.surface.first() == Some(name)
                && hygienic_match(&l.scopes, scopes)
        })
    }

    // =========================================================================
    // Terms
    // =========================================================================

    pub fn term(&mut self, stx: &Syntax) -> ElabResult<Rc<Expr>> {
        if self.depth >= MAX_TERM_DEPTH {
            return Err(ElabError::RecursionDepth { span: stx.span });
        }
        self.depth += 1;
        let result = self.term_inner(stx);
        self.depth -= 1;
        Ok(with_position(stx.span, result?))
    }

    fn term_inner(&mut self, stx: &Syntax) -> ElabResult<Rc<Expr>> {
        match &stx.kind {
            SyntaxKind::Ident(name) => self.ident(name, &stx.scopes, stx.span),
            SyntaxKind::Num(n) => Ok(Expr::nat(*n)),
            SyntaxKind::Str(s) => Ok(Rc::new(Expr::Lit(Literal::Str(s.clone())))),
            SyntaxKind::Atom(_) | SyntaxKind::Missing => {
                Err(ElabError::malformed("term", stx))
            }
            SyntaxKind::Node(kind, args) => self.node(stx, kind, args),
        }
    }

    fn node(&mut self, stx: &Syntax, kind: &str, args: &[Syntax]) -> ElabResult<Rc<Expr>> {
        trace!(kind, "translating");
        match kind {
            "term.app" => {
                let [head, rest @ ..] = args else {
                    return Err(ElabError::malformed("application", stx));
                };
                let f = if self.pattern_vars.is_some() {
                    self.pattern_head(head)?
                } else {
                    self.term(head)?
                };
                let mut out = Vec::with_capacity(rest.len());
                for arg in rest {
                    out.push(self.term(arg)?);
                }
                Ok(Expr::app_n(f, out))
            }
            "term.fun" | "term.pi" => {
                let [groups @ .., body] = args else {
                    return Err(ElabError::malformed(kind, stx));
                };
                let binders = self.binder_groups(groups)?;
                let body = self.term(body);
                self.pop_locals(binders.len());
                let body = body?;
                Ok(if kind == "term.fun" {
                    Expr::lams(&binders, body)
                } else {
                    Expr::pis(&binders, body)
                })
            }
            "term.arrow" => {
                let [dom, cod] = args else {
                    return Err(ElabError::malformed("arrow", stx));
                };
                let dom = self.term(dom)?;
                let cod = self.term(cod)?;
                Ok(Expr::arrow(dom, cod))
            }
            "term.let" => self.let_term(stx, args),
            "term.have" => {
                let [name, ty, value, body] = args else {
                    return Err(ElabError::malformed("have", stx));
                };
                let (surface, scopes) = match name.as_ident() {
                    Some(n) => (n.clone(), name.scopes.clone()),
                    None => (Name::parse("this"), stx.scopes.clone()),
                };
                let ty = self.term(ty)?;
                let value = self.term(value)?;
                let core = self.push_local(&surface, &scopes);
                let body = self.term(body);
                self.pop_locals(1);
                let f = Expr::lam(Binder::explicit(core, ty), body?);
                Ok(Expr::annotate(Annotation::Have, Expr::app(f, value)))
            }
            "term.show" => {
                let [ty, value] = args else {
                    return Err(ElabError::malformed("show", stx));
                };
                let ty = self.term(ty)?;
                let value = match value.present() {
                    Some(v) => self.term(v)?,
                    None => Expr::hole(),
                };
                let this = self.fresh_name("this");
                let id = Expr::lam(Binder::explicit(this.clone(), ty), Expr::local(this));
                Ok(Expr::annotate(Annotation::Show, Expr::app(id, value)))
            }
            "term.if" => self.if_term(stx, args),
            "term.sort" | "term.type" => {
                let [level] = args else {
                    return Err(ElabError::malformed(kind, stx));
                };
                let level = match level.present() {
                    Some(l) => self.level(l)?,
                    None if kind == "term.type" => Level::Zero,
                    None => Level::Hole,
                };
                Ok(Expr::sort(if kind == "term.type" {
                    level.succ()
                } else {
                    level
                }))
            }
            "term.prop" => Ok(Expr::sort(Level::Zero)),
            "term.hole" => Ok(Expr::hole()),
            "term.unit" => Ok(Expr::constant(Name::parse("Unit.unit"))),
            "term.explicitUniv" => {
                let [ident, levels @ ..] = args else {
                    return Err(ElabError::malformed("universe instance", stx));
                };
                let name = ident
                    .as_ident()
                    .ok_or_else(|| ElabError::malformed("universe instance", stx))?;
                let mut ls = Vec::with_capacity(levels.len());
                for l in levels {
                    ls.push(self.level(l)?);
                }
                let head = self.ident(name, &ident.scopes, ident.span)?;
                match head.as_ref() {
                    Expr::Const(n, _) => Ok(Rc::new(Expr::Const(n.clone(), ls))),
                    _ => Err(ElabError::invalid(
                        format!("universe instance on non-constant '{}'", name),
                        stx.span,
                    )),
                }
            }
            "term.anonCtor" => {
                let mut values = Vec::with_capacity(args.len());
                for a in args {
                    values.push(self.term(a)?);
                }
                Ok(Expr::annotate(
                    Annotation::AnonymousConstructor { arity: args.len() },
                    Expr::app_n(Expr::hole(), values),
                ))
            }
            "term.structInst" => self.struct_instance(stx, args),
            "term.match" => self.match_term(stx, args),
            "term.proj" => {
                let [target, field] = args else {
                    return Err(ElabError::malformed("projection", stx));
                };
                let target = self.term(target)?;
                let field = match &field.kind {
                    SyntaxKind::Num(0) => {
                        return Err(ElabError::invalid(
                            "invalid projection, index must be greater than 0",
                            field.span,
                        ))
                    }
                    SyntaxKind::Num(n) => FieldRef::Index(*n as usize - 1),
                    SyntaxKind::Ident(name) => FieldRef::Named(name.clone()),
                    _ => return Err(ElabError::malformed("projection", stx)),
                };
                Ok(Rc::new(Expr::Proj(target, field)))
            }
            "term.explicit" | "term.borrowed" | "term.inaccessible" => {
                let [inner] = args else {
                    return Err(ElabError::malformed(kind, stx));
                };
                let annotation = match kind {
                    "term.explicit" => Annotation::Explicit,
                    "term.borrowed" => Annotation::Borrowed,
                    _ => Annotation::Inaccessible,
                };
                // `.(e)` refers to pattern variables; it never binds new ones
                let saved = if kind == "term.inaccessible" {
                    self.pattern_vars.take()
                } else {
                    None
                };
                let inner = self.term(inner);
                if saved.is_some() {
                    self.pattern_vars = saved;
                }
                Ok(Expr::annotate(annotation, inner?))
            }
            "term.typeAscription" => {
                let [e, ty] = args else {
                    return Err(ElabError::malformed("type ascription", stx));
                };
                let e = self.term(e)?;
                let ty = self.term(ty)?;
                Ok(Rc::new(Expr::Ascribe(e, ty)))
            }
            "term.tuple" => {
                let mut items = Vec::with_capacity(args.len());
                for a in args {
                    items.push(self.term(a)?);
                }
                let mk = Name::parse("Prod.mk");
                let Some(last) = items.pop() else {
                    return Err(ElabError::malformed("tuple", stx));
                };
                Ok(items.into_iter().rev().fold(last, |acc, item| {
                    Expr::app_n(Expr::constant(mk.clone()), [item, acc])
                }))
            }
            "term.choice" => self.choice(stx, args),
            tag if tag.contains('#') => self.notation_use(stx, tag, args),
            _ => Err(ElabError::UnknownSyntax {
                kind: kind.to_string(),
                excerpt: stx.excerpt(60),
                span: stx.span,
            }),
        }
    }

    fn let_term(&mut self, stx: &Syntax, args: &[Syntax]) -> ElabResult<Rc<Expr>> {
        let [name, binders, ty, value, body] = args else {
            return Err(ElabError::malformed("let", stx));
        };
        let surface = name
            .as_ident()
            .ok_or_else(|| ElabError::malformed("let", stx))?
            .clone();
        let params = self.binder_groups(binders.args())?;
        let ty = match ty.present() {
            Some(t) => self.term(t).map(|t| Expr::pis(&params, t)),
            None => Ok(Expr::hole()),
        };
        let value = self.term(value).map(|v| Expr::lams(&params, v));
        self.pop_locals(params.len());
        let (ty, value) = (ty?, value?);
        let core = self.push_local(&surface, &name.scopes);
        let body = self.term(body);
        self.pop_locals(1);
        let f = Expr::lam(Binder::explicit(core, ty), body?);
        Ok(Expr::annotate(Annotation::Let, Expr::app(f, value)))
    }

    fn if_term(&mut self, stx: &Syntax, args: &[Syntax]) -> ElabResult<Rc<Expr>> {
        let [hyp, cond, then_branch, else_branch] = args else {
            return Err(ElabError::malformed("if", stx));
        };
        let c = self.term(cond)?;
        match hyp.as_ident() {
            None => {
                let t = self.term(then_branch)?;
                let e = self.term(else_branch)?;
                Ok(Expr::app_n(Expr::constant(Name::parse("ite")), [c, t, e]))
            }
            Some(h) => {
                let core = self.push_local(h, &hyp.scopes);
                let t = self.term(then_branch);
                let e = self.term(else_branch);
                self.pop_locals(1);
                let not_c = Expr::app(Expr::constant(Name::parse("Not")), c.clone());
                let t = Expr::lam(Binder::explicit(core.clone(), c.clone()), t?);
                let e = Expr::lam(Binder::explicit(core, not_c), e?);
                Ok(Expr::app_n(Expr::constant(Name::parse("dite")), [c, t, e]))
            }
        }
    }

    fn choice(&mut self, stx: &Syntax, alternatives: &[Syntax]) -> ElabResult<Rc<Expr>> {
        let mut ok = Vec::new();
        let mut first_err = None;
        for alt in alternatives {
            match self.term(alt) {
                Ok(e) => ok.push(e),
                Err(err) => {
                    first_err.get_or_insert(err);
                }
            }
        }
        match (ok.len(), first_err) {
            (0, Some(err)) => Err(err),
            (0, None) => Err(ElabError::malformed("choice", stx)),
            (1, _) => Ok(ok.remove(0)),
            _ => Ok(Rc::new(Expr::Choice(ok))),
        }
    }

    fn notation_use(&mut self, stx: &Syntax, tag: &str, args: &[Syntax]) -> ElabResult<Rc<Expr>> {
        let Some(entry) = self.ctx.notations.get(&Name::parse(tag)) else {
            return Err(ElabError::UnknownSyntax {
                kind: tag.to_string(),
                excerpt: stx.excerpt(60),
                span: stx.span,
            });
        };
        let Some(transformer) = entry.transformer.clone() else {
            return Err(ElabError::ReservedNotation {
                shape: entry.rule.shape(),
                span: stx.span,
            });
        };
        let scope = self.ctx.fresh_scope();
        let expanded = transformer.apply(args, scope, stx.span)?;
        trace!(tag, expansion = %expanded, "expanded notation");
        self.term(&expanded)
    }

    // =========================================================================
    // Identifiers
    // =========================================================================

    fn self_ref(&self, name: &Name) -> Option<Rc<Expr>> {
        let prefixes = self.ctx.namespace_path.prefixes();
        self.self_refs
            .iter()
            .find(|(full, _)| {
                full == &name.strip_root_anchor()
                    || prefixes.iter().any(|p| &p.append(name) == full)
            })
            .map(|(_, e)| e.clone())
    }

    fn global(&self, name: &Name, span: Span) -> ElabResult<Option<Rc<Expr>>> {
        if let Some(e) = self.self_ref(name) {
            return Ok(Some(e));
        }
        match resolve(name, self.ctx) {
            Resolution::Unique(full) => Ok(Some(Expr::constant(full))),
            Resolution::Ambiguous(candidates) => Err(ElabError::AmbiguousIdentifier {
                name: name.clone(),
                candidates,
                span,
            }),
            Resolution::Unknown => Ok(None),
        }
    }

    fn project(base: Rc<Expr>, fields: &[&str]) -> Rc<Expr> {
        fields.iter().fold(base, |acc, f| {
            Rc::new(Expr::Proj(acc, FieldRef::Named(Name::parse(f))))
        })
    }

    fn ident(&mut self, name: &Name, scopes: &[ScopeId], span: Span) -> ElabResult<Rc<Expr>> {
        if let Some(pattern) = self.pattern_var(name, scopes, span)? {
            return Ok(pattern);
        }
        let components: Vec<&str> = name.components().collect();
        if let Some(first) = components.first() {
            if let Some(local) = self.find_local(first, scopes) {
                return Ok(Self::project(Expr::local(local.core.clone()), &components[1..]));
            }
        }
        if let Some(e) = self.global(name, span)? {
            return Ok(e);
        }
        // `x.f.g` where only a prefix names something
        for k in (1..components.len()).rev() {
            let prefix = Name::from_components(components[..k].iter().copied());
            if prefix.is_root_anchored() && k == 1 {
                break;
            }
            if let Some(e) = self.global(&prefix, span)? {
                return Ok(Self::project(e, &components[k..]));
            }
        }
        if self.ctx.defer_unknown() {
            trace!(%name, "deferring unknown identifier");
            return Ok(Expr::constant(name.strip_root_anchor()));
        }
        Err(ElabError::UnknownIdentifier {
            name: name.clone(),
            span,
        })
    }

    // =========================================================================
    // Binders and levels
    // =========================================================================

    /// Translate binder groups left to right, leaving their names in scope.
    /// The caller pops `result.len()` locals.
    pub fn binder_groups(&mut self, groups: &[Syntax]) -> ElabResult<Vec<Binder>> {
        let mut binders = Vec::new();
        for group in groups {
            match self.binder_group(group) {
                Ok(bs) => binders.extend(bs),
                Err(err) => {
                    self.pop_locals(binders.len());
                    return Err(err);
                }
            }
        }
        Ok(binders)
    }

    fn binder_group(&mut self, group: &Syntax) -> ElabResult<Vec<Binder>> {
        let info = group
            .node_kind()
            .and_then(binder_info)
            .ok_or_else(|| ElabError::malformed("binder", group))?;
        let args = group.args();
        if info == BinderInfo::InstImplicit {
            let [name, ty] = args else {
                return Err(ElabError::malformed("instance binder", group));
            };
            let ty = self.term(ty)?;
            let core = match name.as_ident() {
                Some(n) => self.push_local(n, &name.scopes),
                None => {
                    let fresh = self.fresh_name("inst");
                    self.push_local(&fresh, &[])
                }
            };
            return Ok(vec![Binder::new(core, info, ty)]);
        }
        let [names @ .., ty] = args else {
            return Err(ElabError::malformed("binder", group));
        };
        if names.is_empty() {
            return Err(ElabError::malformed("binder", group));
        }
        let ty = match ty.present() {
            Some(t) => self.term(t)?,
            None => Expr::hole(),
        };
        let mut out = Vec::with_capacity(names.len());
        for name in names {
            let surface = name
                .as_ident()
                .ok_or_else(|| ElabError::malformed("binder", group))?;
            let core = if surface.to_string() == "_" {
                let fresh = self.fresh_name("a");
                self.push_local(&fresh, &[])
            } else {
                self.push_local(surface, &name.scopes)
            };
            out.push(Binder::new(core, info, ty.clone()));
        }
        Ok(out)
    }

    fn check_universe_offset(&self, offset: u64, span: Span) -> ElabResult<()> {
        let limit = self.ctx.max_universe_offset();
        if offset > limit {
            return Err(ElabError::UniverseOffset { limit, span });
        }
        Ok(())
    }

    pub fn level(&mut self, stx: &Syntax) -> ElabResult<Level> {
        match &stx.kind {
            SyntaxKind::Num(n) => {
                self.check_universe_offset(*n, stx.span)?;
                Ok(Level::of_nat(*n))
            }
            SyntaxKind::Ident(name) => {
                if self.univ_params.contains(name) {
                    return Ok(Level::Param(name.clone()));
                }
                match self.ctx.universes.get(name) {
                    Some(level) => Ok(level.clone()),
                    None => Err(ElabError::UnknownUniverse {
                        name: name.clone(),
                        span: stx.span,
                    }),
                }
            }
            SyntaxKind::Node(kind, args) => match kind.as_str() {
                "level.hole" => Ok(Level::Hole),
                "level.add" => {
                    let [base, offset] = args.as_slice() else {
                        return Err(ElabError::malformed("universe level", stx));
                    };
                    let SyntaxKind::Num(k) = offset.kind else {
                        return Err(ElabError::malformed("universe level", stx));
                    };
                    let base = self.level(base)?;
                    let (_, inner) = base.to_offset();
                    self.check_universe_offset(inner.saturating_add(k), stx.span)?;
                    Ok((0..k).fold(base, |acc, _| acc.succ()))
                }
                "level.max" | "level.imax" => {
                    let mut levels = Vec::with_capacity(args.len());
                    for a in args {
                        levels.push(self.level(a)?);
                    }
                    let mut iter = levels.into_iter();
                    let first = iter
                        .next()
                        .ok_or_else(|| ElabError::malformed("universe level", stx))?;
                    Ok(iter.fold(first, |acc, l| {
                        if kind == "level.max" {
                            Level::Max(Box::new(acc), Box::new(l))
                        } else {
                            Level::IMax(Box::new(acc), Box::new(l))
                        }
                    }))
                }
                _ => Err(ElabError::malformed("universe level", stx)),
            },
            _ => Err(ElabError::malformed("universe level", stx)),
        }
    }

    // =========================================================================
    // Structure instances
    // =========================================================================

    fn structure_name(&mut self, stx: &Syntax) -> ElabResult<Option<Name>> {
        let e = self.term(stx)?;
        Ok(match e.app_fn() {
            Expr::Const(name, _) => Some(name.clone()),
            _ => None,
        })
    }

    /// The one known structure declaring every given field.
    fn infer_structure(&self, given: &[(Name, Rc<Expr>, Span)]) -> Option<Name> {
        if given.is_empty() {
            return None;
        }
        let mut matching = self
            .ctx
            .structures
            .values()
            .filter(|info| given.iter().all(|(f, _, _)| info.fields.contains(f)));
        let first = matching.next()?;
        match matching.next() {
            Some(_) => None,
            None => Some(first.name.clone()),
        }
    }

    fn struct_instance(&mut self, stx: &Syntax, args: &[Syntax]) -> ElabResult<Rc<Expr>> {
        let [source, structure, fields @ ..] = args else {
            return Err(ElabError::malformed("structure instance", stx));
        };
        let source = match source.present() {
            Some(s) => Some(self.term(s)?),
            None => None,
        };
        let mut given: Vec<(Name, Rc<Expr>, Span)> = Vec::with_capacity(fields.len());
        for field in fields {
            let [name, value] = field.args() else {
                return Err(ElabError::malformed("structure instance field", field));
            };
            let name_span = name.span;
            let name = name
                .as_ident()
                .ok_or_else(|| ElabError::malformed("structure instance field", field))?
                .clone();
            if given.iter().any(|(n, _, _)| n == &name) {
                return Err(ElabError::invalid(
                    format!("field '{}' has already been specified", name),
                    name_span,
                ));
            }
            let value = self.term(value)?;
            given.push((name, value, name_span));
        }

        let explicit = match structure.present() {
            Some(s) => self.structure_name(s)?,
            None => None,
        };
        let hint = self
            .struct_hint
            .clone()
            .filter(|h| self.ctx.structures.contains(h));
        let target = explicit.or(hint).or_else(|| self.infer_structure(&given));
        let info = target
            .as_ref()
            .and_then(|name| self.ctx.structures.get(name))
            .cloned();
        let given_names: Vec<Name> = given.iter().map(|(n, _, _)| n.clone()).collect();

        let Some(info) = info else {
            let mut values: Vec<Rc<Expr>> = source.iter().cloned().collect();
            values.extend(given.into_iter().map(|(_, v, _)| v));
            let annotation = Annotation::StructInstance(StructInstanceInfo {
                structure: target,
                field_count: given_names.len(),
                fields: given_names,
                has_source: source.is_some(),
            });
            return Ok(Expr::annotate(annotation, Expr::app_n(Expr::hole(), values)));
        };

        for (name, _, span) in &given {
            if !info.fields.contains(name) {
                return Err(ElabError::invalid(
                    format!("'{}' is not a field of structure '{}'", name, info.name),
                    *span,
                ));
            }
        }
        let mut values: Vec<Rc<Expr>> = Vec::with_capacity(info.fields.len());
        for field in &info.fields {
            let value = if let Some((_, v, _)) = given.iter().find(|(n, _, _)| n == field) {
                v.clone()
            } else if let Some(src) = &source {
                Rc::new(Expr::Proj(src.clone(), FieldRef::Named(field.clone())))
            } else if info.defaults.contains(field) {
                let default = info.name.append(field).push("_default");
                Expr::app_n(Expr::constant(default), values.clone())
            } else {
                Expr::hole()
            };
            values.push(value);
        }
        let annotation = Annotation::StructInstance(StructInstanceInfo {
            structure: Some(info.name.clone()),
            fields: given_names,
            field_count: info.fields.len(),
            has_source: source.is_some(),
        });
        Ok(Expr::annotate(
            annotation,
            Expr::app_n(Expr::constant(info.ctor.clone()), values),
        ))
    }

    // =========================================================================
    // Patterns
    // =========================================================================

    /// In a pattern, an atomic identifier that is not a constructor binds a
    /// new variable.
    fn pattern_var(
        &mut self,
        name: &Name,
        scopes: &[ScopeId],
        span: Span,
    ) -> ElabResult<Option<Rc<Expr>>> {
        if self.pattern_vars.is_none() || !name.is_atomic() {
            return Ok(None);
        }
        if let Resolution::Unique(full) = resolve(name, self.ctx) {
            let is_ctor = matches!(
                self.ctx.env.find(&full).map(|c| &c.kind),
                Some(ConstantKind::Constructor { .. })
            );
            if is_ctor {
                return Ok(Some(Expr::constant(full)));
            }
        }
        let bound_twice = self
            .pattern_vars
            .as_ref()
            .is_some_and(|vars| vars.iter().any(|(n, _)| n == name));
        if bound_twice {
            return Err(ElabError::invalid(
                format!("invalid pattern, variable '{}' occurs more than once", name),
                span,
            ));
        }
        let core = self.push_local(name, scopes);
        if let Some(vars) = self.pattern_vars.as_mut() {
            vars.push((name.clone(), Binder::explicit(core.clone(), Expr::hole())));
        }
        Ok(Some(Expr::local(core)))
    }

    /// Application heads inside patterns are always constants.
    fn pattern_head(&mut self, head: &Syntax) -> ElabResult<Rc<Expr>> {
        let saved = self.pattern_vars.take();
        let result = self.term(head);
        self.pattern_vars = saved;
        result
    }

    /// One `| pats => rhs` alternative of function `fn_index`.
    pub fn equation(
        &mut self,
        alt: &Syntax,
        fn_index: usize,
        arity: Option<usize>,
    ) -> ElabResult<Equation> {
        let [pats, rhs] = alt.args() else {
            return Err(ElabError::malformed("match alternative", alt));
        };
        if let Some(n) = arity {
            if pats.args().len() != n {
                return Err(ElabError::invalid(
                    format!("expected {} patterns, got {}", n, pats.args().len()),
                    pats.span,
                ));
            }
        }
        let saved = self.pattern_vars.replace(Vec::new());
        let mut patterns = Vec::with_capacity(pats.args().len());
        let mut failure = None;
        for pat in pats.args() {
            match self.term(pat) {
                Ok(p) => patterns.push(p),
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
        let vars = std::mem::replace(&mut self.pattern_vars, saved).unwrap_or_default();
        let rhs = match failure {
            Some(err) => Err(err),
            None => self.term(rhs),
        };
        self.pop_locals(vars.len());
        Ok(Equation {
            fn_index,
            vars: vars.into_iter().map(|(_, b)| b).collect(),
            patterns,
            rhs: rhs?,
        })
    }

    fn match_term(&mut self, stx: &Syntax, args: &[Syntax]) -> ElabResult<Rc<Expr>> {
        let [discrs, alts @ ..] = args else {
            return Err(ElabError::malformed("match", stx));
        };
        if !discrs.is_node("match.discrs") || alts.is_empty() {
            return Err(ElabError::malformed("match", stx));
        }
        let mut scrutinees = Vec::with_capacity(discrs.args().len());
        for d in discrs.args() {
            scrutinees.push(self.term(d)?);
        }
        let index = self.ctx.next_match_index();
        let aux = Name::parse(&format!("_match_{}", index));
        let mut equations = Vec::with_capacity(alts.len());
        for alt in alts {
            equations.push(self.equation(alt, 0, Some(scrutinees.len()))?);
        }
        let eqns = Equations {
            fns: vec![Binder::explicit(aux, Expr::hole())],
            equations,
        };
        Ok(Expr::annotate(
            Annotation::PreEquations,
            Expr::app_n(Rc::new(Expr::Equations(Rc::new(eqns))), scrutinees),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elab::{OptionValue, StructureInfo};
    use crate::notation;
    use crate::parser::{CommandSource, Parser};

    fn parse_term(src: &str, ctx: &ElabContext) -> Syntax {
        Parser::new(src).parse_term(&ctx.parser_config).unwrap()
    }

    fn translate(src: &str, ctx: &mut ElabContext) -> ElabResult<Rc<Expr>> {
        let stx = parse_term(src, ctx);
        to_core(&stx, ctx).map(|e| e.erase_positions())
    }

    fn show(src: &str, ctx: &mut ElabContext) -> String {
        translate(src, ctx).unwrap().to_string()
    }

    fn register(src: &str, ctx: &mut ElabContext) {
        let stx = Parser::new(src).next_command(&ctx.parser_config).unwrap();
        notation::register(&stx, ctx).unwrap();
    }

    #[test]
    fn binders_and_arrows() {
        let mut ctx = ElabContext::default();
        insta::assert_snapshot!(show("fun (x : Nat) {y} => f x y", &mut ctx), @"fun (x : Nat) {y : _} => f x y");
        insta::assert_snapshot!(show("∀ (a : Prop), a → a", &mut ctx), @"(a : Prop) → a → a");
    }

    #[test]
    fn positions_wrap_translated_nodes() {
        let mut ctx = ElabContext::default();
        let stx = parse_term("f 1", &ctx);
        let e = to_core(&stx, &mut ctx).unwrap();
        let pos = e.position().expect("position annotation");
        assert_eq!((pos.start, pos.end), (0, 3));
    }

    #[test]
    fn notation_use_matches_direct_application() {
        let mut ctx = ElabContext::default();
        register("infixl:65 \" + \" => HAdd.hAdd", &mut ctx);
        let via_notation = translate("a + b + c", &mut ctx).unwrap();
        let direct = translate("HAdd.hAdd (HAdd.hAdd a b) c", &mut ctx).unwrap();
        assert_eq!(via_notation, direct);
    }

    #[test]
    fn notation_binders_do_not_capture() {
        let mut ctx = ElabContext::default();
        register("notation \"K\" a => fun x => a", &mut ctx);
        insta::assert_snapshot!(show("fun x => K x", &mut ctx), @"fun (x : _) (x_g0 : _) => x");
    }

    #[test]
    fn projections_are_one_based_in_syntax() {
        let mut ctx = ElabContext::default();
        insta::assert_snapshot!(show("fun p => p.2", &mut ctx), @"fun (p : _) => p.2");
        let err = translate("fun p => p.0", &mut ctx).unwrap_err();
        assert_eq!(err.to_string(), "invalid projection, index must be greater than 0");
    }

    #[test]
    fn let_and_if_desugar() {
        let mut ctx = ElabContext::default();
        insta::assert_snapshot!(show("let y := 1; y", &mut ctx), @"(fun (y : _) => y) 1");
        insta::assert_snapshot!(show("if c then a else b", &mut ctx), @"ite c a b");
    }

    #[test]
    fn unknown_identifiers_follow_the_option() {
        let mut ctx = ElabContext::default();
        insta::assert_snapshot!(show("foo", &mut ctx), @"foo");
        ctx.options
            .insert(Name::parse("deferUnknown"), OptionValue::Bool(false));
        let err = translate("foo", &mut ctx).unwrap_err();
        assert_eq!(err.to_string(), "unknown identifier 'foo'");
    }

    #[test]
    fn universe_offsets_are_bounded() {
        let mut ctx = ElabContext::default();
        ctx.universes.insert(Name::parse("u"), Level::param("u"));
        insta::assert_snapshot!(show("Sort 32", &mut ctx), @"Type 31");
        let err = translate("Sort 100000", &mut ctx).unwrap_err();
        assert_eq!(err.code(), "F0902");
        let err = translate("Type (u+33)", &mut ctx).unwrap_err();
        assert_eq!(err.code(), "F0902");
        ctx.options
            .insert(Name::parse("maxUniverseOffset"), OptionValue::Nat(40));
        assert!(translate("Type (u+33)", &mut ctx).is_ok());
    }

    #[test]
    fn structure_instances_follow_field_order() {
        let mut ctx = ElabContext::default();
        ctx.structures.insert(
            Name::parse("Point"),
            StructureInfo {
                name: Name::parse("Point"),
                ctor: Name::parse("Point.mk"),
                num_params: 0,
                fields: vec![Name::parse("x"), Name::parse("y")],
                defaults: vec![],
            },
        );
        insta::assert_snapshot!(show("{ y := 2, x := 1 }", &mut ctx), @"Point.mk 1 2");
        insta::assert_snapshot!(show("fun p => { p with y := 0 }", &mut ctx), @"fun (p : _) => Point.mk p.x 0");
        let err = translate("{ z := 1 : Point }", &mut ctx).unwrap_err();
        assert_eq!(err.to_string(), "'z' is not a field of structure 'Point'");
    }

    #[test]
    fn match_binds_pattern_variables() {
        let mut ctx = ElabContext::default();
        let e = translate("match n with | 0 => a | Nat.succ k => k", &mut ctx).unwrap();
        let Expr::Annot(Annotation::PreEquations, app) = e.as_ref() else {
            panic!("expected pre-equations, got {}", e);
        };
        let Expr::Equations(eqns) = app.app_fn() else {
            panic!("expected equations");
        };
        assert_eq!(eqns.fns[0].name.to_string(), "_match_0");
        assert_eq!(eqns.equations.len(), 2);
        assert!(eqns.equations[0].vars.is_empty());
        assert_eq!(eqns.equations[1].vars[0].name.to_string(), "k");
        assert!(e.free_locals().is_empty());
    }
}
