//! Core pre-terms
//!
//! The frontend produces `Expr` values with named locals; binders carry their
//! own names so no index shifting happens while the elaborator builds terms.
//! Metadata that later passes need but that does not change meaning (source
//! positions, `let`/`have` markers, structure-instance shapes) rides in
//! `Expr::Annot` wrappers.

use crate::level::Level;
use crate::name::Name;
use std::fmt;
use std::rc::Rc;

/// Binder information (explicit, implicit, strict implicit, instance)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinderInfo {
    Default,
    Implicit,
    StrictImplicit,
    InstImplicit,
}

impl BinderInfo {
    fn brackets(self) -> (&'static str, &'static str) {
        match self {
            BinderInfo::Default => ("(", ")"),
            BinderInfo::Implicit => ("{", "}"),
            BinderInfo::StrictImplicit => ("⦃", "⦄"),
            BinderInfo::InstImplicit => ("[", "]"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Binder {
    pub name: Name,
    pub info: BinderInfo,
    pub ty: Rc<Expr>,
}

impl Binder {
    pub fn new(name: Name, info: BinderInfo, ty: Rc<Expr>) -> Self {
        Binder { name, info, ty }
    }

    pub fn explicit(name: Name, ty: Rc<Expr>) -> Self {
        Binder::new(name, BinderInfo::Default, ty)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Literal {
    Nat(u64),
    Str(String),
}

/// Byte range plus line/column of the syntax a term came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourcePos {
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub col: usize,
}

/// Shape of a `{ ... }` structure instance, kept for field defaulting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructInstanceInfo {
    /// Explicit `{ S . ... }` target, or the structure inferred from field names.
    pub structure: Option<Name>,
    /// Field names in the order their values are applied.
    pub fields: Vec<Name>,
    pub field_count: usize,
    /// `{ s with ... }`
    pub has_source: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Annotation {
    Position(SourcePos),
    /// `(fun x => body) value` that came from `let x := value; body`
    Let,
    Have,
    Show,
    /// `@f`
    Explicit,
    /// `@&e`
    Borrowed,
    /// `.(e)` in patterns
    Inaccessible,
    /// `⟨a, b, c⟩`; the head is a hole the kernel elaborator fills from the expected type.
    AnonymousConstructor { arity: usize },
    StructInstance(StructInstanceInfo),
    /// Application of an `Expr::Equations` to the match discriminants.
    PreEquations,
}

impl Annotation {
    pub fn tag_name(&self) -> &'static str {
        match self {
            Annotation::Position(_) => "pos",
            Annotation::Let => "let",
            Annotation::Have => "have",
            Annotation::Show => "show",
            Annotation::Explicit => "explicit",
            Annotation::Borrowed => "borrowed",
            Annotation::Inaccessible => "inaccessible",
            Annotation::AnonymousConstructor { .. } => "anonymous_constructor",
            Annotation::StructInstance(_) => "struct_instance",
            Annotation::PreEquations => "pre_equations",
        }
    }
}

/// Projection target: `e.1` (1-based in source, stored 0-based) or `e.field`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldRef {
    Index(usize),
    Named(Name),
}

/// One equation `f p_1 ... p_n => rhs`. `vars` binds the pattern variables.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Equation {
    pub fn_index: usize,
    pub vars: Vec<Binder>,
    pub patterns: Vec<Rc<Expr>>,
    pub rhs: Rc<Expr>,
}

/// A block of auxiliary functions defined by equations. The function
/// binders are in scope in every right-hand side.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Equations {
    pub fns: Vec<Binder>,
    pub equations: Vec<Equation>,
}

#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    Local(Name),
    Const(Name, Vec<Level>),
    Sort(Level),
    App(Rc<Expr>, Rc<Expr>),
    Lam(Binder, Rc<Expr>),
    Pi(Binder, Rc<Expr>),
    Lit(Literal),
    /// `_`, left for the kernel elaborator
    Hole,
    Proj(Rc<Expr>, FieldRef),
    /// `(e : T)`
    Ascribe(Rc<Expr>, Rc<Expr>),
    Annot(Annotation, Rc<Expr>),
    /// Overloaded identifier; the kernel elaborator picks one alternative.
    Choice(Vec<Rc<Expr>>),
    Equations(Rc<Equations>),
}

impl Expr {
    pub fn local(name: impl Into<Name>) -> Rc<Expr> {
        Rc::new(Expr::Local(name.into()))
    }

    pub fn constant(name: impl Into<Name>) -> Rc<Expr> {
        Rc::new(Expr::Const(name.into(), Vec::new()))
    }

    pub fn sort(level: Level) -> Rc<Expr> {
        Rc::new(Expr::Sort(level))
    }

    pub fn nat(n: u64) -> Rc<Expr> {
        Rc::new(Expr::Lit(Literal::Nat(n)))
    }

    pub fn hole() -> Rc<Expr> {
        Rc::new(Expr::Hole)
    }

    pub fn app(f: Rc<Expr>, a: Rc<Expr>) -> Rc<Expr> {
        Rc::new(Expr::App(f, a))
    }

    pub fn app_n(f: Rc<Expr>, args: impl IntoIterator<Item = Rc<Expr>>) -> Rc<Expr> {
        args.into_iter().fold(f, Expr::app)
    }

    pub fn lam(binder: Binder, body: Rc<Expr>) -> Rc<Expr> {
        Rc::new(Expr::Lam(binder, body))
    }

    pub fn pi(binder: Binder, body: Rc<Expr>) -> Rc<Expr> {
        Rc::new(Expr::Pi(binder, body))
    }

    /// Non-dependent arrow `a → b`. The binder is anonymous so it never captures.
    pub fn arrow(domain: Rc<Expr>, codomain: Rc<Expr>) -> Rc<Expr> {
        Expr::pi(Binder::explicit(Name::anonymous(), domain), codomain)
    }

    pub fn annotate(annotation: Annotation, e: Rc<Expr>) -> Rc<Expr> {
        Rc::new(Expr::Annot(annotation, e))
    }

    /// Wrap binders around `body` as lambdas, outermost first.
    pub fn lams(binders: &[Binder], body: Rc<Expr>) -> Rc<Expr> {
        binders
            .iter()
            .rev()
            .fold(body, |acc, b| Expr::lam(b.clone(), acc))
    }

    /// Wrap binders around `body` as pis, outermost first.
    pub fn pis(binders: &[Binder], body: Rc<Expr>) -> Rc<Expr> {
        binders
            .iter()
            .rev()
            .fold(body, |acc, b| Expr::pi(b.clone(), acc))
    }

    /// Skip position annotations.
    pub fn unwrap_position(&self) -> &Expr {
        let mut e = self;
        while let Expr::Annot(Annotation::Position(_), inner) = e {
            e = inner;
        }
        e
    }

    pub fn position(&self) -> Option<SourcePos> {
        match self {
            Expr::Annot(Annotation::Position(pos), _) => Some(*pos),
            _ => None,
        }
    }

    /// Head of an application spine, with position wrappers skipped.
    pub fn app_fn(&self) -> &Expr {
        let mut e = self.unwrap_position();
        while let Expr::App(f, _) = e {
            e = f.unwrap_position();
        }
        e
    }

    pub fn app_args(&self) -> Vec<Rc<Expr>> {
        let mut args = Vec::new();
        let mut e = self.unwrap_position();
        while let Expr::App(f, a) = e {
            args.push(a.clone());
            e = f.unwrap_position();
        }
        args.reverse();
        args
    }

    /// Split `Π (x : A) ..., B` into its leading binders and result.
    pub fn pi_telescope(&self) -> (Vec<Binder>, &Expr) {
        let mut binders = Vec::new();
        let mut e = self.unwrap_position();
        while let Expr::Pi(binder, body) = e {
            binders.push(binder.clone());
            e = body.unwrap_position();
        }
        (binders, e)
    }

    /// Rebuild the term bottom-up, giving `f` the first chance at every node.
    pub fn replace(self: &Rc<Self>, f: &mut dyn FnMut(&Rc<Expr>) -> Option<Rc<Expr>>) -> Rc<Expr> {
        if let Some(replaced) = f(self) {
            return replaced;
        }
        match self.as_ref() {
            Expr::Local(_) | Expr::Const(..) | Expr::Sort(_) | Expr::Lit(_) | Expr::Hole => {
                self.clone()
            }
            Expr::App(fun, arg) => Expr::app(fun.replace(f), arg.replace(f)),
            Expr::Lam(binder, body) => Expr::lam(replace_binder(binder, f), body.replace(f)),
            Expr::Pi(binder, body) => Expr::pi(replace_binder(binder, f), body.replace(f)),
            Expr::Proj(e, field) => Rc::new(Expr::Proj(e.replace(f), field.clone())),
            Expr::Ascribe(e, ty) => Rc::new(Expr::Ascribe(e.replace(f), ty.replace(f))),
            Expr::Annot(annotation, e) => Expr::annotate(annotation.clone(), e.replace(f)),
            Expr::Choice(alts) => Rc::new(Expr::Choice(alts.iter().map(|a| a.replace(f)).collect())),
            Expr::Equations(eqns) => {
                let fns = eqns.fns.iter().map(|b| replace_binder(b, f)).collect();
                let equations = eqns
                    .equations
                    .iter()
                    .map(|eq| Equation {
                        fn_index: eq.fn_index,
                        vars: eq.vars.iter().map(|b| replace_binder(b, f)).collect(),
                        patterns: eq.patterns.iter().map(|p| p.replace(f)).collect(),
                        rhs: eq.rhs.replace(f),
                    })
                    .collect();
                Rc::new(Expr::Equations(Rc::new(Equations { fns, equations })))
            }
        }
    }

    /// Drop every position annotation. Two terms that differ only in where
    /// they were written compare equal afterwards.
    pub fn erase_positions(self: &Rc<Self>) -> Rc<Expr> {
        self.replace(&mut |e| match e.as_ref() {
            Expr::Annot(Annotation::Position(_), inner) => Some(inner.erase_positions()),
            _ => None,
        })
    }

    /// Substitute `replacement` for free occurrences of the local `name`.
    pub fn instantiate_local(self: &Rc<Self>, name: &Name, replacement: &Rc<Expr>) -> Rc<Expr> {
        match self.as_ref() {
            Expr::Local(n) if n == name => replacement.clone(),
            Expr::Local(_) | Expr::Const(..) | Expr::Sort(_) | Expr::Lit(_) | Expr::Hole => {
                self.clone()
            }
            Expr::App(f, a) => Expr::app(
                f.instantiate_local(name, replacement),
                a.instantiate_local(name, replacement),
            ),
            Expr::Lam(binder, body) | Expr::Pi(binder, body) => {
                let new_binder = Binder {
                    ty: binder.ty.instantiate_local(name, replacement),
                    ..binder.clone()
                };
                let new_body = if &binder.name == name {
                    body.clone()
                } else {
                    body.instantiate_local(name, replacement)
                };
                match self.as_ref() {
                    Expr::Lam(..) => Expr::lam(new_binder, new_body),
                    _ => Expr::pi(new_binder, new_body),
                }
            }
            Expr::Proj(e, field) => {
                Rc::new(Expr::Proj(e.instantiate_local(name, replacement), field.clone()))
            }
            Expr::Ascribe(e, ty) => Rc::new(Expr::Ascribe(
                e.instantiate_local(name, replacement),
                ty.instantiate_local(name, replacement),
            )),
            Expr::Annot(annotation, e) => {
                Expr::annotate(annotation.clone(), e.instantiate_local(name, replacement))
            }
            Expr::Choice(alts) => Rc::new(Expr::Choice(
                alts.iter()
                    .map(|a| a.instantiate_local(name, replacement))
                    .collect(),
            )),
            Expr::Equations(eqns) => {
                if eqns.fns.iter().any(|b| &b.name == name) {
                    return self.clone();
                }
                let equations = eqns
                    .equations
                    .iter()
                    .map(|eq| {
                        if eq.vars.iter().any(|b| &b.name == name) {
                            eq.clone()
                        } else {
                            Equation {
                                rhs: eq.rhs.instantiate_local(name, replacement),
                                ..eq.clone()
                            }
                        }
                    })
                    .collect();
                Rc::new(Expr::Equations(Rc::new(Equations {
                    fns: eqns.fns.clone(),
                    equations,
                })))
            }
        }
    }

    /// Free locals in first-occurrence order.
    pub fn free_locals(&self) -> Vec<Name> {
        let mut out = Vec::new();
        let mut bound = Vec::new();
        self.collect_free_locals(&mut bound, &mut out);
        out
    }

    pub fn has_free_local(&self, name: &Name) -> bool {
        self.free_locals().contains(name)
    }

    fn collect_free_locals(&self, bound: &mut Vec<Name>, out: &mut Vec<Name>) {
        match self {
            Expr::Local(n) => {
                if !bound.contains(n) && !out.contains(n) {
                    out.push(n.clone());
                }
            }
            Expr::Const(..) | Expr::Sort(_) | Expr::Lit(_) | Expr::Hole => {}
            Expr::App(f, a) => {
                f.collect_free_locals(bound, out);
                a.collect_free_locals(bound, out);
            }
            Expr::Lam(binder, body) | Expr::Pi(binder, body) => {
                binder.ty.collect_free_locals(bound, out);
                bound.push(binder.name.clone());
                body.collect_free_locals(bound, out);
                bound.pop();
            }
            Expr::Proj(e, _) | Expr::Annot(_, e) => e.collect_free_locals(bound, out),
            Expr::Ascribe(e, ty) => {
                e.collect_free_locals(bound, out);
                ty.collect_free_locals(bound, out);
            }
            Expr::Choice(alts) => {
                for alt in alts {
                    alt.collect_free_locals(bound, out);
                }
            }
            Expr::Equations(eqns) => {
                for b in &eqns.fns {
                    b.ty.collect_free_locals(bound, out);
                }
                let mark = bound.len();
                bound.extend(eqns.fns.iter().map(|b| b.name.clone()));
                for eq in &eqns.equations {
                    let inner = bound.len();
                    for var in &eq.vars {
                        var.ty.collect_free_locals(bound, out);
                        bound.push(var.name.clone());
                    }
                    for p in &eq.patterns {
                        p.collect_free_locals(bound, out);
                    }
                    eq.rhs.collect_free_locals(bound, out);
                    bound.truncate(inner);
                }
                bound.truncate(mark);
            }
        }
    }

    /// Constants referenced anywhere in the term, first occurrence first.
    pub fn constants(&self) -> Vec<Name> {
        let mut out = Vec::new();
        self.visit(&mut |e| {
            if let Expr::Const(n, _) = e {
                if !out.contains(n) {
                    out.push(n.clone());
                }
            }
        });
        out
    }

    /// Universe parameters mentioned in sorts and constant instances.
    pub fn level_params(&self) -> Vec<Name> {
        let mut out = Vec::new();
        self.visit(&mut |e| match e {
            Expr::Sort(l) => l.collect_params(&mut out),
            Expr::Const(_, ls) => {
                for l in ls {
                    l.collect_params(&mut out);
                }
            }
            _ => {}
        });
        out
    }

    pub fn contains_choice(&self) -> bool {
        let mut found = false;
        self.visit(&mut |e| found |= matches!(e, Expr::Choice(_)));
        found
    }

    /// Pre-order traversal over every subterm, including binder types.
    pub fn visit(&self, f: &mut dyn FnMut(&Expr)) {
        f(self);
        match self {
            Expr::Local(_) | Expr::Const(..) | Expr::Sort(_) | Expr::Lit(_) | Expr::Hole => {}
            Expr::App(a, b) | Expr::Ascribe(a, b) => {
                a.visit(f);
                b.visit(f);
            }
            Expr::Lam(binder, body) | Expr::Pi(binder, body) => {
                binder.ty.visit(f);
                body.visit(f);
            }
            Expr::Proj(e, _) | Expr::Annot(_, e) => e.visit(f),
            Expr::Choice(alts) => alts.iter().for_each(|a| a.visit(f)),
            Expr::Equations(eqns) => {
                for b in &eqns.fns {
                    b.ty.visit(f);
                }
                for eq in &eqns.equations {
                    for var in &eq.vars {
                        var.ty.visit(f);
                    }
                    eq.patterns.iter().for_each(|p| p.visit(f));
                    eq.rhs.visit(f);
                }
            }
        }
    }
}

fn replace_binder(binder: &Binder, f: &mut dyn FnMut(&Rc<Expr>) -> Option<Rc<Expr>>) -> Binder {
    Binder {
        ty: binder.ty.replace(f),
        ..binder.clone()
    }
}

// =============================================================================
// Printing
// =============================================================================

const PREC_TOP: u8 = 0;
const PREC_ARROW: u8 = 1;
const PREC_APP: u8 = 2;
const PREC_ARG: u8 = 3;

fn fmt_sort(level: &Level, f: &mut fmt::Formatter<'_>, prec: u8) -> fmt::Result {
    let text = match level {
        Level::Zero => return write!(f, "Prop"),
        Level::Succ(inner) if **inner == Level::Zero => return write!(f, "Type"),
        Level::Succ(inner) => format!("Type {}", LevelArg(inner)),
        other => format!("Sort {}", LevelArg(other)),
    };
    if prec >= PREC_ARG {
        write!(f, "({})", text)
    } else {
        write!(f, "{}", text)
    }
}

struct LevelArg<'a>(&'a Level);

impl fmt::Display for LevelArg<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.to_offset() {
            (Level::Zero, _) | (Level::Param(_), 0) | (Level::Hole, 0) => write!(f, "{}", self.0),
            _ => write!(f, "({})", self.0),
        }
    }
}

fn fmt_expr(e: &Expr, f: &mut fmt::Formatter<'_>, prec: u8) -> fmt::Result {
    match e {
        Expr::Local(n) => write!(f, "{}", n),
        Expr::Const(n, levels) if levels.is_empty() => write!(f, "{}", n),
        Expr::Const(n, levels) => {
            let rendered: Vec<String> = levels.iter().map(|l| l.to_string()).collect();
            write!(f, "{}.{{{}}}", n, rendered.join(", "))
        }
        Expr::Sort(level) => fmt_sort(level, f, prec),
        Expr::Lit(Literal::Nat(n)) => write!(f, "{}", n),
        Expr::Lit(Literal::Str(s)) => write!(f, "{:?}", s),
        Expr::Hole => write!(f, "_"),
        Expr::App(..) => {
            if prec >= PREC_ARG {
                write!(f, "(")?;
            }
            let head = app_head(e);
            fmt_expr(head, f, PREC_APP)?;
            for arg in e.app_args() {
                write!(f, " ")?;
                fmt_expr(&arg, f, PREC_ARG)?;
            }
            if prec >= PREC_ARG {
                write!(f, ")")?;
            }
            Ok(())
        }
        Expr::Lam(..) => {
            if prec > PREC_TOP {
                write!(f, "(")?;
            }
            write!(f, "fun")?;
            let mut body = e;
            while let Expr::Lam(binder, inner) = body {
                let (open, close) = binder.info.brackets();
                write!(f, " {}{} : {}{}", open, binder.name, binder.ty, close)?;
                body = inner;
            }
            write!(f, " => ")?;
            fmt_expr(body, f, PREC_TOP)?;
            if prec > PREC_TOP {
                write!(f, ")")?;
            }
            Ok(())
        }
        Expr::Pi(binder, body) => {
            if prec > PREC_ARROW {
                write!(f, "(")?;
            }
            if binder.info == BinderInfo::Default && !body.has_free_local(&binder.name) {
                fmt_expr(&binder.ty, f, PREC_APP)?;
            } else {
                let (open, close) = binder.info.brackets();
                write!(f, "{}{} : {}{}", open, binder.name, binder.ty, close)?;
            }
            write!(f, " → ")?;
            fmt_expr(body, f, PREC_ARROW)?;
            if prec > PREC_ARROW {
                write!(f, ")")?;
            }
            Ok(())
        }
        Expr::Proj(inner, field) => {
            fmt_expr(inner, f, PREC_ARG)?;
            match field {
                FieldRef::Index(i) => write!(f, ".{}", i + 1),
                FieldRef::Named(n) => write!(f, ".{}", n),
            }
        }
        Expr::Ascribe(inner, ty) => write!(f, "({} : {})", inner, ty),
        Expr::Annot(Annotation::Explicit, inner) => {
            write!(f, "@")?;
            fmt_expr(inner, f, PREC_ARG)
        }
        Expr::Annot(Annotation::Borrowed, inner) => {
            write!(f, "@&")?;
            fmt_expr(inner, f, PREC_ARG)
        }
        Expr::Annot(Annotation::Inaccessible, inner) => write!(f, ".({})", inner),
        Expr::Annot(_, inner) => fmt_expr(inner, f, prec),
        Expr::Choice(alts) => {
            let rendered: Vec<String> = alts.iter().map(|a| a.to_string()).collect();
            write!(f, "choice[{}]", rendered.join(" | "))
        }
        Expr::Equations(eqns) => {
            write!(f, "equations {{")?;
            for eq in &eqns.equations {
                write!(f, " | ")?;
                match eqns.fns.get(eq.fn_index) {
                    Some(b) => write!(f, "{}", b.name)?,
                    None => write!(f, "?")?,
                }
                for p in &eq.patterns {
                    write!(f, " ")?;
                    fmt_expr(p, f, PREC_ARG)?;
                }
                write!(f, " => {}", eq.rhs)?;
            }
            write!(f, " }}")
        }
    }
}

fn app_head(e: &Expr) -> &Expr {
    let mut head = e;
    while let Expr::App(f, _) = head.unwrap_position() {
        head = f;
    }
    head
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_expr(self, f, PREC_TOP)
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Local(n) => write!(f, "Local({})", n),
            Expr::Const(n, ls) => write!(f, "Const({}, {:?})", n, ls),
            Expr::Sort(l) => write!(f, "Sort({})", l),
            Expr::App(a, b) => write!(f, "App({:?}, {:?})", a, b),
            Expr::Lam(b, body) => write!(f, "Lam({}, {:?}, {:?}, {:?})", b.name, b.info, b.ty, body),
            Expr::Pi(b, body) => write!(f, "Pi({}, {:?}, {:?}, {:?})", b.name, b.info, b.ty, body),
            Expr::Lit(l) => write!(f, "Lit({:?})", l),
            Expr::Hole => write!(f, "Hole"),
            Expr::Proj(e, field) => write!(f, "Proj({:?}, {:?})", e, field),
            Expr::Ascribe(e, ty) => write!(f, "Ascribe({:?}, {:?})", e, ty),
            Expr::Annot(a, e) => write!(f, "Annot({}, {:?})", a.tag_name(), e),
            Expr::Choice(alts) => write!(f, "Choice({:?})", alts),
            Expr::Equations(eqns) => write!(f, "Equations({:?})", eqns),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(start: usize) -> SourcePos {
        SourcePos {
            start,
            end: start + 1,
            line: 1,
            col: start,
        }
    }

    #[test]
    fn app_spine_skips_positions() {
        let f = Expr::annotate(Annotation::Position(pos(0)), Expr::constant("f"));
        let e = Expr::app_n(f, [Expr::nat(1), Expr::local("x")]);
        assert_eq!(e.app_fn(), &Expr::Const(Name::parse("f"), vec![]));
        assert_eq!(e.app_args().len(), 2);
        assert_eq!(e.to_string(), "f 1 x");
    }

    #[test]
    fn erase_positions_makes_terms_comparable() {
        let a = Expr::app(
            Expr::annotate(Annotation::Position(pos(3)), Expr::constant("Nat.succ")),
            Expr::annotate(Annotation::Position(pos(9)), Expr::nat(0)),
        );
        let b = Expr::app(Expr::constant("Nat.succ"), Expr::nat(0));
        assert_ne!(a, b);
        assert_eq!(a.erase_positions(), b);
    }

    #[test]
    fn free_locals_respect_binders() {
        let nat = Expr::constant("Nat");
        let body = Expr::app(Expr::local("x"), Expr::local("y"));
        let lam = Expr::lam(Binder::explicit(Name::parse("x"), nat), body);
        assert_eq!(lam.free_locals(), vec![Name::parse("y")]);
    }

    #[test]
    fn instantiate_stops_at_shadowing_binder() {
        let nat = Expr::constant("Nat");
        let inner = Expr::lam(Binder::explicit(Name::parse("x"), nat.clone()), Expr::local("x"));
        let e = Expr::app(Expr::local("x"), inner);
        let out = e.instantiate_local(&Name::parse("x"), &Expr::nat(7));
        assert_eq!(out.to_string(), "7 (fun (x : Nat) => x)");
    }

    #[test]
    fn arrows_print_without_binder_names() {
        let nat = Expr::constant("Nat");
        let ty = Expr::arrow(nat.clone(), Expr::arrow(nat.clone(), nat));
        assert_eq!(ty.to_string(), "Nat → Nat → Nat");
        let dependent = Expr::pi(
            Binder::new(Name::parse("α"), BinderInfo::Implicit, Expr::sort(Level::of_nat(1))),
            Expr::arrow(Expr::local("α"), Expr::local("α")),
        );
        assert_eq!(dependent.to_string(), "{α : Type} → α → α");
    }
}
