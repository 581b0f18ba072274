//! Declaration elaboration
//!
//! Each declaration form is normalized into one kernel `Declaration`:
//! definitions, theorems, abbreviations, instances and examples become
//! `Definition`s, inductive families and structures become an
//! `InductiveBlock`, axioms an `Axiom`. Section variables a declaration
//! mentions are prepended as leading binders. Recursive and equation-style
//! bodies are packaged as a pre-equations block whose function binders are
//! `@`-prefixed locals, left for the equation compiler.

use crate::elab::{Attribute, Elab, ElabContext, ElabError, ElabResult, StructureInfo};
use crate::surface::{Span, Syntax, SyntaxKind};
use crate::translate::Translator;
use kernel::{
    Annotation, Axiom, Binder, BinderInfo, Constructor, Declaration, Definition, DefinitionKind,
    Equation, Equations, Expr, FieldRef, InductiveBlock, InductiveType, Level, Name,
};
use std::rc::Rc;
use tracing::debug;

/// Attributes the elaborator accepts; anything else is rejected up front.
pub const BUILTIN_ATTRIBUTES: &[&str] = &[
    "class",
    "default_instance",
    "deprecated",
    "elab_as_elim",
    "export",
    "ext",
    "extern",
    "implemented_by",
    "inline",
    "instance",
    "irreducible",
    "macro_inline",
    "match_pattern",
    "noinline",
    "reducible",
    "semireducible",
    "simp",
    "specialize",
];

// =============================================================================
// Modifiers and names
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Regular,
    Private,
    Protected,
}

#[derive(Debug, Clone, Default)]
pub struct Modifiers {
    pub attrs: Vec<Attribute>,
    pub visibility: Visibility,
    pub noncomputable: bool,
    pub meta: bool,
}

impl Modifiers {
    fn from_syntax(stx: &Syntax) -> ElabResult<Self> {
        let [attrs, visibility, noncomputable, meta] = stx.args() else {
            return Err(ElabError::malformed("declaration modifiers", stx));
        };
        let attrs = match attrs.present() {
            Some(list) => attributes(list)?,
            None => Vec::new(),
        };
        let visibility = match visibility.as_atom() {
            Some("private") => Visibility::Private,
            Some("protected") => Visibility::Protected,
            _ => Visibility::Regular,
        };
        Ok(Modifiers {
            attrs,
            visibility,
            noncomputable: !noncomputable.is_missing(),
            meta: !meta.is_missing(),
        })
    }
}

/// Validate a `decl.attrs` list.
pub fn attributes(stx: &Syntax) -> ElabResult<Vec<Attribute>> {
    stx.args()
        .iter()
        .map(|attr| {
            let [name, args @ ..] = attr.args() else {
                return Err(ElabError::malformed("attribute", attr));
            };
            let id = name
                .as_ident()
                .ok_or_else(|| ElabError::malformed("attribute", attr))?;
            if !BUILTIN_ATTRIBUTES.contains(&id.to_string().as_str()) {
                return Err(ElabError::UnknownAttribute {
                    name: id.clone(),
                    span: name.span,
                });
            }
            Ok(Attribute {
                name: id.clone(),
                args: args.iter().map(Syntax::pretty_print).collect(),
            })
        })
        .collect()
}

fn implied_attribute(name: &str) -> Attribute {
    Attribute {
        name: Name::parse(name),
        args: Vec::new(),
    }
}

/// The name users write (`visible`) and the one the kernel stores. They
/// differ only for private declarations.
#[derive(Debug, Clone)]
struct DeclName {
    visible: Name,
    kernel: Name,
}

impl DeclName {
    fn declare(ctx: &mut ElabContext, raw: &Name, visibility: Visibility, span: Span) -> ElabResult<Self> {
        let visible = ctx.qualify(raw);
        if ctx.is_declared(&visible) {
            return Err(ElabError::AlreadyDeclared {
                name: visible,
                span,
            });
        }
        let kernel = if visibility == Visibility::Private {
            let index = ctx.next_private_index();
            Name::parse("_private")
                .push(&index.to_string())
                .append(&visible)
        } else {
            visible.clone()
        };
        Ok(DeclName { visible, kernel })
    }

    fn child(&self, short: &Name) -> DeclName {
        DeclName {
            visible: self.visible.append(short),
            kernel: self.kernel.append(short),
        }
    }

    /// Make an admitted declaration reachable under its visible name.
    fn publish(&self, ctx: &mut ElabContext, visibility: Visibility) {
        if self.kernel != self.visible {
            ctx.add_alias(self.visible.clone(), self.kernel.clone());
        }
        if visibility == Visibility::Protected {
            ctx.protected.insert(self.kernel.clone());
        }
        ctx.register_namespace(&self.visible.prefix());
    }

    fn record_attributes(&self, ctx: &mut ElabContext, mods: &Modifiers, implied: &[&str]) {
        for name in implied {
            ctx.add_attribute(&self.kernel, implied_attribute(name));
        }
        for attr in &mods.attrs {
            ctx.add_attribute(&self.kernel, attr.clone());
        }
    }
}

fn recursive_local(name: &Name) -> Name {
    Name::from_components([format!("@{}", name)])
}

// =============================================================================
// Shared header
// =============================================================================

/// `modifiers name .{univs} binders` common to every declaration form, and
/// the form-specific children after it.
struct Header<'s> {
    kind: &'s str,
    span: Span,
    mods: Modifiers,
    name: &'s Syntax,
    univs: Option<Vec<Name>>,
    binders: &'s [Syntax],
    rest: &'s [Syntax],
}

impl<'s> Header<'s> {
    fn parse(stx: &'s Syntax) -> ElabResult<Self> {
        let kind = stx
            .node_kind()
            .ok_or_else(|| ElabError::malformed("declaration", stx))?;
        let [mods, name, univs, binders, rest @ ..] = stx.args() else {
            return Err(ElabError::malformed("declaration", stx));
        };
        let univs = match univs.present() {
            Some(list) => Some(
                list.args()
                    .iter()
                    .map(|u| {
                        u.as_ident()
                            .cloned()
                            .ok_or_else(|| ElabError::malformed("universe parameter", u))
                    })
                    .collect::<ElabResult<Vec<_>>>()?,
            ),
            None => None,
        };
        Ok(Header {
            kind: kind.trim_start_matches("command."),
            span: stx.span,
            mods: Modifiers::from_syntax(mods)?,
            name,
            univs,
            binders: binders.args(),
            rest,
        })
    }

    fn ident(&self) -> ElabResult<&'s Name> {
        self.name
            .as_ident()
            .ok_or_else(|| ElabError::malformed(self.kind, self.name))
    }

    fn declare(&self, ctx: &mut ElabContext) -> ElabResult<DeclName> {
        DeclName::declare(ctx, self.ident()?, self.mods.visibility, self.name.span)
    }
}

// =============================================================================
// Section variables and universes
// =============================================================================

/// Translate every section variable in order, leaving them in scope.
pub(crate) fn push_section_vars(tr: &mut Translator<'_>) -> ElabResult<Vec<Binder>> {
    let vars = tr.ctx().vars.clone();
    let mut binders: Vec<Binder> = Vec::with_capacity(vars.len());
    for var in &vars {
        let ty = match tr.term(&var.ty) {
            Ok(ty) => ty,
            Err(err) => {
                tr.pop_locals(binders.len());
                return Err(err);
            }
        };
        let core = tr.push_local(&var.name, &[]);
        binders.push(Binder::new(core, var.info, ty));
    }
    Ok(binders)
}

/// The variables `terms` need: those they mention, those the types of
/// included variables mention, and instance variables whose types only
/// mention included ones. Declaration order is kept.
pub(crate) fn used_vars(vars: &[Binder], terms: &[&Rc<Expr>]) -> Vec<Binder> {
    let index = |name: &Name| vars.iter().rposition(|b| &b.name == name);
    let mut used = vec![false; vars.len()];
    for term in terms {
        for local in term.free_locals() {
            if let Some(i) = index(&local) {
                used[i] = true;
            }
        }
    }
    loop {
        let mut changed = false;
        for (i, var) in vars.iter().enumerate() {
            let deps = var.ty.free_locals();
            if used[i] {
                for dep in &deps {
                    if let Some(j) = index(dep) {
                        if j != i && !used[j] {
                            used[j] = true;
                            changed = true;
                        }
                    }
                }
            } else if var.info == BinderInfo::InstImplicit
                && !deps.is_empty()
                && deps.iter().all(|d| index(d).is_some_and(|j| used[j]))
            {
                used[i] = true;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    vars.iter()
        .zip(used)
        .filter(|(_, u)| *u)
        .map(|(b, _)| b.clone())
        .collect()
}

/// Explicit `.{u v}` parameters, or every universe the terms mention in
/// order of first occurrence.
fn universe_params(explicit: &Option<Vec<Name>>, terms: &[&Rc<Expr>]) -> Vec<Name> {
    if let Some(params) = explicit {
        return params.clone();
    }
    let mut out: Vec<Name> = Vec::new();
    for term in terms {
        for param in term.level_params() {
            if !out.contains(&param) {
                out.push(param);
            }
        }
    }
    out
}

fn implicit(binders: &[Binder]) -> Vec<Binder> {
    binders
        .iter()
        .map(|b| Binder::new(b.name.clone(), BinderInfo::Implicit, b.ty.clone()))
        .collect()
}

fn locals_of(binders: &[Binder]) -> Vec<Rc<Expr>> {
    binders.iter().map(|b| Expr::local(b.name.clone())).collect()
}

/// Head constant of the result of a (possibly dependent) function type.
fn head_constant(ty: &Expr) -> Option<Name> {
    let (_, result) = ty.pi_telescope();
    match result.app_fn() {
        Expr::Const(name, _) => Some(name.clone()),
        _ => None,
    }
}

/// Apply every occurrence of the block's own constants to the section
/// variables the block was given as extra leading parameters.
fn apply_to_vars(e: &Rc<Expr>, block: &[Name], vars: &[Binder]) -> Rc<Expr> {
    if vars.is_empty() {
        return e.clone();
    }
    let args = locals_of(vars);
    e.replace(&mut |sub| match sub.as_ref() {
        Expr::Const(name, _) if block.contains(name) => Some(Expr::app_n(sub.clone(), args.clone())),
        _ => None,
    })
}

// =============================================================================
// Definitions
// =============================================================================

fn definition_kind(kind: &str) -> Option<DefinitionKind> {
    match kind {
        "command.def" => Some(DefinitionKind::Def),
        "command.theorem" => Some(DefinitionKind::Theorem),
        "command.abbrev" => Some(DefinitionKind::Abbrev),
        "command.instance" => Some(DefinitionKind::Instance),
        "command.example" => Some(DefinitionKind::Example),
        _ => None,
    }
}

fn implied_attributes(kind: DefinitionKind) -> &'static [&'static str] {
    match kind {
        DefinitionKind::Abbrev => &["inline", "reducible"],
        DefinitionKind::Instance => &["instance"],
        _ => &[],
    }
}

/// Strip leading binders off a type written in surface syntax.
fn result_type(mut ty: &Syntax) -> &Syntax {
    loop {
        match (ty.node_kind(), ty.args()) {
            (Some("term.pi"), [.., body]) | (Some("term.arrow"), [_, body]) => ty = body,
            _ => return ty,
        }
    }
}

fn collect_heads(stx: &Syntax, out: &mut String) {
    match &stx.kind {
        SyntaxKind::Ident(name) => {
            if let Some(last) = name.last() {
                if last.starts_with(char::is_uppercase) {
                    out.push_str(last);
                }
            }
        }
        SyntaxKind::Node(kind, args) if kind == "term.app" => {
            for arg in args {
                collect_heads(arg, out);
            }
        }
        SyntaxKind::Node(kind, args) if kind == "term.explicitUniv" => {
            if let Some(head) = args.first() {
                collect_heads(head, out);
            }
        }
        _ => {}
    }
}

/// `inst` followed by the capitalized constants of the instance's class
/// application, e.g. `instAddNat`; numbered when already taken.
fn instance_name(ctx: &ElabContext, ty: &Syntax) -> Name {
    let mut base = String::from("inst");
    if let Some(ty) = ty.present() {
        collect_heads(result_type(ty), &mut base);
    }
    let mut name = Name::parse(&base);
    let mut suffix = 1;
    while ctx.is_declared(&ctx.qualify(&name)) {
        name = Name::parse(&format!("{}_{}", base, suffix));
        suffix += 1;
    }
    name
}

struct DefInput<'s> {
    header: Header<'s>,
    kind: DefinitionKind,
    names: DeclName,
    ty: &'s Syntax,
    body: &'s Syntax,
}

fn prepare_definition<'s>(ctx: &mut ElabContext, stx: &'s Syntax) -> ElabResult<DefInput<'s>> {
    let header = Header::parse(stx)?;
    let kind = stx
        .node_kind()
        .and_then(definition_kind)
        .ok_or_else(|| ElabError::malformed("definition", stx))?;
    let [ty, body] = header.rest else {
        return Err(ElabError::malformed(header.kind, stx));
    };
    if kind == DefinitionKind::Theorem && ty.is_missing() {
        return Err(ElabError::invalid(
            "theorem declarations must have a type",
            header.span,
        ));
    }
    let names = match kind {
        DefinitionKind::Example => {
            let name = Name::parse("_example");
            DeclName {
                visible: name.clone(),
                kernel: name,
            }
        }
        DefinitionKind::Instance if header.name.is_missing() => {
            let raw = instance_name(ctx, ty);
            DeclName::declare(ctx, &raw, header.mods.visibility, header.span)?
        }
        _ => header.declare(ctx)?,
    };
    Ok(DefInput {
        header,
        kind,
        names,
        ty,
        body,
    })
}

/// Value of one member: the plain term, or a pre-equations block when the
/// body is written as equations or refers back to a member of its block.
fn body_value(
    tr: &mut Translator<'_>,
    input: &DefInput<'_>,
    index: usize,
    fns: &[Binder],
) -> ElabResult<Rc<Expr>> {
    let equations = match input.body.node_kind() {
        Some("decl.val") => {
            let [value] = input.body.args() else {
                return Err(ElabError::malformed("definition body", input.body));
            };
            let value = tr.term(value)?;
            let recursive = value
                .free_locals()
                .iter()
                .any(|l| fns.iter().any(|f| &f.name == l));
            if !recursive {
                return Ok(value);
            }
            vec![Equation {
                fn_index: index,
                vars: Vec::new(),
                patterns: Vec::new(),
                rhs: value,
            }]
        }
        Some("decl.eqns") => {
            let alts = input.body.args();
            let arity = alts
                .first()
                .and_then(|alt| alt.args().first())
                .map(|pats| pats.args().len());
            alts.iter()
                .map(|alt| tr.equation(alt, index, arity))
                .collect::<ElabResult<Vec<_>>>()?
        }
        _ => return Err(ElabError::malformed("definition body", input.body)),
    };
    let block = Equations {
        fns: fns.to_vec(),
        equations,
    };
    Ok(Expr::annotate(
        Annotation::PreEquations,
        Rc::new(Expr::Equations(Rc::new(block))),
    ))
}

fn translate_definitions(ctx: &mut ElabContext, inputs: &[DefInput<'_>]) -> ElabResult<Vec<Definition>> {
    let mut tr = Translator::new(ctx);
    let vars = push_section_vars(&mut tr)?;

    let recursive: Vec<Name> = inputs
        .iter()
        .map(|input| recursive_local(&input.names.visible))
        .collect();
    for (input, local) in inputs.iter().zip(&recursive) {
        if input.kind != DefinitionKind::Example {
            tr.add_self_ref(input.names.visible.clone(), Expr::local(local.clone()));
        }
    }

    // Signatures first, so every body sees every member's type.
    let mut fns = Vec::with_capacity(inputs.len());
    for (input, local) in inputs.iter().zip(&recursive) {
        tr.set_univ_params(input.header.univs.clone().unwrap_or_default());
        let params = tr.binder_groups(input.header.binders)?;
        let ty = match input.ty.present() {
            Some(t) => tr.term(t),
            None => Ok(Expr::hole()),
        };
        tr.pop_locals(params.len());
        fns.push(Binder::explicit(local.clone(), Expr::pis(&params, ty?)));
    }

    let mut defs = Vec::with_capacity(inputs.len());
    for (index, input) in inputs.iter().enumerate() {
        tr.set_univ_params(input.header.univs.clone().unwrap_or_default());
        let params = tr.binder_groups(input.header.binders)?;
        let ty = match input.ty.present() {
            Some(t) => tr.term(t),
            None => Ok(Expr::hole()),
        };
        let value = ty.and_then(|ty| {
            tr.set_struct_hint(head_constant(&ty));
            let value = body_value(&mut tr, input, index, &fns);
            tr.set_struct_hint(None);
            value.map(|value| (ty, value))
        });
        tr.pop_locals(params.len());
        let (ty, value) = value?;

        let ty = Expr::pis(&params, ty);
        let value = Expr::lams(&params, value);
        let used = used_vars(&vars, &[&ty, &value]);
        let ty = Expr::pis(&used, ty);
        let value = Expr::lams(&used, value);
        let univ_params = universe_params(&input.header.univs, &[&ty, &value]);
        defs.push(Definition {
            name: input.names.kernel.clone(),
            univ_params,
            ty,
            value,
            kind: input.kind,
            noncomputable: input.header.mods.noncomputable,
        });
    }
    Ok(defs)
}

fn elab_definitions(elab: &mut Elab<'_>, stxs: &[&Syntax], span: Span) -> ElabResult<()> {
    let inputs = stxs
        .iter()
        .map(|stx| prepare_definition(elab.ctx, stx))
        .collect::<ElabResult<Vec<_>>>()?;
    let mut defs = translate_definitions(elab.ctx, &inputs)?;
    let decl = if defs.len() == 1 {
        Declaration::Definition(defs.remove(0))
    } else {
        Declaration::Mutual(defs)
    };
    elab.admit(decl, span)?;
    for input in &inputs {
        if input.kind == DefinitionKind::Example {
            continue;
        }
        input.names.publish(elab.ctx, input.header.mods.visibility);
        input
            .names
            .record_attributes(elab.ctx, &input.header.mods, implied_attributes(input.kind));
        debug!(name = %input.names.kernel, kind = input.kind.keyword(), "declaration admitted");
    }
    Ok(())
}

// =============================================================================
// Axioms
// =============================================================================

fn elab_axiom(elab: &mut Elab<'_>, stx: &Syntax) -> ElabResult<()> {
    let header = Header::parse(stx)?;
    let [ty] = header.rest else {
        return Err(ElabError::malformed("axiom", stx));
    };
    let names = header.declare(elab.ctx)?;
    let ty = {
        let mut tr = Translator::new(elab.ctx);
        tr.set_univ_params(header.univs.clone().unwrap_or_default());
        let vars = push_section_vars(&mut tr)?;
        let params = tr.binder_groups(header.binders)?;
        let ty = Expr::pis(&params, tr.term(ty)?);
        Expr::pis(&used_vars(&vars, &[&ty]), ty)
    };
    let univ_params = universe_params(&header.univs, &[&ty]);
    elab.admit(
        Declaration::Axiom(Axiom {
            name: names.kernel.clone(),
            univ_params,
            ty,
        }),
        stx.span,
    )?;
    names.publish(elab.ctx, header.mods.visibility);
    names.record_attributes(elab.ctx, &header.mods, &[]);
    debug!(name = %names.kernel, "axiom admitted");
    Ok(())
}

// =============================================================================
// Inductive families
// =============================================================================

struct InductiveInput<'s> {
    header: Header<'s>,
    names: DeclName,
    ctor_names: Vec<DeclName>,
    ty: &'s Syntax,
    ctors: &'s [Syntax],
}

fn prepare_inductive<'s>(ctx: &mut ElabContext, stx: &'s Syntax) -> ElabResult<InductiveInput<'s>> {
    let header = Header::parse(stx)?;
    let [ty, ctors @ ..] = header.rest else {
        return Err(ElabError::malformed("inductive", stx));
    };
    let names = header.declare(ctx)?;
    let mut ctor_names: Vec<DeclName> = Vec::with_capacity(ctors.len());
    for ctor in ctors {
        let short = ctor
            .args()
            .first()
            .and_then(Syntax::as_ident)
            .ok_or_else(|| ElabError::malformed("constructor", ctor))?;
        let name = names.child(short);
        if ctor_names.iter().any(|c| c.kernel == name.kernel) {
            return Err(ElabError::AlreadyDeclared {
                name: name.visible,
                span: ctor.span,
            });
        }
        ctor_names.push(name);
    }
    Ok(InductiveInput {
        header,
        names,
        ctor_names,
        ty,
        ctors,
    })
}

fn inductive_block(ctx: &mut ElabContext, inputs: &[InductiveInput<'_>]) -> ElabResult<InductiveBlock> {
    let explicit: Option<Vec<Name>> = inputs
        .iter()
        .filter_map(|i| i.header.univs.as_ref())
        .fold(None, |acc: Option<Vec<Name>>, univs| {
            let mut all = acc.unwrap_or_default();
            for u in univs {
                if !all.contains(u) {
                    all.push(u.clone());
                }
            }
            Some(all)
        });

    let mut tr = Translator::new(ctx);
    tr.set_univ_params(explicit.clone().unwrap_or_default());
    let vars = push_section_vars(&mut tr)?;
    for input in inputs {
        tr.add_self_ref(
            input.names.visible.clone(),
            Expr::constant(input.names.kernel.clone()),
        );
    }

    let mut num_params: Option<usize> = None;
    let mut types = Vec::with_capacity(inputs.len());
    for input in inputs {
        let params = tr.binder_groups(input.header.binders)?;
        match num_params {
            Some(n) if n != params.len() => {
                return Err(ElabError::invalid(
                    "mutually inductive types must have the same number of parameters",
                    input.header.span,
                ));
            }
            _ => num_params = Some(params.len()),
        }
        let sort = match input.ty.present() {
            Some(t) => tr.term(t)?,
            None => Expr::sort(Level::of_nat(1)),
        };
        let applied = Expr::app_n(
            Expr::constant(input.names.kernel.clone()),
            locals_of(&params),
        );
        let implicit_params = implicit(&params);

        let mut ctors = Vec::with_capacity(input.ctors.len());
        for (ctor, name) in input.ctors.iter().zip(&input.ctor_names) {
            let [_, binders, result] = ctor.args() else {
                return Err(ElabError::malformed("constructor", ctor));
            };
            let fields = tr.binder_groups(binders.args())?;
            let result = match result.present() {
                Some(t) => tr.term(t),
                None => Ok(applied.clone()),
            };
            tr.pop_locals(fields.len());
            ctors.push(Constructor {
                name: name.kernel.clone(),
                ty: Expr::pis(&implicit_params, Expr::pis(&fields, result?)),
            });
        }
        tr.pop_locals(params.len());
        types.push(InductiveType {
            name: input.names.kernel.clone(),
            ty: Expr::pis(&params, sort),
            ctors,
        });
    }

    let used = {
        let mut terms: Vec<&Rc<Expr>> = Vec::new();
        for ty in &types {
            terms.push(&ty.ty);
            terms.extend(ty.ctors.iter().map(|c| &c.ty));
        }
        used_vars(&vars, &terms)
    };
    let block_names: Vec<Name> = types.iter().map(|t| t.name.clone()).collect();
    let implicit_vars = implicit(&used);
    let types: Vec<InductiveType> = types
        .into_iter()
        .map(|ty| InductiveType {
            name: ty.name,
            ty: Expr::pis(&used, apply_to_vars(&ty.ty, &block_names, &used)),
            ctors: ty
                .ctors
                .into_iter()
                .map(|c| Constructor {
                    name: c.name,
                    ty: Expr::pis(&implicit_vars, apply_to_vars(&c.ty, &block_names, &used)),
                })
                .collect(),
        })
        .collect();

    let mut terms: Vec<&Rc<Expr>> = Vec::new();
    for ty in &types {
        terms.push(&ty.ty);
        terms.extend(ty.ctors.iter().map(|c| &c.ty));
    }
    Ok(InductiveBlock {
        univ_params: universe_params(&explicit, &terms),
        num_params: used.len() + num_params.unwrap_or(0),
        types,
    })
}

fn elab_inductives(elab: &mut Elab<'_>, stxs: &[&Syntax], span: Span) -> ElabResult<()> {
    let inputs = stxs
        .iter()
        .map(|stx| prepare_inductive(elab.ctx, stx))
        .collect::<ElabResult<Vec<_>>>()?;
    let block = inductive_block(elab.ctx, &inputs)?;
    elab.admit(Declaration::Inductive(block), span)?;
    for input in &inputs {
        let visibility = input.header.mods.visibility;
        input.names.publish(elab.ctx, visibility);
        input.names.record_attributes(elab.ctx, &input.header.mods, &[]);
        elab.ctx.register_namespace(&input.names.visible);
        for ctor in &input.ctor_names {
            ctor.publish(elab.ctx, visibility);
        }
        debug!(name = %input.names.kernel, ctors = input.ctor_names.len(), "inductive admitted");
    }
    Ok(())
}

// =============================================================================
// Structures
// =============================================================================

struct Field {
    name: Name,
    binder: Binder,
    default: Option<Rc<Expr>>,
}

struct StructureLayout {
    block: InductiveBlock,
    projections: Vec<Definition>,
    defaults: Vec<Definition>,
    info: StructureInfo,
}

fn field_info(atom: &Syntax) -> BinderInfo {
    match atom.as_atom() {
        Some("implicit") => BinderInfo::Implicit,
        Some("strict") => BinderInfo::StrictImplicit,
        Some("inst") => BinderInfo::InstImplicit,
        _ => BinderInfo::Default,
    }
}

/// Parent structures become `toParent` fields, then the declared fields
/// follow, each in scope for the ones after it.
fn structure_fields(
    tr: &mut Translator<'_>,
    extends: &Syntax,
    fields: &[Syntax],
) -> ElabResult<Vec<Field>> {
    let mut out: Vec<Field> = Vec::new();
    for parent in extends.args() {
        let parent_ty = tr.term(parent)?;
        let head = head_constant(&parent_ty)
            .ok_or_else(|| ElabError::invalid("invalid 'extends', expected a structure", parent.span))?;
        let name = Name::parse(&format!("to{}", head.last().unwrap_or_default()));
        let core = tr.push_local(&name, &[]);
        out.push(Field {
            name,
            binder: Binder::explicit(core, parent_ty),
            default: None,
        });
    }
    for field in fields {
        let [name, binders, ty, default, info] = field.args() else {
            return Err(ElabError::malformed("structure field", field));
        };
        let short = name
            .as_ident()
            .ok_or_else(|| ElabError::malformed("structure field", field))?;
        if out.iter().any(|f| &f.name == short) {
            return Err(ElabError::invalid(
                format!("field '{}' has already been declared", short),
                name.span,
            ));
        }
        let params = tr.binder_groups(binders.args())?;
        let ty = match ty.present() {
            Some(t) => tr.term(t),
            None => Ok(Expr::hole()),
        };
        let default = match (&ty, default.present()) {
            (Ok(_), Some(d)) => tr.term(d).map(Some),
            _ => Ok(None),
        };
        tr.pop_locals(params.len());
        let ty = Expr::pis(&params, ty?);
        let default = default?.map(|d| Expr::lams(&params, d));
        let core = tr.push_local(short, &[]);
        out.push(Field {
            name: short.clone(),
            binder: Binder::new(core, field_info(info), ty),
            default,
        });
    }
    Ok(out)
}

fn structure_layout(
    ctx: &mut ElabContext,
    header: &Header<'_>,
    names: &DeclName,
    parts: [&Syntax; 3],
    fields: &[Syntax],
) -> ElabResult<StructureLayout> {
    let [extends, sort, ctor] = parts;
    let ctor_short = ctor.as_ident().cloned().unwrap_or_else(|| Name::parse("mk"));
    let ctor_name = names.kernel.append(&ctor_short);

    let mut tr = Translator::new(ctx);
    tr.set_univ_params(header.univs.clone().unwrap_or_default());
    let vars = push_section_vars(&mut tr)?;
    tr.add_self_ref(names.visible.clone(), Expr::constant(names.kernel.clone()));
    let params = tr.binder_groups(header.binders)?;
    let sort = match sort.present() {
        Some(t) => tr.term(t)?,
        None => Expr::sort(Level::of_nat(1)),
    };
    let fields = structure_fields(&mut tr, extends, fields)?;
    drop(tr);

    let implicit_params = implicit(&params);
    let self_ty = Expr::app_n(Expr::constant(names.kernel.clone()), locals_of(&params));
    let field_binders: Vec<Binder> = fields.iter().map(|f| f.binder.clone()).collect();
    let ty = Expr::pis(&params, sort);
    let ctor_ty = Expr::pis(&implicit_params, Expr::pis(&field_binders, self_ty.clone()));

    let this = Name::parse("self");
    let this_binder = Binder::explicit(this.clone(), self_ty);
    let mut projections: Vec<(Name, Rc<Expr>, Rc<Expr>)> = Vec::with_capacity(fields.len());
    for (i, field) in fields.iter().enumerate() {
        let mut field_ty = field.binder.ty.clone();
        for earlier in &fields[..i] {
            let proj = Expr::app(
                Expr::constant(names.kernel.append(&earlier.name)),
                Expr::local(this.clone()),
            );
            field_ty = field_ty.instantiate_local(&earlier.binder.name, &proj);
        }
        let proj_ty = Expr::pis(&implicit_params, Expr::pi(this_binder.clone(), field_ty));
        let proj_value = Expr::lams(
            &implicit_params,
            Expr::lam(
                this_binder.clone(),
                Rc::new(Expr::Proj(Expr::local(this.clone()), FieldRef::Index(i))),
            ),
        );
        projections.push((names.kernel.append(&field.name), proj_ty, proj_value));
    }

    let mut defaults: Vec<(Name, Rc<Expr>)> = Vec::new();
    for (i, field) in fields.iter().enumerate() {
        let Some(default) = &field.default else {
            continue;
        };
        let preceding: Vec<Binder> = fields[..i]
            .iter()
            .map(|f| Binder::explicit(f.binder.name.clone(), f.binder.ty.clone()))
            .collect();
        let value = Expr::lams(&implicit_params, Expr::lams(&preceding, default.clone()));
        defaults.push((names.kernel.append(&field.name).push("_default"), value));
    }

    let used = {
        let mut terms: Vec<&Rc<Expr>> = vec![&ty, &ctor_ty];
        for (_, t, v) in &projections {
            terms.push(t);
            terms.push(v);
        }
        terms.extend(defaults.iter().map(|(_, v)| v));
        used_vars(&vars, &terms)
    };
    let own = [names.kernel.clone()];
    let implicit_vars = implicit(&used);
    let close_ty = |e: &Rc<Expr>| Expr::pis(&implicit_vars, apply_to_vars(e, &own, &used));
    let close_value = |e: &Rc<Expr>| Expr::lams(&implicit_vars, apply_to_vars(e, &own, &used));

    let ty = Expr::pis(&used, ty);
    let ctor_ty = close_ty(&ctor_ty);
    let projections: Vec<(Name, Rc<Expr>, Rc<Expr>)> = projections
        .iter()
        .map(|(n, t, v)| (n.clone(), close_ty(t), close_value(v)))
        .collect();
    let defaults: Vec<(Name, Rc<Expr>)> = defaults
        .iter()
        .map(|(n, v)| (n.clone(), close_value(v)))
        .collect();

    let univ_params = {
        let mut terms: Vec<&Rc<Expr>> = vec![&ty, &ctor_ty];
        for (_, t, v) in &projections {
            terms.push(t);
            terms.push(v);
        }
        terms.extend(defaults.iter().map(|(_, v)| v));
        universe_params(&header.univs, &terms)
    };
    let definition = |name: Name, ty: Rc<Expr>, value: Rc<Expr>| Definition {
        name,
        univ_params: univ_params.clone(),
        ty,
        value,
        kind: DefinitionKind::Def,
        noncomputable: false,
    };

    let info = StructureInfo {
        name: names.kernel.clone(),
        ctor: ctor_name.clone(),
        num_params: used.len() + params.len(),
        fields: fields.iter().map(|f| f.name.clone()).collect(),
        defaults: fields
            .iter()
            .filter(|f| f.default.is_some())
            .map(|f| f.name.clone())
            .collect(),
    };
    Ok(StructureLayout {
        block: InductiveBlock {
            univ_params: univ_params.clone(),
            num_params: info.num_params,
            types: vec![InductiveType {
                name: names.kernel.clone(),
                ty,
                ctors: vec![Constructor {
                    name: ctor_name,
                    ty: ctor_ty,
                }],
            }],
        },
        projections: projections
            .into_iter()
            .map(|(n, t, v)| definition(n, t, v))
            .collect(),
        defaults: defaults
            .into_iter()
            .map(|(n, v)| definition(n, Expr::hole(), v))
            .collect(),
        info,
    })
}

fn elab_structure(elab: &mut Elab<'_>, stx: &Syntax) -> ElabResult<()> {
    let header = Header::parse(stx)?;
    let [extends, sort, ctor, fields @ ..] = header.rest else {
        return Err(ElabError::malformed(header.kind, stx));
    };
    let names = header.declare(elab.ctx)?;
    let layout = structure_layout(elab.ctx, &header, &names, [extends, sort, ctor], fields)?;

    elab.admit(Declaration::Inductive(layout.block), stx.span)?;
    for def in layout.projections.into_iter().chain(layout.defaults) {
        elab.admit(Declaration::Definition(def), stx.span)?;
    }

    let visibility = header.mods.visibility;
    names.publish(elab.ctx, visibility);
    let implied: &[&str] = if stx.is_node("command.class") {
        &["class"]
    } else {
        &[]
    };
    names.record_attributes(elab.ctx, &header.mods, implied);
    elab.ctx.register_namespace(&names.visible);
    let short_ctor = layout
        .info
        .ctor
        .last()
        .map(Name::parse)
        .unwrap_or_else(|| Name::parse("mk"));
    names.child(&short_ctor).publish(elab.ctx, visibility);
    for field in &layout.info.fields {
        names.child(field).publish(elab.ctx, visibility);
    }
    debug!(name = %names.kernel, fields = layout.info.fields.len(), "structure admitted");
    elab.ctx.structures.insert(names.kernel.clone(), layout.info);
    Ok(())
}

// =============================================================================
// Entry points
// =============================================================================

/// Elaborate one declaration command and admit it.
pub fn elab_declaration(elab: &mut Elab<'_>, stx: &Syntax) -> ElabResult<()> {
    match stx.node_kind() {
        Some("command.axiom") => elab_axiom(elab, stx),
        Some("command.inductive") => elab_inductives(elab, &[stx], stx.span),
        Some("command.structure") | Some("command.class") => elab_structure(elab, stx),
        Some(kind) if definition_kind(kind).is_some() => elab_definitions(elab, &[stx], stx.span),
        _ => Err(ElabError::malformed("declaration", stx)),
    }
}

/// `mutual ... end`: all inductive types, or all definitions.
pub fn elab_mutual(elab: &mut Elab<'_>, stx: &Syntax) -> ElabResult<()> {
    let decls: Vec<&Syntax> = stx.args().iter().collect();
    if decls.is_empty() {
        return Err(ElabError::invalid(
            "invalid 'mutual' block, expected declarations",
            stx.span,
        ));
    }
    let all_inductive = decls.iter().all(|d| d.is_node("command.inductive"));
    let all_definitions = decls.iter().all(|d| {
        d.node_kind()
            .and_then(definition_kind)
            .is_some_and(|k| k != DefinitionKind::Example)
    });
    if all_inductive {
        elab_inductives(elab, &decls, stx.span)
    } else if all_definitions {
        elab_definitions(elab, &decls, stx.span)
    } else {
        Err(ElabError::invalid(
            "invalid 'mutual' block, expected only definitions or only inductive types",
            stx.span,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elab::{FrontendConfig, ReferenceKernel, VarBinding};
    use crate::parser::{CommandSource, Parser};
    use kernel::ConstantKind;

    fn run(src: &str, ctx: &mut ElabContext) -> ElabResult<()> {
        let config = FrontendConfig::default();
        let mut kernel = ReferenceKernel;
        let mut parser = Parser::new(src);
        let stx = parser.next_command(&ctx.parser_config)?;
        let mut elab = Elab::new(&config, ctx, &mut kernel);
        if stx.is_node("command.mutual") {
            elab_mutual(&mut elab, &stx)
        } else {
            elab_declaration(&mut elab, &stx)
        }
    }

    fn ty_of(ctx: &ElabContext, name: &str) -> String {
        let info = ctx.env.find(&Name::parse(name)).unwrap();
        info.ty.erase_positions().to_string()
    }

    fn value_of(ctx: &ElabContext, name: &str) -> String {
        let info = ctx.env.find(&Name::parse(name)).unwrap();
        info.value.as_ref().unwrap().erase_positions().to_string()
    }

    #[test]
    fn definitions_are_qualified_and_admitted() {
        let mut ctx = ElabContext::default();
        ctx.namespace_path = Name::parse("Foo");
        run("def id (x : Nat) : Nat := x", &mut ctx).unwrap();
        insta::assert_snapshot!(ty_of(&ctx, "Foo.id"), @"Nat → Nat");
        insta::assert_snapshot!(value_of(&ctx, "Foo.id"), @"fun (x : Nat) => x");
    }

    #[test]
    fn redeclaration_is_rejected_before_translation() {
        let mut ctx = ElabContext::default();
        run("def a := 1", &mut ctx).unwrap();
        let err = run("def a := undefinedThing", &mut ctx).unwrap_err();
        assert_eq!(err.to_string(), "'a' has already been declared");
    }

    #[test]
    fn theorems_need_a_type() {
        let mut ctx = ElabContext::default();
        let err = run("theorem t := 1", &mut ctx).unwrap_err();
        assert_eq!(err.code(), "F0404");
    }

    #[test]
    fn examples_leave_no_trace() {
        let mut ctx = ElabContext::default();
        run("example : Nat := 1", &mut ctx).unwrap();
        assert!(ctx.env.is_empty());
    }

    #[test]
    fn private_names_are_mangled_and_aliased() {
        let mut ctx = ElabContext::default();
        run("private def secret := 1", &mut ctx).unwrap();
        let mangled = Name::parse("_private.0.secret");
        assert!(ctx.env.contains(&mangled));
        assert_eq!(ctx.aliases.get(&Name::parse("secret")), Some(&vec![mangled]));
    }

    #[test]
    fn unknown_attributes_are_errors() {
        let mut ctx = ElabContext::default();
        let err = run("@[frobnicate] def a := 1", &mut ctx).unwrap_err();
        assert_eq!(err.to_string(), "unknown attribute [frobnicate]");
        run("@[simp] def b := 1", &mut ctx).unwrap();
        let attrs: Vec<String> = ctx
            .attributes_of(&Name::parse("b"))
            .iter()
            .map(|a| a.to_string())
            .collect();
        assert_eq!(attrs, vec!["simp"]);
    }

    #[test]
    fn anonymous_instances_are_named_after_their_class() {
        let mut ctx = ElabContext::default();
        run("instance : Add Nat := ⟨Nat.add⟩", &mut ctx).unwrap();
        run("instance : Add Nat := ⟨Nat.add⟩", &mut ctx).unwrap();
        assert!(ctx.env.contains(&Name::parse("instAddNat")));
        assert!(ctx.env.contains(&Name::parse("instAddNat_1")));
        let attrs = ctx.attributes_of(&Name::parse("instAddNat"));
        assert_eq!(attrs[0].name, Name::parse("instance"));
    }

    #[test]
    fn section_variables_are_prepended_when_used() {
        let mut ctx = ElabContext::default();
        let span = Span::default();
        let ty = Parser::new("Type").parse_term(&ctx.parser_config).unwrap();
        ctx.vars.push(VarBinding {
            name: Name::parse("α"),
            info: BinderInfo::Implicit,
            ty,
            span,
        });
        let ty = Parser::new("α").parse_term(&ctx.parser_config).unwrap();
        ctx.vars.push(VarBinding {
            name: Name::parse("a"),
            info: BinderInfo::Default,
            ty,
            span,
        });
        run("def same := a", &mut ctx).unwrap();
        run("def unrelated := 0", &mut ctx).unwrap();
        insta::assert_snapshot!(value_of(&ctx, "same"), @"fun {α : Type} (a : α) => a");
        insta::assert_snapshot!(value_of(&ctx, "unrelated"), @"0");
    }

    #[test]
    fn recursion_becomes_pre_equations() {
        let mut ctx = ElabContext::default();
        run("def spin (n : Nat) : Nat := spin n", &mut ctx).unwrap();
        let info = ctx.env.find(&Name::parse("spin")).unwrap();
        let value = info.value.as_ref().unwrap();
        assert!(value.free_locals().is_empty());
        let mut saw_equations = false;
        value.visit(&mut |e| saw_equations |= matches!(e, Expr::Equations(_)));
        assert!(saw_equations);
    }

    #[test]
    fn inductive_types_get_constructors_and_recursor() {
        let mut ctx = ElabContext::default();
        run("inductive List (α : Type) where\n  | nil\n  | cons (head : α) (tail : List α)", &mut ctx).unwrap();
        insta::assert_snapshot!(ty_of(&ctx, "List.nil"), @"{α : Type} → List α");
        insta::assert_snapshot!(ty_of(&ctx, "List.cons"), @"{α : Type} → α → List α → List α");
        assert!(ctx.env.contains(&Name::parse("List.rec")));
        let info = ctx.env.find(&Name::parse("List")).unwrap();
        assert!(matches!(info.kind, ConstantKind::Inductive { num_params: 1, .. }));
    }

    #[test]
    fn structures_generate_projections_and_defaults() {
        let mut ctx = ElabContext::default();
        run("structure Point where\n  x : Nat\n  y : Nat := 0", &mut ctx).unwrap();
        insta::assert_snapshot!(ty_of(&ctx, "Point.mk"), @"Nat → Nat → Point");
        insta::assert_snapshot!(ty_of(&ctx, "Point.y"), @"Point → Nat");
        insta::assert_snapshot!(value_of(&ctx, "Point.x"), @"fun (self : Point) => self.1");
        insta::assert_snapshot!(value_of(&ctx, "Point.y._default"), @"fun (x : Nat) => 0");
        let info = ctx.structures.get(&Name::parse("Point")).unwrap();
        assert_eq!(info.defaults, vec![Name::parse("y")]);
    }

    #[test]
    fn mutual_blocks_may_not_mix_kinds() {
        let mut ctx = ElabContext::default();
        let err = run(
            "mutual\n  inductive A where\n    | a\n  def f := 1\nend",
            &mut ctx,
        )
        .unwrap_err();
        assert_eq!(err.code(), "F0404");
        run(
            "mutual\n  def even (n : Nat) : Bool := odd n\n  def odd (n : Nat) : Bool := even n\nend",
            &mut ctx,
        )
        .unwrap();
        assert!(ctx.env.contains(&Name::parse("even")));
        assert!(ctx.env.contains(&Name::parse("odd")));
    }
}
