//! Command handlers
//!
//! The dispatch table maps a command's node kind to its handler. It is built
//! once, on first use, and never changes afterwards.

use crate::decl::{self, push_section_vars};
use crate::elab::{Elab, ElabError, ElabResult, OptionValue, VarBinding, UNIVERSE_OFFSET_CEILING};
use crate::notation;
use crate::resolve::{resolve_namespace, resolve_unique};
use crate::scope::{self, ScopeKind};
use crate::surface::{Syntax, SyntaxKind};
use crate::translate::Translator;
use kernel::{BinderInfo, Expr, Level, Name};
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::debug;

pub type Handler = fn(&mut Elab<'_>, &Syntax) -> ElabResult<()>;

fn handlers() -> &'static HashMap<&'static str, Handler> {
    static TABLE: OnceLock<HashMap<&'static str, Handler>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table: HashMap<&'static str, Handler> = HashMap::new();
        table.insert("command.namespace", elab_namespace);
        table.insert("command.section", elab_section);
        table.insert("command.end", elab_end);
        table.insert("command.open", elab_open);
        table.insert("command.export", elab_export);
        table.insert("command.universe", elab_universe);
        table.insert("command.variable", elab_variable);
        table.insert("command.set_option", elab_set_option);
        table.insert("command.attribute", elab_attribute);
        table.insert("command.notation", elab_notation);
        table.insert("command.reserve", elab_notation);
        table.insert("command.check", elab_check);
        table.insert("command.print", elab_print);
        table.insert("command.mutual", decl::elab_mutual);
        for kind in [
            "command.def",
            "command.theorem",
            "command.abbrev",
            "command.instance",
            "command.example",
            "command.axiom",
            "command.inductive",
            "command.structure",
            "command.class",
        ] {
            table.insert(kind, decl::elab_declaration);
        }
        table
    })
}

/// True when a handler exists for `kind`.
pub fn is_command(kind: &str) -> bool {
    handlers().contains_key(kind)
}

/// Run the handler registered for `stx`'s node kind.
pub fn dispatch(elab: &mut Elab<'_>, stx: &Syntax) -> ElabResult<()> {
    let Some(kind) = stx.node_kind() else {
        return Err(ElabError::malformed("command", stx));
    };
    let Some(handler) = handlers().get(kind) else {
        return Err(ElabError::UnknownSyntax {
            kind: kind.to_string(),
            excerpt: stx.excerpt(60),
            span: stx.span,
        });
    };
    debug!(kind, depth = elab.depth, "dispatching command");
    handler(elab, stx)
}

fn ident_arg(stx: &Syntax, what: &str) -> ElabResult<Name> {
    stx.as_ident()
        .cloned()
        .ok_or_else(|| ElabError::malformed(what, stx))
}

// =============================================================================
// Scopes
// =============================================================================

fn elab_namespace(elab: &mut Elab<'_>, stx: &Syntax) -> ElabResult<()> {
    let [name] = stx.args() else {
        return Err(ElabError::malformed("namespace", stx));
    };
    let name = ident_arg(name, "namespace")?;
    scope::enter(elab.ctx, ScopeKind::Namespace, Some(name), stx.span);
    Ok(())
}

fn elab_section(elab: &mut Elab<'_>, stx: &Syntax) -> ElabResult<()> {
    let [name] = stx.args() else {
        return Err(ElabError::malformed("section", stx));
    };
    let name = match name.present() {
        Some(n) => Some(ident_arg(n, "section")?),
        None => None,
    };
    scope::enter(elab.ctx, ScopeKind::Section, name, stx.span);
    Ok(())
}

fn elab_end(elab: &mut Elab<'_>, stx: &Syntax) -> ElabResult<()> {
    let [name] = stx.args() else {
        return Err(ElabError::malformed("end", stx));
    };
    let name = match name.present() {
        Some(n) => Some(ident_arg(n, "end")?),
        None => None,
    };
    scope::leave(elab.ctx, name.as_ref(), stx.span)?;
    Ok(())
}

// =============================================================================
// Opens and exports
// =============================================================================

/// `ns.x` for the first namespace in `targets` declaring `x`.
fn member_of(elab: &Elab<'_>, targets: &[Name], short: &Syntax) -> ElabResult<Name> {
    let id = ident_arg(short, "identifier")?;
    let found: Vec<Name> = targets
        .iter()
        .map(|ns| ns.append(&id))
        .filter(|full| elab.ctx.is_declared(full))
        .collect();
    match found.as_slice() {
        [] => Err(ElabError::UnknownIdentifier {
            name: id,
            span: short.span,
        }),
        [one] => Ok(one.clone()),
        _ => Err(ElabError::AmbiguousIdentifier {
            name: id,
            candidates: found,
            span: short.span,
        }),
    }
}

fn apply_open(elab: &mut Elab<'_>, decl: &Syntax) -> ElabResult<()> {
    let Some(kind) = decl.node_kind() else {
        return Err(ElabError::malformed("open", decl));
    };
    let [ns, rest @ ..] = decl.args() else {
        return Err(ElabError::malformed("open", decl));
    };
    let targets = resolve_namespace(&ident_arg(ns, "namespace")?, elab.ctx, ns.span)?;
    match kind {
        "open.simple" => {
            let mut all = targets;
            for extra in rest {
                let name = ident_arg(extra, "namespace")?;
                all.extend(resolve_namespace(&name, elab.ctx, extra.span)?);
            }
            let scope = elab.ctx.current_scope_mut();
            for target in all {
                scope.open_namespace(target);
            }
        }
        "open.as" => {
            let [alias] = rest else {
                return Err(ElabError::malformed("open", decl));
            };
            let alias = ident_arg(alias, "namespace alias")?;
            let scope = elab.ctx.current_scope_mut();
            for target in targets {
                scope.namespace_aliases.push((alias.clone(), target));
            }
        }
        "open.only" => {
            let mut aliases = Vec::with_capacity(rest.len());
            for short in rest {
                let full = member_of(elab, &targets, short)?;
                aliases.push((ident_arg(short, "identifier")?, full));
            }
            elab.ctx.current_scope_mut().local_aliases.extend(aliases);
        }
        "open.hiding" => {
            let mut hidden = Vec::with_capacity(rest.len());
            for short in rest {
                hidden.push(member_of(elab, &targets, short)?);
            }
            let scope = elab.ctx.current_scope_mut();
            for target in targets {
                scope.open_namespace(target);
            }
            scope.hidden.extend(hidden);
        }
        "open.renaming" => {
            let mut aliases = Vec::with_capacity(rest.len());
            for rename in rest {
                let [from, to] = rename.args() else {
                    return Err(ElabError::malformed("renaming", rename));
                };
                let full = member_of(elab, &targets, from)?;
                aliases.push((ident_arg(to, "identifier")?, full));
            }
            elab.ctx.current_scope_mut().local_aliases.extend(aliases);
        }
        _ => return Err(ElabError::malformed("open", decl)),
    }
    Ok(())
}

/// `open ... [in cmd]`. The `in` form opens inside an anonymous section
/// around a nested dispatch of `cmd`.
fn elab_open(elab: &mut Elab<'_>, stx: &Syntax) -> ElabResult<()> {
    let [decl, body] = stx.args() else {
        return Err(ElabError::malformed("open", stx));
    };
    let Some(body) = body.present() else {
        return apply_open(elab, decl);
    };
    scope::enter(elab.ctx, ScopeKind::Section, None, stx.span);
    let result = apply_open(elab, decl).and_then(|()| elab.nested(body.span, |inner| dispatch(inner, body)));
    let closed = scope::leave(elab.ctx, None, stx.span);
    result?;
    closed?;
    Ok(())
}

fn elab_export(elab: &mut Elab<'_>, stx: &Syntax) -> ElabResult<()> {
    let [ns, names @ ..] = stx.args() else {
        return Err(ElabError::malformed("export", stx));
    };
    let targets = resolve_namespace(&ident_arg(ns, "namespace")?, elab.ctx, ns.span)?;
    let mut aliases = Vec::with_capacity(names.len());
    for short in names {
        let full = member_of(elab, &targets, short)?;
        let full = resolve_unique(&Name::parse("_root_").append(&full), elab.ctx, short.span)?;
        aliases.push((elab.ctx.qualify(&ident_arg(short, "identifier")?), full));
    }
    for (alias, full) in aliases {
        debug!(%alias, %full, "exported");
        elab.ctx.add_alias(alias, full);
    }
    Ok(())
}

// =============================================================================
// Universes, variables, options, attributes
// =============================================================================

fn elab_universe(elab: &mut Elab<'_>, stx: &Syntax) -> ElabResult<()> {
    for arg in stx.args() {
        let name = ident_arg(arg, "universe")?;
        if elab.ctx.universes.contains(&name) {
            return Err(ElabError::invalid(
                format!("a universe level named '{}' has already been declared", name),
                arg.span,
            ));
        }
        elab.ctx.universes.insert(name.clone(), Level::param(name));
    }
    Ok(())
}

fn group_info(group: &Syntax) -> ElabResult<BinderInfo> {
    match group.node_kind() {
        Some("binder.explicit") => Ok(BinderInfo::Default),
        Some("binder.implicit") => Ok(BinderInfo::Implicit),
        Some("binder.strict") => Ok(BinderInfo::StrictImplicit),
        Some("binder.inst") => Ok(BinderInfo::InstImplicit),
        _ => Err(ElabError::malformed("binder", group)),
    }
}

/// `variable` binders are kept as syntax and translated again by every
/// declaration that uses them. They are translated once here so errors
/// surface at the command that introduced them. `variable {α}` without a
/// type changes the binder kind of an existing variable.
fn elab_variable(elab: &mut Elab<'_>, stx: &Syntax) -> ElabResult<()> {
    let mut added = Vec::new();
    for group in stx.args() {
        let info = group_info(group)?;
        let (names, ty): (Vec<&Syntax>, &Syntax) = match group.args() {
            [name, ty] if info == BinderInfo::InstImplicit => (vec![name], ty),
            [names @ .., ty] if !names.is_empty() => (names.iter().collect(), ty),
            _ => return Err(ElabError::malformed("variable", group)),
        };
        let Some(ty) = ty.present() else {
            for name in names {
                let name = ident_arg(name, "variable")?;
                let existing = elab.ctx.vars.iter_mut().rev().find(|v| v.name == name);
                match existing {
                    Some(var) => var.info = info,
                    None => added.push(VarBinding {
                        name,
                        info,
                        ty: Syntax::node("term.hole", vec![], group.span),
                        span: group.span,
                    }),
                }
            }
            continue;
        };
        for name in names {
            let name = match &name.kind {
                SyntaxKind::Ident(n) => n.clone(),
                _ => Name::parse(&format!("inst{}", elab.ctx.vars.len() + added.len())),
            };
            added.push(VarBinding {
                name,
                info,
                ty: ty.clone(),
                span: group.span,
            });
        }
    }

    let mut vars = elab.ctx.vars.clone();
    vars.extend(added);
    let previous = std::mem::replace(&mut elab.ctx.vars, vars);
    let check = {
        let mut tr = Translator::new(elab.ctx);
        push_section_vars(&mut tr).map(|_| ())
    };
    if let Err(err) = check {
        elab.ctx.vars = previous;
        return Err(err);
    }
    Ok(())
}

/// Options settable from source, with the type of value they take.
const OPTIONS: &[(&str, &str)] = &[("deferUnknown", "Bool"), ("maxUniverseOffset", "Nat")];

fn elab_set_option(elab: &mut Elab<'_>, stx: &Syntax) -> ElabResult<()> {
    let [name, value] = stx.args() else {
        return Err(ElabError::malformed("set_option", stx));
    };
    let option = ident_arg(name, "option")?;
    if option.to_string() == "maxSteps" {
        return Err(ElabError::invalid(
            "option 'maxSteps' is set by the frontend configuration, not from source",
            name.span,
        ));
    }
    let Some((_, expected)) = OPTIONS.iter().find(|(n, _)| option.to_string() == *n) else {
        return Err(ElabError::UnknownOption {
            name: option,
            span: name.span,
        });
    };
    let parsed = match (&value.kind, *expected) {
        (SyntaxKind::Ident(v), "Bool") if v.to_string() == "true" => OptionValue::Bool(true),
        (SyntaxKind::Ident(v), "Bool") if v.to_string() == "false" => OptionValue::Bool(false),
        (SyntaxKind::Num(n), "Nat") => OptionValue::Nat(*n),
        _ => {
            return Err(ElabError::OptionType {
                name: option,
                expected,
                span: value.span,
            })
        }
    };
    if option.to_string() == "maxUniverseOffset"
        && matches!(parsed, OptionValue::Nat(n) if n > UNIVERSE_OFFSET_CEILING)
    {
        return Err(ElabError::invalid(
            format!("maxUniverseOffset cannot exceed {}", UNIVERSE_OFFSET_CEILING),
            value.span,
        ));
    }
    debug!(%option, value = %parsed, "option set");
    elab.ctx.options.insert(option, parsed);
    Ok(())
}

fn elab_attribute(elab: &mut Elab<'_>, stx: &Syntax) -> ElabResult<()> {
    let [attrs, targets @ ..] = stx.args() else {
        return Err(ElabError::malformed("attribute", stx));
    };
    let attrs = decl::attributes(attrs)?;
    let mut resolved = Vec::with_capacity(targets.len());
    for target in targets {
        let name = ident_arg(target, "attribute target")?;
        resolved.push(resolve_unique(&name, elab.ctx, target.span)?);
    }
    for name in resolved {
        for attr in &attrs {
            elab.ctx.add_attribute(&name, attr.clone());
        }
    }
    Ok(())
}

fn elab_notation(elab: &mut Elab<'_>, stx: &Syntax) -> ElabResult<()> {
    let delta = notation::register(stx, elab.ctx)?;
    debug!(tokens = delta.added_tokens.len(), rules = delta.added_rules.len(), "notation handled");
    Ok(())
}

// =============================================================================
// Information commands
// =============================================================================

fn signature(name: &Name, univ_params: &[Name], ty: &Expr) -> String {
    let univs = if univ_params.is_empty() {
        String::new()
    } else {
        let rendered: Vec<String> = univ_params.iter().map(|u| u.to_string()).collect();
        format!(".{{{}}}", rendered.join(", "))
    };
    format!("{}{} : {}", name, univs, ty)
}

fn elab_check(elab: &mut Elab<'_>, stx: &Syntax) -> ElabResult<()> {
    let [term] = stx.args() else {
        return Err(ElabError::malformed("#check", stx));
    };
    if let Some(id) = term.as_ident() {
        if let Ok(full) = resolve_unique(id, elab.ctx, term.span) {
            if let Some(info) = elab.ctx.env.find(&full).cloned() {
                let message = signature(&info.name, &info.univ_params, &info.ty.erase_positions());
                elab.info(message, stx.span);
                return Ok(());
            }
        }
    }
    let e = {
        let mut tr = Translator::new(elab.ctx);
        push_section_vars(&mut tr)?;
        tr.term(term)?
    };
    elab.info(e.erase_positions().to_string(), stx.span);
    Ok(())
}

fn elab_print(elab: &mut Elab<'_>, stx: &Syntax) -> ElabResult<()> {
    let [name] = stx.args() else {
        return Err(ElabError::malformed("#print", stx));
    };
    let id = ident_arg(name, "#print")?;
    let full = resolve_unique(&id, elab.ctx, name.span)?;
    let Some(info) = elab.ctx.env.find(&full).cloned() else {
        return Err(ElabError::UnknownIdentifier {
            name: id,
            span: name.span,
        });
    };
    let attrs = elab.ctx.attributes_of(&full);
    let mut message = String::new();
    if !attrs.is_empty() {
        let rendered: Vec<String> = attrs.iter().map(|a| a.to_string()).collect();
        message.push_str(&format!("@[{}] ", rendered.join(", ")));
    }
    message.push_str(info.kind.describe());
    message.push(' ');
    message.push_str(&signature(&info.name, &info.univ_params, &info.ty.erase_positions()));
    if let Some(value) = &info.value {
        message.push_str(&format!(" :=\n  {}", value.erase_positions()));
    }
    elab.info(message, stx.span);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elab::{ElabContext, FrontendConfig, ReferenceKernel};
    use crate::parser::{CommandSource, Parser};
    use crate::surface::Span;

    /// Run every command of `src`, stopping at the first error.
    fn run(src: &str, ctx: &mut ElabContext) -> ElabResult<()> {
        let config = FrontendConfig::default();
        let mut kernel = ReferenceKernel;
        let mut parser = Parser::new(src);
        loop {
            let stx = parser.next_command(&ctx.parser_config)?;
            if stx.is_node("command.eoi") {
                return Ok(());
            }
            let mut elab = Elab::new(&config, ctx, &mut kernel);
            dispatch(&mut elab, &stx)?;
            ctx.flush_parser_config();
        }
    }

    fn infos(ctx: &mut ElabContext) -> Vec<String> {
        ctx.messages.drain().into_iter().map(|d| d.message).collect()
    }

    #[test]
    fn unknown_kinds_are_translation_errors() {
        let config = FrontendConfig::default();
        let mut ctx = ElabContext::default();
        let mut kernel = ReferenceKernel;
        let mut elab = Elab::new(&config, &mut ctx, &mut kernel);
        let stx = Syntax::node("command.frobnicate", vec![], Span::default());
        let err = dispatch(&mut elab, &stx).unwrap_err();
        assert_eq!(err.code(), "F0102");
        assert!(is_command("command.def"));
    }

    #[test]
    fn open_in_is_scoped_to_its_command() {
        let mut ctx = ElabContext::default();
        run("namespace Foo\ndef f := 1\nend Foo", &mut ctx).unwrap();
        run("open Foo in\ndef g := f", &mut ctx).unwrap();
        assert_eq!(ctx.scopes.len(), 1);
        assert!(ctx.current_scope().opened_namespaces.is_empty());
        let g = ctx.env.find(&Name::parse("g")).unwrap();
        assert_eq!(g.value.as_ref().unwrap().erase_positions().to_string(), "Foo.f");
    }

    #[test]
    fn selective_opens() {
        let mut ctx = ElabContext::default();
        run("namespace Foo\ndef a : Nat := 1\ndef b : Nat := 2\nend Foo", &mut ctx).unwrap();
        run("set_option deferUnknown false", &mut ctx).unwrap();
        run("section\nopen Foo (a)\n#check a\nend", &mut ctx).unwrap();
        run("section\nopen Foo renaming a → z\n#check z\nend", &mut ctx).unwrap();
        run("section\nopen Foo hiding a\n#check b\nend", &mut ctx).unwrap();
        assert_eq!(infos(&mut ctx), vec!["Foo.a : Nat", "Foo.a : Nat", "Foo.b : Nat"]);
        let err = run("section\nopen Foo hiding a\n#check a\nend", &mut ctx).unwrap_err();
        assert_eq!(err.to_string(), "unknown identifier 'a'");
    }

    #[test]
    fn export_installs_a_persistent_alias() {
        let mut ctx = ElabContext::default();
        run("namespace Foo\ndef a := 1\nend Foo\nexport Foo (a)", &mut ctx).unwrap();
        assert_eq!(ctx.aliases.get(&Name::parse("a")), Some(&vec![Name::parse("Foo.a")]));
    }

    #[test]
    fn options_are_checked_and_scoped() {
        let mut ctx = ElabContext::default();
        let err = run("set_option nonsense true", &mut ctx).unwrap_err();
        assert_eq!(err.code(), "F0401");
        let err = run("set_option deferUnknown 3", &mut ctx).unwrap_err();
        assert_eq!(err.to_string(), "type mismatch at set_option 'deferUnknown', expected Bool");
        run("section\nset_option deferUnknown false", &mut ctx).unwrap();
        assert!(!ctx.defer_unknown());
        run("end", &mut ctx).unwrap();
        assert!(ctx.defer_unknown());
    }

    #[test]
    fn universe_offset_limit_is_a_nat_option() {
        let mut ctx = ElabContext::default();
        assert_eq!(ctx.max_universe_offset(), 32);
        let err = run("set_option maxUniverseOffset true", &mut ctx).unwrap_err();
        assert_eq!(err.to_string(), "type mismatch at set_option 'maxUniverseOffset', expected Nat");
        let err = run("set_option maxUniverseOffset 5000", &mut ctx).unwrap_err();
        assert_eq!(err.to_string(), "maxUniverseOffset cannot exceed 1024");
        run("set_option maxUniverseOffset 64", &mut ctx).unwrap();
        assert_eq!(ctx.max_universe_offset(), 64);
    }

    #[test]
    fn universes_and_variables() {
        let mut ctx = ElabContext::default();
        run("universe u\nvariable {α : Sort u} (x : α)\ndef same := x", &mut ctx).unwrap();
        let same = ctx.env.find(&Name::parse("same")).unwrap();
        assert_eq!(same.univ_params, vec![Name::parse("u")]);
        insta::assert_snapshot!(same.value.as_ref().unwrap().erase_positions().to_string(), @"fun {α : Sort u} (x : α) => x");
        let err = run("universe u", &mut ctx).unwrap_err();
        assert_eq!(err.code(), "F0404");
    }

    #[test]
    fn attributes_need_a_unique_target() {
        let mut ctx = ElabContext::default();
        run("def a := 1\nattribute [simp] a", &mut ctx).unwrap();
        assert_eq!(ctx.attributes_of(&Name::parse("a")).len(), 1);
        let err = run("attribute [simp] nothing", &mut ctx).unwrap_err();
        assert_eq!(err.code(), "F0200");
    }

    #[test]
    fn print_shows_kind_and_attributes() {
        let mut ctx = ElabContext::default();
        run("@[reducible] def one : Nat := 1\n#print one", &mut ctx).unwrap();
        insta::assert_snapshot!(infos(&mut ctx).join("\n"), @r"
        @[reducible] def one : Nat :=
          1
        ");
    }
}
