//! Structural admission of declarations
//!
//! This is the reference consumer for the elaborator's declarations. It does
//! not type-check; it enforces the invariants an environment relies on:
//! unique names, declared universe parameters, closed terms, resolved
//! overloads and well-formed constructor heads. References to constants the
//! environment does not know are accepted, since the elaborator defers
//! unresolved identifiers to this stage.

use crate::declaration::{Declaration, Definition, DefinitionKind, InductiveBlock};
use crate::environment::{ConstantInfo, ConstantKind, Environment};
use crate::expr::{Binder, BinderInfo, Expr};
use crate::level::Level;
use crate::name::Name;
use std::rc::Rc;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    #[error("'{0}' has already been declared")]
    AlreadyDeclared(Name),
    #[error("duplicate universe parameter '{param}' in '{decl}'")]
    DuplicateUniverse { decl: Name, param: Name },
    #[error("undeclared universe parameter '{param}' in '{decl}'")]
    UndeclaredUniverse { decl: Name, param: Name },
    #[error("unbound local '{local}' in '{decl}'")]
    UnboundLocal { decl: Name, local: Name },
    #[error("ambiguous, possible interpretations remain in '{0}'")]
    UnresolvedChoice(Name),
    #[error("invalid constructor '{ctor}', result must be an application of '{induct}'")]
    InvalidConstructor { ctor: Name, induct: Name },
    #[error("inductive '{induct}' has {actual} parameters, expected {expected}")]
    ParameterMismatch {
        induct: Name,
        expected: usize,
        actual: usize,
    },
    #[error("empty declaration block")]
    EmptyBlock,
}

/// Admit `decl` into `env`, returning the extended environment.
pub fn add_declaration(env: &Environment, decl: Declaration) -> Result<Environment, KernelError> {
    for name in decl.names() {
        if env.contains(&name) {
            return Err(KernelError::AlreadyDeclared(name));
        }
    }
    let env = match decl {
        Declaration::Definition(def) => add_definitions(env, vec![def], &[])?,
        Declaration::Axiom(ax) => {
            check_univ_params(&ax.name, &ax.univ_params, &[&ax.ty])?;
            check_term(&ax.name, &ax.ty, &[])?;
            debug!(name = %ax.name, "admitting axiom");
            env.insert(ConstantInfo {
                name: ax.name,
                univ_params: ax.univ_params,
                ty: ax.ty,
                value: None,
                kind: ConstantKind::Axiom,
            })
        }
        Declaration::Inductive(block) => add_inductive(env, block)?,
        Declaration::Mutual(defs) => {
            if defs.is_empty() {
                return Err(KernelError::EmptyBlock);
            }
            let members: Vec<Name> = defs.iter().map(|d| d.name.clone()).collect();
            add_definitions(env, defs, &members)?
        }
    };
    Ok(env)
}

fn add_definitions(
    env: &Environment,
    defs: Vec<Definition>,
    members: &[Name],
) -> Result<Environment, KernelError> {
    let mut seen: Vec<&Name> = Vec::new();
    for def in &defs {
        if seen.contains(&&def.name) {
            return Err(KernelError::AlreadyDeclared(def.name.clone()));
        }
        seen.push(&def.name);
    }

    let mut env = env.clone();
    for def in defs {
        check_univ_params(&def.name, &def.univ_params, &[&def.ty, &def.value])?;
        check_term(&def.name, &def.ty, &[])?;
        check_term(&def.name, &def.value, members)?;
        if def.kind == DefinitionKind::Example {
            debug!("example checked and discarded");
            continue;
        }
        debug!(name = %def.name, kind = def.kind.keyword(), "admitting definition");
        env = env.insert(ConstantInfo {
            name: def.name,
            univ_params: def.univ_params,
            ty: def.ty,
            value: Some(def.value),
            kind: ConstantKind::Definition(def.kind),
        });
    }
    Ok(env)
}

fn add_inductive(env: &Environment, block: InductiveBlock) -> Result<Environment, KernelError> {
    if block.types.is_empty() {
        return Err(KernelError::EmptyBlock);
    }
    for ty in &block.types {
        let mut terms: Vec<&Rc<Expr>> = vec![&ty.ty];
        terms.extend(ty.ctors.iter().map(|c| &c.ty));
        check_univ_params(&ty.name, &block.univ_params, &terms)?;
        check_term(&ty.name, &ty.ty, &[])?;

        let (params, _) = ty.ty.pi_telescope();
        if params.len() < block.num_params {
            return Err(KernelError::ParameterMismatch {
                induct: ty.name.clone(),
                expected: block.num_params,
                actual: params.len(),
            });
        }

        for ctor in &ty.ctors {
            check_term(&ctor.name, &ctor.ty, &[])?;
            let (_, result) = ctor.ty.pi_telescope();
            let head_ok = match result.app_fn() {
                Expr::Const(head, _) => head == &ty.name,
                Expr::Hole => true,
                _ => false,
            };
            if !head_ok {
                return Err(KernelError::InvalidConstructor {
                    ctor: ctor.name.clone(),
                    induct: ty.name.clone(),
                });
            }
        }
    }

    let mut env = env.clone();
    for ty in block.types {
        debug!(name = %ty.name, ctors = ty.ctors.len(), "admitting inductive");
        let ctor_names: Vec<Name> = ty.ctors.iter().map(|c| c.name.clone()).collect();
        env = env.insert(ConstantInfo {
            name: ty.name.clone(),
            univ_params: block.univ_params.clone(),
            ty: ty.ty.clone(),
            value: None,
            kind: ConstantKind::Inductive {
                num_params: block.num_params,
                ctors: ctor_names,
            },
        });
        for ctor in ty.ctors {
            env = env.insert(ConstantInfo {
                name: ctor.name,
                univ_params: block.univ_params.clone(),
                ty: ctor.ty,
                value: None,
                kind: ConstantKind::Constructor {
                    induct: ty.name.clone(),
                },
            });
        }
        let rec_name = ty.name.push("rec");
        let motive_level = Name::parse("u_motive");
        let mut rec_params = vec![motive_level.clone()];
        rec_params.extend(block.univ_params.iter().cloned());
        env = env.insert(ConstantInfo {
            name: rec_name,
            univ_params: rec_params,
            ty: recursor_type(&ty.name, &motive_level),
            value: None,
            kind: ConstantKind::Recursor {
                induct: ty.name.clone(),
            },
        });
    }
    Ok(env)
}

/// `{motive : T → Sort u} → (t : T) → motive t`, minor premises left to the
/// full kernel.
fn recursor_type(induct: &Name, level: &Name) -> Rc<Expr> {
    let motive = Name::parse("motive");
    let target = Name::parse("t");
    let motive_ty = Expr::arrow(
        Expr::constant(induct.clone()),
        Expr::sort(Level::Param(level.clone())),
    );
    Expr::pis(
        &[
            Binder::new(motive.clone(), BinderInfo::Implicit, motive_ty),
            Binder::explicit(target.clone(), Expr::constant(induct.clone())),
        ],
        Expr::app(Expr::local(motive), Expr::local(target)),
    )
}

fn check_univ_params(decl: &Name, params: &[Name], terms: &[&Rc<Expr>]) -> Result<(), KernelError> {
    for (i, param) in params.iter().enumerate() {
        if params[..i].contains(param) {
            return Err(KernelError::DuplicateUniverse {
                decl: decl.clone(),
                param: param.clone(),
            });
        }
    }
    for term in terms {
        for used in term.level_params() {
            if !params.contains(&used) {
                return Err(KernelError::UndeclaredUniverse {
                    decl: decl.clone(),
                    param: used,
                });
            }
        }
    }
    Ok(())
}

fn check_term(decl: &Name, term: &Expr, allowed_locals: &[Name]) -> Result<(), KernelError> {
    if let Some(local) = term
        .free_locals()
        .into_iter()
        .find(|l| !allowed_locals.contains(l))
    {
        return Err(KernelError::UnboundLocal {
            decl: decl.clone(),
            local,
        });
    }
    if term.contains_choice() {
        return Err(KernelError::UnresolvedChoice(decl.clone()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::{Axiom, Constructor, InductiveType};

    fn nat() -> Rc<Expr> {
        Expr::constant("Nat")
    }

    fn def(name: &str, value: Rc<Expr>) -> Definition {
        Definition {
            name: Name::parse(name),
            univ_params: vec![],
            ty: Expr::arrow(nat(), nat()),
            value,
            kind: DefinitionKind::Def,
            noncomputable: false,
        }
    }

    fn nat_block() -> InductiveBlock {
        InductiveBlock {
            univ_params: vec![],
            num_params: 0,
            types: vec![InductiveType {
                name: Name::parse("Nat"),
                ty: Expr::sort(Level::of_nat(1)),
                ctors: vec![
                    Constructor {
                        name: Name::parse("Nat.zero"),
                        ty: nat(),
                    },
                    Constructor {
                        name: Name::parse("Nat.succ"),
                        ty: Expr::arrow(nat(), nat()),
                    },
                ],
            }],
        }
    }

    #[test]
    fn inductive_adds_type_constructors_and_recursor() {
        let env = add_declaration(&Environment::new(), Declaration::Inductive(nat_block())).unwrap();
        for name in ["Nat", "Nat.zero", "Nat.succ", "Nat.rec"] {
            assert!(env.contains(&Name::parse(name)), "missing {}", name);
        }
    }

    #[test]
    fn redeclaration_is_rejected() {
        let env = add_declaration(&Environment::new(), Declaration::Inductive(nat_block())).unwrap();
        let err = add_declaration(&env, Declaration::Inductive(nat_block())).unwrap_err();
        assert_eq!(err, KernelError::AlreadyDeclared(Name::parse("Nat")));
    }

    #[test]
    fn open_terms_are_rejected() {
        let bad = def("f", Expr::local("y"));
        let err = add_declaration(&Environment::new(), Declaration::Definition(bad)).unwrap_err();
        assert!(matches!(err, KernelError::UnboundLocal { .. }));

        let id = def(
            "id",
            Expr::lam(Binder::explicit(Name::parse("x"), nat()), Expr::local("x")),
        );
        assert!(add_declaration(&Environment::new(), Declaration::Definition(id)).is_ok());
    }

    #[test]
    fn universe_params_must_be_declared() {
        let ax = Axiom {
            name: Name::parse("A"),
            univ_params: vec![],
            ty: Expr::sort(Level::param("u")),
        };
        let err = add_declaration(&Environment::new(), Declaration::Axiom(ax)).unwrap_err();
        assert_eq!(err.to_string(), "undeclared universe parameter 'u' in 'A'");
    }

    #[test]
    fn choice_nodes_must_be_resolved() {
        let choice = Rc::new(Expr::Choice(vec![Expr::constant("Foo.f"), Expr::constant("Bar.f")]));
        let err = add_declaration(&Environment::new(), Declaration::Definition(def("g", choice))).unwrap_err();
        assert_eq!(err, KernelError::UnresolvedChoice(Name::parse("g")));
    }

    #[test]
    fn examples_are_not_added() {
        let mut ex = def("_example", Expr::lam(Binder::explicit(Name::parse("x"), nat()), Expr::local("x")));
        ex.kind = DefinitionKind::Example;
        let env = add_declaration(&Environment::new(), Declaration::Definition(ex)).unwrap();
        assert!(env.is_empty());
    }
}
