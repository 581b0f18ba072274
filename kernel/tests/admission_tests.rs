use kernel::{
    add_declaration, Axiom, Binder, BinderInfo, Constructor, ConstantKind, Declaration, Definition,
    DefinitionKind, Environment, Equation, Equations, Expr, InductiveBlock, InductiveType,
    KernelError, Level, Name,
};
use std::rc::Rc;

fn list_block() -> InductiveBlock {
    let u = Level::param("u");
    let alpha = Name::parse("α");
    let list_alpha = Expr::app(
        Rc::new(Expr::Const(Name::parse("List"), vec![u.clone()])),
        Expr::local(alpha.clone()),
    );
    let alpha_binder = Binder::new(alpha.clone(), BinderInfo::Implicit, Expr::sort(u.clone().succ()));
    InductiveBlock {
        univ_params: vec![Name::parse("u")],
        num_params: 1,
        types: vec![InductiveType {
            name: Name::parse("List"),
            ty: Expr::pi(
                Binder::explicit(alpha.clone(), Expr::sort(u.clone().succ())),
                Expr::sort(u.succ()),
            ),
            ctors: vec![
                Constructor {
                    name: Name::parse("List.nil"),
                    ty: Expr::pi(alpha_binder.clone(), list_alpha.clone()),
                },
                Constructor {
                    name: Name::parse("List.cons"),
                    ty: Expr::pis(
                        &[alpha_binder],
                        Expr::arrow(
                            Expr::local(alpha),
                            Expr::arrow(list_alpha.clone(), list_alpha),
                        ),
                    ),
                },
            ],
        }],
    }
}

#[test]
fn polymorphic_inductive_is_admitted() {
    let env = add_declaration(&Environment::new(), Declaration::Inductive(list_block()))
        .expect("list should be admitted");
    let cons = env.find(&Name::parse("List.cons")).expect("constructor present");
    insta::assert_snapshot!(cons.ty.to_string(), @"{α : Type u} → α → List.{u} α → List.{u} α");
    let list = env.find(&Name::parse("List")).expect("type present");
    assert_eq!(
        list.kind,
        ConstantKind::Inductive {
            num_params: 1,
            ctors: vec![Name::parse("List.nil"), Name::parse("List.cons")],
        }
    );
}

#[test]
fn recursor_type_is_printed_with_motive() {
    let env = add_declaration(&Environment::new(), Declaration::Inductive(list_block()))
        .expect("list should be admitted");
    let rec = env.find(&Name::parse("List.rec")).expect("recursor present");
    insta::assert_snapshot!(rec.ty.to_string(), @"{motive : List → Sort u_motive} → (t : List) → motive t");
}

#[test]
fn constructor_with_foreign_head_is_rejected() {
    let mut block = list_block();
    block.types[0].ctors[0].ty = Expr::constant("Nat");
    let err = add_declaration(&Environment::new(), Declaration::Inductive(block)).unwrap_err();
    assert_eq!(
        err,
        KernelError::InvalidConstructor {
            ctor: Name::parse("List.nil"),
            induct: Name::parse("List"),
        }
    );
}

#[test]
fn mutual_definitions_see_each_other() {
    let nat = Expr::constant("Nat");
    let even = Name::parse("even");
    let odd = Name::parse("odd");
    let n = Name::parse("n");
    let body = |other: &Name| {
        Expr::lam(
            Binder::explicit(n.clone(), nat.clone()),
            Expr::app(Expr::local(other.clone()), Expr::local(n.clone())),
        )
    };
    let make = |name: &Name, other: &Name| Definition {
        name: name.clone(),
        univ_params: vec![],
        ty: Expr::arrow(nat.clone(), Expr::constant("Bool")),
        value: body(other),
        kind: DefinitionKind::Def,
        noncomputable: false,
    };
    let env = add_declaration(
        &Environment::new(),
        Declaration::Mutual(vec![make(&even, &odd), make(&odd, &even)]),
    )
    .expect("mutual block admitted");
    assert!(env.contains(&even) && env.contains(&odd));

    let lone = add_declaration(&Environment::new(), Declaration::Definition(make(&even, &odd)));
    assert!(matches!(lone, Err(KernelError::UnboundLocal { .. })));
}

#[test]
fn equation_blocks_bind_their_functions() {
    let nat = Expr::constant("Nat");
    let f = Name::parse("@f");
    let x = Name::parse("x");
    let eqns = Equations {
        fns: vec![Binder::explicit(f.clone(), Expr::arrow(nat.clone(), nat.clone()))],
        equations: vec![Equation {
            fn_index: 0,
            vars: vec![Binder::explicit(x.clone(), nat.clone())],
            patterns: vec![Expr::app(Expr::constant("Nat.succ"), Expr::local(x.clone()))],
            rhs: Expr::app(Expr::local(f), Expr::local(x)),
        }],
    };
    let def = Definition {
        name: Name::parse("f"),
        univ_params: vec![],
        ty: Expr::arrow(nat.clone(), nat),
        value: Rc::new(Expr::Equations(Rc::new(eqns))),
        kind: DefinitionKind::Def,
        noncomputable: false,
    };
    assert!(add_declaration(&Environment::new(), Declaration::Definition(def)).is_ok());
}

#[test]
fn duplicate_universe_parameters_are_rejected() {
    let ax = Axiom {
        name: Name::parse("A"),
        univ_params: vec![Name::parse("u"), Name::parse("u")],
        ty: Expr::sort(Level::param("u")),
    };
    let err = add_declaration(&Environment::new(), Declaration::Axiom(ax)).unwrap_err();
    insta::assert_snapshot!(err.to_string(), @"duplicate universe parameter 'u' in 'A'");
}
