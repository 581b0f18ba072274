use crate::expr::Expr;
use crate::name::Name;
use std::rc::Rc;

/// Classification of definitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefinitionKind {
    Def,
    Theorem,
    Abbrev,
    Instance,
    /// Checked, never added to the environment.
    Example,
}

impl DefinitionKind {
    pub fn keyword(self) -> &'static str {
        match self {
            DefinitionKind::Def => "def",
            DefinitionKind::Theorem => "theorem",
            DefinitionKind::Abbrev => "abbrev",
            DefinitionKind::Instance => "instance",
            DefinitionKind::Example => "example",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Definition {
    pub name: Name,
    pub univ_params: Vec<Name>,
    pub ty: Rc<Expr>,
    pub value: Rc<Expr>,
    pub kind: DefinitionKind,
    pub noncomputable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Axiom {
    pub name: Name,
    pub univ_params: Vec<Name>,
    pub ty: Rc<Expr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constructor {
    pub name: Name,
    pub ty: Rc<Expr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InductiveType {
    pub name: Name,
    pub ty: Rc<Expr>,
    pub ctors: Vec<Constructor>,
}

/// One or more mutually inductive types sharing parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InductiveBlock {
    pub univ_params: Vec<Name>,
    pub num_params: usize,
    pub types: Vec<InductiveType>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Declaration {
    Definition(Definition),
    Axiom(Axiom),
    Inductive(InductiveBlock),
    /// Definitions elaborated together; their bodies refer to each other
    /// through the function binders of an `Expr::Equations` block.
    Mutual(Vec<Definition>),
}

impl Declaration {
    /// Names this declaration would introduce, in order.
    pub fn names(&self) -> Vec<Name> {
        match self {
            Declaration::Definition(def) => vec![def.name.clone()],
            Declaration::Axiom(ax) => vec![ax.name.clone()],
            Declaration::Inductive(block) => block
                .types
                .iter()
                .flat_map(|ty| {
                    std::iter::once(ty.name.clone()).chain(ty.ctors.iter().map(|c| c.name.clone()))
                })
                .collect(),
            Declaration::Mutual(defs) => defs.iter().map(|d| d.name.clone()).collect(),
        }
    }
}
