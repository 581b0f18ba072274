use crate::declaration::DefinitionKind;
use crate::expr::Expr;
use crate::name::Name;
use im::OrdMap;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstantKind {
    Definition(DefinitionKind),
    Axiom,
    Inductive { num_params: usize, ctors: Vec<Name> },
    Constructor { induct: Name },
    Recursor { induct: Name },
}

impl ConstantKind {
    pub fn describe(&self) -> &'static str {
        match self {
            ConstantKind::Definition(kind) => kind.keyword(),
            ConstantKind::Axiom => "axiom",
            ConstantKind::Inductive { .. } => "inductive",
            ConstantKind::Constructor { .. } => "constructor",
            ConstantKind::Recursor { .. } => "recursor",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantInfo {
    pub name: Name,
    pub univ_params: Vec<Name>,
    pub ty: Rc<Expr>,
    pub value: Option<Rc<Expr>>,
    pub kind: ConstantKind,
}

/// Persistent global environment. Cloning shares structure, so handing a
/// snapshot to a caller and extending the original are both cheap.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    constants: OrdMap<Name, Rc<ConstantInfo>>,
}

impl Environment {
    pub fn new() -> Self {
        Environment::default()
    }

    pub fn contains(&self, name: &Name) -> bool {
        self.constants.contains_key(name)
    }

    pub fn find(&self, name: &Name) -> Option<&Rc<ConstantInfo>> {
        self.constants.get(name)
    }

    pub fn len(&self) -> usize {
        self.constants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constants.is_empty()
    }

    /// Add or replace a constant, returning the extended environment.
    pub fn insert(&self, info: ConstantInfo) -> Environment {
        Environment {
            constants: self.constants.update(info.name.clone(), Rc::new(info)),
        }
    }

    /// True when some constant lives strictly under `ns`.
    pub fn has_namespace(&self, ns: &Name) -> bool {
        if ns.is_anonymous() {
            return !self.constants.is_empty();
        }
        self.constants
            .range(ns.clone()..)
            .take_while(|(name, _)| ns.is_prefix_of(name))
            .any(|(name, _)| name.len() > ns.len())
    }

    /// Constants in name order.
    pub fn constants(&self) -> impl Iterator<Item = &Rc<ConstantInfo>> {
        self.constants.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &Name> {
        self.constants.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axiom(name: &str) -> ConstantInfo {
        ConstantInfo {
            name: Name::parse(name),
            univ_params: vec![],
            ty: Expr::constant("Prop"),
            value: None,
            kind: ConstantKind::Axiom,
        }
    }

    #[test]
    fn namespaces_are_found_by_prefix_range() {
        let env = Environment::new()
            .insert(axiom("Foo.a"))
            .insert(axiom("Fooz"))
            .insert(axiom("Bar.b.c"));
        assert!(env.has_namespace(&Name::parse("Foo")));
        assert!(env.has_namespace(&Name::parse("Bar.b")));
        assert!(!env.has_namespace(&Name::parse("Fooz")));
        assert!(!env.has_namespace(&Name::parse("Baz")));
    }

    #[test]
    fn insert_does_not_touch_snapshots() {
        let before = Environment::new().insert(axiom("p"));
        let after = before.insert(axiom("q"));
        assert_eq!(before.len(), 1);
        assert_eq!(after.len(), 2);
        assert!(!before.contains(&Name::parse("q")));
    }
}
