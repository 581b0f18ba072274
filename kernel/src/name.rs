//! Hierarchical names
//!
//! Names like `Nat.add` or `List.map` are stored as a shared slice of
//! components, so cloning a name is a reference-count bump. Ordering is
//! lexicographic by component, which keeps every name sharing a prefix in a
//! contiguous range of an ordered map.

use std::fmt;
use std::rc::Rc;

/// The component that anchors a name at the root namespace: `_root_.foo`.
pub const ROOT_ANCHOR: &str = "_root_";

#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name {
    components: Rc<[Rc<str>]>,
}

impl Default for Name {
    fn default() -> Self {
        Name {
            components: Rc::from(Vec::new()),
        }
    }
}

impl Name {
    /// The anonymous (empty) name, also the path of the root namespace.
    pub fn anonymous() -> Self {
        Name::default()
    }

    pub fn from_components<I, S>(components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let components: Vec<Rc<str>> = components
            .into_iter()
            .filter(|c| !c.as_ref().is_empty())
            .map(|c| Rc::from(c.as_ref()))
            .collect();
        Name {
            components: components.into(),
        }
    }

    /// Parse a dotted name. `Foo.bar` has two components; empty segments are dropped.
    pub fn parse(dotted: &str) -> Self {
        Name::from_components(dotted.split('.'))
    }

    pub fn is_anonymous(&self) -> bool {
        self.components.is_empty()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.is_anonymous()
    }

    pub fn is_atomic(&self) -> bool {
        self.components.len() == 1
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.components.iter().map(|c| c.as_ref())
    }

    pub fn first(&self) -> Option<&str> {
        self.components.first().map(|c| c.as_ref())
    }

    pub fn last(&self) -> Option<&str> {
        self.components.last().map(|c| c.as_ref())
    }

    /// Everything but the last component.
    pub fn prefix(&self) -> Name {
        match self.components.len() {
            0 => Name::anonymous(),
            n => Name {
                components: self.components[..n - 1].into(),
            },
        }
    }

    /// Everything but the first component.
    pub fn drop_first(&self) -> Name {
        if self.components.is_empty() {
            return Name::anonymous();
        }
        Name {
            components: self.components[1..].into(),
        }
    }

    /// `self ++ other`; appending to the anonymous name returns `other`.
    pub fn append(&self, other: &Name) -> Name {
        if self.is_anonymous() {
            return other.clone();
        }
        if other.is_anonymous() {
            return self.clone();
        }
        let joined: Vec<Rc<str>> = self
            .components
            .iter()
            .chain(other.components.iter())
            .cloned()
            .collect();
        Name {
            components: joined.into(),
        }
    }

    /// Extend with a single string component.
    pub fn push(&self, component: &str) -> Name {
        self.append(&Name::from_components([component]))
    }

    /// True when every component of `self` starts `other`. The anonymous
    /// name is a prefix of everything.
    pub fn is_prefix_of(&self, other: &Name) -> bool {
        self.components.len() <= other.components.len()
            && self
                .components
                .iter()
                .zip(other.components.iter())
                .all(|(a, b)| a == b)
    }

    pub fn strip_prefix(&self, prefix: &Name) -> Option<Name> {
        if !prefix.is_prefix_of(self) {
            return None;
        }
        Some(Name {
            components: self.components[prefix.len()..].into(),
        })
    }

    pub fn is_root_anchored(&self) -> bool {
        self.first() == Some(ROOT_ANCHOR)
    }

    /// `_root_.Foo.bar` becomes `Foo.bar`; other names are returned unchanged.
    pub fn strip_root_anchor(&self) -> Name {
        if self.is_root_anchored() {
            self.drop_first()
        } else {
            self.clone()
        }
    }

    /// All prefixes from the full name down to the anonymous name.
    pub fn prefixes(&self) -> Vec<Name> {
        (0..=self.components.len())
            .rev()
            .map(|n| Name {
                components: self.components[..n].into(),
            })
            .collect()
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_anonymous() {
            return write!(f, "[anonymous]");
        }
        for (i, component) in self.components.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{}", component)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}", self)
    }
}

impl From<&str> for Name {
    fn from(dotted: &str) -> Self {
        Name::parse(dotted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display_round_trip() {
        let name = Name::parse("Foo.Bar.baz");
        assert_eq!(name.len(), 3);
        assert_eq!(name.to_string(), "Foo.Bar.baz");
        assert_eq!(name.last(), Some("baz"));
        assert_eq!(name.prefix(), Name::parse("Foo.Bar"));
    }

    #[test]
    fn prefix_queries() {
        let ns = Name::parse("Foo");
        let full = Name::parse("Foo.bar");
        assert!(ns.is_prefix_of(&full));
        assert!(Name::anonymous().is_prefix_of(&full));
        assert!(!full.is_prefix_of(&ns));
        assert_eq!(full.strip_prefix(&ns), Some(Name::parse("bar")));
        assert_eq!(full.prefixes().len(), 3);
    }

    #[test]
    fn root_anchor_is_stripped() {
        let anchored = Name::parse("_root_.Foo.f");
        assert!(anchored.is_root_anchored());
        assert_eq!(anchored.strip_root_anchor(), Name::parse("Foo.f"));
    }

    #[test]
    fn names_sharing_a_prefix_sort_together() {
        let mut names = vec![
            Name::parse("Foo.z"),
            Name::parse("Bar"),
            Name::parse("Foo"),
            Name::parse("Foo.a"),
            Name::parse("Fooz"),
        ];
        names.sort();
        let rendered: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        assert_eq!(rendered, vec!["Bar", "Foo", "Foo.a", "Foo.z", "Fooz"]);
    }
}
