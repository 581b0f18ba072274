use crate::name::Name;
use std::fmt;

// =============================================================================
// Universe Levels
// =============================================================================

/// Universe levels
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Level {
    Zero,
    Succ(Box<Level>),
    Max(Box<Level>, Box<Level>),
    IMax(Box<Level>, Box<Level>),
    Param(Name),
    /// `_`, solved by the kernel elaborator
    Hole,
}

impl Level {
    pub fn param(name: impl Into<Name>) -> Level {
        Level::Param(name.into())
    }

    pub fn succ(self) -> Level {
        Level::Succ(Box::new(self))
    }

    pub fn max(self, other: Level) -> Level {
        Level::Max(Box::new(self), Box::new(other))
    }

    pub fn of_nat(n: u64) -> Level {
        (0..n).fold(Level::Zero, |acc, _| acc.succ())
    }

    /// Offset view: `succ^k base`.
    pub fn to_offset(&self) -> (&Level, u64) {
        let mut level = self;
        let mut k = 0;
        while let Level::Succ(inner) = level {
            level = inner;
            k += 1;
        }
        (level, k)
    }

    /// Universe parameters mentioned by this level, first occurrence first.
    pub fn collect_params(&self, out: &mut Vec<Name>) {
        match self {
            Level::Zero | Level::Hole => {}
            Level::Param(name) => {
                if !out.contains(name) {
                    out.push(name.clone());
                }
            }
            Level::Succ(inner) => inner.collect_params(out),
            Level::Max(a, b) | Level::IMax(a, b) => {
                a.collect_params(out);
                b.collect_params(out);
            }
        }
    }

    pub fn has_param(&self) -> bool {
        let mut params = Vec::new();
        self.collect_params(&mut params);
        !params.is_empty()
    }
}

fn level_key(level: &Level) -> String {
    match level {
        Level::Zero => "0".to_string(),
        Level::Hole => "_".to_string(),
        Level::Param(name) => format!("P({})", name),
        Level::Succ(inner) => format!("S({})", level_key(inner)),
        Level::Max(a, b) => format!("M({}, {})", level_key(a), level_key(b)),
        Level::IMax(a, b) => format!("I({}, {})", level_key(a), level_key(b)),
    }
}

fn collect_max(level: Level, out: &mut Vec<Level>) {
    match level {
        Level::Max(a, b) => {
            collect_max(*a, out);
            collect_max(*b, out);
        }
        other => out.push(other),
    }
}

fn normalize_max(levels: Vec<Level>) -> Level {
    let mut flat = Vec::new();
    for level in levels {
        collect_max(level, &mut flat);
    }
    flat.retain(|level| !matches!(level, Level::Zero));

    let mut unique: Vec<Level> = Vec::new();
    for level in flat {
        if !unique.contains(&level) {
            unique.push(level);
        }
    }
    unique.sort_by_key(level_key);

    let mut iter = unique.into_iter();
    match iter.next() {
        None => Level::Zero,
        Some(first) => iter.fold(first, Level::max),
    }
}

/// Flatten nested `max`, drop `0` arguments and collapse `imax u 0` to `0`.
pub fn normalize_level(level: Level) -> Level {
    match level {
        Level::Zero | Level::Param(_) | Level::Hole => level,
        Level::Succ(inner) => normalize_level(*inner).succ(),
        Level::IMax(a, b) => {
            let b_norm = normalize_level(*b);
            if matches!(b_norm, Level::Zero) {
                Level::Zero
            } else {
                normalize_max(vec![normalize_level(*a), b_norm])
            }
        }
        Level::Max(a, b) => normalize_max(vec![normalize_level(*a), normalize_level(*b)]),
    }
}

pub fn level_eq(l1: &Level, l2: &Level) -> bool {
    normalize_level(l1.clone()) == normalize_level(l2.clone())
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_offset() {
            (Level::Zero, k) => write!(f, "{}", k),
            (base, 0) => match base {
                Level::Param(name) => write!(f, "{}", name),
                Level::Hole => write!(f, "_"),
                Level::Max(a, b) => write!(f, "max {} {}", Paren(a), Paren(b)),
                Level::IMax(a, b) => write!(f, "imax {} {}", Paren(a), Paren(b)),
                Level::Zero | Level::Succ(_) => write!(f, "0"),
            },
            (base, k) => write!(f, "{}+{}", Paren(base), k),
        }
    }
}

struct Paren<'a>(&'a Level);

impl fmt::Display for Paren<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.to_offset() {
            (Level::Zero, _) | (Level::Param(_), 0) | (Level::Hole, 0) => write!(f, "{}", self.0),
            _ => write!(f, "({})", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numerals_print_as_numbers() {
        assert_eq!(Level::of_nat(0).to_string(), "0");
        assert_eq!(Level::of_nat(2).to_string(), "2");
        assert_eq!(Level::param("u").succ().to_string(), "u+1");
        assert_eq!(
            Level::param("u").max(Level::param("v")).to_string(),
            "max u v"
        );
    }

    #[test]
    fn normalize_drops_zero_and_duplicates() {
        let u = Level::param("u");
        let messy = Level::Max(
            Box::new(Level::Zero),
            Box::new(u.clone().max(u.clone())),
        );
        assert_eq!(normalize_level(messy), u);
        assert!(level_eq(
            &Level::IMax(Box::new(u.clone()), Box::new(Level::Zero)),
            &Level::Zero
        ));
    }

    #[test]
    fn params_are_collected_in_order() {
        let level = Level::param("v").max(Level::param("u").succ()).max(Level::param("v"));
        let mut params = Vec::new();
        level.collect_params(&mut params);
        assert_eq!(params, vec![Name::parse("v"), Name::parse("u")]);
    }
}
