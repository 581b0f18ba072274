//! Live token table and grammar extensions consulted by the reader.

use std::collections::BTreeSet;
use std::fmt;

/// `max` precedence: application arguments and atoms.
pub const MAX_PREC: u32 = 1024;
/// `arg`
pub const ARG_PREC: u32 = 1023;
/// `lead`
pub const LEAD_PREC: u32 = 1022;
/// `min`
pub const MIN_PREC: u32 = 10;
/// Precedence of `→`, right associative.
pub const ARROW_PREC: u32 = 25;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleItem {
    Token(String),
    /// `explicit` is false when the precedence was filled in by default.
    Placeholder { prec: u32, explicit: bool },
}

impl RuleItem {
    pub fn is_placeholder(&self) -> bool {
        matches!(self, RuleItem::Placeholder { .. })
    }
}

impl fmt::Display for RuleItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleItem::Token(text) => write!(f, "{:?}", text),
            RuleItem::Placeholder { prec, explicit: true } => write!(f, "_:{}", prec),
            RuleItem::Placeholder { .. } => write!(f, "_"),
        }
    }
}

/// One grammar extension. A rule is *leading* when it starts with a token and
/// *trailing* when it starts with a placeholder that binds the term parsed so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotationRule {
    pub kind_tag: String,
    pub items: Vec<RuleItem>,
    pub precedence: u32,
    pub explicit_precedence: bool,
    pub reserved: bool,
    /// Registration order; earlier rules are tried first.
    pub order: u64,
}

impl NotationRule {
    pub fn is_leading(&self) -> bool {
        matches!(self.items.first(), Some(RuleItem::Token(_)))
    }

    /// First literal token; the parser indexes rules by it.
    pub fn head_token(&self) -> Option<&str> {
        match self.items.as_slice() {
            [RuleItem::Token(t), ..] => Some(t),
            [RuleItem::Placeholder { .. }, RuleItem::Token(t), ..] => Some(t),
            _ => None,
        }
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.items.iter().filter_map(|item| match item {
            RuleItem::Token(t) => Some(t.as_str()),
            RuleItem::Placeholder { .. } => None,
        })
    }

    pub fn arity(&self) -> usize {
        self.items.iter().filter(|i| i.is_placeholder()).count()
    }

    /// Surface shape, e.g. `_:65 "+" _:66`.
    pub fn shape(&self) -> String {
        let items: Vec<String> = self.items.iter().map(|i| i.to_string()).collect();
        items.join(" ")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParserConfig {
    pub tokens: BTreeSet<String>,
    pub rules: Vec<NotationRule>,
}

impl ParserConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rule(&mut self, rule: NotationRule) {
        for token in rule.tokens() {
            self.tokens.insert(token.to_string());
        }
        self.rules.push(rule);
        self.rules.sort_by_key(|r| r.order);
    }

    /// Rebuild from scratch out of the given rules.
    pub fn from_rules(rules: impl IntoIterator<Item = NotationRule>) -> Self {
        let mut config = ParserConfig::new();
        for rule in rules {
            config.add_rule(rule);
        }
        config
    }

    pub fn leading_rules<'a>(&'a self, token: &'a str) -> impl Iterator<Item = &'a NotationRule> {
        self.rules
            .iter()
            .filter(move |r| r.is_leading() && r.head_token() == Some(token))
    }

    pub fn trailing_rules<'a>(&'a self, token: &'a str) -> impl Iterator<Item = &'a NotationRule> {
        self.rules
            .iter()
            .filter(move |r| !r.is_leading() && r.head_token() == Some(token))
    }

    pub fn is_leading_token(&self, token: &str) -> bool {
        self.leading_rules(token).next().is_some()
    }
}

/// What changed in the parser configuration while one command ran.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParserConfigDelta {
    pub added_tokens: Vec<String>,
    pub removed_tokens: Vec<String>,
    pub added_rules: Vec<NotationRule>,
    pub removed_rules: Vec<String>,
}

impl ParserConfigDelta {
    pub fn between(before: &ParserConfig, after: &ParserConfig) -> Self {
        let added_tokens = after.tokens.difference(&before.tokens).cloned().collect();
        let removed_tokens = before.tokens.difference(&after.tokens).cloned().collect();
        let added_rules = after
            .rules
            .iter()
            .filter(|r| !before.rules.iter().any(|b| b.kind_tag == r.kind_tag))
            .cloned()
            .collect();
        let removed_rules = before
            .rules
            .iter()
            .filter(|b| !after.rules.iter().any(|r| r.kind_tag == b.kind_tag))
            .map(|b| b.kind_tag.clone())
            .collect();
        ParserConfigDelta {
            added_tokens,
            removed_tokens,
            added_rules,
            removed_rules,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added_tokens.is_empty()
            && self.removed_tokens.is_empty()
            && self.added_rules.is_empty()
            && self.removed_rules.is_empty()
    }

    /// Replay onto a copy of the table the delta was computed from.
    pub fn apply(&self, config: &mut ParserConfig) {
        config
            .rules
            .retain(|r| !self.removed_rules.contains(&r.kind_tag));
        for token in &self.removed_tokens {
            config.tokens.remove(token);
        }
        for rule in &self.added_rules {
            config.add_rule(rule.clone());
        }
        for token in &self.added_tokens {
            config.tokens.insert(token.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn infix(tag: &str, token: &str, prec: u32, order: u64) -> NotationRule {
        NotationRule {
            kind_tag: tag.to_string(),
            items: vec![
                RuleItem::Placeholder { prec, explicit: false },
                RuleItem::Token(token.to_string()),
                RuleItem::Placeholder { prec: prec + 1, explicit: false },
            ],
            precedence: prec,
            explicit_precedence: true,
            reserved: false,
            order,
        }
    }

    #[test]
    fn delta_replays_to_the_same_table() {
        let before = ParserConfig::from_rules([infix("infixl#0", "+", 65, 0)]);
        let after = ParserConfig::from_rules([infix("infixl#1", "*", 70, 1)]);
        let delta = ParserConfigDelta::between(&before, &after);
        assert_eq!(delta.added_tokens, vec!["*".to_string()]);
        assert_eq!(delta.removed_rules, vec!["infixl#0".to_string()]);

        let mut replayed = before.clone();
        delta.apply(&mut replayed);
        assert_eq!(replayed, after);
    }

    #[test]
    fn rules_are_indexed_by_head_token() {
        let config = ParserConfig::from_rules([infix("infixl#0", "+", 65, 0)]);
        assert_eq!(config.trailing_rules("+").count(), 1);
        assert!(!config.is_leading_token("+"));
        assert_eq!(config.rules[0].shape(), "_ \"+\" _");
    }
}
