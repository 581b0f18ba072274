//! Notation registration
//!
//! A notation command becomes a grammar rule for the reader plus a
//! transformer that rewrites each use into ordinary term syntax. Each
//! registration gets a kind tag `fixity#N` from a counter on the context, so
//! two notations with the same surface form never share a syntax kind.

use crate::elab::{ElabContext, ElabError, ElabResult};
use crate::parser_config::{NotationRule, ParserConfig, ParserConfigDelta, RuleItem, MAX_PREC};
use crate::surface::{ScopeId, Span, Syntax, SyntaxKind};
use kernel::Name;
use tracing::{debug, warn};

/// Rewrites a matched use of a notation into term syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transformer {
    /// Placeholder names, left to right.
    pub params: Vec<Name>,
    pub body: Syntax,
}

impl Transformer {
    /// Substitute `args` for the placeholders. Everything the body itself
    /// contributes is marked with `scope` and moved to the use site.
    pub fn apply(&self, args: &[Syntax], scope: ScopeId, span: Span) -> ElabResult<Syntax> {
        if args.len() != self.params.len() {
            return Err(ElabError::invalid(
                format!(
                    "notation expects {} arguments, got {}",
                    self.params.len(),
                    args.len()
                ),
                span,
            ));
        }
        Ok(self.substitute(&self.body, args, scope, span))
    }

    fn substitute(&self, stx: &Syntax, args: &[Syntax], scope: ScopeId, span: Span) -> Syntax {
        if let SyntaxKind::Ident(name) = &stx.kind {
            if stx.scopes.is_empty() {
                if let Some(i) = self.params.iter().position(|p| p == name) {
                    return args[i].clone();
                }
            }
        }
        let kind = match &stx.kind {
            SyntaxKind::Node(kind, children) => SyntaxKind::Node(
                kind.clone(),
                children
                    .iter()
                    .map(|c| self.substitute(c, args, scope, span))
                    .collect(),
            ),
            other => other.clone(),
        };
        let marked = Syntax {
            kind,
            span,
            scopes: stx.scopes.clone(),
        };
        if marked.is_missing() {
            marked
        } else {
            marked.add_scope(scope)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotationEntry {
    pub kind_tag: Name,
    pub fixity: String,
    pub rule: NotationRule,
    /// `None` for a reservation that nothing has implemented yet.
    pub transformer: Option<Transformer>,
    /// Discarded when the enclosing scope ends.
    pub local: bool,
    /// The reservation this entry replaced.
    pub implements: Option<Name>,
}

impl NotationEntry {
    pub fn is_reserved(&self) -> bool {
        self.rule.reserved
    }
}

enum Outcome {
    Register { implemented: Option<Name> },
    Ignore,
    Conflict(String),
}

/// How two rules with the same literal tokens relate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeMatch {
    /// Different tokens; the rules never compete.
    Distinct,
    Identical,
    /// Same layout, but some precedence given explicitly on both sides differs.
    PrecedenceDiffers,
    /// Same tokens in a different placeholder layout.
    PartialMismatch,
}

pub fn compare_shapes(a: &NotationRule, b: &NotationRule) -> ShapeMatch {
    if !a.tokens().eq(b.tokens()) {
        return ShapeMatch::Distinct;
    }
    if a.items.len() != b.items.len() {
        return ShapeMatch::PartialMismatch;
    }
    let mut precedence_differs =
        a.explicit_precedence && b.explicit_precedence && a.precedence != b.precedence;
    for (x, y) in a.items.iter().zip(&b.items) {
        match (x, y) {
            (RuleItem::Token(_), RuleItem::Token(_)) => {}
            (
                RuleItem::Placeholder { prec: p, explicit: ex },
                RuleItem::Placeholder { prec: q, explicit: ey },
            ) => {
                if *ex && *ey && p != q {
                    precedence_differs = true;
                }
            }
            _ => return ShapeMatch::PartialMismatch,
        }
    }
    if precedence_differs {
        ShapeMatch::PrecedenceDiffers
    } else {
        ShapeMatch::Identical
    }
}

/// Copy precedences the implementation left implicit from the reservation.
fn inherit_precedences(rule: &mut NotationRule, reserved: &NotationRule) {
    if !rule.explicit_precedence && reserved.explicit_precedence {
        rule.precedence = reserved.precedence;
        rule.explicit_precedence = true;
    }
    for (item, from) in rule.items.iter_mut().zip(&reserved.items) {
        if let (
            RuleItem::Placeholder { prec, explicit },
            RuleItem::Placeholder {
                prec: reserved_prec,
                explicit: true,
            },
        ) = (item, from)
        {
            if !*explicit {
                *prec = *reserved_prec;
                *explicit = true;
            }
        }
    }
}

fn precedence_value(stx: &Syntax) -> ElabResult<Option<u32>> {
    match &stx.kind {
        SyntaxKind::Missing => Ok(None),
        SyntaxKind::Num(n) => u32::try_from(*n).map(Some).map_err(|_| {
            ElabError::InvalidNotation {
                message: format!("precedence {} out of range", n),
                span: stx.span,
            }
        }),
        _ => Err(ElabError::malformed("precedence", stx)),
    }
}

fn token_text(stx: &Syntax) -> ElabResult<String> {
    let SyntaxKind::Str(raw) = &stx.kind else {
        return Err(ElabError::malformed("notation token", stx));
    };
    let text = raw.trim();
    if text.is_empty() || text.chars().any(char::is_whitespace) {
        return Err(ElabError::InvalidNotation {
            message: format!("invalid token {:?}", raw),
            span: stx.span,
        });
    }
    Ok(text.to_string())
}

fn placeholder(prec: u32, explicit: bool) -> RuleItem {
    RuleItem::Placeholder { prec, explicit }
}

/// Items and placeholder names for the fixed-shape fixities.
fn fixity_items(fixity: &str, token: String, prec: u32, explicit: bool) -> (Vec<RuleItem>, usize) {
    let next = prec.saturating_add(1).min(MAX_PREC);
    let tok = RuleItem::Token(token);
    match fixity {
        "infixl" => (vec![placeholder(prec, explicit), tok, placeholder(next, explicit)], 2),
        "infixr" => (vec![placeholder(next, explicit), tok, placeholder(prec, explicit)], 2),
        "infix" => (vec![placeholder(next, explicit), tok, placeholder(next, explicit)], 2),
        "prefix" => (vec![tok, placeholder(prec, explicit)], 1),
        _ => (vec![placeholder(prec, explicit), tok], 1),
    }
}

/// Mixfix items. A placeholder written `x:` without a number is a
/// maximum-precedence argument; an unannotated one takes 0 between two
/// tokens and the notation's own precedence elsewhere.
fn mixfix_items(items: &[Syntax], prec: u32) -> ElabResult<(Vec<RuleItem>, Vec<Name>)> {
    let mut rule_items = Vec::new();
    let mut params: Vec<Name> = Vec::new();
    for (i, item) in items.iter().enumerate() {
        if item.is_node("notation.param") {
            let [name, prec_stx] = item.args() else {
                return Err(ElabError::malformed("notation parameter", item));
            };
            let name = name
                .as_ident()
                .ok_or_else(|| ElabError::malformed("notation parameter", item))?
                .clone();
            if params.contains(&name) {
                return Err(ElabError::InvalidNotation {
                    message: format!("duplicate placeholder '{}'", name),
                    span: item.span,
                });
            }
            let between_tokens = i > 0
                && i + 1 < items.len()
                && !items[i - 1].is_node("notation.param")
                && !items[i + 1].is_node("notation.param");
            let slot = if prec_stx.as_atom() == Some(":") {
                placeholder(MAX_PREC, true)
            } else {
                match precedence_value(prec_stx)? {
                    Some(p) => placeholder(p, true),
                    None if between_tokens => placeholder(0, false),
                    None => placeholder(prec, false),
                }
            };
            rule_items.push(slot);
            params.push(name);
        } else {
            rule_items.push(RuleItem::Token(token_text(item)?));
        }
    }
    Ok((rule_items, params))
}

/// Register a `notation`/`infix...`/`reserve` command. A conflict is logged
/// and the registration skipped; the command itself still succeeds.
pub fn register(stx: &Syntax, ctx: &mut ElabContext) -> ElabResult<ParserConfigDelta> {
    let reserved = stx.is_node("command.reserve");
    let [local, fixity, prec, items, body] = stx.args() else {
        return Err(ElabError::malformed("notation", stx));
    };
    let fixity = fixity
        .as_atom()
        .ok_or_else(|| ElabError::malformed("notation", stx))?
        .to_string();
    let explicit_prec = precedence_value(prec)?;
    let precedence = explicit_prec.unwrap_or(MAX_PREC);
    let explicit = explicit_prec.is_some();

    let (rule_items, params) = if fixity == "notation" {
        mixfix_items(items.args(), precedence)?
    } else {
        let [token] = items.args() else {
            return Err(ElabError::malformed("notation", stx));
        };
        let (rule_items, arity) = fixity_items(&fixity, token_text(token)?, precedence, explicit);
        let params = (0..arity).map(|i| Name::parse(&format!("#{}", i))).collect();
        (rule_items, params)
    };
    if !rule_items.iter().any(|item| !item.is_placeholder()) {
        return Err(ElabError::InvalidNotation {
            message: "a notation needs at least one token".to_string(),
            span: items.span,
        });
    }
    if matches!(
        rule_items.as_slice(),
        [RuleItem::Placeholder { .. }, RuleItem::Placeholder { .. }, ..]
    ) {
        return Err(ElabError::InvalidNotation {
            message: "a token must follow the first placeholder".to_string(),
            span: items.span,
        });
    }

    let transformer = body.present().map(|body| {
        let body = if fixity == "notation" {
            body.clone()
        } else {
            let mut children = vec![body.clone()];
            children.extend(
                params
                    .iter()
                    .map(|p| Syntax::ident(p.clone(), body.span)),
            );
            Syntax::node("term.app", children, body.span)
        };
        Transformer {
            params: params.clone(),
            body,
        }
    });

    let index = ctx.next_notation_index();
    let kind_tag = format!("{}#{}", fixity, index);
    let mut rule = NotationRule {
        kind_tag: kind_tag.clone(),
        items: rule_items,
        precedence,
        explicit_precedence: explicit,
        reserved,
        order: index,
    };

    let outcome = {
        let mut existing: Vec<&NotationEntry> = ctx.notations.values().collect();
        existing.sort_by_key(|e| e.rule.order);
        let mut implemented: Option<Name> = None;
        let mut outcome = None;
        for entry in existing {
            let shape = compare_shapes(&entry.rule, &rule);
            match (entry.is_reserved(), reserved, shape) {
                (_, _, ShapeMatch::Distinct) => {}
                (false, false, ShapeMatch::Identical) => {
                    outcome = Some(Outcome::Conflict(entry.rule.shape()));
                    break;
                }
                (false, false, _) => {}
                (true, true, ShapeMatch::Identical) | (false, true, ShapeMatch::Identical) => {
                    outcome = Some(Outcome::Ignore);
                    break;
                }
                (true, false, ShapeMatch::Identical) => {
                    inherit_precedences(&mut rule, &entry.rule);
                    implemented = Some(entry.kind_tag.clone());
                }
                (_, _, ShapeMatch::PrecedenceDiffers) | (_, _, ShapeMatch::PartialMismatch) => {
                    outcome = Some(Outcome::Conflict(entry.rule.shape()));
                    break;
                }
            }
        }
        outcome.unwrap_or(Outcome::Register { implemented })
    };
    let implemented = match outcome {
        Outcome::Conflict(existing) => {
            warn!(%existing, "notation conflict, registration skipped");
            let err = ElabError::NotationConflict {
                existing,
                span: stx.span,
            };
            ctx.messages.push(err.to_diagnostic());
            return Ok(ParserConfigDelta::default());
        }
        Outcome::Ignore => {
            debug!(shape = %rule.shape(), "reservation already present, ignored");
            return Ok(ParserConfigDelta::default());
        }
        Outcome::Register { implemented } => implemented,
    };

    let before = ctx.parser_config.clone();
    if let Some(tag) = &implemented {
        debug!(reservation = %tag, implementation = %kind_tag, "reserved notation implemented");
        ctx.notations.remove(tag);
    }
    let entry = NotationEntry {
        kind_tag: Name::parse(&kind_tag),
        fixity,
        rule,
        transformer,
        local: local.as_atom() == Some("local"),
        implements: implemented,
    };
    debug!(kind = %kind_tag, shape = %entry.rule.shape(), local = entry.local, "registering notation");
    ctx.notations.insert(entry.kind_tag.clone(), entry);
    ctx.parser_config = ParserConfig::from_rules(ctx.notations.values().map(|e| e.rule.clone()));
    Ok(ParserConfigDelta::between(&before, &ctx.parser_config))
}
