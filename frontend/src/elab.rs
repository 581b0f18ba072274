//! Elaboration state and effects
//!
//! Every handler runs under three layers, outermost first: the read-only
//! `FrontendConfig`, the single mutable `ElabContext`, and the `ElabError`
//! channel that abandons the current command. The fourth layer, suspension
//! between commands, lives in `driver::StepResult`.

use crate::diagnostics::{Diagnostic, MessageLog};
use crate::notation::NotationEntry;
use crate::parser::ParseError;
use crate::parser_config::ParserConfig;
use crate::scope::{Scope, ScopeKind};
use crate::surface::{ScopeId, Span, Syntax};
use crate::symbol_map::{SymbolMap, SymbolSet};
use kernel::{BinderInfo, Declaration, Environment, KernelError, Level, Name};
use serde::Deserialize;
use std::fmt;
use thiserror::Error;
use tracing::debug;

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FrontendConfig {
    /// Commands processed before the run is aborted.
    pub step_budget: usize,
    /// Turn unterminated scopes at end of input into a fatal result.
    pub errors_are_fatal: bool,
    /// Nesting limit for commands dispatched from inside other commands.
    pub max_recursion_depth: usize,
}

impl Default for FrontendConfig {
    fn default() -> Self {
        FrontendConfig {
            step_budget: 10_000,
            errors_are_fatal: false,
            max_recursion_depth: 64,
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

pub type ElabResult<T> = Result<T, ElabError>;

fn join_names(names: &[Name]) -> String {
    names
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn expected_scope_name(expected: &Option<Name>) -> String {
    match expected {
        Some(name) => format!("expected name '{}'", name),
        None => "expected no name".to_string(),
    }
}

fn scope_label(name: &Option<Name>) -> String {
    match name {
        Some(name) => format!(" '{}'", name),
        None => String::new(),
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ElabError {
    #[error("{0}")]
    Parse(ParseError),
    #[error("malformed {kind}: {excerpt}")]
    Malformed {
        kind: String,
        excerpt: String,
        span: Span,
    },
    #[error("unexpected syntax {excerpt}")]
    UnknownSyntax {
        kind: String,
        excerpt: String,
        span: Span,
    },
    #[error("unknown identifier '{name}'")]
    UnknownIdentifier { name: Name, span: Span },
    #[error("ambiguous identifier '{name}', possible interpretations: {}", join_names(.candidates))]
    AmbiguousIdentifier {
        name: Name,
        candidates: Vec<Name>,
        span: Span,
    },
    #[error("unknown namespace '{name}'")]
    UnknownNamespace { name: Name, span: Span },
    #[error("unknown universe level '{name}'")]
    UnknownUniverse { name: Name, span: Span },
    #[error("invalid end, no open scope to end")]
    NoOpenScope { span: Span },
    #[error("invalid end of {kind}, {}", expected_scope_name(.expected))]
    ScopeMismatch {
        kind: ScopeKind,
        expected: Option<Name>,
        span: Span,
    },
    #[error("missing end for {kind}{}", scope_label(.name))]
    UnterminatedScope {
        kind: ScopeKind,
        name: Option<Name>,
        span: Span,
    },
    #[error("notation conflicts with existing notation {existing}")]
    NotationConflict { existing: String, span: Span },
    #[error("invalid notation, {message}")]
    InvalidNotation { message: String, span: Span },
    #[error("notation {shape} is reserved but has no implementation")]
    ReservedNotation { shape: String, span: Span },
    #[error("unknown attribute [{name}]")]
    UnknownAttribute { name: Name, span: Span },
    #[error("unknown option '{name}'")]
    UnknownOption { name: Name, span: Span },
    #[error("type mismatch at set_option '{name}', expected {expected}")]
    OptionType {
        name: Name,
        expected: &'static str,
        span: Span,
    },
    #[error("'{name}' has already been declared")]
    AlreadyDeclared { name: Name, span: Span },
    #[error("{message}")]
    Invalid { message: String, span: Span },
    #[error("{error}")]
    Kernel { error: KernelError, span: Span },
    #[error("maximum recursion depth has been reached")]
    RecursionDepth { span: Span },
    #[error("maximum universe level offset threshold ({limit}) has been reached, the limit is set with 'set_option maxUniverseOffset'")]
    UniverseOffset { limit: u64, span: Span },
    #[error("maximum number of elaboration steps exceeded")]
    BudgetExhausted,
}

impl ElabError {
    pub fn malformed(kind: &str, stx: &Syntax) -> Self {
        ElabError::Malformed {
            kind: kind.to_string(),
            excerpt: stx.excerpt(60),
            span: stx.span,
        }
    }

    pub fn invalid(message: impl Into<String>, span: Span) -> Self {
        ElabError::Invalid {
            message: message.into(),
            span,
        }
    }

    pub fn span(&self) -> Option<Span> {
        match self {
            ElabError::Parse(err) => Some(err.span()),
            ElabError::Malformed { span, .. }
            | ElabError::UnknownSyntax { span, .. }
            | ElabError::UnknownIdentifier { span, .. }
            | ElabError::AmbiguousIdentifier { span, .. }
            | ElabError::UnknownNamespace { span, .. }
            | ElabError::UnknownUniverse { span, .. }
            | ElabError::NoOpenScope { span }
            | ElabError::ScopeMismatch { span, .. }
            | ElabError::UnterminatedScope { span, .. }
            | ElabError::NotationConflict { span, .. }
            | ElabError::InvalidNotation { span, .. }
            | ElabError::ReservedNotation { span, .. }
            | ElabError::UnknownAttribute { span, .. }
            | ElabError::UnknownOption { span, .. }
            | ElabError::OptionType { span, .. }
            | ElabError::AlreadyDeclared { span, .. }
            | ElabError::Invalid { span, .. }
            | ElabError::Kernel { span, .. }
            | ElabError::RecursionDepth { span }
            | ElabError::UniverseOffset { span, .. } => Some(*span),
            ElabError::BudgetExhausted => None,
        }
    }

    /// Stable diagnostic code: F01xx syntax, F02xx resolution and scopes,
    /// F03xx notations, F04xx declarations, F05xx kernel, F09xx limits.
    pub fn code(&self) -> &'static str {
        match self {
            ElabError::Parse(_) => "F0100",
            ElabError::Malformed { .. } => "F0101",
            ElabError::UnknownSyntax { .. } => "F0102",
            ElabError::UnknownIdentifier { .. } => "F0200",
            ElabError::AmbiguousIdentifier { .. } => "F0201",
            ElabError::UnknownNamespace { .. } => "F0202",
            ElabError::UnknownUniverse { .. } => "F0203",
            ElabError::NoOpenScope { .. } => "F0210",
            ElabError::ScopeMismatch { .. } => "F0211",
            ElabError::UnterminatedScope { .. } => "F0212",
            ElabError::NotationConflict { .. } => "F0300",
            ElabError::InvalidNotation { .. } => "F0301",
            ElabError::ReservedNotation { .. } => "F0302",
            ElabError::UnknownAttribute { .. } => "F0400",
            ElabError::UnknownOption { .. } => "F0401",
            ElabError::OptionType { .. } => "F0402",
            ElabError::AlreadyDeclared { .. } => "F0403",
            ElabError::Invalid { .. } => "F0404",
            ElabError::Kernel { .. } => "F0500",
            ElabError::RecursionDepth { .. } => "F0900",
            ElabError::BudgetExhausted => "F0901",
            ElabError::UniverseOffset { .. } => "F0902",
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        let diagnostic = Diagnostic::error(self.to_string()).with_code(self.code());
        match self.span() {
            Some(span) => diagnostic.with_span(span),
            None => diagnostic,
        }
    }
}

impl From<ParseError> for ElabError {
    fn from(err: ParseError) -> Self {
        ElabError::Parse(err)
    }
}

// =============================================================================
// Kernel seam
// =============================================================================

/// Consumer of elaborated declarations.
pub trait Kernel {
    fn admit(&mut self, env: &Environment, decl: Declaration) -> Result<Environment, KernelError>;
}

/// Structural admission from the `kernel` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReferenceKernel;

impl Kernel for ReferenceKernel {
    fn admit(&mut self, env: &Environment, decl: Declaration) -> Result<Environment, KernelError> {
        kernel::add_declaration(env, decl)
    }
}

// =============================================================================
// Context
// =============================================================================

/// Default for the `maxUniverseOffset` option.
pub const DEFAULT_MAX_UNIVERSE_OFFSET: u64 = 32;
/// `maxUniverseOffset` cannot be raised past this.
pub const UNIVERSE_OFFSET_CEILING: u64 = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Bool(bool),
    Nat(u64),
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Bool(b) => write!(f, "{}", b),
            OptionValue::Nat(n) => write!(f, "{}", n),
        }
    }
}

/// A `variable` binder, kept as syntax and translated per declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarBinding {
    pub name: Name,
    pub info: BinderInfo,
    pub ty: Syntax,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructureInfo {
    pub name: Name,
    pub ctor: Name,
    pub num_params: usize,
    pub fields: Vec<Name>,
    /// Fields with a `S.field._default` definition.
    pub defaults: Vec<Name>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: Name,
    pub args: Vec<String>,
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ElabContext {
    pub env: Environment,
    /// Innermost last; index 0 is the file's root namespace.
    pub scopes: Vec<Scope>,
    pub notations: SymbolMap<NotationEntry>,
    pub universes: SymbolMap<Level>,
    pub vars: Vec<VarBinding>,
    pub options: SymbolMap<OptionValue>,
    pub parser_config: ParserConfig,
    pub messages: MessageLog,
    pub step_budget: usize,
    pub namespace_path: Name,
    /// Every namespace opened or declared into so far.
    pub namespaces: SymbolSet,
    /// Alternative names for constants (`export`, private declarations).
    pub aliases: SymbolMap<Vec<Name>>,
    pub protected: SymbolSet,
    pub attributes: SymbolMap<Vec<Attribute>>,
    pub structures: SymbolMap<StructureInfo>,
    next_notation: u64,
    next_scope: usize,
    next_private: u64,
    next_match: u64,
    parser_config_dirty: bool,
}

impl Default for ElabContext {
    fn default() -> Self {
        ElabContext::new(Environment::new(), FrontendConfig::default().step_budget)
    }
}

impl ElabContext {
    pub fn new(env: Environment, step_budget: usize) -> Self {
        ElabContext {
            env,
            scopes: vec![Scope::root()],
            notations: SymbolMap::new(),
            universes: SymbolMap::new(),
            vars: Vec::new(),
            options: SymbolMap::new(),
            parser_config: ParserConfig::new(),
            messages: MessageLog::new(),
            step_budget,
            namespace_path: Name::anonymous(),
            namespaces: SymbolSet::new(),
            aliases: SymbolMap::new(),
            protected: SymbolSet::new(),
            attributes: SymbolMap::new(),
            structures: SymbolMap::new(),
            next_notation: 0,
            next_scope: 0,
            next_private: 0,
            next_match: 0,
            parser_config_dirty: false,
        }
    }

    pub fn current_scope(&self) -> &Scope {
        self.scopes.last().unwrap_or_else(|| unreachable!("root scope is never popped"))
    }

    pub fn current_scope_mut(&mut self) -> &mut Scope {
        self.scopes
            .last_mut()
            .unwrap_or_else(|| unreachable!("root scope is never popped"))
    }

    pub fn fresh_scope(&mut self) -> ScopeId {
        let id = self.next_scope;
        self.next_scope += 1;
        ScopeId(id)
    }

    pub fn next_notation_index(&mut self) -> u64 {
        let n = self.next_notation;
        self.next_notation += 1;
        n
    }

    pub fn next_private_index(&mut self) -> u64 {
        let n = self.next_private;
        self.next_private += 1;
        n
    }

    pub fn next_match_index(&mut self) -> u64 {
        let n = self.next_match;
        self.next_match += 1;
        n
    }

    /// Name a new declaration gets in the current namespace.
    pub fn qualify(&self, name: &Name) -> Name {
        if name.is_root_anchored() {
            name.strip_root_anchor()
        } else {
            self.namespace_path.append(name)
        }
    }

    /// Record `ns` and all of its prefixes as namespaces.
    pub fn register_namespace(&mut self, ns: &Name) {
        for prefix in ns.prefixes() {
            if !prefix.is_anonymous() {
                self.namespaces.insert(prefix);
            }
        }
    }

    pub fn is_namespace(&self, ns: &Name) -> bool {
        self.namespaces.contains(ns) || self.env.has_namespace(ns)
    }

    /// True when `name` names a constant, directly or through an alias.
    pub fn is_declared(&self, name: &Name) -> bool {
        self.env.contains(name) || self.aliases.contains(name)
    }

    pub fn add_alias(&mut self, alias: Name, target: Name) {
        let mut targets = self.aliases.get(&alias).cloned().unwrap_or_default();
        if !targets.contains(&target) {
            targets.push(target);
        }
        self.aliases.insert(alias, targets);
    }

    pub fn add_attribute(&mut self, name: &Name, attr: Attribute) {
        let mut attrs = self.attributes.get(name).cloned().unwrap_or_default();
        if !attrs.iter().any(|a| a.name == attr.name) {
            attrs.push(attr);
        }
        self.attributes.insert(name.clone(), attrs);
    }

    pub fn attributes_of(&self, name: &Name) -> &[Attribute] {
        self.attributes.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn option(&self, name: &str) -> Option<&OptionValue> {
        self.options.get(&Name::parse(name))
    }

    /// When set, identifiers that resolve to nothing are passed on as
    /// constants for the kernel to judge.
    pub fn defer_unknown(&self) -> bool {
        !matches!(self.option("deferUnknown"), Some(OptionValue::Bool(false)))
    }

    /// Largest universe literal or `+k` offset accepted in source.
    pub fn max_universe_offset(&self) -> u64 {
        match self.option("maxUniverseOffset") {
            Some(OptionValue::Nat(n)) => *n,
            _ => DEFAULT_MAX_UNIVERSE_OFFSET,
        }
    }

    pub fn mark_parser_config_dirty(&mut self) {
        self.parser_config_dirty = true;
    }

    /// Rebuild the token table from the surviving notations if a scope
    /// change invalidated it. Runs at most once per command.
    pub fn flush_parser_config(&mut self) -> bool {
        if !self.parser_config_dirty {
            return false;
        }
        self.parser_config_dirty = false;
        self.parser_config = ParserConfig::from_rules(self.notations.values().map(|e| e.rule.clone()));
        debug!(rules = self.parser_config.rules.len(), "parser table rebuilt");
        true
    }
}

// =============================================================================
// Handler environment
// =============================================================================

/// What every command handler gets: configuration, the context and the kernel.
pub struct Elab<'a> {
    pub config: &'a FrontendConfig,
    pub ctx: &'a mut ElabContext,
    pub kernel: &'a mut dyn Kernel,
    pub depth: usize,
}

impl<'a> Elab<'a> {
    pub fn new(config: &'a FrontendConfig, ctx: &'a mut ElabContext, kernel: &'a mut dyn Kernel) -> Self {
        Elab {
            config,
            ctx,
            kernel,
            depth: 0,
        }
    }

    /// Hand `decl` to the kernel and commit the extended environment.
    pub fn admit(&mut self, decl: Declaration, span: Span) -> ElabResult<()> {
        let env = self
            .kernel
            .admit(&self.ctx.env, decl)
            .map_err(|error| ElabError::Kernel { error, span })?;
        self.ctx.env = env;
        Ok(())
    }

    pub fn info(&mut self, message: String, span: Span) {
        self.ctx.messages.push(Diagnostic::info(message).with_span(span));
    }

    pub fn report(&mut self, err: &ElabError) {
        self.ctx.messages.push(err.to_diagnostic());
    }

    /// Run a command nested inside the current one. Charges one step.
    pub fn nested<T>(
        &mut self,
        span: Span,
        f: impl FnOnce(&mut Elab<'_>) -> ElabResult<T>,
    ) -> ElabResult<T> {
        if self.depth >= self.config.max_recursion_depth {
            return Err(ElabError::RecursionDepth { span });
        }
        if self.ctx.step_budget == 0 {
            return Err(ElabError::BudgetExhausted);
        }
        self.ctx.step_budget -= 1;
        let mut inner = Elab {
            config: self.config,
            ctx: &mut *self.ctx,
            kernel: &mut *self.kernel,
            depth: self.depth + 1,
        };
        f(&mut inner)
    }
}
