//! Elaborator frontend: turns surface commands into kernel declarations.

pub mod commands;
pub mod decl;
pub mod diagnostics;
pub mod driver;
pub mod elab;
pub mod notation;
pub mod parser;
pub mod parser_config;
pub mod resolve;
pub mod scope;
pub mod surface;
pub mod symbol_map;
pub mod translate;

pub use diagnostics::{Diagnostic, MessageLog, Severity};
pub use driver::{Driver, RunOutcome, StepResult};
pub use elab::{ElabContext, ElabError, ElabResult, FrontendConfig, Kernel, ReferenceKernel};
pub use parser::{CommandSource, ParseError, Parser};
pub use parser_config::{ParserConfig, ParserConfigDelta};
pub use surface::{PositionMap, Span, Syntax, SyntaxKind};
