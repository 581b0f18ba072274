//! Command driver
//!
//! `Driver::step` elaborates one command and hands control back with the
//! diagnostics it produced and the change it made to the token table. The
//! caller parses the next command against the updated table and steps again.
//! A failing command is rolled back and reported; only an exhausted step
//! budget stops the run.

use crate::commands;
use crate::diagnostics::Diagnostic;
use crate::elab::{Elab, ElabContext, ElabError, FrontendConfig, Kernel, ReferenceKernel};
use crate::parser::{CommandSource, ParseError, Parser};
use crate::parser_config::{ParserConfig, ParserConfigDelta};
use crate::scope;
use crate::surface::Syntax;
use kernel::Environment;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepResult {
    /// The command was handled and the driver waits for the next one.
    Suspended {
        diagnostics: Vec<Diagnostic>,
        parser_delta: ParserConfigDelta,
    },
    /// End of input was reached.
    Finished { diagnostics: Vec<Diagnostic> },
    /// The run was aborted; no further commands are accepted.
    Fatal { diagnostics: Vec<Diagnostic> },
}

impl StepResult {
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            StepResult::Suspended { diagnostics, .. }
            | StepResult::Finished { diagnostics }
            | StepResult::Fatal { diagnostics } => diagnostics,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, StepResult::Suspended { .. })
    }
}

/// Everything a whole-source run reported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutcome {
    pub diagnostics: Vec<Diagnostic>,
    pub fatal: bool,
    /// Commands that reached a handler.
    pub commands: usize,
}

impl RunOutcome {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingCommand,
    Finished,
    Fatal,
}

pub struct Driver<K: Kernel = ReferenceKernel> {
    config: FrontendConfig,
    ctx: ElabContext,
    kernel: K,
    state: State,
}

impl Driver<ReferenceKernel> {
    pub fn new(config: FrontendConfig) -> Self {
        Driver::with_kernel(config, ReferenceKernel)
    }
}

impl<K: Kernel> Driver<K> {
    pub fn with_kernel(config: FrontendConfig, kernel: K) -> Self {
        let ctx = ElabContext::new(Environment::new(), config.step_budget);
        Driver {
            config,
            ctx,
            kernel,
            state: State::AwaitingCommand,
        }
    }

    pub fn config(&self) -> &FrontendConfig {
        &self.config
    }

    pub fn context(&self) -> &ElabContext {
        &self.ctx
    }

    pub fn environment(&self) -> &Environment {
        &self.ctx.env
    }

    /// The token table the next command must be parsed against.
    pub fn parser_config(&self) -> &ParserConfig {
        &self.ctx.parser_config
    }

    pub fn is_done(&self) -> bool {
        self.state != State::AwaitingCommand
    }

    fn terminal(&self, diagnostics: Vec<Diagnostic>) -> StepResult {
        match self.state {
            State::Fatal => StepResult::Fatal { diagnostics },
            _ => StepResult::Finished { diagnostics },
        }
    }

    /// Elaborate one parsed command.
    pub fn step(&mut self, stx: &Syntax) -> StepResult {
        if self.state != State::AwaitingCommand {
            warn!("command received after the run ended");
            return self.terminal(Vec::new());
        }

        if stx.is_node("command.eoi") {
            return self.finish();
        }

        if self.ctx.step_budget == 0 {
            warn!("step budget exhausted");
            self.state = State::Fatal;
            let mut diagnostics = self.ctx.messages.drain();
            diagnostics.push(ElabError::BudgetExhausted.to_diagnostic());
            return StepResult::Fatal { diagnostics };
        }
        self.ctx.step_budget -= 1;

        let before = self.ctx.parser_config.clone();
        let snapshot = self.ctx.clone();
        let result = {
            let mut elab = Elab::new(&self.config, &mut self.ctx, &mut self.kernel);
            commands::dispatch(&mut elab, stx)
        };
        if let Err(err) = result {
            debug!(code = err.code(), error = %err, "command failed, rolling back");
            let messages = std::mem::take(&mut self.ctx.messages);
            let budget = self.ctx.step_budget;
            self.ctx = snapshot;
            self.ctx.messages = messages;
            self.ctx.step_budget = budget;
            self.ctx.messages.push(err.to_diagnostic());
            if matches!(err, ElabError::BudgetExhausted) {
                self.state = State::Fatal;
                return StepResult::Fatal {
                    diagnostics: self.ctx.messages.drain(),
                };
            }
        }

        self.ctx.flush_parser_config();
        let parser_delta = ParserConfigDelta::between(&before, &self.ctx.parser_config);
        StepResult::Suspended {
            diagnostics: self.ctx.messages.drain(),
            parser_delta,
        }
    }

    /// Report a command the reader could not parse. Costs no budget.
    pub fn step_parse_error(&mut self, err: ParseError) -> StepResult {
        if self.state != State::AwaitingCommand {
            return self.terminal(Vec::new());
        }
        let mut diagnostics = self.ctx.messages.drain();
        diagnostics.push(ElabError::Parse(err).to_diagnostic());
        StepResult::Suspended {
            diagnostics,
            parser_delta: ParserConfigDelta::default(),
        }
    }

    fn finish(&mut self) -> StepResult {
        let mut diagnostics = self.ctx.messages.drain();
        for open in scope::unterminated(&self.ctx) {
            diagnostics.push(
                ElabError::UnterminatedScope {
                    kind: open.kind,
                    name: open.name.clone(),
                    span: open.span,
                }
                .to_diagnostic(),
            );
        }
        let unterminated = diagnostics.iter().any(Diagnostic::is_error);
        if unterminated && self.config.errors_are_fatal {
            self.state = State::Fatal;
            StepResult::Fatal { diagnostics }
        } else {
            self.state = State::Finished;
            StepResult::Finished { diagnostics }
        }
    }

    /// Drive `source` to completion, reading each command against the
    /// token table left by the previous one.
    pub fn run(&mut self, source: &str) -> RunOutcome {
        let mut parser = Parser::new(source);
        self.run_with(&mut parser)
    }

    pub fn run_with(&mut self, source: &mut impl CommandSource) -> RunOutcome {
        let mut outcome = RunOutcome::default();
        loop {
            let step = match source.next_command(&self.ctx.parser_config) {
                Ok(stx) => {
                    if !stx.is_node("command.eoi") && self.state == State::AwaitingCommand {
                        outcome.commands += 1;
                    }
                    self.step(&stx)
                }
                Err(err) => self.step_parse_error(err),
            };
            let terminal = step.is_terminal();
            outcome.fatal = matches!(step, StepResult::Fatal { .. });
            let diagnostics = match step {
                StepResult::Suspended { diagnostics, .. }
                | StepResult::Finished { diagnostics }
                | StepResult::Fatal { diagnostics } => diagnostics,
            };
            outcome.diagnostics.extend(diagnostics);
            if terminal {
                if outcome.fatal && self.ctx.step_budget == 0 {
                    outcome.commands = outcome.commands.saturating_sub(1);
                }
                return outcome;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Severity;
    use kernel::{Declaration, KernelError, Name};

    fn step_source(driver: &mut Driver, src: &str) -> Vec<StepResult> {
        let mut parser = Parser::new(src);
        let mut results = Vec::new();
        loop {
            let stx = parser.next_command(driver.parser_config()).unwrap();
            let result = driver.step(&stx);
            let done = result.is_terminal();
            results.push(result);
            if done {
                return results;
            }
        }
    }

    #[test]
    fn each_command_suspends_once() {
        let mut driver = Driver::new(FrontendConfig::default());
        let results = step_source(&mut driver, "def a : Nat := 1\ndef b : Nat := a");
        assert_eq!(results.len(), 3);
        assert!(matches!(results[0], StepResult::Suspended { .. }));
        assert!(matches!(results[2], StepResult::Finished { .. }));
        assert!(driver.environment().contains(&Name::parse("b")));
    }

    #[test]
    fn failures_roll_back_the_command() {
        let mut driver = Driver::new(FrontendConfig::default());
        let results = step_source(&mut driver, "universe u\nuniverse v u\n#check Sort v");
        let errors: Vec<&Diagnostic> = results[1].diagnostics().iter().collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, Some("F0404"));
        // `v` was declared before the failure and must be gone again.
        assert_eq!(results[2].diagnostics()[0].code, Some("F0203"));
    }

    #[test]
    fn notations_report_a_parser_delta() {
        let mut driver = Driver::new(FrontendConfig::default());
        let results = step_source(&mut driver, "infixl:65 \" +++ \" => HAppend.hAppend");
        let StepResult::Suspended { parser_delta, .. } = &results[0] else {
            panic!("expected a suspension");
        };
        assert_eq!(parser_delta.added_tokens, vec!["+++".to_string()]);
    }

    #[test]
    fn unterminated_scopes_are_reported_at_the_end() {
        let mut driver = Driver::new(FrontendConfig::default());
        let results = step_source(&mut driver, "namespace A\nsection");
        let last = results.last().unwrap();
        assert!(matches!(last, StepResult::Finished { .. }));
        let messages: Vec<String> = last.diagnostics().iter().map(|d| d.message.clone()).collect();
        assert_eq!(messages, vec!["missing end for section", "missing end for namespace 'A'"]);

        let config = FrontendConfig {
            errors_are_fatal: true,
            ..FrontendConfig::default()
        };
        let mut strict = Driver::new(config);
        let results = step_source(&mut strict, "section S");
        assert!(matches!(results.last(), Some(StepResult::Fatal { .. })));
    }

    #[test]
    fn budget_exhaustion_is_fatal_and_final() {
        let config = FrontendConfig {
            step_budget: 2,
            ..FrontendConfig::default()
        };
        let mut driver = Driver::new(config);
        let outcome = driver.run("def a : Nat := 1\ndef b : Nat := 2\ndef c : Nat := 3");
        assert!(outcome.fatal);
        assert_eq!(outcome.commands, 2);
        let last = outcome.diagnostics.last().unwrap();
        assert_eq!(last.code, Some("F0901"));
        assert!(!driver.environment().contains(&Name::parse("c")));
        let after = driver.step(&Syntax::node("command.eoi", vec![], Default::default()));
        assert!(matches!(after, StepResult::Fatal { .. }));
    }

    #[test]
    fn parse_errors_do_not_stop_the_run() {
        let mut driver = Driver::new(FrontendConfig::default());
        let outcome = driver.run("def a : Nat := )\ndef b : Nat := 2");
        assert!(!outcome.fatal);
        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(outcome.diagnostics[0].code, Some("F0100"));
        assert!(driver.environment().contains(&Name::parse("b")));
    }

    struct Refusing;

    impl Kernel for Refusing {
        fn admit(&mut self, _env: &Environment, decl: Declaration) -> Result<Environment, KernelError> {
            Err(KernelError::AlreadyDeclared(decl.names()[0].clone()))
        }
    }

    #[test]
    fn kernel_rejections_become_diagnostics() {
        let mut driver = Driver::with_kernel(FrontendConfig::default(), Refusing);
        let outcome = driver.run("axiom p : Prop\n#check p");
        assert_eq!(outcome.diagnostics[0].code, Some("F0500"));
        assert_eq!(outcome.diagnostics[0].severity, Severity::Error);
        assert!(driver.environment().is_empty());
    }
}
