//! Interactive session
//!
//! Each input is read as one or more commands and stepped through the same
//! driver, so declarations, scopes and notations carry over from line to
//! line. Input that ends in the middle of a command is kept and completed by
//! the following lines; an empty line forces it through.

use crate::render::Renderer;
use frontend::parser::CommandSource;
use frontend::{Diagnostic, Driver, FrontendConfig, ParseError, Parser, Syntax};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::debug;

/// What became of one line of input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feed {
    /// The input is an incomplete command; more lines are needed.
    NeedMore,
    /// Every command was elaborated. `source` is the text the spans refer to.
    Done {
        source: String,
        diagnostics: Vec<Diagnostic>,
    },
    /// The driver stopped; the session is over.
    Ended {
        source: String,
        diagnostics: Vec<Diagnostic>,
    },
}

pub struct Session {
    driver: Driver,
    pending: String,
}

impl Session {
    pub fn new(config: FrontendConfig) -> Self {
        Session {
            driver: Driver::new(config),
            pending: String::new(),
        }
    }

    pub fn driver(&self) -> &Driver {
        &self.driver
    }

    pub fn is_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn feed(&mut self, line: &str) -> Feed {
        let force = line.trim().is_empty() && self.is_pending();
        if !self.pending.is_empty() {
            self.pending.push('\n');
        }
        self.pending.push_str(line);
        let source = std::mem::take(&mut self.pending);

        let mut parser = Parser::new(&source);
        let mut diagnostics = Vec::new();
        let mut stepped = false;
        loop {
            let step = match parser.next_command(self.driver.parser_config()) {
                Ok(stx) if stx.is_node("command.eoi") => break,
                Ok(stx) => {
                    stepped = true;
                    self.driver.step(&stx)
                }
                Err(ParseError::UnexpectedEof { .. }) if !stepped && !force => {
                    debug!("incomplete input, waiting for more");
                    self.pending = source;
                    return Feed::NeedMore;
                }
                Err(err) => self.driver.step_parse_error(err),
            };
            let terminal = step.is_terminal();
            diagnostics.extend(step.diagnostics().iter().cloned());
            if terminal {
                return Feed::Ended {
                    source,
                    diagnostics,
                };
            }
        }
        Feed::Done {
            source,
            diagnostics,
        }
    }

    /// End of input: reports scopes left open.
    pub fn finish(&mut self) -> Vec<Diagnostic> {
        self.pending.clear();
        let eoi = Syntax::node("command.eoi", vec![], Default::default());
        self.driver.step(&eoi).diagnostics().to_vec()
    }
}

const HELP: &str = "\
Enter commands as in a source file. Incomplete commands continue on the
next line; an empty line submits what has been typed so far.

  :help          show this message
  :env           list the constants declared so far
  :load <file>   run a file in this session
  :quit          leave the session";

fn print_diagnostics(source: &str, diagnostics: &[Diagnostic]) {
    let renderer = Renderer::new("<input>", source);
    let mut out = std::io::stdout();
    if let Err(err) = renderer.write_all(diagnostics, &mut out) {
        eprintln!("failed to print diagnostics: {}", err);
    }
}

fn print_env(session: &Session) {
    let mut names: Vec<String> = session
        .driver()
        .environment()
        .constants()
        .map(|c| format!("{} {}", c.kind.describe(), c.name))
        .collect();
    names.sort();
    for line in names {
        println!("{}", line);
    }
}

fn load(session: &mut Session, path: &str) -> bool {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            eprintln!("failed to read '{}': {}", path, err);
            return true;
        }
    };
    match session.feed(&text) {
        Feed::NeedMore => {
            let diagnostics = match session.feed("") {
                Feed::Done { diagnostics, .. } | Feed::Ended { diagnostics, .. } => diagnostics,
                Feed::NeedMore => Vec::new(),
            };
            print_diagnostics(&text, &diagnostics);
            true
        }
        Feed::Done { source, diagnostics } => {
            print_diagnostics(&source, &diagnostics);
            true
        }
        Feed::Ended { source, diagnostics } => {
            print_diagnostics(&source, &diagnostics);
            false
        }
    }
}

pub fn start(config: FrontendConfig) -> anyhow::Result<()> {
    let mut rl = DefaultEditor::new()?;
    let mut session = Session::new(config);
    println!("elab {}, type :help for help", env!("CARGO_PKG_VERSION"));

    loop {
        let prompt = if session.is_pending() { "... " } else { "> " };
        let line = match rl.readline(prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err.into()),
        };
        let trimmed = line.trim();
        if !session.is_pending() && trimmed.starts_with(':') {
            let _ = rl.add_history_entry(trimmed);
            let mut parts = trimmed.splitn(2, char::is_whitespace);
            match (parts.next(), parts.next().map(str::trim)) {
                (Some(":quit") | Some(":q"), _) => break,
                (Some(":help"), _) => println!("{}", HELP),
                (Some(":env"), _) => print_env(&session),
                (Some(":load"), Some(path)) if !path.is_empty() => {
                    if !load(&mut session, path) {
                        return Ok(());
                    }
                }
                _ => println!("unknown command, type :help for help"),
            }
            continue;
        }
        if trimmed.is_empty() && !session.is_pending() {
            continue;
        }
        let _ = rl.add_history_entry(line.as_str());
        match session.feed(&line) {
            Feed::NeedMore => {}
            Feed::Done { source, diagnostics } => print_diagnostics(&source, &diagnostics),
            Feed::Ended { source, diagnostics } => {
                print_diagnostics(&source, &diagnostics);
                return Ok(());
            }
        }
    }

    let diagnostics = session.finish();
    print_diagnostics("", &diagnostics);
    Ok(())
}
