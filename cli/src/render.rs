//! Diagnostic rendering
//!
//! Diagnostics with a span become `ariadne` reports against the source text.
//! Those without one (budget exhaustion) print as a single line.

use ariadne::{Color, Config, Label, Report, ReportKind, Source};
use frontend::{Diagnostic, Severity};
use std::io::{self, Write};

fn report_kind(severity: Severity) -> (ReportKind<'static>, Color) {
    match severity {
        Severity::Error => (ReportKind::Error, Color::Red),
        Severity::Warning => (ReportKind::Warning, Color::Yellow),
        Severity::Info => (ReportKind::Advice, Color::Cyan),
    }
}

/// `ariadne` counts characters, spans count bytes.
fn char_offset(source: &str, byte: usize) -> usize {
    let byte = byte.min(source.len());
    match source.get(..byte) {
        Some(prefix) => prefix.chars().count(),
        None => source.char_indices().take_while(|(i, _)| *i < byte).count(),
    }
}

pub struct Renderer<'a> {
    filename: &'a str,
    source: &'a str,
    color: bool,
}

impl<'a> Renderer<'a> {
    pub fn new(filename: &'a str, source: &'a str) -> Self {
        Renderer {
            filename,
            source,
            color: true,
        }
    }

    pub fn plain(mut self) -> Self {
        self.color = false;
        self
    }

    pub fn write(&self, diagnostic: &Diagnostic, out: &mut impl Write) -> io::Result<()> {
        let Some(span) = diagnostic.span else {
            return writeln!(out, "{}", diagnostic);
        };
        let (kind, color) = report_kind(diagnostic.severity);
        let start = char_offset(self.source, span.start);
        let end = char_offset(self.source, span.end).max(start);
        let mut report = Report::build(kind, self.filename, start)
            .with_config(Config::default().with_color(self.color))
            .with_message(&diagnostic.message)
            .with_label(
                Label::new((self.filename, start..end))
                    .with_message(&diagnostic.message)
                    .with_color(color),
            );
        if let Some(code) = diagnostic.code {
            report = report.with_code(code);
        }
        for (label_span, text) in &diagnostic.labels {
            let s = char_offset(self.source, label_span.start);
            let e = char_offset(self.source, label_span.end).max(s);
            report = report.with_label(Label::new((self.filename, s..e)).with_message(text));
        }
        report
            .finish()
            .write((self.filename, Source::from(self.source)), out)
    }

    pub fn write_all(&self, diagnostics: &[Diagnostic], out: &mut impl Write) -> io::Result<()> {
        for diagnostic in diagnostics {
            self.write(diagnostic, out)?;
        }
        Ok(())
    }

    /// Render to a string without colour codes.
    pub fn to_plain_string(&self, diagnostics: &[Diagnostic]) -> String {
        let renderer = Renderer {
            color: false,
            ..*self
        };
        let mut buffer = Vec::new();
        if renderer.write_all(diagnostics, &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}
