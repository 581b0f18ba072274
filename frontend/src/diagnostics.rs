use crate::surface::Span;
use std::fmt;

fn is_unknown_span(span: Span) -> bool {
    span.start == 0 && span.end == 0 && span.line == 0 && span.col == 0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Info => write!(f, "info"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: Option<&'static str>,
    pub message: String,
    pub span: Option<Span>,
    pub labels: Vec<(Span, String)>,
}

impl Diagnostic {
    pub fn new(severity: Severity, message: String) -> Self {
        Self {
            severity,
            code: None,
            message,
            span: None,
            labels: Vec::new(),
        }
    }

    pub fn error(message: String) -> Self {
        Self::new(Severity::Error, message)
    }

    pub fn warning(message: String) -> Self {
        Self::new(Severity::Warning, message)
    }

    pub fn info(message: String) -> Self {
        Self::new(Severity::Info, message)
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        if !is_unknown_span(span) {
            self.span = Some(span);
        }
        self
    }

    pub fn with_label(mut self, span: Span, message: String) -> Self {
        if !is_unknown_span(span) {
            self.labels.push((span, message));
        }
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    pub fn message_with_code(&self) -> String {
        match self.code {
            Some(code) => format!("[{}] {}", code, self.message),
            None => self.message.clone(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.span {
            Some(span) => write!(
                f,
                "{}:{}: {}: {}",
                span.line,
                span.col,
                self.severity,
                self.message_with_code()
            ),
            None => write!(f, "{}: {}", self.severity, self.message_with_code()),
        }
    }
}

/// Append-only diagnostic log of the running elaboration. The driver drains
/// it once per command and hands the batch to its caller.
#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    messages: Vec<Diagnostic>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.messages.push(diagnostic);
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn has_errors(&self) -> bool {
        self.messages.iter().any(Diagnostic::is_error)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.messages.iter()
    }

    /// Take every message logged so far, in the order they were logged.
    pub fn drain(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_span_ignores_unknown_sentinel_span() {
        let diagnostic = Diagnostic::error("test".to_string()).with_span(Span {
            start: 0,
            end: 0,
            line: 0,
            col: 0,
        });
        assert!(diagnostic.span.is_none());
    }

    #[test]
    fn with_span_keeps_real_zero_offset_span() {
        let span = Span {
            start: 0,
            end: 0,
            line: 1,
            col: 0,
        };
        let diagnostic = Diagnostic::error("test".to_string()).with_span(span);
        assert_eq!(diagnostic.span, Some(span));
    }

    #[test]
    fn drain_empties_the_log_in_order() {
        let mut log = MessageLog::new();
        log.push(Diagnostic::info("first".to_string()));
        log.push(Diagnostic::error("second".to_string()).with_code("E0001"));
        assert!(log.has_errors());
        let drained = log.drain();
        assert!(log.is_empty());
        let rendered: Vec<String> = drained.iter().map(|d| d.to_string()).collect();
        assert_eq!(rendered, vec!["info: first", "error: [E0001] second"]);
    }
}
