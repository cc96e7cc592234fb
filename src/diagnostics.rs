use core::fmt;
use core::fmt::Display;

use strum::Display as StrumDisplay;

/// Position of a statement in the source program. `line` is the physical
/// 1-based source line; `basic_line` is the BASIC line-number label if the
/// line carries one (jump targets refer to these, not to physical lines).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceLoc {
    pub line: u32,
    pub basic_line: Option<u32>,
}

impl SourceLoc {
    pub fn new(line: u32) -> Self {
        SourceLoc {
            line,
            basic_line: None,
        }
    }

    pub fn with_basic_line(line: u32, basic_line: u32) -> Self {
        SourceLoc {
            line,
            basic_line: Some(basic_line),
        }
    }
}

impl Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.basic_line {
            Some(n) => write!(f, "line {} ({})", n, self.line),
            None => write!(f, "line {}", self.line),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, StrumDisplay)]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub loc: Option<SourceLoc>,
    pub message: String,
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.loc {
            Some(loc) => write!(f, "{}: {}: {}", self.severity, loc, self.message),
            None => write!(f, "{}: {}", self.severity, self.message),
        }
    }
}

/// Collects warnings and non-fatal notices from all compilation stages.
/// Fatal errors travel as `Result` values; this sink only ever holds
/// diagnostics that do not abort the pipeline.
#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Diagnostics::default()
    }

    pub fn warn(&mut self, loc: Option<SourceLoc>, message: impl Into<String>) {
        let message = message.into();
        log::warn!("{message}");
        self.entries.push(Diagnostic {
            severity: Severity::Warning,
            loc,
            message,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries
            .iter()
            .filter(|d| d.severity == Severity::Warning)
    }
}
