//! Error reports
//!
//! An [`EvalError`] is turned into a [`Report`], which renders as plain
//! text, ANSI-coloured text, or a JSON/YAML/TOML document.
//!
//! Text output looks like:
//!
//! ```text
//! error: contract broken by the value of `foo`
//!  --> <main>:1:18
//!   |
//! 1 | { foo | String = 1, bar = 2 }
//!   |                  ^ applied to this value
//!   = expected `String`, got a number
//! ```

use serde::Serialize;

use crate::error::{EvalError, Span};

/// Rendering formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    /// Plain text
    Text,
    /// Text with ANSI colour codes
    AnsiText,
    /// JSON document
    Json,
    /// YAML document
    Yaml,
    /// TOML document
    Toml,
}

/// A source location attached to a report.
#[derive(Debug, Clone, Serialize)]
pub struct Label {
    /// Source name
    pub source: String,
    /// 1-indexed line
    pub line: usize,
    /// 1-indexed column
    pub column: usize,
    /// Byte offset of the start
    pub start: usize,
    /// Byte offset of the end
    pub end: usize,
    /// Message shown under the caret
    pub message: String,
    #[serde(skip)]
    line_text: String,
}

impl Label {
    fn new(span: &Span, message: impl Into<String>) -> Self {
        let (line, column) = span.line_col();
        Self {
            source: span.source.name.clone(),
            line,
            column,
            start: span.start,
            end: span.end,
            message: message.into(),
            line_text: span.line_text().to_string(),
        }
    }
}

/// A rendered-independent description of an error.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    /// Always `error`
    pub severity: &'static str,
    /// Main message
    pub message: String,
    /// Source locations, primary first
    pub labels: Vec<Label>,
    /// Extra notes
    pub notes: Vec<String>,
}

impl Report {
    /// Build a report from an error.
    pub fn from_error(err: &EvalError) -> Self {
        let mut labels = Vec::new();
        match err {
            EvalError::ContractBroken {
                contract_span,
                value_span,
                ..
            } => {
                if let Some(span) = value_span {
                    labels.push(Label::new(span, "applied to this value"));
                }
                if let Some(span) = contract_span {
                    labels.push(Label::new(span, "expected type"));
                }
            }
            other => {
                if let Some(span) = other.span() {
                    labels.push(Label::new(span, ""));
                }
            }
        }

        Self {
            severity: "error",
            message: err.to_string(),
            labels,
            notes: err.notes(),
        }
    }

    /// Render the report.
    pub fn render(&self, format: ReportFormat) -> Result<String, String> {
        match format {
            ReportFormat::Text => Ok(self.render_text(&Colors::no_color())),
            ReportFormat::AnsiText => Ok(self.render_text(&Colors::with_color())),
            ReportFormat::Json => serde_json::to_string_pretty(self).map_err(|e| e.to_string()),
            ReportFormat::Yaml => serde_yaml::to_string(self).map_err(|e| e.to_string()),
            ReportFormat::Toml => toml::to_string_pretty(self).map_err(|e| e.to_string()),
        }
    }

    fn render_text(&self, colors: &Colors) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "{}{}error{}: {}{}\n",
            colors.bold, colors.red, colors.reset, self.message, colors.reset
        ));

        let gutter = self
            .labels
            .iter()
            .map(|label| label.line.to_string().len())
            .max()
            .unwrap_or(0);
        let pad = " ".repeat(gutter);

        for label in &self.labels {
            out.push_str(&format!(
                "{}{}--> {}{}:{}:{}\n",
                pad, colors.blue, colors.reset, label.source, label.line, label.column
            ));
            out.push_str(&format!("{} {}|{}\n", pad, colors.blue, colors.reset));
            out.push_str(&format!(
                "{}{:>width$} |{} {}\n",
                colors.blue,
                label.line,
                colors.reset,
                label.line_text,
                width = gutter
            ));

            let caret_len = label
                .end
                .saturating_sub(label.start)
                .max(1)
                .min(label.line_text.chars().count().saturating_sub(label.column - 1).max(1));
            let message = if label.message.is_empty() {
                String::new()
            } else {
                format!(" {}", label.message)
            };
            out.push_str(&format!(
                "{} {}|{} {}{}{}{}{}\n",
                pad,
                colors.blue,
                colors.reset,
                " ".repeat(label.column - 1),
                colors.red,
                "^".repeat(caret_len),
                message,
                colors.reset
            ));
        }

        for note in &self.notes {
            out.push_str(&format!("{} {}={} {}\n", pad, colors.blue, colors.reset, note));
        }
        out
    }
}

/// Render an error in the given format.
pub fn render(err: &EvalError, format: ReportFormat) -> Result<String, String> {
    Report::from_error(err).render(format)
}

struct Colors {
    red: &'static str,
    blue: &'static str,
    bold: &'static str,
    reset: &'static str,
}

impl Colors {
    fn with_color() -> Self {
        Self {
            red: "\u{1b}[31m",
            blue: "\u{1b}[34m",
            bold: "\u{1b}[1m",
            reset: "\u{1b}[0m",
        }
    }

    fn no_color() -> Self {
        Self {
            red: "",
            blue: "",
            bold: "",
            reset: "",
        }
    }
}
