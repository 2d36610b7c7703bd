//! nickel-eval - evaluate a Nickel program and print the result
//!
//! ```text
//! nickel-eval config.ncl --format yaml
//! nickel-eval -e '{ a = 1 + 1 }'
//! echo '[1, 2]' | nickel-eval --shallow
//! ```
//!
//! Logging is controlled with `RUST_LOG` (default `warn`).

use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process;

use anyhow::{Context as _, Result};
use clap::{Parser, ValueEnum};
use nickel_embed::{ConversionError, Context, Diagnostic, ErrorFormat, Expr};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "nickel-eval", version, about = "Evaluate a Nickel program")]
struct Cli {
    /// Program file; reads stdin when neither a file nor --expr is given
    file: Option<PathBuf>,

    /// Evaluate this program text instead of a file
    #[arg(short, long, conflicts_with = "file")]
    expr: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,

    /// Leave out fields marked `not_exported`
    #[arg(long)]
    export: bool,

    /// Only evaluate the outermost constructor and print its shape
    #[arg(long, conflicts_with = "export")]
    shallow: bool,

    /// Name used for the program in diagnostics
    #[arg(long)]
    source_name: Option<String>,

    /// Format of error reports on stderr
    #[arg(long, value_enum, default_value_t = DiagnosticFormat::Text)]
    error_format: DiagnosticFormat,

    /// Discard `std.trace` output
    #[arg(long)]
    no_trace: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Yaml,
    Toml,
    /// Debug rendering of the value
    Raw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DiagnosticFormat {
    Text,
    Ansi,
    Json,
    Yaml,
    Toml,
}

impl From<DiagnosticFormat> for ErrorFormat {
    fn from(format: DiagnosticFormat) -> Self {
        match format {
            DiagnosticFormat::Text => ErrorFormat::Text,
            DiagnosticFormat::Ansi => ErrorFormat::AnsiText,
            DiagnosticFormat::Json => ErrorFormat::Json,
            DiagnosticFormat::Yaml => ErrorFormat::Yaml,
            DiagnosticFormat::Toml => ErrorFormat::Toml,
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("Error: {:#}", err);
            process::exit(2);
        }
    }
}

/// Evaluate and print. Returns the exit code.
fn run(cli: &Cli) -> Result<i32> {
    let (name, text) = read_program(cli)?;
    tracing::debug!(source = %name, bytes = text.len(), "read program");

    let ctx = Context::with_source_name(&name);
    if cli.no_trace {
        ctx.set_trace_sink(io::sink());
    } else {
        ctx.set_trace_sink(io::stderr());
    }

    let error_format = ErrorFormat::from(cli.error_format);
    let mut stdout = io::stdout().lock();

    if cli.shallow {
        return match ctx.eval_shallow(&text) {
            Ok((value, _vm)) => {
                writeln!(stdout, "{:?}", value)?;
                Ok(0)
            }
            Err(err) => report(err.diagnostic(), error_format),
        };
    }

    let evaluated = if cli.export {
        ctx.eval_deep_for_export(&text)
    } else {
        ctx.eval_deep(&text)
    };
    let value = match evaluated {
        Ok(value) => value,
        Err(err) => return report(err.diagnostic(), error_format),
    };

    match render(&value, cli.format) {
        Ok(output) => {
            stdout.write_all(output.as_bytes())?;
            if !output.ends_with('\n') {
                writeln!(stdout)?;
            }
            Ok(0)
        }
        Err(err) => report(err.diagnostic(), error_format),
    }
}

fn read_program(cli: &Cli) -> Result<(String, String)> {
    if let Some(expr) = &cli.expr {
        let name = cli.source_name.clone().unwrap_or_else(|| "<expr>".to_string());
        return Ok((name, expr.clone()));
    }
    if let Some(path) = &cli.file {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let name = cli
            .source_name
            .clone()
            .unwrap_or_else(|| path.display().to_string());
        return Ok((name, text));
    }
    let mut text = String::new();
    io::stdin()
        .read_to_string(&mut text)
        .context("failed to read stdin")?;
    let name = cli.source_name.clone().unwrap_or_else(|| "<stdin>".to_string());
    Ok((name, text))
}

fn render(value: &Expr, format: OutputFormat) -> Result<String, ConversionError> {
    match format {
        OutputFormat::Json => value.to_json(),
        OutputFormat::Yaml => value.to_yaml(),
        OutputFormat::Toml => value.to_toml(),
        OutputFormat::Raw => Ok(format!("{:?}", value)),
    }
}

fn report(diagnostic: &Diagnostic, format: ErrorFormat) -> Result<i32> {
    let mut stderr = io::stderr().lock();
    diagnostic
        .write_to(format, &mut stderr)
        .context("failed to write the error report")?;
    Ok(1)
}
