//! Report formatting.
//!
//! This module renders a [`Report`] for humans or machines.

use std::fmt::Write as FmtWrite;
use std::io::{self, Write};

use regconform_core::Status;

use crate::report::{NodeReport, Report};

/// Trait for rendering a run report.
pub trait Reporter {
    /// Writes the report to `out`.
    ///
    /// # Errors
    ///
    /// Returns an IO error if writing to output fails.
    fn report(&self, report: &Report, out: &mut dyn Write) -> io::Result<()>;
}

/// Console reporter for terminals.
#[derive(Debug, Default)]
pub struct ConsoleReporter {
    /// Whether to use colors.
    use_colors: bool,
    /// Whether to print the full step tree.
    verbose: bool,
}

impl ConsoleReporter {
    /// Creates a new console reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            use_colors: true,
            verbose: false,
        }
    }

    /// Sets whether to use colors.
    #[must_use]
    pub const fn with_colors(mut self, colors: bool) -> Self {
        self.use_colors = colors;
        self
    }

    /// Sets verbose mode.
    #[must_use]
    pub const fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    fn symbol(&self, status: Status) -> &'static str {
        match (status, self.use_colors) {
            (Status::Pass, true) => "\x1b[32m✓\x1b[0m",
            (Status::Pass, false) => "✓",
            (Status::Fail | Status::Error, true) => "\x1b[31m✗\x1b[0m",
            (Status::Fail | Status::Error, false) => "✗",
            (Status::Skip, true) => "\x1b[33m-\x1b[0m",
            (Status::Disabled | Status::Unknown, true) => "\x1b[90m·\x1b[0m",
            (_, false) => "-",
        }
    }

    /// Formats one line of the result.
    fn format_line(&self, name: &str, status: Status, duration_ms: Option<i64>) -> String {
        let mut line = format!("{} {name} [{status}]", self.symbol(status));
        if let Some(ms) = duration_ms {
            let _ = write!(line, " ({ms}ms)");
        }
        line
    }

    /// Formats a node and, in verbose mode, everything below it.
    fn format_node(&self, node: &NodeReport, depth: usize, out: &mut String) {
        let indent = "  ".repeat(depth);
        let _ = writeln!(out, "{indent}{}", self.format_line(&node.name, node.status, node.duration_ms));
        for error in &node.errors {
            let _ = writeln!(out, "{indent}    Error: {error}");
        }
        if self.verbose {
            for line in &node.output {
                let _ = writeln!(out, "{indent}    {line}");
            }
            for child in &node.children {
                self.format_node(child, depth + 1, out);
            }
        } else {
            for child in node.children.iter().filter(|c| c.status.is_failure()) {
                self.format_node(child, depth + 1, out);
            }
        }
    }

    /// Formats the summary line.
    fn format_summary(&self, report: &Report) -> String {
        let status = match (report.passed(), self.use_colors) {
            (true, true) => "\x1b[32mPASSED\x1b[0m",
            (true, false) => "PASSED",
            (false, true) => "\x1b[31mFAILED\x1b[0m",
            (false, false) => "FAILED",
        };

        let totals = &report.totals;
        let mut summary = format!(
            "\n{status}: {} passed, {} failed, {} errored, {} skipped, {} disabled, {} total",
            totals[Status::Pass],
            totals[Status::Fail],
            totals[Status::Error],
            totals[Status::Skip],
            totals[Status::Disabled],
            totals.total(),
        );
        if let Some(ms) = report.tree.duration_ms {
            #[allow(clippy::cast_precision_loss)]
            let seconds = ms as f64 / 1000.0;
            let _ = write!(summary, " ({seconds:.2}s)");
        }
        summary
    }
}

impl Reporter for ConsoleReporter {
    fn report(&self, report: &Report, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "\nConformance Results ({}):", report.run_id)?;
        writeln!(out, "{}", "─".repeat(50))?;

        let mut body = String::new();
        for dataset in &report.tree.children {
            self.format_node(dataset, 0, &mut body);
        }
        write!(out, "{body}")?;

        writeln!(out, "{}", "─".repeat(50))?;
        writeln!(out, "Capabilities:")?;
        for capability in report.capabilities.iter().filter(|c| c.status != Status::Unknown) {
            writeln!(
                out,
                "  {}",
                self.format_line(capability.name.name(), capability.status, None)
            )?;
        }
        writeln!(out, "{}", self.format_summary(report))?;

        Ok(())
    }
}

/// JSON reporter.
#[derive(Debug, Default)]
pub struct JsonReporter {
    /// Whether to pretty-print the JSON.
    pretty: bool,
}

impl JsonReporter {
    /// Creates a new JSON reporter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to pretty-print.
    #[must_use]
    pub const fn with_pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }
}

impl Reporter for JsonReporter {
    fn report(&self, report: &Report, out: &mut dyn Write) -> io::Result<()> {
        let json = if self.pretty {
            serde_json::to_string_pretty(report)
        } else {
            serde_json::to_string(report)
        }
        .map_err(io::Error::other)?;

        writeln!(out, "{json}")?;

        Ok(())
    }
}
