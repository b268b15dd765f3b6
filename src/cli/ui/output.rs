use console::style;
use std::fmt::Display;

/// Console lines for command results. Diagnostics go through `tracing`.
pub struct Output;

impl Output {
    pub fn new() -> Self {
        Self
    }

    pub fn success(&self, message: &str) {
        println!("{} {}", style("✓").green(), message);
    }

    pub fn error(&self, message: &str) {
        eprintln!("{} {}", style("✗").red(), message);
    }

    pub fn warning(&self, message: &str) {
        println!("{} {}", style("⚠").yellow(), message);
    }

    pub fn info(&self, message: &str) {
        println!("{} {}", style("ℹ").blue(), message);
    }

    pub fn header(&self, message: &str) {
        println!("\n{}", style(message).bold().underlined());
    }

    pub fn section(&self, message: &str) {
        println!("\n{}", style(message).bold());
        println!("{}", "─".repeat(40));
    }

    /// Aligned `label: value` line
    pub fn field(&self, label: &str, value: impl Display) {
        println!("  {:<14} {}", style(format!("{}:", label)).dim(), value);
    }

    /// Count line, highlighted when non-zero
    pub fn count(&self, label: &str, value: usize, bad: bool) {
        let shown = match (value, bad) {
            (0, _) => style(value.to_string()).dim(),
            (_, true) => style(value.to_string()).red().bold(),
            (_, false) => style(value.to_string()).green(),
        };
        println!("  {:<14} {}", format!("{}:", label), shown);
    }

    pub fn hint(&self, message: &str) {
        println!("  {}", style(message).dim());
    }
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}
