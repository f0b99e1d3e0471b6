//! Terminal rendering for the human-facing subcommands
//!
//! Machine-readable results (`generate`) go to stdout as JSON; everything
//! here is for people reading a terminal.

use colored::Colorize;
use deck::markup::Violation;

pub struct OutputHandler {
    /// No colour and no rules, for piping
    plain: bool,
}

impl OutputHandler {
    pub fn new(plain: bool) -> Self {
        if plain {
            colored::control::set_override(false);
        }
        Self { plain }
    }

    pub fn print_header(&self, text: &str) {
        println!();
        println!("{}", format!("▶ {}", text).bright_yellow().bold());
        if !self.plain {
            println!("{}", "─".repeat(60).dimmed());
        }
    }

    pub fn print_success(&self, text: &str) {
        println!("{} {}", "✓".bright_green(), text.bright_white());
    }

    pub fn print_error(&self, text: &str) {
        println!("{} {}", "✗".bright_red(), text.bright_red());
    }

    pub fn print_info(&self, text: &str) {
        println!("{} {}", "ℹ".bright_blue(), text);
    }

    pub fn print_field(&self, label: &str, value: &str) {
        println!("  {} {}", format!("{}:", label).dimmed(), value);
    }

    /// Numbered list of markup violations
    pub fn print_violations(&self, violations: &[Violation]) {
        for (n, violation) in violations.iter().enumerate() {
            println!(
                "  {} {}",
                format!("{:>2}.", n + 1).bright_red(),
                violation.to_string().white()
            );
        }
    }
}
