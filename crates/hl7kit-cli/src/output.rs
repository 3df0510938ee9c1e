//! Output formatting and reporting
//!
//! Renders message trees and validation results for the terminal or as JSON

use colored::*;
use hl7kit_core::encoding::EncodingCharacters;
use hl7kit_core::executor::{ExecutionSummary, FileReport};
use hl7kit_core::parser::pipe::encode_segment;
use hl7kit_core::{Diagnostic, Hl7Error, Message, Node, Result, Severity};

use crate::OutputFormat;

/// Print `message` as an indented tree of groups and segments
pub fn print_tree(message: &Message) {
    println!(
        "{} {}",
        message.structure.bold(),
        format!("(v{})", message.version).dimmed()
    );
    print_nodes(&message.children, &message.encoding, 1);
}

fn print_nodes(nodes: &[Node], encoding: &EncodingCharacters, depth: usize) {
    let indent = "  ".repeat(depth);
    for node in nodes {
        match node {
            Node::Segment(segment) => {
                let line = encode_segment(segment, encoding);
                let rest = line.get(3..).unwrap_or_default();
                println!("{indent}{}{}", segment.name.cyan(), rest);
            }
            Node::Group(group) => {
                println!("{indent}{}", format!("[{}]", group.name).yellow());
                print_nodes(&group.children, encoding, depth + 1);
            }
        }
    }
}

/// Render ER7 text for a terminal: one segment per line
pub fn er7_for_terminal(encoded: &str) -> String {
    let mut out = encoded
        .split(['\r', '\n'])
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    out.push('\n');
    out
}

/// Output formatter for validation results
pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn print_results(&self, reports: &[FileReport], summary: &ExecutionSummary) -> Result<()> {
        match self.format {
            OutputFormat::Human => {
                self.print_human_format(reports, summary);
                Ok(())
            }
            OutputFormat::Json => self.print_json_format(reports, summary),
        }
    }

    fn print_human_format(&self, reports: &[FileReport], summary: &ExecutionSummary) {
        for report in reports {
            let has_output = report.error.is_some()
                || report.skipped > 0
                || report.messages.iter().any(|m| !m.diagnostics.is_empty());
            if !has_output {
                continue;
            }

            println!("{}", report.path.display().to_string().bold());
            if let Some(error) = &report.error {
                println!("  {} {}", "error".red().bold(), error);
            }
            if report.skipped > 0 {
                println!(
                    "  {} {} message(s) could not be parsed and were skipped",
                    "error".red().bold(),
                    report.skipped
                );
            }
            for (index, message) in report.messages.iter().enumerate() {
                if message.diagnostics.is_empty() {
                    continue;
                }
                if report.messages.len() > 1 {
                    println!(
                        "  message {} {}",
                        index + 1,
                        format!(
                            "({} {})",
                            message.structure,
                            message.control_id.as_deref().unwrap_or("-")
                        )
                        .dimmed()
                    );
                }
                for diagnostic in &message.diagnostics {
                    println!("  {}", render_diagnostic(diagnostic));
                }
            }
            println!();
        }

        self.print_summary_human(summary);
    }

    fn print_summary_human(&self, summary: &ExecutionSummary) {
        println!("{}", "Summary:".bold());
        println!("  Files checked: {}", summary.files);
        println!("  Messages: {}", summary.messages);
        if summary.errors == 0 && summary.warnings == 0 {
            println!("  {} No issues found", "✔".green());
            return;
        }
        if summary.errors > 0 {
            println!("  Errors: {}", summary.errors.to_string().red());
        }
        if summary.warnings > 0 {
            println!("  Warnings: {}", summary.warnings.to_string().yellow());
        }
        if summary.failed_files > 0 {
            println!(
                "  Unreadable files: {}",
                summary.failed_files.to_string().red()
            );
        }
    }

    fn print_json_format(&self, reports: &[FileReport], summary: &ExecutionSummary) -> Result<()> {
        let result = serde_json::json!({
            "files": reports,
            "summary": summary,
        });
        let text = serde_json::to_string_pretty(&result)
            .map_err(|e| Hl7Error::serialization_error(format!("Failed to serialize JSON: {e}")))?;
        println!("{text}");
        Ok(())
    }
}

fn render_diagnostic(diagnostic: &Diagnostic) -> String {
    let severity = match diagnostic.severity {
        Severity::Error => "error".red().bold(),
        Severity::Warning => "warning".yellow().bold(),
        Severity::Info => "info".blue(),
    };
    format!(
        "{}{} {} {}",
        severity,
        format!("[{}]", diagnostic.rule_id).dimmed(),
        diagnostic.message,
        format!("at {}", diagnostic.location).dimmed()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use hl7kit_core::validation::Location;

    #[test]
    fn test_er7_for_terminal() {
        assert_eq!(er7_for_terminal("MSH|a\rPID|b\r"), "MSH|a\nPID|b\n");
    }

    #[test]
    fn test_render_diagnostic_plain() {
        colored::control::set_override(false);
        let diagnostic = Diagnostic::new(
            "field/required",
            Severity::Error,
            "Required field PID-3 (Patient Identifier List) is missing",
            Location::new("/PID-3", 3),
        );
        assert_eq!(
            render_diagnostic(&diagnostic),
            "error[field/required] Required field PID-3 (Patient Identifier List) is missing at /PID-3 (segment 3)"
        );
    }
}
