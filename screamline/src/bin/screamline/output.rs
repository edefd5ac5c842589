use anyhow::Result;
use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{Attribute, Cell, Color as TableColor, Table};
use serde::Serialize;
use std::io::Write;

use screamline::{
    TriggerOutcome,
    worker::{ProcessedEvent, WorkerStats},
};

use crate::theme::{ICONS, THEME};

#[derive(Clone, Debug, ValueEnum, Default, PartialEq)]
pub enum OutputFormat {
    /// Formatted table output (default)
    #[default]
    Table,
    /// JSON output for scripting
    Json,
    /// Compact single-line output
    Compact,
}

#[derive(Clone, Debug, Default)]
pub struct GlobalOptions {
    pub output_format: OutputFormat,
    pub quiet: bool,
    pub no_color: bool,
}

/// Data that can be rendered as a table or a single line.
pub trait TableDisplay {
    fn to_table(&self, options: &GlobalOptions) -> Table;
    fn to_compact(&self) -> String;
}

pub struct OutputManager {
    pub options: GlobalOptions,
}

impl OutputManager {
    pub fn new(options: GlobalOptions) -> Self {
        if options.no_color {
            colored::control::set_override(false);
        }
        Self { options }
    }

    pub fn display<T>(&self, data: &T) -> Result<()>
    where
        T: Serialize + TableDisplay,
    {
        if self.options.quiet {
            return Ok(());
        }

        match self.options.output_format {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(data)?;
                println!("{json}");
            }
            OutputFormat::Table => {
                let table = data.to_table(&self.options);
                println!("{table}");
            }
            OutputFormat::Compact => {
                println!("{}", data.to_compact());
            }
        }
        Ok(())
    }

    fn decorated(&self, icon: &str, message: &str, color: colored::Color) -> String {
        if self.options.no_color {
            format!("{icon} {message}")
        } else {
            format!("{} {}", icon.color(color), message.color(color))
        }
    }

    /// Status lines stay off stdout in JSON mode so the document can be piped.
    fn status(&self, line: String) {
        if matches!(self.options.output_format, OutputFormat::Json) {
            eprintln!("{line}");
        } else {
            println!("{line}");
        }
    }

    pub fn success(&self, message: &str) {
        if !self.options.quiet {
            self.status(self.decorated(ICONS.success, message, THEME.success));
        }
    }

    pub fn error(&self, message: &str) {
        eprintln!("{}", self.decorated(ICONS.error, message, THEME.error));
    }

    pub fn warning(&self, message: &str) {
        if !self.options.quiet {
            self.status(self.decorated(ICONS.warning, message, THEME.warning));
        }
    }

    pub fn info(&self, message: &str) {
        if !self.options.quiet {
            self.status(self.decorated(ICONS.info, message, THEME.info));
        }
    }

    pub fn heading(&self, text: &str) {
        if self.options.quiet {
            return;
        }
        let output = if self.options.no_color {
            format!("\n{text}\n{}", "=".repeat(text.len()))
        } else {
            format!("\n{}", text.color(THEME.primary).bold())
        };
        self.status(output);
    }

    pub fn key_value(&self, key: &str, value: &str) {
        if self.options.quiet {
            return;
        }
        let output = if self.options.no_color {
            format!("{key}: {value}")
        } else {
            format!("{}: {}", key.color(THEME.key).bold(), value.color(THEME.value))
        };
        self.status(output);
    }

    pub fn progress(&self, message: &str) {
        if self.options.quiet || matches!(self.options.output_format, OutputFormat::Json) {
            return;
        }

        let output = if self.options.no_color {
            format!("{} {message}...", ICONS.loading)
        } else {
            format!(
                "{} {}...",
                ICONS.loading.color(THEME.highlight).bold(),
                message.color(THEME.highlight)
            )
        };

        print!("\r{output}");
        std::io::stdout().flush().ok();
    }

    pub fn clear_line(&self) {
        if self.options.quiet || matches!(self.options.output_format, OutputFormat::Json) {
            return;
        }

        print!("\r{}", " ".repeat(80));
        print!("\r");
        std::io::stdout().flush().ok();
    }
}

fn themed_table(options: &GlobalOptions, headers: &[&str]) -> Table {
    let mut table = Table::new();
    if options.no_color {
        table.load_preset(comfy_table::presets::ASCII_FULL);
    } else {
        table.load_preset(comfy_table::presets::UTF8_FULL_CONDENSED);
    }
    let header_cells: Vec<Cell> = headers
        .iter()
        .map(|header| {
            let cell = Cell::new(header).add_attribute(Attribute::Bold);
            if options.no_color { cell } else { cell.fg(TableColor::Cyan) }
        })
        .collect();
    table.set_header(header_cells);
    table
}

fn outcome_cell(outcome: &TriggerOutcome, options: &GlobalOptions) -> Cell {
    let cell = Cell::new(outcome.label());
    if options.no_color {
        return cell;
    }
    match outcome {
        TriggerOutcome::Failed { .. } => cell.fg(TableColor::Red),
        TriggerOutcome::Ignored => cell.fg(TableColor::DarkGrey),
        _ => cell.fg(TableColor::Green),
    }
}

/// Human summary of the fields an outcome carries.
pub fn outcome_detail(outcome: &TriggerOutcome) -> String {
    match outcome {
        TriggerOutcome::NotificationCreated { id } | TriggerOutcome::NotificationDeleted { id } => {
            format!("notification {id}")
        }
        TriggerOutcome::ScreamMissing { scream_id } => format!("scream {scream_id} not found"),
        TriggerOutcome::CascadeCompleted {
            scream_id,
            deleted,
            chunks,
        } => format!("scream {scream_id}: {deleted} dependents in {chunks} batch(es)"),
        TriggerOutcome::ImagePropagated { handle, screams } => format!("{handle}: {screams} scream(s)"),
        TriggerOutcome::Failed { reason, transient: true } => format!("{reason} (retryable)"),
        TriggerOutcome::Failed { reason, transient: false } => reason.clone(),
        TriggerOutcome::SelfActionSkipped | TriggerOutcome::ImageUnchanged | TriggerOutcome::Ignored => String::new(),
    }
}

impl TableDisplay for TriggerOutcome {
    fn to_table(&self, options: &GlobalOptions) -> Table {
        let mut table = themed_table(options, &["Outcome", "Detail"]);
        table.add_row(vec![outcome_cell(self, options), Cell::new(outcome_detail(self))]);
        table
    }

    fn to_compact(&self) -> String {
        let detail = outcome_detail(self);
        if detail.is_empty() {
            self.label().to_string()
        } else {
            format!("{} {detail}", self.label())
        }
    }
}

impl TableDisplay for Vec<ProcessedEvent> {
    fn to_table(&self, options: &GlobalOptions) -> Table {
        let mut table = themed_table(options, &["#", "Trigger", "Document", "Outcome", "Detail"]);
        if self.is_empty() {
            table.add_row(vec![Cell::new("-"), Cell::new("no events")]);
            return table;
        }
        for (idx, event) in self.iter().enumerate() {
            table.add_row(vec![
                Cell::new(idx + 1),
                Cell::new(&event.trigger),
                Cell::new(&event.document_id),
                outcome_cell(&event.outcome, options),
                Cell::new(outcome_detail(&event.outcome)),
            ]);
        }
        table
    }

    fn to_compact(&self) -> String {
        let failures = self.iter().filter(|event| event.outcome.is_failure()).count();
        format!("events={} failures={failures}", self.len())
    }
}

impl TableDisplay for WorkerStats {
    fn to_table(&self, options: &GlobalOptions) -> Table {
        let mut table = themed_table(options, &["Batches", "Events", "Ignored", "Failures"]);
        table.add_row(vec![
            Cell::new(self.batches),
            Cell::new(self.events),
            Cell::new(self.ignored),
            Cell::new(self.failures),
        ]);
        table
    }

    fn to_compact(&self) -> String {
        format!(
            "batches={} events={} ignored={} failures={}",
            self.batches, self.events, self.ignored, self.failures
        )
    }
}
