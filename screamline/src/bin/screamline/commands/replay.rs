use std::path::Path;

use anyhow::{Context, Result};
use screamline::{ChangeEvent, worker::ProcessedEvent};

use super::connect;
use crate::{context::RunContext, examples::ExampleGroup, output::OutputManager};

pub const EXAMPLES: &[ExampleGroup] = &[ExampleGroup {
    title: "Replay Events",
    commands: &[
        "screamline replay events.json               # JSON array of change events",
        "screamline replay events.jsonl --output json  # One event per line, JSON report",
    ],
}];

/// Accepts a JSON array of events or one JSON event per non-empty line.
pub fn parse_events(contents: &str) -> Result<Vec<ChangeEvent>> {
    let trimmed = contents.trim_start();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).context("Failed to parse event array");
    }
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line).with_context(|| format!("Failed to parse event on line {}", idx + 1))
        })
        .collect()
}

pub async fn handle_replay(ctx: &RunContext, file: &Path, output: &OutputManager) -> Result<()> {
    output.heading("Replay");
    let contents = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let events = parse_events(&contents)?;
    output.info(&format!("{} event(s) from {}", events.len(), file.display()));

    let (_store, triggers) = connect(ctx, output).await?;

    // In file order, one at a time, so the report reads top to bottom.
    let mut processed = Vec::with_capacity(events.len());
    for (idx, event) in events.into_iter().enumerate() {
        let outcome = triggers.dispatch(&event).await;
        processed.push(ProcessedEvent {
            delivery_id: format!("replay-{}", idx + 1),
            trigger: event.key().to_string(),
            document_id: event.document_id,
            outcome,
        });
    }

    output.display(&processed)?;
    let failures = processed.iter().filter(|event| event.outcome.is_failure()).count();
    if failures > 0 {
        anyhow::bail!("{failures} of {} replayed event(s) failed", processed.len());
    }
    output.success("Replay finished");
    Ok(())
}
