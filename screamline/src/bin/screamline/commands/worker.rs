use anyhow::{Context, Result};
use log::warn;
use screamline::RedisEventStream;

use super::connect;
use crate::{context::RunContext, examples::ExampleGroup, output::OutputManager};

pub const EXAMPLES: &[ExampleGroup] = &[ExampleGroup {
    title: "Run Triggers",
    commands: &[
        "screamline worker                          # Consume change events until Ctrl-C",
        "RUST_LOG=screamline=debug screamline worker  # Log every routed event",
    ],
}];

pub async fn handle_worker(ctx: &RunContext, output: &OutputManager) -> Result<()> {
    output.heading("Trigger Worker");
    let (store, triggers) = connect(ctx, output).await?;
    let redis_url = ctx.redis_url()?;

    // Blocking stream reads get their own connection.
    let stream = RedisEventStream::connect(&redis_url, store.events_key(), ctx.config.worker.clone())
        .await
        .context("Failed to open the change stream")?;
    stream
        .ensure_group()
        .await
        .context("Failed to create the consumer group")?;

    output.key_value("stream", &store.events_key());
    output.key_value(
        "consumer",
        &format!("{}/{}", ctx.config.worker.consumer_group, ctx.config.worker.consumer_name),
    );
    output.info("Waiting for change events (Ctrl-C to stop)");

    let retry_delay = std::time::Duration::from_millis(ctx.config.worker.retry_delay_ms);
    let worker = screamline::Worker::new(stream, triggers).with_retry_delay(retry_delay);
    let stats = worker
        .run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!("listening for Ctrl-C failed: {err}");
                std::future::pending::<()>().await;
            }
        })
        .await;

    output.display(&stats)?;
    if stats.failures > 0 {
        output.warning(&format!("{} event(s) failed; see the log for details", stats.failures));
    } else {
        output.success("Worker stopped cleanly");
    }
    Ok(())
}
