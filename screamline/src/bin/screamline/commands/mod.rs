pub mod repair;
pub mod replay;
pub mod worker;

use std::sync::Arc;

use anyhow::{Context, Result};
use screamline::{RedisStore, Triggers};

use crate::{context::RunContext, output::OutputManager};

/// Connects to the configured store and builds the trigger set over it.
pub(crate) async fn connect(ctx: &RunContext, output: &OutputManager) -> Result<(Arc<RedisStore>, Triggers)> {
    let redis_url = ctx
        .redis_url()
        .context("REDIS_URL environment variable not set. Set it or put a literal url in screamline.toml.")?;

    output.progress("Connecting to Redis");
    let store = RedisStore::connect(&redis_url, &ctx.config.redis.prefix, &ctx.config.redis.service)
        .await
        .context("Failed to connect to Redis")?
        .with_stream_max_len(Some(ctx.config.redis.stream_max_len));
    output.clear_line();
    output.success(&format!(
        "Connected to Redis ({}:{})",
        ctx.config.redis.prefix, ctx.config.redis.service
    ));

    let store = Arc::new(store);
    let triggers = Triggers::new(store.clone(), ctx.config.triggers.clone());
    Ok((store, triggers))
}
