use anyhow::{Context, Result};
use screamline::{RecordStoreExt, Scream, User};

use super::connect;
use crate::{context::RunContext, examples::ExampleGroup, output::OutputManager};

pub const CASCADE_EXAMPLES: &[ExampleGroup] = &[ExampleGroup {
    title: "Finish A Cascade",
    commands: &["screamline cascade dsNwxE3q8Vb1kPz0aYtR   # Remove what a deleted scream left behind"],
}];

pub const PROPAGATE_EXAMPLES: &[ExampleGroup] = &[ExampleGroup {
    title: "Resync Scream Images",
    commands: &["screamline propagate-image alice   # Copy alice's current image onto her screams"],
}];

/// Re-runs the cascade for a scream that no longer exists.
pub async fn handle_cascade(ctx: &RunContext, scream_id: &str, output: &OutputManager) -> Result<()> {
    output.heading("Cascade");
    let (store, triggers) = connect(ctx, output).await?;

    let existing = store
        .get_record::<Scream>(scream_id)
        .await
        .context("Failed to look up the scream")?;
    if existing.is_some() {
        output.error(&format!("Scream {scream_id} still exists."));
        output.info("Delete the scream first; its dependents are removed afterwards.");
        anyhow::bail!("scream {scream_id} still exists");
    }

    let outcome = triggers.cascade().handle_scream_delete(scream_id).await;
    output.display(&outcome)?;
    if outcome.is_failure() {
        anyhow::bail!("cascade for scream {scream_id} failed");
    }
    Ok(())
}

/// Copies a user's current image onto every scream they authored.
pub async fn handle_propagate_image(ctx: &RunContext, handle: &str, output: &OutputManager) -> Result<()> {
    output.heading("Propagate Image");
    let (store, triggers) = connect(ctx, output).await?;

    let user = store
        .get_record::<User>(handle)
        .await
        .context("Failed to look up the user")?
        .with_context(|| format!("user {handle} not found"))?;
    output.key_value("imageUrl", &user.image_url);

    let outcome = triggers.images().propagate(handle, &user.image_url).await;
    output.display(&outcome)?;
    if outcome.is_failure() {
        anyhow::bail!("image propagation for {handle} failed");
    }
    Ok(())
}
