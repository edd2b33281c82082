//! Fixture commands

use anyhow::Result;
use footprint_core::{remove_path, FixtureRequest, RemoveOutcome};
use tracing::debug;

use crate::cli::FixtureCommands;
use crate::output;

pub async fn run(command: FixtureCommands) -> Result<()> {
    match command {
        FixtureCommands::Create(args) => {
            let request = FixtureRequest::new(args.path.as_std_path(), args.kb);
            let bytes = request.size_in_bytes()?;
            debug!("Creating {} byte fixture at {}", bytes, args.path);
            request.create().await?;
            output::success(&format!("Created {} ({} bytes)", args.path, bytes));
        }
        FixtureCommands::Remove(args) => {
            debug!("Removing fixture at {}", args.path);
            match remove_path(args.path.as_std_path()).await? {
                RemoveOutcome::Removed => output::success(&format!("Removed {}", args.path)),
                RemoveOutcome::Absent => {
                    output::info(&format!("Nothing to remove at {}", args.path))
                }
                RemoveOutcome::Deferred => {
                    output::warning(&format!("{} is locked and was left in place", args.path))
                }
            }
        }
    }
    Ok(())
}
