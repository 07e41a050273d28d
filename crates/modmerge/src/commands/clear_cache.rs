use crate::println_pad;
use crate::utils::config;
use colored::Colorize;
use inquire::Confirm;
use miette::{IntoDiagnostic, Result};
use modmerge_patch::GameIndexer;

#[derive(Debug)]
pub struct ClearCacheArgs {
    pub game: String,
    /// Skip the confirmation prompt.
    pub yes: bool,
}

pub async fn clear_cache(args: ClearCacheArgs) -> Result<()> {
    let cfg = config::load_config();
    let storage_dir = cfg.storage_dir();

    if !args.yes {
        let confirmed = Confirm::new(&format!(
            "Delete every cached definition of {}?",
            args.game
        ))
        .with_default(false)
        .with_help_message("Mods will be parsed again on the next run")
        .prompt()
        .into_diagnostic()?;

        if !confirmed {
            println_pad!("{}", "Nothing was deleted".dimmed());
            return Ok(());
        }
    }

    let indexer = GameIndexer::new().with_compression(cfg.compress_cache);
    if indexer.clear_definition(&storage_dir, &args.game).await {
        println!(
            "{} {}",
            "✓ Cleared definition cache for".bright_green().bold(),
            args.game.bright_cyan().bold()
        );
        Ok(())
    } else {
        Err(miette::miette!(
            "Failed to clear the definition cache under {}",
            storage_dir
        ))
    }
}
