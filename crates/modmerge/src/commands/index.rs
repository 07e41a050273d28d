use super::{open_builder, SessionArgs};
use crate::errors::CliError;
use crate::println_pad;
use crate::utils::{config, plural};
use colored::Colorize;
use miette::Result;
use modmerge_definitions::ValueType;
use std::time::Instant;

#[derive(Debug)]
pub struct IndexArgs {
    pub session: SessionArgs,
}

pub async fn index_mods(args: IndexArgs) -> Result<()> {
    let cfg = config::load_config();
    let mut builder = open_builder(&cfg, &args.session)?;

    println!(
        "{} {}",
        "🔎 Indexing mods for".bright_blue().bold(),
        args.session.game.bright_cyan().bold()
    );

    let start = Instant::now();
    let index = builder.index().await.map_err(CliError::from)?;
    let elapsed = start.elapsed();

    let with_errors = index
        .get_all()
        .iter()
        .filter(|d| d.error.is_some())
        .count();

    println!();
    println_pad!(
        "{} {}",
        "Definitions:".bright_white(),
        index.len().to_string().bright_green()
    );
    println_pad!(
        "{} {}",
        "Files:".bright_white(),
        index.get_all_file_keys().len().to_string().bright_green()
    );
    println_pad!(
        "{} {}",
        "Objects:".bright_white(),
        index.get_all_type_and_id_keys().len().to_string().bright_green()
    );
    println_pad!(
        "{} {}",
        "Binary files:".bright_white(),
        index.get_by_value_type(ValueType::Binary).len().to_string().bright_green()
    );
    if with_errors > 0 {
        println_pad!(
            "{} {}",
            "⚠".bright_yellow(),
            format!("{} with parse errors", plural(with_errors, "definition")).bright_yellow()
        );
    }
    println_pad!("{}", format!("Done in {:.2?}", elapsed).dimmed());

    Ok(())
}
