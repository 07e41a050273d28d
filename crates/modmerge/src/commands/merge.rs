use super::{open_builder, SessionArgs};
use crate::errors::CliError;
use crate::println_pad;
use crate::utils::{config, plural, print_ansi_boxed_lines};
use colored::Colorize;
use miette::Result;

#[derive(Debug)]
pub struct MergeArgs {
    pub session: SessionArgs,
}

pub async fn merge_mods(args: MergeArgs) -> Result<()> {
    let cfg = config::load_config();
    let mut builder = open_builder(&cfg, &args.session)?;

    if !builder.mode().writes_patches() {
        println_pad!(
            "{}",
            format!(
                "Mode '{}' never writes patch files, only the patch state is updated",
                builder.mode().as_str()
            )
            .bright_yellow()
        );
    }

    println!(
        "{} {}",
        "🧩 Building patch:".bright_blue().bold(),
        builder.patch_name().bright_cyan().bold()
    );

    let result = builder.build().await.map_err(CliError::from)?;

    println!();
    for file in &result.files_written {
        let rel = file
            .strip_prefix(&result.patch_root)
            .map(|p| p.to_string())
            .unwrap_or_else(|_| file.to_string());
        println_pad!("{} {}", "+".bright_green(), rel);
    }
    for file in &result.files_removed {
        let rel = file
            .strip_prefix(&result.patch_root)
            .map(|p| p.to_string())
            .unwrap_or_else(|_| file.to_string());
        println_pad!("{} {}", "-".bright_red(), rel);
    }

    let open = result.state.conflict_addresses().len();
    let mut lines = vec![
        format!(
            "{} {}",
            "Merged:".bright_white(),
            plural(result.files_written.len(), "file").bright_green()
        ),
        format!(
            "{} {}",
            "Resolved:".bright_white(),
            plural(result.state.resolved_addresses().len(), "conflict").bright_green()
        ),
        format!(
            "{} {}",
            "Open:".bright_white(),
            if open == 0 {
                plural(open, "conflict").bright_green()
            } else {
                plural(open, "conflict").bright_yellow()
            }
        ),
        format!(
            "{} {}",
            "Mods:".bright_white(),
            format!(
                "{} indexed, {} from cache",
                result.mods_indexed, result.mods_from_cache
            )
            .dimmed()
        ),
    ];
    if !result.files_removed.is_empty() {
        lines.insert(
            1,
            format!(
                "{} {}",
                "Removed:".bright_white(),
                plural(result.files_removed.len(), "stale file").bright_red()
            ),
        );
    }
    if !result.files_written.is_empty() {
        lines.push(format!(
            "{} {}",
            "Output:".bright_white(),
            result.patch_root.as_str().bright_cyan()
        ));
    }
    lines.push(format!("Built in {:.2?}", result.build_time).dimmed().to_string());

    println!();
    print_ansi_boxed_lines(&lines);

    if open > 0 {
        println!();
        println_pad!(
            "{}",
            format!(
                "{} left open. Run 'modmerge conflicts' to review them.",
                plural(open, "conflict")
            )
            .bright_yellow()
        );
    }

    Ok(())
}
