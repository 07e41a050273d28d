use super::{open_builder, SessionArgs};
use crate::errors::CliError;
use crate::println_pad;
use crate::utils::{config, plural};
use colored::Colorize;
use miette::{IntoDiagnostic, Result};
use modmerge_definitions::{HierarchicalDefinitions, IndexedDefinitions};
use modmerge_patch::PatchState;
use std::collections::BTreeSet;

#[derive(Debug)]
pub struct ConflictsArgs {
    pub session: SessionArgs,
    /// Group open conflicts by directory.
    pub tree: bool,
    /// Print the patch state as JSON instead of a summary.
    pub json: bool,
}

pub async fn show_conflicts(args: ConflictsArgs) -> Result<()> {
    let cfg = config::load_config();
    let mut builder = open_builder(&cfg, &args.session)?;
    let result = builder.analyze().await.map_err(CliError::from)?;

    if args.json {
        let json = serde_json::to_string_pretty(&result.state).into_diagnostic()?;
        println!("{}", json);
        return Ok(());
    }

    println!(
        "{} {} {}",
        "⚔️  Conflicts in".bright_blue().bold(),
        args.session.collection.bright_cyan().bold(),
        format!("({})", result.state.mode.as_str()).dimmed()
    );
    println!();
    print_summary(&result.state);

    if result.state.conflicts.is_empty() {
        println!();
        println_pad!("{}", "✓ No open conflicts".bright_green().bold());
        return Ok(());
    }

    println!();
    if args.tree {
        let index = IndexedDefinitions::in_memory(result.state.conflicts.iter().cloned());
        for node in index.hierarchical_definitions() {
            print_node(&node);
        }
    } else {
        print_open_conflicts(&result.state);
    }

    if !result.detection.invalid.is_empty() {
        println!();
        println_pad!(
            "{} {}",
            "⚠".bright_yellow(),
            format!(
                "{} could not be parsed",
                plural(result.detection.invalid.len(), "definition")
            )
            .bright_yellow()
        );
        for definition in &result.detection.invalid {
            let message = definition
                .error
                .as_ref()
                .map(|e| format!("line {}: {}", e.line, e.message))
                .unwrap_or_default();
            println_pad!(
                "   {} {} {} {}",
                "•".bright_red(),
                definition.file().bright_white(),
                format!("[{}]", definition.mod_name).dimmed(),
                message
            );
        }
    }

    Ok(())
}

fn print_summary(state: &PatchState) {
    let rows = [
        ("Open:", state.conflict_addresses().len()),
        ("Resolved:", state.resolved_addresses().len()),
        ("Ignored:", state.ignored_addresses().len()),
        ("Orphaned:", state.orphan_addresses().len()),
        ("Overwritten:", state.overwritten_conflicts.len()),
    ];
    for (label, count) in rows {
        let count = if count == 0 {
            count.to_string().dimmed()
        } else {
            count.to_string().bright_yellow()
        };
        println_pad!("{}{}", format!("{:<13}", label).bright_white(), count);
    }
}

fn print_open_conflicts(state: &PatchState) {
    for address in state.conflict_addresses() {
        let mods: BTreeSet<String> = state
            .conflict_at(&address)
            .into_iter()
            .map(|d| d.mod_name)
            .collect();
        println_pad!(
            "{} {} {}",
            "•".bright_cyan(),
            address.to_string().bright_white().bold(),
            format!("[{}]", mods.into_iter().collect::<Vec<_>>().join(", ")).dimmed()
        );
    }
}

fn print_node(node: &HierarchicalDefinitions) {
    println_pad!(
        "{} {}",
        "📁".bright_blue(),
        node.name.bright_blue().bold()
    );
    for child in &node.children {
        println_pad!(
            "   {} {} {}",
            "•".bright_cyan(),
            child.name.bright_white(),
            format!("[{}]", child.mods.iter().cloned().collect::<Vec<_>>().join(", ")).dimmed()
        );
    }
}
