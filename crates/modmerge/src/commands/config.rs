use crate::errors::CliError;
use crate::utils::config::{self, AppConfig, StoreSetting};
use camino::Utf8PathBuf;
use colored::Colorize;
use miette::Result;

fn save(cfg: &AppConfig) -> Result<()> {
    config::save_config(cfg).map_err(|e| CliError::config_save_failed(e).into())
}

/// Print a path entry, marking whether it exists yet.
fn print_path_config(name: &str, path: &Utf8PathBuf, configured: bool) {
    let status = if path.as_std_path().is_dir() {
        "✓".bright_green()
    } else {
        "✗".bright_red()
    };
    let origin = if configured { "" } else { " (default)" };
    println!(
        "  {} {} {}{}",
        format!("{}:", name).bright_white(),
        path,
        status,
        origin.dimmed()
    );
}

fn print_list(name: &str, values: Option<&Vec<String>>) {
    match values {
        Some(values) => println!(
            "  {} {}",
            format!("{}:", name).bright_white(),
            values.join(", ")
        ),
        None => println!(
            "  {} {}",
            format!("{}:", name).bright_white(),
            "(built-in)".bright_yellow()
        ),
    }
}

pub fn show_config() -> Result<()> {
    let cfg = config::load_config();
    let config_path = config::default_config_path()
        .map(|p| p.to_string())
        .unwrap_or_else(|| "Unknown".to_string());

    println!();
    println!("  {} {}", "config_file:".bright_white(), config_path);

    print_path_config("storage_dir", &cfg.storage_dir(), cfg.storage_dir.is_some());
    print_path_config("output_dir", &cfg.output_dir(), cfg.output_dir.is_some());

    println!(
        "  {} {}",
        "compress_cache:".bright_white(),
        cfg.compress_cache
    );
    let store = match cfg.store_kind {
        StoreSetting::Memory => "memory",
        StoreSetting::Disk => "disk",
    };
    println!("  {} {}", "store_kind:".bright_white(), store);

    print_list("whole_file_directories", cfg.whole_file_directories.as_ref());
    print_list("text_extensions", cfg.text_extensions.as_ref());

    if !cfg.games.is_empty() {
        println!("  {}", "games:".bright_white());
        for game in &cfg.games {
            println!(
                "    {} {} {}",
                "•".bright_cyan(),
                game.name.bright_cyan(),
                format!("FIOS: {}", game.fios_paths.join(", ")).dimmed()
            );
        }
    }

    println!();
    Ok(())
}

fn set_dir(path: String, apply: impl FnOnce(&mut AppConfig, Utf8PathBuf)) -> Result<Utf8PathBuf> {
    let path = Utf8PathBuf::from(&path);
    std::fs::create_dir_all(path.as_std_path())
        .map_err(|e| CliError::create_dir_failed(path.clone().into_std_path_buf(), e))?;

    let mut cfg = config::load_config();
    apply(&mut cfg, path.clone());
    save(&cfg)?;
    Ok(path)
}

pub fn set_storage_dir(path: String) -> Result<()> {
    let path = set_dir(path, |cfg, path| cfg.storage_dir = Some(path))?;

    println!(
        "{}",
        "✓ Storage directory set successfully!".bright_green().bold()
    );
    println!();
    println!(
        "  {} {}",
        "Path:".bright_white().bold(),
        path.as_str().bright_green()
    );
    println!(
        "  {}",
        "Existing caches and patch states in the old directory are not moved.".dimmed()
    );

    Ok(())
}

pub fn set_output_dir(path: String) -> Result<()> {
    let path = set_dir(path, |cfg, path| cfg.output_dir = Some(path))?;

    println!(
        "{}",
        "✓ Output directory set successfully!".bright_green().bold()
    );
    println!();
    println!(
        "  {} {}",
        "Path:".bright_white().bold(),
        path.as_str().bright_green()
    );

    Ok(())
}

pub fn reset_config() -> Result<()> {
    save(&AppConfig::default())?;
    println!(
        "{}",
        "✓ Configuration reset to defaults".bright_green().bold()
    );
    Ok(())
}
