use clap::builder::{styling::AnsiColor, Styles};
use clap::ColorChoice;
use clap::{CommandFactory, FromArgMatches, Parser, Subcommand};
use commands::{
    clear_cache, index_mods, merge_mods, reset_config, set_output_dir, set_storage_dir,
    show_config, show_conflicts, ClearCacheArgs, ConflictsArgs, IndexArgs, MergeArgs,
    SessionArgs, DEFAULT_COLLECTION,
};
use miette::{IntoDiagnostic, Result};
use modmerge_patch::PatchStateMode;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

mod commands;
mod errors;
mod utils;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Print debug logs to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug)]
struct SessionOpts {
    /// The game the mods are for, e.g. Stellaris
    #[arg(short, long)]
    game: String,

    /// The mod folders, in load order. Later mods win
    #[arg(short, long, num_args = 1..)]
    mods: Vec<String>,

    /// The game's install folder, indexed before every mod
    #[arg(long)]
    game_dir: Option<String>,

    /// The collection the patch state belongs to
    #[arg(short, long, default_value = DEFAULT_COLLECTION)]
    collection: String,

    /// How conflicts are analysed, e.g. default, advanced, read-only
    #[arg(long, default_value = "default")]
    mode: PatchStateMode,

    /// A file of ignore rules, one per line
    #[arg(short, long)]
    ignore_file: Option<String>,
}

impl From<SessionOpts> for SessionArgs {
    fn from(opts: SessionOpts) -> Self {
        Self {
            game: opts.game,
            collection: opts.collection,
            mods: opts.mods,
            game_dir: opts.game_dir,
            mode: opts.mode,
            ignore_file: opts.ignore_file,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Parse mods into definitions and fill the definition cache
    Index {
        #[command(flatten)]
        session: SessionOpts,
    },
    /// Detect conflicts and update the patch state without writing files
    Conflicts {
        #[command(flatten)]
        session: SessionOpts,

        /// Group open conflicts by directory
        #[arg(long)]
        tree: bool,

        /// Print the patch state as JSON
        #[arg(long, conflicts_with = "tree")]
        json: bool,
    },
    /// Merge every mergeable conflict into the collection's patch mod
    Merge {
        #[command(flatten)]
        session: SessionOpts,
    },
    /// Delete the cached definitions of a game
    ClearCache {
        /// The game whose cache is deleted
        #[arg(short, long)]
        game: String,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Show or change the configuration
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Print the current configuration
    Show,
    /// Set where the definition cache and patch states are kept
    SetStorageDir { path: String },
    /// Set where patch mods are written
    SetOutputDir { path: String },
    /// Restore the default configuration
    Reset,
}

fn parse_args() -> Result<Args> {
    // Configure colored/styled help output
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default().bold())
        .usage(AnsiColor::Green.on_default().bold())
        .literal(AnsiColor::Cyan.on_default())
        .placeholder(AnsiColor::Blue.on_default());

    let matches = Args::command()
        .styles(styles)
        .color(ColorChoice::Auto)
        .get_matches();

    Args::from_arg_matches(&matches).into_diagnostic()
}

fn init_logging(verbose: bool) -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "modmerge=debug,modmerge_patch=debug,modmerge_definitions=info".into());

    let stderr_level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(stderr_level);

    let (file_guard, file_layer) = match utils::config::default_data_dir() {
        Some(data_dir) => {
            let log_dir = data_dir.join("logs");
            let appender = std::fs::create_dir_all(&log_dir)
                .map_err(|e| e.to_string())
                .and_then(|_| {
                    rolling::RollingFileAppender::builder()
                        .rotation(rolling::Rotation::DAILY)
                        .filename_prefix("modmerge")
                        .filename_suffix("log")
                        .build(log_dir.as_std_path())
                        .map_err(|e| e.to_string())
                });
            match appender {
                Ok(file_appender) => {
                    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
                    let layer = tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false);
                    (Some(guard), Some(layer))
                }
                Err(e) => {
                    eprintln!("Failed to open log directory {}: {}", log_dir, e);
                    (None, None)
                }
            }
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer);
    if let Some(layer) = file_layer {
        registry.with(layer).init();
    } else {
        registry.init();
    }

    file_guard
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args()?;
    let _log_guard = init_logging(args.verbose);

    match args.command {
        Commands::Index { session } => {
            index_mods(IndexArgs {
                session: session.into(),
            })
            .await
        }
        Commands::Conflicts {
            session,
            tree,
            json,
        } => {
            show_conflicts(ConflictsArgs {
                session: session.into(),
                tree,
                json,
            })
            .await
        }
        Commands::Merge { session } => {
            merge_mods(MergeArgs {
                session: session.into(),
            })
            .await
        }
        Commands::ClearCache { game, yes } => clear_cache(ClearCacheArgs { game, yes }).await,
        Commands::Config { action } => match action {
            ConfigCommands::Show => show_config(),
            ConfigCommands::SetStorageDir { path } => set_storage_dir(path),
            ConfigCommands::SetOutputDir { path } => set_output_dir(path),
            ConfigCommands::Reset => reset_config(),
        },
    }
}
