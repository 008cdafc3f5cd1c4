use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;

/// Settings given on the command line; `None` leaves the configured value.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub threads: Option<usize>,
    pub max_retries: Option<usize>,
    pub cache_path: Option<PathBuf>,
    pub no_cache: bool,
    pub cache_size_multiplier: Option<f64>,
    pub cache_days: Option<u64>,
    pub proxy: Option<String>,
    pub proxy_user: Option<String>,
    pub proxy_password: Option<String>,
    pub exclude: Vec<String>,
    pub force: bool,
    pub prompt: bool,
}

#[derive(Debug, Clone)]
pub enum Command {
    Sync {
        root: Option<PathBuf>,
        config_path: Option<PathBuf>,
        dry_run: bool,
        overrides: SettingsOverrides,
    },
}

pub struct Args {
    pub command: Command,
    pub log_level: Level,
}

#[derive(Debug, Parser)]
#[command(
    name = "gitdeps",
    version,
    author = "Nick Guletskii",
    about = "Synchronise large binary dependencies declared by manifests in a source tree"
)]
struct Cli {
    #[arg(
        short = 'v',
        long = "verbose",
        help = "Sets the level of verbosity",
        action = ArgAction::Count,
        global = true
    )]
    verbose: u8,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Debug, Subcommand)]
enum CliCommand {
    /// Download, update and delete files so the tree matches its manifests
    Sync {
        #[arg(
            short = 'r',
            long = "root",
            value_name = "DIR",
            help = "Root of the working tree (default: current directory)"
        )]
        root: Option<PathBuf>,

        #[arg(
            short = 'c',
            long = "config",
            value_name = "FILE",
            help = "Optional settings file (TOML, YAML or JSON)"
        )]
        config: Option<PathBuf>,

        #[arg(
            short = 't',
            long = "threads",
            value_name = "N",
            help = "Number of simultaneous pack downloads"
        )]
        threads: Option<usize>,

        #[arg(
            long = "max-retries",
            value_name = "N",
            help = "Failed attempts a download worker tolerates before giving up"
        )]
        max_retries: Option<usize>,

        #[arg(
            long = "dry-run",
            help = "Report what would be added, updated and removed without changing anything"
        )]
        dry_run: bool,

        #[arg(
            long = "force",
            help = "Overwrite files that were modified since they were downloaded",
            conflicts_with = "prompt"
        )]
        force: bool,

        #[arg(
            long = "prompt",
            help = "Ask before overwriting files that were modified since they were downloaded"
        )]
        prompt: bool,

        #[arg(
            long = "cache",
            value_name = "DIR",
            help = "Pack cache directory (default: .git/gitdeps-cache of the enclosing repository)"
        )]
        cache: Option<PathBuf>,

        #[arg(long = "no-cache", help = "Do not read or populate the pack cache")]
        no_cache: bool,

        #[arg(
            long = "cache-size-multiplier",
            value_name = "FACTOR",
            help = "Cache budget as a multiple of the current dependencies' compressed size"
        )]
        cache_size_multiplier: Option<f64>,

        #[arg(
            long = "cache-days",
            value_name = "DAYS",
            help = "Cached packs used within this many days are never evicted"
        )]
        cache_days: Option<u64>,

        #[arg(long = "proxy", value_name = "URL", help = "HTTP proxy for pack downloads")]
        proxy: Option<String>,

        #[arg(long = "proxy-user", value_name = "USER", requires = "proxy_password")]
        proxy_user: Option<String>,

        #[arg(long = "proxy-password", value_name = "PASSWORD")]
        proxy_password: Option<String>,

        #[arg(
            short = 'x',
            long = "exclude",
            value_name = "FOLDER",
            help = "Never touch files below this folder (repeat or use comma-separated values)",
            action = ArgAction::Append,
            value_delimiter = ','
        )]
        exclude: Vec<String>,
    },
}

pub fn parse_args() -> Args {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(log_level.into())
                .from_env_lossy(),
        )
        .init();

    let command = match cli.command {
        CliCommand::Sync {
            root,
            config,
            threads,
            max_retries,
            dry_run,
            force,
            prompt,
            cache,
            no_cache,
            cache_size_multiplier,
            cache_days,
            proxy,
            proxy_user,
            proxy_password,
            exclude,
        } => Command::Sync {
            root,
            config_path: config,
            dry_run,
            overrides: SettingsOverrides {
                threads,
                max_retries,
                cache_path: cache,
                no_cache,
                cache_size_multiplier,
                cache_days,
                proxy,
                proxy_user,
                proxy_password,
                exclude,
                force,
                prompt,
            },
        },
    };

    Args { command, log_level }
}
