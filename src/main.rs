//! nfsync - command line front end
//!
//! # Usage
//!
//! ```bash
//! nfsync create rules.json              # Add rules that are not installed
//! nfsync delete rules.json              # Remove rules that are installed
//! nfsync sync rules.json                # Remove installed rules not in the file
//! nfsync sync --family ipv4 empty.json  # Remove every IPv4 rule
//! nfsync create rules.json --dry-run    # Show what would change
//! nfsync list --family ipv6             # Show installed IPv6 rules
//! nfsync config --write                 # Save the effective config
//! ```
//!
//! Rule files hold a JSON array of records, either positional
//! (`[0, 65535, 0, 0, 65535, 0, 0, 1897, 6]`) or objects with the rule's
//! field names.

use clap::{Args, Parser, Subcommand};
use nfsync::core::error::DriverErrorPattern;
use nfsync::core::projector;
use nfsync::core::session::Changes;
use nfsync::{Error, Family, Operation, Session, Summary, audit, config, utils};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{Level, warn};

shadow_rs::shadow!(build);

#[derive(Parser)]
#[command(name = "nfsync")]
#[command(version = build::PKG_VERSION, long_version = build::CLAP_LONG_VERSION)]
#[command(about = "Reconcile firewall rules with the authon netfilter driver", long_about = None)]
struct Cli {
    /// Config file (default: the user config directory)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Device path, overriding config and NFSYNC_DEVICE
    #[arg(short, long, global = true, value_name = "PATH")]
    device: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RuleArgs {
    /// JSON file with rule records ("-" reads standard input)
    rules: PathBuf,

    /// Address family; required when the file holds no rules
    #[arg(short, long)]
    family: Option<Family>,

    /// Print the changes without applying them
    #[arg(long)]
    dry_run: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Add rules that are not installed yet
    Create(RuleArgs),
    /// Delete rules that are installed
    Delete(RuleArgs),
    /// Delete installed rules that are not in the file
    Sync(RuleArgs),
    /// List installed rules of one family
    List {
        #[arg(short, long)]
        family: Family,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the effective configuration
    Config {
        /// Save it to the user config directory
        #[arg(long)]
        write: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(cli: &Cli) {
    let level = if cli.verbose {
        Level::DEBUG
    } else if cli.quiet {
        Level::WARN
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn report(e: &Error) {
    eprintln!("Error: {e}");
    if let Error::Driver { op, errno, .. } = e {
        let translation = DriverErrorPattern::match_errno(*op, *errno);
        eprintln!("{}", translation.user_message);
        for suggestion in &translation.suggestions {
            eprintln!("  - {suggestion}");
        }
    }
}

fn run(cli: Cli) -> nfsync::Result<()> {
    if let Err(e) = utils::ensure_dirs() {
        warn!("Failed to create config/state directories: {e}");
    }
    let mut options = config::load_options(cli.config.as_deref())?;
    if let Some(device) = cli.device {
        options.path = device;
    }

    match cli.command {
        Commands::Create(args) => reconcile(&options, Operation::Create, &args),
        Commands::Delete(args) => reconcile(&options, Operation::Delete, &args),
        Commands::Sync(args) => reconcile(&options, Operation::SelfSync, &args),
        Commands::List { family, json } => list(&options, family, json),
        Commands::Config { write } => show_config(&options, write),
    }
}

fn warn_if_unprivileged() {
    if !nix::unistd::getuid().is_root() {
        warn!("Not running as root; the driver may refuse control requests");
    }
}

fn reconcile(
    options: &config::Options,
    operation: Operation,
    args: &RuleArgs,
) -> nfsync::Result<()> {
    let records = projector::read_records(&args.rules)?;
    let batch = projector::project(&records, args.family)?;
    let family = batch.family();
    let requested = batch.len();

    warn_if_unprivileged();
    let session = Session::open(options)?;

    let result = if args.dry_run {
        session
            .plan(operation, batch)
            .map(|changes| print_changes(&changes))
    } else {
        let outcome = session.run(operation, batch);
        audit::log_operation(operation, family, requested, outcome.as_ref());
        outcome.map(|summary| print_summary(&summary))
    };

    session.close();
    result
}

fn print_changes(changes: &Changes) {
    println!(
        "{} on {} rules ({} installed): {} to add, {} to delete",
        changes.operation,
        changes.family,
        changes.installed,
        changes.add.len(),
        changes.delete.len()
    );
    for line in changes.add.display_lines() {
        println!("  + {line}");
    }
    for line in changes.delete.display_lines() {
        println!("  - {line}");
    }
}

fn print_summary(summary: &Summary) {
    println!(
        "✓ {} on {} rules: {} added, {} deleted ({} were installed)",
        summary.operation,
        summary.family,
        summary.added,
        summary.deleted,
        summary.installed_before
    );
}

fn list(options: &config::Options, family: Family, json: bool) -> nfsync::Result<()> {
    warn_if_unprivileged();
    let session = Session::open(options)?;
    let result = session.installed(family);
    session.close();
    let installed = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&installed)?);
    } else if installed.is_empty() {
        println!("No {family} rules installed.");
    } else {
        println!("Installed {family} rules ({}):", installed.len());
        for line in installed.display_lines() {
            println!("  {line}");
        }
    }
    Ok(())
}

fn show_config(options: &config::Options, write: bool) -> nfsync::Result<()> {
    println!("{options}");
    if write {
        utils::ensure_dirs()?;
        let path = utils::default_config_path().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Config directory not found",
            ))
        })?;
        config::save_options(options, &path)?;
        println!("Saved to {}", path.display());
    }
    Ok(())
}
