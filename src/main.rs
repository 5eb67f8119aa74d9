use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dupewatch::core::item::has_supported_extension;
use dupewatch::core::{ExactIdPolicy, Fingerprint, ItemId, fingerprint};
use dupewatch::services::{FsArchive, LocalGateway, Pipeline, SledStore};
use dupewatch::{AppConfig, logging};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::BufReader;
use walkdir::WalkDir;

#[derive(Parser, Debug)]
#[command(name = "dupewatch", version, about = "Detect reposted images in archived channels")]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true, value_name = "FILE", default_value = "dupewatch.json")]
    config: PathBuf,

    /// Log level or flexi_logger filter (overridden by RUST_LOG)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true, value_name = "FILE")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the detection pipeline, reading live events from stdin
    ///
    /// Each stdin line is `new <archive-relative path>` or `deleted <message id>`.
    Run,

    /// Print the fingerprint of each image
    Fingerprint {
        #[arg(required = true, value_name = "FILE")]
        files: Vec<PathBuf>,
    },

    /// Report duplicate groups in an archive tree without touching the ledger
    Scan {
        /// Archive root to scan
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,
    },

    /// Manage the scopes that take part in detection
    Scopes {
        #[command(subcommand)]
        command: ScopesCmd,
    },

    /// Inspect or edit the fingerprint ledger
    Ledger {
        #[command(subcommand)]
        command: LedgerCmd,
    },
}

#[derive(Subcommand, Debug)]
enum ScopesCmd {
    /// List admission rules
    List,
    /// Admit a scope or grouping id
    Add { rule: String },
    /// Revoke an admission rule
    Remove { rule: String },
}

#[derive(Subcommand, Debug)]
enum LedgerCmd {
    /// Print the ledger
    Show,
    /// Drop every record carried by a message, as if it had been deleted
    Forget { message_id: u64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(&cli.log_level, cli.log_file.as_deref())
        .context("Failed to initialise logging")?;

    let result = dispatch(cli).await;
    logging::flush();
    result
}

async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Fingerprint { files } => fingerprint_files(&files),
        Commands::Scan { path } => {
            let config = AppConfig::load(&cli.config)?;
            scan_archive(&path, &config.supported_formats)
        }
        Commands::Run => {
            let config = AppConfig::load(&cli.config)?;
            run(&config).await
        }
        Commands::Scopes { command } => {
            let config = AppConfig::load(&cli.config)?;
            let pipeline = open_pipeline(&config)?;
            pipeline.load_history().await?;
            match command {
                ScopesCmd::List => {
                    for rule in pipeline.rules().await {
                        println!("{}", rule);
                    }
                }
                ScopesCmd::Add { rule } => {
                    if pipeline.admit(&rule).await? {
                        println!("✅ Admitted {}", rule);
                    } else {
                        println!("{} is already admitted", rule);
                    }
                }
                ScopesCmd::Remove { rule } => {
                    if pipeline.revoke(&rule).await? {
                        println!("🗑️  Revoked {}", rule);
                    } else {
                        println!("{} was not admitted", rule);
                    }
                }
            }
            Ok(())
        }
        Commands::Ledger { command } => {
            let config = AppConfig::load(&cli.config)?;
            let pipeline = open_pipeline(&config)?;
            pipeline.load_history().await?;
            match command {
                LedgerCmd::Show => print!("{}", pipeline.ledger().await),
                LedgerCmd::Forget { message_id } => {
                    let removed = pipeline.message_deleted(message_id).await?;
                    println!("Removed {} record(s) for message {}", removed, message_id);
                }
            }
            Ok(())
        }
    }
}

fn open_pipeline(config: &AppConfig) -> Result<Pipeline> {
    fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("Failed to create directory {:?}", config.data_dir))?;
    let store = SledStore::open(config.store_path())
        .with_context(|| format!("Failed to open store in {:?}", config.data_dir))?;
    let archive = Arc::new(FsArchive::new(&config.archive_root));
    let gateway = LocalGateway::new(config.scope_layout(), archive.clone(), &config.link_base);

    Ok(Pipeline::new(
        config.pipeline_settings(),
        archive,
        Arc::new(gateway),
        Arc::new(store),
        Arc::new(ExactIdPolicy),
    ))
}

async fn run(config: &AppConfig) -> Result<()> {
    println!("▶ Watching archive: {}", config.archive_root.display());
    let pipeline = open_pipeline(config)?;
    pipeline
        .load_history()
        .await
        .context("Failed to load fingerprint history")?;
    pipeline.mark_gateway_ready();

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let saved = pipeline
        .serve(BufReader::new(tokio::io::stdin()), shutdown)
        .await?;
    println!("✅ Saved {} fingerprint record(s)", saved);

    // A blocking stdin read may still be parked and would hold the runtime open.
    logging::flush();
    std::process::exit(0);
}

fn fingerprint_files(files: &[PathBuf]) -> Result<()> {
    let results: Vec<(PathBuf, Result<Fingerprint>)> = files
        .par_iter()
        .map(|path| {
            let result = fs::read(path)
                .with_context(|| format!("Failed to open {:?}", path))
                .and_then(|bytes| {
                    fingerprint(&bytes).with_context(|| format!("Failed to decode {:?}", path))
                });
            (path.clone(), result)
        })
        .collect();

    for (path, result) in results {
        match result {
            Ok(print) => println!("{}={}", path.display(), print),
            Err(err) => eprintln!("⚠️  {:#}", err),
        }
    }
    Ok(())
}

/// Recursively walk `dir`, returning archive-relative paths of images.
fn scan_directory(dir: &Path, formats: &[String]) -> Result<Vec<String>> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
    spinner.set_message("Scanning for images…");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let mut images = Vec::new();
    for entry in WalkDir::new(dir).into_iter().filter_map(Result::ok) {
        if entry.file_type().is_file() {
            if let Ok(relative) = entry.path().strip_prefix(dir) {
                let key = relative.to_string_lossy().replace('\\', "/");
                if has_supported_extension(&key, formats) {
                    images.push(key);
                }
            }
        }
        spinner.tick();
    }
    spinner.finish_with_message("Scan complete");
    Ok(images)
}

/// Offline report: group images by scope and fingerprint.
fn scan_archive(dir: &Path, formats: &[String]) -> Result<()> {
    println!("▶ Scanning for duplicates in: {}", dir.display());
    let images = scan_directory(dir, formats)?;
    println!("▶ Parallel fingerprinting {} images…", images.len());

    let keyed: Vec<(u64, Fingerprint, ItemId, String)> = benchmark("fingerprinting", || {
        images
            .par_iter()
            .filter_map(|key| {
                let id = ItemId::from_path(key)
                    .map_err(|e| eprintln!("⚠️  Skipping {}: {}", key, e))
                    .ok()?;
                let bytes = fs::read(dir.join(key))
                    .map_err(|e| eprintln!("⚠️  Skipping {}: {}", key, e))
                    .ok()?;
                let print = fingerprint(&bytes)
                    .map_err(|e| eprintln!("⚠️  Skipping {}: {}", key, e))
                    .ok()?;
                Some((id.scope_id, print, id, key.clone()))
            })
            .collect()
    });

    let mut groups: HashMap<(u64, Fingerprint), Vec<(ItemId, String)>> = HashMap::new();
    for (scope_id, print, id, key) in keyed {
        groups.entry((scope_id, print)).or_default().push((id, key));
    }

    let mut duplicates: Vec<Vec<(ItemId, String)>> = groups
        .into_values()
        .map(|mut members| {
            members.sort();
            members
        })
        .filter(|members| {
            members
                .iter()
                .any(|(id, _)| id.sequence_id != members[0].0.sequence_id)
        })
        .collect();
    duplicates.sort();

    if duplicates.is_empty() {
        println!("No duplicates found.");
        return Ok(());
    }

    println!("Found {} duplicate group(s):", duplicates.len());
    for (i, group) in duplicates.iter().enumerate() {
        println!("\n✨ Group {} (scope {}):", i + 1, group[0].0.scope_id);
        println!("   🏆 First seen → {}", group[0].1);
        for (_, key) in &group[1..] {
            println!("   🔁 Repost → {}", key);
        }
    }
    Ok(())
}

/// Run `f()`, print how long it took (with `label`), and return its result.
fn benchmark<T, F: FnOnce() -> T>(label: &str, f: F) -> T {
    let start = Instant::now();
    let result = f();
    println!("⏱ {} took {:.2?}", label, start.elapsed());
    result
}
