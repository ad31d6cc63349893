//! `resort-downloads`: reconciles the download tree with the hash registry
//! for one domain (§4.9, §6.1). A thin CLI shell around [`resort::run`];
//! defaults to a dry run and prints the console trace the library already
//! formats.

use bfs_crawl_sink::domain::{self, DomainKey};
use bfs_crawl_sink::resort::{self, ConflictPolicy, Mode};
use bfs_crawl_sink::routing::ExtensionBucketPolicy;
use bfs_crawl_sink::state::StateStore;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

/// resort-downloads: reconcile a domain's downloaded files against the hash registry
#[derive(Parser, Debug)]
#[command(name = "resort-downloads")]
#[command(version = "1.0.0")]
#[command(about = "Reconciles the download tree with the hash registry", long_about = None)]
struct Cli {
    /// Domain namespace to reconcile, e.g. "example.com"
    #[arg(long)]
    domain: Option<String>,

    /// Derive the domain from a crawl root URL instead of --domain
    #[arg(long)]
    crawl_root: Option<String>,

    /// Apply changes to disk (default is a dry run)
    #[arg(long)]
    apply: bool,

    /// Project root containing BFS_crawl/ and downloads/ (default: current directory)
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// How to resolve a residual name collision after a move
    #[arg(long, value_enum, default_value = "suffix")]
    conflict: ConflictArg,

    /// Limit the number of registry entries processed in phase A
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum ConflictArg {
    Suffix,
    Skip,
    Overwrite,
}

impl From<ConflictArg> for ConflictPolicy {
    fn from(arg: ConflictArg) -> Self {
        match arg {
            ConflictArg::Suffix => ConflictPolicy::Suffix,
            ConflictArg::Skip => ConflictPolicy::Skip,
            ConflictArg::Overwrite => ConflictPolicy::Overwrite,
        }
    }
}

fn resolve_domain(cli: &Cli) -> Result<DomainKey, String> {
    if let Some(domain) = &cli.domain {
        return Ok(DomainKey::from_host(domain));
    }
    if let Some(crawl_root) = &cli.crawl_root {
        return Ok(domain::resolve(None, Some(crawl_root), None, std::iter::empty()));
    }
    Err("one of --domain or --crawl_root is required".to_string())
}

fn run() -> Result<(), String> {
    let cli = Cli::parse();
    let domain = resolve_domain(&cli)?;
    let mode = if cli.apply { Mode::Apply } else { Mode::DryRun };
    let conflict_policy: ConflictPolicy = cli.conflict.into();

    let store = StateStore::new(cli.root.clone(), domain.clone());
    store.ensure_layout().map_err(|e| e.to_string())?;

    let policy = ExtensionBucketPolicy;
    let term_meta = store.load_term_meta().map_err(|e| e.to_string())?;
    let policy_metadata = serde_json::to_value(&term_meta).unwrap_or(serde_json::Value::Null);

    println!("domain: {}", domain.as_str());
    println!("mode: {}", if cli.apply { "apply" } else { "dry-run" });

    let summary = resort::run(&store, &policy, &policy_metadata, mode, conflict_policy, cli.limit)
        .map_err(|e| e.to_string())?;

    for line in &summary.actions {
        println!("{line}");
    }

    println!(
        "\n{} moved, {} deduped, {} conflicts skipped, {} action(s) total",
        summary.moved,
        summary.deduped,
        summary.conflicts_skipped,
        summary.actions.len()
    );

    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::from(0),
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::from(1)
        }
    }
}
