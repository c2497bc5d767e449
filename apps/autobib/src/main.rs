//! autobib command line
//!
//! Runs the folder pipeline over a library tree. Given a single `.bib`
//! file it formats, extracts or compares that file instead.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use autobib_core::{AutobibConfig, Confirm, Declined, Pipeline, PipelineOptions, RunReport};

#[derive(Parser, Debug)]
#[command(name = "autobib")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Library root, or a single .bib file
    #[arg(default_value = ".")]
    path: PathBuf,

    /// Where the extract and compare modes write their output
    #[arg(default_value = ".")]
    extra: PathBuf,

    /// Keep a backup of every file before it is overwritten or renamed
    #[arg(short, long)]
    backup: bool,

    /// Look up unmatched PDFs on Crossref
    #[arg(short, long)]
    crossref: bool,

    /// Look up unmatched PDFs on Google Scholar
    #[arg(short = 'g', long)]
    scholar: bool,

    /// Merge and rewrite each folder's bibliography
    #[arg(short, long)]
    format: bool,

    /// Match bibliography entries against the PDFs on disk
    #[arg(short, long)]
    sync: bool,

    /// Rename PDFs to their canonical names
    #[arg(short, long)]
    rename: bool,

    /// Write a master bibliography for the whole tree
    #[arg(short, long)]
    merge: bool,

    /// Delete backup files left by earlier runs
    #[arg(short, long)]
    delete_backups: bool,

    /// List the generated PDF names of a .bib file's entries
    #[arg(short, long)]
    extract: bool,

    /// Map the keys of this older version of the .bib file to the current ones
    #[arg(short = 'k', long, value_name = "OLD")]
    compare: Option<PathBuf>,

    /// Minimum Crossref score for accepting a match
    #[arg(short, long)]
    tol: Option<f64>,

    /// Configuration file (defaults to .autobib.toml in the root)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn options(&self) -> PipelineOptions {
        PipelineOptions {
            backup: self.backup,
            crossref: self.crossref,
            scholar: self.scholar,
            format: self.format,
            sync: self.sync,
            rename: self.rename,
            merge: self.merge,
            delete_backups: self.delete_backups,
            extract: self.extract,
        }
    }
}

/// Asks on stdin; an empty answer counts as yes
struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&mut self, prompt: &str) -> bool {
        print!("{} [Y/n] ", prompt);
        if io::stdout().flush().is_err() {
            return false;
        }
        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(0) | Err(_) => false,
            Ok(_) => matches!(answer.trim(), "" | "y" | "Y"),
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut config = AutobibConfig::resolve(cli.config.as_deref(), &cli.path)?;
    if let Some(tol) = cli.tol {
        config.query.crossref_accept_threshold = tol;
    }
    config.validate()?;

    let mut pipeline = Pipeline::new(config, cli.options())?.output_dir(&cli.extra);
    if let Some(old) = &cli.compare {
        pipeline = pipeline.compare_with(old);
    }
    let report = pipeline.run(&cli.path, &mut StdinConfirm)?;
    summarize(&report);

    if report.failures.is_empty() {
        Ok(())
    } else {
        Err(format!("{} folder(s) failed", report.failures.len()).into())
    }
}

fn summarize(report: &RunReport) {
    for (old, new) in &report.rekeyed {
        info!("Renamed key {} -> {}", old, new);
    }
    for remap in &report.remapped {
        if remap.similarity < 1.0 {
            info!("Mapped key {} -> {} ({:.2})", remap.old, remap.new, remap.similarity);
        } else {
            info!("Mapped key {} -> {}", remap.old, remap.new);
        }
    }
    for file in &report.unresolved {
        warn!("No entry for {}", file.display());
    }
    for file in &report.rejected {
        warn!("Lookup rejected for {}", file.display());
    }
    for file in &report.malformed {
        warn!("Unrecognized file name {}", file.display());
    }
    for (file, error) in &report.lookup_failures {
        warn!("Lookup failed for {}: {}", file.display(), error);
    }
    for declined in &report.declined {
        match declined {
            Declined::Removal { folder, records } => {
                info!("Kept {} stale entries in {}", records, folder.display())
            }
            Declined::Rename { folder, files } => {
                info!("Left {} files unrenamed in {}", files, folder.display())
            }
            Declined::DeleteBackups { files } => info!("Kept {} backup files", files),
            Declined::Overwrite { file } => info!("Left {} unchanged", file.display()),
        }
    }
    for failure in &report.failures {
        error!("{}: {}", failure.folder.display(), failure.error);
    }
    info!(
        "{} folders, {} queried, {} written, {} removed, {} renamed, {} backups deleted",
        report.folders,
        report.queried,
        report.written.len(),
        report.removed,
        report.renamed,
        report.deleted_backups
    );
}
