//! Main entry point for the cbsplit CLI application.
//!
//! The split runs as a spawned task; progress comes back to this task over
//! a channel and drives the terminal progress bar.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use cbsplit::archive;
use cbsplit::split::{CancelToken, SplitJob, partition, run_split};
use cbsplit::Cli;

/// Resolution of the progress bar.
const PROGRESS_STEPS: u64 = 1000;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Only initialize logging if verbose or RUST_LOG is set
    if cli.verbose || std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(
                EnvFilter::from_default_env()
                    .add_directive(if cli.verbose { "cbsplit=debug".parse()? } else { "cbsplit=warn".parse()? }),
            )
            .init();
    }

    let job = cli.job()?;

    if cli.list {
        return list_plan(&cli, &job).await;
    }

    split(&cli, job).await
}

/// Run the split on a worker task and render its progress.
async fn split(cli: &Cli, job: SplitJob) -> Result<()> {
    let options = cli.open_options();
    let cancel = CancelToken::new();

    // Ctrl-C stops the job between parts; finished parts are kept
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<f64>();
    let worker = tokio::spawn(async move {
        run_split(
            &job,
            &options,
            move |fraction| {
                // The receiver only goes away once the bar is done
                let _ = tx.send(fraction);
            },
            &cancel,
        )
        .await
    });

    let bar = if cli.quiet {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(PROGRESS_STEPS);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {percent:>3}%")?
                .progress_chars("#>-"),
        );
        bar
    };

    while let Some(fraction) = rx.recv().await {
        bar.set_position((fraction * PROGRESS_STEPS as f64).round() as u64);
    }

    match worker.await.context("split task panicked")? {
        Ok(result) => {
            bar.finish_and_clear();
            if !cli.quiet {
                if result.plan.is_clamped() {
                    eprintln!(
                        "Only {} pages: wrote {} parts instead of {}",
                        result.plan.total_entries(),
                        result.plan.effective(),
                        result.plan.requested
                    );
                }
                println!(
                    "Split {} pages into {} parts:",
                    result.plan.total_entries(),
                    result.output_paths.len()
                );
                for path in &result.output_paths {
                    println!("  {}", path.display());
                }
            }
            Ok(())
        }
        Err(failure) => {
            bar.abandon();
            if !failure.completed.is_empty() {
                eprintln!("Parts completed before the failure:");
                for path in &failure.completed {
                    eprintln!("  {}", path.display());
                }
            }
            Err(failure.error.into())
        }
    }
}

/// Print the pages of the archive and which part each would go to.
async fn list_plan(cli: &Cli, job: &SplitJob) -> Result<()> {
    let archive = archive::open(&job.source, &cli.open_options()).await?;
    let entries = archive.entries();
    let plan = partition(entries.len(), job.parts)?;
    let names = job.part_names(&plan)?;

    println!("{:>5}  {:>10}  Name", "Part", "Length");
    println!("{}", "-".repeat(60));

    let mut total = 0u64;
    for (i, part) in plan.partitions.iter().enumerate() {
        for entry in &entries[part.range()] {
            println!("{:>5}  {:>10}  {}", i + 1, entry.size, entry.name);
            total += entry.size;
        }
    }

    println!("{}", "-".repeat(60));
    println!(
        "{:>5}  {:>10}  {} pages, {} format",
        "",
        format_size(total),
        entries.len(),
        archive.format()
    );
    println!();
    for (part, name) in plan.partitions.iter().zip(&names) {
        println!(
            "{}  (pages {}-{})",
            job.output_dir.join(name).display(),
            part.start + 1,
            part.end
        );
    }
    if plan.is_clamped() {
        println!(
            "Note: {} parts requested, only {} possible",
            plan.requested,
            plan.effective()
        );
    }

    Ok(())
}

/// Format a byte size into a human-readable string.
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
