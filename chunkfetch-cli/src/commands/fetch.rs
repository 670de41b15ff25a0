//! Fetch command - download one object with a progress bar.

use std::path::PathBuf;

use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use chunkfetch::config::ConfigFile;
use chunkfetch::engine::CompletedDownload;
use chunkfetch::{DownloadEvent, DownloadService, JobRequest};

use super::common::LocatorArgs;
use crate::error::CliError;

/// Arguments of the fetch command.
#[derive(Debug, Args)]
pub struct FetchArgs {
    #[command(flatten)]
    pub locator: LocatorArgs,

    /// Write the object to this file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Also keep a copy in the local cache when writing to a file
    #[arg(long)]
    pub cache_copy: bool,

    /// Object size in bytes, if known (allows parallel chunk requests)
    #[arg(long)]
    pub size: Option<u64>,

    /// Put the download at the head of its tier's queue
    #[arg(long)]
    pub first: bool,

    /// Rank the download ahead of other downloads of the same epoch
    #[arg(long)]
    pub boost: bool,
}

/// Run the fetch command.
pub async fn run(args: FetchArgs, config: &ConfigFile) -> Result<(), CliError> {
    let locator = args.locator.to_locator()?;
    if config.tiers.mirrors(locator.tier()).is_none() {
        return Err(CliError::Config(format!(
            "no endpoint configured for {}. Add it under [tiers] in the config file",
            locator.tier()
        )));
    }

    let (service, handle) = DownloadService::with_http(config).map_err(CliError::Remote)?;
    let shutdown = CancellationToken::new();
    let service_task = service.spawn(shutdown.clone());

    // Set up signal handler for a clean cancel
    let interrupt = CancellationToken::new();
    let interrupt_handler = interrupt.clone();
    ctrlc::set_handler(move || interrupt_handler.cancel())
        .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    let mut events = handle.subscribe().await?;
    let mut request = JobRequest::new(locator.clone()).with_cache_copy(args.cache_copy);
    if let Some(path) = &args.output {
        request = request.with_destination(path);
    }
    if let Some(size) = args.size {
        request = request.with_expected_size(size);
    }
    let job = handle.create(request).await?;
    handle.start(job, args.first, args.boost).await?;
    info!(job = %job, locator = %locator, "Fetch started");

    let progress = progress_bar(args.size);
    progress.set_prefix(locator.to_string());

    let outcome = loop {
        tokio::select! {
            _ = interrupt.cancelled() => break None,
            event = events.recv() => match event {
                Some(DownloadEvent::Progress {
                    job: id,
                    bytes_so_far,
                    total_size,
                }) if id == job => {
                    if let Some(total) = total_size {
                        progress.set_length(total);
                    }
                    progress.set_position(bytes_so_far);
                }
                Some(event) if event.job() == job && event.is_terminal() => break Some(event),
                Some(_) => {}
                None => break None,
            },
        }
    };

    let result = match outcome {
        Some(DownloadEvent::Complete { output, .. }) => {
            progress.finish_with_message("done");
            report(&output);
            Ok(())
        }
        Some(DownloadEvent::Failed {
            error,
            had_partial_data,
            ..
        }) => {
            progress.abandon_with_message("failed");
            debug!(job = %job, had_partial_data, "Fetch failed");
            Err(CliError::Download(error))
        }
        _ => {
            progress.abandon_with_message("cancelled");
            handle.cancel(job).await?;
            Err(CliError::Interrupted)
        }
    };

    shutdown.cancel();
    let _ = service_task.await;
    result
}

fn progress_bar(size: Option<u64>) -> ProgressBar {
    match size {
        Some(total) => {
            let bar = ProgressBar::new(total);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template(
                        "{prefix:.bold} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}) {msg}",
                    )
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("=> "),
            );
            bar
        }
        None => {
            let bar = ProgressBar::new_spinner();
            bar.set_style(
                ProgressStyle::default_spinner()
                    .template("{prefix:.bold} {spinner} {bytes} ({bytes_per_sec}) {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            bar
        }
    }
}

fn report(output: &CompletedDownload) {
    let source = if output.from_cache {
        "local cache"
    } else {
        "remote"
    };
    match &output.path {
        Some(path) => println!(
            "Saved {} bytes from {} to {}",
            output.size,
            source,
            path.display()
        ),
        None => println!("Fetched {} bytes from {}", output.size, source),
    }
}
