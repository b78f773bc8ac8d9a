use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use takeout_core::{AlbumBehavior, CancellationToken, DateDivision, Error, ProcessControl, ProcessingConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "takeout-sort",
    version,
    about = "Organize an extracted Google Photos Takeout into a date-based folder tree"
)]
struct Cli {
    /// Extracted Takeout folder
    input: Option<PathBuf>,

    /// Output directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// How albums are represented in the output
    #[arg(long, value_enum)]
    albums: Option<AlbumBehavior>,

    /// Date folder depth under ALL_PHOTOS
    #[arg(long, value_enum)]
    divide_to_dates: Option<DateDivision>,

    /// Copy files instead of moving them; the input is left untouched
    #[arg(long)]
    copy: bool,

    /// Move redundant copies to _Duplicates instead of deleting them
    #[arg(long)]
    keep_duplicates: bool,

    /// Skip -edited, -effects and similar derivative images
    #[arg(long)]
    skip_extras: bool,

    /// Disable date guessing from filenames
    #[arg(long)]
    no_guess: bool,

    /// Put media shared by a partner account under ALL_PHOTOS/PARTNER_SHARED
    #[arg(long)]
    divide_partner_shared: bool,

    /// Leave file modification times alone
    #[arg(long)]
    no_timestamps: bool,

    /// Process one media entity at a time
    #[arg(long)]
    sequential: bool,

    /// Entities processed concurrently
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Entities per batch between cancellation checks
    #[arg(long)]
    batch_size: Option<usize>,

    /// Continue from the checkpoint left by an interrupted run
    #[arg(long)]
    resume: bool,

    /// TOML file with processing options; flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the run summary as JSON on stdout
    #[arg(long)]
    json_summary: bool,

    /// Log every file operation
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn to_config(&self) -> anyhow::Result<ProcessingConfig> {
        let mut config = match &self.config {
            Some(path) => ProcessingConfig::from_toml_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ProcessingConfig::default(),
        };

        if let Some(input) = &self.input {
            config.input = input.clone();
        }
        if let Some(output) = &self.output {
            config.output = output.clone();
        }
        if config.input.as_os_str().is_empty() {
            bail!("no input folder given");
        }
        if config.output.as_os_str().is_empty() {
            bail!("no output folder given (use -o)");
        }

        if let Some(albums) = self.albums {
            config.album_behavior = albums;
        }
        if let Some(division) = self.divide_to_dates {
            config.date_division = division;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        config.max_concurrent = self.max_concurrent.or(config.max_concurrent);
        config.copy_mode |= self.copy;
        config.keep_duplicates |= self.keep_duplicates;
        config.skip_extras |= self.skip_extras;
        config.divide_partner_shared |= self.divide_partner_shared;
        config.sequential |= self.sequential;
        config.verbose |= self.verbose;
        if self.no_guess {
            config.guess_from_name = false;
        }
        if self.no_timestamps {
            config.update_timestamps = false;
        }
        Ok(config)
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.to_config()?;
    init_tracing(config.verbose);
    let t_total = Instant::now();

    let token = CancellationToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nCancelling after the current batch...");
        handler_token.cancel();
    })
    .context("installing Ctrl-C handler")?;

    info!(
        input = %config.input.display(),
        output = %config.output.display(),
        albums = %config.album_behavior,
        "Starting"
    );

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {prefix:>5} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("=> "),
    );
    let progress = |stage: &str, current: u64, total: u64, message: &str| {
        bar.set_prefix(stage.to_string());
        bar.set_length(total);
        bar.set_position(current + 1);
        bar.set_message(message.to_string());
    };

    let control = ProcessControl::new().with_resume(cli.resume).with_cancel_token(token);
    let outcome = takeout_core::process(config, None, &control, &progress).await;
    bar.finish_and_clear();

    let result = match outcome {
        Err(Error::Cancelled) => {
            eprintln!("Cancelled. Run again with --resume to continue.");
            std::process::exit(130);
        }
        other => other?,
    };

    if cli.json_summary {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        let moving = &result.moving;
        eprintln!(
            "Done! {} media ({} files), {} duplicates merged, {} dated ({:.2}s)",
            result.statistics.media_count,
            result.statistics.file_count,
            result.duplicates_removed,
            result.statistics.with_date,
            t_total.elapsed().as_secs_f64()
        );
        eprintln!(
            "[{}] {} moved, {} album files, {} shortcuts, {} removed, {} failed",
            moving.strategy,
            moving.primary_moves,
            moving.non_primary_moves,
            moving.shortcuts_created,
            moving.deletions,
            moving.failures
        );
        for warning in &result.warnings {
            eprintln!("  warning: {warning}");
        }
    }

    if result.moving.has_failures() {
        bail!("{} file operations failed", result.moving.failures);
    }
    Ok(())
}
