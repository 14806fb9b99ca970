//! evdet CLI application.
//!
//! Decodes raw event buffers, builds stacked histograms and postprocesses
//! model prediction dumps.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use evdet_core::decoder::read_predictions_file;
use evdet_core::output::{
    write_detections_csv, write_detections_json, write_histogram_file, EventCsvWriter,
};
use evdet_core::{ClassTable, EventDecoder, FieldOrder, Postprocessor, StackedHistogram};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Event stream histogram encoder and detection postprocessor.
///
/// Works on raw event buffers (16-byte little-endian x, y, polarity, t
/// records) and on prediction dumps produced by an external model.
#[derive(Parser, Debug)]
#[command(name = "evdet")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Suppress progress output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode a raw event buffer into time-sorted CSV
    Decode {
        /// Input raw event file
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Output CSV file
        #[arg(value_name = "OUTPUT")]
        output: PathBuf,

        /// Field order for CSV output.
        ///
        /// Format: comma-separated field names (x, y, p, t)
        ///
        /// Examples:
        /// - "x,y,p,t" (default, matches the wire order)
        /// - "t,x,y,p" (timestamp first)
        #[arg(short, long, default_value = "x,y,p,t")]
        format: String,
    },

    /// Build a stacked histogram from a raw event buffer
    Histogram {
        /// Input raw event file
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Output histogram dump (.bin)
        #[arg(value_name = "OUTPUT")]
        output: PathBuf,

        #[command(flatten)]
        geometry: GeometryArgs,
    },

    /// Filter and suppress detections from a prediction dump
    Postprocess {
        /// Input prediction dump
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Output file (.json or .csv)
        #[arg(value_name = "OUTPUT")]
        output: PathBuf,

        /// Class scores per prediction row
        #[arg(long, default_value_t = 3)]
        num_classes: usize,

        /// Minimum objectness x class score
        #[arg(long = "conf", default_value_t = 0.1)]
        confidence_threshold: f32,

        /// IoU above which lower-scoring boxes are suppressed
        #[arg(long = "nms", default_value_t = 0.45)]
        nms_threshold: f32,

        /// Suppress across classes instead of per class
        #[arg(long)]
        class_agnostic: bool,

        /// Comma-separated class labels, in class id order
        #[arg(long, value_delimiter = ',')]
        classes: Option<Vec<String>>,
    },
}

#[derive(Args, Debug)]
struct GeometryArgs {
    /// Number of temporal bins per polarity
    #[arg(short, long, default_value_t = 10)]
    bins: usize,

    /// Sensor height in pixels
    #[arg(long, default_value_t = 720)]
    height: usize,

    /// Sensor width in pixels
    #[arg(long, default_value_t = 1280)]
    width: usize,

    /// Clamp every histogram cell to at most this count
    #[arg(long)]
    count_cutoff: Option<u32>,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn spinner(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(style) =
        ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")
    {
        pb.set_style(style);
    }
    pb
}

fn file_name(path: &Path) -> &std::ffi::OsStr {
    path.file_name().unwrap_or_default()
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let progress = spinner(cli.quiet);
    let start_time = Instant::now();

    let summary = match cli.command {
        Command::Decode {
            input,
            output,
            format,
        } => {
            let field_order = FieldOrder::from_str(&format)
                .context("Invalid field format. Use comma-separated: x,y,p,t")?;

            progress.set_message(format!("Decoding {:?}...", file_name(&input)));
            let events = EventDecoder::new()
                .decode_file(&input)
                .context("Failed to decode event file")?;

            progress.set_message(format!("Writing to {:?}...", file_name(&output)));
            let file = File::create(&output).context("Failed to create output file")?;
            let mut writer = EventCsvWriter::new(file, field_order);
            writer.write_header()?;
            writer.write_events(&events)?;
            writer.flush().context("Failed to write CSV output")?;

            vec![
                ("Input", format!("{input:?}")),
                ("Output", format!("{output:?}")),
                ("Events", events.len().to_string()),
                ("Time range", format!("{:?}", events.time_range())),
            ]
        }

        Command::Histogram {
            input,
            output,
            geometry,
        } => {
            let mut histogram =
                StackedHistogram::new(geometry.bins, geometry.height, geometry.width)
                    .context("Invalid histogram geometry")?;
            if let Some(cutoff) = geometry.count_cutoff {
                histogram = histogram
                    .with_count_cutoff(cutoff)
                    .context("Invalid count cutoff")?;
            }

            progress.set_message(format!("Decoding {:?}...", file_name(&input)));
            let events = EventDecoder::new()
                .decode_file(&input)
                .context("Failed to decode event file")?;

            progress.set_message("Building histogram...");
            let tensor = histogram.construct(&events);

            write_histogram_file(&output, &tensor)
                .context("Failed to write histogram output")?;

            vec![
                ("Input", format!("{input:?}")),
                ("Output", format!("{output:?}")),
                ("Events", events.len().to_string()),
                ("Binned", format!("{:.0}", tensor.total())),
                ("Shape", format!("{:?}", tensor.shape())),
            ]
        }

        Command::Postprocess {
            input,
            output,
            num_classes,
            confidence_threshold,
            nms_threshold,
            class_agnostic,
            classes,
        } => {
            let table = classes.map(ClassTable::new).unwrap_or_default();
            let postprocessor = Postprocessor::new(table).class_agnostic(class_agnostic);

            progress.set_message(format!("Reading {:?}...", file_name(&input)));
            let predictions =
                read_predictions_file(&input).context("Failed to read prediction dump")?;

            let detections = postprocessor
                .postprocess_predictions(
                    &predictions,
                    num_classes,
                    confidence_threshold,
                    nms_threshold,
                )
                .context("Failed to postprocess predictions")?;

            let output_ext = output
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("json")
                .to_lowercase();
            if output_ext != "json" && output_ext != "csv" {
                anyhow::bail!(
                    "Unsupported output format: .{}. Use .json or .csv",
                    output_ext
                );
            }

            let file = File::create(&output).context("Failed to create output file")?;
            if output_ext == "csv" {
                write_detections_csv(file, &detections).context("Failed to write CSV output")?;
            } else {
                write_detections_json(file, &detections).context("Failed to write JSON output")?;
            }

            let kept: usize = detections.iter().flatten().map(Vec::len).sum();
            info!(kept, batch = detections.len(), "postprocessing finished");
            vec![
                ("Input", format!("{input:?}")),
                ("Output", format!("{output:?}")),
                ("Batch", detections.len().to_string()),
                ("Anchors", predictions.shape()[1].to_string()),
                ("Detections", kept.to_string()),
            ]
        }
    };

    let total_duration = start_time.elapsed();
    progress.finish_with_message(format!("Done in {:.2}s", total_duration.as_secs_f64()));

    if !cli.quiet {
        eprintln!();
        eprintln!("Summary:");
        for (label, value) in summary {
            eprintln!("  {:<13} {}", format!("{label}:"), value);
        }
        eprintln!("  {:<13} {:.3}s", "Duration:", total_duration.as_secs_f64());
    }

    Ok(())
}
