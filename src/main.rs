//! CLI entry point for `mboxrows`.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};

use mboxrows::archive::{self, ExtractionSummary};
use mboxrows::charset::FailurePolicy;
use mboxrows::config::{self, Config};
use mboxrows::export::csv::{export_csv, output_paths, CsvOptions, CsvWriter};
use mboxrows::export::json::JsonlWriter;
use mboxrows::model::mail::{MessageRecord, RecordDate};
use mboxrows::options::ExtractOptions;
use mboxrows::record::RecordBuilder;

#[derive(Parser)]
#[command(
    name = "mboxrows",
    version,
    about = "Turn MBOX and EML archives into clean tabular rows"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract one row per message into CSV or JSON lines
    Extract(ExtractArgs),
    /// Decode one raw payload and report the charset used
    Decode {
        /// File holding the raw bytes
        file: PathBuf,
        /// Declared charset label
        #[arg(long)]
        charset: Option<String>,
        #[command(flatten)]
        decode: DecodeArgs,
    },
    /// Show message and decode-failure statistics
    Stats {
        path: PathBuf,
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        decode: DecodeArgs,
    },
    /// Print the effective configuration, or write it with --init
    Config {
        #[arg(long)]
        init: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

#[derive(Args)]
struct ExtractArgs {
    /// MBOX file, EML file, or a directory holding either
    path: PathBuf,
    /// Output file (or directory)
    #[arg(short, long)]
    output: PathBuf,
    #[arg(short, long, value_enum)]
    format: Option<Format>,
    /// CSV columns, comma separated (`header:<name>` selects any header)
    #[arg(long, value_delimiter = ',')]
    columns: Vec<String>,
    /// Split CSV output into this many files
    #[arg(long)]
    slice: Option<usize>,
    /// Output encoding label
    #[arg(long)]
    encoding: Option<String>,
    /// Write a UTF-8 byte order mark
    #[arg(long)]
    bom: bool,
    /// Keep markup, URLs and addresses
    #[arg(long)]
    no_clean: bool,
    /// Only decode text parts of this content type (repeatable)
    #[arg(long = "content-type")]
    content_type: Vec<String>,
    #[command(flatten)]
    decode: DecodeArgs,
}

#[derive(Args)]
struct DecodeArgs {
    /// Charset tried after the declared and detected ones (repeatable)
    #[arg(long = "trial-charset")]
    trial_charset: Vec<String>,
    /// What to do with undecodable text
    #[arg(long = "on-failure", value_enum, env = "MBOXROWS_ON_FAILURE")]
    on_failure: Option<FailurePolicy>,
    /// Charset assumed for unknown-8bit payloads
    #[arg(long)]
    unknown_charset: Option<String>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Csv,
    Jsonl,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = config::load_config();

    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match cli.command {
        Commands::Extract(args) => cmd_extract(args, &config),
        Commands::Decode {
            file,
            charset,
            decode,
        } => cmd_decode(&file, charset.as_deref(), &decode, &config),
        Commands::Stats { path, json, decode } => cmd_stats(&path, json, &decode, &config),
        Commands::Config { init } => cmd_config(init, &config),
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = config::cache_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "mboxrows.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Config values overridden by command-line flags.
fn extract_options(args: &DecodeArgs, config: &Config) -> ExtractOptions {
    let mut options = ExtractOptions::from(config);
    if !args.trial_charset.is_empty() {
        options.trial_charsets = args.trial_charset.clone();
    }
    if let Some(policy) = args.on_failure {
        options.on_decode_failure = policy;
    }
    if let Some(label) = &args.unknown_charset {
        options.unknown_charset_default = label.clone();
    }
    options
}

fn byte_progress_bar(label: &str) -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "{{spinner:.green}} {label} [{{bar:40.cyan/blue}}] {{bytes}}/{{total_bytes}} ({{eta}})"
            ))
            .expect("valid template")
            .progress_chars("#>-"),
    );
    pb
}

/// Extract records and write them out.
fn cmd_extract(args: ExtractArgs, config: &Config) -> anyhow::Result<()> {
    let mut options = extract_options(&args.decode, config);
    if args.no_clean {
        options.auto_clean = false;
    }
    if !args.content_type.is_empty() {
        options.content_type_filter = Some(args.content_type.clone());
    }
    let policy = options.on_decode_failure;
    let builder = RecordBuilder::new(options);

    let format = args
        .format
        .or_else(|| Format::from_str(&config.export.default_format, true).ok())
        .unwrap_or(Format::Csv);
    let columns = if args.columns.is_empty() {
        config.export.columns.clone()
    } else {
        args.columns.clone()
    };
    let csv_options = CsvOptions::new(
        &columns,
        args.encoding.as_deref().unwrap_or(&config.export.encoding),
        args.bom || config.export.bom,
        args.slice.unwrap_or(config.export.slice),
    )?;
    let slice = args.slice.unwrap_or(config.export.slice);

    if let Some(parent) = args.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let pb = byte_progress_bar("Extracting");
    let progress = |current: u64, total: u64| {
        pb.set_length(total);
        pb.set_position(current);
    };
    let start = Instant::now();

    let (summary, written) = match format {
        Format::Jsonl => {
            let path = if args.output.is_dir() {
                args.output.join("mbox.jsonl")
            } else {
                args.output.clone()
            };
            let mut writer = JsonlWriter::new(BufWriter::new(File::create(&path)?));
            let summary = archive::extract(
                &args.path,
                &builder,
                &mut |record| writer.write_record(&record),
                Some(&progress),
            )?;
            writer.finish()?;
            (summary, vec![path])
        }
        Format::Csv if slice <= 1 => {
            let paths = output_paths(&args.output, 1);
            let file = File::create(&paths[0])?;
            let mut writer = CsvWriter::new(BufWriter::new(file), &csv_options)?;
            let summary = archive::extract(
                &args.path,
                &builder,
                &mut |record| writer.write_record(&record),
                Some(&progress),
            )?;
            writer.finish()?;
            (summary, paths)
        }
        Format::Csv => {
            let mut records = Vec::new();
            let summary = archive::extract(
                &args.path,
                &builder,
                &mut |record| {
                    records.push(record);
                    Ok(())
                },
                Some(&progress),
            )?;
            let paths = export_csv(&records, &args.output, &csv_options)?;
            (summary, paths)
        }
    };
    pb.finish_and_clear();

    print_summary(&summary, start.elapsed());
    for path in &written {
        println!("  {:<25} {}", "Output file", path.display());
    }
    println!();

    if policy == FailurePolicy::Raise && summary.decode_failures > 0 {
        anyhow::bail!(
            "{} decode failure(s) in {} message(s)",
            summary.decode_failures,
            summary.messages_with_failures
        );
    }
    Ok(())
}

fn print_summary(summary: &ExtractionSummary, elapsed: std::time::Duration) {
    use humansize::{format_size, BINARY};

    println!();
    println!("  Extraction complete:");
    println!("  {:<25} {}", "Input files", summary.files);
    println!("  {:<25} {}", "Input size", format_size(summary.bytes, BINARY));
    println!("  {:<25} {}", "Messages", summary.messages);
    if summary.skipped > 0 {
        println!("  {:<25} {}", "Skipped (unparseable)", summary.skipped);
    }
    println!(
        "  {:<25} {} in {} message(s)",
        "Decode failures", summary.decode_failures, summary.messages_with_failures
    );
    println!("  {:<25} {:.2?}", "Time", elapsed);
}

/// Decode one payload and print the result.
fn cmd_decode(
    file: &Path,
    charset: Option<&str>,
    args: &DecodeArgs,
    config: &Config,
) -> anyhow::Result<()> {
    let decoder = extract_options(args, config).charset_decoder();
    let result = archive::decode_file(file, charset, &decoder)?;

    eprintln!(
        "  {:<12} {}",
        "Declared",
        result.original_declared_encoding.as_deref().unwrap_or("-")
    );
    eprintln!(
        "  {:<12} {}",
        "Used",
        result.encoding_used.as_deref().unwrap_or("-")
    );
    if let Some(reason) = &result.failure_reason {
        eprintln!("  {:<12} {reason}", "Failure");
    }
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(result.text.as_bytes())?;
    if !result.text.ends_with('\n') {
        stdout.write_all(b"\n")?;
    }
    Ok(())
}

/// Counters gathered by `stats`.
#[derive(Default)]
struct RunStats {
    multipart: u64,
    with_file: u64,
    with_image: u64,
    with_delivered_to: u64,
    failures_by_charset: BTreeMap<String, usize>,
    oldest: Option<DateTime<Utc>>,
    newest: Option<DateTime<Utc>>,
}

impl RunStats {
    fn add(&mut self, record: &MessageRecord) {
        self.multipart += u64::from(record.is_multipart);
        self.with_file += u64::from(record.has_file);
        self.with_image += u64::from(record.has_image);
        self.with_delivered_to += u64::from(record.has_delivered_to);
        for failure in &record.failures {
            let charset = failure
                .declared_charset
                .clone()
                .unwrap_or_else(|| "(none)".to_string());
            *self.failures_by_charset.entry(charset).or_default() += 1;
        }
        if let Some(RecordDate::Parsed(dt)) = record.date {
            self.oldest = Some(self.oldest.map_or(dt, |o| o.min(dt)));
            self.newest = Some(self.newest.map_or(dt, |n| n.max(dt)));
        }
    }
}

/// Show statistics for an archive.
fn cmd_stats(path: &Path, json: bool, args: &DecodeArgs, config: &Config) -> anyhow::Result<()> {
    let builder = RecordBuilder::new(extract_options(args, config));
    let pb = byte_progress_bar("Reading");
    let start = Instant::now();

    let mut stats = RunStats::default();
    let summary = archive::extract(
        path,
        &builder,
        &mut |record| {
            stats.add(&record);
            Ok(())
        },
        Some(&|current, total| {
            pb.set_length(total);
            pb.set_position(current);
        }),
    )?;
    pb.finish_and_clear();
    let elapsed = start.elapsed();

    if json {
        let date_range = stats.oldest.zip(stats.newest).map(|(min, max)| {
            serde_json::json!({
                "oldest": min.to_rfc3339(),
                "newest": max.to_rfc3339(),
            })
        });
        let output = serde_json::json!({
            "path": path.to_string_lossy(),
            "summary": summary,
            "multipart": stats.multipart,
            "with_attachments": stats.with_file,
            "with_images": stats.with_image,
            "with_delivered_to": stats.with_delivered_to,
            "date_range": date_range,
            "failures_by_charset": stats.failures_by_charset,
            "elapsed_ms": elapsed.as_millis(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    print_summary(&summary, elapsed);
    let pct = |n: u64| {
        if summary.messages == 0 {
            0.0
        } else {
            n as f64 / summary.messages as f64 * 100.0
        }
    };
    println!("  {:<25} {} ({:.1}%)", "Multipart", stats.multipart, pct(stats.multipart));
    println!("  {:<25} {} ({:.1}%)", "With attachments", stats.with_file, pct(stats.with_file));
    println!("  {:<25} {} ({:.1}%)", "With images", stats.with_image, pct(stats.with_image));
    println!(
        "  {:<25} {} ({:.1}%)",
        "With Delivered-To",
        stats.with_delivered_to,
        pct(stats.with_delivered_to)
    );
    if let (Some(min), Some(max)) = (stats.oldest, stats.newest) {
        println!(
            "  {:<25} {} to {}",
            "Date range",
            min.format("%Y-%m-%d"),
            max.format("%Y-%m-%d")
        );
    }
    if !stats.failures_by_charset.is_empty() {
        println!();
        println!("  Decode failures by declared charset:");
        for (charset, count) in &stats.failures_by_charset {
            println!("    {count:>6}  {charset}");
        }
    }
    println!();
    Ok(())
}

/// Print the effective configuration as TOML, or save it.
fn cmd_config(init: bool, config: &Config) -> anyhow::Result<()> {
    if init {
        let path = config::save_config(config)?;
        println!("  Wrote {}", path.display());
    } else {
        if let Some(path) = config::config_file_path() {
            eprintln!("# config file: {}", path.display());
        }
        eprintln!("# log file: {}", config::log_file_path(config).display());
        print!("{}", toml::to_string_pretty(config)?);
    }
    Ok(())
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mboxrows", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}
