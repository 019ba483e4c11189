use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::{Log, Metadata, Record, debug};

mod archive;
mod engine;
mod env;
mod error;
mod locator;
mod manifest;
mod util;

use engine::Repackager;
use engine::models::{RepackOptions, SuccessSummary};
use error::{CoreError, CoreResult};
use manifest::{EXPECTED_NAME, InjectionPolicy, MANIFEST_FILE, normalize_url};
use util::{ProgressCallback, ProgressUpdate};

#[derive(Parser, Debug)]
#[command(
    name = "B24AD Repack",
    author,
    version,
    about = "Repackage the Bitrix24: Bad Advice extension for your own portal address"
)]
struct Cli {
    /// Extension archive (.zip) to repackage.
    input: Option<PathBuf>,

    /// Portal address, e.g. mycompany.bitrix24.ru. Asked for on stdin when omitted.
    #[arg(short, long)]
    url: Option<String>,

    /// Where to write the rebuilt archive; `.zip` is appended when missing.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// How new patterns combine with the ones already in the manifest.
    #[arg(long, value_enum, default_value_t = InjectionPolicy::Merge)]
    policy: InjectionPolicy,

    /// Manifest `name` the archive must carry.
    #[arg(long, default_value = EXPECTED_NAME)]
    expected_name: String,

    /// Manifest file name to look for inside the archive.
    #[arg(long, default_value = MANIFEST_FILE)]
    manifest_file: String,

    /// Working directory to extract into; must be missing or empty. Defaults to a fresh temp dir.
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Leave the working directory in place after a successful run.
    #[arg(long)]
    keep_work_dir: bool,

    /// Open native file dialogs for paths not given on the command line.
    #[arg(long)]
    pick: bool,

    /// Print the result as JSON instead of text.
    #[arg(long)]
    json: bool,

    /// Print version and exit.
    #[arg(long)]
    version_only: bool,
}

impl Cli {
    fn options(&self) -> RepackOptions {
        let defaults = RepackOptions::default();
        RepackOptions {
            expected_name: self.expected_name.clone(),
            manifest_file: self.manifest_file.clone(),
            policy: self.policy,
            work_dir: self.work_dir.clone().unwrap_or(defaults.work_dir),
            keep_work_dir: self.keep_work_dir,
        }
    }
}

/// Hides the progress bar while a log line is written so the two never share
/// a terminal row.
struct BarLogger {
    inner: env_logger::Logger,
    bar: ProgressBar,
}

impl Log for BarLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record<'_>) {
        if self.inner.matches(record) {
            self.bar.suspend(|| self.inner.log(record));
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

fn init_logging(bar: &ProgressBar) {
    let inner = env_logger::Builder::from_env(Env::default().default_filter_or("info")).build();
    let max_level = inner.filter();
    let logger = BarLogger {
        inner,
        bar: bar.clone(),
    };
    if log::set_boxed_logger(Box::new(logger)).is_ok() {
        log::set_max_level(max_level);
    }
}

fn main() -> ExitCode {
    let bar = progress_bar();
    init_logging(&bar);

    let cli = Cli::parse();
    if cli.version_only {
        println!("B24AD Repack {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    let mut report = |update: ProgressUpdate| {
        bar.set_prefix(update.stage);
        bar.set_position(update.progress.clamp(0.0, 100.0) as u64);
        bar.set_message(update.current_file.unwrap_or(update.message));
    };
    let mut progress: ProgressCallback<'_> = Some(&mut report);

    let result = run(&cli, &mut progress);
    drop(progress);
    bar.finish_and_clear();

    match result {
        Ok(summary) => {
            print_summary(&summary, cli.json);
            ExitCode::SUCCESS
        }
        Err(err) => {
            debug!("repack: {err:?}");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli, progress: &mut ProgressCallback<'_>) -> CoreResult<SuccessSummary> {
    let repackager = Repackager::new(cli.options());

    // Everything known up front: one call, inputs checked before any I/O.
    if let (Some(input), Some(url)) = (&cli.input, &cli.url)
        && !cli.pick
    {
        let output = env::ensure_zip_extension(
            cli.output.clone().unwrap_or_else(env::default_output_path),
        );
        return repackager.process_archive(input, url, &output, progress);
    }

    // Otherwise walk the steps one at a time, validating the archive before
    // asking for the portal address.
    let input = match &cli.input {
        Some(path) => path.clone(),
        None if cli.pick => pick_input()?,
        None => {
            return Err(CoreError::EmptyInput {
                field: "input archive path",
            });
        }
    };
    let prepared = repackager.prepare(&input, progress)?;
    eprintln!(
        "Found {} {} in {}",
        repackager.options().expected_name,
        prepared.version().unwrap_or("(no version)"),
        prepared.root().display()
    );

    let url = match &cli.url {
        Some(url) => url.clone(),
        None => prompt_url()?,
    };
    let patterns = normalize_url(&url)?;

    let output = match &cli.output {
        Some(path) => path.clone(),
        None if cli.pick => pick_output()?,
        None => env::default_output_path(),
    };
    let output = env::ensure_zip_extension(output);
    repackager.finish(prepared, &patterns, &output, progress)
}

fn pick_input() -> CoreResult<PathBuf> {
    rfd::FileDialog::new()
        .set_title("Select extension archive")
        .add_filter("ZIP archive", &["zip"])
        .pick_file()
        .ok_or(CoreError::EmptyInput {
            field: "input archive path",
        })
}

fn pick_output() -> CoreResult<PathBuf> {
    rfd::FileDialog::new()
        .set_title("Save repackaged extension")
        .add_filter("ZIP archive", &["zip"])
        .set_file_name(env::DEFAULT_OUTPUT_NAME)
        .save_file()
        .ok_or(CoreError::EmptyInput {
            field: "output archive path",
        })
}

fn prompt_url() -> CoreResult<String> {
    eprint!("Portal URL (e.g. mycompany.bitrix24.ru): ");
    io::stderr()
        .flush()
        .map_err(|e| CoreError::io("writing prompt", e))?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|e| CoreError::io("reading portal URL", e))?;
    Ok(line)
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(100);
    let style = ProgressStyle::with_template("{prefix:>9} [{bar:30}] {pos:>3}% {wide_msg}")
        .map(|style| style.progress_chars("=> "))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    bar.set_style(style);
    bar
}

fn print_summary(summary: &SuccessSummary, json: bool) {
    if json {
        match serde_json::to_string_pretty(summary) {
            Ok(text) => println!("{text}"),
            Err(err) => eprintln!("error: cannot render summary: {err}"),
        }
        return;
    }
    println!("Extension repackaged successfully!");
    println!();
    println!("Added URL patterns:");
    println!("  {}", summary.http_pattern);
    println!("  {}", summary.https_pattern);
    println!();
    println!("Saved to: {}", summary.output.display());
    println!(
        "({} entries from {}, {:?} policy)",
        summary.entries, summary.extension_root, summary.policy
    );
}
