use std::time::Duration;

use clap::{error::ErrorKind, CommandFactory, Parser};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::{fs::File, io::BufReader};
use tracing::Level;

use crate::cli::args::CliArgs;
use crate::cli::validation;
use crate::config::{self, ConfigFile};
use crate::output::{self, OutputFormat};
use crate::probe::{ProbeConfig, DEFAULT_TIMEOUT_SECONDS, DEFAULT_USER_AGENT};
use crate::runner::{Options, Runner, ScanResult, StageWidths, DEFAULT_CONCURRENCY};

const DEFAULT_WORKERS: usize = 10;

fn print_banner() {
    const BANNER: &str = r#"
            __ _           _                   _
  _ __ ___ / _| | ___  ___| |_ _ __  _ __ ___ | |__   ___
 | '__/ _ \ |_| |/ _ \/ __| __| '_ \| '__/ _ \| '_ \ / _ \
 | | |  __/  _| |  __/ (__| |_| |_) | | | (_) | |_) |  __/
 |_|  \___|_| |_|\___|\___|\__| .__/|_|  \___/|_.__/ \___|
                              |_|
       v0.1.0 - query parameter reflection prober
    "#;
    eprint!("{}", BANNER.bold().cyan());
    eprintln!();
}

fn format_kv_line(label: &str, value: &str) {
    eprintln!(":: {:<12}: {}", label.bold(), value);
}

fn log_level(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn init_tracing(verbosity: u8) {
    // a subscriber may already be installed when embedded or under test
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(log_level(verbosity))
        .with_target(false)
        .try_init();
}

#[derive(Clone, Debug)]
struct RunConfig {
    input_file_path: Option<String>,
    concurrency: usize,
    workers: usize,
    probe: ProbeConfig,
    output: Option<String>,
    output_format: OutputFormat,
    no_color: bool,
    silent: bool,
    verbosity: u8,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn build_run_config(args: CliArgs, cfg: ConfigFile) -> Result<RunConfig, String> {
    validation::validate(&args)?;

    let concurrency = args
        .concurrency
        .or(cfg.concurrency)
        .unwrap_or(DEFAULT_CONCURRENCY);
    if concurrency == 0 {
        return Err("invalid concurrency, expected at least 1".to_string());
    }
    let workers = args.workers.or(cfg.workers).unwrap_or(DEFAULT_WORKERS);
    if workers == 0 {
        return Err("invalid workers, expected at least 1".to_string());
    }
    let timeout_seconds = args
        .timeout
        .or(cfg.timeout)
        .unwrap_or(DEFAULT_TIMEOUT_SECONDS);
    if timeout_seconds == 0 {
        return Err("invalid timeout, expected at least 1 second".to_string());
    }
    let rate = args.rate.or(cfg.rate).unwrap_or(0);

    let user_agent = non_empty(args.user_agent.or(cfg.user_agent))
        .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
    let proxy = non_empty(args.proxy.or(cfg.proxy));
    let header = non_empty(args.header.or(cfg.header));
    if let Some(raw) = header.as_deref() {
        crate::probe::parse_header(raw).map_err(|e| format!("invalid header '{raw}': {e}"))?;
    }

    let input_file_path =
        non_empty(args.input_file.or(cfg.input_file)).map(|p| config::expand_tilde_string(&p));
    let output = non_empty(args.output.or(cfg.output)).map(|p| config::expand_tilde_string(&p));

    let output_format = match non_empty(args.output_format.or(cfg.output_format)) {
        Some(raw) => OutputFormat::parse(&raw)
            .ok_or_else(|| format!("invalid output format '{raw}', expected text or json"))?,
        None => output
            .as_deref()
            .and_then(output::infer_format_from_path)
            .unwrap_or(OutputFormat::Text),
    };

    Ok(RunConfig {
        input_file_path,
        concurrency,
        workers,
        probe: ProbeConfig {
            user_agent,
            timeout_seconds,
            proxy,
            header,
            rate,
        },
        output,
        output_format,
        no_color: args.no_color || cfg.no_color.unwrap_or(false),
        silent: args.silent || cfg.silent.unwrap_or(false),
        verbosity: args.verbose,
    })
}

fn print_settings(run: &RunConfig) {
    format_kv_line(
        "Input",
        run.input_file_path.as_deref().unwrap_or("stdin"),
    );
    format_kv_line("Concurrency", &run.concurrency.to_string());
    format_kv_line("Workers", &run.workers.to_string());
    format_kv_line("Timeout", &format!("{}s", run.probe.timeout_seconds));
    if run.probe.rate > 0 {
        format_kv_line("Rate", &format!("{}/s", run.probe.rate));
    }
    if let Some(proxy) = run.probe.proxy.as_deref() {
        format_kv_line("Proxy", proxy);
    }
    if let Some(header) = run.probe.header.as_deref() {
        format_kv_line("Header", header);
    }
    if let Some(output) = run.output.as_deref() {
        let format = match run.output_format {
            OutputFormat::Text => "text",
            OutputFormat::Json => "json",
        };
        format_kv_line("Output", &format!("{output} ({format})"));
    }
    eprintln!();
}

fn print_summary(result: &ScanResult) {
    eprintln!();
    format_kv_line(
        "Targets",
        &format!(
            "{} accepted, {} rejected",
            result.feed.accepted, result.feed.rejected
        ),
    );
    for stage in result.stages.iter() {
        format_kv_line(
            stage.stage,
            &format!("{} in, {} out", stage.consumed, stage.emitted),
        );
    }
    let findings = result.findings.len().to_string();
    let findings = if result.findings.is_empty() {
        findings.normal()
    } else {
        findings.green().bold()
    };
    format_kv_line("Findings", &findings.to_string());
    format_kv_line(
        "Duration",
        &format!("{:.2}s", result.elapsed.as_secs_f64()),
    );
}

fn build_progress(silent: bool) -> Result<ProgressBar, String> {
    if silent {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::new_spinner();
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb.enable_steady_tick(Duration::from_millis(200));
    pb.set_style(
        ProgressStyle::with_template(
            ":: Progress: {spinner} [{pos} targets] :: {per_sec} :: Duration: [{elapsed_precise}]",
        )
        .map_err(|e| format!("failed to build progress bar style: {e}"))?,
    );
    Ok(pb)
}

async fn run_async(run: RunConfig) -> Result<(), String> {
    init_tracing(run.verbosity);
    if run.no_color {
        colored::control::set_override(false);
    }
    if !run.silent {
        print_banner();
        print_settings(&run);
    }

    let options = Options {
        concurrency: StageWidths::uniform(run.concurrency),
        probe: run.probe.clone(),
        ..Options::default()
    };
    let pb = build_progress(run.silent)?;
    let runner = Runner::new(options)
        .map_err(|e| e.to_string())?
        .with_progress(pb.clone());

    let print_finding = |finding: &crate::stages::Finding| {
        pb.suspend(|| println!("{finding}"));
    };

    let result = match run.input_file_path.as_deref() {
        Some(path) => {
            let handle = File::open(path)
                .await
                .map_err(|e| format!("failed to open input file '{path}': {e}"))?;
            runner.run(BufReader::new(handle), print_finding).await
        }
        None => {
            runner
                .run(BufReader::new(tokio::io::stdin()), print_finding)
                .await
        }
    }
    .map_err(|e| e.to_string())?;
    pb.finish_and_clear();

    if let Some(path) = run.output.as_deref() {
        output::write_report(path, run.output_format, &result.findings).await?;
    }
    if !run.silent {
        print_summary(&result);
    }
    Ok(())
}

pub fn run_cli() -> Result<(), String> {
    let args = match CliArgs::try_parse() {
        Ok(args) => args,
        Err(e) => match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                return e.print().map_err(|err| err.to_string());
            }
            _ => return Err(e.to_string()),
        },
    };

    let cfg = match args.config.as_deref() {
        Some(path) => config::load_config(&config::expand_tilde(path), false)?,
        None => match config::default_config_path() {
            Some(path) => config::load_config(&path, true)?,
            None => ConfigFile::default(),
        },
    };

    let run = build_run_config(args, cfg)?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(run.workers)
        .build()
        .map_err(|e| format!("failed to build runtime: {e}"))?;

    rt.block_on(run_async(run))
}
