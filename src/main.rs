//! CLI entry point for `mailsorter`.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use anyhow::Context;
use clap::{Args, CommandFactory, Parser, Subcommand};

use mailsorter::audit::{AuditSink, CsvAuditLog};
use mailsorter::cache::SenderCache;
use mailsorter::classifier::{ChatBackend, Classifier, OpenAiChat, Prompts};
use mailsorter::config::{self, Overrides, Settings};
use mailsorter::driver::{self, RunSummary};
use mailsorter::mailbox;
use mailsorter::reconcile::BatchReconciler;

#[derive(Parser)]
#[command(
    name = "mailsorter",
    version,
    about = "Classify mailbox messages by sender cache and language model"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file (default: $MAILSORTER_CONFIG or the user config dir)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(flatten)]
    opts: RunArgs,
}

/// Settings that can come from the environment or the command line.
#[derive(Args, Debug)]
struct RunArgs {
    /// MBOX file or directory of .eml files
    #[arg(long, global = true, env = "MAILBOX", value_name = "PATH")]
    mailbox: Option<PathBuf>,

    /// First day to fetch (YYYY-MM-DD)
    #[arg(long, global = true, env = "DATE_FROM", value_name = "DATE")]
    date_from: Option<String>,

    /// Day after the last day to fetch (YYYY-MM-DD)
    #[arg(long, global = true, env = "DATE_TO", value_name = "DATE")]
    date_to: Option<String>,

    /// Days per fetch window
    #[arg(long, global = true, env = "CHUNK_DAYS")]
    chunk_days: Option<u32>,

    /// Messages per model call
    #[arg(long, global = true, env = "BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Body characters sent to the model per message
    #[arg(long, global = true, env = "MAX_BODY_CHARS")]
    max_body_chars: Option<usize>,

    /// Model identifier
    #[arg(long, global = true, env = "GPTMODEL")]
    model: Option<String>,

    /// Chat completions endpoint
    #[arg(long, global = true, value_name = "URL")]
    endpoint: Option<String>,

    /// API key for the chat endpoint
    #[arg(long, global = true, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Directory holding system_prompt.txt and classify_prompt.txt
    #[arg(long, global = true, env = "PROMPTS_DIR", value_name = "DIR")]
    prompts_dir: Option<PathBuf>,

    /// System instruction file
    #[arg(long, global = true, env = "SYSTEM_PROMPT_FILE", value_name = "FILE")]
    system_prompt_file: Option<PathBuf>,

    /// User prompt template file (must contain {emails_json})
    #[arg(long, global = true, env = "CLASSIFY_PROMPT_FILE", value_name = "FILE")]
    classify_prompt_file: Option<PathBuf>,

    /// Write model payloads to a transcript file
    #[arg(long, global = true, env = "LOG_GPT_PAYLOAD", value_parser = parse_flag, value_name = "BOOL")]
    log_payload: Option<bool>,

    /// Directory for the sender cache (file name sender_exact.json)
    #[arg(long, global = true, env = "CACHE_DIR", value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Sender cache file
    #[arg(long, global = true, env = "CACHE_FILE", value_name = "FILE")]
    cache_file: Option<PathBuf>,

    /// Log level when no -v flag is given (error, warn, info, debug, trace)
    #[arg(long, global = true, env = "LOG_LEVEL", value_name = "LEVEL")]
    log_level: Option<String>,

    /// Directory for the application log and audit files
    #[arg(long, global = true, env = "LOG_DIR", value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Also log to stderr
    #[arg(long, global = true, env = "LOG_TO_CONSOLE", value_parser = parse_flag, value_name = "BOOL")]
    log_to_console: Option<bool>,

    /// Suffix of this run's log files
    #[arg(long, global = true, env = "RUNSTAMP")]
    runstamp: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify every message in the date range (default)
    Run,
    /// Print the date windows a run would fetch
    Windows,
    /// Show sender cache statistics
    Cache {
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

fn parse_flag(value: &str) -> Result<bool, String> {
    Ok(config::truthy(value))
}

impl RunArgs {
    fn overrides(&self) -> Overrides {
        let prompt = |explicit: &Option<PathBuf>, name: &str| {
            explicit
                .clone()
                .or_else(|| self.prompts_dir.as_ref().map(|d| d.join(name)))
        };
        Overrides {
            log_level: self.log_level.clone(),
            log_dir: self.log_dir.clone(),
            log_to_console: self.log_to_console,
            mailbox: self.mailbox.clone(),
            date_from: self.date_from.clone(),
            date_to: self.date_to.clone(),
            chunk_days: self.chunk_days,
            batch_size: self.batch_size,
            max_body_chars: self.max_body_chars,
            model: self.model.clone(),
            endpoint: self.endpoint.clone(),
            api_key: self.api_key.clone(),
            system_prompt_file: prompt(&self.system_prompt_file, "system_prompt.txt"),
            classify_prompt_file: prompt(&self.classify_prompt_file, "classify_prompt.txt"),
            log_payload: self.log_payload,
            cache_file: self
                .cache_file
                .clone()
                .or_else(|| self.cache_dir.as_ref().map(|d| d.join("sender_exact.json"))),
        }
    }
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let command = cli.command.unwrap_or(Commands::Run);
    match command {
        Commands::Completions { shell } => return report(cmd_completions(shell)),
        Commands::Manpage => return report(cmd_manpage()),
        _ => {}
    }

    let settings = match load_settings(cli.config.as_deref(), &cli.opts) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let log_level = match cli.verbose {
        0 => settings.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &settings);

    let result = match command {
        Commands::Run => cmd_run(&settings),
        Commands::Windows => cmd_windows(&settings),
        Commands::Cache { json } => cmd_cache(&settings, json),
        Commands::Completions { .. } | Commands::Manpage => Ok(()),
    };

    if let Err(e) = &result {
        tracing::error!(error = %format!("{e:#}"), "mailsorter failed");
    }
    report(result)
}

fn report(result: anyhow::Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_settings(path: Option<&Path>, args: &RunArgs) -> anyhow::Result<Settings> {
    let mut cfg = config::load_config(path)?;
    cfg.apply(&args.overrides());
    Ok(Settings::resolve(cfg, args.runstamp.clone())?)
}

/// Set up tracing with optional stderr output and a per-run log file.
fn setup_logging(level: &str, settings: &Settings) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = settings
        .log_to_console
        .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    let file_layer = std::fs::create_dir_all(&settings.log_dir).ok().map(|_| {
        let file_appender =
            tracing_appender::rolling::never(&settings.log_dir, settings.app_log_name());
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
}

/// Classify the configured date range.
fn cmd_run(settings: &Settings) -> anyhow::Result<()> {
    let mailbox_path = settings.mailbox()?.to_path_buf();
    let audit = CsvAuditLog::new(
        &settings.log_dir,
        &settings.runstamp,
        settings.csv_separator,
        settings.log_payload,
    )?;

    let prompts = Prompts::load(
        settings.system_prompt_file.as_deref(),
        settings.classify_prompt_file.as_deref(),
    )?;
    let mut cache = SenderCache::load(&settings.cache_file, &audit)?;

    let backend = match &settings.api_key {
        Some(key) => Some(Box::new(OpenAiChat::new(
            settings.endpoint.as_str(),
            key.as_str(),
            settings.model.as_str(),
            settings.timeout,
        )?) as Box<dyn ChatBackend>),
        None => {
            tracing::warn!("OPENAI_API_KEY is not set; uncached senders stay unclassified");
            None
        }
    };
    let classifier = Classifier::new(backend, prompts, settings.run.max_body_chars());

    tracing::info!(
        mailbox = %mailbox_path.display(),
        from = %settings.run.date_from(),
        to = %settings.run.date_to(),
        model = %settings.model,
        "Starting run"
    );

    let start = Instant::now();
    match run_pipeline(settings, &mailbox_path, &mut cache, &classifier, &audit) {
        Ok(summary) => {
            print_summary(&summary, start.elapsed(), &audit);
            Ok(())
        }
        Err(e) => {
            audit.event("main_exception", &format!("{e:#}"));
            Err(e)
        }
    }
}

fn run_pipeline(
    settings: &Settings,
    mailbox_path: &Path,
    cache: &mut SenderCache,
    classifier: &Classifier,
    audit: &CsvAuditLog,
) -> anyhow::Result<RunSummary> {
    let mut source = mailbox::open_source(mailbox_path)
        .with_context(|| format!("Could not open mailbox {}", mailbox_path.display()))?;
    let mut reconciler = BatchReconciler::new(cache, classifier, audit, settings.model.as_str());
    let summary = driver::run(
        &settings.run,
        source.as_mut(),
        &mut reconciler,
        audit,
        !settings.log_to_console,
    )?;
    Ok(summary)
}

fn print_summary(summary: &RunSummary, elapsed: std::time::Duration, audit: &CsvAuditLog) {
    println!("Windows:    {} ({} failed)", summary.windows, summary.failed_windows);
    println!("Batches:    {}", summary.batches);
    println!("Messages:   {}", summary.messages);
    println!("  cache:    {}", summary.from_cache);
    println!("  model:    {}", summary.from_model);
    println!("  unknown:  {}", summary.unknown);
    println!("Time:       {:.2}s", elapsed.as_secs_f64());
    println!("Log:        {}", audit.email_file().display());
}

/// Print the fetch windows of the configured range.
fn cmd_windows(settings: &Settings) -> anyhow::Result<()> {
    let mut count = 0;
    for (start, end) in settings.run.windows() {
        println!("{start}  {end}");
        count += 1;
    }
    println!(
        "{count} window(s) of up to {} day(s), batch size {}",
        settings.run.chunk_days(), settings.run.batch_size()
    );
    Ok(())
}

/// Load (and if needed upgrade) the sender cache, then print its statistics.
fn cmd_cache(settings: &Settings, json: bool) -> anyhow::Result<()> {
    let audit = CsvAuditLog::new(
        &settings.log_dir,
        &settings.runstamp,
        settings.csv_separator,
        false,
    )?;
    let cache = SenderCache::load(&settings.cache_file, &audit)?;
    let counts = cache.category_counts();

    if json {
        let categories: serde_json::Map<String, serde_json::Value> = counts
            .iter()
            .map(|(cat, n)| (cat.clone(), serde_json::Value::from(*n)))
            .collect();
        let out = serde_json::json!({
            "file": cache.path().display().to_string(),
            "entries": cache.len(),
            "categories": categories,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("File:       {}", cache.path().display());
        println!("Senders:    {}", cache.len());
        for (cat, n) in &counts {
            println!("  {cat:<20} {n:>6}");
        }
    }
    Ok(())
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mailsorter", &mut std::io::stdout());
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
