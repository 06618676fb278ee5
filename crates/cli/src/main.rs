//! forkmerge command-line tool.
//!
//! Merges the configured upstream branch into the fork, auto-resolves the
//! conflicts that sit inside custom-code markers, and keeps a history of
//! runs next to the repository.

mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use tracing::{debug, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use forkmerge_core::config::{ForkConfig, DEFAULT_CONFIG_TOML};
use forkmerge_core::conflict::rewriter::read_text;
use forkmerge_core::conflict::{ConflictParser, CustomRegionDetector};
use forkmerge_core::db::Database;
use forkmerge_core::git::GitCli;
use forkmerge_core::merge_engine::{
    FileOutcome, MergeOptions, MergeOrchestrator, MergeReport, MergeStatus, RunMode,
};
use forkmerge_core::run_log::{LogLevel, RunLog};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Merge upstream into a fork and auto-resolve conflicts in custom code.
#[derive(Parser, Debug)]
#[command(name = "forkmerge", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true, default_value = "forkmerge.toml")]
    config: String,

    /// Log filter, overriding `logging.level` (e.g. `debug`, `forkmerge_core=trace`).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch and merge upstream, then resolve what can be resolved.
    Merge(RunArgs),

    /// Triage the files left unmerged by a previous merge.
    Resolve(RunArgs),

    /// Show the conflict regions of files and whether they are custom code.
    Scan {
        /// Files to inspect.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Show recent runs.
    History {
        /// Maximum number of runs to show.
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },

    /// Write a starter configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./forkmerge.toml")]
        output: PathBuf,
    },

    /// Validate the configuration file.
    Validate,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Report verdicts but leave conflicted files unresolved and unstaged.
    #[arg(long)]
    dry_run: bool,

    /// Upstream revision to diff from, overriding the recorded baseline.
    #[arg(long)]
    baseline: Option<String>,

    /// Print the report as JSON.
    #[arg(long)]
    json: bool,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{}", style::error(&format!("{:#}", e)));
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the command succeeded; hard errors come back as `Err`.
async fn run(cli: Cli) -> Result<bool> {
    let config_path = expand_tilde(&cli.config);

    match cli.command {
        Commands::Init { output } => {
            let _guard = init_tracing(cli.log_level.as_deref(), None)?;
            cmd_init(&output)
        }
        Commands::Validate => {
            let _guard = init_tracing(cli.log_level.as_deref(), None)?;
            cmd_validate(&config_path)
        }
        command => {
            let config = load_config(&config_path)?;
            let level = cli
                .log_level
                .as_deref()
                .unwrap_or(&config.logging.level)
                .to_string();
            let _guard = init_tracing(Some(&level), config.logging.file.as_deref())?;
            debug!(config = %config_path.display(), "configuration loaded");

            match command {
                Commands::Merge(args) => cmd_run(&config, RunMode::Merge, args).await,
                Commands::Resolve(args) => cmd_run(&config, RunMode::Resolve, args).await,
                Commands::Scan { files } => cmd_scan(&config, &files),
                Commands::History { limit } => cmd_history(&config, limit),
                Commands::Init { .. } | Commands::Validate => Ok(true),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Setup helpers
// ---------------------------------------------------------------------------

/// Install the global subscriber. Interactive output goes to stderr at
/// `warn` unless told otherwise; a log file, when configured, receives the
/// same events without colors.
fn init_tracing(level: Option<&str>, file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = level
        .and_then(|l| EnvFilter::try_new(l).ok())
        .unwrap_or_else(|| EnvFilter::new("warn"));

    match file {
        Some(path) => {
            let path = expand_tilde(&path.to_string_lossy());
            let dir = match path.parent() {
                Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
                _ => PathBuf::from("."),
            };
            let name = path
                .file_name()
                .context("logging.file has no file name")?
                .to_os_string();
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;

            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .without_time()
                .init();
            Ok(None)
        }
    }
}

fn load_config(path: &Path) -> Result<ForkConfig> {
    let mut config = ForkConfig::load_and_validate(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;
    config.repository_path = expand_tilde(&config.repository_path.to_string_lossy());
    Ok(config)
}

fn open_database(config: &ForkConfig) -> Result<Option<Database>> {
    if !config.state.record_history {
        return Ok(None);
    }
    let db_path = config.data_dir().join("forkmerge.db");
    let db = Database::open(&db_path).context("failed to open history database")?;
    Ok(Some(db))
}

/// Baseline precedence: flag, then the recorded watermark, then config.
///
/// Returns a warning when the watermark shadows a different configured
/// baseline.
fn select_baseline(
    flag: Option<String>,
    recorded: Option<String>,
    configured: &str,
) -> (String, Option<String>) {
    if let Some(rev) = flag {
        return (rev, None);
    }
    match recorded {
        Some(rev) if !configured.is_empty() && rev != configured => {
            let warning = format!(
                "using recorded baseline {} instead of configured last_merged_upstream_commit {}",
                style::short_rev(&rev),
                style::short_rev(configured)
            );
            (rev, Some(warning))
        }
        Some(rev) => (rev, None),
        None => (configured.to_string(), None),
    }
}

/// Expand a leading `~/` to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

// ---------------------------------------------------------------------------
// merge / resolve
// ---------------------------------------------------------------------------

async fn cmd_run(config: &ForkConfig, mode: RunMode, args: RunArgs) -> Result<bool> {
    let db = open_database(config)?;

    let recorded = match &db {
        Some(db) => db.get_baseline().context("failed to read recorded baseline")?,
        None => None,
    };
    let (baseline, warning) =
        select_baseline(args.baseline, recorded, &config.last_merged_upstream_commit);
    if let Some(warning) = warning {
        warn!("{}", warning);
        eprintln!("{}", style::warn(&warning));
    }

    let options = MergeOptions::from_config(config)
        .with_baseline(baseline)
        .with_dry_run(args.dry_run);
    let upstream_ref = options.upstream_ref();
    let baseline = options.baseline.clone();
    let orchestrator = MergeOrchestrator::new(GitCli::new(&config.repository_path), options);

    let mut log = RunLog::new();
    let result = match mode {
        RunMode::Merge => orchestrator.run(&mut log).await,
        RunMode::Resolve => orchestrator.resolve_conflicts(&mut log).await,
    };

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            if let Some(db) = &db {
                db.insert_failed_run(mode, &upstream_ref, &baseline, args.dry_run, &e.to_string())
                    .context("failed to record run")?;
            }
            if args.json {
                let out = serde_json::json!({ "error": e.to_string(), "log": log.entries() });
                println!("{}", serde_json::to_string_pretty(&out)?);
            }
            return Err(e).with_context(|| format!("{} of {} failed", mode, upstream_ref));
        }
    };

    if let Some(db) = &db {
        db.insert_run(&report).context("failed to record run")?;
        // Only a committed merge moves the watermark.
        let advance = mode == RunMode::Merge
            && !report.dry_run
            && report.success()
            && report.upstream_merged;
        if let (true, Some(head)) = (advance, &report.upstream_head) {
            db.set_baseline(head)
                .context("failed to record merged upstream revision")?;
        }
    }

    if args.json {
        let out = serde_json::json!({ "report": &report, "log": log.entries() });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        print_report(&report, &log);
    }

    Ok(report.success())
}

fn print_report(report: &MergeReport, log: &RunLog) {
    println!();
    let title = if report.dry_run {
        format!("{} of {} (dry run)", report.mode, report.upstream_ref)
    } else {
        format!("{} of {}", report.mode, report.upstream_ref)
    };
    println!("{}", style::header(&title));
    println!(
        "  {} {}",
        style::dim("baseline :"),
        if report.baseline.is_empty() {
            "(none)".to_string()
        } else {
            style::short_rev(&report.baseline).to_string()
        }
    );
    if let Some(head) = &report.upstream_head {
        println!("  {} {}", style::dim("upstream :"), style::short_rev(head));
    }
    println!("  {} {}", style::dim("merge    :"), report.merge_status);
    println!();

    if report.merge_status == MergeStatus::Clean {
        println!("{}", style::success("Merged without conflicts."));
        println!();
        return;
    }

    if !report.files.is_empty() {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec!["File", "Regions", "Outcome", "Detail"]);
        for file in &report.files {
            let color = match file.outcome {
                FileOutcome::Resolved | FileOutcome::AlreadyResolved => Color::Green,
                FileOutcome::WouldResolve => Color::Cyan,
                FileOutcome::Manual { .. } => Color::Yellow,
                FileOutcome::Failed { .. } => Color::Red,
            };
            table.add_row(vec![
                Cell::new(&file.path),
                Cell::new(file.regions.len()),
                Cell::new(file.outcome.label().replace('_', " ")).fg(color),
                Cell::new(file.outcome.detail().unwrap_or("")),
            ]);
        }
        println!("{}", table);
        println!();
    }

    for entry in log.at_least(LogLevel::Warn).filter(|e| e.file.is_none()) {
        println!("{}", style::warn(&entry.message));
    }

    let summary = format!(
        "{} resolved, {} need manual resolution",
        report.resolved.len(),
        report.manual.len()
    );
    if report.success() {
        println!("{}", style::success(&summary));
        if report.mode == RunMode::Merge && !report.dry_run && !report.upstream_merged {
            println!(
                "{}",
                style::dim("Commit the merge; the baseline is recorded on the next run.")
            );
        }
    } else {
        println!("{}", style::error(&summary));
        for path in &report.manual {
            println!("    {}", path);
        }
    }
    println!();
}

// ---------------------------------------------------------------------------
// scan
// ---------------------------------------------------------------------------

fn cmd_scan(config: &ForkConfig, files: &[PathBuf]) -> Result<bool> {
    let markers = config.custom_code_marker.markers();

    for path in files {
        let text = read_text(path).with_context(|| format!("failed to read {}", path.display()))?;
        let regions = ConflictParser::parse(&text);

        println!();
        println!("{}", style::header(&path.display().to_string()));
        if regions.is_empty() {
            println!("  {}", style::dim("no conflict regions"));
            continue;
        }

        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec!["Lines", "Ours", "Theirs", "diff3", "Custom code"]);
        for region in &regions {
            let marked = CustomRegionDetector::is_marked_as_custom(&text, region, &markers);
            table.add_row(vec![
                Cell::new(format!("{}-{}", region.start_line + 1, region.end_line + 1)),
                Cell::new(region.ours_range().len()),
                Cell::new(region.theirs_range().len()),
                Cell::new(if region.base_line.is_some() { "yes" } else { "" }),
                Cell::new(style::flag(marked)),
            ]);
        }
        println!("{}", table);
    }
    println!();

    Ok(true)
}

// ---------------------------------------------------------------------------
// history
// ---------------------------------------------------------------------------

fn cmd_history(config: &ForkConfig, limit: u32) -> Result<bool> {
    let db = match open_database(config)? {
        Some(db) => db,
        None => {
            println!("{}", style::warn("Run history is disabled (state.record_history = false)."));
            return Ok(true);
        }
    };

    let runs = db.list_runs(limit).context("failed to list runs")?;
    if runs.is_empty() {
        println!("No runs recorded yet.");
        return Ok(true);
    }

    println!();
    println!("{}", style::header("Merge History"));
    println!();

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        "Started", "Mode", "Upstream", "Merge", "Resolved", "Manual", "OK",
    ]);

    for run in &runs {
        let mode = if run.dry_run {
            format!("{} (dry)", run.mode)
        } else {
            run.mode.clone()
        };
        let upstream = match &run.upstream_head {
            Some(head) => format!("{} {}", run.upstream_ref, style::short_rev(head)),
            None => run.upstream_ref.clone(),
        };
        let merge = match &run.error_message {
            Some(err) => Cell::new(format!("failed: {}", err)).fg(Color::Red),
            None => Cell::new(&run.merge_status),
        };
        table.add_row(vec![
            Cell::new(&run.started_at),
            Cell::new(mode),
            Cell::new(upstream),
            merge,
            Cell::new(run.resolved_count),
            Cell::new(run.manual_count),
            Cell::new(style::flag(run.success)),
        ]);
    }

    println!("{}", table);

    if let Some(latest) = runs.first() {
        let files = db
            .list_run_files(&latest.id)
            .context("failed to list files of the latest run")?;
        if !files.is_empty() {
            println!();
            println!("{}", style::header("Latest run"));
            for file in &files {
                println!(
                    "  {:<18} {} {}",
                    style::outcome(&file.outcome),
                    file.path,
                    style::dim(file.detail.as_deref().unwrap_or(""))
                );
            }
        }
    }
    println!();

    if let Some(baseline) = db.get_baseline().context("failed to read baseline")? {
        println!("Recorded baseline: {}", baseline);
        println!();
    }

    Ok(true)
}

// ---------------------------------------------------------------------------
// init / validate
// ---------------------------------------------------------------------------

fn cmd_init(output: &Path) -> Result<bool> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, DEFAULT_CONFIG_TOML).context("failed to write config file")?;

    println!(
        "{}",
        style::success(&format!("Configuration written to {}", output.display()))
    );
    println!();
    println!("Next steps:");
    println!("  1. Set the upstream remote and branch, and the custom code markers");
    println!("  2. Add the remote if needed: git remote add upstream <url>");
    println!(
        "  3. Validate with: forkmerge validate --config {}",
        output.display()
    );

    Ok(true)
}

fn cmd_validate(config_path: &Path) -> Result<bool> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let config =
        ForkConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  {}", style::success("TOML structure is valid"));

    if let Err(e) = config.validate() {
        println!("  {}", style::error(&format!("Validation error: {}", e)));
        return Ok(false);
    }
    println!("  {}", style::success("All required fields are valid"));

    let markers = &config.custom_code_marker;
    println!();
    println!("Configuration summary:");
    println!("  Repository     : {}", config.repository_path.display());
    println!("  Upstream       : {}", config.upstream_ref());
    println!(
        "  Baseline       : {}",
        if config.last_merged_upstream_commit.is_empty() {
            "(none, every conflict will need manual resolution)"
        } else {
            config.last_merged_upstream_commit.as_str()
        }
    );
    println!("  Custom start   : {}", markers.start);
    println!("  Custom end     : {}", markers.end);
    println!("  Search window  : {} lines", markers.search_window);
    println!("  Strip markers  : {}", style::flag(markers.strip_markers));
    println!("  Unbalanced     : {}", markers.unbalanced);
    println!("  History        : {}", config.data_dir().display());

    if config.last_merged_upstream_commit.is_empty() {
        println!();
        println!(
            "{}",
            style::warn("No baseline configured; the first successful merge will record one.")
        );
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_tilde() {
        assert_eq!(expand_tilde("/etc/forkmerge.toml"), PathBuf::from("/etc/forkmerge.toml"));
        assert_eq!(expand_tilde("forkmerge.toml"), PathBuf::from("forkmerge.toml"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/fm.toml"), home.join("fm.toml"));
        }
    }

    #[test]
    fn test_cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "forkmerge",
            "-c",
            "fm.toml",
            "merge",
            "--dry-run",
            "--baseline",
            "abc123",
        ])
        .unwrap();
        assert_eq!(cli.config, "fm.toml");
        match cli.command {
            Commands::Merge(args) => {
                assert!(args.dry_run);
                assert!(!args.json);
                assert_eq!(args.baseline.as_deref(), Some("abc123"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_select_baseline_precedence() {
        let (rev, warning) =
            select_baseline(Some("flag".into()), Some("recorded".into()), "configured");
        assert_eq!(rev, "flag");
        assert!(warning.is_none());

        let (rev, warning) = select_baseline(None, None, "configured");
        assert_eq!(rev, "configured");
        assert!(warning.is_none());

        let (rev, warning) = select_baseline(None, Some("recorded".into()), "");
        assert_eq!(rev, "recorded");
        assert!(warning.is_none());
    }

    #[test]
    fn test_select_baseline_warns_when_watermark_shadows_config() {
        let (rev, warning) = select_baseline(None, Some("aaaa".into()), "bbbb");
        assert_eq!(rev, "aaaa");
        let warning = warning.unwrap();
        assert!(warning.contains("aaaa") && warning.contains("bbbb"), "{}", warning);

        let (_, warning) = select_baseline(None, Some("same".into()), "same");
        assert!(warning.is_none());
    }

    #[test]
    fn test_scan_requires_files() {
        assert!(Cli::try_parse_from(["forkmerge", "scan"]).is_err());
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forkmerge.toml");
        assert!(cmd_init(&path).unwrap());
        assert!(ForkConfig::load_and_validate(&path).is_ok());
        assert!(cmd_init(&path).is_err());
    }
}
