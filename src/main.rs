use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use depscan::{
    aggregator::Aggregator,
    audit::{audit, OsvChecker, VulnerabilityChecker},
    cache::Cache,
    config::Config,
    detector::TechnologyDetector,
    github::{GitHubClient, GitHubProvider, RepositoryFilter},
    logging::init_tracing,
    orchestrator::{OrgScanOptions, OrgScanner},
    output::{print_json, print_org_report, print_result, print_technologies, to_json, OutputFormat},
    scanner::{all_scanners, get_scanner, Scanner},
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Exit codes for CI integration
mod exit_codes {
    pub const SUCCESS: u8 = 0;
    pub const ERROR: u8 = 1;
    pub const PARTIAL_FAILURE: u8 = 2;
}

const FAILURE_LOG: &str = "failed-scans.log";

#[derive(Parser)]
#[command(name = "depscan")]
#[command(
    author,
    version,
    about = "Discover third-party dependencies in repositories and whole GitHub organizations"
)]
struct Cli {
    /// Use this config file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a local directory
    Scan {
        /// Repository root to scan
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Only run these scanners (see list-scanners)
        #[arg(short, long)]
        scanner: Vec<String>,

        /// Include development-only dependencies
        #[arg(long)]
        include_dev: bool,

        /// Look up known vulnerabilities (OSV)
        #[arg(long)]
        audit: bool,

        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,

        /// Write JSON output to file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show which technologies a directory uses
    Detect {
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Scan every selected repository of a GitHub organization
    ScanOrg(ScanOrgArgs),

    /// List available scanners
    ListScanners,

    /// Show or create config file
    Config {
        /// Generate default config file
        #[arg(long)]
        init: bool,

        /// Show config file path
        #[arg(long)]
        path: bool,
    },

    /// Clear the cache
    ClearCache,
}

#[derive(Args)]
struct ScanOrgArgs {
    /// Organization login
    organization: String,

    /// API token (defaults to config, then GITHUB_TOKEN)
    #[arg(long)]
    token: Option<String>,

    /// Repositories scanned concurrently
    #[arg(short, long)]
    workers: Option<usize>,

    /// Repositories per batch
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Per-repository timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    #[arg(long)]
    include_private: bool,

    #[arg(long)]
    include_forks: bool,

    #[arg(long)]
    include_archived: bool,

    /// Only repositories with this primary language (repeatable)
    #[arg(long = "language")]
    languages: Vec<String>,

    /// Only repositories with any of these topics (repeatable)
    #[arg(long = "topic")]
    topics: Vec<String>,

    /// Only these repositories
    #[arg(long = "repo", conflicts_with = "repos_file")]
    repos: Vec<String>,

    /// File listing repositories to scan, one per line
    #[arg(long)]
    repos_file: Option<PathBuf>,

    /// Repository name globs to include
    #[arg(long = "include")]
    include_patterns: Vec<String>,

    /// Repository name globs to exclude
    #[arg(long = "exclude")]
    exclude_patterns: Vec<String>,

    #[arg(long)]
    min_size_kb: Option<u64>,

    #[arg(long)]
    max_size_kb: Option<u64>,

    #[arg(long)]
    include_dev: bool,

    #[arg(long)]
    audit: bool,

    /// Clone over SSH instead of HTTPS
    #[arg(long)]
    use_ssh: bool,

    /// Skip the cross-repository component list
    #[arg(long)]
    no_combined: bool,

    /// Directory for the report and the failed-scans log
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table")]
    format: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_codes::ERROR)
        }
    }
}

async fn run() -> Result<u8> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    }
    .apply_env();
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    init_tracing(&config.logging)?;

    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    match cli.command {
        Commands::Scan {
            path,
            scanner,
            include_dev,
            audit,
            format,
            output,
        } => {
            run_scan(
                &config,
                &path,
                &scanner,
                include_dev || config.scan.include_dev_dependencies,
                audit || config.audit.enabled,
                &format,
                output,
            )
            .await
        }
        Commands::Detect { path, format } => {
            let format = parse_format(&format)?;
            let technologies = TechnologyDetector::new().detect_stack(&path);
            match format {
                OutputFormat::Json => print_json(&technologies)?,
                OutputFormat::Table => {
                    print_technologies(&path.display().to_string(), &technologies)?
                }
            }
            Ok(exit_codes::SUCCESS)
        }
        Commands::ScanOrg(args) => run_scan_org(config, args).await,
        Commands::ListScanners => {
            list_scanners();
            Ok(exit_codes::SUCCESS)
        }
        Commands::Config { init, path } => {
            handle_config(init, path)?;
            Ok(exit_codes::SUCCESS)
        }
        Commands::ClearCache => {
            Cache::new().clear()?;
            println!("Cache cleared.");
            Ok(exit_codes::SUCCESS)
        }
    }
}

fn parse_format(format: &str) -> Result<OutputFormat> {
    OutputFormat::from_str(format).map_err(|e| anyhow!(e))
}

fn build_checker(config: &Config) -> Arc<dyn VulnerabilityChecker> {
    let cache = if config.cache.enabled {
        Cache::with_ttl_hours(config.cache.ttl_hours)
    } else {
        Cache::disabled()
    };
    Arc::new(OsvChecker::new(Arc::new(cache)).with_audit_config(config.audit.clone()))
}

fn spinner(message: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message(message.to_string());
    Ok(pb)
}

async fn run_scan(
    config: &Config,
    path: &Path,
    scanner_ids: &[String],
    include_dev: bool,
    with_audit: bool,
    format: &str,
    output_file: Option<PathBuf>,
) -> Result<u8> {
    let format = parse_format(format)?;
    let is_interactive = format == OutputFormat::Table;

    let aggregator = if scanner_ids.is_empty() {
        Aggregator::new()
    } else {
        let scanners = scanner_ids
            .iter()
            .map(|id| {
                get_scanner(id).ok_or_else(|| {
                    anyhow!("Unknown scanner: {}. Run 'depscan list-scanners'", id)
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Aggregator::with_scanners(scanners)
    };

    let progress = if is_interactive {
        Some(spinner(&format!("Scanning {}...", path.display()))?)
    } else {
        None
    };

    let mut result = aggregator.scan(path, include_dev).await?;

    if with_audit && !result.components.is_empty() {
        if let Some(pb) = &progress {
            pb.set_message("Checking for vulnerabilities...");
        }
        let checker = build_checker(config);
        result = audit(result, checker.as_ref()).await;
    }

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    match output_file {
        Some(path) => {
            std::fs::write(&path, to_json(&result)?)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            if is_interactive {
                println!("Results written to: {}", path.display());
            }
        }
        None => print_result(&result, format)?,
    }

    Ok(exit_codes::SUCCESS)
}

async fn run_scan_org(mut config: Config, args: ScanOrgArgs) -> Result<u8> {
    let format = parse_format(&args.format)?;
    let is_interactive = format == OutputFormat::Table;

    if let Some(token) = args.token {
        config.github.token = Some(token);
    }
    config.github.include_private |= args.include_private;
    config.github.include_forks |= args.include_forks;
    config.github.include_archived |= args.include_archived;
    config.github.use_ssh |= args.use_ssh;
    if args.include_private && config.github.token.is_none() {
        bail!("--include-private requires a token (--token, config, or GITHUB_TOKEN)");
    }

    let mut options = OrgScanOptions::from_config(&config);
    if let Some(workers) = args.workers {
        options.workers = workers;
    }
    if let Some(batch_size) = args.batch_size {
        options.batch_size = batch_size;
    }
    if let Some(timeout) = args.timeout {
        options.timeout = Duration::from_secs(timeout);
    }
    options.include_dev |= args.include_dev;
    options.audit |= args.audit;
    if args.no_combined {
        options.combined = false;
    }

    let mut filter = RepositoryFilter {
        languages: args.languages,
        topics: args.topics,
        include_patterns: args.include_patterns,
        exclude_patterns: args.exclude_patterns,
        min_size_kb: args.min_size_kb,
        max_size_kb: args.max_size_kb,
        ..RepositoryFilter::from_config(&config.github)
    };
    if let Some(file) = &args.repos_file {
        filter = filter.with_names_from_file(file)?;
    } else if !args.repos.is_empty() {
        filter = filter.with_names(args.repos);
    }

    let client = GitHubClient::new(&config.github)?;
    let provider = GitHubProvider::new(client, &config.github).with_clone_timeout(options.timeout);

    let mut scanner = OrgScanner::new(Arc::new(provider));
    if options.audit {
        scanner = scanner.with_checker(build_checker(&config));
    }
    if is_interactive {
        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                .progress_chars("#>-"),
        );
        pb.enable_steady_tick(Duration::from_millis(100));
        scanner = scanner.with_progress(pb);
    }

    let report = scanner
        .scan(&args.organization, &filter, &options)
        .await?;

    if let Some(dir) = &args.output_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let report_path = dir.join(format!("{}-report.json", args.organization));
        std::fs::write(&report_path, to_json(&report)?)
            .with_context(|| format!("Failed to write {}", report_path.display()))?;

        if report.has_failures() {
            let log_path = dir.join(FAILURE_LOG);
            std::fs::write(&log_path, report.summary.failure_log())
                .with_context(|| format!("Failed to write {}", log_path.display()))?;
            tracing::warn!(path = %log_path.display(), "failed scans logged");
        }

        if is_interactive {
            println!("Report written to: {}", report_path.display());
        }
    }

    print_org_report(&report, format)?;

    if report.has_failures() {
        Ok(exit_codes::PARTIAL_FAILURE)
    } else {
        Ok(exit_codes::SUCCESS)
    }
}

fn list_scanners() {
    println!("Available scanners:");
    println!();

    let scanners: Vec<Arc<dyn Scanner>> = all_scanners();
    for scanner in scanners {
        println!("  {:<10} {:<28} [{}]", scanner.id(), scanner.name(), scanner.technology());
        println!("  {:<10} Files: {}", "", scanner.marker_files().join(", "));
        println!();
    }
}

fn handle_config(init: bool, show_path: bool) -> Result<()> {
    let config_path = Config::config_path();

    if show_path {
        println!("{}", config_path.display());
        return Ok(());
    }

    if init {
        if config_path.exists() {
            println!("Config file already exists at: {}", config_path.display());
            return Ok(());
        }

        Config::default().save()?;
        println!("Created config file at: {}", config_path.display());
        println!();
        println!("Default configuration:");
        println!("{}", Config::generate_default_config());
        return Ok(());
    }

    if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)?;
        println!("Config file: {}", config_path.display());
        println!();
        println!("{}", content);
    } else {
        println!("No config file found.");
        println!("Run 'depscan config --init' to create one.");
        println!();
        println!("Config path: {}", config_path.display());
    }

    Ok(())
}
