use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};

use lumi_scenario::driver::web::{BrowserType, WebProbeConfig};
use lumi_scenario::parser::types::FailurePolicy;
use lumi_scenario::parser::yaml::{collect_scenario_files, parse_scenario_file};
use lumi_scenario::runner::{self, CancelToken, RunOptions, RunSettings};
use lumi_scenario::utils::config::EngineConfig;
use lumi_scenario::report;

#[derive(Parser)]
#[command(name = "lumi-scenario")]
#[command(version = "0.1.0")]
#[command(about = "Scenario verification for interactive web apps", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run scenario file(s) or directory
    Run {
        /// Path to scenario file or directory
        path: PathBuf,

        /// Target URL (overrides the scenario's `url`)
        #[arg(long)]
        url: Option<String>,

        /// Output directory for reports and artifacts
        #[arg(short, long, default_value = "./output")]
        output: PathBuf,

        /// Capture a screenshot of every failed state
        #[arg(long, short = 's', default_value = "false")]
        snapshot: bool,

        /// Generate reports (JSON, HTML, JUnit)
        #[arg(long, default_value = "false")]
        report: bool,

        /// Browser (chromium, firefox, webkit)
        #[arg(short, long)]
        browser: Option<String>,

        /// Run the browser headless
        #[arg(long)]
        headless: bool,

        /// Force software WebGL (swiftshader)
        #[arg(long)]
        software_gl: bool,

        /// Poll interval for waits in milliseconds
        #[arg(long)]
        poll_interval: Option<u64>,

        /// Filter scenarios by tags (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        tags: Option<Vec<String>>,
    },

    /// Parse and validate scenario file(s) without running them
    Validate {
        /// Path to scenario file or directory
        path: PathBuf,
    },

    /// Generate report from a saved report.json
    Report {
        /// Path to report.json
        results: PathBuf,

        /// Output format (json, html, junit)
        #[arg(short, long, default_value = "html")]
        format: String,

        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            path,
            url,
            output,
            snapshot,
            report,
            browser,
            headless,
            software_gl,
            poll_interval,
            tags,
        } => {
            let mut config = EngineConfig::from_env();
            if let Some(ms) = poll_interval.filter(|ms| *ms > 0) {
                config.poll_interval_ms = ms;
            }

            let mut web = WebProbeConfig::from_env();
            if let Some(ref b) = browser {
                web.browser_type = b.parse::<BrowserType>()?;
            }
            if headless {
                web.headless = true;
            }
            if software_gl {
                web.software_gl = true;
            }

            println!(
                "{} Running scenarios from: {}",
                "▶".green().bold(),
                path.display()
            );
            println!("  Browser: {}", web.browser_type.as_str().cyan());
            if let Some(ref u) = url {
                println!("  Target: {}", u.cyan());
            }
            if let Some(ref t) = tags {
                println!("  Tags: {}", t.join(", ").cyan());
            }

            let settings = RunSettings {
                run: RunOptions {
                    output_dir: output,
                    target_url: url,
                    snapshot_on_failure: snapshot,
                    config,
                },
                web,
                report,
                tags,
            };

            let cancel = CancelToken::new();
            let handler_token = cancel.clone();
            ctrlc::set_handler(move || {
                println!("\n{} Interrupted, stopping run...", "⏹".yellow());
                handler_token.cancel();
            })?;

            let passed = runner::run_scenarios(&path, &settings, cancel).await?;
            std::process::exit(if passed { 0 } else { 1 });
        }

        Commands::Validate { path } => {
            let ok = validate(&path);
            std::process::exit(if ok { 0 } else { 1 });
        }

        Commands::Report {
            results,
            format,
            output,
        } => {
            report::generate_report(&results, &format, output.as_deref()).await?;
        }
    }

    Ok(())
}

/// Print a state/step table for every scenario; false if any failed to parse
fn validate(path: &Path) -> bool {
    let files = collect_scenario_files(path);
    if files.is_empty() {
        println!("{} No scenario files found.", "ℹ".blue());
        return true;
    }

    let mut ok = true;
    for file in files {
        match parse_scenario_file(&file) {
            Ok(scenario) => {
                println!(
                    "{} {} ({} states, {} steps)",
                    "✓".green(),
                    scenario.name.bold(),
                    scenario.states.len(),
                    scenario.step_count()
                );
                for state in &scenario.states {
                    let policy = match state.on_failure {
                        FailurePolicy::Abort => "abort",
                        FailurePolicy::SkipToNext => "skipToNext",
                        FailurePolicy::CaptureAndAbort => "captureAndAbort",
                    };
                    println!(
                        "  {} {} [entry {}ms, onFailure {}]",
                        "■".cyan(),
                        state.name,
                        state.entry_timeout_ms,
                        policy
                    );
                    for (i, step) in state.steps.iter().enumerate() {
                        let attempts = step.retry.as_ref().map(|r| r.max_attempts).unwrap_or(1);
                        let retry = if attempts > 1 {
                            format!(" (x{})", attempts)
                        } else {
                            String::new()
                        };
                        println!("      {:>2}. {}{}", i, step.display_name(), retry.dimmed());
                    }
                }
            }
            Err(e) => {
                ok = false;
                println!("{} {}: {:#}", "✗".red(), file.display(), e);
            }
        }
    }
    ok
}
