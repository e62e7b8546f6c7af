pub mod cancel;
pub mod context;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod executor;
pub mod machine;
pub mod state;
pub mod wait;

use anyhow::Result;
use colored::Colorize;
use std::future::Future;
use std::path::{Path, PathBuf};

use crate::driver::traits::ProbeAdapter;
use crate::driver::web::{WebProbe, WebProbeConfig};
use crate::parser::types::ScenarioDefinition;
use crate::parser::yaml::{collect_scenario_files, parse_scenario_file};
use crate::report::types::{RunReport, TestResults};

pub use cancel::CancelToken;
pub use events::*;
pub use machine::{RunOptions, ScenarioRunner};
pub use state::*;

/// Settings for one CLI `run` invocation
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub run: RunOptions,
    pub web: WebProbeConfig,
    /// Write report.json, report.html and junit.xml into the output directory
    pub report: bool,
    /// Only run scenarios carrying at least one of these tags
    pub tags: Option<Vec<String>>,
}

fn matches_tags(scenario: &ScenarioDefinition, tags: Option<&[String]>) -> bool {
    match tags {
        None => true,
        Some([]) => true,
        Some(wanted) => scenario.tags.iter().any(|t| wanted.contains(t)),
    }
}

/// Parse the scenarios under `path` and keep those matching `tags`
pub fn load_scenarios(
    path: &Path,
    tags: Option<&[String]>,
) -> Result<Vec<(PathBuf, ScenarioDefinition)>> {
    let files = collect_scenario_files(path);
    let mut scenarios = Vec::new();
    for file in files {
        let scenario = parse_scenario_file(&file)?;
        if matches_tags(&scenario, tags) {
            scenarios.push((file, scenario));
        } else {
            log::info!("Skipping {} (tags do not match)", file.display());
        }
    }
    Ok(scenarios)
}

/// Run every scenario under `path` against a fresh browser page each.
///
/// Returns true when every run passed.
pub async fn run_scenarios(
    path: &Path,
    settings: &RunSettings,
    cancel: CancelToken,
) -> Result<bool> {
    let web = settings.web.clone();
    run_scenarios_with(path, settings, cancel, || WebProbe::new(web.clone())).await
}

/// Same as [`run_scenarios`] with the probe for each scenario opened by `open_probe`.
///
/// A probe that cannot be opened stops the loop; reports of the runs that
/// already finished are still summarized and written, and the result is false.
pub async fn run_scenarios_with<P, F, Fut>(
    path: &Path,
    settings: &RunSettings,
    cancel: CancelToken,
    mut open_probe: F,
) -> Result<bool>
where
    P: ProbeAdapter,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<P>>,
{
    let scenarios = load_scenarios(path, settings.tags.as_deref())?;
    if scenarios.is_empty() {
        println!("{} No scenario files found.", "ℹ".blue());
        return Ok(true);
    }

    let (emitter, receiver) = EventEmitter::new();
    let listener = tokio::spawn(ConsoleEventListener::listen(receiver));

    let mut runs: Vec<RunReport> = Vec::new();
    let mut not_run: Vec<String> = Vec::new();
    for (file, scenario) in &scenarios {
        if cancel.is_cancelled() || !not_run.is_empty() {
            not_run.push(scenario.name.clone());
            continue;
        }
        log::debug!("Running {}", file.display());

        let probe = match open_probe().await {
            Ok(probe) => probe,
            Err(e) => {
                log::error!("could not open a page for '{}': {:#}", scenario.name, e);
                println!(
                    "{} {}: could not open a page: {:#}",
                    "✗".red(),
                    scenario.name.bold(),
                    e
                );
                not_run.push(scenario.name.clone());
                continue;
            }
        };
        let report = ScenarioRunner::new(&probe, settings.run.clone())
            .with_emitter(emitter.clone())
            .with_cancel(cancel.clone())
            .run(scenario)
            .await?;
        runs.push(report);
    }

    drop(emitter);
    let _ = listener.await;

    let results = TestResults::new(&uuid::Uuid::new_v4().to_string(), runs);
    print_summary(&results);
    if !not_run.is_empty() {
        println!("    {} not run: {}", "⚠".yellow(), not_run.join(", "));
    }

    if settings.report {
        crate::report::write_all(&results, &settings.run.output_dir)?;
    }

    Ok(results.all_passed() && not_run.is_empty())
}

fn print_summary(results: &TestResults) {
    println!();
    for run in &results.runs {
        let verdict = if run.passed() {
            run.result.to_string().green()
        } else {
            run.result.to_string().red()
        };
        println!(
            "{} {}: {} ({}/{} states passed, {:.1}s)",
            "▶".cyan(),
            run.scenario.bold(),
            verdict,
            run.summary.passed,
            run.summary.total_states,
            run.duration_ms as f64 / 1000.0
        );
        if let Some(failure) = &run.failure {
            if let Some(error) = &failure.error {
                println!("    {} {}", "✗".red(), error);
            }
            if let Some(artifact) = &failure.artifact {
                println!("    {} {}", "📸".yellow(), artifact);
            }
        }
    }
}
