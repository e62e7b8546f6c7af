//! Scenario state machine: runs states strictly in order and applies failure policies

use super::cancel::CancelToken;
use super::context::RunContext;
use super::diagnostics::DiagnosticsCollector;
use super::error::{ErrorKind, ProbeError};
use super::events::{EventEmitter, RunEvent};
use super::executor::{StateBudget, StepExecutor};
use super::state::{StateOutcome, StateStatus};
use crate::driver::traits::ProbeAdapter;
use crate::parser::types::{FailurePolicy, ScenarioDefinition, StateSpec};
use crate::parser::yaml::validate_scenario;
use crate::report::types::{FailurePoint, RunReport, RunResult};
use crate::utils::config::EngineConfig;
use anyhow::Result;
use chrono::Utc;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Options a run is started with
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Root directory; artifacts land in `{output_dir}/{scenario}/`
    pub output_dir: PathBuf,
    /// Overrides the scenario's `url`
    pub target_url: Option<String>,
    /// Capture `{state}-failed.png` for every failed state
    pub snapshot_on_failure: bool,
    pub config: EngineConfig,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            target_url: None,
            snapshot_on_failure: false,
            config: EngineConfig::default(),
        }
    }
}

/// What the machine does after a state finishes
enum Transition {
    Next,
    Stop,
}

/// Drives one scenario against one probe (one page)
pub struct ScenarioRunner<'a> {
    probe: &'a dyn ProbeAdapter,
    emitter: EventEmitter,
    options: RunOptions,
    cancel: CancelToken,
}

impl<'a> ScenarioRunner<'a> {
    pub fn new(probe: &'a dyn ProbeAdapter, options: RunOptions) -> Self {
        Self {
            probe,
            emitter: EventEmitter::default(),
            options,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_emitter(mut self, emitter: EventEmitter) -> Self {
        self.emitter = emitter;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run the scenario to completion, abort or cancellation.
    ///
    /// Fails only when the scenario is structurally invalid, before any probe
    /// call. Every other outcome, cancellation included, produces a report.
    pub async fn run(&self, scenario: &ScenarioDefinition) -> Result<RunReport> {
        validate_scenario(scenario)?;

        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();

        // Subscribe before the first state so nothing is missed
        let diagnostics = DiagnosticsCollector::start(self.probe);
        let mut ctx = RunContext::new(
            &scenario.name,
            &self.options.output_dir,
            self.options.config.clone(),
            diagnostics,
            self.cancel.clone(),
        );
        ctx.target_url = self
            .options
            .target_url
            .clone()
            .or_else(|| scenario.url.clone());
        ctx.vars = scenario.vars.clone();
        if let Some(poll) = scenario.poll_interval_ms {
            ctx.poll_interval_ms = poll;
        }

        log::info!(
            "run {} of '{}' against {}",
            run_id,
            scenario.name,
            ctx.target_url.as_deref().unwrap_or("<no url>")
        );
        self.emitter.emit(RunEvent::RunStarted {
            run_id: run_id.clone(),
            scenario: scenario.name.clone(),
            state_count: scenario.states.len(),
        });

        let mut outcomes: Vec<StateOutcome> = Vec::new();
        let mut skipped_states = Vec::new();
        let mut result = RunResult::Passed;
        let mut stopped = false;

        for state in &scenario.states {
            if stopped {
                self.emitter.emit(RunEvent::StateSkipped {
                    state: state.name.clone(),
                });
                skipped_states.push(state.name.clone());
                continue;
            }

            let (outcome, transition) = self.run_state(&mut ctx, state).await;

            match outcome.status {
                StateStatus::Passed => {}
                StateStatus::Failed => {
                    if result.is_passed() {
                        result = RunResult::FailedAt(outcome.name.clone());
                    }
                }
                StateStatus::Aborted => {
                    result = RunResult::Aborted(outcome.name.clone());
                }
            }
            outcomes.push(outcome);

            if let Transition::Stop = transition {
                stopped = true;
            }
        }

        let duration_ms = ctx.elapsed_ms();
        let RunContext {
            diagnostics,
            artifacts,
            target_url,
            ..
        } = ctx;
        let diagnostics = diagnostics.finish().await;

        let artifacts: Vec<String> = artifacts
            .iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect();
        let failure = failure_point(&result, &outcomes, artifacts.last());
        let summary = RunReport::summarize(&outcomes, skipped_states.len(), &diagnostics);

        log::info!("run {} finished: {}", run_id, result);
        self.emitter.emit(RunEvent::RunFinished {
            scenario: scenario.name.clone(),
            result: result.clone(),
            passed: summary.passed,
            failed: summary.failed + summary.aborted,
            skipped: summary.skipped,
            duration_ms,
        });

        Ok(RunReport {
            run_id,
            scenario: scenario.name.clone(),
            target_url,
            result,
            states: outcomes,
            skipped_states,
            artifacts,
            diagnostics,
            failure,
            started_at,
            duration_ms,
            summary,
        })
    }

    async fn run_state(
        &self,
        ctx: &mut RunContext,
        state: &StateSpec,
    ) -> (StateOutcome, Transition) {
        ctx.diagnostics.enter_state(&state.name);
        log::info!("entering state '{}'", state.name);
        self.emitter.emit(RunEvent::StateEntered {
            state: state.name.clone(),
            step_count: state.steps.len(),
            entry_timeout_ms: state.entry_timeout_ms,
        });

        let entered_at_ms = ctx.elapsed_ms();
        let started = Instant::now();
        let artifacts_before = ctx.artifacts.len();
        let budget = StateBudget::starting_now(&state.name, state.entry_timeout_ms);
        let executor = StepExecutor::new(self.probe, &self.emitter);

        let mut steps = Vec::with_capacity(state.steps.len());
        for (index, step) in state.steps.iter().enumerate() {
            let outcome = executor.execute(ctx, &budget, index, step).await;
            let failed = !outcome.passed();
            steps.push(outcome);
            if failed {
                break;
            }
        }

        let failed_step = steps.iter().find(|s| !s.passed()).map(|s| s.index);
        let error = steps.iter().find_map(|s| s.error.clone());

        let status = match error {
            None => StateStatus::Passed,
            Some(ref e) if e.kind == ErrorKind::Cancelled => StateStatus::Aborted,
            Some(_) => StateStatus::Failed,
        };

        let transition = match status {
            StateStatus::Passed => {
                if state.capture_on_pass {
                    self.capture(ctx, &state.name, status).await;
                }
                Transition::Next
            }
            StateStatus::Aborted => Transition::Stop,
            StateStatus::Failed => {
                if state.on_failure == FailurePolicy::CaptureAndAbort
                    || self.options.snapshot_on_failure
                {
                    self.capture(ctx, &state.name, status).await;
                }
                match state.on_failure {
                    FailurePolicy::SkipToNext => Transition::Next,
                    FailurePolicy::Abort | FailurePolicy::CaptureAndAbort => Transition::Stop,
                }
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let artifacts = ctx.artifacts[artifacts_before..]
            .iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect();

        self.emitter.emit(RunEvent::StateFinished {
            state: state.name.clone(),
            status,
            duration_ms,
            error: error.as_ref().map(|e| e.to_string()),
        });
        log::info!("state '{}' {}", state.name, status.as_str());

        let outcome = StateOutcome {
            name: state.name.clone(),
            status,
            steps,
            failed_step,
            error,
            artifacts,
            entered_at_ms,
            duration_ms,
        };
        (outcome, transition)
    }

    /// Out-of-band state capture; a failure is recorded, never fatal
    async fn capture(&self, ctx: &mut RunContext, state: &str, status: StateStatus) {
        let path = ctx.artifact_path(state, status);
        let limit = ctx.config.action_timeout_ms;
        let result = match tokio::time::timeout(
            Duration::from_millis(limit),
            self.probe.screenshot(&path),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Capture(format!("{} timed out", path.display()))),
        };

        match result {
            Ok(()) => {
                log::debug!("captured {}", path.display());
                ctx.artifacts.push(path);
            }
            Err(e) => ctx
                .diagnostics
                .record_error(state, format!("state capture failed: {}", e)),
        }
    }
}

fn failure_point(
    result: &RunResult,
    states: &[StateOutcome],
    last_artifact: Option<&String>,
) -> Option<FailurePoint> {
    let state_name = match result {
        RunResult::Passed => return None,
        RunResult::FailedAt(state) | RunResult::Aborted(state) => state,
    };
    let state = states.iter().find(|s| &s.name == state_name)?;
    let step = state.failed_step();
    Some(FailurePoint {
        state: state.name.clone(),
        step_index: step.map(|s| s.index),
        step: step.map(|s| s.description.clone()),
        error: state.error.clone(),
        artifact: last_artifact.cloned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::demo_journey;
    use crate::parser::types::{
        Locator, LocatorInput, Predicate, StepAction, StepSpec, WaitForParams,
        WaitForParamsInput,
    };
    use crate::parser::yaml::parse_scenario_content;
    use crate::runner::diagnostics::DiagnosticKind;

    fn wait(predicate: Predicate, timeout_ms: Option<u64>) -> StepSpec {
        StepSpec::new(StepAction::WaitFor(WaitForParamsInput::Struct(
            WaitForParams::from_predicate(predicate, timeout_ms),
        )))
    }

    fn click(text: &str) -> StepSpec {
        StepSpec::new(StepAction::Click(LocatorInput::String(text.into())))
    }

    fn state(name: &str, steps: Vec<StepSpec>) -> StateSpec {
        StateSpec {
            name: name.into(),
            entry_timeout_ms: 60_000,
            steps,
            on_failure: FailurePolicy::Abort,
            capture_on_pass: false,
        }
    }

    /// Landing -> Map -> Scene
    fn journey() -> ScenarioDefinition {
        ScenarioDefinition {
            name: "georgia".into(),
            url: Some("http://localhost:5173".into()),
            poll_interval_ms: None,
            vars: Default::default(),
            tags: vec![],
            states: vec![
                state(
                    "Landing",
                    vec![
                        StepSpec::new(StepAction::Navigate("/".into())),
                        wait(Predicate::TextPresent("Begin".into()), None),
                        click("Begin"),
                    ],
                ),
                state(
                    "Map",
                    vec![
                        wait(Predicate::TextPresent("Georgia".into()), Some(10_000)),
                        click("Georgia"),
                    ],
                ),
                state(
                    "Scene",
                    vec![wait(
                        Predicate::CountAtLeast {
                            locator: Locator::css("canvas"),
                            n: 1,
                        },
                        Some(30_000),
                    )],
                ),
            ],
        }
    }

    fn options() -> RunOptions {
        RunOptions {
            output_dir: PathBuf::from("/tmp/lumi-machine"),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_responsive_journey_passes() {
        let probe = demo_journey(true);
        let report = ScenarioRunner::new(&probe, options())
            .run(&journey())
            .await
            .unwrap();

        assert_eq!(report.result, RunResult::Passed);
        assert_eq!(report.states.len(), 3);
        assert!(report.states.iter().all(|s| s.passed()));
        assert_eq!(report.summary.error_events, 0);
        assert!(report.failure.is_none());
        assert!(report.skipped_states.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_canvas_fails_at_scene() {
        let probe = demo_journey(false);
        let started = Instant::now();
        let report = ScenarioRunner::new(&probe, options())
            .run(&journey())
            .await
            .unwrap();

        assert_eq!(report.result, RunResult::FailedAt("Scene".into()));
        assert_eq!(report.states.len(), 3);
        assert!(started.elapsed() >= Duration::from_secs(30));

        let scene = report.state("Scene").unwrap();
        assert_eq!(scene.status, StateStatus::Failed);
        assert_eq!(scene.error.as_ref().unwrap().kind, ErrorKind::WaitTimeout);

        let failure = report.failure.unwrap();
        assert_eq!(failure.state, "Scene");
        assert_eq!(failure.step_index, Some(0));
        assert!(report
            .diagnostics
            .iter()
            .any(|e| e.kind == DiagnosticKind::EngineError && e.state == "Scene"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_skips_remaining_states_and_stops_probing() {
        let probe = demo_journey(true);
        let mut scenario = journey();
        // Map never shows Maryland
        scenario.states[1].steps[0] = wait(Predicate::TextPresent("Maryland".into()), Some(1_000));

        let report = ScenarioRunner::new(&probe, options())
            .run(&scenario)
            .await
            .unwrap();

        assert_eq!(report.result, RunResult::FailedAt("Map".into()));
        assert_eq!(report.states.len(), 2);
        assert_eq!(report.skipped_states, vec!["Scene".to_string()]);
        assert_eq!(report.state("Map").unwrap().steps.len(), 1);

        // the last call is the final check of the timed-out wait
        let calls = probe.calls();
        assert_eq!(calls.last().map(String::as_str), Some("pageText"));
        assert!(!calls.iter().any(|c| c.starts_with("click Georgia")));
        assert!(!calls.iter().any(|c| c.starts_with("count")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_and_abort_captures_failing_state() {
        let probe = demo_journey(true);
        let mut scenario = journey();
        scenario.states[1].steps[1] = click("Maryland");
        scenario.states[1].on_failure = FailurePolicy::CaptureAndAbort;

        let report = ScenarioRunner::new(&probe, options())
            .run(&scenario)
            .await
            .unwrap();

        assert_eq!(report.result, RunResult::FailedAt("Map".into()));
        let expected = "/tmp/lumi-machine/georgia/Map-failed.png";
        assert_eq!(report.artifacts, vec![expected.to_string()]);
        assert_eq!(report.failure.unwrap().artifact.as_deref(), Some(expected));
        assert_eq!(
            probe.calls().last().map(String::as_str),
            Some(format!("screenshot {}", expected).as_str())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_to_next_continues() {
        let probe = demo_journey(true);
        let mut scenario = journey();
        scenario.states[1].steps.insert(
            0,
            StepSpec::new(StepAction::Hover(LocatorInput::String("Alaska".into()))),
        );
        scenario.states[1].on_failure = FailurePolicy::SkipToNext;

        let report = ScenarioRunner::new(&probe, options())
            .run(&scenario)
            .await
            .unwrap();

        // Map failed before clicking Georgia, so the scene is never reached
        assert_eq!(report.result, RunResult::FailedAt("Map".into()));
        assert_eq!(report.states.len(), 3);
        assert_eq!(report.state("Map").unwrap().status, StateStatus::Failed);
        assert_eq!(report.state("Scene").unwrap().status, StateStatus::Failed);
        assert_eq!(report.summary.failed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_to_next_reaches_a_passing_state() {
        let probe = demo_journey(true);
        let mut scenario = journey();
        // Georgia is clicked, then Map waits for text the scene never shows
        scenario.states[1]
            .steps
            .push(wait(Predicate::TextPresent("Maryland".into()), Some(1_000)));
        scenario.states[1].on_failure = FailurePolicy::SkipToNext;

        let report = ScenarioRunner::new(&probe, options())
            .run(&scenario)
            .await
            .unwrap();

        assert_eq!(report.result, RunResult::FailedAt("Map".into()));
        assert_eq!(report.states.len(), 3);
        assert_eq!(report.state("Map").unwrap().status, StateStatus::Failed);
        assert_eq!(report.state("Scene").unwrap().status, StateStatus::Passed);
        assert!(report.skipped_states.is_empty());
        assert_eq!(report.summary.passed, 2);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.failure.unwrap().state, "Map");
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_budget_bounds_the_state() {
        let probe = demo_journey(true);
        let mut scenario = journey();
        scenario.states[0].entry_timeout_ms = 2_000;
        scenario.states[0]
            .steps
            .insert(1, StepSpec::new(StepAction::Sleep(5_000)));

        let report = ScenarioRunner::new(&probe, options())
            .run(&scenario)
            .await
            .unwrap();

        assert_eq!(report.result, RunResult::FailedAt("Landing".into()));
        let landing = report.state("Landing").unwrap();
        assert_eq!(landing.error.as_ref().unwrap().kind, ErrorKind::DeadlineExceeded);
        assert_eq!(landing.duration_ms, 2_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_sleep_aborts_within_one_poll() {
        let probe = demo_journey(true);
        let mut scenario = journey();
        scenario.states[1]
            .steps
            .insert(0, StepSpec::new(StepAction::Sleep(20_000)));

        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let report = ScenarioRunner::new(&probe, options())
            .with_cancel(cancel)
            .run(&scenario)
            .await
            .unwrap();

        assert!(started.elapsed() <= Duration::from_millis(3_250));
        assert_eq!(report.result, RunResult::Aborted("Map".into()));
        assert_eq!(report.state("Map").unwrap().status, StateStatus::Aborted);
        assert_eq!(report.skipped_states, vec!["Scene".to_string()]);
        assert_eq!(report.failure.unwrap().step_index, Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_diagnostics_are_tagged_and_complete() {
        let probe = demo_journey(true);
        probe.emit(
            crate::driver::traits::ProbeEventKind::ConsoleLog,
            "before subscription",
        );
        let report = ScenarioRunner::new(&probe, options())
            .run(&journey())
            .await
            .unwrap();

        let messages: Vec<(&str, &str)> = report
            .diagnostics
            .iter()
            .map(|e| (e.message.as_str(), e.state.as_str()))
            .collect();
        assert_eq!(
            messages,
            vec![
                ("landing ready", "Landing"),
                ("map loaded: 50 regions", "Landing"),
                ("scene: loading terrain", "Map"),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_on_pass_and_yaml_scenario() {
        let yaml = r#"
name: capture
url: http://localhost:5173
states:
  - name: Landing
    captureOnPass: true
    steps:
      - goto: /
      - wait: { visible: { role: button, name: Begin } }
      - screenshot: landing.png
"#;
        let scenario = parse_scenario_content(yaml).unwrap();
        let probe = demo_journey(true);
        let mut options = options();
        options.target_url = Some("http://127.0.0.1:4173".into());

        let report = ScenarioRunner::new(&probe, options)
            .run(&scenario)
            .await
            .unwrap();

        assert!(report.passed());
        assert_eq!(report.target_url.as_deref(), Some("http://127.0.0.1:4173"));
        assert_eq!(probe.calls()[0], "navigate http://127.0.0.1:4173/");
        assert_eq!(
            report.artifacts,
            vec![
                "/tmp/lumi-machine/capture/landing.png".to_string(),
                "/tmp/lumi-machine/capture/Landing-passed.png".to_string(),
            ]
        );
        assert_eq!(report.states[0].artifacts.len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_scenario_makes_no_probe_calls() {
        let probe = demo_journey(true);
        let mut scenario = journey();
        scenario.states.clear();
        assert!(ScenarioRunner::new(&probe, options())
            .run(&scenario)
            .await
            .is_err());
        assert!(probe.calls().is_empty());
    }
}
