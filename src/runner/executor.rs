use super::context::RunContext;
use super::error::{ProbeError, ProbeResult};
use super::events::{EventEmitter, RunEvent};
use super::state::{StepOutcome, StepStatus};
use super::wait::{wait_until, WaitOptions};
use crate::driver::traits::ProbeAdapter;
use crate::parser::types::{LocatorInput, StepAction, StepSpec};
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;

/// Wall-clock budget of the state a step runs in
#[derive(Debug, Clone)]
pub struct StateBudget {
    pub state: String,
    pub deadline: Instant,
    pub budget_ms: u64,
}

impl StateBudget {
    pub fn starting_now(state: &str, budget_ms: u64) -> Self {
        Self {
            state: state.to_string(),
            deadline: Instant::now() + Duration::from_millis(budget_ms),
            budget_ms,
        }
    }

    fn exceeded(&self) -> ProbeError {
        ProbeError::DeadlineExceeded {
            state: self.state.clone(),
            budget_ms: self.budget_ms,
        }
    }
}

/// Side effects of a successful attempt the executor applies to the context
#[derive(Debug, Default)]
struct AttemptEffect {
    artifact: Option<PathBuf>,
    warning: Option<String>,
}

/// Executes declared steps against a probe
pub struct StepExecutor<'a> {
    probe: &'a dyn ProbeAdapter,
    emitter: &'a EventEmitter,
}

impl<'a> StepExecutor<'a> {
    pub fn new(probe: &'a dyn ProbeAdapter, emitter: &'a EventEmitter) -> Self {
        Self { probe, emitter }
    }

    /// Run one step with its retry policy.
    ///
    /// Only transient errors are retried. Every failed attempt is recorded in
    /// diagnostics.
    pub async fn execute(
        &self,
        ctx: &mut RunContext,
        budget: &StateBudget,
        index: usize,
        step: &StepSpec,
    ) -> StepOutcome {
        let policy = step.retry_policy();
        let max_attempts = policy.max_attempts.max(1);
        let description = step.display_name();
        let started = Instant::now();

        self.emitter.emit(RunEvent::StepStarted {
            state: budget.state.clone(),
            index,
            step: description.clone(),
        });

        let mut attempts = 0;
        let mut warnings = Vec::new();

        let result = loop {
            attempts += 1;
            match self.attempt(ctx, budget, step).await {
                Ok(effect) => {
                    if let Some(path) = effect.artifact {
                        ctx.artifacts.push(path);
                    }
                    if let Some(warning) = effect.warning {
                        ctx.diagnostics.record_error(
                            &budget.state,
                            format!("step {} ({}): {}", index, description, warning),
                        );
                        warnings.push(warning);
                    }
                    break Ok(());
                }
                Err(error) => {
                    ctx.diagnostics.record_error(
                        &budget.state,
                        format!(
                            "step {} ({}) attempt {}/{}: {}",
                            index, description, attempts, max_attempts, error
                        ),
                    );

                    if !error.is_transient() || attempts >= max_attempts {
                        break Err(error);
                    }

                    self.emitter.emit(RunEvent::StepRetrying {
                        state: budget.state.clone(),
                        index,
                        attempt: attempts + 1,
                        max_attempts,
                    });

                    if policy.backoff_ms > 0 {
                        let wake = (Instant::now() + Duration::from_millis(policy.backoff_ms))
                            .min(budget.deadline);
                        tokio::select! {
                            biased;
                            _ = ctx.cancel.cancelled() => break Err(ProbeError::Cancelled),
                            _ = tokio::time::sleep_until(wake) => {}
                        }
                    }
                }
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let outcome = StepOutcome {
            state: budget.state.clone(),
            index,
            description,
            status: if result.is_ok() {
                StepStatus::Passed
            } else {
                StepStatus::Failed
            },
            attempts,
            error: result.as_ref().err().map(|e| e.to_record()),
            warnings: warnings.clone(),
            duration_ms,
        };

        match result {
            Ok(()) => self.emitter.emit(RunEvent::StepPassed {
                state: budget.state.clone(),
                index,
                duration_ms,
                warnings,
            }),
            Err(error) => self.emitter.emit(RunEvent::StepFailed {
                state: budget.state.clone(),
                index,
                error: error.to_string(),
                duration_ms,
            }),
        }

        outcome
    }

    /// One attempt, bounded by the state deadline and by cancellation
    async fn attempt(
        &self,
        ctx: &RunContext,
        budget: &StateBudget,
        step: &StepSpec,
    ) -> ProbeResult<AttemptEffect> {
        if ctx.cancel.is_cancelled() {
            return Err(ProbeError::Cancelled);
        }
        if Instant::now() >= budget.deadline {
            return Err(budget.exceeded());
        }

        let result = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => Err(ProbeError::Cancelled),
            result = tokio::time::timeout_at(budget.deadline, self.perform(ctx, &step.action)) => {
                result.unwrap_or_else(|_| Err(budget.exceeded()))
            }
        };

        // An interrupted press may have left the key down
        if let (StepAction::KeyPress(params), Err(_)) = (&step.action, &result) {
            let key = ctx.substitute_vars(&params.clone().into_inner().key);
            self.release_key(ctx, budget, &key).await;
        }
        result
    }

    /// Release `key`; runs after cancellation too, bounded by the action timeout
    async fn release_key(&self, ctx: &RunContext, budget: &StateBudget, key: &str) {
        let limit = ctx.config.action_timeout_ms;
        let released = bounded(limit, self.probe.key_up(key), || {
            ProbeError::interaction(format!("release of {} did not complete within {}ms", key, limit))
        })
        .await;
        if let Err(e) = released {
            ctx.diagnostics
                .record_error(&budget.state, format!("key {} may still be held: {}", key, e));
        }
    }

    async fn perform(&self, ctx: &RunContext, action: &StepAction) -> ProbeResult<AttemptEffect> {
        let action_ms = ctx.config.action_timeout_ms;

        match action {
            StepAction::Navigate(url) => {
                let url = ctx.resolve_url(url);
                let limit = ctx.config.navigation_timeout_ms;
                bounded(limit, self.probe.navigate(&url), || {
                    ProbeError::Navigation(format!("{} did not load within {}ms", url, limit))
                })
                .await?;
            }

            StepAction::WaitFor(params) => {
                let wait = params
                    .clone()
                    .into_inner()
                    .map_err(|e| ProbeError::Evaluation(format!("invalid waitFor: {}", e)))?;
                let predicate = wait.predicate.map_text(|s| ctx.substitute_vars(s));
                let options = WaitOptions::new(
                    wait.timeout_ms.unwrap_or(ctx.config.wait_timeout_ms),
                    wait.poll_interval_ms.unwrap_or(ctx.poll_interval_ms),
                );
                wait_until(self.probe, &predicate, options, &ctx.cancel).await?;
            }

            StepAction::Click(locator) => {
                let handle = self.resolve(ctx, locator).await?;
                bounded(action_ms, self.probe.click(&handle), || {
                    ProbeError::interaction(format!(
                        "click on {} did not complete within {}ms",
                        handle.description, action_ms
                    ))
                })
                .await?;
            }

            StepAction::Hover(locator) => {
                let handle = self.resolve(ctx, locator).await?;
                bounded(action_ms, self.probe.hover(&handle), || {
                    ProbeError::interaction(format!(
                        "hover on {} did not complete within {}ms",
                        handle.description, action_ms
                    ))
                })
                .await?;
            }

            StepAction::KeyPress(params) => {
                let params = params.clone().into_inner();
                let key = ctx.substitute_vars(&params.key);
                let limit = action_ms + params.hold_ms;
                bounded(limit, self.probe.key_event(&key, params.hold_ms), || {
                    ProbeError::interaction(format!("key {} did not complete within {}ms", key, limit))
                })
                .await?;
            }

            StepAction::Evaluate(script) => {
                let script = ctx.substitute_vars(script);
                let value = bounded(action_ms, self.probe.evaluate(&script), || {
                    ProbeError::Evaluation(format!("script did not finish within {}ms", action_ms))
                })
                .await?;
                log::debug!("evaluate -> {}", value);
            }

            StepAction::Sleep(ms) => {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
            }

            StepAction::Screenshot(path) => {
                let path = ctx.output_path(&ctx.substitute_vars(path));
                let captured = bounded(action_ms, self.probe.screenshot(&path), || {
                    ProbeError::Capture(format!("{} timed out", path.display()))
                })
                .await;
                // A failed capture never fails the step
                return Ok(match captured {
                    Ok(()) => AttemptEffect {
                        artifact: Some(path),
                        warning: None,
                    },
                    Err(e) => AttemptEffect {
                        artifact: None,
                        warning: Some(e.to_string()),
                    },
                });
            }
        }

        Ok(AttemptEffect::default())
    }

    /// Resolve a locator at execution time
    async fn resolve(
        &self,
        ctx: &RunContext,
        locator: &LocatorInput,
    ) -> ProbeResult<crate::driver::traits::ElementHandle> {
        let locator = locator
            .to_locator()
            .map_err(ProbeError::interaction)?
            .map_text(|s| ctx.substitute_vars(s));

        self.probe
            .resolve(&locator)
            .await
            .ok_or_else(|| ProbeError::interaction(format!("no element matches {}", locator)))
    }
}

async fn bounded<T>(
    limit_ms: u64,
    fut: impl Future<Output = ProbeResult<T>>,
    on_timeout: impl FnOnce() -> ProbeError,
) -> ProbeResult<T> {
    match tokio::time::timeout(Duration::from_millis(limit_ms), fut).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::{demo_journey, MockElement, MockProbe, MockScreen};
    use crate::parser::types::{
        KeyPressParams, KeyPressParamsInput, Locator, Predicate, WaitForParams, WaitForParamsInput,
    };
    use crate::runner::cancel::CancelToken;
    use crate::runner::diagnostics::{DiagnosticKind, DiagnosticsCollector};
    use crate::runner::error::ErrorKind;
    use crate::utils::config::EngineConfig;
    use std::path::Path;

    fn context(probe: &MockProbe) -> RunContext {
        let mut ctx = RunContext::new(
            "test",
            Path::new("/tmp/lumi-out"),
            EngineConfig::default(),
            DiagnosticsCollector::start(probe),
            CancelToken::new(),
        );
        ctx.target_url = Some("http://localhost:5173".into());
        ctx
    }

    fn wait_step(predicate: Predicate, timeout_ms: u64) -> StepSpec {
        StepSpec::new(StepAction::WaitFor(WaitForParamsInput::Struct(
            WaitForParams::from_predicate(predicate, Some(timeout_ms)),
        )))
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_reruns_the_wait_loop() {
        // 500ms timeout at 250ms cadence = 3 checks per attempt;
        // the element shows up on the 9th check: 3rd poll of the 3rd attempt
        let probe = MockProbe::new("page").with_screen(
            MockScreen::new("page").element(MockElement::new("Georgia").appears_after(8)),
        );
        probe.navigate("/").await.unwrap();
        let emitter = EventEmitter::default();
        let mut ctx = context(&probe);
        let budget = StateBudget::starting_now("Map", 60_000);

        let step = wait_step(Predicate::ElementVisible(Locator::text("Georgia")), 500)
            .with_retry(3, 0);
        let outcome = StepExecutor::new(&probe, &emitter)
            .execute(&mut ctx, &budget, 0, &step)
            .await;

        assert_eq!(outcome.status, StepStatus::Passed);
        assert_eq!(outcome.attempts, 3);
        let resolves = probe.calls().iter().filter(|c| c.starts_with("resolve")).count();
        assert_eq!(resolves, 9);

        // both failed attempts are in diagnostics
        let diagnostics = ctx.diagnostics.snapshot();
        let errors: Vec<_> = diagnostics
            .iter()
            .filter(|e| e.kind == DiagnosticKind::EngineError)
            .collect();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| e.state == "Map"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_transient_errors_are_not_retried() {
        let probe = MockProbe::new("page")
            .with_screen(MockScreen::new("page"))
            .fail_navigation("connection refused");
        let emitter = EventEmitter::default();
        let mut ctx = context(&probe);
        let budget = StateBudget::starting_now("Landing", 60_000);

        let step = StepSpec::new(StepAction::Navigate("/".into())).with_retry(5, 100);
        let outcome = StepExecutor::new(&probe, &emitter)
            .execute(&mut ctx, &budget, 0, &step)
            .await;

        assert_eq!(outcome.status, StepStatus::Failed);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.error.unwrap().kind, ErrorKind::Navigation);
        assert_eq!(probe.calls(), vec!["navigate http://localhost:5173/"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detached_click_is_retried_after_backoff() {
        let probe = MockProbe::new("a")
            .with_screen(
                MockScreen::new("a")
                    .element(MockElement::new("Begin").leads_to("b").detach_clicks(1)),
            )
            .with_screen(MockScreen::new("b"));
        probe.navigate("/").await.unwrap();
        let emitter = EventEmitter::default();
        let mut ctx = context(&probe);
        let budget = StateBudget::starting_now("Landing", 60_000);

        let started = Instant::now();
        let step = StepSpec::new(StepAction::Click(LocatorInput::String("Begin".into())))
            .with_retry(2, 300);
        let outcome = StepExecutor::new(&probe, &emitter)
            .execute(&mut ctx, &budget, 1, &step)
            .await;

        assert!(outcome.passed());
        assert_eq!(outcome.attempts, 2);
        assert_eq!(started.elapsed(), Duration::from_millis(300));
        assert_eq!(probe.current_screen().as_deref(), Some("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_element_is_not_transient() {
        let probe = demo_journey(true);
        probe.navigate("/").await.unwrap();
        let emitter = EventEmitter::default();
        let mut ctx = context(&probe);
        let budget = StateBudget::starting_now("Landing", 60_000);

        let step = StepSpec::new(StepAction::Click(LocatorInput::String("Start".into())))
            .with_retry(3, 0);
        let outcome = StepExecutor::new(&probe, &emitter)
            .execute(&mut ctx, &budget, 0, &step)
            .await;

        assert_eq!(outcome.attempts, 1);
        let error = outcome.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Interaction);
        assert!(error.message.contains("no element matches"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_failure_is_a_warning() {
        let probe = demo_journey(true).fail_screenshots();
        let emitter = EventEmitter::default();
        let mut ctx = context(&probe);
        let budget = StateBudget::starting_now("Scene", 60_000);

        let step = StepSpec::new(StepAction::Screenshot("scene.png".into()));
        let outcome = StepExecutor::new(&probe, &emitter)
            .execute(&mut ctx, &budget, 0, &step)
            .await;

        assert!(outcome.passed());
        assert_eq!(outcome.warnings.len(), 1);
        assert!(ctx.artifacts.is_empty());
        assert_eq!(ctx.diagnostics.snapshot().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_deadline_bounds_the_step() {
        let probe = demo_journey(true);
        let emitter = EventEmitter::default();
        let mut ctx = context(&probe);
        let budget = StateBudget::starting_now("Scene", 1_000);

        let step = StepSpec::new(StepAction::Sleep(5_000));
        let outcome = StepExecutor::new(&probe, &emitter)
            .execute(&mut ctx, &budget, 0, &step)
            .await;

        assert_eq!(outcome.error.unwrap().kind, ErrorKind::DeadlineExceeded);
        assert_eq!(outcome.duration_ms, 1_000);
    }

    fn hold_step(key: &str, hold_ms: u64) -> StepSpec {
        StepSpec::new(StepAction::KeyPress(KeyPressParamsInput::Struct(KeyPressParams {
            key: key.into(),
            hold_ms,
        })))
    }

    #[tokio::test(start_paused = true)]
    async fn test_held_key_is_released_when_the_state_deadline_cuts_it_short() {
        let probe = demo_journey(true);
        let emitter = EventEmitter::default();
        let mut ctx = context(&probe);
        let budget = StateBudget::starting_now("Scene", 1_000);

        let outcome = StepExecutor::new(&probe, &emitter)
            .execute(&mut ctx, &budget, 0, &hold_step("w", 3_000))
            .await;

        assert_eq!(outcome.error.unwrap().kind, ErrorKind::DeadlineExceeded);
        assert!(probe.held_keys().is_empty());
        assert_eq!(probe.calls(), vec!["key w 3000ms", "keyup w"]);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(probe.held_keys().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_held_key_is_released_on_cancel() {
        let probe = demo_journey(true);
        let emitter = EventEmitter::default();
        let mut ctx = context(&probe);
        let budget = StateBudget::starting_now("Scene", 60_000);

        let token = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            token.cancel();
        });

        let outcome = StepExecutor::new(&probe, &emitter)
            .execute(&mut ctx, &budget, 0, &hold_step("w", 3_000))
            .await;

        assert_eq!(outcome.error.unwrap().kind, ErrorKind::Cancelled);
        assert!(probe.held_keys().is_empty());
        assert_eq!(probe.calls().last().map(String::as_str), Some("keyup w"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_key_press_needs_no_release() {
        let probe = demo_journey(true);
        let emitter = EventEmitter::default();
        let mut ctx = context(&probe);
        let budget = StateBudget::starting_now("Scene", 60_000);

        let outcome = StepExecutor::new(&probe, &emitter)
            .execute(&mut ctx, &budget, 0, &hold_step("w", 1_000))
            .await;

        assert!(outcome.passed());
        assert_eq!(probe.calls(), vec!["key w 1000ms"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_variables_substitute_at_execution_time() {
        let probe = demo_journey(true);
        probe.navigate("/").await.unwrap();
        let emitter = EventEmitter::default();
        let mut ctx = context(&probe);
        ctx.vars.insert("cta".into(), "Begin".into());
        let budget = StateBudget::starting_now("Landing", 60_000);

        let step = StepSpec::new(StepAction::Hover(LocatorInput::String("${cta}".into())));
        let outcome = StepExecutor::new(&probe, &emitter)
            .execute(&mut ctx, &budget, 0, &step)
            .await;

        assert!(outcome.passed());
        assert!(probe.calls().contains(&"resolve text~\"Begin\"".to_string()));
    }
}
