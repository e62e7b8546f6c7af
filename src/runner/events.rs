use super::state::StateStatus;
use crate::report::types::RunResult;
use tokio::sync::broadcast;

/// Run progress events for real-time updates
#[derive(Debug, Clone)]
pub enum RunEvent {
    // Run events
    RunStarted {
        run_id: String,
        scenario: String,
        state_count: usize,
    },
    RunFinished {
        scenario: String,
        result: RunResult,
        passed: usize,
        failed: usize,
        skipped: usize,
        duration_ms: u64,
    },

    // State events
    StateEntered {
        state: String,
        step_count: usize,
        entry_timeout_ms: u64,
    },
    StateFinished {
        state: String,
        status: StateStatus,
        duration_ms: u64,
        error: Option<String>,
    },
    StateSkipped {
        state: String,
    },

    // Step events
    StepStarted {
        state: String,
        index: usize,
        step: String,
    },
    StepPassed {
        state: String,
        index: usize,
        duration_ms: u64,
        warnings: Vec<String>,
    },
    StepFailed {
        state: String,
        index: usize,
        error: String,
        duration_ms: u64,
    },
    StepRetrying {
        state: String,
        index: usize,
        attempt: u32,
        max_attempts: u32,
    },

    // Log event for coordinated output
    Log {
        message: String,
    },
}

/// Event emitter for broadcasting run events
#[derive(Clone)]
pub struct EventEmitter {
    sender: broadcast::Sender<RunEvent>,
}

impl EventEmitter {
    pub fn new() -> (Self, broadcast::Receiver<RunEvent>) {
        let (sender, receiver) = broadcast::channel(256);
        (Self { sender }, receiver)
    }

    pub fn emit(&self, event: RunEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self { sender }
    }
}

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration as StdDuration;

/// Console event listener for printing real-time updates
pub struct ConsoleEventListener;

impl ConsoleEventListener {
    pub async fn listen(mut receiver: broadcast::Receiver<RunEvent>) {
        use colored::Colorize;
        use indicatif::ProgressDrawTarget;
        use std::io::IsTerminal;

        // Hidden draw target when piped, to avoid terminal escape codes
        let multi = if std::io::stdout().is_terminal() {
            MultiProgress::new()
        } else {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        };

        let mut spinner: Option<ProgressBar> = None;
        let mut step_text = String::new();

        loop {
            let event = match receiver.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    log::warn!("console listener skipped {} events", missed);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            match event {
                RunEvent::RunStarted {
                    run_id,
                    scenario,
                    state_count,
                } => {
                    println!(
                        "\n{} Scenario: {} ({} states) {}",
                        "▶".green().bold(),
                        scenario.white().bold(),
                        state_count,
                        run_id.dimmed()
                    );
                }

                RunEvent::RunFinished {
                    scenario,
                    result,
                    passed,
                    failed,
                    skipped,
                    duration_ms,
                } => {
                    if let Some(pb) = spinner.take() {
                        pb.finish();
                    }
                    let result_str = match result {
                        RunResult::Passed => "PASSED".green().bold(),
                        RunResult::FailedAt(ref state) => {
                            format!("FAILED at {}", state).red().bold()
                        }
                        RunResult::Aborted(ref state) => {
                            format!("ABORTED in {}", state).yellow().bold()
                        }
                    };
                    println!("\n{} {} [{}]", "■".blue().bold(), scenario, result_str);
                    println!(
                        "  {} passed, {} failed, {} skipped",
                        passed.to_string().green(),
                        failed.to_string().red(),
                        skipped.to_string().yellow()
                    );
                    println!("  Duration: {}ms", duration_ms);
                }

                RunEvent::StateEntered {
                    state,
                    step_count,
                    entry_timeout_ms,
                } => {
                    println!(
                        "\n  {} State: {} ({} steps, budget {}ms)",
                        "→".blue(),
                        state.white().bold(),
                        step_count,
                        entry_timeout_ms
                    );
                }

                RunEvent::StateFinished {
                    state,
                    status,
                    duration_ms,
                    error,
                } => {
                    if let Some(pb) = spinner.take() {
                        pb.finish();
                    }
                    let status_str = match status {
                        StateStatus::Passed => "PASSED".green().bold(),
                        StateStatus::Failed => "FAILED".red().bold(),
                        StateStatus::Aborted => "ABORTED".yellow().bold(),
                    };
                    println!(
                        "  {} State {} [{}] {}ms",
                        "←".blue(),
                        state,
                        status_str,
                        duration_ms
                    );
                    if let Some(error) = error {
                        println!("      {}", error.red());
                    }
                }

                RunEvent::StateSkipped { state } => {
                    println!("  {} State {} {}", "○".yellow(), state, "(skipped)".dimmed());
                }

                RunEvent::StepStarted { index, step, .. } => {
                    let pb = multi.add(ProgressBar::new_spinner());
                    let style = ProgressStyle::default_spinner()
                        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
                        .template("      {spinner} {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner());
                    pb.set_style(style);

                    let body = format!("[{}] {}... ", index, step.dimmed());
                    pb.set_message(body.clone());
                    pb.enable_steady_tick(StdDuration::from_millis(100));

                    spinner = Some(pb);
                    step_text = body;
                }

                RunEvent::StepPassed {
                    duration_ms,
                    warnings,
                    ..
                } => {
                    if let Some(pb) = spinner.take() {
                        pb.finish_and_clear();
                    }
                    println!("      {} {}({}ms)", "✓".green(), step_text, duration_ms);
                    for warning in warnings {
                        println!("        {} {}", "!".yellow(), warning.yellow());
                    }
                }

                RunEvent::StepFailed {
                    error, duration_ms, ..
                } => {
                    if let Some(pb) = spinner.take() {
                        pb.finish_and_clear();
                    }
                    println!("      {} {}({}ms)", "✗".red(), step_text, duration_ms);
                    println!("        {}", error.red());
                }

                RunEvent::StepRetrying {
                    attempt,
                    max_attempts,
                    ..
                } => {
                    if let Some(pb) = &spinner {
                        pb.set_message(format!(
                            "{} {}",
                            step_text,
                            format!("↻ retry {}/{}", attempt, max_attempts).yellow()
                        ));
                    }
                }

                RunEvent::Log { message } => {
                    multi.println(format!("      {}", message)).ok();
                }
            }
        }
    }
}
