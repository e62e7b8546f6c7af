use super::types::{RunReport, RunResult, TestResults};
use crate::runner::diagnostics::DiagnosticKind;
use crate::runner::state::{StateOutcome, StateStatus, StepStatus};
use anyhow::{Context, Result};
use std::path::Path;

/// Generate HTML report
pub async fn generate(results: &TestResults, output: Option<&Path>) -> Result<()> {
    let html = generate_html(results);

    if let Some(path) = output {
        std::fs::write(path, html)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("HTML report saved to: {}", path.display());
    } else {
        println!("{}", html);
    }

    Ok(())
}

/// Write `report.html` into the output directory
pub fn write_report(results: &TestResults, output_dir: &Path) -> Result<()> {
    let path = output_dir.join("report.html");
    std::fs::write(&path, generate_html(results))
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("    Generated HTML report: {}", path.display());
    Ok(())
}

pub fn generate_html(results: &TestResults) -> String {
    let total = results.runs.len();
    let passed = results.runs.iter().filter(|r| r.passed()).count();
    let pass_rate = if total > 0 {
        (passed as f64 / total as f64 * 100.0) as u32
    } else {
        0
    };
    let total_states: usize = results.runs.iter().map(|r| r.states.len()).sum();
    let total_duration: u64 = results.runs.iter().map(|r| r.duration_ms).sum();

    let runs_html: String = results.runs.iter().map(run_html).collect();

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Scenario Report - {session}</title>
    <style>
        :root {{
            --bg-primary: #0a0f1d;
            --bg-secondary: #141b2d;
            --bg-tertiary: #1f2937;
            --border: #374151;
            --text-primary: #f9fafb;
            --text-secondary: #9ca3af;
            --green: #10b981;
            --red: #ef4444;
            --yellow: #f59e0b;
            --blue: #3b82f6;
        }}
        * {{ margin: 0; padding: 0; box-sizing: border-box; }}
        body {{
            font-family: system-ui, -apple-system, sans-serif;
            background: var(--bg-primary);
            color: var(--text-primary);
            line-height: 1.5;
            padding: 3rem 1rem;
        }}
        .container {{ max-width: 1100px; margin: 0 auto; }}
        header {{ margin-bottom: 2rem; display: flex; justify-content: space-between; align-items: flex-end; }}
        h1 {{ font-size: 2rem; font-weight: 800; }}
        .summary {{ display: grid; grid-template-columns: repeat(auto-fit, minmax(180px, 1fr)); gap: 1rem; margin-bottom: 2rem; }}
        .stat {{ background: var(--bg-secondary); border: 1px solid var(--border); padding: 1.25rem; border-radius: 1rem; }}
        .stat-value {{ font-size: 2rem; font-weight: 800; }}
        .stat-label {{ color: var(--text-secondary); font-size: 0.8rem; text-transform: uppercase; letter-spacing: 0.05em; }}
        .stat.passed .stat-value {{ color: var(--green); }}
        .stat.failed .stat-value {{ color: var(--red); }}
        .progress-bar {{ background: var(--bg-secondary); height: 10px; border-radius: 5px; overflow: hidden; margin-bottom: 3rem; border: 1px solid var(--border); }}
        .progress-fill {{ height: 100%; background: var(--green); }}
        .run {{ background: var(--bg-secondary); border: 1px solid var(--border); border-radius: 1.25rem; margin-bottom: 2rem; overflow: hidden; }}
        .run-header {{ padding: 1.25rem 1.5rem; display: flex; justify-content: space-between; align-items: center; border-bottom: 1px solid var(--border); }}
        .badge {{ padding: 0.2rem 0.7rem; border-radius: 9999px; font-size: 0.75rem; font-weight: 600; text-transform: uppercase; }}
        .badge.passed {{ background: rgba(16, 185, 129, 0.1); color: var(--green); }}
        .badge.failed {{ background: rgba(239, 68, 68, 0.1); color: var(--red); }}
        .badge.aborted, .badge.skipped {{ background: rgba(245, 158, 11, 0.1); color: var(--yellow); }}
        .failure {{ margin: 1rem 1.5rem 0; padding: 0.75rem 1rem; border-radius: 0.75rem; background: rgba(239, 68, 68, 0.1); border: 1px solid rgba(239, 68, 68, 0.2); color: #fca5a5; font-size: 0.85rem; }}
        .state {{ padding: 1rem 1.5rem; border-bottom: 1px solid var(--border); }}
        .state h3 {{ font-size: 1.05rem; display: flex; gap: 0.75rem; align-items: center; }}
        .step {{ display: flex; gap: 0.75rem; padding: 0.4rem 0.5rem; font-family: monospace; font-size: 0.875rem; }}
        .step.passed .icon {{ color: var(--green); }}
        .step.failed .icon {{ color: var(--red); }}
        .duration, .meta-line {{ color: var(--text-secondary); font-size: 0.75rem; }}
        .error-message {{ color: #fca5a5; font-size: 0.8rem; margin-left: 1.75rem; }}
        .warning {{ color: var(--yellow); font-size: 0.8rem; margin-left: 1.75rem; }}
        .artifact {{ color: var(--blue); font-size: 0.8rem; cursor: pointer; margin-right: 1rem; }}
        details {{ padding: 1rem 1.5rem; }}
        summary {{ cursor: pointer; color: var(--blue); font-weight: 600; }}
        table {{ width: 100%; border-collapse: collapse; margin-top: 0.75rem; font-size: 0.8rem; }}
        td {{ padding: 0.3rem 0.5rem; border-top: 1px solid var(--border); vertical-align: top; }}
        tr.error td {{ color: #fca5a5; }}
        #modal {{ display: none; position: fixed; z-index: 100; inset: 0; background: rgba(0, 0, 0, 0.9); padding: 2rem; align-items: center; justify-content: center; }}
        #modal img {{ max-width: 100%; max-height: 100%; border-radius: 0.5rem; }}
        #modal.active {{ display: flex; }}
    </style>
</head>
<body>
    <div class="container">
        <header>
            <h1>Scenario Verification Report</h1>
            <div class="meta-line">Total duration {duration}</div>
        </header>
        <div class="summary">
            <div class="stat"><div class="stat-value">{total}</div><div class="stat-label">Scenarios</div></div>
            <div class="stat"><div class="stat-value">{total_states}</div><div class="stat-label">States attempted</div></div>
            <div class="stat passed"><div class="stat-value">{passed}</div><div class="stat-label">Passed</div></div>
            <div class="stat failed"><div class="stat-value">{failed}</div><div class="stat-label">Failed</div></div>
        </div>
        <div class="progress-bar"><div class="progress-fill" style="width: {pass_rate}%"></div></div>
        {runs_html}
        <div class="meta-line">Session {session} · generated {generated}</div>
    </div>
    <div id="modal" onclick="this.classList.remove('active')"><img id="modal-img" src="" alt="Screenshot"></div>
    <script>
        function showScreenshot(path) {{
            document.getElementById('modal-img').src = path;
            document.getElementById('modal').classList.add('active');
        }}
    </script>
</body>
</html>"#,
        session = html_escape(&results.session_id),
        duration = format_duration(total_duration),
        total = total,
        total_states = total_states,
        passed = passed,
        failed = total - passed,
        pass_rate = pass_rate,
        runs_html = runs_html,
        generated = html_escape(&results.generated_at),
    )
}

fn run_html(run: &RunReport) -> String {
    let (label, class) = match run.result {
        RunResult::Passed => ("Passed".to_string(), "passed"),
        RunResult::FailedAt(ref state) => (format!("Failed at {}", state), "failed"),
        RunResult::Aborted(ref state) => (format!("Aborted in {}", state), "aborted"),
    };

    let failure_html = match run.failure {
        Some(ref failure) => format!(
            r#"<div class="failure">State <b>{}</b>, step {} ({}): {}{}</div>"#,
            html_escape(&failure.state),
            failure
                .step_index
                .map(|i| i.to_string())
                .unwrap_or_else(|| "-".to_string()),
            html_escape(failure.step.as_deref().unwrap_or("-")),
            html_escape(
                &failure
                    .error
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_default()
            ),
            failure
                .artifact
                .as_deref()
                .map(|a| format!(" · last artifact {}", artifact_link(a)))
                .unwrap_or_default(),
        ),
        None => String::new(),
    };

    let states_html: String = run.states.iter().map(state_html).collect();
    let skipped_html: String = run
        .skipped_states
        .iter()
        .map(|s| {
            format!(
                r#"<div class="state"><h3>{} <span class="badge skipped">Skipped</span></h3></div>"#,
                html_escape(s)
            )
        })
        .collect();

    let rows: String = run
        .diagnostics
        .iter()
        .map(|e| {
            let kind = match e.kind {
                DiagnosticKind::ConsoleLog => "console",
                DiagnosticKind::PageError => "pageerror",
                DiagnosticKind::EngineError => "engine",
            };
            format!(
                r#"<tr class="{}"><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>"#,
                if e.is_error() { "error" } else { "" },
                e.timestamp.format("%H:%M:%S%.3f"),
                html_escape(&e.state),
                kind,
                html_escape(&e.message)
            )
        })
        .collect();

    format!(
        r#"
        <div class="run">
            <div class="run-header">
                <div><h2>{name}</h2><div class="meta-line">{url} · {duration}</div></div>
                <span class="badge {class}">{label}</span>
            </div>
            {failure_html}
            {states_html}
            {skipped_html}
            <details>
                <summary>Diagnostics ({count} events, {errors} errors)</summary>
                <table>{rows}</table>
            </details>
        </div>"#,
        name = html_escape(&run.scenario),
        url = html_escape(run.target_url.as_deref().unwrap_or("-")),
        duration = format_duration(run.duration_ms),
        class = class,
        label = html_escape(&label),
        failure_html = failure_html,
        states_html = states_html,
        skipped_html = skipped_html,
        count = run.diagnostics.len(),
        errors = run.summary.error_events,
        rows = rows,
    )
}

fn state_html(state: &StateOutcome) -> String {
    let class = match state.status {
        StateStatus::Passed => "passed",
        StateStatus::Failed => "failed",
        StateStatus::Aborted => "aborted",
    };

    let mut steps_html = String::new();
    for step in &state.steps {
        let (icon, step_class) = match step.status {
            StepStatus::Passed => ("✓", "passed"),
            StepStatus::Failed => ("✗", "failed"),
        };
        let attempts = if step.attempts > 1 {
            format!(" · {} attempts", step.attempts)
        } else {
            String::new()
        };
        steps_html.push_str(&format!(
            r#"<div class="step {step_class}"><span class="icon">{icon}</span><span>[{}] {}</span><span class="duration">{}ms{attempts}</span></div>"#,
            step.index,
            html_escape(&step.description),
            step.duration_ms,
        ));
        if let Some(ref error) = step.error {
            steps_html.push_str(&format!(
                r#"<div class="error-message">{}</div>"#,
                html_escape(&error.to_string())
            ));
        }
        for warning in &step.warnings {
            steps_html.push_str(&format!(
                r#"<div class="warning">{}</div>"#,
                html_escape(warning)
            ));
        }
    }

    let artifacts: String = state.artifacts.iter().map(|a| artifact_link(a)).collect();

    format!(
        r#"<div class="state"><h3>{} <span class="badge {class}">{}</span><span class="duration">+{}ms · {}ms</span></h3>{steps_html}<div>{artifacts}</div></div>"#,
        html_escape(&state.name),
        state.status.as_str(),
        state.entered_at_ms,
        state.duration_ms,
    )
}

fn artifact_link(path: &str) -> String {
    let escaped = html_escape(path);
    format!(
        r#"<span class="artifact" onclick="showScreenshot('{0}')">📸 {0}</span>"#,
        escaped
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn format_duration(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else if ms < 60000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        let minutes = ms / 60000;
        let seconds = (ms % 60000) as f64 / 1000.0;
        format!("{}m {:.0}s", minutes, seconds)
    }
}
