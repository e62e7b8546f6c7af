use super::types::{RunReport, TestResults};
use crate::runner::state::{StateOutcome, StateStatus};
use anyhow::{Context, Result};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;
use std::path::Path;

fn seconds(ms: u64) -> String {
    (ms as f64 / 1000.0).to_string()
}

/// Generate JUnit XML: one testsuite per scenario, one testcase per attempted state
pub fn generate_junit_xml(results: &TestResults) -> Result<String> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let tests: usize = results.runs.iter().map(|r| r.states.len()).sum();
    let failures: usize = results
        .runs
        .iter()
        .map(|r| r.states.iter().filter(|s| !s.passed()).count())
        .sum();
    let skipped: usize = results.runs.iter().map(|r| r.skipped_states.len()).sum();
    let total_duration: u64 = results.runs.iter().map(|r| r.duration_ms).sum();

    // <testsuites>
    let mut suites_start = BytesStart::new("testsuites");
    suites_start.push_attribute(("name", "lumi-scenario-run"));
    suites_start.push_attribute(("tests", tests.to_string().as_str()));
    suites_start.push_attribute(("failures", failures.to_string().as_str()));
    suites_start.push_attribute(("skipped", skipped.to_string().as_str()));
    suites_start.push_attribute(("time", seconds(total_duration).as_str()));
    writer.write_event(Event::Start(suites_start))?;

    for run in &results.runs {
        write_test_suite(&mut writer, run)?;
    }

    writer.write_event(Event::End(BytesEnd::new("testsuites")))?;

    let xml = String::from_utf8(writer.into_inner().into_inner())?;
    Ok(xml)
}

fn write_test_suite<W: std::io::Write>(writer: &mut Writer<W>, run: &RunReport) -> Result<()> {
    let failures = run.states.iter().filter(|s| !s.passed()).count();

    let mut suite_start = BytesStart::new("testsuite");
    suite_start.push_attribute(("name", run.scenario.as_str()));
    suite_start.push_attribute(("id", run.run_id.as_str()));
    suite_start.push_attribute(("tests", run.states.len().to_string().as_str()));
    suite_start.push_attribute(("failures", failures.to_string().as_str()));
    suite_start.push_attribute(("skipped", run.skipped_states.len().to_string().as_str()));
    suite_start.push_attribute(("time", seconds(run.duration_ms).as_str()));
    suite_start.push_attribute(("timestamp", run.started_at.to_rfc3339().as_str()));
    writer.write_event(Event::Start(suite_start))?;

    for state in &run.states {
        write_test_case(writer, &run.scenario, state)?;
    }

    // Console output and errors for the whole run
    if !run.diagnostics.is_empty() {
        let log: Vec<String> = run
            .diagnostics
            .iter()
            .map(|e| format!("[{}] {:?}: {}", e.state, e.kind, e.message))
            .collect();
        writer.write_event(Event::Start(BytesStart::new("system-out")))?;
        writer.write_event(Event::Text(BytesText::new(&log.join("\n"))))?;
        writer.write_event(Event::End(BytesEnd::new("system-out")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("testsuite")))?;
    Ok(())
}

fn write_test_case<W: std::io::Write>(
    writer: &mut Writer<W>,
    scenario: &str,
    state: &StateOutcome,
) -> Result<()> {
    let mut case_start = BytesStart::new("testcase");
    case_start.push_attribute(("name", state.name.as_str()));
    case_start.push_attribute(("classname", scenario));
    case_start.push_attribute(("time", seconds(state.duration_ms).as_str()));
    writer.write_event(Event::Start(case_start))?;

    if state.status != StateStatus::Passed {
        let message = state
            .error
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "Unknown error".to_string());
        let kind = state
            .error
            .as_ref()
            .map(|e| e.kind.as_str())
            .unwrap_or("Error");

        let mut fail_start = BytesStart::new("failure");
        fail_start.push_attribute(("message", message.as_str()));
        fail_start.push_attribute(("type", kind));
        writer.write_event(Event::Start(fail_start))?;

        if let Some(step) = state.failed_step() {
            let body = format!("step {} ({}): {}", step.index, step.description, message);
            writer.write_event(Event::Text(BytesText::new(&body)))?;
        }

        writer.write_event(Event::End(BytesEnd::new("failure")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("testcase")))?;
    Ok(())
}

/// Write report to file
pub fn write_report(results: &TestResults, output_dir: &Path) -> Result<()> {
    let xml = generate_junit_xml(results)?;
    let path = output_dir.join("junit.xml");
    std::fs::write(&path, xml).with_context(|| format!("Failed to write {}", path.display()))?;
    println!("    Generated JUnit report: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::types::tests_support::sample_results;

    #[test]
    fn test_generate_junit_xml() {
        let xml = generate_junit_xml(&sample_results()).expect("Failed to generate XML");

        assert!(xml.contains(r#"<testsuites name="lumi-scenario-run""#));
        assert!(xml.contains(r#"tests="2""#));
        assert!(xml.contains(r#"failures="1""#));
        assert!(xml.contains(r#"skipped="1""#));
        assert_eq!(xml.matches("<testcase ").count(), 2);
        assert!(xml.contains(r#"<testcase name="Landing" classname="georgia""#));
        assert!(xml.contains(r#"type="WaitTimeoutError""#));
        assert!(xml.contains("WebGL context lost on &lt;canvas&gt;"));
    }
}
