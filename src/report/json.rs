use super::types::TestResults;
use anyhow::{Context, Result};
use std::path::Path;

/// Generate JSON report
pub async fn generate(results: &TestResults, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(results)?;

    if let Some(path) = output {
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("JSON report saved to: {}", path.display());
    } else {
        println!("{}", json);
    }

    Ok(())
}

/// Write `report.json` into the output directory
pub fn write_report(results: &TestResults, output_dir: &Path) -> Result<()> {
    let path = output_dir.join("report.json");
    let json = serde_json::to_string_pretty(results)?;
    std::fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    println!("    Generated JSON report: {}", path.display());
    Ok(())
}

/// Load a saved report: a full results file or a single run report
pub fn load(path: &Path) -> Result<TestResults> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    if let Ok(results) = serde_json::from_str::<TestResults>(&content) {
        return Ok(results);
    }
    let run: super::types::RunReport = serde_json::from_str(&content)
        .with_context(|| format!("{} is not a scenario report", path.display()))?;
    let session = run.run_id.clone();
    Ok(TestResults::new(&session, vec![run]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::types::tests_support::sample_results;
    use crate::report::types::RunResult;

    #[test]
    fn test_write_and_load_report() {
        let dir = tempfile::tempdir().unwrap();
        let results = sample_results();
        write_report(&results, dir.path()).unwrap();

        let loaded = load(&dir.path().join("report.json")).unwrap();
        assert_eq!(loaded.session_id, "session-1");
        assert_eq!(loaded.runs[0].result, RunResult::FailedAt("Scene".into()));
        assert_eq!(loaded.runs[0].states.len(), 2);
        assert_eq!(loaded.runs[0].diagnostics, results.runs[0].diagnostics);
    }

    #[test]
    fn test_load_single_run_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        let mut results = sample_results();
        let run = results.runs.remove(0);
        std::fs::write(&path, serde_json::to_string(&run).unwrap()).unwrap();

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.runs.len(), 1);
        assert_eq!(loaded.session_id, "run-1");
    }
}
