pub mod html;
pub mod json;
pub mod junit;
pub mod types;

use anyhow::Result;
use std::path::Path;

/// Regenerate a report from a saved `report.json`
pub async fn generate_report(
    results_path: &Path,
    format: &str,
    output: Option<&Path>,
) -> Result<()> {
    let results = json::load(results_path)?;

    match format {
        "json" => json::generate(&results, output).await,
        "html" => html::generate(&results, output).await,
        "junit" | "xml" => {
            let xml = junit::generate_junit_xml(&results)?;
            match output {
                Some(path) => {
                    std::fs::write(path, xml)?;
                    println!("JUnit report saved to: {}", path.display());
                }
                None => println!("{}", xml),
            }
            Ok(())
        }
        _ => anyhow::bail!("Unknown format: {}", format),
    }
}

/// Write report.json, report.html and junit.xml into `output_dir`
pub fn write_all(results: &types::TestResults, output_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(output_dir)?;
    json::write_report(results, output_dir)?;
    html::write_report(results, output_dir)?;
    junit::write_report(results, output_dir)?;
    Ok(())
}
