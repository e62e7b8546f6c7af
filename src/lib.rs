pub mod driver;
pub mod parser;
pub mod report;
pub mod runner;
pub mod utils;

// Re-export common items
pub use driver::traits::ProbeAdapter;
pub use parser::types::ScenarioDefinition;
pub use report::generate_report;
pub use report::types::{RunReport, RunResult};
pub use runner::{run_scenarios, CancelToken, RunOptions, ScenarioRunner};
