use super::types::{
    KeyPressParams, KeyPressParamsInput, LocatorInput, LocatorParams, RetryPolicy,
    ScenarioDefinition, StepAction, StepSpec, WaitForParams, WaitForParamsInput,
};
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Parse a YAML (or JSON) scenario file into a validated ScenarioDefinition
pub fn parse_scenario_file(path: &Path) -> Result<ScenarioDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;

    let mut scenario = parse_scenario_content(&content)
        .with_context(|| format!("Invalid scenario: {}", path.display()))?;

    // A scenario without a name takes its file stem
    if scenario.name.trim().is_empty() {
        scenario.name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("scenario")
            .to_string();
    }

    Ok(scenario)
}

/// Parse scenario content; JSON is accepted since it is a YAML subset
pub fn parse_scenario_content(content: &str) -> Result<ScenarioDefinition> {
    let mut value: serde_yaml::Value =
        serde_yaml::from_str(content).context("Failed to parse YAML content")?;

    // `name` may be omitted in the file and filled in from the path later
    if let serde_yaml::Value::Mapping(ref mut map) = value {
        let key = serde_yaml::Value::String("name".to_string());
        if !map.contains_key(&key) {
            map.insert(key, serde_yaml::Value::String(String::new()));
        }
    }

    check_steps(&value)?;

    let scenario: ScenarioDefinition =
        serde_yaml::from_value(value).context("Failed to parse scenario definition")?;

    validate_scenario(&scenario)?;
    Ok(scenario)
}

/// Parse every step up front so errors name the state and step index
fn check_steps(value: &serde_yaml::Value) -> Result<()> {
    let Some(states) = value.get("states").and_then(|s| s.as_sequence()) else {
        return Ok(());
    };

    for (state_index, state) in states.iter().enumerate() {
        let state_name = state
            .get("name")
            .and_then(|n| n.as_str())
            .map(|n| n.to_string())
            .unwrap_or_else(|| format!("#{}", state_index));

        let Some(steps) = state.get("steps").and_then(|s| s.as_sequence()) else {
            continue;
        };
        for (step_index, step) in steps.iter().enumerate() {
            parse_step_value(step).with_context(|| {
                format!("State '{}' step {}", state_name, step_index)
            })?;
        }
    }

    Ok(())
}

/// Check the structural invariants of a scenario before any probe call happens
pub fn validate_scenario(scenario: &ScenarioDefinition) -> Result<()> {
    if scenario.states.is_empty() {
        anyhow::bail!("Scenario '{}' declares no states", scenario.name);
    }

    let mut seen = HashSet::new();
    for state in &scenario.states {
        if state.name.trim().is_empty() {
            anyhow::bail!("State names must not be empty");
        }
        if !seen.insert(state.name.as_str()) {
            anyhow::bail!("Duplicate state name: {}", state.name);
        }
        if state.steps.is_empty() {
            anyhow::bail!("State '{}' declares no steps", state.name);
        }
        if state.entry_timeout_ms == 0 {
            anyhow::bail!("State '{}' has a zero entryTimeoutMs", state.name);
        }
        for (index, step) in state.steps.iter().enumerate() {
            if let Some(ref retry) = step.retry {
                if retry.max_attempts == 0 {
                    anyhow::bail!(
                        "State '{}' step {}: retry.maxAttempts must be at least 1",
                        state.name,
                        index
                    );
                }
            }
        }
    }

    Ok(())
}

/// Collect scenario files from a file or directory path
pub fn collect_scenario_files(path: &Path) -> Vec<PathBuf> {
    if !path.is_dir() {
        return vec![path.to_path_buf()];
    }

    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .map_or(false, |ext| ext == "yaml" || ext == "yml" || ext == "json")
        })
        .map(|e| e.path().to_path_buf())
        .collect();
    files.sort();
    files
}

/// Parse a single step from a YAML value.
///
/// A step is a mapping with exactly one action key plus the optional
/// `retry` and `label` keys, e.g. `{ click: "Begin", retry: { maxAttempts: 3 } }`.
pub fn parse_step_value(value: &serde_yaml::Value) -> Result<StepSpec> {
    let map = match value {
        serde_yaml::Value::Mapping(map) => map,
        serde_yaml::Value::String(s) => {
            anyhow::bail!("Step '{}' needs parameters (e.g. `{}: ...`)", s, s)
        }
        _ => anyhow::bail!("Invalid step format: {:?}", value),
    };

    let mut retry = None;
    let mut label = None;
    let mut action = None;

    for (key, params) in map {
        let key = key
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Step keys must be strings"))?;

        match key {
            "retry" => {
                let policy: RetryPolicy =
                    serde_yaml::from_value(params.clone()).context("Invalid retry policy")?;
                retry = Some(policy);
            }
            "label" | "name" => {
                label = params.as_str().map(|s| s.to_string());
            }
            _ => {
                if action.is_some() {
                    anyhow::bail!("Step declares more than one action (second: '{}')", key);
                }
                action = Some(parse_action_with_params(key, params)?);
            }
        }
    }

    let action = action.ok_or_else(|| anyhow::anyhow!("Step declares no action"))?;
    Ok(StepSpec {
        action,
        retry,
        label,
    })
}

/// Parse an action with parameters
fn parse_action_with_params(name: &str, params: &serde_yaml::Value) -> Result<StepAction> {
    let action = match name {
        "navigate" | "goto" | "open" => StepAction::Navigate(
            serde_yaml::from_value(params.clone()).context("navigate expects a URL string")?,
        ),

        "waitFor" | "wait" => {
            let input: WaitForParamsInput = if let Some(text) = params.as_str() {
                WaitForParamsInput::String(text.to_string())
            } else {
                let inner: WaitForParams =
                    serde_yaml::from_value(params.clone()).context("Invalid waitFor")?;
                WaitForParamsInput::Struct(inner)
            };
            // Surface predicate errors at load time
            input
                .clone()
                .into_inner()
                .map_err(|e| anyhow::anyhow!("Invalid waitFor: {}", e))?;
            StepAction::WaitFor(input)
        }

        "click" | "tap" => StepAction::Click(parse_locator(name, params)?),

        "hover" => StepAction::Hover(parse_locator(name, params)?),

        "keyPress" | "press" => {
            let input = if let Some(key) = params.as_str() {
                KeyPressParamsInput::String(key.to_string())
            } else {
                let inner: KeyPressParams =
                    serde_yaml::from_value(params.clone()).context("Invalid keyPress")?;
                KeyPressParamsInput::Struct(inner)
            };
            StepAction::KeyPress(input)
        }

        "evaluate" | "eval" => StepAction::Evaluate(
            serde_yaml::from_value(params.clone()).context("evaluate expects a script string")?,
        ),

        "sleep" => {
            let ms = if let Some(ms) = params.as_u64() {
                ms
            } else {
                #[derive(serde::Deserialize)]
                #[serde(deny_unknown_fields)]
                struct SleepParams {
                    ms: u64,
                }
                let p: SleepParams =
                    serde_yaml::from_value(params.clone()).context("sleep expects milliseconds")?;
                p.ms
            };
            StepAction::Sleep(ms)
        }

        "screenshot" | "takeScreenshot" => {
            let path = if let Some(path) = params.as_str() {
                path.to_string()
            } else {
                #[derive(serde::Deserialize)]
                #[serde(deny_unknown_fields)]
                struct ScreenshotParams {
                    path: String,
                }
                let p: ScreenshotParams =
                    serde_yaml::from_value(params.clone()).context("screenshot expects a path")?;
                p.path
            };
            StepAction::Screenshot(path)
        }

        _ => anyhow::bail!("Unknown step action: {}", name),
    };

    Ok(action)
}

fn parse_locator(action: &str, params: &serde_yaml::Value) -> Result<LocatorInput> {
    let input = if let Some(text) = params.as_str() {
        LocatorInput::String(text.to_string())
    } else {
        let inner: LocatorParams = serde_yaml::from_value(params.clone())
            .with_context(|| format!("Invalid locator for {}", action))?;
        LocatorInput::Struct(inner)
    };
    input
        .to_locator()
        .map_err(|e| anyhow::anyhow!("Invalid locator for {}: {}", action, e))?;
    Ok(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::types::{FailurePolicy, Locator, Predicate};

    const GEORGIA: &str = r#"
name: georgia-journey
url: http://localhost:5173
vars:
  region: Georgia
states:
  - name: Landing
    entryTimeoutMs: 15000
    onFailure: captureAndAbort
    steps:
      - navigate: /
      - waitFor: { visible: { role: button, name: Begin }, timeoutMs: 10000 }
      - click: { role: button, name: Begin }
        retry: { maxAttempts: 3, backoffMs: 500 }
  - name: Map
    onFailure: skipToNext
    steps:
      - waitFor: "${region}"
      - hover: { text: "${region}", exact: true }
      - tap: "${region}"
  - name: Scene
    steps:
      - waitFor: { countAtLeast: { selector: canvas, n: 1 }, timeoutMs: 30000 }
      - press: { key: w, holdMs: 1000 }
      - sleep: 500
      - screenshot: scene.png
"#;

    #[test]
    fn test_parse_georgia_scenario() {
        let scenario = parse_scenario_content(GEORGIA).unwrap();
        assert_eq!(scenario.name, "georgia-journey");
        assert_eq!(scenario.states.len(), 3);
        assert_eq!(scenario.step_count(), 10);

        let landing = &scenario.states[0];
        assert_eq!(landing.entry_timeout_ms, 15000);
        assert_eq!(landing.on_failure, FailurePolicy::CaptureAndAbort);
        assert_eq!(landing.steps[2].retry_policy().max_attempts, 3);
        assert_eq!(landing.steps[2].retry_policy().backoff_ms, 500);

        let map = &scenario.states[1];
        assert_eq!(map.on_failure, FailurePolicy::SkipToNext);
        match &map.steps[0].action {
            StepAction::WaitFor(input) => {
                let wait = input.clone().into_inner().unwrap();
                assert_eq!(wait.predicate, Predicate::TextPresent("${region}".into()));
            }
            other => panic!("unexpected action: {:?}", other),
        }

        let scene = &scenario.states[2];
        assert_eq!(scene.entry_timeout_ms, 60_000);
        match &scene.steps[0].action {
            StepAction::WaitFor(input) => {
                let wait = input.clone().into_inner().unwrap();
                assert_eq!(
                    wait.predicate,
                    Predicate::CountAtLeast {
                        locator: Locator::css("canvas"),
                        n: 1
                    }
                );
                assert_eq!(wait.timeout_ms, Some(30000));
            }
            other => panic!("unexpected action: {:?}", other),
        }
        assert!(matches!(scene.steps[2].action, StepAction::Sleep(500)));
    }

    #[test]
    fn test_parse_json_scenario() {
        let json = r#"{
            "name": "json",
            "states": [
                { "name": "Landing", "steps": [ { "navigate": "/" }, { "waitFor": "Begin" } ] }
            ]
        }"#;
        let scenario = parse_scenario_content(json).unwrap();
        assert_eq!(scenario.states[0].steps.len(), 2);
    }

    #[test]
    fn test_rejects_duplicate_state_names() {
        let yaml = r#"
name: dup
states:
  - name: Map
    steps: [ { sleep: 1 } ]
  - name: Map
    steps: [ { sleep: 1 } ]
"#;
        let err = parse_scenario_content(yaml).unwrap_err();
        assert!(format!("{:#}", err).contains("Duplicate state name"));
    }

    #[test]
    fn test_rejects_empty_steps_and_empty_scenario() {
        let yaml = "name: empty\nstates:\n  - name: Landing\n    steps: []\n";
        assert!(parse_scenario_content(yaml).is_err());

        let yaml = "name: nothing\nstates: []\n";
        assert!(parse_scenario_content(yaml).is_err());
    }

    #[test]
    fn test_rejects_unknown_action_and_bad_locator() {
        let yaml = "name: x\nstates:\n  - name: A\n    steps:\n      - swipe: up\n";
        let err = parse_scenario_content(yaml).unwrap_err();
        assert!(format!("{:#}", err).contains("Unknown step action"));

        let yaml = "name: x\nstates:\n  - name: A\n    steps:\n      - click: { text: a, selector: b }\n";
        assert!(parse_scenario_content(yaml).is_err());
    }

    #[test]
    fn test_rejects_misspelled_keys() {
        let yaml = "name: x\nstates:\n  - name: A\n    steps:\n      - waitFor: { text: Begin, timout: 5000 }\n";
        let err = format!("{:#}", parse_scenario_content(yaml).unwrap_err());
        assert!(err.contains("State 'A' step 0"), "{}", err);
        assert!(err.contains("timout"), "{}", err);

        let yaml = "name: x\nstates:\n  - name: A\n    onFailur: skipToNext\n    steps:\n      - click: Begin\n";
        let err = format!("{:#}", parse_scenario_content(yaml).unwrap_err());
        assert!(err.contains("onFailur"), "{}", err);

        let yaml = "name: x\nstates:\n  - name: A\n    steps:\n      - click: Begin\n        retry: { maxAttemps: 3 }\n";
        let err = format!("{:#}", parse_scenario_content(yaml).unwrap_err());
        assert!(err.contains("maxAttemps"), "{}", err);

        let yaml = "name: x\nstates:\n  - name: A\n    steps:\n      - waitFor: { countAtLeast: { selector: canvas, n: 1, visble: true } }\n";
        let err = format!("{:#}", parse_scenario_content(yaml).unwrap_err());
        assert!(err.contains("visble"), "{}", err);

        let yaml = "name: x\npollIntervalMS: 100\nstates:\n  - name: A\n    steps:\n      - click: Begin\n";
        assert!(parse_scenario_content(yaml).is_err());
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let yaml = "name: x\nstates:\n  - name: A\n    steps:\n      - click: Begin\n        retry: { maxAttempts: 0 }\n";
        assert!(parse_scenario_content(yaml).is_err());
    }

    #[test]
    fn test_step_serializes_flat() {
        let scenario = parse_scenario_content(GEORGIA).unwrap();
        let json = serde_json::to_value(&scenario.states[0].steps[2]).unwrap();
        assert!(json.get("click").is_some());
        assert_eq!(json["retry"]["maxAttempts"], 3);
    }
}
