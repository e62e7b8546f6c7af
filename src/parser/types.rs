use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Default entry budget for a state when the scenario does not set one
pub const DEFAULT_ENTRY_TIMEOUT_MS: u64 = 60_000;

/// Represents a parsed scenario: an ordered user journey through the app under test
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ScenarioDefinition {
    pub name: String,

    /// Target URL; the CLI `--url` flag takes precedence
    #[serde(default)]
    pub url: Option<String>,

    /// Poll cadence for every wait in this scenario
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,

    #[serde(default, alias = "env", alias = "var")]
    pub vars: HashMap<String, String>,

    #[serde(default)]
    pub tags: Vec<String>,

    pub states: Vec<StateSpec>,
}

impl ScenarioDefinition {
    pub fn step_count(&self) -> usize {
        self.states.iter().map(|s| s.steps.len()).sum()
    }
}

/// One named lifecycle stage of a scenario (e.g. Landing, MapReady, SceneReady)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StateSpec {
    pub name: String,

    #[serde(default = "default_entry_timeout_ms", alias = "timeoutMs")]
    pub entry_timeout_ms: u64,

    pub steps: Vec<StepSpec>,

    #[serde(default)]
    pub on_failure: FailurePolicy,

    /// Capture `{state}-passed.png` when the state succeeds
    #[serde(default)]
    pub capture_on_pass: bool,
}

fn default_entry_timeout_ms() -> u64 {
    DEFAULT_ENTRY_TIMEOUT_MS
}

/// What the state machine does when a state fails
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FailurePolicy {
    #[default]
    Abort,
    #[serde(alias = "continue")]
    SkipToNext,
    CaptureAndAbort,
}

/// A single declared step with its retry policy.
///
/// Deserialization goes through `parser::yaml::parse_step_value` so the
/// shorthand syntax and command aliases are accepted from YAML and JSON alike.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSpec {
    #[serde(flatten)]
    pub action: StepAction,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl StepSpec {
    pub fn new(action: StepAction) -> Self {
        Self {
            action,
            retry: None,
            label: None,
        }
    }

    pub fn with_retry(mut self, max_attempts: u32, backoff_ms: u64) -> Self {
        self.retry = Some(RetryPolicy {
            max_attempts,
            backoff_ms,
        });
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.clone().unwrap_or_default()
    }

    /// Human readable step description used in events and reports
    pub fn display_name(&self) -> String {
        if let Some(ref label) = self.label {
            return label.clone();
        }
        self.action.display_name()
    }
}

impl<'de> Deserialize<'de> for StepSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_yaml::Value::deserialize(deserializer)?;
        crate::parser::yaml::parse_step_value(&value).map_err(serde::de::Error::custom)
    }
}

/// Retry configuration for a step: 1 attempt and no backoff unless declared
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts", alias = "maxRetries")]
    pub max_attempts: u32,
    #[serde(default, alias = "delayMs")]
    pub backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    1
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 0,
        }
    }
}

/// All supported step actions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StepAction {
    Navigate(String),
    WaitFor(WaitForParamsInput),
    Click(LocatorInput),
    Hover(LocatorInput),
    KeyPress(KeyPressParamsInput),
    Evaluate(String),
    Sleep(u64),
    Screenshot(String),
}

impl StepAction {
    pub fn display_name(&self) -> String {
        match self {
            StepAction::Navigate(url) => format!("navigate {}", url),
            StepAction::WaitFor(params) => match params.clone().into_inner() {
                Ok(wait) => format!("waitFor {}", wait.predicate),
                Err(_) => "waitFor <invalid>".to_string(),
            },
            StepAction::Click(locator) => match locator.to_locator() {
                Ok(l) => format!("click {}", l),
                Err(_) => "click <invalid>".to_string(),
            },
            StepAction::Hover(locator) => match locator.to_locator() {
                Ok(l) => format!("hover {}", l),
                Err(_) => "hover <invalid>".to_string(),
            },
            StepAction::KeyPress(params) => {
                let p = params.clone().into_inner();
                if p.hold_ms > 0 {
                    format!("keyPress {} ({}ms)", p.key, p.hold_ms)
                } else {
                    format!("keyPress {}", p.key)
                }
            }
            StepAction::Evaluate(script) => {
                let short: String = script.chars().take(40).collect();
                if short.len() < script.len() {
                    format!("evaluate {}...", short)
                } else {
                    format!("evaluate {}", short)
                }
            }
            StepAction::Sleep(ms) => format!("sleep {}ms", ms),
            StepAction::Screenshot(path) => format!("screenshot {}", path),
        }
    }
}

/// Element locator, resolved by the probe to zero-or-one live element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Locator {
    ByText { text: String, exact: bool },
    BySelector(String),
    ByRole { role: String, name: Option<String> },
}

impl Locator {
    pub fn text(text: impl Into<String>) -> Self {
        Locator::ByText {
            text: text.into(),
            exact: false,
        }
    }

    pub fn exact_text(text: impl Into<String>) -> Self {
        Locator::ByText {
            text: text.into(),
            exact: true,
        }
    }

    pub fn css(selector: impl Into<String>) -> Self {
        Locator::BySelector(selector.into())
    }

    pub fn role(role: impl Into<String>, name: Option<&str>) -> Self {
        Locator::ByRole {
            role: role.into(),
            name: name.map(|n| n.to_string()),
        }
    }

    /// Apply a string transformation (variable substitution) to every text field
    pub fn map_text(&self, f: impl Fn(&str) -> String) -> Locator {
        match self {
            Locator::ByText { text, exact } => Locator::ByText {
                text: f(text),
                exact: *exact,
            },
            Locator::BySelector(css) => Locator::BySelector(f(css)),
            Locator::ByRole { role, name } => Locator::ByRole {
                role: f(role),
                name: name.as_deref().map(&f),
            },
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::ByText { text, exact: true } => write!(f, "text=\"{}\"", text),
            Locator::ByText { text, exact: false } => write!(f, "text~\"{}\"", text),
            Locator::BySelector(css) => write!(f, "css={}", css),
            Locator::ByRole {
                role,
                name: Some(name),
            } => write!(f, "role={}[name=\"{}\"]", role, name),
            Locator::ByRole { role, name: None } => write!(f, "role={}", role),
        }
    }
}

/// Locator as written in a scenario file: bare text or an explicit block
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LocatorInput {
    String(String),
    Struct(LocatorParams),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LocatorParams {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub exact: bool,
    #[serde(default, alias = "css")]
    pub selector: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl LocatorInput {
    pub fn to_locator(&self) -> Result<Locator, String> {
        match self {
            Self::String(text) => Ok(Locator::text(text.clone())),
            Self::Struct(params) => params.to_locator(),
        }
    }
}

impl LocatorParams {
    pub fn to_locator(&self) -> Result<Locator, String> {
        match (&self.text, &self.selector, &self.role) {
            (Some(text), None, None) => Ok(Locator::ByText {
                text: text.clone(),
                exact: self.exact,
            }),
            (None, Some(css), None) => Ok(Locator::BySelector(css.clone())),
            (None, None, Some(role)) => Ok(Locator::ByRole {
                role: role.clone(),
                name: self.name.clone(),
            }),
            (None, None, None) => Err("locator needs one of text, selector or role".to_string()),
            _ => Err("locator must name exactly one of text, selector or role".to_string()),
        }
    }
}

/// Readiness predicate: a side-effect-free observation of the page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Predicate {
    ElementVisible(Locator),
    ElementAbsentOrHidden(Locator),
    TextPresent(String),
    CountAtLeast { locator: Locator, n: usize },
    CustomScriptTruthy(String),
}

impl Predicate {
    pub fn map_text(&self, f: impl Fn(&str) -> String) -> Predicate {
        match self {
            Predicate::ElementVisible(l) => Predicate::ElementVisible(l.map_text(f)),
            Predicate::ElementAbsentOrHidden(l) => Predicate::ElementAbsentOrHidden(l.map_text(f)),
            Predicate::TextPresent(s) => Predicate::TextPresent(f(s)),
            Predicate::CountAtLeast { locator, n } => Predicate::CountAtLeast {
                locator: locator.map_text(f),
                n: *n,
            },
            Predicate::CustomScriptTruthy(script) => Predicate::CustomScriptTruthy(f(script)),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::ElementVisible(l) => write!(f, "visible({})", l),
            Predicate::ElementAbsentOrHidden(l) => write!(f, "notVisible({})", l),
            Predicate::TextPresent(text) => write!(f, "textPresent(\"{}\")", text),
            Predicate::CountAtLeast { locator, n } => write!(f, "count({}) >= {}", locator, n),
            Predicate::CustomScriptTruthy(script) => write!(f, "script({})", script),
        }
    }
}

/// Parameters for the waitFor step, after shorthand expansion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitFor {
    pub predicate: Predicate,
    pub timeout_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
}

/// waitFor as written in a scenario file: bare text means `textPresent`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WaitForParamsInput {
    String(String),
    Struct(WaitForParams),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WaitForParams {
    #[serde(default)]
    pub visible: Option<LocatorInput>,
    #[serde(default, alias = "notVisible", alias = "hidden")]
    pub absent: Option<LocatorInput>,
    #[serde(default, alias = "text")]
    pub text_present: Option<String>,
    #[serde(default)]
    pub count_at_least: Option<CountParams>,
    #[serde(default, alias = "truthy")]
    pub script: Option<String>,
    #[serde(default, alias = "timeout")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
}

/// Locator keys spelled out rather than flattened so unknown keys are still rejected
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CountParams {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub exact: bool,
    #[serde(default, alias = "css")]
    pub selector: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(alias = "min", alias = "count")]
    pub n: usize,
}

impl CountParams {
    pub fn new(locator: Locator, n: usize) -> Self {
        let LocatorParams {
            text,
            exact,
            selector,
            role,
            name,
        } = LocatorParams::from(locator);
        Self {
            text,
            exact,
            selector,
            role,
            name,
            n,
        }
    }

    pub fn to_locator(&self) -> Result<Locator, String> {
        LocatorParams {
            text: self.text.clone(),
            exact: self.exact,
            selector: self.selector.clone(),
            role: self.role.clone(),
            name: self.name.clone(),
        }
        .to_locator()
    }
}

impl WaitForParamsInput {
    pub fn into_inner(self) -> Result<WaitFor, String> {
        match self {
            Self::String(text) => Ok(WaitFor {
                predicate: Predicate::TextPresent(text),
                timeout_ms: None,
                poll_interval_ms: None,
            }),
            Self::Struct(params) => params.into_wait_for(),
        }
    }
}

impl WaitForParams {
    pub fn into_wait_for(self) -> Result<WaitFor, String> {
        let mut predicates = Vec::new();
        if let Some(ref l) = self.visible {
            predicates.push(Predicate::ElementVisible(l.to_locator()?));
        }
        if let Some(ref l) = self.absent {
            predicates.push(Predicate::ElementAbsentOrHidden(l.to_locator()?));
        }
        if let Some(ref text) = self.text_present {
            predicates.push(Predicate::TextPresent(text.clone()));
        }
        if let Some(ref count) = self.count_at_least {
            if count.n == 0 {
                return Err("countAtLeast.n must be at least 1".to_string());
            }
            predicates.push(Predicate::CountAtLeast {
                locator: count.to_locator()?,
                n: count.n,
            });
        }
        if let Some(ref script) = self.script {
            predicates.push(Predicate::CustomScriptTruthy(script.clone()));
        }

        if predicates.len() != 1 {
            return Err(format!(
                "waitFor needs exactly one of visible, absent, textPresent, countAtLeast, script (found {})",
                predicates.len()
            ));
        }

        Ok(WaitFor {
            predicate: predicates.remove(0),
            timeout_ms: self.timeout_ms,
            poll_interval_ms: self.poll_interval_ms,
        })
    }
}

impl From<Predicate> for WaitForParamsInput {
    fn from(predicate: Predicate) -> Self {
        WaitForParamsInput::Struct(WaitForParams::from_predicate(predicate, None))
    }
}

impl WaitForParams {
    pub fn from_predicate(predicate: Predicate, timeout_ms: Option<u64>) -> Self {
        let mut params = WaitForParams {
            timeout_ms,
            ..Default::default()
        };
        match predicate {
            Predicate::ElementVisible(l) => params.visible = Some(LocatorInput::from(l)),
            Predicate::ElementAbsentOrHidden(l) => params.absent = Some(LocatorInput::from(l)),
            Predicate::TextPresent(t) => params.text_present = Some(t),
            Predicate::CountAtLeast { locator, n } => {
                params.count_at_least = Some(CountParams::new(locator, n))
            }
            Predicate::CustomScriptTruthy(s) => params.script = Some(s),
        }
        params
    }
}

impl From<Locator> for LocatorParams {
    fn from(locator: Locator) -> Self {
        match locator {
            Locator::ByText { text, exact } => LocatorParams {
                text: Some(text),
                exact,
                ..Default::default()
            },
            Locator::BySelector(css) => LocatorParams {
                selector: Some(css),
                ..Default::default()
            },
            Locator::ByRole { role, name } => LocatorParams {
                role: Some(role),
                name,
                ..Default::default()
            },
        }
    }
}

impl From<Locator> for LocatorInput {
    fn from(locator: Locator) -> Self {
        LocatorInput::Struct(LocatorParams::from(locator))
    }
}

/// keyPress as written in a scenario file: bare key means a tap
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPressParamsInput {
    String(String),
    Struct(KeyPressParams),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct KeyPressParams {
    pub key: String,
    #[serde(default, alias = "durationMs", alias = "duration")]
    pub hold_ms: u64,
}

impl KeyPressParamsInput {
    pub fn into_inner(self) -> KeyPressParams {
        match self {
            Self::String(key) => KeyPressParams { key, hold_ms: 0 },
            Self::Struct(p) => p,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locator_params_require_exactly_one_kind() {
        let both = LocatorParams {
            text: Some("Begin".to_string()),
            selector: Some("button".to_string()),
            ..Default::default()
        };
        assert!(both.to_locator().is_err());
        assert!(LocatorParams::default().to_locator().is_err());

        let role = LocatorParams {
            role: Some("button".to_string()),
            name: Some("Begin".to_string()),
            ..Default::default()
        };
        assert_eq!(role.to_locator().unwrap(), Locator::role("button", Some("Begin")));
    }

    #[test]
    fn test_wait_for_rejects_multiple_predicates() {
        let params = WaitForParams {
            text_present: Some("Georgia".to_string()),
            script: Some("true".to_string()),
            ..Default::default()
        };
        assert!(params.into_wait_for().is_err());
    }

    #[test]
    fn test_wait_for_round_trips_through_predicate() {
        let predicate = Predicate::CountAtLeast {
            locator: Locator::css("canvas"),
            n: 1,
        };
        let input = WaitForParamsInput::from(predicate.clone());
        assert_eq!(input.into_inner().unwrap().predicate, predicate);
    }

    #[test]
    fn test_display_names() {
        let step = StepSpec::new(StepAction::Click(LocatorInput::String("Georgia".into())));
        assert_eq!(step.display_name(), "click text~\"Georgia\"");

        let step = StepSpec::new(StepAction::KeyPress(KeyPressParamsInput::Struct(
            KeyPressParams {
                key: "w".into(),
                hold_ms: 1000,
            },
        )));
        assert_eq!(step.display_name(), "keyPress w (1000ms)");
    }
}
