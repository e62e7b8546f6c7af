use super::cancel::CancelToken;
use super::diagnostics::DiagnosticsCollector;
use super::state::StateStatus;
use crate::utils::config::EngineConfig;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tokio::time::Instant;

/// Per-run mutable state, owned by the scenario runner for one run
pub struct RunContext {
    pub scenario: String,

    /// Target URL relative navigations are joined to
    pub target_url: Option<String>,

    /// Run start, for elapsed time
    pub started: Instant,

    /// Directory artifacts of this scenario are written to
    pub output_dir: PathBuf,

    pub vars: HashMap<String, String>,

    pub config: EngineConfig,

    /// Poll cadence for this run (scenario value or config)
    pub poll_interval_ms: u64,

    pub diagnostics: DiagnosticsCollector,

    pub cancel: CancelToken,

    /// Every artifact written during the run, in capture order
    pub artifacts: Vec<PathBuf>,
}

impl RunContext {
    pub fn new(
        scenario: &str,
        output_root: &Path,
        config: EngineConfig,
        diagnostics: DiagnosticsCollector,
        cancel: CancelToken,
    ) -> Self {
        let output_dir = output_root.join(sanitize_name(scenario));
        Self {
            scenario: scenario.to_string(),
            target_url: None,
            started: Instant::now(),
            output_dir,
            vars: HashMap::new(),
            poll_interval_ms: config.poll_interval_ms,
            config,
            diagnostics,
            cancel,
            artifacts: Vec::new(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Deterministic artifact path `{state}-{outcome}.png`
    pub fn artifact_path(&self, state: &str, status: StateStatus) -> PathBuf {
        self.output_dir
            .join(format!("{}-{}.png", sanitize_name(state), status.as_str()))
    }

    /// Resolve a screenshot step path against the output directory
    pub fn output_path(&self, relative: &str) -> PathBuf {
        let path = Path::new(relative);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.output_dir.join(path)
        }
    }

    /// Substitute variables and join relative URLs to the target URL
    pub fn resolve_url(&self, url: &str) -> String {
        let url = self.substitute_vars(url);
        if url.contains("://") || url.starts_with("about:") || url.starts_with("data:") {
            return url;
        }
        match self.target_url {
            Some(ref base) => format!(
                "{}/{}",
                base.trim_end_matches('/'),
                url.trim_start_matches('/')
            ),
            None => url,
        }
    }

    /// Get a variable: scenario vars, then `url`, then the process environment
    pub fn get_var(&self, name: &str) -> Option<String> {
        self.vars
            .get(name)
            .cloned()
            .or_else(|| {
                if name == "url" {
                    self.target_url.clone()
                } else {
                    None
                }
            })
            .or_else(|| std::env::var(name).ok())
    }

    /// Substitute ${name} patterns; unknown names are kept verbatim
    pub fn substitute_vars(&self, text: &str) -> String {
        if !text.contains("${") {
            return text.to_string();
        }
        let Some(re) = var_pattern() else {
            return text.to_string();
        };
        re.replace_all(text, |caps: &regex::Captures| {
            let key = &caps[1];
            self.get_var(key)
                .unwrap_or_else(|| format!("${{{}}}", key))
        })
        .to_string()
    }
}

fn var_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\$\{([a-zA-Z0-9_.]+)\}").ok())
        .as_ref()
}

/// Make a state or scenario name safe to use as a file name
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::MockProbe;

    fn context() -> RunContext {
        let probe = MockProbe::new("landing");
        let mut ctx = RunContext::new(
            "georgia journey",
            Path::new("/tmp/out"),
            EngineConfig::default(),
            DiagnosticsCollector::start(&probe),
            CancelToken::new(),
        );
        ctx.target_url = Some("http://localhost:5173/".into());
        ctx.vars.insert("region".into(), "Georgia".into());
        ctx
    }

    #[tokio::test]
    async fn test_substitute_vars() {
        let ctx = context();
        assert_eq!(ctx.substitute_vars("Entering ${region}"), "Entering Georgia");
        assert_eq!(ctx.substitute_vars("${url}map"), "http://localhost:5173/map");
        assert_eq!(
            ctx.substitute_vars("${LUMI_SURELY_UNSET_VARIABLE}"),
            "${LUMI_SURELY_UNSET_VARIABLE}"
        );
    }

    #[tokio::test]
    async fn test_resolve_url() {
        let ctx = context();
        assert_eq!(ctx.resolve_url("/"), "http://localhost:5173/");
        assert_eq!(ctx.resolve_url("/map?r=${region}"), "http://localhost:5173/map?r=Georgia");
        assert_eq!(ctx.resolve_url("https://example.com"), "https://example.com");
    }

    #[tokio::test]
    async fn test_artifact_paths() {
        let ctx = context();
        assert_eq!(
            ctx.artifact_path("Scene Ready", StateStatus::Failed),
            PathBuf::from("/tmp/out/georgia_journey/Scene_Ready-failed.png")
        );
        assert_eq!(
            ctx.output_path("scene.png"),
            PathBuf::from("/tmp/out/georgia_journey/scene.png")
        );
    }
}
