use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::metrics;
use crate::scenario::{ERRORS, Pauses};
use crate::stages::{LoadProfile, Stage};
use crate::thresholds::{Aggregate, Comparison, Threshold, ThresholdSet};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

/// Everything a run needs besides the scenario itself. Missing keys fall
/// back to the built-in load profile and thresholds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScenarioConfig {
    pub base_url: Option<String>,
    pub start_vus: u64,
    pub stages: Vec<Stage>,
    pub thresholds: ThresholdSet,
    #[serde(deserialize_with = "crate::duration::deserialize")]
    pub think_time: Duration,
    #[serde(deserialize_with = "crate::duration::deserialize")]
    pub cooldown: Duration,
    #[serde(deserialize_with = "crate::duration::deserialize")]
    pub graceful_stop: Duration,
    #[serde(deserialize_with = "crate::duration::deserialize")]
    pub request_timeout: Duration,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        let pauses = Pauses::default();
        Self {
            base_url: None,
            start_vus: 0,
            stages: default_stages(),
            thresholds: default_thresholds(),
            think_time: pauses.think_time,
            cooldown: pauses.cooldown,
            graceful_stop: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
        }
    }
}

fn default_stages() -> Vec<Stage> {
    vec![
        Stage::new(Duration::from_secs(30), 20),  // warm up
        Stage::new(Duration::from_secs(60), 50),  // normal load
        Stage::new(Duration::from_secs(30), 100), // peak
        Stage::new(Duration::from_secs(60), 50),  // back to normal
        Stage::new(Duration::from_secs(30), 0),   // cool down
    ]
}

fn default_thresholds() -> ThresholdSet {
    let mut set = ThresholdSet::default();
    set.insert(
        metrics::HTTP_REQ_DURATION,
        Threshold::new(Aggregate::Percentile(95.0), Comparison::Lt, 500.0),
    );
    set.insert(
        metrics::HTTP_REQ_DURATION,
        Threshold::new(Aggregate::Percentile(99.0), Comparison::Lt, 1000.0),
    );
    set.insert(ERRORS, Threshold::new(Aggregate::Rate, Comparison::Lt, 0.01));
    set
}

impl ScenarioConfig {
    /// Reads a YAML (`.yaml`/`.yml`) or JSON (`.json`) config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            "yaml" | "yml" => Ok(serde_yaml::from_str(&content)?),
            "json" => Ok(serde_json::from_str(&content)?),
            other => Err(Error::UnsupportedConfig(format!(
                "{} (extension '{}')",
                path.display(),
                other
            ))),
        }
    }

    pub fn load_profile(&self) -> Result<LoadProfile> {
        LoadProfile::new(self.start_vus, self.stages.clone())
    }

    pub fn pauses(&self) -> Pauses {
        Pauses {
            think_time: self.think_time,
            cooldown: self.cooldown,
        }
    }

    /// First non-empty of the override (`BASE_URL`), the configured URL and
    /// the default, without a trailing slash.
    pub fn resolve_base_url(&self, override_url: Option<&str>) -> String {
        [override_url, self.base_url.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|url| !url.is_empty())
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_match_the_built_in_profile() {
        let config = ScenarioConfig::default();
        let profile = config.load_profile().unwrap();
        assert_eq!(profile.total_duration(), Duration::from_secs(210));
        assert_eq!(profile.max_vus(), 100);

        let expressions: Vec<_> = config
            .thresholds
            .iter()
            .map(|(m, t)| format!("{}: {}", m, t.source()))
            .collect();
        assert_eq!(
            expressions,
            vec![
                "errors: rate<0.01",
                "http_req_duration: p(95)<500",
                "http_req_duration: p(99)<1000",
            ]
        );
        assert_eq!(config.pauses(), Pauses::default());
    }

    #[test]
    fn bundled_config_matches_defaults() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../config/users.yaml");
        assert_eq!(ScenarioConfig::load(&path).unwrap(), ScenarioConfig::default());
    }

    #[test]
    fn resolves_base_url() {
        let config = ScenarioConfig::default();
        assert_eq!(config.resolve_base_url(None), "http://localhost:8080");
        assert_eq!(config.resolve_base_url(Some("")), "http://localhost:8080");
        assert_eq!(
            config.resolve_base_url(Some("http://example.test:9090")),
            "http://example.test:9090"
        );

        let config = ScenarioConfig {
            base_url: Some("http://configured.test/".into()),
            ..ScenarioConfig::default()
        };
        assert_eq!(config.resolve_base_url(Some("  ")), "http://configured.test");
        assert_eq!(
            config.resolve_base_url(Some("http://example.test:9090")),
            "http://example.test:9090"
        );
    }

    #[test]
    fn loads_yaml_overrides() {
        let yaml = r#"
base_url: http://staging.test
stages:
  - { duration: 10s, target: 5 }
  - { duration: 5s, target: 0 }
thresholds:
  http_req_duration: ["p(90)<250"]
think_time: 100ms
cooldown: 0
"#;
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let config = ScenarioConfig::load(file.path()).unwrap();
        assert_eq!(config.base_url.as_deref(), Some("http://staging.test"));
        assert_eq!(config.load_profile().unwrap().total_duration(), Duration::from_secs(15));
        assert_eq!(config.thresholds.iter().count(), 1);
        assert_eq!(config.think_time, Duration::from_millis(100));
        assert_eq!(config.cooldown, Duration::ZERO);
        assert_eq!(config.graceful_stop, Duration::from_secs(30));
    }

    #[test]
    fn loads_json_and_rejects_unknown_keys() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(br#"{"start_vus": 2, "request_timeout": "5s"}"#).unwrap();
        let config = ScenarioConfig::load(file.path()).unwrap();
        assert_eq!(config.start_vus, 2);
        assert_eq!(config.request_timeout, Duration::from_secs(5));

        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(b"vus: 10\n").unwrap();
        assert!(matches!(ScenarioConfig::load(file.path()), Err(Error::YamlError(_))));

        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(b"thresholds:\n  errors: ['rate<<1']\n").unwrap();
        assert!(ScenarioConfig::load(file.path()).is_err());
    }

    #[test]
    fn rejects_unknown_extensions() {
        let file = NamedTempFile::new().unwrap();
        assert!(matches!(
            ScenarioConfig::load(file.path()),
            Err(Error::UnsupportedConfig(_))
        ));
    }
}
