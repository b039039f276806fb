//! Loader for `gavel.yaml` with environment overlays.
//!
//! Sources are merged in this order, later ones winning:
//!
//! 1. serde defaults on every section (a run needs no file at all),
//! 2. YAML files or inline YAML snippets,
//! 3. `GAVEL__`-prefixed environment variables, `__` separating nested keys
//!    (`GAVEL__BROWSER__HEADLESS=false`).
//!
//! String values may reference `${VAR}`; references are expanded after the
//! merge, recursively up to a fixed depth.
use config::{Config, ConfigError, Environment, File};
use gavel_common::observability::LogFormat;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod site;

pub use site::{CellRef, ColumnMap, FormLocators, HeaderCheck, ResultSelectors, SiteProfile};

const MAXIMUM_ENV_EXPANSION_DEPTH: usize = 8;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GavelConfig {
    pub version: Option<String>,
    pub browser: BrowserSettings,
    pub site: SiteProfile,
    pub capture: CaptureSettings,
    pub diagnostics: DiagnosticsSettings,
    pub logging: LoggingSettings,
    pub run: RunSettings,
}

impl GavelConfig {
    /// Reject values that would make a run meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        url::Url::parse(&self.site.search_url).map_err(|e| {
            ConfigError::Message(format!(
                "site.search_url {:?} is not a valid URL: {e}",
                self.site.search_url
            ))
        })?;
        if self.browser.navigation_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "browser.navigation_timeout_secs must be positive".into(),
            ));
        }
        if self.capture.max_entries == 0 && self.capture.enabled {
            return Err(ConfigError::Message(
                "capture.max_entries must be positive when capture is enabled".into(),
            ));
        }
        Ok(())
    }
}

/// WebDriver connection and browser launch options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub webdriver_url: String,
    pub headless: bool,
    /// Keep Chrome's sandbox on. Containers usually need it off.
    pub sandbox: bool,
    pub navigation_timeout_secs: u64,
    pub window_width: u32,
    pub window_height: u32,
    pub lang: String,
    pub extra_args: Vec<String>,
}

impl BrowserSettings {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            webdriver_url: "http://localhost:9515".into(),
            headless: true,
            sandbox: false,
            navigation_timeout_secs: 60,
            window_width: 1920,
            window_height: 1080,
            lang: "ko-KR".into(),
            extra_args: Vec::new(),
        }
    }
}

/// One URL pattern watched by the network recorder.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UrlPatternSpec {
    /// Tag stored with each captured request that matched.
    pub tag: String,
    /// Regular expression matched against the full request URL.
    pub pattern: String,
}

impl UrlPatternSpec {
    fn new(tag: &str, pattern: &str) -> Self {
        Self {
            tag: tag.into(),
            pattern: pattern.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub enabled: bool,
    pub patterns: Vec<UrlPatternSpec>,
    /// Upper bound on buffered requests; later matches are counted, not kept.
    pub max_entries: usize,
    /// Background drain interval. `0` drains only at navigation boundaries.
    pub poll_interval_ms: u64,
    /// Response bodies are truncated to this many characters in the page hook.
    pub body_limit: usize,
    /// When set, the full log is written here at the end of every run.
    pub output: Option<PathBuf>,
}

impl CaptureSettings {
    pub fn poll_interval(&self) -> Option<Duration> {
        (self.poll_interval_ms > 0).then(|| Duration::from_millis(self.poll_interval_ms))
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            patterns: vec![
                UrlPatternSpec::new("api", r"/api/"),
                UrlPatternSpec::new("search", r"(?i)(search|srch)"),
                UrlPatternSpec::new("list", r"(?i)list"),
                UrlPatternSpec::new("json", r"(?i)\.json\b"),
                UrlPatternSpec::new("action", r"(?i)\.(do|laf|ajax)\b"),
            ],
            max_entries: 2_000,
            poll_interval_ms: 1_500,
            body_limit: 64 * 1024,
            output: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiagnosticsSettings {
    pub enabled: bool,
    /// Bundles land in `<dir>/<run_id>/`.
    pub dir: PathBuf,
}

impl Default for DiagnosticsSettings {
    fn default() -> Self {
        let dir = dirs::data_local_dir()
            .map(|d| d.join("gavel").join("diagnostics"))
            .unwrap_or_else(|| PathBuf::from("diagnostics"));
        Self { enabled: true, dir }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub format: LogFormat,
    pub dir: Option<PathBuf>,
    pub stderr: bool,
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            dir: None,
            stderr: true,
            filter: "info".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Page cap used when the criteria do not carry one.
    pub default_page_cap: u32,
    /// How long to wait for the result table after submitting the search.
    pub results_timeout_secs: u64,
    /// Pause before the single retry of a timed-out navigation.
    pub retry_backoff_ms: u64,
}

impl RunSettings {
    pub fn results_timeout(&self) -> Duration {
        Duration::from_secs(self.results_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            default_page_cap: 50,
            results_timeout_secs: 20,
            retry_backoff_ms: 2_000,
        }
    }
}

fn expand_env_in_value(v: &mut Value) {
    match v {
        Value::String(s) => {
            if s.contains('$') {
                let mut cur = std::mem::take(s);
                for _ in 0..MAXIMUM_ENV_EXPANSION_DEPTH {
                    let expanded = match shellexpand::env(&cur) {
                        Ok(cow) => cow.into_owned(),
                        Err(_) => cur.clone(),
                    };
                    if expanded == cur {
                        break;
                    }
                    cur = expanded;
                }
                *s = cur;
            }
        }
        Value::Array(arr) => arr.iter_mut().for_each(expand_env_in_value),
        Value::Object(obj) => obj.values_mut().for_each(expand_env_in_value),
        _ => {}
    }
}

/// Builder hiding the `config` crate wiring (YAML + env overrides).
pub struct GavelConfigLoader {
    files: config::ConfigBuilder<config::builder::DefaultState>,
}

impl Default for GavelConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl GavelConfigLoader {
    /// Start from defaults with no sources attached yet.
    ///
    /// ```
    /// use gavel_config::GavelConfigLoader;
    ///
    /// let config = GavelConfigLoader::new()
    ///     .with_yaml_str("version: '1'")
    ///     .load()
    ///     .expect("valid config");
    ///
    /// assert_eq!(config.version.as_deref(), Some("1"));
    /// assert_eq!(config.browser.navigation_timeout_secs, 60);
    /// assert_eq!(config.run.default_page_cap, 50);
    /// ```
    pub fn new() -> Self {
        Self {
            files: Config::builder(),
        }
    }

    /// Attach a required YAML/TOML/JSON file; format is inferred from the suffix.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.files = self
            .files
            .add_source(File::from(path.as_ref()).required(true));
        self
    }

    /// Attach a file that may be missing; defaults and env still apply.
    pub fn with_optional_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.files = self
            .files
            .add_source(File::from(path.as_ref()).required(false));
        self
    }

    /// Merge an inline YAML snippet.
    ///
    /// ```
    /// use gavel_config::{CellRef, GavelConfigLoader};
    ///
    /// let cfg = GavelConfigLoader::new()
    ///     .with_yaml_str(
    ///         r#"
    /// site:
    ///   columns:
    ///     auction_date: { column: 5, line: 0 }
    /// "#,
    ///     )
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(cfg.site.columns.auction_date, CellRef::line(5, 0));
    /// // untouched entries keep the built-in declaration
    /// assert_eq!(cfg.site.columns.item_number, CellRef::col(2));
    /// ```
    pub fn with_yaml_str(mut self, yaml: &str) -> Self {
        self.files = self
            .files
            .add_source(File::from_str(yaml, config::FileFormat::Yaml));
        self
    }

    /// Merge sources, expand `${VAR}` placeholders, and deserialize.
    ///
    /// ```
    /// use gavel_config::GavelConfigLoader;
    ///
    /// unsafe { std::env::set_var("GAVEL_DOC_WEBDRIVER", "http://grid.internal:4444"); }
    ///
    /// let config = GavelConfigLoader::new()
    ///     .with_yaml_str(r#"
    /// browser:
    ///   webdriver_url: "${GAVEL_DOC_WEBDRIVER}"
    ///   headless: false
    /// "#)
    ///     .load()
    ///     .expect("valid configuration");
    ///
    /// assert_eq!(config.browser.webdriver_url, "http://grid.internal:4444");
    /// assert!(!config.browser.headless);
    ///
    /// unsafe { std::env::remove_var("GAVEL_DOC_WEBDRIVER"); }
    /// ```
    pub fn load(self) -> Result<GavelConfig, ConfigError> {
        let cfg = self
            .files
            .add_source(
                Environment::with_prefix("GAVEL")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut v: Value = cfg.try_deserialize()?;
        expand_env_in_value(&mut v);

        let typed: GavelConfig =
            serde_json::from_value(v).map_err(|e| ConfigError::Message(e.to_string()))?;
        typed.validate()?;

        Ok(typed)
    }
}
