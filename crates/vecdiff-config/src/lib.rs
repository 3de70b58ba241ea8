use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod secret;

pub use secret::Secret;

pub const VECDIFF_DIR_NAME: &str = ".vecdiff";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DEFAULT_ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";
pub const DEFAULT_GEMINI_API_KEY_ENV: &str = "GEMINI_API_KEY";
pub const DEFAULT_PROD_URL_ENV: &str = "VECDIFF_PROD_DATABASE_URL";
pub const DEFAULT_DEV_URL_ENV: &str = "VECDIFF_DEV_DATABASE_URL";
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
pub const MOCK_MODEL_NAME: &str = "mock";
pub const DEFAULT_MAX_TOKENS: u32 = 1000;
pub const DEFAULT_TEMPERATURE: f32 = 0.3;
pub const DEFAULT_MATCH_FIELD: &str = "pr_number";
pub const DEFAULT_REPORT_FILE: &str = "comparison.md";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NarrativeProviderKind {
    #[default]
    Auto,
    Mock,
    Anthropic,
    Gemini,
}

impl NarrativeProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Mock => "mock",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
        }
    }

    pub fn default_api_key_env(self) -> &'static str {
        match self {
            Self::Gemini => DEFAULT_GEMINI_API_KEY_ENV,
            Self::Auto | Self::Mock | Self::Anthropic => DEFAULT_ANTHROPIC_API_KEY_ENV,
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Self::Gemini => DEFAULT_GEMINI_MODEL,
            Self::Mock => MOCK_MODEL_NAME,
            Self::Auto | Self::Anthropic => DEFAULT_ANTHROPIC_MODEL,
        }
    }
}

impl std::str::FromStr for NarrativeProviderKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "auto" => Ok(Self::Auto),
            "mock" => Ok(Self::Mock),
            "anthropic" => Ok(Self::Anthropic),
            "gemini" => Ok(Self::Gemini),
            other => Err(format!(
                "invalid provider '{other}', expected one of: auto, mock, anthropic, gemini"
            )),
        }
    }
}

/// How one record is chosen when several records match the same identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    First,
    #[default]
    MostRecentlyUpdated,
    RejectAmbiguous,
}

impl MatchPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::First => "first",
            Self::MostRecentlyUpdated => "most-recently-updated",
            Self::RejectAmbiguous => "reject-ambiguous",
        }
    }
}

impl std::str::FromStr for MatchPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().replace('_', "-").as_str() {
            "first" => Ok(Self::First),
            "most-recently-updated" | "latest" => Ok(Self::MostRecentlyUpdated),
            "reject-ambiguous" => Ok(Self::RejectAmbiguous),
            other => Err(format!(
                "invalid match policy '{other}', expected one of: first, most-recently-updated, reject-ambiguous"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct VecdiffConfig {
    #[serde(default)]
    pub stores: StoresConfig,
    #[serde(default)]
    pub narrative: NarrativeConfig,
    #[serde(default)]
    pub lookup: LookupConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoresConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prod: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev: Option<String>,
    #[serde(default = "default_prod_url_env")]
    pub prod_url_env: String,
    #[serde(default = "default_dev_url_env")]
    pub dev_url_env: String,
}

impl Default for StoresConfig {
    fn default() -> Self {
        Self {
            prod: None,
            dev: None,
            prod_url_env: default_prod_url_env(),
            dev_url_env: default_dev_url_env(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrativeConfig {
    #[serde(default)]
    pub provider: NarrativeProviderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

impl Default for NarrativeConfig {
    fn default() -> Self {
        Self {
            provider: NarrativeProviderKind::Auto,
            model: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            api_key_env: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupConfig {
    #[serde(default = "default_match_field")]
    pub field: String,
    #[serde(default)]
    pub match_policy: MatchPolicy,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            field: default_match_field(),
            match_policy: MatchPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_report_path")]
    pub path: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            path: default_report_path(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("failed to serialize config TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("config file already exists at {}", .0.display())]
    AlreadyExists(PathBuf),
    #[error("missing connection string for store '{store}': set [stores].{store} or {env}")]
    MissingConnectionString { store: &'static str, env: String },
    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Runtime settings for one comparison run, resolved from the config file,
/// the environment and command-line overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonSettings {
    pub prod_connection_string: Secret,
    pub dev_connection_string: Secret,
    pub api_key: Option<Secret>,
    pub api_key_env: String,
    pub provider: NarrativeProviderKind,
    pub model_id: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub match_field: String,
    pub match_policy: MatchPolicy,
    pub report_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SettingsOverrides {
    pub prod_connection_string: Option<String>,
    pub dev_connection_string: Option<String>,
    pub provider: Option<NarrativeProviderKind>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub api_key_env: Option<String>,
    pub match_field: Option<String>,
    pub match_policy: Option<MatchPolicy>,
    pub report_path: Option<PathBuf>,
}

pub fn vecdiff_dir(workspace_root: impl AsRef<Path>) -> PathBuf {
    workspace_root.as_ref().join(VECDIFF_DIR_NAME)
}

pub fn config_path(workspace_root: impl AsRef<Path>) -> PathBuf {
    vecdiff_dir(workspace_root).join(CONFIG_FILE_NAME)
}

pub fn load_config(path: impl AsRef<Path>) -> Result<VecdiffConfig, ConfigError> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(VecdiffConfig::default());
    }

    let raw = fs::read_to_string(path)?;
    let parsed: VecdiffConfig = toml::from_str(&raw)?;
    Ok(normalize_config(parsed))
}

pub fn write_default_config(path: impl AsRef<Path>, force: bool) -> Result<VecdiffConfig, ConfigError> {
    let path = path.as_ref();
    if path.exists() && !force {
        return Err(ConfigError::AlreadyExists(path.to_path_buf()));
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let config = VecdiffConfig::default();
    let content = toml::to_string_pretty(&config)?;
    fs::write(path, content)?;

    Ok(config)
}

pub fn validate_config(config: &VecdiffConfig) -> Vec<ConfigWarning> {
    let mut warnings = Vec::new();

    if !(0.0..=1.0).contains(&config.narrative.temperature) {
        warnings.push(ConfigWarning {
            code: "narrative_temperature_range",
            message: format!(
                "temperature {} is outside 0.0..=1.0 and will be clamped",
                config.narrative.temperature
            ),
        });
    }
    if config.narrative.max_tokens == 0 {
        warnings.push(ConfigWarning {
            code: "narrative_max_tokens_zero",
            message: format!("max_tokens is 0, using {DEFAULT_MAX_TOKENS}"),
        });
    }
    if let (Some(prod), Some(dev)) = (&config.stores.prod, &config.stores.dev)
        && prod == dev
    {
        warnings.push(ConfigWarning {
            code: "stores_identical",
            message: "prod and dev point at the same store; every comparison will be trivial"
                .to_owned(),
        });
    }

    warnings
}

pub fn resolve_settings(
    workspace_root: impl AsRef<Path>,
    config: &VecdiffConfig,
    overrides: SettingsOverrides,
) -> Result<ComparisonSettings, ConfigError> {
    resolve_settings_with_env(workspace_root, config, overrides, read_env_non_empty)
}

/// Same as [`resolve_settings`], with the environment lookup injected.
pub fn resolve_settings_with_env<F>(
    workspace_root: impl AsRef<Path>,
    config: &VecdiffConfig,
    overrides: SettingsOverrides,
    env_lookup: F,
) -> Result<ComparisonSettings, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let prod_connection_string = first_non_empty(
        overrides.prod_connection_string,
        config.stores.prod.clone(),
    )
    .or_else(|| env_lookup(&config.stores.prod_url_env))
    .ok_or_else(|| ConfigError::MissingConnectionString {
        store: "prod",
        env: config.stores.prod_url_env.clone(),
    })?;
    let dev_connection_string = first_non_empty(
        overrides.dev_connection_string,
        config.stores.dev.clone(),
    )
    .or_else(|| env_lookup(&config.stores.dev_url_env))
    .ok_or_else(|| ConfigError::MissingConnectionString {
        store: "dev",
        env: config.stores.dev_url_env.clone(),
    })?;

    let provider = overrides.provider.unwrap_or(config.narrative.provider);
    let api_key_env = first_non_empty(overrides.api_key_env, config.narrative.api_key_env.clone())
        .unwrap_or_else(|| provider.default_api_key_env().to_owned());
    let api_key = env_lookup(&api_key_env)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .map(Secret::new);
    let model_id = first_non_empty(overrides.model, config.narrative.model.clone())
        .unwrap_or_else(|| provider.default_model().to_owned());

    let max_tokens = match overrides.max_tokens.unwrap_or(config.narrative.max_tokens) {
        0 => DEFAULT_MAX_TOKENS,
        value => value,
    };
    let temperature = overrides
        .temperature
        .unwrap_or(config.narrative.temperature);
    if !temperature.is_finite() {
        return Err(ConfigError::Invalid(format!(
            "temperature must be a finite number, got {temperature}"
        )));
    }

    let match_field = first_non_empty(overrides.match_field, Some(config.lookup.field.clone()))
        .unwrap_or_else(default_match_field);
    let match_policy = overrides.match_policy.unwrap_or(config.lookup.match_policy);

    let report_path = overrides
        .report_path
        .unwrap_or_else(|| PathBuf::from(&config.report.path));
    let report_path = if report_path.is_absolute() {
        report_path
    } else {
        workspace_root.as_ref().join(report_path)
    };

    Ok(ComparisonSettings {
        prod_connection_string: Secret::new(prod_connection_string),
        dev_connection_string: Secret::new(dev_connection_string),
        api_key,
        api_key_env,
        provider,
        model_id,
        max_tokens,
        temperature: temperature.clamp(0.0, 1.0),
        match_field,
        match_policy,
        report_path,
    })
}

fn default_prod_url_env() -> String {
    DEFAULT_PROD_URL_ENV.to_owned()
}

fn default_dev_url_env() -> String {
    DEFAULT_DEV_URL_ENV.to_owned()
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

fn default_match_field() -> String {
    DEFAULT_MATCH_FIELD.to_owned()
}

fn default_report_path() -> String {
    DEFAULT_REPORT_FILE.to_owned()
}

fn normalize_optional(input: Option<String>) -> Option<String> {
    input
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn first_non_empty(left: Option<String>, right: Option<String>) -> Option<String> {
    normalize_optional(left).or_else(|| normalize_optional(right))
}

fn normalize_required(value: &str, fallback: fn() -> String) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback()
    } else {
        trimmed.to_owned()
    }
}

fn normalize_config(mut config: VecdiffConfig) -> VecdiffConfig {
    config.stores.prod = normalize_optional(config.stores.prod.take());
    config.stores.dev = normalize_optional(config.stores.dev.take());
    config.stores.prod_url_env =
        normalize_required(&config.stores.prod_url_env, default_prod_url_env);
    config.stores.dev_url_env = normalize_required(&config.stores.dev_url_env, default_dev_url_env);

    config.narrative.model = normalize_optional(config.narrative.model.take());
    config.narrative.api_key_env = normalize_optional(config.narrative.api_key_env.take());

    config.lookup.field = normalize_required(&config.lookup.field, default_match_field);
    config.report.path = normalize_required(&config.report.path, default_report_path);

    config
}

fn read_env_non_empty(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map = pairs
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect::<HashMap<_, _>>();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn write_default_config_creates_file_and_refuses_overwrite() {
        let temp = tempdir().expect("tempdir");
        let path = config_path(temp.path());

        let config = write_default_config(&path, false).expect("write default config");
        assert_eq!(config.narrative.provider, NarrativeProviderKind::Auto);
        assert_eq!(config.lookup.field, DEFAULT_MATCH_FIELD);
        assert!(path.exists());

        let content = fs::read_to_string(&path).expect("read config file");
        assert!(content.contains("[narrative]"));
        assert!(content.contains("provider = \"auto\""));
        assert!(content.contains("match_policy = \"most_recently_updated\""));

        match write_default_config(&path, false) {
            Err(ConfigError::AlreadyExists(existing)) => assert_eq!(existing, path),
            other => panic!("expected AlreadyExists, got {other:?}"),
        }
        write_default_config(&path, true).expect("forced overwrite");
    }

    #[test]
    fn load_config_returns_defaults_when_missing() {
        let temp = tempdir().expect("tempdir");
        let config = load_config(config_path(temp.path())).expect("load config");
        assert_eq!(config, VecdiffConfig::default());
    }

    #[test]
    fn load_config_parses_and_normalizes_values() {
        let temp = tempdir().expect("tempdir");
        let path = config_path(temp.path());
        fs::create_dir_all(vecdiff_dir(temp.path())).expect("create .vecdiff");

        let raw = r#"
[stores]
prod = "  postgres://prod.internal/app  "
dev = "   "
prod_url_env = ""

[narrative]
provider = "gemini"
model = "gemini-1.5-pro"
max_tokens = 400
temperature = 0.1

[lookup]
field = "pr_number"
match_policy = "reject_ambiguous"

[report]
path = "out/diff.md"
"#;
        fs::write(&path, raw).expect("write config");

        let config = load_config(&path).expect("load config");

        assert_eq!(
            config.stores.prod.as_deref(),
            Some("postgres://prod.internal/app")
        );
        assert_eq!(config.stores.dev, None);
        assert_eq!(config.stores.prod_url_env, DEFAULT_PROD_URL_ENV);
        assert_eq!(config.narrative.provider, NarrativeProviderKind::Gemini);
        assert_eq!(config.narrative.model.as_deref(), Some("gemini-1.5-pro"));
        assert_eq!(config.narrative.max_tokens, 400);
        assert_eq!(config.lookup.match_policy, MatchPolicy::RejectAmbiguous);
        assert_eq!(config.report.path, "out/diff.md");
    }

    #[test]
    fn resolve_settings_reads_connection_strings_and_key_from_env() {
        let temp = tempdir().expect("tempdir");
        let env = env_from(&[
            (DEFAULT_PROD_URL_ENV, "postgres://prod/app"),
            (DEFAULT_DEV_URL_ENV, "sqlite:///tmp/dev.sqlite"),
            (DEFAULT_ANTHROPIC_API_KEY_ENV, " sk-test "),
        ]);

        let settings = resolve_settings_with_env(
            temp.path(),
            &VecdiffConfig::default(),
            SettingsOverrides::default(),
            env,
        )
        .expect("resolve settings");

        assert_eq!(settings.prod_connection_string.expose(), "postgres://prod/app");
        assert_eq!(
            settings.dev_connection_string.expose(),
            "sqlite:///tmp/dev.sqlite"
        );
        assert_eq!(
            settings.api_key.as_ref().map(Secret::expose),
            Some("sk-test")
        );
        assert_eq!(settings.model_id, DEFAULT_ANTHROPIC_MODEL);
        assert_eq!(settings.max_tokens, DEFAULT_MAX_TOKENS);
        assert_eq!(settings.temperature, DEFAULT_TEMPERATURE);
        assert_eq!(settings.match_field, DEFAULT_MATCH_FIELD);
        assert_eq!(settings.match_policy, MatchPolicy::MostRecentlyUpdated);
        assert_eq!(settings.report_path, temp.path().join(DEFAULT_REPORT_FILE));
    }

    #[test]
    fn resolve_settings_prefers_overrides_over_config_and_env() {
        let temp = tempdir().expect("tempdir");
        let mut config = VecdiffConfig::default();
        config.stores.prod = Some("postgres://config-prod/app".to_owned());
        config.stores.dev = Some("postgres://config-dev/app".to_owned());
        config.narrative.model = Some("config-model".to_owned());

        let env = env_from(&[
            ("CUSTOM_KEY", "gemini-key"),
            (DEFAULT_PROD_URL_ENV, "postgres://env-prod/app"),
        ]);

        let settings = resolve_settings_with_env(
            temp.path(),
            &config,
            SettingsOverrides {
                prod_connection_string: Some("postgres://cli-prod/app".to_owned()),
                provider: Some(NarrativeProviderKind::Gemini),
                api_key_env: Some("CUSTOM_KEY".to_owned()),
                max_tokens: Some(0),
                temperature: Some(3.0),
                match_policy: Some(MatchPolicy::First),
                report_path: Some(PathBuf::from("/tmp/report.md")),
                ..SettingsOverrides::default()
            },
            env,
        )
        .expect("resolve settings");

        assert_eq!(settings.prod_connection_string.expose(), "postgres://cli-prod/app");
        assert_eq!(settings.dev_connection_string.expose(), "postgres://config-dev/app");
        assert_eq!(settings.provider, NarrativeProviderKind::Gemini);
        assert_eq!(settings.api_key_env, "CUSTOM_KEY");
        assert_eq!(
            settings.api_key.as_ref().map(Secret::expose),
            Some("gemini-key")
        );
        assert_eq!(settings.model_id, "config-model");
        assert_eq!(settings.max_tokens, DEFAULT_MAX_TOKENS);
        assert_eq!(settings.temperature, 1.0);
        assert_eq!(settings.match_policy, MatchPolicy::First);
        assert_eq!(settings.report_path, PathBuf::from("/tmp/report.md"));
    }

    #[test]
    fn resolve_settings_requires_both_connection_strings() {
        let temp = tempdir().expect("tempdir");
        let env = env_from(&[(DEFAULT_PROD_URL_ENV, "postgres://prod/app")]);

        let result = resolve_settings_with_env(
            temp.path(),
            &VecdiffConfig::default(),
            SettingsOverrides::default(),
            env,
        );

        match result {
            Err(ConfigError::MissingConnectionString { store, env }) => {
                assert_eq!(store, "dev");
                assert_eq!(env, DEFAULT_DEV_URL_ENV);
            }
            other => panic!("expected missing dev connection string, got {other:?}"),
        }
    }

    #[test]
    fn settings_debug_output_redacts_secrets() {
        let temp = tempdir().expect("tempdir");
        let env = env_from(&[
            (DEFAULT_PROD_URL_ENV, "postgres://admin:pw@prod/app"),
            (DEFAULT_DEV_URL_ENV, "postgres://admin:pw@dev/app"),
            (DEFAULT_ANTHROPIC_API_KEY_ENV, "sk-live-123"),
        ]);
        let settings = resolve_settings_with_env(
            temp.path(),
            &VecdiffConfig::default(),
            SettingsOverrides::default(),
            env,
        )
        .expect("resolve settings");

        let debug = format!("{settings:?}");
        assert!(!debug.contains("admin:pw"));
        assert!(!debug.contains("sk-live-123"));
    }

    #[test]
    fn validate_config_flags_suspicious_values() {
        let mut config = VecdiffConfig::default();
        assert!(validate_config(&config).is_empty());

        config.narrative.temperature = 1.5;
        config.narrative.max_tokens = 0;
        config.stores.prod = Some("postgres://same/app".to_owned());
        config.stores.dev = Some("postgres://same/app".to_owned());

        let codes = validate_config(&config)
            .into_iter()
            .map(|warning| warning.code)
            .collect::<Vec<_>>();
        assert_eq!(
            codes,
            vec![
                "narrative_temperature_range",
                "narrative_max_tokens_zero",
                "stores_identical"
            ]
        );
    }

    #[test]
    fn match_policy_parses_cli_and_config_spellings() {
        assert_eq!("first".parse::<MatchPolicy>(), Ok(MatchPolicy::First));
        assert_eq!(
            "most_recently_updated".parse::<MatchPolicy>(),
            Ok(MatchPolicy::MostRecentlyUpdated)
        );
        assert_eq!(
            "reject-ambiguous".parse::<MatchPolicy>(),
            Ok(MatchPolicy::RejectAmbiguous)
        );
        assert!("random".parse::<MatchPolicy>().is_err());
    }
}
