use crate::adapters::providers::{lookup_site, registry, web_search};
use crate::utils::error::{CepError, Result};
use crate::utils::validation::{
    validate_non_empty_string, validate_path, validate_positive_number, validate_range,
    validate_url, Validate,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

static ENV_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("valid env var regex"));

/// 單次 provider 呼叫允許的最長逾時
pub const MAX_PROVIDER_TIMEOUT_SECONDS: u64 = 60;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CepConfig {
    pub resolver: ResolverConfig,
    pub input: InputConfig,
    pub output: OutputConfig,
    pub cache: CacheConfig,
    pub overrides: OverridesConfig,
    pub cascade: CascadeConfig,
    pub validation: ValidationConfig,
    pub batch: BatchConfig,
    pub monitoring: Option<MonitoringConfig>,
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub name: String,
    /// 所有相對路徑的根目錄
    pub base_dir: String,
    pub user_agent: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            name: "cep-enricher".to_string(),
            base_dir: ".".to_string(),
            user_agent: crate::adapters::http::DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// CSV 欄位對應
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub path: String,
    pub street_column: String,
    pub number_column: Option<String>,
    pub complement_column: Option<String>,
    pub neighborhood_column: Option<String>,
    pub city_column: String,
    pub state_column: String,
    /// 街道欄位為空時使用的自由文字欄位
    pub raw_column: Option<String>,
    pub cep_column: String,
    /// 組成 record key 的欄位，以 `record_key_separator` 串接
    pub record_key_columns: Vec<String>,
    pub record_key_separator: String,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            path: "input.csv".to_string(),
            street_column: "endereco".to_string(),
            number_column: Some("numero".to_string()),
            complement_column: Some("complemento".to_string()),
            neighborhood_column: Some("bairro".to_string()),
            city_column: "cidade".to_string(),
            state_column: "uf".to_string(),
            raw_column: None,
            cep_column: "cep".to_string(),
            record_key_columns: vec!["crm".to_string(), "uf".to_string()],
            record_key_separator: "-".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub path: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: "output/enriched.csv".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub path: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "cache/cep_cache.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OverridesConfig {
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeConfig {
    pub provider_timeout_seconds: u64,
    /// 暫時性錯誤的重試次數（0 或 1）
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    /// 低信心的街道層級結果再交叉比對其他 provider
    pub corroborate: bool,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            provider_timeout_seconds: 20,
            max_retries: 1,
            retry_backoff_ms: 500,
            corroborate: false,
        }
    }
}

impl CascadeConfig {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_seconds)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub extra_placeholders: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub workers: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub enabled: bool,
    pub log_level: Option<String>,
}

/// 出現 `[providers.x]` 區段即視為啟用，除非明確寫 `enabled = false`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub enabled: bool,
    /// 未設定時使用各 provider 的預設端點
    pub base_url: Option<String>,
    /// 未設定時使用 cascade.provider_timeout_seconds
    pub timeout_seconds: Option<u64>,
}

impl ProviderSettings {
    fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn url_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.base_url.as_deref().unwrap_or(default)
    }

    pub fn timeout(&self, cascade: &CascadeConfig) -> Duration {
        self.timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or_else(|| cascade.provider_timeout())
    }
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: None,
            timeout_seconds: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToggleSettings {
    pub enabled: bool,
}

impl Default for ToggleSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CityFallbackSettings {
    /// 查不到參考表時，以目錄服務查詢城市的 CEP 前綴
    pub registry_lookup: bool,
    /// `uf,city,cep` 參考表
    pub reference_csv: Option<String>,
    pub timeout_seconds: Option<u64>,
}

impl Default for CityFallbackSettings {
    fn default() -> Self {
        Self {
            registry_lookup: true,
            reference_csv: None,
            timeout_seconds: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub structured_registry: ProviderSettings,
    pub secondary_registry: ProviderSettings,
    pub variation_retry: ToggleSettings,
    pub web_search: ProviderSettings,
    pub lookup_site: ProviderSettings,
    pub city_fallback: CityFallbackSettings,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            structured_registry: ProviderSettings::default(),
            secondary_registry: ProviderSettings::disabled(),
            variation_retry: ToggleSettings::default(),
            web_search: ProviderSettings::disabled(),
            lookup_site: ProviderSettings::default(),
            city_fallback: CityFallbackSettings::default(),
        }
    }
}

impl CepConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(CepError::IoError)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content);

        toml::from_str(&processed_content).map_err(|e| CepError::ConfigError {
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換 ${VAR}；未設定的變數保持原樣
    fn substitute_env_vars(content: &str) -> String {
        ENV_VAR
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
            })
            .into_owned()
    }

    pub fn workers(&self) -> usize {
        self.batch.workers
    }

    pub fn monitoring_enabled(&self) -> bool {
        self.monitoring.as_ref().map(|m| m.enabled).unwrap_or(false)
    }

    fn validate_provider(
        field: &str,
        settings: &ProviderSettings,
        default_url: Option<&str>,
    ) -> Result<()> {
        if !settings.enabled {
            return Ok(());
        }
        match settings.base_url.as_deref().or(default_url) {
            Some(url) => validate_url(&format!("{}.base_url", field), url)?,
            None => {
                return Err(CepError::MissingConfigError {
                    field: format!("{}.base_url", field),
                })
            }
        }
        if let Some(timeout) = settings.timeout_seconds {
            validate_range(
                &format!("{}.timeout_seconds", field),
                timeout,
                1,
                MAX_PROVIDER_TIMEOUT_SECONDS,
            )?;
        }
        Ok(())
    }
}

impl Validate for CepConfig {
    fn validate(&self) -> Result<()> {
        validate_non_empty_string("resolver.name", &self.resolver.name)?;
        validate_path("resolver.base_dir", &self.resolver.base_dir)?;
        validate_path("input.path", &self.input.path)?;
        validate_path("output.path", &self.output.path)?;
        validate_non_empty_string("input.city_column", &self.input.city_column)?;
        validate_non_empty_string("input.state_column", &self.input.state_column)?;
        validate_non_empty_string("input.cep_column", &self.input.cep_column)?;

        if self.cache.enabled {
            validate_path("cache.path", &self.cache.path)?;
        }
        if let Some(path) = &self.overrides.path {
            validate_path("overrides.path", path)?;
        }

        validate_range(
            "cascade.provider_timeout_seconds",
            self.cascade.provider_timeout_seconds,
            1,
            MAX_PROVIDER_TIMEOUT_SECONDS,
        )?;
        validate_range("cascade.max_retries", self.cascade.max_retries, 0, 1)?;
        validate_range("cascade.retry_backoff_ms", self.cascade.retry_backoff_ms, 0, 10_000)?;
        validate_positive_number("batch.workers", self.batch.workers, 1)?;

        Self::validate_provider(
            "providers.structured_registry",
            &self.providers.structured_registry,
            Some(registry::DEFAULT_BASE_URL),
        )?;
        Self::validate_provider(
            "providers.secondary_registry",
            &self.providers.secondary_registry,
            None,
        )?;
        Self::validate_provider(
            "providers.web_search",
            &self.providers.web_search,
            Some(web_search::DEFAULT_BASE_URL),
        )?;
        Self::validate_provider(
            "providers.lookup_site",
            &self.providers.lookup_site,
            Some(lookup_site::DEFAULT_BASE_URL),
        )?;

        if let Some(timeout) = self.providers.city_fallback.timeout_seconds {
            validate_range(
                "providers.city_fallback.timeout_seconds",
                timeout,
                1,
                MAX_PROVIDER_TIMEOUT_SECONDS,
            )?;
        }
        if let Some(path) = &self.providers.city_fallback.reference_csv {
            validate_path("providers.city_fallback.reference_csv", path)?;
        }

        Ok(())
    }
}
