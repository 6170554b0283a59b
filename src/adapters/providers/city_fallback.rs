//! 城市層級的退路：不看街道，只要城市與州已知就一定有結果

use crate::adapters::http::{check_status, join_segments};
use crate::core::normalizer::normalize_city;
use crate::core::validator::{prefix_in_state, sanitize_cep, state_floor};
use crate::core::variation::Variations;
use crate::domain::model::{CepCandidate, Confidence, MethodId, NormalizedAddress, Specificity};
use crate::domain::ports::{CepProvider, ProviderError, ProviderResult, DEFAULT_PROVIDER_TIMEOUT};
use crate::utils::error::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct CityRow {
    uf: String,
    city: String,
    cep: String,
}

/// (UF, 正規化城市) → 城市通用 CEP
#[derive(Debug, Clone, Default)]
pub struct CityTable {
    entries: HashMap<(String, String), String>,
}

impl CityTable {
    pub fn from_csv_bytes(data: &[u8]) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(data);

        let mut entries = HashMap::new();
        for row in reader.deserialize::<CityRow>() {
            let row = row?;
            let uf = row.uf.to_ascii_uppercase();
            match sanitize_cep(&row.cep) {
                Some(cep) => {
                    entries.insert((uf.clone(), normalize_city(&row.city, &uf)), cep);
                }
                None => tracing::warn!("⚠️ City table: '{}' is not a valid CEP", row.cep),
            }
        }

        tracing::info!("🏙️ Loaded {} city reference codes", entries.len());
        Ok(Self { entries })
    }

    pub fn get(&self, state: &str, city: &str) -> Option<&str> {
        self.entries
            .get(&(state.to_string(), city.to_string()))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct CityLevelFallbackProvider {
    client: Client,
    registry_url: Option<String>,
    table: CityTable,
    timeout: Duration,
}

impl CityLevelFallbackProvider {
    pub fn new(client: Client, registry_url: Option<String>, table: CityTable) -> Self {
        Self {
            client,
            registry_url,
            table,
            timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 線上查詢只能用掉一半的時間，剩下的留給離線退路
    fn registry_budget(&self) -> Duration {
        self.timeout / 2
    }

    /// `GET {base}/{UF}/{城市}/json/` 第一筆結果的前五碼 + `-000`
    async fn registry_prefix(
        &self,
        base: &str,
        address: &NormalizedAddress,
    ) -> std::result::Result<String, ProviderError> {
        let url = join_segments(base, &[&address.state, &address.city, "json", ""])?;
        let response = self.client.get(url).send().await?;
        check_status(response.status())?;

        let body: serde_json::Value = serde_json::from_str(&response.text().await?)?;
        let first = match &body {
            serde_json::Value::Array(items) => items.first(),
            serde_json::Value::Object(_) => Some(&body),
            _ => None,
        };

        first
            .and_then(|item| item.get("cep"))
            .and_then(|cep| cep.as_str())
            .and_then(sanitize_cep)
            .filter(|cep| prefix_in_state(cep, &address.state))
            .map(|cep| format!("{}-000", &cep[..5]))
            .ok_or(ProviderError::NotFound)
    }
}

#[async_trait]
impl CepProvider for CityLevelFallbackProvider {
    fn id(&self) -> MethodId {
        MethodId::CityLevelFallback
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn requires_street(&self) -> bool {
        false
    }

    fn is_terminal(&self) -> bool {
        true
    }

    fn variants(&self, _address: &NormalizedAddress) -> Variations {
        Variations::single("")
    }

    async fn attempt(&self, address: &NormalizedAddress, _variant: &str) -> ProviderResult {
        let cep = if let Some(cep) = self.table.get(&address.state, &address.city) {
            tracing::debug!("🏙️ City table hit for {}/{}", address.city, address.state);
            cep.to_string()
        } else {
            let from_registry = match &self.registry_url {
                Some(base) => match tokio::time::timeout(
                    self.registry_budget(),
                    self.registry_prefix(base, address),
                )
                .await
                {
                    Ok(Ok(cep)) => Some(cep),
                    Err(_) => {
                        tracing::debug!(
                            "🏙️ City registry lookup for {}/{} exceeded {:?}",
                            address.city,
                            address.state,
                            self.registry_budget()
                        );
                        None
                    }
                    Ok(Err(e)) => {
                        tracing::debug!(
                            "🏙️ City registry lookup failed for {}/{}: {}",
                            address.city,
                            address.state,
                            e
                        );
                        None
                    }
                },
                None => None,
            };
            match from_registry {
                Some(cep) => cep,
                None => state_floor(&address.state).ok_or(ProviderError::NotFound)?,
            }
        };

        Ok(CepCandidate::new(
            cep,
            MethodId::CityLevelFallback,
            Specificity::CityLevel,
            Confidence::Low,
        ))
    }
}
