//! ViaCEP 風格的街道目錄：`GET {base}/{UF}/{城市}/{街道}/json/`

use crate::adapters::http::{check_status, join_segments};
use crate::core::normalizer::{normalize, normalize_number};
use crate::core::validator::sanitize_cep;
use crate::domain::model::{CepCandidate, Confidence, MethodId, NormalizedAddress, Specificity};
use crate::domain::ports::{CepProvider, ProviderError, ProviderResult, DEFAULT_PROVIDER_TIMEOUT};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://viacep.com.br/ws";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistryEntry {
    #[serde(default)]
    pub cep: String,
    #[serde(default)]
    pub logradouro: String,
    #[serde(default)]
    pub complemento: String,
    #[serde(default)]
    pub bairro: String,
    #[serde(default)]
    pub localidade: String,
    #[serde(default)]
    pub uf: String,
}

pub struct StructuredRegistryProvider {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl StructuredRegistryProvider {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 查詢目錄並挑出最符合的一筆 CEP
    pub(crate) async fn lookup(
        &self,
        address: &NormalizedAddress,
        street: &str,
    ) -> Result<String, ProviderError> {
        let url = join_segments(
            &self.base_url,
            &[&address.state, &address.city, street, "json", ""],
        )?;
        tracing::debug!("📡 Structured registry: {}", url);

        let response = self.client.get(url).send().await?;
        check_status(response.status())?;
        let body = response.text().await?;
        let entries = parse_entries(&body)?;

        best_entry(&entries, street, &address.number)
            .and_then(|entry| sanitize_cep(&entry.cep))
            .ok_or(ProviderError::NotFound)
    }
}

#[async_trait]
impl CepProvider for StructuredRegistryProvider {
    fn id(&self) -> MethodId {
        MethodId::StructuredRegistry
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn attempt(&self, address: &NormalizedAddress, variant: &str) -> ProviderResult {
        let cep = self.lookup(address, variant).await?;
        Ok(CepCandidate::new(
            cep,
            MethodId::StructuredRegistry,
            Specificity::StreetLevel,
            Confidence::High,
        ))
    }
}

/// 陣列 → 條目；`{"erro": true}` 或空陣列 → 查無資料
pub(crate) fn parse_entries(body: &str) -> Result<Vec<RegistryEntry>, ProviderError> {
    let value: serde_json::Value = serde_json::from_str(body)?;
    match value {
        serde_json::Value::Array(_) => {
            let entries: Vec<RegistryEntry> = serde_json::from_value(value)?;
            if entries.is_empty() {
                Err(ProviderError::NotFound)
            } else {
                Ok(entries)
            }
        }
        serde_json::Value::Object(ref map) if map.contains_key("erro") => {
            Err(ProviderError::NotFound)
        }
        serde_json::Value::Object(_) => {
            let entry: RegistryEntry = serde_json::from_value(value)?;
            Ok(vec![entry])
        }
        other => Err(ProviderError::Transient(format!(
            "unexpected registry payload: {}",
            other
        ))),
    }
}

/// 門牌落在 complemento 範圍內者優先，其次街名完全相同者，最後取第一筆
pub(crate) fn best_entry<'a>(
    entries: &'a [RegistryEntry],
    street: &str,
    number: &str,
) -> Option<&'a RegistryEntry> {
    if let Ok(house) = normalize_number(number).parse::<u32>() {
        if let Some(entry) = entries
            .iter()
            .find(|entry| range_contains(&entry.complemento, house))
        {
            return Some(entry);
        }
    }

    let wanted = normalize(street);
    entries
        .iter()
        .find(|entry| {
            let logradouro = normalize(&entry.logradouro);
            !logradouro.is_empty() && (logradouro == wanted || logradouro.ends_with(&format!(" {}", wanted)))
        })
        .or_else(|| entries.first())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Parity {
    Any,
    Odd,
    Even,
}

/// 解析「até 299/300」「de 301/302 ao fim」「de 1 a 199 - lado ímpar」「lado par」
pub(crate) fn range_contains(complemento: &str, house: u32) -> bool {
    let folded = normalize(complemento);
    let tokens: Vec<&str> = folded.split_whitespace().collect();
    if tokens.is_empty() {
        return false;
    }

    let parity = if tokens.contains(&"IMPAR") {
        Parity::Odd
    } else if tokens.contains(&"PAR") {
        Parity::Even
    } else {
        Parity::Any
    };

    let numbers_after = |keyword: &str| -> Vec<u32> {
        tokens
            .iter()
            .position(|t| *t == keyword)
            .map(|start| {
                tokens[start + 1..]
                    .iter()
                    .map_while(|t| t.parse::<u32>().ok())
                    .collect()
            })
            .unwrap_or_default()
    };

    let upto = numbers_after("ATE");
    let from = numbers_after("DE");
    let to = numbers_after("A");
    let open_end = folded.contains("AO FIM");

    let (low, high) = if !upto.is_empty() {
        (0, upto.iter().copied().max().unwrap_or(0))
    } else if !from.is_empty() {
        let low = from.iter().copied().min().unwrap_or(0);
        let high = if open_end {
            u32::MAX
        } else if !to.is_empty() {
            to.iter().copied().max().unwrap_or(u32::MAX)
        } else {
            return false;
        };
        (low, high)
    } else if parity != Parity::Any {
        (0, u32::MAX)
    } else {
        return false;
    };

    let parity_ok = match parity {
        Parity::Any => true,
        Parity::Odd => house % 2 == 1,
        Parity::Even => house % 2 == 0,
    };
    parity_ok && house >= low && house <= high
}
