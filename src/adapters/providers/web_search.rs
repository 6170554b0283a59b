//! SearXNG 搜尋結果中的 CEP 擷取

use crate::adapters::http::{check_status, join_segments};
use crate::core::validator::{arbitrate, extract_ceps, prefix_in_state};
use crate::domain::model::{CepCandidate, Confidence, MethodId, NormalizedAddress, Specificity};
use crate::domain::ports::{CepProvider, ProviderError, ProviderResult, DEFAULT_PROVIDER_TIMEOUT};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
    #[serde(default)]
    infoboxes: Vec<Infobox>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Default, Deserialize)]
struct Infobox {
    #[serde(default)]
    infobox: String,
    #[serde(default)]
    content: String,
}

pub struct WebSearchExtractionProvider {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl WebSearchExtractionProvider {
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
}

/// 「CEP {街道}, {門牌}, {區} {城市} {州}」，空欄位略過
pub fn build_query(address: &NormalizedAddress, street: &str) -> String {
    let head: Vec<&str> = [street, address.number.as_str()]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect();
    let tail: Vec<&str> = [
        address.neighborhood.as_str(),
        address.city.as_str(),
        address.state.as_str(),
    ]
    .into_iter()
    .filter(|part| !part.is_empty())
    .collect();

    let mut query = format!("CEP {}", head.join(", "));
    if !tail.is_empty() {
        if !head.is_empty() {
            query.push(',');
        }
        query.push(' ');
        query.push_str(&tail.join(" "));
    }
    query
}

#[async_trait]
impl CepProvider for WebSearchExtractionProvider {
    fn id(&self) -> MethodId {
        MethodId::WebSearchExtraction
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn attempt(&self, address: &NormalizedAddress, variant: &str) -> ProviderResult {
        let query = build_query(address, variant);
        let url = join_segments(&self.base_url, &["search"])?;
        tracing::debug!("🔎 Web search: {}", query);

        let response = self
            .client
            .get(url)
            .query(&[
                ("q", query.as_str()),
                ("format", "json"),
                ("language", "pt-BR"),
            ])
            .send()
            .await?;
        check_status(response.status())?;
        let body: SearchResponse = serde_json::from_str(&response.text().await?)?;

        let mut seen: Vec<String> = Vec::new();
        let texts = body
            .results
            .iter()
            .flat_map(|r| [r.title.as_str(), r.content.as_str()])
            .chain(
                body.infoboxes
                    .iter()
                    .flat_map(|i| [i.infobox.as_str(), i.content.as_str()]),
            );
        for text in texts {
            for cep in extract_ceps(text) {
                if prefix_in_state(&cep, &address.state) && !seen.contains(&cep) {
                    seen.push(cep);
                }
            }
        }

        let candidates: Vec<CepCandidate> = seen
            .into_iter()
            .map(|cep| {
                CepCandidate::new(
                    cep,
                    MethodId::WebSearchExtraction,
                    Specificity::StreetLevel,
                    Confidence::Low,
                )
            })
            .collect();

        if candidates.len() > 1 {
            tracing::debug!(
                "🔎 Web search returned {} distinct codes for '{}'",
                candidates.len(),
                query
            );
        }
        arbitrate(&candidates).ok_or(ProviderError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn belem() -> NormalizedAddress {
        NormalizedAddress {
            street: "RUA SAO JOAO DEL REY".to_string(),
            number: "123".to_string(),
            neighborhood: "CENTRO".to_string(),
            city: "BELEM".to_string(),
            state: "PA".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_build_query() {
        assert_eq!(
            build_query(&belem(), "RUA SAO JOAO DEL REY"),
            "CEP RUA SAO JOAO DEL REY, 123, CENTRO BELEM PA"
        );
        let bare = NormalizedAddress {
            city: "BELEM".to_string(),
            state: "PA".to_string(),
            ..Default::default()
        };
        assert_eq!(build_query(&bare, "RUA A"), "CEP RUA A, BELEM PA");
    }

    #[tokio::test]
    async fn test_extracts_first_in_state_code() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/search")
                .query_param("format", "json")
                .query_param("language", "pt-BR");
            then.status(200).json_body(json!({
                "results": [
                    {"title": "Rua São João Del Rey - São Paulo", "content": "CEP 01010-000"},
                    {"title": "Rua São João Del Rey, Belém", "content": "CEP 66020-240, Centro"},
                    {"title": "Outra", "content": "66020250"}
                ],
                "infoboxes": [{"infobox": "Belém", "content": "66020-240"}]
            }));
        });

        let provider = WebSearchExtractionProvider::new(Client::new(), server.base_url());
        let candidate = provider.attempt(&belem(), "RUA SAO JOAO DEL REY").await.unwrap();

        mock.assert();
        assert_eq!(candidate.value, "66020-240");
        assert_eq!(candidate.specificity, Specificity::StreetLevel);
        assert_eq!(candidate.confidence, Confidence::Low);
    }

    #[tokio::test]
    async fn test_no_code_in_state_is_not_found() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/search");
            then.status(200)
                .json_body(json!({"results": [{"title": "x", "content": "CEP 01010-000"}]}));
        });

        let provider = WebSearchExtractionProvider::new(Client::new(), server.base_url());
        let result = provider.attempt(&belem(), "RUA SAO JOAO DEL REY").await;
        assert_eq!(result.unwrap_err(), ProviderError::NotFound);
    }
}
