use crate::adapters::http::check_status;
use crate::core::validator::sanitize_cep;
use crate::domain::model::{CepCandidate, Confidence, MethodId, NormalizedAddress, Specificity};
use crate::domain::ports::{CepProvider, ProviderError, ProviderResult, DEFAULT_PROVIDER_TIMEOUT};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

/// 聚合型查詢服務：`GET {base}?uf=&cidade=&logradouro=`
pub struct SecondaryRegistryProvider {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl SecondaryRegistryProvider {
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

    pub(crate) async fn lookup(
        &self,
        address: &NormalizedAddress,
        street: &str,
    ) -> Result<String, ProviderError> {
        tracing::debug!(
            "📡 Secondary registry: {} / {} / {}",
            address.state,
            address.city,
            street
        );

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("uf", address.state.as_str()),
                ("cidade", address.city.as_str()),
                ("logradouro", street),
            ])
            .send()
            .await?;
        check_status(response.status())?;

        let body: Value = serde_json::from_str(&response.text().await?)?;
        first_cep(&body).ok_or(ProviderError::NotFound)
    }
}

#[async_trait]
impl CepProvider for SecondaryRegistryProvider {
    fn id(&self) -> MethodId {
        MethodId::SecondaryRegistry
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn attempt(&self, address: &NormalizedAddress, variant: &str) -> ProviderResult {
        let cep = self.lookup(address, variant).await?;
        Ok(CepCandidate::new(
            cep,
            MethodId::SecondaryRegistry,
            Specificity::StreetLevel,
            Confidence::High,
        ))
    }
}

/// 接受陣列，或帶有 `results` / `dados` 陣列的物件
fn first_cep(body: &Value) -> Option<String> {
    let items = match body {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("results").or_else(|| map.get("dados")) {
            Some(Value::Array(items)) => items,
            _ => return map.get("cep").and_then(cep_text).and_then(|c| sanitize_cep(&c)),
        },
        _ => return None,
    };

    items
        .iter()
        .filter_map(|item| item.get("cep"))
        .filter_map(cep_text)
        .find_map(|cep| sanitize_cep(&cep))
}

fn cep_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(format!("{:08}", n.as_u64()?)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn fortaleza() -> NormalizedAddress {
        NormalizedAddress {
            street: "RUA TOMAS ACIOLI".to_string(),
            number: "721".to_string(),
            city: "FORTALEZA".to_string(),
            state: "CE".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_first_cep_accepts_known_shapes() {
        assert_eq!(first_cep(&json!([{"cep": "60135-180"}])).as_deref(), Some("60135-180"));
        assert_eq!(
            first_cep(&json!({"results": [{"cep": "bad"}, {"cep": "60135180"}]})).as_deref(),
            Some("60135-180")
        );
        assert_eq!(first_cep(&json!({"dados": [{"cep": 60135180}]})).as_deref(), Some("60135-180"));
        assert_eq!(first_cep(&json!({"cep": "60135-180"})).as_deref(), Some("60135-180"));
        assert_eq!(first_cep(&json!({"results": []})), None);
        assert_eq!(first_cep(&json!("nothing")), None);
    }

    #[tokio::test]
    async fn test_attempt_sends_query_parameters() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/search")
                .query_param("uf", "CE")
                .query_param("cidade", "FORTALEZA")
                .query_param("logradouro", "RUA TOMAS ACIOLI");
            then.status(200).json_body(json!({"results": [{"cep": "60135-180"}]}));
        });

        let provider = SecondaryRegistryProvider::new(Client::new(), server.url("/search"));
        let candidate = provider.attempt(&fortaleza(), "RUA TOMAS ACIOLI").await.unwrap();

        mock.assert();
        assert_eq!(candidate.value, "60135-180");
        assert_eq!(candidate.source, MethodId::SecondaryRegistry);
    }

    #[tokio::test]
    async fn test_attempt_not_found() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/search");
            then.status(404);
        });

        let provider = SecondaryRegistryProvider::new(Client::new(), server.url("/search"));
        let result = provider.attempt(&fortaleza(), "RUA TOMAS ACIOLI").await;
        assert_eq!(result.unwrap_err(), ProviderError::NotFound);
    }
}
