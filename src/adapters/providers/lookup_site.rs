use crate::adapters::http::check_status;
use crate::core::validator::{prefix_in_state, sanitize_cep};
use crate::domain::model::{CepCandidate, Confidence, MethodId, NormalizedAddress, Specificity};
use crate::domain::ports::{CepProvider, ProviderError, ProviderResult, DEFAULT_PROVIDER_TIMEOUT};
use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str =
    "https://buscacepinter.correios.com.br/app/endereco/carrega-cep-endereco.php";

/// 郵政官方查詢表單。回應可能是 JSON（`dados[].cep`）或 HTML 結果表格。
pub struct AuthoritativeLookupSiteProvider {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl AuthoritativeLookupSiteProvider {
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

/// 「{街道}, {門牌}, {城市}/{UF}」
pub fn form_address(address: &NormalizedAddress, street: &str) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(3);
    if !street.is_empty() {
        parts.push(street.to_string());
    }
    if !address.number.is_empty() {
        parts.push(address.number.clone());
    }
    parts.push(format!("{}/{}", address.city, address.state));
    parts.join(", ")
}

#[async_trait]
impl CepProvider for AuthoritativeLookupSiteProvider {
    fn id(&self) -> MethodId {
        MethodId::AuthoritativeLookupSite
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn attempt(&self, address: &NormalizedAddress, variant: &str) -> ProviderResult {
        let endereco = form_address(address, variant);
        tracing::debug!("🏤 Lookup site: {}", endereco);

        let response = self
            .client
            .post(&self.base_url)
            .form(&[("endereco", endereco.as_str()), ("tipoCEP", "ALL")])
            .send()
            .await?;
        check_status(response.status())?;
        let body = response.text().await?;

        let ceps = match serde_json::from_str::<serde_json::Value>(&body) {
            Ok(json) => ceps_from_json(&json),
            Err(_) => ceps_from_html(&body),
        };

        ceps.into_iter()
            .find(|cep| prefix_in_state(cep, &address.state))
            .map(|cep| {
                CepCandidate::new(
                    cep,
                    MethodId::AuthoritativeLookupSite,
                    Specificity::StreetLevel,
                    Confidence::Medium,
                )
            })
            .ok_or(ProviderError::NotFound)
    }
}

fn ceps_from_json(json: &serde_json::Value) -> Vec<String> {
    json.get("dados")
        .and_then(|d| d.as_array())
        .map(|rows| {
            rows.iter()
                .filter_map(|row| row.get("cep").and_then(|c| c.as_str()))
                .filter_map(sanitize_cep)
                .collect()
        })
        .unwrap_or_default()
}

/// `#resultado-DNEC` 表格的第四欄
fn ceps_from_html(body: &str) -> Vec<String> {
    let document = Html::parse_document(body);
    let (Ok(row_selector), Ok(cell_selector)) = (
        Selector::parse("#resultado-DNEC tr"),
        Selector::parse("td"),
    ) else {
        return Vec::new();
    };

    document
        .select(&row_selector)
        .filter_map(|row| {
            let cell = row.select(&cell_selector).nth(3)?;
            let text: String = cell.text().collect();
            sanitize_cep(&text)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    const RESULT_PAGE: &str = r#"
<html><body>
<table id="resultado-DNEC">
  <thead><tr><th>Logradouro</th><th>Bairro</th><th>Localidade/UF</th><th>CEP</th></tr></thead>
  <tbody>
    <tr><td>Rua Tomás Acioli</td><td>Joaquim Távora</td><td>Fortaleza/CE</td><td>60135-180</td></tr>
    <tr><td>Rua Tomás Acioli - até 500</td><td>Meireles</td><td>Fortaleza/CE</td><td>60135-181</td></tr>
  </tbody>
</table>
</body></html>"#;

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
    fn test_form_address() {
        assert_eq!(
            form_address(&fortaleza(), "RUA TOMAS ACIOLI"),
            "RUA TOMAS ACIOLI, 721, FORTALEZA/CE"
        );
    }

    #[test]
    fn test_parse_html_table() {
        assert_eq!(ceps_from_html(RESULT_PAGE), vec!["60135-180", "60135-181"]);
        assert!(ceps_from_html("<html><body>nada</body></html>").is_empty());
    }

    #[test]
    fn test_parse_json_dados() {
        let json = serde_json::json!({"erro": false, "dados": [{"cep": "60135180"}, {"cep": ""}]});
        assert_eq!(ceps_from_json(&json), vec!["60135-180"]);
    }

    #[tokio::test]
    async fn test_attempt_posts_form() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/carrega-cep-endereco.php")
                .body_contains("tipoCEP=ALL")
                .body_contains("endereco=");
            then.status(200)
                .header("Content-Type", "text/html")
                .body(RESULT_PAGE);
        });

        let provider = AuthoritativeLookupSiteProvider::new(
            Client::new(),
            server.url("/carrega-cep-endereco.php"),
        );
        let candidate = provider.attempt(&fortaleza(), "RUA TOMAS ACIOLI").await.unwrap();

        mock.assert();
        assert_eq!(candidate.value, "60135-180");
        assert_eq!(candidate.confidence, Confidence::Medium);
    }

    #[tokio::test]
    async fn test_out_of_state_results_are_not_found() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST);
            then.status(200)
                .json_body(serde_json::json!({"dados": [{"cep": "01010-000"}]}));
        });

        let provider = AuthoritativeLookupSiteProvider::new(Client::new(), server.base_url());
        let result = provider.attempt(&fortaleza(), "RUA TOMAS ACIOLI").await;
        assert_eq!(result.unwrap_err(), ProviderError::NotFound);
    }
}
