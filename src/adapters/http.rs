use crate::domain::ports::ProviderError;
use crate::utils::error::Result;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use url::Url;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// 所有 provider 共用設定的 HTTP client；每個 provider 持有自己的 clone
pub fn build_client(user_agent: &str, timeout: Duration) -> Result<Client> {
    let client = Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .build()?;
    Ok(client)
}

/// 404 → NotFound；5xx / 429 → Transient；其他非 2xx 視為查無資料
pub fn check_status(status: StatusCode) -> std::result::Result<(), ProviderError> {
    if status.is_success() {
        return Ok(());
    }
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return Err(ProviderError::Transient(format!("HTTP {}", status)));
    }
    Err(ProviderError::NotFound)
}

/// 在 base URL 後面附加路徑片段（會做百分比編碼）。
/// 最後一個片段為空字串時保留結尾斜線。
pub fn join_segments(base: &str, segments: &[&str]) -> std::result::Result<Url, ProviderError> {
    let mut url = Url::parse(base)
        .map_err(|e| ProviderError::Transient(format!("invalid base url {}: {}", base, e)))?;
    url.path_segments_mut()
        .map_err(|_| ProviderError::Transient(format!("base url {} cannot carry a path", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

impl From<reqwest::Error> for ProviderError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            ProviderError::Transient("timeout".to_string())
        } else if let Some(status) = error.status() {
            ProviderError::Transient(format!("HTTP {}", status))
        } else {
            ProviderError::Transient(error.to_string())
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(error: serde_json::Error) -> Self {
        ProviderError::Transient(format!("malformed payload: {}", error))
    }
}
