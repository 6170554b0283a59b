use crate::core::variation::Variations;
use crate::domain::model::{CepCandidate, EnrichedBatch, MethodId, NormalizedAddress, Record};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(20);

pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
    fn exists(&self, path: &str) -> impl std::future::Future<Output = bool> + Send;
}

#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn extract(&self) -> Result<Vec<Record>>;
    async fn transform(&self, data: Vec<Record>) -> Result<EnrichedBatch>;
    async fn load(&self, batch: EnrichedBatch) -> Result<String>;
}

/// 單次 provider 呼叫失敗的原因
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("not found")]
    NotFound,

    /// 逾時、5xx、格式錯誤的回應，可重試一次
    #[error("transient: {0}")]
    Transient(String),
}

pub type ProviderResult = std::result::Result<CepCandidate, ProviderError>;

/// 一種 CEP 解析策略
#[async_trait]
pub trait CepProvider: Send + Sync {
    fn id(&self) -> MethodId;

    /// 單次呼叫的逾時上限
    fn timeout(&self) -> Duration {
        DEFAULT_PROVIDER_TIMEOUT
    }

    fn requires_street(&self) -> bool {
        true
    }

    /// 只要 city + state 已知就不會失敗的終端 provider
    fn is_terminal(&self) -> bool {
        false
    }

    fn variants(&self, address: &NormalizedAddress) -> Variations {
        Variations::single(&address.street)
    }

    async fn attempt(&self, address: &NormalizedAddress, variant: &str) -> ProviderResult;
}
