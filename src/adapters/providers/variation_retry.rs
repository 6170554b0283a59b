use super::registry::StructuredRegistryProvider;
use super::secondary::SecondaryRegistryProvider;
use crate::core::variation::{self, Variations};
use crate::domain::model::{CepCandidate, Confidence, MethodId, NormalizedAddress, Specificity};
use crate::domain::ports::{CepProvider, ProviderError, ProviderResult, DEFAULT_PROVIDER_TIMEOUT};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// 以街名變體重新查詢兩個目錄服務。完整名稱已在前面的 provider 試過，因此略過第一個變體。
pub struct VariationRetryProvider {
    structured: Option<Arc<StructuredRegistryProvider>>,
    secondary: Option<Arc<SecondaryRegistryProvider>>,
}

impl VariationRetryProvider {
    pub fn new(
        structured: Option<Arc<StructuredRegistryProvider>>,
        secondary: Option<Arc<SecondaryRegistryProvider>>,
    ) -> Self {
        Self {
            structured,
            secondary,
        }
    }
}

#[async_trait]
impl CepProvider for VariationRetryProvider {
    fn id(&self) -> MethodId {
        MethodId::VariationRetry
    }

    /// 每個變體最多呼叫兩個服務
    fn timeout(&self) -> Duration {
        let structured = self
            .structured
            .as_ref()
            .map(|p| p.timeout())
            .unwrap_or_default();
        let secondary = self
            .secondary
            .as_ref()
            .map(|p| p.timeout())
            .unwrap_or_default();
        let total = structured + secondary;
        if total.is_zero() {
            DEFAULT_PROVIDER_TIMEOUT
        } else {
            total
        }
    }

    fn variants(&self, address: &NormalizedAddress) -> Variations {
        let mut variants = variation::generate(&address.street);
        variants.next();
        variants
    }

    async fn attempt(&self, address: &NormalizedAddress, variant: &str) -> ProviderResult {
        let mut last_error = ProviderError::NotFound;

        if let Some(structured) = &self.structured {
            match structured.lookup(address, variant).await {
                Ok(cep) => return Ok(candidate(cep)),
                Err(e @ ProviderError::Transient(_)) => last_error = e,
                Err(ProviderError::NotFound) => {}
            }
        }

        if let Some(secondary) = &self.secondary {
            match secondary.lookup(address, variant).await {
                Ok(cep) => return Ok(candidate(cep)),
                Err(e @ ProviderError::Transient(_)) => last_error = e,
                Err(ProviderError::NotFound) => {}
            }
        }

        Err(last_error)
    }
}

fn candidate(cep: String) -> CepCandidate {
    CepCandidate::new(
        cep,
        MethodId::VariationRetry,
        Specificity::StreetLevel,
        Confidence::Medium,
    )
}
