//! CEP 解析策略。清單順序即優先順序。

pub mod city_fallback;
pub mod lookup_site;
pub mod registry;
pub mod secondary;
pub mod variation_retry;
pub mod web_search;

pub use city_fallback::{CityLevelFallbackProvider, CityTable};
pub use lookup_site::AuthoritativeLookupSiteProvider;
pub use registry::StructuredRegistryProvider;
pub use secondary::SecondaryRegistryProvider;
pub use variation_retry::VariationRetryProvider;
pub use web_search::WebSearchExtractionProvider;

use crate::config::toml_config::{CascadeConfig, ProvidersConfig};
use crate::domain::ports::CepProvider;
use reqwest::Client;
use std::sync::Arc;

/// 依固定優先序排列的 provider 清單
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn CepProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, provider: Arc<dyn CepProvider>) -> &mut Self {
        self.providers.push(provider);
        self
    }

    /// 目錄 → 聚合服務 → 變體重試 → 網頁搜尋 → 官方查詢 → 城市退路
    pub fn from_config(
        providers: &ProvidersConfig,
        cascade: &CascadeConfig,
        client: &Client,
        city_table: CityTable,
    ) -> Self {
        let mut ordered = Self::new();

        let structured = providers.structured_registry.enabled.then(|| {
            Arc::new(
                StructuredRegistryProvider::new(
                    client.clone(),
                    providers
                        .structured_registry
                        .url_or(registry::DEFAULT_BASE_URL),
                )
                .with_timeout(providers.structured_registry.timeout(cascade)),
            )
        });

        let secondary = match (
            providers.secondary_registry.enabled,
            providers.secondary_registry.base_url.as_deref(),
        ) {
            (true, Some(url)) => Some(Arc::new(
                SecondaryRegistryProvider::new(client.clone(), url)
                    .with_timeout(providers.secondary_registry.timeout(cascade)),
            )),
            _ => None,
        };

        if let Some(structured) = &structured {
            ordered.push(structured.clone());
        }
        if let Some(secondary) = &secondary {
            ordered.push(secondary.clone());
        }

        if providers.variation_retry.enabled && (structured.is_some() || secondary.is_some()) {
            ordered.push(Arc::new(VariationRetryProvider::new(
                structured.clone(),
                secondary.clone(),
            )));
        }

        if providers.web_search.enabled {
            ordered.push(Arc::new(
                WebSearchExtractionProvider::new(
                    client.clone(),
                    providers.web_search.url_or(web_search::DEFAULT_BASE_URL),
                )
                .with_timeout(providers.web_search.timeout(cascade)),
            ));
        }

        if providers.lookup_site.enabled {
            ordered.push(Arc::new(
                AuthoritativeLookupSiteProvider::new(
                    client.clone(),
                    providers.lookup_site.url_or(lookup_site::DEFAULT_BASE_URL),
                )
                .with_timeout(providers.lookup_site.timeout(cascade)),
            ));
        }

        let city = &providers.city_fallback;
        let city_registry_url = city.registry_lookup.then(|| {
            providers
                .structured_registry
                .url_or(registry::DEFAULT_BASE_URL)
                .to_string()
        });
        let city_timeout = city
            .timeout_seconds
            .map(std::time::Duration::from_secs)
            .unwrap_or_else(|| cascade.provider_timeout());
        ordered.push(Arc::new(
            CityLevelFallbackProvider::new(client.clone(), city_registry_url, city_table)
                .with_timeout(city_timeout),
        ));

        tracing::info!(
            "🧭 Provider order: {}",
            ordered
                .providers
                .iter()
                .map(|p| p.id().as_str())
                .collect::<Vec<_>>()
                .join(" → ")
        );
        ordered
    }

    pub fn providers(&self) -> &[Arc<dyn CepProvider>] {
        &self.providers
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl From<Vec<Arc<dyn CepProvider>>> for ProviderRegistry {
    fn from(providers: Vec<Arc<dyn CepProvider>>) -> Self {
        Self { providers }
    }
}
