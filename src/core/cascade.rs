//! CEP 解析流程
//!
//! 人工對照表 → 快取 → 依序嘗試各 provider → 驗證 → 寫回快取。
//! 每個 provider 失敗都在這裡吸收，呼叫端只會拿到 `ResolutionResult`。

use crate::adapters::cache::CepCache;
use crate::adapters::overrides::ManualOverrideStore;
use crate::adapters::providers::ProviderRegistry;
use crate::config::toml_config::CascadeConfig;
use crate::core::normalizer::normalize_address;
use crate::core::validator::{arbitrate, Validator};
use crate::domain::model::{
    Address, CepCandidate, Confidence, FailureKind, MethodId, MethodStep, NormalizedAddress,
    ResolutionResult, Specificity, StepOutcome,
};
use crate::domain::ports::{CepProvider, ProviderError};
use crate::utils::error::CepError;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CascadeSettings {
    /// 暫時性錯誤最多重試幾次（0 或 1）
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub corroborate: bool,
}

impl Default for CascadeSettings {
    fn default() -> Self {
        Self::from(&CascadeConfig::default())
    }
}

impl From<&CascadeConfig> for CascadeSettings {
    fn from(config: &CascadeConfig) -> Self {
        Self {
            max_retries: config.max_retries.min(1),
            retry_backoff: config.retry_backoff(),
            corroborate: config.corroborate,
        }
    }
}

/// 狀態機的各個階段
#[derive(Debug)]
enum State {
    Init,
    ManualLookup,
    CacheLookup,
    ProviderLoop,
    Done(ResolutionResult),
}

pub struct CepResolver {
    providers: ProviderRegistry,
    cache: Arc<CepCache>,
    overrides: Arc<ManualOverrideStore>,
    validator: Validator,
    settings: CascadeSettings,
}

impl CepResolver {
    pub fn new(
        providers: ProviderRegistry,
        cache: Arc<CepCache>,
        overrides: Arc<ManualOverrideStore>,
        validator: Validator,
    ) -> Self {
        Self {
            providers,
            cache,
            overrides,
            validator,
            settings: CascadeSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: CascadeSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn cache(&self) -> &Arc<CepCache> {
        &self.cache
    }

    pub fn settings(&self) -> CascadeSettings {
        self.settings
    }

    /// 解析單一地址。相同輸入在快取已寫入後會得到完全相同的結果。
    pub async fn resolve(&self, address: &Address) -> ResolutionResult {
        let normalized = normalize_address(address);
        let key = normalized.key();
        let mut chain: Vec<MethodStep> = Vec::new();
        let mut state = State::Init;

        loop {
            state = match state {
                State::Init => {
                    let missing = address.missing_geography();
                    if missing.is_empty() {
                        State::ManualLookup
                    } else if let Some(candidate) = self.manual_hit(&normalized) {
                        // 人工對照只看 record key，不需要地理資訊
                        State::Done(ResolutionResult::resolved(
                            &candidate,
                            vec![MethodStep::new(MethodId::ManualOverride, StepOutcome::Hit)],
                        ))
                    } else {
                        let err = CepError::InputIncomplete {
                            missing: missing.join(", "),
                        };
                        tracing::warn!(
                            "⚠️ {} (record {})",
                            err,
                            normalized.record_key.as_deref().unwrap_or("-")
                        );
                        State::Done(ResolutionResult::failed(
                            FailureKind::InputIncomplete,
                            vec![MethodStep::new(MethodId::InputCheck, StepOutcome::Incomplete)],
                        ))
                    }
                }
                State::ManualLookup => match self.manual_hit(&normalized) {
                    Some(candidate) => {
                        chain.push(MethodStep::new(MethodId::ManualOverride, StepOutcome::Hit));
                        State::Done(ResolutionResult::resolved(
                            &candidate,
                            std::mem::take(&mut chain),
                        ))
                    }
                    None => {
                        chain.push(MethodStep::new(MethodId::ManualOverride, StepOutcome::Miss));
                        State::CacheLookup
                    }
                },
                State::CacheLookup => match self.cache.get(&key).await {
                    Some(entry) => {
                        tracing::debug!("🗄️ Cache hit {} → {}", key, entry.cep);
                        State::Done(entry.to_result())
                    }
                    None => {
                        chain.push(MethodStep::new(MethodId::Cache, StepOutcome::Miss));
                        State::ProviderLoop
                    }
                },
                State::ProviderLoop => {
                    let result = self
                        .run_providers(&normalized, std::mem::take(&mut chain))
                        .await;
                    if let (true, Some(cep)) = (result.success, result.final_cep.as_deref()) {
                        if let (Some(specificity), Some(confidence)) =
                            (result.specificity, result.confidence)
                        {
                            let source = result.resolved_by().unwrap_or(MethodId::Cache);
                            let candidate =
                                CepCandidate::new(cep, source, specificity, confidence);
                            self.cache
                                .put(&key, &candidate, result.method_chain.clone())
                                .await;
                        }
                    }
                    State::Done(result)
                }
                State::Done(result) => return result,
            };
        }
    }

    fn manual_hit(&self, normalized: &NormalizedAddress) -> Option<CepCandidate> {
        let record_key = normalized.record_key.as_deref()?;
        let candidate = self.overrides.lookup(record_key)?;
        tracing::debug!("📌 Manual override for {} → {}", record_key, candidate.value);
        Some(candidate)
    }

    async fn run_providers(
        &self,
        address: &NormalizedAddress,
        mut chain: Vec<MethodStep>,
    ) -> ResolutionResult {
        let providers = self.providers.providers();

        for (index, provider) in providers.iter().enumerate() {
            let Some((variant, candidate)) =
                self.first_accepted(provider.as_ref(), address, &mut chain).await
            else {
                continue;
            };

            chain.push(MethodStep::with_variant(
                provider.id(),
                &variant,
                StepOutcome::Accepted,
            ));
            tracing::info!(
                "✅ {} resolved {} via {} ({}, {:?})",
                address.key(),
                candidate.value,
                provider.id(),
                candidate.specificity,
                candidate.confidence
            );

            let chosen = if self.should_corroborate(&candidate) {
                self.corroborate(candidate, &providers[index + 1..], address, &mut chain)
                    .await
            } else {
                candidate
            };
            return ResolutionResult::resolved(&chosen, chain);
        }

        tracing::warn!("❌ No provider resolved {}", address.key());
        ResolutionResult::failed(FailureKind::Exhausted, chain)
    }

    /// 依序嘗試 provider 的所有變體，回傳第一個通過驗證的候選
    async fn first_accepted(
        &self,
        provider: &dyn CepProvider,
        address: &NormalizedAddress,
        chain: &mut Vec<MethodStep>,
    ) -> Option<(String, CepCandidate)> {
        if provider.requires_street() && !address.has_street() {
            chain.push(MethodStep::new(
                provider.id(),
                StepOutcome::Skipped("no street".to_string()),
            ));
            return None;
        }

        let variants = provider.variants(address);
        if variants.len() == 0 {
            chain.push(MethodStep::new(
                provider.id(),
                StepOutcome::Skipped("no variants".to_string()),
            ));
            return None;
        }

        for variant in variants {
            let Some(candidate) = self
                .call_with_policy(provider, address, &variant, chain)
                .await
            else {
                continue;
            };

            match self.validator.validate(&candidate, address) {
                Ok(()) => return Some((variant, candidate)),
                Err(rejection) => {
                    let err = CepError::ValidationRejected {
                        cep: candidate.value.clone(),
                        reason: rejection.to_string(),
                    };
                    tracing::debug!("🚫 {} from {}", err, provider.id());
                    chain.push(MethodStep::with_variant(
                        provider.id(),
                        &variant,
                        StepOutcome::Rejected(rejection.to_string()),
                    ));
                }
            }
        }
        None
    }

    /// 逾時各自計算；暫時性錯誤最多重試一次，查無資料直接換下一個
    async fn call_with_policy(
        &self,
        provider: &dyn CepProvider,
        address: &NormalizedAddress,
        variant: &str,
        chain: &mut Vec<MethodStep>,
    ) -> Option<CepCandidate> {
        let attempts = 1 + self.settings.max_retries;

        for attempt in 1..=attempts {
            let timeout = provider.timeout();
            let outcome = match tokio::time::timeout(timeout, provider.attempt(address, variant))
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(ProviderError::Transient(format!(
                    "timed out after {}s",
                    timeout.as_secs_f32()
                ))),
            };

            match outcome {
                Ok(candidate) => return Some(candidate),
                Err(ProviderError::NotFound) => {
                    let err = CepError::ProviderNotFound {
                        provider: provider.id().to_string(),
                    };
                    tracing::debug!("🔍 {} for '{}'", err, variant);
                    chain.push(MethodStep::with_variant(
                        provider.id(),
                        variant,
                        StepOutcome::NotFound,
                    ));
                    return None;
                }
                Err(ProviderError::Transient(message)) => {
                    let err = CepError::ProviderTransient {
                        provider: provider.id().to_string(),
                        message: message.clone(),
                    };
                    tracing::warn!("⚠️ {} (attempt {}/{})", err, attempt, attempts);
                    chain.push(MethodStep::with_variant(
                        provider.id(),
                        variant,
                        StepOutcome::TransientError(message),
                    ));
                    if attempt < attempts {
                        tokio::time::sleep(self.settings.retry_backoff).await;
                    }
                }
            }
        }
        None
    }

    fn should_corroborate(&self, candidate: &CepCandidate) -> bool {
        self.settings.corroborate
            && candidate.specificity == Specificity::StreetLevel
            && candidate.confidence < Confidence::High
    }

    /// 以剩下的非終端 provider 交叉比對；優先序較高者保留，不一致只記錄
    async fn corroborate(
        &self,
        accepted: CepCandidate,
        remaining: &[Arc<dyn CepProvider>],
        address: &NormalizedAddress,
        chain: &mut Vec<MethodStep>,
    ) -> CepCandidate {
        let mut candidates = vec![accepted.clone()];

        for provider in remaining.iter().filter(|p| !p.is_terminal()) {
            let mut attempts = Vec::new();
            let Some((variant, other)) = self
                .first_accepted(provider.as_ref(), address, &mut attempts)
                .await
            else {
                continue;
            };

            let outcome = if other.value == accepted.value {
                StepOutcome::Corroborated
            } else {
                StepOutcome::Disagreed(other.value.clone())
            };
            chain.push(MethodStep::with_variant(provider.id(), &variant, outcome));
            candidates.push(other);
        }

        arbitrate(&candidates).unwrap_or(accepted)
    }
}
