use crate::utils::error::{CepError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// 批次輸入的一列原始資料（CSV 欄位名 → 值）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub data: HashMap<String, String>,
}

impl Record {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.data
            .get(column)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

/// 待解析 CEP 的地址，建構後不可變
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    street: Option<String>,
    number: Option<String>,
    complement: Option<String>,
    neighborhood: Option<String>,
    city: Option<String>,
    state: Option<String>,
    raw: Option<String>,
    record_key: Option<String>,
}

impl Address {
    pub fn builder() -> AddressBuilder {
        AddressBuilder::default()
    }

    pub fn street(&self) -> Option<&str> {
        self.street.as_deref()
    }

    pub fn number(&self) -> Option<&str> {
        self.number.as_deref()
    }

    pub fn complement(&self) -> Option<&str> {
        self.complement.as_deref()
    }

    pub fn neighborhood(&self) -> Option<&str> {
        self.neighborhood.as_deref()
    }

    pub fn city(&self) -> Option<&str> {
        self.city.as_deref()
    }

    pub fn state(&self) -> Option<&str> {
        self.state.as_deref()
    }

    pub fn raw(&self) -> Option<&str> {
        self.raw.as_deref()
    }

    pub fn record_key(&self) -> Option<&str> {
        self.record_key.as_deref()
    }

    /// 缺少的地理欄位（city / state）
    pub fn missing_geography(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.city.is_none() {
            missing.push("city");
        }
        if self.state.is_none() {
            missing.push("state");
        }
        missing
    }

    pub fn has_geography(&self) -> bool {
        self.missing_geography().is_empty()
    }
}

#[derive(Debug, Default)]
pub struct AddressBuilder {
    inner: Address,
}

fn non_blank(value: impl Into<String>) -> Option<String> {
    let value = value.into();
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl AddressBuilder {
    pub fn street(mut self, value: impl Into<String>) -> Self {
        self.inner.street = non_blank(value);
        self
    }

    pub fn number(mut self, value: impl Into<String>) -> Self {
        self.inner.number = non_blank(value);
        self
    }

    pub fn complement(mut self, value: impl Into<String>) -> Self {
        self.inner.complement = non_blank(value);
        self
    }

    pub fn neighborhood(mut self, value: impl Into<String>) -> Self {
        self.inner.neighborhood = non_blank(value);
        self
    }

    pub fn city(mut self, value: impl Into<String>) -> Self {
        self.inner.city = non_blank(value);
        self
    }

    pub fn state(mut self, value: impl Into<String>) -> Self {
        self.inner.state = non_blank(value);
        self
    }

    pub fn raw(mut self, value: impl Into<String>) -> Self {
        self.inner.raw = non_blank(value);
        self
    }

    pub fn record_key(mut self, value: impl Into<String>) -> Self {
        self.inner.record_key = non_blank(value);
        self
    }

    pub fn build(mut self) -> Result<Address> {
        if let Some(state) = self.inner.state.take() {
            if state.len() != 2 || !state.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(CepError::InvalidAddress {
                    field: "state".to_string(),
                    reason: format!("'{}' is not a two-letter UF code", state),
                });
            }
            self.inner.state = Some(state.to_ascii_uppercase());
        }
        Ok(self.inner)
    }
}

/// 正規化後的地址，作為快取鍵
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NormalizedAddress {
    pub street: String,
    pub number: String,
    pub complement: String,
    pub neighborhood: String,
    pub city: String,
    pub state: String,
    pub record_key: Option<String>,
}

impl NormalizedAddress {
    pub fn key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.state, self.city, self.street, self.number
        )
    }

    pub fn has_street(&self) -> bool {
        !self.street.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Specificity {
    StreetLevel,
    CityLevel,
}

impl Specificity {
    /// 數值越大越精確
    pub fn rank(self) -> u8 {
        match self {
            Specificity::StreetLevel => 2,
            Specificity::CityLevel => 1,
        }
    }
}

impl fmt::Display for Specificity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Specificity::StreetLevel => write!(f, "STREET_LEVEL"),
            Specificity::CityLevel => write!(f, "CITY_LEVEL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
    Confirmed,
}

/// 每個解析步驟的來源識別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MethodId {
    #[serde(rename = "InputCheck")]
    InputCheck,
    #[serde(rename = "ManualOverride")]
    ManualOverride,
    #[serde(rename = "Cache")]
    Cache,
    #[serde(rename = "StructuredRegistryProvider")]
    StructuredRegistry,
    #[serde(rename = "SecondaryRegistryProvider")]
    SecondaryRegistry,
    #[serde(rename = "VariationRetryProvider")]
    VariationRetry,
    #[serde(rename = "WebSearchExtractionProvider")]
    WebSearchExtraction,
    #[serde(rename = "AuthoritativeLookupSiteProvider")]
    AuthoritativeLookupSite,
    #[serde(rename = "CityLevelFallbackProvider")]
    CityLevelFallback,
}

impl MethodId {
    pub fn as_str(self) -> &'static str {
        match self {
            MethodId::InputCheck => "InputCheck",
            MethodId::ManualOverride => "ManualOverride",
            MethodId::Cache => "Cache",
            MethodId::StructuredRegistry => "StructuredRegistryProvider",
            MethodId::SecondaryRegistry => "SecondaryRegistryProvider",
            MethodId::VariationRetry => "VariationRetryProvider",
            MethodId::WebSearchExtraction => "WebSearchExtractionProvider",
            MethodId::AuthoritativeLookupSite => "AuthoritativeLookupSiteProvider",
            MethodId::CityLevelFallback => "CityLevelFallbackProvider",
        }
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CepCandidate {
    pub value: String,
    pub source: MethodId,
    pub specificity: Specificity,
    pub confidence: Confidence,
}

impl CepCandidate {
    pub fn new(
        value: impl Into<String>,
        source: MethodId,
        specificity: Specificity,
        confidence: Confidence,
    ) -> Self {
        Self {
            value: value.into(),
            source,
            specificity,
            confidence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum StepOutcome {
    Hit,
    Miss,
    Accepted,
    Rejected(String),
    NotFound,
    TransientError(String),
    Skipped(String),
    Incomplete,
    Corroborated,
    Disagreed(String),
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::Hit => write!(f, "hit"),
            StepOutcome::Miss => write!(f, "miss"),
            StepOutcome::Accepted => write!(f, "accepted"),
            StepOutcome::Rejected(reason) => write!(f, "rejected({})", reason),
            StepOutcome::NotFound => write!(f, "not_found"),
            StepOutcome::TransientError(message) => write!(f, "transient({})", message),
            StepOutcome::Skipped(reason) => write!(f, "skipped({})", reason),
            StepOutcome::Incomplete => write!(f, "incomplete"),
            StepOutcome::Corroborated => write!(f, "corroborated"),
            StepOutcome::Disagreed(cep) => write!(f, "disagreed({})", cep),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodStep {
    pub provider: MethodId,
    pub variant: Option<String>,
    pub outcome: StepOutcome,
}

impl MethodStep {
    pub fn new(provider: MethodId, outcome: StepOutcome) -> Self {
        Self {
            provider,
            variant: None,
            outcome,
        }
    }

    pub fn with_variant(provider: MethodId, variant: &str, outcome: StepOutcome) -> Self {
        Self {
            provider,
            variant: Some(variant.to_string()).filter(|v| !v.is_empty()),
            outcome,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InputIncomplete,
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionResult {
    pub final_cep: Option<String>,
    pub specificity: Option<Specificity>,
    pub confidence: Option<Confidence>,
    pub method_chain: Vec<MethodStep>,
    pub success: bool,
    pub failure: Option<FailureKind>,
}

impl ResolutionResult {
    pub fn resolved(candidate: &CepCandidate, method_chain: Vec<MethodStep>) -> Self {
        Self {
            final_cep: Some(candidate.value.clone()),
            specificity: Some(candidate.specificity),
            confidence: Some(candidate.confidence),
            method_chain,
            success: true,
            failure: None,
        }
    }

    pub fn failed(kind: FailureKind, method_chain: Vec<MethodStep>) -> Self {
        Self {
            final_cep: None,
            specificity: None,
            confidence: None,
            method_chain,
            success: false,
            failure: Some(kind),
        }
    }

    /// 被接受的步驟（最終結果的來源）
    pub fn resolved_by(&self) -> Option<MethodId> {
        self.method_chain
            .iter()
            .rev()
            .find(|step| matches!(step.outcome, StepOutcome::Accepted | StepOutcome::Hit))
            .map(|step| step.provider)
    }

    pub fn is_low_confidence(&self) -> bool {
        matches!(self.confidence, Some(c) if c < Confidence::High)
    }
}

/// 人工確認的 CEP 參考資料
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualOverrideEntry {
    pub record_key: String,
    pub cep: String,
    pub address: String,
    #[serde(default)]
    pub version: u32,
}

/// 批次處理後的輸出
#[derive(Debug, Clone, Default)]
pub struct EnrichedBatch {
    pub headers: Vec<String>,
    pub records: Vec<Record>,
    pub summary: BatchSummary,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub passed_through: usize,
    pub street_level: usize,
    pub city_level: usize,
    pub failed: usize,
}
