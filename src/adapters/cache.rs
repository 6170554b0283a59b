use crate::core::validator::sanitize_cep;
use crate::domain::model::{
    CepCandidate, Confidence, MethodId, MethodStep, ResolutionResult, Specificity, StepOutcome,
};
use crate::utils::error::{CepError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

const CACHE_FORMAT_VERSION: u32 = 1;

/// 快取中的一筆解析結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub cep: String,
    pub specificity: Specificity,
    pub method: MethodId,
    pub confidence: Confidence,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub hit_count: u64,
    /// 寫入時的解析路徑，命中時原樣回傳以保持結果一致
    #[serde(default)]
    pub method_chain: Vec<MethodStep>,
}

impl CacheEntry {
    pub fn candidate(&self) -> CepCandidate {
        CepCandidate::new(
            self.cep.clone(),
            self.method,
            self.specificity,
            self.confidence,
        )
    }

    /// 回傳寫入時的結果。解析路徑是冷查詢當時的紀錄（含 `(Cache, Miss)`），
    /// 不會出現 `(Cache, Hit)`，因此同一地址每次取得的結果完全相同。
    pub fn to_result(&self) -> ResolutionResult {
        let chain = if self.method_chain.is_empty() {
            // 舊格式沒有紀錄解析路徑
            vec![
                MethodStep::new(MethodId::ManualOverride, StepOutcome::Miss),
                MethodStep::new(MethodId::Cache, StepOutcome::Hit),
            ]
        } else {
            self.method_chain.clone()
        };
        ResolutionResult::resolved(&self.candidate(), chain)
    }

    fn same_resolution(&self, candidate: &CepCandidate) -> bool {
        self.cep == candidate.value
            && self.specificity == candidate.specificity
            && self.method == candidate.source
            && self.confidence == candidate.confidence
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    entries: BTreeMap<String, serde_json::Value>,
}

/// 條目本身只在寫入時改變；命中次數另外以原子計數，讀取只需要讀鎖
#[derive(Debug)]
struct Slot {
    entry: CacheEntry,
    hits: AtomicU64,
}

impl Slot {
    fn new(entry: CacheEntry) -> Self {
        Self {
            hits: AtomicU64::new(entry.hit_count),
            entry,
        }
    }

    fn snapshot(&self) -> CacheEntry {
        let mut entry = self.entry.clone();
        entry.hit_count = self.hits.load(Ordering::Relaxed);
        entry
    }
}

/// 正規化地址 → CEP 的持久化快取
#[derive(Debug, Default)]
pub struct CepCache {
    entries: RwLock<HashMap<String, Slot>>,
}

impl CepCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 讀取 JSON 快取；損壞的條目當作未命中略過
    pub fn from_json_bytes(data: &[u8]) -> Self {
        let file: CacheFile = match serde_json::from_slice(data) {
            Ok(file) => file,
            Err(e) => {
                let err = CepError::CacheCorrupt {
                    key: "*".to_string(),
                    message: e.to_string(),
                };
                tracing::warn!("⚠️ {} - starting with an empty cache", err);
                return Self::new();
            }
        };

        if file.version != CACHE_FORMAT_VERSION {
            tracing::warn!(
                "⚠️ Cache format version {} differs from {}, loading entries best-effort",
                file.version,
                CACHE_FORMAT_VERSION
            );
        }

        let mut entries = HashMap::with_capacity(file.entries.len());
        for (key, value) in file.entries {
            match serde_json::from_value::<CacheEntry>(value) {
                Ok(entry) if sanitize_cep(&entry.cep).as_deref() == Some(entry.cep.as_str()) => {
                    entries.insert(key, Slot::new(entry));
                }
                Ok(entry) => {
                    let err = CepError::CacheCorrupt {
                        key,
                        message: format!("malformed cep '{}'", entry.cep),
                    };
                    tracing::warn!("⚠️ {}", err);
                }
                Err(e) => {
                    let err = CepError::CacheCorrupt {
                        key,
                        message: e.to_string(),
                    };
                    tracing::warn!("⚠️ {}", err);
                }
            }
        }

        tracing::info!("🗄️ Loaded {} cache entries", entries.len());
        Self {
            entries: RwLock::new(entries),
        }
    }

    pub async fn to_json_bytes(&self) -> Result<Vec<u8>> {
        let entries = self.entries.read().await;
        let mut serialized = BTreeMap::new();
        for (key, slot) in entries.iter() {
            serialized.insert(key.clone(), serde_json::to_value(slot.snapshot())?);
        }
        let file = CacheFile {
            version: CACHE_FORMAT_VERSION,
            entries: serialized,
        };
        Ok(serde_json::to_vec_pretty(&file)?)
    }

    /// 命中時累加 hit_count
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        let entries = self.entries.read().await;
        entries.get(key).map(|slot| {
            let mut entry = slot.entry.clone();
            entry.hit_count = slot.hits.fetch_add(1, Ordering::Relaxed) + 1;
            entry
        })
    }

    pub async fn peek(&self, key: &str) -> Option<CacheEntry> {
        self.entries.read().await.get(key).map(Slot::snapshot)
    }

    /// 冪等寫入：相同結果不會覆寫，不同結果以最後寫入者為準
    pub async fn put(&self, key: &str, candidate: &CepCandidate, method_chain: Vec<MethodStep>) {
        let mut entries = self.entries.write().await;
        if let Some(existing) = entries.get(key).map(|slot| &slot.entry) {
            if existing.same_resolution(candidate) {
                return;
            }
            tracing::debug!(
                "🗄️ Replacing cache entry {} ({} → {})",
                key,
                existing.cep,
                candidate.value
            );
        }
        entries.insert(key.to_string(), Slot::new(Self::entry_for(candidate, method_chain)));
    }

    /// 人工修正：無條件整筆替換
    pub async fn correct(&self, key: &str, candidate: &CepCandidate, method_chain: Vec<MethodStep>) {
        let mut entries = self.entries.write().await;
        tracing::info!("✏️ Correcting cache entry {} → {}", key, candidate.value);
        entries.insert(key.to_string(), Slot::new(Self::entry_for(candidate, method_chain)));
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    fn entry_for(candidate: &CepCandidate, method_chain: Vec<MethodStep>) -> CacheEntry {
        CacheEntry {
            cep: candidate.value.clone(),
            specificity: candidate.specificity,
            method: candidate.source,
            confidence: candidate.confidence,
            timestamp: Utc::now(),
            hit_count: 0,
            method_chain,
        }
    }
}
