use crate::core::validator::sanitize_cep;
use crate::domain::model::{CepCandidate, Confidence, ManualOverrideEntry, MethodId, Specificity};
use crate::utils::error::Result;
use std::collections::HashMap;

/// 人工確認的 CEP 對照表，啟動時載入一次，執行期間唯讀
#[derive(Debug, Clone, Default)]
pub struct ManualOverrideStore {
    entries: HashMap<String, ManualOverrideEntry>,
    version: u32,
}

impl ManualOverrideStore {
    pub fn empty() -> Self {
        Self::default()
    }

    /// CSV 欄位：record_key,cep,address[,version]。
    /// 同一個 key 出現多次時取 version 較高者，相同時取較後面的列。
    pub fn from_csv_bytes(data: &[u8]) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(data);

        let mut store = Self::default();
        for (line, row) in reader.deserialize::<ManualOverrideEntry>().enumerate() {
            let mut entry = row?;
            let Some(cep) = sanitize_cep(&entry.cep) else {
                tracing::warn!(
                    "⚠️ Override line {}: '{}' is not a valid CEP, skipped",
                    line + 2,
                    entry.cep
                );
                continue;
            };
            entry.cep = cep;
            store.insert(entry);
        }

        tracing::info!(
            "📌 Loaded {} manual overrides (version {})",
            store.entries.len(),
            store.version
        );
        Ok(store)
    }

    pub fn from_entries(entries: impl IntoIterator<Item = ManualOverrideEntry>) -> Self {
        let mut store = Self::default();
        for entry in entries {
            store.insert(entry);
        }
        store
    }

    fn insert(&mut self, entry: ManualOverrideEntry) {
        self.version = self.version.max(entry.version);
        match self.entries.get(&entry.record_key) {
            Some(existing) if existing.version > entry.version => {}
            _ => {
                self.entries.insert(entry.record_key.clone(), entry);
            }
        }
    }

    pub fn lookup(&self, record_key: &str) -> Option<CepCandidate> {
        self.entries.get(record_key.trim()).map(|entry| {
            CepCandidate::new(
                entry.cep.clone(),
                MethodId::ManualOverride,
                Specificity::StreetLevel,
                Confidence::Confirmed,
            )
        })
    }

    pub fn entry(&self, record_key: &str) -> Option<&ManualOverrideEntry> {
        self.entries.get(record_key.trim())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 參考資料的最高版本號
    pub fn version(&self) -> u32 {
        self.version
    }
}
