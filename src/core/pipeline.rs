//! CSV 批次補齊 CEP
//!
//! extract 讀取輸入 CSV，transform 把每一列交給解析池，load 寫出加上
//! `cep_status` / `cep_method` / `cep_specificity` 欄位的 CSV 並保存快取。

use crate::adapters::cache::CepCache;
use crate::adapters::http::build_client;
use crate::adapters::overrides::ManualOverrideStore;
use crate::adapters::providers::{CityTable, ProviderRegistry};
use crate::config::toml_config::{CepConfig, InputConfig};
use crate::core::cascade::{CascadeSettings, CepResolver};
use crate::core::engine::ResolutionPool;
use crate::core::validator::{sanitize_cep, Validator};
use crate::domain::model::{
    Address, BatchSummary, EnrichedBatch, FailureKind, Record, ResolutionResult, Specificity,
};
use crate::domain::ports::{Pipeline, Storage};
use crate::utils::error::{CepError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub const STATUS_COLUMN: &str = "cep_status";
pub const METHOD_COLUMN: &str = "cep_method";
pub const SPECIFICITY_COLUMN: &str = "cep_specificity";

pub const STATUS_PRESENT: &str = "PRESENT";
pub const STATUS_RESOLVED: &str = "RESOLVED";
pub const STATUS_LOW_CONFIDENCE: &str = "LOW_CONFIDENCE";
pub const STATUS_INPUT_INCOMPLETE: &str = "INPUT_INCOMPLETE";
pub const STATUS_NOT_FOUND: &str = "NOT_FOUND";

pub struct EnrichmentPipeline<S: Storage> {
    storage: S,
    config: CepConfig,
    pool: ResolutionPool,
    headers: Mutex<Vec<String>>,
    shutdown: Arc<Notify>,
}

impl<S: Storage> EnrichmentPipeline<S> {
    pub fn new(storage: S, config: CepConfig, resolver: Arc<CepResolver>) -> Self {
        let pool = ResolutionPool::new(resolver, config.workers());
        Self {
            storage,
            config,
            pool,
            headers: Mutex::new(Vec::new()),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// 依配置載入參考資料、快取與 provider 清單
    pub async fn from_config(storage: S, config: CepConfig) -> Result<Self> {
        let client = build_client(
            &config.resolver.user_agent,
            config.cascade.provider_timeout(),
        )?;

        let overrides = match &config.overrides.path {
            Some(path) => {
                let data = storage.read_file(path).await?;
                ManualOverrideStore::from_csv_bytes(&data)?
            }
            None => ManualOverrideStore::empty(),
        };

        let cache = if config.cache.enabled && storage.exists(&config.cache.path).await {
            CepCache::from_json_bytes(&storage.read_file(&config.cache.path).await?)
        } else {
            CepCache::new()
        };

        let city_table = match &config.providers.city_fallback.reference_csv {
            Some(path) => CityTable::from_csv_bytes(&storage.read_file(path).await?)?,
            None => CityTable::default(),
        };

        let registry =
            ProviderRegistry::from_config(&config.providers, &config.cascade, &client, city_table);
        let validator = Validator::new(config.validation.extra_placeholders.clone());
        let resolver = CepResolver::new(registry, Arc::new(cache), Arc::new(overrides), validator)
            .with_settings(CascadeSettings::from(&config.cascade));

        Ok(Self::new(storage, config, Arc::new(resolver)))
    }

    /// 通知後中止進行中的解析
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    pub fn resolver(&self) -> &Arc<CepResolver> {
        self.pool.resolver()
    }

    fn parse_csv(data: &[u8]) -> Result<(Vec<String>, Vec<Record>)> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(data);
        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

        let mut records = Vec::new();
        for row in reader.records() {
            let row = row?;
            let data: HashMap<String, String> = headers
                .iter()
                .zip(row.iter())
                .map(|(header, value)| (header.clone(), value.to_string()))
                .collect();
            records.push(Record { data });
        }
        Ok((headers, records))
    }

    /// 快取停用時不寫檔
    async fn persist_cache(&self) -> Result<()> {
        if !self.config.cache.enabled {
            return Ok(());
        }
        let cache = self.resolver().cache();
        let bytes = cache.to_json_bytes().await?;
        self.storage.write_file(&self.config.cache.path, &bytes).await?;
        tracing::info!(
            "🗄️ Saved {} cache entries to {}",
            cache.len().await,
            self.config.cache.path
        );
        Ok(())
    }

    fn output_headers(&self) -> Result<Vec<String>> {
        let mut headers = self
            .headers
            .lock()
            .map_err(|e| CepError::ProcessingError {
                message: format!("header lock poisoned: {}", e),
            })?
            .clone();
        for column in [
            self.config.input.cep_column.as_str(),
            STATUS_COLUMN,
            METHOD_COLUMN,
            SPECIFICITY_COLUMN,
        ] {
            if !headers.iter().any(|h| h == column) {
                headers.push(column.to_string());
            }
        }
        Ok(headers)
    }
}

fn optional<'a>(record: &'a Record, column: &Option<String>) -> Option<&'a str> {
    column.as_deref().and_then(|c| record.get(c))
}

/// 依欄位對應把一列轉成地址；州欄位無效時當作缺少
pub fn address_from_record(record: &Record, input: &InputConfig) -> Address {

    let record_key = input
        .record_key_columns
        .iter()
        .map(|column| record.get(column))
        .collect::<Option<Vec<&str>>>()
        .filter(|parts| !parts.is_empty())
        .map(|parts| parts.join(&input.record_key_separator));

    let builder = || {
        let mut builder = Address::builder();
        if let Some(street) = record.get(&input.street_column) {
            builder = builder.street(street);
        }
        if let Some(number) = optional(record, &input.number_column) {
            builder = builder.number(number);
        }
        if let Some(complement) = optional(record, &input.complement_column) {
            builder = builder.complement(complement);
        }
        if let Some(neighborhood) = optional(record, &input.neighborhood_column) {
            builder = builder.neighborhood(neighborhood);
        }
        if let Some(city) = record.get(&input.city_column) {
            builder = builder.city(city);
        }
        if let Some(raw) = optional(record, &input.raw_column) {
            builder = builder.raw(raw);
        }
        if let Some(key) = &record_key {
            builder = builder.record_key(key.as_str());
        }
        builder
    };

    let with_state = match record.get(&input.state_column) {
        Some(state) => builder().state(state).build(),
        None => builder().build(),
    };

    match with_state {
        Ok(address) => address,
        Err(e) => {
            tracing::warn!("⚠️ {} - treating state as missing", e);
            builder().build().unwrap_or_default()
        }
    }
}

fn annotate(record: &mut Record, cep_column: &str, result: &ResolutionResult) {
    let status = match (result.success, result.failure) {
        (true, _) if result.is_low_confidence() => STATUS_LOW_CONFIDENCE,
        (true, _) => STATUS_RESOLVED,
        (false, Some(FailureKind::InputIncomplete)) => STATUS_INPUT_INCOMPLETE,
        (false, _) => STATUS_NOT_FOUND,
    };

    if let Some(cep) = &result.final_cep {
        record.data.insert(cep_column.to_string(), cep.clone());
    }
    record
        .data
        .insert(STATUS_COLUMN.to_string(), status.to_string());
    record.data.insert(
        METHOD_COLUMN.to_string(),
        result
            .resolved_by()
            .map(|method| method.to_string())
            .unwrap_or_default(),
    );
    record.data.insert(
        SPECIFICITY_COLUMN.to_string(),
        result
            .specificity
            .map(|s| s.to_string())
            .unwrap_or_default(),
    );
}

fn tally(summary: &mut BatchSummary, result: &ResolutionResult) {
    match (result.success, result.specificity) {
        (true, Some(Specificity::StreetLevel)) => summary.street_level += 1,
        (true, _) => summary.city_level += 1,
        (false, _) => summary.failed += 1,
    }
}

#[async_trait::async_trait]
impl<S: Storage> Pipeline for EnrichmentPipeline<S> {
    async fn extract(&self) -> Result<Vec<Record>> {
        let path = &self.config.input.path;
        tracing::debug!("📂 Reading input from {}", path);
        let data = self.storage.read_file(path).await?;
        let (headers, records) = Self::parse_csv(&data)?;

        if !headers.iter().any(|h| h == &self.config.input.city_column) {
            tracing::warn!(
                "⚠️ Input has no '{}' column; every row will be incomplete",
                self.config.input.city_column
            );
        }

        *self.headers.lock().map_err(|e| CepError::ProcessingError {
            message: format!("header lock poisoned: {}", e),
        })? = headers;
        Ok(records)
    }

    async fn transform(&self, data: Vec<Record>) -> Result<EnrichedBatch> {
        let input = &self.config.input;
        let mut records = data;
        let mut summary = BatchSummary {
            total: records.len(),
            ..Default::default()
        };

        let mut pending: Vec<usize> = Vec::new();
        let mut addresses: Vec<Address> = Vec::new();
        for (index, record) in records.iter_mut().enumerate() {
            let existing = record.get(&input.cep_column).and_then(sanitize_cep);
            match existing {
                Some(_) => {
                    record
                        .data
                        .insert(STATUS_COLUMN.to_string(), STATUS_PRESENT.to_string());
                    summary.passed_through += 1;
                }
                None => {
                    pending.push(index);
                    addresses.push(address_from_record(record, input));
                }
            }
        }

        tracing::info!(
            "🔄 Resolving {} of {} records with {} workers",
            addresses.len(),
            records.len(),
            self.pool.workers()
        );

        let shutdown = Arc::clone(&self.shutdown);
        let results = match self
            .pool
            .run_until(addresses, async move { shutdown.notified().await })
            .await
        {
            Ok(results) => results,
            Err(e) => {
                // 中止前已寫入快取的結果都通過驗證，先存檔再回報
                self.persist_cache().await?;
                return Err(e);
            }
        };

        for (index, result) in pending.into_iter().zip(results.iter()) {
            annotate(&mut records[index], &input.cep_column, result);
            tally(&mut summary, result);
        }

        Ok(EnrichedBatch {
            headers: self.output_headers()?,
            records,
            summary,
        })
    }

    async fn load(&self, batch: EnrichedBatch) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&batch.headers)?;
        for record in &batch.records {
            writer.write_record(
                batch
                    .headers
                    .iter()
                    .map(|header| record.data.get(header).map(String::as_str).unwrap_or("")),
            )?;
        }
        let data = writer.into_inner().map_err(|e| CepError::ProcessingError {
            message: format!("failed to flush CSV: {}", e),
        })?;

        let output_path = self.config.output.path.clone();
        self.storage.write_file(&output_path, &data).await?;
        tracing::info!("💾 Wrote {} rows to {}", batch.records.len(), output_path);

        self.persist_cache().await?;
        Ok(output_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{
        CepCandidate, Confidence, MethodId, NormalizedAddress,
    };
    use crate::domain::ports::{CepProvider, ProviderError, ProviderResult};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Mutex as AsyncMutex;

    #[derive(Clone)]
    struct MockStorage {
        files: Arc<AsyncMutex<HashMap<String, Vec<u8>>>>,
    }

    impl MockStorage {
        fn with_file(path: &str, data: &str) -> Self {
            let mut files = HashMap::new();
            files.insert(path.to_string(), data.as_bytes().to_vec());
            Self {
                files: Arc::new(AsyncMutex::new(files)),
            }
        }

        async fn get_file(&self, path: &str) -> Option<String> {
            let files = self.files.lock().await;
            files
                .get(path)
                .map(|data| String::from_utf8_lossy(data).to_string())
        }
    }

    impl Storage for MockStorage {
        async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
            let files = self.files.lock().await;
            files.get(path).cloned().ok_or_else(|| {
                CepError::IoError(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("File not found: {}", path),
                ))
            })
        }

        async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
            let mut files = self.files.lock().await;
            files.insert(path.to_string(), data.to_vec());
            Ok(())
        }

        async fn exists(&self, path: &str) -> bool {
            self.files.lock().await.contains_key(path)
        }
    }

    /// 只認得 Perrella 的目錄服務
    struct PerrellaRegistry;

    #[async_trait]
    impl CepProvider for PerrellaRegistry {
        fn id(&self) -> MethodId {
            MethodId::StructuredRegistry
        }

        async fn attempt(&self, _address: &NormalizedAddress, variant: &str) -> ProviderResult {
            if variant == "RUA PERRELLA" {
                Ok(CepCandidate::new(
                    "09781-330",
                    MethodId::StructuredRegistry,
                    Specificity::StreetLevel,
                    Confidence::High,
                ))
            } else {
                Err(ProviderError::NotFound)
            }
        }
    }

    const INPUT: &str = "\
crm,nome,endereco,numero,cidade,uf,cep
209301,Dra. Ana,\"Rua Perrella, 331\",,São Bernardo do Campo,SP,
111,Dr. Beto,Rua Qualquer,10,Fortaleza,CE,60175047
222,Dr. Caio,Rua Sem Cidade,5,,SP,
333,Dra. Duda,Rua Desconhecida,7,Campinas,SP,
";

    /// Perrella 立即回應，其他街道要等很久
    struct SlowRegistry;

    #[async_trait]
    impl CepProvider for SlowRegistry {
        fn id(&self) -> MethodId {
            MethodId::StructuredRegistry
        }

        async fn attempt(&self, address: &NormalizedAddress, variant: &str) -> ProviderResult {
            if variant != "RUA PERRELLA" {
                tokio::time::sleep(Duration::from_secs(10)).await;
            }
            PerrellaRegistry.attempt(address, variant).await
        }
    }

    fn pipeline(storage: MockStorage) -> EnrichmentPipeline<MockStorage> {
        pipeline_with(storage, Arc::new(PerrellaRegistry))
    }

    fn pipeline_with(
        storage: MockStorage,
        provider: Arc<dyn CepProvider>,
    ) -> EnrichmentPipeline<MockStorage> {
        let mut config = CepConfig::default();
        config.input.path = "in.csv".to_string();
        config.output.path = "out.csv".to_string();
        config.cache.path = "cache.json".to_string();

        let resolver = CepResolver::new(
            ProviderRegistry::from(vec![provider]),
            Arc::new(CepCache::new()),
            Arc::new(ManualOverrideStore::empty()),
            Validator::default(),
        );
        EnrichmentPipeline::new(storage, config, Arc::new(resolver))
    }

    #[test]
    fn test_address_from_record_builds_key_and_drops_bad_state() {
        let input = InputConfig::default();
        let mut record = Record::default();
        record.data.insert("crm".to_string(), "209301".to_string());
        record.data.insert("uf".to_string(), "SP".to_string());
        record.data.insert("cidade".to_string(), "Santos".to_string());
        record.data.insert("endereco".to_string(), "Rua A".to_string());

        let address = address_from_record(&record, &input);
        assert_eq!(address.record_key(), Some("209301-SP"));
        assert_eq!(address.state(), Some("SP"));

        record.data.insert("uf".to_string(), "São Paulo".to_string());
        let address = address_from_record(&record, &input);
        assert_eq!(address.state(), None);
        assert_eq!(address.city(), Some("Santos"));
    }

    #[tokio::test]
    async fn test_transform_annotates_every_row() {
        let storage = MockStorage::with_file("in.csv", INPUT);
        let pipeline = pipeline(storage);

        let records = pipeline.extract().await.unwrap();
        assert_eq!(records.len(), 4);

        let batch = pipeline.transform(records).await.unwrap();
        assert_eq!(
            batch.summary,
            BatchSummary {
                total: 4,
                passed_through: 1,
                street_level: 1,
                city_level: 0,
                failed: 2,
            }
        );

        let rows = &batch.records;
        assert_eq!(rows[0].get("cep"), Some("09781-330"));
        assert_eq!(rows[0].get(STATUS_COLUMN), Some(STATUS_RESOLVED));
        assert_eq!(rows[0].get(METHOD_COLUMN), Some("StructuredRegistryProvider"));
        assert_eq!(rows[0].get(SPECIFICITY_COLUMN), Some("STREET_LEVEL"));
        assert_eq!(rows[1].get("cep"), Some("60175047"));
        assert_eq!(rows[1].get(STATUS_COLUMN), Some(STATUS_PRESENT));
        assert_eq!(rows[2].get(STATUS_COLUMN), Some(STATUS_INPUT_INCOMPLETE));
        assert_eq!(rows[3].get(STATUS_COLUMN), Some(STATUS_NOT_FOUND));
    }

    #[tokio::test]
    async fn test_load_writes_csv_and_cache() {
        let storage = MockStorage::with_file("in.csv", INPUT);
        let pipeline = pipeline(storage.clone());

        let records = pipeline.extract().await.unwrap();
        let batch = pipeline.transform(records).await.unwrap();
        let path = pipeline.load(batch).await.unwrap();
        assert_eq!(path, "out.csv");

        let csv = storage.get_file("out.csv").await.unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("crm,nome,endereco,numero,cidade,uf,cep,cep_status,cep_method,cep_specificity")
        );
        assert!(csv.contains("09781-330,RESOLVED,StructuredRegistryProvider,STREET_LEVEL"));

        let cache = storage.get_file("cache.json").await.unwrap();
        assert!(cache.contains("SP|SAO BERNARDO DO CAMPO|RUA PERRELLA|331"));
    }

    #[tokio::test]
    async fn test_cancelled_batch_saves_validated_results() {
        let storage = MockStorage::with_file("in.csv", INPUT);
        let pipeline = pipeline_with(storage.clone(), Arc::new(SlowRegistry));
        let records = pipeline.extract().await.unwrap();
        let shutdown = pipeline.shutdown_handle();
        let cache = Arc::clone(pipeline.resolver().cache());

        let (result, ()) = tokio::join!(pipeline.transform(records), async {
            while cache.is_empty().await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            shutdown.notify_one();
        });

        assert!(matches!(result, Err(CepError::ProcessingError { .. })));
        assert!(storage.get_file("out.csv").await.is_none());

        let saved = storage.read_file("cache.json").await.unwrap();
        let reloaded = CepCache::from_json_bytes(&saved);
        let entry = reloaded
            .peek("SP|SAO BERNARDO DO CAMPO|RUA PERRELLA|331")
            .await
            .unwrap();
        assert_eq!(entry.cep, "09781-330");
        assert_eq!(reloaded.len().await, 1);
    }

    #[tokio::test]
    async fn test_extract_missing_input_is_io_error() {
        let storage = MockStorage::with_file("other.csv", "");
        let pipeline = pipeline(storage);
        assert!(matches!(
            pipeline.extract().await,
            Err(CepError::IoError(_))
        ));
    }

    #[tokio::test]
    async fn test_from_config_loads_reference_data() {
        let storage = MockStorage::with_file(
            "overrides.csv",
            "record_key,cep,address,version\n209301-SP,09520-650,Rua Perrella,1\n",
        );
        storage
            .write_file("in.csv", INPUT.as_bytes())
            .await
            .unwrap();

        let mut config = CepConfig::default();
        config.input.path = "in.csv".to_string();
        config.output.path = "out.csv".to_string();
        config.cache.enabled = false;
        config.overrides.path = Some("overrides.csv".to_string());

        let pipeline = EnrichmentPipeline::from_config(storage, config)
            .await
            .unwrap();
        let records = pipeline.extract().await.unwrap();
        let first = records.into_iter().take(1).collect();
        let batch = pipeline.transform(first).await.unwrap();

        assert_eq!(batch.records[0].get("cep"), Some("09520-650"));
        assert_eq!(batch.records[0].get(METHOD_COLUMN), Some("ManualOverride"));
    }
}
