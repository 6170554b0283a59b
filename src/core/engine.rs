use crate::core::cascade::CepResolver;
use crate::domain::model::{Address, FailureKind, ResolutionResult};
use crate::domain::ports::Pipeline;
use crate::utils::error::{CepError, Result};
use crate::utils::monitor::SystemMonitor;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

const PROGRESS_EVERY: usize = 50;

/// 一筆地址一個 task，同時執行數量由 semaphore 限制，輸出順序與輸入相同
pub struct ResolutionPool {
    resolver: Arc<CepResolver>,
    workers: usize,
}

impl ResolutionPool {
    pub fn new(resolver: Arc<CepResolver>, workers: usize) -> Self {
        Self {
            resolver,
            workers: workers.max(1),
        }
    }

    pub fn resolver(&self) -> &Arc<CepResolver> {
        &self.resolver
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub async fn resolve_all(&self, addresses: Vec<Address>) -> Result<Vec<ResolutionResult>> {
        self.run_until(addresses, std::future::pending()).await
    }

    /// `cancel` 完成時中止所有進行中的 task。快取只在驗證後寫入，中止不會留下未驗證的結果。
    pub async fn run_until<F>(
        &self,
        addresses: Vec<Address>,
        cancel: F,
    ) -> Result<Vec<ResolutionResult>>
    where
        F: Future<Output = ()>,
    {
        let total = addresses.len();
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();

        for (index, address) in addresses.into_iter().enumerate() {
            let resolver = Arc::clone(&self.resolver);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                (index, resolver.resolve(&address).await)
            });
        }

        let mut results: Vec<Option<ResolutionResult>> = vec![None; total];
        let mut completed = 0usize;
        tokio::pin!(cancel);

        loop {
            tokio::select! {
                _ = &mut cancel => {
                    tasks.abort_all();
                    tracing::warn!(
                        "🛑 Resolution cancelled after {}/{} records",
                        completed,
                        total
                    );
                    return Err(CepError::ProcessingError {
                        message: format!("cancelled after {}/{} records", completed, total),
                    });
                }
                joined = tasks.join_next() => match joined {
                    Some(Ok((index, result))) => {
                        results[index] = Some(result);
                        completed += 1;
                        if completed % PROGRESS_EVERY == 0 {
                            tracing::info!("📈 Resolved {}/{} records", completed, total);
                        }
                    }
                    Some(Err(e)) => {
                        completed += 1;
                        tracing::error!("❌ Resolution task failed: {}", e);
                    }
                    None => break,
                },
            }
        }

        Ok(results
            .into_iter()
            .map(|result| {
                result.unwrap_or_else(|| ResolutionResult::failed(FailureKind::Exhausted, Vec::new()))
            })
            .collect())
    }
}

/// 依序執行 extract → transform → load
pub struct EnrichmentEngine<P: Pipeline> {
    pipeline: P,
    monitor: SystemMonitor,
}

impl<P: Pipeline> EnrichmentEngine<P> {
    pub fn new(pipeline: P) -> Self {
        Self::new_with_monitoring(pipeline, false)
    }

    pub fn new_with_monitoring(pipeline: P, monitor_enabled: bool) -> Self {
        Self {
            pipeline,
            monitor: SystemMonitor::new(monitor_enabled),
        }
    }

    pub async fn run(&self) -> Result<String> {
        tracing::info!("🚀 Starting CEP enrichment");
        self.monitor.log_stats("Start");

        let records = self.pipeline.extract().await?;
        tracing::info!("📥 Extracted {} records", records.len());
        self.monitor.log_stats("Extract");

        let batch = self.pipeline.transform(records).await?;
        let summary = &batch.summary;
        tracing::info!(
            "🧮 {} records: {} passed through, {} street-level, {} city-level, {} failed",
            summary.total,
            summary.passed_through,
            summary.street_level,
            summary.city_level,
            summary.failed
        );
        self.monitor.log_throughput(summary.total);
        self.monitor.log_stats("Transform");

        let output_path = self.pipeline.load(batch).await?;
        tracing::info!("💾 Output saved to: {}", output_path);
        self.monitor.log_final_stats();

        Ok(output_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::cache::CepCache;
    use crate::adapters::overrides::ManualOverrideStore;
    use crate::adapters::providers::ProviderRegistry;
    use crate::core::validator::Validator;
    use crate::domain::model::{
        CepCandidate, Confidence, EnrichedBatch, MethodId, NormalizedAddress, Record, Specificity,
    };
    use crate::domain::ports::{CepProvider, ProviderResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// 記錄同時進行中的呼叫數
    struct CountingProvider {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl CepProvider for CountingProvider {
        fn id(&self) -> MethodId {
            MethodId::CityLevelFallback
        }

        fn requires_street(&self) -> bool {
            false
        }

        async fn attempt(&self, address: &NormalizedAddress, _variant: &str) -> ProviderResult {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            let cep = crate::core::validator::state_floor(&address.state)
                .ok_or(crate::domain::ports::ProviderError::NotFound)?;
            Ok(CepCandidate::new(
                cep,
                MethodId::CityLevelFallback,
                Specificity::CityLevel,
                Confidence::Low,
            ))
        }
    }

    fn pool(delay: Duration, workers: usize) -> (ResolutionPool, Arc<CountingProvider>) {
        let provider = Arc::new(CountingProvider {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            delay,
        });
        let resolver = CepResolver::new(
            ProviderRegistry::from(vec![provider.clone() as Arc<dyn CepProvider>]),
            Arc::new(CepCache::new()),
            Arc::new(ManualOverrideStore::empty()),
            Validator::default(),
        );
        (ResolutionPool::new(Arc::new(resolver), workers), provider)
    }

    fn address(city: &str, state: &str) -> Address {
        Address::builder().city(city).state(state).build().unwrap()
    }

    #[tokio::test]
    async fn test_pool_preserves_order_and_bounds_concurrency() {
        let (pool, provider) = pool(Duration::from_millis(20), 2);
        let addresses = vec![
            address("Fortaleza", "CE"),
            address("Belem", "PA"),
            address("Campinas", "SP"),
            address("Recife", "PE"),
            address("Natal", "RN"),
        ];

        let results = pool.resolve_all(addresses).await.unwrap();

        let ceps: Vec<_> = results
            .iter()
            .map(|r| r.final_cep.clone().unwrap())
            .collect();
        assert_eq!(
            ceps,
            vec!["60000-000", "66000-000", "01000-000", "50000-000", "59000-000"]
        );
        assert!(provider.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_pool_cancellation_aborts_tasks() {
        let (pool, _provider) = pool(Duration::from_secs(30), 1);
        let addresses = vec![address("Fortaleza", "CE"), address("Belem", "PA")];

        let result = pool
            .run_until(addresses, tokio::time::sleep(Duration::from_millis(20)))
            .await;

        assert!(matches!(result, Err(CepError::ProcessingError { .. })));
        assert!(pool.resolver().cache().is_empty().await);
    }

    struct FixedPipeline;

    #[async_trait]
    impl Pipeline for FixedPipeline {
        async fn extract(&self) -> Result<Vec<Record>> {
            Ok(vec![Record::default(), Record::default()])
        }

        async fn transform(&self, data: Vec<Record>) -> Result<EnrichedBatch> {
            let mut batch = EnrichedBatch {
                records: data,
                ..Default::default()
            };
            batch.summary.total = batch.records.len();
            Ok(batch)
        }

        async fn load(&self, batch: EnrichedBatch) -> Result<String> {
            Ok(format!("out-{}.csv", batch.summary.total))
        }
    }

    #[tokio::test]
    async fn test_engine_runs_all_phases() {
        let engine = EnrichmentEngine::new(FixedPipeline);
        assert_eq!(engine.run().await.unwrap(), "out-2.csv");
    }
}
