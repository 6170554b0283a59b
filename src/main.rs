use anyhow::Context;
use cep_enricher::adapters::http::build_client;
use cep_enricher::adapters::providers::{CityTable, ProviderRegistry};
use cep_enricher::domain::ports::{Pipeline, Storage};
use cep_enricher::utils::error::ErrorSeverity;
use cep_enricher::utils::{logger, validation::Validate};
use cep_enricher::{CepConfig, CliConfig, EnrichmentEngine, EnrichmentPipeline, LocalStorage};
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliConfig::parse();

    // 初始化日誌
    if args.json_logs {
        logger::init_json_logger(args.verbose);
    } else {
        logger::init_cli_logger(args.verbose);
    }

    tracing::info!("🚀 Starting cep-enricher");
    tracing::info!("📁 Loading configuration from: {}", args.config);

    let config = match args.into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Failed to load config file '{}': {}", args.config, e);
            eprintln!("💡 Make sure the file exists and is valid TOML format");
            std::process::exit(1);
        }
    };

    // 驗證配置
    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(1);
    }

    tracing::info!("✅ Configuration loaded and validated successfully");
    display_config_summary(&config);

    let storage = LocalStorage::new(config.resolver.base_dir.clone());

    if args.dry_run {
        tracing::info!("🔍 DRY RUN MODE - No provider will be called");
        return perform_dry_run(&storage, &config).await;
    }

    let monitor_enabled = args.monitor_enabled(&config);
    if monitor_enabled {
        tracing::info!("🔍 System monitoring enabled");
    }

    let pipeline = match EnrichmentPipeline::from_config(storage, config).await {
        Ok(pipeline) => pipeline,
        Err(e) => {
            tracing::error!("❌ Failed to prepare resolver: {}", e);
            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 建議: {}", e.recovery_suggestion());
            std::process::exit(1);
        }
    };

    // Ctrl-C 中止進行中的解析；中止前已驗證的結果會先存入快取檔
    let shutdown = pipeline.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("🛑 Interrupt received, cancelling in-flight resolutions");
            shutdown.notify_one();
        }
    });

    let engine = EnrichmentEngine::new_with_monitoring(pipeline, monitor_enabled);

    match engine.run().await {
        Ok(output_path) => {
            tracing::info!("✅ CEP enrichment completed successfully!");
            println!("✅ CEP enrichment completed successfully!");
            println!("📁 Output saved to: {}", output_path);
        }
        Err(e) => {
            tracing::error!(
                "❌ CEP enrichment failed: {} (Category: {:?}, Severity: {:?})",
                e,
                e.category(),
                e.severity()
            );
            tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 建議: {}", e.recovery_suggestion());

            // 根據錯誤嚴重程度決定退出碼
            let exit_code = match e.severity() {
                ErrorSeverity::Low => 0,
                ErrorSeverity::Medium => 2,
                ErrorSeverity::High => 1,
                ErrorSeverity::Critical => 3,
            };

            if exit_code > 0 {
                std::process::exit(exit_code);
            }
        }
    }

    Ok(())
}

fn display_config_summary(config: &CepConfig) {
    tracing::info!("📋 Configuration Summary:");
    tracing::info!("  Resolver: {}", config.resolver.name);
    tracing::info!("  Base dir: {}", config.resolver.base_dir);
    tracing::info!("  Input: {}", config.input.path);
    tracing::info!("  Output: {}", config.output.path);
    tracing::info!(
        "  Cache: {}",
        if config.cache.enabled {
            config.cache.path.as_str()
        } else {
            "disabled"
        }
    );
    tracing::info!(
        "  Overrides: {}",
        config.overrides.path.as_deref().unwrap_or("none")
    );
    tracing::info!("  Workers: {}", config.workers());
    tracing::info!(
        "  Provider timeout: {}s, retries: {}",
        config.cascade.provider_timeout_seconds,
        config.cascade.max_retries
    );
}

async fn perform_dry_run(storage: &LocalStorage, config: &CepConfig) -> anyhow::Result<()> {
    let client = build_client(&config.resolver.user_agent, config.cascade.provider_timeout())?;
    let registry = ProviderRegistry::from_config(
        &config.providers,
        &config.cascade,
        &client,
        CityTable::default(),
    );
    println!("🔗 Provider order:");
    for (index, provider) in registry.providers().iter().enumerate() {
        println!("  {}. {} (timeout {:?})", index + 1, provider.id(), provider.timeout());
    }

    if !storage.exists(&config.input.path).await {
        println!("⚠️ Input file '{}' does not exist yet", config.input.path);
        return Ok(());
    }

    let pipeline = EnrichmentPipeline::from_config(storage.clone(), config.clone())
        .await
        .context("failed to load reference data")?;
    let records = pipeline
        .extract()
        .await
        .context("failed to read input CSV")?;
    let missing = records
        .iter()
        .filter(|record| {
            record
                .get(&config.input.cep_column)
                .and_then(cep_enricher::core::validator::sanitize_cep)
                .is_none()
        })
        .count();

    println!(
        "📥 {} records, {} need a CEP",
        records.len(),
        missing
    );
    Ok(())
}
