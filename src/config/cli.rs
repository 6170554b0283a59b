use crate::config::toml_config::CepConfig;
use crate::utils::error::Result;
use clap::Parser;
use std::path::Path;

#[derive(Debug, Clone, Parser)]
#[command(name = "cep-enricher")]
#[command(about = "Resolve missing Brazilian postal codes (CEP) in CSV batches")]
pub struct CliConfig {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "cep-config.toml")]
    pub config: String,

    /// Override input CSV path
    #[arg(long)]
    pub input: Option<String>,

    /// Override output CSV path
    #[arg(long)]
    pub output: Option<String>,

    /// Override number of concurrent resolutions
    #[arg(long)]
    pub workers: Option<usize>,

    /// Skip the persistent cache for this run
    #[arg(long)]
    pub no_cache: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Override monitoring setting from config
    #[arg(long)]
    pub monitor: Option<bool>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    /// Dry run - show the provider order and inputs without resolving
    #[arg(long)]
    pub dry_run: bool,
}

impl CliConfig {
    /// 載入 TOML（檔案不存在時使用預設值）並套用命令列覆蓋
    pub fn into_config(&self) -> Result<CepConfig> {
        let mut config = if Path::new(&self.config).exists() {
            CepConfig::from_file(&self.config)?
        } else {
            tracing::warn!(
                "⚠️ Config file '{}' not found, using defaults",
                self.config
            );
            CepConfig::default()
        };
        self.apply_overrides(&mut config);
        Ok(config)
    }

    pub fn apply_overrides(&self, config: &mut CepConfig) {
        if let Some(input) = &self.input {
            config.input.path = input.clone();
        }
        if let Some(output) = &self.output {
            config.output.path = output.clone();
        }
        if let Some(workers) = self.workers {
            config.batch.workers = workers;
            tracing::info!("🔧 Workers overridden to: {}", workers);
        }
        if self.no_cache {
            config.cache.enabled = false;
        }
    }

    pub fn monitor_enabled(&self, config: &CepConfig) -> bool {
        self.monitor.unwrap_or_else(|| config.monitoring_enabled())
    }
}
