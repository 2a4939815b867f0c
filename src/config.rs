// src/config.rs

use crate::error::ConfigError;
use crate::types::{Exchange, Interval, Symbol};
use config::{Config, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    pub level: String,
    /// Rolling log files go here when set; stdout only otherwise.
    pub directory: Option<String>,
    pub file_prefix: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PersistenceConfig {
    /// Directory for per-agent ledger snapshots. No persistence when unset.
    pub state_dir: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Credentials {
    #[serde(default)]
    pub binance_api_key: String,
    #[serde(default)]
    pub binance_secret_key: String,
    #[serde(default)]
    pub finnhub_api_key: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NetworkConfig {
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub collaborator_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    DeepSeek,
    Qwen,
    OpenRouter,
    Custom,
}

impl Provider {
    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            Provider::DeepSeek => Some("https://api.deepseek.com/v1"),
            Provider::Qwen => Some("https://dashscope.aliyuncs.com/compatible-mode/v1"),
            Provider::OpenRouter => Some("https://openrouter.ai/api/v1"),
            Provider::Custom => None,
        }
    }

    pub fn default_model(&self) -> Option<&'static str> {
        match self {
            Provider::DeepSeek => Some("deepseek-chat"),
            Provider::Qwen => Some("qwen-plus"),
            Provider::OpenRouter => Some("openai/gpt-4o"),
            Provider::Custom => None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub provider: Provider,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl ModelConfig {
    pub fn resolved_base_url(&self) -> Option<String> {
        self.base_url
            .clone()
            .or_else(|| self.provider.default_base_url().map(str::to_string))
    }

    pub fn resolved_model(&self) -> Option<String> {
        self.model
            .clone()
            .or_else(|| self.provider.default_model().map(str::to_string))
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: Provider::DeepSeek,
            base_url: None,
            model: None,
            api_key: String::new(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RiskLimits {
    #[serde(default = "default_major_leverage")]
    pub major_max_leverage: u32,
    #[serde(default = "default_altcoin_leverage")]
    pub altcoin_max_leverage: u32,
    #[serde(default = "default_max_notional")]
    pub max_position_notional: Decimal,
    /// Smallest notional worth opening; exchanges refuse dust orders.
    #[serde(default = "default_min_position")]
    pub min_position_usd: Decimal,
    #[serde(default = "default_true")]
    pub require_stop_loss_take_profit: bool,
    #[serde(default = "default_max_positions")]
    pub max_concurrent_positions: usize,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            major_max_leverage: default_major_leverage(),
            altcoin_max_leverage: default_altcoin_leverage(),
            max_position_notional: default_max_notional(),
            min_position_usd: default_min_position(),
            require_stop_loss_take_profit: true,
            max_concurrent_positions: default_max_positions(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub exchange: Exchange,
    #[serde(default)]
    pub model: ModelConfig,
    pub symbols: Vec<String>,
    pub initial_balance: Decimal,
    #[serde(default = "default_true")]
    pub paper_trading: bool,
    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_secs: u64,
    #[serde(default = "default_candle_interval")]
    pub candle_interval: Interval,
    #[serde(default = "default_context_interval")]
    pub context_interval: Interval,
    #[serde(default = "default_candle_limit")]
    pub candle_limit: usize,
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default)]
    pub risk: RiskLimits,
    /// Per-symbol quantity decimals, overriding what the exchange reports.
    #[serde(default)]
    pub quantity_precision: HashMap<String, u32>,
}

impl AgentConfig {
    /// Paper agent with default cadence and limits.
    pub fn new(id: &str, exchange: Exchange, symbols: &[&str], initial_balance: Decimal) -> Self {
        Self {
            id: id.to_string(),
            enabled: true,
            exchange,
            model: ModelConfig::default(),
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            initial_balance,
            paper_trading: true,
            cycle_interval_secs: default_cycle_interval(),
            candle_interval: default_candle_interval(),
            context_interval: default_context_interval(),
            candle_limit: default_candle_limit(),
            history_window: default_history_window(),
            risk: RiskLimits::default(),
            quantity_precision: HashMap::new(),
        }
    }

    /// Watch list in canonical form, duplicates removed, order kept.
    pub fn watch_list(&self) -> Vec<Symbol> {
        let mut seen = HashSet::new();
        self.symbols
            .iter()
            .map(|s| Symbol::normalize(s))
            .filter(|s| seen.insert(s.clone()))
            .collect()
    }

    pub fn precision_overrides(&self) -> HashMap<Symbol, u32> {
        self.quantity_precision
            .iter()
            .map(|(k, v)| (Symbol::normalize(k), *v))
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let id = self.id.as_str();
        if id.trim().is_empty() {
            return Err(ConfigError::invalid("<unnamed>", "agent id must not be empty"));
        }
        if self.symbols.iter().all(|s| s.trim().is_empty()) {
            return Err(ConfigError::invalid(id, "watch list is empty"));
        }
        if self.initial_balance <= Decimal::ZERO {
            return Err(ConfigError::invalid(
                id,
                format!("initial balance must be positive, got {}", self.initial_balance),
            ));
        }
        if self.cycle_interval_secs == 0 {
            return Err(ConfigError::invalid(id, "cycle interval must be at least 1s"));
        }
        if self.candle_limit < 2 {
            return Err(ConfigError::invalid(id, "candle_limit must be at least 2"));
        }
        if self.risk.major_max_leverage == 0 || self.risk.altcoin_max_leverage == 0 {
            return Err(ConfigError::invalid(id, "leverage caps must be at least 1"));
        }
        if self.risk.max_position_notional <= Decimal::ZERO {
            return Err(ConfigError::invalid(id, "max_position_notional must be positive"));
        }
        if self.risk.min_position_usd > self.risk.max_position_notional {
            return Err(ConfigError::invalid(id, "min_position_usd exceeds max_position_notional"));
        }
        if self.risk.max_concurrent_positions == 0 {
            return Err(ConfigError::invalid(id, "max_concurrent_positions must be at least 1"));
        }
        if !self.paper_trading && self.exchange != Exchange::Binance {
            return Err(ConfigError::invalid(
                id,
                format!("live trading is only available on binance, not {}", self.exchange),
            ));
        }
        if self.model.resolved_base_url().is_none() || self.model.resolved_model().is_none() {
            return Err(ConfigError::invalid(
                id,
                "custom model providers need both base_url and model",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub log: LogConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub credentials: Credentials,
    pub network: NetworkConfig,
    pub agents: Vec<AgentConfig>,
}

impl AppConfig {
    /// Defaults, then `Settings.{toml,yaml,json}`, then `APP__SECTION__KEY` variables.
    pub fn new() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .set_default("log.level", "info")?
            .set_default("log.file_prefix", "autopilot.log")?
            .set_default("network.request_timeout_secs", 15)?
            .set_default("network.max_retries", 2)?
            .set_default("network.retry_backoff_ms", 500)?
            .set_default("network.collaborator_timeout_secs", 180)?
            .set_default("agents", Vec::<String>::new())?
            .add_source(File::with_name("Settings").required(false))
            .add_source(Environment::with_prefix("APP").separator("__"));

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut ids = HashSet::new();
        for agent in &self.agents {
            if !ids.insert(agent.id.as_str()) {
                return Err(ConfigError::DuplicateAgent(agent.id.clone()));
            }
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_temperature() -> f32 {
    0.5
}

fn default_major_leverage() -> u32 {
    5
}

fn default_altcoin_leverage() -> u32 {
    5
}

fn default_max_notional() -> Decimal {
    Decimal::from(5_000)
}

fn default_min_position() -> Decimal {
    Decimal::from(12)
}

fn default_max_positions() -> usize {
    3
}

fn default_cycle_interval() -> u64 {
    180
}

fn default_candle_interval() -> Interval {
    Interval::ThreeMinutes
}

fn default_context_interval() -> Interval {
    Interval::FourHours
}

fn default_candle_limit() -> usize {
    100
}

fn default_history_window() -> usize {
    20
}
