// src/core/supervisor.rs
use crate::config::{AgentConfig, AppConfig, Credentials, NetworkConfig};
use crate::connectors::binance::{BinanceFuturesExecutor, BinanceMarket, BinanceMarketData};
use crate::connectors::bybit::BybitMarketData;
use crate::connectors::finnhub::FinnhubMarketData;
use crate::connectors::gateway::{MarketGateway, RetryPolicy};
use crate::connectors::hyperliquid::HyperliquidMarketData;
use crate::connectors::traits::{ExecutionHandler, MarketDataAdapter};
use crate::core::engine::{AgentComponents, AgentStatus, TradingAgent};
use crate::decision::client::ChatCompletionsClient;
use crate::error::{ConfigError, SupervisorError};
use crate::ledger::store::{JsonFileStore, StateStore};
use crate::ledger::Ledger;
use crate::types::Exchange;
use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Builds a ready-to-run agent from its configuration.
#[async_trait]
pub trait AgentFactory: Send + Sync {
    async fn build(&self, config: &AgentConfig) -> Result<TradingAgent, SupervisorError>;
}

/// Handles constructed once at startup and shared by every agent.
pub struct CoreContext {
    pub http: Client,
    pub store: Option<Arc<dyn StateStore>>,
    pub credentials: Credentials,
    pub network: NetworkConfig,
}

impl CoreContext {
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.network.request_timeout_secs))
            .build()
            .context("failed to build HTTP client")?;
        let store = config
            .persistence
            .state_dir
            .as_ref()
            .map(|dir| Arc::new(JsonFileStore::new(dir)) as Arc<dyn StateStore>);
        if store.is_none() {
            warn!("No state_dir configured, ledgers live in memory only");
        }
        Ok(Self {
            http,
            store,
            credentials: config.credentials.clone(),
            network: config.network.clone(),
        })
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.network.max_retries + 1,
            backoff: Duration::from_millis(self.network.retry_backoff_ms),
            timeout: Duration::from_secs(self.network.request_timeout_secs),
        }
    }

    fn collaborator_timeout(&self) -> Duration {
        Duration::from_secs(self.network.collaborator_timeout_secs)
    }
}

/// Wires real exchange adapters, the chat-completions collaborator and a
/// paper ledger (or the live Binance executor). Agents on the same exchange
/// share one gateway.
pub struct DefaultAgentFactory {
    context: CoreContext,
    gateways: Mutex<HashMap<Exchange, Arc<MarketGateway>>>,
}

impl DefaultAgentFactory {
    pub fn new(context: CoreContext) -> Self {
        Self {
            context,
            gateways: Mutex::new(HashMap::new()),
        }
    }

    fn adapter(&self, exchange: Exchange) -> Arc<dyn MarketDataAdapter> {
        let http = self.context.http.clone();
        match exchange {
            Exchange::Binance => Arc::new(BinanceMarketData::new(BinanceMarket::UsdtFutures, http)),
            Exchange::BinanceUs => Arc::new(BinanceMarketData::new(BinanceMarket::UsSpot, http)),
            Exchange::Bybit => Arc::new(BybitMarketData::new(http)),
            Exchange::Hyperliquid => Arc::new(HyperliquidMarketData::new(http)),
            Exchange::Finnhub => Arc::new(FinnhubMarketData::new(
                http,
                self.context.credentials.finnhub_api_key.clone(),
            )),
        }
    }

    async fn gateway(&self, exchange: Exchange) -> Arc<MarketGateway> {
        let mut gateways = self.gateways.lock().await;
        gateways
            .entry(exchange)
            .or_insert_with(|| Arc::new(MarketGateway::new(self.adapter(exchange), self.context.retry_policy())))
            .clone()
    }
}

#[async_trait]
impl AgentFactory for DefaultAgentFactory {
    async fn build(&self, config: &AgentConfig) -> Result<TradingAgent, SupervisorError> {
        config.validate()?;
        let startup = |reason: String| SupervisorError::Startup {
            agent: config.id.clone(),
            reason,
        };

        let gateway = self.gateway(config.exchange).await;
        if let Err(e) = gateway.refresh_instruments().await {
            warn!(agent = %config.id, error = %e, "instrument list unavailable, validating per symbol later");
        }
        let (mut quantity_precision, price_precision) = gateway.precision_tables().await;
        quantity_precision.extend(config.precision_overrides());

        let decision_maker = ChatCompletionsClient::new(
            &config.id,
            &config.model,
            self.context.http.clone(),
            self.context.collaborator_timeout(),
        )?;

        let executor: Box<dyn ExecutionHandler> = if config.paper_trading {
            let ledger = Ledger::load(&config.id, config.initial_balance, self.context.store.clone())
                .await
                .map_err(|e| startup(e.to_string()))?;
            Box::new(ledger.with_precision(quantity_precision))
        } else {
            let creds = &self.context.credentials;
            if creds.binance_api_key.is_empty() || creds.binance_secret_key.is_empty() {
                return Err(ConfigError::invalid(&config.id, "live trading needs binance credentials").into());
            }
            warn!(agent = %config.id, "🚨 LIVE TRADING enabled");
            Box::new(
                BinanceFuturesExecutor::new(
                    creds.binance_api_key.clone(),
                    creds.binance_secret_key.clone(),
                    self.context.http.clone(),
                )
                .with_precision(quantity_precision, price_precision),
            )
        };

        Ok(TradingAgent::new(
            config.clone(),
            AgentComponents {
                gateway,
                decision_maker: Arc::new(decision_maker),
                executor,
            },
            self.context.collaborator_timeout(),
        ))
    }
}

struct AgentHandle {
    shutdown: watch::Sender<bool>,
    status: watch::Receiver<AgentStatus>,
    task: Option<JoinHandle<()>>,
    starting: bool,
    stopping: bool,
}

impl AgentHandle {
    fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

/// Owns the running agents. Start, stop and list are serialized on the
/// agent map; none of them waits on a cycle or an agent build while holding it.
pub struct AgentSupervisor {
    factory: Arc<dyn AgentFactory>,
    configs: BTreeMap<String, AgentConfig>,
    agents: Mutex<HashMap<String, AgentHandle>>,
}

impl AgentSupervisor {
    pub fn new(factory: Arc<dyn AgentFactory>, configs: Vec<AgentConfig>) -> Result<Self, SupervisorError> {
        let mut by_id = BTreeMap::new();
        for config in configs {
            if by_id.contains_key(&config.id) {
                return Err(ConfigError::DuplicateAgent(config.id).into());
            }
            by_id.insert(config.id.clone(), config);
        }
        Ok(Self {
            factory,
            configs: by_id,
            agents: Mutex::new(HashMap::new()),
        })
    }

    /// Starts `agent_id`. Starting a running or starting agent is a no-op.
    ///
    /// The agent is built outside the map lock; a placeholder marks it as
    /// starting meanwhile. A stop requested during the build cancels the launch.
    pub async fn start(&self, agent_id: &str) -> Result<(), SupervisorError> {
        let config = self
            .configs
            .get(agent_id)
            .ok_or_else(|| SupervisorError::UnknownAgent(agent_id.to_string()))?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let previous = {
            let mut agents = self.agents.lock().await;
            if let Some(handle) = agents.get(agent_id) {
                if handle.stopping {
                    return Err(SupervisorError::Startup {
                        agent: agent_id.to_string(),
                        reason: "agent is still stopping".to_string(),
                    });
                }
                if handle.starting || handle.is_running() {
                    info!(agent = agent_id, "already running");
                    return Ok(());
                }
            }
            let (_, status) = watch::channel(AgentStatus::new(config));
            agents.insert(
                agent_id.to_string(),
                AgentHandle {
                    shutdown,
                    status,
                    task: None,
                    starting: true,
                    stopping: false,
                },
            )
        };

        let built = self.factory.build(config).await;

        let mut agents = self.agents.lock().await;
        let placeholder = agents.remove(agent_id);
        let restore = |agents: &mut HashMap<String, AgentHandle>, previous: Option<AgentHandle>| {
            if let Some(previous) = previous {
                agents.insert(agent_id.to_string(), previous);
            }
        };
        let agent = match built {
            Ok(agent) => agent,
            Err(e) => {
                restore(&mut *agents, previous);
                return Err(e);
            }
        };
        let Some(AgentHandle { shutdown, .. }) = placeholder.filter(|h| !*h.shutdown.borrow()) else {
            info!(agent = agent_id, "stop requested during startup, not launching");
            restore(&mut *agents, previous);
            return Ok(());
        };

        let status = agent.subscribe();
        let task = tokio::spawn(agent.run(shutdown_rx));
        agents.insert(
            agent_id.to_string(),
            AgentHandle {
                shutdown,
                status,
                task: Some(task),
                starting: false,
                stopping: false,
            },
        );
        info!(agent = agent_id, "▶️ Agent launched");
        Ok(())
    }

    /// Signals `agent_id` to stop and waits for its current step to finish.
    /// Stopping a stopped agent is a no-op.
    pub async fn stop(&self, agent_id: &str) -> Result<(), SupervisorError> {
        if !self.configs.contains_key(agent_id) {
            return Err(SupervisorError::UnknownAgent(agent_id.to_string()));
        }

        let task = {
            let mut agents = self.agents.lock().await;
            let Some(handle) = agents.get_mut(agent_id) else {
                return Ok(());
            };
            if handle.starting {
                // picked up by start() once the build finishes
                let _ = handle.shutdown.send(true);
                return Ok(());
            }
            let Some(task) = handle.task.take() else {
                return Ok(());
            };
            // send only fails when the agent already exited
            let _ = handle.shutdown.send(true);
            handle.stopping = true;
            task
        };

        if let Err(e) = task.await {
            error!(agent = agent_id, error = %e, "agent task ended abnormally");
        }

        if let Some(handle) = self.agents.lock().await.get_mut(agent_id) {
            handle.stopping = false;
        }
        info!(agent = agent_id, "⏹️ Agent stopped");
        Ok(())
    }

    pub async fn status(&self, agent_id: &str) -> Result<AgentStatus, SupervisorError> {
        let config = self
            .configs
            .get(agent_id)
            .ok_or_else(|| SupervisorError::UnknownAgent(agent_id.to_string()))?;
        let agents = self.agents.lock().await;
        Ok(match agents.get(agent_id) {
            Some(handle) => handle.status.borrow().clone(),
            None => AgentStatus::new(config),
        })
    }

    /// Status of every configured agent, ordered by id.
    pub async fn list(&self) -> Vec<AgentStatus> {
        let agents = self.agents.lock().await;
        self.configs
            .values()
            .map(|config| match agents.get(&config.id) {
                Some(handle) => handle.status.borrow().clone(),
                None => AgentStatus::new(config),
            })
            .collect()
    }

    pub async fn is_running(&self, agent_id: &str) -> bool {
        self.agents
            .lock()
            .await
            .get(agent_id)
            .is_some_and(|h| h.is_running())
    }

    /// Starts every enabled agent. One agent failing to start does not stop
    /// the others; the number started is returned.
    pub async fn start_enabled(&self) -> usize {
        let mut started = 0;
        let enabled: Vec<String> = self
            .configs
            .values()
            .filter(|c| c.enabled)
            .map(|c| c.id.clone())
            .collect();
        for id in enabled {
            match self.start(&id).await {
                Ok(()) => started += 1,
                Err(e) => error!(agent = %id, error = %e, "agent failed to start"),
            }
        }
        started
    }

    /// Stops all agents concurrently and waits for them.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.agents.lock().await.keys().cloned().collect();
        let stops = ids.iter().map(|id| self.stop(id));
        for result in futures::future::join_all(stops).await {
            if let Err(e) = result {
                error!(error = %e, "stop failed during shutdown");
            }
        }
    }
}
