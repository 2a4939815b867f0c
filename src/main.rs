// src/main.rs
use autopilot::config::AppConfig;
use autopilot::core::supervisor::{AgentSupervisor, CoreContext, DefaultAgentFactory};
use autopilot::utils::logging::init_logging;
use dotenvy::dotenv;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // 1. Load Configuration
    let config = AppConfig::new()?;
    let _log_guard = init_logging(&config.log)?;

    let paper = config.agents.iter().filter(|a| a.paper_trading).count();
    println!("========================================");
    println!("        AUTOPILOT - v{}", env!("CARGO_PKG_VERSION"));
    println!("========================================");
    println!("Agents: {} ({} enabled)", config.agents.len(), config.agents.iter().filter(|a| a.enabled).count());
    println!("Mode:   📝 {} paper / 🚨 {} live", paper, config.agents.len() - paper);
    println!("========================================");

    // 2. Initialize Components
    let context = CoreContext::from_config(&config)?;
    let factory = Arc::new(DefaultAgentFactory::new(context));
    let supervisor = AgentSupervisor::new(factory, config.agents.clone())?;

    // 3. Run Agents
    let started = supervisor.start_enabled().await;
    if started == 0 {
        error!("No agent could be started, exiting");
        return Ok(());
    }
    info!("{} agent(s) running. Press Ctrl+C to stop.", started);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested, stopping agents...");
    supervisor.shutdown().await;

    for status in supervisor.list().await {
        match &status.account {
            Some(account) => info!(
                agent = %status.agent_id,
                cycles = status.cycles,
                equity = %account.total_equity,
                realized = %account.realized_pnl,
                "Final state"
            ),
            None => info!(agent = %status.agent_id, cycles = status.cycles, "Final state"),
        }
    }
    Ok(())
}
