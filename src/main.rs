//! cus-agent: supervisor entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Load config
//!   3. Resolve effective log level (CLI `-v` flags > env > config)
//!   4. Init logger once
//!   5. Build the bus, health registry and shutdown token
//!   6. Build bus handlers: llm, tools, agents, management
//!   7. Spawn supervisor run-loop
//!   8. Start comms (HTTP API) and wait for Ctrl-C
//!   9. Cancel token + join supervisor

#[cfg(feature = "subsystem-agents")]
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use cus_agent::bootstrap::logger;
use cus_agent::config::{self, Config};
use cus_agent::error::AppError;
use cus_agent::subsystems::management::{ManagementInfo, ManagementSubsystem};
use cus_agent::supervisor::{self, bus::SupervisorBus, component_info::ComponentInfo, dispatch::BusHandler, health::HealthRegistry};

#[cfg(feature = "subsystem-agents")]
use cus_agent::subsystems::{
    agents::{AgentsState, AgentsSubsystem},
    memory::{Checkpointer, FeedbackManager, RatingManager},
};
#[cfg(feature = "subsystem-llm")]
use cus_agent::subsystems::llm::LlmSubsystem;
#[cfg(feature = "subsystem-tools")]
use cus_agent::subsystems::tools::ToolsSubsystem;

const BUS_CAPACITY: usize = 64;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // .env is optional.
    let _ = dotenvy::dotenv();

    let args = parse_cli_args();
    let config = config::load(args.config_path.as_deref())?;

    let effective_log_level = args.log_level.unwrap_or(config.log_level.as_str());
    logger::init(effective_log_level, args.log_level.is_some(), config.log_file.as_deref())?;

    info!(
        name = %config.name,
        work_dir = %config.work_dir.display(),
        configured_log_level = %config.log_level,
        effective_log_level = %effective_log_level,
        "config loaded"
    );

    let shutdown = CancellationToken::new();
    let bus = SupervisorBus::new(BUS_CAPACITY);
    let bus_handle = bus.handle.clone();
    let health = HealthRegistry::new();

    let ctrlc_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, initiating shutdown");
            ctrlc_token.cancel();
        }
    });

    let mut handlers: Vec<Box<dyn BusHandler>> = Vec::new();

    #[cfg(feature = "subsystem-llm")]
    {
        let llm = LlmSubsystem::new(&config.llm, config.llm_api_key.clone())
            .map_err(|e| AppError::Config(e.to_string()))?
            .with_health_reporter(health.reporter("llm"));
        llm.spawn_health_checker(shutdown.clone());
        handlers.push(Box::new(llm));
    }

    #[cfg(feature = "subsystem-tools")]
    handlers.push(Box::new(ToolsSubsystem::new(&config.tools).with_health_reporter(health.reporter("tools"))));

    #[cfg(feature = "subsystem-agents")]
    {
        let checkpointer = Arc::new(Checkpointer::open(&config.work_dir, &config.memory)?);
        let (ratings, feedback) = if config.memory.persist {
            let data_dir = config.work_dir.join("data");
            (RatingManager::open(&data_dir, config.rating_weights)?, FeedbackManager::open(&data_dir)?)
        } else {
            (RatingManager::in_memory(config.rating_weights), FeedbackManager::in_memory())
        };
        let state = Arc::new(
            AgentsState::new(bus_handle.clone(), checkpointer, config.agents.clone())
                .with_stores(Arc::new(ratings), Arc::new(feedback)),
        );
        handlers.push(Box::new(AgentsSubsystem::new(state).with_health_reporter(health.reporter("agents"))));
    }

    // The management tree is captured once every other node is known.
    let mut components: Vec<ComponentInfo> = handlers.iter().map(|h| h.component_info()).collect();
    #[cfg(feature = "subsystem-comms")]
    components.push(cus_agent::subsystems::comms::component_info(&config));

    let mut prefixes: Vec<String> = handlers.iter().map(|h| h.prefix().to_string()).collect();
    handlers.push(Box::new(ManagementSubsystem::new(
        ManagementInfo {
            name: config.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            llm_provider: config.llm.provider.clone(),
            llm_model: config.llm.openai.model.clone(),
        },
        health.clone(),
        components,
    )));
    prefixes.push("manage".to_string());

    let sup_token = shutdown.clone();
    let sup_handle = tokio::spawn(async move {
        supervisor::run(bus, sup_token, handlers).await;
    });

    print_startup_summary(&config, &prefixes);

    #[cfg(feature = "subsystem-comms")]
    {
        let comms = cus_agent::subsystems::comms::start(&config, bus_handle, shutdown.clone());
        match comms {
            Ok(handle) => {
                if let Err(e) = handle.join().await {
                    shutdown.cancel();
                    let _ = sup_handle.await;
                    return Err(e);
                }
            }
            Err(e) => {
                shutdown.cancel();
                let _ = sup_handle.await;
                return Err(e);
            }
        }
    }
    #[cfg(not(feature = "subsystem-comms"))]
    {
        drop(bus_handle);
        shutdown.cancelled().await;
    }

    shutdown.cancel();
    let _ = sup_handle.await;
    info!("shutdown complete");
    Ok(())
}

fn print_startup_summary(config: &Config, prefixes: &[String]) {
    let fit = |text: String| -> String {
        const WIDTH: usize = 58;
        if text.chars().count() >= WIDTH {
            let mut out = text.chars().take(WIDTH - 1).collect::<String>();
            out.push('…');
            out
        } else {
            format!("{text:<WIDTH$}")
        }
    };

    let mut subsystems = prefixes.to_vec();
    subsystems.sort();

    let api_line = if cfg!(feature = "channel-axum") && config.api.enabled {
        let auth = if config.api.api_key_enabled { "api key" } else { "open" };
        format!("http://{} ({auth})", config.api.bind_addr())
    } else {
        "disabled".to_string()
    };

    let llm_line = format!(
        "provider={} model={} temp={}",
        config.llm.provider, config.llm.openai.model, config.llm.openai.temperature
    );
    let agents_line = format!(
        "max_iter={} feedback={} quality>={}",
        config.agents.max_iterations, config.agents.max_feedback_rounds, config.agents.quality_threshold
    );
    let memory_line = format!(
        "{} (max {} checkpoints/session)",
        if config.memory.persist { "persistent" } else { "in-memory" },
        config.memory.max_checkpoints_per_session
    );

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ {}║", fit(format!("cus-agent {}", env!("CARGO_PKG_VERSION"))));
    println!("╟──────────────────────────────────────────────────────────────╢");
    println!("║ {}║", fit(format!("name: {}", config.name)));
    println!("║ {}║", fit(format!("pid: {}", std::process::id())));
    println!("║ {}║", fit(format!("subsystems: {}", subsystems.join(", "))));
    println!("║ {}║", fit(format!("api: {api_line}")));
    println!("║ {}║", fit(format!("llm: {llm_line}")));
    println!("║ {}║", fit(format!("agents: {agents_line}")));
    println!("║ {}║", fit(format!("memory: {memory_line}")));
    println!("╚══════════════════════════════════════════════════════════════╝");
}

struct CliArgs {
    log_level: Option<&'static str>,
    config_path: Option<String>,
}

fn parse_cli_args() -> CliArgs {
    let mut verbosity = 0u8;
    let mut config_path = None;

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--" => break,
            "-h" | "--help" => {
                println!("Usage: cus-agent [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -h, --help                 Print help");
                println!("  -f, --config <PATH>        Path to configuration file (default: config/default.toml)");
                println!("  -v, -vv, -vvv, -vvvv       Increase logging verbosity");
                std::process::exit(0);
            }
            "-f" | "--config" => match iter.next() {
                Some(path) => config_path = Some(path),
                None => {
                    eprintln!("error: -f/--config requires a path argument");
                    std::process::exit(1);
                }
            },
            "--verbose" => verbosity = verbosity.saturating_add(1),
            a if a.len() > 1 && a.starts_with('-') && a.chars().skip(1).all(|c| c == 'v') => {
                verbosity = verbosity.saturating_add((a.len() - 1) as u8);
            }
            _ => {}
        }
    }

    CliArgs { log_level: logger::level_for_verbosity(verbosity), config_path }
}
