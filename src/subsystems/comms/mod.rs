//! Comms subsystem: external I/O channels.
//!
//! Each channel implements [`runtime::Component`](crate::subsystems::runtime::Component)
//! and holds an `Arc<CommsState>`, the only way it can reach the bus.
//! [`start`] builds the configured channels and hands them to
//! [`spawn_components`]; it returns as soon as they are spawned.

mod state;
#[cfg(feature = "channel-axum")]
pub mod axum_channel;

pub use state::{CommsError, CommsReply, CommsState};

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::error::AppError;
use crate::subsystems::runtime::{Component, SubsystemHandle, spawn_components};
use crate::supervisor::bus::BusHandle;
use crate::supervisor::component_info::ComponentInfo;

const HTTP_CHANNEL_ID: &str = "http";

/// Spawn the configured channels.
///
/// Fails before anything is spawned when API key auth is on but no key
/// was supplied.
pub fn start(config: &Config, bus: BusHandle, shutdown: CancellationToken) -> Result<SubsystemHandle, AppError> {
    if config.api.api_key_enabled && config.api_key.is_none() {
        return Err(AppError::Config("api.api_key_enabled is set but API_KEY is not".into()));
    }

    let state = Arc::new(CommsState::new(bus));
    let mut components: Vec<Box<dyn Component>> = Vec::new();

    #[cfg(feature = "channel-axum")]
    if config.api.enabled {
        let bind = config.api.bind_addr();
        info!(%bind, auth = config.api.api_key_enabled, "loading http channel");
        let api_key = config.api_key.as_deref().filter(|_| config.api.api_key_enabled).map(Arc::from);
        components.push(Box::new(axum_channel::AxumChannel::new(
            bind,
            axum_channel::AxumState {
                channel_id: Arc::from(HTTP_CHANNEL_ID),
                comms: state.clone(),
                api_key,
                request_timeout: std::time::Duration::from_secs(config.api.request_timeout_seconds),
                model: Arc::from(config.llm.openai.model.as_str()),
            },
        )));
    }

    #[cfg(not(feature = "channel-axum"))]
    if config.api.enabled {
        tracing::warn!("[api] enabled = true but the `channel-axum` feature is not compiled in");
    }

    Ok(spawn_components(components, shutdown))
}

/// Comms node for the component tree, built from config before [`start`].
pub fn component_info(config: &Config) -> ComponentInfo {
    let mut channels = Vec::new();
    if cfg!(feature = "channel-axum") && config.api.enabled {
        channels.push(ComponentInfo::leaf(HTTP_CHANNEL_ID, "HTTP API"));
    }
    ComponentInfo::running("comms", "Comms", channels)
}
