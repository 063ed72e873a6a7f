//! Supervisor: owns the event bus and routes messages between subsystems.

pub mod bus;
pub mod component_info;
pub mod dispatch;
pub mod health;

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use bus::{BusError, BusMessage, ERR_METHOD_NOT_FOUND, SupervisorBus};
use dispatch::BusHandler;

/// Run the routing loop until `shutdown` is cancelled or every bus handle
/// is dropped.
///
/// Each message goes to the handler whose prefix equals the first
/// `/`-delimited segment of its method.  The handler takes ownership of
/// `reply_tx`; unknown prefixes get `ERR_METHOD_NOT_FOUND`.
///
/// # Panics
///
/// Panics at startup if two handlers share a prefix.
pub async fn run(mut bus: SupervisorBus, shutdown: CancellationToken, handlers: Vec<Box<dyn BusHandler>>) {
    let mut table: HashMap<String, Box<dyn BusHandler>> = HashMap::new();
    for h in handlers {
        let prefix = h.prefix().to_string();
        debug!(%prefix, "registering bus handler");
        if table.insert(prefix.clone(), h).is_some() {
            panic!("duplicate BusHandler prefix registered: {prefix:?}");
        }
    }

    let mut prefixes: Vec<_> = table.keys().cloned().collect();
    prefixes.sort();
    info!(handlers = ?prefixes, "supervisor ready");

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!("supervisor shutting down");
                break;
            }

            msg = bus.rx.recv() => {
                match msg {
                    Some(BusMessage::Request { id, method, payload, reply_tx }) => {
                        let prefix = method.split('/').next().unwrap_or_default();
                        match table.get(prefix) {
                            Some(handler) => {
                                debug!(%id, %method, "routing request");
                                trace!(%id, payload = ?payload, "request payload");
                                handler.handle_request(&method, payload, reply_tx);
                            }
                            None => {
                                warn!(%id, %method, "no handler for request");
                                let _ = reply_tx.send(Err(BusError::new(
                                    ERR_METHOD_NOT_FOUND,
                                    format!("method not found: {method}"),
                                )));
                            }
                        }
                    }
                    Some(BusMessage::Notification { method, payload }) => {
                        let prefix = method.split('/').next().unwrap_or_default();
                        match table.get(prefix) {
                            Some(handler) => handler.handle_notification(&method, payload),
                            None => debug!(%method, "unhandled notification"),
                        }
                    }
                    None => {
                        info!("bus closed, supervisor exiting");
                        break;
                    }
                }
            }
        }
    }
}
