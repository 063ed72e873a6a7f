//! Supervisor dispatch: the trait every bus-facing subsystem implements.
//!
//! Method strings look like `"prefix/action"` or `"prefix/group/action"`.
//! The supervisor matches the first segment against [`BusHandler::prefix`]
//! and hands the full method string to the handler, which does its own
//! secondary routing.

use tokio::sync::oneshot;

use crate::supervisor::bus::{BusError, BusPayload, BusResult, ERR_METHOD_NOT_FOUND};
use crate::supervisor::component_info::ComponentInfo;

/// A subsystem that serves bus requests under a unique prefix.
pub trait BusHandler: Send + Sync {
    /// Method prefix owned by this handler (`"agents"`, `"llm"`, `"tools"`, …).
    fn prefix(&self) -> &str;

    /// Serve a request.  Must not block: reply inline for cheap work, or move
    /// `reply_tx` into a spawned task.
    fn handle_request(&self, method: &str, payload: BusPayload, reply_tx: oneshot::Sender<BusResult>);

    /// Fire-and-forget messages.  Ignored unless overridden.
    fn handle_notification(&self, _method: &str, _payload: BusPayload) {}

    /// Node for the management component tree.
    fn component_info(&self) -> ComponentInfo {
        ComponentInfo::leaf(self.prefix(), &ComponentInfo::capitalise(self.prefix()))
    }
}

/// Reply with `ERR_METHOD_NOT_FOUND` for a method the handler does not route.
pub fn reply_method_not_found(method: &str, reply_tx: oneshot::Sender<BusResult>) {
    let _ = reply_tx.send(Err(BusError::new(
        ERR_METHOD_NOT_FOUND,
        format!("method not found: {method}"),
    )));
}
