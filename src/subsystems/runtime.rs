//! Task runtime for long-running subsystem components.
//!
//! A [`Component`] is a unit that runs until shutdown, such as the HTTP
//! channel.  It captures its shared state when constructed, and
//! [`spawn_components`] runs a set of them under one [`SubsystemHandle`].
//!
//! A component that fails or panics cancels the shared
//! [`CancellationToken`], so its siblings and the supervisor stop too.

use std::future::Future;
use std::pin::Pin;

use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::AppError;

pub type ComponentFuture = Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'static>>;

pub trait Component: Send + 'static {
    /// Stable identifier used in logs and the component tree.
    fn id(&self) -> &str;

    /// Consume the component and return its run loop.  The loop should
    /// return once `shutdown` is cancelled.
    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture;
}

/// Handle to a running set of components.
pub struct SubsystemHandle {
    inner: JoinHandle<Result<(), AppError>>,
}

impl SubsystemHandle {
    /// A handle that finishes once `shutdown` is cancelled.  Used when a
    /// subsystem has nothing to run.
    pub fn idle(shutdown: CancellationToken) -> Self {
        Self {
            inner: tokio::spawn(async move {
                shutdown.cancelled().await;
                Ok(())
            }),
        }
    }

    /// Wait for every component and return the first error.
    pub async fn join(self) -> Result<(), AppError> {
        match self.inner.await {
            Ok(r) => r,
            Err(e) => Err(AppError::Comms(format!("subsystem task panicked: {e}"))),
        }
    }
}

pub fn spawn_components(components: Vec<Box<dyn Component>>, shutdown: CancellationToken) -> SubsystemHandle {
    if components.is_empty() {
        info!("no components to run, waiting for shutdown");
        return SubsystemHandle::idle(shutdown);
    }

    let inner = tokio::spawn(async move {
        let mut set: JoinSet<Result<(), AppError>> = JoinSet::new();
        for component in components {
            debug!(component = %component.id(), "spawning component");
            set.spawn(component.run(shutdown.clone()));
        }

        let mut first_err: Option<AppError> = None;
        while let Some(res) = set.join_next().await {
            match res {
                Err(e) => {
                    error!("component panicked: {e}");
                    shutdown.cancel();
                    first_err.get_or_insert_with(|| AppError::Comms(format!("component panicked: {e}")));
                }
                Ok(Err(e)) => {
                    error!("component error: {e}");
                    shutdown.cancel();
                    first_err.get_or_insert(e);
                }
                Ok(Ok(())) => {}
            }
        }

        first_err.map_or(Ok(()), Err)
    });

    SubsystemHandle { inner }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Waits(&'static str);

    impl Component for Waits {
        fn id(&self) -> &str {
            self.0
        }

        fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
            Box::pin(async move {
                shutdown.cancelled().await;
                Ok(())
            })
        }
    }

    struct Fails;

    impl Component for Fails {
        fn id(&self) -> &str {
            "fails"
        }

        fn run(self: Box<Self>, _shutdown: CancellationToken) -> ComponentFuture {
            Box::pin(async { Err(AppError::Comms("bind failed".into())) })
        }
    }

    #[tokio::test]
    async fn failure_cancels_siblings() {
        let shutdown = CancellationToken::new();
        let handle = spawn_components(vec![Box::new(Waits("a")), Box::new(Fails)], shutdown.clone());
        let err = handle.join().await.unwrap_err();
        assert!(err.to_string().contains("bind failed"));
        assert!(shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn clean_shutdown() {
        let shutdown = CancellationToken::new();
        let handle = spawn_components(vec![Box::new(Waits("a")), Box::new(Waits("b"))], shutdown.clone());
        shutdown.cancel();
        handle.join().await.unwrap();
    }

    #[tokio::test]
    async fn empty_set_waits_for_shutdown() {
        let shutdown = CancellationToken::new();
        let handle = spawn_components(vec![], shutdown.clone());
        shutdown.cancel();
        handle.join().await.unwrap();
    }
}
