//! The actor system: spawning, the shared scheduler and global shutdown.
//!
//! Actors run one tokio task each on the runtime the system captured at
//! construction; that runtime is the shared worker pool. The system keeps a
//! registry of live services under its own lock, touched only by spawn,
//! teardown and shutdown, never by user handlers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::Handle;
use tracing::Instrument;

use troupe_api::errors::ActorError;

use crate::actor::{Actor, AsyncTask, FuncActor, TaskFinished};
use crate::behaviour::Behaviour;
use crate::cell::ActorCell;
use crate::context::Context;
use crate::envelope::Envelope;
use crate::mailbox::Mailbox;
use crate::service::{ActorId, ActorService};

#[derive(Error, Debug)]
pub enum SystemError {
    #[error("failed to capture tokio runtime handle: {0}")]
    NoRuntime(String),
    #[error("shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

#[derive(Debug, Clone)]
pub struct SystemConfig {
    /// Name used in tracing spans.
    pub name: String,
    /// How long `shutdown` waits for the registry to drain.
    pub shutdown_timeout: Duration,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            name: "troupe".to_string(),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Clone)]
pub struct System {
    shared: Arc<SystemShared>,
}

struct SystemShared {
    config: SystemConfig,
    handle: Handle,
    registry: RwLock<HashMap<ActorId, ActorService>>,
    next_actor_id: AtomicU64,
    shutting_down: AtomicBool,
}

impl System {
    /// Builds a system on the ambient tokio runtime.
    pub fn new(config: SystemConfig) -> Result<Self, SystemError> {
        let handle = Handle::try_current().map_err(|e| SystemError::NoRuntime(e.to_string()))?;
        Ok(Self {
            shared: Arc::new(SystemShared {
                config,
                handle,
                registry: RwLock::new(HashMap::new()),
                next_actor_id: AtomicU64::new(0),
                shutting_down: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &SystemConfig {
        &self.shared.config
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.shutting_down.load(Ordering::Acquire)
    }

    pub fn actor_count(&self) -> usize {
        self.shared.registry.read().unwrap().len()
    }

    /// Wires `actor` to the shared scheduler and returns its service. The
    /// behaviour is made inside the actor's own task, before its first
    /// drain.
    pub fn spawn<A: Actor>(&self, actor: A) -> ActorService {
        let (service, cell) = self.prepare(actor);
        let span = tracing::debug_span!(
            "actor",
            id = service.id(),
            system = %self.shared.config.name
        );
        self.shared.handle.spawn(cell.run().instrument(span));
        if self.is_shutting_down() {
            service.enqueue(Envelope::Quit(None));
        }
        service
    }

    /// Runs an ephemeral actor to completion on the current task. Used by
    /// front-ends to isolate per-request state in a throwaway actor.
    pub async fn become_actor<A: Actor>(&self, actor: A) {
        let (_service, cell) = self.prepare(actor);
        cell.run().await;
    }

    /// [`System::become_actor`] from a behaviour factory.
    pub async fn become_func(
        &self,
        factory: impl FnOnce(&mut Context<FuncActor>) -> Behaviour<FuncActor> + Send + 'static,
    ) {
        self.become_actor(FuncActor::new(factory)).await;
    }

    /// Spawns an actor that runs `f` off the scheduler and closes when it
    /// finishes. Typically paired with `monitor` or `depend_on` so the
    /// caller learns about completion.
    pub fn run_async_simple(&self, f: impl FnOnce() + Send + 'static) -> ActorService {
        let service = self.spawn(AsyncTask);
        let task_service = service.clone();
        self.shared.handle.spawn(async move {
            let err = tokio::task::spawn_blocking(f)
                .await
                .err()
                .map(|e| ActorError::Panicked(e.to_string()));
            task_service.send(TaskFinished(err));
        });
        service
    }

    /// Quits every registered actor and waits for the registry to drain.
    pub async fn shutdown(&self) -> Result<(), SystemError> {
        self.shared.shutting_down.store(true, Ordering::Release);
        let services: Vec<ActorService> = {
            let registry = self.shared.registry.read().unwrap();
            registry.values().cloned().collect()
        };
        tracing::info!(actors = services.len(), "shutting down actor system");
        for service in services {
            service.enqueue(Envelope::Quit(None));
        }
        let timeout = self.shared.config.shutdown_timeout;
        if self.wait_for_drain(timeout).await {
            return Ok(());
        }
        // Stragglers did not quiesce in time; close them outright.
        let remaining: Vec<ActorService> = {
            let registry = self.shared.registry.read().unwrap();
            registry.values().cloned().collect()
        };
        tracing::warn!(remaining = remaining.len(), "quit timed out, forcing close");
        for service in remaining {
            service.enqueue(Envelope::Close);
        }
        if self.wait_for_drain(Duration::from_millis(500)).await {
            return Ok(());
        }
        tracing::warn!(remaining = self.actor_count(), "shutdown timed out");
        Err(SystemError::ShutdownTimeout(timeout))
    }

    async fn wait_for_drain(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            while self.actor_count() > 0 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .is_ok()
    }

    fn prepare<A: Actor>(&self, actor: A) -> (ActorService, ActorCell<A>) {
        let id = self.shared.next_actor_id.fetch_add(1, Ordering::AcqRel) + 1;
        let mailbox = Arc::new(Mailbox::new());
        let service = ActorService::new(id, mailbox.clone());
        self.shared
            .registry
            .write()
            .unwrap()
            .insert(id, service.clone());
        let cell = ActorCell::new(actor, service.clone(), self.clone(), mailbox);
        (service, cell)
    }

    pub(crate) fn deregister(&self, id: ActorId) {
        self.shared.registry.write().unwrap().remove(&id);
    }
}
