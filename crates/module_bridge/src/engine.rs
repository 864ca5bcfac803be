use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::channel::MethodChannel;
use crate::error::EngineError;
use crate::message::{EngineState, SurfacePolicy};
use crate::messenger::Messenger;
use crate::runtime::BackgroundExecutor;
use crate::transport::Transport;

/// The embedded module's code, as seen by the engine that hosts it.
#[async_trait]
pub trait EmbeddedModule: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Default entrypoint. Runs once on the engine's background executor;
    /// register channel handlers here. An error aborts engine construction.
    async fn start(&self, ctx: ModuleContext) -> anyhow::Result<()>;

    /// Called when the engine stops.
    async fn stop(&self) {}
}

/// What a module gets to talk to its host.
#[derive(Clone, Debug)]
pub struct ModuleContext {
    engine_id: String,
    messenger: Arc<Messenger>,
}

impl ModuleContext {
    pub fn engine_id(&self) -> &str {
        &self.engine_id
    }

    pub fn messenger(&self) -> &Arc<Messenger> {
        &self.messenger
    }

    /// The module-side end of channel `name`.
    pub fn channel(&self, name: impl Into<String>) -> MethodChannel {
        MethodChannel::new(name, Arc::clone(&self.messenger))
    }
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub surface_policy: SurfacePolicy,
    /// Upper bound on `EmbeddedModule::stop`.
    pub stop_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            surface_policy: SurfacePolicy::Reuse,
            stop_timeout: Duration::from_secs(2),
        }
    }
}

/// A running execution context for one embedded module.
///
/// The module runs on its own background executor; the host reaches it only
/// through the messenger returned by [`Engine::messenger`].
pub struct Engine {
    id: String,
    instance_id: Uuid,
    state: Mutex<EngineState>,
    module: Arc<dyn EmbeddedModule>,
    options: EngineOptions,
    host: Arc<Messenger>,
    module_side: Arc<Messenger>,
    executor: BackgroundExecutor,
    surface: Mutex<Weak<Surface>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("id", &self.id)
            .field("instance_id", &self.instance_id)
            .field("module", &self.module.name())
            .field("state", &self.state())
            .finish()
    }
}

impl Engine {
    /// Build an engine and run the module's entrypoint on a fresh background
    /// executor. The host side of the transport dispatches on the caller's
    /// executor.
    pub async fn start(
        id: impl Into<String>,
        module: Arc<dyn EmbeddedModule>,
        options: EngineOptions,
    ) -> Result<Arc<Engine>, EngineError> {
        let id = id.into();
        let start_failed = |reason: String| EngineError::StartFailed {
            id: id.clone(),
            reason,
        };

        let host_executor = Handle::try_current().map_err(|e| start_failed(e.to_string()))?;
        let executor = BackgroundExecutor::spawn(format!("engine-{id}"))
            .map_err(|e| start_failed(format!("could not spawn executor: {e}")))?;

        let (host_end, module_end) = Transport::pair();
        let host = Messenger::spawn(format!("{id}/host"), host_end, &host_executor);
        let module_side = Messenger::spawn(format!("{id}/module"), module_end, executor.handle());

        info!(engine = %id, module = module.name(), "starting engine");
        let ctx = ModuleContext {
            engine_id: id.clone(),
            messenger: Arc::clone(&module_side),
        };
        let entry = Arc::clone(&module);
        let failure = match executor.spawn_task(async move { entry.start(ctx).await }).await {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(format!("{err:#}")),
            Err(err) => Some(format!("entrypoint aborted: {err}")),
        };

        if let Some(reason) = failure {
            error!(engine = %id, "entrypoint failed: {reason}");
            host.close();
            module_side.close();
            executor.shutdown();
            return Err(start_failed(reason));
        }

        let engine = Arc::new(Engine {
            instance_id: Uuid::new_v4(),
            state: Mutex::new(EngineState::Running),
            module,
            options,
            host,
            module_side,
            executor,
            surface: Mutex::new(Weak::new()),
            id,
        });
        debug!(engine = %engine.id, instance = %engine.instance_id, "engine running");
        Ok(engine)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Distinct for every construction, even under the same id.
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn module_name(&self) -> &str {
        self.module.name()
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Host-side endpoint of the engine's transport.
    pub fn messenger(&self) -> &Arc<Messenger> {
        &self.host
    }

    /// Host-side end of channel `name`.
    pub fn channel(&self, name: impl Into<String>) -> MethodChannel {
        MethodChannel::new(name, Arc::clone(&self.host))
    }

    pub fn has_active_view(&self) -> bool {
        self.surface
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .strong_count()
            > 0
    }

    /// Bind a view to the running module. Never starts a second execution
    /// context; at most one surface is live per engine.
    pub fn attach_view(self: &Arc<Self>) -> Result<ViewHandle, EngineError> {
        if !self.is_running() {
            return Err(EngineError::NotRunning(self.id.clone()));
        }

        let mut slot = self.surface.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = slot.upgrade() {
            return match self.options.surface_policy {
                SurfacePolicy::Reuse => {
                    debug!(engine = %self.id, surface = %existing.id, "reusing attached view");
                    Ok(ViewHandle { surface: existing })
                }
                SurfacePolicy::Exclusive => Err(EngineError::SurfaceConflict(self.id.clone())),
            };
        }

        let surface = Arc::new(Surface {
            id: Uuid::new_v4(),
            engine: Arc::clone(self),
        });
        *slot = Arc::downgrade(&surface);
        info!(engine = %self.id, surface = %surface.id, "view attached");
        Ok(ViewHandle { surface })
    }

    /// Stop the module and tear the transport down. Pending calls on either
    /// side resolve as closed. Idempotent.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == EngineState::Stopped {
                return;
            }
            *state = EngineState::Stopped;
        }

        let module = Arc::clone(&self.module);
        let stopping = self.executor.spawn_task(async move { module.stop().await });
        if tokio::time::timeout(self.options.stop_timeout, stopping)
            .await
            .is_err()
        {
            warn!(
                engine = %self.id,
                "module did not stop within {} ms",
                self.options.stop_timeout.as_millis()
            );
        }

        self.host.close();
        self.module_side.close();
        self.executor.shutdown();
        info!(engine = %self.id, instance = %self.instance_id, "engine stopped");
    }
}

struct Surface {
    id: Uuid,
    engine: Arc<Engine>,
}

impl Drop for Surface {
    fn drop(&mut self) {
        debug!(engine = %self.engine.id, surface = %self.id, "view detached");
    }
}

/// A presentable surface bound to an engine. Clones refer to the same
/// surface; it detaches when the last clone is dropped.
#[derive(Clone)]
pub struct ViewHandle {
    surface: Arc<Surface>,
}

impl std::fmt::Debug for ViewHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewHandle")
            .field("surface", &self.surface.id)
            .field("engine", &self.surface.engine.id)
            .finish()
    }
}

impl ViewHandle {
    pub fn id(&self) -> Uuid {
        self.surface.id
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.surface.engine
    }

    pub fn engine_id(&self) -> &str {
        &self.surface.engine.id
    }

    pub fn same_surface(&self, other: &ViewHandle) -> bool {
        Arc::ptr_eq(&self.surface, &other.surface)
    }
}
