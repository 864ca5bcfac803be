use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use module_bridge::channel::{MethodChannel, Reply};
use module_bridge::engine::{Engine, ViewHandle};
use module_bridge::error::{ChannelError, EngineError};
use module_bridge::message::{HostMethod, INVALID_ARGUMENT, MethodCall, ModuleMethod};
use module_bridge::registry::EngineRegistry;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::HostConfig;
use crate::presenter::Presenter;

pub const DIALOG_TITLE: &str = "Message from module";
pub const DIALOG_SHOWN: &str = "Dialog shown in host";
pub const MISSING_MESSAGE: &str = "Message argument is required";

#[derive(Error, Debug)]
pub enum HostError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostStatus {
    pub engine_id: String,
    pub channel: String,
    pub running: bool,
    pub instance_id: Option<Uuid>,
    pub view_attached: bool,
}

/// The host side of the embedding: owns the configured engine, presents its
/// view on demand and answers the module's `showDialog` requests.
pub struct HostApp {
    config: HostConfig,
    registry: Arc<EngineRegistry>,
    presenter: Arc<dyn Presenter>,
    view: Mutex<Option<ViewHandle>>,
    // engine instance the showDialog handler is installed on
    bound: Mutex<Option<Uuid>>,
}

impl std::fmt::Debug for HostApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostApp")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl HostApp {
    /// Start the configured engine right away so the first presentation is
    /// fast.
    pub async fn launch(
        config: HostConfig,
        registry: Arc<EngineRegistry>,
        presenter: Arc<dyn Presenter>,
    ) -> Result<Self, HostError> {
        let app = Self {
            config,
            registry,
            presenter,
            view: Mutex::new(None),
            bound: Mutex::new(None),
        };
        app.engine().await?;
        info!(engine = %app.config.engine_id, "host launched");
        Ok(app)
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<EngineRegistry> {
        &self.registry
    }

    /// Acquire the configured engine and install the host handler on it if
    /// this instance does not have it yet.
    async fn engine(&self) -> Result<Arc<Engine>, HostError> {
        let engine = self
            .registry
            .acquire(&self.config.engine_id)
            .await
            .map_err(|err| self.report(err))?;

        let mut bound = self.bound.lock().unwrap_or_else(PoisonError::into_inner);
        if *bound != Some(engine.instance_id()) {
            let presenter = Arc::clone(&self.presenter);
            engine
                .channel(self.config.channel.clone())
                .set_method_call_handler(move |call: MethodCall, reply: Reply| {
                    on_host_call(presenter.as_ref(), call, reply)
                });
            *bound = Some(engine.instance_id());
            debug!(engine = %engine.id(), channel = %self.config.channel, "host handler installed");
        }
        Ok(engine)
    }

    pub async fn channel(&self) -> Result<MethodChannel, HostError> {
        Ok(self.engine().await?.channel(self.config.channel.clone()))
    }

    /// Present the module full screen. Reuses the existing view if one is
    /// already shown.
    pub async fn open_module(&self) -> Result<ViewHandle, HostError> {
        if let Some(view) = self.current_view() {
            if view.engine().is_running() {
                self.presenter.present(&view);
                return Ok(view);
            }
        }

        let engine = self.engine().await?;
        let view = engine.attach_view().map_err(|err| self.report(err))?;
        self.presenter.present(&view);
        *self.view.lock().unwrap_or_else(PoisonError::into_inner) = Some(view.clone());
        info!(engine = %engine.id(), surface = %view.id(), "module opened");
        Ok(view)
    }

    /// Dismiss the module view. Returns whether one was shown.
    pub fn close_module(&self) -> bool {
        let view = self.view.lock().unwrap_or_else(PoisonError::into_inner).take();
        match view {
            Some(view) => {
                self.presenter.dismiss(&view);
                info!(engine = %view.engine_id(), "module closed");
                true
            }
            None => false,
        }
    }

    pub fn is_module_open(&self) -> bool {
        self.current_view().is_some()
    }

    /// Send `showMessage` to the module, show its answer through the
    /// presenter and return it. Without a text, a timestamped greeting is sent.
    pub async fn send_message(&self, text: Option<&str>) -> Result<Value, HostError> {
        let text = text.map(str::to_owned).unwrap_or_else(default_greeting);
        let channel = self.channel().await?;

        match channel.invoke::<Value, _>(ModuleMethod::ShowMessage, &text).await {
            Ok(response) => {
                let shown = response.as_str().map(str::to_owned).unwrap_or_else(|| response.to_string());
                info!("module response: {shown}");
                self.presenter.notify(&format!("Module response: {shown}"));
                Ok(response)
            }
            Err(err) => {
                warn!("showMessage failed: {err}");
                Err(self.report(err))
            }
        }
    }

    pub async fn status(&self) -> HostStatus {
        let engine = self.registry.get(&self.config.engine_id).await;
        HostStatus {
            engine_id: self.config.engine_id.clone(),
            channel: self.config.channel.clone(),
            running: engine.as_ref().is_some_and(|e| e.is_running()),
            instance_id: engine.as_ref().map(|e| e.instance_id()),
            view_attached: engine.as_ref().is_some_and(|e| e.has_active_view()),
        }
    }

    /// Close the view, release the engine and stop everything else the
    /// registry still holds.
    pub async fn shutdown(&self) {
        self.close_module();
        match self.registry.release(&self.config.engine_id).await {
            Ok(()) | Err(EngineError::Unknown(_)) => {}
            Err(err) => warn!("release during shutdown: {err}"),
        }
        self.registry.shutdown_all().await;
        *self.bound.lock().unwrap_or_else(PoisonError::into_inner) = None;
        info!("host shut down");
    }

    fn current_view(&self) -> Option<ViewHandle> {
        self.view
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn report(&self, err: impl Into<HostError>) -> HostError {
        let err = err.into();
        self.presenter.notify_error(&err.to_string());
        err
    }
}

fn default_greeting() -> String {
    format!(
        "Hello from host! Time: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    )
}

fn on_host_call(presenter: &dyn Presenter, call: MethodCall, reply: Reply) {
    match HostMethod::from_str(&call.method) {
        Ok(HostMethod::ShowDialog) => match call.argument::<String>("message") {
            Some(message) => {
                presenter.show_dialog(DIALOG_TITLE, &message);
                reply.success(DIALOG_SHOWN);
            }
            None => reply.error(INVALID_ARGUMENT, MISSING_MESSAGE, None),
        },
        Err(_) => reply.not_implemented(),
    }
}
