use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use module_bridge::channel::{MethodChannel, Reply};
use module_bridge::engine::{EmbeddedModule, ModuleContext};
use module_bridge::error::ChannelError;
use module_bridge::message::{HostMethod, INVALID_ARGUMENT, MethodCall, ModuleMethod};
use serde_json::json;
use tracing::{debug, info};

/// In-process stand-in for the embedded UI module.
///
/// Answers `showMessage` on its channel and can ask the host to show a
/// dialog. Shared across engine restarts: each `start` rebinds it to the new
/// engine's channel.
#[derive(Debug)]
pub struct DemoModule {
    channel_name: String,
    received: Arc<Mutex<Vec<String>>>,
    channel: Mutex<Option<MethodChannel>>,
    fail_start: AtomicBool,
}

impl DemoModule {
    pub fn new(channel_name: impl Into<String>) -> Self {
        Self {
            channel_name: channel_name.into(),
            received: Arc::default(),
            channel: Mutex::new(None),
            fail_start: AtomicBool::new(false),
        }
    }

    /// Make the next `start` fail.
    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    /// Every `showMessage` text received so far.
    pub fn received(&self) -> Vec<String> {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_bound(&self) -> bool {
        self.channel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Ask the host to show `text` in a native dialog; returns the host's
    /// acknowledgement.
    pub async fn show_native_dialog(&self, text: &str) -> Result<String, ChannelError> {
        let channel = self
            .channel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| ChannelError::Closed(self.channel_name.clone()))?;
        channel
            .invoke(HostMethod::ShowDialog, json!({ "message": text }))
            .await
    }
}

fn on_module_call(received: &Mutex<Vec<String>>, call: MethodCall, reply: Reply) {
    match ModuleMethod::from_str(&call.method) {
        Ok(ModuleMethod::ShowMessage) => match call.arguments_as::<String>() {
            Ok(text) => {
                debug!("module received: {text}");
                received
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(text.clone());
                reply.success(format!("Message received: {text}"));
            }
            Err(_) => reply.error(INVALID_ARGUMENT, "Message must be a string", None),
        },
        Err(_) => reply.not_implemented(),
    }
}

#[async_trait]
impl EmbeddedModule for DemoModule {
    fn name(&self) -> &str {
        "demo"
    }

    async fn start(&self, ctx: ModuleContext) -> anyhow::Result<()> {
        if self.fail_start.load(Ordering::SeqCst) {
            anyhow::bail!("module entrypoint refused to start");
        }

        let channel = ctx.channel(self.channel_name.clone());
        let received = Arc::clone(&self.received);
        channel.set_method_call_handler(move |call: MethodCall, reply: Reply| {
            on_module_call(&received, call, reply)
        });
        *self.channel.lock().unwrap_or_else(PoisonError::into_inner) = Some(channel);
        info!(engine = ctx.engine_id(), channel = %self.channel_name, "demo module ready");
        Ok(())
    }

    async fn stop(&self) {
        if let Some(channel) = self
            .channel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            channel.clear_method_call_handler();
        }
    }
}
