use std::sync::{Arc, Weak};
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{Level, warn};

use crate::error::ChannelError;
use crate::jsonrpc::{Frame, Id, Response};
use crate::message::{CallOutcome, MethodCall};
use crate::messenger::Messenger;

/// Receives inbound calls for one channel.
///
/// Called on the endpoint's dispatch executor, one call at a time and in the
/// order the calls were sent. The handler answers through `reply`, either
/// right away or later from another task.
pub trait MethodCallHandler: Send + Sync + 'static {
    fn on_method_call(&self, call: MethodCall, reply: Reply);
}

impl<F> MethodCallHandler for F
where
    F: Fn(MethodCall, Reply) + Send + Sync + 'static,
{
    fn on_method_call(&self, call: MethodCall, reply: Reply) {
        self(call, reply)
    }
}

/// Handler that computes its outcome asynchronously.
///
/// Calls are started in arrival order; their answers go out as each
/// completes, so a slow call does not hold back the ones behind it.
#[async_trait]
pub trait AsyncMethodHandler: Send + Sync + 'static {
    async fn handle(&self, call: MethodCall) -> CallOutcome;
}

struct AsyncAdapter<H>(Arc<H>);

impl<H: AsyncMethodHandler> MethodCallHandler for AsyncAdapter<H> {
    fn on_method_call(&self, call: MethodCall, reply: Reply) {
        let handler = Arc::clone(&self.0);
        tokio::spawn(async move {
            let outcome = handler.handle(call).await;
            reply.send(outcome);
        });
    }
}

/// Single-shot responder for one inbound call.
///
/// Every answering method consumes the reply, so a call is resolved at most
/// once. A reply dropped without an answer resolves the call as
/// not-implemented.
pub struct Reply {
    messenger: Weak<Messenger>,
    channel: String,
    method: String,
    id: Option<Id>,
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reply")
            .field("channel", &self.channel)
            .field("method", &self.method)
            .field("id", &self.id)
            .finish()
    }
}

impl Reply {
    pub(crate) fn new(messenger: Weak<Messenger>, channel: String, method: String, id: Option<Id>) -> Self {
        Self {
            messenger,
            channel,
            method,
            id,
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Notifications carry no id and expect no answer.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    pub fn success(self, value: impl Into<Value>) {
        self.send(CallOutcome::Success(value.into()));
    }

    pub fn error(self, code: impl Into<String>, message: impl Into<String>, details: Option<Value>) {
        self.send(CallOutcome::error(code, message, details));
    }

    pub fn not_implemented(self) {
        self.send(CallOutcome::NotImplemented);
    }

    pub fn send(mut self, outcome: CallOutcome) {
        self.finish(outcome);
    }

    fn finish(&mut self, outcome: CallOutcome) {
        let Some(id) = self.id.take() else {
            return;
        };
        let Some(messenger) = self.messenger.upgrade() else {
            return;
        };
        let frame = Frame::response(self.channel.clone(), Response::from_outcome(id, outcome));
        // the caller may already be gone; its side resolved the call as closed
        let _ = messenger.send_frame(frame);
    }
}

impl Drop for Reply {
    fn drop(&mut self) {
        if self.id.is_some() {
            warn!(channel = %self.channel, method = %self.method, "reply dropped without an answer");
            self.finish(CallOutcome::NotImplemented);
        }
    }
}

/// A named duplex method channel over one messenger.
///
/// Both endpoints must use the same name. Cloning is cheap; clones share the
/// messenger and therefore the handler slot.
#[derive(Clone, Debug)]
pub struct MethodChannel {
    name: String,
    messenger: Arc<Messenger>,
}

impl MethodChannel {
    pub fn new(name: impl Into<String>, messenger: Arc<Messenger>) -> Self {
        Self {
            name: name.into(),
            messenger,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn messenger(&self) -> &Arc<Messenger> {
        &self.messenger
    }

    /// Install the handler for this channel on this endpoint. The last
    /// registration wins.
    pub fn set_method_call_handler<H: MethodCallHandler>(&self, handler: H) {
        self.messenger.set_handler(&self.name, Arc::new(handler));
    }

    pub fn set_async_method_call_handler<H: AsyncMethodHandler>(&self, handler: H) {
        self.messenger
            .set_handler(&self.name, Arc::new(AsyncAdapter(Arc::new(handler))));
    }

    /// Remove the handler; inbound calls then resolve as not-implemented.
    pub fn clear_method_call_handler(&self) {
        self.messenger.remove_handler(&self.name);
    }

    /// Send a call and wait for its outcome without blocking the executor.
    ///
    /// Not-implemented and handler errors are outcomes, not errors; `Err` means
    /// the arguments did not serialize or the channel was torn down.
    pub async fn invoke_method<A: Serialize>(
        &self,
        method: impl AsRef<str>,
        args: A,
    ) -> Result<CallOutcome, ChannelError> {
        let method = method.as_ref();
        let params = to_params(args)?;
        let started = Instant::now();
        let result = self.messenger.call(&self.name, method, params).await;
        let latency_ms = started.elapsed().as_secs_f64() * 1_000.0;

        tracing::event!(
            target: "call",
            Level::INFO,
            channel = %self.name,
            method,
            latency_ms,
            status = match &result {
                Ok(outcome) => outcome.status(),
                Err(_) => "closed",
            },
        );
        result
    }

    /// Typed variant of [`invoke_method`](Self::invoke_method): the success
    /// payload is deserialized into `T`, other outcomes become errors.
    pub async fn invoke<T: DeserializeOwned, A: Serialize>(
        &self,
        method: impl AsRef<str>,
        args: A,
    ) -> Result<T, ChannelError> {
        let method = method.as_ref();
        match self.invoke_method(method, args).await? {
            CallOutcome::Success(value) => Ok(serde_json::from_value(value)?),
            CallOutcome::Error(err) => Err(ChannelError::dispatch(method, err)),
            CallOutcome::NotImplemented => Err(ChannelError::NotImplemented(method.to_owned())),
        }
    }

    /// Fire-and-forget call; the remote handler's answer is discarded.
    pub fn notify<A: Serialize>(&self, method: impl AsRef<str>, args: A) -> Result<(), ChannelError> {
        let params = to_params(args)?;
        self.messenger.notify(&self.name, method.as_ref(), params)
    }
}

fn to_params<A: Serialize>(args: A) -> Result<Option<Value>, ChannelError> {
    match serde_json::to_value(args)? {
        Value::Null => Ok(None),
        value => Ok(Some(value)),
    }
}
