use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use dashmap::DashMap;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use crate::channel::{MethodCallHandler, Reply};
use crate::error::ChannelError;
use crate::jsonrpc::{Frame, Id, Message, Request, Response};
use crate::message::{CallOutcome, MethodCall};
use crate::transport::Transport;

type CallResult = Result<CallOutcome, ChannelError>;

struct PendingCall {
    channel: String,
    method: String,
    tx: oneshot::Sender<CallResult>,
}

/// One endpoint of a transport, multiplexing every method channel over it.
///
/// Outbound calls are tracked in a pending table keyed by call id, so a slow
/// call never sees another call's answer. Inbound requests are handed to the
/// handler registered for their channel, on the `dispatch` executor and in
/// arrival order.
pub struct Messenger {
    label: String,
    outbound: Mutex<Option<UnboundedSender<Frame>>>,
    pending: DashMap<i64, PendingCall>,
    handlers: DashMap<String, Arc<dyn MethodCallHandler>>,
    next_id: AtomicI64,
    closed: AtomicBool,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Messenger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Messenger")
            .field("label", &self.label)
            .field("pending", &self.pending.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Messenger {
    /// Start an endpoint over `transport`. The inbound reader, and therefore
    /// every handler invocation, runs on `dispatch`.
    pub fn spawn(label: impl Into<String>, transport: Transport, dispatch: &Handle) -> Arc<Self> {
        let Transport { outbound, inbound } = transport;
        let messenger = Arc::new(Self {
            label: label.into(),
            outbound: Mutex::new(Some(outbound)),
            pending: DashMap::new(),
            handlers: DashMap::new(),
            next_id: AtomicI64::new(1),
            closed: AtomicBool::new(false),
            reader: Mutex::new(None),
        });

        let task = dispatch.spawn(read_loop(Arc::downgrade(&messenger), inbound));
        *messenger.reader.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
        messenger
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Calls sent but not yet resolved.
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Install the handler for `channel`, replacing any previous one.
    pub fn set_handler(&self, channel: &str, handler: Arc<dyn MethodCallHandler>) {
        if self.handlers.insert(channel.to_owned(), handler).is_some() {
            debug!(messenger = %self.label, %channel, "replaced method call handler");
        }
    }

    pub fn remove_handler(&self, channel: &str) {
        self.handlers.remove(channel);
    }

    /// Tear the endpoint down: every pending call resolves with
    /// [`ChannelError::Closed`], the outbound half is dropped so the peer sees
    /// the disconnect, later calls fail immediately and registered handlers
    /// are released. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let ids: Vec<i64> = self.pending.iter().map(|entry| *entry.key()).collect();
        let failed = ids.len();
        for id in ids {
            if let Some((_, call)) = self.pending.remove(&id) {
                trace!(messenger = %self.label, channel = %call.channel, method = %call.method, "call {id} closed");
                let _ = call.tx.send(Err(ChannelError::Closed(call.channel)));
            }
        }

        if let Some(task) = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }

        // handlers may hold channels over this messenger; drop them outside the map lock
        let channels: Vec<String> = self.handlers.iter().map(|entry| entry.key().clone()).collect();
        let released: Vec<_> = channels
            .iter()
            .filter_map(|channel| self.handlers.remove(channel))
            .collect();
        drop(released);
        debug!(messenger = %self.label, failed, "messenger closed");
    }

    pub(crate) async fn call(
        &self,
        channel: &str,
        method: &str,
        params: Option<Value>,
    ) -> CallResult {
        if self.is_closed() {
            return Err(ChannelError::Closed(channel.to_owned()));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            id,
            PendingCall {
                channel: channel.to_owned(),
                method: method.to_owned(),
                tx,
            },
        );
        // close() may have drained the table between the check above and the insert
        if self.is_closed() {
            self.pending.remove(&id);
            return Err(ChannelError::Closed(channel.to_owned()));
        }

        let frame = Frame::request(channel, Request::call(Id::Number(id), method, params));
        if let Err(err) = self.send_frame(frame) {
            self.pending.remove(&id);
            return Err(err);
        }

        rx.await
            .unwrap_or_else(|_| Err(ChannelError::Closed(channel.to_owned())))
    }

    pub(crate) fn notify(&self, channel: &str, method: &str, params: Option<Value>) -> Result<(), ChannelError> {
        self.send_frame(Frame::request(channel, Request::notification(method, params)))
    }

    pub(crate) fn send_frame(&self, frame: Frame) -> Result<(), ChannelError> {
        let guard = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(tx) => tx
                .send(frame)
                .map_err(|err| ChannelError::Closed(err.0.channel)),
            None => Err(ChannelError::Closed(frame.channel)),
        }
    }

    fn route(self: &Arc<Self>, frame: Frame) {
        let Frame { channel, payload } = frame;
        match payload {
            Message::Response(rsp) => self.complete(&channel, rsp),
            Message::Request(req) => self.dispatch(channel, req),
        }
    }

    fn complete(&self, channel: &str, rsp: Response) {
        let Id::Number(id) = rsp.id else {
            warn!(messenger = %self.label, %channel, "response with foreign id {:?}", rsp.id);
            return;
        };
        match self.pending.remove(&id) {
            Some((_, call)) => {
                let _ = call.tx.send(Ok(rsp.into_outcome()));
            }
            None => debug!(messenger = %self.label, %channel, "no pending call {id}"),
        }
    }

    fn dispatch(self: &Arc<Self>, channel: String, req: Request) {
        let reply = Reply::new(Arc::downgrade(self), channel.clone(), req.method.clone(), req.id);
        let call = MethodCall::new(req.method, req.params.unwrap_or(Value::Null));

        // clone out of the map so a handler may re-register without deadlocking
        let handler = self.handlers.get(&channel).map(|h| Arc::clone(h.value()));
        match handler {
            Some(handler) => {
                let method = call.method.clone();
                // an unwinding handler drops its Reply, which answers NOT_IMPLEMENTED
                if catch_unwind(AssertUnwindSafe(|| handler.on_method_call(call, reply))).is_err() {
                    error!(messenger = %self.label, %channel, %method, "method call handler panicked");
                }
            }
            None => {
                debug!(messenger = %self.label, %channel, method = %call.method, "no handler registered");
                reply.not_implemented();
            }
        }
    }
}

impl Drop for Messenger {
    fn drop(&mut self) {
        self.close();
    }
}

/// Closes the messenger however the reader exits, unwinding included.
struct CloseOnExit(Weak<Messenger>);

impl Drop for CloseOnExit {
    fn drop(&mut self) {
        if let Some(messenger) = self.0.upgrade() {
            if !messenger.is_closed() {
                debug!(messenger = %messenger.label, "reader stopped");
            }
            messenger.close();
        }
    }
}

async fn read_loop(messenger: Weak<Messenger>, mut inbound: UnboundedReceiver<Frame>) {
    let _guard = CloseOnExit(messenger.clone());
    while let Some(frame) = inbound.recv().await {
        let Some(messenger) = messenger.upgrade() else {
            return;
        };
        messenger.route(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jsonrpc::METHOD_NOT_FOUND;
    use serde_json::json;
    use std::time::Duration;

    fn endpoints() -> (Arc<Messenger>, Arc<Messenger>) {
        let (a, b) = Transport::pair();
        let handle = Handle::current();
        (Messenger::spawn("host", a, &handle), Messenger::spawn("module", b, &handle))
    }

    #[tokio::test]
    async fn unknown_channel_resolves_not_implemented() {
        let (host, _module) = endpoints();
        let outcome = host.call("nobody/listens", "showMessage", Some(json!("hi"))).await.unwrap();
        assert_eq!(outcome, CallOutcome::NotImplemented);
        assert_eq!(host.pending_calls(), 0);
    }

    #[tokio::test]
    async fn close_fails_pending_and_later_calls() {
        let (host, module) = endpoints();
        let parked: Arc<Mutex<Vec<Reply>>> = Arc::new(Mutex::new(vec![]));
        let sink = parked.clone();
        module.set_handler(
            "ch",
            Arc::new(move |_call: MethodCall, reply: Reply| sink.lock().unwrap().push(reply)),
        );

        let host2 = host.clone();
        let pending = tokio::spawn(async move { host2.call("ch", "wait", None).await });
        while parked.lock().unwrap().is_empty() {
            tokio::task::yield_now().await;
        }
        assert_eq!(host.pending_calls(), 1);

        host.close();
        let res = tokio::time::timeout(Duration::from_millis(200), pending)
            .await
            .expect("pending call must resolve")
            .unwrap();
        assert_eq!(res, Err(ChannelError::Closed("ch".into())));
        assert!(host.call("ch", "again", None).await.unwrap_err().is_closed());
    }

    #[tokio::test]
    async fn peer_teardown_closes_this_side() {
        let (host, module) = endpoints();
        module.close();
        let res = tokio::time::timeout(Duration::from_millis(200), async {
            while !host.is_closed() {
                tokio::task::yield_now().await;
            }
        })
        .await;
        assert!(res.is_ok(), "host should observe the module going away");
    }

    #[tokio::test]
    async fn close_releases_handlers_holding_the_messenger() {
        let (_host, module) = endpoints();
        let own = Arc::clone(&module);
        module.set_handler(
            "ch",
            Arc::new(move |_call: MethodCall, reply: Reply| {
                let _ = own.label();
                reply.success("ok");
            }),
        );
        let weak = Arc::downgrade(&module);

        module.close();
        drop(module);
        assert!(weak.upgrade().is_none(), "handler kept the messenger alive");
    }

    #[tokio::test]
    async fn stray_response_is_ignored() {
        let (host, _module) = endpoints();
        host.route(Frame::response(
            "ch",
            Response::fail(Id::Number(4242), METHOD_NOT_FOUND, "nope", None),
        ));
        host.route(Frame::response("ch", Response::success(Id::String("x".into()), json!(1))));
        assert!(!host.is_closed());
    }
}
