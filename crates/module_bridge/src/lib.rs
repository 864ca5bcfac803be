pub mod channel;
pub mod engine;
pub mod error;
pub mod jsonrpc;
pub mod message;
pub mod messenger;
pub mod registry;
pub mod runtime;
pub mod transport;

pub use channel::{AsyncMethodHandler, MethodCallHandler, MethodChannel, Reply};
pub use engine::{EmbeddedModule, Engine, EngineOptions, ModuleContext, ViewHandle};
pub use error::{ChannelError, EngineError};
pub use message::{CallOutcome, DispatchError, EngineState, MethodCall, SurfacePolicy};
pub use messenger::Messenger;
pub use registry::{EngineRegistry, ModuleFactory};
pub use transport::Transport;
