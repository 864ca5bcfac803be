// Background executor for an embedded module.
use std::future::Future;
use std::io;
use std::sync::{Mutex, PoisonError};
use std::thread;

use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

/// A dedicated OS thread driving a current-thread Tokio runtime.
///
/// Each engine gets one, so the module's tasks never share the host's
/// executor. Shutting down (or dropping) releases the thread; tasks still
/// queued on it are dropped.
#[derive(Debug)]
pub struct BackgroundExecutor {
    name: String,
    handle: Handle,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl BackgroundExecutor {
    pub fn spawn(name: impl Into<String>) -> io::Result<Self> {
        let name = name.into();
        let runtime = Builder::new_current_thread()
            .enable_all()
            .thread_name(name.clone())
            .build()?;
        let handle = runtime.handle().clone();
        let (tx, rx) = oneshot::channel::<()>();

        let thread_name = name.clone();
        let thread = thread::Builder::new().name(name.clone()).spawn(move || {
            runtime.block_on(async {
                let _ = rx.await;
            });
            runtime.shutdown_background();
            debug!(executor = %thread_name, "background executor stopped");
        })?;

        Ok(Self {
            name,
            handle,
            shutdown: Mutex::new(Some(tx)),
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Spawns a task on the executor's thread.
    pub fn spawn_task<F>(&self, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(fut)
    }

    pub fn is_running(&self) -> bool {
        self.shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Signal the thread to stop. Does not wait for it.
    pub fn shutdown(&self) {
        if let Some(tx) = self
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = tx.send(());
        }
    }

    /// Signal the thread to stop and wait for it to exit. Blocking; call from
    /// a blocking context.
    pub fn join(&self) {
        self.shutdown();
        let thread = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(thread) = thread {
            let _ = thread.join();
        }
    }
}

impl Drop for BackgroundExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tasks_run_on_the_named_thread() {
        let executor = BackgroundExecutor::spawn("engine-test").unwrap();
        let name = executor
            .spawn_task(async { thread::current().name().map(str::to_owned) })
            .await
            .unwrap();
        assert_eq!(name.as_deref(), Some("engine-test"));
        executor.shutdown();
        assert!(!executor.is_running());
    }

    #[test]
    fn join_waits_for_the_thread() {
        let executor = BackgroundExecutor::spawn("engine-join").unwrap();
        executor.join();
        assert!(!executor.is_running());
        // a second join is a no-op
        executor.join();
    }
}
