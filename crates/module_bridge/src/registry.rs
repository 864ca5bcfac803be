use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::engine::{EmbeddedModule, Engine, EngineOptions, ViewHandle};
use crate::error::EngineError;

/// Produces the module code for a given engine id.
pub type ModuleFactory = Arc<dyn Fn(&str) -> Arc<dyn EmbeddedModule> + Send + Sync>;

/// Keyed table of running engines.
///
/// `acquire` is lazy and idempotent per id: concurrent callers for the same
/// id serialize on one lock, so at most one engine is ever constructed for it.
pub struct EngineRegistry {
    engines: Mutex<HashMap<String, Arc<Engine>>>,
    factory: ModuleFactory,
    options: EngineOptions,
}

impl std::fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRegistry")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl EngineRegistry {
    pub fn new(factory: ModuleFactory, options: EngineOptions) -> Self {
        Self {
            engines: Mutex::new(HashMap::new()),
            factory,
            options,
        }
    }

    /// Registry whose every engine runs `module`.
    pub fn with_module(module: Arc<dyn EmbeddedModule>, options: EngineOptions) -> Self {
        Self::new(Arc::new(move |_id: &str| Arc::clone(&module)), options)
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// The engine registered under `id`, starting one if there is none.
    /// On a start failure nothing is registered.
    pub async fn acquire(&self, id: &str) -> Result<Arc<Engine>, EngineError> {
        let mut engines = self.engines.lock().await;
        if let Some(engine) = engines.get(id) {
            if engine.is_running() {
                return Ok(Arc::clone(engine));
            }
            debug!(engine = %id, "replacing stopped engine");
            engines.remove(id);
        }

        let module = (self.factory)(id);
        let engine = Engine::start(id, module, self.options.clone()).await?;
        engines.insert(id.to_owned(), Arc::clone(&engine));
        info!(engine = %id, instance = %engine.instance_id(), "engine registered");
        Ok(engine)
    }

    /// Acquire `id` and bind a view to it.
    pub async fn attach_view(&self, id: &str) -> Result<ViewHandle, EngineError> {
        self.acquire(id).await?.attach_view()
    }

    /// Stop and unregister `id`. Refused while a view is attached; the engine
    /// is then left running and registered.
    pub async fn release(&self, id: &str) -> Result<(), EngineError> {
        let mut engines = self.engines.lock().await;
        let engine = engines
            .get(id)
            .ok_or_else(|| EngineError::Unknown(id.to_owned()))?;
        if engine.has_active_view() {
            warn!(engine = %id, "release refused: view still attached");
            return Err(EngineError::ViewAttached(id.to_owned()));
        }

        let Some(engine) = engines.remove(id) else {
            return Err(EngineError::Unknown(id.to_owned()));
        };
        engine.stop().await;
        info!(engine = %id, "engine released");
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Engine>> {
        self.engines.lock().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.engines.lock().await.contains_key(id)
    }

    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.engines.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Stop every engine regardless of attached views.
    pub async fn shutdown_all(&self) {
        let drained: Vec<(String, Arc<Engine>)> = self.engines.lock().await.drain().collect();
        for (id, engine) in drained {
            engine.stop().await;
            info!(engine = %id, "engine shut down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ModuleContext;
    use crate::message::{CallOutcome, DEFAULT_CHANNEL};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        starts: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddedModule for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn start(&self, _ctx: ModuleContext) -> anyhow::Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            Ok(())
        }
    }

    struct Refuses;

    #[async_trait]
    impl EmbeddedModule for Refuses {
        fn name(&self) -> &str {
            "refuses"
        }

        async fn start(&self, _ctx: ModuleContext) -> anyhow::Result<()> {
            anyhow::bail!("no entrypoint")
        }
    }

    fn registry(module: Arc<Counting>) -> EngineRegistry {
        EngineRegistry::with_module(module, EngineOptions::default())
    }

    #[tokio::test]
    async fn acquire_returns_the_same_engine() {
        let module = Arc::new(Counting::default());
        let registry = registry(module.clone());

        let first = registry.acquire("main").await.unwrap();
        let second = registry.acquire("main").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.instance_id(), second.instance_id());
        assert_eq!(module.starts.load(Ordering::SeqCst), 1);

        let other = registry.acquire("other").await.unwrap();
        assert_ne!(other.instance_id(), first.instance_id());
        assert_eq!(registry.ids().await, vec!["main".to_owned(), "other".to_owned()]);
        registry.shutdown_all().await;
    }

    #[tokio::test]
    async fn concurrent_acquire_starts_one_engine() {
        let module = Arc::new(Counting::default());
        let registry = Arc::new(registry(module.clone()));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.acquire("shared").await.unwrap().instance_id() })
            })
            .collect();
        let ids = futures::future::join_all(tasks).await;

        let first = ids[0].as_ref().unwrap();
        assert!(ids.iter().all(|id| id.as_ref().unwrap() == first));
        assert_eq!(module.starts.load(Ordering::SeqCst), 1);
        registry.shutdown_all().await;
    }

    #[tokio::test]
    async fn release_then_acquire_builds_a_fresh_engine() {
        let registry = registry(Arc::new(Counting::default()));
        let old = registry.acquire("main").await.unwrap();
        let old_channel = old.channel(DEFAULT_CHANNEL);

        registry.release("main").await.unwrap();
        assert!(!registry.contains("main").await);
        assert!(!old.is_running());
        assert!(old_channel.invoke_method("showMessage", "hi").await.unwrap_err().is_closed());

        let new = registry.acquire("main").await.unwrap();
        assert_ne!(new.instance_id(), old.instance_id());
        let outcome = new
            .channel(DEFAULT_CHANNEL)
            .invoke_method("showMessage", "hi")
            .await
            .unwrap();
        assert_eq!(outcome, CallOutcome::NotImplemented);
        registry.shutdown_all().await;
    }

    #[tokio::test]
    async fn a_stopped_entry_is_replaced() {
        let registry = registry(Arc::new(Counting::default()));
        let old = registry.acquire("main").await.unwrap();
        old.stop().await;

        let new = registry.acquire("main").await.unwrap();
        assert!(new.is_running());
        assert_ne!(new.instance_id(), old.instance_id());
        registry.shutdown_all().await;
    }

    #[tokio::test]
    async fn release_unknown_and_start_failure() {
        let registry = EngineRegistry::with_module(Arc::new(Refuses), EngineOptions::default());
        assert!(matches!(
            registry.release("ghost").await,
            Err(EngineError::Unknown(ref id)) if id == "ghost"
        ));
        assert!(matches!(
            registry.acquire("main").await,
            Err(EngineError::StartFailed { .. })
        ));
        assert!(!registry.contains("main").await);
        assert!(registry.get("main").await.is_none());
    }

    #[tokio::test]
    async fn release_is_refused_while_a_view_is_attached() {
        let registry = registry(Arc::new(Counting::default()));
        let view = registry.attach_view("main").await.unwrap();
        let engine = registry.get("main").await.unwrap();

        assert!(matches!(
            registry.release("main").await,
            Err(EngineError::ViewAttached(_))
        ));
        assert!(engine.is_running());
        assert!(registry.contains("main").await);

        drop(view);
        registry.release("main").await.unwrap();
        assert!(!engine.is_running());
    }
}
