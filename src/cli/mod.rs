use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

pub mod run;
pub mod schema;
pub mod send;

use run::RunArgs;
use schema::SchemaArgs;
use send::SendArgs;

use embedhost::config::{ConfigManager, EnvConfigManager, HostConfig};
use embedhost::host::HostApp;
use embedhost::logger::{LogGuard, init_tracing};
use embedhost::module::DemoModule;
use embedhost::presenter::ConsolePresenter;
use module_bridge::registry::EngineRegistry;

#[derive(Parser, Debug)]
#[command(
    name = "embedhost",
    about = "Host an embedded UI module and talk to it over method channels",
    version
)]
pub struct Cli {
    /// Settings file loaded into the environment before anything else
    #[arg(long, global = true, default_value = ".env")]
    pub env_file: PathBuf,

    /// Log level override (e.g. error, warn, info, debug, trace)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Launch the host and drive it interactively
    Run(RunArgs),

    /// Launch, send one message to the module, print the answer and exit
    Send(SendArgs),

    /// Print the JSON schema of the channel wire format
    Schema(SchemaArgs),
}

pub struct CliContext {
    pub config: HostConfig,
    _log_guard: LogGuard,
}

impl CliContext {
    /// Load settings and install logging.
    pub async fn load(env_file: PathBuf, log_level: Option<String>) -> anyhow::Result<Self> {
        let manager = ConfigManager(EnvConfigManager::new(env_file));
        let mut config = HostConfig::load(&manager).await?;
        if let Some(level) = log_level {
            config.log_level = level;
        }
        let log_guard = init_tracing(&config.log_level, config.log_dir.as_deref())?;
        Ok(Self {
            config,
            _log_guard: log_guard,
        })
    }

    /// Host wired to the in-process demo module and the terminal.
    pub async fn launch(&self) -> anyhow::Result<(HostApp, Arc<DemoModule>)> {
        let module = Arc::new(DemoModule::new(self.config.channel.clone()));
        let registry = Arc::new(EngineRegistry::with_module(
            module.clone(),
            self.config.engine_options(),
        ));
        let app = HostApp::launch(self.config.clone(), registry, Arc::new(ConsolePresenter)).await?;
        Ok((app, module))
    }
}
