use clap::Parser;

mod cli;

use cli::{Cli, CliContext, Commands, run, schema, send};

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Run(run::RunArgs { open: false })) {
        Commands::Run(args) => {
            let context = CliContext::load(cli.env_file, cli.log_level).await?;
            run::execute(args, &context).await
        }
        Commands::Send(args) => {
            let context = CliContext::load(cli.env_file, cli.log_level).await?;
            send::execute(args, &context).await
        }
        Commands::Schema(args) => schema::execute(args),
    }
}
