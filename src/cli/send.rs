use clap::Args;

use super::CliContext;

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Text to send; defaults to a timestamped greeting
    #[arg(long, short)]
    pub message: Option<String>,
}

pub async fn execute(args: SendArgs, context: &CliContext) -> anyhow::Result<()> {
    let (app, _module) = context.launch().await?;
    let result = app.send_message(args.message.as_deref()).await;
    app.shutdown().await;

    // the presenter has printed the answer
    result?;
    Ok(())
}
