use clap::Args;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::info;

use super::CliContext;
use embedhost::host::HostApp;
use embedhost::module::DemoModule;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Present the module right after launch
    #[arg(long, default_value_t = false)]
    pub open: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Open,
    Close,
    Send(Option<String>),
    Dialog(String),
    Status,
    Help,
    Quit,
}

impl ReplCommand {
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        let rest = (!rest.is_empty()).then(|| rest.to_owned());

        let command = match word.to_ascii_lowercase().as_str() {
            "open" => ReplCommand::Open,
            "close" => ReplCommand::Close,
            "send" => ReplCommand::Send(rest),
            "dialog" => ReplCommand::Dialog(rest.ok_or("usage: dialog <text>")?),
            "status" => ReplCommand::Status,
            "help" | "?" => ReplCommand::Help,
            "quit" | "exit" => ReplCommand::Quit,
            other => return Err(format!("unknown command `{other}`, try `help`")),
        };
        Ok(Some(command))
    }
}

const HELP: &str = "\
commands:
  open            present the module
  close           dismiss the module
  send [text]     send showMessage to the module
  dialog <text>   let the module ask the host for a dialog
  status          engine and view state
  quit            shut down and exit";

pub async fn execute(args: RunArgs, context: &CliContext) -> anyhow::Result<()> {
    let (app, module) = context.launch().await?;
    println!(
        "engine `{}` running on channel `{}`; type `help` for commands",
        app.config().engine_id,
        app.config().channel
    );
    if args.open {
        let _ = app.open_module().await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match ReplCommand::parse(&line) {
                    Ok(Some(ReplCommand::Quit)) => break,
                    Ok(Some(command)) => handle(&app, &module, command).await,
                    Ok(None) => {}
                    Err(err) => eprintln!("{err}"),
                }
            }
            _ = signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    app.shutdown().await;
    Ok(())
}

// Answers and errors are already shown by the presenter.
async fn handle(app: &HostApp, module: &DemoModule, command: ReplCommand) {
    match command {
        ReplCommand::Open => {
            let _ = app.open_module().await;
        }
        ReplCommand::Close => {
            if !app.close_module() {
                println!("module is not open");
            }
        }
        ReplCommand::Send(text) => {
            let _ = app.send_message(text.as_deref()).await;
        }
        ReplCommand::Dialog(text) => match module.show_native_dialog(&text).await {
            Ok(ack) => println!("host answered: {ack}"),
            Err(err) => eprintln!("error: {err}"),
        },
        ReplCommand::Status => {
            let status = app.status().await;
            println!(
                "engine `{}`: {} (instance {}), view {}",
                status.engine_id,
                if status.running { "running" } else { "stopped" },
                status
                    .instance_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "-".into()),
                if status.view_attached { "attached" } else { "detached" },
            );
        }
        ReplCommand::Help => println!("{HELP}"),
        ReplCommand::Quit => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!(ReplCommand::parse("  "), Ok(None));
        assert_eq!(ReplCommand::parse("open"), Ok(Some(ReplCommand::Open)));
        assert_eq!(ReplCommand::parse("SEND"), Ok(Some(ReplCommand::Send(None))));
        assert_eq!(
            ReplCommand::parse("send  hello there "),
            Ok(Some(ReplCommand::Send(Some("hello there".into()))))
        );
        assert_eq!(
            ReplCommand::parse("dialog hi"),
            Ok(Some(ReplCommand::Dialog("hi".into())))
        );
        assert_eq!(ReplCommand::parse("exit"), Ok(Some(ReplCommand::Quit)));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(ReplCommand::parse("dialog").is_err());
        assert!(ReplCommand::parse("fly away").unwrap_err().contains("fly"));
    }
}
