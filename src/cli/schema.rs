use std::fs;
use std::path::PathBuf;

use clap::Args;
use module_bridge::jsonrpc::Frame;

#[derive(Args, Debug)]
pub struct SchemaArgs {
    /// Write the schema to this file instead of stdout
    #[arg(long)]
    pub out: Option<PathBuf>,
}

pub fn frame_schema() -> anyhow::Result<String> {
    let schema = schemars::schema_for!(Frame);
    Ok(serde_json::to_string_pretty(&schema)?)
}

pub fn execute(args: SchemaArgs) -> anyhow::Result<()> {
    let schema = frame_schema()?;
    match args.out {
        Some(path) => {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                fs::create_dir_all(dir)?;
            }
            fs::write(&path, schema)?;
            println!("Schema written to {}", path.display());
        }
        None => println!("{schema}"),
    }
    Ok(())
}
