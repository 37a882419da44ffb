use arbiter_judger::config::Config;
use arbiter_judger::error::error_code_of;
use arbiter_protocol::error::ErrorInfo;
use arbiter_utils::tracing::setup_tracing;

use std::env;
use std::path::PathBuf;

use anyhow::{Context as _, Result};
use dotenv::dotenv;
use tracing::info;

const CONFIG_PATH: &str = "arbiter-judger.toml";

#[tracing::instrument(err)]
fn load_config() -> Result<()> {
    let path = match env::args_os().nth(1) {
        Some(p) => PathBuf::from(p),
        None => env::current_dir()?.join(CONFIG_PATH),
    };

    info!("loading config from {}", path.display());
    let config = Config::init_from_file(&path)?;
    info!("config is loaded:\n{:#?}", config);

    Ok(())
}

fn main() -> Result<()> {
    dotenv().ok();
    setup_tracing();

    load_config()?;
    let config = Config::global().context("config is not loaded")?;

    match arbiter_judger::pipeline::run(config) {
        Ok(results) => {
            println!("{}", results.to_report().to_json_pretty()?);
            Ok(())
        }
        Err(err) => {
            let info = ErrorInfo {
                code: error_code_of(&err),
                message: Some(format!("{:#}", err)),
            };
            println!("{}", serde_json::to_string_pretty(&info)?);
            Err(err)
        }
    }
}
