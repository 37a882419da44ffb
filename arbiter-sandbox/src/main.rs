use std::env;
use std::io::{self, Read};

use anyhow::Result;
use arbiter_sandbox::SandboxArgs;
use structopt::StructOpt;

fn load_args() -> Result<SandboxArgs> {
    match env::var("ARBITER_SANDBOX_ARGPASS").as_deref() {
        Ok("JSON") => {
            let mut stdin_content = Vec::new();
            io::stdin().read_to_end(&mut stdin_content)?;
            Ok(serde_json::from_slice(&stdin_content)?)
        }
        _ => Ok(SandboxArgs::from_args()),
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = load_args()?;
    let output = arbiter_sandbox::run(&args)?;
    println!("{}", serde_json::to_string(&output)?);
    Ok(())
}
