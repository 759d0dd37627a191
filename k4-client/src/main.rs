//! k4-call: issue a single host call from a shell script
//!
//! Prints the call's result as JSON on stdout. Host errors, transport
//! failures and setup problems go to stderr with exit status 1.

mod cli;

use clap::Parser;
use serde_json::Value;

use k4_client::{CallError, Client, ClientError, HostContext};
use k4_utils::{init_logging, K4Error, LogConfig};

use cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut log = LogConfig::from_env();
    if cli.log_file {
        log = log.in_log_dir("k4-call.log");
    }
    if let Err(e) = init_logging(&log) {
        eprintln!("k4-call: {}", e);
    }

    let exit_code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("k4-call: {}", e);
            1
        }
    };

    std::process::exit(exit_code);
}

async fn run(cli: Cli) -> Result<(), ClientError> {
    let config = cli.client_config();

    if cli.print_context {
        let context = HostContext::from_env(&config)?;
        print_json(context.value())?;
        return Ok(());
    }

    let method = cli
        .method
        .as_deref()
        .ok_or_else(|| K4Error::config("no method given"))?;
    let params: Value = serde_json::from_str(&cli.params)
        .map_err(|e| K4Error::config(format!("invalid params JSON: {}", e)))?;

    let client = Client::inherit(&config)?;
    let outcome = client.call(method, params).await;
    client.close().await;

    print_json(&outcome?)?;
    Ok(())
}

fn print_json(value: &Value) -> Result<(), ClientError> {
    let out = serde_json::to_string_pretty(value).map_err(CallError::Encode)?;
    println!("{}", out);
    Ok(())
}
