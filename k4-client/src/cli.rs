//! CLI argument parsing for k4-call

use std::os::unix::io::RawFd;

use clap::Parser;

use k4_client::config::{
    CONTEXT_VAR_ENV, DEFAULT_CONTEXT_VAR, DEFAULT_FD, FD_ENV, FRAMING_ENV, MAX_FRAME_LEN_ENV,
};
use k4_client::{ClientConfig, RequestFraming, MAX_FRAME_LEN};

/// Issue one RPC call to the k4 host from a shell script
#[derive(Parser, Debug)]
#[command(name = "k4-call")]
#[command(about = "Call a k4 host service from a script")]
#[command(version)]
pub struct Cli {
    /// Descriptor of the inherited host channel
    #[arg(long, env = FD_ENV, default_value_t = DEFAULT_FD)]
    pub fd: RawFd,

    /// Request framing: raw (host default) or newline
    #[arg(long, env = FRAMING_ENV, default_value = "raw")]
    pub framing: RequestFraming,

    /// Environment variable holding the host context
    #[arg(long, env = CONTEXT_VAR_ENV, default_value = DEFAULT_CONTEXT_VAR)]
    pub context_var: String,

    /// Largest response frame accepted, in bytes
    #[arg(long, env = MAX_FRAME_LEN_ENV, default_value_t = MAX_FRAME_LEN, value_parser = parse_frame_len)]
    pub max_frame_len: usize,

    /// Log to k4-call.log in the log directory instead of stderr
    #[arg(long)]
    pub log_file: bool,

    /// Print the host context and exit
    #[arg(long)]
    pub print_context: bool,

    /// Method to call, e.g. Money.GetBalance
    #[arg(required_unless_present = "print_context")]
    pub method: Option<String>,

    /// Parameters as a JSON value
    #[arg(default_value = "{}")]
    pub params: String,
}

impl Cli {
    /// Client configuration for this invocation
    ///
    /// The CLI tolerates a missing context so it can be used to poke at a
    /// host channel by hand.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::default()
            .with_fd(self.fd)
            .with_framing(self.framing)
            .with_max_frame_len(self.max_frame_len)
            .with_context_var(self.context_var.clone())
            .with_context_required(false)
    }
}

fn parse_frame_len(raw: &str) -> Result<usize, String> {
    match raw.parse::<usize>() {
        Ok(0) => Err("must be at least 1".into()),
        Ok(len) => Ok(len),
        Err(e) => Err(e.to_string()),
    }
}
