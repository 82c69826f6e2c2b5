//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use livebridge_core::Args;
use livebridge_protocol::Request;

use crate::error::{ClientError, ClientResult};

/// livebridge - Drive a live host session from the command line
#[derive(Debug, Parser)]
#[command(name = "livebridge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "LIVEBRIDGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v')]
    pub debug: bool,

    /// Request timeout in seconds
    #[arg(long, env = "LIVEBRIDGE_TIMEOUT")]
    pub timeout: Option<u64>,

    /// File the bridge writes its port to
    #[arg(long, env = "LIVEBRIDGE_SERVER_PORT_FILE")]
    pub server_port_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Call a method on the bridge and print the result
    Call(CallArgs),

    /// Check that the bridge is alive
    Ping,

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Arguments of `livebridge call`.
#[derive(Debug, clap::Args)]
pub struct CallArgs {
    /// Namespace, e.g. `song` or `track`
    pub ns: String,

    /// Method name
    pub name: String,

    /// Handle of the target object
    #[arg(long)]
    pub nsid: Option<String>,

    /// Arguments as a JSON object or array
    #[arg(long)]
    pub args: Option<String>,

    /// Ask the bridge for etag-based caching
    #[arg(long)]
    pub cache: bool,

    /// Etag of the result already held (implies --cache)
    #[arg(long)]
    pub etag: Option<String>,
}

impl CallArgs {
    /// Builds the request these arguments describe.
    pub fn to_request(&self) -> ClientResult<Request> {
        let mut request = Request::new(&self.ns, &self.name);
        if let Some(ref raw) = self.args {
            let args: Args = serde_json::from_str(raw).map_err(|e| {
                ClientError::Usage(format!("--args must be a JSON object or array: {}", e))
            })?;
            request = request.with_args(args);
        }
        if let Some(ref nsid) = self.nsid {
            request = request.with_nsid(nsid);
        }
        if self.cache || self.etag.is_some() {
            request = request.with_cache(self.etag.clone());
        }
        Ok(request)
    }
}

/// Configuration actions.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Dump current configuration
    Dump,

    /// Show configuration file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("livebridge").chain(args.iter().copied())).unwrap()
    }

    fn call_args(cli: Cli) -> CallArgs {
        match cli.command {
            Command::Call(args) => args,
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn call_builds_a_keyword_request() {
        let cli = parse(&[
            "call",
            "track",
            "set_prop",
            "--nsid",
            "live_3",
            "--args",
            r#"{"prop": "mute", "value": true}"#,
        ]);
        let request = call_args(cli).to_request().unwrap();

        assert_eq!(request.ns, "track");
        assert_eq!(request.name, "set_prop");
        assert_eq!(request.nsid.as_deref(), Some("live_3"));
        assert_eq!(
            request.args,
            Some(Args::keyword([("prop", json!("mute")), ("value", json!(true))]))
        );
        assert!(!request.cache);
    }

    #[test]
    fn positional_args_and_etag() {
        let cli = parse(&[
            "--timeout", "9", "call", "song", "jump_by", "--args", "[4]", "--etag", "abc",
        ]);
        assert_eq!(cli.timeout, Some(9));

        let request = call_args(cli).to_request().unwrap();
        assert_eq!(request.args, Some(Args::Positional(vec![json!(4)])));
        assert!(request.cache);
        assert_eq!(request.etag.as_deref(), Some("abc"));
    }

    #[test]
    fn scalar_args_are_rejected() {
        let cli = parse(&["call", "song", "start_playing", "--args", "3"]);
        let err = call_args(cli).to_request().unwrap_err();
        assert!(matches!(err, ClientError::Usage(_)));
    }

    #[test]
    fn config_path_parses() {
        let cli = parse(&["config", "path"]);
        assert!(matches!(
            cli.command,
            Command::Config {
                action: ConfigAction::Path
            }
        ));
    }
}
