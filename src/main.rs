//! Zentinel CAS Agent command line.
//!
//! Validates a CAS service ticket and prints the asserted identity, or
//! prints the CAS login/logout URLs for the configured service.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{debug, info};

use zentinel_agent_cas::{CasClient, CasConfig};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "zentinel-agent-cas")]
#[command(about = "CAS single sign-on client for the Zentinel reverse proxy")]
struct Args {
    /// JSON configuration file
    #[arg(long, env = "CAS_CONFIG")]
    config: Option<PathBuf>,

    /// CAS server base URL
    #[arg(long, env = "CAS_SERVER_URL")]
    server_url: Option<String>,

    /// Service (callback) URL registered with CAS
    #[arg(long, env = "CAS_SERVICE_URL")]
    service_url: Option<String>,

    /// Require primary credentials (renew=true)
    #[arg(long, env = "CAS_RENEW")]
    renew: bool,

    /// Validation timeout in seconds
    #[arg(long, env = "CAS_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long, env = "CAS_VERBOSE")]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a service ticket and print the identity
    Validate {
        /// Service ticket returned by CAS
        #[arg(long)]
        ticket: String,

        /// Print the identity as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the CAS login URL
    LoginUrl,
    /// Print the CAS logout URL
    LogoutUrl,
}

fn build_config(args: &Args) -> Result<CasConfig> {
    let mut config = match &args.config {
        Some(path) => CasConfig::from_json_file(path)?,
        None => CasConfig::default(),
    };

    config.enabled = true;
    if let Some(ref url) = args.server_url {
        config.server_url = url.clone();
    }
    if let Some(ref url) = args.service_url {
        config.service_url = url.clone();
    }
    if args.renew {
        config.renew = true;
    }
    if let Some(timeout) = args.timeout_secs {
        config.validation_timeout_secs = timeout;
    }

    config.validate().map_err(|e| anyhow!(e))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("{}={}", env!("CARGO_CRATE_NAME"), log_level))
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = build_config(&args)?;
    info!(
        server = %config.server_url,
        service = %config.service_url,
        renew = config.renew,
        "Configuration loaded"
    );

    let client = CasClient::new(config)?;

    match args.command {
        Command::Validate { ticket, json } => {
            debug!("Validating ticket from command line");
            let identity = client
                .authenticate(&ticket)
                .await
                .context("Ticket validation failed")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&identity)?);
            } else {
                println!("principal: {}", identity.id);
                for (name, value) in &identity.claims {
                    println!("{}: {}", name, value);
                }
            }
        }
        Command::LoginUrl => println!("{}", client.login_url()),
        Command::LogoutUrl => println!("{}", client.logout_url()),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["zentinel-agent-cas"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_config_from_flags() {
        let args = args(&[
            "--server-url",
            "https://cas.example.edu/cas",
            "--service-url",
            "https://app.example.edu/cb",
            "--renew",
            "validate",
            "--ticket",
            "ST-1",
        ]);

        let config = build_config(&args).unwrap();
        assert!(config.enabled);
        assert!(config.renew);
        assert_eq!(config.server_url, "https://cas.example.edu/cas");
        assert!(matches!(args.command, Command::Validate { ref ticket, json: false } if ticket == "ST-1"));
    }

    #[test]
    fn test_config_requires_server() {
        let args = args(&["--service-url", "https://app/cb", "login-url"]);
        assert!(build_config(&args).is_err());
    }
}
