use anyhow::bail;
use clap::Parser;
use core::time::Duration;

/// Runtime configuration for the `berth-server` binary.
///
/// These settings control where the daemon listens and how it sheds
/// long-lived connections and drains on shutdown. All values are parsed from
/// CLI arguments or environment variables, with defaults suitable for
/// production.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "berth-server",
    version,
    about = "A gRPC hosting daemon with managed startup and graceful shutdown"
)]
pub struct CliArgs {
    /// Address to listen on (hostname or IP).
    ///
    /// Environment variable: `SERVER_ADDRESS`
    #[arg(long, env = "SERVER_ADDRESS", default_value_t = String::from("0.0.0.0"))]
    pub address: String,

    /// TCP port to listen on. Port 0 asks the OS for a free port; the bound
    /// port is logged at startup.
    ///
    /// Environment variable: `SERVER_PORT`
    #[arg(long, env = "SERVER_PORT", default_value_t = 50051)]
    pub port: u16,

    /// Maximum connection age in seconds before clients are asked to
    /// reconnect via a graceful GOAWAY (0 = unlimited). Helps load balancers
    /// rebalance long-lived HTTP/2 connections.
    ///
    /// Environment variable: `MAX_CONNECTION_AGE_SECS`
    #[arg(long, env = "MAX_CONNECTION_AGE_SECS", default_value_t = 0)]
    pub max_connection_age_secs: u64,

    /// Upper bound in seconds on the graceful drain during shutdown
    /// (0 = wait indefinitely for in-flight calls).
    ///
    /// Environment variable: `DRAIN_TIMEOUT_SECS`
    #[arg(long, env = "DRAIN_TIMEOUT_SECS", default_value_t = 0)]
    pub drain_timeout_secs: u64,

    /// Serve the standard gRPC health-check service.
    ///
    /// Environment variable: `ENABLE_HEALTH_CHECK`
    #[arg(
        long,
        env = "ENABLE_HEALTH_CHECK",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub health_check: bool,

    /// Serve the gRPC server-reflection service.
    ///
    /// Environment variable: `ENABLE_REFLECTION`
    #[arg(long, env = "ENABLE_REFLECTION", default_value_t = false)]
    pub reflection: bool,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
    pub max_connection_age: Option<Duration>,
    pub drain_timeout: Option<Duration>,
    pub health_check: bool,
    pub reflection: bool,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.address.is_empty() {
            bail!("SERVER_ADDRESS must not be empty");
        }

        let seconds = |value: u64| (value > 0).then(|| Duration::from_secs(value));

        Ok(Self {
            address: args.address,
            port: args.port,
            max_connection_age: seconds(args.max_connection_age_secs),
            drain_timeout: seconds(args.drain_timeout_secs),
            health_check: args.health_check,
            reflection: args.reflection,
        })
    }
}
