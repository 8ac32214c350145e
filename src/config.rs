use std::{fs::read_to_string, net::SocketAddr, str::FromStr};

use anyhow::Result;
use clap::Parser;
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Server {
    ///
    /// Listen address
    ///
    /// The address and port the chat server binds its TCP listener to.
    ///
    #[serde(default = "Server::listen")]
    pub listen: SocketAddr,
    ///
    /// Idle timeout
    ///
    /// If no data is received within the specified number of seconds, the
    /// connection is treated as reset and the peer is logged out.
    ///
    #[serde(default = "Server::idle_timeout")]
    pub idle_timeout: u64,
    ///
    /// Outbound queue bound
    ///
    /// Maximum number of frames queued towards one connection. A consumer
    /// that falls this far behind is torn down.
    ///
    #[serde(default = "Server::max_queue_size")]
    pub max_queue_size: usize,
    ///
    /// Maximum frame size
    ///
    /// Frames whose accumulated bytes exceed a multiple of this limit tear
    /// the connection down to keep buffers bounded.
    ///
    #[serde(default = "Server::max_message_size")]
    pub max_message_size: usize,
}

impl Server {
    fn listen() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn idle_timeout() -> u64 {
        60
    }

    fn max_queue_size() -> usize {
        1024
    }

    fn max_message_size() -> usize {
        4096
    }
}

impl Default for Server {
    fn default() -> Self {
        Self {
            listen: Self::listen(),
            idle_timeout: Self::idle_timeout(),
            max_queue_size: Self::max_queue_size(),
            max_message_size: Self::max_message_size(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "trace" => Self::Trace,
            "debug" => Self::Debug,
            "info" => Self::Info,
            "warn" => Self::Warn,
            "error" => Self::Error,
            _ => return Err(format!("unknown log level: {value}")),
        })
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match *self {
            Self::Error => log::Level::Error,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Log {
    ///
    /// log level
    ///
    /// An enum representing the available verbosity levels of the logger.
    ///
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct SeedAccount {
    pub login: String,
    pub email: String,
    pub password: String,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Auth {
    ///
    /// static accounts
    ///
    /// Accounts created in the account store at startup, before any peer
    /// registers over the wire. Useful for fixed deployments and testing.
    ///
    #[serde(default)]
    pub static_accounts: Vec<SeedAccount>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub log: Log,
    #[serde(default)]
    pub auth: Auth,
}

#[derive(Parser, Debug)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    ///
    /// Specify the configuration file path
    ///
    /// Example: chat-server --config /etc/chat-server/config.json5
    ///
    #[arg(long, short)]
    config: Option<String>,
}

impl Config {
    ///
    /// Load configure from config file and command line parameters.
    ///
    /// Load command line parameters, if the configuration file path is
    /// specified, the configuration is read from the configuration file,
    /// otherwise the default configuration is used.
    ///
    pub fn load() -> Result<Self> {
        Ok(match Cli::parse().config {
            Some(path) => serde_json5::from_str(&read_to_string(path)?)?,
            None => Self::default(),
        })
    }
}
