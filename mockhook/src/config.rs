use std::ffi::OsString;
use std::net::{SocketAddr, ToSocketAddrs};

use clap::{Arg, Command};
use serde::Deserialize;

/// Where the mock webhook server listens
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Configuration {
    /// Interface to bind. Defaults to every local IPv4 interface.
    #[serde(default = "default_host")]
    pub host: String,
    /// TCP port to bind. `0` asks the OS for a free port.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Configuration {
    /// Resolve `host:port` into the address the server binds to. Host names
    /// are looked up and the first result wins.
    pub fn socket_address(&self) -> Result<SocketAddr, ConfigurationError> {
        let mut addresses = match (self.host.as_str(), self.port).to_socket_addrs() {
            Ok(addresses) => addresses,
            Err(e) => {
                error!(
                    "Could not resolve listen address [{}:{}]. Error: {e}",
                    self.host, self.port
                );
                return Err(ConfigurationError::InvalidAddress);
            }
        };

        addresses.next().ok_or(ConfigurationError::InvalidAddress)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ConfigurationError {
    FileError,
    ParsingError,
    InvalidAddress,
    InvalidPort,
}

impl std::fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigurationError::FileError => write!(
                f,
                "There was an error finding or reading the configuration file"
            ),
            ConfigurationError::ParsingError => {
                write!(f, "The format of the configuration file was incorrect")
            }
            ConfigurationError::InvalidAddress => {
                write!(f, "The listen address could not be resolved")
            }
            ConfigurationError::InvalidPort => {
                write!(f, "The port must be a number between 0 and 65535")
            }
        }
    }
}

impl std::error::Error for ConfigurationError {}

fn command() -> Command {
    Command::new("mockhook - A mock webhook receiver")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Accepts webhook POSTs and prints their path, headers and body to stdout.")
        .arg(
            Arg::new("config")
                .help("Path to an optional configuration toml file")
                .long("config"),
        )
        .arg(
            Arg::new("host")
                .help("Interface to listen on, overrides the configuration file")
                .long("host"),
        )
        .arg(
            Arg::new("port")
                .help("Port to listen on, overrides the configuration file")
                .long("port"),
        )
}

/// Build the configuration from the process arguments
pub fn configure() -> Result<Configuration, ConfigurationError> {
    configure_from(std::env::args_os())
}

/// Build the configuration from an explicit argument list. The first item is
/// the binary name, as with `std::env::args_os`.
pub fn configure_from<I, T>(args: I) -> Result<Configuration, ConfigurationError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = command().get_matches_from(args);

    let mut config = match matches.get_one::<String>("config") {
        Some(path) => read_configuration(path)?,
        None => Configuration::default(),
    };

    if let Some(host) = matches.get_one::<String>("host") {
        config.host = host.clone();
    }

    if let Some(port) = matches.get_one::<String>("port") {
        config.port = match port.parse() {
            Ok(port) => port,
            Err(e) => {
                error!("Could not parse port [{port}]. Error: {e}");
                return Err(ConfigurationError::InvalidPort);
            }
        };
    }

    Ok(config)
}

/// Read a configuration file and parse it into a `Configuration`. Missing
/// keys take their defaults so an empty file is valid.
pub fn read_configuration(config_path: &str) -> Result<Configuration, ConfigurationError> {
    let config = match std::fs::read_to_string(config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Encountered file error when trying to read configuration!. Error: {e}");
            return Err(ConfigurationError::FileError);
        }
    };

    match toml::from_str(&config) {
        Ok(config) => Ok(config),
        Err(e) => {
            error!("Encountered parsing error while reading configuration!. Error: {e}");
            Err(ConfigurationError::ParsingError)
        }
    }
}
