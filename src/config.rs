//! Configuration module for transport-bench.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values, which take
//! precedence over the built-in defaults.

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "transport-bench")]
#[command(author = "transport-bench authors")]
#[command(version = "0.1.0")]
#[command(about = "Stream/datagram/pseudo-QUIC echo server and scalability tester", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the three-protocol echo server
    Server(ServerArgs),
    /// Run the scalability test suite against a running server
    Bench(BenchArgs),
}

/// Server overrides
#[derive(Args, Debug, Default)]
pub struct ServerArgs {
    /// Address to bind all sockets to
    #[arg(long)]
    pub host: Option<IpAddr>,

    /// Stream (TCP) echo port
    #[arg(long)]
    pub stream_port: Option<u16>,

    /// Datagram (UDP) echo port
    #[arg(long)]
    pub datagram_port: Option<u16>,

    /// Pseudo-QUIC datagram port
    #[arg(long)]
    pub quic_port: Option<u16>,
}

/// Tester overrides
#[derive(Args, Debug, Default)]
pub struct BenchArgs {
    /// Server address to drive load against
    #[arg(short, long)]
    pub target: Option<IpAddr>,

    /// Client population sizes, comma separated
    #[arg(long, value_delimiter = ',')]
    pub client_counts: Option<Vec<usize>>,

    /// Protocols to test, comma separated
    #[arg(long, value_delimiter = ',')]
    pub protocols: Option<Vec<BenchProtocol>>,

    /// Trial duration in seconds
    #[arg(long)]
    pub trial_secs: Option<u64>,

    /// Directory receiving the `log-<timestamp>.txt` result file
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
}

/// Transport exercised by one series of trials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BenchProtocol {
    Tcp,
    Udp,
    Quic,
}

impl BenchProtocol {
    /// Label written to the result file.
    pub fn label(self) -> &'static str {
        match self {
            BenchProtocol::Tcp => "TCP",
            BenchProtocol::Udp => "UDP",
            BenchProtocol::Quic => "QUIC",
        }
    }
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub bench: BenchSection,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[server]` table
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_stream_port")]
    pub stream_port: u16,
    #[serde(default = "default_datagram_port")]
    pub datagram_port: u16,
    #[serde(default = "default_quic_port")]
    pub quic_port: u16,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_socket_buffer_size")]
    pub socket_buffer_size: usize,
    #[serde(default = "default_max_events")]
    pub max_events: usize,
    #[serde(default = "default_backlog")]
    pub backlog: i32,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            stream_port: default_stream_port(),
            datagram_port: default_datagram_port(),
            quic_port: default_quic_port(),
            buffer_size: default_buffer_size(),
            socket_buffer_size: default_socket_buffer_size(),
            max_events: default_max_events(),
            backlog: default_backlog(),
        }
    }
}

/// `[bench]` table
#[derive(Debug, Deserialize)]
pub struct BenchSection {
    #[serde(default = "default_target")]
    pub target: IpAddr,
    #[serde(default = "default_client_counts")]
    pub client_counts: Vec<usize>,
    #[serde(default = "default_protocols")]
    pub protocols: Vec<BenchProtocol>,
    #[serde(default = "default_trial_secs")]
    pub trial_secs: u64,
    #[serde(default = "default_ramp_up_secs")]
    pub ramp_up_secs: u64,
    #[serde(default = "default_pause_secs")]
    pub pause_secs: u64,
    #[serde(default = "default_payload_size")]
    pub payload_size: usize,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for BenchSection {
    fn default() -> Self {
        Self {
            target: default_target(),
            client_counts: default_client_counts(),
            protocols: default_protocols(),
            trial_secs: default_trial_secs(),
            ramp_up_secs: default_ramp_up_secs(),
            pause_secs: default_pause_secs(),
            payload_size: default_payload_size(),
            output_dir: default_output_dir(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_stream_port() -> u16 {
    8080
}

fn default_datagram_port() -> u16 {
    8081
}

fn default_quic_port() -> u16 {
    8082
}

fn default_buffer_size() -> usize {
    1024
}

fn default_socket_buffer_size() -> usize {
    1024 * 1024 // 1 MiB
}

fn default_max_events() -> usize {
    1024
}

fn default_backlog() -> i32 {
    1024
}

fn default_target() -> IpAddr {
    IpAddr::from([127, 0, 0, 1])
}

fn default_client_counts() -> Vec<usize> {
    vec![10, 20, 50, 100, 200, 500, 1000, 2000, 5000]
}

fn default_protocols() -> Vec<BenchProtocol> {
    vec![BenchProtocol::Tcp, BenchProtocol::Udp]
}

fn default_trial_secs() -> u64 {
    15
}

fn default_ramp_up_secs() -> u64 {
    5
}

fn default_pause_secs() -> u64 {
    2
}

fn default_payload_size() -> usize {
    1024
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Resolved server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub stream_port: u16,
    pub datagram_port: u16,
    pub quic_port: u16,
    pub buffer_size: usize,
    pub socket_buffer_size: usize,
    pub max_events: usize,
    pub backlog: i32,
}

impl ServerConfig {
    pub fn stream_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.stream_port)
    }

    pub fn datagram_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.datagram_port)
    }

    pub fn quic_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.quic_port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerSection::default().into()
    }
}

impl From<ServerSection> for ServerConfig {
    fn from(s: ServerSection) -> Self {
        Self {
            host: s.host,
            stream_port: s.stream_port,
            datagram_port: s.datagram_port,
            quic_port: s.quic_port,
            buffer_size: s.buffer_size,
            socket_buffer_size: s.socket_buffer_size,
            max_events: s.max_events,
            backlog: s.backlog,
        }
    }
}

/// Resolved tester settings.
#[derive(Debug, Clone)]
pub struct BenchConfig {
    pub stream_target: SocketAddr,
    pub datagram_target: SocketAddr,
    pub quic_target: SocketAddr,
    pub client_counts: Vec<usize>,
    pub protocols: Vec<BenchProtocol>,
    pub trial_duration: Duration,
    pub ramp_up: Duration,
    pub pause: Duration,
    pub payload_size: usize,
    pub output_dir: PathBuf,
}

impl BenchConfig {
    /// Target address for a protocol.
    pub fn target(&self, protocol: BenchProtocol) -> SocketAddr {
        match protocol {
            BenchProtocol::Tcp => self.stream_target,
            BenchProtocol::Udp => self.datagram_target,
            BenchProtocol::Quic => self.quic_target,
        }
    }

    fn from_sections(server: &ServerSection, bench: BenchSection) -> Self {
        Self {
            stream_target: SocketAddr::new(bench.target, server.stream_port),
            datagram_target: SocketAddr::new(bench.target, server.datagram_port),
            quic_target: SocketAddr::new(bench.target, server.quic_port),
            client_counts: bench.client_counts,
            protocols: bench.protocols,
            trial_duration: Duration::from_secs(bench.trial_secs),
            ramp_up: Duration::from_secs(bench.ramp_up_secs),
            pause: Duration::from_secs(bench.pause_secs),
            payload_size: bench.payload_size,
            output_dir: bench.output_dir,
        }
    }
}

/// Which half of the tool to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Server,
    Bench,
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub server: ServerConfig,
    pub bench: BenchConfig,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::resolve(CliArgs::parse())
    }

    fn resolve(cli: CliArgs) -> Result<Self, ConfigError> {
        // Load TOML config if specified
        let mut toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let mode = match cli.command {
            Command::Server(args) => {
                let server = &mut toml_config.server;
                server.host = args.host.unwrap_or(server.host);
                server.stream_port = args.stream_port.unwrap_or(server.stream_port);
                server.datagram_port = args.datagram_port.unwrap_or(server.datagram_port);
                server.quic_port = args.quic_port.unwrap_or(server.quic_port);
                Mode::Server
            }
            Command::Bench(args) => {
                let bench = &mut toml_config.bench;
                bench.target = args.target.unwrap_or(bench.target);
                if let Some(counts) = args.client_counts {
                    bench.client_counts = counts;
                }
                if let Some(protocols) = args.protocols {
                    bench.protocols = protocols;
                }
                bench.trial_secs = args.trial_secs.unwrap_or(bench.trial_secs);
                if let Some(dir) = args.output_dir {
                    bench.output_dir = dir;
                }
                Mode::Bench
            }
        };

        let log_level = cli.log_level.unwrap_or(toml_config.logging.level);
        let bench = BenchConfig::from_sections(&toml_config.server, toml_config.bench);
        let config = Config {
            mode,
            server: toml_config.server.into(),
            bench,
            log_level,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        // Room for the pseudo-QUIC id and marker in every response.
        if self.server.buffer_size < crate::protocols::quic::HEADER_LEN {
            return Err(ConfigError::Invalid(format!(
                "buffer_size must be at least {} bytes",
                crate::protocols::quic::HEADER_LEN
            )));
        }
        if self.server.max_events == 0 {
            return Err(ConfigError::Invalid("max_events must be non-zero".into()));
        }
        if self.bench.client_counts.is_empty() || self.bench.client_counts.contains(&0) {
            return Err(ConfigError::Invalid(
                "client_counts must be a non-empty list of positive sizes".into(),
            ));
        }
        if self.bench.payload_size == 0 {
            return Err(ConfigError::Invalid("payload_size must be non-zero".into()));
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.stream_port, 8080);
        assert_eq!(config.server.datagram_port, 8081);
        assert_eq!(config.server.quic_port, 8082);
        assert_eq!(config.server.buffer_size, 1024);
        assert_eq!(config.server.socket_buffer_size, 1024 * 1024);
        assert_eq!(
            config.bench.client_counts,
            vec![10, 20, 50, 100, 200, 500, 1000, 2000, 5000]
        );
        assert_eq!(
            config.bench.protocols,
            vec![BenchProtocol::Tcp, BenchProtocol::Udp]
        );
        assert_eq!(config.bench.trial_secs, 15);
        assert_eq!(config.bench.ramp_up_secs, 5);
        assert_eq!(config.bench.pause_secs, 2);
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            host = "127.0.0.1"
            stream_port = 35002
            datagram_port = 35001

            [bench]
            client_counts = [1, 2, 3]
            protocols = ["udp", "quic"]
            trial_secs = 3

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.host, IpAddr::from([127, 0, 0, 1]));
        assert_eq!(config.server.stream_port, 35002);
        assert_eq!(config.server.datagram_port, 35001);
        assert_eq!(config.server.quic_port, 8082);
        assert_eq!(config.bench.client_counts, vec![1, 2, 3]);
        assert_eq!(
            config.bench.protocols,
            vec![BenchProtocol::Udp, BenchProtocol::Quic]
        );
        assert_eq!(config.bench.trial_secs, 3);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides() {
        let cli = CliArgs::try_parse_from([
            "transport-bench",
            "--log-level",
            "warn",
            "bench",
            "--target",
            "10.0.0.1",
            "--client-counts",
            "5,15",
            "--protocols",
            "tcp",
        ])
        .unwrap();

        let config = Config::resolve(cli).unwrap();
        assert_eq!(config.mode, Mode::Bench);
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.bench.client_counts, vec![5, 15]);
        assert_eq!(config.bench.protocols, vec![BenchProtocol::Tcp]);
        assert_eq!(
            config.bench.target(BenchProtocol::Udp),
            "10.0.0.1:8081".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(config.bench.trial_duration, Duration::from_secs(15));
    }

    #[test]
    fn test_rejects_empty_client_counts() {
        let cli = CliArgs::try_parse_from(["transport-bench", "bench", "--client-counts", "0"])
            .unwrap();
        assert!(matches!(Config::resolve(cli), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_label() {
        assert_eq!(BenchProtocol::Tcp.label(), "TCP");
        assert_eq!(BenchProtocol::Udp.label(), "UDP");
        assert_eq!(BenchProtocol::Quic.label(), "QUIC");
    }
}
