#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use parley_domain::SYSTEM_NICKNAME;
use parley_protocol::DEFAULT_MAX_FRAME_SIZE;
use serde::Deserialize;
use tracing::{info, warn};

/// Default config path: `~/.parley/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".parley").join("config.toml"))
}

/// Load the server config from TOML and env overrides. A missing file yields defaults.
pub fn load_server_config_from_path(path: &Path) -> anyhow::Result<ServerConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ServerConfig::from_file(file_cfg);

	apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());
	cfg.normalize();

	Ok(cfg)
}

pub const DEFAULT_DATABASE_URL: &str = "sqlite://parley.db?mode=rwc";

#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub server: ServerSettings,
	pub sessions: SessionSettings,
	pub persistence: PersistenceSettings,
	pub services: ServiceSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	/// Optional health/readiness HTTP bind address (host:port).
	pub health_bind: Option<String>,
	/// Largest inbound WebSocket message accepted.
	pub max_frame_bytes: usize,
	/// Frames buffered per connection before fan-out starts dropping.
	pub outbound_queue_capacity: usize,
	/// Command rate limiting: per-connection burst size (0 disables).
	pub command_rate_limit_burst: u32,
	/// Command rate limiting: per-connection requests per minute (0 disables).
	pub command_rate_limit_per_minute: u32,
}

impl Default for ServerSettings {
	fn default() -> Self {
		Self {
			metrics_bind: None,
			health_bind: None,
			max_frame_bytes: DEFAULT_MAX_FRAME_SIZE,
			outbound_queue_capacity: 256,
			command_rate_limit_burst: 20,
			command_rate_limit_per_minute: 120,
		}
	}
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
	pub sweep_interval: Duration,
	pub expiry: Duration,
	/// How long a disconnected, logged-in session waits for a reconnect.
	pub retention: Duration,
}

impl Default for SessionSettings {
	fn default() -> Self {
		Self {
			sweep_interval: Duration::from_secs(25),
			expiry: Duration::from_secs(60),
			retention: Duration::from_secs(3600),
		}
	}
}

#[derive(Debug, Clone)]
pub struct PersistenceSettings {
	/// `sqlite:` URL, or `memory` for the in-process store.
	pub database_url: String,
}

impl Default for PersistenceSettings {
	fn default() -> Self {
		Self {
			database_url: DEFAULT_DATABASE_URL.to_string(),
		}
	}
}

#[derive(Debug, Clone)]
pub struct ServiceSettings {
	/// Nicknames flagged as service accounts at startup.
	pub accounts: Vec<String>,
}

impl Default for ServiceSettings {
	fn default() -> Self {
		Self {
			accounts: vec![SYSTEM_NICKNAME.to_string()],
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	server: FileServerSettings,

	#[serde(default)]
	sessions: FileSessionSettings,

	#[serde(default)]
	persistence: FilePersistenceSettings,

	#[serde(default)]
	services: FileServiceSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	metrics_bind: Option<String>,
	health_bind: Option<String>,
	max_frame_bytes: Option<usize>,
	outbound_queue_capacity: Option<usize>,
	command_rate_limit_burst: Option<u32>,
	command_rate_limit_per_minute: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileSessionSettings {
	sweep_interval_secs: Option<u64>,
	expiry_secs: Option<u64>,
	retention_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FilePersistenceSettings {
	database_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServiceSettings {
	#[serde(default)]
	accounts: Vec<String>,
}

impl ServerConfig {
	fn from_file(file: FileConfig) -> Self {
		let server_defaults = ServerSettings::default();
		let session_defaults = SessionSettings::default();

		Self {
			server: ServerSettings {
				metrics_bind: file.server.metrics_bind.filter(|s| !s.trim().is_empty()),
				health_bind: file.server.health_bind.filter(|s| !s.trim().is_empty()),
				max_frame_bytes: file
					.server
					.max_frame_bytes
					.filter(|v| *v > 0)
					.unwrap_or(server_defaults.max_frame_bytes),
				outbound_queue_capacity: file
					.server
					.outbound_queue_capacity
					.filter(|v| *v > 0)
					.unwrap_or(server_defaults.outbound_queue_capacity),
				command_rate_limit_burst: file
					.server
					.command_rate_limit_burst
					.unwrap_or(server_defaults.command_rate_limit_burst),
				command_rate_limit_per_minute: file
					.server
					.command_rate_limit_per_minute
					.unwrap_or(server_defaults.command_rate_limit_per_minute),
			},
			sessions: SessionSettings {
				sweep_interval: file
					.sessions
					.sweep_interval_secs
					.filter(|v| *v > 0)
					.map(Duration::from_secs)
					.unwrap_or(session_defaults.sweep_interval),
				expiry: file
					.sessions
					.expiry_secs
					.filter(|v| *v > 0)
					.map(Duration::from_secs)
					.unwrap_or(session_defaults.expiry),
				retention: file
					.sessions
					.retention_secs
					.filter(|v| *v > 0)
					.map(Duration::from_secs)
					.unwrap_or(session_defaults.retention),
			},
			persistence: PersistenceSettings {
				database_url: file
					.persistence
					.database_url
					.map(|s| s.trim().to_string())
					.filter(|s| !s.is_empty())
					.unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
			},
			services: ServiceSettings {
				accounts: file.services.accounts,
			},
		}
	}

	/// Fix up combinations the server cannot run with.
	fn normalize(&mut self) {
		let accounts = &mut self.services.accounts;
		accounts.retain(|n| !n.trim().is_empty());
		for nick in accounts.iter_mut() {
			*nick = nick.trim().to_string();
		}
		if !accounts.iter().any(|n| n == SYSTEM_NICKNAME) {
			accounts.insert(0, SYSTEM_NICKNAME.to_string());
		}
		accounts.dedup();

		if self.sessions.sweep_interval >= self.sessions.expiry {
			let corrected = (self.sessions.expiry / 2).max(Duration::from_secs(1));
			warn!(
				sweep_interval_secs = self.sessions.sweep_interval.as_secs(),
				expiry_secs = self.sessions.expiry.as_secs(),
				corrected_secs = corrected.as_secs(),
				"session config: sweep_interval must be shorter than expiry; correcting"
			);
			self.sessions.sweep_interval = corrected;
		}
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn apply_env_overrides(cfg: &mut ServerConfig, env: impl Fn(&str) -> Option<String>) {
	let non_empty = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

	if let Some(v) = non_empty("PARLEY_METRICS_BIND") {
		cfg.server.metrics_bind = Some(v);
		info!("server config: metrics_bind overridden by env");
	}

	if let Some(v) = non_empty("PARLEY_HEALTH_BIND") {
		cfg.server.health_bind = Some(v);
		info!("server config: health_bind overridden by env");
	}

	if let Some(v) = non_empty("PARLEY_MAX_FRAME_BYTES")
		&& let Ok(bytes) = v.parse::<usize>()
		&& bytes > 0
	{
		cfg.server.max_frame_bytes = bytes;
		info!(bytes, "server config: max_frame_bytes overridden by env");
	}

	if let Some(v) = non_empty("PARLEY_OUTBOUND_QUEUE_CAPACITY")
		&& let Ok(capacity) = v.parse::<usize>()
		&& capacity > 0
	{
		cfg.server.outbound_queue_capacity = capacity;
		info!(capacity, "server config: outbound_queue_capacity overridden by env");
	}

	if let Some(v) = non_empty("PARLEY_COMMAND_RATE_LIMIT_BURST")
		&& let Ok(burst) = v.parse::<u32>()
	{
		cfg.server.command_rate_limit_burst = burst;
		info!(burst, "server config: command_rate_limit_burst overridden by env");
	}

	if let Some(v) = non_empty("PARLEY_COMMAND_RATE_LIMIT_PER_MINUTE")
		&& let Ok(rate) = v.parse::<u32>()
	{
		cfg.server.command_rate_limit_per_minute = rate;
		info!(rate, "server config: command_rate_limit_per_minute overridden by env");
	}

	if let Some(v) = non_empty("PARLEY_SWEEP_INTERVAL_SECS")
		&& let Ok(secs) = v.parse::<u64>()
		&& secs > 0
	{
		cfg.sessions.sweep_interval = Duration::from_secs(secs);
		info!(secs, "session config: sweep_interval overridden by env");
	}

	if let Some(v) = non_empty("PARLEY_SESSION_EXPIRY_SECS")
		&& let Ok(secs) = v.parse::<u64>()
		&& secs > 0
	{
		cfg.sessions.expiry = Duration::from_secs(secs);
		info!(secs, "session config: expiry overridden by env");
	}

	if let Some(v) = non_empty("PARLEY_SESSION_RETENTION_SECS")
		&& let Ok(secs) = v.parse::<u64>()
		&& secs > 0
	{
		cfg.sessions.retention = Duration::from_secs(secs);
		info!(secs, "session config: retention overridden by env");
	}

	if let Some(v) = non_empty("PARLEY_DATABASE_URL") {
		cfg.persistence.database_url = v;
		info!("persistence: database_url overridden by env");
	}

	if let Some(v) = non_empty("PARLEY_SERVICE_ACCOUNTS") {
		cfg.services.accounts = v.split(',').map(|s| s.trim().to_string()).collect();
		info!(count = cfg.services.accounts.len(), "services: accounts overridden by env");
	}
}
