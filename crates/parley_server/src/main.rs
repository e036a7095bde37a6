#![forbid(unsafe_code)]

mod config;
mod server;
mod store;
mod util;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use parley_util::endpoint::WsEndpoint;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::server::connection::{ConnectionSettings, handle_connection};
use crate::server::handlers::ServerContext;
use crate::server::health::{HealthState, spawn_health_server};
use crate::server::lifecycle::Lifecycle;
use crate::server::registry::{RegistryConfig, SessionRegistry};
use crate::store::{open_store, redact_database_url};

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: parley_server [--bind ws://host:port] [--config path]\n\
\n\
Options:\n\
\t--bind    Bind endpoint (default: ws://127.0.0.1:8080)\n\
\t         Format: ws://host:port\n\
\t--config  Config file (default: ~/.parley/config.toml)\n\
\t--help   Show this help\n\
"
	);
	std::process::exit(2)
}

struct Args {
	bind: SocketAddr,
	config_path: Option<PathBuf>,
}

fn parse_args() -> Args {
	let mut bind_endpoint = "ws://127.0.0.1:8080".to_string();
	let mut config_path = None;

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--bind" | "--listen" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--bind must be non-empty (expected ws://host:port)");
					usage_and_exit();
				}
				bind_endpoint = v;
			}
			"--config" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				config_path = Some(PathBuf::from(v));
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	let bind = WsEndpoint::parse(&bind_endpoint).unwrap_or_else(|e| {
		eprintln!("{e}");
		usage_and_exit();
	});

	let addr: SocketAddr = bind.to_socket_addr_if_ip_literal().unwrap_or_else(|e| {
		eprintln!("{e}");
		usage_and_exit();
	});

	Args {
		bind: addr,
		config_path,
	}
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,parley_server=debug".to_string());

	let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
		.ok()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty());
	let base = tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false));

	if let Some(endpoint) = otlp_endpoint {
		use opentelemetry::global;
		use opentelemetry::trace::TracerProvider as _;
		use opentelemetry_otlp::WithExportConfig;

		match opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.with_endpoint(endpoint.clone())
			.build()
		{
			Ok(exporter) => {
				let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
					.with_batch_exporter(exporter)
					.build();
				let tracer = tracer_provider.tracer("parley_server");
				global::set_tracer_provider(tracer_provider);

				let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
				base.with(otel_layer).init();
				info!(endpoint = %endpoint, "otlp tracing enabled");
			}
			Err(e) => {
				base.init();
				warn!(error = %e, "failed to initialize otlp tracing");
			}
		}
	} else {
		base.init();
	}
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<std::net::SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();

	let args = parse_args();

	let config_path = match args.config_path {
		Some(path) => path,
		None => crate::config::default_config_path()?,
	};
	let server_cfg = crate::config::load_server_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded server config (toml + env overrides)");

	init_metrics(server_cfg.server.metrics_bind.as_deref());

	let database_label = redact_database_url(&server_cfg.persistence.database_url);
	let health_state = HealthState::new(database_label.as_str());
	if let Some(bind) = server_cfg.server.health_bind.as_deref() {
		match bind.parse::<std::net::SocketAddr>() {
			Ok(addr) => {
				spawn_health_server(addr, health_state.clone());
				info!(%addr, "health server listening");
			}
			Err(e) => warn!(error = %e, %bind, "invalid health bind address (expected host:port)"),
		}
	}

	let store = open_store(&server_cfg.persistence.database_url)
		.await
		.with_context(|| format!("open store {database_label}"))?;
	info!(store = %store.describe(), "store opened");

	for nickname in &server_cfg.services.accounts {
		let user = store
			.mark_service_account(nickname)
			.await
			.with_context(|| format!("mark service account {nickname}"))?;
		info!(user_id = %user.id, nickname = %user.nickname, "service account ready");
	}

	let registry = Arc::new(SessionRegistry::new(RegistryConfig {
		sweep_interval: server_cfg.sessions.sweep_interval,
		expiry: server_cfg.sessions.expiry,
		retention: server_cfg.sessions.retention,
	}));
	let ctx = ServerContext::new(Arc::clone(&registry), store);
	registry.start_sweeper(Arc::new(Lifecycle::new(ctx.clone()))).await;

	let conn_settings = ConnectionSettings {
		max_frame_bytes: server_cfg.server.max_frame_bytes,
		outbound_queue_capacity: server_cfg.server.outbound_queue_capacity,
		command_rate_limit_burst: server_cfg.server.command_rate_limit_burst,
		command_rate_limit_per_minute: server_cfg.server.command_rate_limit_per_minute,
	};

	let listener = TcpListener::bind(args.bind)
		.await
		.with_context(|| format!("bind {}", args.bind))?;
	info!(bind = %args.bind, "parley_server: websocket endpoint ready");

	health_state.mark_ready();

	let mut next_conn_id: u64 = 1;

	loop {
		let (stream, remote) = tokio::select! {
			accepted = listener.accept() => match accepted {
				Ok(pair) => pair,
				Err(e) => {
					warn!(error = %e, "failed to accept tcp connection");
					continue;
				}
			},
			_ = tokio::signal::ctrl_c() => {
				info!("shutdown requested");
				break;
			}
		};

		let conn_id = next_conn_id;
		next_conn_id += 1;
		metrics::counter!("parley_server_connections_total").increment(1);
		info!(conn_id, %remote, "accepted connection");

		let ctx = ctx.clone();
		let conn_settings = conn_settings.clone();
		tokio::spawn(async move {
			if let Err(e) = handle_connection(conn_id, stream, ctx, conn_settings).await {
				warn!(conn_id, error = %e, "connection handler exited with error");
			}
		});
	}

	registry.shutdown().await;
	Ok(())
}
