#![forbid(unsafe_code)]

use parley_client_core::{Client, ClientConfig, DEFAULT_SERVER_ENDPOINT};
use parley_protocol::ServerFrame;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: parley_client --nick name [--connect ws://host:port] [--join channel] [--session token]\n\
\n\
Options:\n\
	--connect   Server endpoint (alias: --endpoint) (default: ws://127.0.0.1:8080)\n\
	--nick      Nickname to log in with\n\
	--join      Channel to join; stdin lines are sent there\n\
	--session   Session token to resume (alias: PARLEY_CLIENT_SESSION)\n\
	--help      Show this help\n\
\n\
Examples:\n\
	parley_client --nick alice --join lobby\n\
	parley_client --connect ws://chat.example.com:8080 --nick bob --join lobby\n"
	);
	std::process::exit(2)
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,parley_client_core=debug".to_string());
	tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

struct Args {
	endpoint: String,
	nickname: String,
	channel: Option<String>,
	session: Option<String>,
}

fn parse_args() -> Args {
	let mut endpoint = DEFAULT_SERVER_ENDPOINT.to_string();
	let mut nickname = None;
	let mut channel = None;
	let mut session = std::env::var("PARLEY_CLIENT_SESSION")
		.ok()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty());

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--connect" | "--endpoint" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--connect must be non-empty (expected ws://host:port)");
					usage_and_exit();
				}
				endpoint = v;
			}
			"--nick" => nickname = Some(it.next().unwrap_or_else(|| usage_and_exit())),
			"--join" => channel = Some(it.next().unwrap_or_else(|| usage_and_exit())),
			"--session" => session = Some(it.next().unwrap_or_else(|| usage_and_exit())),
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	let Some(nickname) = nickname else {
		eprintln!("--nick is required");
		usage_and_exit();
	};

	Args {
		endpoint,
		nickname,
		channel,
		session,
	}
}

fn render(frame: &ServerFrame) -> String {
	match frame {
		ServerFrame::Message(m) if m.is_passive => {
			format!("[{} #{}] * {} {}", m.sent_at, m.channel_id, m.nickname, m.message)
		}
		ServerFrame::Message(m) => format!("[{} #{}] <{}> {}", m.sent_at, m.channel_id, m.nickname, m.message),
		ServerFrame::Event(ev) => format!(
			"[#{}] -- {} {}{}",
			ev.channel_id,
			ev.nickname,
			ev.event.as_str(),
			ev.message.as_deref().map(|m| format!(": {m}")).unwrap_or_default()
		),
		ServerFrame::Response(resp) => format!("response {} okay={}", resp.req_id, resp.okay),
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();
	let args = parse_args();

	let mut cfg = ClientConfig::from_ws_endpoint(&args.endpoint)?;
	if let Some(token) = args.session {
		cfg = cfg.with_session_id(token);
	}
	info!(url = %cfg.url(), "connecting");

	let (client, mut events) = Client::connect(cfg).await?;

	let login = client.login(&args.nickname).await?;
	info!(user_id = %login.user_id, session = %login.session_id, "logged in (resume with --session)");

	let channel = match args.channel.as_deref() {
		Some(name) => {
			let joined = client.join(name).await?;
			info!(channel_id = %joined.channel_id, name = %joined.channel_name, "joined");
			Some(joined.channel_id)
		}
		None => None,
	};

	let mut stdin = BufReader::new(tokio::io::stdin()).lines();

	loop {
		tokio::select! {
			frame = events.recv() => match frame {
				Some(frame) => println!("{}", render(&frame)),
				None => {
					info!("connection closed");
					break;
				}
			},
			line = stdin.next_line() => match line? {
				Some(line) if line.trim() == "/quit" => {
					let bye = client.quit(None).await?;
					info!(message = %bye.message, "quit");
					break;
				}
				Some(line) if line.trim().is_empty() => {}
				Some(line) => match channel {
					Some(channel) => {
						if let Err(e) = client.send_message(channel, &line).await {
							warn!(error = %e, "message rejected");
						}
					}
					None => warn!("no channel joined; start with --join"),
				},
				None => break,
			},
		}
	}

	client.close().await;
	Ok(())
}
