#![forbid(unsafe_code)]

pub mod endpoint {
	use std::net::SocketAddr;

	const SCHEME: &str = "ws://";

	/// Parsed `ws://host:port[/path]` endpoint.
	#[derive(Debug, Clone, PartialEq, Eq, Hash)]
	pub struct WsEndpoint {
		pub host: String,
		pub port: u16,
		/// Always starts with `/`; `/` when omitted.
		pub path: String,
	}

	impl WsEndpoint {
		/// Returns `host:port` (IPv6 stays bracketed).
		pub fn hostport(&self) -> String {
			format!("{}:{}", self.host, self.port)
		}

		/// Bind address; only IP literals are accepted.
		pub fn to_socket_addr_if_ip_literal(&self) -> Result<SocketAddr, String> {
			self.hostport()
				.parse()
				.map_err(|_| format!("host must be an IP literal (DNS names not supported here): {}", self.host))
		}

		/// Client URL, optionally carrying a session token to resume.
		pub fn url(&self, session_id: Option<&str>) -> String {
			let base = format!("{SCHEME}{}{}", self.hostport(), self.path);
			match session_id {
				Some(token) if !token.is_empty() => format!("{base}?session_id={token}"),
				_ => base,
			}
		}

		pub fn parse(s: &str) -> Result<Self, String> {
			let s = s.trim();
			if s.is_empty() {
				return Err("endpoint must be non-empty (expected ws://host:port)".to_string());
			}

			let rest = s
				.strip_prefix(SCHEME)
				.ok_or_else(|| format!("invalid endpoint (expected ws://host:port): {s}"))?;

			if rest.contains('?') || rest.contains('#') {
				return Err(format!("invalid endpoint (query and fragment are not allowed): {s}"));
			}

			let (authority, path) = match rest.find('/') {
				Some(idx) => (&rest[..idx], &rest[idx..]),
				None => (rest, "/"),
			};

			let (host, port_str) = authority
				.rsplit_once(':')
				.ok_or_else(|| format!("invalid endpoint (missing :port, expected ws://host:port): {s}"))?;

			let host = host.trim();
			if host.is_empty() {
				return Err(format!("invalid endpoint host (expected ws://host:port): {s}"));
			}

			if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
				return Err(format!("invalid endpoint host (IPv6 must be bracketed like ws://[::1]:8080): {s}"));
			}

			let port: u16 = port_str
				.trim()
				.parse()
				.ok()
				.filter(|p| *p != 0)
				.ok_or_else(|| format!("invalid endpoint port (expected 1..=65535): {s}"))?;

			Ok(Self {
				host: host.to_string(),
				port,
				path: path.to_string(),
			})
		}
	}

	#[cfg(test)]
	mod tests {
		use super::*;

		#[test]
		fn parses_dns_hostname_with_default_path() {
			let e = WsEndpoint::parse("ws://chat.example.com:8080").unwrap();
			assert_eq!(e.host, "chat.example.com");
			assert_eq!(e.port, 8080);
			assert_eq!(e.path, "/");
			assert_eq!(e.url(None), "ws://chat.example.com:8080/");
		}

		#[test]
		fn keeps_explicit_path() {
			let e = WsEndpoint::parse("ws://127.0.0.1:8080/ws").unwrap();
			assert_eq!(e.path, "/ws");
			assert_eq!(e.url(Some("abc")), "ws://127.0.0.1:8080/ws?session_id=abc");
			assert_eq!(e.url(Some("")), "ws://127.0.0.1:8080/ws");
		}

		#[test]
		fn parses_bracketed_ipv6() {
			let e = WsEndpoint::parse("ws://[::1]:9000").unwrap();
			assert_eq!(e.host, "[::1]");
			assert_eq!(e.hostport(), "[::1]:9000");
			assert_eq!(e.to_socket_addr_if_ip_literal().unwrap().to_string(), "[::1]:9000");
		}

		#[test]
		fn rejects_malformed() {
			assert!(WsEndpoint::parse("").is_err());
			assert!(WsEndpoint::parse("http://127.0.0.1:80").is_err());
			assert!(WsEndpoint::parse("ws://::1:9000").unwrap_err().contains("IPv6"));
			assert!(WsEndpoint::parse("ws://127.0.0.1").is_err());
			assert!(WsEndpoint::parse("ws://127.0.0.1:0").is_err());
			assert!(WsEndpoint::parse("ws://127.0.0.1:8080/ws?session_id=x").is_err());
		}

		#[test]
		fn socket_addr_requires_ip_literal() {
			let e = WsEndpoint::parse("ws://localhost:8080").unwrap();
			assert!(e.to_socket_addr_if_ip_literal().is_err());
		}
	}
}
