//! Shared CLI argument parsers.

use std::net::SocketAddr;
use std::time::Duration;

/// Parse a duration string (e.g., "30s", "5m", "1h").
pub fn parse_duration(s: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(s)
}

/// Parse a listen address (e.g., "0.0.0.0:56001").
pub fn parse_listen(s: &str) -> Result<String, String> {
    s.parse::<SocketAddr>()
        .map(|addr| addr.to_string())
        .map_err(|e| format!("invalid listen address '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("1m 30s").unwrap(), Duration::from_secs(90));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_parse_listen() {
        assert_eq!(parse_listen("0.0.0.0:56001").unwrap(), "0.0.0.0:56001");
        assert!(parse_listen("localhost").is_err());
        assert!(parse_listen("0.0.0.0:99999").is_err());
    }
}
