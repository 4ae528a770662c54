use clap::Parser;
use shared::DEFAULT_PORT;
use std::path::{Path, PathBuf};

/// Command line configuration for the coordination server.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct ServerConfig {
    /// Address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// PEM certificate chain; serves wss:// when given together with --key
    #[arg(long, requires = "key")]
    pub cert: Option<PathBuf>,

    /// PEM private key for --cert
    #[arg(long, requires = "cert")]
    pub key: Option<PathBuf>,

    /// World state document, loaded at startup and written at shutdown
    #[arg(short, long, default_value = "state.json")]
    pub state_file: PathBuf,

    /// Game type label for a fresh world when no state file exists
    #[arg(long, default_value = "measurement")]
    pub game_type: String,

    /// Do not read operator commands from stdin
    #[arg(long)]
    pub no_console: bool,
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Certificate and key paths, when TLS is enabled.
    pub fn tls_files(&self) -> Option<(&Path, &Path)> {
        match (&self.cert, &self.key) {
            (Some(cert), Some(key)) => Some((cert.as_path(), key.as_path())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::parse_from(["poi-server"]);
        assert_eq!(config.address(), "0.0.0.0:6543");
        assert_eq!(config.state_file, PathBuf::from("state.json"));
        assert_eq!(config.game_type, "measurement");
        assert!(config.tls_files().is_none());
        assert!(!config.no_console);
    }

    #[test]
    fn test_tls_needs_both_files() {
        let result = ServerConfig::try_parse_from(["poi-server", "--cert", "cert.pem"]);
        assert!(result.is_err());

        let config = ServerConfig::parse_from([
            "poi-server",
            "--cert",
            "cert.pem",
            "--key",
            "key.pem",
        ]);
        assert_eq!(
            config.tls_files(),
            Some((Path::new("cert.pem"), Path::new("key.pem")))
        );
    }

    #[test]
    fn test_host_and_port() {
        let config = ServerConfig::parse_from(["poi-server", "-H", "127.0.0.1", "-p", "0"]);
        assert_eq!(config.address(), "127.0.0.1:0");
    }
}
