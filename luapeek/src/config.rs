use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use luapeek_core::{Layout, SessionConfig};
use serde::Deserialize;

/// Socket name PCSX2 uses for its first PINE slot.
const DEFAULT_SOCKET: &str = "pcsx2.sock";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub connection: Connection,
    pub layout: Layout,
    pub session: SessionConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Connection {
    pub socket: Option<PathBuf>,
    /// `host:port`; takes precedence over `socket`.
    pub tcp: Option<String>,
}

impl Connection {
    /// `socket`, else `$XDG_RUNTIME_DIR/pcsx2.sock`, else `/tmp/pcsx2.sock`.
    pub fn socket_path(&self) -> PathBuf {
        if let Some(path) = &self.socket {
            return path.clone();
        }
        let dir = std::env::var_os("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/tmp"));
        dir.join(DEFAULT_SOCKET)
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use luapeek_core::Check;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn full_config() {
        let config = Config::parse(
            r#"
            [connection]
            tcp = "127.0.0.1:28011"

            [layout]
            rk_registers = 250

            [layout.thread]
            globals = 0x44

            [session]
            state_pointer = 0x0056CBD0
            required_globals = ["AttemptFactionMoodClamp"]

            [[session.probes]]
            name = "save slot"
            address = 0x00501A44
            check = { not_equals = 0x00501A44 }

            [[session.probes]]
            name = "save slot flag"
            address = 0x00501A44
            offsets = [0x10]
            check = "zero"
            "#,
        )
        .unwrap();

        assert_eq!(config.connection.tcp.as_deref(), Some("127.0.0.1:28011"));
        assert_eq!(config.layout.thread.globals, 0x44);
        assert_eq!(config.layout.thread.top, 0x08);
        assert_eq!(config.session.probes[0].check, Check::NotEquals(0x0050_1A44));
        assert_eq!(config.session.probes[1].offsets, vec![0x10]);
        assert_eq!(config.session.probes[1].check, Check::Zero);
        assert_eq!(config.session.required_globals, vec!["AttemptFactionMoodClamp".to_string()]);
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.layout, Layout::default());
        assert_eq!(config.session.state_pointer, 0x0056_CBD0);
        assert!(config.connection.tcp.is_none());
    }

    #[test]
    fn explicit_socket_wins() {
        let connection = Connection {
            socket: Some(PathBuf::from("/run/user/1000/pcsx2.sock.28012")),
            tcp: None,
        };
        assert_eq!(
            connection.socket_path(),
            PathBuf::from("/run/user/1000/pcsx2.sock.28012")
        );
    }
}
