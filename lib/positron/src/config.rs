use serde_derive::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_PORT: u16 = 7200;

/// Listener settings shared by server deployments. Binaries typically embed
/// this in their own configuration structure.
#[derive(Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    pub address: Option<String>,
    pub max_clients: u16,
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            address: Some(format!("127.0.0.1:{}", DEFAULT_PORT)),
            max_clients: 256,
        }
    }
}

impl ServerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> ServerConfig {
        serdeconv::from_toml_file(path).expect("Error loading server configuration file")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_toml() {
        let config: ServerConfig = serdeconv::from_toml_str(
            r#"
address = "0.0.0.0:7200"
max_clients = 64
"#,
        )
        .unwrap();

        assert_eq!(config.address.as_deref(), Some("0.0.0.0:7200"));
        assert_eq!(config.max_clients, 64);
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();

        assert_eq!(config.address.as_deref(), Some("127.0.0.1:7200"));
        assert_eq!(config.max_clients, 256);
    }
}
