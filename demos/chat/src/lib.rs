//! Shared class configuration for the chat demo: one `Talker` node per
//! logged-in user. Both binaries build the same registry, so their
//! signatures always agree.

use positron::config::ServerConfig;
use positron::{
    flags, FieldDef, FieldSpec, Node, NodeContext, Packer, Registry, SendOptions, UserEntry, Value,
};
use serde_derive::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

pub const TALKER: u16 = positron::FIRST_CLASS_NUMBER;

/// Server half of the talker: accepts rename and chat requests from the
/// owning client, confirms the rename and fans the chat line out.
pub struct STalker {
    username: String,
}

impl Node for STalker {
    fn handle_update(&mut self, ctx: &mut NodeContext, field: &FieldDef, args: &[Value]) {
        match field.name.as_str() {
            "request_username" => {
                let name = args[0].as_str().expect("username must be a string").to_string();
                self.username = name.clone();
                ctx.send_update("username", &[Value::from(name)])
                    .expect("username update must compile");
            }
            "request_message" => {
                let text = args[0].as_str().expect("message must be a string").to_string();
                ctx.send_update_with(
                    "message",
                    &[Value::from(self.username.clone()), Value::from(text)],
                    SendOptions {
                        broadcast_ignore: Some(ctx.oid()),
                        ..SendOptions::default()
                    },
                )
                .expect("message update must compile");
            }
            _ => {}
        }
    }
}

/// Client half of the talker: renders confirmed renames and incoming chat
/// lines on the terminal.
pub struct CTalker {
    username: String,
}

impl Node for CTalker {
    fn handle_update(&mut self, _ctx: &mut NodeContext, field: &FieldDef, args: &[Value]) {
        match field.name.as_str() {
            "username" => {
                let name = args[0].as_str().expect("username must be a string").to_string();
                println!("{} is now known as {}", self.username, name);
                self.username = name;
            }
            "message" => {
                println!("{}: {}", args[0], args[1]);
            }
            _ => {}
        }
    }
}

/// Builds the chat registry with both node bindings attached.
pub fn build_registry() -> Arc<Registry> {
    let mut builder = Registry::builder();
    builder.configure(
        TALKER,
        vec![
            FieldSpec::new("request_username", flags::OWNER_SEND, vec![Packer::Str]),
            FieldSpec::new("request_message", flags::OWNER_SEND, vec![Packer::Str]),
            FieldSpec::new("username", flags::RAM, vec![Packer::Str]),
            FieldSpec::new(
                "message",
                flags::BROADCAST | flags::RAM,
                vec![Packer::Str, Packer::Str],
            ),
        ],
        &[],
    );
    builder.server_class(TALKER, |oid| {
        Box::new(STalker {
            username: oid.to_string(),
        })
    });
    builder.client_class(TALKER, |oid| {
        Box::new(CTalker {
            username: oid.to_string(),
        })
    });
    Arc::new(builder.build())
}

/// Demo server configuration: the listener settings plus the login table.
#[derive(Serialize, Deserialize)]
pub struct ChatConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub users: Vec<UserEntry>,
}

impl Default for ChatConfig {
    fn default() -> ChatConfig {
        ChatConfig {
            server: ServerConfig::default(),
            users: vec![
                UserEntry {
                    login: "login".to_string(),
                    token: "password".to_string(),
                    oid: 12345,
                },
                UserEntry {
                    login: "login2".to_string(),
                    token: "password2".to_string(),
                    oid: 23456,
                },
            ],
        }
    }
}

impl ChatConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> ChatConfig {
        serdeconv::from_toml_file(path).expect("Error loading chat configuration file")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_bindings() {
        let registry = build_registry();

        assert!(registry.has_server_class(TALKER));
        assert!(registry.has_client_class(TALKER));
        assert!(registry.class(TALKER).unwrap().field_by_name("message").is_some());
    }

    #[test]
    fn test_default_config_logins() {
        let config = ChatConfig::default();

        assert_eq!(config.users.len(), 2);
        assert_eq!(config.users[0].login, "login");
        assert_eq!(config.users[1].oid, 23456);
    }
}
