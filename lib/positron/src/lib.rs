//! `Positron` is a distributed-object networking runtime for realtime
//! multi-user applications. Clients connect to a central server over TCP,
//! authenticate against a database interface, join a zone, and exchange
//! strongly-typed field updates on shared network nodes. The server
//! arbitrates permissions, caches selected fields for late joiners and fans
//! broadcast fields out to zone peers.
//!
//! All integers are little-endian on the wire; every datagram is prefixed
//! by a little-endian `u16` payload length.

#![allow(clippy::new_without_default)]

pub mod client;
pub mod config;
pub mod logging;
pub mod net;
pub mod node;
pub mod proto;
pub mod registry;
pub mod server;

pub use crate::client::{ClientDirector, ClientError};
pub use crate::node::{Node, NodeContext, SendOptions};
pub use crate::proto::message::{KickReason, SpecialMessage, FIRST_CLASS_NUMBER};
pub use crate::proto::object_id::ObjectId;
pub use crate::proto::packers::{Packer, Value};
pub use crate::registry::{flags, FieldDef, FieldSpec, Registry, RegistryBuilder};
pub use crate::server::database::{Database, StaticDatabase, UserEntry};
pub use crate::server::ServerDirector;
