use crate::proto::object_id::ObjectId;
use crate::proto::packers::Value;
use hashbrown::HashMap;
use serde_derive::{Deserialize, Serialize};

/// Credential and persistence backend consulted by the server director.
/// Both operations are synchronous from the director's point of view;
/// implementations proxying to async stores must preserve per-OID ordering.
pub trait Database {
    /// Resolves credentials to an object id, or `None` to reject the login.
    fn attempt_login(&mut self, login: &str, token: &str) -> Option<ObjectId>;

    /// Persists one field of a durable object.
    fn update_object(&mut self, oid: ObjectId, field: &str, args: &[Value]);
}

/// A single account entry of the static login table.
#[derive(Serialize, Deserialize, Clone)]
pub struct UserEntry {
    pub login: String,
    pub token: String,
    pub oid: u32,
}

/// Fixed login table loaded from configuration. Field persistence is a log
/// line; real deployments implement `Database` against their own store.
pub struct StaticDatabase {
    users: HashMap<(String, String), ObjectId>,
    log: crate::logging::Logger,
}

impl StaticDatabase {
    pub fn new<'a, L: Into<Option<&'a crate::logging::Logger>>>(log: L) -> StaticDatabase {
        StaticDatabase {
            users: HashMap::new(),
            log: crate::logging::child(log),
        }
    }

    /// Builds the table from configuration entries.
    pub fn from_entries<'a, L: Into<Option<&'a crate::logging::Logger>>>(
        entries: &[UserEntry],
        log: L,
    ) -> StaticDatabase {
        let mut db = StaticDatabase::new(log);
        for entry in entries {
            db.insert(&entry.login, &entry.token, ObjectId::Transient(entry.oid));
        }
        db
    }

    pub fn insert(&mut self, login: &str, token: &str, oid: ObjectId) {
        self.users.insert((login.to_string(), token.to_string()), oid);
    }
}

impl Database for StaticDatabase {
    fn attempt_login(&mut self, login: &str, token: &str) -> Option<ObjectId> {
        self.users.get(&(login.to_string(), token.to_string())).copied()
    }

    fn update_object(&mut self, oid: ObjectId, field: &str, args: &[Value]) {
        crate::logging::info!(self.log, "object update";
                              "context" => "database",
                              "oid" => %oid,
                              "field" => field,
                              "args" => ?args);
    }
}
