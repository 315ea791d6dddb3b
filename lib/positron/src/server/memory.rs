use crate::logging;
use crate::node::Node;
use crate::proto::datagram::{Datagram, PackError};
use crate::proto::object_id::ObjectId;
use crate::proto::packers::Value;
use crate::registry::{flags, ClassDef, FieldDef};
use crate::server::database::Database;
use hashbrown::HashMap;

/// Per-object field cache. RAM-flagged updates land here and are replayed to
/// late joiners; Database-flagged updates on durable ids additionally pass
/// through to the backing store. The cache outlives connections, so a
/// returning client finds its state intact.
pub struct MemoryHandler {
    db: Box<dyn Database>,
    query_memory: HashMap<ObjectId, HashMap<String, Vec<Value>>>,
    log: logging::Logger,
}

impl MemoryHandler {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(db: Box<dyn Database>, log: L) -> MemoryHandler {
        MemoryHandler {
            db,
            query_memory: HashMap::new(),
            log: logging::child(log),
        }
    }

    #[inline]
    pub fn db_mut(&mut self) -> &mut dyn Database {
        &mut *self.db
    }

    /// Caches one field tuple, writing through to the database when asked
    /// and the id is durable.
    pub fn set_data(&mut self, oid: ObjectId, field: &str, args: Vec<Value>, update_db: bool) {
        if update_db && oid.is_durable() {
            self.db.update_object(oid, field, &args);
        }

        self.query_memory
            .entry(oid)
            .or_insert_with(HashMap::new)
            .insert(field.to_string(), args);
    }

    /// Appends an object snapshot body to the datagram: `field_count:u16`
    /// followed by `(field_number:u16, packed_args)` per included field, in
    /// declared field order. A field is included from the cache, else from
    /// its class default, else - when Required - from the node's accessor.
    pub fn pack_object(
        &mut self,
        oid: ObjectId,
        node: &dyn Node,
        class: &ClassDef,
        dg: &mut Datagram,
    ) -> Result<(), PackError> {
        let cached = self.query_memory.get(&oid);
        let mut entries: Vec<(&FieldDef, Vec<Value>)> = Vec::new();

        for field in class.fields() {
            if let Some(args) = cached.and_then(|fields| fields.get(&field.name)) {
                entries.push((field, args.clone()));
            } else if let Some(default) = &field.default {
                entries.push((field, default.clone()));
            } else if field.flags & flags::REQUIRED != 0 {
                match node.required_value(field) {
                    Some(args) => entries.push((field, args)),
                    None => {
                        logging::warn!(self.log, "required field has no accessor value";
                                       "context" => "pack_object",
                                       "oid" => %oid,
                                       "field" => %field.name);
                    }
                }
            }
        }

        dg.add_u16(entries.len() as u16);
        for (field, args) in entries {
            dg.add_u16(field.number);
            field.pack_args(dg, &args)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeContext;
    use crate::proto::datagram::DatagramReader;
    use crate::proto::packers::Packer;
    use crate::registry::{FieldSpec, Registry};
    use crate::server::database::StaticDatabase;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct StubNode;

    impl Node for StubNode {
        fn handle_update(&mut self, _ctx: &mut NodeContext, _field: &FieldDef, _args: &[Value]) {}

        fn required_value(&self, field: &FieldDef) -> Option<Vec<Value>> {
            match field.name.as_str() {
                "health" => Some(vec![Value::Int32(100)]),
                _ => None,
            }
        }
    }

    type UpdateLog = Rc<RefCell<Vec<(ObjectId, String)>>>;

    struct RecordingDatabase {
        updates: UpdateLog,
    }

    impl Database for RecordingDatabase {
        fn attempt_login(&mut self, _login: &str, _token: &str) -> Option<ObjectId> {
            None
        }

        fn update_object(&mut self, oid: ObjectId, field: &str, _args: &[Value]) {
            self.updates.borrow_mut().push((oid, field.to_string()));
        }
    }

    fn snapshot_registry() -> Registry {
        let mut builder = Registry::builder();
        builder.configure(
            16,
            vec![
                FieldSpec::new("username", flags::RAM, vec![Packer::Str]),
                FieldSpec::new("title", 0, vec![Packer::Str])
                    .with_default(vec![Value::from("recruit")]),
                FieldSpec::new("health", flags::REQUIRED, vec![Packer::Int32]),
                FieldSpec::new("secret", flags::REQUIRED, vec![Packer::Int32]),
                FieldSpec::new("transient", 0, vec![Packer::Int32]),
            ],
            &[],
        );
        builder.build()
    }

    #[test]
    fn test_snapshot_assembly_order_and_sources() {
        let registry = snapshot_registry();
        let class = registry.class(16).unwrap();
        let oid = ObjectId::Transient(12345);

        let mut memory = MemoryHandler::new(Box::new(StaticDatabase::new(None)), None);
        memory.set_data(oid, "username", vec![Value::from("alice")], false);

        let mut dg = Datagram::new();
        memory.pack_object(oid, &StubNode, class, &mut dg).unwrap();

        let mut reader = DatagramReader::new(dg.as_slice());
        // Cached, default and required fields; "secret" (no accessor value)
        // and "transient" (nothing at all) are skipped.
        assert_eq!(reader.read_u16().unwrap(), 3);

        let (field, args) = class.decompile(&mut reader).unwrap();
        assert_eq!(field.name, "username");
        assert_eq!(args, vec![Value::from("alice")]);

        let (field, args) = class.decompile(&mut reader).unwrap();
        assert_eq!(field.name, "title");
        assert_eq!(args, vec![Value::from("recruit")]);

        let (field, args) = class.decompile(&mut reader).unwrap();
        assert_eq!(field.name, "health");
        assert_eq!(args, vec![Value::Int32(100)]);

        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_cache_overrides_default() {
        let registry = snapshot_registry();
        let class = registry.class(16).unwrap();
        let oid = ObjectId::Transient(7);

        let mut memory = MemoryHandler::new(Box::new(StaticDatabase::new(None)), None);
        memory.set_data(oid, "title", vec![Value::from("veteran")], false);

        let mut dg = Datagram::new();
        memory.pack_object(oid, &StubNode, class, &mut dg).unwrap();

        let mut reader = DatagramReader::new(dg.as_slice());
        assert_eq!(reader.read_u16().unwrap(), 2);

        let (field, args) = class.decompile(&mut reader).unwrap();
        assert_eq!(field.name, "title");
        assert_eq!(args, vec![Value::from("veteran")]);
    }

    #[test]
    fn test_database_write_through_durable_only() {
        let updates: UpdateLog = Rc::new(RefCell::new(Vec::new()));
        let db = RecordingDatabase {
            updates: updates.clone(),
        };
        let mut memory = MemoryHandler::new(Box::new(db), None);

        let durable = ObjectId::Durable(1_000_000_007, 0, 3);
        memory.set_data(durable, "username", vec![Value::from("alice")], true);
        memory.set_data(ObjectId::Transient(12345), "username", vec![Value::from("bob")], true);
        memory.set_data(durable, "title", vec![Value::from("baron")], false);

        let recorded = updates.borrow();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0], (durable, "username".to_string()));
    }
}
