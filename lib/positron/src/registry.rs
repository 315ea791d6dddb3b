use crate::node::{Node, NodeFactory};
use crate::proto::datagram::{Datagram, DatagramReader, DecodeError, PackError};
use crate::proto::message::FIRST_CLASS_NUMBER;
use crate::proto::object_id::ObjectId;
use crate::proto::packers::{Packer, Value};
use hashbrown::HashMap;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Permission and storage flags carried by every field.
pub mod flags {
    /// Any authenticated client may send the field.
    pub const CLIENT_SEND: u32 = 1;
    /// Only the owner of the target node may send the field.
    pub const OWNER_SEND: u32 = 2;
    /// Persisted to the database for durable ids. Implies RAM.
    pub const DATABASE: u32 = 4 | 8;
    /// Cached in server memory and replayed to late joiners.
    pub const RAM: u32 = 8;
    /// Fanned out to every member of the target's zone.
    pub const BROADCAST: u32 = 16;
    /// Always present in snapshots; the node supplies the value on demand.
    pub const REQUIRED: u32 = 32;
}

/// Field description handed to `RegistryBuilder::configure`.
pub struct FieldSpec {
    name: String,
    flags: u32,
    packers: Vec<Packer>,
    default: Option<Vec<Value>>,
}

impl FieldSpec {
    #[inline]
    pub fn new(name: &str, flags: u32, packers: Vec<Packer>) -> FieldSpec {
        FieldSpec {
            name: name.to_string(),
            flags,
            packers,
            default: None,
        }
    }

    /// Attaches a default argument tuple used when assembling snapshots.
    #[inline]
    pub fn with_default(mut self, default: Vec<Value>) -> FieldSpec {
        self.default = Some(default);
        self
    }
}

/// Fully registered field: the declaration plus its assigned wire number.
#[derive(Clone, Debug)]
pub struct FieldDef {
    pub name: String,
    pub number: u16,
    pub flags: u32,
    pub packers: Vec<Packer>,
    pub default: Option<Vec<Value>>,
}

impl FieldDef {
    /// Packs an argument tuple in declared order, checking arity.
    pub fn pack_args(&self, dg: &mut Datagram, args: &[Value]) -> Result<(), PackError> {
        if args.len() != self.packers.len() {
            return Err(PackError::ArgumentCount {
                expected: self.packers.len(),
                got: args.len(),
            });
        }

        for (packer, arg) in self.packers.iter().zip(args) {
            packer.pack(dg, arg)?;
        }

        Ok(())
    }

    fn signature(&self) -> String {
        let packers: Vec<&str> = self.packers.iter().map(|packer| packer.signature()).collect();
        format!("{}:C-{}-{}", self.number, self.flags, packers.join("|"))
    }
}

/// Ordered field list of one class number.
pub struct ClassDef {
    number: u16,
    fields: Vec<FieldDef>,
    by_name: HashMap<String, u16>,
}

impl ClassDef {
    #[inline]
    pub fn number(&self) -> u16 {
        self.number
    }

    #[inline]
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    #[inline]
    pub fn field(&self, number: u16) -> Option<&FieldDef> {
        self.fields.get(number as usize)
    }

    #[inline]
    pub fn field_by_name(&self, name: &str) -> Option<&FieldDef> {
        self.by_name.get(name).map(|&number| &self.fields[number as usize])
    }

    /// Compiles a named field call into `field_number · packed_args` and
    /// returns the field definition for flag inspection.
    pub fn compile_update(
        &self,
        dg: &mut Datagram,
        field_name: &str,
        args: &[Value],
    ) -> Result<&FieldDef, PackError> {
        let field = self
            .field_by_name(field_name)
            .ok_or_else(|| PackError::UnknownField(field_name.to_string()))?;

        dg.add_u16(field.number);
        field.pack_args(dg, args)?;
        Ok(field)
    }

    /// Decompiles `field_number · packed_args` from the cursor.
    pub fn decompile<'s>(
        &'s self,
        reader: &mut DatagramReader,
    ) -> Result<(&'s FieldDef, Vec<Value>), DecodeError> {
        let number = reader.read_u16()?;
        let field = self.field(number).ok_or(DecodeError::UnknownField {
            class: self.number,
            field: number,
        })?;

        let mut args = Vec::with_capacity(field.packers.len());
        for packer in &field.packers {
            args.push(packer.unpack(reader)?);
        }

        Ok((field, args))
    }

    fn signature(&self) -> String {
        let fields: Vec<String> = self.fields.iter().map(FieldDef::signature).collect();
        format!("S-{}", fields.join("~"))
    }
}

/// Builds the immutable class registry during startup. Misconfiguration is a
/// programmer error and panics immediately.
pub struct RegistryBuilder {
    classes: BTreeMap<u16, ClassDef>,
    client_nodes: HashMap<u16, NodeFactory>,
    server_nodes: HashMap<u16, NodeFactory>,
}

impl RegistryBuilder {
    #[inline]
    pub fn new() -> RegistryBuilder {
        RegistryBuilder {
            classes: BTreeMap::new(),
            client_nodes: HashMap::new(),
            server_nodes: HashMap::new(),
        }
    }

    /// Registers a class exactly once. Parents named in `extends` must be
    /// registered beforehand; their field sequences are prepended verbatim
    /// and field numbers assigned by final position.
    pub fn configure(&mut self, class_num: u16, fields: Vec<FieldSpec>, extends: &[u16]) -> &mut Self {
        if class_num < FIRST_CLASS_NUMBER {
            panic!(
                "Class numbers below {} are reserved for special messages, got {}",
                FIRST_CLASS_NUMBER, class_num
            );
        }

        if self.classes.contains_key(&class_num) {
            panic!("Class {} is already registered", class_num);
        }

        let mut flattened: Vec<FieldDef> = Vec::new();
        for &parent in extends {
            let parent_def = self
                .classes
                .get(&parent)
                .unwrap_or_else(|| panic!("Class {} extends unregistered class {}", class_num, parent));
            flattened.extend(parent_def.fields.iter().cloned());
        }

        for spec in fields {
            if let Some(default) = &spec.default {
                if default.len() != spec.packers.len() {
                    panic!(
                        "Default value arity mismatch on {}.{}: expected {}, got {}",
                        class_num,
                        spec.name,
                        spec.packers.len(),
                        default.len()
                    );
                }

                // Reject type mismatches now so snapshot assembly can't fail
                // at runtime on a misdeclared default.
                let mut scratch = Datagram::new();
                for (packer, value) in spec.packers.iter().zip(default) {
                    if let Err(err) = packer.pack(&mut scratch, value) {
                        panic!(
                            "Default value type mismatch on {}.{}: {:?}",
                            class_num, spec.name, err
                        );
                    }
                }
            }

            flattened.push(FieldDef {
                name: spec.name,
                number: 0,
                flags: spec.flags,
                packers: spec.packers,
                default: spec.default,
            });
        }

        let mut by_name = HashMap::new();
        for (number, field) in flattened.iter_mut().enumerate() {
            field.number = number as u16;
            if by_name.insert(field.name.clone(), field.number).is_some() {
                panic!("Duplicate field name {} in class {}", field.name, class_num);
            }
        }

        self.classes.insert(
            class_num,
            ClassDef {
                number: class_num,
                fields: flattened,
                by_name,
            },
        );
        self
    }

    /// Binds the node implementation the client side instantiates for the
    /// class number.
    pub fn client_class<F>(&mut self, class_num: u16, factory: F) -> &mut Self
    where
        F: Fn(ObjectId) -> Box<dyn Node> + 'static,
    {
        self.assert_registered(class_num);
        self.client_nodes.insert(class_num, Box::new(factory));
        self
    }

    /// Binds the node implementation the server side instantiates for the
    /// class number.
    pub fn server_class<F>(&mut self, class_num: u16, factory: F) -> &mut Self
    where
        F: Fn(ObjectId) -> Box<dyn Node> + 'static,
    {
        self.assert_registered(class_num);
        self.server_nodes.insert(class_num, Box::new(factory));
        self
    }

    /// Freezes the registry. The signature and its hash are computed here
    /// once; they are pure functions of the registered classes.
    pub fn build(self) -> Registry {
        let lines: Vec<String> = self
            .classes
            .iter()
            .map(|(number, class)| format!("{}: {}", number, class.signature()))
            .collect();
        let signature = lines.join("\n");
        let signature_hash: [u8; 32] = Sha256::digest(signature.as_bytes()).into();

        Registry {
            classes: self.classes,
            client_nodes: self.client_nodes,
            server_nodes: self.server_nodes,
            signature,
            signature_hash,
        }
    }

    fn assert_registered(&self, class_num: u16) {
        if !self.classes.contains_key(&class_num) {
            panic!("Class {} must be configured before binding a node", class_num);
        }
    }
}

/// Immutable class registry shared by both directors. Built once during
/// startup and passed around by handle.
pub struct Registry {
    classes: BTreeMap<u16, ClassDef>,
    client_nodes: HashMap<u16, NodeFactory>,
    server_nodes: HashMap<u16, NodeFactory>,
    signature: String,
    signature_hash: [u8; 32],
}

impl Registry {
    #[inline]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    #[inline]
    pub fn class(&self, class_num: u16) -> Option<&ClassDef> {
        self.classes.get(&class_num)
    }

    #[inline]
    pub fn signature(&self) -> &str {
        &self.signature
    }

    #[inline]
    pub fn signature_hash(&self) -> &[u8; 32] {
        &self.signature_hash
    }

    #[inline]
    pub fn has_client_class(&self, class_num: u16) -> bool {
        self.client_nodes.contains_key(&class_num)
    }

    #[inline]
    pub fn has_server_class(&self, class_num: u16) -> bool {
        self.server_nodes.contains_key(&class_num)
    }

    pub fn create_client_node(&self, class_num: u16, oid: ObjectId) -> Option<Box<dyn Node>> {
        self.client_nodes.get(&class_num).map(|factory| factory(oid))
    }

    pub fn create_server_node(&self, class_num: u16, oid: ObjectId) -> Option<Box<dyn Node>> {
        self.server_nodes.get(&class_num).map(|factory| factory(oid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn talker_fields() -> Vec<FieldSpec> {
        vec![
            FieldSpec::new("request_username", flags::OWNER_SEND, vec![Packer::Str]),
            FieldSpec::new("username", flags::RAM, vec![Packer::Str]),
            FieldSpec::new(
                "message",
                flags::BROADCAST | flags::RAM,
                vec![Packer::Str, Packer::Str],
            ),
        ]
    }

    #[test]
    fn test_database_implies_ram() {
        assert_eq!(flags::DATABASE & flags::RAM, flags::RAM);
    }

    #[test]
    fn test_signature_format() {
        let mut builder = Registry::builder();
        builder.configure(16, talker_fields(), &[]);
        let registry = builder.build();

        assert_eq!(
            registry.signature(),
            "16: S-0:C-2-P-String~1:C-8-P-String~2:C-24-P-String|P-String"
        );
    }

    #[test]
    fn test_signature_hash_stability() {
        let build = || {
            let mut builder = Registry::builder();
            builder.configure(16, talker_fields(), &[]);
            builder.build()
        };

        assert_eq!(build().signature_hash(), build().signature_hash());

        let mut other = Registry::builder();
        other.configure(
            16,
            vec![FieldSpec::new("request_username", flags::OWNER_SEND, vec![Packer::Int32])],
            &[],
        );

        assert_ne!(build().signature_hash(), other.build().signature_hash());
    }

    #[test]
    fn test_inheritance_flattens_in_order() {
        let mut builder = Registry::builder();
        builder.configure(
            16,
            vec![
                FieldSpec::new("alpha", 0, vec![Packer::Int32]),
                FieldSpec::new("beta", 0, vec![Packer::Int32]),
            ],
            &[],
        );
        builder.configure(17, vec![FieldSpec::new("gamma", 0, vec![Packer::Str])], &[16]);
        let registry = builder.build();

        let child = registry.class(17).unwrap();
        let names: Vec<&str> = child.fields().iter().map(|field| field.name.as_str()).collect();

        assert_eq!(names, vec!["alpha", "beta", "gamma"]);
        assert_eq!(child.field_by_name("gamma").unwrap().number, 2);
        // The parent keeps its own numbering.
        assert_eq!(registry.class(16).unwrap().field_by_name("beta").unwrap().number, 1);
    }

    #[test]
    fn test_compile_decompile_identity() {
        let mut builder = Registry::builder();
        builder.configure(16, talker_fields(), &[]);
        let registry = builder.build();
        let class = registry.class(16).unwrap();

        let args = vec![Value::from("alice"), Value::from("hello there")];
        let mut dg = Datagram::new();
        class.compile_update(&mut dg, "message", &args).unwrap();

        let mut reader = DatagramReader::new(dg.as_slice());
        let (field, decoded) = class.decompile(&mut reader).unwrap();

        assert_eq!(field.name, "message");
        assert_eq!(field.number, 2);
        assert_eq!(decoded, args);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_decompile_unknown_field() {
        let mut builder = Registry::builder();
        builder.configure(16, talker_fields(), &[]);
        let registry = builder.build();
        let class = registry.class(16).unwrap();

        let mut dg = Datagram::new();
        dg.add_u16(9);

        let mut reader = DatagramReader::new(dg.as_slice());
        assert_eq!(
            class.decompile(&mut reader).unwrap_err(),
            DecodeError::UnknownField { class: 16, field: 9 }
        );
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn test_reconfigure_panics() {
        let mut builder = Registry::builder();
        builder.configure(16, vec![], &[]);
        builder.configure(16, vec![], &[]);
    }

    #[test]
    #[should_panic(expected = "reserved for special messages")]
    fn test_reserved_class_number_panics() {
        let mut builder = Registry::builder();
        builder.configure(9, vec![], &[]);
    }

    #[test]
    #[should_panic(expected = "Duplicate field name")]
    fn test_duplicate_field_panics() {
        let mut builder = Registry::builder();
        builder.configure(
            16,
            vec![
                FieldSpec::new("twin", 0, vec![Packer::Int32]),
                FieldSpec::new("twin", 0, vec![Packer::Int32]),
            ],
            &[],
        );
    }
}
