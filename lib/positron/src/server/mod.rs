//! Authoritative side of the runtime: the accept loop, the per-connection
//! state machine, permission enforcement and zone fan-out.

pub mod database;
pub mod memory;

use crate::logging;
use crate::net::channel::Channel;
use crate::net::support::NetworkError;
use crate::node::{Node, NodeContext, OutboundUpdate, SendOptions};
use crate::proto::datagram::{Datagram, DatagramReader, DecodeError};
use crate::proto::message::{KickReason, SpecialMessage, FIRST_CLASS_NUMBER};
use crate::proto::object_id::ObjectId;
use crate::registry::{flags, Registry};
use crate::server::database::Database;
use crate::server::memory::MemoryHandler;
use hashbrown::HashMap;
use indexmap::IndexSet;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

pub type ConnId = usize;

const LISTENER_TOKEN: Token = Token(0);
const POLL_INTERVAL: Duration = Duration::from_millis(15);
const EVENT_CAPACITY: usize = 1024;

/// Token values are offset by one so the listener keeps token zero.
#[inline]
fn conn_token(conn: ConnId) -> Token {
    Token(conn + 1)
}

/// Table entry for a live server object: wire identity plus the bound node
/// behavior. Only the server tracks ownership.
struct ServerObject {
    class_number: u16,
    owner: Option<ObjectId>,
    node: Box<dyn Node>,
}

/// The per-process coordinator on the server: owns the listener, the
/// connection channels, the object table and all zone state. Runs on a
/// single cooperative reactor; nothing here blocks and no state needs locks.
pub struct ServerDirector {
    registry: Arc<Registry>,
    poll: Poll,
    events: Events,
    listener: TcpListener,

    channels: Vec<Channel>,
    free: Vec<ConnId>,
    open: IndexSet<ConnId>,

    // Connection state machine: a connection is exactly one of partial,
    // identified-nozone (identified but absent from zone_of) or
    // identified-zoned.
    partial: IndexSet<ConnId>,
    identified: HashMap<ObjectId, ConnId>,
    reverse_identified: HashMap<ConnId, ObjectId>,

    zone_members: HashMap<u32, IndexSet<ObjectId>>,
    zone_of: HashMap<ObjectId, u32>,

    objects: HashMap<ObjectId, ServerObject>,
    memory: MemoryHandler,
    outbound: Vec<OutboundUpdate>,

    player_class: u16,
    max_clients: usize,

    log: logging::Logger,
}

impl ServerDirector {
    /// Binds the listener and prepares the reactor. The player class must
    /// have a server-side node binding in the registry.
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        registry: Arc<Registry>,
        db: Box<dyn Database>,
        player_class: u16,
        address: SocketAddr,
        max_clients: usize,
        log: L,
    ) -> io::Result<ServerDirector> {
        if !registry.has_server_class(player_class) {
            panic!("Player class {} has no server node binding", player_class);
        }

        let log = logging::child(log);
        let poll = Poll::new()?;
        let mut listener = TcpListener::bind(address)?;

        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        logging::info!(log, "launched server"; "address" => %address, "max_clients" => max_clients);

        Ok(ServerDirector {
            registry,
            poll,
            events: Events::with_capacity(EVENT_CAPACITY),
            listener,
            channels: Vec::new(),
            free: Vec::new(),
            open: IndexSet::new(),
            partial: IndexSet::new(),
            identified: HashMap::new(),
            reverse_identified: HashMap::new(),
            zone_members: HashMap::new(),
            zone_of: HashMap::new(),
            objects: HashMap::new(),
            memory: MemoryHandler::new(db, &log),
            outbound: Vec::new(),
            player_class,
            max_clients,
            log,
        })
    }

    /// Address the listener actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr().expect("Listener must have a local address")
    }

    /// Number of authenticated connections.
    #[inline]
    pub fn client_count(&self) -> usize {
        self.identified.len()
    }

    /// Runs the reactor forever.
    pub fn run(&mut self) {
        loop {
            self.poll(Some(POLL_INTERVAL));
        }
    }

    /// One reactor tick: wait for readiness (at most `timeout`), accept new
    /// connections, then pump every open channel through
    /// receive → dispatch → flush. The poll acts as a wakeup; the pump does
    /// the actual work, mirroring the per-tick force-send of the channels.
    pub fn poll(&mut self, timeout: Option<Duration>) {
        self.poll
            .poll(&mut self.events, timeout)
            .expect("Server poll failed");

        self.accept_new();
        self.pump_channels();
    }

    fn accept_new(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, address)) => {
                    if self.open.len() >= self.max_clients {
                        logging::warn!(self.log, "connection limit reached, dropping";
                                       "context" => "accept",
                                       "address" => %address);
                        drop(stream);
                        continue;
                    }

                    // Retrieve a pooled channel or create a new one.
                    let conn = match self.free.pop() {
                        Some(conn) => conn,
                        None => {
                            self.channels.push(Channel::new(&self.log));
                            self.channels.len() - 1
                        }
                    };

                    let channel = &mut self.channels[conn];
                    channel.open(stream);
                    if channel.register(self.poll.registry(), conn_token(conn)).is_err() {
                        logging::error!(self.log, "stream registration failed"; "conn" => conn);
                        channel.close(false);
                        self.free.push(conn);
                        continue;
                    }

                    self.open.insert(conn);
                    self.partial.insert(conn);

                    logging::debug!(self.log, "accepted connection";
                                    "context" => "accept",
                                    "conn" => conn,
                                    "address" => %address);
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    logging::error!(self.log, "accept failed"; "error" => %err);
                    break;
                }
            }
        }
    }

    fn pump_channels(&mut self) {
        let conns: Vec<ConnId> = self.open.iter().copied().collect();

        for conn in conns {
            // The connection may have been torn down by an earlier dispatch
            // on this tick (a DoubleLogin ejection, a broken broadcast).
            if !self.open.contains(&conn) {
                continue;
            }

            // Dispatch whatever arrived before acting on a receive failure;
            // datagrams already buffered keep their arrival-order handling
            // even when the peer closed right after sending them.
            let receive_failure = match self.channels[conn].receive() {
                Err(NetworkError::Fatal(err)) => Some(err),
                _ => None,
            };

            while self.open.contains(&conn) {
                match self.channels[conn].next_datagram() {
                    Some(payload) => self.handle_datagram(conn, payload),
                    None => break,
                }
            }

            if let Some(err) = receive_failure {
                if self.open.contains(&conn) {
                    logging::debug!(self.log, "connection lost";
                                    "conn" => conn,
                                    "error" => ?err);
                    self.teardown(conn, false);
                }
                continue;
            }

            if self.open.contains(&conn) {
                if let Err(NetworkError::Fatal(err)) = self.channels[conn].send() {
                    logging::debug!(self.log, "flush failed";
                                    "conn" => conn,
                                    "error" => ?err);
                    self.teardown(conn, false);
                }
            }
        }
    }

    fn handle_datagram(&mut self, conn: ConnId, payload: Vec<u8>) {
        if let Err(err) = self.dispatch_datagram(conn, &payload) {
            logging::warn!(self.log, "error parsing datagram";
                           "conn" => self.describe(conn),
                           "error" => ?err);
            self.eject(conn, KickReason::InvalidMessage);
        }
    }

    fn dispatch_datagram(&mut self, conn: ConnId, payload: &[u8]) -> Result<(), DecodeError> {
        let mut reader = DatagramReader::new(payload);
        let message_type = reader.read_u16()?;

        if message_type < FIRST_CLASS_NUMBER {
            return match SpecialMessage::from_u16(message_type) {
                Some(SpecialMessage::ConnectionRequest) => self.handle_connection_request(conn, &mut reader),
                Some(SpecialMessage::ZoneRequest) => self.handle_zone_request(conn, &mut reader),
                Some(SpecialMessage::ObjectRequest) => self.handle_object_request(conn, &mut reader),
                Some(_) => Err(DecodeError::UnexpectedMessage(message_type)),
                None => Err(DecodeError::UnknownMessage(message_type)),
            };
        }

        self.handle_object_update(conn, message_type, &mut reader)
    }

    fn handle_connection_request(
        &mut self,
        conn: ConnId,
        reader: &mut DatagramReader,
    ) -> Result<(), DecodeError> {
        if !self.partial.contains(&conn) {
            logging::warn!(self.log, "repeated connection request"; "conn" => self.describe(conn));
            self.eject(conn, KickReason::InvalidConnectionRequest);
            return Ok(());
        }

        let signature_hash = reader.read_blob()?;
        let login = reader.read_string()?;
        let token = reader.read_string()?;

        if signature_hash.as_slice() != &self.registry.signature_hash()[..] {
            logging::warn!(self.log, "signature mismatch";
                           "conn" => conn,
                           "login" => %login);
            self.eject(conn, KickReason::InvalidSignature);
            return Ok(());
        }

        let oid = match self.memory.db_mut().attempt_login(&login, &token) {
            Some(oid) => oid,
            None => {
                logging::warn!(self.log, "login rejected"; "conn" => conn, "login" => %login);
                self.eject(conn, KickReason::InvalidLogin);
                return Ok(());
            }
        };

        if !oid.is_encodable() {
            logging::error!(self.log, "database returned unencodable object id";
                            "login" => %login,
                            "oid" => %oid);
            self.eject(conn, KickReason::InvalidLogin);
            return Ok(());
        }

        // A live session for the same id loses to the new one.
        if let Some(&old) = self.identified.get(&oid) {
            self.eject(old, KickReason::DoubleLogin);
        }

        self.partial.shift_remove(&conn);
        self.identified.insert(oid, conn);
        self.reverse_identified.insert(conn, oid);

        let node = self
            .registry
            .create_server_node(self.player_class, oid)
            .expect("Player class must have a server node binding");
        self.objects.insert(
            oid,
            ServerObject {
                class_number: self.player_class,
                owner: None,
                node,
            },
        );
        self.transfer_owner(oid, oid);

        let mut dg = Datagram::new();
        dg.add_u16(SpecialMessage::ConnectionResponse.into());
        dg.add_object_id(oid).expect("Object id must be encodable");
        dg.add_u32(0); // Initial zone
        self.write_to(conn, dg.as_slice());

        logging::info!(self.log, "client identified"; "conn" => conn, "oid" => %oid);
        Ok(())
    }

    fn handle_zone_request(&mut self, conn: ConnId, reader: &mut DatagramReader) -> Result<(), DecodeError> {
        let client_oid = match self.reverse_identified.get(&conn).copied() {
            Some(oid) => oid,
            None => {
                logging::warn!(self.log, "zone request while not identified";
                               "conn" => self.describe(conn));
                self.eject(conn, KickReason::PartialRequest);
                return Ok(());
            }
        };

        let zone = reader.read_u32()?;
        self.leave_zone(client_oid);

        let mut dg = Datagram::new();
        dg.add_u16(SpecialMessage::ZoneResponse.into());
        dg.add_u32(zone);
        self.write_to(conn, dg.as_slice());

        // Snapshot the members present before the join so the joiner never
        // sees itself in its own zone data.
        let members: Vec<ObjectId> = self
            .zone_members
            .get(&zone)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();

        let mut dg = Datagram::new();
        dg.add_u16(SpecialMessage::ZoneData.into());
        dg.add_u32(zone);
        dg.add_u16(members.len() as u16);
        for member in &members {
            self.append_object_snapshot(*member, &mut dg);
        }
        self.write_to(conn, dg.as_slice());

        let mut announce = Datagram::new();
        announce.add_u16(SpecialMessage::ObjectResponse.into());
        self.append_object_snapshot(client_oid, &mut announce);
        for member in &members {
            if let Some(&target) = self.identified.get(member) {
                self.write_to(target, announce.as_slice());
            }
        }

        self.join_zone(client_oid, zone);
        logging::debug!(self.log, "zone entered"; "oid" => %client_oid, "zone" => zone);
        Ok(())
    }

    fn handle_object_request(&mut self, conn: ConnId, reader: &mut DatagramReader) -> Result<(), DecodeError> {
        let client_oid = match self.reverse_identified.get(&conn).copied() {
            Some(oid) => oid,
            None => {
                logging::warn!(self.log, "object request while not identified";
                               "conn" => self.describe(conn));
                self.eject(conn, KickReason::PartialRequest);
                return Ok(());
            }
        };

        if !self.zone_of.contains_key(&client_oid) {
            logging::warn!(self.log, "object request before entering a zone";
                           "conn" => self.describe(conn));
            self.eject(conn, KickReason::PartialRequest);
            return Ok(());
        }

        let oid = reader.read_object_id()?;
        if self.zone_of.get(&oid) != self.zone_of.get(&client_oid) {
            logging::warn!(self.log, "object request across zones";
                           "conn" => self.describe(conn),
                           "oid" => %oid);
            self.eject(conn, KickReason::HiddenZone);
            return Ok(());
        }

        let mut dg = Datagram::new();
        dg.add_u16(SpecialMessage::ObjectResponse.into());
        self.append_object_snapshot(oid, &mut dg);
        self.write_to(conn, dg.as_slice());
        Ok(())
    }

    fn handle_object_update(
        &mut self,
        conn: ConnId,
        class_number: u16,
        reader: &mut DatagramReader,
    ) -> Result<(), DecodeError> {
        let oid = reader.read_object_id()?;

        let actual_class = match self.objects.get(&oid) {
            Some(obj) => obj.class_number,
            None => {
                // Clients cannot introduce objects into the world.
                logging::warn!(self.log, "update for unknown object";
                               "conn" => self.describe(conn),
                               "oid" => %oid);
                self.eject(conn, KickReason::InvalidObjectId);
                return Ok(());
            }
        };

        if actual_class != class_number {
            return Err(DecodeError::ClassMismatch {
                expected: actual_class,
                got: class_number,
            });
        }

        let registry = self.registry.clone();
        let class = registry
            .class(class_number)
            .ok_or(DecodeError::UnknownClass(class_number))?;
        let (field, args) = class.decompile(reader)?;

        let client_oid = match self.reverse_identified.get(&conn).copied() {
            Some(oid) => oid,
            None => {
                logging::warn!(self.log, "update from unidentified client";
                               "conn" => conn,
                               "field" => %field.name);
                self.eject(conn, KickReason::PartialRequest);
                return Ok(());
            }
        };

        let owner = self.objects[&oid].owner;
        let allowed = field.flags & flags::CLIENT_SEND != 0
            || (field.flags & flags::OWNER_SEND != 0 && owner == Some(client_oid));
        if !allowed {
            logging::warn!(self.log, "update without permission";
                           "conn" => self.describe(conn),
                           "oid" => %oid,
                           "field" => %field.name);
            self.eject(conn, KickReason::PermissionDenied);
            return Ok(());
        }

        if field.flags & flags::RAM != 0 {
            self.memory.set_data(
                oid,
                &field.name,
                args.clone(),
                field.flags & flags::DATABASE == flags::DATABASE,
            );
        }

        let obj = self.objects.get_mut(&oid).expect("Object presence checked above");
        let mut ctx = NodeContext::new(oid, class, &mut self.outbound);
        obj.node.handle_update(&mut ctx, field, &args);

        self.flush_outbound();
        Ok(())
    }

    /// Drains updates queued by node handlers. Server-originated RAM fields
    /// go through the memory cache exactly like inbound ones, so late-join
    /// snapshots reflect them.
    fn flush_outbound(&mut self) {
        let updates: Vec<OutboundUpdate> = self.outbound.drain(..).collect();

        for update in updates {
            let OutboundUpdate {
                oid,
                class_number,
                field_number,
                flags: field_flags,
                args,
                payload,
                options,
            } = update;

            if field_flags & flags::RAM != 0 {
                let field_name = self
                    .registry
                    .class(class_number)
                    .and_then(|class| class.field(field_number))
                    .map(|field| field.name.clone());

                if let Some(name) = field_name {
                    self.memory
                        .set_data(oid, &name, args, field_flags & flags::DATABASE == flags::DATABASE);
                }
            }

            self.send_datagram_to(oid, field_flags, &payload, options);
        }
    }

    /// Routes a compiled datagram to the object's connection, or to its
    /// whole zone for broadcast fields. Zoneless targets are a protocol
    /// violation unless explicitly bypassed (owner transfer during login).
    pub fn send_datagram_to(
        &mut self,
        target: ObjectId,
        field_flags: u32,
        payload: &[u8],
        options: SendOptions,
    ) {
        if !options.bypass_zone_required && !self.zone_of.contains_key(&target) {
            logging::warn!(self.log, "datagram for an object without a zone"; "oid" => %target);
            if let Some(&conn) = self.identified.get(&target) {
                self.eject(conn, KickReason::PartialRequest);
            }
            return;
        }

        if field_flags & flags::BROADCAST != 0 {
            match self.zone_of.get(&target).copied() {
                Some(zone) => self.broadcast_to_zone(zone, payload, options.broadcast_ignore),
                None => {
                    logging::warn!(self.log, "broadcast for an object without a zone"; "oid" => %target)
                }
            }
        } else if let Some(&conn) = self.identified.get(&target) {
            self.write_to(conn, payload);
        } else {
            logging::warn!(self.log, "datagram for an offline object"; "oid" => %target);
        }
    }

    /// Delivers a datagram to every member of the zone, in member-set
    /// iteration order, skipping `ignore`.
    pub fn broadcast_to_zone(&mut self, zone: u32, payload: &[u8], ignore: Option<ObjectId>) {
        let targets: Vec<ConnId> = match self.zone_members.get(&zone) {
            Some(members) => members
                .iter()
                .filter(|&&member| Some(member) != ignore)
                .filter_map(|member| self.identified.get(member).copied())
                .collect(),
            None => {
                logging::warn!(self.log, "broadcast to a zone that does not exist"; "zone" => zone);
                return;
            }
        };

        for conn in targets {
            self.write_to(conn, payload);
        }
    }

    /// Reassigns ownership of a node and notifies the new owner, bypassing
    /// the zone requirement (ownership lands before the first zone entry).
    pub fn transfer_owner(&mut self, oid: ObjectId, new_owner: ObjectId) {
        match self.objects.get_mut(&oid) {
            Some(obj) => obj.owner = Some(new_owner),
            None => {
                logging::warn!(self.log, "owner transfer for unknown object"; "oid" => %oid);
                return;
            }
        }

        let mut dg = Datagram::new();
        dg.add_u16(SpecialMessage::TransferOwner.into());
        dg.add_object_id(oid).expect("Object id must be encodable");
        self.send_datagram_to(
            new_owner,
            0,
            dg.as_slice(),
            SendOptions {
                bypass_zone_required: true,
                broadcast_ignore: None,
            },
        );
    }

    /// Sends the kick notice and tears the connection down.
    pub fn eject(&mut self, conn: ConnId, reason: KickReason) {
        if !self.open.contains(&conn) {
            return;
        }

        logging::warn!(self.log, "kicking client";
                       "context" => "eject",
                       "conn" => self.describe(conn),
                       "reason" => ?reason);

        let mut dg = Datagram::new();
        dg.add_u16(SpecialMessage::Disconnect.into());
        dg.add_u8(reason.into());
        drop(self.channels[conn].write_datagram(dg.as_slice()));

        self.teardown(conn, true);
    }

    fn teardown(&mut self, conn: ConnId, flush: bool) {
        if !self.open.shift_remove(&conn) {
            return;
        }

        self.partial.shift_remove(&conn);
        if let Some(oid) = self.reverse_identified.remove(&conn) {
            self.identified.remove(&oid);
            self.leave_zone(oid);
            // The player node dies with the session.
            self.objects.remove(&oid);
        }

        let channel = &mut self.channels[conn];
        if channel.deregister(self.poll.registry()).is_err() {
            logging::debug!(self.log, "deregistration failed"; "conn" => conn);
        }
        channel.close(flush);
        self.free.push(conn);

        logging::debug!(self.log, "connection torn down"; "context" => "teardown", "conn" => conn);
    }

    fn leave_zone(&mut self, oid: ObjectId) {
        if let Some(zone) = self.zone_of.remove(&oid) {
            if let Some(members) = self.zone_members.get_mut(&zone) {
                members.shift_remove(&oid);
            }
        }
    }

    fn join_zone(&mut self, oid: ObjectId, zone: u32) {
        self.zone_of.insert(oid, zone);
        self.zone_members
            .entry(zone)
            .or_insert_with(IndexSet::new)
            .insert(oid);
    }

    /// Appends `object_id · class_number · snapshot_body` for a live object.
    fn append_object_snapshot(&mut self, oid: ObjectId, dg: &mut Datagram) {
        let obj = self.objects.get(&oid).expect("Snapshot target must be live");
        let class = self
            .registry
            .class(obj.class_number)
            .expect("Object class must be registered");

        dg.add_object_id(oid).expect("Object id must be encodable");
        dg.add_u16(obj.class_number);
        self.memory
            .pack_object(oid, &*obj.node, class, dg)
            .expect("Snapshot must compile");
    }

    fn write_to(&mut self, conn: ConnId, payload: &[u8]) {
        if !self.open.contains(&conn) {
            return;
        }

        if let Err(NetworkError::Fatal(err)) = self.channels[conn].write_datagram(payload) {
            logging::warn!(self.log, "write failed, dropping connection";
                           "conn" => conn,
                           "error" => ?err);
            self.teardown(conn, false);
        }
    }

    fn describe(&self, conn: ConnId) -> String {
        match self.reverse_identified.get(&conn) {
            Some(oid) => format!("OID-{}", oid),
            None => format!("conn-{}", conn),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::packers::{Packer, Value};
    use crate::registry::{FieldDef, FieldSpec};
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::thread;

    struct SilentNode;

    impl Node for SilentNode {
        fn handle_update(&mut self, _ctx: &mut NodeContext, _field: &FieldDef, _args: &[Value]) {}
    }

    fn test_registry() -> Arc<Registry> {
        let mut builder = Registry::builder();
        builder.configure(
            16,
            vec![FieldSpec::new("noop", flags::CLIENT_SEND, vec![Packer::Int32])],
            &[],
        );
        builder.server_class(16, |_oid| Box::new(SilentNode));
        Arc::new(builder.build())
    }

    fn test_director() -> ServerDirector {
        let mut db = database::StaticDatabase::new(None);
        db.insert("login", "password", ObjectId::Transient(12345));

        ServerDirector::new(
            test_registry(),
            Box::new(db),
            16,
            "127.0.0.1:0".parse().unwrap(),
            32,
            None,
        )
        .expect("Director must bind")
    }

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut framed = (payload.len() as u16).to_le_bytes().to_vec();
        framed.extend_from_slice(payload);
        framed
    }

    fn pump(director: &mut ServerDirector, ticks: usize) {
        for _ in 0..ticks {
            director.poll(Some(Duration::from_millis(1)));
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn login_payload(director: &ServerDirector) -> Vec<u8> {
        let mut dg = Datagram::new();
        dg.add_u16(SpecialMessage::ConnectionRequest.into());
        dg.add_blob(director.registry.signature_hash()).unwrap();
        dg.add_string("login").unwrap();
        dg.add_string("password").unwrap();
        dg.into_vec()
    }

    #[test]
    fn test_accept_enters_partial_state() {
        let mut director = test_director();
        let _client = TcpStream::connect(director.local_addr()).unwrap();

        pump(&mut director, 5);

        assert_eq!(director.partial.len(), 1);
        assert!(director.identified.is_empty());
        assert!(director.reverse_identified.is_empty());
    }

    #[test]
    fn test_login_promotes_and_keeps_invariants() {
        let mut director = test_director();
        let mut client = TcpStream::connect(director.local_addr()).unwrap();

        pump(&mut director, 5);
        client.write_all(&frame(&login_payload(&director))).unwrap();
        pump(&mut director, 5);

        // The partial set and the identified map never overlap.
        assert!(director.partial.is_empty());
        assert_eq!(director.identified.len(), 1);
        let conn = director.identified[&ObjectId::Transient(12345)];
        assert_eq!(director.reverse_identified[&conn], ObjectId::Transient(12345));
        assert!(director.objects.contains_key(&ObjectId::Transient(12345)));
        assert_eq!(
            director.objects[&ObjectId::Transient(12345)].owner,
            Some(ObjectId::Transient(12345))
        );
    }

    #[test]
    fn test_zone_membership_bi_implication() {
        let mut director = test_director();
        let mut client = TcpStream::connect(director.local_addr()).unwrap();

        pump(&mut director, 5);
        client.write_all(&frame(&login_payload(&director))).unwrap();
        pump(&mut director, 5);

        let oid = ObjectId::Transient(12345);
        assert!(!director.zone_of.contains_key(&oid));

        let mut dg = Datagram::new();
        dg.add_u16(SpecialMessage::ZoneRequest.into());
        dg.add_u32(7);
        client.write_all(&frame(&dg.into_vec())).unwrap();
        pump(&mut director, 5);

        assert_eq!(director.zone_of[&oid], 7);
        assert!(director.zone_members[&7].contains(&oid));

        // Switching zones keeps the maps in lockstep.
        let mut dg = Datagram::new();
        dg.add_u16(SpecialMessage::ZoneRequest.into());
        dg.add_u32(9);
        client.write_all(&frame(&dg.into_vec())).unwrap();
        pump(&mut director, 5);

        assert_eq!(director.zone_of[&oid], 9);
        assert!(!director.zone_members[&7].contains(&oid));
        assert!(director.zone_members[&9].contains(&oid));
    }

    #[test]
    fn test_garbage_triggers_invalid_message_kick() {
        let mut director = test_director();
        let mut client = TcpStream::connect(director.local_addr()).unwrap();

        pump(&mut director, 5);
        // Special-range message number with no handler on the server.
        let mut dg = Datagram::new();
        dg.add_u16(SpecialMessage::ZoneData.into());
        client.write_all(&frame(&dg.into_vec())).unwrap();
        pump(&mut director, 5);

        assert!(director.open.is_empty());

        client
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        let mut response = Vec::new();
        client.read_to_end(&mut response).unwrap();

        // Length prefix, Disconnect message number, InvalidMessage reason.
        assert_eq!(response[..5], [3, 0, 5, 0, u8::from(KickReason::InvalidMessage)]);
    }

    #[test]
    fn test_transport_loss_cleans_up() {
        let mut director = test_director();
        let mut client = TcpStream::connect(director.local_addr()).unwrap();

        pump(&mut director, 5);
        client.write_all(&frame(&login_payload(&director))).unwrap();
        pump(&mut director, 5);
        assert_eq!(director.client_count(), 1);

        drop(client);
        pump(&mut director, 5);

        assert_eq!(director.client_count(), 0);
        assert!(director.open.is_empty());
        assert!(director.objects.is_empty());
    }
}
