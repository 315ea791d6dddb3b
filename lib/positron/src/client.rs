//! Client side of the runtime: the handshake, the object cache and the
//! on-demand fetch machinery. The client is deliberately tolerant: a
//! datagram it cannot decode is logged and dropped, never a disconnect.

use crate::logging;
use crate::net::channel::Channel;
use crate::net::support::{ErrorType, NetworkError};
use crate::node::{Node, NodeContext, OutboundUpdate};
use crate::proto::datagram::{Datagram, DatagramReader, DecodeError, PackError};
use crate::proto::message::{KickReason, SpecialMessage, FIRST_CLASS_NUMBER};
use crate::proto::object_id::ObjectId;
use crate::proto::packers::Value;
use crate::registry::Registry;
use hashbrown::{HashMap, HashSet};
use mio::net::TcpStream;
use mio::{Events, Poll, Token};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

const CHANNEL_TOKEN: Token = Token(1);
const EVENT_CAPACITY: usize = 64;
// A lost ObjectResponse unmarks the id after this long, allowing a retry.
const OBJECT_REQUEST_RETRY: Duration = Duration::from_secs(2);

/// Errors surfaced to the application using the client director.
#[derive(Debug)]
pub enum ClientError {
    NotConnected,
    UnknownObject(ObjectId),
    Pack(PackError),
}

impl From<PackError> for ClientError {
    #[inline]
    fn from(err: PackError) -> ClientError {
        ClientError::Pack(err)
    }
}

struct ClientObject {
    class_number: u16,
    node: Box<dyn Node>,
}

/// The per-process coordinator on the client: one channel to the server,
/// the local object cache and the handshake state machine.
pub struct ClientDirector {
    registry: Arc<Registry>,
    poll: Poll,
    events: Events,
    channel: Channel,
    connected: bool,

    avatar: Option<ObjectId>,
    initialized: bool,
    zone: Option<u32>,

    objects: HashMap<ObjectId, ClientObject>,
    owned: HashSet<ObjectId>,
    requested_objects: HashMap<ObjectId, Instant>,
    outbound: Vec<OutboundUpdate>,

    player_class: u16,
    on_connect: Box<dyn FnMut(ObjectId)>,
    disconnect_reason: Option<u8>,

    log: logging::Logger,
}

impl ClientDirector {
    /// Prepares a director for one connection attempt. `on_connect` fires
    /// exactly once, after the first zone entry completes. The player class
    /// must have a client-side node binding in the registry.
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        registry: Arc<Registry>,
        player_class: u16,
        on_connect: Box<dyn FnMut(ObjectId)>,
        log: L,
    ) -> io::Result<ClientDirector> {
        if !registry.has_client_class(player_class) {
            panic!("Player class {} has no client node binding", player_class);
        }

        let log = logging::child(log);
        let channel = Channel::new(&log);

        Ok(ClientDirector {
            registry,
            poll: Poll::new()?,
            events: Events::with_capacity(EVENT_CAPACITY),
            channel,
            connected: false,
            avatar: None,
            initialized: false,
            zone: None,
            objects: HashMap::new(),
            owned: HashSet::new(),
            requested_objects: HashMap::new(),
            outbound: Vec::new(),
            player_class,
            on_connect,
            disconnect_reason: None,
            log,
        })
    }

    /// Opens the TCP connection and sends the ConnectionRequest carrying the
    /// locally computed signature hash and the credentials.
    pub fn connect(&mut self, address: SocketAddr, login: &str, token: &str) -> io::Result<()> {
        if self.connected {
            panic!("Director is already connected");
        }

        let stream = TcpStream::connect(address)?;
        self.channel.open(stream);
        self.channel.register(self.poll.registry(), CHANNEL_TOKEN)?;
        self.connected = true;

        let mut dg = Datagram::new();
        dg.add_u16(SpecialMessage::ConnectionRequest.into());
        dg.add_blob(self.registry.signature_hash())
            .expect("Signature hash must fit in a blob");
        dg.add_string(login).expect("Login must fit in a string");
        dg.add_string(token).expect("Token must fit in a string");
        self.write(dg.as_slice());

        logging::info!(self.log, "connecting"; "address" => %address, "login" => login);
        Ok(())
    }

    /// One reactor tick: wait for readiness (at most `timeout`), then pump
    /// the channel through receive → dispatch → flush and sweep the
    /// fetch-retry deadlines.
    pub fn poll(&mut self, timeout: Option<Duration>) {
        self.poll
            .poll(&mut self.events, timeout)
            .expect("Client poll failed");

        if !self.connected {
            return;
        }

        self.pump();
        self.sweep_requests(Instant::now());
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    #[inline]
    pub fn avatar(&self) -> Option<ObjectId> {
        self.avatar
    }

    #[inline]
    pub fn zone(&self) -> Option<u32> {
        self.zone
    }

    /// True once the server has transferred ownership of the node here.
    /// Applications use this to gate OwnerSend fields.
    #[inline]
    pub fn owns(&self, oid: ObjectId) -> bool {
        self.owned.contains(&oid)
    }

    #[inline]
    pub fn has_object(&self, oid: ObjectId) -> bool {
        self.objects.contains_key(&oid)
    }

    /// Raw reason byte of a server-initiated disconnect, if one arrived.
    #[inline]
    pub fn disconnect_reason(&self) -> Option<u8> {
        self.disconnect_reason
    }

    #[inline]
    pub fn kick_reason(&self) -> Option<KickReason> {
        self.disconnect_reason.and_then(KickReason::from_u8)
    }

    /// Compiles and sends a field update on a cached object. There is no
    /// local permission check; the server is authoritative.
    pub fn send_update(&mut self, oid: ObjectId, field_name: &str, args: &[Value]) -> Result<(), ClientError> {
        if !self.connected {
            return Err(ClientError::NotConnected);
        }

        let class_number = self
            .objects
            .get(&oid)
            .map(|obj| obj.class_number)
            .ok_or(ClientError::UnknownObject(oid))?;

        let registry = self.registry.clone();
        let class = registry
            .class(class_number)
            .expect("Cached object class must be registered");

        let mut dg = Datagram::new();
        dg.add_u16(class_number);
        dg.add_object_id(oid).map_err(ClientError::Pack)?;
        class.compile_update(&mut dg, field_name, args)?;
        self.write(dg.as_slice());
        Ok(())
    }

    /// Asks the server to move this client to another zone. The server
    /// answers with ZoneResponse and a fresh ZoneData snapshot.
    pub fn request_zone(&mut self, zone: u32) -> Result<(), ClientError> {
        if !self.connected {
            return Err(ClientError::NotConnected);
        }

        let mut dg = Datagram::new();
        dg.add_u16(SpecialMessage::ZoneRequest.into());
        dg.add_u32(zone);
        self.write(dg.as_slice());
        Ok(())
    }

    /// Requests the current state of an object. Duplicate requests inside
    /// the retry window are suppressed.
    pub fn request_object(&mut self, oid: ObjectId) {
        if self.requested_objects.contains_key(&oid) {
            return;
        }

        self.requested_objects
            .insert(oid, Instant::now() + OBJECT_REQUEST_RETRY);

        let mut dg = Datagram::new();
        dg.add_u16(SpecialMessage::ObjectRequest.into());
        dg.add_object_id(oid).expect("Requested object id must be encodable");
        self.write(dg.as_slice());
    }

    fn pump(&mut self) {
        // A failed receive may still have buffered complete datagrams (the
        // server's parting Disconnect arrives together with the close), so
        // dispatch before acting on the failure.
        let receive_failure = match self.channel.receive() {
            Err(NetworkError::Fatal(err)) => Some(err),
            _ => None,
        };

        while self.connected {
            match self.channel.next_datagram() {
                Some(payload) => self.handle_datagram(payload),
                None => break,
            }
        }

        if let Some(err) = receive_failure {
            if self.connected {
                self.handle_transport_loss(err);
            }
            return;
        }

        if self.connected {
            if let Err(NetworkError::Fatal(err)) = self.channel.send() {
                self.handle_transport_loss(err);
            }
        }
    }

    fn handle_datagram(&mut self, payload: Vec<u8>) {
        if let Err(err) = self.dispatch_datagram(&payload) {
            // Stray datagrams arrive legitimately around zone switches; the
            // client stays up and drops them.
            logging::warn!(self.log, "dropping undecodable datagram"; "error" => ?err);
        }
    }

    fn dispatch_datagram(&mut self, payload: &[u8]) -> Result<(), DecodeError> {
        let mut reader = DatagramReader::new(payload);
        let message_type = reader.read_u16()?;

        if message_type < FIRST_CLASS_NUMBER {
            return match SpecialMessage::from_u16(message_type) {
                Some(SpecialMessage::ConnectionResponse) => self.handle_connection_response(&mut reader),
                Some(SpecialMessage::ZoneResponse) => self.handle_zone_response(&mut reader),
                Some(SpecialMessage::ZoneData) => self.handle_zone_data(&mut reader),
                Some(SpecialMessage::ObjectResponse) => self.read_object_snapshot(&mut reader),
                Some(SpecialMessage::TransferOwner) => self.handle_transfer_owner(&mut reader),
                Some(SpecialMessage::Disconnect) => self.handle_disconnect(&mut reader),
                Some(_) => Err(DecodeError::UnexpectedMessage(message_type)),
                None => Err(DecodeError::UnknownMessage(message_type)),
            };
        }

        self.handle_object_update(message_type, &mut reader)
    }

    fn handle_connection_response(&mut self, reader: &mut DatagramReader) -> Result<(), DecodeError> {
        let oid = reader.read_object_id()?;
        let zone = reader.read_u32()?;

        logging::info!(self.log, "connection accepted"; "oid" => %oid, "zone" => zone);

        let node = self
            .registry
            .create_client_node(self.player_class, oid)
            .expect("Player class must have a client node binding");
        self.avatar = Some(oid);
        self.objects.insert(
            oid,
            ClientObject {
                class_number: self.player_class,
                node,
            },
        );

        let mut dg = Datagram::new();
        dg.add_u16(SpecialMessage::ZoneRequest.into());
        dg.add_u32(zone);
        self.write(dg.as_slice());
        Ok(())
    }

    fn handle_zone_response(&mut self, reader: &mut DatagramReader) -> Result<(), DecodeError> {
        let zone = reader.read_u32()?;
        self.zone = Some(zone);

        match self.avatar {
            Some(avatar) if !self.initialized => {
                self.initialized = true;
                (self.on_connect)(avatar);
            }
            None => {
                logging::warn!(self.log, "zone response before connection response"; "zone" => zone)
            }
            _ => {}
        }
        Ok(())
    }

    fn handle_zone_data(&mut self, reader: &mut DatagramReader) -> Result<(), DecodeError> {
        let zone = reader.read_u32()?;
        self.zone = Some(zone);

        let count = reader.read_u16()?;
        logging::debug!(self.log, "received zone data"; "zone" => zone, "objects" => count);

        for _ in 0..count {
            self.read_object_snapshot(reader)?;
        }
        Ok(())
    }

    /// Installs or updates an object from `object_id · class · snapshot`
    /// and dispatches the embedded fields. Shared by ObjectResponse and the
    /// ZoneData subentries.
    fn read_object_snapshot(&mut self, reader: &mut DatagramReader) -> Result<(), DecodeError> {
        let oid = reader.read_object_id()?;
        self.requested_objects.remove(&oid);

        let class_number = reader.read_u16()?;
        match self.objects.get(&oid) {
            Some(existing) if existing.class_number != class_number => {
                return Err(DecodeError::ClassMismatch {
                    expected: existing.class_number,
                    got: class_number,
                });
            }
            Some(_) => {}
            None => {
                let node = self
                    .registry
                    .create_client_node(class_number, oid)
                    .ok_or(DecodeError::UnknownClass(class_number))?;
                self.objects.insert(oid, ClientObject { class_number, node });
            }
        }

        let registry = self.registry.clone();
        let class = registry
            .class(class_number)
            .ok_or(DecodeError::UnknownClass(class_number))?;

        let field_count = reader.read_u16()?;
        for _ in 0..field_count {
            let (field, args) = class.decompile(reader)?;
            let obj = self.objects.get_mut(&oid).expect("Object installed above");
            let mut ctx = NodeContext::new(oid, class, &mut self.outbound);
            obj.node.handle_update(&mut ctx, field, &args);
        }

        self.flush_outbound();
        Ok(())
    }

    fn handle_transfer_owner(&mut self, reader: &mut DatagramReader) -> Result<(), DecodeError> {
        let oid = reader.read_object_id()?;
        self.owned.insert(oid);
        logging::info!(self.log, "received control over node"; "oid" => %oid);
        Ok(())
    }

    fn handle_disconnect(&mut self, reader: &mut DatagramReader) -> Result<(), DecodeError> {
        let reason = reader.read_u8()?;
        let message = KickReason::from_u8(reason)
            .map(KickReason::describe)
            .unwrap_or("Unknown reason");

        logging::warn!(self.log, "server requested disconnection";
                       "reason" => reason,
                       "message" => message);

        self.disconnect_reason = Some(reason);
        self.shutdown();
        Ok(())
    }

    fn handle_object_update(
        &mut self,
        class_number: u16,
        reader: &mut DatagramReader,
    ) -> Result<(), DecodeError> {
        let oid = reader.read_object_id()?;

        let actual_class = match self.objects.get(&oid) {
            Some(obj) => obj.class_number,
            None => {
                self.request_object_data(oid);
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

        let obj = self.objects.get_mut(&oid).expect("Object presence checked above");
        let mut ctx = NodeContext::new(oid, class, &mut self.outbound);
        obj.node.handle_update(&mut ctx, field, &args);

        self.flush_outbound();
        Ok(())
    }

    /// A signal arrived for an object the cache has no copy of: fetch it,
    /// once per retry window.
    fn request_object_data(&mut self, oid: ObjectId) {
        logging::warn!(self.log, "received message for unknown object"; "oid" => %oid);
        self.request_object(oid);
    }

    fn flush_outbound(&mut self) {
        let updates: Vec<OutboundUpdate> = self.outbound.drain(..).collect();
        for update in updates {
            self.write(&update.payload);
        }
    }

    fn sweep_requests(&mut self, now: Instant) {
        self.requested_objects.retain(|_, deadline| *deadline > now);
    }

    fn write(&mut self, payload: &[u8]) {
        if !self.connected {
            return;
        }

        if let Err(NetworkError::Fatal(err)) = self.channel.write_datagram(payload) {
            self.handle_transport_loss(err);
        }
    }

    fn handle_transport_loss(&mut self, err: ErrorType) {
        logging::warn!(self.log, "connection to server lost"; "error" => ?err);
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if !self.connected {
            return;
        }

        if self.channel.deregister(self.poll.registry()).is_err() {
            logging::debug!(self.log, "channel deregistration failed");
        }
        self.channel.close(false);
        self.connected = false;
    }
}
