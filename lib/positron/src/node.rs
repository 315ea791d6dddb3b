use crate::proto::datagram::{Datagram, PackError};
use crate::proto::object_id::ObjectId;
use crate::proto::packers::Value;
use crate::registry::{ClassDef, FieldDef};

/// Constructs the node implementation bound to a class number.
pub type NodeFactory = Box<dyn Fn(ObjectId) -> Box<dyn Node>>;

/// Behavior attached to a network object. The director owns the node for its
/// lifetime and routes every decoded field update here, with the argument
/// tuple in declared order.
pub trait Node {
    fn handle_update(&mut self, ctx: &mut NodeContext, field: &FieldDef, args: &[Value]);

    /// Accessor consulted when a snapshot needs a `Required` field that has
    /// neither a cached value nor a default.
    fn required_value(&self, field: &FieldDef) -> Option<Vec<Value>> {
        let _ = field;
        None
    }
}

/// Delivery options for an outbound update. Only the server director acts on
/// these; the client ignores them.
#[derive(Debug, Default, Copy, Clone)]
pub struct SendOptions {
    /// Deliver even when the target has not entered a zone yet.
    pub bypass_zone_required: bool,
    /// Zone member excluded from a broadcast fan-out.
    pub broadcast_ignore: Option<ObjectId>,
}

/// A compiled field update queued by a node handler, drained by the director
/// after dispatch returns.
pub struct OutboundUpdate {
    pub oid: ObjectId,
    pub class_number: u16,
    pub field_number: u16,
    pub flags: u32,
    pub args: Vec<Value>,
    pub payload: Vec<u8>,
    pub options: SendOptions,
}

/// Handler-side view of the director. Updates sent here are queued, not
/// written; the single-threaded director flushes them once the handler
/// returns, so handlers never block or re-enter dispatch.
pub struct NodeContext<'a> {
    oid: ObjectId,
    class: &'a ClassDef,
    outbound: &'a mut Vec<OutboundUpdate>,
}

impl<'a> NodeContext<'a> {
    #[inline]
    pub(crate) fn new(
        oid: ObjectId,
        class: &'a ClassDef,
        outbound: &'a mut Vec<OutboundUpdate>,
    ) -> NodeContext<'a> {
        NodeContext { oid, class, outbound }
    }

    /// Identifier of the node being dispatched to.
    #[inline]
    pub fn oid(&self) -> ObjectId {
        self.oid
    }

    pub fn send_update(&mut self, field_name: &str, args: &[Value]) -> Result<(), PackError> {
        self.send_update_with(field_name, args, SendOptions::default())
    }

    /// Compiles `class · oid · field · args` and queues it with the supplied
    /// delivery options.
    pub fn send_update_with(
        &mut self,
        field_name: &str,
        args: &[Value],
        options: SendOptions,
    ) -> Result<(), PackError> {
        let mut dg = Datagram::new();
        dg.add_u16(self.class.number());
        dg.add_object_id(self.oid)?;
        let field = self.class.compile_update(&mut dg, field_name, args)?;

        self.outbound.push(OutboundUpdate {
            oid: self.oid,
            class_number: self.class.number(),
            field_number: field.number,
            flags: field.flags,
            args: args.to_vec(),
            payload: dg.into_vec(),
            options,
        });
        Ok(())
    }
}
