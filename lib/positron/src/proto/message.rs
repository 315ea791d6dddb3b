/// Message type values below this bound belong to the special-message range;
/// class numbers start here.
pub const FIRST_CLASS_NUMBER: u16 = 16;

/// Control messages exchanged outside the object-update path. The `u16`
/// message-type namespace reserves values 1 through 15 for these.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[repr(u16)]
pub enum SpecialMessage {
    /// Client login: signature hash (32 byte blob), login, token.
    ConnectionRequest = 1,
    /// Server accept: user id and initial zone.
    ConnectionResponse = 2,
    /// Client request to enter a zone.
    ZoneRequest = 3,
    ZoneResponse = 4,
    /// Sent by the server right before a kick. Carries the reason byte.
    Disconnect = 5,
    /// Client fetch of an object it received a signal for but has no copy of.
    ObjectRequest = 6,
    ObjectResponse = 7,
    TransferOwner = 8,
    /// Bulk snapshot of a zone's members, sent on zone entry.
    ZoneData = 9,
}

impl SpecialMessage {
    pub fn from_u16(value: u16) -> Option<SpecialMessage> {
        match value {
            1 => Some(SpecialMessage::ConnectionRequest),
            2 => Some(SpecialMessage::ConnectionResponse),
            3 => Some(SpecialMessage::ZoneRequest),
            4 => Some(SpecialMessage::ZoneResponse),
            5 => Some(SpecialMessage::Disconnect),
            6 => Some(SpecialMessage::ObjectRequest),
            7 => Some(SpecialMessage::ObjectResponse),
            8 => Some(SpecialMessage::TransferOwner),
            9 => Some(SpecialMessage::ZoneData),
            _ => None,
        }
    }
}

impl From<SpecialMessage> for u16 {
    #[inline]
    fn from(message: SpecialMessage) -> u16 {
        message as u16
    }
}

/// Reason byte carried by a `Disconnect` message.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum KickReason {
    InvalidSignature = 1,
    InvalidObjectId = 2,
    InvalidConnectionRequest = 3,
    InvalidMessage = 4,
    PartialRequest = 5,
    HiddenZone = 6,
    PermissionDenied = 7,
    InvalidLogin = 8,
    DoubleLogin = 9,
}

impl KickReason {
    pub fn from_u8(value: u8) -> Option<KickReason> {
        match value {
            1 => Some(KickReason::InvalidSignature),
            2 => Some(KickReason::InvalidObjectId),
            3 => Some(KickReason::InvalidConnectionRequest),
            4 => Some(KickReason::InvalidMessage),
            5 => Some(KickReason::PartialRequest),
            6 => Some(KickReason::HiddenZone),
            7 => Some(KickReason::PermissionDenied),
            8 => Some(KickReason::InvalidLogin),
            9 => Some(KickReason::DoubleLogin),
            _ => None,
        }
    }

    /// Human readable form shown to the disconnected user.
    pub fn describe(self) -> &'static str {
        match self {
            KickReason::InvalidSignature => "Outdated client signature",
            KickReason::InvalidObjectId => "Created a clientside object",
            KickReason::InvalidConnectionRequest => {
                "Attempted to login before the connection was established"
            }
            KickReason::InvalidMessage => "Error while parsing a datagram",
            KickReason::PartialRequest => {
                "Started doing requests before the connection was established"
            }
            KickReason::HiddenZone => "Requested an object from the hidden zone",
            KickReason::PermissionDenied => "Attempt to edit a readonly field",
            KickReason::InvalidLogin => "Incorrect login or token",
            KickReason::DoubleLogin => "Logged in from another place",
        }
    }
}

impl From<KickReason> for u8 {
    #[inline]
    fn from(reason: KickReason) -> u8 {
        reason as u8
    }
}
