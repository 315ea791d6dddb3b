use std::fmt;

/// First word values at or above this threshold mark a durable identifier;
/// two more words follow on the wire.
pub const DURABLE_THRESHOLD: u32 = 1_000_000_000;

/// Identifier of a network object. Transient ids are single words chosen by
/// the auth backend at login; durable ids are three words and are backed by
/// the database.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ObjectId {
    Transient(u32),
    Durable(u32, u32, u32),
}

impl ObjectId {
    /// Returns true for database-backed identifiers.
    #[inline]
    pub fn is_durable(self) -> bool {
        match self {
            ObjectId::Transient(_) => false,
            ObjectId::Durable(..) => true,
        }
    }

    /// Checks that the first word is on the correct side of the durable
    /// threshold, so the value survives a wire round-trip unambiguously.
    #[inline]
    pub fn is_encodable(self) -> bool {
        match self {
            ObjectId::Transient(word) => word < DURABLE_THRESHOLD,
            ObjectId::Durable(head, _, _) => head >= DURABLE_THRESHOLD,
        }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ObjectId::Transient(word) => write!(f, "{}", word),
            ObjectId::Durable(a, b, c) => write!(f, "{}:{}:{}", a, b, c),
        }
    }
}

impl From<u32> for ObjectId {
    #[inline]
    fn from(word: u32) -> ObjectId {
        ObjectId::Transient(word)
    }
}
