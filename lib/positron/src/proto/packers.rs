use crate::proto::datagram::{Datagram, DatagramReader, DecodeError, PackError};
use crate::proto::object_id::ObjectId;
use std::fmt;

/// A single decoded field argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int32(i32),
    Str(String),
    ObjectId(ObjectId),
}

impl Value {
    #[inline]
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Int32(value) => Some(*value),
            _ => None,
        }
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(value) => Some(value),
            _ => None,
        }
    }

    #[inline]
    pub fn as_object_id(&self) -> Option<ObjectId> {
        match self {
            Value::ObjectId(oid) => Some(*oid),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Int32(value) => write!(f, "{}", value),
            Value::Str(value) => write!(f, "{}", value),
            Value::ObjectId(oid) => write!(f, "{}", oid),
        }
    }
}

impl From<i32> for Value {
    #[inline]
    fn from(value: i32) -> Value {
        Value::Int32(value)
    }
}

impl From<&str> for Value {
    #[inline]
    fn from(value: &str) -> Value {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    #[inline]
    fn from(value: String) -> Value {
        Value::Str(value)
    }
}

impl From<ObjectId> for Value {
    #[inline]
    fn from(oid: ObjectId) -> Value {
        Value::ObjectId(oid)
    }
}

/// Bidirectional codec for one field argument. The signature names feed the
/// registry signature and must stay stable across releases.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Packer {
    Int32,
    Str,
    ObjectId,
}

impl Packer {
    pub fn pack(self, dg: &mut Datagram, value: &Value) -> Result<(), PackError> {
        match (self, value) {
            (Packer::Int32, Value::Int32(value)) => {
                dg.add_i32(*value);
                Ok(())
            }
            (Packer::Str, Value::Str(value)) => dg.add_string(value),
            (Packer::ObjectId, Value::ObjectId(oid)) => dg.add_object_id(*oid),
            _ => Err(PackError::TypeMismatch {
                expected: self.signature(),
            }),
        }
    }

    pub fn unpack(self, reader: &mut DatagramReader) -> Result<Value, DecodeError> {
        match self {
            Packer::Int32 => Ok(Value::Int32(reader.read_i32()?)),
            Packer::Str => Ok(Value::Str(reader.read_string()?)),
            Packer::ObjectId => Ok(Value::ObjectId(reader.read_object_id()?)),
        }
    }

    pub fn signature(self) -> &'static str {
        match self {
            Packer::Int32 => "P-Int32",
            Packer::Str => "P-String",
            Packer::ObjectId => "P-ObjectID",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack_roundtrip() {
        let values = vec![
            (Packer::Int32, Value::Int32(-77)),
            (Packer::Str, Value::from("talker")),
            (Packer::ObjectId, Value::ObjectId(ObjectId::Transient(12345))),
            (
                Packer::ObjectId,
                Value::ObjectId(ObjectId::Durable(1_000_000_000, 2, 3)),
            ),
        ];

        for (packer, value) in values {
            let mut dg = Datagram::new();
            packer.pack(&mut dg, &value).unwrap();

            let mut reader = DatagramReader::new(dg.as_slice());
            assert_eq!(packer.unpack(&mut reader).unwrap(), value);
            assert_eq!(reader.remaining(), 0);
        }
    }

    #[test]
    fn test_type_mismatch() {
        let mut dg = Datagram::new();
        let err = Packer::Int32.pack(&mut dg, &Value::from("oops")).unwrap_err();

        assert_eq!(err, PackError::TypeMismatch { expected: "P-Int32" });
    }

    #[test]
    fn test_signatures() {
        assert_eq!(Packer::Int32.signature(), "P-Int32");
        assert_eq!(Packer::Str.signature(), "P-String");
        assert_eq!(Packer::ObjectId.signature(), "P-ObjectID");
    }
}
