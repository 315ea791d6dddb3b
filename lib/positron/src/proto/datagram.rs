use crate::proto::object_id::{ObjectId, DURABLE_THRESHOLD};
use byteorder::{LittleEndian, ReadBytesExt};

/// Error raised while compiling a datagram. These indicate misuse by the
/// sending side and never cross the wire.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum PackError {
    UnknownField(String),
    ArgumentCount { expected: usize, got: usize },
    TypeMismatch { expected: &'static str },
    StringTooLong(usize),
    BlobTooLong(usize),
    UnencodableObjectId(ObjectId),
}

/// Error raised while decompiling a datagram. The server converts these to
/// an `InvalidMessage` ejection; the client logs and drops the datagram.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum DecodeError {
    Truncated,
    BadUtf8,
    UnknownMessage(u16),
    UnexpectedMessage(u16),
    UnknownClass(u16),
    UnknownField { class: u16, field: u16 },
    ClassMismatch { expected: u16, got: u16 },
}

/// Outgoing message under construction. All integers are written
/// little-endian; strings and blobs carry a `u16` byte-count prefix.
pub struct Datagram {
    data: Vec<u8>,
}

impl Datagram {
    #[inline]
    pub fn new() -> Datagram {
        Datagram { data: Vec::new() }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    #[inline]
    pub fn add_u8(&mut self, value: u8) {
        self.data.push(value);
    }

    #[inline]
    pub fn add_u16(&mut self, value: u16) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    #[inline]
    pub fn add_u32(&mut self, value: u32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    #[inline]
    pub fn add_i32(&mut self, value: i32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn add_string(&mut self, value: &str) -> Result<(), PackError> {
        if value.len() > u16::max_value() as usize {
            return Err(PackError::StringTooLong(value.len()));
        }

        self.add_u16(value.len() as u16);
        self.data.extend_from_slice(value.as_bytes());
        Ok(())
    }

    pub fn add_blob(&mut self, value: &[u8]) -> Result<(), PackError> {
        if value.len() > u16::max_value() as usize {
            return Err(PackError::BlobTooLong(value.len()));
        }

        self.add_u16(value.len() as u16);
        self.data.extend_from_slice(value);
        Ok(())
    }

    /// Writes an object id using the threshold rule: durable ids start with
    /// a word at or above the threshold and carry two more words.
    pub fn add_object_id(&mut self, oid: ObjectId) -> Result<(), PackError> {
        if !oid.is_encodable() {
            return Err(PackError::UnencodableObjectId(oid));
        }

        match oid {
            ObjectId::Transient(word) => self.add_u32(word),
            ObjectId::Durable(a, b, c) => {
                self.add_u32(a);
                self.add_u32(b);
                self.add_u32(c);
            }
        }

        Ok(())
    }
}

/// Strict cursor over a received datagram. Every read checks the remaining
/// length; running off the end is a decode error, never a panic.
pub struct DatagramReader<'a> {
    data: &'a [u8],
}

impl<'a> DatagramReader<'a> {
    #[inline]
    pub fn new(data: &'a [u8]) -> DatagramReader<'a> {
        DatagramReader { data }
    }

    /// Bytes left to consume.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        self.data.read_u8().map_err(|_| DecodeError::Truncated)
    }

    #[inline]
    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        self.data
            .read_u16::<LittleEndian>()
            .map_err(|_| DecodeError::Truncated)
    }

    #[inline]
    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        self.data
            .read_u32::<LittleEndian>()
            .map_err(|_| DecodeError::Truncated)
    }

    #[inline]
    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        self.data
            .read_i32::<LittleEndian>()
            .map_err(|_| DecodeError::Truncated)
    }

    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let raw = self.read_counted()?;
        String::from_utf8(raw.to_vec()).map_err(|_| DecodeError::BadUtf8)
    }

    pub fn read_blob(&mut self) -> Result<Vec<u8>, DecodeError> {
        self.read_counted().map(<[u8]>::to_vec)
    }

    pub fn read_object_id(&mut self) -> Result<ObjectId, DecodeError> {
        let head = self.read_u32()?;
        if head < DURABLE_THRESHOLD {
            return Ok(ObjectId::Transient(head));
        }

        Ok(ObjectId::Durable(head, self.read_u32()?, self.read_u32()?))
    }

    fn read_counted(&mut self) -> Result<&'a [u8], DecodeError> {
        let count = self.read_u16()? as usize;
        if self.data.len() < count {
            return Err(DecodeError::Truncated);
        }

        let (raw, rest) = self.data.split_at(count);
        self.data = rest;
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_roundtrip() {
        let mut dg = Datagram::new();
        dg.add_u8(7);
        dg.add_u16(30000);
        dg.add_u32(4_000_000_000);
        dg.add_i32(-123456);

        let mut reader = DatagramReader::new(dg.as_slice());

        assert_eq!(reader.read_u8().unwrap(), 7);
        assert_eq!(reader.read_u16().unwrap(), 30000);
        assert_eq!(reader.read_u32().unwrap(), 4_000_000_000);
        assert_eq!(reader.read_i32().unwrap(), -123456);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_little_endian_layout() {
        let mut dg = Datagram::new();
        dg.add_u16(0x0a55);

        assert_eq!(dg.as_slice(), &[0x55, 0x0a]);
    }

    #[test]
    fn test_string_roundtrip() {
        let mut dg = Datagram::new();
        dg.add_string("hello").unwrap();
        dg.add_string("").unwrap();

        let mut reader = DatagramReader::new(dg.as_slice());

        assert_eq!(reader.read_string().unwrap(), "hello");
        assert_eq!(reader.read_string().unwrap(), "");
    }

    #[test]
    fn test_blob_roundtrip() {
        let mut dg = Datagram::new();
        dg.add_blob(&[1, 2, 3]).unwrap();

        let mut reader = DatagramReader::new(dg.as_slice());

        assert_eq!(reader.read_blob().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_object_id_roundtrip() {
        let mut dg = Datagram::new();
        dg.add_object_id(ObjectId::Transient(12345)).unwrap();
        dg.add_object_id(ObjectId::Durable(1_000_000_007, 5, 9)).unwrap();

        let mut reader = DatagramReader::new(dg.as_slice());

        assert_eq!(reader.read_object_id().unwrap(), ObjectId::Transient(12345));
        assert_eq!(
            reader.read_object_id().unwrap(),
            ObjectId::Durable(1_000_000_007, 5, 9)
        );
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_object_id_threshold_boundary() {
        let mut dg = Datagram::new();
        dg.add_object_id(ObjectId::Transient(DURABLE_THRESHOLD - 1)).unwrap();

        assert_eq!(dg.len(), 4);

        let err = Datagram::new()
            .add_object_id(ObjectId::Transient(DURABLE_THRESHOLD))
            .unwrap_err();

        assert_eq!(
            err,
            PackError::UnencodableObjectId(ObjectId::Transient(DURABLE_THRESHOLD))
        );
    }

    #[test]
    fn test_truncated_reads() {
        let mut reader = DatagramReader::new(&[1]);
        assert_eq!(reader.read_u16().unwrap_err(), DecodeError::Truncated);

        let mut reader = DatagramReader::new(&[5, 0, b'a', b'b']);
        assert_eq!(reader.read_string().unwrap_err(), DecodeError::Truncated);

        let mut reader = DatagramReader::new(&[0, 202, 154, 59]);
        // Durable head word with no tail words following.
        assert_eq!(reader.read_object_id().unwrap_err(), DecodeError::Truncated);
    }

    #[test]
    fn test_bad_utf8() {
        let mut reader = DatagramReader::new(&[2, 0, 0xff, 0xfe]);
        assert_eq!(reader.read_string().unwrap_err(), DecodeError::BadUtf8);
    }
}
