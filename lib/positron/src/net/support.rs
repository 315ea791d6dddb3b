use std::io;

/// Terminal failure conditions on a connection.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorType {
    Io(io::ErrorKind),
    /// The peer closed the stream.
    Closed,
    /// A channel buffer filled up; the peer is not draining its socket.
    BufferOverrun,
    /// A datagram larger than the length prefix can express.
    OversizeDatagram,
}

/// Transport-level result plumbing. `Wait` means the operation would block
/// and should be retried on a later tick; `Fatal` tears the connection down.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum NetworkError {
    Wait,
    Fatal(ErrorType),
}

pub type NetworkResult<T> = Result<T, NetworkError>;

impl From<io::Error> for NetworkError {
    fn from(err: io::Error) -> NetworkError {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => NetworkError::Wait,
            kind => NetworkError::Fatal(ErrorType::Io(kind)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_folding() {
        let wait: NetworkError = io::Error::from(io::ErrorKind::WouldBlock).into();
        assert_eq!(wait, NetworkError::Wait);

        let fatal: NetworkError = io::Error::from(io::ErrorKind::ConnectionReset).into();
        assert_eq!(fatal, NetworkError::Fatal(ErrorType::Io(io::ErrorKind::ConnectionReset)));
    }
}
