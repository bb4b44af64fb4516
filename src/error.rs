use core::fmt::{self, Display, Formatter};

/// Errors the synchronization engine can terminate with.
///
/// Ordinal order is part of the contract: `No` is always `0` and the rest
/// follow the order in which the worker loop can first observe them.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
#[non_exhaustive]
pub enum Error {
    /// No error has occurred. [`crate::NtpSync::error`] returns `None` instead
    /// of this variant; it only exists to keep the ordinal numbering stable.
    No,
    /// Sending a request datagram failed.
    Send,
    /// Receiving a response datagram failed or timed out.
    Receive,
    /// The server replied with a protocol version newer than this client speaks.
    Version,
    /// Kiss-of-Death: the server replied with `stratum == 0`.
    KissOfDeath,
    /// A response arrived that cannot be reconciled with any outstanding request.
    Unexpected,
    /// The measured offset stayed outside the configured bound for too long.
    AccuracyBroken,
    /// `start()` was called with a configuration that cannot be honored.
    InvalidConfig,
}

impl Error {
    /// Stable ordinal matching the original engine's error taxonomy.
    #[must_use]
    pub fn ordinal(self) -> u8 {
        match self {
            Error::No => 0,
            Error::Send => 1,
            Error::Receive => 2,
            Error::Version => 3,
            Error::KissOfDeath => 4,
            Error::Unexpected => 5,
            Error::AccuracyBroken => 6,
            Error::InvalidConfig => 7,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::No => "no error",
            Error::Send => "failed to send request datagram",
            Error::Receive => "failed to receive response datagram",
            Error::Version => "server replied with an unsupported protocol version",
            Error::KissOfDeath => "server sent a kiss-of-death (stratum 0)",
            Error::Unexpected => "server reply could not be reconciled with any request",
            Error::AccuracyBroken => "offset stayed outside the configured bound",
            Error::InvalidConfig => "invalid engine configuration",
        };
        write!(f, "{msg}")
    }
}

impl std::error::Error for Error {}

/// Result type used throughout the engine.
pub type Result<T> = core::result::Result<T, Error>;
