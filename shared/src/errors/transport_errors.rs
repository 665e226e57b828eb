use thiserror::Error;

/// All errors that can occur on the transport between producer and viewer.
///
/// A full outbound queue is not represented here: a dropped publish is a
/// normal outcome reported as a value so the cleanup path stays linear.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection to a destination could not be established
    #[error("connect to `{destination}` failed: {source}")]
    Connect {
        destination: String,
        #[source]
        source: std::io::Error,
    },

    /// A frame could not be written or a reply could not be read
    #[error("send to `{destination}` failed: {source}")]
    Send {
        destination: String,
        #[source]
        source: std::io::Error,
    },

    /// Request/reply deadline expired before every ack arrived
    #[error("request to `{destination}` timed out after {waited_ms} ms")]
    Timeout { destination: String, waited_ms: u64 },

    /// The publisher's writer thread is gone; the connection is unusable
    #[error("publisher channel for `{destination}` is closed")]
    ChannelClosed { destination: String },

    /// The receiver reported a failure for an item it was handed
    #[error("receiver rejected item `{item_id}`: {reason}")]
    NegativeAck { item_id: String, reason: String },
}
