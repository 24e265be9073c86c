use thiserror::Error;

/// Error taxonomy for the console session.
///
/// Transport-level failures (`TransportUnavailable`, socket closure) are
/// handled inside the controller by the reconnect path; only control-plane
/// failures and `NotConnected` rejections are meant for user display.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The console socket could not be opened (bad endpoint, refused network).
    #[error("console transport unavailable: {0}")]
    TransportUnavailable(String),

    /// A send was attempted on a socket that is not open.
    #[error("socket is not open")]
    NotOpen,

    /// A command was submitted while the session is not connected.
    /// The command is dropped, not queued.
    #[error("console is not connected")]
    NotConnected,

    /// A lifecycle request was rejected or failed on the network.
    /// The desired lifecycle state is left unchanged.
    #[error("control plane request failed: {0}")]
    ControlPlaneFailure(String),
}
