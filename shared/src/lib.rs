//! Shared types for the tunnel relay: the wire protocol and the error
//! hierarchy used to map registry/adapter failures onto HTTP responses.

pub mod error;
pub mod protocol;

pub use error::{Error, ForwardError, Result};
pub use protocol::{ClientFrame, ServerFrame, TunnelRequest, TunnelResponse, MAX_BODY_BYTES};
