//! Secure multi-party Lagrange interpolation.
//!
//! N mutually distrusting parties, each holding a private point of an
//! unknown polynomial, jointly evaluate it at a public abscissa without
//! revealing their ordinates to each other. Sharing is additive over the
//! exponent field of a prime-order multiplicative group; the transport is an
//! in-process asynchronous bus with simulated network conditions, so the
//! compute/communication split of the protocol can be measured across
//! profiles.
//!
//! The crate targets the semi-honest adversary model: parties follow the
//! protocol but may record everything they receive.

pub mod coordinator;
pub mod group;
pub mod metrics;
pub mod protocol;
pub mod transport;

pub use coordinator::{run, RunConfig, DEFAULT_DEADLINE};
pub use group::{Group, GroupElement, GroupError, Scalar};
pub use metrics::{MetricsSink, RunRecord};
pub use protocol::{Participant, ParticipantState, PrivatePoint, ProtocolError, ProtocolMessage};
pub use transport::{MultipartyTransport, NetworkProfile, TransportError};
