//! Realtime voice service client
//!
//! [`protocol`] defines the wire types; [`RealtimeConnection`] owns the
//! socket and turns frames into [`ConnectionEvent`]s.

mod connection;
pub mod protocol;

pub use connection::{ConnectionEvent, ConnectionState, RealtimeConnection};
