//! Shared wire types for tandem: the signaling message set, close codes,
//! the cross-instance envelope, room identifier helpers and the inbound
//! rate limiter shared by the server and the relay hub.

pub mod net;
pub mod rate_limit;
pub mod room;
