//! Crypto envelope (C3) plus the handshake capability boundary it sits on
//! top of (C9). See spec §4.3 and §9.

pub mod cipher;
pub mod handshake;
pub mod hash;
pub mod mac;
pub mod signature;

pub use handshake::SymmetricKeys;
