/// Security providers driving the session-setup blob exchange.
pub mod auth;
/// Key derivation, signing, sealing and NTLMv2 primitives.
pub mod crypto;
pub(crate) mod flags_helper;
