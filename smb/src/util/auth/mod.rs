use smb_core::SMBResult;

pub use user::*;

pub mod ntlm;
mod user;

/// Source of security blobs for session setup.
///
/// The session layer drives the exchange: it calls
/// [`initiate_security_context`](AuthProvider::initiate_security_context) with an empty
/// input first, then with every token the server returns, until the context reports
/// completion. Each session setup or channel bind uses a fresh context.
pub trait AuthProvider: Send + Sync + 'static {
    type Context: AuthContext + Send + 'static;

    fn init_context(&self) -> Self::Context;

    fn initiate_security_context(&self, input_token: &[u8], context: &mut Self::Context) -> SMBResult<Vec<u8>>;
}

pub trait AuthContext {
    fn is_complete(&self) -> bool;

    /// Key material for signing and sealing; `None` for anonymous or guest logons.
    fn session_key(&self) -> Option<&[u8]>;
}
