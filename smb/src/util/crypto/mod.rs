pub mod ntlm_v2;
pub mod preauth;
pub mod seal;
pub mod smb2;
pub mod sp800_108;
