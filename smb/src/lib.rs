//! # SMB Client
//!
//! A client-side engine for the **Server Message Block (SMB) Protocol Versions 2 and 3**
//! as specified in [\[MS-SMB2\]](https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-smb2/5606ad47-5ee0-437a-817e-70c366052962).
//!
//! This crate provides:
//! - **Protocol layer** ([`protocol`]): Wire-format types for SMB2/3 headers, bodies
//!   (Negotiate, Session Setup, Tree Connect, Create, Read, Write, etc.), and the
//!   transform header used for sealed messages.
//! - **Client layer** ([`client`]): Connections with credit accounting, dialect
//!   negotiation, authenticated sessions over one or more channels, share and file
//!   handles with durable and leased opens, a pipelined read/write engine, and
//!   transparent reconnect with replay.
//! - **Socket layer** ([`socket`]): Transport connectors and direct-TCP framing.
//! - **Utilities** ([`util`]): Authentication (raw NTLMSSP), cryptographic
//!   primitives (SP800-108 KDF, HMAC-SHA256, AES-CMAC, AES-GMAC, AES-GCM), and
//!   byte-manipulation macros.
//!
//! ## Quick Start
//!
//! ```no_run
//! use smb_client::client::{OpenOptions, SMBClient, SMBClientConfig};
//! use smb_client::socket::TcpConnector;
//! use smb_client::util::auth::ntlm::NTLMAuthProvider;
//! use smb_client::util::auth::User;
//!
//! #[tokio::main]
//! async fn main() -> smb_core::SMBResult<()> {
//!     let client = SMBClient::connect(
//!         TcpConnector::direct("fileserver"),
//!         NTLMAuthProvider::new(User::new("user", "pass"), "workstation"),
//!         SMBClientConfig::default(),
//!     ).await?;
//!     let share = client.tree_connect("data").await?;
//!     let file = client.open(&share, OpenOptions { path: "hello.txt".into(), ..Default::default() }).await?;
//!     client.write(file, 0, b"hello".to_vec()).await?;
//!     client.close(file).await?;
//!     client.disconnect().await
//! }
//! ```

/// SMB2/3 wire-format protocol types: headers, bodies, and message framing.
pub mod protocol;
/// SMB client implementation: connection, session, tree, open and I/O management.
pub mod client;
/// Utility modules: authentication, cryptography, byte helpers, and flag macros.
pub mod util;
/// Transport abstractions for SMB message framing over TCP or other streams.
pub mod socket;
mod byte_helper;
