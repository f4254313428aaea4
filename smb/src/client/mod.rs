//! The client engine: connections and their credits, negotiate, sessions and
//! channel binding, trees, opens with their create contexts, the read/write
//! pipeline and the reconnect path that ties them back together.
//!
//! [`SMBClient`] is the entry point; the submodules are the layers it is built
//! from and can be driven on their own.

mod client;
pub mod config;
pub mod connection;
pub mod create;
pub mod credit;
pub mod event;
pub mod lease;
pub mod negotiate;
pub mod open;
pub mod pipeline;
pub mod quantum;
pub mod reconnect;
pub mod session;
pub mod tree;

#[cfg(test)]
mod test_support;

pub type SMBClient<C, A> = client::SMBClient<C, A>;
pub type Subscription = client::Subscription;
pub type SMBClientConfig = config::SMBClientConfig;
pub type SMBClientConfigBuilder = config::SMBClientConfigBuilder;
pub type OpenOptions = create::OpenOptions;
pub type OpenOptionsBuilder = create::OpenOptionsBuilder;
pub type FileHandle = open::FileHandle;
pub type ConnectionEvent = event::ConnectionEvent;
pub type NegotiatedParameters = negotiate::NegotiatedParameters;
pub type Tree = tree::Tree;
pub type ShareInfo = tree::ShareInfo;
