//! Client for the Schannel TLS session-cache control channel.
//!
//! The Windows security authority (LSA) hosts the Schannel provider,
//! which keeps the OS-wide TLS session cache. This crate implements the
//! client side of the narrow administrative channel used to read the
//! cache's aggregate counters and to purge cached sessions.
//!
//! # Modules
//!
//! - [`protocol`]: fixed-layout binary codec for the provider messages
//! - [`types`]: decoded counter records, purge scope, flag composer
//! - [`channel`]: the [`AuthorityChannel`] seam and the two error layers
//! - [`cache`]: the query/purge operations over a channel
//! - [`session`] (Windows): the privileged LSA session owning the handle
//!
//! # Example
//!
//! ```
//! use sslcache_core::protocol::SSL_PURGE_SERVER_ENTRIES_DISCARD_LOCATORS;
//! use sslcache_core::types::PurgeScope;
//!
//! let scope = PurgeScope {
//!     server: true,
//!     mapped: true,
//!     server_name: Some("host1".to_string()),
//!     ..PurgeScope::default()
//! };
//!
//! // Mapped entries always select the locator-discarding purge bit.
//! assert_ne!(scope.flags() & SSL_PURGE_SERVER_ENTRIES_DISCARD_LOCATORS, 0);
//! ```

pub mod cache;
pub mod channel;
pub mod protocol;
#[cfg(windows)]
pub mod session;
pub mod types;

pub use cache::{CacheControl, CacheError};
pub use channel::{
    nt_success, AuthorityChannel, CallReply, ChannelError, ProviderError, ReturnBuffer, TrustMode,
};
pub use protocol::WireError;
#[cfg(windows)]
pub use session::LsaSession;
pub use types::{purge_flags, CacheInfo, PerfInfo, PurgeScope};
