//! Cache-control operations over an established channel.
//!
//! [`CacheControl`] owns a channel and issues the three provider messages:
//! cache-info query, purge, and the perfmon query. It translates the dual
//! status layers into typed errors and keeps the two buffer-ownership
//! regimes apart: the authority's response buffer is released through the
//! authority (RAII on [`CallReply`]), the request buffer through the
//! allocator that created it.
//!
//! Nothing here retries or recovers; every error propagates unchanged to
//! the caller.

use thiserror::Error;
use tracing::debug;

use crate::channel::{AuthorityChannel, CallReply, ChannelError, ProviderError};
use crate::protocol::{self, WireError, CACHE_INFO_RESPONSE_SIZE, PERFMON_RESPONSE_SIZE};
use crate::types::{CacheInfo, PerfInfo, PurgeScope};

/// Failure of a cache-control operation.
///
/// The channel and provider layers stay distinguishable so callers can
/// tell "could not reach the authority" from "authority rejected the
/// operation".
#[derive(Debug, Error)]
pub enum CacheError {
    /// The transport call into the authority failed.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// The authority was reached but refused or failed the operation.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Request encoding or response decoding failed.
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Cache-control operations bound to one channel.
///
/// Operations are sequential blocking calls; the channel is used from one
/// caller at a time.
pub struct CacheControl<C> {
    channel: C,
}

impl<C: AuthorityChannel> CacheControl<C> {
    /// Wrap a channel. Connection happens lazily on the first operation.
    pub fn new(channel: C) -> Self {
        Self { channel }
    }

    /// Access the underlying channel.
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Query aggregate cache counters for the requested entry kinds.
    ///
    /// The authority's response buffer is copied into an owned
    /// [`CacheInfo`] and released exactly once, on every path, including
    /// decode failure.
    ///
    /// # Errors
    ///
    /// [`CacheError::Channel`] when the transport call fails,
    /// [`CacheError::Provider`] when the sub-status is negative,
    /// [`CacheError::Wire`] when the response is shorter than the record.
    pub fn query_cache_info(
        &mut self,
        include_client: bool,
        include_server: bool,
    ) -> Result<CacheInfo, CacheError> {
        let request = protocol::encode_cache_info_request(include_client, include_server);
        let reply = self.channel.call(&request)?;
        check_sub_status(&reply)?;

        // `reply` owns the authority buffer; it is released when `reply`
        // drops, whether or not decoding below succeeds.
        let info = match &reply.buffer {
            Some(buffer) => protocol::decode_cache_info(buffer.bytes())?,
            None => {
                return Err(WireError::Truncated {
                    expected: CACHE_INFO_RESPONSE_SIZE,
                    actual: 0,
                }
                .into())
            }
        };

        debug!(
            entries = info.entries,
            active = info.active_entries,
            "queried session-cache counters"
        );
        Ok(info)
    }

    /// Purge cached sessions covered by `scope`.
    ///
    /// The purge message produces no response body; only the dual status
    /// codes come back. Over an untrusted session the provider is expected
    /// to answer privilege-not-held; that is a reportable outcome, not a
    /// client-side precondition.
    ///
    /// # Errors
    ///
    /// [`CacheError::Wire`] when the request cannot be built (oversized
    /// name, allocation failure) — no channel call is attempted then.
    /// [`CacheError::Channel`] for transport failure.
    /// [`CacheError::Provider`], classified
    /// [`ProviderError::PrivilegeNotHeld`] when the sub-status is the
    /// privilege-denied code.
    pub fn purge(&mut self, scope: &PurgeScope) -> Result<(), CacheError> {
        let flags = scope.flags();
        let request = protocol::encode_purge_request(flags, scope.server_name.as_deref())?;

        debug!(
            flags = %format_args!("{flags:#x}"),
            server_name = scope.server_name.as_deref().unwrap_or(""),
            "purging session cache"
        );

        let reply = self.channel.call(&request)?;
        check_sub_status(&reply)?;
        Ok(())
        // `request` is caller-owned and freed by the allocator here, on
        // success and on every early return above.
    }

    /// Query the provider's performance counters.
    pub fn query_perf_info(&mut self) -> Result<PerfInfo, CacheError> {
        let request = protocol::encode_perfmon_request();
        let reply = self.channel.call(&request)?;
        check_sub_status(&reply)?;

        match &reply.buffer {
            Some(buffer) => Ok(protocol::decode_perf_info(buffer.bytes())?),
            None => Err(WireError::Truncated {
                expected: PERFMON_RESPONSE_SIZE,
                actual: 0,
            }
            .into()),
        }
    }
}

fn check_sub_status(reply: &CallReply) -> Result<(), ProviderError> {
    match ProviderError::from_sub_status(reply.sub_status) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
