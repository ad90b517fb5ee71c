//! The administrative channel abstraction and its two error layers.
//!
//! One call into the security authority produces two independent results:
//! the channel-level status of the transport call itself, and the
//! provider's sub-status for the requested operation. A successful channel
//! call can still carry a failed sub-status, so the two are surfaced as
//! distinct error types and must be checked independently.
//!
//! [`AuthorityChannel`] is the seam between the cache operations and the
//! real LSA session; tests substitute fake channels behind it.

use thiserror::Error;

/// NTSTATUS: the caller lacks a required privilege.
pub const STATUS_PRIVILEGE_NOT_HELD: i32 = 0xC000_0061_u32 as i32;
/// NTSTATUS: a request parameter was rejected.
pub const STATUS_INVALID_PARAMETER: i32 = 0xC000_000D_u32 as i32;
/// NTSTATUS: the named provider is not registered.
pub const STATUS_NO_SUCH_PACKAGE: i32 = 0xC000_00FE_u32 as i32;
/// NTSTATUS: the operation is not available (used by non-Windows stubs).
pub const STATUS_NOT_IMPLEMENTED: i32 = 0xC000_0002_u32 as i32;

/// NTSTATUS sign convention: non-negative is success.
pub fn nt_success(status: i32) -> bool {
    status >= 0
}

/// Transport-level failure: the call into the authority itself failed.
///
/// Carries the failing call's name and its raw NTSTATUS. Always fatal to
/// the current operation, never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{call} failed with status {status:#010x}")]
pub struct ChannelError {
    /// Name of the authority call that failed.
    pub call: &'static str,
    /// Raw NTSTATUS returned by the call.
    pub status: i32,
}

/// The authority was reached but the provider refused or failed the
/// operation (negative sub-status).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// The session lacks the trust level the operation requires. Expected
    /// for purge over an untrusted session; rerun with SYSTEM rights.
    #[error("the TCB privilege is required to perform this operation (run as SYSTEM)")]
    PrivilegeNotHeld,

    /// Any other provider failure, with the raw sub-status for diagnostics.
    #[error("the security provider rejected the operation with status {0:#010x}")]
    Rejected(i32),
}

impl ProviderError {
    /// Classify a provider sub-status. `None` for success.
    pub fn from_sub_status(sub_status: i32) -> Option<Self> {
        if nt_success(sub_status) {
            None
        } else if sub_status == STATUS_PRIVILEGE_NOT_HELD {
            Some(Self::PrivilegeNotHeld)
        } else {
            Some(Self::Rejected(sub_status))
        }
    }
}

/// A borrowed view over an authority-allocated return buffer.
///
/// Implementors release the underlying buffer in `Drop` through the
/// authority's own release call, never through the generic allocator. The
/// buffer therefore cannot outlive the value, and release happens on every
/// exit path, including decode failures.
pub trait ReturnBuffer {
    /// The buffer contents.
    fn bytes(&self) -> &[u8];
}

/// Outcome of one successful channel call.
pub struct CallReply {
    /// The authority-allocated response body, if the message produces one.
    /// Dropping the reply releases it.
    pub buffer: Option<Box<dyn ReturnBuffer>>,
    /// The provider's sub-status for the requested operation.
    pub sub_status: i32,
}

/// One blocking request/reply exchange with the security authority.
///
/// Calls are synchronous and carry no timeout; a call either returns or
/// blocks until the authority responds. A channel is not meant to be
/// shared across threads.
pub trait AuthorityChannel {
    /// Submit an encoded request and collect the dual-status reply.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] when the transport call itself fails; a
    /// provider-level refusal is reported through
    /// [`CallReply::sub_status`], not through this error.
    fn call(&mut self, request: &[u8]) -> Result<CallReply, ChannelError>;
}

/// Whether the session registered with the authority as a trusted logon
/// process or fell back to an untrusted connection.
///
/// Untrusted sessions can run read-only queries; purge requires trust and
/// is expected to fail with [`ProviderError::PrivilegeNotHeld`] otherwise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TrustMode {
    /// TCB privilege held; registered as a trusted logon process.
    Trusted,
    /// TCB privilege unavailable; connected untrusted.
    #[default]
    Untrusted,
}

impl TrustMode {
    /// Select the connection path from the privilege-adjust status.
    /// Failure to enable the privilege is not fatal; it selects the
    /// untrusted fallback.
    pub fn from_adjust_status(status: i32) -> Self {
        if nt_success(status) {
            Self::Trusted
        } else {
            Self::Untrusted
        }
    }

    /// Whether the trusted registration path was taken.
    pub fn is_trusted(self) -> bool {
        matches!(self, Self::Trusted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nt_success_sign_convention() {
        assert!(nt_success(0));
        assert!(nt_success(0x40000000));
        assert!(!nt_success(STATUS_PRIVILEGE_NOT_HELD));
        assert!(!nt_success(STATUS_INVALID_PARAMETER));
    }

    #[test]
    fn sub_status_classification() {
        assert_eq!(ProviderError::from_sub_status(0), None);
        assert_eq!(
            ProviderError::from_sub_status(STATUS_PRIVILEGE_NOT_HELD),
            Some(ProviderError::PrivilegeNotHeld)
        );
        assert_eq!(
            ProviderError::from_sub_status(STATUS_INVALID_PARAMETER),
            Some(ProviderError::Rejected(STATUS_INVALID_PARAMETER))
        );
    }

    #[test]
    fn channel_error_names_failing_call() {
        let err = ChannelError {
            call: "LsaLookupAuthenticationPackage",
            status: STATUS_NO_SUCH_PACKAGE,
        };
        let message = err.to_string();
        assert!(message.contains("LsaLookupAuthenticationPackage"));
        assert!(message.contains("0xc00000fe"));
    }

    #[test]
    fn privilege_error_carries_remediation_hint() {
        assert!(ProviderError::PrivilegeNotHeld
            .to_string()
            .contains("TCB privilege"));
    }

    #[test]
    fn trust_mode_follows_adjust_status() {
        assert_eq!(TrustMode::from_adjust_status(0), TrustMode::Trusted);
        assert!(TrustMode::from_adjust_status(0).is_trusted());
        assert_eq!(
            TrustMode::from_adjust_status(STATUS_PRIVILEGE_NOT_HELD),
            TrustMode::Untrusted
        );
    }
}
