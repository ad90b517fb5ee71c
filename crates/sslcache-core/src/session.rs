//! Privileged LSA session management (Windows only).
//!
//! [`LsaSession`] owns the handle to the security authority. `connect`
//! tries the trusted registration path first (after enabling the TCB
//! privilege) and falls back to an untrusted connection, then resolves the
//! Schannel provider name to its numeric package id. The session is either
//! fully connected (handle valid, package id resolved) or fully
//! disconnected; no partial state is observable.
//!
//! One session serves one caller at a time. The type is neither `Send` nor
//! `Sync`; concurrent use of the underlying handle is unsupported.

use std::ffi::c_void;
use std::marker::PhantomData;
use std::ptr;
use std::slice;

use tracing::debug;
use windows_sys::Win32::Foundation::HANDLE;
use windows_sys::Win32::Security::Authentication::Identity::{
    LsaCallAuthenticationPackage, LsaConnectUntrusted, LsaDeregisterLogonProcess,
    LsaFreeReturnBuffer, LsaLookupAuthenticationPackage, LsaRegisterLogonProcess, LSA_STRING,
};

use crate::channel::{nt_success, AuthorityChannel, CallReply, ChannelError, ReturnBuffer, TrustMode};

/// The one security provider this client talks to. Protocol constant, not
/// user-configurable.
const PROVIDER_NAME: &[u8] = b"Microsoft Unified Security Protocol Provider\0";

/// Logon-process name presented on trusted registration.
const LOGON_PROCESS_NAME: &[u8] = b"sslcache-ctl\0";

/// SeTcbPrivilege, the trust level required for purge.
const SE_TCB_PRIVILEGE: u32 = 7;

// Not exported by windows-sys; ntdll-internal but stable since NT4.
#[link(name = "ntdll")]
extern "system" {
    fn RtlAdjustPrivilege(
        privilege: u32,
        enable: u8,
        current_thread: u8,
        previous: *mut u8,
    ) -> i32;
}

fn lsa_string(name: &'static [u8]) -> LSA_STRING {
    // `name` carries a trailing NUL; Length excludes it per LSA_STRING.
    LSA_STRING {
        Length: (name.len() - 1) as u16,
        MaximumLength: name.len() as u16,
        Buffer: name.as_ptr() as *mut u8,
    }
}

/// An open administrative channel to the security authority.
///
/// Created disconnected; connects lazily on the first call. `close` is the
/// primary release path, `Drop` the safety net.
pub struct LsaSession {
    handle: HANDLE,
    package: u32,
    trust: TrustMode,
    // Single-caller use only; the raw handle must not be shared.
    _not_sync: PhantomData<*const ()>,
}

impl LsaSession {
    /// A disconnected session.
    pub fn new() -> Self {
        Self {
            handle: 0,
            package: 0,
            trust: TrustMode::Untrusted,
            _not_sync: PhantomData,
        }
    }

    /// Whether the channel handle is currently valid.
    pub fn is_connected(&self) -> bool {
        self.handle != 0
    }

    /// Which connection path the last `connect` took. Meaningful only
    /// while connected.
    pub fn trust_mode(&self) -> TrustMode {
        self.trust
    }

    /// Establish the channel. No-op when already connected.
    ///
    /// Enables the TCB privilege to pick the registration path (failure
    /// only selects the untrusted fallback), obtains a handle, then
    /// resolves the provider's package id on it.
    ///
    /// # Errors
    ///
    /// Any failure of register/connect/lookup surfaces as a
    /// [`ChannelError`] naming the call; the session stays disconnected.
    pub fn connect(&mut self) -> Result<(), ChannelError> {
        if self.is_connected() {
            return Ok(());
        }

        let mut previous = 0u8;
        let adjust =
            unsafe { RtlAdjustPrivilege(SE_TCB_PRIVILEGE, 1, 0, &mut previous) };
        self.trust = TrustMode::from_adjust_status(adjust);

        let mut handle: HANDLE = 0;
        if self.trust.is_trusted() {
            let name = lsa_string(LOGON_PROCESS_NAME);
            let mut security_mode = 0u32;
            let status =
                unsafe { LsaRegisterLogonProcess(&name, &mut handle, &mut security_mode) };
            if !nt_success(status) {
                return Err(ChannelError {
                    call: "LsaRegisterLogonProcess",
                    status,
                });
            }
        } else {
            debug!("TCB privilege unavailable, connecting untrusted");
            let status = unsafe { LsaConnectUntrusted(&mut handle) };
            if !nt_success(status) {
                return Err(ChannelError {
                    call: "LsaConnectUntrusted",
                    status,
                });
            }
        }

        let package_name = lsa_string(PROVIDER_NAME);
        let mut package = 0u32;
        let status =
            unsafe { LsaLookupAuthenticationPackage(handle, &package_name, &mut package) };
        if !nt_success(status) {
            // Keep the all-or-nothing invariant: drop the handle rather
            // than exposing a half-connected session.
            unsafe { LsaDeregisterLogonProcess(handle) };
            return Err(ChannelError {
                call: "LsaLookupAuthenticationPackage",
                status,
            });
        }

        self.handle = handle;
        self.package = package;
        debug!(
            package,
            trusted = self.trust.is_trusted(),
            "connected to the security authority"
        );
        Ok(())
    }

    /// Release the channel handle. Idempotent; safe on a session that
    /// never connected.
    pub fn close(&mut self) {
        if self.handle != 0 {
            unsafe { LsaDeregisterLogonProcess(self.handle) };
            self.handle = 0;
            self.package = 0;
        }
    }
}

impl Default for LsaSession {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LsaSession {
    // Last-resort guard against a leaked handle; explicit `close` is the
    // primary contract.
    fn drop(&mut self) {
        self.close();
    }
}

impl AuthorityChannel for LsaSession {
    fn call(&mut self, request: &[u8]) -> Result<CallReply, ChannelError> {
        self.connect()?;

        let mut return_buffer: *mut c_void = ptr::null_mut();
        let mut return_length = 0u32;
        let mut sub_status = 0i32;

        let status = unsafe {
            LsaCallAuthenticationPackage(
                self.handle,
                self.package,
                request.as_ptr() as *const c_void,
                request.len() as u32,
                &mut return_buffer,
                &mut return_length,
                &mut sub_status,
            )
        };

        // Wrap before the status check so a failed call that still handed
        // us a buffer releases it.
        let buffer = (!return_buffer.is_null()).then(|| {
            Box::new(LsaReturnBuffer {
                ptr: return_buffer,
                len: return_length as usize,
            }) as Box<dyn ReturnBuffer>
        });

        if !nt_success(status) {
            return Err(ChannelError {
                call: "LsaCallAuthenticationPackage",
                status,
            });
        }

        Ok(CallReply { buffer, sub_status })
    }
}

/// RAII wrapper over a buffer allocated by the authority. Released through
/// `LsaFreeReturnBuffer`, never the generic allocator.
struct LsaReturnBuffer {
    ptr: *mut c_void,
    len: usize,
}

impl ReturnBuffer for LsaReturnBuffer {
    fn bytes(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.ptr as *const u8, self.len) }
    }
}

impl Drop for LsaReturnBuffer {
    fn drop(&mut self) {
        unsafe { LsaFreeReturnBuffer(self.ptr) };
    }
}
