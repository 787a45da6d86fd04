//! C-callable callback registry for topology events and connection requests.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::ffi::CString;
use std::os::raw::{c_char, c_void};

use crate::error::SdkError;
use crate::manager::ConnectionControl;
use crate::servers::{Scope, ServerRecord};

// ── Callback type aliases ───────────────────────────────────────────────────

/// `fn(event_json: *const c_char, user_context: *mut c_void)`
pub type EventCallback = Option<unsafe extern "C" fn(*const c_char, *mut c_void)>;

/// `fn(is_hub: i32, id: i32, address: *const c_char, user_context: *mut c_void) -> i32`
///
/// A non-zero return is reported back as a failed jump.
pub type ConnectCallback =
    Option<unsafe extern "C" fn(i32, i32, *const c_char, *mut c_void) -> i32>;

// ── Send + Sync wrapper for raw pointers ────────────────────────────────────

/// Wrapper so that raw user-context pointers can be stored in a `Mutex`.
/// The caller is responsible for thread-safety of the pointed-to data.
#[derive(Clone, Copy)]
struct SendPtr(*mut c_void);
unsafe impl Send for SendPtr {}
unsafe impl Sync for SendPtr {}

impl Default for SendPtr {
    fn default() -> Self {
        SendPtr(std::ptr::null_mut())
    }
}

// ── Registry ────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct CallbackRegistry {
    event_cb: EventCallback,
    event_ctx: SendPtr,

    connect_cb: ConnectCallback,
    connect_ctx: SendPtr,
}

pub static CALLBACKS: Lazy<Mutex<CallbackRegistry>> =
    Lazy::new(|| Mutex::new(CallbackRegistry::default()));

// ── Registration ────────────────────────────────────────────────────────────

pub fn register_event_callback(cb: EventCallback, ctx: *mut c_void) {
    let mut reg = CALLBACKS.lock();
    reg.event_cb = cb;
    reg.event_ctx = SendPtr(ctx);
}

pub fn register_connect_callback(cb: ConnectCallback, ctx: *mut c_void) {
    let mut reg = CALLBACKS.lock();
    reg.connect_cb = cb;
    reg.connect_ctx = SendPtr(ctx);
}

// ── Invocation helpers ──────────────────────────────────────────────────────

/// Forward a serialized [`TopologyEvent`](crate::events::TopologyEvent).
pub fn fire_event(event_json: &str) {
    let reg = CALLBACKS.lock();
    if let Some(cb) = reg.event_cb {
        let ctx = reg.event_ctx.0;
        // Drop lock before calling into foreign code to avoid deadlocks.
        drop(reg);
        if let Ok(c_event) = CString::new(event_json) {
            unsafe { cb(c_event.as_ptr(), ctx) };
        }
    }
}

/// Ask the host to connect. `None` when no callback is registered.
pub fn fire_connect(scope: Scope, id: usize, address: &str) -> Option<i32> {
    let reg = CALLBACKS.lock();
    let cb = reg.connect_cb?;
    let ctx = reg.connect_ctx.0;
    drop(reg);

    let c_address = CString::new(address).ok()?;
    let is_hub = if scope == Scope::Hubs { 1 } else { 0 };
    let id = i32::try_from(id).unwrap_or(i32::MAX);
    Some(unsafe { cb(is_hub, id, c_address.as_ptr(), ctx) })
}

/// [`ConnectionControl`] that hands jumps to the registered C callback.
pub struct CallbackConnection;

impl ConnectionControl for CallbackConnection {
    fn connect(&self, scope: Scope, server: &ServerRecord) -> Result<(), SdkError> {
        match fire_connect(scope, server.id, &server.address) {
            None => {
                log::warn!("No connect callback registered, jump to {} not delivered", server.name);
                Ok(())
            }
            Some(0) => Ok(()),
            Some(code) => Err(SdkError::Internal(format!(
                "Host rejected connection to {} (code {})",
                server.name, code
            ))),
        }
    }
}
