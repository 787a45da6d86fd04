//! hubjump - server/hub topology and jump selection, C FFI entry point
//!
//! The Rust API lives in [`manager::TopologyManager`]. The `extern "C"`
//! functions below wrap one global manager for C#, Python and other hosts
//! via `cdylib`. Short calls block on the global Tokio runtime
//! (`runtime().block_on()`); list refreshes and probing run on it in the
//! background and report through the event callback.

pub mod callbacks;
pub mod config;
pub mod error;
pub mod events;
pub mod jump;
pub mod manager;
pub mod probe;
mod runtime;
pub mod servers;
pub mod settings;
pub mod topology;

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_void};
use std::ptr;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;

use callbacks::{
    fire_event, register_connect_callback, register_event_callback, CallbackConnection,
    ConnectCallback, EventCallback,
};
use error::{
    clear_error, last_error_code, set_sdk_error, take_last_error, SdkError,
    ERROR_NOT_INITIALIZED, SUCCESS,
};
use runtime::runtime;

pub use config::Config;
pub use events::{EventBus, TopologyEvent};
pub use manager::{ConnectionControl, TopologyManager};
pub use servers::{Credentials, Encryption, Latency, Scope, ServerRecord};
pub use topology::{Level0Entry, Topology};

// ── Global SDK state ────────────────────────────────────────────────────────

struct SdkState {
    manager: Arc<TopologyManager>,
    /// Pumps manager events into the registered C callback.
    forwarder: JoinHandle<()>,
}

static SDK: Lazy<Mutex<Option<SdkState>>> = Lazy::new(|| Mutex::new(None));

/// The manager, cloned out so the SDK lock is not held while calling into
/// it (a jump may call back into the host, which may call us again).
fn manager() -> Option<Arc<TopologyManager>> {
    SDK.lock().as_ref().map(|s| Arc::clone(&s.manager))
}

/// Convenience: run `body` against the manager.
/// Returns `ERROR_NOT_INITIALIZED` (and sets the last-error) when the SDK has
/// not been initialised yet.
fn with_sdk<F, R>(body: F) -> R
where
    F: FnOnce(&TopologyManager) -> R,
    R: From<i32>,
{
    match manager() {
        Some(manager) => body(&manager),
        None => {
            let err = SdkError::NotInitialized;
            set_sdk_error(&err);
            R::from(ERROR_NOT_INITIALIZED)
        }
    }
}

/// Allocate a C string on the heap.  Caller frees via `hubjump_free_string`.
fn to_c_string(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cs) => cs.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Read a `*const c_char` into a `&str`, returning `None` on null or invalid UTF-8.
unsafe fn from_c_str<'a>(p: *const c_char) -> Option<&'a str> {
    if p.is_null() {
        return None;
    }
    CStr::from_ptr(p).to_str().ok()
}

/// Serialize for the host, or null with the last-error set.
fn to_c_json<T: Serialize + ?Sized>(value: &T) -> *mut c_char {
    match serde_json::to_string(value) {
        Ok(json) => to_c_string(&json),
        Err(e) => {
            set_sdk_error(&SdkError::Internal(format!(
                "JSON serialization failed: {}",
                e
            )));
            ptr::null_mut()
        }
    }
}

fn fail(err: SdkError) -> i32 {
    set_sdk_error(&err);
    err.code()
}

fn scope_from_flag(is_hub: i32) -> Scope {
    if is_hub != 0 {
        Scope::Hubs
    } else {
        Scope::Nodes
    }
}

fn id_from_c(id: i32) -> Result<usize, SdkError> {
    usize::try_from(id).map_err(|_| SdkError::InvalidParam(format!("Invalid id {}", id)))
}

/// `-1` for "no id".
fn id_to_c(id: Option<usize>) -> i32 {
    id.and_then(|id| i32::try_from(id).ok()).unwrap_or(-1)
}

/// A server record plus its latency as the `-1` sentinel used over FFI.
#[derive(Serialize)]
struct ServerJson<'a> {
    #[serde(flatten)]
    server: &'a ServerRecord,
    latency_ms: i32,
    is_hub: bool,
}

fn init_with(config: Config) -> i32 {
    clear_error();

    let mut guard = SDK.lock();
    if guard.is_some() {
        return SUCCESS; // already initialised
    }

    // Initialise logger (ignore errors if already set)
    let _ = env_logger::try_init();

    log::info!("hubjump v{} initialising", env!("CARGO_PKG_VERSION"));

    let manager = match TopologyManager::from_config(config, runtime::handle()) {
        Ok(m) => Arc::new(m),
        Err(e) => return fail(e),
    };
    manager.set_connection_control(Some(Arc::new(CallbackConnection)));

    let mut events = manager.subscribe();
    let forwarder = runtime().spawn(async move {
        while let Some(event) = events.recv().await {
            fire_event(&event.to_json());
        }
    });

    *guard = Some(SdkState { manager, forwarder });

    log::info!("hubjump initialised");
    SUCCESS
}

// ═══════════════════════════════════════════════════════════════════════════
//  Core (6)
// ═══════════════════════════════════════════════════════════════════════════

/// Initialise with the default configuration.
/// Returns 0 on success, negative on error.
#[no_mangle]
pub extern "C" fn hubjump_init() -> i32 {
    init_with(Config::default())
}

/// Initialise with a JSON configuration; omitted fields take defaults.
#[no_mangle]
pub unsafe extern "C" fn hubjump_init_with_config(config_json: *const c_char) -> i32 {
    clear_error();

    let raw = match from_c_str(config_json) {
        Some(s) => s,
        None => return fail(SdkError::InvalidParam("config_json is null or invalid".into())),
    };
    match Config::from_json(raw) {
        Ok(config) => init_with(config),
        Err(e) => fail(e),
    }
}

/// Tear down: stop probing, stop forwarding events, drop all state.
///
/// Safe to call from inside the event callback, which runs on a runtime
/// thread; the forwarder is then aborted without waiting for it.
#[no_mangle]
pub extern "C" fn hubjump_cleanup() {
    clear_error();

    let state = SDK.lock().take();
    if let Some(state) = state {
        state.manager.shutdown();
        state.forwarder.abort();
        if tokio::runtime::Handle::try_current().is_err() {
            let _ = runtime().block_on(state.forwarder);
        }
        log::info!("hubjump cleaned up");
    }
}

/// Return the library version string.  Caller must free with `hubjump_free_string`.
#[no_mangle]
pub extern "C" fn hubjump_version() -> *mut c_char {
    to_c_string(env!("CARGO_PKG_VERSION"))
}

/// Free a string previously returned by the library.
#[no_mangle]
pub unsafe extern "C" fn hubjump_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  Lists (3)
// ═══════════════════════════════════════════════════════════════════════════

/// Use the user's lists (both non-null) or the public lists (both null).
/// Call `hubjump_refresh_lists` afterwards.
#[no_mangle]
pub unsafe extern "C" fn hubjump_set_credentials(
    username: *const c_char,
    password: *const c_char,
) -> i32 {
    clear_error();

    let credentials = match (username.is_null(), password.is_null()) {
        (true, true) => None,
        _ => match (from_c_str(username), from_c_str(password)) {
            (Some(u), Some(p)) => Some(Credentials {
                username: u.to_string(),
                password: p.to_string(),
            }),
            _ => {
                return fail(SdkError::InvalidParam(
                    "username and password must both be valid or both null".into(),
                ))
            }
        },
    };

    with_sdk(|manager| {
        manager.set_credentials(credentials);
        SUCCESS
    })
}

/// Start fetching node then hub lists in the background.  Progress is
/// reported through the event callback.  Returns 0 once started.
#[no_mangle]
pub extern "C" fn hubjump_refresh_lists() -> i32 {
    clear_error();

    let manager = match manager() {
        Some(m) => m,
        None => return fail(SdkError::NotInitialized),
    };
    runtime().spawn(async move {
        if let Err(e) = manager.refresh_all().await {
            log::error!("List refresh failed: {}", e);
        }
    });
    SUCCESS
}

/// Load a list body supplied by the host.  Returns the entry count, or a
/// negative error code.
#[no_mangle]
pub unsafe extern "C" fn hubjump_load_lists_json(is_hub: i32, json: *const c_char) -> i32 {
    clear_error();

    let body = match from_c_str(json) {
        Some(s) => s.to_string(),
        None => return fail(SdkError::InvalidParam("json is null or invalid".into())),
    };

    with_sdk(
        |manager| match manager.load_json(scope_from_flag(is_hub), &body) {
            Ok(count) => i32::try_from(count).unwrap_or(i32::MAX),
            Err(e) => fail(e),
        },
    )
}

// ═══════════════════════════════════════════════════════════════════════════
//  Settings (3)
// ═══════════════════════════════════════════════════════════════════════════

/// Select encryption by code (0 RSA ... 5 ECC+XOR).
#[no_mangle]
pub extern "C" fn hubjump_set_encryption(code: i32) -> i32 {
    clear_error();

    let encryption = match Encryption::from_code(code) {
        Some(e) => e,
        None => return fail(SdkError::InvalidParam(format!("Unknown encryption {}", code))),
    };
    with_sdk(|manager| match manager.set_encryption(encryption) {
        Ok(()) => SUCCESS,
        Err(e) => fail(e),
    })
}

/// Browse nodes (1) or hubs (0).
#[no_mangle]
pub extern "C" fn hubjump_set_show_nodes(show_nodes: i32) -> i32 {
    clear_error();

    with_sdk(|manager| match manager.set_show_nodes(show_nodes != 0) {
        Ok(()) => SUCCESS,
        Err(e) => fail(e),
    })
}

/// Turn latency probing on (1) or off (0).
#[no_mangle]
pub extern "C" fn hubjump_set_ping_enabled(enabled: i32) -> i32 {
    clear_error();

    with_sdk(|manager| match manager.set_ping_enabled(enabled != 0) {
        Ok(()) => SUCCESS,
        Err(e) => fail(e),
    })
}

// ═══════════════════════════════════════════════════════════════════════════
//  Topology (4)
// ═══════════════════════════════════════════════════════════════════════════

/// Restart probing of nodes (0) or hubs (1).
/// Returns 1 if started, 0 if probing is disabled.
#[no_mangle]
pub extern "C" fn hubjump_ping_all(is_hub: i32) -> i32 {
    clear_error();

    with_sdk(|manager| {
        if manager.ping_all(scope_from_flag(is_hub)) {
            1
        } else {
            0
        }
    })
}

/// Top-level list for the current encryption.
/// Caller must free the returned string.
///
/// JSON shape: `[{"is_hub":true,"id":0},{"is_hub":false,"id":3}]`
#[no_mangle]
pub extern "C" fn hubjump_level0_json() -> *mut c_char {
    clear_error();

    match manager() {
        Some(manager) => to_c_json(&manager.level0()),
        None => {
            set_sdk_error(&SdkError::NotInitialized);
            ptr::null_mut()
        }
    }
}

/// Node ids under `hub` as a JSON array.  Caller must free the returned string.
#[no_mangle]
pub extern "C" fn hubjump_level1_json(hub: i32) -> *mut c_char {
    clear_error();

    let hub = match id_from_c(hub) {
        Ok(h) => h,
        Err(e) => {
            set_sdk_error(&e);
            return ptr::null_mut();
        }
    };
    match manager() {
        Some(manager) => to_c_json(&manager.level1(hub)),
        None => {
            set_sdk_error(&SdkError::NotInitialized);
            ptr::null_mut()
        }
    }
}

/// Entry `id` of the browsed scope (or the node list with `force_node`).
/// Returns null for unknown ids.  Caller must free the returned string.
#[no_mangle]
pub extern "C" fn hubjump_server_json(id: i32, force_node: i32) -> *mut c_char {
    clear_error();

    let id = match id_from_c(id) {
        Ok(i) => i,
        Err(e) => {
            set_sdk_error(&e);
            return ptr::null_mut();
        }
    };
    let manager = match manager() {
        Some(m) => m,
        None => {
            set_sdk_error(&SdkError::NotInitialized);
            return ptr::null_mut();
        }
    };

    let force_node = force_node != 0;
    match manager.server(id, force_node) {
        Some(server) => to_c_json(&ServerJson {
            latency_ms: server.latency.as_sentinel(),
            is_hub: !force_node && manager.scope() == Scope::Hubs,
            server: &server,
        }),
        None => {
            set_sdk_error(&SdkError::InvalidParam(format!("No server with id {}", id)));
            ptr::null_mut()
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  Jump (2)
// ═══════════════════════════════════════════════════════════════════════════

/// Id that a jump would pick now, or -1 when nothing is loaded.
#[no_mangle]
pub extern "C" fn hubjump_server_to_jump() -> i32 {
    clear_error();

    with_sdk(|manager| id_to_c(manager.server_to_jump()))
}

/// Pick a target, store it and hand it to the connect callback.
/// Returns the id, -1 when nothing is loaded, or another negative error code.
#[no_mangle]
pub extern "C" fn hubjump_jump() -> i32 {
    clear_error();

    with_sdk(|manager| match manager.jump() {
        Ok(id) => id_to_c(id),
        Err(e) => fail(e),
    })
}

// ═══════════════════════════════════════════════════════════════════════════
//  Favourites (3)
// ═══════════════════════════════════════════════════════════════════════════

#[no_mangle]
pub extern "C" fn hubjump_set_favorite(is_hub: i32, id: i32, favorite: i32) -> i32 {
    clear_error();

    let id = match id_from_c(id) {
        Ok(i) => i,
        Err(e) => return fail(e),
    };
    with_sdk(
        |manager| match manager.set_favorite(scope_from_flag(is_hub), id, favorite != 0) {
            Ok(()) => SUCCESS,
            Err(e) => fail(e),
        },
    )
}

/// Move the favourite cursor forward.  Returns the new id or -1.
#[no_mangle]
pub extern "C" fn hubjump_next_favorite() -> i32 {
    clear_error();

    with_sdk(|manager| match manager.next_favorite() {
        Ok(id) => id_to_c(id),
        Err(e) => fail(e),
    })
}

/// Move the favourite cursor back.  Returns the new id or -1.
#[no_mangle]
pub extern "C" fn hubjump_previous_favorite() -> i32 {
    clear_error();

    with_sdk(|manager| match manager.previous_favorite() {
        Ok(id) => id_to_c(id),
        Err(e) => fail(e),
    })
}

// ═══════════════════════════════════════════════════════════════════════════
//  Callbacks (2)
// ═══════════════════════════════════════════════════════════════════════════

/// Register a callback for topology events.
///
/// Signature: `fn(event_json: *const c_char, user_context: *mut c_void)`
#[no_mangle]
pub extern "C" fn hubjump_register_event_callback(cb: EventCallback, ctx: *mut c_void) {
    register_event_callback(cb, ctx);
}

/// Register the callback that performs connections on jump.
///
/// Signature: `fn(is_hub: i32, id: i32, address: *const c_char, user_context: *mut c_void) -> i32`
#[no_mangle]
pub extern "C" fn hubjump_register_connect_callback(cb: ConnectCallback, ctx: *mut c_void) {
    register_connect_callback(cb, ctx);
}

// ═══════════════════════════════════════════════════════════════════════════
//  Error (2)
// ═══════════════════════════════════════════════════════════════════════════

/// Get the last error message.  Returns null if no error.
/// Caller must free the returned string.
#[no_mangle]
pub extern "C" fn hubjump_last_error() -> *mut c_char {
    match take_last_error() {
        Some(msg) => to_c_string(&msg),
        None => ptr::null_mut(),
    }
}

/// Get the last error code.  Returns 0 (`SUCCESS`) if no error.
#[no_mangle]
pub extern "C" fn hubjump_last_error_code() -> i32 {
    last_error_code()
}
