//! Global Tokio runtime shared by the FFI layer and the probe slots.
//!
//! Short FFI calls block on it; list refreshes, the event forwarder and
//! every probe slot are spawned onto it through [`handle`].

use once_cell::sync::Lazy;
use tokio::runtime::{Builder, Handle, Runtime};

static RUNTIME: Lazy<Runtime> = Lazy::new(|| {
    Builder::new_multi_thread()
        .enable_all()
        .thread_name("hubjump")
        .build()
        .expect("failed to create tokio runtime")
});

pub fn runtime() -> &'static Runtime {
    &RUNTIME
}

/// Handle injected into the manager so probe slots outlive the FFI call
/// that started them.
pub fn handle() -> Handle {
    RUNTIME.handle().clone()
}
