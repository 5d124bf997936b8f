use std::path::Path;

use crate::engine::Engine;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber controlled by `RUST_LOG` env var.
/// Safe to call multiple times — only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Opens an engine with its data directory and value log under `root`.
pub fn open_engine(root: &Path) -> Engine {
    init_tracing();
    let data = root.join("data");
    Engine::open(&data, data.join("vlog")).expect("open engine")
}

/// A 64-byte value derived from the key, stable across calls.
pub fn value_for(key: u64) -> Vec<u8> {
    let mut v = format!("value-{key:08}-").into_bytes();
    v.resize(64, b'.');
    v
}

/// A distinct 64-byte overwrite value for the same key.
pub fn new_value_for(key: u64) -> Vec<u8> {
    let mut v = format!("fresh-{key:08}-").into_bytes();
    v.resize(64, b'+');
    v
}

/// Puts `count` keys with [`value_for`] payloads.
pub fn fill(engine: &mut Engine, count: u64) {
    for key in 0..count {
        engine.put(key, value_for(key)).expect("put");
    }
}
