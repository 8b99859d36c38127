
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use super::DbConfig;

/// Initialize tracing controlled by `RUST_LOG`; safe to call from
/// every test, only the first call takes effect.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config that keeps everything in the memtable — no rotations.
pub(crate) fn memtable_only_config() -> DbConfig {
    init_tracing();
    DbConfig {
        mem_table_size: 4 * 1024 * 1024,
        ..DbConfig::default()
    }
}

/// Small memtable and fast ticks: rotations, flushes, and compactions
/// all happen within a test's lifetime.
pub(crate) fn small_buffer_config() -> DbConfig {
    init_tracing();
    DbConfig {
        mem_table_size: 4 * 1024,
        block_size: 1024,
        max_file_size: 16 * 1024,
        compaction_interval: Duration::from_millis(10),
        ..DbConfig::default()
    }
}

/// Zero-padded test key.
pub(crate) fn key(i: usize) -> Vec<u8> {
    format!("key{i:06}").into_bytes()
}

/// Zero-padded test value.
pub(crate) fn value(i: usize) -> Vec<u8> {
    format!("value{i:06}").into_bytes()
}
