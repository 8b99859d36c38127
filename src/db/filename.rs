//! Database file naming.
//!
//! Everything lives flat under the database directory:
//!
//! - `MANIFEST` — current WAL number ‖ encoded version.
//! - `NNNNNN.ldb` — SSTable with zero-padded file number.
//! - `NNNNNN.log` — write-ahead log with zero-padded file number.

use std::path::{Path, PathBuf};

/// Extension of SSTable files.
pub(crate) const TABLE_SUFFIX: &str = "ldb";

/// Extension of write-ahead log files.
pub(crate) const WAL_SUFFIX: &str = "log";

/// Path of the SSTable with the given file number.
pub(crate) fn table_file(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{number:06}.{TABLE_SUFFIX}"))
}

/// Path of the write-ahead log with the given file number.
pub(crate) fn wal_file(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{number:06}.{WAL_SUFFIX}"))
}

/// Path of the manifest.
pub(crate) fn manifest_file(dir: &Path) -> PathBuf {
    dir.join("MANIFEST")
}

/// Extracts the file number from a `NNNNNN.<suffix>` file name.
pub(crate) fn parse_file_number(name: &str, suffix: &str) -> Option<u64> {
    name.strip_suffix(&format!(".{suffix}"))
        .and_then(|stem| stem.parse::<u64>().ok())
}
