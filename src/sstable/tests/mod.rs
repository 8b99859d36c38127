
use std::path::Path;
use std::sync::Arc;

use crate::keys::{ValueType, internal_key};

use super::{Table, TableBuilder};

/// Builds a table of `(user_key, seq, vtype, value)` rows, which must
/// already be in internal-key order.
pub(crate) fn build_table(
    path: &Path,
    block_size: usize,
    rows: &[(&[u8], u64, ValueType, &[u8])],
) -> Arc<Table> {
    let mut builder = TableBuilder::new(path, block_size, 16).expect("create builder");
    for (user_key, seq, vtype, value) in rows {
        let key = internal_key(user_key, *seq, *vtype);
        builder.add(&key, value).expect("add");
    }
    builder.finish().expect("finish");
    Arc::new(Table::open(path).expect("open"))
}

/// `keyNNNNNN` helper shared by the table tests.
pub(crate) fn numbered_key(i: usize) -> Vec<u8> {
    format!("key{i:06}").into_bytes()
}

/// `valueNNNNNN` helper shared by the table tests.
pub(crate) fn numbered_value(i: usize) -> Vec<u8> {
    format!("value{i:06}").into_bytes()
}
