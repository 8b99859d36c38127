mod tests_dedup;

use std::path::Path;
use std::sync::Arc;

use crate::keys::{ValueType, internal_key};
use crate::sstable::{Table, TableBuilder};
use crate::version::FileMetaData;

/// Builds a table plus the metadata the level iterator wants.
pub(crate) fn table_with_meta(
    path: &Path,
    number: u64,
    rows: &[(&[u8], u64, ValueType, &[u8])],
) -> (FileMetaData, Arc<Table>) {
    let mut builder = TableBuilder::new(path, 512, 16).expect("builder");
    for (user_key, seq, vtype, value) in rows {
        builder
            .add(&internal_key(user_key, *seq, *vtype), value)
            .expect("add");
    }
    let file_size = builder.finish().expect("finish");
    let (first, last) = (rows.first().unwrap(), rows.last().unwrap());
    let meta = FileMetaData {
        number,
        file_size,
        smallest: internal_key(first.0, first.1, first.2),
        largest: internal_key(last.0, last.1, last.2),
    };
    (meta, Arc::new(Table::open(path).expect("open")))
}
