use anyhow::Result;
use memtable::Cursor;
use wal::Record;

use crate::SSTable;

/// Sequential reader over a table's Data segment.
///
/// Stops at the end of the table or at the first key past `max`.
pub struct SSTableCursor<'a> {
    table: &'a SSTable,
    max: Option<Vec<u8>>,
    /// Data offset of the record after `current`.
    next_offset: u64,
    current: Option<Record>,
}

impl<'a> SSTableCursor<'a> {
    pub(crate) fn new(table: &'a SSTable, max: Option<Vec<u8>>) -> Result<Self> {
        let mut c = Self {
            table,
            max,
            next_offset: 0,
            current: None,
        };
        c.load(0)?;
        Ok(c)
    }

    fn load(&mut self, offset: u64) -> Result<()> {
        self.current = None;
        if offset >= self.table.data_len() {
            self.next_offset = offset;
            return Ok(());
        }
        let (record, len) = self.table.read_record_at(offset)?;
        self.next_offset = offset + len;
        if self.max.as_deref().map_or(true, |max| record.key.as_slice() <= max) {
            self.current = Some(record);
        }
        Ok(())
    }
}

impl Cursor for SSTableCursor<'_> {
    fn seek(&mut self, min: &[u8]) -> Result<()> {
        let offset = self.table.lower_bound(min)?;
        self.load(offset)
    }

    fn current(&self) -> Option<&Record> {
        self.current.as_ref()
    }

    fn advance(&mut self) -> Result<()> {
        if self.current.is_none() {
            return Ok(());
        }
        self.load(self.next_offset)
    }
}
