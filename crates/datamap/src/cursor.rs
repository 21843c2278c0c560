//! Batched cursors over ordered scans.
//!
//! A cursor requires the calling thread's active transaction: it pages
//! through the ordered result over the transaction's connection, so the
//! view stays consistent for the cursor's lifetime. Dropping the cursor
//! (or `close`) releases it; `DataMapper::with_cursor` wraps both ends.

use crate::mapper::DataMapper;
use datamap_core::{Entity, Error, Result};
use datamap_pool::tx::TxHandle;
use std::collections::VecDeque;

/// A forward-only cursor over entities ordered by one column.
pub struct Cursor<E: Entity> {
    mapper: DataMapper<E>,
    handle: TxHandle,
    column: String,
    batch: usize,
    offset: u64,
    buffer: VecDeque<E>,
    done: bool,
}

impl<E: Entity> std::fmt::Debug for Cursor<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("column", &self.column)
            .field("batch", &self.batch)
            .field("offset", &self.offset)
            .field("done", &self.done)
            .finish()
    }
}

impl<E: Entity> Cursor<E> {
    pub(crate) fn new(
        mapper: DataMapper<E>,
        handle: TxHandle,
        column: String,
        batch: usize,
    ) -> Self {
        Self {
            mapper,
            handle,
            column,
            batch,
            offset: 0,
            buffer: VecDeque::new(),
            done: false,
        }
    }

    /// The next entity, or `None` when the scan is exhausted.
    pub fn next(&mut self) -> Result<Option<E>> {
        if self.buffer.is_empty() && !self.done {
            self.refill()?;
        }
        Ok(self.buffer.pop_front())
    }

    fn refill(&mut self) -> Result<()> {
        if !self.handle.is_live() {
            return Err(Error::Transaction(
                "cursor used after its transaction completed".to_string(),
            ));
        }
        let env = self.mapper.env();
        let order = format!(
            "{}.{} ASC",
            env.quote(E::descriptor().table_name),
            env.quote(&self.column)
        );
        let sql = self
            .mapper
            .fetch_sql(None, Some(&order), Some(self.batch as u64), Some(self.offset));
        let batch = self.handle.with_conn(|conn| {
            let rows = conn.query(&sql, &[])?;
            self.mapper.hydrate(conn, rows)
        })?;
        self.offset += batch.len() as u64;
        if batch.len() < self.batch {
            self.done = true;
        }
        self.buffer.extend(batch);
        Ok(())
    }

    /// Release the cursor explicitly. Further `next` calls return `None`.
    pub fn close(&mut self) {
        self.buffer.clear();
        self.done = true;
    }
}
