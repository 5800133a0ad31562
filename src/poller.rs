use crate::repository::CursorStore;
use alloy::rpc::types::Log;
use alloy_primitives::{Address, B256};
use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use tracing::{debug, info, warn};

/// Inclusive block range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.from, self.to)
    }
}

/// Last block fully processed by one polling task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockCursor {
    last_processed: u64,
}

impl BlockCursor {
    pub fn at(last_processed: u64) -> Self {
        Self { last_processed }
    }

    /// A configured start block is itself scanned; otherwise history is
    /// skipped and scanning starts at the current head.
    pub fn initial(start_block: Option<u64>, head: u64) -> Self {
        match start_block {
            Some(start) => Self::at(start.saturating_sub(1)),
            None => Self::at(head.saturating_sub(1)),
        }
    }

    pub fn last_processed(&self) -> u64 {
        self.last_processed
    }

    /// Ranges still to scan up to `head`, each at most `max_span` blocks.
    pub fn pending(&self, head: u64, max_span: u64) -> Vec<BlockRange> {
        let max_span = max_span.max(1);
        let mut ranges = Vec::new();
        let mut from = self.last_processed + 1;
        while from <= head {
            let to = (from + max_span - 1).min(head);
            ranges.push(BlockRange { from, to });
            from = to + 1;
        }
        ranges
    }

    fn advance(&mut self, to: u64) {
        // never moves backwards
        self.last_processed = self.last_processed.max(to);
    }
}

/// Read side of the node used by the polling tasks.
#[async_trait]
pub trait LogSource: Send + Sync {
    async fn latest_block(&self) -> Result<u64>;

    /// Logs with `topic0` emitted by any of `addresses` within `range`.
    async fn logs(
        &self,
        range: BlockRange,
        addresses: &[Address],
        topic0: B256,
    ) -> Result<Vec<Log>>;
}

/// Work done for one block range. Returning an error stops the tick and
/// leaves the range to be retried.
#[async_trait]
pub trait RangeHandler: Send {
    async fn handle(&mut self, range: BlockRange) -> Result<()>;
}

/// Walks a cursor towards the chain head in bounded ranges, persisting it when
/// a cursor store is configured.
pub struct LogPoller {
    name: String,
    cursor: BlockCursor,
    max_span: u64,
    store: Option<CursorStore>,
}

impl LogPoller {
    pub fn new(name: &str, cursor: BlockCursor, max_span: u64) -> Self {
        Self {
            name: name.to_string(),
            cursor,
            max_span: max_span.max(1),
            store: None,
        }
    }

    /// Last block recorded for `name`, if a store is configured.
    pub fn stored_block(name: &str, store: Option<&CursorStore>) -> Result<Option<u64>> {
        match store {
            Some(store) => store.load(name),
            None => Ok(None),
        }
    }

    /// A stored cursor takes precedence over `start_block`.
    pub fn restore(
        name: &str,
        store: Option<CursorStore>,
        start_block: Option<u64>,
        head: u64,
        max_span: u64,
    ) -> Result<Self> {
        let stored = Self::stored_block(name, store.as_ref())?;

        let cursor = match stored {
            Some(block) => {
                info!("[{}] Resuming from stored cursor at block {}", name, block);
                BlockCursor::at(block)
            }
            None => BlockCursor::initial(start_block, head),
        };
        info!("[{}] Starting scan from block {}", name, cursor.last_processed() + 1);

        let mut poller = Self::new(name, cursor, max_span);
        poller.store = store;
        Ok(poller)
    }

    pub fn cursor(&self) -> BlockCursor {
        self.cursor
    }

    /// Scans every pending range up to `head`. Returns the number of ranges
    /// completed; on failure the cursor stays at the last completed range.
    pub async fn poll<H>(&mut self, head: u64, handler: &mut H) -> Result<usize>
    where
        H: RangeHandler + ?Sized,
    {
        let ranges = self.cursor.pending(head, self.max_span);
        if ranges.is_empty() {
            debug!("[{}] Caught up to block {}", self.name, head);
            return Ok(0);
        }

        let mut completed = 0;
        for range in ranges {
            if let Err(e) = handler.handle(range).await {
                warn!(
                    "[{}] Failed to process blocks {}, will retry next tick: {:#}",
                    self.name, range, e
                );
                return Err(e);
            }
            self.cursor.advance(range.to);
            self.persist();
            completed += 1;
        }

        debug!(
            "[{}] Updated last processed block to {}",
            self.name,
            self.cursor.last_processed()
        );
        Ok(completed)
    }

    fn persist(&self) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(&self.name, self.cursor.last_processed()) {
                // in-memory cursor stays authoritative for this process
                warn!("[{}] Failed to persist cursor: {:#}", self.name, e);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A node holding a fixed log list. `latest_block` can be made to fail.
    #[derive(Default)]
    pub struct FakeNode {
        pub head: u64,
        pub logs: Vec<Log>,
        pub head_failures: AtomicUsize,
        pub queries: Mutex<Vec<BlockRange>>,
    }

    impl FakeNode {
        pub fn new(head: u64, logs: Vec<Log>) -> Self {
            Self {
                head,
                logs,
                ..Default::default()
            }
        }

        pub fn fail_next_head(&self) {
            self.head_failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl LogSource for FakeNode {
        async fn latest_block(&self) -> Result<u64> {
            let pending = self.head_failures.load(Ordering::SeqCst);
            if pending > 0 {
                self.head_failures.store(pending - 1, Ordering::SeqCst);
                anyhow::bail!("node timeout");
            }
            Ok(self.head)
        }

        async fn logs(
            &self,
            range: BlockRange,
            addresses: &[Address],
            topic0: B256,
        ) -> Result<Vec<Log>> {
            self.queries.lock().unwrap().push(range);
            Ok(self
                .logs
                .iter()
                .filter(|log| {
                    log.block_number
                        .is_some_and(|block| range.from <= block && block <= range.to)
                })
                .filter(|log| addresses.contains(&log.address()))
                .filter(|log| log.topic0() == Some(&topic0))
                .cloned()
                .collect())
        }
    }
}
