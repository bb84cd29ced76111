//! Lock-free accumulator for outbound work produced while processing one message.
//!
//! Entries live in an immutable singly linked stack whose head is swapped with
//! `ArcSwapOption`; adds never block each other and readers take point-in-time
//! snapshots by walking from a loaded head. Entry order is unspecified.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use busline_core::TransportOperation;

/// Errors from [`PendingTransportOperations::add_range`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PendingOperationsError {
    #[error("at least one transport operation is required")]
    EmptyRange,
}

struct Node {
    op: TransportOperation,
    next: Option<Arc<Node>>,
}

impl Drop for Node {
    // Unlink iteratively so long stacks cannot overflow the call stack on drop.
    fn drop(&mut self) {
        let mut next = self.next.take();
        while let Some(node) = next {
            match Arc::try_unwrap(node) {
                Ok(mut node) => next = node.next.take(),
                Err(_) => break,
            }
        }
    }
}

/// Pending transport operations for the message currently being processed.
///
/// Safe under arbitrary concurrent [`add`](Self::add) and
/// [`add_range`](Self::add_range) calls; nothing is ever dropped until
/// [`drain`](Self::drain) hands the entries to the dispatcher.
#[derive(Default)]
pub struct PendingTransportOperations {
    head: ArcSwapOption<Node>,
}

impl fmt::Debug for PendingTransportOperations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingTransportOperations")
            .field("len", &self.len())
            .finish()
    }
}

impl PendingTransportOperations {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one operation.
    pub fn add(&self, op: TransportOperation) {
        self.head.rcu(|head| {
            Some(Arc::new(Node {
                op: op.clone(),
                next: head.clone(),
            }))
        });
    }

    /// Adds every operation in `ops` in one atomic step.
    ///
    /// # Errors
    ///
    /// Returns [`PendingOperationsError::EmptyRange`] without touching the
    /// collection when `ops` is empty.
    pub fn add_range(&self, ops: Vec<TransportOperation>) -> Result<(), PendingOperationsError> {
        if ops.is_empty() {
            return Err(PendingOperationsError::EmptyRange);
        }
        self.head.rcu(|head| {
            let mut chain = head.clone();
            for op in &ops {
                chain = Some(Arc::new(Node {
                    op: op.clone(),
                    next: chain,
                }));
            }
            chain
        });
        Ok(())
    }

    /// O(1) non-blocking emptiness check.
    #[must_use]
    pub fn has_operations(&self) -> bool {
        self.head.load().is_some()
    }

    /// Point-in-time copy of every held operation, in no particular order.
    #[must_use]
    pub fn operations(&self) -> Vec<TransportOperation> {
        collect(self.head.load_full())
    }

    /// Number of held operations (walks the snapshot).
    #[must_use]
    pub fn len(&self) -> usize {
        let mut count = 0;
        let mut cursor = self.head.load_full();
        while let Some(node) = cursor {
            count += 1;
            cursor = node.next.clone();
        }
        count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.has_operations()
    }

    /// Removes and returns every held operation.
    ///
    /// The batch-dispatch behavior calls this exactly once per pipeline run.
    #[must_use]
    pub fn drain(&self) -> Vec<TransportOperation> {
        collect(self.head.swap(None))
    }
}

fn collect(head: Option<Arc<Node>>) -> Vec<TransportOperation> {
    let mut ops = Vec::new();
    let mut cursor = head;
    while let Some(node) = cursor {
        ops.push(node.op.clone());
        cursor = node.next.clone();
    }
    ops
}
