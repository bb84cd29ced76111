//! Transport dispatch contract.

use async_trait::async_trait;
use busline_core::{TransportOperation, TransportTransaction};

/// Hands drained outbound operations to the transport.
///
/// Implementations own network delivery, batching, and partial-failure
/// reporting. Operations arrive in no particular order.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Dispatch `operations`, enlisting them in `transaction` where the
    /// transport supports it.
    async fn dispatch(
        &self,
        operations: Vec<TransportOperation>,
        transaction: &TransportTransaction,
    ) -> anyhow::Result<()>;
}
