//! Bounded multi-partition consumption engine.
//!
//! Turns the message stream of an already connected [BrokerClient] into a filtered, limited and
//! optionally time-seeked result set. Two modes exist:
//! - [ScanEngine]: one-shot bounded scan, each partition reads at most its share of a limit.
//! - [TailEngine]: open-ended read loop on a background task, stopped through a cancellation token.
//!
//! The flow is always resolve ([resolve_partitions]) -> seek ([seek()]) -> read, with the results
//! collected into a [ScanResult].

use tracing::{info, warn};

mod error;
pub use crate::error::{Error, Result};

mod client;
pub use crate::client::{BrokerClient, RawMessage, ReadOutcome, Watermarks};

mod message;
pub use crate::message::{Message, MessageFilter};

mod partition;
pub use crate::partition::{Partition, PartitionTable, resolve_partitions};

mod progress;
pub use crate::progress::{ProgressEvent, ProgressReporter, ProgressStream};

mod result;
pub use crate::result::ScanResult;

pub mod scan;
pub use crate::scan::ScanEngine;

pub mod seek;
pub use crate::seek::{OffsetPlan, StartPolicy, seek};

pub mod tail;
pub use crate::tail::{TailEngine, TailHandle, TailLimit, TailState};

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

/// Parameters of a one-shot bounded scan.
#[derive(Debug, Clone, Default)]
pub struct GrepRequest {
    pub filter: MessageFilter,
    /// Maximum number of messages read per partition.
    pub limit: i64,
    pub start: StartPolicy,
}

/// Resolves the partitions of `topic`, scans them according to `request` and closes the client,
/// whatever the outcome. A failure to close is logged, it never hides the scan's own result.
pub async fn grep<C: BrokerClient>(
    client: C,
    topic: &str,
    request: &GrepRequest,
    progress: Option<ProgressReporter>,
) -> Result<ScanResult> {
    let mut engine = ScanEngine::new(client, topic);
    if let Some(progress) = progress {
        engine = engine.with_progress(progress);
    }

    let outcome = async {
        if request.limit < 0 {
            return Err(Error::InvalidArgument(format!(
                "limit must not be negative, got {}",
                request.limit
            )));
        }
        let table = resolve_partitions(engine.client_mut(), topic).await?;
        engine
            .scan(&table, &request.filter, request.limit, &request.start)
            .await
    }
    .await;

    if let Err(e) = engine.into_client().close().await {
        warn!(error = ?e, topic, "Failed to close broker client");
    }

    let result = outcome?;
    info!(
        topic,
        read = result.read,
        matched = result.matched,
        elapsed = ?result.elapsed,
        "Search finished"
    );
    Ok(result)
}
