use std::sync::Arc;

use courier_db::models::Grouping;
use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::dispatcher::{DispatchResult, Dispatcher};
use crate::error::NotificationError;
use crate::intake::NotificationIntake;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkItem {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<DispatchResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BulkItem {
    pub fn succeeded(&self) -> bool {
        self.result.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkResult {
    pub batch_id: String,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub items: Vec<BulkItem>,
}

/// Fans a batch through the dispatcher chunk by chunk. Items within a chunk
/// run concurrently; one failing item never stops the batch.
pub struct BulkOrchestrator {
    dispatcher: Arc<Dispatcher>,
    batch_size: usize,
}

impl BulkOrchestrator {
    pub fn new(dispatcher: Arc<Dispatcher>, batch_size: usize) -> Self {
        Self {
            dispatcher,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn dispatch_bulk(&self, intakes: Vec<NotificationIntake>) -> BulkResult {
        let batch_id = Uuid::new_v4().to_string();
        let total = intakes.len();
        let mut items = Vec::with_capacity(total);

        let mut intakes = intakes.into_iter().enumerate().peekable();
        let mut chunk_no = 0;
        while intakes.peek().is_some() {
            let chunk: Vec<_> = intakes.by_ref().take(self.batch_size).collect();
            chunk_no += 1;
            let runs = chunk.into_iter().map(|(index, mut intake)| {
                let grouping = intake.grouping.get_or_insert_with(Grouping::default);
                grouping.batch_id = Some(batch_id.clone());
                async move { (index, self.dispatcher.dispatch(intake).await) }
            });
            for (index, outcome) in join_all(runs).await {
                items.push(match outcome {
                    Ok(result) => BulkItem {
                        index,
                        result: Some(result),
                        error: None,
                    },
                    Err(e) => {
                        warn!(%batch_id, index, error = %e, "Bulk item failed");
                        BulkItem {
                            index,
                            result: None,
                            error: Some(e.to_string()),
                        }
                    }
                });
            }
            if self.dispatcher.is_shutting_down() {
                warn!(%batch_id, chunk_no, "Shutdown during bulk dispatch, rejecting remaining items");
                for (index, _) in intakes.by_ref() {
                    items.push(BulkItem {
                        index,
                        result: None,
                        error: Some(NotificationError::ShuttingDown.to_string()),
                    });
                }
            }
        }

        let successful = items.iter().filter(|item| item.succeeded()).count();
        let result = BulkResult {
            batch_id,
            total,
            successful,
            failed: total - successful,
            items,
        };
        info!(
            batch_id = %result.batch_id,
            total,
            successful,
            failed = result.failed,
            chunks = chunk_no,
            "Bulk dispatch finished"
        );
        result
    }
}
