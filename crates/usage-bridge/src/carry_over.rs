use async_trait::async_trait;
use tracing::debug;

use crate::{
    bridge::CarryOver,
    model::{ReportResponse, Usage},
    Result,
};

/// Carry-over that keeps no ledger
///
/// Usage timestamps are left as they are and writes are only logged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughCarryOver;

#[async_trait]
impl CarryOver for PassThroughCarryOver {
    async fn adjust_timestamp(&self, usage: Usage, _event_id: &str) -> Result<Usage> {
        Ok(usage)
    }

    async fn write(
        &self,
        _usage: &Usage,
        response: &ReportResponse,
        event_id: &str,
        state: Option<&str>,
    ) -> Result<()> {
        debug!(
            guid = event_id,
            state = ?state,
            location = ?response.location,
            "Carry-over write"
        );
        Ok(())
    }
}
