//! Portfolio consumer: per-tenant fleet summary from `events.miner`.

use chrono::Utc;
use hs_05_consumer_runtime::{EventHandler, HandlerError};
use shared_store::Txn;
use shared_types::EventEnvelope;
use tracing::debug;

/// Maintains `portfolio_summary`: miner count and aggregate hashrate.
#[derive(Debug, Default)]
pub struct PortfolioHandler;

impl EventHandler for PortfolioHandler {
    fn handle(&self, envelope: &EventEnvelope, txn: &mut Txn<'_>) -> Result<(), HandlerError> {
        let now = Utc::now();
        match envelope.kind.as_str() {
            "miner.added" => {
                // Consume-boundary schema check; a wrong type here is a
                // producer bug, not something a retry can fix.
                if let Some(ip) = envelope.payload.get("ip") {
                    if !ip.is_string() {
                        return Err(HandlerError::Permanent(
                            "miner.added payload: ip must be a string".into(),
                        ));
                    }
                }
                let hashrate = envelope.payload["nominal_ghs"].as_f64().unwrap_or(0.0);
                txn.update_portfolio(&envelope.tenant_id, now, |row| {
                    row.miner_count += 1;
                    row.total_hashrate_ghs += hashrate;
                });
                Ok(())
            }
            "miner.removed" => {
                let hashrate = envelope.payload["nominal_ghs"].as_f64().unwrap_or(0.0);
                txn.update_portfolio(&envelope.tenant_id, now, |row| {
                    row.miner_count = row.miner_count.saturating_sub(1);
                    row.total_hashrate_ghs = (row.total_hashrate_ghs - hashrate).max(0.0);
                });
                Ok(())
            }
            "miner.offline" | "miner.online" => {
                // Availability flips don't change ownership counts; they
                // only refresh the view timestamp.
                txn.update_portfolio(&envelope.tenant_id, now, |_| {});
                Ok(())
            }
            other => {
                debug!(kind = other, "Unhandled miner event kind");
                Err(HandlerError::Permanent(format!("unknown event kind {other}")))
            }
        }
    }
}
