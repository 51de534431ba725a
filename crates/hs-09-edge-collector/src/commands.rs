//! # Command Execution Loop
//!
//! Long-polls `/collector/commands/pending`, verifies each command's HMAC
//! against the device secret, executes verified commands against the
//! targeted miners, and reports per-miner results echoing the dispatch
//! nonce. An unverifiable command is reported `failed` with
//! `reason=signature` and never touches a miner.

use crate::client::CgMinerClient;
use crate::config::MinerTarget;
use crate::uploader::{IngestApi, UploadError};
use chrono::Utc;
use shared_types::signing::{derive_signing_key, verify_command_signature};
use shared_types::{
    CommandResultReport, CommandResultStatus, CommandType, MinerResultEntry, PendingCommand,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Long-poll wait requested from the server.
const LONG_POLL_WAIT: Duration = Duration::from_secs(20);
/// Pause after transport errors before re-polling.
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Device-level operation for a canonical command type.
fn exec_op(command_type: CommandType, payload: &serde_json::Value) -> Option<(&'static str, String)> {
    match command_type.canonical() {
        CommandType::Reboot => Some(("restart", String::new())),
        CommandType::SetPool => {
            let pool = payload.get("pool_index").and_then(|v| v.as_u64()).unwrap_or(0);
            Some(("switchpool", pool.to_string()))
        }
        CommandType::Enable => Some(("enablepool", "0".into())),
        CommandType::Disable => Some(("disablepool", "0".into())),
        CommandType::SetFrequency => payload
            .get("mhz")
            .and_then(|v| v.as_u64())
            .map(|mhz| ("ascset", format!("0,freq,{mhz}"))),
        CommandType::SetFan => payload
            .get("percent")
            .and_then(|v| v.as_u64())
            .map(|pct| ("ascset", format!("0,fan,{pct}"))),
        CommandType::PowerMode => payload
            .get("mode")
            .and_then(|v| v.as_str())
            .map(|mode| ("ascset", format!("0,workmode,{mode}"))),
        CommandType::ThermalPolicy => payload
            .get("limit_c")
            .and_then(|v| v.as_u64())
            .map(|limit| ("ascset", format!("0,thermal,{limit}"))),
        CommandType::Led => {
            let on = payload.get("on").and_then(|v| v.as_bool()).unwrap_or(true);
            Some(("ascset", format!("0,led,{}", i32::from(on))))
        }
        // canonical() collapses the synonyms before we get here
        CommandType::Restart | CommandType::ChangePool | CommandType::SetFreq => None,
    }
}

/// The command loop.
pub struct CommandRunner {
    api: Arc<dyn IngestApi>,
    client: CgMinerClient,
    signing_key: [u8; 32],
    fleet: HashMap<String, String>,
}

impl CommandRunner {
    /// Build a runner. `client` should carry the exec whitelist.
    #[must_use]
    pub fn new(
        api: Arc<dyn IngestApi>,
        client: CgMinerClient,
        device_secret: &[u8],
        miners: &[MinerTarget],
    ) -> Self {
        Self {
            api,
            client,
            signing_key: derive_signing_key(device_secret),
            fleet: miners
                .iter()
                .map(|m| (m.id.to_string(), m.addr.clone()))
                .collect(),
        }
    }

    /// Verify a command's signature over the server-provided fields.
    #[must_use]
    pub fn verify(&self, command: &PendingCommand) -> bool {
        verify_command_signature(
            &self.signing_key,
            command.id,
            command.dispatch_nonce,
            command.expires_at,
            &command.payload,
            &command.signature,
        )
    }

    /// One long-poll iteration: fetch, execute, report. Returns the number
    /// of commands handled.
    pub async fn poll_once(&self, wait: Duration) -> Result<usize, UploadError> {
        let commands = self.api.fetch_commands(wait).await?;
        let count = commands.len();
        for command in commands {
            let report = self.run_command(&command).await;
            if let Err(err) = self.api.report_result(command.id, &report).await {
                warn!(command_id = %command.id, %err, "Result report failed");
            }
        }
        Ok(count)
    }

    async fn run_command(&self, command: &PendingCommand) -> CommandResultReport {
        if !self.verify(command) {
            warn!(command_id = %command.id, "Command signature rejected, refusing execution");
            return CommandResultReport {
                dispatch_nonce: command.dispatch_nonce,
                signature: command.signature.clone(),
                results: command
                    .target_ids
                    .iter()
                    .map(|miner| MinerResultEntry {
                        miner_id: miner.clone(),
                        status: CommandResultStatus::Failed,
                        message: Some("signature".into()),
                        metrics: serde_json::json!({"reason": "signature"}),
                        started_at: None,
                        finished_at: Some(Utc::now()),
                    })
                    .collect(),
            };
        }
        if command.expires_at <= Utc::now() {
            return self.uniform_failure(command, "expired");
        }

        let Some((op, parameter)) = exec_op(command.command_type, &command.payload) else {
            return self.uniform_failure(command, "unsupported payload");
        };

        let mut results = Vec::with_capacity(command.target_ids.len());
        for miner in &command.target_ids {
            let started = Utc::now();
            let entry = match self.fleet.get(miner) {
                None => MinerResultEntry {
                    miner_id: miner.clone(),
                    status: CommandResultStatus::Skipped,
                    message: Some("miner not managed by this device".into()),
                    metrics: serde_json::json!({}),
                    started_at: Some(started),
                    finished_at: Some(Utc::now()),
                },
                Some(addr) => match self.client.request(addr, op, &parameter).await {
                    Ok(response) => {
                        debug!(command_id = %command.id, miner = %miner, op, "Command executed");
                        MinerResultEntry {
                            miner_id: miner.clone(),
                            status: CommandResultStatus::Succeeded,
                            message: None,
                            metrics: serde_json::json!({
                                "status": response["STATUS"][0]["STATUS"],
                            }),
                            started_at: Some(started),
                            finished_at: Some(Utc::now()),
                        }
                    }
                    Err(err) => MinerResultEntry {
                        miner_id: miner.clone(),
                        status: CommandResultStatus::Failed,
                        message: Some(format!("{}: {err}", err.class())),
                        metrics: serde_json::json!({"error_class": err.class()}),
                        started_at: Some(started),
                        finished_at: Some(Utc::now()),
                    },
                },
            };
            results.push(entry);
        }

        CommandResultReport {
            dispatch_nonce: command.dispatch_nonce,
            signature: command.signature.clone(),
            results,
        }
    }

    fn uniform_failure(&self, command: &PendingCommand, reason: &str) -> CommandResultReport {
        CommandResultReport {
            dispatch_nonce: command.dispatch_nonce,
            signature: command.signature.clone(),
            results: command
                .target_ids
                .iter()
                .map(|miner| MinerResultEntry {
                    miner_id: miner.clone(),
                    status: CommandResultStatus::Failed,
                    message: Some(reason.to_string()),
                    metrics: serde_json::json!({}),
                    started_at: None,
                    finished_at: Some(Utc::now()),
                })
                .collect(),
        }
    }

    /// Spawn the long-poll loop.
    #[must_use]
    pub fn start(self: Arc<Self>) -> RunnerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            info!("Command runner started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    result = self.poll_once(LONG_POLL_WAIT) => {
                        if let Err(err) = result {
                            debug!(%err, "Command poll failed, backing off");
                            tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                        }
                    }
                }
            }
            info!("Command runner stopped");
        });
        RunnerHandle { shutdown: shutdown_tx, task }
    }
}

/// Handle to the running command loop.
pub struct RunnerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RunnerHandle {
    /// Stop the loop and wait for it.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}
