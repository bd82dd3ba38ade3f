//! Serializes inbound events into classify → run-job cycles.
//!
//! Classification is synchronous and cheap; jobs run as independent tasks
//! under a wall-clock deadline so one hung transcription can never stall
//! the event stream or the handling of unrelated chats.

use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::classify::{classify, ExclusionCommand, IgnoreReason, Verdict};
use crate::context::EngineContext;
use crate::ingress::InboundEvent;
use crate::job::{JobError, TranscriptionJob};

pub struct Dispatcher {
    ctx: Arc<EngineContext>,
    jobs: JoinSet<()>,
}

impl Dispatcher {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self {
            ctx,
            jobs: JoinSet::new(),
        }
    }

    /// Consume events until the stream closes or shutdown is signalled,
    /// then drain in-flight jobs and release the transport.
    pub async fn run(
        &mut self,
        receiver: Arc<Mutex<mpsc::Receiver<InboundEvent>>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut rx = receiver.lock().await;
        loop {
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        info!("event stream closed");
                        break;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("shutdown requested, no longer accepting events");
                        break;
                    }
                }
            }
        }
        drop(rx);
        self.shutdown().await;
    }

    /// Classify one event and act on the verdict. At most one job is ever
    /// created per event.
    pub async fn handle_event(&mut self, event: InboundEvent) {
        // Reap finished job tasks so the set does not grow unboundedly.
        while self.jobs.try_join_next().is_some() {}

        match classify(&event, &self.ctx.registry) {
            Verdict::Ignore(IgnoreReason::OwnerCommand(cmd)) => {
                info!(id = cmd.identifier(), "owner exclusion command received");
                self.handle_owner_command(&event, &cmd).await;
            }
            Verdict::Ignore(reason) => {
                debug!(event = %event, %reason, "ignoring event");
            }
            Verdict::Process => {
                info!(chat = %event.chat, sender = %event.sender, "audio message accepted");
                let Some(job) = TranscriptionJob::new(&event, &self.ctx.media_dir()) else {
                    warn!(event = %event, "accepted event carried no audio payload");
                    return;
                };
                let ctx = Arc::clone(&self.ctx);
                self.jobs.spawn(async move {
                    run_with_deadline(ctx, job).await;
                });
            }
        }
    }

    /// Execute an owner command against the registry and report the outcome
    /// back to the owner's chat. A storage failure degrades only this path.
    async fn handle_owner_command(&self, event: &InboundEvent, cmd: &ExclusionCommand) {
        let outcome = match cmd {
            ExclusionCommand::Exclude(id) => self.ctx.registry.add(id).map(|added| {
                if added {
                    format!("Número {id} adicionado à lista de exclusão.")
                } else {
                    format!("Número {id} já está na lista de exclusão.")
                }
            }),
            ExclusionCommand::Include(id) => self.ctx.registry.remove(id).map(|removed| {
                if removed {
                    format!("Número {id} removido da lista de exclusão.")
                } else {
                    format!("Número {id} não está na lista de exclusão.")
                }
            }),
        };

        let notice = match outcome {
            Ok(text) => {
                info!(id = cmd.identifier(), "exclusion list updated");
                text
            }
            Err(e) => {
                error!("exclusion list update failed: {e}");
                "Não foi possível atualizar a lista de exclusão.".to_string()
            }
        };

        if let Err(e) = self
            .ctx
            .transport
            .send_reply(&event.chat, &notice, None)
            .await
        {
            error!(chat = %event.chat, "failed to report command outcome: {e:#}");
        }
    }

    /// Wait for in-flight jobs up to the configured grace period, abandon
    /// the rest, and disconnect. Safe to call when nothing is running.
    pub async fn shutdown(&mut self) {
        let grace = self.ctx.shutdown_grace();
        if !self.jobs.is_empty() {
            info!(jobs = self.jobs.len(), "waiting for in-flight jobs");
        }
        let drained = tokio::time::timeout(grace, async {
            while self.jobs.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                jobs = self.jobs.len(),
                "jobs still running after {:?} grace, abandoning", grace
            );
            self.jobs.abort_all();
        }

        if let Err(e) = self.ctx.transport.disconnect().await {
            warn!("bridge disconnect failed: {e:#}");
        }
        info!("dispatcher stopped");
    }
}

/// Run one job under the engine deadline. On expiry the job future is
/// dropped at its current await point, so artifact cleanup and the timeout
/// notice happen here.
async fn run_with_deadline(ctx: Arc<EngineContext>, job: TranscriptionJob) {
    let deadline = ctx.job_deadline();
    match tokio::time::timeout(deadline, job.run(&ctx)).await {
        // Success and job-level failures already logged and noticed inside run().
        Ok(_) => {}
        Err(_) => {
            error!(
                chat = %job.chat(),
                "transcription job exceeded the {:?} deadline", deadline
            );
            job.cleanup().await;
            job.notify_failure(&ctx, &JobError::Timeout(deadline)).await;
        }
    }
}
