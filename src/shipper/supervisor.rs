use super::worker::{PartitionWorker, WorkerContext, WorkerError, WorkerExit};
use crate::falcon::StreamDescriptor;
use rand::Rng;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Randomized app ids are padded with digits up to this length (plus the dash).
const RANDOM_APP_ID_LEN: usize = 31;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("shutdown requested while discovering streams")]
    ShutdownDuringDiscovery,
}

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub app_id: String,
    /// Wait between failed discovery attempts
    pub retry_timer: Duration,
    /// Failed discovery attempts before randomizing the app id; 0 disables
    pub appid_random: u32,
    /// Interval between liveness checks
    pub keepalive: Duration,
    /// How long to wait for workers to stop after shutdown
    pub shutdown_grace: Duration,
}

/// A running worker task and the descriptor it was started with.
pub struct WorkerHandle {
    pub partition: u32,
    pub descriptor: StreamDescriptor,
    task: JoinHandle<Result<WorkerExit, WorkerError>>,
}

impl WorkerHandle {
    pub fn is_alive(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Owns the worker set: discovers partitions, starts one worker each, and
/// restarts dead workers from freshly discovered descriptors.
pub struct Supervisor {
    settings: SupervisorSettings,
    ctx: WorkerContext,
    workers: BTreeMap<u32, WorkerHandle>,
    /// Dead partitions whose re-discovery has not produced a descriptor yet
    pending_restart: BTreeSet<u32>,
}

impl Supervisor {
    pub fn new(settings: SupervisorSettings, ctx: WorkerContext) -> Self {
        Self {
            settings,
            ctx,
            workers: BTreeMap::new(),
            pending_restart: BTreeSet::new(),
        }
    }

    /// Discover streams, retrying until something is found or shutdown is signalled.
    /// With `partition` set, only that partition's descriptor is returned.
    pub async fn discover(
        &self,
        partition: Option<u32>,
    ) -> Result<Vec<StreamDescriptor>, SupervisorError> {
        if partition.is_none() {
            info!("Getting available event streams");
        }

        let shutdown = &self.ctx.shutdown;
        let mut attempts: u32 = 1;

        loop {
            if shutdown.is_cancelled() {
                return Err(SupervisorError::ShutdownDuringDiscovery);
            }

            let app_id = if self.settings.appid_random != 0 && attempts > self.settings.appid_random
            {
                let random_id = random_app_id(&self.settings.app_id);
                info!(
                    app_id = %self.settings.app_id,
                    random_app_id = %random_id,
                    "Could not retrieve streams with app id, trying a random one"
                );
                random_id
            } else {
                self.settings.app_id.clone()
            };

            let result = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Err(SupervisorError::ShutdownDuringDiscovery),
                result = self.ctx.api.list_streams(&app_id) => result,
            };

            match result {
                Ok(streams) if !streams.is_empty() => {
                    debug!(
                        app_id = %app_id,
                        streams = streams.len(),
                        partition = ?partition,
                        "Got streams"
                    );
                    return Ok(match partition {
                        Some(p) => streams.into_iter().filter(|s| s.partition == p).collect(),
                        None => streams,
                    });
                }
                Ok(_) => error!(
                    app_id = %app_id,
                    attempt = attempts,
                    "Could not find any streams in response. Make sure app id isn't used for multiple streams. Retrying..."
                ),
                Err(e) => error!(
                    app_id = %app_id,
                    attempt = attempts,
                    error = %e,
                    "Stream discovery failed. Retrying..."
                ),
            }

            attempts += 1;

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Err(SupervisorError::ShutdownDuringDiscovery),
                _ = tokio::time::sleep(self.settings.retry_timer) => {}
            }
        }
    }

    /// Run until shutdown is signalled.
    pub async fn run(mut self) -> Result<(), SupervisorError> {
        let streams = self.discover(None).await?;
        info!(streams = streams.len(), "Stream URL(s) received");

        for descriptor in streams {
            self.start_worker(descriptor);
        }

        loop {
            match self.check_workers().await {
                Ok(()) => {}
                Err(SupervisorError::ShutdownDuringDiscovery) => break,
            }

            tokio::select! {
                biased;
                _ = self.ctx.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.settings.keepalive) => {}
            }
        }

        info!(workers = self.worker_count(), "Supervisor stopping, waiting for workers");
        let workers = std::mem::take(&mut self.workers);
        drain_workers(workers, self.settings.shutdown_grace, self.ctx.settings.error_chains).await;
        Ok(())
    }

    fn start_worker(&mut self, descriptor: StreamDescriptor) {
        let worker = PartitionWorker::new(descriptor.clone(), self.ctx.clone());
        let partition = worker.partition();
        let span = tracing::info_span!("partition", partition);
        let task = tokio::spawn(worker.run().instrument(span));

        info!(partition, "Started stream worker");

        self.pending_restart.remove(&partition);
        self.workers.insert(
            partition,
            WorkerHandle {
                partition,
                descriptor,
                task,
            },
        );
    }

    /// Reap finished workers and restart them, unless shutting down.
    async fn check_workers(&mut self) -> Result<(), SupervisorError> {
        let dead: Vec<u32> = self
            .workers
            .values()
            .filter(|handle| !handle.is_alive())
            .map(|handle| handle.partition)
            .collect();

        for partition in dead {
            let Some(handle) = self.workers.remove(&partition) else {
                continue;
            };
            log_worker_exit(partition, handle.task.await, self.ctx.settings.error_chains);
            self.pending_restart.insert(partition);
        }

        if self.ctx.shutdown.is_cancelled() {
            return Ok(());
        }

        let pending: Vec<u32> = self.pending_restart.iter().copied().collect();
        for partition in pending {
            error!(partition, "Dead worker detected, restarting");

            let mut streams = self.discover(Some(partition)).await?;
            match streams.pop() {
                Some(descriptor) => self.start_worker(descriptor),
                None => warn!(
                    partition,
                    "Partition missing from discovery response, retrying on next check"
                ),
            }
        }

        debug!(
            partitions = ?self.workers.keys().collect::<Vec<_>>(),
            "Checked workers"
        );

        Ok(())
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

/// Wait for all workers under one deadline, then abort whatever is still running.
async fn drain_workers(workers: BTreeMap<u32, WorkerHandle>, grace: Duration, error_chains: bool) {
    let mut tasks: Vec<(u32, JoinHandle<Result<WorkerExit, WorkerError>>)> = workers
        .into_iter()
        .map(|(partition, handle)| (partition, handle.task))
        .collect();

    let joined = tokio::time::timeout(
        grace,
        futures::future::join_all(tasks.iter_mut().map(|(_, task)| task)),
    )
    .await;

    match joined {
        Ok(results) => {
            for ((partition, _), result) in tasks.iter().zip(results) {
                log_worker_exit(*partition, result, error_chains);
            }
        }
        Err(_) => {
            for (partition, task) in tasks {
                if task.is_finished() {
                    log_worker_exit(partition, task.await, error_chains);
                } else {
                    warn!(partition, "Worker did not stop in time, aborting");
                    task.abort();
                }
            }
        }
    }
}

fn log_worker_exit(
    partition: u32,
    result: Result<Result<WorkerExit, WorkerError>, tokio::task::JoinError>,
    error_chains: bool,
) {
    match result {
        Ok(Ok(WorkerExit::Shutdown)) => debug!(partition, "Worker stopped for shutdown"),
        Ok(Ok(WorkerExit::StreamClosed)) => warn!(partition, "Worker exited: stream closed"),
        Ok(Err(e)) if error_chains => error!(partition, error = ?e, "Worker exited with error"),
        Ok(Err(e)) => error!(partition, error = %e, "Worker exited with error"),
        Err(e) => error!(partition, error = %e, "Worker task failed"),
    }
}

/// `app_id` plus a dash and random digits, 32 characters in total for short ids.
pub fn random_app_id(app_id: &str) -> String {
    let suffix_len = RANDOM_APP_ID_LEN.saturating_sub(app_id.len());
    let mut rng = rand::thread_rng();
    let suffix: String = (0..suffix_len)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect();

    format!("{}-{}", app_id, suffix)
}
