use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::backoff::RetryPolicy;
use super::registry::{Registration, RegistryError, SyncRegistry};
use crate::connectivity::Connectivity;
use crate::worker::{BackgroundWorker, WorkerEvent, WorkerResponse};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The handler finished cleanly and the registration was released.
    Completed,
    /// The handler stopped because the network went away; try again once online.
    WaitForOnline,
    /// The handler left work behind; the registration stays and fires again later.
    Retry(Duration),
    /// Too many failed dispatches in a row. The registration stays and fires
    /// again after the next reconnect, with a fresh attempt budget.
    Exhausted,
}

/// Fires pending sync registrations at the background worker whenever the
/// network is reachable, independent of any open session.
pub struct SyncScheduler {
    registry: SyncRegistry,
    connectivity: Connectivity,
    worker: Arc<BackgroundWorker>,
    policy: RetryPolicy,
    failures: HashMap<String, u32>,
}

impl SyncScheduler {
    pub fn new(
        registry: SyncRegistry,
        connectivity: Connectivity,
        worker: Arc<BackgroundWorker>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            registry,
            connectivity,
            worker,
            policy,
            failures: HashMap::new(),
        }
    }

    /// Dispatches every pending registration once, oldest first.
    pub async fn dispatch_pending(
        &mut self,
    ) -> Result<Vec<(String, DispatchOutcome)>, RegistryError> {
        let pending = self.registry.pending().await?;
        let mut outcomes = Vec::with_capacity(pending.len());
        for registration in pending {
            if !self.connectivity.is_online() {
                outcomes.push((registration.tag, DispatchOutcome::WaitForOnline));
                continue;
            }
            let outcome = self.dispatch(&registration).await?;
            outcomes.push((registration.tag, outcome));
        }
        Ok(outcomes)
    }

    async fn dispatch(
        &mut self,
        registration: &Registration,
    ) -> Result<DispatchOutcome, RegistryError> {
        let tag = registration.tag.as_str();
        let event = WorkerEvent::Sync {
            tag: tag.to_string(),
        };
        let failed = match self.worker.handle(event).await {
            Ok(WorkerResponse::Synced(report)) if report.is_clean() => false,
            Ok(WorkerResponse::Synced(report)) if report.aborted => {
                tracing::info!(tag, "sync interrupted by connectivity loss");
                return Ok(DispatchOutcome::WaitForOnline);
            }
            Ok(WorkerResponse::Synced(report)) => {
                tracing::warn!(
                    tag,
                    transport_failures = report.transport_failures,
                    store_errors = report.store_errors,
                    "sync left entries behind"
                );
                true
            }
            Ok(_) => false,
            Err(err) => {
                tracing::warn!(tag, error = %err, "sync handler failed");
                true
            }
        };

        if !failed {
            self.failures.remove(tag);
            if !self.registry.release(registration).await? {
                tracing::debug!(tag, "registration renewed during dispatch, keeping it");
            }
            return Ok(DispatchOutcome::Completed);
        }

        let attempts = self.failures.entry(tag.to_string()).or_insert(0);
        *attempts += 1;
        if self.policy.exhausted(*attempts) {
            let attempts = *attempts;
            self.failures.remove(tag);
            tracing::warn!(tag, attempts, "sync attempts exhausted, waiting for a reconnect");
            return Ok(DispatchOutcome::Exhausted);
        }
        let delay = self.policy.delay(*attempts - 1);
        tracing::info!(tag, attempt = *attempts, delay_ms = delay.as_millis() as u64, "sync will be retried");
        Ok(DispatchOutcome::Retry(delay))
    }

    /// Drives dispatch forever. Stops only when the task is aborted.
    pub async fn run(mut self) {
        loop {
            self.connectivity.wait_online().await;

            let outcomes = match self.dispatch_pending().await {
                Ok(outcomes) => outcomes,
                Err(err) => {
                    tracing::error!(error = %err, "failed to read sync registrations");
                    tokio::time::sleep(self.policy.delay(0)).await;
                    continue;
                }
            };

            let retry_after = outcomes
                .iter()
                .filter_map(|(_, outcome)| match outcome {
                    DispatchOutcome::Retry(delay) => Some(*delay),
                    _ => None,
                })
                .min();
            let waiting_for_network = outcomes
                .iter()
                .any(|(_, outcome)| *outcome == DispatchOutcome::WaitForOnline);
            let exhausted = outcomes
                .iter()
                .any(|(_, outcome)| *outcome == DispatchOutcome::Exhausted);

            match retry_after {
                Some(delay) => {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.registry.registered() => {}
                    }
                }
                None if waiting_for_network => self.wait_for_reconnect().await,
                None if exhausted => {
                    tokio::select! {
                        _ = self.wait_for_disconnect() => {}
                        _ = self.registry.registered() => {}
                        _ = tokio::time::sleep(self.policy.max_delay()) => {}
                    }
                }
                None => self.registry.registered().await,
            }
        }
    }

    /// The loop head blocks until the network is back. If it already came back
    /// while the batch was winding down, pause briefly before dispatching again.
    async fn wait_for_reconnect(&self) {
        if self.connectivity.is_online() {
            tokio::time::sleep(self.policy.delay(0)).await;
        }
    }

    /// Resolves once the network is seen offline, so the loop head then waits
    /// for the following reconnect.
    async fn wait_for_disconnect(&self) {
        let mut rx = self.connectivity.subscribe();
        // The watch sender lives in `self.connectivity`, so the channel stays open.
        let _ = rx.wait_for(|status| !status.is_online()).await;
    }
}
