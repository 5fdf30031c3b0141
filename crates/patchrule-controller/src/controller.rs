//! Controller — drives reconcile cycles on a requeue timer.
//!
//! Every `resync_interval` the controller lists rules and keeps one worker
//! task per rule. A worker reconciles its rule, then sleeps for the
//! returned requeue interval. It wakes early when a resync sees the rule's
//! `metadata.generation` change, and exits when the rule disappears.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::ports::{QueryEngine, ResourceStore, RuleStore};
use crate::reconciler::Reconciler;

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Maximum number of reconciles running at once.
    pub concurrent: usize,
    /// How often the rule list is re-read.
    pub resync_interval: Duration,
    /// Retry delay after a failed cycle.
    pub error_requeue: Duration,
    /// Only drive rules in these namespaces. Empty means all.
    pub namespaces: Vec<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            concurrent: 2,
            resync_interval: Duration::from_secs(10),
            error_requeue: Duration::from_secs(5),
            namespaces: Vec::new(),
        }
    }
}

/// Per-rule worker state.
struct WorkerSlot {
    handle: JoinHandle<()>,
    /// Last generation seen by a resync. Dropping it stops the worker.
    generation_tx: watch::Sender<i64>,
}

pub struct Controller<Q, S> {
    reconciler: Arc<Reconciler<Q, S>>,
    config: ControllerConfig,
}

impl<Q, S> Controller<Q, S>
where
    Q: QueryEngine + 'static,
    S: ResourceStore + RuleStore + 'static,
{
    pub fn new(reconciler: Reconciler<Q, S>, config: ControllerConfig) -> Self {
        Self {
            reconciler: Arc::new(reconciler),
            config,
        }
    }

    pub fn reconciler(&self) -> &Reconciler<Q, S> {
        &self.reconciler
    }

    fn watches(&self, namespace: &str) -> bool {
        self.config.namespaces.is_empty() || self.config.namespaces.iter().any(|n| n == namespace)
    }

    /// Run until `shutdown` changes.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            concurrent = self.config.concurrent,
            resync_secs = self.config.resync_interval.as_secs(),
            namespaces = ?self.config.namespaces,
            "controller started"
        );

        let permits = Arc::new(Semaphore::new(self.config.concurrent.max(1)));
        let mut workers: HashMap<String, WorkerSlot> = HashMap::new();

        loop {
            self.resync(&mut workers, &permits, &shutdown).await;

            tokio::select! {
                _ = tokio::time::sleep(self.config.resync_interval) => {}
                _ = shutdown.changed() => {
                    info!("controller shutting down");
                    break;
                }
            }
        }

        for (key, slot) in workers.drain() {
            drop(slot.generation_tx);
            if let Err(e) = slot.handle.await {
                warn!(rule = %key, error = %e, "worker ended abnormally");
            }
        }
        info!("all workers stopped");
    }

    /// Bring the worker set in line with the stored rules.
    async fn resync(
        &self,
        workers: &mut HashMap<String, WorkerSlot>,
        permits: &Arc<Semaphore>,
        shutdown: &watch::Receiver<bool>,
    ) {
        let rules = match self.reconciler.store().list_rules().await {
            Ok(rules) => rules,
            Err(e) => {
                error!(error = %e, "failed to list rules");
                return;
            }
        };

        // Workers that exited on their own are respawned below if needed.
        workers.retain(|_, slot| !slot.handle.is_finished());

        let mut seen = Vec::with_capacity(rules.len());
        for rule in rules {
            if !self.watches(&rule.metadata.namespace) {
                continue;
            }
            let key = rule.key();
            let generation = rule.metadata.generation;
            seen.push(key.clone());

            if let Some(slot) = workers.get(&key) {
                slot.generation_tx.send_if_modified(|current| {
                    if *current == generation {
                        return false;
                    }
                    *current = generation;
                    true
                });
                continue;
            }

            let (generation_tx, generation_rx) = watch::channel(generation);
            let handle = tokio::spawn(run_worker(
                Arc::clone(&self.reconciler),
                rule.metadata.namespace.clone(),
                rule.metadata.name.clone(),
                Arc::clone(permits),
                self.config.error_requeue,
                generation_rx,
                shutdown.clone(),
            ));
            debug!(rule = %key, generation, "worker started");
            workers.insert(
                key,
                WorkerSlot {
                    handle,
                    generation_tx,
                },
            );
        }

        // Dropping the sender tells the worker its rule is gone.
        workers.retain(|key, _| {
            let keep = seen.contains(key);
            if !keep {
                debug!(rule = %key, "rule removed, stopping worker");
            }
            keep
        });
        self.reconciler.metrics().set_rules_watched(workers.len());
    }
}

/// Reconcile loop for a single rule.
async fn run_worker<Q, S>(
    reconciler: Arc<Reconciler<Q, S>>,
    namespace: String,
    name: String,
    permits: Arc<Semaphore>,
    error_requeue: Duration,
    mut generation: watch::Receiver<i64>,
    mut shutdown: watch::Receiver<bool>,
) where
    Q: QueryEngine,
    S: ResourceStore + RuleStore,
{
    let key = format!("{namespace}/{name}");

    loop {
        if *shutdown.borrow() {
            break;
        }
        generation.borrow_and_update();

        let result = {
            let Ok(_permit) = permits.acquire().await else {
                break;
            };
            reconciler.reconcile(&namespace, &name).await
        };

        let wait = match result {
            Ok(action) => action.requeue_after(),
            Err(e) => {
                error!(rule = %key, error = %e, conflict = e.is_conflict(), "reconcile failed");
                Some(error_requeue)
            }
        };
        let sleep = async move {
            match wait {
                Some(after) => tokio::time::sleep(after).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = sleep => {}
            changed = generation.changed() => {
                if changed.is_err() {
                    break;
                }
                debug!(rule = %key, "rule changed, reconciling early");
            }
            _ = shutdown.changed() => break,
        }
    }
    debug!(rule = %key, "worker stopped");
}
