//! Pod membership tracking.
//!
//! Consumes the directory's list+watch stream and raises edge-triggered
//! events: `Appeared` once per pod that passes the label filter, `Removed`
//! once per tracked pod that leaves the directory. Membership is tracked by
//! identity, so a resync after a watch failure never re-announces pods that
//! are already tracked.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::directory::{DirectoryError, DirectoryEvent, PodDirectory, PodId, PodSnapshot, PodUnit};
use crate::filter::LabelFilter;

/// Capacity of the membership event channel.
const EVENT_BUFFER: usize = 64;

/// Delay before re-listing after a watch failure.
const RESYNC_BACKOFF: Duration = Duration::from_secs(1);

/// Edge-triggered membership change.
#[derive(Debug, Clone)]
pub enum MembershipEvent {
    /// A pod matching the filter entered the tracked set. Emitted at most
    /// once per identity while the pod is tracked.
    Appeared(PodUnit),
    /// A tracked pod was deleted from the directory.
    Removed(PodId),
}

/// Handle to a running tracker. Dropping the handle also stops the tracker.
pub struct TrackerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl TrackerHandle {
    /// Stop the tracker and wait for its watch loop to terminate. The event
    /// stream closes once buffered events have drained.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

/// Membership tracker for one namespace.
pub struct MembershipTracker;

impl MembershipTracker {
    /// Perform the initial list and start the watch loop.
    ///
    /// A failed initial list is a startup error and is surfaced to the
    /// caller; later directory failures are recovered by resynchronizing.
    pub async fn start(
        directory: Arc<dyn PodDirectory>,
        namespace: impl Into<String>,
        filter: LabelFilter,
    ) -> Result<(TrackerHandle, mpsc::Receiver<MembershipEvent>), DirectoryError> {
        let namespace = namespace.into();
        let initial = directory.list(&namespace).await?;

        let (events, receiver) = mpsc::channel(EVENT_BUFFER);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(run_loop(
            directory,
            namespace,
            filter,
            initial,
            events,
            shutdown_rx,
        ));

        Ok((TrackerHandle { shutdown, task }, receiver))
    }
}

async fn run_loop(
    directory: Arc<dyn PodDirectory>,
    namespace: String,
    filter: LabelFilter,
    initial: PodSnapshot,
    events: mpsc::Sender<MembershipEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut known: HashSet<PodId> = HashSet::new();

    // Initial sync: appeared events in list order, before any watch event.
    let mut resume = initial.resume.clone();
    if !apply_snapshot(initial, &filter, &mut known, &events, &mut shutdown).await {
        return;
    }

    loop {
        let stream = match directory.watch(&namespace, resume.as_deref()).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, namespace = %namespace, "Failed to open watch, resynchronizing");
                match resync(&directory, &namespace, &filter, &mut known, &events, &mut shutdown)
                    .await
                {
                    Some(snapshot_resume) => {
                        resume = snapshot_resume;
                        continue;
                    }
                    None => return,
                }
            }
        };

        debug!(namespace = %namespace, "Watch established");
        let mut stream = stream;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(namespace = %namespace, "Membership tracker stopping");
                        return;
                    }
                }
                event = stream.next() => match event {
                    Some(Ok(DirectoryEvent::Added(unit))) => {
                        if filter.matches(&unit.labels) && known.insert(unit.id.clone()) {
                            debug!(pod = %unit.id, "Pod appeared");
                            if !deliver(&events, &mut shutdown, MembershipEvent::Appeared(unit))
                                .await
                            {
                                return;
                            }
                        }
                    }
                    // Label changes never start or stop tracking mid-life.
                    Some(Ok(DirectoryEvent::Modified(_))) => {}
                    Some(Ok(DirectoryEvent::Deleted(unit))) => {
                        if known.remove(&unit.id) {
                            debug!(pod = %unit.id, "Pod removed");
                            if !deliver(&events, &mut shutdown, MembershipEvent::Removed(unit.id))
                                .await
                            {
                                return;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, namespace = %namespace, "Watch error, resynchronizing");
                        break;
                    }
                    None => {
                        info!(namespace = %namespace, "Watch stream ended, resynchronizing");
                        break;
                    }
                }
            }
        }

        match resync(&directory, &namespace, &filter, &mut known, &events, &mut shutdown).await {
            Some(snapshot_resume) => resume = snapshot_resume,
            None => return,
        }
    }
}

/// Re-list after a watch gap and reconcile against the tracked set:
/// appeared for new matches (in list order), removed for tracked pods that
/// vanished during the gap. Retries until the list succeeds. Returns the
/// new resume token, or `None` on shutdown or closed event channel.
async fn resync(
    directory: &Arc<dyn PodDirectory>,
    namespace: &str,
    filter: &LabelFilter,
    known: &mut HashSet<PodId>,
    events: &mpsc::Sender<MembershipEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<Option<String>> {
    loop {
        if !sleep_unless_stopped(RESYNC_BACKOFF, shutdown).await {
            return None;
        }
        match directory.list(namespace).await {
            Ok(snapshot) => {
                let resume = snapshot.resume.clone();
                let listed: HashSet<PodId> =
                    snapshot.units.iter().map(|u| u.id.clone()).collect();

                if !apply_snapshot(snapshot, filter, known, events, shutdown).await {
                    return None;
                }

                let vanished: Vec<PodId> =
                    known.difference(&listed).cloned().collect();
                for id in vanished {
                    known.remove(&id);
                    debug!(pod = %id, "Pod removed during watch gap");
                    if !deliver(events, shutdown, MembershipEvent::Removed(id)).await {
                        return None;
                    }
                }

                info!(namespace = %namespace, tracked = known.len(), "Resynchronized");
                return Some(resume);
            }
            Err(e) => {
                warn!(error = %e, namespace = %namespace, "Resync list failed, retrying");
            }
        }
    }
}

/// Emit appeared events for snapshot pods that match the filter and are not
/// yet tracked, in list order. Returns false if the event channel closed or
/// shutdown fired.
async fn apply_snapshot(
    snapshot: PodSnapshot,
    filter: &LabelFilter,
    known: &mut HashSet<PodId>,
    events: &mpsc::Sender<MembershipEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    for unit in snapshot.units {
        if filter.matches(&unit.labels) && known.insert(unit.id.clone()) {
            debug!(pod = %unit.id, "Pod appeared");
            if !deliver(events, shutdown, MembershipEvent::Appeared(unit)).await {
                return false;
            }
        }
    }
    true
}

/// Deliver one membership event without blocking shutdown on a full
/// channel. The shutdown channel only ever carries `true`, so any change
/// (or a dropped sender) means stop. Returns false when the run loop
/// should exit.
async fn deliver(
    events: &mpsc::Sender<MembershipEvent>,
    shutdown: &mut watch::Receiver<bool>,
    event: MembershipEvent,
) -> bool {
    tokio::select! {
        sent = events.send(event) => sent.is_ok(),
        _ = shutdown.changed() => false,
    }
}

/// Wait out a backoff, returning false if shutdown fires first.
async fn sleep_unless_stopped(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        changed = shutdown.changed() => changed.is_ok() && !*shutdown.borrow(),
    }
}
