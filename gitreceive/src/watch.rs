//! Waiting for a builder pod to reach a state, by polling a pod store.

mod progress;

use std::{thread, time};

use log::debug;
pub use progress::*;

use crate::{
    kubectl::{LabelSelector, Pod, PodPhase},
    Result,
};

/// Read access to pods. Results may lag behind the cluster.
pub trait PodStore {
    fn list(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<Pod>>;
}

/// Progress line printed while waiting for a builder to start.
pub const PROGRESS_MESSAGE: &str = "...";

pub struct Deadline(time::Instant);

impl Deadline {
    /// Create a new deadline that times out after the provided duration.
    pub fn after(timeout: time::Duration) -> Self {
        Self(time::Instant::now() + timeout)
    }

    /// Sleeps for `duration`, or until the deadline if that comes first. Returns Err without
    /// sleeping once the deadline has passed.
    pub fn sleep(&self, duration: time::Duration) -> Result<(), Expired> {
        let remaining = self.0.saturating_duration_since(time::Instant::now());
        if remaining.is_zero() {
            return Err(Expired);
        }
        thread::sleep(duration.min(remaining));
        Ok(())
    }
}

#[derive(Debug)]
pub struct Expired;

/// What a condition concluded from a single observation of the pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionOutcome {
    Pending,
    Satisfied,
    Failed { reason: String, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error("giving up; pod went into failed status: [{reason}]: {message}")]
    PodFailed { reason: String, message: String },
    #[error("timed out after {timeout:?} waiting for pod {pod:?}")]
    Timeout { pod: String, timeout: time::Duration },
    #[error("{what} must be a positive duration")]
    InvalidDuration { what: &'static str },
}

/// Satisfied once the pod runs or has finished. A failed pod is an error carrying its reason and
/// message.
pub fn running_or_terminal(pod: &Pod) -> ConditionOutcome {
    match pod.status.phase {
        PodPhase::Running | PodPhase::Succeeded => ConditionOutcome::Satisfied,
        PodPhase::Failed => ConditionOutcome::Failed {
            reason: pod.status.reason.clone().unwrap_or_default(),
            message: pod.status.message.clone().unwrap_or_default(),
        },
        PodPhase::Pending | PodPhase::Unknown => ConditionOutcome::Pending,
    }
}

/// Satisfied once the pod has finished, successfully or not. The caller inspects the phase.
pub fn terminal(pod: &Pod) -> ConditionOutcome {
    if pod.status.phase.is_terminal() {
        ConditionOutcome::Satisfied
    } else {
        ConditionOutcome::Pending
    }
}

fn require_positive(what: &'static str, duration: time::Duration) -> Result<(), WaitError> {
    if duration.is_zero() {
        Err(WaitError::InvalidDuration { what })
    } else {
        Ok(())
    }
}

/// Polls `store` for the pod labelled `heritage=<pod_name>` every `interval`, starting
/// immediately, until `condition` is satisfied or fails, or `timeout` has elapsed.
///
/// An empty list or a failing query counts as not satisfied yet: the store may not have seen the
/// pod yet and there is no way to tell that apart from a pod that will never appear.
pub fn wait_for_condition<C>(
    store: &dyn PodStore,
    namespace: &str,
    pod_name: &str,
    condition: C,
    interval: time::Duration,
    timeout: time::Duration,
) -> Result<Pod, WaitError>
where
    C: Fn(&Pod) -> ConditionOutcome,
{
    require_positive("poll interval", interval)?;
    require_positive("timeout", timeout)?;

    let selector = LabelSelector::heritage(pod_name);
    let deadline = Deadline::after(timeout);
    let mut last_phase = None;

    loop {
        match store.list(namespace, &selector) {
            Ok(pods) => match pods.into_iter().next() {
                Some(pod) => {
                    if last_phase != Some(pod.status.phase) {
                        debug!("Pod {namespace}/{pod_name} status: {}", pod.status);
                        last_phase = Some(pod.status.phase);
                    }
                    match condition(&pod) {
                        ConditionOutcome::Satisfied => return Ok(pod),
                        ConditionOutcome::Failed { reason, message } => {
                            return Err(WaitError::PodFailed { reason, message })
                        }
                        ConditionOutcome::Pending => {}
                    }
                }
                None => debug!("No pod matches {selector} in {namespace} yet"),
            },
            Err(error) => debug!("Listing pods matching {selector} failed: {error}"),
        }

        deadline.sleep(interval).map_err(|Expired| WaitError::Timeout {
            pod: pod_name.to_owned(),
            timeout,
        })?;
    }
}

/// Waits for the builder to be running or done, whichever comes first, printing progress every
/// `tick` meanwhile.
pub fn wait_for_pod(
    store: &dyn PodStore,
    namespace: &str,
    pod_name: &str,
    tick: time::Duration,
    interval: time::Duration,
    timeout: time::Duration,
) -> Result<(), WaitError> {
    require_positive("progress tick", tick)?;
    let progress = Progress::stdout(PROGRESS_MESSAGE, tick);
    let result = wait_for_condition(
        store,
        namespace,
        pod_name,
        running_or_terminal,
        interval,
        timeout,
    );
    progress.stop();
    result.map(drop)
}

/// Waits for the builder to finish and returns it in its final state.
pub fn wait_for_pod_end(
    store: &dyn PodStore,
    namespace: &str,
    pod_name: &str,
    interval: time::Duration,
    timeout: time::Duration,
) -> Result<Pod, WaitError> {
    wait_for_condition(store, namespace, pod_name, terminal, interval, timeout)
}
