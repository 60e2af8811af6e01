use std::fmt;

use serde::Deserialize;

use super::common;

/// [Pod](https://kubernetes.io/docs/reference/kubernetes-api/workload-resources/pod-v1/), as far as
/// the watcher needs to observe it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    pub metadata: common::ResourceMetadata,
    #[serde(default)]
    pub status: PodStatus,
}

/// Partially implements [PodStatus](https://kubernetes.io/docs/reference/generated/kubernetes-api/v1.30/#podstatus-v1-core)
#[derive(Debug, Default, Clone, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodStatus {
    /// Current service state of pod. More info: https://kubernetes.io/docs/concepts/workloads/pods/pod-lifecycle#pod-conditions
    #[serde(default)]
    pub conditions: Vec<PodCondition>,

    /// The list has one entry per container in the manifest.
    #[serde(default)]
    pub container_statuses: Vec<ContainerStatus>,

    /// A human readable message indicating details about why the pod is in this condition.
    #[serde(default)]
    pub message: Option<String>,

    /// A brief CamelCase message indicating details about why the pod is in this state. e.g. 'Evicted'.
    #[serde(default)]
    pub reason: Option<String>,

    /// High-level summary of where the Pod is in its lifecycle. More info:
    /// https://kubernetes.io/docs/concepts/workloads/pods/pod-lifecycle#pod-phase
    #[serde(default)]
    pub phase: PodPhase,
}

impl PodStatus {
    /// Returns the exit code of the first terminated container, builder pods only run one.
    pub fn exit_code(&self) -> Option<i32> {
        self.container_statuses
            .iter()
            .find_map(|status| match &status.state {
                Some(ContainerState::Terminated(state)) => Some(state.exit_code),
                _ => None,
            })
    }

    /// How long the first terminated container ran, when the cluster reported both ends.
    pub fn run_time(&self) -> Option<time::Duration> {
        self.container_statuses
            .iter()
            .find_map(|status| match &status.state {
                Some(ContainerState::Terminated(ContainerStateTerminated {
                    started_at: Some(started_at),
                    finished_at: Some(finished_at),
                    ..
                })) => Some(*finished_at - *started_at),
                _ => None,
            })
    }
}

impl fmt::Display for PodStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.phase.fmt(f)?;
        if let Some(reason) = self.reason.as_deref() {
            write!(f, " ({reason})")?;
        }
        if let Some(message) = self.message.as_deref() {
            write!(f, ": {message}")?;
        }

        for condition in &self.conditions {
            // Conditions that hold are not interesting.
            if condition.status == "True" {
                continue;
            }
            write!(f, ", condition {} is {}", condition.r#type, condition.status)?;
            if let Some(reason) = condition.reason.as_deref() {
                write!(f, " because {reason}")?;
            }
        }

        for status in &self.container_statuses {
            let name = &status.name;
            match &status.state {
                Some(ContainerState::Waiting(state)) => {
                    write!(f, ", container {name:?} is waiting")?;
                    if let Some(reason) = state.reason.as_deref() {
                        write!(f, " because {reason}")?;
                    }
                }
                Some(ContainerState::Running(_)) => write!(f, ", container {name:?} is running")?,
                Some(ContainerState::Terminated(state)) => {
                    write!(
                        f,
                        ", container {name:?} terminated with exit code {}",
                        state.exit_code
                    )?;
                    if let Some(reason) = state.reason.as_deref() {
                        write!(f, " because {reason}")?;
                    }
                    if let Some(message) = state.message.as_deref() {
                        write!(f, " ({message})")?;
                    }
                }
                None => {}
            }
        }
        Ok(())
    }
}

/// Partially implements [PodCondition](https://kubernetes.io/docs/reference/generated/kubernetes-api/v1.30/#podcondition-v1-core)
#[derive(Debug, Clone, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodCondition {
    #[serde(default)]
    pub message: Option<String>,

    #[serde(default)]
    pub reason: Option<String>,

    /// Can be True, False, Unknown.
    pub status: String,

    pub r#type: String,
}

/// https://kubernetes.io/docs/reference/generated/kubernetes-api/v1.30/#containerstatus-v1-core
#[derive(Debug, Clone, Deserialize, Eq, PartialEq)]
pub struct ContainerStatus {
    pub name: String,

    #[serde(default)]
    pub state: Option<ContainerState>,
}

#[derive(Debug, Clone, Deserialize, Eq, PartialEq)]
pub enum ContainerState {
    #[serde(rename = "waiting")]
    Waiting(ContainerStateWaiting),
    #[serde(rename = "running")]
    Running(ContainerStateRunning),
    #[serde(rename = "terminated")]
    Terminated(ContainerStateTerminated),
}

#[derive(Debug, Clone, Deserialize, Eq, PartialEq)]
pub struct ContainerStateWaiting {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Eq, PartialEq)]
pub struct ContainerStateRunning {}

#[derive(Debug, Clone, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStateTerminated {
    pub exit_code: i32,

    #[serde(default)]
    pub reason: Option<String>,

    #[serde(default)]
    pub message: Option<String>,

    #[serde(default, with = "time::serde::rfc3339::option")]
    pub started_at: Option<time::OffsetDateTime>,

    #[serde(default, with = "time::serde::rfc3339::option")]
    pub finished_at: Option<time::OffsetDateTime>,
}

/// Field `phase` of [PodStatus](https://kubernetes.io/docs/reference/generated/kubernetes-api/v1.30/#podstatus-v1-core).
#[derive(Debug, Default, Clone, Copy, Deserialize, Eq, PartialEq)]
pub enum PodPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, PodPhase::Succeeded | PodPhase::Failed)
    }
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PodPhase::Pending => "Pending",
            PodPhase::Running => "Running",
            PodPhase::Succeeded => "Succeeded",
            PodPhase::Failed => "Failed",
            PodPhase::Unknown => "Unknown",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_pod_deserializes() {
        let pod: Pod = serde_json::from_str(
            r#"{
                "metadata": {
                    "name": "slugbuild-demo-12345678-0badf00d",
                    "namespace": "demo",
                    "labels": {"heritage": "slugbuild-demo-12345678-0badf00d"}
                },
                "status": {
                    "phase": "Failed",
                    "reason": "OOMKilled",
                    "message": "container ran out of memory",
                    "containerStatuses": [{
                        "name": "deis-slugbuilder",
                        "state": {"terminated": {"exitCode": 137, "reason": "OOMKilled"}}
                    }]
                }
            }"#,
        )
        .unwrap();

        assert_eq!(pod.status.phase, PodPhase::Failed);
        assert_eq!(pod.status.exit_code(), Some(137));
        assert_eq!(
            pod.status.to_string(),
            "Failed (OOMKilled): container ran out of memory, container \"deis-slugbuilder\" terminated with exit code 137 because OOMKilled"
        );
    }

    #[test]
    fn terminated_container_reports_run_time_and_message() {
        let status: PodStatus = serde_json::from_str(
            r#"{
                "phase": "Succeeded",
                "containerStatuses": [{
                    "name": "deis-dockerbuilder",
                    "state": {"terminated": {
                        "exitCode": 0,
                        "reason": "Completed",
                        "message": "pushed demo:git-abcdef12",
                        "startedAt": "2024-05-01T12:00:00Z",
                        "finishedAt": "2024-05-01T12:01:30Z"
                    }}
                }]
            }"#,
        )
        .unwrap();

        assert_eq!(status.exit_code(), Some(0));
        assert_eq!(status.run_time(), Some(time::Duration::seconds(90)));
        assert_eq!(
            status.to_string(),
            "Succeeded, container \"deis-dockerbuilder\" terminated with exit code 0 because Completed (pushed demo:git-abcdef12)"
        );

        let running: PodStatus = serde_json::from_str(
            r#"{"phase": "Running", "containerStatuses": [{"name": "b", "state": {"running": {"startedAt": "2024-05-01T12:00:00Z"}}}]}"#,
        )
        .unwrap();
        assert_eq!(running.run_time(), None);
        assert_eq!(running.exit_code(), None);
    }

    #[test]
    fn pod_without_status_is_pending() {
        let pod: Pod = serde_json::from_str(r#"{"metadata": {"name": "fresh"}}"#).unwrap();
        assert_eq!(pod.status.phase, PodPhase::Pending);
        assert!(!pod.status.phase.is_terminal());
    }
}
