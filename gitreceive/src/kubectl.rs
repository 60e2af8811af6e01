use log::{debug, info};

use crate::{
    health::{ListError, NamespaceLister},
    process,
    receive::{LogFollower, WorkloadSubmitter},
    secret::{EnvSecret, SecretStore, SecretStoreError},
    watch::PodStore,
    workload::WorkloadSpec,
    Result,
};

mod common;
pub use common::*;

mod namespace;
pub use namespace::*;

mod pod;
pub use pod::*;

/// Talks to the cluster through the `kubectl` binary.
#[derive(Debug, Clone, Default)]
pub struct Kubectl {
    server: Option<String>,
}

impl Kubectl {
    /// Without a server kubectl discovers its configuration itself, which inside the cluster means
    /// the service account of the pod running the hook.
    pub fn new(server: Option<String>) -> Self {
        Self { server }
    }

    /// Returns the kubectl command where connection arguments have already been set.
    fn kubectl(&self) -> process::Command {
        let command = process::Command::new("kubectl");
        match self.server.as_deref() {
            Some(server) => process::args!(command, "--server", server),
            None => command,
        }
    }

    /// The input is written to stdin and should be a JSON formatted kubernetes object. Returns the
    /// unchecked output so callers can interpret failures.
    fn try_write(&self, verb: &str, input: &str) -> Result<process::Output, process::Error> {
        process::args!(self.kubectl(), verb, "--output=json", "-f", "-")
            .try_output_with_input(input.as_bytes().to_owned())
    }

    /// The input is written to stdin and should be a [YAML or JSON formatted kubernetes
    /// configuration](https://kubernetes.io/docs/tasks/manage-kubernetes-objects/imperative-config/).
    pub fn create(&self, input: &str) -> Result<ResourceHandle> {
        let output = self.try_write("create", input)?;

        if !output.status.success() {
            debug!("Rejected object: {input}");
        }
        let output = output.require_success()?;

        let root: CreateOutput = serde_json::from_slice(&output.stdout)?;

        Ok(root.into())
    }

    pub fn pods(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<Pod>> {
        let output = process::args!(
            self.kubectl(),
            "get",
            "pods",
            "--namespace",
            namespace,
            format!("--selector={selector}"),
            "--output=json"
        )
        .output()?;

        Ok(serde_json::from_slice::<GetResource<_>>(&output.stdout)?.items)
    }

    pub fn namespaces(&self) -> Result<NamespaceList> {
        let output =
            process::args!(self.kubectl(), "get", "namespaces", "--output=json").output()?;

        Ok(serde_json::from_slice::<GetResource<_>>(&output.stdout)?.items)
    }

    pub fn follow_pod_logs(&self, namespace: &str, pod_name: &str) -> Result<()> {
        process::args!(
            self.kubectl(),
            "logs",
            "--namespace",
            namespace,
            "--follow",
            pod_name
        )
        .status()?;
        Ok(())
    }
}

fn is_already_exists(output: &process::Output) -> bool {
    output
        .stderr
        .starts_with(b"Error from server (AlreadyExists)")
}

impl WorkloadSubmitter for Kubectl {
    fn submit(&self, workload: &WorkloadSpec) -> Result<()> {
        let ResourceHandle { namespace, name } = self.create(&serde_json::to_string(workload)?)?;
        info!("Created Pod {namespace}/{name}");
        Ok(())
    }
}

impl PodStore for Kubectl {
    fn list(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<Pod>> {
        self.pods(namespace, selector)
    }
}

fn secret_json(secret: &EnvSecret) -> Result<String, SecretStoreError> {
    serde_json::to_string(secret).map_err(|error| SecretStoreError::Other(error.into()))
}

impl SecretStore for Kubectl {
    fn create(&self, secret: &EnvSecret) -> Result<(), SecretStoreError> {
        let input = secret_json(secret)?;
        let output = self
            .try_write("create", &input)
            .map_err(|error| SecretStoreError::Other(error.into()))?;

        if output.status.success() {
            Ok(())
        } else if is_already_exists(&output) {
            Err(SecretStoreError::AlreadyExists {
                name: secret.name().to_owned(),
            })
        } else {
            Err(SecretStoreError::Other(output.into_error().into()))
        }
    }

    fn update(&self, secret: &EnvSecret) -> Result<(), SecretStoreError> {
        let input = secret_json(secret)?;
        self.try_write("replace", &input)
            .and_then(process::Output::require_success)
            .map_err(|error| SecretStoreError::Other(error.into()))?;
        Ok(())
    }
}

impl LogFollower for Kubectl {
    fn follow_logs(&self, namespace: &str, pod_name: &str) -> Result<()> {
        self.follow_pod_logs(namespace, pod_name)
    }
}

impl NamespaceLister for Kubectl {
    fn list(&self) -> Result<NamespaceList, ListError> {
        self.namespaces()
    }
}

#[derive(Debug)]
pub struct ResourceHandle {
    pub namespace: String,
    pub name: String,
}

impl From<CreateOutput> for ResourceHandle {
    fn from(value: CreateOutput) -> Self {
        let CreateOutputMetadata { namespace, name } = value.metadata;
        Self { namespace, name }
    }
}

#[derive(serde::Deserialize)]
struct CreateOutput {
    metadata: CreateOutputMetadata,
}

#[derive(serde::Deserialize)]
struct CreateOutputMetadata {
    namespace: String,
    name: String,
}

pub mod annotation {
    pub const VERSION: &str = "builder.deis.io/gitreceive-version";
}
