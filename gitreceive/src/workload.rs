//! Assembles the builder pod for a single build. Nothing in here talks to the cluster.

mod name;

use std::collections::BTreeMap;

pub use name::*;
use serde::Serialize;

use crate::kubectl::{self, ResourceMetadata, HERITAGE_LABEL};

/// The configuration of an application: variable name to JSON value.
pub type AppEnv = BTreeMap<String, serde_json::Value>;

/// Renders an application config value the way it is exposed to the builder: strings verbatim,
/// everything else as JSON text.
pub fn env_value_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(value) => value.clone(),
        other => other.to_string(),
    }
}

// Names of the environment variables read by the builder images.
pub const TAR_PATH: &str = "TAR_PATH";
pub const PUT_PATH: &str = "PUT_PATH";
pub const CACHE_PATH: &str = "CACHE_PATH";
pub const DEBUG: &str = "DEIS_DEBUG";
pub const SOURCE_VERSION: &str = "SOURCE_VERSION";
pub const IMAGE_NAME: &str = "IMG_NAME";
pub const BUILDER_STORAGE: &str = "BUILDER_STORAGE";
pub const BUILDPACK_URL: &str = "BUILDPACK_URL";
pub const DOCKER_BUILD_ARGS: &str = "DOCKER_BUILD_ARGS";
pub const REGISTRY_SERVICE_HOST: &str = "DEIS_REGISTRY_SERVICE_HOST";
pub const REGISTRY_SERVICE_PORT: &str = "DEIS_REGISTRY_SERVICE_PORT";

/// Presence of this key in the application config, whatever its value, turns the config into docker
/// build arguments.
pub const DOCKER_BUILD_ARGS_ENABLED: &str = "DEIS_DOCKER_BUILD_ARGS_ENABLED";

pub const SLUG_BUILDER_CONTAINER: &str = "deis-slugbuilder";
pub const IMAGE_BUILDER_CONTAINER: &str = "deis-dockerbuilder";

pub const OBJECT_STORE_SECRET: &str = "objectstorage-keyfile";
pub const OBJECT_STORE_MOUNT_PATH: &str = "/var/run/secrets/deis/objectstore/creds";
pub const ENV_MOUNT_PATH: &str = "/tmp/env";
pub const DOCKER_SOCKET_VOLUME: &str = "docker-socket";
pub const DOCKER_SOCKET_PATH: &str = "/var/run/docker.sock";

#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum,
)]
pub enum PullPolicy {
    #[default]
    Always,
    IfNotPresent,
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RestartPolicy {
    Never,
}

/// A [Pod](https://kubernetes.io/docs/reference/kubernetes-api/workload-resources/pod-v1/) ready to be
/// submitted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSpec {
    api_version: &'static str,
    kind: &'static str,
    pub metadata: ResourceMetadata,
    pub spec: PodSpec,
}

impl WorkloadSpec {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    /// The builder container. Builder pods have exactly one.
    pub fn container(&self) -> &Container {
        &self.spec.containers[0]
    }

    fn container_mut(&mut self) -> &mut Container {
        &mut self.spec.containers[0]
    }

    fn add_env(&mut self, name: &str, value: &str) {
        self.container_mut().env.push(EnvVar {
            name: name.to_owned(),
            value: value.to_owned(),
        });
    }

    fn add_volume(&mut self, volume: Volume, mount: VolumeMount) {
        self.spec.volumes.push(volume);
        self.container_mut().volume_mounts.push(mount);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    pub restart_policy: RestartPolicy,
    pub containers: Vec<Container>,
    pub volumes: Vec<Volume>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: String,
    pub image: String,
    pub image_pull_policy: PullPolicy,
    pub env: Vec<EnvVar>,
    pub volume_mounts: Vec<VolumeMount>,
}

impl Container {
    /// Returns the value of the first variable called `name`.
    pub fn env_value(&self, name: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|var| var.name == name)
            .map(|var| var.value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Volume {
    pub name: String,
    #[serde(flatten)]
    pub source: VolumeSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum VolumeSource {
    Secret { secret_name: String },
    HostPath { path: String },
}

/// The parameters shared by both kinds of builds.
pub struct WorkloadArgs<'a> {
    pub debug: bool,
    pub name: &'a str,
    pub namespace: &'a str,
    pub image: &'a str,
    pub pull_policy: PullPolicy,
    pub node_selector: &'a BTreeMap<String, String>,
    pub revision: &'a str,
    pub storage_type: &'a str,
}

/// Buildpack based build.
pub struct SlugArgs<'a> {
    pub env_secret_name: &'a str,
    pub tar_key: &'a str,
    pub put_key: &'a str,
    /// Left out of the pod entirely when empty.
    pub cache_key: &'a str,
    /// Left out of the pod entirely when empty.
    pub buildpack_url: &'a str,
}

/// Dockerfile based build.
pub struct ImageArgs<'a> {
    pub env: &'a AppEnv,
    pub tar_key: &'a str,
    pub image_name: &'a str,
    pub registry_host: &'a str,
    pub registry_port: &'a str,
    pub registry_env: &'a BTreeMap<String, String>,
}

pub enum Strategy<'a> {
    Slug(SlugArgs<'a>),
    Image(ImageArgs<'a>),
}

impl Strategy<'_> {
    fn container_name(&self) -> &'static str {
        match self {
            Strategy::Slug(_) => SLUG_BUILDER_CONTAINER,
            Strategy::Image(_) => IMAGE_BUILDER_CONTAINER,
        }
    }
}

pub fn slug_workload(args: &WorkloadArgs, slug: SlugArgs) -> WorkloadSpec {
    build_workload(args, &Strategy::Slug(slug))
}

pub fn image_workload(args: &WorkloadArgs, image: ImageArgs) -> WorkloadSpec {
    build_workload(args, &Strategy::Image(image))
}

pub fn build_workload(args: &WorkloadArgs, strategy: &Strategy) -> WorkloadSpec {
    let mut workload = base_workload(args, strategy);
    match strategy {
        Strategy::Slug(slug) => add_slug(&mut workload, args, slug),
        Strategy::Image(image) => add_image(&mut workload, args, image),
    }
    workload
}

fn base_workload(args: &WorkloadArgs, strategy: &Strategy) -> WorkloadSpec {
    let mut workload = WorkloadSpec {
        api_version: "v1",
        kind: "Pod",
        metadata: ResourceMetadata {
            name: args.name.to_owned(),
            namespace: Some(args.namespace.to_owned()),
            labels: [(HERITAGE_LABEL.to_owned(), args.name.to_owned())].into(),
            annotations: [(
                kubectl::annotation::VERSION.to_owned(),
                crate::version::VERSION.to_owned(),
            )]
            .into(),
            ..Default::default()
        },
        spec: PodSpec {
            restart_policy: RestartPolicy::Never,
            containers: vec![Container {
                name: strategy.container_name().to_owned(),
                image: args.image.to_owned(),
                image_pull_policy: args.pull_policy,
                env: Vec::new(),
                volume_mounts: Vec::new(),
            }],
            volumes: Vec::new(),
            node_selector: (!args.node_selector.is_empty()).then(|| args.node_selector.clone()),
        },
    };

    workload.add_volume(
        Volume {
            name: OBJECT_STORE_SECRET.to_owned(),
            source: VolumeSource::Secret {
                secret_name: OBJECT_STORE_SECRET.to_owned(),
            },
        },
        VolumeMount {
            name: OBJECT_STORE_SECRET.to_owned(),
            mount_path: OBJECT_STORE_MOUNT_PATH.to_owned(),
            read_only: true,
        },
    );

    if let Strategy::Image(image) = strategy {
        for (name, value) in image.env {
            workload.add_env(name, &env_value_string(value));
        }
    }

    if args.debug {
        workload.add_env(DEBUG, "1");
    }

    if let Strategy::Image(image) = strategy {
        // The docker builder takes its build arguments as a single JSON object.
        if image.env.contains_key(DOCKER_BUILD_ARGS_ENABLED) {
            let build_args =
                serde_json::Value::Object(image.env.clone().into_iter().collect()).to_string();
            workload.add_env(DOCKER_BUILD_ARGS, &build_args);
        }
    }

    workload
}

fn add_slug(workload: &mut WorkloadSpec, args: &WorkloadArgs, slug: &SlugArgs) {
    workload.add_volume(
        Volume {
            name: slug.env_secret_name.to_owned(),
            source: VolumeSource::Secret {
                secret_name: slug.env_secret_name.to_owned(),
            },
        },
        VolumeMount {
            name: slug.env_secret_name.to_owned(),
            mount_path: ENV_MOUNT_PATH.to_owned(),
            read_only: true,
        },
    );

    if !slug.cache_key.is_empty() {
        workload.add_env(CACHE_PATH, slug.cache_key);
    }

    workload.add_env(TAR_PATH, slug.tar_key);
    workload.add_env(PUT_PATH, slug.put_key);
    workload.add_env(SOURCE_VERSION, args.revision);
    workload.add_env(BUILDER_STORAGE, args.storage_type);

    if !slug.buildpack_url.is_empty() {
        workload.add_env(BUILDPACK_URL, slug.buildpack_url);
    }
}

fn add_image(workload: &mut WorkloadSpec, args: &WorkloadArgs, image: &ImageArgs) {
    workload.add_env(TAR_PATH, image.tar_key);
    workload.add_env(SOURCE_VERSION, args.revision);
    workload.add_env(IMAGE_NAME, image.image_name);
    workload.add_env(BUILDER_STORAGE, args.storage_type);
    // Lets the builder push to the in-cluster registry.
    workload.add_env(REGISTRY_SERVICE_HOST, image.registry_host);
    workload.add_env(REGISTRY_SERVICE_PORT, image.registry_port);

    for (name, value) in image.registry_env {
        workload.add_env(name, value);
    }

    workload.add_volume(
        Volume {
            name: DOCKER_SOCKET_VOLUME.to_owned(),
            source: VolumeSource::HostPath {
                path: DOCKER_SOCKET_PATH.to_owned(),
            },
        },
        VolumeMount {
            name: DOCKER_SOCKET_VOLUME.to_owned(),
            mount_path: DOCKER_SOCKET_PATH.to_owned(),
            read_only: false,
        },
    );
}
