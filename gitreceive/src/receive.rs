//! The git hook: reads ref updates and runs one builder pod per pushed revision.

use std::{collections::BTreeMap, io::BufRead, time::Duration};

use log::{debug, info};

use crate::{
    git::Repository,
    kubectl::{PodPhase, PodStatus},
    secret::{upsert_env_secret, EnvSecret, SecretStore, SecretStoreError},
    watch::{wait_for_pod, wait_for_pod_end, PodStore, WaitError},
    workload::{
        env_value_string, image_pod_name, image_workload, short_revision, slug_pod_name,
        slug_workload, AppEnv, ImageArgs, PullPolicy, SlugArgs, WorkloadArgs, WorkloadSpec,
        BUILDPACK_URL,
    },
    Result,
};

/// Only this command triggers builds, fetches do not.
pub const RECEIVE_PACK: &str = "git-receive-pack";

/// Submits a builder pod to the cluster.
pub trait WorkloadSubmitter {
    fn submit(&self, workload: &WorkloadSpec) -> Result<()>;
}

/// Streams the output of a pod to the pushing client until the pod exits.
pub trait LogFollower {
    fn follow_logs(&self, namespace: &str, pod_name: &str) -> Result<()>;
}

/// One line of hook input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefUpdate {
    pub old_rev: String,
    pub new_rev: String,
    pub ref_name: String,
}

/// Parses `<old-rev> <new-rev> <ref-name>`. Tokens are separated by exactly one space.
pub fn parse_ref_update(line: &str) -> Result<RefUpdate, ReceiveError> {
    let mut tokens = line.split(' ');
    match (tokens.next(), tokens.next(), tokens.next(), tokens.next()) {
        (Some(old_rev), Some(new_rev), Some(ref_name), None) => Ok(RefUpdate {
            old_rev: old_rev.to_owned(),
            new_rev: new_rev.to_owned(),
            ref_name: ref_name.to_owned(),
        }),
        _ => Err(ReceiveError::MalformedLine(line.to_owned())),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReceiveError {
    #[error("malformed line [{0}]")]
    MalformedLine(String),
    #[error("reading hook input failed: {0}")]
    Read(#[source] std::io::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("inspecting the repository failed: {0}")]
    Repository(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("synchronizing the build environment failed: {0}")]
    Secret(#[from] SecretStoreError),
    #[error("creating the builder pod failed: {0}")]
    Submit(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error(transparent)]
    Wait(#[from] WaitError),
    #[error("following the builder logs failed: {0}")]
    Logs(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("build pod {pod} failed: {status}")]
    BuildFailed {
        pod: String,
        /// Exit code of the builder container, if it got to run.
        exit_code: Option<i32>,
        status: PodStatus,
    },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BuildStrategy {
    /// Image build when the revision has a Dockerfile, buildpack build otherwise
    #[default]
    Auto,
    /// Always build with buildpacks
    Slug,
    /// Always build from the Dockerfile
    Image,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Builder {
    Slug,
    Image,
}

/// Everything a build needs to know besides the revision.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub app: String,
    pub namespace: String,
    pub ssh_original_command: String,
    pub strategy: BuildStrategy,
    pub slug_builder_image: String,
    pub slug_builder_pull_policy: PullPolicy,
    pub image_builder_image: String,
    pub image_builder_pull_policy: PullPolicy,
    pub storage_type: String,
    pub registry_host: String,
    pub registry_port: String,
    /// Extra variables handed to the image builder for registry access.
    pub registry_env: BTreeMap<String, String>,
    pub node_selector: BTreeMap<String, String>,
    pub debug: bool,
    pub disable_cache: bool,
    pub follow_logs: bool,
    pub progress_tick: Duration,
    pub poll_interval: Duration,
    pub start_timeout: Duration,
    pub build_timeout: Duration,
    pub env: AppEnv,
}

impl BuildConfig {
    pub fn is_push(&self) -> bool {
        self.ssh_original_command.starts_with(RECEIVE_PACK)
    }

    pub fn env_secret_name(&self) -> String {
        format!("{}-build-env", self.app)
    }
}

/// Object store keys of one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectKeys {
    pub tar: String,
    pub push: String,
    /// Empty when caching is disabled.
    pub cache: String,
}

impl ObjectKeys {
    pub fn new(app: &str, revision: &str, cache: bool) -> Self {
        let base = format!("home/{app}:git-{}", short_revision(revision));
        Self {
            tar: format!("{base}/tar"),
            push: format!("{base}/push"),
            cache: if cache {
                format!("{base}/cache")
            } else {
                String::new()
            },
        }
    }
}

/// The name under which an image build publishes its result.
pub fn image_name(app: &str, revision: &str) -> String {
    format!("{app}:git-{}", short_revision(revision))
}

/// Runs builds for hook input. Borrowing every collaborator keeps the receiver free of globals.
pub struct Receiver<'a> {
    pub config: &'a BuildConfig,
    pub repository: &'a dyn Repository,
    pub secrets: &'a dyn SecretStore,
    pub submitter: &'a dyn WorkloadSubmitter,
    pub pods: &'a dyn PodStore,
    pub logs: &'a dyn LogFollower,
}

impl Receiver<'_> {
    /// Processes every line of `input`. The first error ends the loop.
    pub fn run(&self, input: impl BufRead) -> Result<(), ReceiveError> {
        debug!("Running git hook");

        for line in input.lines() {
            let line = line.map_err(ReceiveError::Read)?;
            let RefUpdate {
                old_rev,
                new_rev,
                ref_name,
            } = parse_ref_update(&line)?;
            debug!("read [{old_rev},{new_rev},{ref_name}]");

            if self.config.is_push() {
                self.build(&new_rev)?;
            }
        }

        Ok(())
    }

    fn resolve_builder(&self, revision: &str) -> Result<Builder, ReceiveError> {
        Ok(match self.config.strategy {
            BuildStrategy::Slug => Builder::Slug,
            BuildStrategy::Image => Builder::Image,
            BuildStrategy::Auto => {
                if self
                    .repository
                    .has_dockerfile(revision)
                    .map_err(ReceiveError::Repository)?
                {
                    Builder::Image
                } else {
                    Builder::Slug
                }
            }
        })
    }

    /// Builds `revision` and returns once the builder pod has finished.
    pub fn build(&self, revision: &str) -> Result<(), ReceiveError> {
        let config = self.config;
        let short = short_revision(revision);
        info!("Starting build of {} at {short}", config.app);

        let builder = self.resolve_builder(revision)?;
        let keys = ObjectKeys::new(&config.app, revision, !config.disable_cache);

        let secret_name = config.env_secret_name();
        upsert_env_secret(
            self.secrets,
            &EnvSecret::from_env(&secret_name, &config.namespace, &config.env),
        )?;

        let (pod_name, image, pull_policy) = match builder {
            Builder::Slug => (
                slug_pod_name(&config.app, revision),
                config.slug_builder_image.as_str(),
                config.slug_builder_pull_policy,
            ),
            Builder::Image => (
                image_pod_name(&config.app, revision),
                config.image_builder_image.as_str(),
                config.image_builder_pull_policy,
            ),
        };

        let args = WorkloadArgs {
            debug: config.debug,
            name: &pod_name,
            namespace: &config.namespace,
            image,
            pull_policy,
            node_selector: &config.node_selector,
            revision,
            storage_type: &config.storage_type,
        };

        let workload = match builder {
            Builder::Slug => {
                let buildpack_url = config
                    .env
                    .get(BUILDPACK_URL)
                    .map(env_value_string)
                    .unwrap_or_default();
                slug_workload(
                    &args,
                    SlugArgs {
                        env_secret_name: &secret_name,
                        tar_key: &keys.tar,
                        put_key: &keys.push,
                        cache_key: &keys.cache,
                        buildpack_url: &buildpack_url,
                    },
                )
            }
            Builder::Image => image_workload(
                &args,
                ImageArgs {
                    env: &config.env,
                    tar_key: &keys.tar,
                    image_name: &image_name(&config.app, revision),
                    registry_host: &config.registry_host,
                    registry_port: &config.registry_port,
                    registry_env: &config.registry_env,
                },
            ),
        };

        self.submitter
            .submit(&workload)
            .map_err(ReceiveError::Submit)?;

        wait_for_pod(
            self.pods,
            &config.namespace,
            &pod_name,
            config.progress_tick,
            config.poll_interval,
            config.start_timeout,
        )?;

        if config.follow_logs {
            self.logs
                .follow_logs(&config.namespace, &pod_name)
                .map_err(ReceiveError::Logs)?;
        }

        let pod = wait_for_pod_end(
            self.pods,
            &config.namespace,
            &pod_name,
            config.poll_interval,
            config.build_timeout,
        )?;

        if pod.status.phase == PodPhase::Failed {
            return Err(ReceiveError::BuildFailed {
                pod: pod_name,
                exit_code: pod.status.exit_code(),
                status: pod.status,
            });
        }

        match pod.status.run_time() {
            Some(run_time) => info!("Build complete in {run_time}."),
            None => info!("Build complete."),
        }
        Ok(())
    }
}
