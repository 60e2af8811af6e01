use std::{collections::BTreeMap, io, path::PathBuf, time::Duration};

use clap::{builder::BoolishValueParser, Args};
use constcat::concat;
use log::debug;

use crate::{
    git::GitRepository,
    kubectl::Kubectl,
    receive::{BuildConfig, BuildStrategy, ReceiveError, Receiver, RECEIVE_PACK},
    workload::{AppEnv, PullPolicy, REGISTRY_SERVICE_HOST, REGISTRY_SERVICE_PORT},
    Result,
};

#[derive(Debug, Args)]
pub struct ReceiveArgs {
    #[arg(
        long = "ssh-original-command",
        env = "SSH_ORIGINAL_COMMAND",
        help = concat!("The command the client asked for. Only `", RECEIVE_PACK, "` triggers builds.")
    )]
    pub ssh_original_command: String,

    /// The pushed repository, the application name followed by an optional `.git`.
    #[arg(long = "repository", env = "REPOSITORY")]
    pub repository: String,

    /// Namespace of the builder pods and of the build environment secret.
    #[arg(long = "namespace", env = "POD_NAMESPACE")]
    pub namespace: String,

    #[arg(long = "strategy", env = "BUILDER_STRATEGY", value_enum, default_value_t)]
    pub strategy: BuildStrategy,

    #[arg(long = "slug-builder-image", env = "SLUGBUILDER_IMAGE")]
    pub slug_builder_image: String,

    #[arg(
        long = "slug-builder-pull-policy",
        env = "SLUG_BUILDER_IMAGE_PULL_POLICY",
        value_enum,
        default_value_t
    )]
    pub slug_builder_pull_policy: PullPolicy,

    #[arg(long = "docker-builder-image", env = "DOCKERBUILDER_IMAGE")]
    pub docker_builder_image: String,

    #[arg(
        long = "docker-builder-pull-policy",
        env = "DOCKER_BUILDER_IMAGE_PULL_POLICY",
        value_enum,
        default_value_t
    )]
    pub docker_builder_pull_policy: PullPolicy,

    /// The object storage backend the builders talk to.
    #[arg(long = "storage", env = "BUILDER_STORAGE", default_value = "minio")]
    pub storage_type: String,

    #[arg(long = "registry-host", env = REGISTRY_SERVICE_HOST, default_value = "")]
    pub registry_host: String,

    #[arg(long = "registry-port", env = REGISTRY_SERVICE_PORT, default_value = "")]
    pub registry_port: String,

    /// Extra `KEY=VALUE` variables for the image builder, may be repeated.
    #[arg(long = "registry-env", value_parser = parse_key_value)]
    pub registry_env: Vec<(String, String)>,

    /// Node selector of the builder pods, formatted as `key:value,key2:value2`.
    #[arg(
        long = "node-selector",
        env = "BUILDER_POD_NODE_SELECTOR",
        default_value = "",
        value_parser = parse_node_selector
    )]
    pub node_selector: BTreeMap<String, String>,

    /// Path to a JSON object holding the configuration of the application.
    #[arg(long = "app-env-file", env = "APP_ENV_FILE")]
    pub app_env_file: Option<PathBuf>,

    /// Accepts the usual spellings of booleans, such as `1`, `true`, `yes` and `on`.
    #[arg(
        long = "debug",
        env = "DEIS_DEBUG",
        default_value_t,
        value_parser = BoolishValueParser::new()
    )]
    pub debug: bool,

    #[arg(
        long = "disable-cache",
        env = "DEIS_DISABLE_CACHE",
        default_value_t,
        value_parser = BoolishValueParser::new()
    )]
    pub disable_cache: bool,

    /// Do not stream the builder output to the client.
    #[arg(long = "no-logs", default_value_t)]
    pub no_logs: bool,

    /// Milliseconds between progress lines while the builder starts.
    #[arg(
        long = "progress-tick-ms",
        default_value_t = 1000,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub progress_tick_ms: u64,

    /// Milliseconds between two looks at the builder pod.
    #[arg(
        long = "poll-interval-ms",
        env = "BUILDER_POD_TICK_DURATION",
        default_value_t = 100,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub poll_interval_ms: u64,

    /// Milliseconds to wait for the builder to start, and again for it to finish.
    #[arg(
        long = "wait-ms",
        env = "BUILDER_POD_WAIT_DURATION",
        default_value_t = 15 * 60 * 1000,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub wait_ms: u64,
}

fn parse_key_value(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_owned(), value.to_owned())),
        _ => Err(format!("expected KEY=VALUE, got {value:?}")),
    }
}

/// Parses `key:value` pairs separated by commas. Whitespace around keys and values is ignored.
fn parse_node_selector(value: &str) -> Result<BTreeMap<String, String>, String> {
    if value.is_empty() {
        return Ok(BTreeMap::new());
    }
    value
        .split(',')
        .map(|pair| {
            let mut parts = pair.split(':');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(key), Some(value), None) => {
                    Ok((key.trim().to_owned(), value.trim().to_owned()))
                }
                _ => Err(format!("invalid node selector format: {value}")),
            }
        })
        .collect()
}

/// The application is named after its repository.
fn app_name(repository: &str) -> &str {
    repository.strip_suffix(".git").unwrap_or(repository)
}

fn read_app_env(path: Option<&PathBuf>) -> Result<AppEnv, ReceiveError> {
    let Some(path) = path else {
        return Ok(AppEnv::new());
    };
    let contents = std::fs::read(path).map_err(|error| {
        ReceiveError::Config(format!("unable to read {}: {error}", path.display()))
    })?;
    serde_json::from_slice(&contents).map_err(|error| {
        ReceiveError::Config(format!(
            "{} is not a JSON object of config values: {error}",
            path.display()
        ))
    })
}

pub fn receive(kubectl: &Kubectl, args: ReceiveArgs) -> Result<()> {
    let app = app_name(&args.repository).to_owned();
    if app.is_empty() {
        return Err(ReceiveError::Config("the repository name is empty".to_owned()).into());
    }

    let env = read_app_env(args.app_env_file.as_ref())?;
    debug!("{app} has {} config values", env.len());

    let config = BuildConfig {
        app,
        namespace: args.namespace,
        ssh_original_command: args.ssh_original_command,
        strategy: args.strategy,
        slug_builder_image: args.slug_builder_image,
        slug_builder_pull_policy: args.slug_builder_pull_policy,
        image_builder_image: args.docker_builder_image,
        image_builder_pull_policy: args.docker_builder_pull_policy,
        storage_type: args.storage_type,
        registry_host: args.registry_host,
        registry_port: args.registry_port,
        registry_env: args.registry_env.into_iter().collect(),
        node_selector: args.node_selector,
        debug: args.debug,
        disable_cache: args.disable_cache,
        follow_logs: !args.no_logs,
        progress_tick: Duration::from_millis(args.progress_tick_ms),
        poll_interval: Duration::from_millis(args.poll_interval_ms),
        start_timeout: Duration::from_millis(args.wait_ms),
        build_timeout: Duration::from_millis(args.wait_ms),
        env,
    };

    let receiver = Receiver {
        config: &config,
        repository: &GitRepository,
        secrets: kubectl,
        submitter: kubectl,
        pods: kubectl,
        logs: kubectl,
    };
    receiver.run(io::stdin().lock())?;
    Ok(())
}
