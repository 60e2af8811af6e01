//! Create-or-update of the secret that carries the application config into slug builds.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::debug;
use serde::{Serialize, Serializer};

use crate::{
    kubectl::ResourceMetadata,
    workload::{env_value_string, AppEnv},
};

/// An `Opaque` [Secret](https://kubernetes.io/docs/reference/kubernetes-api/config-and-storage-resources/secret-v1/).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvSecret {
    api_version: &'static str,
    kind: &'static str,
    pub metadata: ResourceMetadata,
    r#type: &'static str,
    /// Raw values, base64 encoded on the wire.
    #[serde(serialize_with = "serialize_base64")]
    pub data: BTreeMap<String, Vec<u8>>,
}

fn serialize_base64<S: Serializer>(
    data: &BTreeMap<String, Vec<u8>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_map(data.iter().map(|(key, value)| (key, STANDARD.encode(value))))
}

impl EnvSecret {
    pub fn new(name: &str, namespace: &str, data: BTreeMap<String, Vec<u8>>) -> Self {
        Self {
            api_version: "v1",
            kind: "Secret",
            metadata: ResourceMetadata {
                name: name.to_owned(),
                namespace: Some(namespace.to_owned()),
                ..Default::default()
            },
            r#type: "Opaque",
            data,
        }
    }

    /// Stores every config value in its string form.
    pub fn from_env(name: &str, namespace: &str, env: &AppEnv) -> Self {
        let data = env
            .iter()
            .map(|(key, value)| (key.clone(), env_value_string(value).into_bytes()))
            .collect();
        Self::new(name, namespace, data)
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SecretStoreError {
    #[error("secret {name:?} already exists")]
    AlreadyExists { name: String },
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

/// Write access to secrets in the cluster.
pub trait SecretStore {
    /// Fails with [`SecretStoreError::AlreadyExists`] if a secret with the same name exists.
    fn create(&self, secret: &EnvSecret) -> Result<(), SecretStoreError>;

    /// Replaces the existing secret entirely.
    fn update(&self, secret: &EnvSecret) -> Result<(), SecretStoreError>;
}

/// Creates `secret`, or replaces it if it already exists. Concurrent callers race benignly, the
/// last update wins.
pub fn upsert_env_secret(
    store: &dyn SecretStore,
    secret: &EnvSecret,
) -> Result<(), SecretStoreError> {
    match store.create(secret) {
        Ok(()) => {
            debug!("Created secret {:?}", secret.name());
            Ok(())
        }
        Err(SecretStoreError::AlreadyExists { .. }) => {
            store.update(secret)?;
            debug!("Updated existing secret {:?}", secret.name());
            Ok(())
        }
        Err(error) => Err(error),
    }
}
