use serde::Deserialize;

use super::common;

/// [Namespace](https://kubernetes.io/docs/reference/kubernetes-api/cluster-resources/namespace-v1/)
#[derive(Debug, Clone, Deserialize)]
pub struct Namespace {
    pub metadata: common::ResourceMetadata,
}

/// The items of a `NamespaceList`.
pub type NamespaceList = Vec<Namespace>;
