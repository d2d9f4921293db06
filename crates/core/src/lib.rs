//! Keel core types: resource kinds, object keys, creators and the store capability.
//!
//! Everything here is transport-free. The reconciler, the stores and the
//! orchestrator all speak in these terms.

#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

/// Implements the k8s-openapi resource traits plus an apiVersion/kind aware
/// `Serialize` for a hand-written custom resource with `metadata`, `spec` and
/// an optional `status`.
macro_rules! custom_resource {
    ($ty:ident, group = $group:literal, version = $version:literal, kind = $kind:literal, plural = $plural:literal, scope = $scope:ty) => {
        impl k8s_openapi::Resource for $ty {
            const API_VERSION: &'static str = concat!($group, "/", $version);
            const GROUP: &'static str = $group;
            const KIND: &'static str = $kind;
            const VERSION: &'static str = $version;
            const URL_PATH_SEGMENT: &'static str = $plural;
            type Scope = $scope;
        }

        impl k8s_openapi::Metadata for $ty {
            type Ty = k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
            fn metadata(&self) -> &Self::Ty { &self.metadata }
            fn metadata_mut(&mut self) -> &mut Self::Ty { &mut self.metadata }
        }

        impl serde::Serialize for $ty {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                use serde::ser::SerializeStruct;
                let mut state = serializer.serialize_struct($kind, 5)?;
                state.serialize_field("apiVersion", <$ty as k8s_openapi::Resource>::API_VERSION)?;
                state.serialize_field("kind", <$ty as k8s_openapi::Resource>::KIND)?;
                state.serialize_field("metadata", &self.metadata)?;
                state.serialize_field("spec", &self.spec)?;
                match &self.status {
                    Some(status) => state.serialize_field("status", status)?,
                    None => state.skip_field("status")?,
                }
                state.end()
            }
        }
    };
}

pub mod creator;
pub mod error;
pub mod kind;
pub mod store;
pub mod tenant;
pub mod vpa;

pub use creator::{owner_ref_wrapper, set_controller_ref, wrap, Creator, NamedCreator, Registry};
pub use error::{CreatorError, Error, StoreError, StoreOp};
pub use kind::{Kind, ManagedKind};
pub use store::{ClusterCache, ClusterStore, ReadCache, ResourceStore};
pub use tenant::{Cluster, ClusterHealth, ClusterNetwork, ClusterSpec, ClusterStatus};
pub use vpa::{disable_autoscaling, PodUpdatePolicy, UpdateMode, VerticalPodAutoscaler, VerticalPodAutoscalerSpec};

/// Identity of an object inside the store. Cluster-scoped kinds carry no namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: Some(namespace.into()), name: name.into() }
    }

    pub fn cluster(name: impl Into<String>) -> Self {
        Self { namespace: None, name: name.into() }
    }

    /// Key for `name` of `kind`; the namespace is dropped for cluster-scoped kinds.
    pub fn for_kind(kind: Kind, namespace: &str, name: &str) -> Self {
        if kind.namespaced() { Self::namespaced(namespace, name) } else { Self::cluster(name) }
    }

    /// Key read back from a raw object of `kind`. `None` when it has no name.
    pub fn from_raw(kind: Kind, raw: &serde_json::Value) -> Option<Self> {
        let meta = raw.get("metadata")?;
        let name = meta.get("name")?.as_str()?.to_string();
        let namespace =
            if kind.namespaced() { meta.get("namespace").and_then(|n| n.as_str()).map(str::to_string) } else { None };
        Some(Self { namespace, name })
    }

    /// Key read back from an object's metadata. `None` when the object has no name.
    pub fn of<K: ManagedKind>(obj: &K) -> Option<Self> {
        let meta = obj.meta();
        let name = meta.name.clone()?;
        let namespace = if K::KIND.namespaced() { meta.namespace.clone() } else { None };
        Some(Self { namespace, name })
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeltaKind {
    Applied,
    Deleted,
    /// Full relist of one kind. `raw` is the array of listed objects and
    /// replaces every cached object of that kind.
    Restarted,
}

/// A change observed on the store, as fed into the read cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delta {
    pub resource: Kind,
    pub key: ObjectKey,
    pub kind: DeltaKind,
    /// Raw object, managedFields stripped
    pub raw: serde_json::Value,
}

impl Delta {
    /// Relist of every live object of `resource`. The key is empty; one
    /// relist per kind is pending at a time.
    pub fn restarted(resource: Kind, objects: Vec<serde_json::Value>) -> Self {
        Self { resource, key: ObjectKey::cluster(""), kind: DeltaKind::Restarted, raw: serde_json::Value::Array(objects) }
    }
}

pub mod prelude {
    pub use super::{
        Cluster, Creator, CreatorError, Delta, DeltaKind, Error, Kind, ManagedKind, NamedCreator, ObjectKey,
        ReadCache, Registry, ResourceStore, StoreError, StoreOp,
    };
}
