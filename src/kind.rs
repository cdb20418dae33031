//! The nine namespaced resource kinds that kubesnap knows how to back up and restore.
//!
//! Each kind has a short lowercase _tag_ (`pvc`, `pod`, `replicaset`, ...). Tags are the
//! prefixes used in backup file names, so they are part of the on-disk format and must not
//! change.
use crate::k8s_types::{self, K8sType};

use std::fmt::{self, Display};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    PersistentVolumeClaim,
    Pod,
    ReplicaSet,
    Deployment,
    ConfigMap,
    Service,
    StatefulSet,
    ServiceAccount,
    Secret,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 9] = [
        ResourceKind::PersistentVolumeClaim,
        ResourceKind::Pod,
        ResourceKind::ReplicaSet,
        ResourceKind::Deployment,
        ResourceKind::ConfigMap,
        ResourceKind::Service,
        ResourceKind::StatefulSet,
        ResourceKind::ServiceAccount,
        ResourceKind::Secret,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            ResourceKind::PersistentVolumeClaim => "pvc",
            ResourceKind::Pod => "pod",
            ResourceKind::ReplicaSet => "replicaset",
            ResourceKind::Deployment => "deployment",
            ResourceKind::ConfigMap => "configmap",
            ResourceKind::Service => "service",
            ResourceKind::StatefulSet => "statefulset",
            ResourceKind::ServiceAccount => "serviceaccount",
            ResourceKind::Secret => "secret",
        }
    }

    pub fn k8s_type(self) -> &'static K8sType {
        match self {
            ResourceKind::PersistentVolumeClaim => k8s_types::core::v1::PersistentVolumeClaim,
            ResourceKind::Pod => k8s_types::core::v1::Pod,
            ResourceKind::ReplicaSet => k8s_types::apps::v1::ReplicaSet,
            ResourceKind::Deployment => k8s_types::apps::v1::Deployment,
            ResourceKind::ConfigMap => k8s_types::core::v1::ConfigMap,
            ResourceKind::Service => k8s_types::core::v1::Service,
            ResourceKind::StatefulSet => k8s_types::apps::v1::StatefulSet,
            ResourceKind::ServiceAccount => k8s_types::core::v1::ServiceAccount,
            ResourceKind::Secret => k8s_types::core::v1::Secret,
        }
    }
}

impl Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Returned when parsing a tag that does not name one of the nine supported kinds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownKind(pub String);

impl Display for UnknownKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Unknown resource kind: '{}'", self.0)
    }
}

impl std::error::Error for UnknownKind {}

impl FromStr for ResourceKind {
    type Err = UnknownKind;

    fn from_str(tag: &str) -> Result<ResourceKind, UnknownKind> {
        ResourceKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.tag() == tag)
            .ok_or_else(|| UnknownKind(tag.to_owned()))
    }
}
