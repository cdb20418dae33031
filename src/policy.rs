//! The kind policy table. This is the only place in kubesnap that knows anything about how
//! individual resource kinds differ from one another. The export and import drivers are written
//! purely in terms of a `KindPolicy`, so supporting another kind means adding a `ResourceKind`
//! variant and one entry to `POLICIES`.
//!
//! The file naming rules reproduce the layout of existing backups exactly, including two
//! asymmetries between export and import:
//!
//! - persistent volume claims are written as `<name>.json`, but import only discovers files
//!   matching `pvc-*.json`.
//! - service accounts are written as `serviceaccount-<name>.json`, but import considers every
//!   regular file in the backup directory. Files whose payload declares a different `kind` are
//!   skipped by the importer.
use crate::kind::{ResourceKind, UnknownKind};
use crate::resource::K8sResource;

/// The name of the config map that the cluster publishes into every namespace with its root
/// certificate authority. It is owned by the cluster and is never captured in a backup.
pub const ROOT_CA_CONFIG_MAP: &str = "kube-root-ca.crt";

pub const CLUSTER_IP_POINTER: &str = "/spec/clusterIP";
pub const CLUSTER_IPS_POINTER: &str = "/spec/clusterIPs";

/// How the importer finds candidate files inside a backup directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discovery {
    /// Files in the directory whose names match a glob pattern, like `pod-*.json`
    Glob(&'static str),
    /// Regular files whose names start with the given prefix
    PrefixScan(&'static str),
    /// Every regular file in the directory
    FullScan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilePattern {
    /// Prepended to the object name when exporting, which is then suffixed with `.json`
    pub export_prefix: &'static str,
    pub discovery: Discovery,
}

impl FilePattern {
    pub fn file_name(&self, object_name: &str) -> String {
        format!("{}{}.json", self.export_prefix, object_name)
    }
}

/// How the importer decides whether an object already exists in the target namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictCheck {
    /// List every object of the kind in the target namespace once, then check names against it
    ListScan,
    /// Get each object by name, where a NotFound response means there's no conflict
    DirectGet,
}

pub type ExportNormalize = fn(&mut K8sResource);
pub type ImportNormalize = fn(&mut K8sResource, &str);

#[derive(Clone, Copy)]
pub struct KindPolicy {
    pub kind: ResourceKind,
    pub file_pattern: FilePattern,
    pub export_normalize: ExportNormalize,
    pub import_normalize: ImportNormalize,
    pub conflict_check: ConflictCheck,
    /// When true, export leaves an existing file alone instead of overwriting it
    pub skip_if_exists: bool,
    /// Object names that export must never write
    pub excluded_names: &'static [&'static str],
    /// Kinds are visited in ascending rank during backup and restore
    pub rank: u8,
}

impl std::fmt::Debug for KindPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("KindPolicy")
            .field("kind", &self.kind)
            .field("file_pattern", &self.file_pattern)
            .field("conflict_check", &self.conflict_check)
            .field("skip_if_exists", &self.skip_if_exists)
            .field("excluded_names", &self.excluded_names)
            .field("rank", &self.rank)
            .finish()
    }
}

impl KindPolicy {
    pub fn is_excluded(&self, object_name: &str) -> bool {
        self.excluded_names.contains(&object_name)
    }
}

fn export_unmodified(_: &mut K8sResource) {}

fn export_without_identity(resource: &mut K8sResource) {
    resource.clear_namespace();
    resource.clear_resource_version();
}

fn import_into_namespace(resource: &mut K8sResource, namespace: &str) {
    resource.clear_resource_version();
    resource.set_namespace(namespace);
}

fn import_service_into_namespace(resource: &mut K8sResource, namespace: &str) {
    import_into_namespace(resource, namespace);
    resource.clear_field(CLUSTER_IP_POINTER);
    resource.clear_field(CLUSTER_IPS_POINTER);
}

/// Indexed by the declaration order of `ResourceKind`
static POLICIES: [KindPolicy; 9] = [
    KindPolicy {
        kind: ResourceKind::PersistentVolumeClaim,
        file_pattern: FilePattern {
            export_prefix: "",
            discovery: Discovery::Glob("pvc-*.json"),
        },
        export_normalize: export_unmodified,
        import_normalize: import_into_namespace,
        conflict_check: ConflictCheck::ListScan,
        skip_if_exists: false,
        excluded_names: &[],
        rank: 3,
    },
    KindPolicy {
        kind: ResourceKind::Pod,
        file_pattern: FilePattern {
            export_prefix: "pod-",
            discovery: Discovery::Glob("pod-*.json"),
        },
        export_normalize: export_unmodified,
        import_normalize: import_into_namespace,
        conflict_check: ConflictCheck::ListScan,
        skip_if_exists: false,
        excluded_names: &[],
        rank: 8,
    },
    KindPolicy {
        kind: ResourceKind::ReplicaSet,
        file_pattern: FilePattern {
            export_prefix: "replicaset-",
            discovery: Discovery::Glob("replicaset-*.json"),
        },
        export_normalize: export_unmodified,
        import_normalize: import_into_namespace,
        conflict_check: ConflictCheck::ListScan,
        skip_if_exists: false,
        excluded_names: &[],
        rank: 7,
    },
    KindPolicy {
        kind: ResourceKind::Deployment,
        file_pattern: FilePattern {
            export_prefix: "deployment-",
            discovery: Discovery::Glob("deployment-*.json"),
        },
        export_normalize: export_unmodified,
        import_normalize: import_into_namespace,
        conflict_check: ConflictCheck::ListScan,
        skip_if_exists: false,
        excluded_names: &[],
        rank: 6,
    },
    KindPolicy {
        kind: ResourceKind::ConfigMap,
        file_pattern: FilePattern {
            export_prefix: "configmap-",
            discovery: Discovery::Glob("configmap-*.json"),
        },
        export_normalize: export_without_identity,
        import_normalize: import_into_namespace,
        conflict_check: ConflictCheck::ListScan,
        skip_if_exists: true,
        excluded_names: &[ROOT_CA_CONFIG_MAP],
        rank: 2,
    },
    KindPolicy {
        kind: ResourceKind::Service,
        file_pattern: FilePattern {
            export_prefix: "service-",
            discovery: Discovery::PrefixScan("service-"),
        },
        export_normalize: export_without_identity,
        import_normalize: import_service_into_namespace,
        conflict_check: ConflictCheck::DirectGet,
        skip_if_exists: true,
        excluded_names: &[],
        rank: 4,
    },
    KindPolicy {
        kind: ResourceKind::StatefulSet,
        file_pattern: FilePattern {
            export_prefix: "statefulset-",
            discovery: Discovery::Glob("statefulset-*.json"),
        },
        export_normalize: export_without_identity,
        import_normalize: import_into_namespace,
        conflict_check: ConflictCheck::ListScan,
        skip_if_exists: true,
        excluded_names: &[],
        rank: 5,
    },
    KindPolicy {
        kind: ResourceKind::ServiceAccount,
        file_pattern: FilePattern {
            export_prefix: "serviceaccount-",
            discovery: Discovery::FullScan,
        },
        export_normalize: export_unmodified,
        import_normalize: import_into_namespace,
        conflict_check: ConflictCheck::DirectGet,
        skip_if_exists: false,
        excluded_names: &[],
        rank: 0,
    },
    KindPolicy {
        kind: ResourceKind::Secret,
        file_pattern: FilePattern {
            export_prefix: "secret-",
            discovery: Discovery::PrefixScan("secret-"),
        },
        export_normalize: export_unmodified,
        import_normalize: import_into_namespace,
        conflict_check: ConflictCheck::DirectGet,
        skip_if_exists: false,
        excluded_names: &[],
        rank: 1,
    },
];

pub fn policy_for(kind: ResourceKind) -> &'static KindPolicy {
    &POLICIES[kind as usize]
}

pub fn policy_for_tag(tag: &str) -> Result<&'static KindPolicy, UnknownKind> {
    tag.parse::<ResourceKind>().map(policy_for)
}

/// Returns every policy, in the order that the kinds should be visited
pub fn policies_by_rank() -> Vec<&'static KindPolicy> {
    let mut policies = POLICIES.iter().collect::<Vec<_>>();
    policies.sort_by_key(|policy| policy.rank);
    policies
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    const WITH_EXPORT_NORMALIZATION: &[ResourceKind] = &[
        ResourceKind::ConfigMap,
        ResourceKind::StatefulSet,
        ResourceKind::Service,
    ];

    fn resource() -> K8sResource {
        K8sResource::from_value(json!({
            "apiVersion": "v1",
            "kind": "Thing",
            "metadata": {
                "name": "thing-one",
                "namespace": "source-ns",
                "resourceVersion": "987",
                "labels": {"app": "thing"},
            },
            "spec": {
                "clusterIP": "10.1.2.3",
                "clusterIPs": ["10.1.2.3"],
                "replicas": 2,
            }
        }))
        .unwrap()
    }

    #[test]
    fn policy_table_is_total_over_all_kinds() {
        for kind in ResourceKind::ALL.iter() {
            assert_eq!(*kind, policy_for(*kind).kind);
            assert_eq!(*kind, policy_for_tag(kind.tag()).unwrap().kind);
        }
    }

    #[test]
    fn unknown_tags_are_rejected() {
        let err = policy_for_tag("daemonset").expect_err("expected an error");
        assert_eq!(UnknownKind("daemonset".to_owned()), err);
    }

    #[test]
    fn import_always_clears_revision_and_sets_namespace() {
        for kind in ResourceKind::ALL.iter() {
            let mut subject = resource();
            (policy_for(*kind).import_normalize)(&mut subject, "demo");
            assert_eq!("", subject.resource_version(), "kind: {}", kind);
            assert_eq!(Some("demo"), subject.namespace(), "kind: {}", kind);
        }
    }

    #[test]
    fn only_services_clear_cluster_addresses_on_import() {
        for kind in ResourceKind::ALL.iter() {
            let mut subject = resource();
            (policy_for(*kind).import_normalize)(&mut subject, "demo");
            let has_ip = subject.as_ref().pointer(CLUSTER_IP_POINTER).is_some();
            let has_ips = subject.as_ref().pointer(CLUSTER_IPS_POINTER).is_some();
            let expect_cleared = *kind == ResourceKind::Service;
            assert_eq!(!expect_cleared, has_ip, "kind: {}", kind);
            assert_eq!(!expect_cleared, has_ips, "kind: {}", kind);
            assert_eq!(Some(2), subject.as_ref().pointer("/spec/replicas").and_then(|v| v.as_i64()));
        }
    }

    #[test]
    fn export_normalization_only_applies_to_config_maps_stateful_sets_and_services() {
        for kind in ResourceKind::ALL.iter() {
            let mut subject = resource();
            (policy_for(*kind).export_normalize)(&mut subject);
            if WITH_EXPORT_NORMALIZATION.contains(kind) {
                assert_eq!(None, subject.namespace(), "kind: {}", kind);
                assert_eq!("", subject.resource_version(), "kind: {}", kind);
            } else {
                assert_eq!(resource(), subject, "kind: {}", kind);
            }
        }
    }

    #[test]
    fn skip_if_exists_matches_export_normalization() {
        for kind in ResourceKind::ALL.iter() {
            let expected = WITH_EXPORT_NORMALIZATION.contains(kind);
            assert_eq!(expected, policy_for(*kind).skip_if_exists, "kind: {}", kind);
        }
    }

    #[test]
    fn only_config_maps_exclude_the_root_ca() {
        for kind in ResourceKind::ALL.iter() {
            let excluded = policy_for(*kind).is_excluded(ROOT_CA_CONFIG_MAP);
            assert_eq!(*kind == ResourceKind::ConfigMap, excluded, "kind: {}", kind);
        }
    }

    #[test]
    fn file_names_follow_the_existing_backup_layout() {
        let names = ResourceKind::ALL
            .iter()
            .map(|kind| policy_for(*kind).file_pattern.file_name("x"))
            .collect::<Vec<_>>();
        let expected = vec![
            "x.json",
            "pod-x.json",
            "replicaset-x.json",
            "deployment-x.json",
            "configmap-x.json",
            "service-x.json",
            "statefulset-x.json",
            "serviceaccount-x.json",
            "secret-x.json",
        ];
        assert_eq!(expected, names);
    }

    #[test]
    fn conflict_checks_and_discovery_match_the_existing_layout() {
        use ConflictCheck::*;
        use Discovery::*;

        let pvc = policy_for(ResourceKind::PersistentVolumeClaim);
        assert_eq!(Glob("pvc-*.json"), pvc.file_pattern.discovery);
        assert_eq!(ListScan, pvc.conflict_check);

        let service = policy_for(ResourceKind::Service);
        assert_eq!(PrefixScan("service-"), service.file_pattern.discovery);
        assert_eq!(DirectGet, service.conflict_check);

        let secret = policy_for(ResourceKind::Secret);
        assert_eq!(PrefixScan("secret-"), secret.file_pattern.discovery);
        assert_eq!(DirectGet, secret.conflict_check);

        let sa = policy_for(ResourceKind::ServiceAccount);
        assert_eq!(FullScan, sa.file_pattern.discovery);
        assert_eq!(DirectGet, sa.conflict_check);

        for kind in &[ResourceKind::Pod, ResourceKind::ReplicaSet, ResourceKind::Deployment, ResourceKind::ConfigMap, ResourceKind::StatefulSet] {
            let policy = policy_for(*kind);
            assert_eq!(ListScan, policy.conflict_check);
            assert_eq!(Glob(leak(format!("{}-*.json", kind.tag()))), policy.file_pattern.discovery);
        }
    }

    #[test]
    fn policies_by_rank_visits_every_kind_once_with_dependencies_first() {
        let order = policies_by_rank().iter().map(|p| p.kind).collect::<Vec<_>>();
        assert_eq!(9, order.len());
        let position = |kind| order.iter().position(|k| *k == kind).unwrap();
        assert!(position(ResourceKind::ConfigMap) < position(ResourceKind::Pod));
        assert!(position(ResourceKind::Secret) < position(ResourceKind::Deployment));
        assert!(position(ResourceKind::ServiceAccount) < position(ResourceKind::StatefulSet));
        assert!(position(ResourceKind::PersistentVolumeClaim) < position(ResourceKind::StatefulSet));
    }

    fn leak(s: String) -> &'static str {
        Box::leak(s.into_boxed_str())
    }
}
