use super::{Error, ExportReport};
use crate::cluster::ClusterApi;
use crate::policy::KindPolicy;
use crate::storage::BackupStorage;

use std::path::Path;

pub(crate) fn export(
    cluster: &dyn ClusterApi,
    storage: &dyn BackupStorage,
    policy: &KindPolicy,
    namespace: &str,
    backup_dir: &Path,
) -> Result<ExportReport, Error> {
    let kind = policy.kind;
    let objects = cluster
        .list(kind, namespace)
        .map_err(|err| Error::export_io(kind, err))?;
    log::debug!("Found {} {} objects in namespace '{}'", objects.len(), kind, namespace);

    let mut report = ExportReport::new(kind);
    for mut object in objects {
        if policy.is_excluded(object.name()) {
            log::debug!("Skipping excluded {} '{}'", kind, object.name());
            report.excluded += 1;
            continue;
        }

        let path = backup_dir.join(policy.file_pattern.file_name(object.name()));
        if policy.skip_if_exists && storage.exists(&path) {
            log::debug!("Leaving existing backup file {} in place", path.display());
            report.skipped_existing += 1;
            continue;
        }

        (policy.export_normalize)(&mut object);
        let bytes = object
            .to_pretty_json()
            .map_err(|err| Error::export_io(kind, err))?;
        storage
            .write_file(&path, &bytes)
            .map_err(|err| Error::export_io(kind, err))?;
        log::trace!("Wrote {} '{}' to {}", kind, object.name(), path.display());
        report.written += 1;
    }

    log::info!(
        "Exported {} {} objects from namespace '{}', skipped_existing: {}, excluded: {}",
        report.written,
        kind,
        namespace,
        report.skipped_existing,
        report.excluded
    );
    Ok(report)
}

#[cfg(test)]
mod test {
    use crate::cluster::ClusterError;
    use crate::engine::{Engine, Error, IoCause};
    use crate::kind::ResourceKind;
    use crate::resource::K8sResource;
    use crate::storage::BackupStorage;
    use crate::testkit::{FakeCluster, MemoryStorage};

    use serde_json::{json, Value};
    use std::path::{Path, PathBuf};

    fn backup_dir() -> PathBuf {
        PathBuf::from("/backups/b1")
    }

    fn read_json(storage: &MemoryStorage, name: &str) -> Value {
        let bytes = storage
            .read_file(&backup_dir().join(name))
            .expect("backup file is missing");
        serde_json::from_slice(&bytes).expect("backup file is not json")
    }

    #[test]
    fn writes_one_pretty_printed_file_per_object() {
        let cluster = FakeCluster::new();
        cluster.insert(ResourceKind::Pod, json!({
            "metadata": {"name": "p1", "namespace": "prod", "resourceVersion": "42"},
            "spec": {"containers": []},
        }));
        let storage = MemoryStorage::with_dir(backup_dir());

        let report = Engine::new(&cluster, &storage)
            .export(ResourceKind::Pod, "prod", &backup_dir())
            .expect("export failed");
        assert_eq!(1, report.written);

        let bytes = storage.read_file(&backup_dir().join("pod-p1.json")).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("{\n  \""), "not pretty printed: {}", text);

        // pods are written exactly as the cluster returned them
        let written = read_json(&storage, "pod-p1.json");
        assert_eq!(Some("42"), written.pointer("/metadata/resourceVersion").and_then(Value::as_str));
        assert_eq!(Some("prod"), written.pointer("/metadata/namespace").and_then(Value::as_str));
        assert_eq!(Some("Pod"), written.pointer("/kind").and_then(Value::as_str));
    }

    #[test]
    fn config_maps_are_normalized_and_the_root_ca_is_excluded() {
        let cluster = FakeCluster::new();
        cluster.insert(ResourceKind::ConfigMap, json!({
            "metadata": {"name": "kube-root-ca.crt", "namespace": "prod", "resourceVersion": "1"},
        }));
        cluster.insert(ResourceKind::ConfigMap, json!({
            "metadata": {"name": "app-config", "namespace": "prod", "resourceVersion": "7"},
            "data": {"mode": "fast"},
        }));
        let storage = MemoryStorage::with_dir(backup_dir());

        let report = Engine::new(&cluster, &storage)
            .export(ResourceKind::ConfigMap, "prod", &backup_dir())
            .expect("export failed");
        assert_eq!(1, report.written);
        assert_eq!(1, report.excluded);
        assert_eq!(vec!["configmap-app-config.json".to_owned()], storage.file_names(&backup_dir()));

        let written = read_json(&storage, "configmap-app-config.json");
        assert_eq!(None, written.pointer("/metadata/namespace"));
        assert_eq!(None, written.pointer("/metadata/resourceVersion"));
        assert_eq!(Some("fast"), written.pointer("/data/mode").and_then(Value::as_str));
    }

    #[test]
    fn existing_files_are_kept_for_kinds_that_skip_if_exists() {
        let cluster = FakeCluster::new();
        cluster.insert(ResourceKind::Service, json!({
            "metadata": {"name": "svc1", "namespace": "prod"},
            "spec": {"clusterIP": "10.0.0.9"},
        }));
        let storage = MemoryStorage::with_dir(backup_dir());
        let path = backup_dir().join("service-svc1.json");
        storage.write_file(&path, b"original bytes").unwrap();

        let report = Engine::new(&cluster, &storage)
            .export(ResourceKind::Service, "prod", &backup_dir())
            .expect("export failed");
        assert_eq!(0, report.written);
        assert_eq!(1, report.skipped_existing);
        assert_eq!(b"original bytes".to_vec(), storage.read_file(&path).unwrap());
    }

    #[test]
    fn existing_files_are_overwritten_for_other_kinds() {
        let cluster = FakeCluster::new();
        cluster.insert(ResourceKind::Secret, json!({
            "metadata": {"name": "creds", "namespace": "prod"},
            "data": {"password": "aHVudGVyMg=="},
        }));
        let storage = MemoryStorage::with_dir(backup_dir());
        let path = backup_dir().join("secret-creds.json");
        storage.write_file(&path, b"stale").unwrap();

        let report = Engine::new(&cluster, &storage)
            .export(ResourceKind::Secret, "prod", &backup_dir())
            .expect("export failed");
        assert_eq!(1, report.written);
        let written = read_json(&storage, "secret-creds.json");
        assert_eq!(Some("aHVudGVyMg=="), written.pointer("/data/password").and_then(Value::as_str));
    }

    #[test]
    fn persistent_volume_claims_are_written_without_a_prefix() {
        let cluster = FakeCluster::new();
        cluster.insert(ResourceKind::PersistentVolumeClaim, json!({
            "metadata": {"name": "data", "namespace": "prod"},
        }));
        let storage = MemoryStorage::with_dir(backup_dir());

        Engine::new(&cluster, &storage)
            .export(ResourceKind::PersistentVolumeClaim, "prod", &backup_dir())
            .expect("export failed");
        assert_eq!(vec!["data.json".to_owned()], storage.file_names(&backup_dir()));
    }

    #[test]
    fn only_objects_in_the_requested_namespace_are_exported() {
        let cluster = FakeCluster::new();
        cluster.insert(ResourceKind::Deployment, json!({"metadata": {"name": "web", "namespace": "prod"}}));
        cluster.insert(ResourceKind::Deployment, json!({"metadata": {"name": "web", "namespace": "staging"}}));
        let storage = MemoryStorage::with_dir(backup_dir());

        let report = Engine::new(&cluster, &storage)
            .export(ResourceKind::Deployment, "staging", &backup_dir())
            .expect("export failed");
        assert_eq!(1, report.written);
        let written = read_json(&storage, "deployment-web.json");
        assert_eq!(Some("staging"), written.pointer("/metadata/namespace").and_then(Value::as_str));
    }

    #[test]
    fn list_failures_are_export_errors() {
        let cluster = FakeCluster::new();
        cluster.fail_list(ResourceKind::StatefulSet, ClusterError::Rejected {
            status: 403,
            message: "forbidden".to_owned(),
        });
        let storage = MemoryStorage::with_dir(backup_dir());

        let err = Engine::new(&cluster, &storage)
            .export(ResourceKind::StatefulSet, "prod", &backup_dir())
            .expect_err("expected an error");
        match err {
            Error::ExportIo { kind, cause: IoCause::Cluster(_) } => assert_eq!(ResourceKind::StatefulSet, kind),
            other => panic!("expected ExportIo, got: {:?}", other),
        }
    }

    #[test]
    fn write_failures_are_export_errors() {
        let cluster = FakeCluster::new();
        cluster.insert(ResourceKind::ReplicaSet, json!({"metadata": {"name": "web-1234", "namespace": "prod"}}));
        // the backup directory was never created
        let storage = MemoryStorage::new();

        let err = Engine::new(&cluster, &storage)
            .export(ResourceKind::ReplicaSet, "prod", Path::new("/nowhere"))
            .expect_err("expected an error");
        match err {
            Error::ExportIo { kind, cause: IoCause::Storage(_) } => assert_eq!(ResourceKind::ReplicaSet, kind),
            other => panic!("expected ExportIo, got: {:?}", other),
        }
    }

    #[test]
    fn exported_files_can_be_parsed_back_into_resources() {
        let cluster = FakeCluster::new();
        cluster.insert(ResourceKind::ServiceAccount, json!({"metadata": {"name": "builder", "namespace": "prod"}}));
        let storage = MemoryStorage::with_dir(backup_dir());
        Engine::new(&cluster, &storage)
            .export(ResourceKind::ServiceAccount, "prod", &backup_dir())
            .expect("export failed");

        let bytes = storage.read_file(&backup_dir().join("serviceaccount-builder.json")).unwrap();
        let parsed = K8sResource::from_slice(&bytes).expect("invalid resource");
        assert_eq!("builder", parsed.name());
        assert_eq!(Some("ServiceAccount"), parsed.kind());
    }
}
