//! Projection of a snapshot into flat metric records
//!
//! Pure and total: a present usage field yields exactly one record, an
//! absent one yields none. Record order carries no meaning because the
//! registry addresses samples by label values.

use crate::models::{ResourceUsage, Snapshot};
use crate::schema::{LabelPolicy, MetricSpec, Scope, Volume};

/// One gauge sample
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord {
    pub spec: &'static MetricSpec,
    /// Label pairs in the order given by [`LabelPolicy::label_keys`]
    pub labels: Vec<(&'static str, String)>,
    pub value: f64,
}

impl MetricRecord {
    pub fn name(&self) -> String {
        self.spec.fq_name()
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Flatten one snapshot into records
pub fn project(snapshot: &Snapshot, policy: LabelPolicy) -> Vec<MetricRecord> {
    let mut records = Vec::new();
    let node = snapshot.node_name();

    for pod in &snapshot.pods {
        let pod_ref = &pod.pod_ref;
        let uid = pod_ref.uid.as_deref().unwrap_or_default();

        for container in &pod.containers {
            let labels = label_values(
                policy,
                Scope::Container,
                &[
                    node,
                    pod_ref.name.as_str(),
                    uid,
                    pod_ref.namespace.as_str(),
                    container.name.as_str(),
                ],
            );
            if let Some(logs) = &container.logs {
                push_usage(&mut records, Volume::ContainerLogs, logs, &labels);
            }
            if let Some(rootfs) = &container.rootfs {
                push_usage(&mut records, Volume::ContainerRootfs, rootfs, &labels);
            }
        }

        if let Some(ephemeral) = &pod.ephemeral_storage {
            let labels = label_values(
                policy,
                Scope::Pod,
                &[node, pod_ref.name.as_str(), uid, pod_ref.namespace.as_str()],
            );
            push_usage(&mut records, Volume::PodEphemeralStorage, ephemeral, &labels);
        }
    }

    if let Some(image_fs) = snapshot.image_fs() {
        let labels = label_values(policy, Scope::Node, &[node]);
        push_usage(&mut records, Volume::NodeRuntimeImageFs, image_fs, &labels);
    }

    records
}

/// Pair label keys with values. `values` lists the candidate values in
/// `node, pod, uid, namespace, name` order, truncated to the scope; the
/// uid slot is skipped when the policy leaves it out.
fn label_values(
    policy: LabelPolicy,
    scope: Scope,
    values: &[&str],
) -> Vec<(&'static str, String)> {
    let keys = policy.label_keys(scope);
    let values = values
        .iter()
        .enumerate()
        .filter(|(idx, _)| policy.include_pod_uid || *idx != 2)
        .map(|(_, v)| *v);

    keys.iter()
        .copied()
        .zip(values)
        .map(|(k, v)| (k, v.to_string()))
        .collect()
}

fn push_usage(
    records: &mut Vec<MetricRecord>,
    volume: Volume,
    usage: &ResourceUsage,
    labels: &[(&'static str, String)],
) {
    for spec in MetricSpec::for_volume(volume) {
        if let Some(value) = spec.field.read(usage) {
            records.push(MetricRecord {
                spec,
                labels: labels.to_vec(),
                value: value as f64,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContainerEntry, NodeEntry, NodeRuntime, PodEntry, PodRef};
    use crate::schema::METRICS;

    fn full_usage(base: u64) -> ResourceUsage {
        ResourceUsage {
            available_bytes: Some(base),
            capacity_bytes: Some(base + 1),
            used_bytes: Some(base + 2),
            inodes_free: Some(base + 3),
            inodes: Some(base + 4),
            inodes_used: Some(base + 5),
        }
    }

    fn snapshot_with(pods: Vec<PodEntry>, image_fs: Option<ResourceUsage>) -> Snapshot {
        Snapshot {
            node: NodeEntry {
                node_name: "node-1".to_string(),
                runtime: image_fs.map(|fs| NodeRuntime { image_fs: Some(fs) }),
            },
            pods,
        }
    }

    fn pod(name: &str, containers: Vec<ContainerEntry>, eph: Option<ResourceUsage>) -> PodEntry {
        PodEntry {
            pod_ref: PodRef {
                name: name.to_string(),
                namespace: "default".to_string(),
                uid: Some(format!("{}-uid", name)),
            },
            containers,
            ephemeral_storage: eph,
        }
    }

    fn container(
        name: &str,
        logs: Option<ResourceUsage>,
        rootfs: Option<ResourceUsage>,
    ) -> ContainerEntry {
        ContainerEntry {
            name: name.to_string(),
            logs,
            rootfs,
        }
    }

    #[test]
    fn test_empty_snapshot_projects_nothing() {
        let records = project(&snapshot_with(vec![], None), LabelPolicy::default());
        assert!(records.is_empty());
    }

    #[test]
    fn test_fully_populated_snapshot_emits_every_metric_once() {
        let snapshot = snapshot_with(
            vec![pod(
                "web-0",
                vec![container("web", Some(full_usage(10)), Some(full_usage(20)))],
                Some(full_usage(30)),
            )],
            Some(full_usage(40)),
        );

        let records = project(&snapshot, LabelPolicy::default());

        assert_eq!(records.len(), METRICS.len());
        for spec in METRICS.iter() {
            assert_eq!(
                records.iter().filter(|r| std::ptr::eq(r.spec, spec)).count(),
                1,
                "{}",
                spec.name
            );
        }
    }

    #[test]
    fn test_absent_fields_are_not_fabricated() {
        let logs = ResourceUsage {
            used_bytes: Some(8192),
            ..Default::default()
        };
        let snapshot = snapshot_with(
            vec![pod("web-0", vec![container("web", Some(logs), None)], None)],
            None,
        );

        let records = project(&snapshot, LabelPolicy::default());

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name(), "kube_summary_container_logs_used_bytes");
        assert_eq!(records[0].value, 8192.0);
    }

    #[test]
    fn test_label_keys_match_schema() {
        let snapshot = snapshot_with(
            vec![pod(
                "web-0",
                vec![container("web", Some(full_usage(1)), Some(full_usage(2)))],
                Some(full_usage(3)),
            )],
            Some(full_usage(4)),
        );

        for policy in [LabelPolicy::default(), LabelPolicy::with_pod_uid()] {
            for record in project(&snapshot, policy) {
                let keys: Vec<&str> = record.labels.iter().map(|(k, _)| *k).collect();
                assert_eq!(keys, policy.label_keys(record.spec.scope()));
                assert!(record.labels.iter().all(|(_, v)| !v.is_empty()));
            }
        }
    }

    #[test]
    fn test_label_values() {
        let snapshot = snapshot_with(
            vec![pod(
                "web-0",
                vec![container("web", None, Some(full_usage(1)))],
                Some(full_usage(2)),
            )],
            Some(full_usage(3)),
        );

        let records = project(&snapshot, LabelPolicy::with_pod_uid());

        let rootfs = records
            .iter()
            .find(|r| r.spec.volume == Volume::ContainerRootfs)
            .unwrap();
        assert_eq!(rootfs.label("node"), Some("node-1"));
        assert_eq!(rootfs.label("pod"), Some("web-0"));
        assert_eq!(rootfs.label("uid"), Some("web-0-uid"));
        assert_eq!(rootfs.label("namespace"), Some("default"));
        assert_eq!(rootfs.label("name"), Some("web"));

        let ephemeral = records
            .iter()
            .find(|r| r.spec.volume == Volume::PodEphemeralStorage)
            .unwrap();
        assert_eq!(ephemeral.label("uid"), Some("web-0-uid"));
        assert_eq!(ephemeral.label("name"), None);

        let image_fs = records
            .iter()
            .find(|r| r.spec.volume == Volume::NodeRuntimeImageFs)
            .unwrap();
        assert_eq!(image_fs.labels, vec![("node", "node-1".to_string())]);
    }

    #[test]
    fn test_logs_and_rootfs_are_independent() {
        let snapshot = snapshot_with(
            vec![pod(
                "web-0",
                vec![
                    container("only-logs", Some(full_usage(1)), None),
                    container("only-rootfs", None, Some(full_usage(2))),
                    container("neither", None, None),
                ],
                None,
            )],
            None,
        );

        let records = project(&snapshot, LabelPolicy::default());

        assert_eq!(records.len(), 12);
        assert!(records
            .iter()
            .filter(|r| r.label("name") == Some("only-logs"))
            .all(|r| r.spec.volume == Volume::ContainerLogs));
        assert!(records
            .iter()
            .filter(|r| r.label("name") == Some("only-rootfs"))
            .all(|r| r.spec.volume == Volume::ContainerRootfs));
        assert!(!records.iter().any(|r| r.label("name") == Some("neither")));
    }

    #[test]
    fn test_projection_is_deterministic() {
        let snapshot = snapshot_with(
            vec![
                pod("a", vec![container("c", Some(full_usage(1)), None)], None),
                pod("b", vec![], Some(full_usage(2))),
            ],
            Some(full_usage(3)),
        );

        let first = project(&snapshot, LabelPolicy::default());
        let second = project(&snapshot, LabelPolicy::default());
        assert_eq!(first, second);
    }

    #[test]
    fn test_missing_uid_projects_empty_value() {
        let mut p = pod("web-0", vec![], Some(full_usage(1)));
        p.pod_ref.uid = None;
        let snapshot = snapshot_with(vec![p], None);

        let records = project(&snapshot, LabelPolicy::with_pod_uid());

        assert_eq!(records.len(), 6);
        assert!(records.iter().all(|r| r.label("uid") == Some("")));
    }
}
