//! Label summary encodings shared by the enrichment strategies.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Node labels carried into the node record. The key is kept even when
/// the label is absent so downstream consumers see a fixed shape.
const NODE_SUMMARY_LABELS: [&str; 4] = [
    "node.kubernetes.io/instance-type",
    "topology.kubernetes.io/region",
    "topology.kubernetes.io/zone",
    "kubernetes.io/os",
];

/// Renders a label mapping as comma-joined `key=value` pairs.
///
/// Iteration order is the map's own and is not stable across runs;
/// consumers must treat the summary as a set of pairs, not a sequence.
pub fn label_summary(labels: &HashMap<String, String>) -> String {
    let mut out = String::new();
    for (i, (key, value)) in labels.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(key);
        out.push('=');
        out.push_str(value);
    }
    out
}

/// Renders the fixed node-label allow-list as `key=value` pairs joined
/// by commas. A missing label keeps its key and drops the `=value`.
pub fn node_label_summary(labels: &HashMap<String, String>) -> String {
    let mut out = String::new();
    for (i, key) in NODE_SUMMARY_LABELS.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(key);
        if let Some(value) = labels.get(*key) {
            out.push('=');
            out.push_str(value);
        }
    }
    out
}

/// Returns the value of the first label whose key starts with `app`,
/// or an empty string when none does.
pub fn find_app_label(labels: &HashMap<String, String>) -> String {
    labels
        .iter()
        .find(|(key, _)| key.starts_with("app"))
        .map(|(_, value)| value.clone())
        .unwrap_or_default()
}

/// The Kubernetes recommended app labels, one field per label, empty
/// string when the pod does not carry it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppLabels {
    pub name: String,
    pub instance: String,
    pub version: String,
    pub component: String,
    pub part_of: String,
    pub managed_by: String,
}

impl AppLabels {
    pub fn from_labels(labels: &HashMap<String, String>) -> Self {
        let get = |key: &str| labels.get(key).cloned().unwrap_or_default();
        Self {
            name: get("app.kubernetes.io/name"),
            instance: get("app.kubernetes.io/instance"),
            version: get("app.kubernetes.io/version"),
            component: get("app.kubernetes.io/component"),
            part_of: get("app.kubernetes.io/part-of"),
            managed_by: get("app.kubernetes.io/managed-by"),
        }
    }
}
