//! Exporter-agnostic series identity
//!
//! Energy exporters and kube-state-metrics disagree on label names; these
//! helpers read the namespace and pod from whichever variant is present.

use super::prometheus::Series;

const NAMESPACE_LABELS: &[&str] = &[
    "namespace",
    "container_namespace",
    "pod_namespace",
    "kubernetes_namespace",
    "ns",
];

const POD_LABELS: &[&str] = &["pod", "pod_name", "podname", "pod_uid", "podid"];

fn first_label<'a>(series: &'a Series, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .filter_map(|name| series.label(name))
        .map(str::trim)
        .find(|value| !value.is_empty())
}

pub fn namespace_of(series: &Series) -> Option<&str> {
    first_label(series, NAMESPACE_LABELS)
}

pub fn pod_of(series: &Series) -> Option<&str> {
    first_label(series, POD_LABELS)
}
