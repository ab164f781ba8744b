//! Priority and weight annotations on exposing objects.

use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::error;

use gslb_core::models::{HostIp, DEFAULT_PRIORITY, DEFAULT_WEIGHT};

use crate::discovery::Candidate;

/// Annotation keys read from the winning object
#[derive(Debug, Clone)]
pub struct AnnotationKeys {
    pub priority: String,
    pub weight: String,
}

fn parse_or_default<T: FromStr + Copy>(
    annotations: &BTreeMap<String, String>,
    key: &str,
    default: T,
    owner: &str,
) -> T {
    let Some(raw) = annotations.get(key) else {
        return default;
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return default;
    }
    raw.parse().unwrap_or_else(|_| {
        error!(
            annotation = %key,
            value = %raw,
            owner = %owner,
            "Unparseable annotation, using default"
        );
        default
    })
}

/// One entry per distinct exposed IP, carrying the winner's priority and weight
#[must_use]
pub fn build_batch(candidate: &Candidate, keys: &AnnotationKeys, cluster: &str) -> Vec<HostIp> {
    let owner = candidate.owner();
    let priority = parse_or_default(&candidate.annotations, &keys.priority, DEFAULT_PRIORITY, &owner);
    let weight = parse_or_default(&candidate.annotations, &keys.weight, DEFAULT_WEIGHT, &owner);

    let mut batch: Vec<HostIp> = Vec::with_capacity(candidate.ips.len());
    for ip in &candidate.ips {
        if batch.iter().all(|existing| existing.ip_address != *ip) {
            batch.push(HostIp::new(ip.clone(), priority, weight, cluster));
        }
    }
    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::ExposureKind;

    fn keys() -> AnnotationKeys {
        AnnotationKeys {
            priority: "gslb.io/priority".to_string(),
            weight: "gslb.io/weight".to_string(),
        }
    }

    fn candidate(annotations: &[(&str, &str)]) -> Candidate {
        Candidate {
            hostname: "app.example.com".to_string(),
            kind: ExposureKind::Service,
            namespace: "default".to_string(),
            name: "web".to_string(),
            ips: vec!["1.1.1.1".to_string(), "1.1.1.2".to_string(), "1.1.1.1".to_string()],
            annotations: annotations
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_defaults_without_annotations() {
        let batch = build_batch(&candidate(&[]), &keys(), "east");
        assert_eq!(batch.len(), 2);
        assert!(batch.iter().all(|ip| ip.priority == 0 && ip.weight == 50));
        assert!(batch.iter().all(|ip| ip.cluster_identifier == "east"));
    }

    #[test]
    fn test_annotations_applied() {
        let batch = build_batch(
            &candidate(&[("gslb.io/priority", "2"), ("gslb.io/weight", " 10 ")]),
            &keys(),
            "east",
        );
        assert!(batch.iter().all(|ip| ip.priority == 2 && ip.weight == 10));
    }

    #[test]
    fn test_unparseable_falls_back() {
        let batch = build_batch(
            &candidate(&[("gslb.io/priority", "high"), ("gslb.io/weight", "-5")]),
            &keys(),
            "east",
        );
        assert!(batch.iter().all(|ip| ip.priority == 0 && ip.weight == 50));
    }
}
