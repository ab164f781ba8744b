//! Hostname ownership conflicts.
//!
//! A hostname has one valid authority: exactly one service, or one or more
//! ingresses that all expose the same IP set. Everything else is excluded from
//! the pass. Reasons accumulate and an excluded hostname is never reinstated.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::warn;

use crate::discovery::{Candidate, ExposureKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    MultipleServices,
    ServiceAndIngress,
    InconsistentIngressIps,
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::MultipleServices => "claimed by more than one service",
            Self::ServiceAndIngress => "claimed by both a service and an ingress",
            Self::InconsistentIngressIps => "ingresses expose different addresses",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Default)]
pub struct Resolution {
    /// Winning claim per valid hostname
    pub valid: BTreeMap<String, Candidate>,
    pub invalid: BTreeMap<String, BTreeSet<ExclusionReason>>,
}

fn ip_set(candidate: &Candidate) -> BTreeSet<&str> {
    candidate.ips.iter().map(String::as_str).collect()
}

fn exclusion_reasons(claims: &[Candidate]) -> BTreeSet<ExclusionReason> {
    let services: BTreeSet<String> = claims
        .iter()
        .filter(|c| c.kind == ExposureKind::Service)
        .map(Candidate::owner)
        .collect();
    let ingresses: Vec<&Candidate> = claims
        .iter()
        .filter(|c| c.kind == ExposureKind::Ingress)
        .collect();

    let mut reasons = BTreeSet::new();
    if services.len() > 1 {
        reasons.insert(ExclusionReason::MultipleServices);
    }
    if !services.is_empty() && !ingresses.is_empty() {
        reasons.insert(ExclusionReason::ServiceAndIngress);
    }
    if let Some((first, rest)) = ingresses.split_first() {
        let expected = ip_set(first);
        if rest.iter().any(|other| ip_set(other) != expected) {
            reasons.insert(ExclusionReason::InconsistentIngressIps);
        }
    }
    reasons
}

/// Split claims into one winner per valid hostname and reasons per invalid one.
///
/// Among several consistent ingresses, the first by namespace then name wins,
/// so its annotations decide priority and weight.
#[must_use]
pub fn resolve(candidates: Vec<Candidate>) -> Resolution {
    let mut by_hostname: BTreeMap<String, Vec<Candidate>> = BTreeMap::new();
    for candidate in candidates {
        by_hostname
            .entry(candidate.hostname.clone())
            .or_default()
            .push(candidate);
    }

    let mut resolution = Resolution::default();
    for (hostname, mut claims) in by_hostname {
        let reasons = exclusion_reasons(&claims);
        if !reasons.is_empty() {
            let owners: Vec<String> = claims.iter().map(Candidate::owner).collect();
            let summary: Vec<String> = reasons.iter().map(ToString::to_string).collect();
            warn!(
                hostname = %hostname,
                owners = ?owners,
                reasons = %summary.join("; "),
                "Hostname conflict, excluding from this pass"
            );
            resolution.invalid.insert(hostname, reasons);
            continue;
        }

        claims.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
        if let Some(winner) = claims.into_iter().next() {
            resolution.valid.insert(hostname, winner);
        }
    }
    resolution
}
