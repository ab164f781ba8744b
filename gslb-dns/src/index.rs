//! Weighted, prioritized candidate lists per hostname.
//!
//! Only the numerically lowest priority group of a host is eligible; other
//! groups are standby. Inside that group every entry owns a contiguous integer
//! range `[weight_min, weight_max]` of width `weight`, so a uniform draw over
//! `[1, total]` picks each entry with probability proportional to its weight.
//! A weight of zero yields an empty range (`weight_min > weight_max`).

use std::net::IpAddr;
use tracing::warn;

use gslb_core::models::Host;
use gslb_core::RandomSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightedEntry {
    pub priority: i32,
    pub weight_min: u32,
    pub weight_max: u32,
    pub ip: IpAddr,
}

impl WeightedEntry {
    #[must_use]
    pub const fn contains(&self, draw: u32) -> bool {
        self.weight_min <= draw && draw <= self.weight_max
    }
}

/// Project a merged host into its answerable entries
#[must_use]
pub fn build_entries(host: &Host) -> Vec<WeightedEntry> {
    let Some(best) = host.host_ips.iter().map(|ip| ip.priority).min() else {
        return Vec::new();
    };

    let mut cursor: u32 = 0;
    let mut entries = Vec::new();
    for host_ip in host.host_ips.iter().filter(|ip| ip.priority == best) {
        let ip = match host_ip.ip_address.parse::<IpAddr>() {
            Ok(ip) => ip,
            Err(_) => {
                warn!(
                    hostname = %host.hostname,
                    ip = %host_ip.ip_address,
                    cluster = %host_ip.cluster_identifier,
                    "Skipping unparseable address"
                );
                continue;
            }
        };
        let weight_min = cursor.saturating_add(1);
        cursor = cursor.saturating_add(host_ip.weight);
        entries.push(WeightedEntry {
            priority: best,
            weight_min,
            weight_max: cursor,
            ip,
        });
    }
    entries
}

/// Pick one entry.
///
/// A lone entry is returned even at weight zero. When every weight is zero the
/// pick is uniform; otherwise zero-weight entries are never chosen.
pub fn select<'a>(entries: &'a [WeightedEntry], random: &dyn RandomSource) -> Option<&'a WeightedEntry> {
    match entries {
        [] => None,
        [only] => Some(only),
        _ => {
            let total = entries.iter().map(|e| e.weight_max).max().unwrap_or(0);
            if total == 0 {
                let last = u32::try_from(entries.len() - 1).unwrap_or(u32::MAX);
                let index = random.next_in_range(0, last) as usize;
                return entries.get(index);
            }
            let draw = random.next_in_range(1, total);
            entries.iter().find(|e| e.contains(draw))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gslb_core::models::HostIp;
    use gslb_core::random::SeededRandom;

    fn host(ips: &[(&str, i32, u32)]) -> Host {
        Host::new(
            "app.example.com".to_string(),
            ips.iter()
                .map(|(ip, priority, weight)| HostIp::new(*ip, *priority, *weight, "east"))
                .collect(),
        )
    }

    /// Always returns the configured value, clamped to the range
    struct FixedRandom(u32);

    impl RandomSource for FixedRandom {
        fn next_in_range(&self, low: u32, high: u32) -> u32 {
            self.0.clamp(low, high)
        }
    }

    #[test]
    fn test_ranges_are_contiguous() {
        let entries = build_entries(&host(&[
            ("10.0.0.1", 0, 30),
            ("10.0.0.2", 0, 0),
            ("10.0.0.3", 0, 70),
        ]));

        assert_eq!((entries[0].weight_min, entries[0].weight_max), (1, 30));
        assert_eq!((entries[1].weight_min, entries[1].weight_max), (31, 30));
        assert_eq!((entries[2].weight_min, entries[2].weight_max), (31, 100));
        assert!(!entries[1].contains(30));
        assert!(!entries[1].contains(31));
    }

    #[test]
    fn test_only_lowest_priority_is_indexed() {
        let entries = build_entries(&host(&[("10.0.0.1", 1, 50), ("10.0.0.2", 0, 50)]));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].ip, "10.0.0.2".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_unparseable_address_is_skipped() {
        let entries = build_entries(&host(&[("not-an-ip", 0, 50), ("10.0.0.2", 0, 50)]));
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_range_boundaries() {
        let entries = build_entries(&host(&[("10.0.0.1", 0, 30), ("10.0.0.2", 0, 70)]));

        let first = select(&entries, &FixedRandom(30)).unwrap();
        assert_eq!(first.ip.to_string(), "10.0.0.1");
        let second = select(&entries, &FixedRandom(31)).unwrap();
        assert_eq!(second.ip.to_string(), "10.0.0.2");
    }

    #[test]
    fn test_lone_zero_weight_entry_is_selected() {
        let entries = build_entries(&host(&[("10.0.0.1", 0, 0)]));
        assert_eq!(select(&entries, &FixedRandom(0)).unwrap().ip.to_string(), "10.0.0.1");
    }

    #[test]
    fn test_all_zero_weights_pick_uniformly() {
        let entries = build_entries(&host(&[("10.0.0.1", 0, 0), ("10.0.0.2", 0, 0)]));
        assert_eq!(select(&entries, &FixedRandom(0)).unwrap().ip.to_string(), "10.0.0.1");
        assert_eq!(select(&entries, &FixedRandom(1)).unwrap().ip.to_string(), "10.0.0.2");
    }

    #[test]
    fn test_zero_weight_never_chosen_beside_positive_weight() {
        let entries = build_entries(&host(&[("10.0.0.9", 0, 0), ("10.0.0.1", 0, 100)]));
        let random = SeededRandom::new(1);
        for _ in 0..10_000 {
            assert_eq!(select(&entries, &random).unwrap().ip.to_string(), "10.0.0.1");
        }
    }

    #[test]
    fn test_selection_is_proportional_to_weight() {
        let entries = build_entries(&host(&[("10.0.0.1", 0, 25), ("10.0.0.2", 0, 75)]));
        let random = SeededRandom::new(99);
        let picks = (0..10_000)
            .filter(|_| select(&entries, &random).unwrap().ip.to_string() == "10.0.0.1")
            .count();
        assert!((2_000..3_000).contains(&picks), "got {picks}");
    }

    #[test]
    fn test_empty_host() {
        assert!(build_entries(&host(&[])).is_empty());
        assert!(select(&[], &FixedRandom(0)).is_none());
    }
}
