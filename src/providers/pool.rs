use dashmap::DashMap;
use std::collections::BTreeMap;

use crate::models::{PoolStats, ProxyInfo};

/// Adapter-local cache of issued credentials, keyed by proxy id
#[derive(Debug, Default)]
pub struct ProxyPool {
    entries: DashMap<String, ProxyInfo>,
}

impl ProxyPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, proxy: ProxyInfo) {
        self.entries.insert(proxy.id.clone(), proxy);
    }

    /// Insert every proxy and hand the batch back to the caller
    pub fn cache_all(&self, proxies: Vec<ProxyInfo>) -> Vec<ProxyInfo> {
        for proxy in &proxies {
            self.insert(proxy.clone());
        }
        proxies
    }

    pub fn get(&self, id: &str) -> Option<ProxyInfo> {
        self.entries.get(id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, id: &str) -> Option<ProxyInfo> {
        self.entries.remove(id).map(|(_, proxy)| proxy)
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record a health check outcome against a cached proxy; unknown ids are ignored
    pub fn record_check(&self, id: &str, healthy: bool, latency_ms: u32) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            if healthy {
                entry.failure_count = 0;
                entry.latency = latency_ms;
            } else {
                entry.failure_count = entry.failure_count.saturating_add(1);
            }
        }
    }

    pub fn set_in_use(&self, id: &str, in_use: bool) -> bool {
        match self.entries.get_mut(id) {
            Some(mut entry) => {
                entry.in_use = in_use;
                true
            }
            None => false,
        }
    }

    pub fn stats(&self) -> PoolStats {
        let mut stats = PoolStats::default();
        let mut by_country = BTreeMap::new();
        let mut quality_sum = 0u64;
        let mut latency_sum = 0u64;

        for entry in self.entries.iter() {
            let proxy = entry.value();
            stats.total += 1;
            if proxy.in_use {
                stats.in_use += 1;
            }
            if !proxy.is_healthy() {
                stats.unhealthy += 1;
            }
            quality_sum += proxy.quality as u64;
            latency_sum += proxy.latency as u64;
            *by_country.entry(proxy.location.country.clone()).or_insert(0) += 1;
        }

        stats.available = stats.total - stats.in_use;
        stats.by_country = by_country;
        if stats.total > 0 {
            stats.average_quality = quality_sum as f64 / stats.total as f64;
            stats.average_latency = latency_sum as f64 / stats.total as f64;
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProxyLocation, ProxyProtocol};
    use chrono::Utc;
    use serde_json::Map;

    fn proxy(id: &str, country: &str, quality: u8, latency: u32) -> ProxyInfo {
        ProxyInfo {
            id: id.to_string(),
            host: "gw.example".to_string(),
            port: 8000,
            username: None,
            password: None,
            protocol: ProxyProtocol::Http,
            provider: "smartproxy".to_string(),
            location: ProxyLocation {
                country: country.to_string(),
                ..Default::default()
            },
            quality,
            latency,
            in_use: false,
            failure_count: 0,
            cost_per_gb: 1.0,
            session_id: None,
            expires_at: None,
            metadata: Map::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_insert_get_remove() {
        let pool = ProxyPool::new();
        pool.insert(proxy("a", "US", 90, 0));
        pool.insert(proxy("a", "GB", 80, 0));

        assert_eq!(pool.len(), 1);
        assert_eq!(pool.get("a").unwrap().location.country, "GB");
        assert!(pool.remove("a").is_some());
        assert!(pool.remove("a").is_none());
        assert!(pool.is_empty());
    }

    #[test]
    fn test_stats_breakdown() {
        let pool = ProxyPool::new();
        let returned = pool.cache_all(vec![
            proxy("a", "US", 90, 100),
            proxy("b", "US", 80, 200),
            proxy("c", "DE", 70, 300),
        ]);
        assert_eq!(returned.len(), 3);

        assert!(pool.set_in_use("a", true));
        assert!(!pool.set_in_use("missing", true));
        for _ in 0..3 {
            pool.record_check("c", false, 0);
        }

        let stats = pool.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.in_use, 1);
        assert_eq!(stats.available, 2);
        assert_eq!(stats.unhealthy, 1);
        assert_eq!(stats.by_country.get("US"), Some(&2));
        assert_eq!(stats.by_country.get("DE"), Some(&1));
        assert!((stats.average_quality - 80.0).abs() < 1e-9);
        assert!((stats.average_latency - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_healthy_check_resets_failures() {
        let pool = ProxyPool::new();
        pool.insert(proxy("a", "US", 90, 0));
        pool.record_check("a", false, 0);
        pool.record_check("a", true, 42);

        let cached = pool.get("a").unwrap();
        assert_eq!(cached.failure_count, 0);
        assert_eq!(cached.latency, 42);
    }

    #[test]
    fn test_empty_stats() {
        let stats = ProxyPool::new().stats();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.average_quality, 0.0);
    }
}
