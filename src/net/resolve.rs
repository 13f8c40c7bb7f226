//! Hostname resolution (IPv4 and IPv6) and the proxy host cache.

use std::net::IpAddr;

use hickory_resolver::TokioResolver;
use hickory_resolver::config::ResolverConfig;
use hickory_resolver::name_server::TokioConnectionProvider;
use parking_lot::Mutex;
use tracing::debug;

/// Async resolver shared by server connections and DCC.
pub struct Resolver {
    inner: TokioResolver,
}

impl Resolver {
    pub fn new() -> Self {
        let inner = TokioResolver::builder_tokio()
            .map(|b| b.build())
            .unwrap_or_else(|_| {
                TokioResolver::builder_with_config(
                    ResolverConfig::default(),
                    TokioConnectionProvider::default(),
                )
                .build()
            });
        Self { inner }
    }

    /// First address for `host`. Literal addresses are returned as is.
    pub async fn lookup(&self, host: &str) -> Option<IpAddr> {
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Some(ip);
        }
        match self.inner.lookup_ip(host).await {
            Ok(response) => response.iter().next(),
            Err(e) => {
                debug!(host = %host, error = %e, "lookup failed");
                None
            }
        }
    }

    /// Resolve through a single-entry cache. Used for the proxy host, which
    /// is looked up for every DCC connect.
    pub async fn lookup_cached(&self, cache: &DnsCache, host: &str) -> Option<IpAddr> {
        if let Some(ip) = cache.get(host) {
            return Some(ip);
        }
        let ip = self.lookup(host).await?;
        cache.put(host, ip);
        Some(ip)
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Remembers the most recently resolved host. A lookup of a different host
/// overwrites the entry.
#[derive(Debug, Default)]
pub struct DnsCache {
    entry: Mutex<Option<(String, IpAddr)>>,
}

impl DnsCache {
    pub fn get(&self, host: &str) -> Option<IpAddr> {
        let entry = self.entry.lock();
        match &*entry {
            Some((cached, ip)) if cached.eq_ignore_ascii_case(host) => Some(*ip),
            _ => None,
        }
    }

    pub fn put(&self, host: &str, ip: IpAddr) {
        *self.entry.lock() = Some((host.to_owned(), ip));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_cache_single_entry() {
        let cache = DnsCache::default();
        let a = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1));
        let b = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 2));
        cache.put("proxy.example", a);
        assert_eq!(cache.get("PROXY.example"), Some(a));
        cache.put("other.example", b);
        assert_eq!(cache.get("proxy.example"), None);
        assert_eq!(cache.get("other.example"), Some(b));
    }

    #[tokio::test]
    async fn test_literal_addresses() {
        let resolver = Resolver::new();
        assert_eq!(
            resolver.lookup("127.0.0.1").await,
            Some(IpAddr::V4(Ipv4Addr::LOCALHOST))
        );
        assert_eq!(
            resolver.lookup("[::1]").await,
            Some(IpAddr::V6(Ipv6Addr::LOCALHOST))
        );
    }

    #[tokio::test]
    async fn test_cached_lookup_fills_cache() {
        let resolver = Resolver::new();
        let cache = DnsCache::default();
        let ip = resolver.lookup_cached(&cache, "10.1.2.3").await;
        assert_eq!(cache.get("10.1.2.3"), ip);
    }
}
