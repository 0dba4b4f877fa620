//! Optional proxy rotation with health tracking.

use std::path::Path;

use parking_lot::Mutex;
use rand::Rng;
use rand::seq::IndexedRandom;

/// A proxy becomes unhealthy after more failures than this.
const MAX_FAILURES: u32 = 5;

/// Source of proxy addresses with success/failure feedback.
pub trait ProxyProvider: Send + Sync {
    fn get_proxy(&self) -> Option<String>;
    fn mark_success(&self, addr: &str);
    fn mark_failure(&self, addr: &str);
}

#[derive(Debug, Clone)]
struct ProxyStats {
    addr: String,
    successes: u32,
    failures: u32,
    healthy: bool,
}

/// Weighted-random pool: healthy proxies with more successes are picked
/// more often; when none are healthy any proxy may be picked.
#[derive(Debug, Default)]
pub struct ProxyPool {
    proxies: Mutex<Vec<ProxyStats>>,
}

impl ProxyPool {
    pub fn from_list(addrs: impl IntoIterator<Item = String>) -> Self {
        let proxies = addrs
            .into_iter()
            .map(|addr| ProxyStats {
                addr,
                successes: 0,
                failures: 0,
                healthy: true,
            })
            .collect();
        Self {
            proxies: Mutex::new(proxies),
        }
    }

    /// One proxy URL per line; blank lines and `#` comments are ignored.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(Self::from_list(
            contents
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(String::from),
        ))
    }

    pub fn len(&self) -> usize {
        self.proxies.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.lock().is_empty()
    }

    pub fn healthy_count(&self) -> usize {
        self.proxies.lock().iter().filter(|p| p.healthy).count()
    }
}

impl ProxyProvider for ProxyPool {
    fn get_proxy(&self) -> Option<String> {
        let proxies = self.proxies.lock();
        let healthy: Vec<&ProxyStats> = proxies.iter().filter(|p| p.healthy).collect();
        let mut rng = rand::rng();

        if healthy.is_empty() {
            return proxies.choose(&mut rng).map(|p| p.addr.clone());
        }

        let total: u64 = healthy.iter().map(|p| u64::from(p.successes) + 1).sum();
        let mut pick = rng.random_range(0..total);
        for proxy in &healthy {
            let weight = u64::from(proxy.successes) + 1;
            if pick < weight {
                return Some(proxy.addr.clone());
            }
            pick -= weight;
        }
        healthy.last().map(|p| p.addr.clone())
    }

    fn mark_success(&self, addr: &str) {
        if let Some(proxy) = self.proxies.lock().iter_mut().find(|p| p.addr == addr) {
            proxy.successes += 1;
            proxy.healthy = true;
        }
    }

    fn mark_failure(&self, addr: &str) {
        if let Some(proxy) = self.proxies.lock().iter_mut().find(|p| p.addr == addr) {
            proxy.failures += 1;
            if proxy.failures > MAX_FAILURES {
                proxy.healthy = false;
                tracing::warn!(target: "provider", proxy = %addr, "proxy marked unhealthy");
            }
        }
    }
}
