use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;

/// Tracks provider-wide cooldowns and per-symbol soft failures after
/// rate-limit responses. Deadlines only ever extend forward; a shorter
/// block request never shortens an existing one.
pub struct CooldownGate {
    blocked_until: Mutex<Option<Instant>>,
    symbol_soft_fail: Mutex<HashMap<String, Instant>>,
}

impl CooldownGate {
    pub fn new() -> Self {
        Self {
            blocked_until: Mutex::new(None),
            symbol_soft_fail: Mutex::new(HashMap::new()),
        }
    }

    /// Extend the provider-wide block to now + `duration` (monotonic max).
    pub fn block_for(&self, duration: Duration) {
        let candidate = Instant::now() + duration;
        let mut guard = self.blocked_until.lock().unwrap();
        match *guard {
            Some(existing) if existing >= candidate => {}
            _ => {
                warn!("provider cooldown engaged for {:?}", duration);
                *guard = Some(candidate);
            }
        }
    }

    /// True while the provider-wide block is in effect.
    pub fn is_blocked(&self) -> bool {
        let guard = self.blocked_until.lock().unwrap();
        matches!(*guard, Some(until) if until > Instant::now())
    }

    /// Mark a symbol as recently failed so callers skip it for `duration`.
    /// Symbols are normalized (trimmed, uppercased); empty keys are ignored.
    pub fn soft_fail(&self, symbol: &str, duration: Duration) {
        let key = normalize(symbol);
        if key.is_empty() {
            return;
        }
        let candidate = Instant::now() + duration;
        let mut map = self.symbol_soft_fail.lock().unwrap();
        match map.get(&key) {
            Some(existing) if *existing >= candidate => {}
            _ => {
                map.insert(key, candidate);
            }
        }
    }

    /// True while the symbol's soft-fail window is in effect.
    pub fn is_soft_failed(&self, symbol: &str) -> bool {
        let key = normalize(symbol);
        if key.is_empty() {
            return false;
        }
        let now = Instant::now();
        let mut map = self.symbol_soft_fail.lock().unwrap();
        match map.get(&key) {
            Some(until) if *until > now => true,
            Some(_) => {
                map.remove(&key);
                false
            }
            None => false,
        }
    }
}

impl Default for CooldownGate {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

/// Enforces a minimum delay between calls to a single upstream provider.
/// The async mutex is held across the sleep so concurrent callers queue.
pub struct ProviderRateLimiter {
    last_call: tokio::sync::Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl ProviderRateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            last_call: tokio::sync::Mutex::new(None),
            min_interval,
        }
    }

    /// Wait until at least `min_interval` has elapsed since the previous
    /// call, then record this call.
    pub async fn wait_if_needed(&self) {
        let mut last_call = self.last_call.lock().await;
        if let Some(last) = *last_call {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last_call = Some(Instant::now());
    }
}
