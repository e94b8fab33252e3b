//! Per-tenant sliding-window rate limiter for automatic execution.
//!
//! Keeps a log of execution timestamps per tenant and admits a new automatic
//! action only while fewer than `max_actions_per_window` executions (plus
//! outstanding reservations) fall inside the rolling window.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use autopilot_core::clock::Clock;
use autopilot_core::config::RateLimitConfig;
use chrono::{DateTime, Utc};
use tracing::debug;

#[derive(Debug, Default)]
struct TenantWindow {
    executed: VecDeque<DateTime<Utc>>,
    reserved: u32,
}

impl TenantWindow {
    fn prune(&mut self, cutoff: DateTime<Utc>) {
        self.executed.retain(|at| *at > cutoff);
    }

    fn in_use(&self) -> usize {
        self.executed.len() + self.reserved as usize
    }
}

/// Prune a tenant's window and return its usage. Windows left empty are
/// removed so tenants that stop acting do not stay in the map.
fn prune_tenant(
    windows: &mut HashMap<String, TenantWindow>,
    tenant_id: &str,
    cutoff: DateTime<Utc>,
) -> usize {
    let Some(window) = windows.get_mut(tenant_id) else {
        return 0;
    };
    window.prune(cutoff);
    let in_use = window.in_use();
    if in_use == 0 {
        windows.remove(tenant_id);
    }
    in_use
}

/// Admission control shared by every orchestration call.
pub struct RateLimiter {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    windows: Mutex<HashMap<String, TenantWindow>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TenantWindow>> {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cutoff(&self) -> DateTime<Utc> {
        self.clock.now() - self.config.window()
    }

    /// Whether one more automatic execution would be admitted right now.
    pub fn can_execute_action(&self, tenant_id: &str) -> bool {
        let cutoff = self.cutoff();
        let in_use = prune_tenant(&mut self.lock(), tenant_id, cutoff);
        let allowed = in_use < self.config.max_actions_per_window as usize;
        debug!(tenant = %tenant_id, allowed, "Rate limit check");
        allowed
    }

    /// Count one automatic execution against the tenant's window.
    pub fn increment_action_count(&self, tenant_id: &str) {
        let now = self.clock.now();
        self.lock()
            .entry(tenant_id.to_string())
            .or_default()
            .executed
            .push_back(now);
    }

    /// Atomically check and reserve a slot.
    ///
    /// The returned permit holds the slot until it is committed (the
    /// execution happened) or dropped (the slot is released).
    pub fn try_acquire(&self, tenant_id: &str) -> Option<RatePermit<'_>> {
        let cutoff = self.cutoff();
        let mut windows = self.lock();
        let in_use = prune_tenant(&mut windows, tenant_id, cutoff);
        if in_use >= self.config.max_actions_per_window as usize {
            debug!(tenant = %tenant_id, in_use, "Rate limit reached");
            return None;
        }
        windows.entry(tenant_id.to_string()).or_default().reserved += 1;
        Some(RatePermit {
            limiter: self,
            tenant_id: tenant_id.to_string(),
            settled: false,
        })
    }

    /// Seed the windows from executions persisted before a restart.
    pub fn hydrate<I>(&self, executions: I)
    where
        I: IntoIterator<Item = (String, DateTime<Utc>)>,
    {
        let cutoff = self.cutoff();
        let mut windows = self.lock();
        let mut seeded = 0usize;
        for (tenant_id, at) in executions {
            if at > cutoff {
                windows.entry(tenant_id).or_default().executed.push_back(at);
                seeded += 1;
            }
        }
        for window in windows.values_mut() {
            window.executed.make_contiguous().sort();
        }
        debug!(seeded, "Rate limiter hydrated");
    }

    /// Executions plus reservations currently counted for a tenant.
    pub fn current_count(&self, tenant_id: &str) -> usize {
        let cutoff = self.cutoff();
        prune_tenant(&mut self.lock(), tenant_id, cutoff)
    }

    fn settle(&self, tenant_id: &str, executed: bool) {
        let now = self.clock.now();
        let mut windows = self.lock();
        let window = windows.entry(tenant_id.to_string()).or_default();
        window.reserved = window.reserved.saturating_sub(1);
        if executed {
            window.executed.push_back(now);
        }
        if window.in_use() == 0 {
            windows.remove(tenant_id);
        }
    }

    #[cfg(test)]
    fn tracked_tenants(&self) -> usize {
        self.lock().len()
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .finish()
    }
}

/// A reserved rate-limit slot. Released on drop unless committed.
#[must_use = "dropping a permit releases the reserved slot"]
pub struct RatePermit<'a> {
    limiter: &'a RateLimiter,
    tenant_id: String,
    settled: bool,
}

impl RatePermit<'_> {
    /// Record the execution the slot was reserved for.
    pub fn commit(mut self) {
        self.limiter.settle(&self.tenant_id, true);
        self.settled = true;
    }
}

impl Drop for RatePermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.limiter.settle(&self.tenant_id, false);
        }
    }
}
