// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Stream resolver: wave scheduler and public facade.
//!
//! The resolver emits successive waves of probes. Each wave starts a
//! multicast burst (one resolve attempt per allowed protocol stack), then
//! after `multicast_min_rtt` a unicast burst against the known peers, so a
//! fast multicast reply can satisfy the stop condition before the peers are
//! loaded with redundant probes. Waves are paced by the assumed RTTs plus,
//! in continuous mode, the configured idle interval.
//!
//! One-shot resolves drive the waves on the caller's thread until the stop
//! condition holds (cancelled, expired, or enough results past the minimum
//! waiting time). Continuous resolves drive them on a background worker
//! until cancelled, and age results out of the store on every `results()`
//! call.

use crate::clock::{local_clock, FOREVER};
use crate::config::{ApiConfig, CANCEL_POLL_INTERVAL};
use crate::discovery::attempt::ResolveAttempt;
use crate::discovery::endpoints::EndpointRegistry;
use crate::discovery::query::{build_query, check_query};
use crate::discovery::results::ResultStore;
use crate::discovery::stream_info::StreamInfo;
use crate::Result;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Shared stop flags for one resolve run.
///
/// `cancelled` is the caller-facing kill switch and may be set from any
/// thread; `expired` records that the current run should wind down (stop
/// condition met, one-shot deadline hit, or a new run superseding this
/// one). Both are observed by the scheduler and by every resolve attempt
/// within one poll interval.
#[derive(Default)]
pub struct ResolveSignals {
    cancelled: AtomicBool,
    expired: AtomicBool,
}

impl ResolveSignals {
    /// Fresh signals with neither flag set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the current run should stop.
    pub fn stop_requested(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed) || self.expired.load(Ordering::Relaxed)
    }

    /// Whether the resolver was cancelled by the caller.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Wind down the current run without cancelling the resolver.
    pub fn request_stop(&self) {
        self.expired.store(true, Ordering::Relaxed);
    }

    /// Cancel the resolver. Idempotent, safe from any thread.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
        self.expired.store(true, Ordering::Relaxed);
    }

    fn clear_expired(&self) {
        self.expired.store(false, Ordering::Relaxed);
    }
}

/// Wave state for one resolve run. Drives waves on the calling thread
/// until the stop condition holds, then unwinds every outstanding attempt.
struct WaveScheduler {
    cfg: Arc<ApiConfig>,
    registry: EndpointRegistry,
    store: Arc<ResultStore>,
    signals: Arc<ResolveSignals>,
    query: String,
    minimum_count: usize,
    /// Earliest monotonic time at which the minimum-count criterion may stop
    /// the run.
    wait_until: f64,
    /// Zero idle time between waves (bounded one-shot resolves only).
    fast_mode: bool,
    /// Absolute wall-clock deadline of a one-shot run.
    deadline: Option<Instant>,
    /// Registry of outstanding attempts; reaped between waves, joined on
    /// teardown.
    attempts: Vec<ResolveAttempt>,
}

impl WaveScheduler {
    fn run(mut self) {
        log::debug!(
            "[resolver] starting waves (fast_mode={}, minimum={}, query={})",
            self.fast_mode,
            self.minimum_count,
            self.query
        );
        loop {
            self.reap_finished();
            if self.stop_condition() {
                break;
            }
            self.multicast_burst();

            let idle = if self.fast_mode {
                0.0
            } else {
                self.cfg.continuous_resolve_interval
            };
            let mut wave_interval = idle + self.cfg.multicast_min_rtt;
            if !self.registry.unicast().is_empty() {
                // known peer addresses exist: give multicast a head start,
                // then spawn the unicast burst and stretch the wave
                if !self.pace(self.cfg.multicast_min_rtt) {
                    break;
                }
                self.unicast_burst();
                wave_interval += self.cfg.unicast_min_rtt;
                if !self.pace(wave_interval - self.cfg.multicast_min_rtt) {
                    break;
                }
            } else if !self.pace(wave_interval) {
                break;
            }
        }
        // stopping criteria satisfied: unwind the ongoing resolve
        self.signals.request_stop();
        self.join_all();
        log::debug!("[resolver] waves finished ({} streams known)", self.store.len());
    }

    /// Evaluated at the start of each wave.
    fn stop_condition(&self) -> bool {
        if self.signals.stop_requested() {
            return true;
        }
        if self.deadline_hit() {
            return true;
        }
        self.minimum_count > 0
            && self.store.len() >= self.minimum_count
            && local_clock() >= self.wait_until
    }

    fn deadline_hit(&self) -> bool {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                self.signals.request_stop();
                true
            }
            _ => false,
        }
    }

    /// Cancellable sleep. Returns false when the run should stop.
    fn pace(&self, seconds: f64) -> bool {
        let end = Instant::now() + Duration::from_secs_f64(seconds.max(0.0));
        loop {
            if self.signals.stop_requested() || self.deadline_hit() {
                return false;
            }
            let now = Instant::now();
            if now >= end {
                return true;
            }
            thread::sleep((end - now).min(CANCEL_POLL_INTERVAL));
        }
    }

    fn multicast_burst(&mut self) {
        let endpoints = self.registry.multicast().to_vec();
        if endpoints.is_empty() {
            return;
        }
        let max_rtt = self.cfg.multicast_max_rtt;
        if let Err(e) = self.burst(endpoints, max_rtt) {
            log::error!(
                "[resolver] could not start a multicast resolve attempt for any of the \
                 allowed protocol stacks: {}",
                e
            );
        }
    }

    fn unicast_burst(&mut self) {
        let endpoints = self.registry.unicast().to_vec();
        if endpoints.is_empty() {
            return;
        }
        let max_rtt = self.cfg.unicast_max_rtt;
        if let Err(e) = self.burst(endpoints, max_rtt) {
            log::warn!(
                "[resolver] could not start a unicast resolve attempt for any of the \
                 allowed protocol stacks: {}",
                e
            );
        }
    }

    /// One attempt per allowed protocol stack. A stack that fails to open
    /// does not prevent the others; only total failure is reported.
    fn burst(&mut self, endpoints: Vec<SocketAddr>, max_rtt: f64) -> std::io::Result<()> {
        let mut last_error = None;
        let mut failures = 0;
        let stacks = self.registry.stacks().to_vec();
        for stack in &stacks {
            match ResolveAttempt::spawn(
                *stack,
                endpoints.clone(),
                &self.query,
                Arc::clone(&self.store),
                Arc::clone(&self.signals),
                max_rtt,
                self.cfg.effective_multicast_ttl(),
            ) {
                Ok(attempt) => self.attempts.push(attempt),
                Err(e) => {
                    failures += 1;
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) if failures == stacks.len() => Err(e),
            _ => Ok(()),
        }
    }

    fn reap_finished(&mut self) {
        let mut outstanding = Vec::with_capacity(self.attempts.len());
        for attempt in self.attempts.drain(..) {
            if attempt.is_finished() {
                attempt.join();
            } else {
                outstanding.push(attempt);
            }
        }
        self.attempts = outstanding;
    }

    fn join_all(&mut self) {
        for attempt in self.attempts.drain(..) {
            attempt.join();
        }
    }
}

/// Locates network-visible streams matching a structured query.
///
/// # Examples
///
/// ```rust,no_run
/// use labstream::Resolver;
///
/// # fn main() -> labstream::Result<()> {
/// let mut resolver = Resolver::new()?;
///
/// // Bounded, blocking lookup:
/// let found = resolver.resolve_oneshot("type='EEG'", 1, 5.0, 0.0)?;
///
/// // Background lookup, lazily queried:
/// resolver.resolve_continuous("type='EEG'", 5.0)?;
/// let current = resolver.results(u32::MAX);
/// # Ok(())
/// # }
/// ```
pub struct Resolver {
    cfg: Arc<ApiConfig>,
    registry: EndpointRegistry,
    store: Arc<ResultStore>,
    signals: Arc<ResolveSignals>,
    /// Age past which a result is evicted on the next snapshot.
    forget_after: f64,
    /// Background worker of a continuous resolve.
    worker: Option<JoinHandle<()>>,
}

impl Resolver {
    /// Create a resolver using the process-wide configuration.
    pub fn new() -> Result<Self> {
        Ok(Self::with_config(ApiConfig::global()?))
    }

    /// Create a resolver with an explicit configuration.
    ///
    /// Endpoint construction is non-fatal: malformed multicast literals and
    /// unresolvable peers are dropped, possibly leaving empty endpoint
    /// lists.
    pub fn with_config(cfg: Arc<ApiConfig>) -> Self {
        let registry = EndpointRegistry::from_config(&cfg);
        Self {
            cfg,
            registry,
            store: Arc::new(ResultStore::new()),
            signals: Arc::new(ResolveSignals::new()),
            forget_after: FOREVER,
            worker: None,
        }
    }

    /// Convenience constructor: build the session query and start a
    /// continuous resolve in one step.
    ///
    /// The query is `session_id='<sid>'` from the process-wide
    /// configuration, optionally narrowed by `and <pred_or_prop>='<value>'`.
    /// Returns `None` (after logging) on any construction failure.
    pub fn create(
        forget_after: f64,
        pred_or_prop: Option<&str>,
        value: Option<&str>,
    ) -> Option<Resolver> {
        let cfg = match ApiConfig::global() {
            Ok(cfg) => cfg,
            Err(e) => {
                log::error!("[resolver] error while creating a continuous resolver: {}", e);
                return None;
            }
        };
        let query = build_query(&cfg.session_id, pred_or_prop, value);
        let mut resolver = Resolver::with_config(cfg);
        match resolver.resolve_continuous(&query, forget_after) {
            Ok(()) => Some(resolver),
            Err(e) => {
                log::error!("[resolver] error while creating a continuous resolver: {}", e);
                None
            }
        }
    }

    /// Resolve streams matching `query`, blocking the calling thread.
    ///
    /// Returns once at least `minimum_count` distinct streams have been
    /// seen and `minimum_time` seconds have passed, or once `timeout`
    /// seconds (wall clock for the entire call; pass [`FOREVER`] for
    /// unbounded) have elapsed. A cancelled resolver returns an empty list.
    ///
    /// # Errors
    ///
    /// [`crate::Error::InvalidQuery`] if the query fails to parse; raised
    /// before any socket is opened.
    pub fn resolve_oneshot(
        &mut self,
        query: &str,
        minimum_count: usize,
        timeout: f64,
        minimum_time: f64,
    ) -> Result<Vec<StreamInfo>> {
        check_query(query)?;
        self.stop_worker();
        self.store.clear();
        self.signals.clear_expired();
        self.forget_after = FOREVER;

        if self.signals.is_cancelled() {
            return Ok(Vec::new());
        }
        let deadline = if timeout < FOREVER {
            Some(Instant::now() + Duration::from_secs_f64(timeout.max(0.0)))
        } else {
            None
        };
        let scheduler = WaveScheduler {
            cfg: Arc::clone(&self.cfg),
            registry: self.registry.clone(),
            store: Arc::clone(&self.store),
            signals: Arc::clone(&self.signals),
            query: query.to_string(),
            minimum_count,
            wait_until: local_clock() + minimum_time,
            fast_mode: true,
            deadline,
            attempts: Vec::new(),
        };
        scheduler.run();
        Ok(self.store.snapshot(u32::MAX, local_clock() - self.forget_after))
    }

    /// Start resolving streams matching `query` in the background.
    ///
    /// Results accumulate in the store and age out `forget_after` seconds
    /// after their last sighting; query them with [`Resolver::results`].
    /// A continuous resolve runs until [`Resolver::cancel`] or drop. Calling
    /// this while a previous continuous resolve is active winds the previous
    /// one down first.
    ///
    /// # Errors
    ///
    /// [`crate::Error::InvalidQuery`] if the query fails to parse;
    /// [`crate::Error::IoError`] if the background worker cannot be spawned.
    pub fn resolve_continuous(&mut self, query: &str, forget_after: f64) -> Result<()> {
        check_query(query)?;
        self.stop_worker();
        self.store.clear();
        self.signals.clear_expired();
        self.forget_after = forget_after;

        let scheduler = WaveScheduler {
            cfg: Arc::clone(&self.cfg),
            registry: self.registry.clone(),
            store: Arc::clone(&self.store),
            signals: Arc::clone(&self.signals),
            query: query.to_string(),
            minimum_count: 0,
            wait_until: 0.0,
            fast_mode: false,
            deadline: None,
            attempts: Vec::new(),
        };
        let worker = thread::Builder::new()
            .name("labstream-resolver".into())
            .spawn(move || scheduler.run())?;
        self.worker = Some(worker);
        Ok(())
    }

    /// Age-filtered, size-capped snapshot of the known streams.
    ///
    /// Entries not seen for `forget_after` seconds are evicted as a side
    /// effect. Safe to call concurrently with the background worker.
    pub fn results(&self, max_results: u32) -> Vec<StreamInfo> {
        self.store.snapshot(max_results, local_clock() - self.forget_after)
    }

    /// Cancel the ongoing resolve, if any. Idempotent, safe from any
    /// thread. No further waves are scheduled; outstanding attempts unwind
    /// within one poll interval.
    pub fn cancel(&self) {
        self.signals.cancel();
    }

    fn stop_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.signals.request_stop();
            if worker.join().is_err() {
                log::warn!("[resolver] error during teardown of a resolver worker");
            }
        }
    }
}

impl Drop for Resolver {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.cancel();
            self.stop_worker();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn quiet_config() -> Arc<ApiConfig> {
        let mut cfg = ApiConfig::default();
        cfg.ipv6 = "disable".into();
        cfg.resolve_scope = "machine".into();
        cfg.multicast_port = 29999; // nobody listens here
        cfg.multicast_min_rtt = 0.02;
        cfg.multicast_max_rtt = 0.1;
        cfg.unicast_min_rtt = 0.02;
        cfg.unicast_max_rtt = 0.1;
        cfg.continuous_resolve_interval = 0.02;
        Arc::new(cfg)
    }

    #[test]
    fn test_invalid_query_raised_before_any_io() {
        let mut resolver = Resolver::with_config(quiet_config());
        let start = Instant::now();
        let result = resolver.resolve_oneshot("not a valid predicate", 1, 5.0, 0.0);
        assert!(matches!(result, Err(Error::InvalidQuery(_))));
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn test_cancelled_resolver_returns_empty_immediately() {
        let mut resolver = Resolver::with_config(quiet_config());
        resolver.cancel();
        let start = Instant::now();
        let found = resolver.resolve_oneshot("type='EEG'", 1, 5.0, 0.0).unwrap();
        assert!(found.is_empty());
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn test_oneshot_respects_timeout() {
        let mut resolver = Resolver::with_config(quiet_config());
        let start = Instant::now();
        let found = resolver.resolve_oneshot("type='EEG'", 1, 0.3, 0.0).unwrap();
        let elapsed = start.elapsed();
        assert!(found.is_empty());
        assert!(elapsed >= Duration::from_millis(250), "returned after {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(900), "returned after {:?}", elapsed);
    }

    #[test]
    fn test_zero_timeout_returns_promptly() {
        let mut resolver = Resolver::with_config(quiet_config());
        let start = Instant::now();
        let found = resolver.resolve_oneshot("type='EEG'", 1, 0.0, 0.0).unwrap();
        assert!(found.is_empty());
        assert!(start.elapsed() < Duration::from_millis(300));
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let resolver = Resolver::with_config(quiet_config());
        resolver.cancel();
        resolver.cancel();
        assert!(resolver.signals.is_cancelled());
    }

    #[test]
    fn test_continuous_rejects_invalid_query() {
        let mut resolver = Resolver::with_config(quiet_config());
        assert!(matches!(
            resolver.resolve_continuous("'unterminated", 1.0),
            Err(Error::InvalidQuery(_))
        ));
        // nothing was started
        assert!(resolver.worker.is_none());
    }
}
