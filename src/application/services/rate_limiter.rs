//! Multi-Tier Rate Limiter
//!
//! Fixed-window throttling checked before inbound gateway operations, in
//! tier order: per-user minute, per-user hour, per-connection, per-IP.
//! The first breached tier short-circuits; later buckets are untouched.
//! Repeated violations escalate to temporary blocks on an increasing
//! duration ladder. Whitelisted users and IPs bypass every check.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::config::RateLimitSettings;
use crate::domain::{ConnectionId, UserId};
use crate::infrastructure::metrics;

/// Block durations keyed to cumulative violation count past the threshold.
const BLOCK_LADDER_SECS: [i64; 5] = [60, 300, 900, 3600, 86400];

/// Throttle tiers, checked in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitTier {
    UserMinute,
    UserHour,
    Socket,
    Ip,
}

impl LimitTier {
    /// Client-visible refusal reason.
    pub fn reason(&self) -> &'static str {
        match self {
            LimitTier::UserMinute => "user_limit_exceeded",
            LimitTier::UserHour => "user_hourly_limit_exceeded",
            LimitTier::Socket => "socket_limit_exceeded",
            LimitTier::Ip => "ip_limit_exceeded",
        }
    }

    fn key_prefix(&self) -> &'static str {
        match self {
            LimitTier::UserMinute => "um",
            LimitTier::UserHour => "uh",
            LimitTier::Socket => "sk",
            LimitTier::Ip => "ip",
        }
    }
}

/// Structured refusal returned to the gateway.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitExceeded {
    pub reason: &'static str,
    pub retry_after_secs: u64,
    pub limit: u32,
}

/// Who is asking: all identifiers for one inbound operation.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub user_id: UserId,
    pub connection_id: ConnectionId,
    pub ip: Option<IpAddr>,
}

/// Fixed counting window for one (tier, identifier) pair.
#[derive(Debug)]
struct WindowBucket {
    window_start: DateTime<Utc>,
    window: Duration,
    count: u32,
}

/// Violation history for one identifier. The count persists across window
/// resets until the sweep clears a stale record.
#[derive(Debug)]
struct ViolationRecord {
    count: u32,
    last_violation: DateTime<Utc>,
    blocked_until: Option<DateTime<Utc>>,
    /// Last breached (tier, window) pair; repeat breaches inside one
    /// window count as a single violation.
    last_breach: Option<(&'static str, DateTime<Utc>)>,
}

/// In-process multi-tier rate limiter over sharded concurrent maps.
pub struct RateLimiter {
    settings: RateLimitSettings,
    buckets: DashMap<String, WindowBucket>,
    violations: DashMap<String, ViolationRecord>,
    whitelist_users: HashSet<UserId>,
    whitelist_ips: HashSet<IpAddr>,
}

impl RateLimiter {
    pub fn new(settings: RateLimitSettings) -> Self {
        let whitelist_users = settings.whitelist_users.iter().copied().collect();
        let whitelist_ips = settings
            .whitelist_ips
            .iter()
            .filter_map(|ip| ip.parse().ok())
            .collect();
        Self {
            settings,
            buckets: DashMap::new(),
            violations: DashMap::new(),
            whitelist_users,
            whitelist_ips,
        }
    }

    /// Check one inbound operation against every tier.
    pub fn check(&self, ctx: &RequestContext) -> Result<(), RateLimitExceeded> {
        self.check_at(ctx, Utc::now())
    }

    /// Clock-injected variant of [`check`](Self::check).
    pub fn check_at(
        &self,
        ctx: &RequestContext,
        now: DateTime<Utc>,
    ) -> Result<(), RateLimitExceeded> {
        if self.whitelist_users.contains(&ctx.user_id)
            || ctx.ip.is_some_and(|ip| self.whitelist_ips.contains(&ip))
        {
            return Ok(());
        }

        let user_key = format!("user:{}", ctx.user_id);
        let socket_key = format!("socket:{}", ctx.connection_id);
        let ip_key = ctx.ip.map(|ip| format!("ip:{}", ip));

        // Active blocks refuse before any bucket is touched.
        for key in [Some(&user_key), Some(&socket_key), ip_key.as_ref()]
            .into_iter()
            .flatten()
        {
            if let Some(refusal) = self.active_block(key, now) {
                metrics::RATE_LIMIT_REJECTIONS_TOTAL
                    .with_label_values(&[refusal.reason])
                    .inc();
                return Err(refusal);
            }
        }

        let mut tiers: Vec<(LimitTier, &str, u32, Duration)> = vec![
            (
                LimitTier::UserMinute,
                user_key.as_str(),
                self.settings.user_events_per_minute,
                Duration::seconds(60),
            ),
            (
                LimitTier::UserHour,
                user_key.as_str(),
                self.settings.user_events_per_hour,
                Duration::hours(1),
            ),
            (
                LimitTier::Socket,
                socket_key.as_str(),
                self.settings.socket_events_per_minute,
                Duration::seconds(60),
            ),
        ];
        if let Some(ip_key) = ip_key.as_ref() {
            tiers.push((
                LimitTier::Ip,
                ip_key.as_str(),
                self.settings.ip_events_per_minute,
                Duration::seconds(60),
            ));
        }

        // One increment per tier per check; the first breach stops the scan
        // and buckets past it stay untouched.
        for (tier, identifier, limit, window) in tiers {
            if let Some((retry_after_secs, window_start)) =
                self.consume(tier, identifier, limit, window, now)
            {
                self.record_violation(identifier, tier, window_start, now);
                metrics::RATE_LIMIT_REJECTIONS_TOTAL
                    .with_label_values(&[tier.reason()])
                    .inc();
                tracing::warn!(
                    identifier = identifier,
                    reason = tier.reason(),
                    retry_after_secs,
                    "Rate limit exceeded"
                );
                return Err(RateLimitExceeded {
                    reason: tier.reason(),
                    retry_after_secs,
                    limit,
                });
            }
        }

        Ok(())
    }

    /// Returns the refusal if `identifier` is currently blocked.
    fn active_block(&self, identifier: &str, now: DateTime<Utc>) -> Option<RateLimitExceeded> {
        let record = self.violations.get(identifier)?;
        let blocked_until = record.blocked_until?;
        if blocked_until > now {
            let retry_after_secs = (blocked_until - now).num_seconds().max(0) as u64;
            Some(RateLimitExceeded {
                reason: "temporarily_blocked",
                retry_after_secs,
                limit: 0,
            })
        } else {
            None
        }
    }

    /// Increment the tier bucket. Returns the retry-after and the breached
    /// window's start on breach.
    fn consume(
        &self,
        tier: LimitTier,
        identifier: &str,
        limit: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Option<(u64, DateTime<Utc>)> {
        let key = format!("{}:{}", tier.key_prefix(), identifier);
        let mut bucket = self.buckets.entry(key).or_insert_with(|| WindowBucket {
            window_start: now,
            window,
            count: 0,
        });

        // Fixed windows reset on expiry.
        if now - bucket.window_start >= window {
            bucket.window_start = now;
            bucket.count = 0;
        }

        bucket.count += 1;
        if bucket.count > limit {
            let retry_after = (bucket.window_start + window - now).num_seconds().max(0) as u64;
            Some((retry_after, bucket.window_start))
        } else {
            None
        }
    }

    /// Record a violation for `identifier`; escalate to a block once the
    /// threshold is reached. Repeat breaches of the same tier window are
    /// one violation, so a single burst cannot climb the ladder.
    fn record_violation(
        &self,
        identifier: &str,
        tier: LimitTier,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        let mut record = self
            .violations
            .entry(identifier.to_string())
            .or_insert_with(|| ViolationRecord {
                count: 0,
                last_violation: now,
                blocked_until: None,
                last_breach: None,
            });

        let breach = (tier.key_prefix(), window_start);
        if record.last_breach == Some(breach) {
            return;
        }
        record.last_breach = Some(breach);
        record.count += 1;
        record.last_violation = now;

        if record.count >= self.settings.violation_threshold {
            let step = (record.count - self.settings.violation_threshold) as usize;
            let secs = BLOCK_LADDER_SECS[step.min(BLOCK_LADDER_SECS.len() - 1)];
            record.blocked_until = Some(now + Duration::seconds(secs));
            tracing::warn!(
                identifier = identifier,
                violations = record.count,
                block_secs = secs,
                "Identifier blocked after repeated violations"
            );
        }
    }

    /// Purge expired windows and stale, unblocked violation records.
    pub fn sweep(&self) {
        self.sweep_at(Utc::now());
    }

    /// Clock-injected variant of [`sweep`](Self::sweep).
    pub fn sweep_at(&self, now: DateTime<Utc>) {
        self.buckets
            .retain(|_, bucket| now - bucket.window_start < bucket.window);

        let tracking_window = Duration::seconds(self.settings.violation_window_secs as i64);
        self.violations.retain(|_, record| {
            if record.blocked_until.is_some_and(|until| until > now) {
                return true;
            }
            now - record.last_violation <= tracking_window
        });
    }

    /// Spawn the periodic sweep task. Aborted on shutdown.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let limiter = Arc::clone(self);
        let period = StdDuration::from_secs(limiter.settings.sweep_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await; // skip the immediate tick
            loop {
                ticker.tick().await;
                limiter.sweep();
            }
        })
    }

    #[cfg(test)]
    fn bucket_count(&self, tier: LimitTier, identifier: &str) -> u32 {
        self.buckets
            .get(&format!("{}:{}", tier.key_prefix(), identifier))
            .map(|b| b.count)
            .unwrap_or(0)
    }
}
