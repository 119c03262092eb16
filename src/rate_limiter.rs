//! Rate Limiting for DNS queries and registrations
//!
//! Protects against amplification floods and registration spam. Every bucket
//! is an independent token bucket (governor GCRA) with its own capacity and
//! refill interval:
//!
//! - `ClientUdp`: per client IP, UDP queries
//! - `ClientTcp`: per client IP, TCP queries
//! - `GlobalUdp`: one shared bucket for all UDP traffic
//! - `Registration`: per client IP, `POST /register`
//!
//! Running out of tokens is a normal outcome, not an error. State lives in
//! memory only and resets on restart.

use governor::clock::DefaultClock;
use governor::middleware::StateInformationMiddleware;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter as GovernorLimiter};
use std::net::{IpAddr, Ipv4Addr};
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::debug;

use crate::config::{BucketConfig, RateLimitConfig};

/// Key used for the global bucket, which is not per client
const GLOBAL_KEY: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

type KeyedLimiter = GovernorLimiter<
    IpAddr,
    DefaultKeyedStateStore<IpAddr>,
    DefaultClock,
    StateInformationMiddleware,
>;

/// Which bucket a token is taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    ClientUdp,
    ClientTcp,
    GlobalUdp,
    Registration,
}

impl Bucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::ClientUdp => "client_udp",
            Bucket::ClientTcp => "client_tcp",
            Bucket::GlobalUdp => "global_udp",
            Bucket::Registration => "registration",
        }
    }
}

/// Result of taking one token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Take {
    /// Whether a token was available
    pub allowed: bool,

    /// Tokens left in the bucket after this take
    pub remaining: u32,
}

/// The set of buckets shared by the DNS listeners and the HTTP API
pub struct RateLimiter {
    client_udp: KeyedLimiter,
    client_tcp: KeyedLimiter,
    global_udp: KeyedLimiter,
    registration: KeyedLimiter,
}

impl RateLimiter {
    /// Build all buckets from configuration
    pub fn new(config: &RateLimitConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client_udp: keyed_limiter(&config.client_udp)?,
            client_tcp: keyed_limiter(&config.client_tcp)?,
            global_udp: keyed_limiter(&config.global_udp)?,
            registration: keyed_limiter(&config.registration)?,
        })
    }

    /// Take one token from `bucket` for `key`
    ///
    /// The key is ignored for the global bucket.
    pub fn take(&self, bucket: Bucket, key: IpAddr) -> Take {
        let (limiter, key) = match bucket {
            Bucket::ClientUdp => (&self.client_udp, key),
            Bucket::ClientTcp => (&self.client_tcp, key),
            Bucket::GlobalUdp => (&self.global_udp, GLOBAL_KEY),
            Bucket::Registration => (&self.registration, key),
        };

        match limiter.check_key(&key) {
            Ok(snapshot) => Take {
                allowed: true,
                remaining: snapshot.remaining_burst_capacity(),
            },
            Err(_) => {
                debug!("Rate limited: {} bucket {}", key, bucket.as_str());
                Take {
                    allowed: false,
                    remaining: 0,
                }
            }
        }
    }

    /// Drop state for keys whose buckets are full again
    ///
    /// Returns the number of keys still tracked across all buckets.
    pub fn cleanup(&self) -> usize {
        let limiters = [
            &self.client_udp,
            &self.client_tcp,
            &self.global_udp,
            &self.registration,
        ];

        let mut tracked = 0;
        for limiter in limiters {
            limiter.retain_recent();
            limiter.shrink_to_fit();
            tracked += limiter.len();
        }
        tracked
    }
}

/// Build one keyed limiter: `tokens` burst, refilled over `interval`
fn keyed_limiter(config: &BucketConfig) -> anyhow::Result<KeyedLimiter> {
    let tokens = NonZeroU32::new(config.tokens)
        .ok_or_else(|| anyhow::anyhow!("bucket must allow at least one token"))?;

    let interval = Duration::from_millis(config.interval_ms);
    let period = interval / tokens.get();
    let quota = Quota::with_period(period)
        .ok_or_else(|| anyhow::anyhow!("bucket refill interval must be positive"))?
        .allow_burst(tokens);

    Ok(GovernorLimiter::keyed(quota).with_middleware::<StateInformationMiddleware>())
}
