//! Sliding-minute rate window.
//!
//! The Redis backend keeps one sorted set per user at `quota:minute:<id>`,
//! scored by millisecond timestamp. Each check prunes entries older than the
//! 60-second window, counts what remains, and on success adds a unique
//! member and refreshes a ~90 s TTL so idle keys evaporate.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use uuid::Uuid;

use crate::error::Result;

const WINDOW: Duration = Duration::from_secs(60);
const KEY_TTL_SECS: i64 = 90;

fn window_key(user_id: Uuid) -> String {
    format!("quota:minute:{}", user_id)
}

#[async_trait]
pub trait RateWindow: Send + Sync {
    /// Returns true (and counts this request) when the user is under
    /// `max_per_minute`; false when the window is full.
    async fn check_and_increment(&self, user_id: Uuid, max_per_minute: i64) -> Result<bool>;

    /// Number of requests currently inside the window.
    async fn minute_usage(&self, user_id: Uuid) -> Result<i64>;
}

/// Redis sorted-set window.
pub struct RedisRateWindow {
    conn: ConnectionManager,
}

impl RedisRateWindow {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl RateWindow for RedisRateWindow {
    async fn check_and_increment(&self, user_id: Uuid, max_per_minute: i64) -> Result<bool> {
        let key = window_key(user_id);
        let now = Utc::now();
        let now_ms = now.timestamp_millis();
        let window_start_ms = now_ms - WINDOW.as_millis() as i64;
        let mut conn = self.conn.clone();

        let (count,): (i64,) = redis::pipe()
            .atomic()
            .zrembyscore(&key, "-inf", window_start_ms)
            .ignore()
            .zcard(&key)
            .query_async(&mut conn)
            .await?;

        if count >= max_per_minute {
            return Ok(false);
        }

        let member = format!(
            "{}:{}",
            now.timestamp_nanos_opt().unwrap_or(now_ms * 1_000_000),
            count
        );
        redis::pipe()
            .atomic()
            .zadd(&key, member, now_ms)
            .ignore()
            .expire(&key, KEY_TTL_SECS)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;

        Ok(true)
    }

    async fn minute_usage(&self, user_id: Uuid) -> Result<i64> {
        let key = window_key(user_id);
        let now_ms = Utc::now().timestamp_millis();
        let window_start_ms = now_ms - WINDOW.as_millis() as i64;
        let mut conn = self.conn.clone();
        let count: i64 = redis::cmd("ZCOUNT")
            .arg(&key)
            .arg(window_start_ms)
            .arg(now_ms)
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }
}

/// In-process window for the embedded mode and tests.
#[derive(Default)]
pub struct MemoryRateWindow {
    entries: Mutex<HashMap<Uuid, VecDeque<Instant>>>,
}

impl MemoryRateWindow {
    pub fn new() -> Self {
        Self::default()
    }

    fn prune(timestamps: &mut VecDeque<Instant>, cutoff: Instant) {
        while timestamps.front().is_some_and(|&t| t <= cutoff) {
            timestamps.pop_front();
        }
    }
}

#[async_trait]
impl RateWindow for MemoryRateWindow {
    async fn check_and_increment(&self, user_id: Uuid, max_per_minute: i64) -> Result<bool> {
        let now = Instant::now();
        let cutoff = now - WINDOW;
        let mut entries = self.entries.lock().unwrap();
        let timestamps = entries.entry(user_id).or_default();
        Self::prune(timestamps, cutoff);
        if timestamps.len() as i64 >= max_per_minute {
            return Ok(false);
        }
        timestamps.push_back(now);
        Ok(true)
    }

    async fn minute_usage(&self, user_id: Uuid) -> Result<i64> {
        let now = Instant::now();
        let cutoff = now - WINDOW;
        let mut entries = self.entries.lock().unwrap();
        Ok(match entries.get_mut(&user_id) {
            Some(timestamps) => {
                Self::prune(timestamps, cutoff);
                timestamps.len() as i64
            }
            None => 0,
        })
    }
}
