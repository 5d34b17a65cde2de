//! Item Module
//!
//! An item binds one key to a pool's driver and runs the stampede-protection
//! state machine on every read.
//!
//! Values are stored wrapped in an envelope that also records when they were
//! created, which the precompute strategy needs to size its window. The
//! recompute lease lives beside the value under a parallel key and carries a
//! random token plus its own expiration, so a crashed recompute can never
//! wedge a key: once the lease expires it counts as no lease at all.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::driver::Driver;
use crate::error::StashError;
use crate::pool::{CacheKey, Invalidation};
use crate::value::Value;

const ENVELOPE_CREATED: &str = "created";
const ENVELOPE_VALUE: &str = "value";

/// Shortest pause between SLEEP re-checks.
const MIN_SLEEP_INTERVAL: Duration = Duration::from_millis(1);

// == Item Options ==
/// Defaults applied by items when the caller leaves an argument out.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemOptions {
    /// Lifetime of values set without an explicit ttl
    pub default_ttl: Duration,
    /// Up to this fraction of `default_ttl` is randomly shaved off, so
    /// values written together do not all expire together
    pub ttl_jitter: f64,
    /// Lifetime of a recompute lease taken without an explicit ttl
    pub lock_ttl: Duration,
    /// Lead time used by [`ItemOptions::precompute`]
    pub precompute_lead: Duration,
    /// Longest wait used by [`ItemOptions::sleep`]
    pub sleep_timeout: Duration,
    /// Re-check spacing used by [`ItemOptions::sleep`]
    pub sleep_interval: Duration,
}

impl Default for ItemOptions {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(432_000),
            ttl_jitter: 0.15,
            lock_ttl: Duration::from_secs(30),
            precompute_lead: Duration::from_secs(60),
            sleep_timeout: Duration::from_secs(1),
            sleep_interval: Duration::from_millis(100),
        }
    }
}

impl ItemOptions {
    /// SLEEP with the configured timeout and interval.
    pub fn sleep(&self) -> Invalidation {
        Invalidation::sleep(self.sleep_timeout, self.sleep_interval)
    }

    /// PRECOMPUTE with the configured lead time.
    pub fn precompute(&self) -> Invalidation {
        Invalidation::precompute_lead(self.precompute_lead)
    }
}

// == Item State ==
/// What the last `get` concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    /// `get` has not run yet
    Unresolved,
    /// A live value was served
    Fresh,
    /// The caller should recompute and `set`
    Miss,
    /// Another caller holds the recompute lease
    LockedByOther,
    /// Caching is switched off for this item
    Disabled,
}

struct Stored {
    value: Value,
    created: DateTime<Utc>,
    expiration: DateTime<Utc>,
}

// == Item ==
/// A single cache entry as seen by one caller.
pub struct Item {
    driver: Arc<dyn Driver>,
    clock: Arc<dyn Clock>,
    options: ItemOptions,
    key: CacheKey,
    data_key: Vec<String>,
    lock_key: Vec<String>,
    state: ItemState,
    expiration: Option<DateTime<Utc>>,
    lease: Option<String>,
}

impl Item {
    pub(crate) fn new(
        driver: Arc<dyn Driver>,
        clock: Arc<dyn Clock>,
        options: ItemOptions,
        key: CacheKey,
        data_key: Vec<String>,
        lock_key: Vec<String>,
    ) -> Self {
        Self {
            driver,
            clock,
            options,
            key,
            data_key,
            lock_key,
            state: ItemState::Unresolved,
            expiration: None,
            lease: None,
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn state(&self) -> ItemState {
        self.state
    }

    /// Expiration of the value seen by the last `get` or written by `set`.
    pub fn expiration(&self) -> Option<DateTime<Utc>> {
        self.expiration
    }

    /// True unless the last `get` served a fresh value or found another
    /// caller recomputing it.
    pub fn is_miss(&self) -> bool {
        !matches!(self.state, ItemState::Fresh | ItemState::LockedByOther)
    }

    pub fn is_disabled(&self) -> bool {
        self.state == ItemState::Disabled
    }

    /// Stops this item from reading or writing for the rest of its life.
    pub fn disable(&mut self) {
        self.state = ItemState::Disabled;
    }

    // == Get ==
    /// Reads the value, applying `invalidation` when it is missing, stale,
    /// or inside a precompute window.
    pub fn get(&mut self, invalidation: Invalidation) -> Option<Value> {
        if self.is_disabled() {
            return None;
        }

        let now = self.clock.now();
        let stored = self.load();
        self.expiration = stored.as_ref().map(|s| s.expiration);

        match stored {
            Some(stored) if stored.expiration > now => self.resolve_live(stored, &invalidation, now),
            stale => self.resolve_stale(stale.map(|s| s.value), invalidation, now),
        }
    }

    fn resolve_live(&mut self, stored: Stored, invalidation: &Invalidation, now: DateTime<Utc>) -> Option<Value> {
        if let Invalidation::Precompute(window) = invalidation {
            let lead = window.lead(stored.expiration - stored.created);
            if stored.expiration - now < lead && !self.locked_by_other(now) {
                debug!(key = %self.key, "value inside precompute window");
                self.state = ItemState::Miss;
                return Some(stored.value);
            }
        }

        self.state = ItemState::Fresh;
        Some(stored.value)
    }

    fn resolve_stale(&mut self, stale: Option<Value>, invalidation: Invalidation, now: DateTime<Utc>) -> Option<Value> {
        match invalidation {
            Invalidation::None | Invalidation::Precompute(_) => {
                self.state = ItemState::Miss;
                None
            }
            Invalidation::Old => {
                self.state = self.stale_state(now);
                stale
            }
            Invalidation::Value(placeholder) => {
                self.state = self.stale_state(now);
                Some(placeholder)
            }
            Invalidation::Sleep { timeout, interval } => self.wait_for_other(timeout, interval),
        }
    }

    fn stale_state(&self, now: DateTime<Utc>) -> ItemState {
        if self.locked_by_other(now) {
            ItemState::LockedByOther
        } else {
            ItemState::Miss
        }
    }

    /// Re-checks until a fresh value shows up, the lease disappears, or
    /// `timeout` runs out. Always finishes within `timeout` plus one read.
    fn wait_for_other(&mut self, timeout: Duration, interval: Duration) -> Option<Value> {
        let deadline = Instant::now().checked_add(timeout);
        let interval = interval.max(MIN_SLEEP_INTERVAL);

        loop {
            let now = self.clock.now();
            // Lease before value: a writer stores the value before dropping its lease.
            let locked = self.locked_by_other(now);
            if let Some(stored) = self.load() {
                if stored.expiration > now {
                    self.expiration = Some(stored.expiration);
                    self.state = ItemState::Fresh;
                    return Some(stored.value);
                }
            }

            let left = deadline.map_or(Duration::MAX, |d| d.saturating_duration_since(Instant::now()));
            if left.is_zero() || !locked {
                break;
            }
            thread::sleep(interval.min(left));
        }

        self.state = ItemState::Miss;
        None
    }

    // == Set ==
    /// Stores `data` for `ttl`, or for the default ttl minus some jitter.
    /// Releases a lease this item holds.
    pub fn set(&mut self, data: impl Into<Value>, ttl: Option<Duration>) -> bool {
        if self.is_disabled() {
            return false;
        }

        let now = self.clock.now();
        let expiration = match ttl {
            Some(ttl) => expires_after(now, ttl),
            None => expires_after(now, self.jittered_default_ttl()),
        };

        self.store(data.into(), now, expiration)
    }

    fn store(&mut self, data: Value, now: DateTime<Utc>, expiration: DateTime<Utc>) -> bool {
        let data_kind = data.type_name();
        let envelope = wrap(data, now);
        let stored = match self.driver.store_data(&self.data_key, &envelope, expiration) {
            Ok(stored) => stored,
            Err(e) => {
                self.disable_after(e);
                return false;
            }
        };

        if stored {
            debug!(key = %self.key, kind = data_kind, %expiration, "value stored");
            self.expiration = Some(expiration);
        }
        self.release_lease(now);
        stored
    }

    fn jittered_default_ttl(&self) -> Duration {
        let base = self.options.default_ttl;
        let jitter = self.options.ttl_jitter.clamp(0.0, 1.0);
        let max_cut = (base.as_secs() as f64 * jitter) as u64;
        if max_cut == 0 {
            return base;
        }
        base - Duration::from_secs(rand::thread_rng().gen_range(0..=max_cut))
    }

    // == Lock ==
    /// Takes the recompute lease for `ttl` (or the default lock ttl).
    ///
    /// Other callers see `LockedByOther` until this item sets a value or the
    /// lease expires. Nothing ever needs to unlock explicitly.
    pub fn lock(&mut self, ttl: Option<Duration>) -> bool {
        if self.is_disabled() {
            return false;
        }

        let now = self.clock.now();
        let ttl = ttl.unwrap_or(self.options.lock_ttl);
        let token = self.lease.clone().unwrap_or_else(new_token);

        match self
            .driver
            .store_data(&self.lock_key, &Value::Str(token.clone()), expires_after(now, ttl))
        {
            Ok(true) => {
                self.lease = Some(token);
                true
            }
            Ok(false) => false,
            Err(e) => {
                self.disable_after(e);
                false
            }
        }
    }

    fn locked_by_other(&self, now: DateTime<Utc>) -> bool {
        match self.driver.get_data(&self.lock_key) {
            Some(record) if !record.is_expired_at(now) => {
                match (record.data.as_str(), &self.lease) {
                    (Some(token), Some(own)) => token != own,
                    _ => true,
                }
            }
            _ => false,
        }
    }

    fn release_lease(&mut self, now: DateTime<Utc>) {
        if self.lease.take().is_none() {
            return;
        }
        // An already-expired lease behaves as no lease; purge removes it later.
        if let Err(e) = self.driver.store_data(&self.lock_key, &Value::Null, now) {
            debug!(key = %self.key, error = %e, "lease release failed");
        }
    }

    // == Extend ==
    /// Pushes the current value's expiration out without recomputing it.
    pub fn extend(&mut self, ttl: Option<Duration>) -> bool {
        if self.is_disabled() {
            return false;
        }

        match self.load() {
            Some(stored) => self.set(stored.value, ttl),
            None => false,
        }
    }

    // == Clear ==
    /// Removes the value, every value below it, and their leases.
    pub fn clear(&mut self) -> bool {
        if self.is_disabled() {
            return false;
        }

        self.expiration = None;
        self.lease = None;
        let data_cleared = self.driver.clear(Some(&self.data_key));
        let locks_cleared = self.driver.clear(Some(&self.lock_key));
        data_cleared && locks_cleared
    }

    // == Helpers ==
    fn load(&self) -> Option<Stored> {
        let record = self.driver.get_data(&self.data_key)?;
        let (value, created) = unwrap(record.data)?;
        Some(Stored {
            value,
            created,
            expiration: record.expiration,
        })
    }

    fn disable_after(&mut self, error: StashError) {
        warn!(key = %self.key, error = %error, "disabling cache item after driver error");
        self.disable();
    }
}

impl std::fmt::Debug for Item {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Item")
            .field("key", &self.key)
            .field("driver", &self.driver.name())
            .field("state", &self.state)
            .field("expiration", &self.expiration)
            .finish()
    }
}

fn wrap(data: Value, created: DateTime<Utc>) -> Value {
    let mut envelope = BTreeMap::new();
    envelope.insert(ENVELOPE_CREATED.to_string(), Value::Int(created.timestamp_millis()));
    envelope.insert(ENVELOPE_VALUE.to_string(), data);
    Value::Map(envelope)
}

/// Splits an envelope; anything else under a data key counts as absent.
fn unwrap(envelope: Value) -> Option<(Value, DateTime<Utc>)> {
    let Value::Map(mut map) = envelope else {
        return None;
    };
    let created = map
        .get(ENVELOPE_CREATED)
        .and_then(Value::as_i64)
        .and_then(DateTime::from_timestamp_millis)?;
    let value = map.remove(ENVELOPE_VALUE)?;
    Some((value, created))
}

fn expires_after(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn new_token() -> String {
    format!("{:016x}", rand::thread_rng().gen::<u64>())
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::driver::Ephemeral;

    fn item_with(driver: Arc<dyn Driver>, clock: &ManualClock, path: &str) -> Item {
        let key = CacheKey::parse(path).unwrap();
        let mut data_key = vec!["@cache".to_string()];
        data_key.extend(key.segments().iter().cloned());
        let mut lock_key = vec!["@sp".to_string()];
        lock_key.extend(key.segments().iter().cloned());
        Item::new(
            driver,
            Arc::new(clock.clone()),
            ItemOptions::default(),
            key,
            data_key,
            lock_key,
        )
    }

    fn setup() -> (Arc<dyn Driver>, ManualClock) {
        let start = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        (Arc::new(Ephemeral::new()), ManualClock::new(start))
    }

    #[test]
    fn test_option_strategies() {
        let options = ItemOptions::default();

        assert_eq!(
            options.sleep(),
            Invalidation::sleep(Duration::from_secs(1), Duration::from_millis(100))
        );
        assert_eq!(options.precompute(), Invalidation::precompute_lead(Duration::from_secs(60)));
    }

    #[test]
    fn test_unresolved_item_is_miss() {
        let (driver, clock) = setup();
        let item = item_with(driver, &clock, "a");

        assert_eq!(item.state(), ItemState::Unresolved);
        assert!(item.is_miss());
    }

    #[test]
    fn test_set_then_get() {
        let (driver, clock) = setup();
        let mut item = item_with(driver, &clock, "a");

        assert!(item.set("hello", Some(Duration::from_secs(60))));
        assert_eq!(item.get(Invalidation::None), Some(Value::from("hello")));
        assert!(!item.is_miss());
        assert_eq!(item.state(), ItemState::Fresh);
    }

    #[test]
    fn test_stored_null_is_a_hit() {
        let (driver, clock) = setup();
        let mut item = item_with(driver, &clock, "a");

        item.set(Value::Null, Some(Duration::from_secs(60)));
        assert_eq!(item.get(Invalidation::None), Some(Value::Null));
        assert!(!item.is_miss());
    }

    #[test]
    fn test_expired_none_is_miss() {
        let (driver, clock) = setup();
        let mut item = item_with(driver, &clock, "a");

        item.set(1, Some(Duration::from_secs(10)));
        clock.advance(chrono::Duration::seconds(10));

        assert_eq!(item.get(Invalidation::None), None);
        assert!(item.is_miss());
    }

    #[test]
    fn test_default_ttl_jitter_bounds() {
        let (driver, clock) = setup();
        let mut item = item_with(driver, &clock, "a");

        item.set(1, None);
        let lifetime = item.expiration().unwrap() - clock.now();

        assert!(lifetime <= chrono::Duration::seconds(432_000));
        assert!(lifetime >= chrono::Duration::seconds(432_000 - 64_800));
    }

    #[test]
    fn test_old_without_lease() {
        let (driver, clock) = setup();
        let mut item = item_with(driver, &clock, "a");

        item.set("stale", Some(Duration::from_secs(10)));
        clock.advance(chrono::Duration::seconds(11));

        assert_eq!(item.get(Invalidation::Old), Some(Value::from("stale")));
        assert_eq!(item.state(), ItemState::Miss);
    }

    #[test]
    fn test_value_placeholder() {
        let (driver, clock) = setup();
        let mut item = item_with(driver, &clock, "a");

        item.set("stale", Some(Duration::from_secs(10)));
        clock.advance(chrono::Duration::seconds(11));

        let got = item.get(Invalidation::Value(Value::from("loading")));
        assert_eq!(got, Some(Value::from("loading")));
        assert!(item.is_miss());
    }

    #[test]
    fn test_own_lease_is_not_other() {
        let (driver, clock) = setup();
        let mut item = item_with(driver, &clock, "a");

        item.set("stale", Some(Duration::from_secs(10)));
        clock.advance(chrono::Duration::seconds(11));

        assert!(item.lock(None));
        item.get(Invalidation::Old);
        assert_eq!(item.state(), ItemState::Miss);
    }

    #[test]
    fn test_lease_seen_by_other_item() {
        let (driver, clock) = setup();
        let mut writer = item_with(driver.clone(), &clock, "a");
        let mut reader = item_with(driver, &clock, "a");

        writer.set("stale", Some(Duration::from_secs(10)));
        clock.advance(chrono::Duration::seconds(11));
        writer.lock(Some(Duration::from_secs(5)));

        assert_eq!(reader.get(Invalidation::Old), Some(Value::from("stale")));
        assert_eq!(reader.state(), ItemState::LockedByOther);
        assert!(!reader.is_miss());

        // The lease runs out on its own.
        clock.advance(chrono::Duration::seconds(5));
        reader.get(Invalidation::Old);
        assert_eq!(reader.state(), ItemState::Miss);
    }

    #[test]
    fn test_set_releases_lease() {
        let (driver, clock) = setup();
        let mut writer = item_with(driver.clone(), &clock, "a");
        let mut reader = item_with(driver, &clock, "a");

        writer.lock(Some(Duration::from_secs(300)));
        writer.set("fresh", Some(Duration::from_secs(10)));
        clock.advance(chrono::Duration::seconds(11));

        reader.get(Invalidation::Old);
        assert_eq!(reader.state(), ItemState::Miss);
    }

    #[test]
    fn test_precompute_window() {
        let (driver, clock) = setup();
        let mut item = item_with(driver, &clock, "a");

        item.set("v", Some(Duration::from_secs(100)));

        clock.advance(chrono::Duration::seconds(89));
        assert_eq!(item.get(Invalidation::precompute_fraction(0.1)), Some(Value::from("v")));
        assert!(!item.is_miss());

        clock.advance(chrono::Duration::seconds(6));
        assert_eq!(item.get(Invalidation::precompute_fraction(0.1)), Some(Value::from("v")));
        assert!(item.is_miss());
    }

    #[test]
    fn test_sleep_without_lease_returns_immediately() {
        let (driver, clock) = setup();
        let mut item = item_with(driver, &clock, "a");

        let started = Instant::now();
        let got = item.get(Invalidation::sleep(Duration::from_secs(5), Duration::from_millis(10)));

        assert_eq!(got, None);
        assert!(item.is_miss());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_sleep_times_out() {
        let (driver, clock) = setup();
        let mut holder = item_with(driver.clone(), &clock, "a");
        let mut waiter = item_with(driver, &clock, "a");

        holder.lock(Some(Duration::from_secs(60)));

        let started = Instant::now();
        let got = waiter.get(Invalidation::sleep(Duration::from_millis(50), Duration::from_millis(10)));

        assert_eq!(got, None);
        assert!(waiter.is_miss());
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_extend() {
        let (driver, clock) = setup();
        let mut item = item_with(driver, &clock, "a");

        item.set("keep", Some(Duration::from_secs(10)));
        clock.advance(chrono::Duration::seconds(8));

        assert!(item.extend(Some(Duration::from_secs(100))));
        clock.advance(chrono::Duration::seconds(50));

        assert_eq!(item.get(Invalidation::None), Some(Value::from("keep")));
    }

    #[test]
    fn test_clock_jump_past_expiration() {
        let (driver, clock) = setup();
        let mut item = item_with(driver, &clock, "a");

        item.set("v", Some(Duration::from_secs(60)));
        clock.set(item.expiration().unwrap());

        assert_eq!(item.get(Invalidation::None), None);
        assert!(item.is_miss());
    }

    #[test]
    fn test_extend_missing() {
        let (driver, clock) = setup();
        let mut item = item_with(driver, &clock, "a");

        assert!(!item.extend(None));
    }

    #[test]
    fn test_disabled_item() {
        let (driver, clock) = setup();
        let mut item = item_with(driver.clone(), &clock, "a");

        item.disable();

        assert!(item.is_disabled());
        assert!(!item.set(1, None));
        assert!(!item.lock(None));
        assert!(!item.clear());
        assert_eq!(item.get(Invalidation::Old), None);
        assert!(item.is_miss());
        assert!(driver.get_data(&["@cache".to_string(), "a".to_string()]).is_none());
    }

    #[test]
    fn test_foreign_record_counts_as_absent() {
        let (driver, clock) = setup();
        let mut item = item_with(driver.clone(), &clock, "a");

        driver
            .store_data(
                &["@cache".to_string(), "a".to_string()],
                &Value::Int(5),
                clock.now() + chrono::Duration::hours(1),
            )
            .unwrap();

        assert_eq!(item.get(Invalidation::Old), None);
        assert!(item.is_miss());
    }
}
