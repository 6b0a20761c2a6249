//! Time-aware fetch coordination
//!
//! The coordinator owns the price cache and decides, tick by tick, whether
//! the Tibber API should be called at all. Tomorrow's prices are published
//! mid-afternoon, so the day is split into an idle window, a low-frequency
//! distributed polling window (13:00-15:00) and an active search window
//! (from 15:00). Validation failures never throw; they surface as an
//! explicit [`RefreshRequest`] the scheduler serializes.

pub mod schedule;

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{Duration, NaiveDateTime, Timelike};
use rand::Rng;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::{validate_structure, CacheStore};
use crate::data::tibber::{HomePrices, HomeRating};
use crate::data::{PriceCache, PricesGateway, RatingResolution, TibberError};
use crate::validation::{
    check_data_completeness, check_stale, detect_missed_rotation, rotate, validate_price_data,
    DayContext, DstTransition,
};

/// Hour from which tomorrow's prices may be published
pub const TOMORROW_CHECK_START_HOUR: u32 = 13;

/// Hour from which the search for tomorrow's prices intensifies
pub const INTENSIVE_SEARCH_START_HOUR: u32 = 15;

/// Quarter-hour wall-clock alignment for scheduled updates
pub const ENTITY_UPDATE_MINUTES: [u32; 4] = [0, 15, 30, 45];

/// Minute offsets distributing installations' API calls within a slot
pub const API_MINUTE_OFFSETS: [u32; 5] = [0, 1, 2, 3, 4];

/// Minimum gap between tomorrow-checks in the waiting window
const WAITING_CHECK_INTERVAL_MINUTES: i64 = 15;

/// Minimum gap between tomorrow-checks while actively searching
const SEARCHING_CHECK_INTERVAL_MINUTES: i64 = 5;

/// API fetching state derived from cache contents and time of day
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiState {
    /// No API calls needed: all data present, or too early for tomorrow's
    Idle,
    /// 13:00-15:00: periodic distributed checks for tomorrow's prices
    Waiting,
    /// From 15:00 (or when data is missing): actively searching
    Searching,
}

impl fmt::Display for ApiState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ApiState::Idle => "idle",
            ApiState::Waiting => "waiting",
            ApiState::Searching => "searching",
        };
        f.write_str(name)
    }
}

/// Repair signal produced by the validation pipeline
///
/// Returned to the scheduler instead of spawning detached refresh tasks, so
/// repairs run under the same serialization as regular ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshRequest {
    /// Nothing to repair
    None,
    /// Run another update cycle through the normal fetch gating
    Requested,
    /// Structural damage: fetch unconditionally, overriding the gating
    Forced,
}

/// What a single tick did
#[derive(Debug, Clone, Copy)]
pub struct CycleOutcome {
    /// API state after the tick
    pub state: ApiState,
    /// Whether an API fetch cycle ran
    pub fetched: bool,
    /// Whether the fetch was aborted by a rate limit (cache kept as-is)
    pub rate_limited: bool,
    /// Repair follow-up the scheduler should run
    pub refresh: RefreshRequest,
}

/// Errors surfaced by an update cycle
#[derive(Debug, Error)]
pub enum UpdateError {
    /// Credentials rejected; retrying cannot help until reconfigured
    #[error("authentication with the Tibber API failed; the access token must be reconfigured")]
    Authentication,

    /// Retriable failure; the cache is kept and the next tick tries again
    #[error("update failed: {0}")]
    Failed(String),
}

/// Internal error split for the fetch cycle
enum CycleError {
    Authentication,
    RateLimited,
    Other(String),
}

impl From<TibberError> for CycleError {
    fn from(error: TibberError) -> Self {
        match error {
            TibberError::Authentication => CycleError::Authentication,
            TibberError::RateLimit => CycleError::RateLimited,
            TibberError::Communication(message) => CycleError::Other(message),
            TibberError::Api(message) => CycleError::Other(message),
        }
    }
}

/// Owns the price cache and drives fetch decisions for one installation
///
/// All mutation happens on the caller's task; the coordinator is not shared
/// and never runs two fetch cycles concurrently.
pub struct Coordinator<A> {
    client: A,
    store: CacheStore,
    cache: PriceCache,
    initialized: bool,
    last_full_update: Option<NaiveDateTime>,
    last_tomorrow_check: Option<NaiveDateTime>,
    tomorrow_data_available: bool,
    offset_index: usize,
}

impl<A> Coordinator<A> {
    /// Creates a coordinator for one installation
    ///
    /// The home id seeds a stable offset index that spreads installations'
    /// API calls across minutes; without one the slot is randomized.
    pub fn new(client: A, store: CacheStore, home_id: Option<&str>) -> Self {
        let offset_index = match home_id {
            Some(id) => {
                let mut hasher = DefaultHasher::new();
                id.hash(&mut hasher);
                (hasher.finish() % API_MINUTE_OFFSETS.len() as u64) as usize
            }
            None => rand::thread_rng().gen_range(0..API_MINUTE_OFFSETS.len()),
        };
        debug!(offset_index, "using minute offset for API call distribution");

        Self {
            client,
            store,
            cache: PriceCache::default(),
            initialized: false,
            last_full_update: None,
            last_tomorrow_check: None,
            tomorrow_data_available: false,
            offset_index,
        }
    }

    /// Loads the persisted cache and repairs day-boundary drift
    ///
    /// Returns a repair signal: `Forced` when the blob was structurally
    /// damaged or the data is several days old, `Requested` when validation
    /// found repairable gaps.
    pub fn initialize(&mut self, now: NaiveDateTime, dst: DstTransition) -> RefreshRequest {
        info!("initializing price coordinator");

        let request = self.load_cache();
        self.initialized = true;

        info!(
            state = %self.api_state(now),
            cached = self.cache.has_basic_data(),
            tomorrow_available = self.tomorrow_data_available,
            "initialization complete"
        );

        if request != RefreshRequest::None {
            return request;
        }
        if self.cache.price_info_count() == 0 {
            return RefreshRequest::None;
        }

        if let Some(request) = self.repair_missed_rotation(now) {
            return request;
        }
        self.validate_cache(now, dst)
    }

    fn load_cache(&mut self) -> RefreshRequest {
        let Some(blob) = self.store.load() else {
            info!("first run: no cached data found");
            return RefreshRequest::None;
        };

        let report = validate_structure(&blob);
        if report.needs_full_refresh {
            warn!(
                issues = ?report.issues().collect::<Vec<_>>(),
                "cached blob is structurally damaged, starting empty"
            );
            self.cache = PriceCache::default();
            return RefreshRequest::Forced;
        }
        if !report.valid {
            warn!(
                issues = ?report.issues().collect::<Vec<_>>(),
                "cache structure validation detected issues"
            );
        }

        match serde_json::from_value::<PriceCache>(blob) {
            Ok(cache) => self.cache = cache,
            Err(err) => {
                warn!(%err, "cached blob does not match the cache model, starting empty");
                self.cache = PriceCache::default();
                return RefreshRequest::Forced;
            }
        }

        // The loose restore-time check: any home carrying tomorrow data at
        // all. The per-date check runs on the next tomorrow-check step.
        self.tomorrow_data_available = self.cache.price_infos().any(|(_, info)| !info.tomorrow.is_empty());

        let today_points: usize = self.cache.price_infos().map(|(_, info)| info.today.len()).sum();
        let tomorrow_points: usize =
            self.cache.price_infos().map(|(_, info)| info.tomorrow.len()).sum();
        info!(
            homes = self.cache.homes.as_ref().map_or(0, |homes| homes.len()),
            price_records = self.cache.price_info_count(),
            today_points,
            tomorrow_points,
            tomorrow_available = self.tomorrow_data_available,
            "restored cache from persistent storage"
        );

        RefreshRequest::None
    }

    /// Rotates the cache when the process slept through one or more
    /// midnights; forces a fetch when the data is several days behind
    fn repair_missed_rotation(&mut self, now: NaiveDateTime) -> Option<RefreshRequest> {
        let price_info = self.cache.price_info.as_ref()?;
        let check = detect_missed_rotation(price_info, now.date());
        if !check.needs_rotation {
            return None;
        }

        warn!(
            outdated_homes = check.outdated_homes,
            total_homes = check.total_homes,
            avg_days_old = check.avg_days_old,
            "missed midnight transition detected, rotating cached data"
        );

        rotate(&mut self.cache);
        self.tomorrow_data_available = false;
        self.persist();
        info!("completed missed midnight rotation");

        if check.severely_outdated {
            warn!(
                avg_days_old = check.avg_days_old,
                "data is severely outdated, forcing an immediate refresh"
            );
            return Some(RefreshRequest::Forced);
        }
        Some(RefreshRequest::None)
    }

    /// Derives the current API state from cache contents and time of day
    pub fn api_state(&self, now: NaiveDateTime) -> ApiState {
        // With tomorrow's data in hand there is nothing to chase, no matter
        // the hour
        if self.tomorrow_data_available {
            return ApiState::Idle;
        }

        // Missing identity or today data overrides the time of day
        if !self.cache.has_basic_data() {
            return ApiState::Searching;
        }
        if self.cache.is_missing_today_data() {
            return ApiState::Searching;
        }

        let hour = now.hour();
        if hour < TOMORROW_CHECK_START_HOUR {
            ApiState::Idle
        } else if hour < INTENSIVE_SEARCH_START_HOUR {
            ApiState::Waiting
        } else {
            ApiState::Searching
        }
    }

    /// The minute of the hour this installation polls at while waiting
    pub fn waiting_check_minute(&self) -> u32 {
        let target_minute = ENTITY_UPDATE_MINUTES[self.offset_index % ENTITY_UPDATE_MINUTES.len()];
        let minute_offset = API_MINUTE_OFFSETS[self.offset_index % API_MINUTE_OFFSETS.len()];
        (target_minute + minute_offset) % 60
    }

    fn should_check_in_waiting(&self, now: NaiveDateTime) -> bool {
        if let Some(last) = self.last_tomorrow_check {
            if now - last < Duration::minutes(WAITING_CHECK_INTERVAL_MINUTES) {
                return false;
            }
        }
        now.minute() == self.waiting_check_minute()
    }

    fn should_check_in_searching(&self, now: NaiveDateTime) -> bool {
        match self.last_tomorrow_check {
            None => true,
            Some(last) => now - last >= Duration::minutes(SEARCHING_CHECK_INTERVAL_MINUTES),
        }
    }

    /// Decides whether this tick should call the API
    pub fn should_fetch(&self, now: NaiveDateTime) -> bool {
        if !self.initialized {
            debug!("skipping fetch: coordinator not initialized yet");
            return false;
        }

        if !self.cache.has_basic_data() {
            debug!("fetching: first run or missing basic data");
            return true;
        }
        if self.cache.is_missing_today_data() {
            debug!("fetching: missing today's price data");
            return true;
        }

        match self.api_state(now) {
            ApiState::Idle => {
                debug!("not fetching: idle state");
                false
            }
            ApiState::Waiting => self.should_check_in_waiting(now),
            ApiState::Searching => self.should_check_in_searching(now),
        }
    }

    /// Current cache snapshot
    pub fn cache(&self) -> &PriceCache {
        &self.cache
    }

    /// Whether tomorrow's prices are known to be complete for all homes
    pub fn tomorrow_data_available(&self) -> bool {
        self.tomorrow_data_available
    }

    /// Timestamp of the last successful full update
    pub fn last_full_update(&self) -> Option<NaiveDateTime> {
        self.last_full_update
    }

    /// Rotates tomorrow's prices into today at the midnight boundary
    ///
    /// Invoked proactively by the scheduler's midnight wake-up; the caller
    /// runs the returned refresh request to fetch the new day's data.
    pub fn handle_midnight(&mut self, _now: NaiveDateTime) -> RefreshRequest {
        info!("midnight transition: rotating price data");
        rotate(&mut self.cache);
        self.tomorrow_data_available = false;
        self.persist();
        RefreshRequest::Requested
    }

    /// Runs the repair pipeline: structure, staleness, completeness, and
    /// per-home day validation, in that order, stopping at the first stage
    /// that demands a refresh
    fn validate_cache(&self, now: NaiveDateTime, dst: DstTransition) -> RefreshRequest {
        if self.cache.price_info_count() == 0 {
            debug!("no price info in cache to validate");
            return RefreshRequest::None;
        }

        match serde_json::to_value(&self.cache) {
            Ok(blob) => {
                let report = validate_structure(&blob);
                if !report.valid {
                    warn!(
                        issues = ?report.issues().collect::<Vec<_>>(),
                        "cache structure validation detected issues"
                    );
                    if report.needs_full_refresh {
                        info!("requesting unconditional refresh to rebuild the cache");
                        return RefreshRequest::Forced;
                    }
                }
            }
            Err(err) => warn!(%err, "could not serialize cache for structure validation"),
        }

        // Staleness is only meaningful once a full update has happened in
        // this process; at startup the completeness checks decide instead
        if self.last_full_update.is_some() {
            let staleness = check_stale(self.last_full_update, now);
            if staleness.is_stale {
                warn!(reason = staleness.reason.as_deref().unwrap_or("unknown"), "cache data is stale");
                if staleness.needs_refresh {
                    return RefreshRequest::Requested;
                }
            }
        }

        let ctx = DayContext {
            current_date: now.date(),
            current_hour: now.hour(),
            dst,
        };
        let Some(price_info) = self.cache.price_info.as_ref() else {
            return RefreshRequest::None;
        };

        let completeness = check_data_completeness(price_info, &ctx);
        if !completeness.complete {
            warn!(
                incomplete = completeness.homes_with_incomplete_data,
                missing_today = completeness.homes_with_missing_today,
                missing_tomorrow = completeness.homes_with_missing_tomorrow,
                total = completeness.total_homes,
                "cache completeness check failed"
            );
            if !completeness.missing_hour_ranges.is_empty() {
                warn!(ranges = ?completeness.missing_hour_ranges, "missing hour ranges detected");
            }
            if completeness.needs_refresh {
                return RefreshRequest::Requested;
            }
        }

        let validation = validate_price_data(price_info, &ctx);
        if !validation.valid {
            warn!(
                homes_with_issues = validation.homes_with_issues,
                total = validation.total_homes,
                issues = ?validation.issues,
                "per-home price validation failed, requesting refresh"
            );
            return RefreshRequest::Requested;
        }

        debug!("cache validation passed, data is current");
        RefreshRequest::None
    }

    fn persist(&self) {
        if let Err(err) = self.store.save(&self.cache) {
            warn!(%err, "failed to save the price cache");
            return;
        }

        let today_points: usize = self.cache.price_infos().map(|(_, info)| info.today.len()).sum();
        let tomorrow_points: usize =
            self.cache.price_infos().map(|(_, info)| info.tomorrow.len()).sum();
        debug!(
            homes = self.cache.homes.as_ref().map_or(0, |homes| homes.len()),
            price_records = self.cache.price_info_count(),
            today_points,
            tomorrow_points,
            "saved cache"
        );
    }
}

impl<A: PricesGateway> Coordinator<A> {
    /// Runs one tick: fetch if due (or forced), otherwise validate and
    /// repair from cache
    ///
    /// Rate limits abort the fetch but count as a soft success: the cached
    /// snapshot stays authoritative and the next natural tick retries.
    pub async fn run_cycle(
        &mut self,
        now: NaiveDateTime,
        dst: DstTransition,
        force: bool,
    ) -> Result<CycleOutcome, UpdateError> {
        if !self.initialized {
            debug!("skipping cycle: coordinator not initialized yet");
            return Ok(CycleOutcome {
                state: self.api_state(now),
                fetched: false,
                rate_limited: false,
                refresh: RefreshRequest::None,
            });
        }

        if !force && !self.should_fetch(now) {
            debug!("using cached data, no API call needed");
            let refresh = self.validate_cache(now, dst);
            return Ok(CycleOutcome {
                state: self.api_state(now),
                fetched: false,
                rate_limited: false,
                refresh,
            });
        }

        let state = self.api_state(now);
        info!(%state, window = time_window(now.hour()), "starting API update cycle");

        match self.fetch_cycle(state, now).await {
            Ok(()) => {
                let new_state = self.api_state(now);
                if new_state != state {
                    info!(from = %state, to = %new_state, "API state transition after update");
                }
                self.log_data_summary();
                let refresh = self.validate_cache(now, dst);
                Ok(CycleOutcome {
                    state: new_state,
                    fetched: true,
                    rate_limited: false,
                    refresh,
                })
            }
            Err(CycleError::RateLimited) => {
                warn!("rate limit exceeded, keeping cached data");
                Ok(CycleOutcome {
                    state,
                    fetched: false,
                    rate_limited: true,
                    refresh: RefreshRequest::None,
                })
            }
            Err(CycleError::Authentication) => Err(UpdateError::Authentication),
            Err(CycleError::Other(message)) => Err(UpdateError::Failed(message)),
        }
    }

    /// One full fetch cycle against a scratch copy of the cache
    ///
    /// The copy is committed and persisted only when every step succeeded,
    /// so an aborted cycle can never leave a half-merged cache behind.
    async fn fetch_cycle(&mut self, state: ApiState, now: NaiveDateTime) -> Result<(), CycleError> {
        let mut data = self.cache.clone();

        if !data.has_basic_data() {
            info!("fetching user info and homes");
            let account = self.client.user_account().await?;
            let homes_count = account.homes.len();
            let account_name = account.user_info.name.clone().unwrap_or_else(|| "unknown".to_string());
            data.user_info = Some(account.user_info);
            data.homes = Some(
                account
                    .homes
                    .into_iter()
                    .map(|home| (home.id.clone(), home))
                    .collect(),
            );
            info!(homes = homes_count, account = %account_name, "initial user data loaded");
        }

        debug!(%state, "fetching price info");
        let prices = self.client.price_info().await?;
        merge_price_info(&mut data, prices);

        self.fetch_price_ratings(state, &mut data).await?;

        if state == ApiState::Waiting || state == ApiState::Searching {
            self.check_tomorrow_data(&mut data, state, now).await?;
        }

        self.cache = data;
        self.last_full_update = Some(now);
        self.persist();
        Ok(())
    }

    /// Fetches price ratings for the current state
    ///
    /// The monthly query is deliberately deferred to the idle state so the
    /// active windows spend their call budget on price data.
    async fn fetch_price_ratings(
        &mut self,
        state: ApiState,
        data: &mut PriceCache,
    ) -> Result<(), CycleError> {
        debug!("fetching daily price rating");
        let daily = self.client.price_rating(RatingResolution::Daily).await?;
        merge_price_rating(data, RatingResolution::Daily, daily);

        if state != ApiState::Idle || !data.has_rating(RatingResolution::Hourly) {
            debug!("fetching hourly price rating");
            let hourly = self.client.price_rating(RatingResolution::Hourly).await?;
            merge_price_rating(data, RatingResolution::Hourly, hourly);
        }

        if state == ApiState::Idle || !data.has_rating(RatingResolution::Monthly) {
            debug!("fetching monthly price rating");
            let monthly = self.client.price_rating(RatingResolution::Monthly).await?;
            merge_price_rating(data, RatingResolution::Monthly, monthly);
        }

        Ok(())
    }

    /// Recomputes tomorrow-availability and, while actively searching,
    /// retries the price query once when tomorrow is still missing
    async fn check_tomorrow_data(
        &mut self,
        data: &mut PriceCache,
        state: ApiState,
        now: NaiveDateTime,
    ) -> Result<(), CycleError> {
        // In the waiting window, respect the distributed check interval
        if state == ApiState::Waiting {
            if let Some(last) = self.last_tomorrow_check {
                if now - last < Duration::minutes(WAITING_CHECK_INTERVAL_MINUTES) {
                    return Ok(());
                }
            }
        }

        let tomorrow_date = now.date() + Duration::days(1);
        let previously_available = self.tomorrow_data_available;
        let total_homes = data.price_info_count();
        let mut homes_with_tomorrow = 0usize;
        let mut available = true;

        for (_, info) in data.price_infos() {
            if info.tomorrow.is_empty() {
                available = false;
                continue;
            }
            if info
                .tomorrow
                .iter()
                .any(|price| price.starts_at.date_naive() == tomorrow_date)
            {
                homes_with_tomorrow += 1;
            } else {
                available = false;
            }
        }

        self.tomorrow_data_available = available;
        self.last_tomorrow_check = Some(now);

        if available != previously_available {
            if available {
                info!(date = %tomorrow_date, total_homes, "found complete price data for tomorrow");
            } else {
                info!(
                    homes_with_tomorrow,
                    total_homes,
                    date = %tomorrow_date,
                    "still waiting for complete tomorrow data"
                );
            }
        }

        if state == ApiState::Searching && !available {
            debug!("actively searching for tomorrow's data");
            let prices = self.client.price_info().await?;
            merge_price_info(data, prices);
        }

        Ok(())
    }

    fn log_data_summary(&self) {
        let homes_with_today = self.cache.price_infos().filter(|(_, info)| !info.today.is_empty()).count();
        let homes_with_tomorrow =
            self.cache.price_infos().filter(|(_, info)| !info.tomorrow.is_empty()).count();
        let points_today: usize = self.cache.price_infos().map(|(_, info)| info.today.len()).sum();
        let points_tomorrow: usize =
            self.cache.price_infos().map(|(_, info)| info.tomorrow.len()).sum();

        let mut ratings: Vec<&str> = Vec::new();
        for resolution in [RatingResolution::Hourly, RatingResolution::Daily, RatingResolution::Monthly] {
            if self.cache.has_rating(resolution) {
                ratings.push(resolution.as_str());
            }
        }

        info!(
            homes = self.cache.homes.as_ref().map_or(0, |homes| homes.len()),
            homes_with_today,
            homes_with_tomorrow,
            points_today,
            points_tomorrow,
            ratings = ?ratings,
            "data update summary"
        );
    }
}

/// Merges fetched price curves into the cache, home by home
///
/// Only curves the API actually returned overwrite cached ones; a home
/// whose subscription carried no price info keeps its cached curves.
fn merge_price_info(cache: &mut PriceCache, updates: Vec<HomePrices>) {
    let price_info = cache.price_info_mut();
    for update in updates {
        let entry = price_info.entry(update.home_id).or_default();
        if let Some(today) = update.today {
            entry.today = today;
        }
        if let Some(tomorrow) = update.tomorrow {
            entry.tomorrow = tomorrow;
        }
        if let Some(range_prices) = update.range_prices {
            entry.range_prices = range_prices;
        }
    }
}

/// Merges fetched rating data into the cache at the given resolution
fn merge_price_rating(cache: &mut PriceCache, resolution: RatingResolution, updates: Vec<HomeRating>) {
    let ratings = cache.price_rating_mut();
    for update in updates {
        let entry = ratings.entry(update.home_id).or_default();
        if let Some(thresholds) = update.thresholds {
            entry.thresholds = Some(thresholds);
        }
        if let Some(period) = update.period {
            entry.set_period(resolution, period);
        }
    }
}

/// Human-readable publication window for log output
fn time_window(hour: u32) -> &'static str {
    if hour < TOMORROW_CHECK_START_HOUR {
        "before 13:00"
    } else if hour < INTENSIVE_SEARCH_START_HOUR {
        "13:00-15:00"
    } else {
        "after 15:00"
    }
}
