//! Quarter-hour aligned update scheduling
//!
//! The scheduler wakes at the next quarter-hour mark (minutes 0/15/30/45)
//! or at local midnight, whichever comes first, and drives the coordinator
//! through one tick per wake-up. Control messages (manual refresh,
//! shutdown) arrive over channels so everything runs on one task: there is
//! never more than one outstanding timer and never two overlapping cycles.

use std::time::Duration as StdDuration;

use chrono::{Local, NaiveDateTime, NaiveTime, Timelike};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::{Coordinator, RefreshRequest, UpdateError, ENTITY_UPDATE_MINUTES};
use crate::data::PricesGateway;
use crate::validation::DstTransition;

/// Hours in a day, for explicit rollover handling
const HOURS_IN_DAY: u32 = 24;

/// Computes the next update time aligned to quarter-hour marks
///
/// When the clock is past every mark in the current hour, the target rolls
/// to minute 0 of the next hour, with day rollover handled explicitly when
/// the hour reaches 24.
pub fn next_quarter_hour(now: NaiveDateTime) -> NaiveDateTime {
    let minute_now = now.minute();

    let mut next_minute = None;
    for mark in ENTITY_UPDATE_MINUTES {
        if mark > minute_now {
            next_minute = Some(mark);
            break;
        }
    }

    let (hour, minute) = match next_minute {
        Some(minute) => (now.hour(), minute),
        None => (now.hour() + 1, ENTITY_UPDATE_MINUTES[0]),
    };

    let mut date = now.date();
    let mut hour = hour;
    if hour >= HOURS_IN_DAY {
        hour -= HOURS_IN_DAY;
        if let Some(next_day) = date.succ_opt() {
            date = next_day;
        }
    }

    let time = NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN);
    date.and_time(time)
}

/// Start of the next local day, when the midnight rotation runs
pub fn next_midnight(now: NaiveDateTime) -> NaiveDateTime {
    match now.date().succ_opt() {
        Some(next_day) => next_day.and_time(NaiveTime::MIN),
        None => now,
    }
}

/// Messages accepted by the running scheduler
enum Control {
    ForceRefresh,
    Shutdown,
}

/// Handle for controlling a running [`Scheduler`]
#[derive(Clone)]
pub struct SchedulerHandle {
    control_tx: mpsc::Sender<Control>,
}

impl SchedulerHandle {
    /// Requests an immediate, unconditionally fetching update cycle
    pub async fn force_refresh(&self) {
        let _ = self.control_tx.send(Control::ForceRefresh).await;
    }

    /// Stops the scheduler after the current tick
    pub async fn shutdown(&self) {
        let _ = self.control_tx.send(Control::Shutdown).await;
    }
}

/// Drives periodic re-evaluation of one installation's coordinator
pub struct Scheduler<A> {
    coordinator: Coordinator<A>,
    control_rx: mpsc::Receiver<Control>,
    // Keeps the channel open even if every external handle is dropped
    _control_tx: mpsc::Sender<Control>,
}

impl<A: PricesGateway> Scheduler<A> {
    /// Wraps a coordinator in a scheduler and returns the control handle
    pub fn new(coordinator: Coordinator<A>) -> (Self, SchedulerHandle) {
        let (control_tx, control_rx) = mpsc::channel(8);
        let handle = SchedulerHandle {
            control_tx: control_tx.clone(),
        };
        (
            Self {
                coordinator,
                control_rx,
                _control_tx: control_tx,
            },
            handle,
        )
    }

    /// Initializes the coordinator and runs ticks until shutdown
    ///
    /// Only an authentication failure terminates the loop with an error;
    /// everything else is logged and retried on the next natural wake-up.
    pub async fn run(mut self) -> Result<(), UpdateError> {
        let (now, dst) = local_context();
        let request = self.coordinator.initialize(now, dst);
        self.run_tick(matches!(request, RefreshRequest::Forced)).await?;

        loop {
            let now = Local::now().naive_local();
            let tick_at = next_quarter_hour(now);
            let midnight_at = next_midnight(now);
            let (target, is_midnight) = if midnight_at <= tick_at {
                (midnight_at, true)
            } else {
                (tick_at, false)
            };
            let delay = (target - now).to_std().unwrap_or(StdDuration::ZERO);
            debug!(target = %target, midnight = is_midnight, "scheduling next wake-up");

            // The timer is recreated each iteration; leaving the select
            // drops the pending one, so at most one is ever outstanding
            tokio::select! {
                () = sleep(delay) => {
                    if is_midnight {
                        let (now, _) = local_context();
                        let request = self.coordinator.handle_midnight(now);
                        self.run_tick(matches!(request, RefreshRequest::Forced)).await?;
                    } else {
                        self.run_tick(false).await?;
                    }
                }
                control = self.control_rx.recv() => {
                    match control {
                        Some(Control::ForceRefresh) => {
                            info!("manual refresh requested");
                            self.run_tick(true).await?;
                        }
                        Some(Control::Shutdown) | None => {
                            info!("scheduler shutting down");
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Runs one tick plus at most one repair follow-up
    ///
    /// Validation repairs request a follow-up cycle; honoring only one per
    /// wake-up keeps repair work serialized and bounded.
    async fn run_tick(&mut self, force: bool) -> Result<(), UpdateError> {
        let refresh = self.tick(force).await?;
        match refresh {
            RefreshRequest::None => {}
            RefreshRequest::Requested => {
                debug!("running repair follow-up cycle");
                self.tick(false).await?;
            }
            RefreshRequest::Forced => {
                debug!("running forced repair follow-up cycle");
                self.tick(true).await?;
            }
        }
        Ok(())
    }

    async fn tick(&mut self, force: bool) -> Result<RefreshRequest, UpdateError> {
        let (now, dst) = local_context();
        match self.coordinator.run_cycle(now, dst, force).await {
            Ok(outcome) => {
                debug!(
                    state = %outcome.state,
                    fetched = outcome.fetched,
                    rate_limited = outcome.rate_limited,
                    "tick complete"
                );
                Ok(outcome.refresh)
            }
            Err(UpdateError::Authentication) => Err(UpdateError::Authentication),
            Err(UpdateError::Failed(message)) => {
                warn!(%message, "update failed, keeping cache and retrying on next tick");
                Ok(RefreshRequest::None)
            }
        }
    }

    /// Access to the coordinator, e.g. for snapshot inspection after a run
    pub fn coordinator(&self) -> &Coordinator<A> {
        &self.coordinator
    }
}

fn local_context() -> (NaiveDateTime, DstTransition) {
    let now = Local::now();
    (now.naive_local(), DstTransition::detect(&now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 15)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    #[test]
    fn mid_quarter_rolls_to_next_mark() {
        assert_eq!(next_quarter_hour(at(9, 7)), at(9, 15));
        assert_eq!(next_quarter_hour(at(9, 16)), at(9, 30));
        assert_eq!(next_quarter_hour(at(9, 44)), at(9, 45));
    }

    #[test]
    fn exact_mark_rolls_to_the_following_mark() {
        // Waking exactly on a mark schedules the next one, not itself
        assert_eq!(next_quarter_hour(at(9, 15)), at(9, 30));
        assert_eq!(next_quarter_hour(at(9, 0)), at(9, 15));
    }

    #[test]
    fn past_last_mark_rolls_to_next_hour() {
        assert_eq!(next_quarter_hour(at(9, 46)), at(10, 0));
        assert_eq!(next_quarter_hour(at(9, 45)), at(10, 0));
    }

    #[test]
    fn hour_rollover_crosses_midnight() {
        let target = next_quarter_hour(at(23, 50));
        assert_eq!(
            target,
            NaiveDate::from_ymd_opt(2026, 3, 16).unwrap().and_hms_opt(0, 0, 0).unwrap()
        );
    }

    #[test]
    fn next_midnight_is_start_of_next_day() {
        let target = next_midnight(at(23, 59));
        assert_eq!(
            target,
            NaiveDate::from_ymd_opt(2026, 3, 16).unwrap().and_hms_opt(0, 0, 0).unwrap()
        );

        // Even early in the day, midnight is the next day's start
        let target = next_midnight(at(0, 1));
        assert_eq!(
            target,
            NaiveDate::from_ymd_opt(2026, 3, 16).unwrap().and_hms_opt(0, 0, 0).unwrap()
        );
    }
}
