//! Show Manager: the authoritative table of tracked shows, keyed by
//! `(source, show)`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use crate::driver::{Session, SourceDriver};
use crate::event::EventSource;
use crate::model::{ShowKey, Token};
use crate::schedule::Schedule;

/// A handle to a session shared between the Show Manager and the Recorder:
/// the Recorder needs to call `stop()` on it without taking it out of the
/// table first.
pub type SessionHandle = Arc<Mutex<Box<dyn Session>>>;

struct ManagedShow {
    token: Token,
    driver: Option<Arc<dyn SourceDriver>>,
    schedule: Option<Arc<dyn Schedule>>,
    start_time: Option<SystemTime>,
    duration: Option<Duration>,
    session: Option<SessionHandle>,
    stop_time: Option<SystemTime>,
}

/// Fired whenever `add_show` schedules (or reschedules) a show's next
/// window. Forwarded by the Recorder as the `show_schedule` hook.
#[derive(Debug, Clone)]
pub struct ScheduleEvent {
    pub token: Token,
    pub start_time: SystemTime,
}

/// One session whose forced-stop deadline has arrived.
pub struct StoppedSession {
    pub key: ShowKey,
    pub token: Token,
    pub session: SessionHandle,
    /// `Some` unless the show was removed from configuration while this
    /// session was recording, in which case there is nothing left to
    /// reschedule.
    pub reschedule: Option<(Arc<dyn SourceDriver>, Arc<dyn Schedule>)>,
}

pub struct ShowManager {
    shows: Mutex<HashMap<ShowKey, ManagedShow>>,
    pub on_schedule: EventSource<ScheduleEvent>,
}

impl ShowManager {
    pub fn new() -> Self {
        Self {
            shows: Mutex::new(HashMap::new()),
            on_schedule: EventSource::new(),
        }
    }

    /// Upsert a show's scheduling entry. Returns whether anything changed.
    ///
    /// Events fire while the table lock is still held; listeners must not
    /// call back into the Show Manager on this thread.
    pub fn add_show(
        &self,
        key: ShowKey,
        token: Token,
        driver: Arc<dyn SourceDriver>,
        schedule: Arc<dyn Schedule>,
        leeway_seconds: i64,
        now: SystemTime,
    ) -> bool {
        let Some((start, duration)) = schedule.next_occurrence(now, leeway_seconds) else {
            // Schedule is exhausted: nothing to track.
            return false;
        };

        let mut shows = self.shows.lock().unwrap();

        match shows.get_mut(&key) {
            None => {
                shows.insert(
                    key,
                    ManagedShow {
                        token: token.clone(),
                        driver: Some(driver),
                        schedule: Some(schedule),
                        start_time: Some(start),
                        duration: Some(duration),
                        session: None,
                        stop_time: None,
                    },
                );
                self.on_schedule.fire(ScheduleEvent {
                    token,
                    start_time: start,
                });
                true
            }
            Some(existing) => {
                let unchanged = existing.token.source == token.source
                    && existing.start_time == Some(start)
                    && existing.duration == Some(duration);
                if unchanged {
                    return false;
                }

                let timing_changed =
                    existing.start_time != Some(start) || existing.duration != Some(duration);

                existing.token = token.clone();
                existing.driver = Some(driver);
                existing.schedule = Some(schedule);
                existing.start_time = Some(start);
                existing.duration = Some(duration);

                if existing.session.is_some() {
                    let new_end = start + duration;
                    if existing.stop_time.map(|t| new_end > t).unwrap_or(true) {
                        existing.stop_time = Some(new_end);
                    }
                }

                if timing_changed {
                    self.on_schedule.fire(ScheduleEvent {
                        token,
                        start_time: start,
                    });
                }
                true
            }
        }
    }

    pub fn keys(&self) -> HashSet<ShowKey> {
        self.shows.lock().unwrap().keys().cloned().collect()
    }

    /// Remove a show from configuration. If it has no session, it is
    /// deleted outright. If a session is in-flight, it is kept (with its
    /// scheduling fields cleared so the tick loop never restarts it) until
    /// that session reaches a terminal state via `sessions_to_stop`.
    pub fn remove_show(&self, key: &ShowKey) -> Option<Token> {
        let mut shows = self.shows.lock().unwrap();
        let entry = shows.get_mut(key)?;
        let token = entry.token.clone();

        if entry.session.is_none() {
            shows.remove(key);
        } else {
            entry.driver = None;
            entry.start_time = None;
            entry.duration = None;
            entry.schedule = None;
        }

        Some(token)
    }

    /// Every entry that is due to start: session absent, driver present,
    /// and its (possibly widened) start time has arrived.
    pub fn shows_to_start(
        &self,
        now: SystemTime,
    ) -> Vec<(ShowKey, Token, Arc<dyn SourceDriver>, Duration)> {
        let shows = self.shows.lock().unwrap();
        shows
            .iter()
            .filter_map(|(key, entry)| {
                if entry.session.is_some() {
                    return None;
                }
                let driver = entry.driver.clone()?;
                let start_time = entry.start_time?;
                let duration = entry.duration?;
                if now < start_time {
                    return None;
                }
                let elapsed = now
                    .duration_since(start_time)
                    .unwrap_or(Duration::ZERO);
                let effective_duration = duration.saturating_sub(elapsed);
                Some((key.clone(), entry.token.clone(), driver, effective_duration))
            })
            .collect()
    }

    /// Attach a running session and its forced-stop deadline. Returns
    /// false if the key disappeared (was removed) in the meantime.
    pub fn set_session(&self, key: &ShowKey, session: SessionHandle, stop_time: SystemTime) -> bool {
        let mut shows = self.shows.lock().unwrap();
        match shows.get_mut(key) {
            Some(entry) => {
                entry.session = Some(session);
                entry.stop_time = Some(stop_time);
                true
            }
            None => false,
        }
    }

    /// Every entry whose active session's deadline has passed. Removes
    /// them from the table - rescheduling them is the Recorder's job. A
    /// stopped entry whose driver/schedule are still set (the common case)
    /// carries them along so the Recorder can `add_show` it back in for
    /// its next occurrence; a `None` there means the show was removed
    /// from configuration while recording and should simply vanish.
    pub fn sessions_to_stop(&self, now: SystemTime) -> Vec<StoppedSession> {
        let mut shows = self.shows.lock().unwrap();
        let due: Vec<ShowKey> = shows
            .iter()
            .filter_map(|(key, entry)| {
                let stop_time = entry.stop_time?;
                entry.session.as_ref()?;
                (stop_time <= now).then(|| key.clone())
            })
            .collect();

        due.into_iter()
            .filter_map(|key| {
                let entry = shows.remove(&key)?;
                let session = entry.session?;
                Some(StoppedSession {
                    key,
                    token: entry.token,
                    session,
                    reschedule: entry.driver.zip(entry.schedule),
                })
            })
            .collect()
    }

    /// Entries whose scheduled window has closed (`start + duration <=
    /// now`) without ever getting a session - a failed `spawn`/`start`
    /// that needs to move on to its next occurrence instead of retrying
    /// every tick forever.
    pub fn shows_needing_reschedule(
        &self,
        now: SystemTime,
    ) -> Vec<(ShowKey, Token, Arc<dyn SourceDriver>, Arc<dyn Schedule>)> {
        let shows = self.shows.lock().unwrap();
        shows
            .iter()
            .filter_map(|(key, entry)| {
                if entry.session.is_some() {
                    return None;
                }
                let driver = entry.driver.clone()?;
                let schedule = entry.schedule.clone()?;
                let start_time = entry.start_time?;
                let duration = entry.duration?;
                (start_time + duration <= now)
                    .then(|| (key.clone(), entry.token.clone(), driver, schedule))
            })
            .collect()
    }

    /// Every currently active session, for shutdown.
    pub fn active_sessions(&self) -> Vec<(ShowKey, SessionHandle)> {
        let shows = self.shows.lock().unwrap();
        shows
            .iter()
            .filter_map(|(key, entry)| entry.session.clone().map(|s| (key.clone(), s)))
            .collect()
    }
}

impl Default for ShowManager {
    fn default() -> Self {
        Self::new()
    }
}
