//! Recorder: the tick loop that owns the Show Manager and Hook Invoker and
//! drives sessions from "due to start" through "finished" to "rescheduled".

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, Once};
use std::time::{Duration, SystemTime};

use tracing::{info, warn};

use crate::driver::{Session, SessionEvent, StorageDriver, StorageEvent};
use crate::hook::{HookArgs, HookInvoker};
use crate::model::{Configuration, Options};
use crate::monitor::ProcessMonitor;
use crate::show_manager::{SessionHandle, ShowManager};

/// The fixed hook names the Recorder declares up front. The Invoker
/// rejects registration of anything else.
pub const HOOK_NAMES: &[&str] = &[
    "startup",
    "shutdown",
    "show_start",
    "show_error",
    "show_done",
    "show_schedule",
    "show_add",
    "show_update",
    "show_remove",
    "show_save",
    "hook_failure",
];

struct ReloadState {
    config: Configuration,
    config_updated: bool,
}

pub struct Recorder {
    show_manager: ShowManager,
    pub hook_invoker: Arc<HookInvoker>,
    pub process_monitor: Arc<ProcessMonitor>,
    /// The reload lock: held for the entire `apply_configuration`, and only
    /// ever briefly within `tick`/`reconcile` - never across a call into a
    /// `Session`, since `Session::start`/`stop` are allowed to fire events
    /// synchronously and those event handlers (`save_to_storage`) need this
    /// same lock. Held across such a call would self-deadlock on a thread
    /// that re-enters it.
    reload: Mutex<ReloadState>,
    active: AtomicBool,
    wait_lock: Mutex<()>,
    wait_cv: Condvar,
    shutdown_once: Once,
}

impl Recorder {
    pub fn new(hook_pool_size: usize) -> anyhow::Result<Arc<Self>> {
        let hook_invoker = HookInvoker::new(hook_pool_size);
        for name in HOOK_NAMES {
            hook_invoker.declare(name)?;
        }

        let recorder = Arc::new(Self {
            show_manager: ShowManager::new(),
            hook_invoker,
            process_monitor: ProcessMonitor::new(),
            reload: Mutex::new(ReloadState {
                config: Configuration {
                    storage: Default::default(),
                    sources: Default::default(),
                    hooks: Default::default(),
                    options: Options::default(),
                },
                config_updated: false,
            }),
            active: AtomicBool::new(true),
            wait_lock: Mutex::new(()),
            wait_cv: Condvar::new(),
            shutdown_once: Once::new(),
        });

        let show_manager_listener = recorder.clone();
        recorder
            .show_manager
            .on_schedule
            .observe(move |event| {
                show_manager_listener.hook_invoker.invoke(
                    "show_schedule",
                    HookArgs::ShowSchedule {
                        source: event.token.source.clone(),
                        show: event.token.show.clone(),
                        start_time: event.start_time,
                    },
                );
            });

        let failure_listener = recorder.clone();
        recorder.hook_invoker.on_failure.observe(move |(description, error)| {
            failure_listener.hook_invoker.invoke(
                "hook_failure",
                HookArgs::HookFailure {
                    description: description.clone(),
                    error: error.clone(),
                },
            );
        });

        Ok(recorder)
    }

    /// Replace the active configuration. Re-registers hooks from scratch,
    /// swaps in the new sources/storage/options, and subscribes to every
    /// storage driver's `save`/`error` events. Safe to call while ticking -
    /// it serializes with `tick` through the reload lock.
    pub fn apply_configuration(self: &Arc<Self>, config: Configuration) -> anyhow::Result<()> {
        let mut state = self.reload.lock().unwrap();

        self.hook_invoker.clear();
        for (name, registrations) in &config.hooks {
            for registration in registrations {
                self.hook_invoker.register(name, registration.clone())?;
            }
        }

        for storage in config.storage.values() {
            let recorder = self.clone();
            storage.events().observe(move |event| recorder.handle_storage_event(event));
        }

        state.config = config;
        state.config_updated = true;
        Ok(())
    }

    fn handle_storage_event(&self, event: &StorageEvent) {
        match event {
            StorageEvent::Save { source, show, location } => {
                self.hook_invoker.invoke(
                    "show_save",
                    HookArgs::ShowSave {
                        source: source.clone(),
                        show: show.clone(),
                        location: location.clone(),
                    },
                );
            }
            StorageEvent::Error { source, show, error } => {
                self.hook_invoker.invoke(
                    "show_error",
                    HookArgs::ShowError {
                        source: source.clone(),
                        show: show.clone(),
                        error: error.clone(),
                    },
                );
            }
        }
    }

    /// One iteration of the scheduling loop: reconcile configuration
    /// changes (if any are pending), start due shows, stop expired ones,
    /// and reschedule anything whose window closed without a session.
    ///
    /// The reload lock is only ever held long enough to read `leeway` and
    /// the `config_updated` flag (and, inside `reconcile`, to read the
    /// source table) - never across `start_show`/`stop_show`, since those
    /// drive a `Session` and `Session::start`/`stop` may fire events
    /// synchronously back into code that needs this same lock.
    pub fn tick(self: &Arc<Self>, now: SystemTime) {
        let (leeway, needs_reconcile) = {
            let mut state = self.reload.lock().unwrap();
            let needs_reconcile = state.config_updated;
            state.config_updated = false;
            (state.config.options.leeway_seconds, needs_reconcile)
        };

        if needs_reconcile {
            self.reconcile(now);
        }

        for (key, token, driver, duration) in self.show_manager.shows_to_start(now) {
            self.start_show(key, token, driver, duration, now, leeway);
        }

        for stopped in self.show_manager.sessions_to_stop(now) {
            self.stop_show(stopped, now, leeway);
        }

        for (key, token, driver, schedule) in self.show_manager.shows_needing_reschedule(now) {
            self.show_manager.add_show(key, token, driver, schedule, leeway, now);
        }
    }

    fn reconcile(&self, now: SystemTime) {
        let state = self.reload.lock().unwrap();
        let previous_keys = self.show_manager.keys();
        let mut found = std::collections::HashSet::new();

        for source in state.config.sources.values() {
            for show in &source.shows {
                let key = (source.name.clone(), show.name.clone());
                let token = crate::model::Token::new(&source.name, &show.name);
                let existed = previous_keys.contains(&key);
                let changed = self.show_manager.add_show(
                    key.clone(),
                    token.clone(),
                    source.driver.clone(),
                    show.schedule.clone(),
                    state.config.options.leeway_seconds,
                    now,
                );
                found.insert(key);

                if changed {
                    let hook = if existed { "show_update" } else { "show_add" };
                    self.hook_invoker.invoke(
                        hook,
                        HookArgs::Show {
                            source: token.source,
                            show: token.show,
                        },
                    );
                }
            }
        }

        for stale_key in previous_keys.difference(&found) {
            if let Some(token) = self.show_manager.remove_show(stale_key) {
                self.hook_invoker.invoke(
                    "show_remove",
                    HookArgs::Show {
                        source: token.source,
                        show: token.show,
                    },
                );
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn start_show(
        self: &Arc<Self>,
        key: (String, String),
        token: crate::model::Token,
        driver: Arc<dyn crate::driver::SourceDriver>,
        effective_duration: Duration,
        now: SystemTime,
        _leeway: i64,
    ) {
        let mut session = match driver.spawn(&token.show) {
            Ok(session) => session,
            Err(error) => {
                self.emit_start_failure(&token, &error);
                return;
            }
        };

        let can_auto = session.can_stop_automatically(effective_duration);
        let base_stop = now + effective_duration;
        let stop_time = if can_auto {
            base_stop + Duration::from_secs(3)
        } else {
            base_stop
        };

        self.wire_session_events(session.as_ref(), token.clone(), &key);

        let start_arg = can_auto.then_some(effective_duration);
        if let Err(error) = session.start(start_arg) {
            self.emit_start_failure(&token, &error);
            return;
        }

        let handle: SessionHandle = Arc::new(Mutex::new(session));
        self.show_manager.set_session(&key, handle, stop_time);
    }

    fn emit_start_failure(&self, token: &crate::model::Token, error: &anyhow::Error) {
        self.hook_invoker.invoke(
            "show_error",
            HookArgs::ShowError {
                source: token.source.clone(),
                show: token.show.clone(),
                error: format!("failed to start recording: {error}"),
            },
        );
    }

    fn wire_session_events(
        self: &Arc<Self>,
        session: &dyn Session,
        token: crate::model::Token,
        key: &(String, String),
    ) {
        let recorder = self.clone();
        let key = key.clone();
        session.events().observe(move |event| match event {
            SessionEvent::Start => {
                recorder.hook_invoker.invoke(
                    "show_start",
                    HookArgs::Show {
                        source: token.source.clone(),
                        show: token.show.clone(),
                    },
                );
            }
            SessionEvent::Error(message) => {
                recorder.hook_invoker.invoke(
                    "show_error",
                    HookArgs::ShowError {
                        source: token.source.clone(),
                        show: token.show.clone(),
                        error: message.clone(),
                    },
                );
            }
            SessionEvent::Done(filename) => {
                recorder.hook_invoker.invoke(
                    "show_done",
                    HookArgs::ShowDone {
                        source: token.source.clone(),
                        show: token.show.clone(),
                        filename: filename.clone(),
                    },
                );
                recorder.save_to_storage(&key, &token, filename);
            }
        });
    }

    fn save_to_storage(&self, key: &(String, String), token: &crate::model::Token, filename: &str) {
        let state = self.reload.lock().unwrap();
        let Some(source) = state.config.sources.get(&key.0) else {
            return;
        };
        let storages = source.storages.clone();
        drop(state);

        for storage in storages {
            if let Err(error) = storage.save(&token.source, &token.show, Path::new(filename)) {
                self.hook_invoker.invoke(
                    "show_error",
                    HookArgs::ShowError {
                        source: token.source.clone(),
                        show: token.show.clone(),
                        error: error.to_string(),
                    },
                );
            }
        }
    }

    fn stop_show(
        &self,
        stopped: crate::show_manager::StoppedSession,
        now: SystemTime,
        leeway: i64,
    ) {
        if let Err(error) = stopped.session.lock().unwrap().stop() {
            warn!(source = %stopped.token.source, show = %stopped.token.show, %error, "stopping session failed");
        }

        if let Some((driver, schedule)) = stopped.reschedule {
            self.show_manager
                .add_show(stopped.key, stopped.token, driver, schedule, leeway, now);
        }
    }

    /// Block until `options.check_interval` elapses or `stop()` is called.
    pub fn wait_for_next_tick(&self, check_interval: Duration) {
        let guard = self.wait_lock.lock().unwrap();
        let _ = self.wait_cv.wait_timeout(guard, check_interval).unwrap();
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn check_interval(&self) -> Duration {
        self.reload.lock().unwrap().config.options.check_interval
    }

    /// Runs the tick loop until `stop()` is called. Intended to be spawned
    /// on its own thread by the daemon entry point.
    pub fn run(self: &Arc<Self>) {
        self.hook_invoker.invoke("startup", HookArgs::Empty);
        while self.is_active() {
            self.tick(SystemTime::now());
            self.wait_for_next_tick(self.check_interval());
        }
    }

    /// Signal the tick loop to exit, stop every active session, wait for
    /// the Process Monitor to reap them, then halt it and fire `shutdown`.
    pub fn stop(self: &Arc<Self>) {
        self.active.store(false, Ordering::SeqCst);
        {
            let _guard = self.wait_lock.lock().unwrap();
            self.wait_cv.notify_all();
        }

        for (_, session) in self.show_manager.active_sessions() {
            if let Err(error) = session.lock().unwrap().stop() {
                warn!(%error, "stopping session during shutdown failed");
            }
        }

        for storage in self.reload.lock().unwrap().config.storage.values() {
            storage.shutdown();
        }

        let recorder = self.clone();
        self.process_monitor
            .on_empty
            .observe(move |_| recorder.fire_shutdown());

        if self.process_monitor.is_empty() {
            // Either nothing was ever watched (the monitor's sweep thread
            // never started, so `on_empty` can never fire) or the watch set
            // had already drained before we subscribed above - fire
            // directly so `shutdown` isn't dropped in either case.
            self.fire_shutdown();
        } else {
            // The monitor fires `on_empty` on its own sweep cadence; give it
            // a moment to observe the sessions we just stopped before
            // halting. `fire_shutdown` is idempotent, so it does not matter
            // if more than one sweep lands in this window.
            std::thread::sleep(Duration::from_millis(300));
        }

        self.process_monitor.halt();
        self.hook_invoker.stop();
        info!("recorder stopped");
    }

    /// Invoke the `shutdown` hook exactly once, no matter how many times
    /// this is called - `on_empty` fires on every sweep that finds the
    /// watch set empty, not just on the empty transition.
    fn fire_shutdown(&self) {
        self.shutdown_once
            .call_once(|| self.hook_invoker.invoke("shutdown", HookArgs::Empty));
    }
}
