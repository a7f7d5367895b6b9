//! Hook Invoker: a named registry of external callables, dispatched from a
//! fixed-size worker pool so a slow hook never stalls a tick.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::SystemTime;

use crossbeam_channel::{unbounded, Sender};
use tracing::warn;

use crate::error::PermanenceError;
use crate::event::EventSource;

/// Payload handed to a registered hook callable. One variant per hook name
/// the Recorder declares; see the hook table in SPEC_FULL.md §6.
#[derive(Debug, Clone)]
pub enum HookArgs {
    Empty,
    ShowSchedule {
        source: String,
        show: String,
        start_time: SystemTime,
    },
    Show {
        source: String,
        show: String,
    },
    ShowError {
        source: String,
        show: String,
        error: String,
    },
    ShowDone {
        source: String,
        show: String,
        filename: String,
    },
    ShowSave {
        source: String,
        show: String,
        location: String,
    },
    HookFailure {
        description: String,
        error: String,
    },
}

pub type HookCallable = Arc<dyn Fn(&HookArgs) -> anyhow::Result<()> + Send + Sync>;

/// One entry registered under a hook name: the callable plus a description
/// used to identify it in `failure` events (e.g. an external script's path).
#[derive(Clone)]
pub struct HookRegistration {
    pub callable: HookCallable,
    pub description: String,
}

impl HookRegistration {
    pub fn new(description: impl Into<String>, callable: HookCallable) -> Self {
        Self {
            callable,
            description: description.into(),
        }
    }
}

type Task = (HookCallable, String, HookArgs);

struct Registry {
    buckets: HashMap<String, Vec<HookRegistration>>,
}

/// Fixed-size worker pool dispatching hook calls off the tick thread.
pub struct HookInvoker {
    registry: Mutex<Registry>,
    sender: Mutex<Option<Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    pub on_failure: EventSource<(String, String)>,
}

impl HookInvoker {
    /// Builds the invoker and starts `pool_size` worker threads immediately
    /// (the invoker itself has no "idle until first use" state, unlike the
    /// process monitor).
    pub fn new(pool_size: usize) -> Arc<Self> {
        let (sender, receiver) = unbounded::<Task>();
        let invoker = Arc::new(Self {
            registry: Mutex::new(Registry {
                buckets: HashMap::new(),
            }),
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(Vec::new()),
            on_failure: EventSource::new(),
        });

        let mut workers = Vec::with_capacity(pool_size.max(1));
        for index in 0..pool_size.max(1) {
            let receiver = receiver.clone();
            let invoker = invoker.clone();
            workers.push(
                std::thread::Builder::new()
                    .name(format!("hook-worker-{index}"))
                    .spawn(move || {
                        for (callable, description, args) in receiver.iter() {
                            if let Err(error) = callable(&args) {
                                warn!(hook = %description, %error, "hook callable failed");
                                invoker.on_failure.fire((description, error.to_string()));
                            }
                        }
                    })
                    .expect("failed to spawn hook worker thread"),
            );
        }
        *invoker.workers.lock().unwrap() = workers;
        invoker
    }

    /// Create an empty bucket for `name`. Fails if already declared.
    pub fn declare(&self, name: &str) -> anyhow::Result<()> {
        let mut registry = self.registry.lock().unwrap();
        if registry.buckets.contains_key(name) {
            return Err(PermanenceError::DuplicateHook(name.to_string()).into());
        }
        registry.buckets.insert(name.to_string(), Vec::new());
        Ok(())
    }

    /// Append a registration to `name`'s bucket. Fails if `name` was never declared.
    pub fn register(&self, name: &str, registration: HookRegistration) -> anyhow::Result<()> {
        let mut registry = self.registry.lock().unwrap();
        let bucket = registry
            .buckets
            .get_mut(name)
            .ok_or_else(|| PermanenceError::UnregisteredHook(name.to_string()))?;
        bucket.push(registration);
        Ok(())
    }

    /// Empty every bucket, keeping the declared names.
    pub fn clear(&self) {
        let mut registry = self.registry.lock().unwrap();
        for bucket in registry.buckets.values_mut() {
            bucket.clear();
        }
    }

    /// Snapshot `name`'s bucket and enqueue one task per registration.
    /// Unknown hook names are silently ignored - the Recorder only ever
    /// invokes names it declared itself.
    pub fn invoke(&self, name: &str, args: HookArgs) {
        let registrations: Vec<HookRegistration> = {
            let registry = self.registry.lock().unwrap();
            match registry.buckets.get(name) {
                Some(bucket) => bucket.clone(),
                None => return,
            }
        };

        let sender = self.sender.lock().unwrap();
        let Some(sender) = sender.as_ref() else {
            return;
        };
        for registration in registrations {
            let qualified = format!("{name}/{}", registration.description);
            let _ = sender.send((registration.callable, qualified, args.clone()));
        }
    }

    /// Stop accepting new work. Queued tasks still drain; workers exit once
    /// the channel is closed and empty.
    pub fn stop(&self) {
        self.sender.lock().unwrap().take();
        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        for worker in workers {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn declare_then_register_then_invoke_runs_callable() {
        let invoker = HookInvoker::new(2);
        invoker.declare("show_start").unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        invoker
            .register(
                "show_start",
                HookRegistration::new(
                    "test",
                    Arc::new(move |_args| {
                        c.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }),
                ),
            )
            .unwrap();

        invoker.invoke(
            "show_start",
            HookArgs::Show {
                source: "s".into(),
                show: "sh".into(),
            },
        );

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        invoker.stop();
    }

    #[test]
    fn register_without_declare_fails() {
        let invoker = HookInvoker::new(1);
        let result = invoker.register(
            "missing",
            HookRegistration::new("x", Arc::new(|_| Ok(()))),
        );
        assert!(result.is_err());
        invoker.stop();
    }

    #[test]
    fn double_declare_fails() {
        let invoker = HookInvoker::new(1);
        invoker.declare("shutdown").unwrap();
        assert!(invoker.declare("shutdown").is_err());
        invoker.stop();
    }

    #[test]
    fn failing_hook_fires_failure_event_and_does_not_block_others() {
        let invoker = HookInvoker::new(2);
        invoker.declare("show_start").unwrap();

        invoker
            .register(
                "show_start",
                HookRegistration::new("broken", Arc::new(|_| anyhow::bail!("boom"))),
            )
            .unwrap();

        let failures = Arc::new(Mutex::new(Vec::new()));
        let f = failures.clone();
        invoker
            .on_failure
            .observe(move |(desc, err)| f.lock().unwrap().push((desc.clone(), err.clone())));

        invoker.invoke(
            "show_start",
            HookArgs::Show {
                source: "s".into(),
                show: "sh".into(),
            },
        );

        std::thread::sleep(Duration::from_millis(50));
        let recorded = failures.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].0, "show_start/broken");
        invoker.stop();
    }

    #[test]
    fn clear_keeps_names_but_empties_buckets() {
        let invoker = HookInvoker::new(1);
        invoker.declare("startup").unwrap();
        invoker
            .register("startup", HookRegistration::new("a", Arc::new(|_| Ok(()))))
            .unwrap();
        invoker.clear();
        // re-registering after clear must still succeed, proving the name survived
        invoker
            .register("startup", HookRegistration::new("b", Arc::new(|_| Ok(()))))
            .unwrap();
        invoker.stop();
    }
}
