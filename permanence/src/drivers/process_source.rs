//! Source driver that spawns an external capture command as a child
//! process, grounded in the original StreamRipper driver: one external
//! executable ripping a single configured stream URL, with the session's
//! duration passed as a flag and the output path as an argument.

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use permanence_core::monitor::{ExitStatus, ProcessMonitor, Watched};
use permanence_core::{EventSource, Session, SessionEvent, SourceDriver};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ProcessSourceConfig {
    #[serde(default = "default_command")]
    command: String,
    stream: String,
    #[serde(default)]
    extra_args: Vec<String>,
    #[serde(default = "default_output_dir")]
    output_dir: PathBuf,
}

fn default_command() -> String {
    "streamripper".to_string()
}

fn default_output_dir() -> PathBuf {
    std::env::temp_dir()
}

pub fn from_config(
    config: &serde_yaml::Value,
    process_monitor: Arc<ProcessMonitor>,
) -> Result<Arc<dyn SourceDriver>> {
    let parsed: ProcessSourceConfig = serde_yaml::from_value(config.clone())
        .context("invalid process source driver configuration")?;
    Ok(Arc::new(ProcessSourceDriver {
        command: parsed.command,
        stream: parsed.stream,
        extra_args: parsed.extra_args,
        output_dir: parsed.output_dir,
        process_monitor,
    }))
}

pub struct ProcessSourceDriver {
    command: String,
    stream: String,
    extra_args: Vec<String>,
    output_dir: PathBuf,
    process_monitor: Arc<ProcessMonitor>,
}

impl SourceDriver for ProcessSourceDriver {
    fn spawn(&self, show_name: &str) -> Result<Box<dyn Session>> {
        Ok(Box::new(ProcessSession {
            command: self.command.clone(),
            stream: self.stream.clone(),
            extra_args: self.extra_args.clone(),
            output_path: self.output_dir.join(slugify(show_name)),
            process_monitor: self.process_monitor.clone(),
            events: Arc::new(EventSource::new()),
            child: Arc::new(Mutex::new(None)),
        }))
    }
}

fn slugify(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

struct ProcessSession {
    command: String,
    stream: String,
    extra_args: Vec<String>,
    output_path: PathBuf,
    process_monitor: Arc<ProcessMonitor>,
    events: Arc<EventSource<SessionEvent>>,
    /// Shared with the `ChildWatch` the process monitor polls, so `stop()`
    /// can signal the still-running child without racing the monitor for
    /// ownership of it.
    child: Arc<Mutex<Option<Child>>>,
}

impl Session for ProcessSession {
    fn can_stop_automatically(&self, _duration: Duration) -> bool {
        true
    }

    fn start(&mut self, duration: Option<Duration>) -> Result<()> {
        let mut command = Command::new(&self.command);
        command
            .arg(&self.stream)
            .arg("-A")
            .args(&self.extra_args)
            .arg("-a")
            .arg(&self.output_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        if let Some(duration) = duration {
            command.arg("-l").arg(duration.as_secs().to_string());
        }

        let child = command
            .spawn()
            .with_context(|| format!("failed to spawn '{}'", self.command))?;
        *self.child.lock().unwrap() = Some(child);

        self.events.fire(SessionEvent::Start);

        let output_path = self.output_path.clone();
        let events = self.events.clone();
        let child_handle = self.child.clone();
        self.process_monitor.watch(
            Box::new(ChildWatch {
                child: child_handle,
            }),
            move |status| report_exit(status, &output_path, &events),
        );

        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(child) = self.child.lock().unwrap().as_mut() {
            child.kill().context("failed to terminate capture process")?;
        }
        Ok(())
    }

    fn events(&self) -> &EventSource<SessionEvent> {
        &self.events
    }
}

fn report_exit(status: ExitStatus, output_path: &std::path::Path, events: &EventSource<SessionEvent>) {
    match status {
        ExitStatus::Code(0) => match find_output_file(output_path) {
            Some(filename) => events.fire(SessionEvent::Done(filename)),
            None => events.fire(SessionEvent::Error(format!(
                "could not find capture output (looked for {}.*)",
                output_path.display()
            ))),
        },
        ExitStatus::Code(code) => {
            events.fire(SessionEvent::Error(format!("process exited with status {code}")));
        }
        ExitStatus::Signaled => {
            events.fire(SessionEvent::Error("process was terminated by a signal".to_string()));
        }
        ExitStatus::Unknown => {
            events.fire(SessionEvent::Error("process exit status could not be determined".to_string()));
        }
    }
}

fn find_output_file(output_path: &std::path::Path) -> Option<String> {
    let parent = output_path.parent()?;
    let prefix = output_path.file_name()?.to_str()?;
    std::fs::read_dir(parent).ok()?.find_map(|entry| {
        let entry = entry.ok()?;
        let name = entry.file_name();
        let name = name.to_str()?;
        name.starts_with(prefix).then(|| entry.path().display().to_string())
    })
}

struct ChildWatch {
    child: Arc<Mutex<Option<Child>>>,
}

impl Watched for ChildWatch {
    fn poll_exit(&mut self) -> Result<Option<ExitStatus>> {
        let mut guard = self.child.lock().unwrap();
        let Some(child) = guard.as_mut() else {
            return Ok(Some(ExitStatus::Unknown));
        };
        match child.try_wait()? {
            Some(status) => Ok(Some(
                status
                    .code()
                    .map(ExitStatus::Code)
                    .unwrap_or(ExitStatus::Signaled),
            )),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_strips_non_alphanumerics() {
        assert_eq!(slugify("Morning Edition!"), "morningedition");
    }

    #[test]
    fn spawn_builds_a_session() {
        let driver = ProcessSourceDriver {
            command: "/bin/true".to_string(),
            stream: "http://example.invalid/stream".to_string(),
            extra_args: Vec::new(),
            output_dir: std::env::temp_dir(),
            process_monitor: ProcessMonitor::new(),
        };
        let session = driver.spawn("morning").unwrap();
        assert!(session.can_stop_automatically(Duration::from_secs(1)));
    }
}
