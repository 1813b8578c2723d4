//! Event capture

use anyhow::{bail, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use treespy_watcher::{Engine, Event, Topic};

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// One delivered event, flattened for assertions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
    pub name: &'static str,
    pub path: String,
    pub code: Option<&'static str>,
    pub message: Option<String>,
}

impl Recorded {
    fn from_event(event: &Event) -> Self {
        let (code, message) = match event {
            Event::Error(error) => (error.code(), Some(error.to_string())),
            _ => (None, None),
        };
        let path = match event {
            Event::Error(error) => error.path().unwrap_or(""),
            _ => event.path().unwrap_or(""),
        };
        Self {
            name: event.name(),
            path: path.to_string(),
            code,
            message,
        }
    }
}

/// Records every emission of an engine, in delivery order
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<Recorded>>>,
}

impl Recorder {
    pub fn attach(engine: &Engine) -> Self {
        let recorder = Self::default();
        for topic in [Topic::All, Topic::Crawl, Topic::Ready, Topic::Error] {
            let events = recorder.events.clone();
            engine.on(topic, move |event, _root| {
                events.lock().push(Recorded::from_event(event));
            });
        }
        recorder
    }

    pub fn events(&self) -> Vec<Recorded> {
        self.events.lock().clone()
    }

    /// Paths of the recorded events with this name, in order
    pub fn paths(&self, name: &str) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.name == name)
            .map(|e| e.path.clone())
            .collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events.lock().iter().filter(|e| e.name == name).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Poll until `done` holds over the recorded events
    pub async fn wait_for<F>(&self, what: &str, done: F) -> Result<()>
    where
        F: Fn(&[Recorded]) -> bool,
    {
        let started = Instant::now();
        loop {
            if done(&self.events.lock()) {
                return Ok(());
            }
            if started.elapsed() > WAIT_TIMEOUT {
                bail!("Timed out waiting for {what}: {:?}", self.events());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn wait_ready(&self) -> Result<()> {
        self.wait_for("ready", |events| events.iter().any(|e| e.name == "ready"))
            .await
    }

    pub async fn wait_count(&self, name: &str, count: usize) -> Result<()> {
        self.wait_for(&format!("{count} x {name}"), |events| {
            events.iter().filter(|e| e.name == name).count() >= count
        })
        .await
    }
}
