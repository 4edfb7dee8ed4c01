//! Capture log events emitted while a test runs
use std::{fmt, sync::Arc};

use parking_lot::Mutex;
use tracing::{
    Event, Level,
    field::Field,
    span::{Attributes, Id, Record},
    subscriber::{DefaultGuard, Subscriber},
};

/// One captured log event
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: Level,
    pub target: String,
    /// `key = value; ` pairs, starting with the level
    pub line: String,
}

/// Records every tracing `Event` emitted on the current thread
///
/// Creating a capture installs it as the thread's default subscriber; dropping it restores
/// the previous one. Tests running on a current-thread tokio runtime see every event from
/// the code under test.
#[derive(Debug)]
pub struct TracingCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
    #[allow(dead_code)]
    guard: DefaultGuard,
}

impl TracingCapture {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let subscriber = CaptureSubscriber {
            events: Arc::clone(&events),
        };
        let guard = tracing::subscriber::set_default(subscriber);

        Self { events, guard }
    }

    /// All events captured so far
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().clone()
    }

    /// Captured lines emitted at exactly `level`
    pub fn lines_at(&self, level: Level) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.level == level)
            .map(|e| e.line.clone())
            .collect()
    }

    /// Whether any event at `level` contains `needle`
    pub fn contains_at(&self, level: Level, needle: &str) -> bool {
        self.lines_at(level).iter().any(|l| l.contains(needle))
    }
}

impl fmt::Display for TracingCapture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let events = self.events.lock();
        let lines: Vec<_> = events.iter().map(|e| e.line.as_str()).collect();
        write!(f, "{}", lines.join("\n"))
    }
}

struct CaptureSubscriber {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl Subscriber for CaptureSubscriber {
    fn new_span(&self, _span: &Attributes<'_>) -> Id {
        Id::from_u64(1)
    }

    fn enabled(&self, _metadata: &tracing::Metadata<'_>) -> bool {
        true
    }

    fn record(&self, _span: &Id, _values: &Record<'_>) {}

    fn record_follows_from(&self, _span: &Id, _follows: &Id) {}

    fn event(&self, event: &Event<'_>) {
        let metadata = event.metadata();
        let mut visitor = LineVisitor::default();
        visitor.record_kv("level", &metadata.level().to_string());
        event.record(&mut visitor);

        self.events.lock().push(CapturedEvent {
            level: *metadata.level(),
            target: metadata.target().to_string(),
            line: visitor.line,
        });
    }

    fn enter(&self, _span: &Id) {}

    fn exit(&self, _span: &Id) {}
}

#[derive(Default)]
struct LineVisitor {
    line: String,
}

impl LineVisitor {
    fn record_kv(&mut self, key: &str, value: &str) {
        self.line.push_str(key);
        self.line.push_str(" = ");
        self.line.push_str(value);
        self.line.push_str("; ");
    }
}

impl tracing::field::Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_kv(field.name(), value)
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.record_kv(field.name(), &format!("{value:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::{error, info};

    #[test]
    fn captures_levels_and_fields() {
        let capture = TracingCapture::new();
        info!(bucket = "b1", "refreshed");
        error!("query failed");

        let events = capture.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].level, Level::INFO);
        assert!(events[0].line.starts_with("level = INFO; "));
        assert!(events[0].line.contains("message = refreshed; "));
        assert!(events[0].line.contains("bucket = b1; "));
        assert!(capture.contains_at(Level::ERROR, "query failed"));
        assert!(!capture.contains_at(Level::WARN, "query failed"));
        assert_eq!(capture.to_string().lines().count(), 2);
    }
}
