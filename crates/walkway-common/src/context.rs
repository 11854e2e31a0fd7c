//! Logging and timing collaborator threaded through every build stage.
//!
//! The core never formats output beyond message construction; hosts drain
//! the buffered entries and decide how to display them.

use std::collections::HashMap;
use std::time::Duration;
use web_time::Instant;

/// Severity of a logged message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Diagnostic chatter.
    Debug = 0,
    /// Normal progress messages.
    Info = 1,
    /// Something degraded but the build continues.
    Warning = 2,
    /// A stage failed.
    Error = 3,
}

/// Timer key for per-stage profiling.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimerCategory {
    /// Whole pipeline run.
    Total,
    /// Triangle rasterization into the heightfield.
    Rasterization,
    /// Span filtering passes.
    Filtering,
    /// Compact heightfield construction and erosion.
    Compaction,
    /// Region partitioning.
    Regions,
    /// Contour tracing.
    Contours,
    /// Polygon mesh construction.
    PolyMesh,
    /// Detail mesh construction.
    DetailMesh,
    /// Tile serialization.
    TileBuild,
    /// Poly group and traversal table construction.
    Reachability,
    /// Traverse link connection.
    TraverseLinks,
    /// Tile cache rebuilds.
    TileCache,
    /// Anything else.
    Custom(String),
}

/// One buffered log line.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Severity.
    pub level: LogLevel,
    /// Stage or subsystem that produced the message.
    pub category: String,
    /// Human-readable diagnostic.
    pub message: String,
}

/// Completed timer measurement.
#[derive(Debug, Clone)]
pub struct TimerEntry {
    /// Accumulated duration across all start/stop pairs.
    pub duration: Duration,
    /// Number of start/stop pairs recorded.
    pub count: usize,
}

/// Build collaborator carrying logs, timers and progress.
///
/// Every stage takes `&mut BuildContext`; failures are reported as both an
/// error return and a logged entry so hosts see a diagnostic even when they
/// discard the error value.
#[derive(Debug)]
pub struct BuildContext {
    logs: Vec<LogEntry>,
    active_timers: HashMap<TimerCategory, Instant>,
    timers: HashMap<TimerCategory, TimerEntry>,
    min_log_level: LogLevel,
    max_log_entries: usize,
}

impl Default for BuildContext {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildContext {
    /// Creates a context with default settings.
    pub fn new() -> Self {
        Self {
            logs: Vec::new(),
            active_timers: HashMap::new(),
            timers: HashMap::new(),
            min_log_level: LogLevel::Info,
            max_log_entries: 1000,
        }
    }

    /// Sets the minimum level below which messages are dropped.
    pub fn set_log_level(&mut self, level: LogLevel) {
        self.min_log_level = level;
    }

    /// Records a message under a category.
    pub fn log(&mut self, level: LogLevel, category: impl Into<String>, message: impl Into<String>) {
        if level < self.min_log_level {
            return;
        }
        if self.logs.len() >= self.max_log_entries {
            self.logs.remove(0);
        }
        self.logs.push(LogEntry {
            level,
            category: category.into(),
            message: message.into(),
        });
    }

    /// Records an info message.
    pub fn log_info(&mut self, category: impl Into<String>, message: impl Into<String>) {
        self.log(LogLevel::Info, category, message);
    }

    /// Records a warning.
    pub fn log_warning(&mut self, category: impl Into<String>, message: impl Into<String>) {
        self.log(LogLevel::Warning, category, message);
    }

    /// Records an error.
    pub fn log_error(&mut self, category: impl Into<String>, message: impl Into<String>) {
        self.log(LogLevel::Error, category, message);
    }

    /// Starts a timer for the category.
    pub fn start_timer(&mut self, category: TimerCategory) {
        self.active_timers.insert(category, Instant::now());
    }

    /// Stops a timer and accumulates its duration.
    pub fn stop_timer(&mut self, category: TimerCategory) {
        if let Some(start) = self.active_timers.remove(&category) {
            let elapsed = start.elapsed();
            let entry = self.timers.entry(category).or_insert(TimerEntry {
                duration: Duration::ZERO,
                count: 0,
            });
            entry.duration += elapsed;
            entry.count += 1;
        }
    }

    /// Accumulated time for a category, if any was recorded.
    pub fn timer(&self, category: &TimerCategory) -> Option<&TimerEntry> {
        self.timers.get(category)
    }

    /// All buffered log entries, oldest first.
    pub fn logs(&self) -> &[LogEntry] {
        &self.logs
    }

    /// Drops buffered logs and completed timers.
    pub fn reset(&mut self) {
        self.logs.clear();
        self.active_timers.clear();
        self.timers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_filtering() {
        let mut ctx = BuildContext::new();
        ctx.set_log_level(LogLevel::Warning);
        ctx.log_info("rasterize", "dropped");
        ctx.log_warning("rasterize", "kept");
        assert_eq!(ctx.logs().len(), 1);
        assert_eq!(ctx.logs()[0].message, "kept");
    }

    #[test]
    fn test_timer_accumulates() {
        let mut ctx = BuildContext::new();
        ctx.start_timer(TimerCategory::Regions);
        ctx.stop_timer(TimerCategory::Regions);
        ctx.start_timer(TimerCategory::Regions);
        ctx.stop_timer(TimerCategory::Regions);
        assert_eq!(ctx.timer(&TimerCategory::Regions).unwrap().count, 2);
    }

    #[test]
    fn test_log_buffer_bounded() {
        let mut ctx = BuildContext::new();
        for i in 0..1200 {
            ctx.log_info("spam", format!("{i}"));
        }
        assert_eq!(ctx.logs().len(), 1000);
        assert_eq!(ctx.logs()[0].message, "200");
    }
}
