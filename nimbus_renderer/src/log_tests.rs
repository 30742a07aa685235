//! Unit tests for log.rs
//!
//! Tests LogSeverity ordering, DefaultLogger output paths and logger swapping.

use crate::log::{self, Logger, LogEntry, LogSeverity, DefaultLogger};
use serial_test::serial;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

fn entry(severity: LogSeverity, file: Option<&'static str>, line: Option<u32>) -> LogEntry {
    LogEntry {
        severity,
        timestamp: SystemTime::now(),
        source: "nimbus::test".to_string(),
        message: format!("{:?} message", severity),
        file,
        line,
    }
}

// ============================================================================
// LOG SEVERITY TESTS
// ============================================================================

#[test]
fn test_log_severity_ordering() {
    assert!(LogSeverity::Trace < LogSeverity::Debug);
    assert!(LogSeverity::Debug < LogSeverity::Info);
    assert!(LogSeverity::Info < LogSeverity::Warn);
    assert!(LogSeverity::Warn < LogSeverity::Error);
}

#[test]
fn test_log_severity_debug_names() {
    assert_eq!(format!("{:?}", LogSeverity::Trace), "Trace");
    assert_eq!(format!("{:?}", LogSeverity::Error), "Error");
}

// ============================================================================
// DEFAULT LOGGER TESTS
// ============================================================================

#[test]
fn test_default_logger_all_severities_without_file_line() {
    let logger = DefaultLogger;
    for severity in [
        LogSeverity::Trace,
        LogSeverity::Debug,
        LogSeverity::Info,
        LogSeverity::Warn,
        LogSeverity::Error,
    ] {
        logger.log(&entry(severity, None, None));
    }
}

#[test]
fn test_default_logger_error_with_file_line() {
    let logger = DefaultLogger;
    logger.log(&entry(LogSeverity::Error, Some("descriptor_heap.rs"), Some(123)));
}

#[test]
fn test_logger_trait_is_send_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<DefaultLogger>();
}

// ============================================================================
// GLOBAL LOGGER TESTS
// ============================================================================

struct CaptureLogger {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl Logger for CaptureLogger {
    fn log(&self, entry: &LogEntry) {
        self.entries.lock().unwrap().push(entry.clone());
    }
}

#[test]
#[serial]
fn test_set_logger_captures_macro_output() {
    let entries = Arc::new(Mutex::new(Vec::new()));
    log::set_logger(CaptureLogger { entries: Arc::clone(&entries) });

    crate::engine_info!("nimbus::log_test", "frame {} started", 4);
    crate::engine_error!("nimbus::log_test", "slot {} leaked", 9);

    log::reset_logger();

    // Other tests may log concurrently, so look entries up by message
    let captured = entries.lock().unwrap();
    let info = captured
        .iter()
        .find(|e| e.source == "nimbus::log_test" && e.message == "frame 4 started")
        .expect("info entry captured");
    assert_eq!(info.severity, LogSeverity::Info);
    assert!(info.file.is_none());

    let error = captured
        .iter()
        .find(|e| e.source == "nimbus::log_test" && e.message == "slot 9 leaked")
        .expect("error entry captured");
    assert_eq!(error.severity, LogSeverity::Error);
    assert!(error.file.is_some());
    assert!(error.line.is_some());
}

#[test]
#[serial]
fn test_reset_logger_stops_capture() {
    let entries = Arc::new(Mutex::new(Vec::new()));
    log::set_logger(CaptureLogger { entries: Arc::clone(&entries) });
    log::reset_logger();

    crate::engine_warn!("nimbus::log_test", "not captured");

    assert!(entries
        .lock()
        .unwrap()
        .iter()
        .all(|e| e.message != "not captured"));
}
