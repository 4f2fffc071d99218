//! Traffic logging for chunk store calls
//!
//! Appends one line per request/response/error to flowstore.log.
//! Payloads are truncated so block content does not leak into logs.

use config::PathManager;
use std::io::Write;

use crate::helper::truncate_for_log;

/// Maximum characters to log for a payload summary
const MAX_CONTENT_LOG_CHARS: usize = 200;

/// Log an outgoing chunk store request
pub fn log_store_request(operation: &str, target: &str) {
    log_traffic("STORE", "REQUEST", &format!("[{}] {}", operation, target));
}

/// Log a chunk store response body (truncated summary only)
pub fn log_store_response(operation: &str, status: u16, body: &str) {
    let summary = truncate_for_log(body, MAX_CONTENT_LOG_CHARS);
    log_traffic("STORE", "RESPONSE", &format!("[{}] status={} {}", operation, status, summary));
}

/// Log a failed chunk store call
pub fn log_store_error(operation: &str, error: &str) {
    let summary = truncate_for_log(error, MAX_CONTENT_LOG_CHARS);
    log_traffic("STORE", "ERROR", &format!("[{}] {}", operation, summary));
}

fn log_traffic(category: &str, event_type: &str, message: &str) {
    if let Some(log_path) = PathManager::log_file_path() {
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Ok(mut file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
        {
            let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
            let _ = writeln!(file, "[{}] [TRAFFIC] [{}] [{}] {}", timestamp, category, event_type, message);
        }
    }
}
