pub mod dead_letters;
pub mod inspect;
pub mod pending;

use std::path::{Path, PathBuf};

use conduit_log::EventLog;

pub(crate) const EVENT_LOG: &str = "events.log";
pub(crate) const DEAD_LETTER_LOG: &str = "dead-letter.log";
pub(crate) const RECORD_STORE: &str = "records.jsonl";

pub(crate) fn load_log(dir: &Path, name: &str) -> anyhow::Result<EventLog> {
    let path: PathBuf = dir.join(name);
    if !path.exists() {
        anyhow::bail!("{} not found", path.display());
    }
    EventLog::load(&path).map_err(|e| anyhow::anyhow!("{}: {}", path.display(), e))
}

pub(crate) fn format_ms(ms: u64) -> String {
    chrono::DateTime::from_timestamp_millis(ms as i64)
        .unwrap_or_default()
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// First `max` characters of `s`, marked when cut.
pub(crate) fn preview(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{}...", cut)
    }
}
