use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};

use std::io::{BufRead, BufReader};
use std::path::Path;

use conduit_log::EventLog;

use super::{DEAD_LETTER_LOG, EVENT_LOG, RECORD_STORE};

pub fn run(dir: &Path) -> anyhow::Result<()> {
    let table = build_table(dir)?;

    println!("\nConduit Status Report");
    println!("---------------------");
    println!("{table}\n");

    Ok(())
}

pub fn build_table(dir: &Path) -> anyhow::Result<Table> {
    if !dir.is_dir() {
        anyhow::bail!("{} is not a directory", dir.display());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["File", "Status", "Details"]);

    // 1. Event log and its consumer groups
    let events = dir.join(EVENT_LOG);
    if events.exists() {
        match EventLog::load(&events) {
            Ok(log) => {
                table.add_row(vec!["Event log".to_string(), "FOUND".to_string(), log_summary(&log)]);
                for name in log.group_names() {
                    let pending = log.pending_count(&name).unwrap_or(0);
                    let cursor = log
                        .group_state(&name)
                        .and_then(|g| g.last_delivered())
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    table.add_row(vec![
                        format!("  group {}", name),
                        "GROUP".to_string(),
                        format!("{} pending, last delivered {}", pending, cursor),
                    ]);
                }
            }
            Err(e) => {
                table.add_row(vec!["Event log".to_string(), "CORRUPT".to_string(), e.to_string()]);
            }
        }
    } else {
        table.add_row(vec!["Event log", "MISSING", ""]);
    }

    // 2. Dead-letter log
    let dead = dir.join(DEAD_LETTER_LOG);
    if dead.exists() {
        match EventLog::load(&dead) {
            Ok(log) => {
                table.add_row(vec!["Dead-letter log".to_string(), "FOUND".to_string(), format!("{} entries", log.len())]);
            }
            Err(e) => {
                table.add_row(vec!["Dead-letter log".to_string(), "CORRUPT".to_string(), e.to_string()]);
            }
        }
    } else {
        table.add_row(vec!["Dead-letter log", "MISSING", ""]);
    }

    // 3. Record store
    let records = dir.join(RECORD_STORE);
    if records.exists() {
        match count_rows(&records) {
            Ok(n) => {
                table.add_row(vec!["Record store".to_string(), "FOUND".to_string(), format!("{} rows", n)]);
            }
            Err(e) => {
                table.add_row(vec!["Record store".to_string(), "CORRUPT".to_string(), e.to_string()]);
            }
        }
    } else {
        table.add_row(vec!["Record store", "MISSING", ""]);
    }

    Ok(table)
}

fn log_summary(log: &EventLog) -> String {
    let stats = log.replay_stats();
    let mut msg = format!(
        "{} entries, last id {}, {} groups, {} records",
        log.len(),
        log.last_id().map(|id| id.to_string()).unwrap_or_else(|| "-".to_string()),
        log.group_names().len(),
        stats.records
    );
    if stats.torn_bytes > 0 {
        msg.push_str(&format!(", {} torn tail bytes", stats.torn_bytes));
    }
    msg
}

/// Complete JSON lines in the store file. A partial last line is not counted.
fn count_rows(path: &Path) -> anyhow::Result<usize> {
    let reader = BufReader::new(std::fs::File::open(path)?);
    let mut rows = 0;
    let mut lines = reader.lines().enumerate().peekable();
    while let Some((i, line)) = lines.next() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let is_last = lines.peek().is_none();
        match serde_json::from_str::<serde_json::Value>(&line) {
            Ok(_) => rows += 1,
            Err(_) if is_last => break,
            Err(e) => anyhow::bail!("line {}: {}", i + 1, e),
        }
    }
    Ok(rows)
}
