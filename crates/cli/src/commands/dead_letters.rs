use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};

use std::path::Path;

use conduit_log::{DeadLetterEntry, EntryId};

use super::{format_ms, load_log, preview, DEAD_LETTER_LOG};

pub fn run(dir: &Path, limit: usize) -> anyhow::Result<()> {
    let table = build_table(dir, limit)?;

    println!("\nDead Letters\n");
    println!("{table}\n");

    Ok(())
}

pub fn build_table(dir: &Path, limit: usize) -> anyhow::Result<Table> {
    let log = load_log(dir, DEAD_LETTER_LOG)?;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["ID", "Original ID", "Failed At", "Error", "Payload"]);

    for entry in log.range(EntryId::FIRST, limit) {
        match DeadLetterEntry::from_log_entry(&entry) {
            Some(dead) => table.add_row(vec![
                entry.id.to_string(),
                dead.original_entry_id.to_string(),
                format_ms(dead.failed_at_ms),
                dead.error_description,
                preview(&dead.payload, 60),
            ]),
            None => table.add_row(vec![
                entry.id.to_string(),
                "?".to_string(),
                format_ms(entry.received_at_ms),
                "undecodable dead-letter record".to_string(),
                preview(&entry.payload_lossy(), 60),
            ]),
        };
    }

    Ok(table)
}
