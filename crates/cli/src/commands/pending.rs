use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};

use std::path::Path;

use super::{format_ms, load_log, preview, EVENT_LOG};

pub fn run(dir: &Path, group: &str) -> anyhow::Result<()> {
    let table = build_table(dir, group)?;

    println!("\nPending entries of group '{}'\n", group);
    println!("{table}\n");

    Ok(())
}

pub fn build_table(dir: &Path, group: &str) -> anyhow::Result<Table> {
    let log = load_log(dir, EVENT_LOG)?;
    let state = log
        .group_state(group)
        .ok_or_else(|| anyhow::anyhow!("unknown consumer group '{}'", group))?;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["ID", "Consumer", "Deliveries", "Last Delivered", "Payload"]);

    for (id, pending) in state.iter_pending() {
        let payload = log.get(*id).map(|e| preview(&e.payload_lossy(), 60)).unwrap_or_default();
        table.add_row(vec![
            id.to_string(),
            pending.consumer.clone(),
            pending.delivery_count.to_string(),
            format_ms(pending.last_delivered_ms),
            payload,
        ]);
    }

    Ok(table)
}
