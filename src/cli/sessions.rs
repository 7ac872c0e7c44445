use anyhow::Result;

use geist::config::GeistConfig;
use geist::vault::session::list_sessions;

/// List sessions with their snapshot counts.
pub fn sessions(config: &GeistConfig, json: bool) -> Result<()> {
    let conn = geist::db::open_database(config.resolved_db_path())?;
    let rows = list_sessions(&conn)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("No sessions yet.");
        return Ok(());
    }

    println!("{:<6} {:<12} {}", "ID", "Date", "Snapshots");
    println!("{}", "=".repeat(30));
    for row in &rows {
        println!("{:<6} {:<12} {}", row.id, row.date, row.snapshot_count);
    }
    Ok(())
}
