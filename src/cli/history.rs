use anyhow::Result;

use geist::config::GeistConfig;
use geist::filter::history::load_window;

/// Print the suggestions accepted in the last `days` days, newest first.
pub fn history(config: &GeistConfig, days: i64, json: bool) -> Result<()> {
    let conn = geist::db::open_database(config.resolved_db_path())?;
    let today = chrono::Local::now().date_naive();
    let mut entries = load_window(&conn, today, days)?;
    entries.reverse();

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No suggestions in the last {days} days.");
        return Ok(());
    }

    for entry in &entries {
        let title = entry.title.as_deref().unwrap_or("(untitled)");
        println!("{}  [{}]  {title}", entry.session_date, entry.analyzer_id);
        println!("    {}", truncate(&entry.text, 100));
        if !entry.notes.is_empty() {
            println!("    notes: {}", entry.notes.join(", "));
        }
    }
    println!();
    println!("{} suggestion(s)", entries.len());
    Ok(())
}

fn truncate(text: &str, max_chars: usize) -> String {
    let text = text.trim().replace('\n', " ");
    if text.chars().count() <= max_chars {
        return text;
    }
    let cut: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use super::truncate;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééééééé", 5), "éé...");
        assert_eq!(truncate("a\nb", 10), "a b");
    }
}
