//! Track Entry inspection and administration.

use anyhow::bail;
use chrono::{DateTime, Utc};
use tokio::runtime::Runtime;

use super::open_store;
use crate::config::Config;
use crate::db::entries::{self, EntryFilter};
use crate::model::{PlaylistItem, Stage, TrackEntry};

/// List entries matching a search
pub fn cmd_list(
    rt: &Runtime,
    config: &Config,
    query: Option<&str>,
    stage: Option<&str>,
    playlist: Option<&str>,
    limit: Option<u32>,
) -> anyhow::Result<()> {
    let stage = stage.map(str::parse::<Stage>).transpose()?;
    rt.block_on(async {
        let pool = open_store(config).await?;
        let filter = EntryFilter {
            stage,
            query: query.map(str::to_string),
            playlist_id: playlist.map(str::to_string),
            limit,
        };
        let found = entries::list_entries(&pool, &filter).await?;

        if found.is_empty() {
            println!("No entries found.");
            return Ok(());
        }
        println!("{:>6}  {:<34}  {:<12}  Track", "ID", "Stage", "Playlist");
        for entry in &found {
            println!(
                "{:>6}  {:<34}  {:<12}  {}",
                entry.id,
                entry.stage_label(),
                truncate(&entry.playlist_id, 12),
                entry.display_name()
            );
        }
        println!("\n{} entries", found.len());
        Ok(())
    })
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}

fn when(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".to_string())
}

/// Every field of one entry, for `info`.
fn describe(entry: &TrackEntry) -> Vec<(&'static str, String)> {
    let opt = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
    vec![
        ("ID", entry.id.to_string()),
        ("Artist", entry.artist.clone()),
        ("Title", entry.title.clone()),
        ("Album", opt(&entry.album)),
        ("Playlist", entry.playlist_id.clone()),
        ("Source item", entry.source_item_id.clone()),
        ("Stage", entry.stage_label()),
        (
            "Failed from",
            entry
                .failure
                .as_ref()
                .map(|f| f.failed_from.to_string())
                .unwrap_or_else(|| "-".to_string()),
        ),
        ("Last error", opt(&entry.last_error)),
        ("Note", opt(&entry.note)),
        ("Retry count", entry.retry_count.to_string()),
        ("Next attempt", when(entry.next_attempt_at)),
        (
            "File",
            entry
                .file_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".to_string()),
        ),
        (
            "Library file",
            entry
                .library_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".to_string()),
        ),
        ("Content hash", opt(&entry.content_hash)),
        ("Album id", opt(&entry.album_id)),
        ("Recording id", opt(&entry.recording_id)),
        ("Import request", opt(&entry.import_request_id)),
        ("Discovered", when(Some(entry.discovered_at))),
        ("Last seen", when(Some(entry.last_seen_at))),
        ("Stage changed", when(Some(entry.stage_changed_at))),
        ("Enqueued", when(entry.enqueued_at)),
        ("Last attempt", when(entry.last_attempt_at)),
        ("Downloaded", when(entry.downloaded_at)),
        ("Import requested", when(entry.import_requested_at)),
        ("Completed", when(entry.completed_at)),
    ]
}

/// Show every field of one entry
pub fn cmd_info(rt: &Runtime, config: &Config, id: i64) -> anyhow::Result<()> {
    rt.block_on(async {
        let pool = open_store(config).await?;
        let Some(entry) = entries::get_entry(&pool, id).await? else {
            bail!("No entry with id {id}");
        };
        for (label, value) in describe(&entry) {
            println!("{:<17} {}", format!("{label}:"), value);
        }
        Ok(())
    })
}

/// Delete an entry
pub fn cmd_remove(rt: &Runtime, config: &Config, id: i64) -> anyhow::Result<()> {
    rt.block_on(async {
        let pool = open_store(config).await?;
        if !entries::remove(&pool, id).await? {
            bail!("No entry with id {id}");
        }
        tracing::info!(entry_id = id, "Removed entry");
        println!("Removed entry {id}.");
        Ok(())
    })
}

/// Send one or every failed entry back to work
pub fn cmd_retry_failed(rt: &Runtime, config: &Config, id: Option<i64>) -> anyhow::Result<()> {
    rt.block_on(async {
        let pool = open_store(config).await?;
        let retried = entries::retry_failed(&pool, id, crate::clock::system().now()).await?;
        match id {
            Some(id) if retried == 0 => bail!("Entry {id} does not exist or has not failed"),
            _ => println!("Retrying {retried} entries."),
        }
        Ok(())
    })
}

/// Stop working on an entry
pub fn cmd_cancel(rt: &Runtime, config: &Config, id: i64) -> anyhow::Result<()> {
    rt.block_on(async {
        let pool = open_store(config).await?;
        if !entries::cancel(&pool, id, crate::clock::system().now()).await? {
            bail!("Entry {id} does not exist or is already finished");
        }
        println!("Cancelled entry {id}.");
        Ok(())
    })
}

/// Item id for a hand-added track without a provider id.
fn manual_item_id(artist: &str, title: &str) -> String {
    format!("manual:{}:{}", artist.trim().to_lowercase(), title.trim().to_lowercase())
}

/// Track a song by hand
pub fn cmd_add(
    rt: &Runtime,
    config: &Config,
    artist: &str,
    title: &str,
    album: Option<&str>,
    item_id: Option<&str>,
) -> anyhow::Result<()> {
    if artist.trim().is_empty() || title.trim().is_empty() {
        bail!("--artist and --title must not be empty");
    }
    let item_id = item_id
        .map(str::to_string)
        .unwrap_or_else(|| manual_item_id(artist, title));
    let mut item = PlaylistItem::new(item_id, artist.trim(), title.trim());
    if let Some(album) = album {
        item = item.with_album(album.trim());
    }

    rt.block_on(async {
        let pool = open_store(config).await?;
        match entries::add_manual(&pool, &item, crate::clock::system().now()).await? {
            Some(entry) => println!("Added entry {}: {}", entry.id, entry.display_name()),
            None => println!("Already added: {}", item.item_id),
        }
        Ok(())
    })
}

/// Entry counts per stage
pub fn cmd_stats(rt: &Runtime, config: &Config) -> anyhow::Result<()> {
    rt.block_on(async {
        let pool = open_store(config).await?;
        let counts = entries::stage_counts(&pool).await?;
        let total: i64 = counts.iter().map(|(_, n)| n).sum();

        println!("Track Entries");
        println!("=============");
        for (stage, count) in &counts {
            println!("  {:<18} {}", stage.as_str(), count);
        }
        println!("  {:<18} {}", "total", total);
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::mock_entry;

    #[test]
    fn test_manual_item_id_is_stable() {
        assert_eq!(manual_item_id(" ABBA ", "SOS"), "manual:abba:sos");
        assert_eq!(manual_item_id("abba", "sos"), manual_item_id("ABBA", "SOS"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 12), "short");
        assert_eq!(truncate("0123456789abcdef", 5), "0123…");
    }

    #[test]
    fn test_describe_lists_failure_details() {
        let mut entry = mock_entry(Stage::Failed);
        entry.failure = Some(crate::model::Failure {
            kind: crate::model::FailureKind::NoMatch,
            failed_from: Stage::Identifying,
            retryable: false,
        });
        entry.last_error = Some("no confident match".into());

        let fields = describe(&entry);
        let get = |label| {
            fields
                .iter()
                .find(|(l, _)| *l == label)
                .map(|(_, v)| v.clone())
                .unwrap()
        };
        assert_eq!(get("Stage"), "failed(no_match, final)");
        assert_eq!(get("Failed from"), "identifying");
        assert_eq!(get("Last error"), "no confident match");
        assert_eq!(get("Completed"), "-");
    }
}
