//! Duplicate/Import Reconciler.
//!
//! Before a download the candidate is checked against our own store and the
//! library manager's catalog and queue. After tagging, the library manager
//! is asked to scan the entry's folder.
//!
//! The precheck is advisory: the library manager acts on its own, so an
//! album can still arrive through another path before our import finishes.
//! The verification sweep treats that as success.

use std::path::Path;

use crate::db::entries::{self, Advance};
use crate::error::Result;
use crate::model::{FailureKind, Stage, TrackEntry};
use crate::providers::{AlbumRef, ProviderError};

use super::{Engine, within};

/// Why a candidate is not downloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another entry for the same item is already being handled
    AlreadyTracked,
    /// The library manager has the album with files
    InLibrary,
    /// The library manager is already acquiring the album
    InLibraryQueue,
}

impl SkipReason {
    /// Value stored in the entry's note.
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::AlreadyTracked => "already_tracked",
            SkipReason::InLibrary => "in_library",
            SkipReason::InLibraryQueue => "in_library_queue",
        }
    }
}

/// Outcome of a precheck.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precheck {
    Proceed,
    Skip(SkipReason),
    /// The library manager could not answer; check again next pass
    Deferred(String),
}

impl Engine {
    /// Decide whether a discovered entry should be downloaded.
    pub async fn precheck(&self, entry: &TrackEntry) -> Result<Precheck> {
        if let Some(other) =
            entries::find_active_duplicate(&self.pool, entry.id, &entry.source_item_id).await?
        {
            tracing::debug!(target: "reconciler", entry_id = entry.id, other = other.id, "Item already tracked");
            return Ok(Precheck::Skip(SkipReason::AlreadyTracked));
        }

        let album = AlbumRef::for_entry(entry);
        let library = &self.collaborators.library;
        let limit = self.settings.external_call_timeout;

        let decision = async {
            if within(limit, library.has_album(&album)).await? {
                return Ok(Precheck::Skip(SkipReason::InLibrary));
            }
            if within(limit, library.queue_contains(&album)).await? {
                return Ok(Precheck::Skip(SkipReason::InLibraryQueue));
            }
            Ok::<_, ProviderError>(Precheck::Proceed)
        };

        Ok(decision
            .await
            .unwrap_or_else(|e| Precheck::Deferred(e.to_string())))
    }

    /// Precheck every discovered entry. Returns how many were decided.
    ///
    /// Stops at the first deferral: if the library manager is down, the
    /// rest would be deferred too.
    pub async fn precheck_pass(&self) -> Result<usize> {
        let mut decided = 0;
        for entry in entries::entries_in_stage(&self.pool, Stage::Discovered).await? {
            match self.precheck(&entry).await? {
                Precheck::Proceed => {
                    if self.enqueue(&entry).await? {
                        decided += 1;
                    }
                }
                Precheck::Skip(reason) => {
                    let values = Advance {
                        note: Some(reason.as_str().to_string()),
                        ..Default::default()
                    };
                    if self
                        .transition(&entry, Stage::Discovered, Stage::DuplicateSkipped, &values)
                        .await?
                    {
                        tracing::info!(target: "reconciler", entry_id = entry.id, reason = reason.as_str(), "Skipped duplicate");
                        decided += 1;
                    }
                }
                Precheck::Deferred(error) => {
                    tracing::warn!(target: "reconciler", entry_id = entry.id, %error, "Library manager unavailable; precheck deferred");
                    break;
                }
            }
        }
        Ok(decided)
    }

    /// Ask the library manager to import the entry's folder.
    pub async fn request_import(&self, entry: &TrackEntry) -> std::result::Result<String, ProviderError> {
        let folder = entry
            .file_path
            .as_deref()
            .and_then(Path::parent)
            .ok_or_else(|| ProviderError::NotFound(format!("entry {} has no file", entry.id)))?;
        within(
            self.settings.external_call_timeout,
            self.collaborators.library.trigger_scan(folder),
        )
        .await
    }

    /// Trigger imports for every tagged entry. Returns how many were requested.
    pub async fn import_pass(&self) -> Result<usize> {
        let mut requested = 0;
        for entry in entries::entries_in_stage(&self.pool, Stage::Tagged).await? {
            let Some(_guard) = InFlight::claim(self, entry.id) else {
                continue;
            };

            match self.request_import(&entry).await {
                Ok(request_id) => {
                    let values = Advance {
                        import_request_id: Some(request_id.clone()),
                        ..Default::default()
                    };
                    if self
                        .transition(&entry, Stage::Tagged, Stage::ImportRequested, &values)
                        .await?
                    {
                        tracing::info!(target: "reconciler", entry_id = entry.id, request_id = %request_id, "Import requested");
                        requested += 1;
                    }
                }
                Err(e) => {
                    self.record_failure(
                        &entry,
                        Stage::Tagged,
                        FailureKind::ImportTriggerFailed,
                        e.to_string(),
                        self.settings.max_import_attempts,
                    )
                    .await?;
                }
            }
        }
        Ok(requested)
    }
}

/// Marks an entry's import trigger as running until dropped.
struct InFlight<'a> {
    engine: &'a Engine,
    entry_id: i64,
}

impl<'a> InFlight<'a> {
    fn claim(engine: &'a Engine, entry_id: i64) -> Option<Self> {
        // Release the lock before a rejected guard can be dropped
        let inserted = engine.imports_in_flight.lock().insert(entry_id);
        inserted.then(|| Self { engine, entry_id })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.engine.imports_in_flight.lock().remove(&self.entry_id);
    }
}
