//! Lifecycle stages and the failure taxonomy.
//!
//! The lifecycle graph is closed and strictly ordered:
//!
//! ```text
//! discovered -> duplicate_skipped
//! discovered -> queued -> downloading -> downloaded -> identifying -> tagged
//!            -> import_requested -> imported -> verified
//! ```
//!
//! Any non-terminal stage may move to `failed`. A retryable failure goes back
//! to [`Stage::retry_target`] of the stage it failed from; everything else
//! about `failed` lives in [`Failure`](super::Failure).

use std::fmt;

/// Lifecycle stage of a Track Entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    /// Seen on a watched playlist, not yet prechecked
    Discovered,
    /// Already present or pending elsewhere (terminal)
    DuplicateSkipped,
    /// Waiting for a download slot
    Queued,
    /// A worker is fetching the file
    Downloading,
    /// File is on disk, not yet identified
    Downloaded,
    /// The tag tool is running on the file
    Identifying,
    /// File rewritten with canonical metadata
    Tagged,
    /// Library manager was asked to scan the file's folder
    ImportRequested,
    /// Library manager confirmed the album
    Imported,
    /// Media server shows the file (terminal success)
    Verified,
    /// See [`Failure`](super::Failure) for reason and retryability
    Failed,
}

impl Stage {
    /// Every stage, in lifecycle order.
    pub const ALL: [Stage; 11] = [
        Stage::Discovered,
        Stage::DuplicateSkipped,
        Stage::Queued,
        Stage::Downloading,
        Stage::Downloaded,
        Stage::Identifying,
        Stage::Tagged,
        Stage::ImportRequested,
        Stage::Imported,
        Stage::Verified,
        Stage::Failed,
    ];

    /// Convert to string representation for storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Discovered => "discovered",
            Stage::DuplicateSkipped => "duplicate_skipped",
            Stage::Queued => "queued",
            Stage::Downloading => "downloading",
            Stage::Downloaded => "downloaded",
            Stage::Identifying => "identifying",
            Stage::Tagged => "tagged",
            Stage::ImportRequested => "import_requested",
            Stage::Imported => "imported",
            Stage::Verified => "verified",
            Stage::Failed => "failed",
        }
    }

    /// Stages with no outgoing automated edge regardless of failure details.
    ///
    /// `Failed` is terminal only when not retryable, which is decided by the
    /// entry's [`Failure`](super::Failure), so it is not listed here.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::DuplicateSkipped | Stage::Verified)
    }

    /// Whether a worker may currently be blocked on an external call for
    /// an entry in this stage.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Stage::Downloading | Stage::Identifying)
    }

    /// Whether `self -> next` is a forward edge of the lifecycle graph.
    ///
    /// Failure edges, retry edges and restart recovery are checked by
    /// [`Stage::can_transition_to`].
    pub fn can_advance_to(&self, next: Stage) -> bool {
        use Stage::*;
        matches!(
            (self, next),
            (Discovered, DuplicateSkipped)
                | (Discovered, Queued)
                | (Queued, Downloading)
                | (Downloading, Downloaded)
                | (Downloaded, Identifying)
                | (Identifying, Tagged)
                | (Tagged, ImportRequested)
                | (ImportRequested, Imported)
                | (ImportRequested, Verified)
                | (Imported, Verified)
        )
    }

    /// Full edge set: forward edges, failure, retry and restart recovery.
    pub fn can_transition_to(&self, next: Stage) -> bool {
        if self.can_advance_to(next) {
            return true;
        }
        match (self, next) {
            (Stage::Failed, target) => Stage::ALL
                .iter()
                .filter(|from| !from.is_terminal() && **from != Stage::Failed)
                .any(|from| from.retry_target() == target),
            (from, Stage::Failed) => !from.is_terminal(),
            (Stage::Downloading, Stage::Queued) | (Stage::Identifying, Stage::Downloaded) => true,
            _ => false,
        }
    }

    /// Where an entry resumes after a retryable failure raised in this stage.
    ///
    /// This is the stage at which the failing operation becomes eligible to
    /// start again: a failed download re-enters the queue, a failed import
    /// trigger or verification timeout goes back to `tagged` so that
    /// `request_import` runs again.
    pub fn retry_target(&self) -> Stage {
        match self {
            Stage::Queued | Stage::Downloading => Stage::Queued,
            Stage::Downloaded | Stage::Identifying => Stage::Downloaded,
            Stage::Tagged | Stage::ImportRequested | Stage::Imported => Stage::Tagged,
            Stage::Discovered => Stage::Discovered,
            // Terminal stages never fail; keep them where they are.
            other => *other,
        }
    }

    /// Where an entry found in this stage at startup should be reset to.
    pub fn recovery_target(&self) -> Option<Stage> {
        match self {
            Stage::Downloading => Some(Stage::Queued),
            Stage::Identifying => Some(Stage::Downloaded),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a stored stage name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown stage '{0}'")]
pub struct UnknownStage(pub String);

impl std::str::FromStr for Stage {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| UnknownStage(s.to_string()))
    }
}

/// Classified reason an entry is in `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Playlist provider unreachable (never recorded on an entry)
    SourceUnavailable,
    /// Network or rate limit while downloading
    AcquisitionTransient,
    /// Track unobtainable (not found, rights issue)
    AcquisitionPermanent,
    /// Tag tool did not finish in time
    IdentificationTimeout,
    /// Tag tool exited abnormally
    IdentificationError,
    /// Tag tool ran cleanly but found no confident match
    NoMatch,
    /// Library manager could not be asked to import
    ImportTriggerFailed,
    /// Media server never showed the file within the grace window
    VerificationTimeout,
    /// Operator cancelled the entry
    Cancelled,
}

impl FailureKind {
    /// Convert to string representation for storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::SourceUnavailable => "source_unavailable",
            FailureKind::AcquisitionTransient => "acquisition_transient",
            FailureKind::AcquisitionPermanent => "acquisition_permanent",
            FailureKind::IdentificationTimeout => "identification_timeout",
            FailureKind::IdentificationError => "identification_error",
            FailureKind::NoMatch => "no_match",
            FailureKind::ImportTriggerFailed => "import_trigger_failed",
            FailureKind::VerificationTimeout => "verification_timeout",
            FailureKind::Cancelled => "cancelled",
        }
    }

    /// Whether this kind is eligible for automatic re-attempt at all.
    ///
    /// Retry caps can still turn a retryable kind terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureKind::SourceUnavailable
                | FailureKind::AcquisitionTransient
                | FailureKind::IdentificationTimeout
                | FailureKind::IdentificationError
                | FailureKind::ImportTriggerFailed
                | FailureKind::VerificationTimeout
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FailureKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "source_unavailable" => FailureKind::SourceUnavailable,
            "acquisition_transient" => FailureKind::AcquisitionTransient,
            "acquisition_permanent" => FailureKind::AcquisitionPermanent,
            "identification_timeout" => FailureKind::IdentificationTimeout,
            "identification_error" => FailureKind::IdentificationError,
            "no_match" => FailureKind::NoMatch,
            "import_trigger_failed" => FailureKind::ImportTriggerFailed,
            "verification_timeout" => FailureKind::VerificationTimeout,
            "cancelled" => FailureKind::Cancelled,
            other => return Err(format!("unknown failure kind '{other}'")),
        })
    }
}
