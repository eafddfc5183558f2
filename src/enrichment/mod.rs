//! Track identification: the concrete Fingerprint/Tag Tool.
//!
//! # Architecture
//!
//! This module follows a clean separation between:
//! - **Domain models** (`domain.rs`) - Internal types for identifications
//! - **API DTOs** (`acoustid/dto.rs`) - Exact API response shapes
//! - **Adapters** - Convert DTOs to domain models and pick the best match
//! - **Clients** - HTTP client for AcoustID
//! - **Fingerprint** - Audio fingerprint generation via fpcalc
//! - **Tags** - Tag rewriting via lofty
//! - **Tagger** - [`TagTool`](crate::providers::TagTool) implementation tying it together

pub mod acoustid;
pub mod domain;
pub mod fingerprint;
pub mod tagger;
pub mod tags;

pub use domain::{AudioFingerprint, EnrichmentError, Identification};
pub use fingerprint::Fpcalc;
pub use tagger::AcoustIdTagger;
