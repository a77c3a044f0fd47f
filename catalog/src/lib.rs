//! Catalog of the lab's MSI datasets
//!
//! Three views are kept together by [`Catalog`]:
//!
//! - the [`Manifest`]: `MSIResearch/manifest.json` under the local root, listing every known
//!   dataset with its scope, group and descriptive metadata,
//! - the [`CacheIndex`]: which datasets are mirrored under `<root>/<scope>/<group>/<name>/`,
//! - the dataset host: reached through a [`remote::Session`] when a dataset gets synced.
//!
//! The manifest decides where a dataset belongs; the cache only records where it was found
//! and how big it is.
//!
//! # Searching
//!
//! Patterns are case-insensitive regular expressions matched anywhere in a field. Text fields
//! of a hit carry an [`excerpt`] around the first match; list fields are reported whole.

pub mod cache;
mod db;
pub mod error;
pub mod manifest;
pub mod prune;
pub mod search;

pub use cache::{CacheEntry, CacheIndex, SCOPES, SortKey};
pub use db::{ALREADY_CACHED, Catalog, MANIFEST_DIR, MANIFEST_FILE, SyncOptions, SyncOutcome};
pub use error::Error;
pub use manifest::{DatasetRecord, Filter, Manifest};
pub use prune::Strategy;
pub use search::{DEFAULT_CONTEXT, Field, SearchHit, Snippet, excerpt};
