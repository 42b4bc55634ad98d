//! Listing-page scraping: from a rendered page to an ordered batch of records.
//!
//! The pass is split into three stages, each in its own module:
//!
//! | Stage | Module | Responsibility |
//! |-------|--------|----------------|
//! | Extract | [`extractor`] | Locate title, kicker, link, image inside one block via ranked lookup rules |
//! | Assemble | [`assembler`] | Validate title/link, derive title metrics, stamp the run timestamp |
//! | Harvest | [`harvester`] | Render the page, enumerate blocks in document order, count outcomes |
//!
//! # Extension point
//!
//! There is no deduplication across runs. A persisted set of `(title, link)`
//! hashes consulted before [`assembler::assemble`] would be the place to add it.

pub mod assembler;
pub mod extractor;
pub mod harvester;
