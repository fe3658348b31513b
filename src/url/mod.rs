//! URL handling module for Ripple-Crawl
//!
//! This module turns arbitrary link strings into canonical keys used by the
//! dedup gate to decide whether two links point at the same page.

mod normalize;

// Re-export main functions
pub use normalize::{canonical_key, normalize, UrlKey};
