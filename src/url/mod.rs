//! URL handling module for Onion-Ripple
//!
//! Canonical URL form, host extraction and the onion-host test.

mod domain;
mod normalize;

pub use domain::{extract_domain, is_onion_url};
pub use normalize::{normalize_parsed, normalize_url};
