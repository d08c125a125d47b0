//! Metadata model: tokens, signature blobs, and the host's metadata store.
//!
//! This module carries the ECMA-335-shaped pieces the rewrite pass operates
//! on. [`token::Token`] identifies table entries, [`signatures`] parses and
//! emits signature blobs, [`store::MetadataStore`] is the trait seam through
//! which the host exposes a module's metadata, and [`resolver`] finds or
//! defines the symbolic references the injected call requires.

pub mod resolver;
pub mod signatures;
pub mod store;
pub mod token;
