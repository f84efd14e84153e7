//! Pure domain services.

pub mod content_hasher;
