//! Core services for the gdps-core switcher: the profile registry, the
//! server info fetcher, and the persistence/selection seams they plug into.

pub mod services;
