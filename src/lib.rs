//! Python extension module for gridagg
//!
//! The Rust APIs live in `gridagg-core` and `gridagg-climatology`; this crate only
//! assembles their bindings into `gridagg._lib`.

pub mod python;
