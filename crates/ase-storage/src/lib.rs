//! Run persistence for the ase-sweep system.
//!
//! [`RunWriter`] implements the engine's [`RunSink`](ase_core::run::RunSink)
//! boundary on the local filesystem: a fresh run directory per sweep, one
//! fsynced JSON-Lines manifest, and per-point spectrum files (native
//! instrument export plus a plain-text net spectrum).

pub mod run_writer;

pub use run_writer::RunWriter;
