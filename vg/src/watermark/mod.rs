//! Watermark persistence
//!
//! A watermark is the instant before which commits count as already
//! published. It is advanced only after a pull request has been opened, so a
//! crash between publishing and saving can re-publish the same commits on
//! the next run (at-least-once delivery), but never skips them.

mod store;

pub use store::{GLOBAL_KEY, PersistenceError, WatermarkStore, format_instant, parse_instant};
