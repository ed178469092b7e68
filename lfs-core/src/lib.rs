//! The log-structured file system core: data model, segment cache, log layer, file
//! layer (with its segment cleaner), and directory layer, mounted together as a
//! [`Volume`].
//!
//! The kernel-interface binding and the `mklfs`/`lfsck` utilities live in their own
//! crates; this crate only knows about `Flash` (from `lfs-flash`) and exposes a single
//! entry point, [`Volume`], generic over the backing flash implementation and the
//! timestamp source.

pub mod cache;
pub mod data;
pub mod directory_layer;
pub mod error;
pub mod file_layer;
pub mod log_layer;
pub mod volume;

pub use directory_layer::DirectoryLayer;
pub use error::{Error, Result};
pub use file_layer::FileLayer;
pub use log_layer::Log;
pub use volume::{FormatParams, MountOptions, Volume};
