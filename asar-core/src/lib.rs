//! Reader, verifier and writer for Electron's ASAR archive format.

pub mod archive;
pub mod asar;
pub mod error;
pub mod extract;
pub mod integrity;
pub mod read;
pub mod temp;
pub mod write;

mod pickle;

pub use archive::{Archive, ArchiveBuilder, ValidationMode};
pub use error::{AsarError, Result, SecurityFailure};
