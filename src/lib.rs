//! Trackmend: recover interleaved audio tracks from multitrack recorder
//! disk images.
//!
//! The crate provides:
//! - Block-granular image reading (`block`) and reference tracks (`track`)
//! - Sector mapping against reference tracks under two policies (`mapping`)
//! - Fixed-pattern channel extraction (`extract`) with WAV headers (`wav`)
//! - File-oriented helpers (`io`)
//! - An optional CLI (`cli` feature)
//!
//! # Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use trackmend::extract::ExtractOptions;
//! use trackmend::io;
//!
//! let opts = ExtractOptions {
//!     selected: 3,
//!     count: Some(1000),
//!     ..Default::default()
//! };
//! let stats = io::extract_file(Path::new("disk.img"), 0x10_0000, Path::new("ch3.wav"), &opts)?;
//! println!("{} groups recovered", stats.extract.groups);
//! # Ok::<(), trackmend::io::RecoverError>(())
//! ```

pub mod block;
pub mod extract;
pub mod io;
pub mod mapping;
pub mod track;
pub mod wav;

#[cfg(feature = "cli")]
pub mod cli;
