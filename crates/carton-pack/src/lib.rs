//! Carton Packer Library
//!
//! This crate provides the compile-time half of Carton, including:
//! - Project descriptor parsing (.ctp)
//! - Project file collection with slim exclusion filters
//! - Archive encoding and decoding (single compressed payload)
//! - The appended-payload binary format for native packages
//! - Marker search and patching of the host runtime executable
//! - The relative-path algebra shared with the runtime loader

pub mod archive;
pub mod collect;
pub mod compress;
pub mod descriptor;
pub mod packer;
pub mod patch;
pub mod paths;
pub mod payload;
pub mod signing;

pub use archive::{Archive, ArchiveError, FileStat, ARCHIVE_EXTENSION, PACKED_SUFFIX};
pub use collect::{Collected, FileFilter};
pub use descriptor::{DescriptorError, ExtractPolicy, ProjectDescriptor, DESCRIPTOR_EXTENSION};
pub use packer::{pack, write_archive, write_native, PackError, PackOutput};
pub use patch::{find_marker, is_native_package, patch_executable, PatchError};
pub use payload::{locate_payload, PayloadHeader, PayloadTrailer};
