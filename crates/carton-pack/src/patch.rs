//! Host executable patching.
//!
//! The host runtime binary carries two reserved byte regions: a version slot
//! and a package slot. Packing copies the host, stamps the obfuscated version
//! token into the version slot, replaces the package marker with the package
//! signature, and appends the archive payload. The marker byte strings are
//! assembled at runtime from halves so that the scanner's own constants never
//! appear contiguously in a compiled binary; only the reserved slots do.

use std::fs::{self, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::payload::{PayloadHeader, PayloadTrailer};

/// Size of the version marker prefix.
pub const VERSION_MARKER_SIZE: usize = 14;

/// Size of the full version slot: marker prefix plus obfuscated body.
pub const VERSION_TOKEN_SIZE: usize = 56;

/// Size of the obfuscated body inside the version slot.
pub const VERSION_BODY_SIZE: usize = VERSION_TOKEN_SIZE - VERSION_MARKER_SIZE;

/// Size of the package marker and the package signature.
pub const PACKAGE_MARKER_SIZE: usize = 24;

/// Chunk size used when scanning a binary for markers.
pub const SCAN_CHUNK: usize = 8192;

/// Digit substitution table for the version token. Index is the digit.
const OBFUSCATION_ALPHABET: [u8; 10] =
    [b'#', b'$', b'@', b'!', b'(', b'{', b'?', b'<', b']', b'|'];

/// Terminates the meaningful part of a version token body.
const TOKEN_TERMINATOR: u8 = b')';

/// Fills the version token body after the terminator.
const TOKEN_PADDING: u8 = b'|';

#[derive(Error, Debug)]
pub enum PatchError {
    #[error("patch io error: {0}")]
    Io(#[from] io::Error),

    #[error("cannot replace '{path}': file is locked or in use")]
    TargetLocked { path: PathBuf },

    #[error("{marker} marker not found: host is not a patchable runtime binary")]
    MarkerNotFound { marker: &'static str },

    #[error("version string too long for the token slot ({len} bytes)")]
    VersionOverflow { len: usize },
}

pub fn version_marker() -> [u8; VERSION_MARKER_SIZE] {
    let mut marker = [0u8; VERSION_MARKER_SIZE];
    marker[..7].copy_from_slice(b"c@rton.");
    marker[7..].copy_from_slice(b"version");
    marker
}

pub fn package_marker() -> [u8; PACKAGE_MARKER_SIZE] {
    let mut marker = [0u8; PACKAGE_MARKER_SIZE];
    marker[..8].copy_from_slice(b"carton.p");
    marker[8..15].copy_from_slice(b"ack(?@@");
    marker[15..].copy_from_slice(b"_________");
    marker
}

pub fn package_signature() -> [u8; PACKAGE_MARKER_SIZE] {
    let mut signature = package_marker();
    signature[15..].copy_from_slice(b"!!$<$?!*)");
    signature
}

/// Encode a version string into the fixed-width token.
///
/// Digits are substituted through the obfuscation alphabet, the result is
/// terminated and padded to [`VERSION_TOKEN_SIZE`].
pub fn encode_version_token(version: &str) -> Result<[u8; VERSION_TOKEN_SIZE], PatchError> {
    let bytes = version.as_bytes();
    if bytes.len() >= VERSION_BODY_SIZE {
        return Err(PatchError::VersionOverflow { len: bytes.len() });
    }
    let mut token = [TOKEN_PADDING; VERSION_TOKEN_SIZE];
    token[..VERSION_MARKER_SIZE].copy_from_slice(&version_marker());
    let body = &mut token[VERSION_MARKER_SIZE..];
    for (i, &b) in bytes.iter().enumerate() {
        body[i] = if b.is_ascii_digit() {
            OBFUSCATION_ALPHABET[(b - b'0') as usize]
        } else {
            b
        };
    }
    body[bytes.len()] = TOKEN_TERMINATOR;
    Ok(token)
}

/// Decode the body of a stamped version slot. Returns `None` for a pristine
/// (unstamped) slot.
pub fn decode_version_token(body: &[u8]) -> Option<String> {
    let end = body.iter().position(|&b| b == TOKEN_TERMINATOR)?;
    let mut out = String::with_capacity(end);
    for &b in &body[..end] {
        match OBFUSCATION_ALPHABET.iter().position(|&a| a == b) {
            Some(digit) => out.push((b'0' + digit as u8) as char),
            None => out.push(b as char),
        }
    }
    Some(out)
}

fn search(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Find the first occurrence of `marker` in `reader`, scanning in chunks.
///
/// Keeps `marker.len() - 1` bytes of overlap between chunks so a marker
/// spanning a chunk boundary is still found.
pub fn find_marker<R: Read>(reader: &mut R, marker: &[u8]) -> io::Result<Option<u64>> {
    debug_assert!(!marker.is_empty() && marker.len() <= SCAN_CHUNK);
    let keep = marker.len() - 1;
    let mut buf = vec![0u8; SCAN_CHUNK + keep];
    let mut filled = 0usize;
    let mut offset = 0u64;

    loop {
        let read = reader.read(&mut buf[filled..])?;
        if read == 0 {
            return Ok(search(&buf[..filled], marker).map(|i| offset + i as u64));
        }
        filled += read;
        if let Some(i) = search(&buf[..filled], marker) {
            return Ok(Some(offset + i as u64));
        }
        if filled > keep {
            let drop = filled - keep;
            buf.copy_within(drop..filled, 0);
            offset += drop as u64;
            filled = keep;
        }
    }
}

/// Whether a binary image has already been stamped as a package.
pub fn is_native_package(data: &[u8]) -> bool {
    search(data, &package_signature()).is_some()
}

/// Read the stamped version out of a binary image, if any.
pub fn read_stamped_version(data: &[u8]) -> Option<String> {
    let start = search(data, &version_marker())?;
    let body_start = start + VERSION_MARKER_SIZE;
    let body = data.get(body_start..body_start + VERSION_BODY_SIZE)?;
    decode_version_token(body)
}

/// Copy `host` to `target`, stamp both slots, and append the payload.
///
/// The host must carry pristine marker slots; a binary that is already a
/// package fails with [`PatchError::MarkerNotFound`].
pub fn patch_executable(
    host: &Path,
    target: &Path,
    version: &str,
    payload: &[u8],
) -> Result<(), PatchError> {
    let token = encode_version_token(version)?;

    if target.exists() {
        fs::remove_file(target).map_err(|_| PatchError::TargetLocked {
            path: target.to_path_buf(),
        })?;
    }
    fs::copy(host, target)?;

    let result = stamp_and_append(target, &token, payload);
    if result.is_err() {
        let _ = fs::remove_file(target);
    }
    result
}

fn stamp_and_append(
    target: &Path,
    token: &[u8; VERSION_TOKEN_SIZE],
    payload: &[u8],
) -> Result<(), PatchError> {
    let mut file = OpenOptions::new().read(true).write(true).open(target)?;

    let version_at = find_marker(&mut file, &version_marker())?
        .ok_or(PatchError::MarkerNotFound { marker: "version" })?;
    file.seek(SeekFrom::Start(0))?;
    let package_at = find_marker(&mut file, &package_marker())?
        .ok_or(PatchError::MarkerNotFound { marker: "package" })?;

    file.seek(SeekFrom::Start(version_at))?;
    file.write_all(token)?;
    file.seek(SeekFrom::Start(package_at))?;
    file.write_all(&package_signature())?;

    file.seek(SeekFrom::End(0))?;
    file.write_all(&PayloadHeader::new(payload).to_bytes())?;
    file.write_all(payload)?;
    file.write_all(&PayloadTrailer::new(payload).to_bytes())?;
    file.flush()?;
    Ok(())
}
