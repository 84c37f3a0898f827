//! Zlib compression wrappers used for archive bodies and embedded sources.

use std::io::{self, Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

/// Compress a byte buffer with zlib at the default level.
pub fn compress(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Decompress a zlib stream produced by [`compress`].
pub fn decompress(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let input = b"function main() { return 42; }\n".repeat(64);
        let packed = compress(&input).unwrap();
        assert!(packed.len() < input.len());
        assert_eq!(decompress(&packed).unwrap(), input);
    }

    #[test]
    fn test_empty_roundtrip() {
        let packed = compress(&[]).unwrap();
        assert_eq!(decompress(&packed).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_decompress_garbage_fails() {
        assert!(decompress(b"not a zlib stream").is_err());
    }
}
