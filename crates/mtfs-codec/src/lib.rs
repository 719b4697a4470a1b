#![forbid(unsafe_code)]
//! Stateless run-length codec with a framed header.
//!
//! Frame layout, all fields little-endian:
//!
//! | offset | size | field |
//! |---|---|---|
//! | 0 | 4 | magic `0x4D54_4653` |
//! | 4 | 2 | version (currently 1) |
//! | 6 | 4 | original size |
//! | 10 | 4 | compressed size |
//! | 14 | 1 | compression type (0 = RLE) |
//!
//! The body is `(run_length in 1..=255, byte)` pairs covering every input
//! byte exactly once. Decompression validates magic, version, and the
//! reconstructed length against the header.

use mtfs_error::{Result, StoreError};
use std::fs;
use std::path::Path;
use tracing::{debug, trace};

/// Frame magic, spells "MTFS" when read little-endian.
pub const MAGIC: u32 = 0x4D54_4653;
/// Current frame version.
pub const VERSION: u16 = 1;
/// Compression type byte for run-length encoding.
pub const TYPE_RLE: u8 = 0;
/// Total header size in bytes.
pub const HEADER_LEN: usize = 15;

const MAX_RUN: usize = 255;

// ── Raw RLE ─────────────────────────────────────────────────────────────────

fn rle_compress(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < data.len() {
        let byte = data[i];
        let mut run = 1;
        while i + run < data.len() && data[i + run] == byte && run < MAX_RUN {
            run += 1;
        }
        // run fits in u8: bounded by MAX_RUN above.
        out.push(run as u8);
        out.push(byte);
        i += run;
    }
    out
}

fn rle_decompress(body: &[u8]) -> Result<Vec<u8>> {
    if body.len() % 2 != 0 {
        return Err(StoreError::Protocol(
            "RLE body has a dangling half-pair".into(),
        ));
    }
    let mut out = Vec::new();
    for pair in body.chunks_exact(2) {
        let run = pair[0];
        if run == 0 {
            return Err(StoreError::Protocol("RLE run length of zero".into()));
        }
        out.extend(std::iter::repeat(pair[1]).take(run as usize));
    }
    Ok(out)
}

// ── Framed API ──────────────────────────────────────────────────────────────

fn read_le_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

fn read_le_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

/// Compress `data` into a framed buffer.
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let body = rle_compress(data);
    let original = u32::try_from(data.len())
        .map_err(|_| StoreError::Protocol("input exceeds frame size limit".into()))?;
    let compressed = u32::try_from(body.len())
        .map_err(|_| StoreError::Protocol("compressed body exceeds frame size limit".into()))?;

    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(&MAGIC.to_le_bytes());
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&original.to_le_bytes());
    out.extend_from_slice(&compressed.to_le_bytes());
    out.push(TYPE_RLE);
    out.extend_from_slice(&body);

    trace!(
        original = data.len(),
        framed = out.len(),
        "buffer compressed"
    );
    Ok(out)
}

/// Decompress a framed buffer back to the original bytes.
pub fn decompress(framed: &[u8]) -> Result<Vec<u8>> {
    if framed.len() < HEADER_LEN {
        return Err(StoreError::Protocol("frame shorter than header".into()));
    }
    let magic = read_le_u32(framed, 0);
    if magic != MAGIC {
        return Err(StoreError::Protocol(format!(
            "bad frame magic {magic:#010x}"
        )));
    }
    let version = read_le_u16(framed, 4);
    if version != VERSION {
        return Err(StoreError::Protocol(format!(
            "unsupported frame version {version}"
        )));
    }
    let original_size = read_le_u32(framed, 6) as usize;
    let kind = framed[14];
    if kind != TYPE_RLE {
        return Err(StoreError::Protocol(format!(
            "unsupported compression type {kind}"
        )));
    }

    let out = rle_decompress(&framed[HEADER_LEN..])?;
    if out.len() != original_size {
        return Err(StoreError::Protocol(format!(
            "decompressed size mismatch: header says {original_size}, got {}",
            out.len()
        )));
    }
    Ok(out)
}

/// Whether the file at `path` starts with the frame magic.
#[must_use]
pub fn is_compressed(path: impl AsRef<Path>) -> bool {
    let Ok(data) = fs::read(path.as_ref()) else {
        return false;
    };
    data.len() >= 4 && read_le_u32(&data, 0) == MAGIC
}

/// Compress `input` into `output` on the host filesystem.
pub fn compress_file(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Result<()> {
    let data = fs::read(input.as_ref())?;
    let framed = compress(&data)?;
    fs::write(output.as_ref(), &framed)?;
    debug!(
        input = %input.as_ref().display(),
        original = data.len(),
        framed = framed.len(),
        "file compressed"
    );
    Ok(())
}

/// Decompress `input` into `output` on the host filesystem.
pub fn decompress_file(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Result<()> {
    let framed = fs::read(input.as_ref())?;
    let data = decompress(&framed)?;
    fs::write(output.as_ref(), &data)?;
    debug!(input = %input.as_ref().display(), restored = data.len(), "file decompressed");
    Ok(())
}

/// Space saved as a percentage of the original size; zero for empty input.
#[must_use]
pub fn compression_ratio(original: usize, compressed: usize) -> f64 {
    if original == 0 {
        0.0
    } else {
        (1.0 - compressed as f64 / original as f64) * 100.0
    }
}

/// Running totals across compression operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompressionStats {
    pub files_compressed: u64,
    pub original_bytes: u64,
    pub compressed_bytes: u64,
}

impl CompressionStats {
    pub fn record(&mut self, original: usize, compressed: usize) {
        self.files_compressed += 1;
        self.original_bytes += original as u64;
        self.compressed_bytes += compressed as u64;
    }

    /// Overall space saved in percent across every recorded operation.
    #[must_use]
    pub fn overall_ratio(&self) -> f64 {
        if self.original_bytes == 0 {
            0.0
        } else {
            (1.0 - self.compressed_bytes as f64 / self.original_bytes as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_simple() {
        let input = b"aaabbbccccccd".to_vec();
        let framed = compress(&input).expect("compress");
        assert_eq!(decompress(&framed).expect("decompress"), input);
    }

    #[test]
    fn roundtrip_empty() {
        let framed = compress(b"").expect("compress");
        assert_eq!(framed.len(), HEADER_LEN);
        assert_eq!(decompress(&framed).expect("decompress"), Vec::<u8>::new());
    }

    #[test]
    fn roundtrip_incompressible() {
        let input: Vec<u8> = (0..=255).collect();
        let framed = compress(&input).expect("compress");
        // Every byte becomes a (1, byte) pair.
        assert_eq!(framed.len(), HEADER_LEN + 512);
        assert_eq!(decompress(&framed).expect("decompress"), input);
    }

    #[test]
    fn long_runs_split_at_255() {
        let input = vec![0x41_u8; 1000];
        let framed = compress(&input).expect("compress");
        // 1000 = 255 + 255 + 255 + 235 -> four pairs.
        assert_eq!(framed.len(), HEADER_LEN + 8);
        assert_eq!(decompress(&framed).expect("decompress"), input);
    }

    #[test]
    fn repeated_alphabet_pattern() {
        // 10000 bytes of the repeated pattern AAABBBCCC..ZZZ.
        let pattern: Vec<u8> = (b'A'..=b'Z').flat_map(|c| [c, c, c]).collect();
        let input: Vec<u8> = pattern.iter().copied().cycle().take(10000).collect();

        let framed = compress(&input).expect("compress");
        assert_eq!(read_le_u32(&framed, 0), MAGIC);
        assert_eq!(read_le_u16(&framed, 4), VERSION);
        assert_eq!(decompress(&framed).expect("decompress"), input);
        assert!(framed.len() < input.len());
    }

    #[test]
    fn header_fields_are_little_endian() {
        let framed = compress(b"zz").expect("compress");
        assert_eq!(&framed[..4], &[0x53, 0x46, 0x54, 0x4D]); // "SFTM" on disk
        assert_eq!(&framed[4..6], &[1, 0]);
        assert_eq!(read_le_u32(&framed, 6), 2); // original size
        assert_eq!(read_le_u32(&framed, 10), 2); // compressed size
        assert_eq!(framed[14], TYPE_RLE);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut framed = compress(b"data").expect("compress");
        framed[0] ^= 0xFF;
        assert!(matches!(
            decompress(&framed),
            Err(StoreError::Protocol(_))
        ));
    }

    #[test]
    fn bad_version_is_rejected() {
        let mut framed = compress(b"data").expect("compress");
        framed[4] = 9;
        assert!(matches!(
            decompress(&framed),
            Err(StoreError::Protocol(_))
        ));
    }

    #[test]
    fn truncated_frame_is_rejected() {
        assert!(matches!(
            decompress(&[0x53, 0x46]),
            Err(StoreError::Protocol(_))
        ));
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let mut framed = compress(b"aaaa").expect("compress");
        let wrong = 9_u32.to_le_bytes();
        framed[6..10].copy_from_slice(&wrong);
        assert!(matches!(
            decompress(&framed),
            Err(StoreError::Protocol(_))
        ));
    }

    #[test]
    fn file_roundtrip_and_detection() {
        let dir = tempfile::tempdir().expect("tempdir");
        let plain = dir.path().join("notes.txt");
        let packed = dir.path().join("notes.txt.mtfs");
        let restored = dir.path().join("notes.restored.txt");

        std::fs::write(&plain, b"wheeeeeee".repeat(100)).expect("write");
        assert!(!is_compressed(&plain));

        compress_file(&plain, &packed).expect("compress_file");
        assert!(is_compressed(&packed));

        decompress_file(&packed, &restored).expect("decompress_file");
        assert_eq!(
            std::fs::read(&plain).expect("read"),
            std::fs::read(&restored).expect("read")
        );
    }

    #[test]
    fn stats_accumulate() {
        let mut stats = CompressionStats::default();
        stats.record(1000, 100);
        stats.record(1000, 300);
        assert_eq!(stats.files_compressed, 2);
        assert!((stats.overall_ratio() - 80.0).abs() < 1e-9);
        assert_eq!(CompressionStats::default().overall_ratio(), 0.0);
    }

    #[test]
    fn ratio_helper() {
        assert!((compression_ratio(200, 50) - 75.0).abs() < 1e-9);
        assert_eq!(compression_ratio(0, 0), 0.0);
    }
}
