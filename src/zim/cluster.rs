//! Cluster decoding
//!
//! A cluster is a (possibly compressed) group of blobs. The first byte holds
//! the compression type in its low nibble and the "extended" flag (64-bit
//! blob offsets) in bit 4.

use std::io::Read;

use bzip2::read::BzDecoder;
use xz2::read::XzDecoder;

use super::error::ContainerError;

const EXTENDED_FLAG: u8 = 0x10;

/// Cluster compression schemes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Bzip2,
    Xz,
    Zstd,
}

impl Compression {
    pub fn from_info(info: u8) -> Result<Self, ContainerError> {
        match info & 0x0F {
            0 | 1 => Ok(Compression::None),
            3 => Ok(Compression::Bzip2),
            4 => Ok(Compression::Xz),
            5 => Ok(Compression::Zstd),
            other => Err(ContainerError::UnsupportedCompression(other)),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Compression::None => 1,
            Compression::Bzip2 => 3,
            Compression::Xz => 4,
            Compression::Zstd => 5,
        }
    }
}

/// A decompressed cluster with its blob offset table
#[derive(Debug)]
pub struct Cluster {
    data: Vec<u8>,
    offsets: Vec<u64>,
}

impl Cluster {
    /// Decode a raw cluster (info byte included).
    pub fn decode(number: u32, raw: &[u8]) -> Result<Self, ContainerError> {
        let (&info, body) = raw
            .split_first()
            .ok_or_else(|| ContainerError::cluster(number, "empty cluster"))?;
        let compression = Compression::from_info(info)?;
        let extended = info & EXTENDED_FLAG != 0;

        let data = match compression {
            Compression::None => body.to_vec(),
            Compression::Zstd => zstd::stream::decode_all(body)
                .map_err(|e| ContainerError::cluster(number, format!("zstd: {}", e)))?,
            Compression::Xz => {
                let mut out = Vec::new();
                XzDecoder::new(body)
                    .read_to_end(&mut out)
                    .map_err(|e| ContainerError::cluster(number, format!("xz: {}", e)))?;
                out
            }
            Compression::Bzip2 => {
                let mut out = Vec::new();
                BzDecoder::new(body)
                    .read_to_end(&mut out)
                    .map_err(|e| ContainerError::cluster(number, format!("bzip2: {}", e)))?;
                out
            }
        };

        let offsets = read_offsets(number, &data, extended)?;
        Ok(Self { data, offsets })
    }

    /// Number of blobs in this cluster.
    pub fn blob_count(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    /// Borrow blob `blob`.
    pub fn blob(&self, blob: u32) -> Option<&[u8]> {
        let i = blob as usize;
        let start = *self.offsets.get(i)? as usize;
        let end = *self.offsets.get(i + 1)? as usize;
        self.data.get(start..end)
    }

    /// Encode blobs into a raw cluster (used by the fixture builder).
    #[cfg(any(test, feature = "test-util"))]
    pub fn encode(blobs: &[Vec<u8>], compression: Compression) -> std::io::Result<Vec<u8>> {
        let table_len = (blobs.len() + 1) * 4;
        let mut plain = Vec::with_capacity(table_len + blobs.iter().map(Vec::len).sum::<usize>());

        let mut offset = table_len as u32;
        plain.extend_from_slice(&offset.to_le_bytes());
        for blob in blobs {
            offset += blob.len() as u32;
            plain.extend_from_slice(&offset.to_le_bytes());
        }
        for blob in blobs {
            plain.extend_from_slice(blob);
        }

        let mut out = vec![compression.code()];
        match compression {
            Compression::None => out.extend_from_slice(&plain),
            Compression::Zstd => out.extend_from_slice(&zstd::stream::encode_all(&plain[..], 3)?),
            Compression::Xz => {
                let mut encoder = xz2::read::XzEncoder::new(&plain[..], 6);
                encoder.read_to_end(&mut out)?;
            }
            Compression::Bzip2 => {
                let mut encoder =
                    bzip2::read::BzEncoder::new(&plain[..], bzip2::Compression::default());
                encoder.read_to_end(&mut out)?;
            }
        }
        Ok(out)
    }
}

fn read_offsets(number: u32, data: &[u8], extended: bool) -> Result<Vec<u64>, ContainerError> {
    let width = if extended { 8 } else { 4 };
    let read = |i: usize| -> Option<u64> {
        let bytes = data.get(i * width..(i + 1) * width)?;
        Some(if extended {
            let mut b = [0u8; 8];
            b.copy_from_slice(bytes);
            u64::from_le_bytes(b)
        } else {
            let mut b = [0u8; 4];
            b.copy_from_slice(bytes);
            u64::from(u32::from_le_bytes(b))
        })
    };

    let first = read(0).ok_or_else(|| ContainerError::cluster(number, "missing offset table"))?;
    if first == 0 || first % width as u64 != 0 || first > data.len() as u64 {
        return Err(ContainerError::cluster(
            number,
            format!("invalid first blob offset {}", first),
        ));
    }

    let count = (first / width as u64) as usize;
    let mut offsets = Vec::with_capacity(count);
    let mut previous = 0u64;
    for i in 0..count {
        let offset = read(i).ok_or_else(|| ContainerError::cluster(number, "offset table truncated"))?;
        if offset < previous || offset > data.len() as u64 {
            return Err(ContainerError::cluster(
                number,
                format!("blob offset {} out of order or past end", offset),
            ));
        }
        offsets.push(offset);
        previous = offset;
    }

    Ok(offsets)
}
