//! Fixed-size container header and MIME type list

use super::error::ContainerError;

/// Magic number at offset 0 of every ZIM file ("ZIM\x04").
pub const ZIM_MAGIC: u32 = 0x044D_495A;

/// Size of the on-disk header in bytes.
pub const HEADER_LEN: usize = 80;

/// Main page sentinel meaning "no main page".
pub const NO_MAIN_PAGE: u32 = u32::MAX;

/// Parsed container header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub major_version: u16,
    pub minor_version: u16,
    pub uuid: [u8; 16],
    pub entry_count: u32,
    pub cluster_count: u32,
    pub url_ptr_pos: u64,
    pub title_ptr_pos: u64,
    pub cluster_ptr_pos: u64,
    pub mime_list_pos: u64,
    pub main_page: u32,
    pub layout_page: u32,
    pub checksum_pos: u64,
}

impl Header {
    /// Parse and sanity-check a header against the file length.
    pub fn parse(buf: &[u8], file_len: u64) -> Result<Self, ContainerError> {
        if buf.len() < HEADER_LEN || file_len < HEADER_LEN as u64 {
            return Err(ContainerError::Truncated(format!(
                "file is {} bytes, header needs {}",
                file_len, HEADER_LEN
            )));
        }

        let mut r = ByteReader::new(buf);
        let magic = r.u32();
        if magic != ZIM_MAGIC {
            return Err(ContainerError::BadHeader(format!(
                "magic number {:#010x} is not a ZIM file",
                magic
            )));
        }

        let major_version = r.u16();
        let minor_version = r.u16();
        if !(5..=6).contains(&major_version) {
            return Err(ContainerError::UnsupportedVersion {
                major: major_version,
                minor: minor_version,
            });
        }

        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(r.take(16));

        let header = Header {
            major_version,
            minor_version,
            uuid,
            entry_count: r.u32(),
            cluster_count: r.u32(),
            url_ptr_pos: r.u64(),
            title_ptr_pos: r.u64(),
            cluster_ptr_pos: r.u64(),
            mime_list_pos: r.u64(),
            main_page: r.u32(),
            layout_page: r.u32(),
            checksum_pos: r.u64(),
        };

        header.check_bounds(file_len)?;
        Ok(header)
    }

    /// Verify that every pointer table fits inside the file.
    fn check_bounds(&self, file_len: u64) -> Result<(), ContainerError> {
        let tables = [
            ("url pointer list", self.url_ptr_pos, u64::from(self.entry_count) * 8),
            ("cluster pointer list", self.cluster_ptr_pos, u64::from(self.cluster_count) * 8),
            ("mime list", self.mime_list_pos, 1),
        ];

        for (name, pos, len) in tables {
            let end = pos.checked_add(len).ok_or_else(|| {
                ContainerError::BadHeader(format!("{} position overflows", name))
            })?;
            if end > file_len {
                return Err(ContainerError::Truncated(format!(
                    "{} ends at {} but file is {} bytes",
                    name, end, file_len
                )));
            }
        }

        if self.checksum_pos > file_len {
            return Err(ContainerError::Truncated(format!(
                "checksum position {} beyond end of file ({} bytes)",
                self.checksum_pos, file_len
            )));
        }

        Ok(())
    }

    /// Serialize the header (used by the fixture builder).
    #[cfg(any(test, feature = "test-util"))]
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = Vec::with_capacity(HEADER_LEN);
        out.extend_from_slice(&ZIM_MAGIC.to_le_bytes());
        out.extend_from_slice(&self.major_version.to_le_bytes());
        out.extend_from_slice(&self.minor_version.to_le_bytes());
        out.extend_from_slice(&self.uuid);
        out.extend_from_slice(&self.entry_count.to_le_bytes());
        out.extend_from_slice(&self.cluster_count.to_le_bytes());
        out.extend_from_slice(&self.url_ptr_pos.to_le_bytes());
        out.extend_from_slice(&self.title_ptr_pos.to_le_bytes());
        out.extend_from_slice(&self.cluster_ptr_pos.to_le_bytes());
        out.extend_from_slice(&self.mime_list_pos.to_le_bytes());
        out.extend_from_slice(&self.main_page.to_le_bytes());
        out.extend_from_slice(&self.layout_page.to_le_bytes());
        out.extend_from_slice(&self.checksum_pos.to_le_bytes());

        let mut buf = [0u8; HEADER_LEN];
        buf.copy_from_slice(&out);
        buf
    }

    /// Whether the container uses the single `C` content namespace (6.1+).
    pub fn uses_content_namespace(&self) -> bool {
        self.major_version >= 6 && self.minor_version >= 1
    }
}

/// Parse the MIME type list: NUL-terminated strings ending with an empty one.
pub fn parse_mime_list(buf: &[u8]) -> Result<Vec<String>, ContainerError> {
    let mut types = Vec::new();
    let mut rest = buf;

    loop {
        let Some(end) = rest.iter().position(|&b| b == 0) else {
            return Err(ContainerError::BadHeader(
                "mime list is not terminated".to_string(),
            ));
        };
        if end == 0 {
            return Ok(types);
        }
        let mime = std::str::from_utf8(&rest[..end])
            .map_err(|e| ContainerError::BadHeader(format!("mime list is not UTF-8: {}", e)))?;
        types.push(mime.to_string());
        rest = &rest[end + 1..];
    }
}

/// Little-endian cursor over a byte slice that is known to be long enough.
pub(crate) struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub(crate) fn take(&mut self, n: usize) -> &'a [u8] {
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        slice
    }

    pub(crate) fn u8(&mut self) -> u8 {
        self.take(1)[0]
    }

    pub(crate) fn u16(&mut self) -> u16 {
        let mut b = [0u8; 2];
        b.copy_from_slice(self.take(2));
        u16::from_le_bytes(b)
    }

    pub(crate) fn u32(&mut self) -> u32 {
        let mut b = [0u8; 4];
        b.copy_from_slice(self.take(4));
        u32::from_le_bytes(b)
    }

    pub(crate) fn u64(&mut self) -> u64 {
        let mut b = [0u8; 8];
        b.copy_from_slice(self.take(8));
        u64::from_le_bytes(b)
    }

    /// Read a NUL-terminated string, returning `None` if no terminator remains.
    pub(crate) fn cstr(&mut self) -> Option<&'a [u8]> {
        let rest = &self.buf[self.pos..];
        let end = rest.iter().position(|&b| b == 0)?;
        self.pos += end + 1;
        Some(&rest[..end])
    }
}
