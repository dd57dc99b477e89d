use crate::common::stream;
use crate::common::{ByteStream, MemoryStream};
use encoding_rs::mem;
use std::ffi::{CStr, CString};
use thiserror::Error;

/// Size of the disc header (`boot.bin`).
pub const DISC_HEADER_SIZE: u64 = 0x440;
/// Size of the header information block (`bi2.bin`).
pub const HEADER_INFO_SIZE: u64 = 0x2000;
/// Disc offset where the apploader begins.
pub const APPLOADER_OFFSET: u64 = 0x2440;

const GAME_CODE_OFFSET: u64 = 0x01;
const COUNTRY_CODE_OFFSET: u64 = 0x03;
const MAKER_CODE_OFFSET: u64 = 0x04;
const DISC_ID_OFFSET: u64 = 0x06;
const VERSION_OFFSET: u64 = 0x07;
const GAME_NAME_OFFSET: u64 = 0x20;
const DOL_OFFSET_OFFSET: u64 = 0x420;
const FST_OFFSET_OFFSET: u64 = 0x424;
const FST_SIZE_OFFSET: u64 = 0x428;
const FST_MAX_SIZE_OFFSET: u64 = 0x42c;

/// The result type for system record operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for system record operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("disc header is {0:#x} bytes, expected 0x440")]
    TruncatedHeader(u64),

    #[error("header information block is {0:#x} bytes, expected 0x2000")]
    TruncatedInfo(u64),

    #[error("DOL offset {0:#x} is inside the system header region")]
    BadDolOffset(u32),

    #[error("FST offset {0:#x} is inside the system header region")]
    BadFstOffset(u32),

    #[error(transparent)]
    Stream(Box<stream::Error>),
}

from_error_boxed!(Error::Stream, stream::Error);

/// The disc header (`boot.bin`): typed accessors over the raw 0x440-byte block.
/// Unparsed bytes are preserved verbatim on re-emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscHeader {
    raw: MemoryStream,
    game_code: [u8; 2],
    country_code: u8,
    maker_code: [u8; 2],
    disc_id: u8,
    version: u8,
    game_name: CString,
    dol_offset: u32,
    fst_offset: u32,
    fst_size: u32,
    fst_max_size: u32,
}

impl DiscHeader {
    /// Parses a disc header from its raw 0x440-byte block.
    pub fn parse(raw: MemoryStream) -> Result<Self> {
        if raw.size() != DISC_HEADER_SIZE {
            return Err(Error::TruncatedHeader(raw.size()));
        }
        let game_code = [raw.get_u8(GAME_CODE_OFFSET)?, raw.get_u8(GAME_CODE_OFFSET + 1)?];
        let country_code = raw.get_u8(COUNTRY_CODE_OFFSET)?;
        let maker_code = [raw.get_u8(MAKER_CODE_OFFSET)?, raw.get_u8(MAKER_CODE_OFFSET + 1)?];
        let disc_id = raw.get_u8(DISC_ID_OFFSET)?;
        let version = raw.get_u8(VERSION_OFFSET)?;
        let game_name = raw.get_cstring(GAME_NAME_OFFSET)?;
        let dol_offset = raw.get_u32_be(DOL_OFFSET_OFFSET)?;
        let fst_offset = raw.get_u32_be(FST_OFFSET_OFFSET)?;
        let fst_size = raw.get_u32_be(FST_SIZE_OFFSET)?;
        let fst_max_size = raw.get_u32_be(FST_MAX_SIZE_OFFSET)?;
        if (dol_offset as u64) < APPLOADER_OFFSET {
            return Err(Error::BadDolOffset(dol_offset));
        }
        if (fst_offset as u64) < APPLOADER_OFFSET {
            return Err(Error::BadFstOffset(fst_offset));
        }
        Ok(Self {
            raw,
            game_code,
            country_code,
            maker_code,
            disc_id,
            version,
            game_name,
            dol_offset,
            fst_offset,
            fst_size,
            fst_max_size,
        })
    }

    pub fn game_code(&self) -> [u8; 2] {
        self.game_code
    }

    pub fn country_code(&self) -> u8 {
        self.country_code
    }

    pub fn maker_code(&self) -> [u8; 2] {
        self.maker_code
    }

    pub fn disc_id(&self) -> u8 {
        self.disc_id
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn game_name(&self) -> &CStr {
        &self.game_name
    }

    /// Returns the six-character game ID from the start of the header (e.g. "GGTE01").
    pub fn game_id(&self) -> String {
        mem::decode_latin1(self.raw.as_bytes().get(..6).unwrap_or_default()).into_owned()
    }

    pub fn dol_offset(&self) -> u32 {
        self.dol_offset
    }

    pub fn fst_offset(&self) -> u32 {
        self.fst_offset
    }

    pub fn fst_size(&self) -> u32 {
        self.fst_size
    }

    pub fn fst_max_size(&self) -> u32 {
        self.fst_max_size
    }

    /// Updates the FST size field, keeping the raw block in sync.
    pub fn set_fst_size(&mut self, size: u32) -> Result<()> {
        self.raw.put_u32_be(FST_SIZE_OFFSET, size)?;
        self.fst_size = size;
        Ok(())
    }

    /// Returns the raw 0x440-byte header block.
    pub fn bytes(&self) -> &[u8] {
        self.raw.as_bytes()
    }
}

/// The header information block (`bi2.bin`). Opaque; preserved verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderInformation {
    raw: MemoryStream,
}

impl HeaderInformation {
    pub fn parse(raw: MemoryStream) -> Result<Self> {
        if raw.size() != HEADER_INFO_SIZE {
            return Err(Error::TruncatedInfo(raw.size()));
        }
        Ok(Self { raw })
    }

    pub fn bytes(&self) -> &[u8] {
        self.raw.as_bytes()
    }
}

/// The apploader blob between the header information block and the main executable.
/// Opaque; preserved verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Apploader {
    raw: MemoryStream,
}

impl Apploader {
    pub fn new(raw: MemoryStream) -> Self {
        Self { raw }
    }

    pub fn size(&self) -> u64 {
        self.raw.size()
    }

    pub fn bytes(&self) -> &[u8] {
        self.raw.as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_header_bytes() -> Vec<u8> {
        let mut stream = MemoryStream::with_size(DISC_HEADER_SIZE);
        stream.put(0, b"GTSTE8").unwrap();
        stream.put_u8(DISC_ID_OFFSET, 0).unwrap();
        stream.put_u8(VERSION_OFFSET, 1).unwrap();
        stream.put_cstring(GAME_NAME_OFFSET, &CString::new("Test Game").unwrap()).unwrap();
        stream.put_u32_be(DOL_OFFSET_OFFSET, 0x2600).unwrap();
        stream.put_u32_be(FST_OFFSET_OFFSET, 0x2800).unwrap();
        stream.put_u32_be(FST_SIZE_OFFSET, 0x100).unwrap();
        stream.put_u32_be(FST_MAX_SIZE_OFFSET, 0x1000).unwrap();
        stream.into_vec()
    }

    #[test]
    fn test_parse() -> Result<()> {
        let bytes = test_header_bytes();
        let header = DiscHeader::parse(MemoryStream::from(bytes.clone()))?;
        assert_eq!(header.game_code(), [b'T', b'S']);
        assert_eq!(header.country_code(), b'T');
        assert_eq!(header.maker_code(), [b'E', b'8']);
        assert_eq!(header.disc_id(), 0);
        assert_eq!(header.version(), 1);
        assert_eq!(header.game_name().to_bytes(), b"Test Game");
        assert_eq!(header.game_id(), "GTSTE8");
        assert_eq!(header.dol_offset(), 0x2600);
        assert_eq!(header.fst_offset(), 0x2800);
        assert_eq!(header.fst_size(), 0x100);
        assert_eq!(header.fst_max_size(), 0x1000);
        assert_eq!(header.bytes(), bytes);
        Ok(())
    }

    #[test]
    fn test_parse_truncated() {
        assert!(DiscHeader::parse(MemoryStream::with_size(0x43f)).is_err());
    }

    #[test]
    fn test_parse_bad_offsets() {
        let mut bytes = test_header_bytes();
        bytes[DOL_OFFSET_OFFSET as usize..DOL_OFFSET_OFFSET as usize + 4]
            .copy_from_slice(&0x2000u32.to_be_bytes());
        assert!(DiscHeader::parse(MemoryStream::from(bytes)).is_err());
    }

    #[test]
    fn test_set_fst_size() -> Result<()> {
        let mut header = DiscHeader::parse(MemoryStream::from(test_header_bytes()))?;
        header.set_fst_size(0x180)?;
        assert_eq!(header.fst_size(), 0x180);
        let reparsed = DiscHeader::parse(MemoryStream::from(header.bytes()))?;
        assert_eq!(reparsed.fst_size(), 0x180);
        Ok(())
    }
}
