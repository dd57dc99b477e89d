use crate::common::stream;
use crate::common::{ByteStream, MemoryStream};
use thiserror::Error;

/// Size of the DOL header.
pub const DOL_HEADER_SIZE: u64 = 0x100;

const NUM_TEXT_SECTIONS: usize = 7;
const NUM_DATA_SECTIONS: usize = 11;

const TEXT_OFFSET_BASE: u64 = 0x00;
const DATA_OFFSET_BASE: u64 = 0x1c;
const TEXT_ADDRESS_BASE: u64 = 0x48;
const DATA_ADDRESS_BASE: u64 = 0x64;
const TEXT_SIZE_BASE: u64 = 0x90;
const DATA_SIZE_BASE: u64 = 0xac;
const BSS_ADDRESS_OFFSET: u64 = 0xd8;
const BSS_SIZE_OFFSET: u64 = 0xdc;
const ENTRY_POINT_OFFSET: u64 = 0xe0;

/// The result type for DOL operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for DOL operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("DOL section contents are not loaded")]
    NotLoaded,

    #[error("section at {offset:#x} (size {size:#x}) is outside the DOL (size {dol_size:#x})")]
    SectionOutOfBounds { offset: u32, size: u32, dol_size: u64 },

    #[error(transparent)]
    Stream(Box<stream::Error>),
}

from_error_boxed!(Error::Stream, stream::Error);

/// A text or data section in the main executable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DolSection {
    /// Offset of the section's contents relative to the start of the DOL.
    pub offset: u32,
    /// Address the section is loaded to at boot.
    pub load_address: u32,
    /// Size of the section's contents.
    pub size: u32,
    contents: Option<Vec<u8>>,
}

impl DolSection {
    fn parse(header: &impl ByteStream, index: usize, bases: (u64, u64, u64)) -> Result<Self> {
        let word = index as u64 * 4;
        Ok(Self {
            offset: header.get_u32_be(bases.0 + word)?,
            load_address: header.get_u32_be(bases.1 + word)?,
            size: header.get_u32_be(bases.2 + word)?,
            contents: None,
        })
    }

    /// Returns the section's contents, if they have been loaded.
    pub fn contents(&self) -> Option<&[u8]> {
        self.contents.as_deref()
    }
}

/// The main executable (`main.dol`): up to 7 text and 11 data sections with a
/// section table in the first 0x100 bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dol {
    pub text_sections: [DolSection; NUM_TEXT_SECTIONS],
    pub data_sections: [DolSection; NUM_DATA_SECTIONS],
    pub bss_address: u32,
    pub bss_size: u32,
    pub entry_point: u32,
}

impl Dol {
    /// Parses the section table from the first 0x100 bytes of a DOL.
    /// Section contents must be attached with `load_contents()` before the
    /// executable can be re-emitted.
    pub fn parse(header: &impl ByteStream) -> Result<Self> {
        let mut dol = Self {
            bss_address: header.get_u32_be(BSS_ADDRESS_OFFSET)?,
            bss_size: header.get_u32_be(BSS_SIZE_OFFSET)?,
            entry_point: header.get_u32_be(ENTRY_POINT_OFFSET)?,
            ..Self::default()
        };
        for (i, section) in dol.text_sections.iter_mut().enumerate() {
            *section =
                DolSection::parse(header, i, (TEXT_OFFSET_BASE, TEXT_ADDRESS_BASE, TEXT_SIZE_BASE))?;
        }
        for (i, section) in dol.data_sections.iter_mut().enumerate() {
            *section =
                DolSection::parse(header, i, (DATA_OFFSET_BASE, DATA_ADDRESS_BASE, DATA_SIZE_BASE))?;
        }
        Ok(dol)
    }

    fn sections(&self) -> impl Iterator<Item = &DolSection> {
        self.text_sections.iter().chain(&self.data_sections)
    }

    /// Calculates the total size of the executable: the header plus every section's contents.
    pub fn total_size(&self) -> u64 {
        DOL_HEADER_SIZE + self.sections().map(|s| s.size as u64).sum::<u64>()
    }

    /// Attaches section contents read from `payload`, a stream holding the entire DOL.
    pub fn load_contents(&mut self, payload: &impl ByteStream) -> Result<()> {
        for section in self.text_sections.iter_mut().chain(&mut self.data_sections) {
            section.contents = if section.size > 0 {
                Some(payload.get(section.offset as u64, section.size as u64)?.to_vec())
            } else {
                Some(Vec::new())
            };
        }
        Ok(())
    }

    /// Returns true if every section's contents have been loaded.
    pub fn contents_loaded(&self) -> bool {
        self.sections().all(|s| s.contents.is_some())
    }

    /// Serialises the executable. Re-emitting a parsed DOL whose sections were
    /// loaded reproduces the original byte sequence.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        if !self.contents_loaded() {
            return Err(Error::NotLoaded);
        }
        let total = self.total_size();
        let mut out = MemoryStream::with_size(total);
        for (i, section) in self.text_sections.iter().enumerate() {
            Self::write_section(&mut out, section, i, (TEXT_OFFSET_BASE, TEXT_ADDRESS_BASE, TEXT_SIZE_BASE), total)?;
        }
        for (i, section) in self.data_sections.iter().enumerate() {
            Self::write_section(&mut out, section, i, (DATA_OFFSET_BASE, DATA_ADDRESS_BASE, DATA_SIZE_BASE), total)?;
        }
        out.put_u32_be(BSS_ADDRESS_OFFSET, self.bss_address)?;
        out.put_u32_be(BSS_SIZE_OFFSET, self.bss_size)?;
        out.put_u32_be(ENTRY_POINT_OFFSET, self.entry_point)?;
        Ok(out.into_vec())
    }

    fn write_section(
        out: &mut MemoryStream,
        section: &DolSection,
        index: usize,
        bases: (u64, u64, u64),
        total: u64,
    ) -> Result<()> {
        let word = index as u64 * 4;
        out.put_u32_be(bases.0 + word, section.offset)?;
        out.put_u32_be(bases.1 + word, section.load_address)?;
        out.put_u32_be(bases.2 + word, section.size)?;
        if section.size > 0 {
            if section.offset as u64 + section.size as u64 > total {
                return Err(Error::SectionOutOfBounds {
                    offset: section.offset,
                    size: section.size,
                    dol_size: total,
                });
            }
            let contents = section.contents.as_ref().ok_or(Error::NotLoaded)?;
            out.put(section.offset as u64, contents)?;
        }
        Ok(())
    }
}
