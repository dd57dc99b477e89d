use super::{DISC_ALIGN, GC_DISC_MAX_SIZE};
use crate::common::stream;
use crate::common::{align_padding, ByteStream, MemoryStream};
use encoding_rs::SHIFT_JIS;
use std::ffi::CString;
use std::fmt;
use thiserror::Error;
use tracing::{debug, trace};

/// Size of a serialised FST entry.
pub const FST_ENTRY_SIZE: u64 = 12;

const ENTRY_COUNT_OFFSET: u64 = 8;
const NAME_OFFSET_MASK: u32 = 0x00ff_ffff;

/// The result type for FST operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for FST operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("FST is too small for its {0} entries")]
    TruncatedEntryTable(u32),

    #[error("root entry is not a directory")]
    RootIsNotDirectory,

    #[error("directory {index} has invalid next index {next}")]
    InvalidNextIndex { index: u32, next: u32 },

    #[error("directory {index} has invalid parent index {parent}")]
    InvalidParentIndex { index: u32, parent: u32 },

    #[error("entry {index} has name offset {offset:#x} outside the string table")]
    InvalidNameOffset { index: u32, offset: u32 },

    #[error("name at string table offset {0:#x} is not valid SHIFT-JIS")]
    UndecodableName(u32),

    #[error("name {0:?} has no SHIFT-JIS representation")]
    UnencodableName(String),

    #[error("name {0:?} is reserved or contains separator characters")]
    BadName(String),

    #[error("file {0:?} was not found")]
    FileNotFound(String),

    #[error("directory {0:?} was not found")]
    DirectoryNotFound(String),

    #[error("entry {0} is not a file")]
    ExpectedFile(u32),

    #[error("entry {0} is not a directory")]
    ExpectedDirectory(u32),

    #[error("{name:?} already exists in directory {dir:?}")]
    DuplicateName { name: String, dir: String },

    #[error("no space in the image for {0:#x} bytes")]
    NoSpace(u32),

    #[error("entry table is full")]
    TooManyEntries,

    #[error("string table is full")]
    StringTableFull,

    #[error(transparent)]
    Stream(Box<stream::Error>),
}

from_error_boxed!(Error::Stream, stream::Error);

/// Rejects entry names the host side could misinterpret when a file is written
/// out: empty names, the relative components "." and "..", and names carrying
/// separator or NUL bytes.
fn check_name(name: &str) -> Result<()> {
    let reserved = matches!(name, "" | "." | "..");
    if reserved || name.bytes().any(|b| matches!(b, b'/' | b'\\' | b':' | b'\0')) {
        return Err(Error::BadName(name.to_owned()));
    }
    Ok(())
}

fn name_from_bytes(raw: &[u8], offset: u32) -> Result<String> {
    match SHIFT_JIS.decode_without_bom_handling_and_without_replacement(raw) {
        Some(name) => {
            check_name(&name)?;
            Ok(name.into_owned())
        }
        None => Err(Error::UndecodableName(offset)),
    }
}

fn name_to_bytes(name: &str) -> Result<Vec<u8>> {
    check_name(name)?;
    let (encoded, _, had_unmappable) = SHIFT_JIS.encode(name);
    if had_unmappable {
        return Err(Error::UnencodableName(name.to_owned()));
    }
    Ok(encoded.into_owned())
}

/// A contiguous byte range on the disc.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct DiscRegion {
    pub offset: u32,
    pub size: u32,
}

impl DiscRegion {
    pub fn new(offset: u32, size: u32) -> Self {
        Self { offset, size }
    }

    /// Returns the offset one past the end of the region.
    pub fn end(&self) -> u32 {
        self.offset + self.size
    }
}

impl fmt::Debug for DiscRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:#x}, {:#x})", self.offset, self.size)
    }
}

/// Fields of a file entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FileData {
    /// The offset of the file's data in the image.
    pub offset: u32,
    /// The size of the file's data.
    pub size: u32,
    /// Where the file's unmodified contents live in the source image, if anywhere.
    pub origin: Option<DiscRegion>,
}

impl FileData {
    /// Returns the offset one past the end of the file's data.
    pub fn end(&self) -> u32 {
        self.offset + self.size
    }
}

/// Fields of a directory entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DirData {
    /// Index of the parent directory.
    pub parent: u32,
    /// Index one past the directory's last descendant.
    pub next: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    File(FileData),
    Directory(DirData),
}

/// An entry in the file system table. Entries are stored in pre-order; an
/// entry's index in the table is its FST index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The entry's name. The root directory has no name.
    pub name: String,
    name_offset: u32,
    pub kind: EntryKind,
}

impl Entry {
    /// Returns the offset of the entry's name in the string table.
    pub fn name_offset(&self) -> u32 {
        self.name_offset
    }

    pub fn as_file(&self) -> Option<&FileData> {
        match &self.kind {
            EntryKind::File(f) => Some(f),
            EntryKind::Directory(_) => None,
        }
    }

    pub fn as_file_mut(&mut self) -> Option<&mut FileData> {
        match &mut self.kind {
            EntryKind::File(f) => Some(f),
            EntryKind::Directory(_) => None,
        }
    }

    pub fn as_dir(&self) -> Option<&DirData> {
        match &self.kind {
            EntryKind::Directory(d) => Some(d),
            EntryKind::File(_) => None,
        }
    }

    pub fn is_file(&self) -> bool {
        self.as_file().is_some()
    }

    pub fn is_dir(&self) -> bool {
        self.as_dir().is_some()
    }
}

/// The file system table: a pre-order entry array plus the logical length of the
/// trailing string table. Mutations keep entry indices, directory spans, and
/// name offsets consistent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fst {
    entries: Vec<Entry>,
    string_table_len: u32,
}

impl Fst {
    /// Constructs an `Fst` holding only an empty root directory.
    pub fn new() -> Self {
        let root = Entry {
            name: String::new(),
            name_offset: 0,
            kind: EntryKind::Directory(DirData { parent: 0, next: 1 }),
        };
        Self { entries: vec![root], string_table_len: 0 }
    }

    /// Parses an FST from the raw `fst.bin` contents.
    pub fn parse(stream: &impl ByteStream) -> Result<Self> {
        let size = stream.size();
        if size < FST_ENTRY_SIZE {
            return Err(Error::TruncatedEntryTable(0));
        }
        let count = stream.get_u32_be(ENTRY_COUNT_OFFSET)?;
        let table_len = count as u64 * FST_ENTRY_SIZE;
        if count == 0 || table_len > size {
            return Err(Error::TruncatedEntryTable(count));
        }
        let string_table_len = (size - table_len) as u32;

        let mut entries = Vec::with_capacity(count as usize);
        for index in 0..count {
            let base = index as u64 * FST_ENTRY_SIZE;
            let word0 = stream.get_u32_be(base)?;
            let word1 = stream.get_u32_be(base + 4)?;
            let word2 = stream.get_u32_be(base + 8)?;
            let is_dir = (word0 >> 24) != 0;
            let name_offset = word0 & NAME_OFFSET_MASK;

            if index == 0 && !is_dir {
                return Err(Error::RootIsNotDirectory);
            }
            let name = if index == 0 {
                String::new()
            } else {
                if name_offset >= string_table_len {
                    return Err(Error::InvalidNameOffset { index, offset: name_offset });
                }
                let raw = stream.get_cstring(table_len + name_offset as u64)?;
                name_from_bytes(raw.as_bytes(), name_offset)?
            };

            let kind = if is_dir {
                if word2 <= index || word2 > count {
                    return Err(Error::InvalidNextIndex { index, next: word2 });
                }
                if index > 0 && word1 >= index {
                    return Err(Error::InvalidParentIndex { index, parent: word1 });
                }
                EntryKind::Directory(DirData { parent: word1, next: word2 })
            } else {
                EntryKind::File(FileData {
                    offset: word1,
                    size: word2,
                    origin: Some(DiscRegion::new(word1, word2)),
                })
            };
            entries.push(Entry { name, name_offset, kind });
        }
        debug!("Read {} FST entries", count);
        Ok(Self { entries, string_table_len })
    }

    /// Returns the number of entries in the table.
    pub fn entry_count(&self) -> u32 {
        self.entries.len() as u32
    }

    /// Returns the entry at `index`. ***Panics*** if the index is invalid.
    pub fn entry(&self, index: u32) -> &Entry {
        &self.entries[index as usize]
    }

    /// Returns the logical length of the string table.
    pub fn string_table_len(&self) -> u32 {
        self.string_table_len
    }

    /// Returns the number of bytes the FST will occupy when serialised.
    pub fn disk_size(&self) -> u32 {
        (self.entries.len() as u64 * FST_ENTRY_SIZE) as u32 + self.string_table_len
    }

    /// Returns the file entry at `index`.
    pub fn file(&self, index: u32) -> Result<&FileData> {
        self.entries
            .get(index as usize)
            .and_then(Entry::as_file)
            .ok_or(Error::ExpectedFile(index))
    }

    pub(crate) fn file_mut(&mut self, index: u32) -> Result<&mut FileData> {
        self.entries
            .get_mut(index as usize)
            .and_then(Entry::as_file_mut)
            .ok_or(Error::ExpectedFile(index))
    }

    /// Finds the first file named `name` in pre-order (depth-first) order.
    pub fn find_file(&self, name: &str) -> Result<u32> {
        self.entries
            .iter()
            .position(|e| e.is_file() && e.name == name)
            .map(|i| i as u32)
            .ok_or_else(|| Error::FileNotFound(name.to_owned()))
    }

    /// Finds the first directory named `name` in pre-order (depth-first) order.
    pub fn find_directory(&self, name: &str) -> Result<u32> {
        self.entries
            .iter()
            .skip(1)
            .position(|e| e.is_dir() && e.name == name)
            .map(|i| i as u32 + 1)
            .ok_or_else(|| Error::DirectoryNotFound(name.to_owned()))
    }

    /// Returns the indices of all file entries in pre-order.
    pub fn file_indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_file())
            .map(|(i, _)| i as u32)
    }

    /// Returns the names of all files in pre-order.
    pub fn list_files(&self) -> Vec<&str> {
        self.entries.iter().filter(|e| e.is_file()).map(|e| e.name.as_str()).collect()
    }

    /// Returns the names of all files and directories in pre-order, omitting the root.
    pub fn list_all(&self) -> Vec<&str> {
        self.entries.iter().skip(1).map(|e| e.name.as_str()).collect()
    }

    /// Returns the indices of a directory's immediate children, in order.
    pub fn children(&self, dir: u32) -> Result<Vec<u32>> {
        let data = self.entries[dir as usize].as_dir().ok_or(Error::ExpectedDirectory(dir))?;
        let mut children = Vec::new();
        let mut index = dir + 1;
        while index < data.next {
            children.push(index);
            index = match &self.entries[index as usize].kind {
                EntryKind::Directory(d) => d.next,
                EntryKind::File(_) => index + 1,
            };
        }
        Ok(children)
    }

    /// File entry indices sorted by ascending data offset.
    fn files_by_offset(&self) -> Vec<u32> {
        let mut indices: Vec<u32> = self.file_indices().collect();
        indices.sort_by_key(|&i| self.entries[i as usize].as_file().unwrap().offset);
        indices
    }

    /// Chooses a data offset for a new file of `size` bytes. Placement prefers the
    /// aligned end of the highest existing file range and falls back to the first
    /// interior gap large enough; `data_start` is used when there are no files yet.
    fn place(&self, size: u32, data_start: u32) -> Result<u32> {
        let files = self.files_by_offset();
        let regions: Vec<DiscRegion> = files
            .iter()
            .map(|&i| {
                let f = self.entries[i as usize].as_file().unwrap();
                DiscRegion::new(f.offset, f.size)
            })
            .collect();

        let Some(last) = regions.last() else {
            return if data_start as u64 + size as u64 <= GC_DISC_MAX_SIZE {
                Ok(data_start)
            } else {
                Err(Error::NoSpace(size))
            };
        };

        let end = last.end() as u64;
        let aligned_end = end + align_padding(end, DISC_ALIGN);
        if aligned_end + size as u64 <= GC_DISC_MAX_SIZE {
            return Ok(aligned_end as u32);
        }

        for pair in regions.windows(2) {
            let gap_start = pair[0].end();
            let gap = pair[1].offset.saturating_sub(gap_start);
            if gap >= size {
                return Ok(gap_start);
            }
        }
        Err(Error::NoSpace(size))
    }

    /// Adds a file named `name` under the `parent` directory and returns its index.
    /// `data_start` is the first usable data offset when the table has no files
    /// (normally the end of the system region).
    pub fn add_file(&mut self, name: &str, size: u32, parent: u32, data_start: u32) -> Result<u32> {
        let parent_data =
            *self.entries[parent as usize].as_dir().ok_or(Error::ExpectedDirectory(parent))?;
        for child in self.children(parent)? {
            if self.entries[child as usize].name == name {
                return Err(Error::DuplicateName {
                    name: name.to_owned(),
                    dir: self.entries[parent as usize].name.clone(),
                });
            }
        }
        if self.entries.len() >= u32::MAX as usize {
            return Err(Error::TooManyEntries);
        }
        let encoded = name_to_bytes(name)?;
        let name_len = encoded.len() as u64 + 1;
        if self.string_table_len as u64 + name_len > NAME_OFFSET_MASK as u64 + 1 {
            return Err(Error::StringTableFull);
        }

        let offset = self.place(size, data_start)?;
        let index = parent_data.next;

        // Every directory on the path from the parent up to the root gains the
        // new entry as a descendant.
        let mut ancestors = vec![parent];
        let mut walk = parent;
        while walk != 0 {
            walk = self.entries[walk as usize].as_dir().unwrap().parent;
            ancestors.push(walk);
        }
        for (i, entry) in self.entries.iter_mut().enumerate() {
            if let EntryKind::Directory(dir) = &mut entry.kind {
                if dir.next > index || ancestors.contains(&(i as u32)) {
                    dir.next += 1;
                }
                if dir.parent >= index {
                    dir.parent += 1;
                }
            }
        }

        let name_offset = self.string_table_len;
        self.string_table_len += name_len as u32;
        self.entries.insert(
            index as usize,
            Entry {
                name: name.to_owned(),
                name_offset,
                kind: EntryKind::File(FileData { offset, size, origin: None }),
            },
        );
        debug!("Added {:?} at entry {} (offset {:#x}, size {:#x})", name, index, offset, size);
        Ok(index)
    }

    /// Removes the file entry at `index`, compacting indices and directory spans.
    /// The gap left in the data region is not reclaimed until `defragment()`.
    pub fn remove_file(&mut self, index: u32) -> Result<()> {
        self.file(index)?;
        let removed = self.entries.remove(index as usize);
        for entry in &mut self.entries {
            if let EntryKind::Directory(dir) = &mut entry.kind {
                if dir.next > index {
                    dir.next -= 1;
                }
                if dir.parent > index {
                    dir.parent -= 1;
                }
            }
        }
        debug!("Removed {:?} (entry {})", removed.name, index);
        Ok(())
    }

    /// Repairs overlapping data offsets by shifting files forward, cascading over
    /// files in ascending offset order. Interior gaps are preserved and files are
    /// never reordered.
    pub fn update_offsets(&mut self) {
        let order = self.files_by_offset();
        for pair in order.windows(2) {
            let prev = self.entries[pair[0] as usize].as_file().unwrap();
            let prev_end = prev.end();
            let cur = self.entries[pair[1] as usize].as_file_mut().unwrap();
            if cur.offset < prev_end {
                trace!("Shifting {:#x} -> {:#x}", cur.offset, prev_end);
                cur.offset = prev_end;
            }
        }
    }

    /// Repacks the data region: files keep their order but become adjacent modulo
    /// sector alignment padding. Reassignment starts at `start_offset`, or at the
    /// lowest file's current offset if `None`.
    pub fn defragment(&mut self, start_offset: Option<u32>) {
        let order = self.files_by_offset();
        let Some(&first) = order.first() else {
            return;
        };
        let mut offset =
            start_offset.unwrap_or_else(|| self.entries[first as usize].as_file().unwrap().offset);
        debug!("Defragmenting {} files from {:#x}", order.len(), offset);
        for index in order {
            let file = self.entries[index as usize].as_file_mut().unwrap();
            file.offset = offset;
            let size = file.size as u64;
            offset = (offset as u64 + size + align_padding(size, DISC_ALIGN)) as u32;
        }
    }

    /// Serialises the table: entries in index order followed by the string table.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let table_len = self.entries.len() as u64 * FST_ENTRY_SIZE;
        let mut out = MemoryStream::with_size(table_len + self.string_table_len as u64);
        for (i, entry) in self.entries.iter().enumerate() {
            let base = i as u64 * FST_ENTRY_SIZE;
            let (kind, word1, word2) = match &entry.kind {
                EntryKind::File(f) => (0u32, f.offset, f.size),
                EntryKind::Directory(d) => (1u32, d.parent, d.next),
            };
            out.put_u32_be(base, (kind << 24) | entry.name_offset)?;
            out.put_u32_be(base + 4, word1)?;
            out.put_u32_be(base + 8, word2)?;
            if i > 0 {
                let encoded = name_to_bytes(&entry.name)?;
                let string = CString::new(encoded).unwrap();
                out.put_cstring(table_len + entry.name_offset as u64, &string)?;
            }
        }
        Ok(out.into_vec())
    }
}

impl Default for Fst {
    fn default() -> Self {
        Self::new()
    }
}
