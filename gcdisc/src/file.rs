use crate::common::stream;
use crate::common::{ByteStream, MemoryStream};
use std::collections::HashMap;
use thiserror::Error;

/// The result type for file operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for file operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Stream(Box<stream::Error>),
}

from_error_boxed!(Error::Stream, stream::Error);

/// A single pending edit to a file's contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Replace { offset: u64, bytes: Vec<u8> },
    Insert { offset: u64, bytes: Vec<u8> },
    Delete { offset: u64, len: u64 },
}

/// Base contents plus an ordered log of edits, replayed lazily on serialisation.
///
/// Deletes past the current end are clamped to the available bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditLog {
    base: MemoryStream,
    changes: Vec<Change>,
}

impl EditLog {
    pub fn new(base: MemoryStream) -> Self {
        Self { base, changes: Vec::new() }
    }

    /// Returns the unedited base contents.
    pub fn base(&self) -> &MemoryStream {
        &self.base
    }

    /// Returns true if any edits are logged.
    pub fn is_edited(&self) -> bool {
        !self.changes.is_empty()
    }

    pub fn replace(&mut self, offset: u64, bytes: Vec<u8>) {
        self.changes.push(Change::Replace { offset, bytes });
    }

    pub fn insert(&mut self, offset: u64, bytes: Vec<u8>) {
        self.changes.push(Change::Insert { offset, bytes });
    }

    pub fn delete(&mut self, offset: u64, len: u64) {
        self.changes.push(Change::Delete { offset, len });
    }

    /// Discards the most recent edit and returns it.
    pub fn undo(&mut self) -> Option<Change> {
        self.changes.pop()
    }

    /// Computes the size the contents will have once the log is applied.
    pub fn size(&self) -> u64 {
        let mut size = self.base.size();
        for change in &self.changes {
            match change {
                Change::Replace { offset, bytes } => {
                    size = size.max(offset + bytes.len() as u64);
                }
                Change::Insert { offset, bytes } => {
                    if *offset > size {
                        size = offset + bytes.len() as u64;
                    } else {
                        size += bytes.len() as u64;
                    }
                }
                Change::Delete { offset, len } => {
                    if *offset < size {
                        size -= (*len).min(size - offset);
                    }
                }
            }
        }
        size
    }

    /// Replays the log over a copy of the base contents.
    pub fn apply(&self) -> Result<MemoryStream> {
        let mut out = self.base.clone();
        for change in &self.changes {
            match change {
                Change::Replace { offset, bytes } => out.put(*offset, bytes)?,
                Change::Insert { offset, bytes } => out.insert(*offset, bytes)?,
                Change::Delete { offset, len } => {
                    if *offset < out.size() {
                        let len = (*len).min(out.size() - offset);
                        out.delete(*offset, len)?;
                    }
                }
            }
        }
        Ok(out)
    }
}

/// A file extracted from a disc image. The core only relies on files being able
/// to report their name and byte length and emit their serialised contents.
pub trait DiscFile {
    fn name(&self) -> &str;

    /// Current logical size in bytes, with pending edits accounted for.
    fn size(&self) -> u64;

    /// Serialises the file, replaying pending edits over the base contents.
    fn bytes(&self) -> Result<Vec<u8>>;

    fn replace_bytes(&mut self, offset: u64, bytes: Vec<u8>);
    fn insert_bytes(&mut self, offset: u64, bytes: Vec<u8>);
    fn delete_bytes(&mut self, offset: u64, len: u64);

    /// Returns true if the file has pending edits.
    fn is_edited(&self) -> bool;
}

/// Fallback file type for formats without a registered parser: `bytes()` is the
/// identity of its input with the edit log layered on top.
#[derive(Debug, Clone)]
pub struct RawFile {
    name: String,
    contents: EditLog,
}

impl RawFile {
    pub fn new(name: impl Into<String>, contents: MemoryStream) -> Self {
        Self { name: name.into(), contents: EditLog::new(contents) }
    }
}

impl DiscFile for RawFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.contents.size()
    }

    fn bytes(&self) -> Result<Vec<u8>> {
        Ok(self.contents.apply()?.into_vec())
    }

    fn replace_bytes(&mut self, offset: u64, bytes: Vec<u8>) {
        self.contents.replace(offset, bytes);
    }

    fn insert_bytes(&mut self, offset: u64, bytes: Vec<u8>) {
        self.contents.insert(offset, bytes);
    }

    fn delete_bytes(&mut self, offset: u64, len: u64) {
        self.contents.delete(offset, len);
    }

    fn is_edited(&self) -> bool {
        self.contents.is_edited()
    }
}

/// A file constructor: builds a typed file object from a name and its contents.
pub type FileConstructor = fn(String, MemoryStream) -> Box<dyn DiscFile>;

/// Maps lowercased filename extensions (with the leading dot) to file
/// constructors. Lookups that miss fall back to `RawFile`.
#[derive(Default)]
pub struct FileFactory {
    constructors: HashMap<String, FileConstructor>,
}

impl FileFactory {
    /// Constructs a factory with no registered types.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `constructor` for `extension` (e.g. ".rel"). A duplicate
    /// registration replaces the previous one.
    pub fn register(&mut self, extension: &str, constructor: FileConstructor) {
        self.constructors.insert(extension.to_ascii_lowercase(), constructor);
    }

    /// Builds a file object for `filename`, dispatching on its extension.
    pub fn read(&self, filename: &str, contents: MemoryStream) -> Box<dyn DiscFile> {
        let constructor = filename
            .rfind('.')
            .map(|dot| filename[dot..].to_ascii_lowercase())
            .and_then(|ext| self.constructors.get(&ext));
        match constructor {
            Some(constructor) => constructor(filename.to_owned(), contents),
            None => Box::new(RawFile::new(filename, contents)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> MemoryStream {
        MemoryStream::from(vec![0u8, 1, 2, 3, 4, 5, 6, 7])
    }

    #[test]
    fn test_unedited() -> Result<()> {
        let file = RawFile::new("test.bin", base());
        assert_eq!(file.name(), "test.bin");
        assert!(!file.is_edited());
        assert_eq!(file.size(), 8);
        assert_eq!(file.bytes()?, base().into_vec());
        Ok(())
    }

    #[test]
    fn test_replace() -> Result<()> {
        let mut file = RawFile::new("test.bin", base());
        file.replace_bytes(2, vec![0xaa, 0xbb]);
        assert!(file.is_edited());
        assert_eq!(file.size(), 8);
        assert_eq!(file.bytes()?, [0, 1, 0xaa, 0xbb, 4, 5, 6, 7]);

        // Replacing past the end grows the contents
        file.replace_bytes(7, vec![0xcc, 0xdd]);
        assert_eq!(file.size(), 9);
        assert_eq!(file.bytes()?, [0, 1, 0xaa, 0xbb, 4, 5, 6, 0xcc, 0xdd]);
        Ok(())
    }

    #[test]
    fn test_insert_and_delete() -> Result<()> {
        let mut file = RawFile::new("test.bin", base());
        file.insert_bytes(4, vec![0xaa]);
        assert_eq!(file.size(), 9);
        file.delete_bytes(0, 2);
        assert_eq!(file.size(), 7);
        assert_eq!(file.bytes()?, [2, 3, 0xaa, 4, 5, 6, 7]);

        // Deletes past the end are clamped
        file.delete_bytes(5, 100);
        assert_eq!(file.size(), 5);
        assert_eq!(file.bytes()?, [2, 3, 0xaa, 4, 5]);
        Ok(())
    }

    #[test]
    fn test_undo() -> Result<()> {
        let mut file = RawFile::new("test.bin", base());
        file.replace_bytes(0, vec![0xaa]);
        file.delete_bytes(4, 4);
        assert_eq!(file.bytes()?, [0xaa, 1, 2, 3]);
        assert!(file.contents.undo().is_some());
        assert_eq!(file.bytes()?, [0xaa, 1, 2, 3, 4, 5, 6, 7]);
        assert!(file.contents.undo().is_some());
        assert!(!file.is_edited());
        assert_eq!(file.bytes()?, base().into_vec());
        Ok(())
    }

    struct UpperFile {
        name: String,
        contents: MemoryStream,
    }

    impl DiscFile for UpperFile {
        fn name(&self) -> &str {
            &self.name
        }
        fn size(&self) -> u64 {
            self.contents.size()
        }
        fn bytes(&self) -> Result<Vec<u8>> {
            Ok(self.contents.as_bytes().to_ascii_uppercase())
        }
        fn replace_bytes(&mut self, _offset: u64, _bytes: Vec<u8>) {}
        fn insert_bytes(&mut self, _offset: u64, _bytes: Vec<u8>) {}
        fn delete_bytes(&mut self, _offset: u64, _len: u64) {}
        fn is_edited(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_factory_dispatch() -> Result<()> {
        let mut factory = FileFactory::new();
        factory.register(".up", |name, contents| Box::new(UpperFile { name, contents }));

        let contents = MemoryStream::from(&b"hello"[..]);
        let upper = factory.read("test.UP", contents.clone());
        assert_eq!(upper.bytes()?, b"HELLO");

        // Unregistered extensions fall back to the identity file
        let raw = factory.read("test.bin", contents.clone());
        assert_eq!(raw.bytes()?, b"hello");
        let bare = factory.read("noext", contents);
        assert_eq!(bare.bytes()?, b"hello");
        Ok(())
    }

    #[test]
    fn test_factory_replaces_registration() -> Result<()> {
        let mut factory = FileFactory::new();
        factory.register(".up", |name, contents| Box::new(UpperFile { name, contents }));
        factory.register(".up", |name, contents| Box::new(RawFile::new(name, contents)));
        let file = factory.read("test.up", MemoryStream::from(&b"hello"[..]));
        assert_eq!(file.bytes()?, b"hello");
        Ok(())
    }
}
