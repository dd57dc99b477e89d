use super::stream::{ByteStream, Error, Result};
use memmap2::{Mmap, MmapMut};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use tracing::debug;

/// A byte stream backed by a memory-mapped file.
///
/// `put()` writes through to the mapping; `insert()`, `delete()`, and `resize()`
/// resize the underlying file and remap it. The mapping is flushed and released
/// when the stream is dropped.
pub struct MappedStream {
    file: File,
    map: Backing,
}

enum Backing {
    ReadOnly(Mmap),
    ReadWrite(MmapMut),
}

impl MappedStream {
    /// Opens the file at `path` as a read-only mapped stream.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path)?;
        // SAFETY: the mapping is private to this stream and dropped with it.
        let map = unsafe { Mmap::map(&file)? };
        Ok(Self { file, map: Backing::ReadOnly(map) })
    }

    /// Opens the file at `path` as a writable mapped stream.
    pub fn open_rw(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        // SAFETY: see `open()`.
        let map = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self { file, map: Backing::ReadWrite(map) })
    }

    /// Creates (or truncates) the file at `path`, presizes it to `size` zero bytes,
    /// and opens it as a writable mapped stream.
    pub fn create(path: impl AsRef<Path>, size: u64) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).create(true).truncate(true).open(path)?;
        file.set_len(size)?;
        debug!("Created {:#x}-byte image file", size);
        // SAFETY: see `open()`.
        let map = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self { file, map: Backing::ReadWrite(map) })
    }

    /// Flushes outstanding writes to disk.
    pub fn flush(&self) -> io::Result<()> {
        match &self.map {
            Backing::ReadOnly(_) => Ok(()),
            Backing::ReadWrite(map) => map.flush(),
        }
    }

    fn as_slice(&self) -> &[u8] {
        match &self.map {
            Backing::ReadOnly(map) => map,
            Backing::ReadWrite(map) => map,
        }
    }

    fn as_mut_slice(&mut self) -> Result<&mut [u8]> {
        match &mut self.map {
            Backing::ReadOnly(_) => Err(Error::ReadOnly),
            Backing::ReadWrite(map) => Ok(map),
        }
    }

    /// Resizes the file to `size` and replaces the mapping.
    fn remap(&mut self, size: u64) -> Result<()> {
        match &self.map {
            Backing::ReadOnly(_) => return Err(Error::ReadOnly),
            Backing::ReadWrite(map) => map.flush()?,
        }
        self.file.set_len(size)?;
        // SAFETY: the previous mapping is dropped by the assignment and never
        // accessed past the new file length.
        self.map = Backing::ReadWrite(unsafe { MmapMut::map_mut(&self.file)? });
        Ok(())
    }
}

impl ByteStream for MappedStream {
    fn size(&self) -> u64 {
        self.as_slice().len() as u64
    }

    fn get(&self, offset: u64, len: u64) -> Result<&[u8]> {
        if !self.is_valid_range(offset, len) {
            return Err(Error::OutOfRange { offset, len, size: self.size() });
        }
        Ok(&self.as_slice()[offset as usize..(offset + len) as usize])
    }

    fn put(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        let end = offset + bytes.len() as u64;
        if end > self.size() {
            self.remap(end)?;
        }
        self.as_mut_slice()?[offset as usize..end as usize].copy_from_slice(bytes);
        Ok(())
    }

    fn insert(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        let old_size = self.size();
        if offset >= old_size {
            // No data to shift; the gap up to `offset` is zero-filled by the resize
            self.remap(offset + bytes.len() as u64)?;
        } else {
            self.remap(old_size + bytes.len() as u64)?;
            let slice = self.as_mut_slice()?;
            slice.copy_within(offset as usize..old_size as usize, (offset as usize) + bytes.len());
        }
        self.as_mut_slice()?[offset as usize..offset as usize + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn delete(&mut self, offset: u64, len: u64) -> Result<()> {
        let size = self.size();
        if !self.is_valid_range(offset, len) {
            return Err(Error::OutOfRange { offset, len, size });
        }
        let slice = self.as_mut_slice()?;
        slice.copy_within((offset + len) as usize..size as usize, offset as usize);
        self.remap(size - len)
    }

    fn resize(&mut self, size: u64) -> Result<()> {
        self.remap(size)
    }
}

impl Drop for MappedStream {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn temp_stream(bytes: &[u8]) -> io::Result<(NamedTempFile, MappedStream)> {
        let mut file = NamedTempFile::new()?;
        file.write_all(bytes)?;
        file.flush()?;
        let stream = MappedStream::open_rw(file.path())?;
        Ok((file, stream))
    }

    #[test]
    fn test_read_only() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        file.write_all(&[1, 2, 3, 4])?;
        file.flush()?;
        let mut stream = MappedStream::open(file.path())?;
        assert_eq!(stream.size(), 4);
        assert_eq!(stream.get(1, 2)?, [2, 3]);
        assert!(stream.put(0, &[9]).is_err());
        assert!(stream.delete(0, 1).is_err());
        Ok(())
    }

    #[test]
    fn test_put_and_grow() -> Result<()> {
        let (_file, mut stream) = temp_stream(&[0, 1, 2, 3])?;
        stream.put(1, &[0xaa])?;
        assert_eq!(stream.get(0, 4)?, [0, 0xaa, 2, 3]);
        stream.put(6, &[0xbb])?;
        assert_eq!(stream.get(0, 7)?, [0, 0xaa, 2, 3, 0, 0, 0xbb]);
        Ok(())
    }

    #[test]
    fn test_insert_and_delete() -> Result<()> {
        let (_file, mut stream) = temp_stream(&[0, 1, 2, 3])?;
        stream.insert(2, &[0xaa, 0xbb])?;
        assert_eq!(stream.get(0, 6)?, [0, 1, 0xaa, 0xbb, 2, 3]);
        stream.delete(1, 3)?;
        assert_eq!(stream.get(0, 3)?, [0, 2, 3]);
        stream.insert(5, &[0xcc])?;
        assert_eq!(stream.get(0, 6)?, [0, 2, 3, 0, 0, 0xcc]);
        Ok(())
    }

    #[test]
    fn test_create() -> Result<()> {
        let path = NamedTempFile::new()?.into_temp_path();
        let mut stream = MappedStream::create(&path, 8)?;
        assert_eq!(stream.size(), 8);
        stream.put_u32_be(0, 0x01020304)?;
        stream.flush()?;
        drop(stream);
        let reopened = MappedStream::open(&path)?;
        assert_eq!(reopened.get(0, 8)?, [1, 2, 3, 4, 0, 0, 0, 0]);
        Ok(())
    }
}
