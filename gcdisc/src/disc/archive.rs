use super::dol::{self, Dol, DOL_HEADER_SIZE};
use super::fst::{self, Fst};
use super::header::{
    self, Apploader, DiscHeader, HeaderInformation, APPLOADER_OFFSET, DISC_HEADER_SIZE,
    HEADER_INFO_SIZE,
};
use super::{DISC_ALIGN, GC_DISC_MAX_SIZE};
use crate::common::stream;
use crate::common::{align_padding, ByteStream, MappedStream, MemoryStream};
use crate::file::{self, DiscFile, FileFactory, RawFile};
use crate::patch::{self, SystemCode};
use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, trace};

/// Synthetic filename for the concatenated system region.
pub const SYSTEM_FILE_NAME: &str = "system.bin";

/// The result type for archive operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for archive operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("FST region at {offset:#x} (size {size:#x}) is outside the image (size {image_size:#x})")]
    FstOutOfBounds { offset: u32, size: u32, image_size: u64 },

    #[error("DOL at {offset:#x} (size {size:#x}) is outside the image (size {image_size:#x})")]
    DolOutOfBounds { offset: u32, size: u64, image_size: u64 },

    #[error("file {name:?} at {offset:#x} (size {size:#x}) is outside the image (size {image_size:#x})")]
    FileOutOfBounds { name: String, offset: u32, size: u32, image_size: u64 },

    #[error("file {name:?} at {offset:#x} (size {size:#x}) overlaps the system region")]
    FileOverlapsSystem { name: String, offset: u32, size: u32 },

    #[error("image would be {0:#x} bytes, larger than a standard disc")]
    ImageTooLarge(u64),

    #[error(transparent)]
    Header(Box<header::Error>),

    #[error(transparent)]
    Dol(Box<dol::Error>),

    #[error(transparent)]
    Fst(Box<fst::Error>),

    #[error(transparent)]
    File(Box<file::Error>),

    #[error(transparent)]
    Stream(Box<stream::Error>),

    #[error(transparent)]
    Io(Box<io::Error>),
}

from_error_boxed!(Error::Header, header::Error);
from_error_boxed!(Error::Dol, dol::Error);
from_error_boxed!(Error::Fst, fst::Error);
from_error_boxed!(Error::File, file::Error);
from_error_boxed!(Error::Stream, stream::Error);
from_error_boxed!(Error::Io, io::Error);

/// A GameCube disc image opened for reading and editing.
///
/// The archive owns the source stream, the parsed system records, the FST, and a
/// map of pending files (files that have been opened for editing, replaced, or
/// added). A file with no pending copy is materialised from the source stream on
/// demand; `build()` serialises the whole logical image into a target stream.
pub struct IsoArchive<S: ByteStream> {
    stream: S,
    header: DiscHeader,
    header_info: HeaderInformation,
    apploader: Apploader,
    dol: Dol,
    fst: Fst,
    pending: BTreeMap<String, Box<dyn DiscFile>>,
    factory: FileFactory,
    pristine_system: Vec<u8>,
    allow_oversize: bool,
}

impl IsoArchive<MappedStream> {
    /// Memory-maps the image file at `path` and opens it.
    pub fn open_image_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(MappedStream::open(path)?)
    }
}

impl<S: ByteStream> IsoArchive<S> {
    /// Opens a disc image from `stream` with an empty file factory.
    pub fn open(stream: S) -> Result<Self> {
        Self::open_with_factory(stream, FileFactory::new())
    }

    /// Opens a disc image from `stream`, using `factory` to type extracted files.
    pub fn open_with_factory(stream: S, factory: FileFactory) -> Result<Self> {
        let image_size = stream.size();
        let header = DiscHeader::parse(MemoryStream::from(stream.get(0, DISC_HEADER_SIZE)?))?;
        debug!(
            "Opened {}: DOL at {:#x}, FST at {:#x} (size = {:#x})",
            header.game_id(),
            header.dol_offset(),
            header.fst_offset(),
            header.fst_size()
        );
        let header_info =
            HeaderInformation::parse(MemoryStream::from(stream.get(DISC_HEADER_SIZE, HEADER_INFO_SIZE)?))?;

        let dol_offset = header.dol_offset() as u64;
        let fst_offset = header.fst_offset() as u64;
        let fst_size = header.fst_size() as u64;
        if fst_offset + fst_size > image_size {
            return Err(Error::FstOutOfBounds {
                offset: header.fst_offset(),
                size: header.fst_size(),
                image_size,
            });
        }

        // The apploader runs up to whichever of the DOL and FST comes first
        let apploader_end = dol_offset.min(fst_offset);
        let apploader =
            Apploader::new(MemoryStream::from(stream.get(APPLOADER_OFFSET, apploader_end - APPLOADER_OFFSET)?));

        let mut dol = Dol::parse(&MemoryStream::from(stream.get(dol_offset, DOL_HEADER_SIZE)?))?;
        let dol_size = dol.total_size();
        if dol_offset + dol_size > image_size {
            return Err(Error::DolOutOfBounds {
                offset: header.dol_offset(),
                size: dol_size,
                image_size,
            });
        }
        dol.load_contents(&MemoryStream::from(stream.get(dol_offset, dol_size)?))?;

        let fst = Fst::parse(&MemoryStream::from(stream.get(fst_offset, fst_size)?))?;

        // Every file must lie inside the image's data region
        let system_regions = [
            (0, apploader_end),
            (dol_offset, dol_offset + dol_size),
            (fst_offset, fst_offset + fst_size),
        ];
        for index in fst.file_indices() {
            let data = fst.file(index)?;
            if data.size == 0 {
                continue;
            }
            let name = || fst.entry(index).name.clone();
            let (start, end) = (data.offset as u64, data.end() as u64);
            if end > image_size {
                return Err(Error::FileOutOfBounds {
                    name: name(),
                    offset: data.offset,
                    size: data.size,
                    image_size,
                });
            }
            if system_regions.iter().any(|&(s, e)| start < e && end > s) {
                return Err(Error::FileOverlapsSystem {
                    name: name(),
                    offset: data.offset,
                    size: data.size,
                });
            }
        }

        let mut archive = Self {
            stream,
            header,
            header_info,
            apploader,
            dol,
            fst,
            pending: BTreeMap::new(),
            factory,
            pristine_system: Vec::new(),
            allow_oversize: false,
        };
        archive.pristine_system = archive.write_system_blob()?;
        Ok(archive)
    }

    pub fn header(&self) -> &DiscHeader {
        &self.header
    }

    pub fn dol(&self) -> &Dol {
        &self.dol
    }

    pub fn fst(&self) -> &Fst {
        &self.fst
    }

    pub fn factory(&self) -> &FileFactory {
        &self.factory
    }

    pub fn factory_mut(&mut self) -> &mut FileFactory {
        &mut self.factory
    }

    /// Returns the disc's six-character game ID (e.g. "GGTE01").
    pub fn game_id(&self) -> String {
        self.header.game_id()
    }

    /// The platform this archive belongs to, as tagged in patch archives.
    pub fn system_code(&self) -> SystemCode {
        SystemCode::GameCube
    }

    /// Permits `build()` to produce images larger than a standard disc.
    pub fn allow_oversize(&mut self, allow: bool) {
        self.allow_oversize = allow;
    }

    /// Returns the names of all files in the image in FST pre-order.
    pub fn file_list(&self) -> Vec<String> {
        self.fst.list_files().into_iter().map(str::to_owned).collect()
    }

    /// Returns true if the FST contains a file named `name`.
    pub fn has_file(&self, name: &str) -> bool {
        self.fst.find_file(name).is_ok()
    }

    /// Reads a file's unmodified contents from the source image.
    fn source_file_bytes(&self, index: u32) -> Result<Vec<u8>> {
        match self.fst.file(index)?.origin {
            Some(region) => Ok(self.stream.get(region.offset as u64, region.size as u64)?.to_vec()),
            None => Ok(Vec::new()),
        }
    }

    /// Reads a file's current logical contents: its pending copy if one exists,
    /// otherwise its bytes in the source image.
    pub(crate) fn current_file_bytes(&self, name: &str) -> Result<Vec<u8>> {
        match self.pending.get(name) {
            Some(file) => Ok(file.bytes()?),
            None => self.source_file_bytes(self.fst.find_file(name)?),
        }
    }

    /// Reads a file's pristine contents from the source image, ignoring any
    /// pending copy. Files added since open have no pristine contents.
    pub(crate) fn pristine_file_bytes(&self, name: &str) -> Result<Vec<u8>> {
        self.source_file_bytes(self.fst.find_file(name)?)
    }

    pub(crate) fn pending(&self) -> &BTreeMap<String, Box<dyn DiscFile>> {
        &self.pending
    }

    pub(crate) fn pristine_system(&self) -> &[u8] {
        &self.pristine_system
    }

    /// Extracts the file named `name` as a detached typed file object.
    /// The special name `system.bin` yields the concatenated system region.
    pub fn extract(&self, name: &str) -> Result<Box<dyn DiscFile>> {
        if name == SYSTEM_FILE_NAME {
            let blob = self.write_system_blob()?;
            return Ok(Box::new(RawFile::new(name, MemoryStream::from(blob))));
        }
        let bytes = self.current_file_bytes(name)?;
        trace!("Extracted {:?} ({:#x} bytes)", name, bytes.len());
        Ok(self.factory.read(name, MemoryStream::from(bytes)))
    }

    /// Extracts every file in FST pre-order.
    pub fn extract_all(&self) -> Result<Vec<Box<dyn DiscFile>>> {
        self.file_list().iter().map(|name| self.extract(name)).collect()
    }

    /// Extracts `name` into the pending map (if it is not already there) and
    /// returns a mutable handle. Edits made through the handle are observed by
    /// `build()` and `make_patch()`.
    pub fn open_file(&mut self, name: &str) -> Result<&mut dyn DiscFile> {
        if !self.pending.contains_key(name) {
            let extracted = self.extract(name)?;
            self.pending.insert(name.to_owned(), extracted);
        }
        Ok(self.pending.get_mut(name).unwrap().as_mut())
    }

    /// Serialises the four system records at their disc positions into a single buffer.
    pub fn extract_system_blob(&self) -> Result<Vec<u8>> {
        self.write_system_blob()
    }

    fn write_system_blob(&self) -> Result<Vec<u8>> {
        let mut out = MemoryStream::new();
        self.write_system_records(&mut out)?;
        Ok(out.into_vec())
    }

    fn write_system_records<T: ByteStream>(&self, target: &mut T) -> Result<()> {
        target.put(0, self.header.bytes())?;
        target.put(DISC_HEADER_SIZE, self.header_info.bytes())?;
        target.put(APPLOADER_OFFSET, self.apploader.bytes())?;
        target.put(self.header.dol_offset() as u64, &self.dol.to_bytes()?)?;
        Ok(())
    }

    /// Adds a new file to the image, under `parent_dir` if given and the root
    /// otherwise. The file's payload is carried in the pending map until the
    /// image is rebuilt.
    pub fn add_file(&mut self, disc_file: Box<dyn DiscFile>, parent_dir: Option<&str>) -> Result<()> {
        let parent = match parent_dir {
            Some(dir) => self.fst.find_directory(dir)?,
            None => 0,
        };
        let size = u32::try_from(disc_file.size()).map_err(|_| Error::ImageTooLarge(disc_file.size()))?;
        let name = disc_file.name().to_owned();
        let data_start = self.system_size() as u32;
        self.fst.add_file(&name, size, parent, data_start)?;
        self.pending.insert(name, disc_file);
        Ok(())
    }

    /// Replaces an existing file's contents with `disc_file`. The special name
    /// `system.bin` re-parses the system records from the payload instead.
    pub fn replace_file(&mut self, disc_file: Box<dyn DiscFile>) -> Result<()> {
        let name = disc_file.name().to_owned();
        if name == SYSTEM_FILE_NAME {
            let bytes = disc_file.bytes()?;
            return self.replace_system_region(&MemoryStream::from(bytes));
        }
        self.fst.find_file(&name)?;
        debug!("Replacing {:?} ({:#x} bytes)", name, disc_file.size());
        self.pending.insert(name, disc_file);
        Ok(())
    }

    /// Re-parses the four system records from a concatenated system blob.
    /// The FST is not re-read; it remains owned by the archive.
    fn replace_system_region(&mut self, blob: &MemoryStream) -> Result<()> {
        let header = DiscHeader::parse(MemoryStream::from(blob.get(0, DISC_HEADER_SIZE)?))?;
        let header_info =
            HeaderInformation::parse(MemoryStream::from(blob.get(DISC_HEADER_SIZE, HEADER_INFO_SIZE)?))?;
        let apploader_end = (header.dol_offset().min(header.fst_offset())) as u64;
        let apploader =
            Apploader::new(MemoryStream::from(blob.get(APPLOADER_OFFSET, apploader_end - APPLOADER_OFFSET)?));
        let dol_offset = header.dol_offset() as u64;
        let mut dol = Dol::parse(&MemoryStream::from(blob.get(dol_offset, DOL_HEADER_SIZE)?))?;
        dol.load_contents(&MemoryStream::from(blob.get(dol_offset, dol.total_size())?))?;
        debug!("Replaced system region from {:#x}-byte blob", blob.size());
        self.header = header;
        self.header_info = header_info;
        self.apploader = apploader;
        self.dol = dol;
        Ok(())
    }

    /// Removes the file named `name` from the image. The gap its data leaves in
    /// the data region is not reclaimed until the next defragment.
    pub fn delete_file(&mut self, name: &str) -> Result<()> {
        let index = self.fst.find_file(name)?;
        self.fst.remove_file(index)?;
        self.pending.remove(name);
        Ok(())
    }

    /// Repacks the data region so that files are adjacent modulo sector padding,
    /// starting right after the system region.
    pub fn defragment(&mut self) {
        let start = self.system_size() as u32;
        self.fst.defragment(Some(start));
        self.fst.update_offsets();
    }

    /// Returns the byte count of the system region (through the end of the
    /// apploader, DOL, and FST, whichever is last), rounded up to 2048.
    pub fn system_size(&self) -> u64 {
        let apploader_end = APPLOADER_OFFSET + self.apploader.size();
        let dol_end = self.header.dol_offset() as u64 + self.dol.total_size();
        let fst_end = self.header.fst_offset() as u64 + self.fst.disk_size() as u64;
        let end = apploader_end.max(dol_end).max(fst_end);
        end + align_padding(end, DISC_ALIGN)
    }

    /// Returns the byte count of the whole logical image, rounded up to 2048.
    pub fn archive_size(&self) -> u64 {
        let data_end = self
            .fst
            .file_indices()
            .map(|i| self.fst.file(i).unwrap().end() as u64)
            .max()
            .unwrap_or(0);
        let end = data_end + align_padding(data_end, DISC_ALIGN);
        end.max(self.system_size())
    }

    /// Serialises the logical image into `target`, producing a byte-exact disc
    /// image. Pending payloads that grew beyond their FST entry force a
    /// defragment so that no file ranges overlap.
    pub fn build<T: ByteStream>(&mut self, target: &mut T) -> Result<()> {
        let files: Vec<(u32, String)> = self
            .fst
            .file_indices()
            .map(|i| (i, self.fst.entry(i).name.clone()))
            .collect();

        // Grow FST entries whose pending payload no longer fits
        let mut layout_changed = false;
        for (index, name) in &files {
            if let Some(pending) = self.pending.get(name) {
                let new_size = pending.size();
                let entry = self.fst.file_mut(*index)?;
                if new_size > entry.size as u64 {
                    let padded = new_size + align_padding(new_size, DISC_ALIGN);
                    if padded > u32::MAX as u64 {
                        return Err(Error::ImageTooLarge(padded));
                    }
                    debug!(
                        "{:?} grew from {:#x} to {:#x} bytes",
                        name, entry.size, new_size
                    );
                    entry.size = padded as u32;
                    layout_changed = true;
                }
            }
        }

        // Adding files grows the FST itself; make sure its tail cannot reach the
        // first file's data
        let fst_end = self.header.fst_offset() as u64 + self.fst.disk_size() as u64;
        let first_data = files
            .iter()
            .filter_map(|(i, _)| {
                let f = self.fst.file(*i).ok()?;
                (f.size > 0).then_some(f.offset as u64)
            })
            .min();
        if first_data.map_or(false, |offset| offset < fst_end) {
            layout_changed = true;
        }

        if layout_changed {
            debug!("Layout changed; defragmenting the data region");
            let start = self.system_size() as u32;
            self.fst.defragment(Some(start));
            self.fst.update_offsets();
        }

        let total = self.archive_size();
        if total > GC_DISC_MAX_SIZE && !self.allow_oversize {
            return Err(Error::ImageTooLarge(total));
        }

        // Offsets are final: serialise the FST and sync the header before the
        // system records are written
        let mut fst_bytes = self.fst.to_bytes()?;
        self.header.set_fst_size(fst_bytes.len() as u32)?;
        self.write_system_records(target)?;

        let padding = align_padding(fst_bytes.len() as u64, DISC_ALIGN);
        fst_bytes.resize(fst_bytes.len() + padding as usize, 0);
        target.put(self.header.fst_offset() as u64, &fst_bytes)?;

        // File payloads in ascending offset order
        let mut order = files;
        order.sort_by_key(|(i, _)| self.fst.file(*i).map(|f| f.offset).unwrap_or(0));
        for (index, name) in order {
            let data = *self.fst.file(index)?;
            let bytes = match self.pending.get(&name) {
                Some(pending) => pending.bytes()?,
                None => self.source_file_bytes(index)?,
            };
            trace!("Writing {:?} at {:#x} ({:#x} bytes)", name, data.offset, bytes.len());
            target.put(data.offset as u64, &bytes)?;
        }

        if target.size() != total {
            target.resize(total)?;
        }
        Ok(())
    }

    /// Rebuilds the image into a new file at `path`.
    pub fn save_to_path(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let mut target = MappedStream::create(path, self.archive_size())?;
        self.build(&mut target)?;
        target.flush()?;
        Ok(())
    }

    /// Produces a zipped patch archive capturing every outstanding change
    /// against the pristine image.
    pub fn make_patch(&self) -> patch::Result<Vec<u8>> {
        patch::write_patch(self)
    }

    /// Applies a patch archive produced by `make_patch()` to this image.
    pub fn apply_patch(&mut self, data: &[u8]) -> patch::Result<()> {
        patch::apply_patch(self, data)
    }
}
