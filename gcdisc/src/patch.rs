use crate::common::{ByteStream, MemoryStream};
use crate::disc::archive::{self, IsoArchive, SYSTEM_FILE_NAME};
use crate::file::{self, RawFile};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::convert::TryFrom;
use std::io::{self, Cursor, Read, Write};
use thiserror::Error;
use tracing::debug;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Name of the platform tag member inside a patch archive.
const SYSCODE_NAME: &str = "SYSCODE";
/// Suffix for per-file delta members.
const PATCH_SUFFIX: &str = ".patch";
/// Name of the system region delta member.
const SYSTEM_PATCH_NAME: &str = "system.bin.patch";

/// The result type for patch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for patch operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("patch archive has no SYSCODE member")]
    MissingSysCode,

    #[error("unrecognized system code {0:#x}")]
    UnknownSystemCode(u8),

    #[error("patch targets {actual:?} but the image is {expected:?}")]
    SysCodeMismatch { expected: SystemCode, actual: SystemCode },

    #[error(transparent)]
    Archive(Box<archive::Error>),

    #[error(transparent)]
    File(Box<file::Error>),

    #[error(transparent)]
    Zip(Box<ZipError>),

    #[error(transparent)]
    Io(Box<io::Error>),
}

from_error_boxed!(Error::Archive, archive::Error);
from_error_boxed!(Error::File, file::Error);
from_error_boxed!(Error::Zip, ZipError);
from_error_boxed!(Error::Io, io::Error);

/// Platform tag stored in a patch archive's SYSCODE member.
#[derive(Debug, Copy, Clone, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum SystemCode {
    GameCube = 0x01,
}

/// Produces a zipped patch archive for the archive's outstanding changes.
///
/// The archive contains the one-byte `SYSCODE` platform tag, one `<name>.patch`
/// binary delta per file whose current contents differ from the pristine image,
/// and a `system.bin.patch` delta for the concatenated system region.
pub fn write_patch<S: ByteStream>(iso: &IsoArchive<S>) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    writer.start_file(SYSCODE_NAME, options)?;
    writer.write_all(&[u8::from(iso.system_code())])?;

    for (name, pending) in iso.pending() {
        if name == SYSTEM_FILE_NAME {
            continue;
        }
        let pristine = iso.pristine_file_bytes(name)?;
        let updated = pending.bytes()?;
        if updated == pristine {
            continue;
        }
        debug!("Writing delta for {:?} ({:#x} -> {:#x} bytes)", name, pristine.len(), updated.len());
        let mut delta = Vec::new();
        bsdiff::diff(&pristine, &updated, &mut delta)?;
        writer.start_file(format!("{}{}", name, PATCH_SUFFIX), options)?;
        writer.write_all(&delta)?;
    }

    let updated_system = iso.extract_system_blob()?;
    let mut delta = Vec::new();
    bsdiff::diff(iso.pristine_system(), &updated_system, &mut delta)?;
    writer.start_file(SYSTEM_PATCH_NAME, options)?;
    writer.write_all(&delta)?;

    Ok(writer.finish()?.into_inner())
}

/// Applies a patch archive to `iso`, recovering the patched file contents and
/// replaying them through the archive's replacement paths.
pub fn apply_patch<S: ByteStream>(iso: &mut IsoArchive<S>, data: &[u8]) -> Result<()> {
    let mut zip = ZipArchive::new(Cursor::new(data))?;

    let code = read_syscode(&mut zip)?;
    let expected = iso.system_code();
    if code != expected {
        return Err(Error::SysCodeMismatch { expected, actual: code });
    }

    let names: Vec<String> = zip.file_names().map(String::from).collect();
    for member in names {
        if !member.ends_with(PATCH_SUFFIX) || member == SYSTEM_PATCH_NAME {
            continue;
        }
        let target = member[..member.len() - PATCH_SUFFIX.len()].to_owned();
        let mut delta = Vec::new();
        zip.by_name(&member)?.read_to_end(&mut delta)?;

        let pristine = if iso.has_file(&target) { iso.current_file_bytes(&target)? } else { Vec::new() };
        let mut updated = Vec::new();
        bsdiff::patch(&pristine, &mut delta.as_slice(), &mut updated)?;
        debug!("Patched {:?} ({:#x} -> {:#x} bytes)", target, pristine.len(), updated.len());

        let disc_file = iso.factory().read(&target, MemoryStream::from(updated));
        if iso.has_file(&target) {
            iso.replace_file(disc_file)?;
        } else {
            iso.add_file(disc_file, None)?;
        }
    }

    let mut delta = Vec::new();
    match zip.by_name(SYSTEM_PATCH_NAME) {
        Ok(mut member) => {
            member.read_to_end(&mut delta)?;
        }
        Err(ZipError::FileNotFound) => return Ok(()),
        Err(e) => return Err(e.into()),
    }
    let pristine = iso.extract_system_blob()?;
    let mut updated = Vec::new();
    bsdiff::patch(&pristine, &mut delta.as_slice(), &mut updated)?;
    iso.replace_file(Box::new(RawFile::new(SYSTEM_FILE_NAME, MemoryStream::from(updated))))?;
    Ok(())
}

fn read_syscode(zip: &mut ZipArchive<Cursor<&[u8]>>) -> Result<SystemCode> {
    let mut bytes = Vec::new();
    match zip.by_name(SYSCODE_NAME) {
        Ok(mut member) => {
            member.read_to_end(&mut bytes)?;
        }
        Err(ZipError::FileNotFound) => return Err(Error::MissingSysCode),
        Err(e) => return Err(e.into()),
    }
    let code = *bytes.first().ok_or(Error::MissingSysCode)?;
    SystemCode::try_from(code).map_err(|_| Error::UnknownSystemCode(code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_code_values() {
        assert_eq!(u8::from(SystemCode::GameCube), 0x01);
        assert_eq!(SystemCode::try_from(0x01).unwrap(), SystemCode::GameCube);
        assert!(SystemCode::try_from(0x02).is_err());
    }

    #[test]
    fn test_delta_round_trip() -> io::Result<()> {
        let old = b"The quick brown fox jumps over the lazy dog".to_vec();
        let new = b"The quick brown fox vaults over the lazy cat".to_vec();
        let mut delta = Vec::new();
        bsdiff::diff(&old, &new, &mut delta)?;
        let mut recovered = Vec::new();
        bsdiff::patch(&old, &mut delta.as_slice(), &mut recovered)?;
        assert_eq!(recovered, new);
        Ok(())
    }

    #[test]
    fn test_empty_delta_is_noop() -> io::Result<()> {
        let bytes = b"unchanged contents".to_vec();
        let mut delta = Vec::new();
        bsdiff::diff(&bytes, &bytes, &mut delta)?;
        let mut recovered = Vec::new();
        bsdiff::patch(&bytes, &mut delta.as_slice(), &mut recovered)?;
        assert_eq!(recovered, bytes);
        Ok(())
    }
}
