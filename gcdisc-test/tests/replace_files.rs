use anyhow::Result;
use gcdisc::common::{ByteStream, MemoryStream};
use gcdisc::disc::{IsoArchive, GC_DISC_MAX_SIZE};
use gcdisc::file::RawFile;
use gcdisc_test as common;

#[test]
fn test_replace_same_size() -> Result<()> {
    common::init_logging();

    let mut iso = common::open_test_iso()?;
    let inverted: Vec<u8> =
        common::pattern(common::ALPHA_SEED, common::ALPHA_SIZE as usize).iter().map(|b| !b).collect();
    iso.replace_file(Box::new(RawFile::new("alpha.bin", MemoryStream::from(inverted.clone()))))?;

    let mut rebuilt = MemoryStream::new();
    iso.build(&mut rebuilt)?;

    // Only alpha.bin's byte range differs from the source image
    let source = common::build_test_image();
    let (start, end) = (common::ALPHA_OFFSET as usize, (common::ALPHA_OFFSET + common::ALPHA_SIZE) as usize);
    common::assert_images_equal(&source.as_bytes()[..start], &rebuilt.as_bytes()[..start]);
    assert_eq!(&rebuilt.as_bytes()[start..end], inverted);
    common::assert_images_equal(&source.as_bytes()[end..], &rebuilt.as_bytes()[end..]);
    Ok(())
}

#[test]
fn test_replace_larger() -> Result<()> {
    common::init_logging();

    let mut iso = common::open_test_iso()?;
    let payload = common::pattern(0x77, 0x900);
    iso.replace_file(Box::new(RawFile::new("beta.bin", MemoryStream::from(payload.clone()))))?;

    let mut rebuilt = MemoryStream::new();
    iso.build(&mut rebuilt)?;
    assert!(rebuilt.size() <= GC_DISC_MAX_SIZE);

    // The grown payload forced a defragment: beta.bin's entry was padded to a
    // whole sector count and gamma.bin moved behind it
    let reopened = IsoArchive::open(rebuilt)?;
    let beta = *reopened.fst().file(3)?;
    assert_eq!(beta.offset, 0x3800);
    assert_eq!(beta.size, 0x1000);
    let gamma = *reopened.fst().file(4)?;
    assert_eq!(gamma.offset, 0x4800);

    // beta.bin's contents are the new payload (the entry's tail is padding)
    let beta_bytes = reopened.extract("beta.bin")?.bytes()?;
    assert_eq!(&beta_bytes[..payload.len()], payload);
    assert!(beta_bytes[payload.len()..].iter().all(|&b| b == 0));

    // Everything else is unchanged
    assert_eq!(
        reopened.extract("alpha.bin")?.bytes()?,
        common::pattern(common::ALPHA_SEED, common::ALPHA_SIZE as usize)
    );
    assert_eq!(
        reopened.extract("gamma.bin")?.bytes()?,
        common::pattern(common::GAMMA_SEED, common::GAMMA_SIZE as usize)
    );
    Ok(())
}

#[test]
fn test_edit_through_open_file() -> Result<()> {
    common::init_logging();

    let mut iso = common::open_test_iso()?;
    let alpha = iso.open_file("alpha.bin")?;
    alpha.replace_bytes(0, vec![0xde, 0xad, 0xbe, 0xef]);
    assert!(alpha.is_edited());

    let mut rebuilt = MemoryStream::new();
    iso.build(&mut rebuilt)?;

    let start = common::ALPHA_OFFSET as usize;
    assert_eq!(&rebuilt.as_bytes()[start..start + 4], [0xde, 0xad, 0xbe, 0xef]);
    let source = common::build_test_image();
    common::assert_images_equal(
        &source.as_bytes()[start + 4..],
        &rebuilt.as_bytes()[start + 4..],
    );
    Ok(())
}

#[test]
fn test_replace_missing_file() -> Result<()> {
    common::init_logging();

    let mut iso = common::open_test_iso()?;
    let file = RawFile::new("missing.bin", MemoryStream::from(vec![0u8; 16]));
    assert!(iso.replace_file(Box::new(file)).is_err());
    Ok(())
}

#[test]
fn test_replace_system_region() -> Result<()> {
    common::init_logging();

    let mut iso = common::open_test_iso()?;
    let mut blob = iso.extract_system_blob()?;
    // Rename the game inside the header
    blob[0x20..0x2a].copy_from_slice(b"Renamed!\0\0");
    iso.replace_file(Box::new(RawFile::new("system.bin", MemoryStream::from(blob))))?;
    assert_eq!(iso.header().game_name().to_bytes(), b"Renamed!");

    let mut rebuilt = MemoryStream::new();
    iso.build(&mut rebuilt)?;
    let reopened = IsoArchive::open(rebuilt)?;
    assert_eq!(reopened.header().game_name().to_bytes(), b"Renamed!");
    assert_eq!(
        reopened.extract("alpha.bin")?.bytes()?,
        common::pattern(common::ALPHA_SEED, common::ALPHA_SIZE as usize)
    );
    Ok(())
}
