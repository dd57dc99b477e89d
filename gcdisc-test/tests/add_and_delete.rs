use anyhow::Result;
use gcdisc::common::MemoryStream;
use gcdisc::disc::IsoArchive;
use gcdisc::file::RawFile;
use gcdisc_test as common;

#[test]
fn test_add_file_at_root() -> Result<()> {
    common::init_logging();

    let mut iso = common::open_test_iso()?;
    let previous_size = iso.archive_size();
    let payload = common::pattern(0x99, 4096);
    iso.add_file(Box::new(RawFile::new("extra.bin", MemoryStream::from(payload.clone()))), None)?;

    // The new entry lands at the end of the list and of the image
    assert_eq!(iso.file_list(), ["alpha.bin", "beta.bin", "gamma.bin", "extra.bin"]);
    assert_eq!(iso.fst().entry_count(), 6);
    let extra = *iso.fst().file(iso.fst().find_file("extra.bin")?)?;
    assert_eq!(extra.offset as u64, previous_size);
    assert_eq!(extra.size, 4096);

    let mut rebuilt = MemoryStream::new();
    iso.build(&mut rebuilt)?;
    let reopened = IsoArchive::open(rebuilt)?;
    assert_eq!(reopened.extract("extra.bin")?.bytes()?, payload);
    assert_eq!(
        reopened.extract("gamma.bin")?.bytes()?,
        common::pattern(common::GAMMA_SEED, common::GAMMA_SIZE as usize)
    );
    Ok(())
}

#[test]
fn test_add_file_in_directory() -> Result<()> {
    common::init_logging();

    let mut iso = common::open_test_iso()?;
    let payload = common::pattern(0x44, 0x200);
    iso.add_file(
        Box::new(RawFile::new("delta.bin", MemoryStream::from(payload.clone()))),
        Some("data"),
    )?;
    assert_eq!(iso.file_list(), ["alpha.bin", "beta.bin", "delta.bin", "gamma.bin"]);

    let mut rebuilt = MemoryStream::new();
    iso.build(&mut rebuilt)?;
    let reopened = IsoArchive::open(rebuilt)?;
    assert_eq!(reopened.file_list(), ["alpha.bin", "beta.bin", "delta.bin", "gamma.bin"]);
    assert_eq!(reopened.extract("delta.bin")?.bytes()?, payload);
    Ok(())
}

#[test]
fn test_add_duplicate_name() -> Result<()> {
    common::init_logging();

    let mut iso = common::open_test_iso()?;
    let file = RawFile::new("alpha.bin", MemoryStream::from(vec![0u8; 16]));
    assert!(iso.add_file(Box::new(file), None).is_err());

    // The same name in a different directory is allowed
    let file = RawFile::new("alpha.bin", MemoryStream::from(vec![0u8; 16]));
    iso.add_file(Box::new(file), Some("data"))?;
    Ok(())
}

#[test]
fn test_add_to_missing_directory() -> Result<()> {
    common::init_logging();

    let mut iso = common::open_test_iso()?;
    let file = RawFile::new("extra.bin", MemoryStream::from(vec![0u8; 16]));
    assert!(iso.add_file(Box::new(file), Some("nonexistent")).is_err());
    Ok(())
}

#[test]
fn test_delete_file() -> Result<()> {
    common::init_logging();

    let mut iso = common::open_test_iso()?;
    iso.delete_file("beta.bin")?;
    assert_eq!(iso.file_list(), ["alpha.bin", "gamma.bin"]);
    assert!(iso.delete_file("beta.bin").is_err());

    // The gap is not reclaimed: gamma.bin keeps its offset until a defragment
    let mut rebuilt = MemoryStream::new();
    iso.build(&mut rebuilt)?;
    let reopened = IsoArchive::open(rebuilt)?;
    assert_eq!(reopened.file_list(), ["alpha.bin", "gamma.bin"]);
    let gamma = *reopened.fst().file(reopened.fst().find_file("gamma.bin")?)?;
    assert_eq!(gamma.offset as u64, common::GAMMA_OFFSET);
    assert_eq!(
        reopened.extract("gamma.bin")?.bytes()?,
        common::pattern(common::GAMMA_SEED, common::GAMMA_SIZE as usize)
    );
    Ok(())
}

#[test]
fn test_delete_then_defragment() -> Result<()> {
    common::init_logging();

    let mut iso = common::open_test_iso()?;
    iso.delete_file("beta.bin")?;
    iso.defragment();

    let mut rebuilt = MemoryStream::new();
    iso.build(&mut rebuilt)?;
    let reopened = IsoArchive::open(rebuilt)?;
    assert_eq!(reopened.fst().file(reopened.fst().find_file("alpha.bin")?)?.offset, 0x3000);
    assert_eq!(reopened.fst().file(reopened.fst().find_file("gamma.bin")?)?.offset, 0x3800);
    Ok(())
}
