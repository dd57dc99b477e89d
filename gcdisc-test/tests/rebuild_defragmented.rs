use anyhow::Result;
use gcdisc::common::MemoryStream;
use gcdisc::disc::{DISC_ALIGN, IsoArchive};
use gcdisc_test as common;

#[test]
fn test_defragmented_rebuild() -> Result<()> {
    common::init_logging();

    let mut iso = common::open_test_iso()?;
    iso.defragment();

    // gamma.bin's gap is gone: every file starts at the previous file's aligned end
    let fst = iso.fst();
    let mut expected = common::SYSTEM_SIZE;
    for index in fst.file_indices().collect::<Vec<_>>() {
        let file = fst.file(index)?;
        assert_eq!(file.offset as u64, expected);
        let size = file.size as u64;
        expected += size + gcdisc::common::align_padding(size, DISC_ALIGN);
    }

    let mut rebuilt = MemoryStream::new();
    iso.build(&mut rebuilt)?;

    // The system region is untouched (the FST's entry count, names, and sizes are
    // unchanged, so the header is too)
    let source = common::build_test_image();
    common::assert_images_equal(
        &source.as_bytes()[..common::FST_OFFSET as usize],
        &rebuilt.as_bytes()[..common::FST_OFFSET as usize],
    );

    // Every file keeps its contents at its new offset
    let reopened = IsoArchive::open(rebuilt)?;
    assert_eq!(reopened.file_list(), ["alpha.bin", "beta.bin", "gamma.bin"]);
    assert_eq!(
        reopened.extract("alpha.bin")?.bytes()?,
        common::pattern(common::ALPHA_SEED, common::ALPHA_SIZE as usize)
    );
    assert_eq!(
        reopened.extract("beta.bin")?.bytes()?,
        common::pattern(common::BETA_SEED, common::BETA_SIZE as usize)
    );
    assert_eq!(
        reopened.extract("gamma.bin")?.bytes()?,
        common::pattern(common::GAMMA_SEED, common::GAMMA_SIZE as usize)
    );
    assert_eq!(reopened.fst().file(1)?.offset, 0x3000);
    assert_eq!(reopened.fst().file(3)?.offset, 0x3800);
    assert_eq!(reopened.fst().file(4)?.offset, 0x4000);
    Ok(())
}
