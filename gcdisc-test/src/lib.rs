//! Shared helpers for gcdisc integration tests: logging setup and a builder for
//! a small synthetic disc image with a known layout.

use gcdisc::common::{ByteStream, MemoryStream};
use gcdisc::disc::{archive, IsoArchive};
use simplelog::{Color, ColorChoice, ConfigBuilder, Level, LevelFilter, TermLogger, TerminalMode};
use std::sync::Once;
use time::macros::format_description;

/// Total size of the synthetic image.
pub const IMAGE_SIZE: u64 = 0x5000;
/// Size of the system region (through the end of the FST, sector-aligned).
pub const SYSTEM_SIZE: u64 = 0x3000;

pub const APPLOADER_OFFSET: u64 = 0x2440;
pub const APPLOADER_SIZE: u64 = 0x1c0;
pub const DOL_OFFSET: u64 = 0x2600;
pub const DOL_SIZE: u64 = 0x160;
pub const FST_OFFSET: u64 = 0x2800;
pub const FST_SIZE: u64 = 0x5e;

pub const ALPHA_OFFSET: u64 = 0x3000;
pub const ALPHA_SIZE: u64 = 0x800;
pub const BETA_OFFSET: u64 = 0x3800;
pub const BETA_SIZE: u64 = 0x123;
pub const GAMMA_OFFSET: u64 = 0x4800;
pub const GAMMA_SIZE: u64 = 0x400;

pub const ALPHA_SEED: u8 = 0x11;
pub const BETA_SEED: u8 = 0x22;
pub const GAMMA_SEED: u8 = 0x33;

static INIT_LOGGING: Once = Once::new();

/// Configures logging at the beginning of a test.
pub fn init_logging() {
    INIT_LOGGING.call_once(|| {
        let config = ConfigBuilder::new()
            .set_level_color(Level::Info, Some(Color::Green))
            .set_time_format_custom(format_description!(
                "[hour]:[minute]:[second].[subsecond digits:3]"
            ))
            .build();
        TermLogger::init(LevelFilter::Debug, config, TerminalMode::Stderr, ColorChoice::Auto)
            .unwrap();
    });
}

/// Generates `len` deterministic non-trivial bytes from `seed`.
pub fn pattern(seed: u8, len: usize) -> Vec<u8> {
    (0..len).map(|i| seed.wrapping_add(i as u8).wrapping_mul(31)).collect()
}

fn put_fst_file(fst: &mut MemoryStream, index: u64, name_offset: u32, offset: u32, size: u32) {
    let base = index * 12;
    fst.put_u32_be(base, name_offset).unwrap();
    fst.put_u32_be(base + 4, offset).unwrap();
    fst.put_u32_be(base + 8, size).unwrap();
}

fn put_fst_dir(fst: &mut MemoryStream, index: u64, name_offset: u32, parent: u32, next: u32) {
    let base = index * 12;
    fst.put_u32_be(base, (1 << 24) | name_offset).unwrap();
    fst.put_u32_be(base + 4, parent).unwrap();
    fst.put_u32_be(base + 8, next).unwrap();
}

/// Builds a synthetic disc image:
///
/// ```text
/// 0x0000  disc header           0x3000  alpha.bin  (0x800 bytes)
/// 0x0440  header information    0x3800  beta.bin   (0x123 bytes, in data/)
/// 0x2440  apploader             0x4800  gamma.bin  (0x400 bytes, after a gap)
/// 0x2600  main.dol
/// 0x2800  fst.bin
/// ```
pub fn build_test_image() -> MemoryStream {
    let mut image = MemoryStream::with_size(IMAGE_SIZE);

    // Disc header
    image.put(0, b"GTEST8").unwrap();
    image.put(0x20, b"Test Game\0").unwrap();
    image.put_u32_be(0x420, DOL_OFFSET as u32).unwrap();
    image.put_u32_be(0x424, FST_OFFSET as u32).unwrap();
    image.put_u32_be(0x428, FST_SIZE as u32).unwrap();
    image.put_u32_be(0x42c, 0x1000).unwrap();

    // Header information and apploader
    image.put(0x440, &pattern(0x2c, 0x2000)).unwrap();
    image.put(APPLOADER_OFFSET, &pattern(0xa0, APPLOADER_SIZE as usize)).unwrap();

    // DOL: one text section and one data section directly after the header
    image.put_u32_be(DOL_OFFSET, 0x100).unwrap();
    image.put_u32_be(DOL_OFFSET + 0x48, 0x8000_3100).unwrap();
    image.put_u32_be(DOL_OFFSET + 0x90, 0x40).unwrap();
    image.put_u32_be(DOL_OFFSET + 0x1c, 0x140).unwrap();
    image.put_u32_be(DOL_OFFSET + 0x64, 0x8000_4000).unwrap();
    image.put_u32_be(DOL_OFFSET + 0xac, 0x20).unwrap();
    image.put_u32_be(DOL_OFFSET + 0xd8, 0x8000_5000).unwrap();
    image.put_u32_be(DOL_OFFSET + 0xdc, 0x1000).unwrap();
    image.put_u32_be(DOL_OFFSET + 0xe0, 0x8000_3100).unwrap();
    image.put(DOL_OFFSET + 0x100, &pattern(0x51, 0x40)).unwrap();
    image.put(DOL_OFFSET + 0x140, &pattern(0x71, 0x20)).unwrap();

    // FST:
    // /
    // ├── alpha.bin
    // ├── data/
    // │   └── beta.bin
    // └── gamma.bin
    let mut fst = MemoryStream::with_size(FST_SIZE);
    put_fst_dir(&mut fst, 0, 0, 0, 5);
    put_fst_file(&mut fst, 1, 0, ALPHA_OFFSET as u32, ALPHA_SIZE as u32);
    put_fst_dir(&mut fst, 2, 10, 0, 4);
    put_fst_file(&mut fst, 3, 15, BETA_OFFSET as u32, BETA_SIZE as u32);
    put_fst_file(&mut fst, 4, 24, GAMMA_OFFSET as u32, GAMMA_SIZE as u32);
    fst.put(60, b"alpha.bin\0data\0beta.bin\0gamma.bin\0").unwrap();
    assert_eq!(fst.size(), FST_SIZE);
    image.put(FST_OFFSET, fst.as_bytes()).unwrap();

    // File payloads
    image.put(ALPHA_OFFSET, &pattern(ALPHA_SEED, ALPHA_SIZE as usize)).unwrap();
    image.put(BETA_OFFSET, &pattern(BETA_SEED, BETA_SIZE as usize)).unwrap();
    image.put(GAMMA_OFFSET, &pattern(GAMMA_SEED, GAMMA_SIZE as usize)).unwrap();

    assert_eq!(image.size(), IMAGE_SIZE);
    image
}

/// Opens the synthetic image as an archive.
pub fn open_test_iso() -> archive::Result<IsoArchive<MemoryStream>> {
    IsoArchive::open(build_test_image())
}

/// Returns the offset of the first differing byte, or `None` if the slices are equal.
pub fn first_difference(a: &[u8], b: &[u8]) -> Option<usize> {
    if a.len() == b.len() {
        a.iter().zip(b).position(|(x, y)| x != y)
    } else {
        Some(a.iter().zip(b).position(|(x, y)| x != y).unwrap_or(a.len().min(b.len())))
    }
}

/// Asserts that two images are byte-identical, reporting the first difference.
pub fn assert_images_equal(expected: &[u8], actual: &[u8]) {
    if let Some(offset) = first_difference(expected, actual) {
        panic!(
            "images differ at {:#x} (sizes {:#x} / {:#x})",
            offset,
            expected.len(),
            actual.len()
        );
    }
}
