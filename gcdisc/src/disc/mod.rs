pub mod archive;
pub mod dol;
pub mod fst;
pub mod header;

pub use archive::IsoArchive;
pub use dol::Dol;
pub use fst::{DirData, DiscRegion, Entry, EntryKind, FileData, Fst};
pub use header::{Apploader, DiscHeader, HeaderInformation};

/// Disc sector alignment: file data and region sizes are padded to 2048-byte boundaries.
pub const DISC_ALIGN: u64 = 2048;

/// Total size of a standard GameCube disc image.
pub const GC_DISC_MAX_SIZE: u64 = 1_459_978_240;
