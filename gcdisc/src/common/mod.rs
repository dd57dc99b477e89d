mod mapped;
mod math;

pub mod stream;

pub use mapped::MappedStream;
pub use math::*;
pub use stream::{ByteStream, MemoryStream};
