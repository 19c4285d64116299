pub mod color;
pub mod ota;
pub mod primitives;

pub use ota::{format_version, parse_version, validate, OtaFrameKind};
pub use primitives::{CodecError, ZclReader, ZclWriter};
