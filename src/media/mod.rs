//! Enclosure media handling.

mod compressor;
mod normalizer;

pub use self::compressor::{compressor_from_settings, Cjpegli, ImageCompressor, Mozjpeg};
pub use self::normalizer::{MediaNormalizer, NormalizedMedia, JPEG_MEDIA_TYPE, MAX_EMBED_BYTES};
