//! Pluggable byte codec for compressed tile layers.

use std::io::Result as IoResult;

/// Compression interface; implementations can be swapped without touching
/// the tile-cache logic.
pub trait TileCodec {
    /// Compresses a buffer.
    fn compress(&self, data: &[u8]) -> IoResult<Vec<u8>>;

    /// Decompresses a buffer produced by [`TileCodec::compress`].
    fn decompress(&self, data: &[u8]) -> IoResult<Vec<u8>>;
}

/// Default LZ4 codec.
pub struct Lz4Codec;

impl TileCodec for Lz4Codec {
    fn compress(&self, data: &[u8]) -> IoResult<Vec<u8>> {
        Ok(lz4_flex::compress_prepend_size(data))
    }

    fn decompress(&self, data: &[u8]) -> IoResult<Vec<u8>> {
        lz4_flex::decompress_size_prepended(data)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

/// Pass-through codec, useful for debugging layer payloads.
pub struct NullCodec;

impl TileCodec for NullCodec {
    fn compress(&self, data: &[u8]) -> IoResult<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> IoResult<Vec<u8>> {
        Ok(data.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lz4_round_trip() {
        let codec = Lz4Codec;
        let data: Vec<u8> = (0..1024u32).map(|i| (i % 7) as u8).collect();
        let packed = codec.compress(&data).unwrap();
        assert!(packed.len() < data.len());
        assert_eq!(codec.decompress(&packed).unwrap(), data);
    }

    #[test]
    fn test_null_codec_round_trip() {
        let codec = NullCodec;
        let data = vec![1u8, 2, 3];
        assert_eq!(codec.decompress(&codec.compress(&data).unwrap()).unwrap(), data);
    }

    #[test]
    fn test_lz4_rejects_garbage() {
        let codec = Lz4Codec;
        assert!(codec.decompress(&[0xff, 0xff, 0xff]).is_err());
    }
}
