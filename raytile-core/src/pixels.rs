//! RGBA pixel blocks and the base64 helpers used for binary payloads on the wire.

use serde::{Deserialize, Serialize};

pub const BYTES_PER_PIXEL: usize = 4;

/// Serde adapter encoding `Vec<u8>` as a base64 string.
pub mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Row-major RGBA8 pixels for one tile.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelBlock {
    pub width: u32,
    pub height: u32,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl PixelBlock {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data,
        }
    }

    /// Fully transparent block of the given size.
    pub fn blank(width: u32, height: u32) -> Self {
        let len = width as usize * height as usize * BYTES_PER_PIXEL;
        Self::new(width, height, vec![0; len])
    }

    /// True when the byte length matches the declared dimensions.
    pub fn is_well_formed(&self) -> bool {
        self.data.len() == self.width as usize * self.height as usize * BYTES_PER_PIXEL
    }

    /// RGBA value at a tile-local coordinate.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL;
        let px = self.data.get(offset..offset + BYTES_PER_PIXEL)?;
        Some([px[0], px[1], px[2], px[3]])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_block_is_well_formed() {
        let block = PixelBlock::blank(3, 2);
        assert_eq!(block.data.len(), 24);
        assert!(block.is_well_formed());
    }

    #[test]
    fn truncated_block_is_not_well_formed() {
        let block = PixelBlock::new(2, 2, vec![0; 15]);
        assert!(!block.is_well_formed());
    }

    #[test]
    fn pixel_lookup_is_row_major() {
        let mut data = vec![0; 2 * 2 * 4];
        data[(2 + 1) * 4..(2 + 1) * 4 + 4].copy_from_slice(&[1, 2, 3, 4]);
        let block = PixelBlock::new(2, 2, data);
        assert_eq!(block.pixel(1, 1), Some([1, 2, 3, 4]));
        assert_eq!(block.pixel(2, 0), None);
    }

    #[test]
    fn pixel_data_is_base64_in_json() {
        let block = PixelBlock::new(1, 1, vec![255, 0, 0, 255]);
        let json = serde_json::to_string(&block).unwrap();
        assert!(json.contains(r#""data":"/wAA/w==""#), "{json}");
        let parsed: PixelBlock = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, block);
    }
}
