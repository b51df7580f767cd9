//! Foreground pixel extraction from packed 1-bit images.

use crate::raster::{BitOrder, MonoImage};
use crate::types::GridPoint;

/// Positions of every foreground pixel, in row-major order.
///
/// Decodes the packed rows directly, honoring the image's bit order and
/// its palette's foreground index. Bytes with no foreground bit are
/// skipped whole.
#[must_use = "returns the foreground positions"]
pub fn foreground_positions(image: &MonoImage) -> Vec<GridPoint> {
    let fg = image.foreground_index();
    // With foreground index 0, a byte with every bit set holds no
    // foreground pixels; with index 1, a zero byte does.
    let empty_byte: u8 = if fg == 1 { 0x00 } else { 0xff };
    let mut points = Vec::new();

    for y in 0..image.height() {
        for (byte_index, &byte) in image.scanline(y).iter().enumerate() {
            if byte == empty_byte {
                continue;
            }
            let base = u32::try_from(byte_index * 8).unwrap_or(u32::MAX);
            for bit in 0..8_u32 {
                let x = base.saturating_add(bit);
                if x >= image.width() {
                    break;
                }
                let shift = match image.bit_order() {
                    BitOrder::MsbFirst => 7 - bit,
                    BitOrder::LsbFirst => bit,
                };
                if (byte >> shift) & 1 == fg {
                    points.push(GridPoint::new(x, y));
                }
            }
        }
    }
    points
}
