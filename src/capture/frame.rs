use std::fmt;
use std::sync::Arc;

use memmap2::MmapMut;
use serde::{Deserialize, Serialize};

use crate::capture::allocator::BufferLedger;
use crate::utils::{align_up, checked_align_up};

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// 8-bit R, G, B, A in that byte order.
    Rgba32,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Rgba32 => 4,
        }
    }
}

/// Geometry of a decoded frame as the decoder lays it out in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    pub width: u32,
    pub height: u32,
    /// Bytes per row, padding included.
    pub stride: u32,
    /// Rows in the buffer, padding included.
    pub lines: u32,
    pub format: PixelFormat,
}

impl FrameLayout {
    /// RGBA layout with stride and line count rounded up to `alignment`.
    ///
    /// # Panics
    ///
    /// When the padded geometry does not fit in `u32`. Use
    /// [`checked_aligned`](Self::checked_aligned) for untrusted sizes.
    pub fn aligned(width: u32, height: u32, alignment: u32) -> Self {
        let format = PixelFormat::Rgba32;
        Self {
            width,
            height,
            stride: align_up(width * format.bytes_per_pixel(), alignment),
            lines: align_up(height, alignment),
            format,
        }
    }

    /// Like [`aligned`](Self::aligned), `None` when the stride, line count or
    /// region size overflows.
    pub fn checked_aligned(width: u32, height: u32, alignment: u32) -> Option<Self> {
        let format = PixelFormat::Rgba32;
        let stride = checked_align_up(width.checked_mul(format.bytes_per_pixel())?, alignment)?;
        let lines = checked_align_up(height, alignment)?;
        (stride as usize).checked_mul(lines as usize)?;

        Some(Self {
            width,
            height,
            stride,
            lines,
            format,
        })
    }

    /// Bytes of visible pixels in one row.
    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel() as usize
    }

    /// Size of the whole region the decoder writes into.
    pub fn byte_len(&self) -> usize {
        self.stride as usize * self.lines as usize
    }
}

/// Borrowed RGBA pixels with an explicit row stride.
#[derive(Clone, Copy)]
pub struct RgbaView<'a> {
    width: u32,
    height: u32,
    stride: usize,
    data: &'a [u8],
}

impl<'a> RgbaView<'a> {
    /// Returns `None` when `data` is too short for the described rows.
    pub fn new(width: u32, height: u32, stride: usize, data: &'a [u8]) -> Option<Self> {
        let row_bytes = width as usize * 4;
        if stride < row_bytes {
            return None;
        }
        let needed = match height {
            0 => 0,
            h => stride * (h as usize - 1) + row_bytes,
        };
        if data.len() < needed {
            return None;
        }

        Some(Self {
            width,
            height,
            stride,
            data,
        })
    }

    pub(crate) fn from_parts(width: u32, height: u32, stride: usize, data: &'a [u8]) -> Self {
        Self {
            width,
            height,
            stride,
            data,
        }
    }

    /// Tightly packed pixels, `width * 4` bytes per row.
    pub fn packed(width: u32, height: u32, data: &'a [u8]) -> Option<Self> {
        Self::new(width, height, width as usize * 4, data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Visible pixels of row `y`, padding excluded.
    pub fn row(&self, y: u32) -> &'a [u8] {
        let start = y as usize * self.stride;
        &self.data[start..start + self.width as usize * 4]
    }

    pub fn rows(&self) -> impl Iterator<Item = &'a [u8]> + '_ {
        (0..self.height).map(move |y| self.row(y))
    }
}

impl fmt::Debug for RgbaView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RgbaView")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .finish()
    }
}

/// One decoded frame in an anonymous memory map.
///
/// A frame has exactly one owner at a time: the frame sink while the decoder
/// writes, the handoff queue while in transit, the analysis loop while it is
/// compared. Dropping it unmaps the region and records the release on the
/// session ledger.
pub struct FrameBuffer {
    region: MmapMut,
    layout: FrameLayout,
    sequence: u64,
    ledger: Arc<BufferLedger>,
}

impl FrameBuffer {
    pub(crate) fn new(
        region: MmapMut,
        layout: FrameLayout,
        sequence: u64,
        ledger: Arc<BufferLedger>,
    ) -> Self {
        Self {
            region,
            layout,
            sequence,
            ledger,
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn layout(&self) -> FrameLayout {
        self.layout
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.region[..]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.region[..]
    }

    pub fn view(&self) -> RgbaView<'_> {
        RgbaView::from_parts(
            self.layout.width,
            self.layout.height,
            self.layout.stride as usize,
            &self.region[..],
        )
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        self.ledger.record_release();
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("sequence", &self.sequence)
            .field("layout", &self.layout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_skips_row_padding() {
        // 2x2 pixels, 12-byte stride
        let mut data = vec![0xEEu8; 12 * 2];
        data[..8].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        data[12..20].copy_from_slice(&[9, 10, 11, 12, 13, 14, 15, 16]);

        let view = RgbaView::new(2, 2, 12, &data).unwrap();
        assert_eq!(view.row(0), &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(view.row(1), &[9, 10, 11, 12, 13, 14, 15, 16]);
        assert_eq!(view.rows().count(), 2);
    }

    #[test]
    fn view_rejects_short_data() {
        assert!(RgbaView::new(2, 2, 12, &[0u8; 19]).is_none());
        assert!(RgbaView::new(2, 2, 12, &[0u8; 20]).is_some());
        assert!(RgbaView::new(4, 1, 8, &[0u8; 64]).is_none());
        assert!(RgbaView::packed(3, 3, &[0u8; 36]).is_some());
    }

    #[test]
    fn checked_layout_rejects_overflowing_geometry() {
        assert_eq!(
            FrameLayout::checked_aligned(720, 480, 32),
            Some(FrameLayout::aligned(720, 480, 32))
        );
        assert!(FrameLayout::checked_aligned(1 << 30, 1, 32).is_none());
        assert!(FrameLayout::checked_aligned(1, u32::MAX, 32).is_none());
    }

    #[test]
    fn aligned_layout_pads_stride_and_lines() {
        let layout = FrameLayout::aligned(30, 20, 32);
        assert_eq!(layout.stride, 128);
        assert_eq!(layout.lines, 32);
        assert_eq!(layout.row_bytes(), 120);
        assert_eq!(layout.byte_len(), 128 * 32);
    }
}
