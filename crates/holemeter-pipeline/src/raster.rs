//! Raster image model.
//!
//! The pipeline accepts three pixel layouts: 8-bit grayscale, packed
//! RGB, and packed 1-bit monochrome with a two-entry palette. Gray and
//! RGB images reuse the `image` crate's buffers; monochrome images are
//! represented by [`MonoImage`], which keeps the bit packing explicit so
//! both MSB-first and LSB-first layouts can be decoded.
//!
//! Every processing step takes a `&Raster` and returns a new one.

use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};

use crate::types::Dimensions;

/// Pure black palette entry.
pub const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

/// Pure white palette entry.
pub const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

/// Perceptual gray level of an RGB color.
///
/// Uses the integer weighting `(11 R + 16 G + 5 B) / 32`, which maps
/// equal channels to themselves.
#[must_use]
pub fn gray_level(color: Rgb<u8>) -> u8 {
    let [r, g, b] = color.0;
    let weighted = u32::from(r) * 11 + u32::from(g) * 16 + u32::from(b) * 5;
    // The weights sum to 32, so the quotient never exceeds 255.
    #[allow(clippy::cast_possible_truncation)]
    let level = (weighted / 32) as u8;
    level
}

/// Physical bit order inside each byte of a packed monochrome row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BitOrder {
    /// Pixel `x` lives in bit `7 - (x & 7)` of byte `x >> 3`.
    #[default]
    MsbFirst,
    /// Pixel `x` lives in bit `x & 7` of byte `x >> 3`.
    LsbFirst,
}

/// Packed 1-bit-per-pixel image with a two-entry palette.
///
/// Rows are padded to whole bytes. The foreground ("white") index is 0
/// when palette entry 0 is white and 1 otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonoImage {
    width: u32,
    height: u32,
    bit_order: BitOrder,
    palette: [Rgb<u8>; 2],
    data: Vec<u8>,
}

impl MonoImage {
    /// Create an image with every pixel set to palette index 0.
    #[must_use]
    pub fn new(width: u32, height: u32, bit_order: BitOrder, palette: [Rgb<u8>; 2]) -> Self {
        let len = Self::stride_for(width) * height as usize;
        Self {
            width,
            height,
            bit_order,
            palette,
            data: vec![0; len],
        }
    }

    /// Wrap existing packed rows.
    ///
    /// Returns `None` if `data` is not exactly `ceil(width / 8) * height`
    /// bytes long.
    #[must_use]
    pub fn from_raw(
        width: u32,
        height: u32,
        bit_order: BitOrder,
        palette: [Rgb<u8>; 2],
        data: Vec<u8>,
    ) -> Option<Self> {
        (data.len() == Self::stride_for(width) * height as usize).then_some(Self {
            width,
            height,
            bit_order,
            palette,
            data,
        })
    }

    /// Build an image by evaluating `f` for every pixel; `true` selects
    /// palette index 1.
    #[must_use]
    pub fn from_fn(
        width: u32,
        height: u32,
        bit_order: BitOrder,
        palette: [Rgb<u8>; 2],
        f: impl Fn(u32, u32) -> bool,
    ) -> Self {
        let mut image = Self::new(width, height, bit_order, palette);
        for y in 0..height {
            for x in 0..width {
                if f(x, y) {
                    image.put_index(x, y, 1);
                }
            }
        }
        image
    }

    const fn stride_for(width: u32) -> usize {
        (width as usize).div_ceil(8)
    }

    /// Image width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Image height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Bytes per packed row.
    #[must_use]
    pub const fn stride(&self) -> usize {
        Self::stride_for(self.width)
    }

    /// Bit layout of the packed rows.
    #[must_use]
    pub const fn bit_order(&self) -> BitOrder {
        self.bit_order
    }

    /// The two palette entries.
    #[must_use]
    pub const fn palette(&self) -> [Rgb<u8>; 2] {
        self.palette
    }

    /// Palette index that marks foreground pixels.
    #[must_use]
    pub fn foreground_index(&self) -> u8 {
        u8::from(self.palette[0] != WHITE)
    }

    /// Raw packed bytes, row-major.
    #[must_use]
    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }

    /// Packed bytes of row `y`.
    #[must_use]
    pub fn scanline(&self, y: u32) -> &[u8] {
        let stride = self.stride();
        let start = y as usize * stride;
        &self.data[start..start + stride]
    }

    fn bit_position(&self, x: u32, y: u32) -> (usize, u32) {
        let byte = y as usize * self.stride() + (x >> 3) as usize;
        let bit = match self.bit_order {
            BitOrder::MsbFirst => 7 - (x & 7),
            BitOrder::LsbFirst => x & 7,
        };
        (byte, bit)
    }

    /// Palette index (0 or 1) of the pixel at `(x, y)`.
    #[must_use]
    pub fn index_at(&self, x: u32, y: u32) -> u8 {
        let (byte, bit) = self.bit_position(x, y);
        (self.data[byte] >> bit) & 1
    }

    /// Set the palette index of the pixel at `(x, y)`. Any non-zero
    /// `index` is treated as 1.
    pub fn put_index(&mut self, x: u32, y: u32, index: u8) {
        let (byte, bit) = self.bit_position(x, y);
        if index == 0 {
            self.data[byte] &= !(1 << bit);
        } else {
            self.data[byte] |= 1 << bit;
        }
    }

    /// Palette color of the pixel at `(x, y)`.
    #[must_use]
    pub fn color_at(&self, x: u32, y: u32) -> Rgb<u8> {
        self.palette[usize::from(self.index_at(x, y))]
    }

    /// Whether the pixel at `(x, y)` is a foreground pixel.
    #[must_use]
    pub fn is_foreground(&self, x: u32, y: u32) -> bool {
        self.index_at(x, y) == self.foreground_index()
    }

    /// Palette index whose gray level is closest to `level`.
    ///
    /// Ties resolve to index 0.
    #[must_use]
    pub fn nearest_index(&self, level: u8) -> u8 {
        let d0 = level.abs_diff(gray_level(self.palette[0]));
        let d1 = level.abs_diff(gray_level(self.palette[1]));
        u8::from(d1 < d0)
    }
}

/// An image in one of the supported pixel layouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Raster {
    /// 8-bit grayscale.
    Gray(GrayImage),
    /// Packed 8-bit RGB.
    Rgb(RgbImage),
    /// Packed 1-bit monochrome with a palette.
    Mono(MonoImage),
}

impl Raster {
    /// Image width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        match self {
            Self::Gray(img) => img.width(),
            Self::Rgb(img) => img.width(),
            Self::Mono(img) => img.width(),
        }
    }

    /// Image height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        match self {
            Self::Gray(img) => img.height(),
            Self::Rgb(img) => img.height(),
            Self::Mono(img) => img.height(),
        }
    }

    /// Width and height.
    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        Dimensions {
            width: self.width(),
            height: self.height(),
        }
    }

    /// Whether the image stores a single gray channel.
    #[must_use]
    pub const fn is_grayscale(&self) -> bool {
        matches!(self, Self::Gray(_))
    }

    /// Whether `(x, y)` lies inside the image.
    #[must_use]
    pub fn contains(&self, x: i64, y: i64) -> bool {
        (0..i64::from(self.width())).contains(&x) && (0..i64::from(self.height())).contains(&y)
    }

    /// Color of the pixel at `(x, y)`. Gray pixels expand to equal
    /// channels; mono pixels resolve through the palette.
    #[must_use]
    pub fn rgb_at(&self, x: u32, y: u32) -> Rgb<u8> {
        match self {
            Self::Gray(img) => {
                let v = img.get_pixel(x, y).0[0];
                Rgb([v, v, v])
            }
            Self::Rgb(img) => *img.get_pixel(x, y),
            Self::Mono(img) => img.color_at(x, y),
        }
    }

    /// Gray level of the pixel at `(x, y)`.
    #[must_use]
    pub fn gray_at(&self, x: u32, y: u32) -> u8 {
        match self {
            Self::Gray(img) => img.get_pixel(x, y).0[0],
            _ => gray_level(self.rgb_at(x, y)),
        }
    }

    /// Expand to an RGB image.
    #[must_use]
    pub fn to_rgb_image(&self) -> RgbImage {
        match self {
            Self::Rgb(img) => img.clone(),
            _ => RgbImage::from_fn(self.width(), self.height(), |x, y| self.rgb_at(x, y)),
        }
    }
}

impl From<GrayImage> for Raster {
    fn from(image: GrayImage) -> Self {
        Self::Gray(image)
    }
}

impl From<RgbImage> for Raster {
    fn from(image: RgbImage) -> Self {
        Self::Rgb(image)
    }
}

impl From<MonoImage> for Raster {
    fn from(image: MonoImage) -> Self {
        Self::Mono(image)
    }
}

impl From<&DynamicImage> for Raster {
    /// Single-channel 8-bit images stay grayscale; everything else is
    /// flattened to RGB (alpha is dropped).
    fn from(image: &DynamicImage) -> Self {
        match image {
            DynamicImage::ImageLuma8(gray) => Self::Gray(gray.clone()),
            other => Self::Rgb(other.to_rgb8()),
        }
    }
}

/// Full-precision working copy of a raster: one channel for gray
/// images, three for RGB and mono.
///
/// Filters read and write this interleaved buffer and convert back to
/// the input's layout with [`Planes::into_raster`].
#[derive(Debug, Clone)]
pub(crate) struct Planes {
    pub width: u32,
    pub height: u32,
    pub channels: usize,
    pub data: Vec<u8>,
}

impl Planes {
    pub fn zeroed(width: u32, height: u32, channels: usize) -> Self {
        Self {
            width,
            height,
            channels,
            data: vec![0; width as usize * height as usize * channels],
        }
    }

    pub fn from_raster(raster: &Raster) -> Self {
        match raster {
            Raster::Gray(img) => Self {
                width: img.width(),
                height: img.height(),
                channels: 1,
                data: img.as_raw().clone(),
            },
            Raster::Rgb(img) => Self {
                width: img.width(),
                height: img.height(),
                channels: 3,
                data: img.as_raw().clone(),
            },
            Raster::Mono(img) => {
                let mut planes = Self::zeroed(img.width(), img.height(), 3);
                for y in 0..img.height() {
                    for x in 0..img.width() {
                        planes.pixel_mut(x, y).copy_from_slice(&img.color_at(x, y).0);
                    }
                }
                planes
            }
        }
    }

    pub fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * self.channels
    }

    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let start = self.offset(x, y);
        &self.data[start..start + self.channels]
    }

    pub fn pixel_mut(&mut self, x: u32, y: u32) -> &mut [u8] {
        let start = self.offset(x, y);
        let channels = self.channels;
        &mut self.data[start..start + channels]
    }

    pub fn gray(&self, x: u32, y: u32) -> u8 {
        match *self.pixel(x, y) {
            [v] => v,
            [r, g, b] => gray_level(Rgb([r, g, b])),
            _ => 0,
        }
    }

    /// Gray level of every pixel, row-major.
    pub fn grays(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.width as usize * self.height as usize);
        for y in 0..self.height {
            for x in 0..self.width {
                out.push(self.gray(x, y));
            }
        }
        out
    }

    /// Convert back into the pixel layout of `like`.
    ///
    /// Mono targets keep `like`'s palette and bit order; each pixel picks
    /// the palette entry whose gray level is nearest.
    pub fn into_raster(self, like: &Raster) -> Raster {
        match like {
            Raster::Gray(_) if self.channels == 1 => {
                GrayImage::from_raw(self.width, self.height, self.data)
                    .map_or_else(|| Raster::Gray(GrayImage::new(0, 0)), Raster::Gray)
            }
            Raster::Gray(_) => Raster::Gray(GrayImage::from_fn(self.width, self.height, |x, y| {
                Luma([self.gray(x, y)])
            })),
            Raster::Rgb(_) if self.channels == 3 => {
                RgbImage::from_raw(self.width, self.height, self.data)
                    .map_or_else(|| Raster::Rgb(RgbImage::new(0, 0)), Raster::Rgb)
            }
            Raster::Rgb(_) => Raster::Rgb(RgbImage::from_fn(self.width, self.height, |x, y| {
                let v = self.gray(x, y);
                Rgb([v, v, v])
            })),
            Raster::Mono(template) => Raster::Mono(self.into_mono(template)),
        }
    }

    /// Convert into a monochrome image with `like`'s palette and bit
    /// order; each pixel picks the palette entry whose gray level is
    /// nearest.
    pub fn into_mono(self, like: &MonoImage) -> MonoImage {
        let mut out = MonoImage::new(self.width, self.height, like.bit_order(), like.palette());
        for y in 0..self.height {
            for x in 0..self.width {
                out.put_index(x, y, like.nearest_index(self.gray(x, y)));
            }
        }
        out
    }
}
