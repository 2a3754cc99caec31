//! PNG container I/O.
//!
//! The quantization pipeline only needs "bytes → [`PixelBuffer`]" and
//! "[`IndexedImage`] → bytes"; [`ImageCodec`] is that seam, and [`PngCodec`]
//! implements it with the `png` crate.

use std::io::Cursor;

use crate::error::{Result, ShrinkError};
use crate::indexed::IndexedImage;
use crate::pixels::{ColorModel, PixelBuffer};

/// The eight bytes every PNG file starts with.
pub const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

/// Reject anything that does not start with [`PNG_SIGNATURE`].
pub fn check_signature(bytes: &[u8]) -> Result<()> {
    if bytes.len() >= PNG_SIGNATURE.len() && bytes[..PNG_SIGNATURE.len()] == PNG_SIGNATURE {
        Ok(())
    } else {
        Err(ShrinkError::NotAPng)
    }
}

/// Decode/encode capability used by the [`Compressor`](crate::Compressor).
pub trait ImageCodec: Send + Sync {
    /// Decode container bytes into a pixel buffer in the source's color model.
    fn decode(&self, bytes: &[u8]) -> Result<PixelBuffer>;

    /// Encode a palette-mapped image.
    fn encode(&self, image: &IndexedImage) -> Result<Vec<u8>>;

    /// Encode a pixel buffer losslessly in its own color model.
    fn encode_pixels(&self, buffer: &PixelBuffer) -> Result<Vec<u8>>;
}

/// [`ImageCodec`] backed by the `png` crate.
#[derive(Debug, Clone, Copy)]
pub struct PngCodec {
    compression: png::Compression,
}

impl Default for PngCodec {
    fn default() -> Self {
        Self {
            compression: png::Compression::Best,
        }
    }
}

impl PngCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compression(mut self, compression: png::Compression) -> Self {
        self.compression = compression;
        self
    }

    fn write(
        &self,
        width: usize,
        height: usize,
        color: png::ColorType,
        depth: png::BitDepth,
        palette: Option<(Vec<u8>, Option<Vec<u8>>)>,
        data: &[u8],
    ) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut out, width as u32, height as u32);
            encoder.set_color(color);
            encoder.set_depth(depth);
            encoder.set_compression(self.compression);
            if let Some((plte, trns)) = palette {
                encoder.set_palette(plte);
                if let Some(trns) = trns {
                    encoder.set_trns(trns);
                }
                // Palette indices rarely benefit from prediction.
                encoder.set_filter(png::FilterType::NoFilter);
                encoder.set_adaptive_filter(png::AdaptiveFilterType::NonAdaptive);
            } else {
                encoder.set_adaptive_filter(png::AdaptiveFilterType::Adaptive);
            }
            let mut writer = encoder.write_header().map_err(encode_err)?;
            writer.write_image_data(data).map_err(encode_err)?;
            writer.finish().map_err(encode_err)?;
        }
        Ok(out)
    }

    fn write_indexed(
        &self,
        width: usize,
        height: usize,
        plte: Vec<u8>,
        trns: Option<Vec<u8>>,
        indices: &[u8],
    ) -> Result<Vec<u8>> {
        let depth = palette_bit_depth(plte.len() / 3);
        let packed = pack_rows(indices, width, depth);
        self.write(
            width,
            height,
            png::ColorType::Indexed,
            bit_depth(depth),
            Some((plte, trns)),
            &packed,
        )
    }
}

impl ImageCodec for PngCodec {
    fn decode(&self, bytes: &[u8]) -> Result<PixelBuffer> {
        let header = png::Decoder::new(Cursor::new(bytes))
            .read_info()
            .map_err(decode_err)?;
        let indexed = header.info().color_type == png::ColorType::Indexed;

        let mut decoder = png::Decoder::new(Cursor::new(bytes));
        decoder.set_transformations(if indexed {
            png::Transformations::IDENTITY
        } else {
            png::Transformations::EXPAND | png::Transformations::STRIP_16
        });
        let mut reader = decoder.read_info().map_err(decode_err)?;
        let mut buf = vec![0u8; reader.output_buffer_size()];
        let frame = reader.next_frame(&mut buf).map_err(decode_err)?;
        buf.truncate(frame.buffer_size());
        let (width, height) = (frame.width as usize, frame.height as usize);

        if indexed {
            let info = reader.info();
            let plte = info
                .palette
                .as_deref()
                .ok_or_else(|| ShrinkError::Decode("indexed image without PLTE".into()))?;
            let trns = info.trns.as_deref().unwrap_or(&[]);
            let palette = plte
                .chunks_exact(3)
                .enumerate()
                .map(|(i, c)| rgb::RGBA8::new(c[0], c[1], c[2], trns.get(i).copied().unwrap_or(255)))
                .collect();
            let depth = frame.bit_depth as u8;
            let indices = unpack_rows(&buf, width, height, frame.line_size, depth);
            return PixelBuffer::indexed(width, height, indices, palette);
        }

        if frame.bit_depth != png::BitDepth::Eight {
            return Err(ShrinkError::UnsupportedColorModel(format!(
                "{:?} at {} bits",
                frame.color_type, frame.bit_depth as u8
            )));
        }
        PixelBuffer::new(width, height, ColorModel::from_png(frame.color_type), buf)
    }

    /// Writes an indexed PNG at the smallest bit depth that holds the used
    /// entries. Per-pixel alpha is folded into a tRNS palette when the
    /// distinct (index, alpha) pairs fit in 256 entries; otherwise the image
    /// is written as RGBA with the quantized colors.
    fn encode(&self, image: &IndexedImage) -> Result<Vec<u8>> {
        let (width, height) = (image.width(), image.height());
        let Some(alpha) = image.alpha() else {
            let used = image.used_len();
            let plte = flatten(&image.palette().entries()[..used]);
            return self.write_indexed(width, height, plte, None, image.indices());
        };

        match fold_alpha(image.palette().entries(), image.indices(), alpha) {
            Some((plte, trns, indices)) => self.write_indexed(width, height, plte, trns, &indices),
            None => {
                let samples: Vec<u8> = image
                    .to_rgba()
                    .iter()
                    .flat_map(|p| [p.r, p.g, p.b, p.a])
                    .collect();
                self.write(
                    width,
                    height,
                    png::ColorType::Rgba,
                    png::BitDepth::Eight,
                    None,
                    &samples,
                )
            }
        }
    }

    fn encode_pixels(&self, buffer: &PixelBuffer) -> Result<Vec<u8>> {
        let (width, height) = (buffer.width(), buffer.height());
        let color = match buffer.model() {
            ColorModel::Rgb => png::ColorType::Rgb,
            ColorModel::Rgba => png::ColorType::Rgba,
            ColorModel::Grayscale => png::ColorType::Grayscale,
            ColorModel::GrayscaleAlpha => png::ColorType::GrayscaleAlpha,
            ColorModel::Indexed => {
                let palette = buffer.palette().unwrap_or(&[]);
                let plte = palette.iter().flat_map(|c| [c.r, c.g, c.b]).collect();
                let last_translucent = palette.iter().rposition(|c| c.a < 255);
                let trns = last_translucent.map(|n| palette[..=n].iter().map(|c| c.a).collect());
                return self.write_indexed(width, height, plte, trns, buffer.samples());
            }
        };
        self.write(
            width,
            height,
            color,
            png::BitDepth::Eight,
            None,
            buffer.samples(),
        )
    }
}

fn decode_err(e: png::DecodingError) -> ShrinkError {
    ShrinkError::Decode(e.to_string())
}

fn encode_err(e: png::EncodingError) -> ShrinkError {
    ShrinkError::Encode(e.to_string())
}

fn flatten(colors: &[rgb::RGB8]) -> Vec<u8> {
    colors.iter().flat_map(|c| [c.r, c.g, c.b]).collect()
}

type FoldedPalette = (Vec<u8>, Option<Vec<u8>>, Vec<u8>);

/// Merge palette indices and per-pixel alpha into one RGBA palette.
///
/// All fully transparent pixels share one entry. Translucent entries are
/// placed first so the tRNS chunk can stop at the last of them. Returns
/// `None` when more than 256 combinations occur.
fn fold_alpha(entries: &[rgb::RGB8], indices: &[u8], alpha: &[u8]) -> Option<FoldedPalette> {
    let mut slot = vec![u16::MAX; 256 * 256];
    let mut combos: Vec<(rgb::RGB8, u8)> = Vec::new();
    let mut folded = Vec::with_capacity(indices.len());

    for (&idx, &a) in indices.iter().zip(alpha) {
        let (idx, a) = if a == 0 { (0, 0) } else { (idx, a) };
        let key = (idx as usize) << 8 | a as usize;
        if slot[key] == u16::MAX {
            if combos.len() == 256 {
                return None;
            }
            slot[key] = combos.len() as u16;
            combos.push((entries[idx as usize], a));
        }
        folded.push(slot[key]);
    }

    let mut order: Vec<usize> = (0..combos.len()).collect();
    order.sort_by_key(|&i| combos[i].1 == 255);
    let mut remap = vec![0u8; combos.len()];
    for (new, &old) in order.iter().enumerate() {
        remap[old] = new as u8;
    }

    let plte = order.iter().flat_map(|&i| {
        let c = combos[i].0;
        [c.r, c.g, c.b]
    });
    let translucent = combos.iter().filter(|c| c.1 < 255).count();
    let trns = (translucent > 0).then(|| order[..translucent].iter().map(|&i| combos[i].1).collect());
    let indices = folded.into_iter().map(|i| remap[i as usize]).collect();
    Some((plte.collect(), trns, indices))
}

/// Smallest PNG bit depth that can address `len` palette entries.
pub fn palette_bit_depth(len: usize) -> u8 {
    match len {
        0..=2 => 1,
        3..=4 => 2,
        5..=16 => 4,
        _ => 8,
    }
}

fn bit_depth(depth: u8) -> png::BitDepth {
    match depth {
        1 => png::BitDepth::One,
        2 => png::BitDepth::Two,
        4 => png::BitDepth::Four,
        _ => png::BitDepth::Eight,
    }
}

/// Pack one index per pixel into `depth`-bit samples, each row byte-aligned.
pub fn pack_rows(indices: &[u8], width: usize, depth: u8) -> Vec<u8> {
    if depth == 8 {
        return indices.to_vec();
    }
    let bits = depth as usize;
    let mask = (1u8 << depth) - 1;
    let row_bytes = (width * bits).div_ceil(8);
    let mut out = Vec::with_capacity(row_bytes * indices.len().div_ceil(width));
    for row in indices.chunks(width) {
        let mut acc = 0u8;
        let mut filled = 0;
        for &v in row {
            acc = (acc << bits) | (v & mask);
            filled += bits;
            if filled == 8 {
                out.push(acc);
                acc = 0;
                filled = 0;
            }
        }
        if filled > 0 {
            out.push(acc << (8 - filled));
        }
    }
    out
}

/// Inverse of [`pack_rows`] for decoder output with `line_size` bytes per row.
fn unpack_rows(data: &[u8], width: usize, height: usize, line_size: usize, depth: u8) -> Vec<u8> {
    if depth == 8 {
        return data
            .chunks(line_size)
            .take(height)
            .flat_map(|row| row[..width].iter().copied())
            .collect();
    }
    let bits = depth as usize;
    let mask = (1u8 << depth) - 1;
    let mut out = Vec::with_capacity(width * height);
    for row in data.chunks(line_size).take(height) {
        for x in 0..width {
            let bit = x * bits;
            let shift = 8 - bits - bit % 8;
            out.push((row[bit / 8] >> shift) & mask);
        }
    }
    out
}
