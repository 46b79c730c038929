//! Minimal PNG encoder for waveform captures.
//!
//! Writes 8-bit grayscale images with a single zlib-compressed IDAT chunk
//! (deflate via `miniz_oxide`). Logic traces are long runs of identical
//! pixels, so they compress to a small fraction of the raw size.

use crate::trace::{WaveTrace, LANES};

const SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

/// Encode a monochrome image as a grayscale PNG.
///
/// `pixels` is a flat row-major array of booleans (true = white, false = black).
pub fn encode_png_mono(width: u32, height: u32, pixels: &[bool]) -> Vec<u8> {
    let mut png = Vec::with_capacity(1024);
    png.extend_from_slice(&SIGNATURE);

    // IHDR: 8-bit grayscale
    let mut ihdr = Vec::with_capacity(13);
    ihdr.extend_from_slice(&width.to_be_bytes());
    ihdr.extend_from_slice(&height.to_be_bytes());
    ihdr.push(8); // bit depth
    ihdr.push(0); // color type: grayscale
    ihdr.push(0); ihdr.push(0); ihdr.push(0);
    write_chunk(&mut png, b"IHDR", &ihdr);

    // Build filtered data
    let row_bytes = width as usize + 1;
    let mut raw = Vec::with_capacity(row_bytes * height as usize);
    for y in 0..height as usize {
        raw.push(0); // filter: None
        for x in 0..width as usize {
            let lit = pixels.get(y * width as usize + x).copied().unwrap_or(false);
            raw.push(if lit { 255 } else { 0 });
        }
    }

    let zlib_data = miniz_oxide::deflate::compress_to_vec_zlib(&raw, 6);
    write_chunk(&mut png, b"IDAT", &zlib_data);
    write_chunk(&mut png, b"IEND", &[]);

    png
}

/// Render the newest `width` samples of a trace as a PNG.
pub fn encode_trace(trace: &WaveTrace, width: usize, lane_height: usize) -> Vec<u8> {
    let lane_height = lane_height.max(3);
    let pixels = trace.render(width, lane_height);
    encode_png_mono(width as u32, (LANES * lane_height) as u32, &pixels)
}

fn write_chunk(out: &mut Vec<u8>, chunk_type: &[u8; 4], data: &[u8]) {
    let len = data.len() as u32;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(chunk_type);
    out.extend_from_slice(data);
    // CRC over type + data
    let crc = crc32(&chunk_type[..], data);
    out.extend_from_slice(&crc.to_be_bytes());
}

// CRC-32 (PNG/zlib)
fn crc32(chunk_type: &[u8], data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFFFFFF;
    for &b in chunk_type.iter().chain(data.iter()) {
        crc ^= b as u32;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xEDB88320;
            } else {
                crc >>= 1;
            }
        }
    }
    crc ^ 0xFFFFFFFF
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc_iend() {
        // Well-known CRC of an empty IEND chunk
        assert_eq!(crc32(b"IEND", &[]), 0xAE42_6082);
    }

    #[test]
    fn test_image_data_inflates() {
        let pixels = [true, false, false, true];
        let png = encode_png_mono(2, 2, &pixels);
        assert_eq!(&png[..8], &SIGNATURE);
        assert_eq!(&png[12..16], b"IHDR");

        // IDAT follows the 25-byte IHDR chunk
        let idat_at = 8 + 25;
        let len = u32::from_be_bytes([png[idat_at], png[idat_at + 1], png[idat_at + 2], png[idat_at + 3]]) as usize;
        assert_eq!(&png[idat_at + 4..idat_at + 8], b"IDAT");
        let raw = miniz_oxide::inflate::decompress_to_vec_zlib(&png[idat_at + 8..idat_at + 8 + len]).unwrap();
        assert_eq!(raw, vec![0, 255, 0, 0, 0, 255]);
        assert!(png.ends_with(&[0xAE, 0x42, 0x60, 0x82]));
    }

    #[test]
    fn test_encode_trace_dimensions() {
        let mut t = WaveTrace::new(64, 1);
        t.push(0xFF, 0x00);
        let png = encode_trace(&t, 64, 4);
        assert_eq!(&png[16..20], &64u32.to_be_bytes());
        assert_eq!(&png[20..24], &64u32.to_be_bytes());
    }
}
