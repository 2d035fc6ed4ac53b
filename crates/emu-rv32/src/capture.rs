//! Headless capture: PNG screenshots of the guest framebuffer.

use std::error::Error;
use std::fs;
use std::io::BufWriter;
use std::path::Path;

use crate::vga::Frame;

/// Save a frame as a PNG file.
///
/// The framebuffer is ARGB32 (`u32` array); the PNG encoder wants RGBA
/// bytes.
pub fn save_screenshot(frame: &Frame, path: &Path) -> Result<(), Box<dyn Error>> {
    let file = fs::File::create(path)?;
    let w = BufWriter::new(file);
    let mut encoder = png::Encoder::new(w, frame.width, frame.height);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header()?;

    let mut rgba = Vec::with_capacity((frame.width * frame.height * 4) as usize);
    for &pixel in &frame.pixels {
        rgba.push(((pixel >> 16) & 0xff) as u8);
        rgba.push(((pixel >> 8) & 0xff) as u8);
        rgba.push((pixel & 0xff) as u8);
        rgba.push(0xff);
    }

    writer.write_image_data(&rgba)?;
    Ok(())
}
