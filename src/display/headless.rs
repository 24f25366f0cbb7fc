use super::DisplaySink;
use std::io::{self, Write};
use std::path::Path;

/// In-memory display surface.
///
/// Behaves like a texture: resizing reallocates, writes overwrite in place.
#[derive(Debug, Default)]
pub struct HeadlessSink {
    surface: Vec<u8>,
    width: u32,
    height: u32,
    frames_written: u64,
    resizes: u64,
}

impl HeadlessSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn surface(&self) -> &[u8] {
        &self.surface
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn resizes(&self) -> u64 {
        self.resizes
    }

    /// Write the surface as a binary PPM (alpha dropped).
    pub fn write_ppm<W: Write>(&self, mut out: W) -> io::Result<()> {
        write!(out, "P6\n{} {}\n255\n", self.width, self.height)?;
        let rgb: Vec<u8> = self
            .surface
            .chunks_exact(4)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect();
        out.write_all(&rgb)?;
        out.flush()
    }

    pub fn dump_ppm(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let file = std::fs::File::create(path)?;
        self.write_ppm(io::BufWriter::new(file))
    }
}

impl DisplaySink for HeadlessSink {
    fn ensure_size(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.surface = vec![0; width as usize * height as usize * 4];
        self.resizes += 1;
    }

    fn write_pixels(&mut self, pixels: &[u8], width: u32, height: u32) {
        if (width, height) != (self.width, self.height) {
            log::warn!(
                "HeadlessSink: {}x{} write into {}x{} surface, dropped",
                width,
                height,
                self.width,
                self.height
            );
            return;
        }
        let n = self.surface.len().min(pixels.len());
        self.surface[..n].copy_from_slice(&pixels[..n]);
        self.frames_written += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_after_resize() {
        let mut sink = HeadlessSink::new();
        sink.ensure_size(2, 1);
        sink.write_pixels(&[1, 2, 3, 255, 4, 5, 6, 255], 2, 1);
        assert_eq!(sink.frames_written(), 1);

        let mut ppm = Vec::new();
        sink.write_ppm(&mut ppm).unwrap();
        assert_eq!(&ppm[..11], b"P6\n2 1\n255\n");
        assert_eq!(&ppm[11..], &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_mismatched_write_is_dropped() {
        let mut sink = HeadlessSink::new();
        sink.ensure_size(2, 2);
        sink.write_pixels(&[0; 4], 1, 1);
        assert_eq!(sink.frames_written(), 0);
        assert_eq!(sink.resizes(), 1);
    }
}
