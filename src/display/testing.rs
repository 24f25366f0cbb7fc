//! Display sink that records what it is asked to do.

use super::DisplaySink;

#[derive(Debug, Default)]
pub(crate) struct RecordingSink {
    pub resizes: Vec<(u32, u32)>,
    /// (width, height, first byte) per write
    pub writes: Vec<(u32, u32, u8)>,
}

impl DisplaySink for RecordingSink {
    fn ensure_size(&mut self, width: u32, height: u32) {
        self.resizes.push((width, height));
    }

    fn write_pixels(&mut self, pixels: &[u8], width: u32, height: u32) {
        assert_eq!(pixels.len(), width as usize * height as usize * 4);
        self.writes.push((width, height, pixels[0]));
    }
}
