//! Display-side components: the latest-wins staging slot, the presentation
//! hand-off and the sink abstraction frames are finally written into.

mod headless;
mod presenter;
mod staging;
#[cfg(test)]
pub(crate) mod testing;

pub use headless::HeadlessSink;
pub use presenter::{PresentationDispatcher, PresentationReceiver, Presenter, presentation_channel};
pub use staging::FrameSlot;

pub use crate::convert::ConvertedFrame;

/// Surface that displays packed RGBA frames.
///
/// Only ever driven from the display thread.
pub trait DisplaySink {
    /// (Re)allocate the surface for a new frame size.
    fn ensure_size(&mut self, width: u32, height: u32);

    /// Overwrite the surface with `width * height * 4` bytes of RGBA.
    fn write_pixels(&mut self, pixels: &[u8], width: u32, height: u32);
}

impl<S: DisplaySink + ?Sized> DisplaySink for Box<S> {
    fn ensure_size(&mut self, width: u32, height: u32) {
        (**self).ensure_size(width, height)
    }

    fn write_pixels(&mut self, pixels: &[u8], width: u32, height: u32) {
        (**self).write_pixels(pixels, width, height)
    }
}
