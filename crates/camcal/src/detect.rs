//! Image interop for the calibrators.

use camcal_core::{GrayImage, GrayImageView};

#[cfg(feature = "image")]
use camcal_chessboard::DetectionFailure;

/// An 8-bit grayscale frame the calibrators can borrow.
pub trait GrayFrame {
    fn gray_view(&self) -> GrayImageView<'_>;
}

impl GrayFrame for GrayImage {
    fn gray_view(&self) -> GrayImageView<'_> {
        self.view()
    }
}

impl GrayFrame for GrayImageView<'_> {
    fn gray_view(&self) -> GrayImageView<'_> {
        *self
    }
}

impl<T: GrayFrame + ?Sized> GrayFrame for &T {
    fn gray_view(&self) -> GrayImageView<'_> {
        (**self).gray_view()
    }
}

#[cfg(feature = "image")]
impl GrayFrame for ::image::GrayImage {
    fn gray_view(&self) -> GrayImageView<'_> {
        gray_view(self)
    }
}

/// Convert an `image::GrayImage` into the lightweight core view type.
#[cfg(feature = "image")]
pub fn gray_view(img: &::image::GrayImage) -> GrayImageView<'_> {
    GrayImageView {
        width: img.width() as usize,
        height: img.height() as usize,
        data: img.as_raw(),
    }
}

/// Build an `image::GrayImage` from a raw grayscale buffer.
#[cfg(feature = "image")]
pub fn gray_image_from_slice(
    width: u32,
    height: u32,
    pixels: &[u8],
) -> Result<::image::GrayImage, DetectionFailure> {
    let expected = (width as usize).saturating_mul(height as usize);
    if pixels.len() != expected {
        return Err(DetectionFailure::InvalidBuffer {
            expected,
            got: pixels.len(),
        });
    }
    ::image::GrayImage::from_raw(width, height, pixels.to_vec()).ok_or(
        DetectionFailure::InvalidBuffer {
            expected,
            got: pixels.len(),
        },
    )
}

/// Copy a core image into an `image::GrayImage`, e.g. to save a rectified frame.
#[cfg(feature = "image")]
pub fn to_image(img: &GrayImage) -> Option<::image::GrayImage> {
    ::image::GrayImage::from_raw(img.width as u32, img.height as u32, img.data.clone())
}
