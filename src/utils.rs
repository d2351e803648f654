use crate::{tensor::Tensor, Dims, Error};
use std::path::Path;

/// Per-channel mean of the extractor's training distribution; inputs are
/// normalized with these before extraction and snapshots denormalized with
/// them on the way out.
pub(crate) const CHANNEL_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub(crate) const CHANNEL_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Helper type used to define the source of `ImageSource`'s data
#[derive(Clone)]
pub enum ImageSource<'a> {
    /// A raw buffer of image data, see `image::load_from_memory` for details
    /// on what is supported
    Memory(&'a [u8]),
    /// The path to an image to load from disk. The image format is inferred
    /// from the file extension, see `image::open` for details
    Path(&'a Path),
    /// An already loaded image that is passed directly to the session
    Image(image::DynamicImage),
}

impl<'a> ImageSource<'a> {
    pub fn from_path(path: &'a Path) -> Self {
        Self::Path(path)
    }
}

impl<'a> From<image::DynamicImage> for ImageSource<'a> {
    fn from(img: image::DynamicImage) -> Self {
        Self::Image(img)
    }
}

impl<'a, S> From<&'a S> for ImageSource<'a>
where
    S: AsRef<Path> + 'a,
{
    fn from(path: &'a S) -> Self {
        Self::Path(path.as_ref())
    }
}

pub fn load_dynamic_image(src: ImageSource<'_>) -> Result<image::DynamicImage, image::ImageError> {
    match src {
        ImageSource::Memory(data) => image::load_from_memory(data),
        ImageSource::Path(path) => image::open(path),
        ImageSource::Image(img) => Ok(img),
    }
}

pub(crate) fn load_image(src: ImageSource<'_>, resize: Dims) -> Result<image::RgbImage, Error> {
    let img = load_dynamic_image(src)?;

    use image::GenericImageView;
    let img = if img.width() != resize.width || img.height() != resize.height {
        image::imageops::resize(
            &img.to_rgb8(),
            resize.width,
            resize.height,
            image::imageops::FilterType::CatmullRom,
        )
    } else {
        img.to_rgb8()
    };

    Ok(img)
}

/// Scales 8-bit pixels to [0, 1] and normalizes each channel by the fixed
/// mean/std constants.
pub(crate) fn image_to_tensor(img: &image::RgbImage) -> Tensor {
    let (width, height) = img.dimensions();
    let mut tensor = Tensor::zeros(3, height as usize, width as usize);

    for (x, y, pixel) in img.enumerate_pixels() {
        for c in 0..3 {
            let value = pixel[c] as f32 / 255.0;
            tensor.set(
                c,
                y as usize,
                x as usize,
                (value - CHANNEL_MEAN[c]) / CHANNEL_STD[c],
            );
        }
    }

    tensor
}

/// Denormalizes a canvas into an 8-bit image.
///
/// The canvas itself is never clamped during optimization and may drift
/// outside the nominal input range; values are clamped here only to fit
/// the 8-bit snapshot.
pub(crate) fn tensor_to_image(tensor: &Tensor) -> image::RgbImage {
    let width = tensor.width() as u32;
    let height = tensor.height() as u32;

    image::RgbImage::from_fn(width, height, |x, y| {
        let mut rgb = [0u8; 3];
        for c in 0..3 {
            let value = tensor.get(c, y as usize, x as usize);
            let denorm = value * CHANNEL_STD[c] + CHANNEL_MEAN[c];
            rgb[c] = (denorm.max(0.0).min(1.0) * 255.0).round() as u8;
        }
        image::Rgb(rgb)
    })
}
