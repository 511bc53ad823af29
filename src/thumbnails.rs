//! Page thumbnails.

use image::imageops::FilterType;
use image::RgbImage;
use std::path::Path;

use crate::config::ThumbnailConfig;
use crate::error::{BuildError, BuildResult};
use crate::render::Renderer;

/// Scale `image` down to fit inside `max_width` × `max_height`, keeping its
/// aspect ratio. Images that already fit are returned unchanged.
pub fn fit_within(image: RgbImage, max_width: u32, max_height: u32) -> RgbImage {
    let (w, h) = image.dimensions();
    if w <= max_width && h <= max_height {
        return image;
    }
    let ratio = f64::min(
        f64::from(max_width) / f64::from(w),
        f64::from(max_height) / f64::from(h),
    );
    let nw = ((f64::from(w) * ratio).round() as u32).clamp(1, max_width);
    let nh = ((f64::from(h) * ratio).round() as u32).clamp(1, max_height);
    image::imageops::resize(&image, nw, nh, FilterType::Lanczos3)
}

/// Rasterize one page of `pdf` and write it as a PNG thumbnail to `dest`.
pub fn write_thumbnail(
    renderer: &dyn Renderer,
    pdf: &Path,
    page_index: usize,
    config: &ThumbnailConfig,
    dest: &Path,
) -> BuildResult<()> {
    let raster = renderer.rasterize(pdf, page_index, config.dpi)?;
    let thumb = fit_within(raster, config.max_width, config.max_height);
    thumb
        .save_with_format(dest, image::ImageFormat::Png)
        .map_err(|e| BuildError::Render(e.into()))
}
