//! The per-image transform chain: coarse rotation, grayscale, manual crop,
//! free-angle rotation, automatic border crop, viewport downscale. Order
//! matters — the manual crop always runs before the border scan so the scan
//! works on the user's working rectangle.

use fast_image_resize as fr;
use image::{DynamicImage, Rgba, RgbaImage, imageops};
use imageproc::geometric_transformations::{Interpolation, rotate_about_center};

use crate::album::{CropMargins, Rotation};
use crate::color::Region;
use crate::config::Config;
use crate::crop::crop_borders;
use crate::error::{AppError, AppResult};

use super::{ImagePlan, PagePlan};

pub(crate) fn apply(
    decoded: DynamicImage,
    image_plan: &ImagePlan,
    page_plan: &PagePlan,
    config: &Config,
    viewport: Option<(u32, u32)>,
    filter: fr::FilterType,
) -> AppResult<RgbaImage> {
    let mut image = match image_plan.rotation {
        Rotation::None => decoded,
        Rotation::Left => decoded.rotate270(),
        Rotation::Right => decoded.rotate90(),
    };

    if page_plan.grayscale {
        image = image.grayscale();
    }

    let mut rgba = image.to_rgba8();

    if !image_plan.crop.is_zero() {
        if let Some(region) = margins_region(rgba.dimensions(), &image_plan.crop) {
            rgba = imageops::crop_imm(&rgba, region.x, region.y, region.width, region.height)
                .to_image();
        } else {
            log::debug!(
                "manual crop for {} would leave an empty image; skipped",
                image_plan.entry
            );
        }
    }

    if page_plan.angle_degrees != 0.0 {
        rgba = rotate_about_center(
            &rgba,
            page_plan.angle_degrees.to_radians(),
            Interpolation::Bilinear,
            Rgba([255, 255, 255, 255]),
        );
    }

    if page_plan.remove_borders {
        let initial = Region::of_image(&rgba);
        let tight = crop_borders(&rgba, initial, &config.crop);
        if tight != initial && !tight.is_degenerate() {
            rgba = imageops::crop_imm(&rgba, tight.x, tight.y, tight.width, tight.height)
                .to_image();
        }
    }

    if let Some((viewport_width, viewport_height)) = viewport {
        if let Some((dst_width, dst_height)) =
            fit_downscale_dimensions(rgba.width(), rgba.height(), viewport_width, viewport_height)
        {
            rgba = resize_rgba(rgba, dst_width, dst_height, filter)?;
        }
    }

    Ok(rgba)
}

fn margins_region((width, height): (u32, u32), crop: &CropMargins) -> Option<Region> {
    let right = width.checked_sub(crop.right)?;
    let bottom = height.checked_sub(crop.bottom)?;
    if right <= crop.left || bottom <= crop.top {
        return None;
    }
    Some(Region {
        x: crop.left,
        y: crop.top,
        width: right - crop.left,
        height: bottom - crop.top,
    })
}

/// Aspect-preserving fit within the viewport; None when the image already
/// fits (pages are never upscaled here).
pub(crate) fn fit_downscale_dimensions(
    src_width: u32,
    src_height: u32,
    max_width: u32,
    max_height: u32,
) -> Option<(u32, u32)> {
    if src_width == 0 || src_height == 0 || max_width == 0 || max_height == 0 {
        return None;
    }
    if src_width <= max_width && src_height <= max_height {
        return None;
    }

    let width_limited = (max_width as u64).saturating_mul(src_height as u64)
        <= (max_height as u64).saturating_mul(src_width as u64);

    if width_limited {
        let dst_width = max_width.max(1);
        let dst_height =
            ((src_height as u64).saturating_mul(dst_width as u64) / src_width as u64).max(1) as u32;
        Some((dst_width, dst_height.min(max_height.max(1))))
    } else {
        let dst_height = max_height.max(1);
        let dst_width = ((src_width as u64).saturating_mul(dst_height as u64) / src_height as u64)
            .max(1) as u32;
        Some((dst_width.min(max_width.max(1)), dst_height))
    }
}

fn resize_rgba(
    image: RgbaImage,
    dst_width: u32,
    dst_height: u32,
    filter: fr::FilterType,
) -> AppResult<RgbaImage> {
    let (width, height) = image.dimensions();
    if width == dst_width && height == dst_height {
        return Ok(image);
    }

    let src = fr::images::Image::from_vec_u8(width, height, image.into_raw(), fr::PixelType::U8x4)
        .map_err(|_| {
            AppError::invalid_argument("rgba buffer length does not match dimensions")
        })?;

    let mut dst = fr::images::Image::new(dst_width, dst_height, fr::PixelType::U8x4);
    let mut resizer = fr::Resizer::new();
    let options = fr::ResizeOptions::new().resize_alg(fr::ResizeAlg::Convolution(filter));

    resizer
        .resize(&src, &mut dst, &options)
        .map_err(|_| AppError::invalid_argument("failed to downscale page image"))?;

    RgbaImage::from_raw(dst_width, dst_height, dst.into_vec())
        .ok_or_else(|| AppError::invalid_argument("resized buffer length does not match dimensions"))
}

#[cfg(test)]
mod tests {
    use image::{DynamicImage, Rgba, RgbaImage};

    use crate::album::{CropMargins, Rotation};
    use crate::config::Config;
    use crate::prepare::{ImagePlan, PagePlan};

    use super::{apply, fit_downscale_dimensions};

    fn plan(rotation: Rotation, crop: CropMargins) -> (ImagePlan, PagePlan) {
        let image_plan = ImagePlan {
            entry: "page.png".to_string(),
            rotation,
            crop,
        };
        let page_plan = PagePlan {
            images: vec![image_plan.clone()],
            angle_degrees: 0.0,
            grayscale: false,
            remove_borders: false,
        };
        (image_plan, page_plan)
    }

    fn filter() -> fast_image_resize::FilterType {
        Config::default()
            .prepare
            .filter_type()
            .expect("default filter should resolve")
    }

    fn source(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            width,
            height,
            Rgba([90, 120, 150, 255]),
        ))
    }

    #[test]
    fn coarse_rotation_swaps_dimensions() {
        let (image_plan, page_plan) = plan(Rotation::Left, CropMargins::default());
        let result = apply(
            source(30, 20),
            &image_plan,
            &page_plan,
            &Config::default(),
            None,
            filter(),
        )
        .expect("transform should succeed");
        assert_eq!(result.dimensions(), (20, 30));
    }

    #[test]
    fn grayscale_flattens_the_channels() {
        let (image_plan, mut page_plan) = plan(Rotation::None, CropMargins::default());
        page_plan.grayscale = true;

        let result = apply(
            source(10, 10),
            &image_plan,
            &page_plan,
            &Config::default(),
            None,
            filter(),
        )
        .expect("transform should succeed");
        let [r, g, b, _] = result.get_pixel(5, 5).0;
        assert_eq!(r, g);
        assert_eq!(g, b);
    }

    #[test]
    fn manual_crop_margins_shrink_the_image() {
        let crop = CropMargins {
            top: 3,
            bottom: 2,
            left: 4,
            right: 1,
        };
        let (image_plan, page_plan) = plan(Rotation::None, crop);

        let result = apply(
            source(30, 20),
            &image_plan,
            &page_plan,
            &Config::default(),
            None,
            filter(),
        )
        .expect("transform should succeed");
        assert_eq!(result.dimensions(), (25, 15));
    }

    #[test]
    fn degenerate_manual_crop_is_skipped() {
        let crop = CropMargins {
            top: 15,
            bottom: 15,
            left: 0,
            right: 0,
        };
        let (image_plan, page_plan) = plan(Rotation::None, crop);

        let result = apply(
            source(30, 20),
            &image_plan,
            &page_plan,
            &Config::default(),
            None,
            filter(),
        )
        .expect("transform should succeed");
        assert_eq!(result.dimensions(), (30, 20));
    }

    #[test]
    fn free_angle_rotation_keeps_dimensions() {
        let (image_plan, mut page_plan) = plan(Rotation::None, CropMargins::default());
        page_plan.angle_degrees = 1.5;

        let result = apply(
            source(30, 20),
            &image_plan,
            &page_plan,
            &Config::default(),
            None,
            filter(),
        )
        .expect("transform should succeed");
        assert_eq!(result.dimensions(), (30, 20));
    }

    #[test]
    fn border_removal_extracts_the_interior() {
        let mut image = RgbaImage::from_pixel(60, 40, Rgba([255, 255, 255, 255]));
        for x in 8..52 {
            for y in 8..32 {
                image.put_pixel(x, y, Rgba([40, 40, 40, 255]));
            }
        }
        let (image_plan, mut page_plan) = plan(Rotation::None, CropMargins::default());
        page_plan.remove_borders = true;

        let result = apply(
            DynamicImage::ImageRgba8(image),
            &image_plan,
            &page_plan,
            &Config::default(),
            None,
            filter(),
        )
        .expect("transform should succeed");
        assert_eq!(result.dimensions(), (44, 24));
    }

    #[test]
    fn viewport_downscale_preserves_aspect_and_never_upscales() {
        assert_eq!(fit_downscale_dimensions(1000, 500, 400, 400), Some((400, 200)));
        assert_eq!(fit_downscale_dimensions(500, 1000, 400, 400), Some((200, 400)));
        assert_eq!(fit_downscale_dimensions(100, 100, 400, 400), None);

        let (image_plan, page_plan) = plan(Rotation::None, CropMargins::default());
        let result = apply(
            source(1000, 500),
            &image_plan,
            &page_plan,
            &Config::default(),
            Some((400, 400)),
            filter(),
        )
        .expect("transform should succeed");
        assert_eq!(result.dimensions(), (400, 200));
    }
}
