//! Automatic scan-border detection.
//!
//! Each of the four edges is scanned independently: the outermost row/column
//! inside the working rectangle is averaged into a reference color, then the
//! edge walks inward until a row/column holds more "content" pixels than the
//! configured fraction allows. Borders are compared against the locally
//! observed border color rather than a fixed white/black target, which keeps
//! the scan robust on off-white, cream, and gray scan backgrounds.

use image::RgbaImage;

use crate::color::Region;
use crate::config::CropConfig;

/// Difference between black and white summed over the three channels.
const MAX_CHANNEL_DIFF: f64 = 765.0;

/// Tightens `initial` so that uniform borders are excluded. The result is
/// always contained within `initial`; an axis whose opposing scans would
/// cross is left unmodified.
pub fn crop_borders(image: &RgbaImage, initial: Region, config: &CropConfig) -> Region {
    let x0 = initial.x.min(image.width());
    let y0 = initial.y.min(image.height());
    let x1 = initial.right().min(image.width());
    let y1 = initial.bottom().min(image.height());
    if x1.saturating_sub(x0) <= 1 || y1.saturating_sub(y0) <= 1 {
        return initial;
    }

    let max_bad_x = (f64::from(x1 - x0) * f64::from(config.count_threshold)) as u32;
    let max_bad_y = (f64::from(y1 - y0) * f64::from(config.count_threshold)) as u32;

    // Each worker narrows only its own bound and snapshots the perpendicular
    // extent before scanning, so the four scans share no mutable state.
    let (top, bottom, left, right) = std::thread::scope(|scope| {
        let top = scope.spawn(|| scan_top(image, x0, x1, y0, y1, max_bad_x, config));
        let bottom = scope.spawn(|| scan_bottom(image, x0, x1, y0, y1, max_bad_x, config));
        let left = scope.spawn(|| scan_left(image, x0, x1, y0, y1, max_bad_y, config));
        let right = scope.spawn(|| scan_right(image, x0, x1, y0, y1, max_bad_y, config));
        (
            top.join().expect("top edge scan should complete"),
            bottom.join().expect("bottom edge scan should complete"),
            left.join().expect("left edge scan should complete"),
            right.join().expect("right edge scan should complete"),
        )
    });

    let (out_x, out_width) = if right > left && right - left > 1 {
        (left, right - left)
    } else {
        (initial.x, initial.width)
    };
    let (out_y, out_height) = if bottom > top && bottom - top > 1 {
        (top, bottom - top)
    } else {
        (initial.y, initial.height)
    };

    Region {
        x: out_x,
        y: out_y,
        width: out_width,
        height: out_height,
    }
}

fn scan_top(
    image: &RgbaImage,
    x0: u32,
    x1: u32,
    y0: u32,
    y1: u32,
    max_bad: u32,
    config: &CropConfig,
) -> u32 {
    let reference = average_row(image, y0, x0, x1);
    for y in y0..y1 {
        if row_is_content(image, y, x0, x1, reference, max_bad, config) {
            return y;
        }
    }
    y1
}

fn scan_bottom(
    image: &RgbaImage,
    x0: u32,
    x1: u32,
    y0: u32,
    y1: u32,
    max_bad: u32,
    config: &CropConfig,
) -> u32 {
    let reference = average_row(image, y1 - 1, x0, x1);
    for y in (y0..y1).rev() {
        if row_is_content(image, y, x0, x1, reference, max_bad, config) {
            return y + 1;
        }
    }
    y0
}

fn scan_left(
    image: &RgbaImage,
    x0: u32,
    x1: u32,
    y0: u32,
    y1: u32,
    max_bad: u32,
    config: &CropConfig,
) -> u32 {
    let reference = average_column(image, x0, y0, y1);
    for x in x0..x1 {
        if column_is_content(image, x, y0, y1, reference, max_bad, config) {
            return x;
        }
    }
    x1
}

fn scan_right(
    image: &RgbaImage,
    x0: u32,
    x1: u32,
    y0: u32,
    y1: u32,
    max_bad: u32,
    config: &CropConfig,
) -> u32 {
    let reference = average_column(image, x1 - 1, y0, y1);
    for x in (x0..x1).rev() {
        if column_is_content(image, x, y0, y1, reference, max_bad, config) {
            return x + 1;
        }
    }
    x0
}

fn row_is_content(
    image: &RgbaImage,
    y: u32,
    x0: u32,
    x1: u32,
    reference: (f64, f64, f64),
    max_bad: u32,
    config: &CropConfig,
) -> bool {
    let mut bad = 0u32;
    let mut x = x0;
    while x < x1 {
        if pixel_diff(image, x, y, reference) > f64::from(config.color_threshold) {
            bad += 1;
            if bad > max_bad {
                return true;
            }
        }
        x += config.sample_stride;
    }
    false
}

fn column_is_content(
    image: &RgbaImage,
    x: u32,
    y0: u32,
    y1: u32,
    reference: (f64, f64, f64),
    max_bad: u32,
    config: &CropConfig,
) -> bool {
    let mut bad = 0u32;
    let mut y = y0;
    while y < y1 {
        if pixel_diff(image, x, y, reference) > f64::from(config.color_threshold) {
            bad += 1;
            if bad > max_bad {
                return true;
            }
        }
        y += config.sample_stride;
    }
    false
}

fn pixel_diff(image: &RgbaImage, x: u32, y: u32, reference: (f64, f64, f64)) -> f64 {
    let [r, g, b, _] = image.get_pixel(x, y).0;
    let dr = (f64::from(r) - reference.0).abs();
    let dg = (f64::from(g) - reference.1).abs();
    let db = (f64::from(b) - reference.2).abs();
    (dr + dg + db) / MAX_CHANNEL_DIFF
}

fn average_row(image: &RgbaImage, y: u32, x0: u32, x1: u32) -> (f64, f64, f64) {
    let (mut sum_r, mut sum_g, mut sum_b) = (0.0f64, 0.0f64, 0.0f64);
    let mut count = 0.0f64;
    for x in x0..x1 {
        let [r, g, b, _] = image.get_pixel(x, y).0;
        sum_r += f64::from(r);
        sum_g += f64::from(g);
        sum_b += f64::from(b);
        count += 1.0;
    }
    if count == 0.0 {
        return (0.0, 0.0, 0.0);
    }
    (sum_r / count, sum_g / count, sum_b / count)
}

fn average_column(image: &RgbaImage, x: u32, y0: u32, y1: u32) -> (f64, f64, f64) {
    let (mut sum_r, mut sum_g, mut sum_b) = (0.0f64, 0.0f64, 0.0f64);
    let mut count = 0.0f64;
    for y in y0..y1 {
        let [r, g, b, _] = image.get_pixel(x, y).0;
        sum_r += f64::from(r);
        sum_g += f64::from(g);
        sum_b += f64::from(b);
        count += 1.0;
    }
    if count == 0.0 {
        return (0.0, 0.0, 0.0);
    }
    (sum_r / count, sum_g / count, sum_b / count)
}
