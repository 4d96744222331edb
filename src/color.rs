use image::RgbaImage;

/// Pixels with every channel above this value are treated as paper white and
/// ignored by both samplers.
const WHITE_CUTOFF: u8 = 240;
/// Pixels with every channel below this value are treated as ink black and
/// ignored by the prominent-color sampler.
const BLACK_CUTOFF: u8 = 15;
const SAMPLE_STRIDE: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0 };
}

/// Pixel-space sub-rectangle, x/y inclusive, width/height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn of_image(image: &RgbaImage) -> Self {
        Self {
            x: 0,
            y: 0,
            width: image.width(),
            height: image.height(),
        }
    }

    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    pub fn is_degenerate(&self) -> bool {
        self.width <= 1 || self.height <= 1
    }

    fn clamped_to(&self, image: &RgbaImage) -> Region {
        let x = self.x.min(image.width());
        let y = self.y.min(image.height());
        Region {
            x,
            y,
            width: self.width.min(image.width() - x),
            height: self.height.min(image.height() - y),
        }
    }
}

/// Mean color over the region, skipping near-white pixels so that blank paper
/// does not wash out the result. Black when every sampled pixel is skipped.
pub fn average_color(image: &RgbaImage, region: Region) -> Color {
    let region = region.clamped_to(image);
    let mut count = 0u64;
    let (mut sum_r, mut sum_g, mut sum_b) = (0u64, 0u64, 0u64);

    let mut x = region.x;
    while x < region.right() {
        let mut y = region.y;
        while y < region.bottom() {
            let [r, g, b, _] = image.get_pixel(x, y).0;
            if !(r > WHITE_CUTOFF && g > WHITE_CUTOFF && b > WHITE_CUTOFF) {
                sum_r += u64::from(r);
                sum_g += u64::from(g);
                sum_b += u64::from(b);
                count += 1;
            }
            y += SAMPLE_STRIDE;
        }
        x += SAMPLE_STRIDE;
    }

    if count == 0 {
        return Color::BLACK;
    }
    Color {
        r: (sum_r / count) as u8,
        g: (sum_g / count) as u8,
        b: (sum_b / count) as u8,
    }
}

/// Modal color over the region with near-white and near-black pixels masked
/// out and one bit of precision dropped per channel so that dithered scans
/// still converge on a single bucket. None when every sampled pixel is masked.
pub fn prominent_color(image: &RgbaImage, region: Region) -> Option<Color> {
    let region = region.clamped_to(image);
    let mut counts: std::collections::HashMap<Color, u32> = std::collections::HashMap::new();
    let mut best: Option<(Color, u32)> = None;

    let mut x = region.x;
    while x < region.right() {
        let mut y = region.y;
        while y < region.bottom() {
            let [r, g, b, _] = image.get_pixel(x, y).0;
            let near_white = r > WHITE_CUTOFF && g > WHITE_CUTOFF && b > WHITE_CUTOFF;
            let near_black = r < BLACK_CUTOFF && g < BLACK_CUTOFF && b < BLACK_CUTOFF;
            if !near_white && !near_black {
                let bucket = Color {
                    r: r >> 1 << 1,
                    g: g >> 1 << 1,
                    b: b >> 1 << 1,
                };
                let count = counts.entry(bucket).or_insert(0);
                *count += 1;
                if best.is_none_or(|(_, best_count)| *count > best_count) {
                    best = Some((bucket, *count));
                }
            }
            y += SAMPLE_STRIDE;
        }
        x += SAMPLE_STRIDE;
    }

    best.map(|(color, _)| color)
}
