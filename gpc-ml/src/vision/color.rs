//! RGB → HSV conversion and vegetation color test

/// Hue in degrees (0 - 360), saturation and value in 0.0 - 1.0
pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (f32, f32, f32) {
    let r = r as f32 / 255.0;
    let g = g as f32 / 255.0;
    let b = b as f32 / 255.0;

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let h = if delta < 1e-5 {
        0.0
    } else if (max - r).abs() < 1e-5 {
        60.0 * ((g - b) / delta).rem_euclid(6.0)
    } else if (max - g).abs() < 1e-5 {
        60.0 * (((b - r) / delta) + 2.0)
    } else {
        60.0 * (((r - g) / delta) + 4.0)
    };

    let s = if max < 1e-5 { 0.0 } else { delta / max };

    (h, s, max)
}

/// Hue window plus minimum saturation/value for plant pixels
#[derive(Debug, Clone, Copy)]
pub struct VegetationFilter {
    pub hue_min_deg: f32,
    pub hue_max_deg: f32,
    pub saturation_min: f32,
    pub value_min: f32,
}

impl VegetationFilter {
    pub fn matches(&self, h: f32, s: f32, v: f32) -> bool {
        h >= self.hue_min_deg
            && h <= self.hue_max_deg
            && s >= self.saturation_min
            && v >= self.value_min
    }
}
