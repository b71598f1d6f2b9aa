use anyhow::Result;
use image::Rgb;
use palette::{Mix, Srgb};
use std::str::FromStr;

/// Named colormaps, each sampled at evenly spaced stops and interpolated in sRGB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Colormap {
    Coolwarm,
    Plasma,
    Viridis,
    Gray,
}

const COOLWARM_STOPS: [(u8, u8, u8); 9] = [
    (59, 76, 192),
    (98, 130, 234),
    (141, 176, 254),
    (184, 208, 249),
    (221, 221, 221),
    (245, 196, 173),
    (244, 154, 123),
    (222, 96, 77),
    (180, 4, 38),
];

const PLASMA_STOPS: [(u8, u8, u8); 9] = [
    (13, 8, 135),
    (75, 3, 161),
    (125, 3, 168),
    (168, 34, 150),
    (203, 71, 119),
    (229, 107, 93),
    (248, 148, 65),
    (253, 195, 40),
    (240, 249, 33),
];

const VIRIDIS_STOPS: [(u8, u8, u8); 9] = [
    (68, 1, 84),
    (72, 40, 120),
    (62, 74, 137),
    (49, 104, 142),
    (38, 130, 142),
    (31, 158, 137),
    (53, 183, 121),
    (110, 206, 88),
    (253, 231, 37),
];

const GRAY_STOPS: [(u8, u8, u8); 2] = [(0, 0, 0), (255, 255, 255)];

impl Colormap {
    fn stops(self) -> &'static [(u8, u8, u8)] {
        match self {
            Colormap::Coolwarm => &COOLWARM_STOPS,
            Colormap::Plasma => &PLASMA_STOPS,
            Colormap::Viridis => &VIRIDIS_STOPS,
            Colormap::Gray => &GRAY_STOPS,
        }
    }

    /// Color at `t` in [0, 1]; values outside are clamped.
    pub fn sample(self, t: f64) -> Rgb<u8> {
        let stops = self.stops();
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
        let seg = t * (stops.len() - 1) as f64;
        let i = (seg as usize).min(stops.len() - 2);
        let s = (seg - i as f64) as f32;

        let to_srgb = |(r, g, b): (u8, u8, u8)| Srgb::new(r, g, b).into_format::<f32>();
        let mixed = to_srgb(stops[i]).mix(to_srgb(stops[i + 1]), s);
        let (r, g, b) = mixed.into_format::<u8>().into_components();
        Rgb([r, g, b])
    }
}

impl FromStr for Colormap {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "coolwarm" => Ok(Colormap::Coolwarm),
            "plasma" => Ok(Colormap::Plasma),
            "viridis" => Ok(Colormap::Viridis),
            "gray" | "grey" => Ok(Colormap::Gray),
            other => anyhow::bail!("unknown colormap '{}' (coolwarm, plasma, viridis, gray)", other),
        }
    }
}

/// Maps data values onto [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Normalize {
    Linear { vmin: f64, vmax: f64 },
    Log { vmin: f64, vmax: f64 },
}

impl Normalize {
    pub fn linear(vmin: f64, vmax: f64) -> Result<Self> {
        if !(vmin <= vmax) {
            anyhow::bail!("invalid color range [{}, {}]", vmin, vmax);
        }
        Ok(Normalize::Linear { vmin, vmax })
    }

    /// Logarithmic scale; both limits must be positive.
    pub fn log(vmin: f64, vmax: f64) -> Result<Self> {
        if !(vmin > 0.0) || !(vmin <= vmax) {
            anyhow::bail!("log color range needs 0 < vmin <= vmax, got [{:e}, {:e}]", vmin, vmax);
        }
        Ok(Normalize::Log { vmin, vmax })
    }

    pub fn limits(&self) -> (f64, f64) {
        match *self {
            Normalize::Linear { vmin, vmax } | Normalize::Log { vmin, vmax } => (vmin, vmax),
        }
    }

    pub fn apply(&self, value: f64) -> f64 {
        let t = match *self {
            Normalize::Linear { vmin, vmax } => {
                if vmax == vmin {
                    return 0.0;
                }
                (value - vmin) / (vmax - vmin)
            }
            Normalize::Log { vmin, vmax } => {
                if value <= 0.0 || vmax == vmin {
                    return 0.0;
                }
                (value.ln() - vmin.ln()) / (vmax.ln() - vmin.ln())
            }
        };
        t.clamp(0.0, 1.0)
    }

    /// Data value at normalised position `t`, used for colorbar ticks.
    pub fn invert(&self, t: f64) -> f64 {
        match *self {
            Normalize::Linear { vmin, vmax } => vmin + t * (vmax - vmin),
            Normalize::Log { vmin, vmax } => (vmin.ln() + t * (vmax.ln() - vmin.ln())).exp(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints_match_stops() {
        assert_eq!(Colormap::Plasma.sample(0.0), Rgb([13, 8, 135]));
        assert_eq!(Colormap::Plasma.sample(1.0), Rgb([240, 249, 33]));
        assert_eq!(Colormap::Coolwarm.sample(0.5), Rgb([221, 221, 221]));
        assert_eq!(Colormap::Gray.sample(2.0), Rgb([255, 255, 255]));
        assert_eq!(Colormap::Gray.sample(f64::NAN), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_gray_interpolates() {
        let Rgb([r, g, b]) = Colormap::Gray.sample(0.5);
        assert!(r == g && g == b);
        assert!((127..=128).contains(&r));
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("CoolWarm".parse::<Colormap>().unwrap(), Colormap::Coolwarm);
        assert_eq!("grey".parse::<Colormap>().unwrap(), Colormap::Gray);
        assert!("jet".parse::<Colormap>().is_err());
    }

    #[test]
    fn test_log_norm() {
        let norm = Normalize::log(1e-10, 1.0).unwrap();
        assert_eq!(norm.apply(1e-10), 0.0);
        assert!((norm.apply(1e-5) - 0.5).abs() < 1e-12);
        assert_eq!(norm.apply(10.0), 1.0);
        assert_eq!(norm.apply(0.0), 0.0);
        assert!((norm.invert(0.5) - 1e-5).abs() < 1e-15);
        assert!(Normalize::log(0.0, 1.0).is_err());
    }

    #[test]
    fn test_linear_norm() {
        let norm = Normalize::linear(-1.0, 3.0).unwrap();
        assert_eq!(norm.apply(1.0), 0.5);
        assert_eq!(norm.apply(-5.0), 0.0);
        assert_eq!(norm.invert(0.25), 0.0);
        assert_eq!(Normalize::linear(2.0, 2.0).unwrap().apply(2.0), 0.0);
        assert!(Normalize::linear(3.0, 1.0).is_err());
    }
}
