//! RGB colors and their CIE xy representation on the mesh side.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// An RGB color with red, green, and blue components (0-255 each).
#[derive(Default, Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub(crate) red: u8,
    pub(crate) green: u8,
    pub(crate) blue: u8,
}

impl Color {
    /// Create a color with the given RGB values.
    pub fn rgb(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }

    pub fn red(&self) -> u8 {
        self.red
    }

    pub fn green(&self) -> u8 {
        self.green
    }

    pub fn blue(&self) -> u8 {
        self.blue
    }

    /// Build a color from three optional channels read off the wire.
    ///
    /// All three channels must be known, otherwise the color is unknown.
    pub fn from_channels(red: Option<u8>, green: Option<u8>, blue: Option<u8>) -> Option<Self> {
        match (red, green, blue) {
            (Some(r), Some(g), Some(b)) => Some(Self::rgb(r, g, b)),
            _ => None,
        }
    }

    /// Convert to the CIE 1931 xy chromaticity a mesh light stores.
    ///
    /// # Examples
    ///
    /// ```
    /// use wiz_hue_bridge::Color;
    ///
    /// let xy = Color::rgb(255, 0, 0).to_xy();
    /// assert!(xy.x() > xy.y());
    /// ```
    pub fn to_xy(&self) -> ColorXy {
        let r = gamma_expand(self.red);
        let g = gamma_expand(self.green);
        let b = gamma_expand(self.blue);

        let x = r * 0.412_4 + g * 0.357_6 + b * 0.180_5;
        let y = r * 0.212_6 + g * 0.715_2 + b * 0.072_2;
        let z = r * 0.019_3 + g * 0.119_2 + b * 0.950_5;

        let sum = x + y + z;
        if sum <= 0.0 {
            return ColorXy::default();
        }

        ColorXy {
            x: to_fixed(x / sum),
            y: to_fixed(y / sum),
        }
    }

    /// The color a mesh client reads back after this color is written as xy.
    ///
    /// The bridge mirrors bulb colors through this conversion so the value it
    /// publishes is the one the mesh side will report, not a neighbour of it.
    ///
    /// # Examples
    ///
    /// ```
    /// use wiz_hue_bridge::Color;
    ///
    /// let white = Color::rgb(255, 255, 255).mesh_round_trip();
    /// assert!(white.red() > 240 && white.green() > 240 && white.blue() > 240);
    /// assert_eq!(Color::rgb(0, 0, 0).mesh_round_trip(), Color::rgb(0, 0, 0));
    /// ```
    pub fn mesh_round_trip(&self) -> Color {
        if self.red == 0 && self.green == 0 && self.blue == 0 {
            return *self;
        }
        self.to_xy().to_rgb(u8::MAX)
    }
}

impl FromStr for Color {
    type Err = String;

    /// Parse from comma-separated string (e.g., "255,128,0").
    fn from_str(s: &str) -> Result<Self, String> {
        let parts = s
            .split(',')
            .map(|c| c.trim().parse::<u8>())
            .collect::<Result<Vec<u8>, _>>()
            .map_err(|e| format!("invalid color component: {e}"))?;
        match parts.as_slice() {
            [r, g, b] => Ok(Self::rgb(*r, *g, *b)),
            _ => Err("Expected format: r,g,b".into()),
        }
    }
}

/// CIE xy chromaticity scaled to `0..=65535`, as carried by mesh color
/// attributes.
#[derive(Default, Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct ColorXy {
    x: u16,
    y: u16,
}

impl ColorXy {
    /// An xy pair as a mesh stack decodes it from a color command.
    ///
    /// # Examples
    ///
    /// ```
    /// use wiz_hue_bridge::{Color, ColorXy};
    ///
    /// let red = Color::rgb(255, 0, 0).to_xy();
    /// let decoded = ColorXy::new(red.x(), red.y()).to_rgb(255);
    /// assert!(decoded.red() > 240);
    /// assert!(decoded.green() < 32 && decoded.blue() < 32);
    /// ```
    pub fn new(x: u16, y: u16) -> Self {
        Self { x, y }
    }

    pub fn x(&self) -> u16 {
        self.x
    }

    pub fn y(&self) -> u16 {
        self.y
    }

    /// Convert back to RGB at the given level, scaling the brightest channel
    /// to full range.
    ///
    /// Out-of-gamut channels are clipped at zero before scaling.
    pub fn to_rgb(&self, level: u8) -> Color {
        let x = f32::from(self.x) / 65535.0;
        let y = f32::from(self.y) / 65535.0;
        if y <= 0.0 {
            return Color::default();
        }

        let lum = f32::from(level) / 254.0;
        let cap_x = (lum / y) * x;
        let cap_z = (lum / y) * (1.0 - x - y);

        let mut r = cap_x * 3.240_6 - lum * 1.537_2 - cap_z * 0.498_6;
        let mut g = -cap_x * 0.968_9 + lum * 1.875_8 + cap_z * 0.041_5;
        let mut b = cap_x * 0.055_7 - lum * 0.204_0 + cap_z * 1.057_0;

        r = r.max(0.0);
        g = g.max(0.0);
        b = b.max(0.0);
        let max = r.max(g).max(b);
        if max > 0.0 {
            r /= max;
            g /= max;
            b /= max;
        }

        Color::rgb(
            to_channel(gamma_compress(r)),
            to_channel(gamma_compress(g)),
            to_channel(gamma_compress(b)),
        )
    }
}

fn gamma_expand(channel: u8) -> f32 {
    let c = f32::from(channel) / 255.0;
    if c > 0.040_45 {
        ((c + 0.055) / 1.055).powf(2.4)
    } else {
        c / 12.92
    }
}

fn gamma_compress(linear: f32) -> f32 {
    let c = linear.max(0.0);
    if c <= 0.003_130_8 {
        12.92 * c
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

fn to_fixed(v: f32) -> u16 {
    (v.clamp(0.0, 1.0) * 65535.0).round() as u16
}

fn to_channel(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}
