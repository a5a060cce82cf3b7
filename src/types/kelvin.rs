//! Color temperature in Kelvin and its mired reciprocal.

use serde::{Deserialize, Serialize};

const MIRED_SCALE: u32 = 1_000_000;

/// Color temperature in Kelvin, as spoken by the bulbs.
///
/// Lower values produce warmer (more yellow/orange) light, while higher
/// values produce cooler (more blue) light. Typical values:
/// - 2700K: Warm white (incandescent-like)
/// - 4000K: Neutral white
/// - 6500K: Daylight
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Kelvin {
    pub(crate) kelvin: u16,
}

impl Kelvin {
    /// Create a new Kelvin with the given value.
    ///
    /// Returns `None` for zero, which has no mired equivalent.
    ///
    /// # Examples
    ///
    /// ```
    /// use wiz_hue_bridge::Kelvin;
    ///
    /// assert!(Kelvin::create(0).is_none());
    /// assert_eq!(Kelvin::create(2700).map(|k| k.kelvin()), Some(2700));
    /// ```
    pub fn create(kelvin: u16) -> Option<Self> {
        (kelvin > 0).then_some(Kelvin { kelvin })
    }

    /// Get the kelvin value.
    pub fn kelvin(&self) -> u16 {
        self.kelvin
    }

    /// Convert to mireds, rounding down.
    ///
    /// # Examples
    ///
    /// ```
    /// use wiz_hue_bridge::Kelvin;
    ///
    /// let k = Kelvin::create(6500).unwrap();
    /// assert_eq!(k.to_mireds().mireds(), 153);
    /// ```
    pub fn to_mireds(&self) -> Mireds {
        Mireds {
            mireds: reciprocal(self.kelvin),
        }
    }
}

/// Color temperature in mireds (`1_000_000 / K`), as stored on the mesh side.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Mireds {
    pub(crate) mireds: u16,
}

impl Mireds {
    /// Returns `None` for zero.
    pub fn create(mireds: u16) -> Option<Self> {
        (mireds > 0).then_some(Mireds { mireds })
    }

    pub fn mireds(&self) -> u16 {
        self.mireds
    }

    /// Convert to Kelvin, rounding down.
    pub fn to_kelvin(&self) -> Kelvin {
        Kelvin {
            kelvin: reciprocal(self.mireds),
        }
    }
}

fn reciprocal(value: u16) -> u16 {
    let value = u32::from(value.max(1));
    (MIRED_SCALE / value).min(u32::from(u16::MAX)) as u16
}

/// Inclusive Kelvin range a device accepts.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct KelvinRange {
    pub min: u16,
    pub max: u16,
}

impl KelvinRange {
    /// Create a range, swapping the bounds if they are given in reverse.
    pub fn new(min: u16, max: u16) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    pub fn contains(&self, kelvin: u16) -> bool {
        (self.min..=self.max).contains(&kelvin)
    }

    /// Clamp a temperature into the range.
    ///
    /// # Examples
    ///
    /// ```
    /// use wiz_hue_bridge::{Kelvin, KelvinRange};
    ///
    /// let range = KelvinRange::new(2700, 6500);
    /// let hot = Kelvin::create(9000).unwrap();
    /// assert_eq!(range.clamp(hot).kelvin(), 6500);
    /// ```
    pub fn clamp(&self, kelvin: Kelvin) -> Kelvin {
        Kelvin {
            kelvin: kelvin.kelvin.clamp(self.min.max(1), self.max.max(1)),
        }
    }

    /// The same range expressed in mireds, as `(min, max)`.
    ///
    /// The warm end of the Kelvin range is the high end in mireds.
    pub fn mireds_range(&self) -> (Mireds, Mireds) {
        let warm = Kelvin {
            kelvin: self.min.max(1),
        };
        let cool = Kelvin {
            kelvin: self.max.max(1),
        };
        (cool.to_mireds(), warm.to_mireds())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mireds_survive_round_trip_across_ranges() {
        for range in [KelvinRange::new(2200, 6500), KelvinRange::new(1800, 1800)] {
            for k in range.min..=range.max {
                let mireds = Kelvin::create(k).unwrap().to_mireds();
                let back = mireds.to_kelvin().to_mireds();
                assert!(
                    back.mireds().abs_diff(mireds.mireds()) <= 1,
                    "{k}K -> {mireds:?} -> {back:?}"
                );
            }
        }
    }

    #[test]
    fn test_conversion_rounds_down() {
        assert_eq!(Kelvin::create(2700).unwrap().to_mireds().mireds(), 370);
        assert_eq!(Mireds::create(370).unwrap().to_kelvin().kelvin(), 2702);
        assert_eq!(Mireds::create(1).unwrap().to_kelvin().kelvin(), u16::MAX);
    }

    #[test]
    fn test_clamp_and_contains() {
        let range = KelvinRange::new(6500, 2700);
        assert_eq!(range, KelvinRange { min: 2700, max: 6500 });
        assert!(range.contains(2700));
        assert!(!range.contains(2699));
        let cold = Kelvin::create(1000).unwrap();
        assert_eq!(range.clamp(cold).kelvin(), 2700);
    }

    #[test]
    fn test_mireds_range_swaps_ends() {
        let (min, max) = KelvinRange::new(2200, 6500).mireds_range();
        assert_eq!(min.mireds(), 153);
        assert_eq!(max.mireds(), 454);
    }
}
