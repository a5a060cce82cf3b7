//! Brightness on both sides of the bridge.

use serde::{Deserialize, Serialize};

/// Bulb dimming in percent (0-100).
///
/// The mesh side carries brightness as a level from 0 to 255. Both
/// conversions round down, so a converted value never overshoots the one
/// it came from.
#[derive(Default, Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct Brightness {
    pub(crate) value: u8,
}

impl Brightness {
    const MAX: u8 = 100;

    pub fn new() -> Self {
        Brightness { value: Self::MAX }
    }

    pub fn value(&self) -> u8 {
        self.value
    }

    /// Returns None if value is outside valid range (0-100).
    pub fn create(value: u8) -> Option<Self> {
        (value <= Self::MAX).then_some(Brightness { value })
    }

    /// Convert a mesh level into dimming.
    ///
    /// # Examples
    ///
    /// ```
    /// use wiz_hue_bridge::Brightness;
    ///
    /// assert_eq!(Brightness::from_level(255).value(), 100);
    /// assert_eq!(Brightness::from_level(128).value(), 50);
    /// assert_eq!(Brightness::from_level(2).value(), 0);
    /// ```
    pub fn from_level(level: u8) -> Self {
        Brightness {
            value: (u16::from(level) * 100 / 255) as u8,
        }
    }

    /// Convert dimming into a mesh level.
    ///
    /// # Examples
    ///
    /// ```
    /// use wiz_hue_bridge::Brightness;
    ///
    /// assert_eq!(Brightness::create(100).unwrap().to_level(), 255);
    /// assert_eq!(Brightness::create(50).unwrap().to_level(), 127);
    /// ```
    pub fn to_level(&self) -> u8 {
        (u16::from(self.value.min(Self::MAX)) * 255 / 100) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_out_of_range() {
        assert!(Brightness::create(101).is_none());
        assert_eq!(Brightness::create(0).map(|b| b.value()), Some(0));
    }

    #[test]
    fn test_level_never_overshoots() {
        for level in 0..=u8::MAX {
            let back = Brightness::from_level(level).to_level();
            assert!(back <= level && level - back <= 3, "level {level} -> {back}");
        }
    }

    #[test]
    fn test_dimming_loses_at_most_one_percent() {
        for value in 0..=100 {
            let back = Brightness::from_level(Brightness::create(value).unwrap().to_level());
            assert!(back.value() <= value && value - back.value() <= 1);
        }
        assert_eq!(Brightness::from_level(Brightness::new().to_level()), Brightness::new());
    }
}
