//! Bulb configuration and capability classification.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::types::KelvinRange;

/// System configuration of a Wiz bulb, as returned by `getSystemConfig`.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SystemConfig {
    pub mac: String,
    #[serde(default)]
    pub home_id: Option<u64>,
    #[serde(default)]
    pub room_id: Option<u64>,
    #[serde(default)]
    pub module_name: Option<String>,
    #[serde(default)]
    pub fw_version: Option<String>,
    #[serde(default)]
    pub rssi: Option<i32>,
    #[serde(default)]
    pub src: Option<String>,
}

/// Coarse capability family of a bulb.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum DeviceClass {
    /// Full color plus tunable white
    Rgb,
    /// Full color with a dedicated white channel
    Rgbw,
    /// Tunable white
    Tw,
    /// Dimmable white
    Dw,
    /// Smart socket, switch only
    Socket,
    /// Ceiling fan with a color light
    Fan,
    Unknown,
}

/// Capability flags of a bulb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Features {
    #[serde(default)]
    pub brightness: bool,
    #[serde(default)]
    pub color: bool,
    #[serde(default)]
    pub color_tmp: bool,
    #[serde(default)]
    pub effect: bool,
    #[serde(default)]
    pub fan: bool,
    #[serde(default = "Features::placeholder_range")]
    pub kelvin_range: KelvinRange,
}

impl Default for Features {
    fn default() -> Self {
        Features {
            brightness: false,
            color: false,
            color_tmp: false,
            effect: false,
            fan: false,
            kelvin_range: Self::placeholder_range(),
        }
    }
}

impl Features {
    /// Range reported for devices without color temperature support.
    fn placeholder_range() -> KelvinRange {
        KelvinRange::new(2200, 6500)
    }

    /// Feature set of a device class.
    pub fn for_class(class: DeviceClass) -> Self {
        let full_color = Features {
            brightness: true,
            color: true,
            color_tmp: true,
            effect: true,
            fan: false,
            kelvin_range: KelvinRange::new(2200, 6500),
        };

        match class {
            DeviceClass::Rgb | DeviceClass::Rgbw => full_color,
            DeviceClass::Fan => Features {
                fan: true,
                kelvin_range: KelvinRange::new(2700, 6500),
                ..full_color
            },
            DeviceClass::Tw => Features {
                brightness: true,
                color_tmp: true,
                kelvin_range: KelvinRange::new(2700, 6500),
                ..Features::default()
            },
            DeviceClass::Dw => Features {
                brightness: true,
                kelvin_range: KelvinRange::new(1800, 1800),
                ..Features::default()
            },
            DeviceClass::Socket => Features::default(),
            DeviceClass::Unknown => Features {
                brightness: true,
                kelvin_range: KelvinRange::new(2700, 2700),
                ..Features::default()
            },
        }
    }
}

/// Module name tokens, most specific first.
const CLASS_TOKENS: &[(&[&str], DeviceClass)] = &[
    (&["SOCKET"], DeviceClass::Socket),
    (&["FAN"], DeviceClass::Fan),
    (&["SHRGB"], DeviceClass::Rgb),
    (&["RGBW"], DeviceClass::Rgbw),
    (&["DHRGB", "LEDRGB"], DeviceClass::Rgb),
    (&["SHTW", "DHTW", "LEDTW"], DeviceClass::Tw),
    (&["SHDW", "DHDW", "LEDDW"], DeviceClass::Dw),
];

impl DeviceClass {
    /// Classify a module name (e.g., "ESP01_SHRGB1C_31").
    ///
    /// Matching is a case-insensitive substring search. Names that match no
    /// known family are [`DeviceClass::Unknown`].
    ///
    /// # Examples
    ///
    /// ```
    /// use wiz_hue_bridge::DeviceClass;
    ///
    /// assert_eq!(DeviceClass::from_module_name("ESP01_SHRGB1C_31"), DeviceClass::Rgb);
    /// assert_eq!(DeviceClass::from_module_name("esp25_socket_01"), DeviceClass::Socket);
    /// assert_eq!(DeviceClass::from_module_name(""), DeviceClass::Unknown);
    /// ```
    pub fn from_module_name(module_name: &str) -> Self {
        let upper = module_name.to_ascii_uppercase();
        CLASS_TOKENS
            .iter()
            .find(|(tokens, _)| tokens.iter().any(|t| upper.contains(t)))
            .map(|(_, class)| *class)
            .unwrap_or(DeviceClass::Unknown)
    }
}

/// Classify a module name into its class and feature set.
pub fn classify(module_name: &str) -> (DeviceClass, Features) {
    let class = DeviceClass::from_module_name(module_name);
    (class, Features::for_class(class))
}
