//! Sparse `setPilot` parameters.

use serde::{Deserialize, Serialize};

use crate::config::Features;
use crate::status::DeviceState;

/// The parameters of a `setPilot` request.
///
/// Only fields that are set are sent, so a payload never touches an
/// attribute the caller did not intend to change.
///
/// # Examples
///
/// ```
/// use wiz_hue_bridge::{DeviceClass, DeviceState, Features, Payload};
///
/// let state = DeviceState { state: true, r: Some(255), g: Some(0), b: Some(0), temp: Some(4000), ..Default::default() };
/// let tw = Features::for_class(DeviceClass::Tw);
/// let json = serde_json::to_value(Payload::for_device(&tw, &state)).unwrap();
/// assert_eq!(json, serde_json::json!({"state": true, "temp": 4000}));
/// ```
#[serde_with::skip_serializing_none]
#[derive(Default, Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Payload {
    pub(crate) state: bool,
    pub(crate) dimming: Option<u8>,
    #[serde(rename = "r")]
    pub(crate) red: Option<u8>,
    #[serde(rename = "g")]
    pub(crate) green: Option<u8>,
    #[serde(rename = "b")]
    pub(crate) blue: Option<u8>,
    #[serde(rename = "c")]
    pub(crate) cool: Option<u8>,
    #[serde(rename = "w")]
    pub(crate) warm: Option<u8>,
    pub(crate) temp: Option<u16>,
    #[serde(rename = "sceneId")]
    pub(crate) scene: Option<u16>,
    pub(crate) speed: Option<u8>,
    #[serde(rename = "fanspd")]
    pub(crate) fan_speed: Option<u8>,
}

impl Payload {
    /// Build the request for a device, keeping only what it supports.
    ///
    /// `state` is always sent. Percentages above 100 and temperatures
    /// outside the device's Kelvin range are dropped.
    pub fn for_device(features: &Features, desired: &DeviceState) -> Self {
        let mut p = Payload {
            state: desired.state,
            ..Payload::default()
        };

        if features.brightness {
            p.dimming = desired.dimming.filter(|d| *d <= 100);
        }
        if features.color {
            p.red = desired.r;
            p.green = desired.g;
            p.blue = desired.b;
            p.cool = desired.c;
            p.warm = desired.w;
        }
        if features.color_tmp {
            p.temp = desired
                .temp
                .filter(|t| features.kelvin_range.contains(*t));
        }
        if features.effect {
            p.scene = desired.scene_id;
            p.speed = desired.speed.filter(|s| *s <= 100);
        }
        if features.fan {
            p.fan_speed = desired.fan_speed.filter(|s| *s <= 100);
        }

        p
    }

    /// True if the payload carries any of the color channels.
    pub fn has_color(&self) -> bool {
        self.red.is_some() || self.green.is_some() || self.blue.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceClass;
    use serde_json::json;
    use strum::IntoEnumIterator;

    fn everything() -> DeviceState {
        DeviceState {
            state: true,
            dimming: Some(80),
            r: Some(10),
            g: Some(20),
            b: Some(30),
            c: Some(5),
            w: Some(6),
            temp: Some(3000),
            scene_id: Some(4),
            speed: Some(100),
            fan_speed: Some(2),
            ..DeviceState::default()
        }
    }

    #[test]
    fn test_never_sends_unsupported_fields() {
        let desired = everything();
        for class in DeviceClass::iter() {
            let features = Features::for_class(class);
            let p = Payload::for_device(&features, &desired);
            assert!(features.brightness || p.dimming.is_none(), "{class}");
            assert!(features.color || (!p.has_color() && p.cool.is_none() && p.warm.is_none()));
            assert!(features.color_tmp || p.temp.is_none(), "{class}");
            assert!(features.effect || (p.scene.is_none() && p.speed.is_none()));
            assert!(features.fan || p.fan_speed.is_none(), "{class}");
            assert!(p.state);
        }
    }

    #[test]
    fn test_socket_gets_state_only() {
        let p = Payload::for_device(&Features::for_class(DeviceClass::Socket), &everything());
        assert_eq!(serde_json::to_value(p).unwrap(), json!({"state": true}));
    }

    #[test]
    fn test_unknown_values_are_not_sent() {
        let features = Features::for_class(DeviceClass::Rgb);
        let desired = DeviceState {
            state: false,
            dimming: Some(30),
            ..DeviceState::default()
        };
        assert_eq!(
            serde_json::to_value(Payload::for_device(&features, &desired)).unwrap(),
            json!({"state": false, "dimming": 30})
        );
    }

    #[test]
    fn test_out_of_range_values_are_dropped() {
        let features = Features::for_class(DeviceClass::Tw);
        let desired = DeviceState {
            state: true,
            dimming: Some(140),
            temp: Some(2200),
            ..DeviceState::default()
        };
        let p = Payload::for_device(&features, &desired);
        assert_eq!(p.dimming, None);
        assert_eq!(p.temp, None);
    }

    #[test]
    fn test_fan_speed_key() {
        let p = Payload::for_device(&Features::for_class(DeviceClass::Fan), &everything());
        let value = serde_json::to_value(p).unwrap();
        assert_eq!(value["fanspd"], 2);
        assert_eq!(value["sceneId"], 4);
    }
}
