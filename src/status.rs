//! Live bulb state, as read with `getPilot` or pushed with `syncPilot`.

use serde::{Deserialize, Serialize};

use crate::errors::Error;
use crate::runtime::Instant;
use crate::types::{Brightness, Color, Kelvin};

/// A point-in-time snapshot of a bulb.
///
/// Every numeric field is optional: a bulb in a scene reports no color, a
/// white bulb reports no channels at all. An absent value is unknown, which
/// is not the same as zero.
#[serde_with::skip_serializing_none]
#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceState {
    #[serde(default)]
    pub state: bool,
    pub dimming: Option<u8>,
    pub r: Option<u8>,
    pub g: Option<u8>,
    pub b: Option<u8>,
    pub c: Option<u8>,
    pub w: Option<u8>,
    pub temp: Option<u16>,
    pub scene_id: Option<u16>,
    pub speed: Option<u8>,
    #[serde(rename = "fanspd")]
    pub fan_speed: Option<u8>,
    #[serde(skip)]
    pub is_valid: bool,
    #[serde(skip)]
    pub error_message: Option<String>,
    #[serde(skip)]
    pub updated_at: Option<Instant>,
}

impl DeviceState {
    /// Parse a `result` (or push `params`) object reported by a bulb.
    ///
    /// # Examples
    ///
    /// ```
    /// use wiz_hue_bridge::DeviceState;
    ///
    /// let result = serde_json::json!({"mac": "a8bb5006abcd", "state": true, "dimming": 40, "temp": 3000});
    /// let state = DeviceState::from_result(result).unwrap();
    /// assert!(state.is_valid);
    /// assert_eq!(state.dimming, Some(40));
    /// assert_eq!(state.r, None);
    /// ```
    pub fn from_result(result: serde_json::Value) -> Result<Self, Error> {
        let mut state: DeviceState = serde_json::from_value(result).map_err(Error::JsonLoad)?;
        state.is_valid = true;
        state.updated_at = Some(Instant::now());
        Ok(state)
    }

    /// A state for a read that failed.
    pub fn invalid(err: &Error) -> Self {
        DeviceState {
            error_message: Some(err.to_string()),
            updated_at: Some(Instant::now()),
            ..DeviceState::default()
        }
    }

    /// The RGB color, if all three channels are known.
    pub fn color(&self) -> Option<Color> {
        Color::from_channels(self.r, self.g, self.b)
    }

    pub fn set_color(&mut self, color: Option<Color>) {
        self.r = color.map(|c| c.red());
        self.g = color.map(|c| c.green());
        self.b = color.map(|c| c.blue());
    }

    pub fn kelvin(&self) -> Option<Kelvin> {
        self.temp.and_then(Kelvin::create)
    }

    pub fn brightness(&self) -> Option<Brightness> {
        self.dimming.and_then(Brightness::create)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_fields_stay_unknown() {
        let state = DeviceState::from_result(json!({
            "mac": "a8bb5006abcd",
            "rssi": -61,
            "state": false,
            "sceneId": 0,
            "r": 255,
            "g": 0,
            "b": 12,
            "dimming": 10
        }))
        .unwrap();
        assert_eq!(state.color(), Some(Color::rgb(255, 0, 12)));
        assert_eq!(state.temp, None);
        assert_eq!(state.c, None);
        assert_eq!(state.scene_id, Some(0));
        assert!(!state.state);
    }

    #[test]
    fn test_malformed_result_is_an_error() {
        let err = DeviceState::from_result(json!({"dimming": "bright"})).unwrap_err();
        assert!(matches!(err, Error::JsonLoad(_)));
    }

    #[test]
    fn test_invalid_state_carries_message() {
        let state = DeviceState::invalid(&Error::missing_result("getPilot"));
        assert!(!state.is_valid);
        assert!(state.error_message.unwrap().contains("getPilot"));
        assert!(state.updated_at.is_some());
    }

    #[test]
    fn test_serialized_state_is_sparse() {
        let mut state = DeviceState {
            state: true,
            dimming: Some(50),
            ..DeviceState::default()
        };
        state.set_color(Some(Color::rgb(1, 2, 3)));
        assert_eq!(
            serde_json::to_value(&state).unwrap(),
            json!({"state": true, "dimming": 50, "r": 1, "g": 2, "b": 3})
        );
    }
}
