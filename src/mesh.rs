//! The boundary to the mesh (Hue/Zigbee-style) light stack.
//!
//! The stack itself (clusters, attribute encoding, commissioning) lives
//! outside this crate. The bridge only needs to register one light endpoint
//! per bulb, receive the events the stack decodes for it, and push attribute
//! values back when the bulb side changes.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::DeviceClass;
use crate::device::DeviceRecord;
use crate::errors::Error;
use crate::types::{Color, ColorXy, Mireds};

/// Kind of light an endpoint presents to the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeshDeviceType {
    ExtendedColor,
    ColorTemperature,
    Dimmable,
    OnOff,
}

impl MeshDeviceType {
    /// The device type a bulb is exposed as.
    pub fn for_record(record: &DeviceRecord) -> Self {
        match record.bulb_class {
            DeviceClass::Rgb | DeviceClass::Rgbw => MeshDeviceType::ExtendedColor,
            DeviceClass::Tw => MeshDeviceType::ColorTemperature,
            DeviceClass::Dw if record.features.brightness => MeshDeviceType::Dimmable,
            _ => MeshDeviceType::OnOff,
        }
    }
}

/// Model name announced for a bulb, so hubs pick a sensible icon.
pub fn model_name(record: &DeviceRecord) -> &'static str {
    match record.bulb_class {
        DeviceClass::Rgb | DeviceClass::Rgbw => "WizHue(LCA001)",
        DeviceClass::Tw => "WizHue(LWO003)",
        DeviceClass::Dw if record.features.brightness => "WizHue(LTA005)",
        DeviceClass::Dw => "WizHue(OnOff)",
        DeviceClass::Socket => "WizHue(Socket)",
        DeviceClass::Fan => "WizHue(Fan)",
        DeviceClass::Unknown => "WizHue(Unknown)",
    }
}

/// Which color attribute the mesh side last set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorMode {
    HueSaturation,
    Xy,
    Temperature,
}

/// A light command decoded by the mesh stack.
///
/// The stack always reports the full light (color and temperature
/// included), so the bridge has to work out which of them actually changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightChange {
    pub on: bool,
    pub color: Color,
    pub level: u8,
    pub mireds: u16,
    pub color_mode: Option<ColorMode>,
}

/// Events the mesh stack delivers to one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshEvent {
    LightChange(LightChange),
    Identify { time: u16 },
}

/// Attribute values pushed to the mesh after the bulb side changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MeshAttributes {
    pub on: bool,
    pub level: Option<u8>,
    pub color: Option<Color>,
    pub mireds: Option<Mireds>,
    pub color_mode: Option<ColorMode>,
}

impl MeshAttributes {
    /// The color as the xy pair the color cluster stores.
    pub fn xy(&self) -> Option<ColorXy> {
        self.color.map(|c| c.to_xy())
    }
}

/// Everything the stack needs to create a light endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSpec {
    pub endpoint: u8,
    pub device_type: MeshDeviceType,
    pub manufacturer: &'static str,
    pub model: &'static str,
    /// Supported color temperature as `(min, max)` mireds.
    pub mireds_range: (Mireds, Mireds),
}

impl EndpointSpec {
    /// # Examples
    ///
    /// ```
    /// use wiz_hue_bridge::{DeviceRecord, EndpointSpec, MeshDeviceType, SystemConfig};
    ///
    /// let config: SystemConfig = serde_json::from_str(r#"{"mac":"aa","moduleName":"ESP01_SHTW1C_31"}"#).unwrap();
    /// let record = DeviceRecord::from_config("10.0.0.2".parse().unwrap(), &config);
    /// let spec = EndpointSpec::for_record(10, &record);
    /// assert_eq!(spec.device_type, MeshDeviceType::ColorTemperature);
    /// assert_eq!(spec.model, "WizHue(LWO003)");
    /// assert_eq!(spec.mireds_range.0.mireds(), 153);
    /// assert_eq!(spec.mireds_range.1.mireds(), 370);
    /// ```
    pub fn for_record(endpoint: u8, record: &DeviceRecord) -> Self {
        EndpointSpec {
            endpoint,
            device_type: MeshDeviceType::for_record(record),
            manufacturer: "nkey",
            model: model_name(record),
            mireds_range: record.features.kelvin_range.mireds_range(),
        }
    }
}

/// A light endpoint registered with the mesh stack.
pub trait MeshEndpoint: Send + Sync {
    fn endpoint(&self) -> u8;

    /// Publish new attribute values for this light.
    fn push_attributes(&self, attrs: &MeshAttributes);
}

/// The mesh stack, as far as the bridge needs it.
pub trait MeshStack: Send + Sync {
    /// Create a light endpoint. Events for it are delivered through
    /// [`crate::BridgeRegistry::dispatch`].
    fn register_light(&self, spec: &EndpointSpec) -> Result<Arc<dyn MeshEndpoint>, Error>;

    /// True while the stack is joined to its network.
    fn is_connected(&self) -> bool;
}

impl fmt::Debug for dyn MeshEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeshEndpoint")
            .field("endpoint", &self.endpoint())
            .finish()
    }
}
