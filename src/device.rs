//! Device records as discovered, queried and persisted.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::config::{DeviceClass, Features, SystemConfig, classify};
use crate::errors::Error;

/// Everything known about one bulb: identity, network metadata and its
/// capabilities.
///
/// A record that could not be queried is still a record. It carries
/// `is_valid == false` and the message of the error that ended the query.
#[serde_with::skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub ip: String,
    #[serde(default)]
    pub mac: String,
    #[serde(default)]
    pub module_name: String,
    #[serde(default)]
    pub fw_version: String,
    #[serde(default)]
    pub rssi: i32,
    pub home_id: Option<u64>,
    pub room_id: Option<u64>,
    #[serde(default)]
    pub src: String,
    #[serde(default = "DeviceRecord::unknown_class")]
    pub bulb_class: DeviceClass,
    #[serde(default)]
    pub features: Features,
    #[serde(default)]
    pub is_valid: bool,
    pub error_message: Option<String>,
}

impl DeviceRecord {
    fn unknown_class() -> DeviceClass {
        DeviceClass::Unknown
    }

    /// Build a valid record from a bulb's system configuration.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::net::Ipv4Addr;
    /// use wiz_hue_bridge::{DeviceClass, DeviceRecord, SystemConfig};
    ///
    /// let config: SystemConfig = serde_json::from_str(
    ///     r#"{"mac":"a8bb5006abcd","moduleName":"ESP01_SHTW1C_31","rssi":-60}"#,
    /// ).unwrap();
    /// let record = DeviceRecord::from_config(Ipv4Addr::new(10, 0, 0, 5), &config);
    /// assert!(record.is_valid);
    /// assert_eq!(record.bulb_class, DeviceClass::Tw);
    /// assert_eq!(record.ip, "10.0.0.5");
    /// ```
    pub fn from_config(ip: Ipv4Addr, config: &SystemConfig) -> Self {
        let module_name = config.module_name.clone().unwrap_or_default();
        let (bulb_class, features) = classify(&module_name);

        DeviceRecord {
            ip: ip.to_string(),
            mac: config.mac.clone(),
            module_name,
            fw_version: config.fw_version.clone().unwrap_or_default(),
            rssi: config.rssi.unwrap_or_default(),
            home_id: config.home_id,
            room_id: config.room_id,
            src: config.src.clone().unwrap_or_default(),
            bulb_class,
            features,
            is_valid: true,
            error_message: None,
        }
    }

    /// A record for an address whose capability query failed.
    pub fn invalid(ip: Ipv4Addr, err: &Error) -> Self {
        DeviceRecord {
            ip: ip.to_string(),
            mac: String::new(),
            module_name: String::new(),
            fw_version: String::new(),
            rssi: 0,
            home_id: None,
            room_id: None,
            src: String::new(),
            bulb_class: DeviceClass::Unknown,
            features: Features::for_class(DeviceClass::Unknown),
            is_valid: false,
            error_message: Some(err.to_string()),
        }
    }

    /// The record's address, parsed.
    pub fn ipv4(&self) -> Result<Ipv4Addr, Error> {
        self.ip
            .parse()
            .map_err(|_| Error::InvalidAddress(self.ip.clone()))
    }
}
