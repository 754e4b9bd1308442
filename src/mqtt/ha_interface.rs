//! Home Assistant MQTT discovery payloads and topic naming.
//!
//! Topic layout per sensor:
//! `<hass_discovery_prefix>/<platform>/<device_id>/<unique_id>/{config,state}`
//! where `device_id` is `<model>_<serial>` and `unique_id` appends the
//! parameter's entity name (or address) plus a positional index when the
//! response carried several values.

use crate::config::{MqttConfig, ParameterName};
use crate::meter::structs::{DeviceInfo, ReadingValue};
use serde::Serialize;

pub const PLATFORM_SENSOR: &str = "sensor";
pub const PLATFORM_BINARY_SENSOR: &str = "binary_sensor";

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct HaDevice {
    pub name: String,
    pub ids: String,
    pub model: String,
    pub sw_version: String,
}

impl HaDevice {
    fn new(device: &DeviceInfo) -> Self {
        HaDevice {
            name: device.serial_number.clone(),
            ids: device.device_id(),
            model: device.model.clone(),
            sw_version: device.sw_version.clone(),
        }
    }
}

fn is_none(value: &Option<String>) -> bool {
    value.is_none()
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct HaSensorConfig {
    pub name: String,
    pub device: HaDevice,
    pub device_class: String,
    pub unique_id: String,
    pub object_id: String,
    #[serde(skip_serializing_if = "is_none")]
    pub unit_of_measurement: Option<String>,
    #[serde(skip_serializing_if = "is_none")]
    pub state_class: Option<String>,
    #[serde(skip_serializing_if = "is_none")]
    pub entity_category: Option<String>,
    pub state_topic: String,
    pub value_template: String,
}

/// One publishable sensor: discovery config plus the state value for this
/// cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HassSensor {
    pub unique_id: String,
    pub config_topic: String,
    pub state_topic: String,
    pub config: HaSensorConfig,
    pub state_value: String,
}

impl HassSensor {
    pub fn state_payload(&self) -> serde_json::Value {
        serde_json::json!({ "value": self.state_value })
    }
}

fn topic_base(mqtt: &MqttConfig, platform: &str, device_id: &str, unique_id: &str) -> String {
    let mut parts = Vec::with_capacity(4);
    if !mqtt.hass_discovery_prefix.is_empty() {
        parts.push(mqtt.hass_discovery_prefix.as_str());
    }
    parts.push(platform);
    parts.push(device_id);
    parts.push(unique_id);
    parts.join("/")
}

/// Maps one meter reading to its sensor(s). Multi-value responses produce
/// one sensor per value with a positional index worked into the unique id
/// and the display name.
pub fn sensors_for_reading(
    mqtt: &MqttConfig,
    device: &DeviceInfo,
    reading: &ReadingValue,
) -> Vec<HassSensor> {
    let spec = &reading.request.spec;
    let device_id = device.device_id();
    let multi = reading.values.len() > 1;

    reading
        .values
        .iter()
        .enumerate()
        .map(|(idx, value)| {
            let mut unique_id = format!("{}_{}", device_id, spec.entity_id());
            let name = if multi {
                unique_id.push_str(&format!("_{idx}"));
                match &spec.name {
                    ParameterName::PerValue(_) => spec
                        .name
                        .for_index(idx)
                        .map(str::to_string)
                        // Names are validated against the response length, but
                        // keep the address fallback for resilience
                        .unwrap_or_else(|| format!("{}_{}", spec.address, idx)),
                    ParameterName::Single(name) => format!("{name}_{idx}"),
                }
            } else {
                spec.name.primary().to_string()
            };

            let base = topic_base(mqtt, PLATFORM_SENSOR, &device_id, &unique_id);
            let state_topic = format!("{base}/state");
            HassSensor {
                config_topic: format!("{base}/config"),
                config: HaSensorConfig {
                    name,
                    device: HaDevice::new(device),
                    device_class: spec.device_class.clone(),
                    unique_id: unique_id.clone(),
                    object_id: unique_id.clone(),
                    unit_of_measurement: spec.unit.clone(),
                    state_class: spec.state_class.clone(),
                    entity_category: spec.entity_category.clone(),
                    state_topic: state_topic.clone(),
                    value_template: "{{ value_json.value }}".to_string(),
                },
                state_topic,
                unique_id,
                state_value: value.clone(),
            }
        })
        .collect()
}

/// Pseudo binary sensor reflecting whether the meter responded during the
/// last cycle. Its state topic also carries the MQTT last will.
pub fn online_sensor(mqtt: &MqttConfig, device: &DeviceInfo, online: bool) -> HassSensor {
    let device_id = device.device_id();
    let unique_id = format!("{device_id}_IS_ONLINE");
    let base = topic_base(mqtt, PLATFORM_BINARY_SENSOR, &device_id, &unique_id);
    let state_topic = format!("{base}/state");

    HassSensor {
        config_topic: format!("{base}/config"),
        config: HaSensorConfig {
            name: "Meter online status".to_string(),
            device: HaDevice::new(device),
            device_class: "connectivity".to_string(),
            unique_id: unique_id.clone(),
            object_id: unique_id.clone(),
            unit_of_measurement: None,
            state_class: None,
            entity_category: Some("diagnostic".to_string()),
            state_topic: state_topic.clone(),
            value_template: "{{ value_json.value }}".to_string(),
        },
        state_topic,
        unique_id,
        state_value: if online { "ON" } else { "OFF" }.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParameterSpec;
    use crate::resolver::ResolvedRequest;

    fn mqtt_config() -> MqttConfig {
        MqttConfig {
            host: "mqtt.example.org".to_string(),
            port: 1883,
            user: None,
            password: None,
            hass_discovery_prefix: "homeassistant".to_string(),
            tls: false,
        }
    }

    fn device() -> DeviceInfo {
        DeviceInfo {
            model: "CE301".to_string(),
            sw_version: "12.02".to_string(),
            serial_number: "00123456".to_string(),
        }
    }

    fn reading(name: ParameterName, values: &[&str]) -> ReadingValue {
        ReadingValue {
            request: ResolvedRequest {
                spec: ParameterSpec {
                    address: "POWEP".to_string(),
                    name,
                    device_class: "power".to_string(),
                    state_class: Some("measurement".to_string()),
                    unit: Some("kW".to_string()),
                    additional_data: None,
                    entity_name: None,
                    response_idx: None,
                    entity_category: None,
                },
                additional_data: None,
            },
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    #[test]
    fn test_single_value_topics() {
        let reading = reading(ParameterName::Single("Active energy".to_string()), &["120"]);
        let sensors = sensors_for_reading(&mqtt_config(), &device(), &reading);

        assert_eq!(sensors.len(), 1);
        assert_eq!(
            sensors[0].config_topic,
            "homeassistant/sensor/CE301_00123456/CE301_00123456_POWEP/config"
        );
        assert_eq!(
            sensors[0].state_topic,
            "homeassistant/sensor/CE301_00123456/CE301_00123456_POWEP/state"
        );
        assert_eq!(sensors[0].config.name, "Active energy");
        assert_eq!(sensors[0].state_value, "120");
        assert_eq!(
            sensors[0].state_payload(),
            serde_json::json!({ "value": "120" })
        );
    }

    #[test]
    fn test_multi_value_sequence_names() {
        let reading = reading(
            ParameterName::PerValue(vec!["active".to_string(), "reactive".to_string()]),
            &["120", "15"],
        );
        let sensors = sensors_for_reading(&mqtt_config(), &device(), &reading);

        assert_eq!(sensors.len(), 2);
        assert_eq!(sensors[0].config.name, "active");
        assert_eq!(sensors[0].state_value, "120");
        assert_eq!(sensors[0].unique_id, "CE301_00123456_POWEP_0");
        assert_eq!(sensors[1].config.name, "reactive");
        assert_eq!(sensors[1].state_value, "15");
        assert_eq!(sensors[1].unique_id, "CE301_00123456_POWEP_1");
    }

    #[test]
    fn test_multi_value_single_name_gets_index_suffix() {
        let reading = reading(
            ParameterName::Single("Active energy".to_string()),
            &["1", "2", "3"],
        );
        let sensors = sensors_for_reading(&mqtt_config(), &device(), &reading);
        let names: Vec<&str> = sensors.iter().map(|s| s.config.name.as_str()).collect();
        assert_eq!(names, ["Active energy_0", "Active energy_1", "Active energy_2"]);
    }

    #[test]
    fn test_entity_name_overrides_address_in_unique_id() {
        let mut reading = reading(ParameterName::Single("Prev month".to_string()), &["5"]);
        reading.request.spec.entity_name = Some("ENMPE_PREV_MONTH".to_string());
        let sensors = sensors_for_reading(&mqtt_config(), &device(), &reading);
        assert_eq!(sensors[0].unique_id, "CE301_00123456_ENMPE_PREV_MONTH");
    }

    #[test]
    fn test_empty_discovery_prefix_omitted() {
        let mut config = mqtt_config();
        config.hass_discovery_prefix = String::new();
        let reading = reading(ParameterName::Single("Active energy".to_string()), &["1"]);
        let sensors = sensors_for_reading(&config, &device(), &reading);
        assert_eq!(
            sensors[0].config_topic,
            "sensor/CE301_00123456/CE301_00123456_POWEP/config"
        );
    }

    #[test]
    fn test_optional_fields_skipped_in_config_payload() {
        let sensor = online_sensor(&mqtt_config(), &device(), true);
        let json = serde_json::to_value(&sensor.config).unwrap();
        assert!(json.get("unit_of_measurement").is_none());
        assert!(json.get("state_class").is_none());
        assert_eq!(json["device_class"], "connectivity");
        assert_eq!(json["entity_category"], "diagnostic");
    }

    #[test]
    fn test_online_sensor_states() {
        let on = online_sensor(&mqtt_config(), &device(), true);
        let off = online_sensor(&mqtt_config(), &device(), false);
        assert_eq!(on.state_value, "ON");
        assert_eq!(off.state_value, "OFF");
        assert_eq!(on.state_topic, off.state_topic);
        assert_eq!(
            on.state_topic,
            "homeassistant/binary_sensor/CE301_00123456/CE301_00123456_IS_ONLINE/state"
        );
    }
}
