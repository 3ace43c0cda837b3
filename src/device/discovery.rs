//! Device listing decoding and discovery polling.
//!
//! The listing command's output shape varies between tool versions, so decoding
//! is an ordered list of attempts. Each attempt either yields normalized
//! [`Device`] values or declines, and the next one is tried.

use super::{DeviceTool, ToolCommand};
use crate::error::{Result, StagingError};
use crate::models::Device;
use crate::system::poll_for;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

/// A single decode attempt over parsed JSON.
pub type Decoder = fn(&Value) -> Option<Vec<Device>>;

/// JSON decode attempts, highest priority first.
pub const DECODERS: &[(&str, Decoder)] = &[
    ("flat-array", decode_flat_array),
    ("devices-wrapper", decode_devices_wrapper),
    ("device-list-wrapper", decode_device_list_wrapper),
];

const IDENTIFIER_KEYS: &[&str] = &["Udid", "UniqueDeviceID", "Identifier"];
const NAME_KEYS: &[&str] = &["DeviceName", "ProductName"];
const PRODUCT_TYPE_KEYS: &[&str] = &["ProductType"];
const HARDWARE_MODEL_KEYS: &[&str] = &["HardwareModel"];
const SERIAL_KEYS: &[&str] = &["SerialNumber"];

fn decode_flat_array(value: &Value) -> Option<Vec<Device>> {
    devices_from_array(value.as_array()?)
}

fn decode_devices_wrapper(value: &Value) -> Option<Vec<Device>> {
    devices_from_array(wrapped_array(value, "devices")?)
}

fn decode_device_list_wrapper(value: &Value) -> Option<Vec<Device>> {
    devices_from_array(wrapped_array(value, "deviceList")?)
}

fn wrapped_array<'a>(value: &'a Value, key: &str) -> Option<&'a Vec<Value>> {
    value
        .as_object()?
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .and_then(|(_, v)| v.as_array())
}

fn devices_from_array(items: &[Value]) -> Option<Vec<Device>> {
    let devices: Vec<Device> = items
        .iter()
        .filter_map(Value::as_object)
        .filter_map(device_from_object)
        .collect();
    (!devices.is_empty()).then_some(devices)
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Flatten scalars plus one nested object level (e.g. `DeviceValues`).
/// Top-level fields win over nested ones.
fn flatten(object: &Map<String, Value>) -> BTreeMap<String, String> {
    let mut attributes = BTreeMap::new();
    for (key, value) in object {
        if let Some(text) = scalar_text(value) {
            attributes.insert(key.clone(), text);
        }
    }
    for value in object.values() {
        if let Value::Object(nested) = value {
            for (key, value) in nested {
                if let Some(text) = scalar_text(value) {
                    attributes.entry(key.clone()).or_insert(text);
                }
            }
        }
    }
    attributes
}

fn lookup(attributes: &BTreeMap<String, String>, aliases: &[&str]) -> Option<String> {
    aliases.iter().find_map(|alias| {
        attributes
            .iter()
            .find(|(key, value)| key.eq_ignore_ascii_case(alias) && !value.is_empty())
            .map(|(_, value)| value.clone())
    })
}

fn device_from_attributes(attributes: BTreeMap<String, String>) -> Option<Device> {
    let identifier = lookup(&attributes, IDENTIFIER_KEYS)?;
    Some(Device {
        identifier,
        name: lookup(&attributes, NAME_KEYS).unwrap_or_default(),
        product_type: lookup(&attributes, PRODUCT_TYPE_KEYS).unwrap_or_default(),
        hardware_model: lookup(&attributes, HARDWARE_MODEL_KEYS).unwrap_or_default(),
        serial_number: lookup(&attributes, SERIAL_KEYS),
        attributes,
    })
}

fn device_from_object(object: &Map<String, Value>) -> Option<Device> {
    device_from_attributes(flatten(object))
}

/// `Key: Value` lines, the shape printed by `ideviceinfo`.
fn decode_key_value_text(text: &str) -> Option<Device> {
    let attributes: BTreeMap<String, String> = text
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim(), value.trim()))
        .filter(|(key, _)| !key.is_empty() && !key.contains(char::is_whitespace))
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    device_from_attributes(attributes)
}

fn decode_json(text: &str) -> Option<Device> {
    let value: Value = serde_json::from_str(text).ok()?;
    DECODERS.iter().find_map(|(name, decode)| {
        let mut devices = decode(&value)?;
        log::debug!(
            "[Discovery] '{}' decoder matched {} device(s)",
            name,
            devices.len()
        );
        Some(devices.remove(0))
    })
}

/// Decode the first device from raw listing output, or `None` if nothing usable.
///
/// JSON is tried on the whole text, then on each line starting with `{` or `[`
/// (the tool may interleave log noise), then the text is read as `Key: Value` lines.
pub fn decode_device_listing(text: &str) -> Option<Device> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    decode_json(trimmed)
        .or_else(|| {
            trimmed
                .lines()
                .map(str::trim)
                .filter(|line| line.starts_with('{') || line.starts_with('['))
                .find_map(decode_json)
        })
        .or_else(|| decode_key_value_text(trimmed))
}

/// Poll the listing command until a device decodes or `timeout` elapses.
///
/// Undecodable output and a hung listing are retried; failing to run the tool
/// at all is fatal.
pub async fn discover(tool: &dyn DeviceTool, interval: Duration, timeout: Duration) -> Result<Device> {
    let command = ToolCommand::ListDevices;
    let found = poll_for(
        || {
            let command = &command;
            async move {
                match tool.run(command).await {
                    Ok(output) => decode_device_listing(&output.stdout).map(Ok),
                    Err(e @ StagingError::CommandTimeout { .. }) => {
                        log::debug!("[Discovery] listing attempt abandoned: {}", e);
                        None
                    }
                    Err(e) => Some(Err(e)),
                }
            }
        },
        interval,
        timeout,
    )
    .await;

    match found {
        Some(result) => result,
        None => Err(StagingError::DiscoveryTimeout {
            waited_secs: timeout.as_secs(),
        }),
    }
}
