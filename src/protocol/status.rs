//! Device status documents fetched through the `2nd_mainpage` shadow
//!
//! The backend reports raw 0-3 scales and dBm values; these are mapped to
//! the percentages and 0-4 quality bands the home-automation side displays.

use serde_json::Value;

/// Status of one sensor behind a base station
#[derive(Debug, Clone, PartialEq)]
pub struct SensorStatus {
    pub serial_number: String,
    /// 0-100, from the backend's 0-3 battery scale
    pub battery_percent: i32,
    /// 0-4 connection quality, from the backend's 0-3 rf scale
    pub rf_quality: i32,
    pub online: bool,
}

/// Status of the base station itself
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StationStatus {
    /// 0-4 connection quality derived from the reported wifi RSSI
    pub wifi_quality: i32,
}

impl StationStatus {
    /// Band a raw dBm reading into the 0-4 scale the app shows
    pub fn from_rssi(rssi: i32) -> Self {
        let wifi_quality = if rssi > -60 {
            4
        } else if rssi > -69 {
            3
        } else if rssi > -79 {
            2
        } else if rssi > -90 {
            1
        } else {
            0
        };
        Self { wifi_quality }
    }
}

/// Parsed `2nd_mainpage` reported state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DevicesStatus {
    pub sensors: Vec<SensorStatus>,
    pub station: Option<StationStatus>,
}

impl DevicesStatus {
    /// Decode the reported-state body of a `2nd_mainpage` GET reply.
    ///
    /// Fields arrive as strings; absent fields default rather than fail so a
    /// partially reporting station still yields the sensors it knows about.
    pub fn from_body(body: &Value) -> Self {
        let mut status = DevicesStatus::default();

        if let Some(devices) = body.get("devs").and_then(Value::as_object) {
            for (serial_number, device) in devices {
                let online = device
                    .get("online")
                    .and_then(Value::as_str)
                    .map(|v| v == "1")
                    .unwrap_or(false);
                let battery_percent = device
                    .get("batInfo")
                    .and_then(Value::as_str)
                    .and_then(|v| v.parse::<f64>().ok())
                    .map(|v| (v / 3.0 * 100.0) as i32)
                    .unwrap_or(0);
                // map max value 3 to max value 4
                let rf_quality = device
                    .get("rfLevel")
                    .and_then(Value::as_str)
                    .and_then(|v| v.parse::<f64>().ok())
                    .map(|v| (v / 3.0 * 4.0) as i32)
                    .unwrap_or(0);

                status.sensors.push(SensorStatus {
                    serial_number: serial_number.clone(),
                    battery_percent,
                    rf_quality,
                    online,
                });
            }
        }

        status.station = body
            .get("wifiRSSI")
            .and_then(Value::as_str)
            .and_then(|v| v.parse::<i32>().ok())
            .map(StationStatus::from_rssi);

        status
    }
}
