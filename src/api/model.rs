//! Domain model parsed from API reply bodies

use crate::protocol::status::{SensorStatus, StationStatus};
use serde_json::Value;

/// Device category reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Sbs50,
    Xs01M,
    Unknown,
}

impl DeviceType {
    pub fn from_category(category: &str) -> Self {
        match category {
            "SBS50" => DeviceType::Sbs50,
            "XS01-M" | "XS01M" => DeviceType::Xs01M,
            _ => DeviceType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Sbs50 => "SBS50",
            DeviceType::Xs01M => "XS01M",
            DeviceType::Unknown => "UNKNOWN",
        }
    }
}

/// A house groups devices under one backend region
#[derive(Debug, Clone, PartialEq)]
pub struct House {
    pub house_id: String,
    pub house_name: String,
    pub mqtt_region: String,
    pub mqtt_server: String,
}

/// Room within a house
#[derive(Debug, Clone, PartialEq)]
pub struct Room {
    pub house_id: String,
    pub room_id: String,
    pub room_name: String,
}

/// A base station and the sensors behind it
#[derive(Debug, Clone, PartialEq)]
pub struct Station {
    pub station_id: String,
    pub station_name: String,
    pub serial_number: String,
    pub room_id: String,
    pub house_id: String,
    pub device_type: DeviceType,
    pub online: bool,
    pub user_id: String,
    pub sensors: Vec<Sensor>,
    pub status: Option<StationStatus>,
}

impl Station {
    /// Thing name addressed in shadow topics: category + serial
    pub fn thing_name(&self) -> String {
        format!("{}{}", self.device_type.as_str(), self.serial_number)
    }

    pub fn sensor(&self, serial_number: &str) -> Option<&Sensor> {
        self.sensors
            .iter()
            .find(|sensor| sensor.serial_number == serial_number)
    }
}

/// A smoke detector connected through a station
#[derive(Debug, Clone, PartialEq)]
pub struct Sensor {
    pub device_id: String,
    pub device_name: String,
    pub serial_number: String,
    pub room_id: String,
    pub house_id: String,
    pub device_type: DeviceType,
    pub status: Option<SensorStatus>,
}

/// Parse the `reData` array of a houses reply
pub fn houses_from_body(body: &Value) -> Vec<House> {
    let Some(entries) = body.as_array() else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| {
            Some(House {
                house_id: entry.get("houseId")?.as_str()?.to_string(),
                house_name: entry.get("houseName")?.as_str()?.to_string(),
                mqtt_region: entry.get("mqttRegion")?.as_str()?.to_string(),
                mqtt_server: entry.get("mqttServer")?.as_str()?.to_string(),
            })
        })
        .collect()
}

/// Parse the `reData` array of a rooms reply
pub fn rooms_from_body(body: &Value) -> Vec<Room> {
    let Some(entries) = body.as_array() else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| {
            Some(Room {
                house_id: entry.get("houseId")?.as_str()?.to_string(),
                room_id: entry.get("roomId")?.as_str()?.to_string(),
                room_name: entry.get("roomName")?.as_str()?.to_string(),
            })
        })
        .collect()
}

/// Parse the `reData` object of a devices reply into stations with their
/// sensors attached.
pub fn stations_from_body(body: &Value) -> Vec<Station> {
    let Some(house_id) = body.get("houseId").and_then(Value::as_str) else {
        return Vec::new();
    };
    let Some(stations) = body.get("stations").and_then(Value::as_array) else {
        return Vec::new();
    };

    stations
        .iter()
        .filter_map(|entry| {
            let sensors = entry
                .get("devices")
                .and_then(Value::as_array)
                .map(|devices| {
                    devices
                        .iter()
                        .filter_map(|device| {
                            Some(Sensor {
                                device_id: device.get("deviceId")?.as_str()?.to_string(),
                                device_name: device.get("deviceName")?.as_str()?.to_string(),
                                serial_number: device.get("deviceSn")?.as_str()?.to_string(),
                                room_id: device.get("roomId")?.as_str()?.to_string(),
                                house_id: house_id.to_string(),
                                device_type: DeviceType::from_category(
                                    device.get("deviceType")?.as_str()?,
                                ),
                                status: None,
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();

            Some(Station {
                station_id: entry.get("stationId")?.as_str()?.to_string(),
                station_name: entry.get("stationName")?.as_str()?.to_string(),
                serial_number: entry.get("stationSn")?.as_str()?.to_string(),
                room_id: entry.get("roomId")?.as_str()?.to_string(),
                house_id: house_id.to_string(),
                device_type: DeviceType::from_category(entry.get("category")?.as_str()?),
                online: entry.get("onLine").and_then(Value::as_i64) == Some(1),
                user_id: entry
                    .get("userId")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                sensors,
                status: None,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_houses_from_body() {
        let body = json!([
            {"houseId": "h1", "houseName": "Home", "mqttRegion": "eu-central-1",
             "mqttServer": "a1bc.iot.eu-central-1.amazonaws.com"},
            {"houseId": "h2", "houseName": "Cabin", "mqttRegion": "us-east-1",
             "mqttServer": "a1bc.iot.us-east-1.amazonaws.com"},
            {"broken": true}
        ]);

        let houses = houses_from_body(&body);
        assert_eq!(houses.len(), 2);
        assert_eq!(houses[0].house_id, "h1");
        assert_eq!(houses[1].mqtt_region, "us-east-1");
    }

    #[test]
    fn test_stations_from_body() {
        let body = json!({
            "houseId": "h1",
            "stations": [{
                "stationId": "st1",
                "stationName": "Hallway",
                "stationSn": "139A1F89",
                "roomId": "r1",
                "category": "SBS50",
                "onLine": 1,
                "userId": "user-1",
                "devices": [
                    {"deviceId": "d1", "deviceName": "Kitchen", "deviceSn": "00000001",
                     "roomId": "r2", "deviceType": "XS01-M"}
                ]
            }]
        });

        let stations = stations_from_body(&body);
        assert_eq!(stations.len(), 1);
        let station = &stations[0];
        assert_eq!(station.thing_name(), "SBS50139A1F89");
        assert!(station.online);
        assert_eq!(station.sensors.len(), 1);
        assert_eq!(station.sensors[0].device_type, DeviceType::Xs01M);
        assert!(station.sensor("00000001").is_some());
        assert!(station.sensor("missing").is_none());
    }

    #[test]
    fn test_rooms_from_body() {
        let body = json!([{"houseId": "h1", "roomId": "r1", "roomName": "Kitchen"}]);
        let rooms = rooms_from_body(&body);
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].room_name, "Kitchen");
    }

    #[test]
    fn test_empty_bodies() {
        assert!(houses_from_body(&json!(null)).is_empty());
        assert!(stations_from_body(&json!({})).is_empty());
        assert!(rooms_from_body(&json!({})).is_empty());
    }

    #[test]
    fn test_device_type_mapping() {
        assert_eq!(DeviceType::from_category("SBS50"), DeviceType::Sbs50);
        assert_eq!(DeviceType::from_category("XS01-M"), DeviceType::Xs01M);
        assert_eq!(DeviceType::from_category("SC07-WX"), DeviceType::Unknown);
    }
}
