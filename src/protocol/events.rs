//! Unsolicited device events and their decoders
//!
//! Each subscription kind owns exactly one decode function, resolved at
//! subscribe time and looked up through a static table. A decoded event
//! carries the target identifier (station + sensor serial, sensor serial
//! alone, or empty for account-wide notices) the router filters on.

use serde_json::Value;

/// Kinds of unsolicited events the backend pushes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Alarm,
    Mute,
    SelfTest,
    Logout,
}

/// A decoded event with its routing target
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceEvent {
    /// Station serial + sensor serial concatenated, sensor serial alone for
    /// directly connected sensors, or empty for account-wide events.
    pub target: String,
    pub payload: EventPayload,
}

/// Typed payloads per event kind
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    Alarm {
        station_serial: Option<String>,
        sensor_serial: String,
        is_alarm: bool,
    },
    Mute {
        station_serial: Option<String>,
        sensor_serial: String,
        triggered_by: String,
    },
    SelfTest {
        station_serial: Option<String>,
        sensor_serial: String,
        passed: bool,
    },
    /// Another client logged in with the same credentials; the session held
    /// here is about to be invalidated.
    Logout {
        access_token: String,
        user_id: String,
    },
}

/// Decode failure, logged by the router and otherwise ignored
#[derive(Debug, thiserror::Error)]
#[error("failed to decode {kind:?} event: {reason}")]
pub struct DecodeError {
    pub kind: EventKind,
    pub reason: String,
}

impl EventKind {
    /// Decode a raw payload into the events it carries.
    ///
    /// One payload can report several sensors at once; each becomes its own
    /// routed event.
    pub fn decode(&self, payload: &[u8]) -> Result<Vec<DeviceEvent>, DecodeError> {
        let value: Value = serde_json::from_slice(payload).map_err(|e| DecodeError {
            kind: *self,
            reason: e.to_string(),
        })?;

        match self {
            EventKind::Alarm => Ok(decode_reported(&value, |entry| {
                let sensor = entry.get("deviceSN")?.as_str()?.to_string();
                let is_alarm = entry.get("isAlarm")?.as_str()? == "1";
                let station = entry
                    .get("stationSN")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                Some(make_event(station.clone(), sensor.clone(), |s| {
                    EventPayload::Alarm {
                        station_serial: s,
                        sensor_serial: sensor,
                        is_alarm,
                    }
                }))
            })),
            EventKind::Mute => Ok(decode_mute(&value)),
            EventKind::SelfTest => Ok(decode_reported(&value, |entry| {
                let sensor = entry.get("deviceSN")?.as_str()?.to_string();
                // "0" reports a passed self test
                let passed = entry.get("selfTest")?.as_str()? == "0";
                let station = entry
                    .get("stationSN")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                Some(make_event(station.clone(), sensor.clone(), |s| {
                    EventPayload::SelfTest {
                        station_serial: s,
                        sensor_serial: sensor,
                        passed,
                    }
                }))
            })),
            EventKind::Logout => decode_logout(&value).map(|e| vec![e]).ok_or(DecodeError {
                kind: *self,
                reason: "missing accessToken/userId".to_string(),
            }),
        }
    }
}

fn make_event(
    station: Option<String>,
    sensor: String,
    build: impl FnOnce(Option<String>) -> EventPayload,
) -> DeviceEvent {
    let target = match &station {
        Some(station) => format!("{station}{sensor}"),
        None => sensor,
    };
    DeviceEvent {
        target,
        payload: build(station),
    }
}

/// Walk `state.reported` and decode every per-serial entry
fn decode_reported(
    value: &Value,
    decode_entry: impl Fn(&Value) -> Option<DeviceEvent>,
) -> Vec<DeviceEvent> {
    let Some(reported) = value
        .get("state")
        .and_then(|state| state.get("reported"))
        .and_then(Value::as_object)
    else {
        return Vec::new();
    };

    reported.values().filter_map(decode_entry).collect()
}

/// Mute reports arrive under a fixed `allMute` key rather than per serial
fn decode_mute(value: &Value) -> Vec<DeviceEvent> {
    let Some(entry) = value
        .get("state")
        .and_then(|state| state.get("reported"))
        .and_then(|reported| reported.get("allMute"))
    else {
        return Vec::new();
    };

    let Some(sensor) = entry.get("deviceSN").and_then(Value::as_str) else {
        return Vec::new();
    };
    let Some(who) = entry.get("who").and_then(Value::as_str) else {
        return Vec::new();
    };
    let station = entry
        .get("stationSN")
        .and_then(Value::as_str)
        .map(str::to_string);
    let sensor = sensor.to_string();

    vec![make_event(station.clone(), sensor.clone(), |s| {
        EventPayload::Mute {
            station_serial: s,
            sensor_serial: sensor,
            triggered_by: who.to_string(),
        }
    })]
}

fn decode_logout(value: &Value) -> Option<DeviceEvent> {
    let access_token = value.get("accessToken")?.as_str()?.to_string();
    let user_id = value.get("userId")?.as_str()?.to_string();

    Some(DeviceEvent {
        target: String::new(),
        payload: EventPayload::Logout {
            access_token,
            user_id,
        },
    })
}
