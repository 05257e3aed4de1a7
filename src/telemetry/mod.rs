pub mod stats;

use std::fmt;

use serde::Serialize;

/// Sentinel reported in place of a sensor value when no fresh sample exists.
pub const SENSOR_SENTINEL: i32 = -1;

/// Lower bound of a synthetic sensor reading.
pub const SENSOR_MIN: i32 = 0;

/// Upper bound of a synthetic sensor reading.
pub const SENSOR_MAX: i32 = 100;

/// A single timestamped reading of the synthetic sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorSample {
    pub timestamp_ms: i64,
    pub value: i32,
}

/// A timestamped host uptime reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UptimeSample {
    pub timestamp_ms: i64,
    pub uptime_secs: u32,
}

/// Notification from a periodic timer asking the producer to sample a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    Sensor,
    Uptime,
}

impl Trigger {
    /// Returns the string label for this trigger kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sensor => "sensor",
            Self::Uptime => "uptime",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One composite telemetry frame emitted per aggregation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TelemetryFrame {
    pub frame_id: u32,
    pub timestamp_ms: i64,
    pub uptime_secs: u32,
    /// Latest fresh sensor value, or [`SENSOR_SENTINEL`].
    pub latest_sensor_value: i32,
    /// Mean of sensor values inside the trailing window.
    pub windowed_average: u32,
    pub degraded: bool,
}

impl fmt::Display for TelemetryFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FRAME {} | ts={} | up={} | sensor={} | avg={} | degraded={}",
            self.frame_id,
            self.timestamp_ms,
            self.uptime_secs,
            self.latest_sensor_value,
            self.windowed_average,
            u8::from(self.degraded),
        )
    }
}

/// Periodic status summary written by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub frames_total: u64,
    pub uptime_secs: u32,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "--- STATUS: Total frames generated {}, system uptime {} s ---",
            self.frames_total, self.uptime_secs
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_display_line() {
        let frame = TelemetryFrame {
            frame_id: 7,
            timestamp_ms: 1_400,
            uptime_secs: 1,
            latest_sensor_value: 63,
            windowed_average: 61,
            degraded: false,
        };
        assert_eq!(
            frame.to_string(),
            "FRAME 7 | ts=1400 | up=1 | sensor=63 | avg=61 | degraded=0"
        );
    }

    #[test]
    fn test_frame_display_degraded_sentinel() {
        let frame = TelemetryFrame {
            frame_id: 1,
            timestamp_ms: 200,
            uptime_secs: 0,
            latest_sensor_value: SENSOR_SENTINEL,
            windowed_average: 0,
            degraded: true,
        };
        assert_eq!(
            frame.to_string(),
            "FRAME 1 | ts=200 | up=0 | sensor=-1 | avg=0 | degraded=1"
        );
    }

    #[test]
    fn test_frame_json_fields() {
        let frame = TelemetryFrame {
            frame_id: 3,
            timestamp_ms: 600,
            uptime_secs: 0,
            latest_sensor_value: 55,
            windowed_average: 52,
            degraded: false,
        };
        let json = serde_json::to_string(&frame).expect("serialize");
        assert_eq!(
            json,
            r#"{"frame_id":3,"timestamp_ms":600,"uptime_secs":0,"latest_sensor_value":55,"windowed_average":52,"degraded":false}"#
        );
    }

    #[test]
    fn test_status_display_line() {
        let status = StatusReport {
            frames_total: 50,
            uptime_secs: 10,
        };
        assert_eq!(
            status.to_string(),
            "--- STATUS: Total frames generated 50, system uptime 10 s ---"
        );
    }

    #[test]
    fn test_trigger_labels() {
        assert_eq!(Trigger::Sensor.as_str(), "sensor");
        assert_eq!(Trigger::Uptime.to_string(), "uptime");
    }
}
