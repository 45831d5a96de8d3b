//! A value together with the metadata a control-system provider attaches
//! to it: alarm state, source timestamp, display and control limits.
//!
//! Wire form flattens the metadata next to the value, omitting absent parts:
//!
//! ```text
//! {"value":3.2,"alarm":{"severity":"MINOR","message":"HIGH"},
//!  "timeStamp":{"secondsPastEpoch":1700000000,"nanoseconds":0},
//!  "display":{"limitLow":0.0,"limitHigh":10.0,"units":"mA","precision":2}}
//! ```

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use super::TagValue;

/// Alarm severity, ordered from healthy to unusable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmSeverity {
    #[default]
    NoAlarm,
    Minor,
    Major,
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Alarm {
    pub severity: AlarmSeverity,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl Alarm {
    pub fn new(severity: AlarmSeverity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }

    pub fn none() -> Self {
        Self::default()
    }
}

/// Source timestamp, seconds and nanoseconds past the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeStamp {
    pub seconds_past_epoch: i64,
    pub nanoseconds: u32,
}

impl TimeStamp {
    pub fn new(seconds_past_epoch: i64, nanoseconds: u32) -> Self {
        Self {
            seconds_past_epoch,
            nanoseconds,
        }
    }

    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self::new(since_epoch.as_secs() as i64, since_epoch.subsec_nanos())
    }
}

/// Display range and formatting hints.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayInfo {
    pub limit_low: f64,
    pub limit_high: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub units: String,
    #[serde(default)]
    pub precision: u8,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// Range a write is allowed to drive the value to.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlLimits {
    pub limit_low: f64,
    pub limit_high: f64,
    #[serde(default)]
    pub min_step: f64,
}

impl ControlLimits {
    /// Pull a numeric value into `[limit_low, limit_high]`. Other values
    /// pass through.
    pub fn clamp(&self, value: TagValue) -> TagValue {
        match value {
            TagValue::Double(d) => TagValue::Double(d.max(self.limit_low).min(self.limit_high)),
            TagValue::Int(i) => {
                let low = self.limit_low.ceil() as i64;
                let high = self.limit_high.floor() as i64;
                TagValue::Int(i.max(low).min(high))
            }
            other => other,
        }
    }
}

/// Alarm and warning thresholds for numeric values.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueAlarm {
    pub low_alarm_limit: f64,
    pub low_warning_limit: f64,
    pub high_warning_limit: f64,
    pub high_alarm_limit: f64,
}

impl ValueAlarm {
    /// Alarm state of `value` against these thresholds. Non-numeric values
    /// are never in alarm.
    pub fn evaluate(&self, value: &TagValue) -> Alarm {
        let v = match value {
            TagValue::Int(i) => *i as f64,
            TagValue::Double(d) => *d,
            TagValue::Text(_) | TagValue::Enum { .. } => return Alarm::none(),
        };
        if v.is_nan() {
            Alarm::new(AlarmSeverity::Invalid, "NAN")
        } else if v >= self.high_alarm_limit {
            Alarm::new(AlarmSeverity::Major, "HIHI")
        } else if v <= self.low_alarm_limit {
            Alarm::new(AlarmSeverity::Major, "LOLO")
        } else if v >= self.high_warning_limit {
            Alarm::new(AlarmSeverity::Minor, "HIGH")
        } else if v <= self.low_warning_limit {
            Alarm::new(AlarmSeverity::Minor, "LOW")
        } else {
            Alarm::none()
        }
    }
}

/// Optional metadata carried with a value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alarm: Option<Alarm>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_stamp: Option<TimeStamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<DisplayInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control: Option<ControlLimits>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_alarm: Option<ValueAlarm>,
}

impl SampleMeta {
    pub fn is_empty(&self) -> bool {
        self == &SampleMeta::default()
    }
}

/// One observation of a tag: its value plus whatever metadata the provider
/// supplied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagSample {
    pub value: TagValue,
    #[serde(flatten)]
    pub meta: SampleMeta,
}

impl TagSample {
    pub fn new(value: TagValue) -> Self {
        Self {
            value,
            meta: SampleMeta::default(),
        }
    }

    pub fn with_meta(mut self, meta: SampleMeta) -> Self {
        self.meta = meta;
        self
    }

    pub fn with_alarm(mut self, alarm: Alarm) -> Self {
        self.meta.alarm = Some(alarm);
        self
    }

    pub fn with_time_stamp(mut self, time_stamp: TimeStamp) -> Self {
        self.meta.time_stamp = Some(time_stamp);
        self
    }

    pub fn with_display(mut self, display: DisplayInfo) -> Self {
        self.meta.display = Some(display);
        self
    }

    pub fn with_control(mut self, control: ControlLimits) -> Self {
        self.meta.control = Some(control);
        self
    }

    pub fn severity(&self) -> AlarmSeverity {
        self.meta
            .alarm
            .as_ref()
            .map(|a| a.severity)
            .unwrap_or_default()
    }
}

impl From<TagValue> for TagSample {
    fn from(value: TagValue) -> Self {
        TagSample::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> ValueAlarm {
        ValueAlarm {
            low_alarm_limit: 0.0,
            low_warning_limit: 1.0,
            high_warning_limit: 9.0,
            high_alarm_limit: 10.0,
        }
    }

    #[test]
    fn test_value_alarm_thresholds() {
        let l = limits();
        assert_eq!(l.evaluate(&TagValue::Double(5.0)), Alarm::none());
        assert_eq!(l.evaluate(&TagValue::Double(9.5)).severity, AlarmSeverity::Minor);
        assert_eq!(l.evaluate(&TagValue::Int(12)).severity, AlarmSeverity::Major);
        assert_eq!(l.evaluate(&TagValue::Double(0.5)).message, "LOW");
        assert_eq!(l.evaluate(&TagValue::Double(f64::NAN)).severity, AlarmSeverity::Invalid);
        assert_eq!(l.evaluate(&TagValue::from("text")), Alarm::none());
    }

    #[test]
    fn test_control_limits_clamp_numbers_only() {
        let control = ControlLimits {
            limit_low: -1.5,
            limit_high: 2.5,
            min_step: 0.0,
        };
        assert_eq!(control.clamp(TagValue::Double(7.0)), TagValue::Double(2.5));
        assert_eq!(control.clamp(TagValue::Int(-9)), TagValue::Int(-1));
        assert_eq!(control.clamp(TagValue::Int(2)), TagValue::Int(2));
        assert_eq!(control.clamp(TagValue::from("x")), TagValue::from("x"));
    }

    #[test]
    fn test_bare_sample_serializes_as_value_only() {
        let json = serde_json::to_string(&TagSample::new(TagValue::Int(3))).unwrap();
        assert_eq!(json, r#"{"value":3}"#);
    }

    #[test]
    fn test_metadata_is_flattened_next_to_value() {
        let sample = TagSample::new(TagValue::Double(9.5))
            .with_alarm(Alarm::new(AlarmSeverity::Minor, "HIGH"))
            .with_time_stamp(TimeStamp::new(1_700_000_000, 5));

        let json: serde_json::Value = serde_json::to_value(&sample).unwrap();
        assert_eq!(json["value"], 9.5);
        assert_eq!(json["alarm"]["severity"], "MINOR");
        assert_eq!(json["timeStamp"]["secondsPastEpoch"], 1_700_000_000);
        assert!(json.get("display").is_none());

        let back: TagSample = serde_json::from_value(json).unwrap();
        assert_eq!(back, sample);
        assert_eq!(back.severity(), AlarmSeverity::Minor);
    }
}
