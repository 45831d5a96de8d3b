//! Simulated Provider Adapter
//!
//! A soft control system held in memory. Implements [`ProviderAdapter`] for
//! the runtime binary and the test suite.
//!
//! Behaves like a real channel-based provider:
//! - `open` emits the channel's current value (if it has one) before returning
//! - `write` converts the value to the channel's native type and echoes it to
//!   every open channel of that tag
//! - `publish` simulates a change made outside the broker
//! - every emitted sample carries the time of the change and an alarm state;
//!   display, control and alarm limits set with `set_limits` ride along
//!
//! Callbacks run while the provider's own lock is held, so every channel of a
//! tag observes values in publication order.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::debug;

use crate::domain::{
    Alarm, ControlLimits, DisplayInfo, SampleMeta, Tag, TagSample, TagValue, TimeStamp, ValueAlarm,
};
use crate::error::ProviderError;
use crate::ports::{ProviderAdapter, UpdateCallback};

/// Handle to one open simulated channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimHandle {
    id: u64,
    tag: Tag,
}

impl SimHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn tag(&self) -> &Tag {
        &self.tag
    }
}

struct Channel {
    tag: Tag,
    callback: UpdateCallback,
}

/// Static properties of a simulated channel, the analogue of a record's
/// display, drive and alarm fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelLimits {
    pub display: Option<DisplayInfo>,
    pub control: Option<ControlLimits>,
    pub value_alarm: Option<ValueAlarm>,
}

/// A value and the moment it last changed.
struct Reading {
    value: TagValue,
    changed: TimeStamp,
}

#[derive(Default)]
struct SimState {
    /// Current value per tag
    values: HashMap<Tag, Reading>,
    limits: HashMap<Tag, ChannelLimits>,
    /// Open channels by handle id
    channels: HashMap<u64, Channel>,
    next_id: u64,
    /// Successful opens per tag
    opens: HashMap<Tag, u64>,
    total_opens: u64,
    total_closes: u64,
    /// Tags whose opens are refused
    unreachable: HashSet<Tag>,
    fail_closes: bool,
    /// Every write accepted, after conversion
    writes: Vec<(Tag, TagValue)>,
}

impl SimState {
    fn store(&mut self, tag: &Tag, value: TagValue) {
        self.values.insert(
            tag.clone(),
            Reading {
                value,
                changed: TimeStamp::now(),
            },
        );
    }

    /// Current sample of `tag` with its metadata.
    fn sample(&self, tag: &Tag) -> Option<TagSample> {
        let reading = self.values.get(tag)?;
        let limits = self.limits.get(tag).cloned().unwrap_or_default();
        let alarm = limits
            .value_alarm
            .map(|va| va.evaluate(&reading.value))
            .unwrap_or_else(Alarm::none);

        Some(TagSample::new(reading.value.clone()).with_meta(SampleMeta {
            alarm: Some(alarm),
            time_stamp: Some(reading.changed),
            display: limits.display,
            control: limits.control,
            value_alarm: limits.value_alarm,
        }))
    }

    fn notify(&self, tag: &Tag) {
        let Some(sample) = self.sample(tag) else {
            return;
        };
        for channel in self.channels.values().filter(|c| &c.tag == tag) {
            channel.callback.on_update(sample.clone());
        }
    }
}

/// In-memory provider with failure injection and call counters.
pub struct SimulatedProvider {
    name: String,
    open_delay: Option<Duration>,
    state: Mutex<SimState>,
}

impl SimulatedProvider {
    /// Create an empty provider.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            open_delay: None,
            state: Mutex::new(SimState::default()),
        }
    }

    /// Delay every `open` by `delay`, to widen race windows.
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
        self
    }

    /// Set a tag's current value without notifying anyone.
    pub fn set_value(&self, tag: Tag, value: TagValue) {
        self.state.lock().store(&tag, value);
    }

    /// Set the display, control and alarm limits reported with `tag`.
    pub fn set_limits(&self, tag: Tag, limits: ChannelLimits) {
        self.state.lock().limits.insert(tag, limits);
    }

    /// Change a tag's value and notify every open channel for it.
    pub fn publish(&self, tag: &Tag, value: TagValue) {
        let mut state = self.state.lock();
        state.store(tag, value);
        state.notify(tag);
    }

    pub fn value_of(&self, tag: &Tag) -> Option<TagValue> {
        self.state.lock().values.get(tag).map(|r| r.value.clone())
    }

    /// What an open channel of `tag` would report right now.
    pub fn sample_of(&self, tag: &Tag) -> Option<TagSample> {
        self.state.lock().sample(tag)
    }

    /// Refuse future opens of `tag`.
    pub fn fail_opens_for(&self, tag: Tag) {
        self.state.lock().unreachable.insert(tag);
    }

    /// Accept opens of `tag` again.
    pub fn restore_opens_for(&self, tag: &Tag) {
        self.state.lock().unreachable.remove(tag);
    }

    /// Make every `close` fail (the channel stays open on the provider side).
    pub fn fail_closes(&self, fail: bool) {
        self.state.lock().fail_closes = fail;
    }

    /// Successful opens of `tag` so far.
    pub fn opens_for(&self, tag: &Tag) -> u64 {
        self.state.lock().opens.get(tag).copied().unwrap_or(0)
    }

    pub fn total_opens(&self) -> u64 {
        self.state.lock().total_opens
    }

    /// Close calls received, successful or not.
    pub fn total_closes(&self) -> u64 {
        self.state.lock().total_closes
    }

    pub fn open_channels(&self) -> usize {
        self.state.lock().channels.len()
    }

    /// Open channels for `tag`.
    pub fn channels_for(&self, tag: &Tag) -> usize {
        self.state
            .lock()
            .channels
            .values()
            .filter(|c| &c.tag == tag)
            .count()
    }

    /// Callbacks registered by the currently open channels of `tag`.
    pub fn callbacks_for(&self, tag: &Tag) -> Vec<UpdateCallback> {
        self.state
            .lock()
            .channels
            .values()
            .filter(|c| &c.tag == tag)
            .map(|c| c.callback.clone())
            .collect()
    }

    /// Tags with at least one open channel, sorted.
    pub fn open_tags(&self) -> Vec<Tag> {
        let state = self.state.lock();
        let mut tags: Vec<Tag> = state
            .channels
            .values()
            .map(|c| c.tag.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        tags.sort();
        tags
    }

    pub fn writes(&self) -> Vec<(Tag, TagValue)> {
        self.state.lock().writes.clone()
    }
}

#[async_trait]
impl ProviderAdapter for SimulatedProvider {
    type Handle = SimHandle;

    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&self, tag: &Tag, on_update: UpdateCallback) -> Result<SimHandle, ProviderError> {
        if let Some(delay) = self.open_delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if state.unreachable.contains(tag) {
            return Err(ProviderError::Unreachable(format!("no such channel: {tag}")));
        }

        let id = state.next_id;
        state.next_id += 1;
        *state.opens.entry(tag.clone()).or_default() += 1;
        state.total_opens += 1;

        if let Some(sample) = state.sample(tag) {
            on_update.on_update(sample);
        }
        state.channels.insert(
            id,
            Channel {
                tag: tag.clone(),
                callback: on_update,
            },
        );

        debug!(provider = %self.name, tag = %tag, channel = id, "Channel opened");
        Ok(SimHandle {
            id,
            tag: tag.clone(),
        })
    }

    async fn close(&self, handle: &SimHandle) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        state.total_closes += 1;
        if state.fail_closes {
            return Err(ProviderError::Rejected(format!(
                "close of channel {} refused",
                handle.id
            )));
        }

        if state.channels.remove(&handle.id).is_none() {
            return Err(ProviderError::UnknownHandle);
        }
        debug!(provider = %self.name, tag = %handle.tag, channel = handle.id, "Channel closed");
        Ok(())
    }

    async fn write(&self, handle: &SimHandle, value: TagValue) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        if !state.channels.contains_key(&handle.id) {
            return Err(ProviderError::UnknownHandle);
        }

        let mut value = match state.values.get(&handle.tag) {
            Some(current) => value.coerce_like(&current.value)?,
            None => value,
        };
        if let Some(control) = state.limits.get(&handle.tag).and_then(|l| l.control) {
            value = control.clamp(value);
        }
        state.writes.push((handle.tag.clone(), value.clone()));
        state.store(&handle.tag, value);
        state.notify(&handle.tag);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn recorder() -> (UpdateCallback, Arc<Mutex<Vec<TagValue>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (UpdateCallback::new(move |s: TagSample| sink.lock().push(s.value)), seen)
    }

    fn beam_current_limits() -> ChannelLimits {
        ChannelLimits {
            display: Some(DisplayInfo {
                limit_low: 0.0,
                limit_high: 500.0,
                units: "mA".into(),
                precision: 1,
                description: String::new(),
            }),
            control: Some(ControlLimits {
                limit_low: 0.0,
                limit_high: 450.0,
                min_step: 0.0,
            }),
            value_alarm: Some(ValueAlarm {
                low_alarm_limit: 10.0,
                low_warning_limit: 50.0,
                high_warning_limit: 420.0,
                high_alarm_limit: 440.0,
            }),
        }
    }

    #[tokio::test]
    async fn test_open_emits_current_value() {
        let provider = SimulatedProvider::new("sim");
        provider.set_value(Tag::new("T"), TagValue::Double(1.5));

        let (callback, seen) = recorder();
        let handle = provider.open(&Tag::new("T"), callback).await.unwrap();

        assert_eq!(handle.tag(), &Tag::new("T"));
        assert_eq!(*seen.lock(), vec![TagValue::Double(1.5)]);
        assert_eq!(provider.open_channels(), 1);
    }

    #[tokio::test]
    async fn test_open_failure_injection() {
        let provider = SimulatedProvider::new("sim");
        provider.fail_opens_for(Tag::new("T"));

        let result = provider.open(&Tag::new("T"), UpdateCallback::noop()).await;
        assert!(matches!(result, Err(ProviderError::Unreachable(_))));
        assert_eq!(provider.total_opens(), 0);

        provider.restore_opens_for(&Tag::new("T"));
        assert!(provider.open(&Tag::new("T"), UpdateCallback::noop()).await.is_ok());
    }

    #[tokio::test]
    async fn test_write_coerces_and_echoes() {
        let provider = SimulatedProvider::new("sim");
        provider.set_value(Tag::new("T"), TagValue::Int(0));

        let (callback, seen) = recorder();
        let handle = provider.open(&Tag::new("T"), callback).await.unwrap();
        provider.write(&handle, TagValue::from("12")).await.unwrap();

        assert_eq!(provider.writes(), vec![(Tag::new("T"), TagValue::Int(12))]);
        assert_eq!(provider.value_of(&Tag::new("T")), Some(TagValue::Int(12)));
        assert_eq!(*seen.lock(), vec![TagValue::Int(0), TagValue::Int(12)]);
    }

    #[tokio::test]
    async fn test_close_is_counted_and_stops_updates() {
        let provider = SimulatedProvider::new("sim");
        let (callback, seen) = recorder();
        let handle = provider.open(&Tag::new("T"), callback).await.unwrap();

        provider.close(&handle).await.unwrap();
        provider.publish(&Tag::new("T"), TagValue::Int(1));

        assert!(seen.lock().is_empty());
        assert_eq!(provider.total_closes(), 1);
        assert_eq!(provider.close(&handle).await, Err(ProviderError::UnknownHandle));
        assert_eq!(
            provider.write(&handle, TagValue::Int(1)).await,
            Err(ProviderError::UnknownHandle)
        );
    }

    #[tokio::test]
    async fn test_samples_carry_limits_alarm_and_time() {
        let provider = SimulatedProvider::new("sim");
        provider.set_limits(Tag::new("SR:CURRENT"), beam_current_limits());
        provider.set_value(Tag::new("SR:CURRENT"), TagValue::Double(430.0));

        let samples = Arc::new(Mutex::new(Vec::new()));
        let sink = samples.clone();
        let callback = UpdateCallback::new(move |s: TagSample| sink.lock().push(s));
        provider.open(&Tag::new("SR:CURRENT"), callback).await.unwrap();

        let first = samples.lock()[0].clone();
        assert_eq!(first.severity(), crate::domain::AlarmSeverity::Minor);
        assert_eq!(first.meta.display.as_ref().map(|d| d.units.as_str()), Some("mA"));
        assert!(first.meta.time_stamp.is_some());
        assert_eq!(provider.sample_of(&Tag::new("SR:CURRENT")), Some(first));
    }

    #[tokio::test]
    async fn test_write_is_clamped_to_control_limits() {
        let provider = SimulatedProvider::new("sim");
        provider.set_limits(Tag::new("SR:CURRENT"), beam_current_limits());
        provider.set_value(Tag::new("SR:CURRENT"), TagValue::Double(400.0));
        let handle = provider
            .open(&Tag::new("SR:CURRENT"), UpdateCallback::noop())
            .await
            .unwrap();

        provider.write(&handle, TagValue::Int(900)).await.unwrap();

        assert_eq!(
            provider.value_of(&Tag::new("SR:CURRENT")),
            Some(TagValue::Double(450.0))
        );
        let sample = provider.sample_of(&Tag::new("SR:CURRENT")).unwrap();
        assert_eq!(sample.severity(), crate::domain::AlarmSeverity::Major);
    }

    #[tokio::test]
    async fn test_failing_close_keeps_channel() {
        let provider = SimulatedProvider::new("sim");
        let handle = provider.open(&Tag::new("T"), UpdateCallback::noop()).await.unwrap();

        provider.fail_closes(true);
        assert!(provider.close(&handle).await.is_err());
        assert_eq!(provider.open_channels(), 1);
        assert_eq!(provider.open_tags(), vec![Tag::new("T")]);
    }
}
