use tracing::{debug, info};

use super::Status;
use super::location::RateMap;
use super::meter::{Meter, Meters};
use crate::automation::{Automation, Curve};
use crate::config::Config;
use crate::error::{EventError, TimingError};
use crate::events::{Event, EventData};

/// The global timeline: tempo automation in beats per second, meter changes,
/// and the instant playback started at.
#[derive(Debug, Clone)]
pub struct Transport {
    rate: Automation,
    rates: RateMap,
    meters: Meters,
    start_time: Option<f64>,
    stop_time: Option<f64>,
    start_beat: f64,
    current_time: f64,
}

impl Transport {
    pub fn new(config: &Config) -> Self {
        let mut rate = Automation::with_epsilon(config.default_rate, config.epsilon);
        rate.automate(0.0, Curve::Step, config.default_rate, 0.0);
        let (numerator, denominator) = config.default_meter;

        Self {
            rates: RateMap::from_automation(&rate),
            rate,
            meters: Meters::new(numerator, denominator),
            start_time: None,
            stop_time: None,
            start_beat: 0.0,
            current_time: 0.0,
        }
    }

    pub fn start(&mut self, time: f64) -> Result<(), TimingError> {
        if time < 0.0 {
            return Err(TimingError::Negative("start time", time));
        }
        if self.start_time.is_some() && self.stop_time.is_none() {
            return Ok(());
        }

        self.start_time = Some(time);
        self.stop_time = None;
        self.start_beat = self.rates.beat_at(time);
        info!(time, "transport start");
        Ok(())
    }

    pub fn stop(&mut self, time: f64) -> Result<(), TimingError> {
        if self.start_time.is_none() {
            return Err(TimingError::NotStarted);
        }
        if time < self.current_time {
            return Err(TimingError::StopBeforePosition {
                stop: time,
                current: self.current_time,
            });
        }
        if self.stop_time.is_some_and(|stop| stop <= time) {
            return Ok(());
        }

        self.stop_time = Some(time);
        info!(time, "transport stop");
        Ok(())
    }

    pub fn status(&self, now: f64) -> Status {
        match (self.start_time, self.stop_time) {
            (None, _) => Status::Idle,
            (Some(_), Some(stop)) if now >= stop => Status::Idle,
            (Some(start), _) if now < start => Status::Cued,
            _ => Status::Playing,
        }
    }

    pub fn start_time(&self) -> Option<f64> {
        self.start_time
    }

    pub fn stop_time(&self) -> Option<f64> {
        self.stop_time
    }

    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    /// Moves the playback position. Never goes backwards.
    pub(crate) fn advance(&mut self, time: f64) {
        self.current_time = self.current_time.max(time);
    }

    pub fn beat_at_time(&self, time: f64) -> f64 {
        self.rates.beat_at(time) - self.start_beat
    }

    pub fn time_at_beat(&self, beat: f64) -> f64 {
        self.rates.location_at(beat + self.start_beat)
    }

    pub fn bar_at_beat(&self, beat: f64) -> f64 {
        self.meters.bar_at_beat(beat)
    }

    pub fn beat_at_bar(&self, bar: f64) -> f64 {
        self.meters.beat_at_bar(bar)
    }

    pub fn set_meter_at_beat(
        &mut self,
        beat: f64,
        numerator: u32,
        denominator: u32,
    ) -> Result<(), TimingError> {
        if beat < 0.0 {
            return Err(TimingError::Negative("meter beat", beat));
        }
        if numerator == 0 || denominator == 0 {
            return Err(TimingError::NotPositive("meter", numerator.min(denominator) as f64));
        }
        self.insert_meter(beat, numerator, denominator);
        Ok(())
    }

    pub(crate) fn insert_meter(&mut self, beat: f64, numerator: u32, denominator: u32) {
        self.meters.set_meter_at_beat(beat, numerator, denominator);
        debug!(beat, numerator, denominator, "meter");
    }

    pub fn meter_at_beat(&self, beat: f64) -> &Meter {
        self.meters.meter_at_beat(beat)
    }

    pub fn rate(&self) -> &Automation {
        &self.rate
    }

    pub fn rate_at_time(&self, time: f64) -> f64 {
        self.rate.value_at_time(time)
    }

    /// Schedules a tempo change in beats per second.
    pub fn automate_rate(
        &mut self,
        time: f64,
        curve: Curve,
        rate: f64,
        duration: f64,
    ) -> Result<(), TimingError> {
        if time < 0.0 {
            return Err(TimingError::Negative("rate time", time));
        }
        if !(rate.is_finite() && rate > 0.0) {
            return Err(TimingError::NotPositive("rate", rate));
        }

        self.schedule_rate(time, curve, rate, duration);
        Ok(())
    }

    fn schedule_rate(&mut self, time: f64, curve: Curve, rate: f64, duration: f64) {
        self.rate.automate(time, curve, rate, duration);
        self.refresh();
        debug!(time, rate, "rate");
    }

    pub fn tempo(&self, now: f64) -> f64 {
        self.rate_at_time(now) * 60.0
    }

    pub fn set_tempo(&mut self, time: f64, bpm: f64) -> Result<(), TimingError> {
        if !(bpm.is_finite() && bpm > 0.0) {
            return Err(TimingError::NotPositive("tempo", bpm));
        }
        self.automate_rate(time, Curve::Step, bpm / 60.0, 0.0)
    }

    /// Records a `rate` or `meter` event at `time`. The event's own beat is
    /// replaced by the beat at `time`.
    pub fn record(&mut self, time: f64, event: &Event) -> Result<(), EventError> {
        event.validate()?;
        match &event.data {
            EventData::Rate { rate, curve } => {
                self.schedule_rate(time.max(0.0), curve.clone(), *rate, 0.0);
                Ok(())
            }
            EventData::Meter {
                numerator,
                denominator,
            } => {
                let beat = self.beat_at_time(time).max(0.0);
                self.insert_meter(beat, *numerator, *denominator);
                Ok(())
            }
            _ => Err(EventError::NotAccepted {
                kind: event.kind(),
                by: "the transport",
            }),
        }
    }

    fn refresh(&mut self) {
        self.rates = RateMap::from_automation(&self.rate);
        if let Some(start) = self.start_time {
            self.start_beat = self.rates.beat_at(start);
        }
    }
}
