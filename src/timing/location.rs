use std::sync::Arc;

use crate::automation::{Automation, Curve, is_degenerate_exponential};

pub fn beat_at_time_step(rate: f64, time: f64) -> f64 {
    rate * time
}

pub fn time_at_beat_step(rate: f64, beat: f64) -> f64 {
    beat / rate
}

pub fn beat_at_time_linear(rate0: f64, rate1: f64, duration: f64, time: f64) -> f64 {
    if duration <= 0.0 {
        return rate1 * time;
    }
    if time >= duration {
        return (rate0 + rate1) * 0.5 * duration + rate1 * (time - duration);
    }
    let slope = (rate1 - rate0) / duration;
    rate0 * time + slope * time * time * 0.5
}

pub fn time_at_beat_linear(rate0: f64, rate1: f64, duration: f64, beat: f64) -> f64 {
    if duration <= 0.0 {
        return beat / rate1;
    }
    let full = (rate0 + rate1) * 0.5 * duration;
    if beat >= full {
        return duration + (beat - full) / rate1;
    }
    let slope = (rate1 - rate0) / duration;
    // Rationalised root of rate0 * t + slope * t^2 / 2 = beat, stable as slope -> 0
    let discriminant = (rate0 * rate0 + 2.0 * slope * beat).max(0.0);
    2.0 * beat / (rate0 + discriminant.sqrt())
}

/// Growth constant of an exponential rate ramp, per unit of time.
fn growth(rate0: f64, rate1: f64, duration: f64) -> f64 {
    (rate1 / rate0).ln() / duration
}

pub fn beat_at_time_exponential(rate0: f64, rate1: f64, duration: f64, time: f64) -> f64 {
    if duration <= 0.0 {
        return rate1 * time;
    }
    let k = growth(rate0, rate1, duration);
    if k.abs() < 1e-12 {
        return rate0 * time;
    }
    if time >= duration {
        return (rate1 - rate0) / k + rate1 * (time - duration);
    }
    rate0 * (k * time).exp_m1() / k
}

pub fn time_at_beat_exponential(rate0: f64, rate1: f64, duration: f64, beat: f64) -> f64 {
    if duration <= 0.0 {
        return beat / rate1;
    }
    let k = growth(rate0, rate1, duration);
    if k.abs() < 1e-12 {
        return beat / rate0;
    }
    let full = (rate1 - rate0) / k;
    if beat >= full {
        return duration + (beat - full) / rate1;
    }
    (beat * k / rate0).ln_1p() / k
}

pub fn beat_at_time_target(rate0: f64, target: f64, constant: f64, time: f64) -> f64 {
    if constant <= 0.0 {
        return target * time;
    }
    target * time - (rate0 - target) * constant * (-time / constant).exp_m1()
}

/// The target integral has no algebraic inverse, so this runs Newton's method
/// on it, falling back to bisection whenever a step leaves the bracket.
pub fn time_at_beat_target(rate0: f64, target: f64, constant: f64, beat: f64) -> f64 {
    if constant <= 0.0 {
        return beat / target;
    }
    if beat <= 0.0 {
        return beat / rate0;
    }

    let rate = |t: f64| target + (rate0 - target) * (-t / constant).exp();
    let tolerance = 1e-13 * beat.max(1.0);

    let mut lo = 0.0;
    let mut hi = beat / rate0.min(target);
    if !hi.is_finite() || hi <= 0.0 {
        hi = beat / rate0.max(target);
        while beat_at_time_target(rate0, target, constant, hi) < beat {
            hi *= 2.0;
        }
    }

    let mut time = (beat / rate0).clamp(lo, hi);
    for _ in 0..100 {
        let error = beat_at_time_target(rate0, target, constant, time) - beat;
        if error.abs() <= tolerance {
            break;
        }
        if error > 0.0 {
            hi = time;
        } else {
            lo = time;
        }
        let next = time - error / rate(time);
        time = if next > lo && next < hi {
            next
        } else {
            (lo + hi) * 0.5
        };
    }
    time
}

/// One piece of a rate curve, starting at its anchor. `elapsed` is measured
/// from the anchor in location units (seconds for the transport, parent beats
/// for a head).
#[derive(Debug, Clone, PartialEq)]
pub enum RateSegment {
    Step {
        rate: f64,
    },
    Linear {
        rate0: f64,
        rate1: f64,
        duration: f64,
    },
    Exponential {
        rate0: f64,
        rate1: f64,
        duration: f64,
    },
    Target {
        rate0: f64,
        target: f64,
        constant: f64,
    },
    Values {
        samples: Arc<[f64]>,
        duration: f64,
    },
}

impl RateSegment {
    pub fn rate_at(&self, elapsed: f64) -> f64 {
        let elapsed = elapsed.max(0.0);
        match self {
            RateSegment::Step { rate } => *rate,
            RateSegment::Linear {
                rate0,
                rate1,
                duration,
            } => crate::automation::interpolate::linear(*rate0, *rate1, 0.0, *duration, elapsed.min(*duration)),
            RateSegment::Exponential {
                rate0,
                rate1,
                duration,
            } => crate::automation::interpolate::exponential(
                *rate0,
                *rate1,
                0.0,
                *duration,
                elapsed.min(*duration),
                0.0,
            ),
            RateSegment::Target {
                rate0,
                target,
                constant,
            } => crate::automation::interpolate::target(*rate0, *target, 0.0, *constant, elapsed),
            RateSegment::Values { samples, duration } => {
                crate::automation::interpolate::values(samples, 0.0, *duration, elapsed)
            }
        }
    }

    fn start_rate(&self) -> f64 {
        self.rate_at(0.0)
    }

    /// Beats covered `elapsed` after the anchor.
    pub fn beats(&self, elapsed: f64) -> f64 {
        if elapsed <= 0.0 {
            return elapsed * self.start_rate();
        }
        match self {
            RateSegment::Step { rate } => beat_at_time_step(*rate, elapsed),
            RateSegment::Linear {
                rate0,
                rate1,
                duration,
            } => beat_at_time_linear(*rate0, *rate1, *duration, elapsed),
            RateSegment::Exponential {
                rate0,
                rate1,
                duration,
            } => beat_at_time_exponential(*rate0, *rate1, *duration, elapsed),
            RateSegment::Target {
                rate0,
                target,
                constant,
            } => beat_at_time_target(*rate0, *target, *constant, elapsed),
            RateSegment::Values { samples, duration } => {
                let mut beats = 0.0;
                for piece in pieces(samples, *duration) {
                    if elapsed < piece.start + piece.width {
                        return beats
                            + beat_at_time_linear(
                                piece.rate0,
                                piece.rate1,
                                piece.width,
                                elapsed - piece.start,
                            );
                    }
                    beats += (piece.rate0 + piece.rate1) * 0.5 * piece.width;
                }
                beats + samples.last().copied().unwrap_or(0.0) * (elapsed - duration.max(0.0))
            }
        }
    }

    /// Inverse of [`RateSegment::beats`].
    pub fn elapsed(&self, beats: f64) -> f64 {
        if beats <= 0.0 {
            return beats / self.start_rate();
        }
        match self {
            RateSegment::Step { rate } => time_at_beat_step(*rate, beats),
            RateSegment::Linear {
                rate0,
                rate1,
                duration,
            } => time_at_beat_linear(*rate0, *rate1, *duration, beats),
            RateSegment::Exponential {
                rate0,
                rate1,
                duration,
            } => time_at_beat_exponential(*rate0, *rate1, *duration, beats),
            RateSegment::Target {
                rate0,
                target,
                constant,
            } => time_at_beat_target(*rate0, *target, *constant, beats),
            RateSegment::Values { samples, duration } => {
                let mut remaining = beats;
                for piece in pieces(samples, *duration) {
                    let area = (piece.rate0 + piece.rate1) * 0.5 * piece.width;
                    if remaining < area {
                        return piece.start
                            + time_at_beat_linear(piece.rate0, piece.rate1, piece.width, remaining);
                    }
                    remaining -= area;
                }
                duration.max(0.0) + remaining / samples.last().copied().unwrap_or(1.0)
            }
        }
    }
}

struct Piece {
    start: f64,
    width: f64,
    rate0: f64,
    rate1: f64,
}

fn pieces(samples: &[f64], duration: f64) -> impl Iterator<Item = Piece> + '_ {
    let count = samples.len().saturating_sub(1);
    let width = if count > 0 && duration > 0.0 {
        duration / count as f64
    } else {
        0.0
    };
    samples
        .windows(2)
        .enumerate()
        .filter(move |_| width > 0.0)
        .map(move |(index, pair)| Piece {
            start: index as f64 * width,
            width,
            rate0: pair[0],
            rate1: pair[1],
        })
}

/// A rate change inside an event list, positioned in the list's own beats.
/// The rate is a multiplier on the parent's rate.
#[derive(Debug, Clone, PartialEq)]
pub struct RatePoint {
    pub beat: f64,
    pub rate: f64,
    pub curve: Curve,
}

#[derive(Debug, Clone, PartialEq)]
struct Anchor {
    location: f64,
    beat: f64,
    segment: RateSegment,
}

/// Piecewise beat <-> location mapping with the accumulated beat stored at
/// every segment boundary, so each query only integrates one segment.
#[derive(Debug, Clone, PartialEq)]
pub struct RateMap {
    anchors: Vec<Anchor>,
}

impl Default for RateMap {
    fn default() -> Self {
        Self::constant(1.0)
    }
}

impl RateMap {
    pub fn constant(rate: f64) -> Self {
        Self {
            anchors: vec![Anchor {
                location: 0.0,
                beat: 0.0,
                segment: RateSegment::Step { rate },
            }],
        }
    }

    /// Time-indexed rate curve, eg. the transport's tempo automation.
    pub fn from_automation(automation: &Automation) -> Self {
        let events = automation.events();
        let origin = events.first().map_or(0.0, |event| event.time.min(0.0));
        let mut map = Self {
            anchors: vec![Anchor {
                location: origin,
                beat: 0.0,
                segment: RateSegment::Step {
                    rate: automation.base(),
                },
            }],
        };

        for (index, event) in events.iter().enumerate() {
            let segment = match events.get(index + 1) {
                Some(next) if next.curve == Curve::Linear => RateSegment::Linear {
                    rate0: automation.value_at_event(index),
                    rate1: next.value,
                    duration: next.time - event.time,
                },
                Some(next) if next.curve == Curve::Exponential => {
                    let rate0 = automation.value_at_event(index);
                    if is_degenerate_exponential(rate0, next.value, automation.epsilon()) {
                        RateSegment::Step { rate: rate0 }
                    } else {
                        RateSegment::Exponential {
                            rate0,
                            rate1: next.value,
                            duration: next.time - event.time,
                        }
                    }
                }
                _ => match &event.curve {
                    Curve::Target => RateSegment::Target {
                        rate0: automation.value_before(index),
                        target: event.value,
                        constant: event.duration,
                    },
                    Curve::Values(samples) if samples.len() > 1 => RateSegment::Values {
                        samples: samples.clone(),
                        duration: event.duration,
                    },
                    _ => RateSegment::Step { rate: event.value },
                },
            };
            map.push(event.time, segment);
        }

        map
    }

    /// Beat-indexed rate curve of an event list, seeded with rate 1 at beat 0.
    pub fn from_rates(points: &[RatePoint], epsilon: f64) -> Self {
        let mut map = Self::constant(1.0);
        let mut previous = RatePoint {
            beat: 0.0,
            rate: 1.0,
            curve: Curve::Step,
        };

        for point in points {
            let span = (point.beat - previous.beat).max(0.0);
            let (rate0, rate1) = (previous.rate, point.rate);
            let (length, segment) = match point.curve {
                Curve::Linear if rate0 + rate1 > 0.0 => {
                    let length = 2.0 * span / (rate0 + rate1);
                    (
                        length,
                        RateSegment::Linear {
                            rate0,
                            rate1,
                            duration: length,
                        },
                    )
                }
                Curve::Exponential if !is_degenerate_exponential(rate0, rate1, epsilon) => {
                    let ratio = rate1 / rate0;
                    let length = if (ratio - 1.0).abs() < 1e-12 {
                        span / rate0
                    } else {
                        span * ratio.ln() / (rate0 * (ratio - 1.0))
                    };
                    (
                        length,
                        RateSegment::Exponential {
                            rate0,
                            rate1,
                            duration: length,
                        },
                    )
                }
                _ => (span / rate0, RateSegment::Step { rate: rate0 }),
            };

            map.replace_last(segment);
            let location = map.last_location() + length;
            map.push(location, RateSegment::Step { rate: rate1 });
            previous = point.clone();
        }

        map
    }

    fn last_location(&self) -> f64 {
        self.anchors.last().map_or(0.0, |anchor| anchor.location)
    }

    fn replace_last(&mut self, segment: RateSegment) {
        if let Some(anchor) = self.anchors.last_mut() {
            anchor.segment = segment;
        }
    }

    fn push(&mut self, location: f64, segment: RateSegment) {
        let beat = self.beat_at(location);
        self.anchors.push(Anchor {
            location,
            beat,
            segment,
        });
    }

    pub fn beat_at(&self, location: f64) -> f64 {
        let index = self
            .anchors
            .partition_point(|anchor| anchor.location <= location)
            .saturating_sub(1);
        let anchor = &self.anchors[index];
        anchor.beat + anchor.segment.beats(location - anchor.location)
    }

    pub fn location_at(&self, beat: f64) -> f64 {
        let index = self
            .anchors
            .partition_point(|anchor| anchor.beat <= beat)
            .saturating_sub(1);
        let anchor = &self.anchors[index];
        anchor.location + anchor.segment.elapsed(beat - anchor.beat)
    }

    pub fn rate_at(&self, location: f64) -> f64 {
        let index = self
            .anchors
            .partition_point(|anchor| anchor.location <= location)
            .saturating_sub(1);
        let anchor = &self.anchors[index];
        anchor.segment.rate_at(location - anchor.location)
    }
}

pub fn beat_at_time(rate: &Automation, time: f64) -> f64 {
    RateMap::from_automation(rate).beat_at(time)
}

pub fn time_at_beat(rate: &Automation, beat: f64) -> f64 {
    RateMap::from_automation(rate).location_at(beat)
}

pub fn beat_at_location(rates: &[RatePoint], location: f64, epsilon: f64) -> f64 {
    RateMap::from_rates(rates, epsilon).beat_at(location)
}

pub fn location_at_beat(rates: &[RatePoint], beat: f64, epsilon: f64) -> f64 {
    RateMap::from_rates(rates, epsilon).location_at(beat)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{a} != {b}");
    }

    #[test]
    fn step_rate() {
        let mut rate = Automation::new(2.0);
        rate.automate(0.0, Curve::Step, 2.0, 0.0);
        assert_close(beat_at_time(&rate, 0.5), 1.0);
        assert_close(time_at_beat(&rate, 3.0), 1.5);
    }

    #[test]
    fn exponential_rate_integrates_in_closed_form() {
        let mut rate = Automation::new(1.0);
        rate.automate(0.0, Curve::Step, 1.0, 0.0);
        rate.automate(10.0, Curve::Exponential, 2.0, 0.0);
        let beat = beat_at_time(&rate, 10.0);
        assert_close(beat, 10.0 / std::f64::consts::LN_2);
        assert!((beat - 14.43).abs() < 0.01);
        assert_close(time_at_beat(&rate, beat), 10.0);
    }

    #[test]
    fn rate_holds_after_last_ramp() {
        let mut rate = Automation::new(1.0);
        rate.automate(0.0, Curve::Step, 1.0, 0.0);
        rate.automate(2.0, Curve::Linear, 3.0, 0.0);
        // 4 beats during the ramp, then 3 per second
        assert_close(beat_at_time(&rate, 2.0), 4.0);
        assert_close(beat_at_time(&rate, 3.0), 7.0);
        assert_close(time_at_beat(&rate, 7.0), 3.0);
    }

    #[test]
    fn linear_inverse_inside_ramp() {
        let segment = RateSegment::Linear {
            rate0: 1.0,
            rate1: 3.0,
            duration: 2.0,
        };
        for &elapsed in &[0.1, 0.7, 1.3, 1.99] {
            assert_close(segment.elapsed(segment.beats(elapsed)), elapsed);
        }
    }

    #[test]
    fn target_inverse_converges() {
        let segment = RateSegment::Target {
            rate0: 4.0,
            target: 1.0,
            constant: 0.5,
        };
        for &elapsed in &[0.01, 0.25, 1.0, 8.0] {
            assert_close(segment.elapsed(segment.beats(elapsed)), elapsed);
        }
    }

    #[test]
    fn sampled_rate_inverse() {
        let segment = RateSegment::Values {
            samples: Arc::from(vec![1.0, 2.0, 0.5]),
            duration: 2.0,
        };
        assert_close(segment.beats(1.0), 1.5);
        assert_close(segment.beats(3.0), 1.5 + 1.25 + 0.5);
        for &elapsed in &[0.3, 1.0, 1.7, 2.5] {
            assert_close(segment.elapsed(segment.beats(elapsed)), elapsed);
        }
    }

    #[test]
    fn beat_indexed_rates_scale_the_parent() {
        let rates = [RatePoint {
            beat: 0.0,
            rate: 2.0,
            curve: Curve::Step,
        }];
        assert_close(location_at_beat(&rates, 4.0, 1e-9), 2.0);
        assert_close(beat_at_location(&rates, 2.0, 1e-9), 4.0);
    }

    #[test]
    fn beat_indexed_linear_ramp() {
        let rates = [
            RatePoint {
                beat: 0.0,
                rate: 1.0,
                curve: Curve::Step,
            },
            RatePoint {
                beat: 4.0,
                rate: 3.0,
                curve: Curve::Linear,
            },
        ];
        let map = RateMap::from_rates(&rates, 1e-9);
        assert_close(map.location_at(4.0), 2.0);
        assert_close(map.beat_at(2.0), 4.0);
        assert_close(map.beat_at(3.0), 7.0);
        assert_close(map.rate_at(1.0), 2.0);
    }

    #[test]
    fn beat_indexed_exponential_ramp() {
        let rates = [RatePoint {
            beat: 8.0,
            rate: 4.0,
            curve: Curve::Exponential,
        }];
        let map = RateMap::from_rates(&rates, 1e-9);
        let location = map.location_at(8.0);
        assert_close(location, 8.0 * 4f64.ln() / 3.0);
        assert_close(map.beat_at(location), 8.0);
    }
}
