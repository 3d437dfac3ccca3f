use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Number of time constants a `Target` curve needs to fall within -60dB of
/// its destination.
pub const T60: f64 = 6.907_755_278_982_137;

#[derive(Debug, Clone, PartialEq)]
pub enum Curve {
    Step,
    Linear,
    Exponential,
    /// Decay toward the event value with time constant `duration`
    Target,
    /// Explicit samples spread evenly over `duration`
    Values(Arc<[f64]>),
}

impl Curve {
    pub fn name(&self) -> &'static str {
        match self {
            Curve::Step => "step",
            Curve::Linear => "linear",
            Curve::Exponential => "exponential",
            Curve::Target => "target",
            Curve::Values(_) => "curve",
        }
    }

    /// Ramps interpolate from the previous event toward this one.
    pub fn is_ramp(&self) -> bool {
        matches!(self, Curve::Linear | Curve::Exponential)
    }
}

impl Default for Curve {
    fn default() -> Self {
        Curve::Step
    }
}

impl fmt::Display for Curve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parses every curve name except `"curve"`, which needs sample data.
impl FromStr for Curve {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "step" | "set" => Ok(Curve::Step),
            "linear" => Ok(Curve::Linear),
            "exponential" => Ok(Curve::Exponential),
            "target" => Ok(Curve::Target),
            _ => Err(()),
        }
    }
}

pub fn step(value0: f64, value1: f64, time1: f64, time: f64) -> f64 {
    if time < time1 { value0 } else { value1 }
}

pub fn linear(value0: f64, value1: f64, time0: f64, time1: f64, time: f64) -> f64 {
    if time1 <= time0 {
        return value1;
    }
    value0 + (value1 - value0) * (time - time0) / (time1 - time0)
}

/// Whether an exponential segment between these values has to be downgraded
/// to a step.
pub fn is_degenerate_exponential(value0: f64, value1: f64, epsilon: f64) -> bool {
    value0.abs() <= epsilon
        || value1.abs() <= epsilon
        || value0.signum() != value1.signum()
        || !value0.is_finite()
        || !value1.is_finite()
}

pub fn exponential(
    value0: f64,
    value1: f64,
    time0: f64,
    time1: f64,
    time: f64,
    epsilon: f64,
) -> f64 {
    if time1 <= time0 || is_degenerate_exponential(value0, value1, epsilon) {
        return step(value0, value1, time1, time);
    }
    value0 * (value1 / value0).powf((time - time0) / (time1 - time0))
}

pub fn target(value0: f64, value1: f64, time0: f64, duration: f64, time: f64) -> f64 {
    if time <= time0 {
        return value0;
    }
    if duration <= 0.0 {
        return value1;
    }
    value1 + (value0 - value1) * (-(time - time0) / duration).exp()
}

pub fn values(samples: &[f64], time0: f64, duration: f64, time: f64) -> f64 {
    let Some(&last) = samples.last() else {
        return 0.0;
    };
    if samples.len() == 1 || duration <= 0.0 || time >= time0 + duration {
        return last;
    }
    if time <= time0 {
        return samples[0];
    }

    let position = (time - time0) / duration * (samples.len() - 1) as f64;
    // rounding can land exactly on the last sample just before the end
    let index = (position.floor() as usize).min(samples.len() - 2);
    let fraction = position - index as f64;
    samples[index] + (samples[index + 1] - samples[index]) * fraction
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_curve_names() {
        assert_eq!("linear".parse(), Ok(Curve::Linear));
        assert_eq!("set".parse(), Ok(Curve::Step));
        assert!("curve".parse::<Curve>().is_err());
        assert!("wobble".parse::<Curve>().is_err());
    }

    #[test]
    fn exponential_midpoint_is_geometric_mean() {
        let value = exponential(1.0, 4.0, 0.0, 2.0, 1.0, 1e-9);
        assert!((value - 2.0).abs() < 1e-12);
    }

    #[test]
    fn exponential_from_zero_steps() {
        assert_eq!(exponential(0.0, 1.0, 0.0, 1.0, 0.5, 1e-9), 0.0);
        assert_eq!(exponential(0.0, 1.0, 0.0, 1.0, 1.0, 1e-9), 1.0);
    }

    #[test]
    fn target_decays_by_one_time_constant() {
        let value = target(1.0, 0.0, 0.0, 0.5, 0.5);
        assert!((value - (-1.0f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn sampled_values_interpolate() {
        let samples = [0.0, 1.0, 0.0];
        assert_eq!(values(&samples, 1.0, 2.0, 1.5), 0.5);
        assert_eq!(values(&samples, 1.0, 2.0, 2.0), 1.0);
        assert_eq!(values(&samples, 1.0, 2.0, 9.0), 0.0);
    }

    #[test]
    fn sampled_values_just_before_the_end() {
        let samples = [0.0, 1.0, 2.0, 3.0, 4.0];
        let (time0, duration): (f64, f64) = (4.181544633901705, 34.79466929911155);
        let time = f64::from_bits((time0 + duration).to_bits() - 1);
        let value = values(&samples, time0, duration, time);
        assert!((value - 4.0).abs() < 1e-9);
    }
}
