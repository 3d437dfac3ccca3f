use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Seconds covered by one scheduling frame
    pub frame_duration: f64,
    /// Seconds a frame is scheduled ahead of the host clock
    pub lookahead: f64,
    /// Beats per second of a fresh transport. 2.0 is 120 bpm
    pub default_rate: f64,
    /// Values at or below this are treated as zero by exponential curves
    pub epsilon: f64,
    pub default_meter: (u32, u32),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            frame_duration: 0.24,
            lookahead: 0.12,
            default_rate: 2.0,
            epsilon: 1e-9,
            default_meter: (4, 1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: Config = ron::from_str("(lookahead: 0.05)").unwrap();
        assert_eq!(config.lookahead, 0.05);
        assert_eq!(config.frame_duration, 0.24);
        assert_eq!(config.default_meter, (4, 1));
    }
}
