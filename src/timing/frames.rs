use std::time::Duration;

use crate::config::Config;

/// A scheduling window `[t1, t2)` in host seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    pub t1: f64,
    pub t2: f64,
}

/// Turns a free-running clock into contiguous lookahead windows.
///
/// Each window starts where the previous one ended and reaches
/// `lookahead + duration` past the time it was requested, so a late
/// consumer gets a wider window rather than a gap.
#[derive(Debug, Clone)]
pub struct FrameScheduler {
    duration: f64,
    lookahead: f64,
    listeners: usize,
    current: Option<f64>,
}

impl FrameScheduler {
    pub fn new(config: &Config) -> Self {
        Self {
            duration: config.frame_duration,
            lookahead: config.lookahead,
            listeners: 0,
            current: None,
        }
    }

    /// Returns true when this wakes the scheduler from idle.
    pub fn listen(&mut self) -> bool {
        self.listeners += 1;
        self.listeners == 1
    }

    /// Returns true when the last listener left.
    pub fn unlisten(&mut self) -> bool {
        if self.listeners == 0 {
            return false;
        }
        self.listeners -= 1;
        if self.listeners == 0 {
            self.current = None;
            return true;
        }
        false
    }

    pub fn is_idle(&self) -> bool {
        self.listeners == 0
    }

    pub fn start(&mut self, now: f64) {
        self.current = Some(now);
    }

    pub fn reset(&mut self) {
        self.current = None;
    }

    pub fn next_frame(&mut self, now: f64) -> Option<Frame> {
        if self.is_idle() {
            return None;
        }

        let t1 = self.current.unwrap_or(now);
        let t2 = now + self.lookahead + self.duration;
        if t2 <= t1 {
            return None;
        }

        self.current = Some(t2);
        Some(Frame { t1, t2 })
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn lookahead(&self) -> f64 {
        self.lookahead
    }

    /// Cadence the driving clock should tick at.
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64((self.duration * 0.5).max(0.001))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_are_contiguous() {
        let mut frames = FrameScheduler::new(&Config::default());
        assert!(frames.listen());
        frames.start(0.0);

        let first = frames.next_frame(0.0).unwrap();
        assert_eq!(first.t1, 0.0);
        assert!((first.t2 - 0.36).abs() < 1e-12);

        let second = frames.next_frame(0.12).unwrap();
        assert_eq!(second.t1, first.t2);
        assert!((second.t2 - 0.48).abs() < 1e-12);
    }

    #[test]
    fn stalled_clock_yields_no_empty_window() {
        let mut frames = FrameScheduler::new(&Config::default());
        frames.listen();
        frames.next_frame(1.0).unwrap();
        assert_eq!(frames.next_frame(1.0), None);
        let late = frames.next_frame(3.0).unwrap();
        assert!((late.t2 - late.t1 - 2.0).abs() < 1e-12);
    }

    #[test]
    fn idles_without_listeners() {
        let mut frames = FrameScheduler::new(&Config::default());
        assert_eq!(frames.next_frame(0.0), None);
        frames.listen();
        assert!(!frames.listen());
        assert!(!frames.unlisten());
        assert!(frames.unlisten());
        assert!(frames.is_idle());
        assert_eq!(frames.next_frame(0.0), None);
    }
}
