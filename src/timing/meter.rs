#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Meter {
    pub beat: f64,
    pub numerator: u32,
    pub denominator: u32,
}

impl Meter {
    pub fn beats_per_bar(&self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }
}

/// Meter changes by beat. There is always a meter in force at beat 0.
#[derive(Debug, Clone, PartialEq)]
pub struct Meters {
    meters: Vec<Meter>,
}

impl Meters {
    pub fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            meters: vec![Meter {
                beat: 0.0,
                numerator,
                denominator,
            }],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Meter> {
        self.meters.iter()
    }

    /// Replaces every meter change at or after `beat` with this one.
    pub fn set_meter_at_beat(&mut self, beat: f64, numerator: u32, denominator: u32) {
        let beat = beat.max(0.0);
        let keep = self.meters.partition_point(|meter| meter.beat < beat);
        self.meters.truncate(keep);
        self.meters.push(Meter {
            beat,
            numerator,
            denominator,
        });
    }

    pub fn meter_at_beat(&self, beat: f64) -> &Meter {
        let index = self
            .meters
            .partition_point(|meter| meter.beat <= beat)
            .saturating_sub(1);
        &self.meters[index]
    }

    /// Whole bars elapsed at `beat`.
    pub fn bar_at_beat(&self, beat: f64) -> f64 {
        let mut bar = 0.0;
        for (index, meter) in self.meters.iter().enumerate() {
            match self.meters.get(index + 1) {
                Some(next) if next.beat <= beat => {
                    bar += (next.beat - meter.beat) / meter.beats_per_bar();
                }
                _ => {
                    return bar + ((beat - meter.beat) / meter.beats_per_bar()).floor();
                }
            }
        }
        bar
    }

    pub fn beat_at_bar(&self, bar: f64) -> f64 {
        let mut bars = 0.0;
        for (index, meter) in self.meters.iter().enumerate() {
            let length = self
                .meters
                .get(index + 1)
                .map(|next| (next.beat - meter.beat) / meter.beats_per_bar());
            match length {
                Some(length) if bars + length <= bar => bars += length,
                _ => return meter.beat + (bar - bars) * meter.beats_per_bar(),
            }
        }
        0.0
    }
}
