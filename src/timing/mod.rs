mod frames;
pub mod location;
mod meter;
mod transport;

pub use frames::{Frame, FrameScheduler};
pub use location::{RateMap, RatePoint, RateSegment};
pub use meter::{Meter, Meters};
pub use transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    Idle,
    Cued,
    Playing,
    Done,
}
