mod curve;
mod param;

pub use curve::{Curve, T60, is_degenerate_exponential};
pub use param::{Automation, AutomationEvent};

pub mod interpolate {
    pub use super::curve::{exponential, linear, step, target, values};
}
