#![doc = include_str!("../README.md")]

pub mod driver;
pub mod metrics;
pub mod pick;
pub mod plan;
pub mod report;

mod error;

pub use driver::{LoadTest, TestConfig};
pub use error::Error;
pub use metrics::Registry;
pub use plan::{RampPlan, Stage};
pub use report::{RunReport, Threshold, ThresholdOutcome};

pub mod prelude {
    pub use crate::driver::LoadTest;
    pub use crate::metrics::{HttpMetrics, Registry};
    pub use crate::pick::{IterationContext, WeightedChoice};
    pub use crate::plan::RampPlan;
    pub use crate::report::{RunReport, Threshold};
}
