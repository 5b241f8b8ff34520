//! Decision policy: calibrated threshold plus hard-block overrides.

mod overrides;
mod policy;

pub use overrides::{DenyList, HardBlock, OverrideSource, Overrides};
pub use policy::{Action, DecisionPolicy, DecisionReason, Threshold, Verdict};
