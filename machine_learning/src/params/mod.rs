mod norm_state;
mod param_set;

pub use norm_state::{NormKey, NormState, RunningStats};
pub use param_set::{BoundParams, ParamKey, ParamSet};
