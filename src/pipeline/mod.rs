//! Generation pipeline.
//!
//! - `orchestrator`: the retrying generation loop
//! - `observer`: attempt lifecycle callbacks
//! - `report`: run report and output files

mod observer;
mod orchestrator;
mod report;

pub use observer::*;
pub use orchestrator::*;
pub use report::*;
