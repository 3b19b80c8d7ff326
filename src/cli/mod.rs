pub mod estimate;
pub mod metrics;
pub mod run;
pub mod setup;
pub mod sync;
pub mod ui;
