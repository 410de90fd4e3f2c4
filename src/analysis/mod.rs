pub mod aggregator;
pub mod calibration;
pub mod coincidence;
pub mod combiner;
pub mod comparison;
pub mod run_info;
pub mod run_range;
pub mod settings;
pub mod simulation;
pub mod variables;
