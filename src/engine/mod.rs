pub mod booking;
pub mod matching;
pub mod pricing;
pub mod scheduler;
pub mod tracking;
