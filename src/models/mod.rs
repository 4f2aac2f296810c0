pub mod calendar;
pub mod capture;
pub mod plan;
pub mod schedule;
