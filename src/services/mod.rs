pub mod advisor;
pub mod busy;
pub mod chunking;
pub mod ledger;
pub mod occupancy;
pub mod overlap;
pub mod planner;
pub mod preemption;
pub mod priority;
pub mod routine;
pub mod schedule_utils;
pub mod scheduler_service;
pub mod slot_search;
