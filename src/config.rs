use serde::{Deserialize, Serialize};

/// All scheduling knobs in one value. The orchestrator receives this by
/// value; nothing in the engine reads ambient global state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerConfig {
    /// Symmetric padding around calendar events, minutes.
    pub buffer_minutes: i64,
    /// Buffer used when deadline pressure allows tighter packing.
    pub compressed_buffer_minutes: i64,
    /// Search horizon in days.
    pub search_days: i64,
    /// Grid/search step, minutes.
    pub slot_increment_minutes: i64,
    /// Working window, local hours.
    pub working_start_hour: u32,
    pub day_end_hour: u32,
    /// Captures whose planned start is within this many minutes of now are
    /// immune to displacement.
    pub stability_window_minutes: i64,
    pub default_min_chunk_minutes: i64,
    pub target_chunk_minutes: i64,
    pub routine: RoutineConfig,
    pub overlap: OverlapConfig,
    pub preemption: PreemptionConfig,
    /// Whether date-only (all-day) events block the grid.
    pub all_day_events_block: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RoutineConfig {
    pub sleep_priority_scale: f64,
    pub sleep_priority_cap: f64,
    pub meal_priority_scale: f64,
    pub meal_priority_cap: f64,
    /// Night window bounds, local (hour, minute).
    pub night_start: (u32, u32),
    pub night_end: (u32, u32),
    /// Default meal window, local (hour, minute).
    pub meal_start: (u32, u32),
    pub meal_end: (u32, u32),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct OverlapConfig {
    pub enabled: bool,
    /// Maximum captures sharing one wall-time slot (target included).
    pub max_concurrency: usize,
    /// Overlapped portion may not exceed this fraction of the target's
    /// estimated minutes.
    pub per_task_overlap_fraction: f64,
    pub daily_budget_minutes: i64,
    pub soft_cost_per_minute: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PreemptionConfig {
    pub net_gain_floor: f64,
    pub per_minute_gain_floor: f64,
    pub max_displaced_minutes: i64,
    pub max_displaced_tasks: usize,
    /// Displacement sets are enumerated up to this size.
    pub max_combination_size: usize,
    /// Hard cap on enumerated combinations.
    pub max_combinations: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            buffer_minutes: 10,
            compressed_buffer_minutes: 5,
            search_days: 7,
            slot_increment_minutes: 15,
            working_start_hour: 8,
            day_end_hour: 22,
            stability_window_minutes: 30,
            default_min_chunk_minutes: 15,
            target_chunk_minutes: 50,
            routine: RoutineConfig::default(),
            overlap: OverlapConfig::default(),
            preemption: PreemptionConfig::default(),
            all_day_events_block: false,
        }
    }
}

impl Default for RoutineConfig {
    fn default() -> Self {
        Self {
            sleep_priority_scale: 0.7,
            sleep_priority_cap: 70.0,
            meal_priority_scale: 0.5,
            meal_priority_cap: 55.0,
            night_start: (22, 0),
            night_end: (7, 30),
            meal_start: (12, 0),
            meal_end: (14, 0),
        }
    }
}

impl Default for OverlapConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrency: 2,
            per_task_overlap_fraction: 0.5,
            daily_budget_minutes: 120,
            soft_cost_per_minute: 0.4,
        }
    }
}

impl Default for PreemptionConfig {
    fn default() -> Self {
        Self {
            net_gain_floor: 15.0,
            per_minute_gain_floor: 0.25,
            max_displaced_minutes: 240,
            max_displaced_tasks: 4,
            max_combination_size: 4,
            max_combinations: 64,
        }
    }
}
