use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::config::SchedulerConfig;
use crate::models::calendar::CalendarEvent;
use crate::services::schedule_utils::{self, LocalZone};

/// Occupancy of one 15-minute cell. Owned cells remember which capture
/// (falling back to the event id) claims them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellTag {
    Free,
    External,
    Owned(String),
}

#[derive(Debug, Clone)]
pub struct GridDay {
    pub date: NaiveDate,
    pub start: DateTime<Utc>,
    pub cells: Vec<CellTag>,
}

/// Fixed-resolution view of the search horizon: working-window hours only,
/// at most seven days, each cell tagged by the dominant overlapping event.
#[derive(Debug, Clone)]
pub struct OccupancyGrid {
    pub days: Vec<GridDay>,
    cell_minutes: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DayStats {
    pub date: NaiveDate,
    pub free_minutes: i64,
    pub owned_minutes: i64,
    pub external_minutes: i64,
}

/// A contiguous run of same-tagged cells, for compact reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct GridSegment {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub tag: CellTag,
}

/// Candidate placement found by a sliding-window scan: long enough for the
/// requested duration and containing no external cells.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowCandidate {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub free_minutes: i64,
    pub owned_minutes: i64,
    pub external_minutes: i64,
    /// Minutes claimed per owning capture inside this window.
    pub owned_breakdown: HashMap<String, i64>,
}

impl OccupancyGrid {
    pub fn build(
        events: &[CalendarEvent],
        reference_now: DateTime<Utc>,
        zone: &LocalZone,
        config: &SchedulerConfig,
    ) -> Self {
        let cell_minutes = config.slot_increment_minutes.max(1);
        let horizon_days = config.search_days.clamp(1, 7);
        let mut days = Vec::with_capacity(horizon_days as usize);

        for day_index in 0..horizon_days {
            let (day_start, day_end) = schedule_utils::working_day_bounds(
                zone,
                reference_now,
                day_index,
                config.working_start_hour,
                config.day_end_hour,
            );
            let cell_count =
                (schedule_utils::duration_minutes(day_start, day_end) / cell_minutes).max(0);
            let mut cells = Vec::with_capacity(cell_count as usize);

            for cell_index in 0..cell_count {
                let cell_start = day_start + Duration::minutes(cell_index * cell_minutes);
                let cell_end = cell_start + Duration::minutes(cell_minutes);
                cells.push(dominant_tag(events, cell_start, cell_end, zone, config));
            }

            days.push(GridDay {
                date: zone.local_date(day_start),
                start: day_start,
                cells,
            });
        }

        Self { days, cell_minutes }
    }

    pub fn cell_minutes(&self) -> i64 {
        self.cell_minutes
    }

    /// The instant just past the last cell of the horizon.
    pub fn end(&self) -> DateTime<Utc> {
        self.days
            .last()
            .map(|day| day.start + Duration::minutes(day.cells.len() as i64 * self.cell_minutes))
            .unwrap_or_else(Utc::now)
    }

    pub fn daily_stats(&self) -> Vec<DayStats> {
        self.days
            .iter()
            .map(|day| {
                let mut stats = DayStats {
                    date: day.date,
                    free_minutes: 0,
                    owned_minutes: 0,
                    external_minutes: 0,
                };
                for cell in &day.cells {
                    match cell {
                        CellTag::Free => stats.free_minutes += self.cell_minutes,
                        CellTag::Owned(_) => stats.owned_minutes += self.cell_minutes,
                        CellTag::External => stats.external_minutes += self.cell_minutes,
                    }
                }
                stats
            })
            .collect()
    }

    pub fn segments(&self) -> Vec<GridSegment> {
        let mut segments = Vec::new();
        for day in &self.days {
            let mut run_start = 0usize;
            for index in 1..=day.cells.len() {
                let run_over = index == day.cells.len() || day.cells[index] != day.cells[run_start];
                if run_over {
                    segments.push(GridSegment {
                        start: day.start
                            + Duration::minutes(run_start as i64 * self.cell_minutes),
                        end: day.start + Duration::minutes(index as i64 * self.cell_minutes),
                        tag: day.cells[run_start].clone(),
                    });
                    run_start = index;
                }
            }
        }
        segments
    }

    /// Slide a window of ⌈duration/cell⌉ cells across each day inside
    /// `[range_start, range_end]`, keeping windows that contain no external
    /// cell. Candidates come back earliest first, capped at `limit`.
    pub fn collect_window_candidates(
        &self,
        duration_minutes: i64,
        range_start: DateTime<Utc>,
        range_end: DateTime<Utc>,
        limit: usize,
    ) -> Vec<WindowCandidate> {
        let window_cells =
            (schedule_utils::round_up_to_increment(duration_minutes.max(1), self.cell_minutes)
                / self.cell_minutes) as usize;
        let mut candidates = Vec::new();

        'days: for day in &self.days {
            if day.cells.len() < window_cells {
                continue;
            }
            for offset in 0..=(day.cells.len() - window_cells) {
                let start = day.start + Duration::minutes(offset as i64 * self.cell_minutes);
                let end = start + Duration::minutes(window_cells as i64 * self.cell_minutes);
                if start < range_start || end > range_end {
                    continue;
                }

                let mut candidate = WindowCandidate {
                    start,
                    end,
                    free_minutes: 0,
                    owned_minutes: 0,
                    external_minutes: 0,
                    owned_breakdown: HashMap::new(),
                };
                for cell in &day.cells[offset..offset + window_cells] {
                    match cell {
                        CellTag::Free => candidate.free_minutes += self.cell_minutes,
                        CellTag::External => candidate.external_minutes += self.cell_minutes,
                        CellTag::Owned(owner) => {
                            candidate.owned_minutes += self.cell_minutes;
                            *candidate.owned_breakdown.entry(owner.clone()).or_insert(0) +=
                                self.cell_minutes;
                        }
                    }
                }

                if candidate.external_minutes > 0 {
                    continue;
                }
                candidates.push(candidate);
                if candidates.len() >= limit {
                    break 'days;
                }
            }
        }

        candidates
    }

    /// Capacity split of the horizon restricted to `[range_start, range_end]`.
    pub fn capacity_within(
        &self,
        range_start: DateTime<Utc>,
        range_end: DateTime<Utc>,
    ) -> (i64, i64, i64) {
        let mut free = 0;
        let mut owned = 0;
        let mut external = 0;
        for day in &self.days {
            for (index, cell) in day.cells.iter().enumerate() {
                let cell_start = day.start + Duration::minutes(index as i64 * self.cell_minutes);
                let cell_end = cell_start + Duration::minutes(self.cell_minutes);
                if cell_start < range_start || cell_end > range_end {
                    continue;
                }
                match cell {
                    CellTag::Free => free += self.cell_minutes,
                    CellTag::Owned(_) => owned += self.cell_minutes,
                    CellTag::External => external += self.cell_minutes,
                }
            }
        }
        (free, owned, external)
    }
}

/// Owned coverage wins over external whenever both touch the cell; among
/// events of the winning kind the one covering more of the cell names it.
fn dominant_tag(
    events: &[CalendarEvent],
    cell_start: DateTime<Utc>,
    cell_end: DateTime<Utc>,
    zone: &LocalZone,
    config: &SchedulerConfig,
) -> CellTag {
    let mut best_owned: Option<(i64, String)> = None;
    let mut best_external: i64 = 0;

    for event in events {
        let range = match event.timed_range() {
            Some(range) => Some(range),
            None if config.all_day_events_block => event.start.as_date().map(|date| {
                let day_start = zone.at(date, 0, 0);
                (day_start, day_start + Duration::days(1))
            }),
            None => None,
        };
        let Some((event_start, event_end)) = range else {
            continue;
        };

        let covered_start = event_start.max(cell_start);
        let covered_end = event_end.min(cell_end);
        if covered_end <= covered_start {
            continue;
        }
        let coverage = schedule_utils::duration_minutes(covered_start, covered_end);

        if event.is_owned() {
            let owner = event
                .capture_id()
                .map(str::to_owned)
                .unwrap_or_else(|| event.id.clone());
            match &best_owned {
                Some((best, _)) if *best >= coverage => {}
                _ => best_owned = Some((coverage, owner)),
            }
        } else {
            best_external = best_external.max(coverage);
        }
    }

    match (best_owned, best_external) {
        (Some((_, owner)), _) => CellTag::Owned(owner),
        (None, c) if c > 0 => CellTag::External,
        _ => CellTag::Free,
    }
}
