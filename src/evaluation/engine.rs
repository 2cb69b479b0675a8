//! Pure rating arithmetic. Everything here is deterministic given the fetched
//! samples and `now`; empty windows yield 0 rather than an arithmetic error.

use chrono::{DateTime, Duration, Utc};

/// A month is approximated as the 4 most recent weekly samples, not elapsed
/// days.
const WEEKS_IN_A_MONTH: usize = 4;
const MONTH_DAYS: i64 = 30;

#[derive(Debug, Clone)]
pub struct WeeklyRateSample {
    pub rate: f64,
    pub created_at: DateTime<Utc>,
}

/// One rated task: timeliness score, quality score and the task's creation
/// time (which anchors the trailing window).
#[derive(Debug, Clone)]
pub struct RatedTaskSample {
    pub on_time_rate: f64,
    pub rate: f64,
    pub created_at: DateTime<Utc>,
}

impl RatedTaskSample {
    fn combined(&self) -> f64 {
        (self.on_time_rate + self.rate) / 2.0
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn average(values: impl Iterator<Item = f64>) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for value in values {
        sum += value;
        count += 1;
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Average of the trailing 30 days' weekly rates, newest first, capped at the
/// 4 most recent samples. An employee with no weekly history at all is new
/// and scores 0.
pub fn monthly_rate(samples: &[WeeklyRateSample], now: DateTime<Utc>) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let since = now - Duration::days(MONTH_DAYS);
    let mut windowed: Vec<&WeeklyRateSample> =
        samples.iter().filter(|s| s.created_at >= since && s.created_at <= now).collect();
    windowed.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    round2(average(
        windowed.iter().take(WEEKS_IN_A_MONTH).map(|s| s.rate),
    ))
}

/// Average of `(on_time_rate + rate) / 2` over rated tasks created in the
/// trailing `days`. The window boundary is strict; a task one millisecond too
/// old does not count.
pub fn task_rate_from(samples: &[RatedTaskSample], now: DateTime<Utc>, days: i64) -> f64 {
    let since = now - Duration::days(days);
    round2(average(
        samples
            .iter()
            .filter(|s| s.created_at >= since && s.created_at <= now)
            .map(|s| s.combined()),
    ))
}

pub fn monthly_task_rate(samples: &[RatedTaskSample], now: DateTime<Utc>) -> f64 {
    task_rate_from(samples, now, MONTH_DAYS)
}

/// Blends the weekly and task components over all history, each averaged
/// independently. When only one component is non-zero, that one is the
/// result. A legitimately-earned average of exactly 0 is indistinguishable
/// from "no data" here; that ambiguity is inherited deliberately.
pub fn all_time_evaluation(weekly: &[WeeklyRateSample], tasks: &[RatedTaskSample]) -> f64 {
    let weekly_avg = average(weekly.iter().map(|s| s.rate));
    let task_avg = average(tasks.iter().map(|s| s.combined()));
    if weekly_avg == 0.0 {
        round2(task_avg)
    } else if task_avg == 0.0 {
        round2(weekly_avg)
    } else {
        round2((weekly_avg + task_avg) / 2.0)
    }
}

/// A new employee has no weekly history to blend in, so their monthly task
/// rate stands alone.
pub fn monthly_overall_evaluation(
    weekly: &[WeeklyRateSample],
    tasks: &[RatedTaskSample],
    now: DateTime<Utc>,
) -> f64 {
    if weekly.is_empty() {
        monthly_task_rate(tasks, now)
    } else {
        round2((monthly_rate(weekly, now) + monthly_task_rate(tasks, now)) / 2.0)
    }
}

/// Fleet average over per-employee metrics. An exact 0 means "not yet scored"
/// and is skipped rather than dragging the average down.
pub fn fleet_average(values: &[f64]) -> f64 {
    round2(average(values.iter().copied().filter(|v| *v != 0.0)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weekly(rate: f64, days_ago: i64) -> WeeklyRateSample {
        WeeklyRateSample {
            rate,
            created_at: Utc::now() - Duration::days(days_ago),
        }
    }

    fn rated(on_time_rate: f64, rate: f64, age: Duration) -> RatedTaskSample {
        RatedTaskSample {
            on_time_rate,
            rate,
            created_at: Utc::now() - age,
        }
    }

    #[test]
    fn test_monthly_rate_empty_history_is_zero() {
        assert_eq!(monthly_rate(&[], Utc::now()), 0.0);
    }

    #[test]
    fn test_monthly_rate_caps_at_four_samples() {
        let now = Utc::now();
        // Five equal samples inside the window still average to the value.
        let equal: Vec<_> = (0..5).map(|i| weekly(3.0, i * 5)).collect();
        assert_eq!(monthly_rate(&equal, now), 3.0);

        // The 5th (oldest) sample is ignored entirely.
        let mut samples: Vec<_> = (0..4).map(|i| weekly(4.0, i * 5)).collect();
        samples.push(weekly(0.0, 25));
        assert_eq!(monthly_rate(&samples, now), 4.0);
    }

    #[test]
    fn test_monthly_rate_ignores_samples_outside_window() {
        let now = Utc::now();
        let samples = vec![weekly(5.0, 2), weekly(1.0, 40)];
        assert_eq!(monthly_rate(&samples, now), 5.0);
    }

    #[test]
    fn test_task_rate_from_rounds_to_two_decimals() {
        let now = Utc::now();
        let mut samples = vec![rated(2.5, 4.45, Duration::hours(1))];
        assert_eq!(task_rate_from(&samples, now, 1), 3.48);

        samples.push(rated(5.0, 3.82, Duration::hours(2)));
        assert_eq!(task_rate_from(&samples, now, 1), 3.94);
    }

    #[test]
    fn test_task_rate_window_boundary_is_strict() {
        let now = Utc::now();
        let samples = vec![
            rated(2.5, 4.45, Duration::hours(1)),
            rated(5.0, 3.82, Duration::hours(2)),
            // One millisecond past the window.
            rated(5.0, 5.0, Duration::days(1) + Duration::milliseconds(1)),
        ];
        assert_eq!(task_rate_from(&samples, now, 1), 3.94);
    }

    #[test]
    fn test_task_rate_no_rated_tasks_is_zero() {
        assert_eq!(task_rate_from(&[], Utc::now(), 30), 0.0);
    }

    #[test]
    fn test_all_time_evaluation_blends_both_components() {
        let weekly_samples = vec![weekly(4.5, 0), weekly(3.5, 1000), weekly(4.0, 250)];
        let task_samples = vec![rated(2.5, 3.5, Duration::days(15))];
        // Weekly average 4.0, task average 3.0, blended 3.50.
        assert_eq!(all_time_evaluation(&weekly_samples, &task_samples), 3.5);
    }

    #[test]
    fn test_all_time_evaluation_single_component() {
        let weekly_samples = vec![weekly(4.0, 10)];
        assert_eq!(all_time_evaluation(&weekly_samples, &[]), 4.0);

        let task_samples = vec![rated(5.0, 3.0, Duration::days(3))];
        assert_eq!(all_time_evaluation(&[], &task_samples), 4.0);

        assert_eq!(all_time_evaluation(&[], &[]), 0.0);
    }

    #[test]
    fn test_monthly_overall_falls_back_for_new_employee() {
        let now = Utc::now();
        let task_samples = vec![rated(5.0, 4.0, Duration::days(2))];
        assert_eq!(monthly_overall_evaluation(&[], &task_samples, now), 4.5);

        let weekly_samples = vec![weekly(3.0, 2)];
        assert_eq!(
            monthly_overall_evaluation(&weekly_samples, &task_samples, now),
            3.75
        );
    }

    #[test]
    fn test_fleet_average_skips_unscored_employees() {
        assert_eq!(fleet_average(&[4.0, 0.0, 2.0]), 3.0);
        assert_eq!(fleet_average(&[0.0, 0.0]), 0.0);
        assert_eq!(fleet_average(&[]), 0.0);
    }
}
