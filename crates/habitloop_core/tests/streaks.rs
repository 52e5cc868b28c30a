use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use habitloop_core::repo::ObligationRepository;
use habitloop_core::{
    open_db_in_memory, Calendar, CompletionService, EngineError, Obligation, ObligationKind,
    PeriodLifecycleService, RecurrenceRule, SqlitePeriodStore, StreakService, SweepScope,
};
use uuid::Uuid;

fn at(text: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(text).unwrap().with_timezone(&Utc)
}

fn daily(store: &SqlitePeriodStore<'_>) -> Obligation {
    let obligation = Obligation::new(
        Uuid::new_v4(),
        ObligationKind::Daily,
        "Stretch",
        RecurrenceRule::daily(1).unwrap(),
        at("2024-01-01T00:00:00Z"),
    );
    store.create_obligation(&obligation).unwrap();
    obligation
}

/// Plays one day per flag starting 2024-01-01: complete at noon when `true`,
/// otherwise open the window and let the next day's sweep expire it.
fn play_days(
    completions: &CompletionService<SqlitePeriodStore<'_>>,
    obligation: &Obligation,
    days: &[bool],
) {
    let first_noon = at("2024-01-01T12:00:00Z");
    for (index, completed) in days.iter().enumerate() {
        let noon = first_noon + TimeDelta::days(index as i64);
        if *completed {
            completions.complete_obligation(obligation.id, noon).unwrap();
        } else {
            completions
                .lifecycle()
                .get_or_create_active_period(obligation, noon)
                .unwrap();
        }
        completions
            .lifecycle()
            .finalize_expired_periods(SweepScope::All, noon + TimeDelta::hours(12))
            .unwrap();
    }
}

#[test]
fn success_success_expired_success_gives_current_one_longest_two() {
    let conn = open_db_in_memory().unwrap();
    let store = SqlitePeriodStore::try_new(&conn).unwrap();
    let completions = CompletionService::new(PeriodLifecycleService::new(store, Calendar::utc()));
    let streaks = StreakService::new(store, Calendar::utc());
    let obligation = daily(&store);

    play_days(&completions, &obligation, &[true, true, false, true]);

    let streak = streaks
        .get_streak(obligation.id, at("2024-01-04T18:00:00Z"))
        .unwrap();
    assert_eq!(streak.current_streak, 1);
    assert_eq!(streak.longest_streak, 2);
    assert_eq!(
        streak.last_completed_date,
        Some(NaiveDate::from_ymd_opt(2024, 1, 4).unwrap())
    );
    assert!(streak.is_active_today);

    let tomorrow = streaks
        .get_streak(obligation.id, at("2024-01-05T08:00:00Z"))
        .unwrap();
    assert_eq!(tomorrow.current_streak, 1);
    assert!(!tomorrow.is_active_today);
}

#[test]
fn unswept_missed_day_still_ends_current_streak() {
    let conn = open_db_in_memory().unwrap();
    let store = SqlitePeriodStore::try_new(&conn).unwrap();
    let completions = CompletionService::new(PeriodLifecycleService::new(store, Calendar::utc()));
    let streaks = StreakService::new(store, Calendar::utc());
    let obligation = daily(&store);

    completions
        .complete_obligation(obligation.id, at("2024-01-01T12:00:00Z"))
        .unwrap();
    completions
        .complete_obligation(obligation.id, at("2024-01-02T12:00:00Z"))
        .unwrap();

    let on_time = streaks
        .get_streak(obligation.id, at("2024-01-03T20:00:00Z"))
        .unwrap();
    assert_eq!(on_time.current_streak, 2);

    let late = streaks
        .get_streak(obligation.id, at("2024-01-04T00:00:00Z"))
        .unwrap();
    assert_eq!(late.current_streak, 0);
    assert_eq!(late.longest_streak, 2);
}

#[test]
fn several_completions_in_one_period_count_once() {
    let conn = open_db_in_memory().unwrap();
    let store = SqlitePeriodStore::try_new(&conn).unwrap();
    let completions = CompletionService::new(PeriodLifecycleService::new(store, Calendar::utc()));
    let streaks = StreakService::new(store, Calendar::utc());
    let obligation = Obligation::new(
        Uuid::new_v4(),
        ObligationKind::Habit,
        "Pushups",
        RecurrenceRule::daily(1).unwrap(),
        at("2024-01-01T00:00:00Z"),
    )
    .with_target(2);
    store.create_obligation(&obligation).unwrap();

    for time in ["2024-01-01T08:00:00Z", "2024-01-01T20:00:00Z", "2024-01-02T08:00:00Z", "2024-01-02T09:00:00Z"] {
        completions.complete_obligation(obligation.id, at(time)).unwrap();
    }

    let streak = streaks
        .get_streak(obligation.id, at("2024-01-02T10:00:00Z"))
        .unwrap();
    assert_eq!(streak.current_streak, 2);
    assert_eq!(streak.longest_streak, 2);

    let stats = streaks.get_stats(obligation.id).unwrap();
    assert_eq!(stats.total_periods, 2);
    assert_eq!(stats.successful_periods, 2);
    assert_eq!(stats.total_completions, 4);
    assert!((stats.completion_rate - 1.0).abs() < f64::EPSILON);
}

#[test]
fn history_without_periods_falls_back_to_entries() {
    let conn = open_db_in_memory().unwrap();
    let store = SqlitePeriodStore::try_new(&conn).unwrap();
    let completions = CompletionService::new(PeriodLifecycleService::new(store, Calendar::utc()));
    let streaks = StreakService::new(store, Calendar::utc());
    let obligation = daily(&store);

    let now = at("2024-01-10T12:00:00Z");
    for day in [3, 4, 6, 7, 8] {
        let instant = at("2024-01-01T09:00:00Z") + TimeDelta::days(day);
        completions
            .record_adhoc_completion(obligation.id, instant, now)
            .unwrap();
    }

    // Backfilled through 01-09; today's window is still open.
    let streak = streaks.get_streak(obligation.id, now).unwrap();
    assert_eq!(streak.longest_streak, 3);
    assert_eq!(streak.current_streak, 3);
    assert!(!streak.is_active_today);
}

#[test]
fn stats_and_streak_for_unknown_obligation_fail() {
    let conn = open_db_in_memory().unwrap();
    let store = SqlitePeriodStore::try_new(&conn).unwrap();
    let streaks = StreakService::new(store, Calendar::utc());
    let missing = Uuid::new_v4();

    assert!(matches!(
        streaks.get_streak(missing, at("2024-01-01T00:00:00Z")),
        Err(EngineError::ObligationNotFound(id)) if id == missing
    ));
    assert!(matches!(
        streaks.get_stats(missing),
        Err(EngineError::ObligationNotFound(_))
    ));
}
