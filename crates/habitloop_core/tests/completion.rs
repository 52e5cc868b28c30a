use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use habitloop_core::repo::{
    EntryRepository, ObligationRepository, PeriodMutation, PeriodPredicate, PeriodRepository,
};
use habitloop_core::{
    open_db_in_memory, Calendar, CompletionService, Difficulty, EngineError, Entry, EntryOutcome,
    Obligation, ObligationId, ObligationKind, ObligationListQuery, ObligationStatus,
    Period, PeriodId, PeriodLifecycleService, PeriodOutcome, RecurrenceRule, RepoResult,
    SqlitePeriodStore, SweepCursor, SweepScope,
};
use std::cell::Cell;
use uuid::Uuid;

fn at(text: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(text).unwrap().with_timezone(&Utc)
}

fn date(text: &str) -> NaiveDate {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").unwrap()
}

fn service(store: SqlitePeriodStore<'_>) -> CompletionService<SqlitePeriodStore<'_>> {
    CompletionService::new(PeriodLifecycleService::new(store, Calendar::utc()))
}

fn create(store: &SqlitePeriodStore<'_>, obligation: Obligation) -> Obligation {
    store.create_obligation(&obligation).unwrap();
    obligation
}

fn daily(owner: Uuid) -> Obligation {
    Obligation::new(
        owner,
        ObligationKind::Daily,
        "Water plants",
        RecurrenceRule::daily(1).unwrap(),
        at("2024-01-01T00:00:00Z"),
    )
}

#[test]
fn completion_finalizes_single_shot_period_and_sets_date() {
    let conn = open_db_in_memory().unwrap();
    let store = SqlitePeriodStore::try_new(&conn).unwrap();
    let completions = service(store);
    let obligation = create(
        &store,
        daily(Uuid::new_v4())
            .with_difficulty(Difficulty::Medium)
            .with_tags(["garden"]),
    );

    let outcome = completions
        .complete_obligation(obligation.id, at("2024-01-01T10:00:00Z"))
        .unwrap();
    assert!(outcome.recorded);
    let period = outcome.period.unwrap();
    assert_eq!(period.outcome, PeriodOutcome::Success);
    assert!(!period.is_active);
    assert_eq!(period.completion_count, 1);
    assert_eq!(period.end_instant, Some(at("2024-01-02T00:00:00Z")));
    assert_eq!(outcome.obligation.last_completed_date, Some(date("2024-01-01")));

    let entry = outcome.entry.unwrap();
    assert_eq!(entry.outcome, EntryOutcome::Success);
    assert_eq!(entry.period_id, Some(period.id));
    assert_eq!(entry.difficulty, Difficulty::Medium);
    assert_eq!(entry.tags, vec!["garden"]);

    let stored = store.get_obligation(obligation.id).unwrap().unwrap();
    assert_eq!(stored.last_completed_date, Some(date("2024-01-01")));
}

#[test]
fn repeated_completion_in_same_window_is_idempotent() {
    let conn = open_db_in_memory().unwrap();
    let store = SqlitePeriodStore::try_new(&conn).unwrap();
    let completions = service(store);
    let obligation = create(&store, daily(Uuid::new_v4()));

    let first = completions
        .complete_obligation(obligation.id, at("2024-01-01T10:00:00Z"))
        .unwrap();
    let second = completions
        .complete_obligation(obligation.id, at("2024-01-01T18:00:00Z"))
        .unwrap();

    assert!(first.recorded);
    assert!(!second.recorded);
    assert!(second.entry.is_none());
    assert_eq!(second.period.unwrap().id, first.period.unwrap().id);
    assert_eq!(store.list_entries(obligation.id).unwrap().len(), 1);
    assert_eq!(store.list_periods(obligation.id).unwrap().len(), 1);
}

#[test]
fn entry_snapshot_survives_later_edits() {
    let conn = open_db_in_memory().unwrap();
    let store = SqlitePeriodStore::try_new(&conn).unwrap();
    let completions = service(store);
    let obligation = create(
        &store,
        daily(Uuid::new_v4())
            .with_difficulty(Difficulty::Trivial)
            .with_tags(["before"]),
    );
    completions
        .complete_obligation(obligation.id, at("2024-01-01T10:00:00Z"))
        .unwrap();

    conn.execute(
        "UPDATE obligations SET difficulty = 'hard' WHERE uuid = ?1;",
        [obligation.id.to_string()],
    )
    .unwrap();
    conn.execute(
        "UPDATE obligation_tags SET tag = 'after' WHERE obligation_uuid = ?1;",
        [obligation.id.to_string()],
    )
    .unwrap();

    let entries = store.list_entries(obligation.id).unwrap();
    assert_eq!(entries[0].difficulty, Difficulty::Trivial);
    assert_eq!(entries[0].tags, vec!["before"]);
}

#[test]
fn count_target_progresses_then_finalizes() {
    let conn = open_db_in_memory().unwrap();
    let store = SqlitePeriodStore::try_new(&conn).unwrap();
    let completions = service(store);
    let obligation = create(
        &store,
        Obligation::new(
            Uuid::new_v4(),
            ObligationKind::Habit,
            "Drink water",
            RecurrenceRule::daily(1).unwrap(),
            at("2024-01-01T00:00:00Z"),
        )
        .with_target(3),
    );

    let first = completions
        .complete_obligation(obligation.id, at("2024-01-01T08:00:00Z"))
        .unwrap();
    let first_period = first.period.unwrap();
    assert_eq!(first_period.completion_count, 1);
    assert_eq!(first_period.outcome, PeriodOutcome::Pending);
    assert!(first_period.is_active);

    completions
        .complete_obligation(obligation.id, at("2024-01-01T12:00:00Z"))
        .unwrap();
    let third = completions
        .complete_obligation(obligation.id, at("2024-01-01T16:00:00Z"))
        .unwrap();
    let third_period = third.period.unwrap();
    assert_eq!(third_period.id, first_period.id);
    assert_eq!(third_period.completion_count, 3);
    assert_eq!(third_period.outcome, PeriodOutcome::Success);

    let fourth = completions
        .complete_obligation(obligation.id, at("2024-01-01T20:00:00Z"))
        .unwrap();
    assert!(!fourth.recorded);
    assert_eq!(store.list_entries(obligation.id).unwrap().len(), 3);
}

#[test]
fn missing_and_archived_obligations_are_rejected() {
    let conn = open_db_in_memory().unwrap();
    let store = SqlitePeriodStore::try_new(&conn).unwrap();
    let completions = service(store);

    let missing = Uuid::new_v4();
    let err = completions
        .complete_obligation(missing, at("2024-01-01T10:00:00Z"))
        .unwrap_err();
    assert!(matches!(err, EngineError::ObligationNotFound(id) if id == missing));

    let obligation = create(&store, daily(Uuid::new_v4()));
    store
        .set_obligation_status(obligation.id, ObligationStatus::Archived)
        .unwrap();
    let err = completions
        .complete_obligation(obligation.id, at("2024-01-01T10:00:00Z"))
        .unwrap_err();
    assert!(matches!(err, EngineError::ObligationArchived(id) if id == obligation.id));
    assert!(store.list_periods(obligation.id).unwrap().is_empty());
    assert!(store.list_entries(obligation.id).unwrap().is_empty());
}

#[test]
fn completion_losing_to_sweep_reports_concurrent_modification() {
    let conn = open_db_in_memory().unwrap();
    let store = SqlitePeriodStore::try_new(&conn).unwrap();
    let completions = service(store);
    let obligation = create(&store, daily(Uuid::new_v4()));

    let period = completions
        .lifecycle()
        .get_or_create_active_period(&obligation, at("2024-01-01T09:00:00Z"))
        .unwrap()
        .unwrap();
    // A sweep running on a later clock finalizes the window first.
    completions
        .lifecycle()
        .finalize_expired_periods(SweepScope::All, at("2024-01-02T00:01:00Z"))
        .unwrap();

    let err = completions
        .complete_obligation(obligation.id, at("2024-01-01T23:00:00Z"))
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::ConcurrentModification { entity: "period", id } if id == period.id
    ));

    let entries = store.list_entries(obligation.id).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].outcome, EntryOutcome::Fail);
    assert_eq!(
        store.get_period(period.id).unwrap().unwrap().outcome,
        PeriodOutcome::Expired
    );
}

#[test]
fn always_available_single_shot_habit_completes_once_per_day() {
    let conn = open_db_in_memory().unwrap();
    let store = SqlitePeriodStore::try_new(&conn).unwrap();
    let completions = service(store);
    let obligation = create(
        &store,
        Obligation::new(
            Uuid::new_v4(),
            ObligationKind::Habit,
            "Call family",
            RecurrenceRule::always(),
            at("2024-01-01T00:00:00Z"),
        ),
    );

    let first = completions
        .complete_obligation(obligation.id, at("2024-01-01T10:00:00Z"))
        .unwrap();
    assert!(first.recorded);
    let repeat = completions
        .complete_obligation(obligation.id, at("2024-01-01T10:00:05Z"))
        .unwrap();
    assert!(!repeat.recorded);

    let next_day = completions
        .complete_obligation(obligation.id, at("2024-01-02T09:00:00Z"))
        .unwrap();
    assert!(next_day.recorded);
    assert_eq!(next_day.obligation.last_completed_date, Some(date("2024-01-02")));

    let successes = store
        .list_periods(obligation.id)
        .unwrap()
        .into_iter()
        .filter(|period| period.outcome == PeriodOutcome::Success)
        .count();
    assert_eq!(successes, 2);
    assert_eq!(store.list_entries(obligation.id).unwrap().len(), 2);
}

#[test]
fn adhoc_completion_backfills_without_period() {
    let conn = open_db_in_memory().unwrap();
    let store = SqlitePeriodStore::try_new(&conn).unwrap();
    let completions = service(store);
    let obligation = create(&store, daily(Uuid::new_v4()));
    let now = at("2024-01-05T12:00:00Z");

    let outcome = completions
        .record_adhoc_completion(obligation.id, now - TimeDelta::days(2), now)
        .unwrap();
    assert!(outcome.period.is_none());
    assert_eq!(outcome.entry.unwrap().period_id, None);
    assert_eq!(outcome.obligation.last_completed_date, Some(date("2024-01-03")));

    // Older backfill does not move the date backwards.
    let older = completions
        .record_adhoc_completion(obligation.id, now - TimeDelta::days(4), now)
        .unwrap();
    assert_eq!(older.obligation.last_completed_date, Some(date("2024-01-03")));

    let err = completions
        .record_adhoc_completion(obligation.id, at("2024-01-05T01:00:00Z"), now)
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));

    let err = completions
        .record_adhoc_completion(obligation.id, now + TimeDelta::hours(1), now)
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));

    assert_eq!(store.list_entries(obligation.id).unwrap().len(), 2);
    assert!(store.list_periods(obligation.id).unwrap().is_empty());
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RivalAt {
    PeriodWrite,
    EntryAppend,
}

/// Store wrapper where a second caller completes `rival_obligation` once,
/// right before the first caller's write at `rival_at` reaches SQLite.
struct InterleavedStore<'conn> {
    inner: SqlitePeriodStore<'conn>,
    rival_at: RivalAt,
    rival_obligation: ObligationId,
    rival_now: DateTime<Utc>,
    fired: Cell<bool>,
}

impl<'conn> InterleavedStore<'conn> {
    fn new(
        inner: SqlitePeriodStore<'conn>,
        rival_at: RivalAt,
        rival_obligation: ObligationId,
        rival_now: DateTime<Utc>,
    ) -> Self {
        Self {
            inner,
            rival_at,
            rival_obligation,
            rival_now,
            fired: Cell::new(false),
        }
    }

    fn run_rival(&self, point: RivalAt) {
        if point != self.rival_at || self.fired.replace(true) {
            return;
        }
        let outcome = service(self.inner)
            .complete_obligation(self.rival_obligation, self.rival_now)
            .unwrap();
        assert!(outcome.recorded);
    }
}

impl ObligationRepository for InterleavedStore<'_> {
    fn create_obligation(&self, obligation: &Obligation) -> RepoResult<ObligationId> {
        self.inner.create_obligation(obligation)
    }
    fn get_obligation(&self, id: ObligationId) -> RepoResult<Option<Obligation>> {
        self.inner.get_obligation(id)
    }
    fn list_obligations(&self, query: &ObligationListQuery) -> RepoResult<Vec<Obligation>> {
        self.inner.list_obligations(query)
    }
    fn set_obligation_status(
        &self,
        id: ObligationId,
        status: ObligationStatus,
    ) -> RepoResult<()> {
        self.inner.set_obligation_status(id, status)
    }
    fn set_last_completed_date(&self, id: ObligationId, date: NaiveDate) -> RepoResult<bool> {
        self.inner.set_last_completed_date(id, date)
    }
}

impl PeriodRepository for InterleavedStore<'_> {
    fn insert_active_period(&self, period: &Period) -> RepoResult<()> {
        self.inner.insert_active_period(period)
    }
    fn get_period(&self, id: PeriodId) -> RepoResult<Option<Period>> {
        self.inner.get_period(id)
    }
    fn get_active_period(&self, obligation_id: ObligationId) -> RepoResult<Option<Period>> {
        self.inner.get_active_period(obligation_id)
    }
    fn latest_period(&self, obligation_id: ObligationId) -> RepoResult<Option<Period>> {
        self.inner.latest_period(obligation_id)
    }
    fn list_periods(&self, obligation_id: ObligationId) -> RepoResult<Vec<Period>> {
        self.inner.list_periods(obligation_id)
    }
    fn list_expirable_periods(
        &self,
        scope: SweepScope,
        now: DateTime<Utc>,
        after: Option<SweepCursor>,
        limit: u32,
    ) -> RepoResult<Vec<Period>> {
        self.inner.list_expirable_periods(scope, now, after, limit)
    }
    fn conditional_update(
        &self,
        id: PeriodId,
        predicate: PeriodPredicate,
        mutation: PeriodMutation,
    ) -> RepoResult<bool> {
        self.run_rival(RivalAt::PeriodWrite);
        self.inner.conditional_update(id, predicate, mutation)
    }
}

impl EntryRepository for InterleavedStore<'_> {
    fn append_entry(&self, entry: &Entry) -> RepoResult<()> {
        self.run_rival(RivalAt::EntryAppend);
        self.inner.append_entry(entry)
    }
    fn list_entries(&self, obligation_id: ObligationId) -> RepoResult<Vec<Entry>> {
        self.inner.list_entries(obligation_id)
    }
}

#[test]
fn completion_lost_to_concurrent_success_returns_winner_state() {
    let conn = open_db_in_memory().unwrap();
    let store = SqlitePeriodStore::try_new(&conn).unwrap();
    let obligation = create(&store, daily(Uuid::new_v4()));
    let now = at("2024-01-01T10:00:00Z");

    let interleaved = InterleavedStore::new(store, RivalAt::PeriodWrite, obligation.id, now);
    let completions = CompletionService::new(PeriodLifecycleService::new(
        interleaved,
        Calendar::utc(),
    ));
    // Open the window before the rival can run.
    service(store)
        .lifecycle()
        .get_or_create_active_period(&obligation, now)
        .unwrap();

    let outcome = completions.complete_obligation(obligation.id, now).unwrap();
    assert!(!outcome.recorded);
    assert!(outcome.entry.is_none());
    assert_eq!(outcome.period.unwrap().outcome, PeriodOutcome::Success);
    assert_eq!(outcome.obligation.last_completed_date, Some(date("2024-01-01")));
    assert_eq!(store.list_entries(obligation.id).unwrap().len(), 1);
}

#[test]
fn backfill_never_moves_date_behind_concurrent_completion() {
    let conn = open_db_in_memory().unwrap();
    let store = SqlitePeriodStore::try_new(&conn).unwrap();
    let obligation = create(&store, daily(Uuid::new_v4()));
    let now = at("2024-01-05T12:00:00Z");

    let interleaved = InterleavedStore::new(store, RivalAt::EntryAppend, obligation.id, now);
    let completions = CompletionService::new(PeriodLifecycleService::new(
        interleaved,
        Calendar::utc(),
    ));

    let outcome = completions
        .record_adhoc_completion(obligation.id, at("2024-01-03T08:00:00Z"), now)
        .unwrap();
    assert!(outcome.recorded);
    assert_eq!(outcome.obligation.last_completed_date, Some(date("2024-01-05")));
    assert_eq!(
        store.get_obligation(obligation.id).unwrap().unwrap().last_completed_date,
        Some(date("2024-01-05"))
    );
    assert_eq!(store.list_entries(obligation.id).unwrap().len(), 2);
}
