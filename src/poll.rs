use async_trait::async_trait;
use log::{error, info, warn};
use crate::config::Options;
use crate::error::{GradeError, Result};
use crate::models::{DistributionTable, GradeSnapshot};
use crate::utils::grades::grades_changed;
use crate::utils::mail::console_tables;
use crate::utils::portal::{DISTRIBUTION_FILE, GRADES_FILE};

// Produces a fresh pair of tables, one full portal session per call.
#[async_trait(?Send)]
pub trait Fetcher {
    async fn fetch(&self) -> Result<(GradeSnapshot, DistributionTable)>;
}

// Delivers both tables once a change is seen.
#[async_trait(?Send)]
pub trait Notifier {
    async fn notify(&self, grades: &GradeSnapshot, distribution: &DistributionTable) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Unchanged,
    Notified,
    DeliveryFailed,
    /// Email notification is off; nothing was compared.
    NotChecked,
}

impl Outcome {
    // The line `run` logs when a cycle finishes.
    pub fn message(self) -> &'static str {
        match self {
            Outcome::Unchanged => "No changes detected.",
            Outcome::Notified => "Email sent.",
            Outcome::DeliveryFailed => "Change detected but not delivered; it will not be re-sent.",
            Outcome::NotChecked => "Email notification off, grades not compared.",
        }
    }
}

#[derive(Debug)]
pub struct Cycle {
    pub snapshot: GradeSnapshot,
    pub outcome: Outcome,
}

// Fetches once, compares against `previous` and notifies on change.
// Delivery failures come back as an outcome; every other error is returned.
pub async fn run_cycle<F, N>(
    fetcher: &F,
    notifier: Option<&N>,
    options: &Options,
    previous: &GradeSnapshot,
) -> Result<Cycle>
where
    F: Fetcher + ?Sized,
    N: Notifier + ?Sized,
{
    let (grades, distribution) = fetcher.fetch().await?;
    info!("Fetched {} grade rows", grades.rows.len());

    if options.console_log_tables {
        println!("{}", console_tables(&grades, &distribution));
    }

    let outcome = match notifier.filter(|_| options.email_notification) {
        None => Outcome::NotChecked,
        Some(_) if !grades_changed(previous, &grades) => Outcome::Unchanged,
        Some(notifier) => match notifier.notify(&grades, &distribution).await {
            Ok(()) => Outcome::Notified,
            Err(e @ GradeError::Delivery(_)) => {
                warn!("{e}");
                Outcome::DeliveryFailed
            }
            Err(e) => return Err(e),
        },
    };

    Ok(Cycle { snapshot: grades, outcome })
}

// Polls until a fatal error, sleeping `time_interval` between cycles.
// With email notification off a single cycle runs and its result is returned.
pub async fn run<F, N>(fetcher: &F, notifier: Option<&N>, options: &Options) -> Result<()>
where
    F: Fetcher + ?Sized,
    N: Notifier + ?Sized,
{
    let mut previous = GradeSnapshot::default();

    loop {
        let result = run_cycle(fetcher, notifier, options, &previous).await;
        if let Ok(cycle) = &result {
            match cycle.outcome {
                Outcome::DeliveryFailed => warn!("{}", cycle.outcome.message()),
                outcome => info!("{}", outcome.message()),
            }
        }
        if !options.email_notification {
            return result.map(|_| ());
        }

        match result {
            Ok(cycle) => previous = cycle.snapshot,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e @ GradeError::Parse(_)) => error!(
                "{e}. The portal layout has probably changed; inspect {GRADES_FILE} and {DISTRIBUTION_FILE}"
            ),
            Err(e) => error!("Cycle failed: {e}"),
        }

        info!("Next check in {}s", options.time_interval.as_secs());
        tokio::time::sleep(options.time_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::time::Duration;
    use super::*;
    use crate::models::{DistributionRow, GradeRow};

    type Tables = (GradeSnapshot, DistributionTable);

    struct QueuedFetcher {
        results: RefCell<VecDeque<Result<Tables>>>,
        calls: RefCell<usize>,
    }

    impl QueuedFetcher {
        fn new(results: Vec<Result<Tables>>) -> Self {
            QueuedFetcher { results: RefCell::new(results.into()), calls: RefCell::new(0) }
        }
    }

    #[async_trait(?Send)]
    impl Fetcher for QueuedFetcher {
        async fn fetch(&self) -> Result<Tables> {
            *self.calls.borrow_mut() += 1;
            // An exhausted queue stands in for a rejected login.
            self.results
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(GradeError::Authentication { location: "done".into() }))
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        unreachable: bool,
        sent: RefCell<Vec<Tables>>,
    }

    #[async_trait(?Send)]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, grades: &GradeSnapshot, distribution: &DistributionTable) -> Result<()> {
            self.sent.borrow_mut().push((grades.clone(), distribution.clone()));
            if self.unreachable {
                Err(GradeError::Delivery("connection refused".into()))
            } else {
                Ok(())
            }
        }
    }

    fn options() -> Options {
        Options { console_log_tables: false, email_notification: true, time_interval: Duration::from_secs(1800) }
    }

    fn grade(class: &str, letter: &str) -> GradeRow {
        GradeRow {
            class: class.into(),
            description: "...".into(),
            units: "3".into(),
            grading: "Graded".into(),
            letter_grade: letter.into(),
            grade_points: "4.3".into(),
        }
    }

    fn tables(rows: Vec<GradeRow>) -> Tables {
        let distribution = DistributionTable {
            rows: rows.iter().map(|r| DistributionRow { class: r.class.clone(), counts: [1; 16] }).collect(),
        };
        (GradeSnapshot { rows }, distribution)
    }

    #[tokio::test]
    async fn changed_letter_grade_notifies_with_both_tables() {
        let (previous, _) = tables(vec![grade("COMP248", "A")]);
        let current = tables(vec![grade("COMP248", "A-")]);
        let fetcher = QueuedFetcher::new(vec![Ok(current.clone())]);
        let notifier = RecordingNotifier::default();

        let cycle = run_cycle(&fetcher, Some(&notifier), &options(), &previous).await.unwrap();

        assert_eq!(cycle.outcome, Outcome::Notified);
        assert_eq!(cycle.snapshot, current.0);
        assert_eq!(*notifier.sent.borrow(), vec![current]);
    }

    #[tokio::test]
    async fn identical_snapshot_never_notifies() {
        let current = tables(vec![grade("COMP248", "A"), grade("SOEN287", "B")]);
        let fetcher = QueuedFetcher::new(vec![Ok(current.clone())]);
        let notifier = RecordingNotifier::default();

        let cycle = run_cycle(&fetcher, Some(&notifier), &options(), &current.0).await.unwrap();

        assert_eq!(cycle.outcome, Outcome::Unchanged);
        assert!(notifier.sent.borrow().is_empty());
    }

    #[tokio::test]
    async fn reordered_classes_notify() {
        let (previous, _) = tables(vec![grade("COMP248", "A"), grade("SOEN287", "A")]);
        let current = tables(vec![grade("SOEN287", "A"), grade("COMP248", "A")]);
        let fetcher = QueuedFetcher::new(vec![Ok(current)]);
        let notifier = RecordingNotifier::default();

        let cycle = run_cycle(&fetcher, Some(&notifier), &options(), &previous).await.unwrap();
        assert_eq!(cycle.outcome, Outcome::Notified);
    }

    #[tokio::test]
    async fn unreachable_relay_does_not_fail_the_cycle() {
        let current = tables(vec![grade("COMP248", "A")]);
        let fetcher = QueuedFetcher::new(vec![Ok(current.clone())]);
        let notifier = RecordingNotifier { unreachable: true, ..Default::default() };

        let cycle = run_cycle(&fetcher, Some(&notifier), &options(), &GradeSnapshot::default())
            .await
            .unwrap();

        assert_eq!(cycle.outcome, Outcome::DeliveryFailed);
        assert_eq!(cycle.snapshot, current.0);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_survives_cycle_errors_until_a_fatal_one() {
        let snapshot = tables(vec![grade("COMP248", "A")]);
        let fetcher = QueuedFetcher::new(vec![
            Ok(snapshot.clone()),
            Ok(snapshot.clone()),
            Err(GradeError::Parse("no table with class PSLEVEL1GRIDWBO".into())),
            Err(GradeError::Navigation("element not found".into())),
        ]);
        let notifier = RecordingNotifier { unreachable: true, ..Default::default() };
        let options = options();
        let start = tokio::time::Instant::now();

        let err = run(&fetcher, Some(&notifier), &options).await.unwrap_err();

        assert!(matches!(err, GradeError::Authentication { .. }));
        assert_eq!(*fetcher.calls.borrow(), 5);
        // Only the first cycle saw a change; the failed delivery still advanced the baseline.
        assert_eq!(notifier.sent.borrow().len(), 1);
        assert!(start.elapsed() >= options.time_interval * 4);
    }

    #[tokio::test(start_paused = true)]
    async fn unsupported_term_stops_the_loop() {
        let fetcher = QueuedFetcher::new(vec![Err(GradeError::UnsupportedTerm {
            term: "Fall 1999".into(),
            offered: vec!["Fall 2023".into()],
        })]);
        let notifier = RecordingNotifier::default();

        let err = run(&fetcher, Some(&notifier), &options()).await.unwrap_err();
        assert!(matches!(err, GradeError::UnsupportedTerm { .. }));
        assert_eq!(*fetcher.calls.borrow(), 1);
    }

    #[test]
    fn outcome_messages() {
        assert_eq!(Outcome::Unchanged.message(), "No changes detected.");
        assert_eq!(Outcome::Notified.message(), "Email sent.");
        assert!(Outcome::DeliveryFailed.message().contains("not delivered"));
        assert!(Outcome::NotChecked.message().contains("off"));
    }

    #[tokio::test]
    async fn notifications_off_runs_once() {
        let fetcher = QueuedFetcher::new(vec![Ok(tables(vec![grade("COMP248", "A")]))]);
        let options = Options { email_notification: false, ..options() };

        run::<_, RecordingNotifier>(&fetcher, None, &options).await.unwrap();
        assert_eq!(*fetcher.calls.borrow(), 1);
    }
}
