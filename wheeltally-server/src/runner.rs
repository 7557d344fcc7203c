//! Timer-driven execution of one sampling loop.
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc, oneshot};
use wheeltally_engine::{Exporter, SamplingLoop, Tally, WheelRng};

use crate::protocol::{Progress, ServerEvent};
use crate::ticker::{Ticker, TimerFailure};
use crate::workbook::ExportError;

pub type SharedTally = Arc<Mutex<Tally>>;
pub type SharedExporter = Arc<dyn Exporter<Error = ExportError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed { ticks: u32 },
    Cancelled { ticks: u32 },
    TimerFailed { ticks: u32, error: TimerFailure },
}

/// One started loop with everything it needs to tick.
pub struct SamplingRun {
    pub sampler: SamplingLoop,
    pub ticker: Box<dyn Ticker>,
    pub rng: WheelRng,
    pub tally: SharedTally,
    pub exporter: SharedExporter,
    /// Receives a `progress` event after every tick when set.
    pub progress: Option<mpsc::Sender<ServerEvent>>,
}

impl SamplingRun {
    /// Drive the loop until it completes, the timer breaks, or `cancel`
    /// fires. Dropping the cancel sender counts as cancellation.
    pub async fn run(mut self, mut cancel: oneshot::Receiver<()>) -> RunOutcome {
        loop {
            let fired = tokio::select! {
                biased;
                _ = &mut cancel => {
                    self.sampler.cancel();
                    return RunOutcome::Cancelled { ticks: self.sampler.ticks_completed() };
                }
                fired = self.ticker.tick() => fired,
            };
            if let Err(error) = fired {
                self.sampler.cancel();
                log::error!("{error}; abandoning run");
                return RunOutcome::TimerFailed {
                    ticks: self.sampler.ticks_completed(),
                    error,
                };
            }

            let record = {
                let mut tally = self.tally.lock().await;
                let Some(record) = self.sampler.tick(&mut self.rng, &mut tally) else {
                    break;
                };
                let exporter = Arc::clone(&self.exporter);
                let snapshot = record.snapshot.clone();
                match tokio::task::spawn_blocking(move || exporter.export(&snapshot)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => log::warn!("export after tick {} failed: {err}", record.tick),
                    Err(err) => log::warn!("export task after tick {} died: {err}", record.tick),
                }
                record
            };

            if let Some(progress) = &self.progress {
                let event = ServerEvent::Progress(Progress::from_record(
                    &record,
                    self.sampler.tick_limit(),
                ));
                let cancelled = tokio::select! {
                    biased;
                    _ = &mut cancel => true,
                    sent = progress.send(event) => {
                        if sent.is_err() {
                            log::debug!("progress receiver gone after tick {}", record.tick);
                        }
                        false
                    }
                };
                if cancelled {
                    self.sampler.cancel();
                    return RunOutcome::Cancelled {
                        ticks: self.sampler.ticks_completed(),
                    };
                }
            }

            if record.is_final() {
                break;
            }
        }
        RunOutcome::Completed {
            ticks: self.sampler.ticks_completed(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ticker::testing::{ImmediateTicker, StalledTicker};
    use std::sync::atomic::{AtomicU32, Ordering};
    use wheeltally_engine::TallyView;

    /// Counts exports and can be told to fail every one of them.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingExporter {
        pub calls: AtomicU32,
        pub fail: bool,
        pub last: std::sync::Mutex<Option<TallyView>>,
    }

    impl Exporter for RecordingExporter {
        type Error = ExportError;

        fn export(&self, snapshot: &TallyView) -> Result<(), Self::Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self
                .last
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(snapshot.clone());
            if self.fail {
                Err(ExportError::HistoryOverflow(0))
            } else {
                Ok(())
            }
        }
    }

    fn run_with(
        ticks: i64,
        ticker: Box<dyn Ticker>,
        exporter: Arc<RecordingExporter>,
        progress: Option<mpsc::Sender<ServerEvent>>,
    ) -> (SamplingRun, SharedTally) {
        let tally = SharedTally::default();
        let run = SamplingRun {
            sampler: SamplingLoop::start(ticks, 10).unwrap(),
            ticker,
            rng: WheelRng::from_seed(5),
            tally: Arc::clone(&tally),
            exporter,
            progress,
        };
        (run, tally)
    }

    #[tokio::test]
    async fn three_ticks_export_three_times_then_complete() {
        let exporter = Arc::new(RecordingExporter::default());
        let (tx, mut rx) = mpsc::channel(8);
        let (run, tally) = run_with(
            3,
            Box::new(ImmediateTicker::default()),
            Arc::clone(&exporter),
            Some(tx),
        );
        let (_cancel_tx, cancel_rx) = oneshot::channel();

        assert_eq!(run.run(cancel_rx).await, RunOutcome::Completed { ticks: 3 });
        assert_eq!(exporter.calls.load(Ordering::SeqCst), 3);
        assert_eq!(tally.lock().await.total(), 3);

        let mut ticks = Vec::new();
        while let Ok(ServerEvent::Progress(p)) = rx.try_recv() {
            assert_eq!(p.tick_limit, 3);
            ticks.push(p.tick);
        }
        assert_eq!(ticks, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn failing_exports_do_not_stop_the_run() {
        let exporter = Arc::new(RecordingExporter {
            fail: true,
            ..Default::default()
        });
        let (run, tally) = run_with(
            4,
            Box::new(ImmediateTicker::default()),
            Arc::clone(&exporter),
            None,
        );
        let (_cancel_tx, cancel_rx) = oneshot::channel();

        assert_eq!(run.run(cancel_rx).await, RunOutcome::Completed { ticks: 4 });
        assert_eq!(exporter.calls.load(Ordering::SeqCst), 4);
        let tally = tally.lock().await;
        assert_eq!(tally.total(), 4);
        assert!(tally.check_invariants().is_ok());
    }

    #[tokio::test]
    async fn cancel_before_first_tick_exports_nothing() {
        let exporter = Arc::new(RecordingExporter::default());
        let (run, tally) = run_with(3, Box::new(StalledTicker), Arc::clone(&exporter), None);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let handle = tokio::spawn(run.run(cancel_rx));
        cancel_tx.send(()).unwrap();

        assert_eq!(handle.await.unwrap(), RunOutcome::Cancelled { ticks: 0 });
        assert_eq!(exporter.calls.load(Ordering::SeqCst), 0);
        assert_eq!(tally.lock().await.total(), 0);
    }

    #[tokio::test]
    async fn dropped_cancel_handle_cancels() {
        let exporter = Arc::new(RecordingExporter::default());
        let (run, _) = run_with(3, Box::new(StalledTicker), exporter, None);
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        drop(cancel_tx);
        assert_eq!(run.run(cancel_rx).await, RunOutcome::Cancelled { ticks: 0 });
    }

    #[tokio::test]
    async fn cancel_wins_over_a_stuck_progress_receiver() {
        let exporter = Arc::new(RecordingExporter::default());
        let (tx, _rx) = mpsc::channel(1);
        let (run, _) = run_with(
            50,
            Box::new(ImmediateTicker::default()),
            Arc::clone(&exporter),
            Some(tx),
        );
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let handle = tokio::spawn(run.run(cancel_rx));
        while exporter.calls.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
        cancel_tx.send(()).unwrap();

        let outcome = tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("run stopped")
            .unwrap();
        assert_eq!(outcome, RunOutcome::Cancelled { ticks: 2 });
    }

    #[tokio::test]
    async fn timer_failure_ends_the_run() {
        let exporter = Arc::new(RecordingExporter::default());
        let ticker = ImmediateTicker {
            fail_after: Some(2),
            ..Default::default()
        };
        let (run, tally) = run_with(5, Box::new(ticker), Arc::clone(&exporter), None);
        let (_cancel_tx, cancel_rx) = oneshot::channel();

        let outcome = run.run(cancel_rx).await;
        assert!(matches!(outcome, RunOutcome::TimerFailed { ticks: 2, .. }));
        assert_eq!(exporter.calls.load(Ordering::SeqCst), 2);
        assert_eq!(tally.lock().await.total(), 2);
    }
}
