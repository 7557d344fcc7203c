//! Live connection handling: one sampling session per start request.
use chrono::{DateTime, Local};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader, WriteHalf};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use wheeltally_engine::{SamplingLoop, WheelRng};

use crate::config::{ServerConfig, TallyScope};
use crate::protocol::{ClientEvent, ServerEvent, parse_client_line, write_event};
use crate::runner::{RunOutcome, SamplingRun, SharedExporter, SharedTally};
use crate::ticker::TickerFactory;
use crate::workbook::{ArtifactRegistry, XlsxExporter, artifact_file_name};

const EVENT_BUFFER: usize = 64;
/// How long queued events may take to reach a client that has hung up.
const EVENT_DRAIN: Duration = Duration::from_secs(2);

/// Identity of one sampling session, used to name its artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: u64,
    pub started: DateTime<Local>,
}

pub type ExporterFactory = Arc<dyn Fn(SessionInfo) -> SharedExporter + Send + Sync>;

/// Workbook exporter per session, each writing its own timestamped file.
#[must_use]
pub fn xlsx_factory(config: &ServerConfig, registry: Arc<ArtifactRegistry>) -> ExporterFactory {
    let output_dir = config.output_dir.clone();
    let prefix = config.file_prefix.clone();
    let sheet_name = config.sheet_name.clone();
    Arc::new(move |info: SessionInfo| {
        let name = artifact_file_name(&prefix, &format!("s{}", info.id), info.started);
        Arc::new(XlsxExporter::new(
            output_dir.join(name),
            sheet_name.clone(),
            Arc::clone(&registry),
        )) as SharedExporter
    })
}

/// Shared state for every live connection.
pub struct SessionContext {
    config: ServerConfig,
    process_tally: Option<SharedTally>,
    tickers: TickerFactory,
    exporters: ExporterFactory,
    next_id: AtomicU64,
}

impl SessionContext {
    #[must_use]
    pub fn new(config: ServerConfig, tickers: TickerFactory, exporters: ExporterFactory) -> Self {
        let process_tally = (config.scope == TallyScope::Process).then(SharedTally::default);
        Self {
            config,
            process_tally,
            tickers,
            exporters,
            next_id: AtomicU64::new(1),
        }
    }

    fn launch(&self, sampler: SamplingLoop, events: &mpsc::Sender<ServerEvent>) -> ActiveRun {
        let info = SessionInfo {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            started: Local::now(),
        };
        let tally = self.process_tally.clone().unwrap_or_default();
        let rng = self.config.seed.map_or_else(WheelRng::from_entropy, |seed| {
            WheelRng::for_session(seed, info.id)
        });
        log::info!(
            "session {} started: {} ticks every {:?}",
            info.id,
            sampler.tick_limit(),
            sampler.interval()
        );
        let run = SamplingRun {
            ticker: (self.tickers)(sampler.interval()),
            sampler,
            rng,
            tally,
            exporter: (self.exporters)(info),
            progress: self.config.progress_events.then(|| events.clone()),
        };
        let (cancel, cancel_rx) = oneshot::channel();
        ActiveRun {
            id: info.id,
            cancel,
            handle: tokio::spawn(run.run(cancel_rx)),
        }
    }
}

struct ActiveRun {
    id: u64,
    cancel: oneshot::Sender<()>,
    handle: JoinHandle<RunOutcome>,
}

async fn finished(active: &mut Option<ActiveRun>) -> Result<RunOutcome, JoinError> {
    match active {
        Some(run) => (&mut run.handle).await,
        None => std::future::pending().await,
    }
}

/// Accept live connections until the listener fails.
pub async fn serve_live(listener: TcpListener, ctx: Arc<SessionContext>) -> std::io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        log::debug!("live connection from {peer}");
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            handle_connection(stream, ctx).await;
            log::debug!("live connection from {peer} closed");
        });
    }
}

/// Serve one connection until the client hangs up or its session's timer
/// fails.
pub async fn handle_connection<S>(stream: S, ctx: Arc<SessionContext>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    let (events, outbox) = mpsc::channel(EVENT_BUFFER);
    let mut writer_task = tokio::spawn(forward_events(writer, outbox));
    let mut lines = BufReader::new(reader).lines();
    let mut active: Option<ActiveRun> = None;

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if let Some(reply) = on_line(&line, &ctx, &mut active, &events) {
                        push(&events, reply).await;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    log::warn!("live connection read failed: {err}");
                    break;
                }
            },
            outcome = finished(&mut active) => {
                let id = active.take().map_or(0, |run| run.id);
                match outcome {
                    Ok(RunOutcome::Completed { ticks }) => {
                        log::info!("session {id} completed after {ticks} ticks");
                        push(&events, ServerEvent::completed()).await;
                    }
                    Ok(RunOutcome::TimerFailed { ticks, error }) => {
                        log::error!("session {id} stopped after {ticks} ticks: {error}");
                        push(&events, ServerEvent::Error(error.to_string())).await;
                        break;
                    }
                    Ok(RunOutcome::Cancelled { ticks }) => {
                        log::info!("session {id} cancelled after {ticks} ticks");
                    }
                    Err(err) => {
                        log::error!("session {id} task failed: {err}");
                        push(&events, ServerEvent::Error("sampling task failed".into())).await;
                        break;
                    }
                }
            }
        }
    }

    if let Some(run) = active.take() {
        if run.cancel.send(()).is_err() {
            log::debug!("session {} already finished before cancel", run.id);
        }
        match run.handle.await {
            Ok(outcome) => log::info!("session {} ended on disconnect: {outcome:?}", run.id),
            Err(err) => log::warn!("session {} task failed: {err}", run.id),
        }
    }
    drop(events);
    match tokio::time::timeout(EVENT_DRAIN, &mut writer_task).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => log::warn!("event writer task failed: {err}"),
        Err(_) => {
            log::debug!("client stopped reading; dropping undelivered events");
            writer_task.abort();
        }
    }
}

async fn push(events: &mpsc::Sender<ServerEvent>, event: ServerEvent) {
    if events.send(event).await.is_err() {
        log::debug!("event writer gone; event dropped");
    }
}

fn on_line(
    line: &str,
    ctx: &SessionContext,
    active: &mut Option<ActiveRun>,
    events: &mpsc::Sender<ServerEvent>,
) -> Option<ServerEvent> {
    if line.trim().is_empty() {
        return None;
    }
    let ClientEvent::StartRequest(tick_limit) = match parse_client_line(line) {
        Ok(event) => event,
        Err(err) => return Some(ServerEvent::Error(err.to_string())),
    };
    if let Some(run) = active {
        return Some(ServerEvent::Error(format!(
            "session {} is still running",
            run.id
        )));
    }
    match SamplingLoop::start(tick_limit, ctx.config.tick_interval_ms) {
        Ok(sampler) => {
            if events
                .try_send(ServerEvent::Info(ctx.config.info_text()))
                .is_err()
            {
                log::warn!("info event dropped: event buffer full");
            }
            *active = Some(ctx.launch(sampler, events));
            None
        }
        Err(err) => Some(ServerEvent::Error(err.to_string())),
    }
}

async fn forward_events<S>(mut writer: WriteHalf<S>, mut outbox: mpsc::Receiver<ServerEvent>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(event) = outbox.recv().await {
        if let Err(err) = write_event(&mut writer, &event).await {
            log::debug!("dropping live events: {err}");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::tests::RecordingExporter;
    use crate::ticker::testing::{immediate_factory, stalled_factory};
    use tokio::io::{AsyncWriteExt, DuplexStream, Lines};

    fn test_config(scope: TallyScope) -> ServerConfig {
        ServerConfig {
            tick_interval_ms: 10,
            info: Some("download at /latest".into()),
            seed: Some(99),
            scope,
            ..ServerConfig::default()
        }
    }

    fn context(
        scope: TallyScope,
        tickers: TickerFactory,
    ) -> (Arc<SessionContext>, Arc<RecordingExporter>) {
        let exporter = Arc::new(RecordingExporter::default());
        let shared = Arc::clone(&exporter);
        let exporters: ExporterFactory =
            Arc::new(move |_: SessionInfo| Arc::clone(&shared) as SharedExporter);
        let ctx = SessionContext::new(test_config(scope), tickers, exporters);
        (Arc::new(ctx), exporter)
    }

    fn connect(ctx: Arc<SessionContext>) -> (DuplexStream, JoinHandle<()>) {
        let (client, server) = tokio::io::duplex(4096);
        (client, tokio::spawn(handle_connection(server, ctx)))
    }

    async fn next_event(
        lines: &mut Lines<BufReader<tokio::io::ReadHalf<DuplexStream>>>,
    ) -> ServerEvent {
        let line = lines.next_line().await.unwrap().expect("connection open");
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn start_request_streams_progress_then_one_completion() {
        let (ctx, exporter) = context(TallyScope::Session, immediate_factory());
        let (client, task) = connect(ctx);
        let (read, mut write) = tokio::io::split(client);
        let mut lines = BufReader::new(read).lines();

        write
            .write_all(b"{\"event\":\"start-request\",\"payload\":3}\n")
            .await
            .unwrap();

        assert_eq!(
            next_event(&mut lines).await,
            ServerEvent::Info("download at /latest".into())
        );
        for tick in 1..=3 {
            match next_event(&mut lines).await {
                ServerEvent::Progress(p) => assert_eq!(p.tick, tick),
                other => panic!("expected progress, got {other:?}"),
            }
        }
        assert_eq!(next_event(&mut lines).await, ServerEvent::completed());
        assert_eq!(exporter.calls.load(Ordering::SeqCst), 3);

        write.shutdown().await.unwrap();
        task.await.unwrap();
        assert!(lines.next_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalid_and_malformed_requests_get_error_events() {
        let (ctx, exporter) = context(TallyScope::Session, immediate_factory());
        let (client, task) = connect(ctx);
        let (read, mut write) = tokio::io::split(client);
        let mut lines = BufReader::new(read).lines();

        write
            .write_all(b"{\"event\":\"start-request\",\"payload\":0}\nnonsense\n")
            .await
            .unwrap();
        match next_event(&mut lines).await {
            ServerEvent::Error(msg) => assert!(msg.contains("tick limit")),
            other => panic!("expected error, got {other:?}"),
        }
        assert!(matches!(next_event(&mut lines).await, ServerEvent::Error(_)));

        write.shutdown().await.unwrap();
        task.await.unwrap();
        assert_eq!(exporter.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn second_start_while_running_is_rejected() {
        let (ctx, _) = context(TallyScope::Session, stalled_factory());
        let (client, task) = connect(ctx);
        let (read, mut write) = tokio::io::split(client);
        let mut lines = BufReader::new(read).lines();

        write
            .write_all(b"{\"event\":\"start-request\",\"payload\":2}\n")
            .await
            .unwrap();
        assert!(matches!(next_event(&mut lines).await, ServerEvent::Info(_)));
        write
            .write_all(b"{\"event\":\"start-request\",\"payload\":2}\n")
            .await
            .unwrap();
        match next_event(&mut lines).await {
            ServerEvent::Error(msg) => assert!(msg.contains("still running")),
            other => panic!("expected busy error, got {other:?}"),
        }

        write.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn disconnect_cancels_without_completion() {
        let (ctx, exporter) = context(TallyScope::Session, stalled_factory());
        let (client, task) = connect(ctx);
        let (read, mut write) = tokio::io::split(client);
        let mut lines = BufReader::new(read).lines();

        write
            .write_all(b"{\"event\":\"start-request\",\"payload\":5}\n")
            .await
            .unwrap();
        assert!(matches!(next_event(&mut lines).await, ServerEvent::Info(_)));
        write.shutdown().await.unwrap();
        task.await.unwrap();

        assert!(lines.next_line().await.unwrap().is_none());
        assert_eq!(exporter.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn half_closed_client_that_stops_reading_is_released() {
        let (ctx, _) = context(TallyScope::Session, immediate_factory());
        let (client, server) = tokio::io::duplex(64);
        let task = tokio::spawn(handle_connection(server, ctx));
        let (_read, mut write) = tokio::io::split(client);

        write
            .write_all(b"{\"event\":\"start-request\",\"payload\":1000}\n")
            .await
            .unwrap();
        write.shutdown().await.unwrap();

        tokio::time::timeout(Duration::from_secs(10), task)
            .await
            .expect("connection handler finished")
            .unwrap();
    }

    #[tokio::test]
    async fn process_scope_accumulates_across_sessions() {
        let (ctx, exporter) = context(TallyScope::Process, immediate_factory());
        for _ in 0..2 {
            let (client, task) = connect(Arc::clone(&ctx));
            let (read, mut write) = tokio::io::split(client);
            let mut lines = BufReader::new(read).lines();
            write
                .write_all(b"{\"event\":\"start-request\",\"payload\":2}\n")
                .await
                .unwrap();
            loop {
                if next_event(&mut lines).await == ServerEvent::completed() {
                    break;
                }
            }
            write.shutdown().await.unwrap();
            task.await.unwrap();
        }
        let last = exporter.last.lock().unwrap().clone().unwrap();
        assert_eq!(last.total(), 4);
        assert_eq!(exporter.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn session_scope_starts_each_run_from_zero() {
        let (ctx, exporter) = context(TallyScope::Session, immediate_factory());
        let (client, task) = connect(ctx);
        let (read, mut write) = tokio::io::split(client);
        let mut lines = BufReader::new(read).lines();
        for _ in 0..2 {
            write
                .write_all(b"{\"event\":\"start-request\",\"payload\":2}\n")
                .await
                .unwrap();
            loop {
                if next_event(&mut lines).await == ServerEvent::completed() {
                    break;
                }
            }
        }
        let last = exporter.last.lock().unwrap().clone().unwrap();
        assert_eq!(last.total(), 2);

        write.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[test]
    fn xlsx_factory_writes_one_file_per_session() {
        let dir = crate::workbook::tests::temp_dir("factory");
        let registry = Arc::new(ArtifactRegistry::new());
        let config = ServerConfig {
            output_dir: dir.clone(),
            ..ServerConfig::default()
        };
        let factory = xlsx_factory(&config, Arc::clone(&registry));
        let started = chrono::TimeZone::with_ymd_and_hms(&Local, 2026, 1, 2, 3, 4, 5).unwrap();
        let exporter = factory(SessionInfo { id: 7, started });
        exporter.export(&wheeltally_engine::Tally::new().snapshot()).unwrap();

        let expected = dir.join("wheeltally-s7-20260102T030405.xlsx");
        assert!(expected.exists());
        assert_eq!(registry.latest(), Some(expected));
    }
}
