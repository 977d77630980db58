// ===============================
// src/orchestrator.rs
// ===============================
//
// Wiring + supervision:
//   per stream kind: SessionManager --mpsc<Fill>--> mirror worker
//   mirror worker:   DedupLedger gate -> MirrorExecutor -> journal/metrics
//
// Ledger & SymbolMap dibagi lewat Arc. Satu shutdown signal untuk semua task;
// setelah signal, tunggu maksimal `shutdown_grace` lalu abort sisanya.
//
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::domain::{Event, Fill, MarketKind, Outcome};
use crate::error::StartupError;
use crate::executor::{ExecutorConfig, MirrorExecutor};
use crate::ledger::DedupLedger;
use crate::metrics::{CONFIG_STREAM, DUPLICATES};
use crate::recorder;
use crate::session::{Backoff, SessionConfig, SessionManager};
use crate::shutdown::{self, Shutdown};
use crate::symbols::SymbolMap;
use crate::venue::{DestinationVenue, SourceVenue};

const FILL_QUEUE: usize = 1024;
const JOURNAL_QUEUE: usize = 8192;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub streams: Vec<MarketKind>,
    pub ledger_file: PathBuf,
    pub record_file: Option<String>,
    pub metrics_port: Option<u16>,
    pub mirror_coin_futures: bool,
    pub session: SessionConfig,
    pub call_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl From<&Settings> for OrchestratorConfig {
    fn from(s: &Settings) -> Self {
        Self {
            streams: s.streams.clone(),
            ledger_file: s.ledger_file.clone(),
            record_file: s.record_file.clone(),
            metrics_port: Some(s.metrics_port),
            mirror_coin_futures: s.mirror_coin_futures,
            session: SessionConfig {
                keepalive_interval: s.keepalive_interval,
                call_timeout: s.http_timeout,
                ..SessionConfig::default()
            },
            call_timeout: s.http_timeout,
            shutdown_grace: s.shutdown_grace,
        }
    }
}

pub struct Orchestrator<S: SourceVenue, D: DestinationVenue> {
    source: Arc<S>,
    dest: Arc<D>,
    cfg: OrchestratorConfig,
}

impl<S: SourceVenue, D: DestinationVenue> Orchestrator<S, D> {
    pub fn new(source: Arc<S>, dest: Arc<D>, cfg: OrchestratorConfig) -> Self {
        Self { source, dest, cfg }
    }

    /// Runs until `stop` resolves, then drains within the grace period.
    pub async fn run<F>(self, stop: F) -> Result<(), StartupError>
    where
        F: Future<Output = ()> + Send,
    {
        let (trigger, shutdown) = shutdown::channel();

        let ledger = Arc::new(DedupLedger::open(&self.cfg.ledger_file)?);
        info!(path = %ledger.path().display(), entries = ledger.len(), "dedup ledger loaded");

        let mut tasks = JoinSet::new();

        if let Some(port) = self.cfg.metrics_port {
            tasks.spawn(crate::metrics::serve_metrics(port, shutdown.clone()));
        }

        tokio::pin!(stop);
        let symbols = tokio::select! {
            loaded = load_symbols(self.dest.as_ref(), &self.cfg.streams, &shutdown) => loaded,
            _ = &mut stop => None,
        };
        let Some(symbols) = symbols else {
            trigger.fire();
            drain(tasks, self.cfg.shutdown_grace).await;
            return Ok(());
        };

        let executor = Arc::new(MirrorExecutor::new(
            self.dest.clone(),
            Arc::new(symbols),
            ExecutorConfig {
                mirror_coin_futures: self.cfg.mirror_coin_futures,
                call_timeout: self.cfg.call_timeout,
            },
        ));

        // journal opsional
        let journal = match &self.cfg.record_file {
            Some(path) => {
                let (tx, rx) = mpsc::channel::<Event>(JOURNAL_QUEUE);
                tasks.spawn(recorder::run(rx, path.clone()));
                Some(tx)
            }
            None => None,
        };

        for kind in self.cfg.streams.iter().copied() {
            let mirrored = kind != MarketKind::CoinFutures || self.cfg.mirror_coin_futures;
            CONFIG_STREAM.with_label_values(&[kind.tag()]).set(mirrored as i64);

            let (fill_tx, fill_rx) = mpsc::channel::<Fill>(FILL_QUEUE);
            let session = SessionManager::new(self.source.clone(), kind, self.cfg.session.clone());
            tasks.spawn(session.run(fill_tx, shutdown.clone()));
            tasks.spawn(mirror_worker(
                kind,
                fill_rx,
                ledger.clone(),
                executor.clone(),
                journal.clone(),
            ));
            info!(market = %kind, mirrored, "stream started");
        }
        // workers hold the remaining senders
        drop(journal);

        stop.await;
        info!("shutdown requested, stopping sessions");
        trigger.fire();
        drain(tasks, self.cfg.shutdown_grace).await;
        Ok(())
    }
}

/// Retries until the destination answers or shutdown fires.
async fn load_symbols<D: DestinationVenue>(
    dest: &D,
    kinds: &[MarketKind],
    shutdown: &Shutdown,
) -> Option<SymbolMap> {
    let mut backoff = Backoff::new(Duration::from_secs(2), Duration::from_secs(60));
    loop {
        match SymbolMap::load(dest, kinds).await {
            Ok(map) => {
                if map.is_empty() {
                    warn!(?kinds, "destination lists no tradable instruments, every fill will be skipped");
                }
                info!(instruments = map.len(), "symbol map ready");
                return Some(map);
            }
            Err(e) => {
                let delay = backoff.next_delay();
                error!(?e, ?delay, "symbol map load failed, retrying");
                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = shutdown.cancelled() => return None,
                }
            }
        }
    }
}

async fn drain(mut tasks: JoinSet<()>, grace: Duration) {
    let all_done = async {
        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                error!(?e, "task ended abnormally");
            }
        }
    };
    if timeout(grace, all_done).await.is_err() {
        warn!(?grace, "grace period elapsed, aborting remaining tasks");
        tasks.shutdown().await;
    } else {
        info!("all tasks stopped cleanly");
    }
}

/// Consumes one stream's fills: dedup gate, mirror, report.
pub async fn mirror_worker<D: DestinationVenue>(
    kind: MarketKind,
    mut rx: mpsc::Receiver<Fill>,
    ledger: Arc<DedupLedger>,
    executor: Arc<MirrorExecutor<D>>,
    journal: Option<mpsc::Sender<Event>>,
) {
    let record = |ev: Event| {
        if let Some(tx) = &journal {
            if tx.try_send(ev).is_err() {
                warn!(market = %kind, "journal queue full, event dropped");
            }
        }
    };

    // session selesai (shutdown) -> sender di-drop -> loop berhenti
    while let Some(fill) = rx.recv().await {
        record(Event::Fill(fill.clone()));

        // ditandai SEBELUM order dikirim: crash di tengah = fill hilang, bukan dobel
        // fsync per fill: keep it off the async workers
        let gate = {
            let ledger = ledger.clone();
            let id = fill.fill_id.clone();
            tokio::task::spawn_blocking(move || ledger.mark_if_new(&id))
                .await
                .unwrap_or_else(|e| Err(io::Error::new(io::ErrorKind::Other, e.to_string())))
        };
        match gate {
            Ok(true) => {}
            Ok(false) => {
                DUPLICATES.with_label_values(&[kind.tag()]).inc();
                info!(market = %kind, fill_id = %fill.fill_id, "duplicate fill, already mirrored");
                record(Event::Duplicate { fill_id: fill.fill_id.clone() });
                continue;
            }
            Err(e) => {
                error!(?e, fill_id = %fill.fill_id, symbol = %fill.venue_symbol, qty = %fill.quantity,
                    "ALERT dedup ledger write failed, fill NOT mirrored");
                record(Event::Note(format!("ledger error for {}: {e}", fill.fill_id)));
                continue;
            }
        }

        let outcome = executor.mirror(&fill).await;
        match &outcome {
            Outcome::Success(r) => info!(
                market = %kind,
                symbol = %fill.venue_symbol,
                qty = %fill.quantity,
                order_id = %r.order_id,
                status = ?r.status,
                detailed = r.detailed,
                "mirrored"
            ),
            Outcome::Skipped(reason) => warn!(
                market = %kind,
                symbol = %fill.venue_symbol,
                qty = %fill.quantity,
                %reason,
                "mirror skipped"
            ),
            Outcome::Failed(reason) => error!(
                market = %kind,
                symbol = %fill.venue_symbol,
                qty = %fill.quantity,
                %reason,
                fill_id = %fill.fill_id,
                "mirror FAILED, reconcile manually"
            ),
        }
        record(Event::Outcome {
            fill_id: fill.fill_id.clone(),
            symbol: fill.venue_symbol.clone(),
            quantity: fill.quantity,
            outcome,
        });
    }
    info!(market = %kind, "mirror worker stopped");
}
