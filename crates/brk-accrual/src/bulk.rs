//! Whole-book accrual for one period.
//!
//! N workers pull client ids from a shared queue and compute each client's
//! calculation in its own read-only unit of work. Results flow over an mpsc
//! channel to a single collector that writes them in batches. A batch that
//! fails to write is retried one client at a time, so a bad client only
//! fails itself. Per-client failures end up in the report.
//!
//! The worker's result only routes a client (failed, skipped, or queued for
//! writing). The ledger may move before the batch is written, so each client
//! is computed again inside the write unit of work and that result is what
//! gets persisted and fenced.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use brk_ledger::{
    AccrualPeriod, BrokerageError, CalculationRepository, ClientId, LedgerStore, LedgerTx, Micros,
    PeriodKey, Result, TradeRepository,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::engine::{AccrualEngine, ComputedAccrual};

pub const DEFAULT_WORKERS: usize = 10;
pub const DEFAULT_WRITE_BATCH: usize = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BulkOptions {
    pub workers: usize,
    /// Clients per write unit of work.
    pub write_batch_size: usize,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            write_batch_size: DEFAULT_WRITE_BATCH,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ClientFailure {
    pub client_id: ClientId,
    pub kind: &'static str,
    pub error: String,
}

impl ClientFailure {
    fn new(client_id: ClientId, err: &BrokerageError) -> Self {
        Self {
            client_id,
            kind: err.kind(),
            error: err.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BulkReport {
    pub period: String,
    pub succeeded: Vec<ClientId>,
    pub skipped: Vec<ClientId>,
    pub failed: Vec<ClientFailure>,
    pub total_brokerage: Micros,
}

impl BulkReport {
    fn new(period: PeriodKey) -> Self {
        Self {
            period: period.to_string(),
            succeeded: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
            total_brokerage: Micros::ZERO,
        }
    }

    fn record_written(&mut self, written: Vec<Written>) {
        for (client_id, amount) in written {
            match amount {
                Some(amount) => {
                    self.succeeded.push(client_id);
                    self.total_brokerage += amount;
                }
                None => self.skipped.push(client_id),
            }
        }
    }

    fn finish(mut self) -> Self {
        self.succeeded.sort_unstable();
        self.skipped.sort_unstable();
        self.failed.sort_by_key(|f| f.client_id);
        self
    }
}

type Computed = (ClientId, Result<ComputedAccrual>);

/// Calculate every client in the book for `period`.
///
/// Refused with `PeriodLocked` when any calculation already covers a day of
/// the period (same bucket or an overlapping one); delete those first to
/// re-run.
pub async fn calculate_bulk<S: LedgerStore>(
    engine: Arc<AccrualEngine<S>>,
    period: AccrualPeriod,
    opts: BulkOptions,
) -> Result<BulkReport> {
    let clients = {
        let mut tx = engine.store().begin().await?;
        if let Some(existing) = tx
            .any_overlapping_calculation(period.start(), period.end())
            .await?
        {
            return Err(BrokerageError::PeriodLocked {
                period: existing.period,
                trade_id: None,
                client_id: None,
            });
        }
        tx.client_ids().await?
    };

    let workers = opts.workers.max(1).min(clients.len().max(1));
    let batch_size = opts.write_batch_size.max(1);
    info!(period = %period, clients = clients.len(), workers, batch_size, "bulk accrual started");

    let queue = Arc::new(Mutex::new(VecDeque::from(clients)));
    let (sender, mut receiver) = mpsc::channel::<Computed>(batch_size * 2);

    let mut set = JoinSet::new();
    for _ in 0..workers {
        let queue = Arc::clone(&queue);
        let sender = sender.clone();
        let engine = Arc::clone(&engine);
        set.spawn(async move {
            loop {
                let next = queue
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .pop_front();
                let Some(client_id) = next else { break };
                let result = engine.compute_for_client(client_id, &period).await;
                if sender.send((client_id, result)).await.is_err() {
                    break;
                }
            }
        });
    }
    drop(sender);

    let mut report = BulkReport::new(period.key());
    let mut pending: Vec<ComputedAccrual> = Vec::with_capacity(batch_size);
    while let Some((client_id, result)) = receiver.recv().await {
        match result {
            Err(e) => {
                warn!(client_id, error = %e, "accrual failed for client");
                report.failed.push(ClientFailure::new(client_id, &e));
            }
            Ok(c) if c.is_empty() => report.skipped.push(client_id),
            Ok(c) => {
                pending.push(c);
                if pending.len() >= batch_size {
                    write_batch(engine.as_ref(), std::mem::take(&mut pending), &mut report).await;
                }
            }
        }
    }
    if !pending.is_empty() {
        write_batch(engine.as_ref(), pending, &mut report).await;
    }

    while let Some(joined) = set.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "accrual worker aborted");
        }
    }

    let report = report.finish();
    info!(
        period = %report.period,
        succeeded = report.succeeded.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        total = %report.total_brokerage,
        "bulk accrual finished"
    );
    Ok(report)
}

async fn write_batch<S: LedgerStore>(
    engine: &AccrualEngine<S>,
    batch: Vec<ComputedAccrual>,
    report: &mut BulkReport,
) {
    match try_write_all(engine, batch.clone()).await {
        Ok(written) => report.record_written(written),
        Err(e) => {
            warn!(clients = batch.len(), error = %e, "batch write failed; retrying per client");
            for c in batch {
                let client_id = c.client_id();
                match try_write_all(engine, vec![c]).await {
                    Ok(written) => report.record_written(written),
                    Err(e) => {
                        warn!(client_id, error = %e, "accrual write failed for client");
                        report.failed.push(ClientFailure::new(client_id, &e));
                    }
                }
            }
        }
    }
}

/// `None` amount: the client had nothing left to accrue at write time.
type Written = (ClientId, Option<Micros>);

async fn try_write_all<S: LedgerStore>(
    engine: &AccrualEngine<S>,
    batch: Vec<ComputedAccrual>,
) -> Result<Vec<Written>> {
    let mut tx = engine.store().begin().await?;
    let mut written = Vec::with_capacity(batch.len());
    for computed in batch {
        let client_id = computed.client_id();
        let amount = engine
            .persist_recomputed(&mut tx, computed)
            .await?
            .map(|record| record.calculation.brokerage_amount);
        written.push((client_id, amount));
    }
    tx.commit().await?;
    Ok(written)
}

/// Single client when `client` is set, otherwise the whole book.
pub async fn run_accrual<S: LedgerStore>(
    engine: Arc<AccrualEngine<S>>,
    period: AccrualPeriod,
    client: Option<ClientId>,
    opts: BulkOptions,
) -> Result<BulkReport> {
    let Some(client_id) = client else {
        return calculate_bulk(engine, period, opts).await;
    };

    let mut report = BulkReport::new(period.key());
    match engine.calculate_for_client(client_id, &period).await? {
        Some(record) => {
            report.succeeded.push(client_id);
            report.total_brokerage = record.calculation.brokerage_amount;
        }
        None => report.skipped.push(client_id),
    }
    Ok(report)
}
