use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::cleaner::BalancesCleaner;
use crate::config::Config;
use crate::counter::{CounterProcessor, ADDRESS_CRITERIA};
use crate::error::IndexerResult;
use crate::processor::block::{BlockProcessor, RevertDetected};
use crate::repositories::counters::CountedTable;
use crate::revert::BlocksRevertService;
use crate::status::BlockStatusService;
use crate::uow::UnitOfWork;

/// Runs the worker fleet and supervises reverts: when the block processor
/// detects a reorganization, every worker is stopped, the database is
/// rolled back to the last correct block, and the fleet is restarted.
pub struct App {
    config: Config,
    uow: UnitOfWork,
    block_processor: Arc<BlockProcessor>,
    block_status: Arc<BlockStatusService>,
    revert_service: BlocksRevertService,
    revert_rx: mpsc::Receiver<RevertDetected>,
}

impl App {
    pub fn new(
        config: Config,
        uow: UnitOfWork,
        block_processor: Arc<BlockProcessor>,
        block_status: Arc<BlockStatusService>,
        revert_service: BlocksRevertService,
        revert_rx: mpsc::Receiver<RevertDetected>,
    ) -> Self {
        Self {
            config,
            uow,
            block_processor,
            block_status,
            revert_service,
            revert_rx,
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> IndexerResult<()> {
        loop {
            let (stop_tx, stop_rx) = watch::channel(false);
            let mut workers = vec![spawn_blocks_worker(
                self.block_processor.clone(),
                self.config.wait_for_blocks_interval,
                stop_rx.clone(),
            )];
            if !self.config.disable_block_status_processing {
                workers.push(spawn_status_worker(
                    self.block_status.clone(),
                    self.config.block_status_polling_interval,
                    stop_rx.clone(),
                ));
            }
            if !self.config.disable_old_balances_cleaner {
                workers.push(spawn_cleaner_worker(
                    BalancesCleaner::new(self.uow.clone()),
                    self.config.delete_balances_interval,
                    stop_rx.clone(),
                ));
            }
            if !self.config.disable_counters_processing {
                for table in [CountedTable::Transactions, CountedTable::Transfers] {
                    workers.push(spawn_counter_worker(
                        CounterProcessor::new(
                            self.uow.clone(),
                            table,
                            ADDRESS_CRITERIA,
                            self.config.counters_records_batch_size,
                        ),
                        self.config.counters_processing_polling_interval,
                        stop_rx.clone(),
                    ));
                }
            }
            drop(stop_rx);

            let detected = tokio::select! {
                detected = self.revert_rx.recv() => detected,
                _ = shutdown.changed() => None,
            };

            if detected.is_some() {
                tracing::info!("stopping workers before blocks revert");
            }
            let _ = stop_tx.send(true);
            for worker in workers {
                if let Err(error) = worker.await {
                    tracing::error!(error = %error, "worker task panicked");
                }
            }

            let Some(detected) = detected else {
                tracing::info!("all workers stopped, shutting down");
                return Ok(());
            };

            self.revert_service
                .handle_revert(detected.detected_incorrect_block_number)
                .await?;

            // Detections queued while reverting refer to the old tip
            while self.revert_rx.try_recv().is_ok() {}
            tracing::info!("starting workers after blocks revert");
        }
    }
}

async fn idle(stop: &mut watch::Receiver<bool>, interval: Duration) {
    tokio::select! {
        _ = tokio::time::sleep(interval) => {}
        _ = stop.changed() => {}
    }
}

fn spawn_blocks_worker(
    processor: Arc<BlockProcessor>,
    wait_for_blocks_interval: Duration,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while !*stop.borrow() {
            match processor.process_next_blocks_range().await {
                Ok(true) => {}
                Ok(false) => idle(&mut stop, wait_for_blocks_interval).await,
                Err(error) => {
                    tracing::error!(error = %error, "blocks processing cycle failed");
                    idle(&mut stop, wait_for_blocks_interval).await;
                }
            }
        }
        tracing::debug!("blocks worker stopped");
    })
}

fn spawn_status_worker(
    status: Arc<BlockStatusService>,
    polling_interval: Duration,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while !*stop.borrow() {
            match status.update_next_batch().await {
                Ok(true) => {}
                Ok(false) => idle(&mut stop, polling_interval).await,
                Err(error) => {
                    tracing::error!(error = %error, "block status update failed");
                    idle(&mut stop, polling_interval).await;
                }
            }
        }
        tracing::debug!("block status worker stopped");
    })
}

fn spawn_counter_worker(
    mut processor: CounterProcessor,
    polling_interval: Duration,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while !*stop.borrow() {
            match processor.process_next_batch().await {
                Ok(true) => {}
                Ok(false) => idle(&mut stop, polling_interval).await,
                Err(error) => {
                    tracing::error!(error = %error, "counters update failed");
                    idle(&mut stop, polling_interval).await;
                }
            }
        }
        tracing::debug!("counters worker stopped");
    })
}

fn spawn_cleaner_worker(
    cleaner: BalancesCleaner,
    delete_balances_interval: Duration,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while !*stop.borrow() {
            if let Err(error) = cleaner.clean_next_range().await {
                tracing::error!(error = %error, "balances cleanup failed");
            }
            idle(&mut stop, delete_balances_interval).await;
        }
        tracing::debug!("balances cleaner stopped");
    })
}
