// Copyright (c) 2020, KTH Royal Institute of Technology.
// SPDX-License-Identifier: AGPL-3.0-only

use crate::{
    conf::logger::TumblerLogger,
    data::{decode::RecordDecoder, RawRecord},
    emitter::ResultEmitter,
    engine::AggregationEngine,
    error::{Error, TumblerResult},
    reportable_error,
};
use slog::{debug, error, info, o, warn};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tumbler_state::Backend;

/// A Pipeline connects transport partitions to an [AggregationEngine]
///
/// Every partition gets its own tokio task that decodes and processes the
/// partition's records in delivery order. A ticker task sweeps expired
/// windows every `sweep_interval_ms`. Store access runs on tokio's blocking
/// pool. Pipelines must be created from within a tokio runtime.
///
/// ```no_run
/// use std::sync::Arc;
/// use tumbler::prelude::*;
///
/// # async fn run() -> TumblerResult<()> {
/// let conf = TumblerConf::from_file("tumbler.conf")?;
/// let logger = conf.logger()?;
/// let (emitter, _results) = ChannelEmitter::channel();
/// let engine = AggregationEngine::<DefaultBackend, _>::open(conf, emitter, logger.clone())?;
///
/// let mut pipeline = Pipeline::new(Arc::new(engine), DefaultDecoder::default(), logger);
/// let partition = pipeline.partition(0, 1024);
/// partition.send(RawRecord::new(r#"{"status":1,"failCause":3}"#, 1_553_120_535_123)).await.ok();
/// drop(partition);
/// pipeline.join().await
/// # }
/// ```
pub struct Pipeline<B, E, D>
where
    B: Backend,
    E: ResultEmitter + 'static,
    D: RecordDecoder,
{
    engine: Arc<AggregationEngine<B, E>>,
    decoder: Arc<D>,
    workers: Vec<JoinHandle<TumblerResult<()>>>,
    ticker: Option<JoinHandle<TumblerResult<()>>>,
    shutdown: watch::Sender<bool>,
    logger: TumblerLogger,
}

impl<B, E, D> Pipeline<B, E, D>
where
    B: Backend,
    E: ResultEmitter + 'static,
    D: RecordDecoder,
{
    pub fn new(engine: Arc<AggregationEngine<B, E>>, decoder: D, logger: TumblerLogger) -> Self {
        let logger = logger.new(o!("component" => "pipeline"));
        let (shutdown, _) = watch::channel(false);
        let mut pipeline = Pipeline {
            engine,
            decoder: Arc::new(decoder),
            workers: Vec::new(),
            ticker: None,
            shutdown,
            logger,
        };

        let interval = pipeline.engine.conf().sweep_interval_ms;
        if interval > 0 {
            pipeline.ticker = Some(tokio::spawn(sweep_ticker(
                pipeline.engine.clone(),
                Duration::from_millis(interval),
                pipeline.shutdown.subscribe(),
                pipeline.logger.clone(),
            )));
        }
        pipeline
    }

    #[inline]
    pub fn engine(&self) -> &Arc<AggregationEngine<B, E>> {
        &self.engine
    }

    /// Creates a bounded channel for `partition` and spawns its worker
    pub fn partition(&mut self, partition: u32, capacity: usize) -> mpsc::Sender<RawRecord> {
        let (sender, receiver) = mpsc::channel(capacity);
        self.add_partition(partition, receiver);
        sender
    }

    /// Spawns a worker consuming `receiver`
    ///
    /// Records positioned in another partition halt the worker.
    pub fn add_partition(&mut self, partition: u32, receiver: mpsc::Receiver<RawRecord>) {
        info!(self.logger, "Adding partition worker"; "partition" => partition);
        self.workers.push(tokio::spawn(partition_worker(
            partition,
            self.engine.clone(),
            self.decoder.clone(),
            receiver,
            self.shutdown.subscribe(),
            self.logger.clone(),
        )));
    }

    /// Waits until every partition channel is closed and drained, then shuts down
    pub async fn join(mut self) -> TumblerResult<()> {
        let workers = std::mem::take(&mut self.workers);
        let res = await_all(workers).await;
        let _ = self.shutdown.send(true);
        self.finish(res).await
    }

    /// Stops accepting records, drains what the partitions already buffered,
    /// then flushes and snapshots the store
    ///
    /// After a failed worker no snapshot is taken and the previous one stays
    /// the restore point.
    pub async fn shutdown(self) -> TumblerResult<()> {
        info!(self.logger, "Shutting down pipeline");
        let _ = self.shutdown.send(true);
        self.finish(Ok(())).await
    }

    async fn finish(mut self, mut res: TumblerResult<()>) -> TumblerResult<()> {
        let mut handles = std::mem::take(&mut self.workers);
        handles.extend(self.ticker.take());
        let joined = await_all(handles).await;
        if res.is_ok() {
            res = joined;
        }

        if let Err(err) = &res {
            error!(self.logger, "Pipeline stopped on error"; "error" => %err, "exit_code" => err.exit_code());
            warn!(self.logger, "Skipping shutdown snapshot";
                "checkpoint_dir" => %self.engine.conf().checkpoint_dir.display());
            return res;
        }

        let engine = self.engine.clone();
        blocking(move || engine.shutdown()).await
    }
}

/// Runs `op` on the blocking pool
async fn blocking<T, F>(op: F) -> TumblerResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> TumblerResult<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(op).await {
        Ok(res) => res,
        Err(join_err) => reportable_error!("blocking task failed: {}", join_err),
    }
}

/// Awaits every handle, returning the first error
async fn await_all(handles: Vec<JoinHandle<TumblerResult<()>>>) -> TumblerResult<()> {
    let mut res = Ok(());
    for handle in handles {
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(join_err) => reportable_error!("pipeline task failed: {}", join_err),
        };
        if res.is_ok() {
            res = outcome;
        }
    }
    res
}

async fn partition_worker<B, E, D>(
    partition: u32,
    engine: Arc<AggregationEngine<B, E>>,
    decoder: Arc<D>,
    mut receiver: mpsc::Receiver<RawRecord>,
    mut shutdown: watch::Receiver<bool>,
    logger: TumblerLogger,
) -> TumblerResult<()>
where
    B: Backend,
    E: ResultEmitter + 'static,
    D: RecordDecoder,
{
    let logger = logger.new(o!("partition" => partition));
    let handle = |raw: RawRecord| {
        let engine = engine.clone();
        let decoder = decoder.clone();
        async move {
            if let Some(pos) = raw.position {
                if pos.partition != partition {
                    return Err(Error::Unsupported {
                        msg: format!(
                            "record at offset {} of partition {} delivered to partition {}",
                            pos.offset, pos.partition, partition
                        ),
                    });
                }
            }
            blocking(move || {
                // Skipped records are logged and counted by the engine
                let _ = engine.process_raw(&*decoder, &raw)?;
                Ok(())
            })
            .await
        }
    };

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                receiver.close();
                while let Some(raw) = receiver.recv().await {
                    handle(raw).await?;
                }
                break;
            }
            next = receiver.recv() => match next {
                Some(raw) => handle(raw).await?,
                None => break,
            },
        }
    }

    debug!(logger, "Partition worker finished");
    Ok(())
}

async fn sweep_ticker<B, E>(
    engine: Arc<AggregationEngine<B, E>>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    logger: TumblerLogger,
) -> TumblerResult<()>
where
    B: Backend,
    E: ResultEmitter + 'static,
{
    let mut interval = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = interval.tick() => {
                let engine = engine.clone();
                blocking(move || engine.sweep().map(drop)).await?;
            }
        }
    }
    debug!(logger, "Sweep ticker finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        conf::TumblerConf,
        data::{decode::ProstDecoder, SourcePosition, Status, TransactionStatus},
        emitter::{DebugEmitter, FallibleEmitter},
        util::test_logger,
        window::Window,
    };
    use prost::Message;
    use tempfile::TempDir;
    use tumbler_state::InMemory;

    type TestEngine = AggregationEngine<InMemory, DebugEmitter>;

    fn engine(dir: &TempDir, sweep_every: u64, sweep_interval_ms: u64) -> Arc<TestEngine> {
        let conf = TumblerConf {
            window_size_ms: 1_000,
            grace_period_ms: 0,
            sweep_every,
            sweep_interval_ms,
            store_backend_path: dir.path().join("live"),
            checkpoint_dir: dir.path().join("checkpoint"),
            ..Default::default()
        };
        Arc::new(AggregationEngine::open(conf, DebugEmitter::new(), test_logger()).unwrap())
    }

    fn raw(fail_cause: i32, timestamp: i64, partition: u32, offset: u64) -> RawRecord {
        let payload = TransactionStatus::new(Status::Denied, fail_cause).encode_to_vec();
        RawRecord::new(payload, timestamp).with_position(SourcePosition::new(partition, offset))
    }

    const W: Window = Window { start: 0, end: 1_000 };

    #[tokio::test]
    async fn partitions_feed_one_engine() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir, 0, 0);
        let mut pipeline = Pipeline::new(engine.clone(), ProstDecoder, test_logger());

        let senders: Vec<_> = (0..3).map(|p| pipeline.partition(p, 16)).collect();
        for (p, sender) in senders.iter().enumerate() {
            for offset in 0..50u64 {
                sender.send(raw(1, offset as i64, p as u32, offset)).await.unwrap();
            }
            // garbage is skipped
            sender.send(RawRecord::new(vec![0xff; 3], 5)).await.unwrap();
        }
        drop(senders);
        pipeline.join().await.unwrap();

        assert_eq!(engine.store().get(1, W).unwrap().unwrap().count, 150);
        assert_eq!(engine.counters().decode_errors, 3);
        assert_eq!(engine.emitter().latest(1, W), Some(150));

        // join snapshots the store
        let restore_conf = TumblerConf {
            store_backend_path: dir.path().join("restored"),
            ..engine.conf().clone()
        };
        let restored =
            TestEngine::restore(restore_conf, DebugEmitter::new(), test_logger()).unwrap();
        assert_eq!(restored.store().get(1, W).unwrap().unwrap().count, 150);
        assert_eq!(restored.store().committed_offset(2).unwrap(), Some(49));
    }

    #[tokio::test]
    async fn shutdown_drains_buffered_records() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir, 1, 0);
        let mut pipeline = Pipeline::new(engine.clone(), ProstDecoder, test_logger());

        let sender = pipeline.partition(0, 128);
        for offset in 0..100u64 {
            sender.send(raw(2, 10, 0, offset)).await.unwrap();
        }
        pipeline.shutdown().await.unwrap();

        assert_eq!(engine.store().get(2, W).unwrap().unwrap().count, 100);
        assert!(sender.is_closed());
    }

    #[tokio::test]
    async fn ticker_sweeps_expired_windows() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir, 0, 5);
        let mut pipeline = Pipeline::new(engine.clone(), ProstDecoder, test_logger());

        let sender = pipeline.partition(0, 4);
        sender.send(raw(0, 10, 0, 0)).await.unwrap();
        sender.send(raw(0, 2_500, 0, 1)).await.unwrap();

        let mut finals = Vec::new();
        for _ in 0..400 {
            finals = engine.emitter().finals();
            if !finals.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(finals, vec![crate::data::AggregateResult::new(0, 1, W, true)]);

        drop(sender);
        pipeline.join().await.unwrap();
    }

    fn conf_in(dir: &TempDir, live: &str) -> TumblerConf {
        TumblerConf {
            window_size_ms: 1_000,
            grace_period_ms: 0,
            sweep_interval_ms: 0,
            store_backend_path: dir.path().join(live),
            checkpoint_dir: dir.path().join("checkpoint"),
            ..Default::default()
        }
    }

    async fn feed<E: ResultEmitter + 'static>(
        engine: Arc<AggregationEngine<InMemory, E>>,
        offsets: std::ops::Range<u64>,
    ) -> TumblerResult<()> {
        let mut pipeline = Pipeline::new(engine, ProstDecoder, test_logger());
        let sender = pipeline.partition(0, 16);
        for offset in offsets {
            // the worker may already be gone
            let _ = sender.send(raw(1, 10, 0, offset)).await;
        }
        drop(sender);
        pipeline.join().await
    }

    #[tokio::test]
    async fn failed_emit_keeps_the_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let first = Arc::new(
            AggregationEngine::<InMemory, _>::open(
                conf_in(&dir, "first"),
                FallibleEmitter::default(),
                test_logger(),
            )
            .unwrap(),
        );
        feed(first, 0..3).await.unwrap();

        // everything is redelivered, the first new record fails to publish
        let failing = Arc::new(
            AggregationEngine::<InMemory, _>::restore(
                conf_in(&dir, "second"),
                FallibleEmitter::default(),
                test_logger(),
            )
            .unwrap(),
        );
        failing.emitter().set_failing(true);
        let res = feed(failing.clone(), 0..6).await;
        assert!(matches!(res, Err(Error::Transport { .. })));
        assert_eq!(failing.store().get(1, W).unwrap().unwrap().count, 3);
        assert_eq!(failing.store().committed_offset(0).unwrap(), Some(2));

        let recovered = Arc::new(
            AggregationEngine::<InMemory, _>::restore(
                conf_in(&dir, "third"),
                FallibleEmitter::default(),
                test_logger(),
            )
            .unwrap(),
        );
        feed(recovered.clone(), 0..6).await.unwrap();
        assert_eq!(recovered.store().get(1, W).unwrap().unwrap().count, 6);
        assert_eq!(recovered.store().committed_offset(0).unwrap(), Some(5));
        assert_eq!(recovered.emitter().inner.latest(1, W), Some(6));
        assert_eq!(recovered.counters().duplicates, 3);
    }

    #[tokio::test]
    async fn misrouted_records_halt_the_worker() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir, 1, 0);
        let mut pipeline = Pipeline::new(engine.clone(), ProstDecoder, test_logger());

        let sender = pipeline.partition(0, 4);
        sender.send(raw(2, 10, 1, 0)).await.unwrap();
        drop(sender);

        let res = pipeline.join().await;
        assert!(matches!(res, Err(Error::Unsupported { .. })));
        assert!(engine.store().is_empty().unwrap());
        assert_eq!(engine.store().committed_offset(1).unwrap(), None);
    }
}
