// Copyright (c) 2020, KTH Royal Institute of Technology.
// SPDX-License-Identifier: AGPL-3.0-only

#[cfg(feature = "json")]
pub mod local_file;

#[cfg(feature = "json")]
pub use local_file::LocalFileEmitter;

use crate::{
    data::AggregateResult,
    error::{Error, TumblerResult},
    window::Window,
};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Hands aggregate results over to the transport
///
/// The engine calls [ResultEmitter::emit] while it holds the lock of the
/// result's `(grouping key, window)` pair, so counts of one pair arrive in
/// non-decreasing order. A failing emit halts the engine.
pub trait ResultEmitter: Send + Sync {
    fn emit(&self, result: AggregateResult) -> TumblerResult<()>;
}

impl<E: ResultEmitter + ?Sized> ResultEmitter for Arc<E> {
    #[inline]
    fn emit(&self, result: AggregateResult) -> TumblerResult<()> {
        (**self).emit(result)
    }
}

impl<E: ResultEmitter + ?Sized> ResultEmitter for Box<E> {
    #[inline]
    fn emit(&self, result: AggregateResult) -> TumblerResult<()> {
        (**self).emit(result)
    }
}

/// A DebugEmitter keeps every result in memory
///
/// Useful for tests and for verifying pipelines during development.
#[derive(Debug, Default)]
pub struct DebugEmitter {
    results: Mutex<Vec<AggregateResult>>,
}

impl DebugEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// All results in emission order
    pub fn results(&self) -> Vec<AggregateResult> {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Results that were emitted on eviction
    pub fn finals(&self) -> Vec<AggregateResult> {
        self.results()
            .into_iter()
            .filter(|r| r.is_final)
            .collect()
    }

    /// Most recent count emitted for the pair
    pub fn latest(&self, fail_cause: u32, window: Window) -> Option<u64> {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|r| r.fail_cause == fail_cause && r.window() == window)
            .map(|r| r.fail_count)
    }

    pub fn len(&self) -> usize {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl ResultEmitter for DebugEmitter {
    fn emit(&self, result: AggregateResult) -> TumblerResult<()> {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(result);
        Ok(())
    }
}

/// A [DebugEmitter] that refuses results while switched to failing
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct FallibleEmitter {
    pub(crate) inner: DebugEmitter,
    failing: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl FallibleEmitter {
    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
impl ResultEmitter for FallibleEmitter {
    fn emit(&self, result: AggregateResult) -> TumblerResult<()> {
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(Error::Transport {
                msg: format!("refused {:?}", result),
            });
        }
        self.inner.emit(result)
    }
}

/// Forwards results to a transport task over an unbounded tokio channel
#[derive(Debug, Clone)]
pub struct ChannelEmitter {
    sender: UnboundedSender<AggregateResult>,
}

impl ChannelEmitter {
    pub fn new(sender: UnboundedSender<AggregateResult>) -> Self {
        ChannelEmitter { sender }
    }

    /// Emitter together with the receiving end for the transport task
    pub fn channel() -> (Self, UnboundedReceiver<AggregateResult>) {
        let (sender, receiver) = unbounded_channel();
        (ChannelEmitter::new(sender), receiver)
    }
}

impl ResultEmitter for ChannelEmitter {
    fn emit(&self, result: AggregateResult) -> TumblerResult<()> {
        self.sender.send(result).map_err(|e| Error::Transport {
            msg: format!("receiver dropped, lost {:?}", e.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: Window = Window { start: 0, end: 60_000 };

    #[test]
    fn debug_emitter_keeps_results_in_order() {
        let emitter = DebugEmitter::new();
        emitter.emit(AggregateResult::new(1, 1, W, false)).unwrap();
        emitter.emit(AggregateResult::new(1, 2, W, false)).unwrap();
        emitter.emit(AggregateResult::new(1, 2, W, true)).unwrap();

        assert_eq!(emitter.len(), 3);
        assert_eq!(emitter.latest(1, W), Some(2));
        assert_eq!(emitter.latest(2, W), None);
        assert_eq!(emitter.finals(), vec![AggregateResult::new(1, 2, W, true)]);

        emitter.clear();
        assert!(emitter.is_empty());
    }

    #[test]
    fn channel_emitter_forwards_results() {
        let (emitter, mut receiver) = ChannelEmitter::channel();
        let shared: Arc<dyn ResultEmitter> = Arc::new(emitter);
        shared.emit(AggregateResult::new(4, 9, W, false)).unwrap();

        assert_eq!(receiver.try_recv().unwrap(), AggregateResult::new(4, 9, W, false));
    }

    #[test]
    fn closed_channel_is_a_transport_error() {
        let (emitter, receiver) = ChannelEmitter::channel();
        drop(receiver);
        let res = emitter.emit(AggregateResult::new(0, 1, W, false));
        assert!(matches!(res, Err(Error::Transport { .. })));
    }
}
