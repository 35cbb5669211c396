//! Bridges the executor's internal event feed to a single consumable
//! sequence of typed packets.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use loupe_core::error::{LoupeError, Result};
use loupe_core::types::StreamPacket;

use crate::event::{parse_event, ExecEvent};

/// Ordered packet sequence produced by one pipeline run.
///
/// The consumer may pull packets asynchronously (`next_packet`) or, from a
/// thread outside the runtime, synchronously (`blocking_next`). Stopping
/// early must go through [`AnswerStream::cancel`], which cancels every
/// in-flight task belonging to the run and awaits the run task before
/// returning. Dropping the stream performs a best-effort cancel + abort.
pub struct AnswerStream<O> {
    rx: mpsc::Receiver<ExecEvent>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<Result<O>>>,
}

impl<O: Send + 'static> AnswerStream<O> {
    pub fn new(
        rx: mpsc::Receiver<ExecEvent>,
        cancel: CancellationToken,
        handle: JoinHandle<Result<O>>,
    ) -> Self {
        Self {
            rx,
            cancel,
            handle: Some(handle),
        }
    }

    /// Await the next externally visible packet. Returns `None` once the
    /// run has finished and the channel is drained.
    pub async fn next_packet(&mut self) -> Option<StreamPacket> {
        while let Some(event) = self.rx.recv().await {
            if let Some(packet) = parse_event(event) {
                return Some(packet);
            }
        }
        None
    }

    /// Blocking variant of [`AnswerStream::next_packet`] for consumers
    /// running under a different concurrency model. Must not be called
    /// from within the async runtime.
    pub fn blocking_next(&mut self) -> Option<StreamPacket> {
        while let Some(event) = self.rx.blocking_recv() {
            if let Some(packet) = parse_event(event) {
                return Some(packet);
            }
        }
        None
    }

    /// Iterator over packets for a blocking consumer thread.
    pub fn blocking_packets(&mut self) -> BlockingPackets<'_, O> {
        BlockingPackets { stream: self }
    }

    /// Drain any remaining events and await the run's final output.
    pub async fn finish(mut self) -> Result<O> {
        while self.rx.recv().await.is_some() {}
        self.join().await
    }

    /// Cancel the run: every in-flight branch and external call is
    /// cancelled, and the run task is awaited before control returns.
    /// Packets already emitted remain valid.
    pub async fn cancel(mut self) -> Result<O> {
        self.cancel.cancel();
        // Closing the channel unblocks a producer awaiting capacity.
        self.rx.close();
        while self.rx.recv().await.is_some() {}
        self.join().await
    }

    async fn join(&mut self) -> Result<O> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| LoupeError::Graph("stream already finished".into()))?;
        match handle.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(LoupeError::Cancelled),
            Err(e) => Err(LoupeError::Graph(format!("run task failed: {e}"))),
        }
    }
}

impl<O> Drop for AnswerStream<O> {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Blocking iterator adapter over an [`AnswerStream`].
pub struct BlockingPackets<'a, O> {
    stream: &'a mut AnswerStream<O>,
}

impl<O: Send + 'static> Iterator for BlockingPackets<'_, O> {
    type Item = StreamPacket;

    fn next(&mut self) -> Option<StreamPacket> {
        self.stream.blocking_next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventEmitter;
    use loupe_core::types::QuestionId;

    fn sub_question(num: usize) -> StreamPacket {
        StreamPacket::SubQuestion {
            id: QuestionId::new(0, num),
            text: format!("q{num}"),
        }
    }

    #[tokio::test]
    async fn test_packets_filtered_and_ordered() {
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let emitter = EventEmitter::new(tx, cancel.clone());

        let handle = tokio::spawn(async move {
            emitter.node_started("decompose").await;
            emitter.dispatch("sub_questions", sub_question(1)).await;
            emitter.dispatch("not_allow_listed", sub_question(9)).await;
            emitter.dispatch("sub_questions", sub_question(2)).await;
            emitter.node_finished("decompose", 5).await;
            Ok::<_, LoupeError>(42u32)
        });

        let mut stream = AnswerStream::new(rx, cancel, handle);
        assert_eq!(stream.next_packet().await, Some(sub_question(1)));
        assert_eq!(stream.next_packet().await, Some(sub_question(2)));
        assert_eq!(stream.next_packet().await, None);
        assert_eq!(stream.finish().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_cancel_awaits_run_task() {
        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let emitter = EventEmitter::new(tx, cancel.clone());
        let task_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            emitter.dispatch("sub_questions", sub_question(1)).await;
            task_cancel.cancelled().await;
            Err::<u32, _>(LoupeError::Cancelled)
        });

        let mut stream = AnswerStream::new(rx, cancel, handle);
        assert_eq!(stream.next_packet().await, Some(sub_question(1)));

        // Consumer stops reading mid-run.
        let result = stream.cancel().await;
        assert!(matches!(result, Err(LoupeError::Cancelled)));
    }

    #[test]
    fn test_blocking_consumer() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let stream = runtime.block_on(async {
            let (tx, rx) = mpsc::channel(16);
            let cancel = CancellationToken::new();
            let emitter = EventEmitter::new(tx, cancel.clone());
            let handle = tokio::spawn(async move {
                for num in 1..=3 {
                    emitter.dispatch("sub_questions", sub_question(num)).await;
                }
                Ok::<_, LoupeError>(())
            });
            AnswerStream::new(rx, cancel, handle)
        });

        let collected: Vec<StreamPacket> = std::thread::scope(|scope| {
            scope
                .spawn(|| {
                    let mut stream = stream;
                    let packets: Vec<_> = stream.blocking_packets().collect();
                    packets
                })
                .join()
                .unwrap()
        });
        assert_eq!(collected.len(), 3);
    }
}
