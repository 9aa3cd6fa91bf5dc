//! The background worker driving the engine.
//!
//! One task owns the [`Engine`] and runs it on a fixed tick: drain whatever
//! the read loop forwarded, then take one state-machine step. Received bytes
//! are therefore always applied before the next command decision.

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use crate::engine::Engine;
use crate::error::Error;
use crate::transport::Transport;

/// Runs the engine until shutdown is signalled or a fatal fault occurs.
pub(crate) async fn run<T: Transport>(
    mut engine: Engine<T>,
    mut chunks: mpsc::Receiver<Bytes>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = tokio::time::interval(engine.tick_interval());
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::debug!("worker shutting down");
                    return;
                }
            }
            _ = tick.tick() => {
                while let Ok(bytes) = chunks.try_recv() {
                    engine.feed(&bytes);
                }
                match engine.step().await {
                    Ok(()) => {}
                    Err(Error::Fault(fault)) => {
                        tracing::error!("engine stopped: {fault}");
                        engine.record_fault(fault);
                        return;
                    }
                    Err(error) => {
                        tracing::error!("engine stopped: {error}");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::shared::{Shared, SharedHandle, lock};
    use crate::engine::test_support::{CountingPower, MockTransport};
    use std::sync::Arc;
    use std::time::Duration;

    fn setup() -> (
        Engine<MockTransport>,
        Arc<std::sync::Mutex<Vec<Vec<u8>>>>,
        SharedHandle,
    ) {
        crate::engine::test_support::init_tracing();
        let (transport, writes) = MockTransport::new();
        let (power, _cycles) = CountingPower::new();
        let shared: SharedHandle = Arc::new(std::sync::Mutex::new(Shared::new()));
        let engine = Engine::new(
            Arc::new(tokio::sync::Mutex::new(transport)),
            Box::new(power),
            Arc::clone(&shared),
            EngineConfig::default(),
        );
        (engine, writes, shared)
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_ticks_and_stops_on_shutdown() {
        let (engine, writes, _shared) = setup();
        let (_chunk_tx, chunk_rx) = mpsc::channel(32);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = tokio::spawn(run(engine, chunk_rx, shutdown_rx));
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(writes.lock().unwrap().first().unwrap(), b"AT+CMGF=1\n");

        shutdown_tx.send(true).unwrap();
        worker.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_applies_input_before_stepping() {
        let (engine, writes, _shared) = setup();
        let (chunk_tx, chunk_rx) = mpsc::channel(32);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = tokio::spawn(run(engine, chunk_rx, shutdown_rx));
        tokio::time::sleep(Duration::from_millis(150)).await;
        chunk_tx.send(Bytes::from_static(b"OK\r\n")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        // The ack released the channel, so the next tick sent the follow-up.
        let recorded: Vec<Vec<u8>> = writes.lock().unwrap().clone();
        assert!(recorded.contains(&b"AT+CPMS=\"SM\"\n".to_vec()));

        shutdown_tx.send(true).unwrap();
        worker.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_records_fault_and_exits() {
        let (mut engine, _writes, shared) = setup();
        engine.step().await.unwrap(); // AT+CMGF=1
        engine.feed(b"OK\r\n");
        engine.step().await.unwrap(); // AT+CPMS="SM"
        engine.feed(b"+CPMS: 0,30,0,30,0,30\r\nOK\r\n");
        engine.step().await.unwrap();
        engine.step().await.unwrap(); // dispatch GNSS power-on
        engine.step().await.unwrap(); // AT+CGNSPWR=1, never answered

        let (_chunk_tx, chunk_rx) = mpsc::channel(32);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(run(engine, chunk_rx, shutdown_rx));
        tokio::time::sleep(Duration::from_secs(6)).await;

        worker.await.unwrap();
        assert!(lock(&shared).fault.is_some());
    }
}
