//! The public device handle.
//!
//! [`GsmHat`] opens the serial link, spawns the read loop and the protocol
//! worker, and exposes thread-safe accessors over the shared state block.
//! All accessors are synchronous and non-blocking beyond a short mutex hold;
//! the worker performs the actual modem traffic in the background.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::engine::{self, Engine, Shared, SharedHandle, lock};
use crate::error::{Error, Fault, Result};
use crate::power::{NoPowerControl, PowerControl};
use crate::transport::{SerialConfig, SerialTransport, Transport};
use crate::types::{CallRequest, GprsConfig, GpsFix, Sms};

/// Handle to a GSM/GNSS hat attached over a serial port.
///
/// Dropping the handle aborts the background tasks without waiting; call
/// [`close`](Self::close) for an orderly shutdown.
///
/// # Example
///
/// ```no_run
/// use gsm_hat::GsmHat;
///
/// # async fn example() -> gsm_hat::Result<()> {
/// let hat = GsmHat::open("/dev/ttyS0", 115_200).await?;
/// hat.sms_write("+491234567", "hello from rust");
/// # Ok(())
/// # }
/// ```
pub struct GsmHat {
    shared: SharedHandle,
    transport: Arc<tokio::sync::Mutex<SerialTransport>>,
    shutdown: watch::Sender<bool>,
    worker: Option<JoinHandle<()>>,
    read_task: Option<JoinHandle<()>>,
    config: EngineConfig,
}

impl GsmHat {
    /// Opens the hat on the given port with default configuration and no
    /// power-key control.
    ///
    /// # Errors
    ///
    /// Returns an error if the serial port cannot be opened.
    pub async fn open(port: impl Into<String>, baud_rate: u32) -> Result<Self> {
        Self::open_with_config(
            SerialConfig::new(port).baud_rate(baud_rate),
            EngineConfig::default(),
            Box::new(NoPowerControl),
        )
        .await
    }

    /// Opens the hat with explicit serial and engine configuration and a
    /// power-key implementation for the board.
    ///
    /// # Errors
    ///
    /// Returns an error if the serial port cannot be opened.
    pub async fn open_with_config(
        serial: SerialConfig,
        config: EngineConfig,
        power: Box<dyn PowerControl>,
    ) -> Result<Self> {
        let mut transport = SerialTransport::new(serial);
        transport.connect().await?;
        let reader = transport.take_reader().ok_or(Error::NotConnected)?;

        let (chunk_tx, chunk_rx) = mpsc::channel(64);
        let read_task = tokio::spawn(async move {
            if let Err(error) = SerialTransport::run_read_loop_with_reader(reader, chunk_tx).await {
                tracing::error!("read loop stopped: {error}");
            }
        });

        let shared: SharedHandle = Arc::new(std::sync::Mutex::new(Shared::new()));
        let transport = Arc::new(tokio::sync::Mutex::new(transport));
        let engine = Engine::new(
            Arc::clone(&transport),
            power,
            Arc::clone(&shared),
            config.clone(),
        );

        let (shutdown, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(engine::worker::run(engine, chunk_rx, shutdown_rx));

        Ok(Self {
            shared,
            transport,
            shutdown,
            worker: Some(worker),
            read_task: Some(read_task),
            config,
        })
    }

    /// Shuts down the worker, stops the read loop and closes the port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShutdownTimeout`] if the worker does not stop within
    /// the configured deadline; the tasks are aborted in that case.
    pub async fn close(mut self) -> Result<()> {
        let _ = self.shutdown.send(true);

        if let Some(mut worker) = self.worker.take() {
            match tokio::time::timeout(self.config.shutdown_timeout, &mut worker).await {
                Ok(Err(error)) => tracing::error!("worker task failed: {error}"),
                Ok(Ok(())) => {}
                Err(_) => {
                    worker.abort();
                    if let Some(read_task) = self.read_task.take() {
                        read_task.abort();
                    }
                    return Err(Error::ShutdownTimeout {
                        timeout_ms: self
                            .config
                            .shutdown_timeout
                            .as_millis()
                            .try_into()
                            .unwrap_or(u64::MAX),
                    });
                }
            }
        }
        if let Some(read_task) = self.read_task.take() {
            read_task.abort();
        }
        self.transport.lock().await.disconnect().await?;
        Ok(())
    }

    /// Number of received messages waiting to be read.
    #[must_use]
    pub fn sms_available(&self) -> usize {
        lock(&self.shared).inbox.len()
    }

    /// Takes the oldest received message, if any.
    #[must_use]
    pub fn sms_read(&self) -> Option<Sms> {
        lock(&self.shared).inbox.pop_front()
    }

    /// Queues a message for sending.
    pub fn sms_write(&self, receiver: impl Into<String>, message: impl Into<String>) {
        lock(&self.shared)
            .outbox
            .push_back(Sms::outgoing(receiver, message));
    }

    /// Requests a voice call that the engine hangs up after `timeout`.
    ///
    /// Returns false without touching the pending call if one is already in
    /// progress.
    pub fn call(&self, number: impl Into<String>, timeout: Duration) -> bool {
        lock(&self.shared).request_call(CallRequest {
            number: number.into(),
            timeout,
        })
    }

    /// Requests an immediate hang-up of the current call.
    pub fn hang_up(&self) {
        lock(&self.shared).hang_up = true;
    }

    /// The most recent GNSS fix accepted by the replacement policy.
    #[must_use]
    pub fn gps_fix(&self) -> GpsFix {
        lock(&self.shared).gps_fix.clone()
    }

    /// Requests a one-shot GNSS poll ahead of the periodic schedule.
    pub fn request_gps_poll(&self) {
        lock(&self.shared).gps_poll_requested = true;
    }

    /// Starts or stops raw NMEA streaming from the GNSS receiver to the
    /// serial link.
    ///
    /// Streaming is stopped during bootstrap so command replies stay
    /// parseable; while it is enabled the periodic single-shot polls still
    /// keep [`gps_fix`](Self::gps_fix) current.
    pub fn stream_gps_to_serial(&self, enabled: bool) {
        let mut shared = lock(&self.shared);
        if enabled {
            shared.gps_stream_start_requested = true;
        } else {
            shared.gps_stream_stop_requested = true;
        }
    }

    /// Sets the GPRS bearer credentials; the first set wins and repeated
    /// calls are ignored.
    pub fn set_gprs_connection(&self, config: GprsConfig) {
        lock(&self.shared).set_gprs(config);
    }

    /// Queues an HTTP GET request. Requests run one at a time, in order,
    /// once the bearer reports an IP address.
    pub fn call_url(&self, url: impl Into<String>) {
        lock(&self.shared).url_queue.push_back(url.into());
    }

    /// Number of queued HTTP requests not yet sent.
    #[must_use]
    pub fn pending_url_calls(&self) -> usize {
        lock(&self.shared).url_queue.len()
    }

    /// Number of completed HTTP response bodies waiting to be read.
    #[must_use]
    pub fn url_response_available(&self) -> usize {
        lock(&self.shared).url_responses.len()
    }

    /// Takes the oldest completed HTTP response body, if any.
    #[must_use]
    pub fn url_response_read(&self) -> Option<String> {
        lock(&self.shared).url_responses.pop_front()
    }

    /// The fatal fault that stopped the worker, if any.
    #[must_use]
    pub fn fault(&self) -> Option<Fault> {
        lock(&self.shared).fault.clone()
    }
}

impl Drop for GsmHat {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
        if let Some(read_task) = self.read_task.take() {
            read_task.abort();
        }
    }
}
