//! The protocol engine.
//!
//! A single background worker owns the line assembler, response parser,
//! command channel and state machine; callers talk to it through the shared
//! state block. The engine guarantees that at most one AT command is
//! outstanding at any instant.

pub(crate) mod channel;
pub(crate) mod machine;
pub(crate) mod shared;
pub(crate) mod worker;

pub(crate) use machine::Engine;
pub(crate) use shared::{Shared, SharedHandle, lock};

#[cfg(test)]
pub(crate) mod test_support {
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    use bytes::Bytes;

    use crate::error::Result;
    use crate::power::PowerControl;
    use crate::transport::Transport;

    /// Installs a fmt subscriber once so `RUST_LOG` controls test output.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    /// Transport that records every write.
    #[derive(Default)]
    pub struct MockTransport {
        pub writes: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl MockTransport {
        pub fn new() -> (Self, Arc<Mutex<Vec<Vec<u8>>>>) {
            let transport = Self::default();
            let writes = Arc::clone(&transport.writes);
            (transport, writes)
        }
    }

    impl Transport for MockTransport {
        fn connect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            Box::pin(async { Ok(()) })
        }

        fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            Box::pin(async { Ok(()) })
        }

        fn send(&mut self, data: Bytes) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            self.writes
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(data.to_vec());
            Box::pin(async { Ok(()) })
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    /// Power control that counts its cycles.
    #[derive(Default)]
    pub struct CountingPower {
        pub cycles: Arc<AtomicU32>,
    }

    impl CountingPower {
        pub fn new() -> (Self, Arc<AtomicU32>) {
            let power = Self::default();
            let cycles = Arc::clone(&power.cycles);
            (power, cycles)
        }
    }

    impl PowerControl for CountingPower {
        fn cycle(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
            self.cycles.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {})
        }
    }
}
