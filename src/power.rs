//! Power-control collaborator.
//!
//! When the modem stops answering, the engine asks this collaborator to
//! cycle the hat's power key (on SIM868 hats: drive the key pin low for 4 s,
//! release it, then give the module ~10 s to boot). The GPIO itself is
//! hardware-specific and stays outside this crate; callers supply an
//! implementation for their board.

use std::future::Future;
use std::pin::Pin;

/// Trait for hardware power-key control.
pub trait PowerControl: Send {
    /// Performs one full power-key cycle and waits for the module to boot.
    fn cycle(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Power control that does nothing.
///
/// Used when no GPIO access is available; an unresponsive modem then stays
/// unresponsive and the restart procedure only resets the engine state.
#[derive(Debug, Default)]
pub struct NoPowerControl;

impl PowerControl for NoPowerControl {
    fn cycle(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async {
            tracing::warn!("no power control configured, skipping power cycle");
        })
    }
}
