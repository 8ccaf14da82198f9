//! Interrupt handling for generation runs
//!
//! Scripts run in their own process groups, so a terminal Ctrl-C only reaches
//! fixturegen itself. The first SIGINT or SIGTERM cancels the run: running
//! scripts are terminated and their partial output is discarded. A second
//! signal exits immediately.

use anyhow::Result;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use fixturegen::graph::CancelToken;

#[derive(Debug, Clone)]
pub struct Interrupts {
    cancel: CancelToken,
    /// First signal received, 0 if none
    signal: Arc<AtomicI32>,
}

impl Interrupts {
    /// Set up interrupt handlers that cancel the current run
    #[cfg(unix)]
    pub fn install() -> Result<Self> {
        use anyhow::Context;
        use signal_hook::consts::{SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;
        use std::thread;

        let interrupts = Self::inert();
        let mut signals =
            Signals::new([SIGINT, SIGTERM]).context("Failed to install signal handlers")?;

        let handler = interrupts.clone();
        thread::spawn(move || {
            for sig in signals.forever() {
                if handler.signal.swap(sig, Ordering::SeqCst) != 0 {
                    std::process::exit(128 + sig);
                }
                tracing::warn!(signal = sig, "interrupted, stopping running scripts");
                handler.cancel.cancel();
            }
        });

        Ok(interrupts)
    }

    #[cfg(not(unix))]
    pub fn install() -> Result<Self> {
        Ok(Self::inert())
    }

    fn inert() -> Self {
        Self {
            cancel: CancelToken::new(),
            signal: Arc::new(AtomicI32::new(0)),
        }
    }

    pub fn token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Conventional exit code (128 + signal) if the run was interrupted
    pub fn exit_code(&self) -> Option<i32> {
        match self.signal.load(Ordering::SeqCst) {
            0 => None,
            sig => Some(128 + sig),
        }
    }
}
