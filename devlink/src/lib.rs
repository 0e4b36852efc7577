//! # devlink
//!
//! Framed serial protocol for managing files on embedded devices.
//!
//! This crate turns a raw, possibly interleaved serial byte stream into
//! integrity-checked frames, and those frames into typed operations:
//!
//! - CRC-32 checked, byte-stuffed frames ([`protocol::frame`])
//! - Incremental frame reassembly ([`protocol::receiver`])
//! - Request/response correlation with timeouts and supersession
//!   ([`protocol::correlator`])
//! - Per-operation encoding and decoding ([`protocol::message`])
//! - Connection lifecycle and chunked file writes ([`session`])
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via the `serialport` crate
//!
//! ## Example
//!
//! ```rust,no_run
//! # #[cfg(feature = "native")]
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     use devlink::{NativePortOpener, Session};
//!
//!     let mut session = Session::new(NativePortOpener::new());
//!     session.connect_to("/dev/ttyACM0", Some(115200))?;
//!
//!     println!("Firmware {}", session.get_version()?.version);
//!     for entry in session.list_folder("/")? {
//!         println!("{:>10}  {}", entry.size, entry.name);
//!     }
//!
//!     session.write_file("/hello.txt", b"hello", |pct| println!("{pct}%"))?;
//!     session.disconnect();
//!     Ok(())
//! }
//! # #[cfg(not(feature = "native"))]
//! # fn main() {}
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod error;
pub mod port;
pub mod protocol;
pub mod session;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by session wait loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications). Only the first
/// registration takes effect.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

#[cfg(test)]
thread_local! {
    static TEST_INTERRUPTED: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

/// Toggle interruption for the calling test thread only.
#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    static INSTALL: std::sync::Once = std::sync::Once::new();

    INSTALL.call_once(|| set_interrupt_checker(|| TEST_INTERRUPTED.with(std::cell::Cell::get)));
    TEST_INTERRUPTED.with(|flag| flag.set(value));
}

/// Route `log` output through the test harness; set `RUST_LOG` to see it.
#[cfg(test)]
pub(crate) fn init_test_logging() {
    let _ = env_logger::builder()
        .is_test(true)
        .try_init();
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator, NativePortOpener};
pub use {
    error::{Error, FramingError, Result},
    port::{PortEnumerator, PortInfo, PortOpener, SerialConfig, Transport},
    protocol::{
        Correlator, Envelope, FileEntry, Frame, Operation, Receiver, Request, Response, Ticket,
        VersionInfo,
    },
    session::{DisconnectReason, Session, SessionConfig, SessionState},
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_checker_default_false() {
        test_set_interrupted(false);
        assert!(!is_interrupted_requested());
    }

    #[test]
    fn test_interrupt_checker_toggle_true_false() {
        test_set_interrupted(true);
        assert!(is_interrupted_requested());

        test_set_interrupted(false);
        assert!(!is_interrupted_requested());
    }

    #[test]
    fn test_interrupt_flag_is_per_thread() {
        test_set_interrupted(true);
        let other = std::thread::spawn(|| {
            test_set_interrupted(false);
            is_interrupted_requested()
        })
        .join()
        .unwrap();
        assert!(!other);
        assert!(is_interrupted_requested());
        test_set_interrupted(false);
    }
}
