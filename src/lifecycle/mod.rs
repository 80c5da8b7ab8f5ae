//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Parse CLI → Load config → Init logging/metrics → Bind listener → Reactor::run
//!
//! Shutdown (shutdown.rs):
//!     Shutdown::trigger → waker fires → reactor drops connections → run returns
//! ```
//!
//! # Design Decisions
//! - No signal handlers are installed; SIGINT/SIGTERM terminate the process
//! - Shutdown is immediate: in-flight relays are closed, not drained

pub mod shutdown;

pub use shutdown::Shutdown;
