//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request enters the admission stack:
//!     → timeouts.rs (deadline on the whole downstream chain)
//!     → shedding.rs (refuse work while overloaded, learn from outcomes)
//!     → recovery.rs (turn handler panics into 500)
//! ```
//!
//! # Design Decisions
//! - Every policy is an ordinary `Handler`, composed by position in the chain
//! - The timeout sits outermost so shed, panicking or slow work is all bounded
//! - Shedding sits outside recovery so a recovered panic counts as a failure

pub mod recovery;
pub mod shedding;
pub mod timeouts;

pub use recovery::{catch_panic, PanicReport, Recovery};
pub use shedding::{AdaptiveShedder, CpuUsage, FixedCpu, LoadShed, Promise, ShedError, Shedder, SystemCpu};
pub use timeouts::Timeout;
