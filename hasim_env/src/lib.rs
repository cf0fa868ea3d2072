//! HA Simulator Environment Abstraction Layer
//!
//! The failover script never touches `tokio::time` directly. Every wait and
//! every background task goes through [`HaContext`], which lets the same
//! engine run in **real time** (an observer watching the demo) or on a
//! **virtual clock** (scenario checks that fast-forward the 40 s script).
//!
//! # Example
//!
//! ```ignore
//! use hasim_env::{HaContext, TokioContext};
//!
//! async fn step<Ctx: HaContext>(ctx: &Ctx) {
//!     ctx.sleep(Duration::from_millis(5000)).await;
//!     apply_next_phase();
//! }
//! ```

mod context;
mod tokio_impl;

pub use context::HaContext;
pub use tokio_impl::TokioContext;
