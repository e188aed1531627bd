//! # API Route Modules
//!
//! - `sessions`: create, inspect, check in/out, end, edit notes.
//! - `owners`: history, open session, statistics, queue clearing.
//! - `operations`: idempotent application of client submissions.
//! - `queue`: the durable offline queue and its dead letters.
//! - `audit`: hash-chain reads, verification, halt acknowledgement.

pub mod audit;
pub mod operations;
pub mod owners;
pub mod queue;
pub mod sessions;
