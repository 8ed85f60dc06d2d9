//! Modules linked into the server binary. Each one submits itself through
//! `inventory`, so linking the module is enough to make it discoverable.

pub mod audit;
pub mod storage;
pub mod tasks;
