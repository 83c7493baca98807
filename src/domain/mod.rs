//! Domain layer: settlement entities, the fund split, and the ports the engine
//! consumes. Nothing in here performs I/O.

pub mod dispute;
pub mod distribution;
pub mod event;
pub mod finance;
pub mod money;
pub mod payment;
pub mod ports;
pub mod transfer;
