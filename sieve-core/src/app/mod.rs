//! Application layer: the filtering proxy data plane.

pub mod proxy;
