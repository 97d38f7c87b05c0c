// =============================================================================
// HTTP API — control-plane surface for symbol lifecycle and candle reads
// =============================================================================

pub mod rest;

pub use rest::{router, ApiState};
