// ============================================================================
// Downstream HTTP clients
// ============================================================================

mod stock;

pub use stock::{
    parse_availability, AvailabilityChecker, StockCheckError, StockServiceClient,
    MAX_ERROR_BODY_BYTES,
};
