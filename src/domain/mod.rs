// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// Decision and ordering logic layered on top of the broker and the stock
// service. Transport concerns live in `clients` and `messaging`.
//
// ============================================================================

pub mod dispatch;
