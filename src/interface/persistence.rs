use crate::trade::TradeData;

/// Fire-and-forget persistence of a committed trade snapshot. Failures are the
/// implementor's concern and never reach the protocol.
pub trait RequestPersistence: Send + Sync {
    fn request_persistence(&self, trade: &TradeData);
}
