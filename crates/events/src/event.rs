//! Contract for the facts aggregates emit.

use chrono::{DateTime, Utc};

/// A fact decided by an aggregate's `handle` and folded in by its `apply`.
///
/// The record store holds current state; events exist to be audited once the
/// write they belong to has committed. Nothing replays them.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Dotted audit name, `<aggregate>.<what happened>`, e.g.
    /// `transfer.auto_approved`.
    fn event_type(&self) -> &'static str;

    /// Payload schema revision carried on the audit envelope.
    fn version(&self) -> u32;

    /// Business time of the change as decided by the command.
    fn occurred_at(&self) -> DateTime<Utc>;
}
