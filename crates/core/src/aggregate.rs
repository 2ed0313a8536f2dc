//! Aggregate root trait for version-tracked domain records.

/// Aggregate root marker + minimal interface.
///
/// Stock records are not event-sourced in-process; the ledger is the history and the
/// aggregate is a versioned cache of it. The version is what optimistic concurrency
/// compares against.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the aggregate identifier.
    fn id(&self) -> &Self::Id;

    /// Monotonically increasing version of the aggregate's state.
    ///
    /// Starts at 0 for a record that has never been written and grows by exactly one
    /// per successful compare-and-set.
    fn version(&self) -> u64;
}
