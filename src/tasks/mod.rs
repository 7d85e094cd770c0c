//! Background tasks.

mod orphan_reconciler;

pub use orphan_reconciler::{OrphanPolicy, OrphanReconciler};
