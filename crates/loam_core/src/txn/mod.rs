//! Transaction admission.
//!
//! The [`TransactionDispatcher`] gates how many transactions run on the
//! engine at once. Shared transactions take one permit; exclusive
//! transactions take every permit their thread does not already hold,
//! which makes exclusivity reentrant per thread. Two ticket queues keep
//! admission fair while letting an exclusive waiter step aside for
//! shared traffic it cannot yet outrank.

mod descriptor;
mod dispatcher;

pub use descriptor::{TransactionDescriptor, TransactionHandle};
pub use dispatcher::TransactionDispatcher;
