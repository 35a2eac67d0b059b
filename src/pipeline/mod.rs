//! Response pipeline: attempts, retries and paced delivery.

pub mod attempt;
pub mod coordinator;
pub mod delivery;
pub mod messages;
pub mod retry;
