//! Alert engines: surface drift instead of fixing it.
//!
//! Alerts are idempotent latches. Turning one on records enough metadata to
//! withdraw it later; turning one off with no recorded state, or against a
//! target someone already removed by hand, collapses to a skip.

pub mod pr_comment;
pub mod pr_review;
pub mod security_advisory;
