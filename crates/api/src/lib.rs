//! HTTP surface that originates workspace trigger events.
//!
//! Handlers perform their primary action first, then hand notifications to
//! [`notify`], which never turns a fan-out problem into a failed response.

pub mod middleware;
pub mod notify;
pub mod routes;
pub mod state;
