//! Types shared by the store, the HTTP surface and its clients.

pub mod api;
pub mod models;

pub use models::{Identity, Priority, Role, TicketStatus};
