//! Integration tests across the public crate surface.

mod api;
mod mock_source;
mod poller;
mod reconciliation;
