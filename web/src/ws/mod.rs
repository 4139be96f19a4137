//! STOMP over WebSocket endpoint for the web layer.
//!
//! This module contains only the Axum upgrade handler and the per-socket
//! connection loop. The broker itself (Manager, ConnectionRegistry, Session,
//! frame codec) lives in the `stomp` crate so it stays transport independent.

pub mod handler;
