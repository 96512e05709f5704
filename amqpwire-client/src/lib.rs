//! # amqpwire-client
//!
//! Framing layer for AMQP 0-10 connections.
//!
//! This crate provides:
//! - A blocking [`Framer`] over any `Read + Write` stream
//! - An [`AsyncFramer`] over tokio streams
//! - Timeout retry with cooperative cancellation through [`Abort`] predicates
//! - YAML/env configuration for socket timeouts
//!
//! Interpreting frame sequences (sessions, segment reassembly) is left to
//! the caller.

pub mod abort;
pub mod async_framer;
pub mod config;
pub mod error;
pub mod framer;
pub mod transport;

pub use abort::{Abort, AbortHandle, Deadline, NeverAbort};
pub use async_framer::AsyncFramer;
pub use config::{ConfigError, FramerConfig};
pub use error::FramerError;
pub use framer::Framer;
pub use transport::{is_timeout, Transport};
