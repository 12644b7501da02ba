//! # Crawler Module
//!
//! Implements the worker pool that drives spiders to completion.
//!
//! ## Overview
//!
//! `Crawler::run` puts every spider on an intake channel and starts a fixed
//! number of executors. Each executor owns one spider at a time: it seeds the
//! spider's frontier, drains it through the configured request strategy and
//! acknowledges the spider when the frontier is empty. `run` returns once every
//! spider has been acknowledged.
//!
//! ## Key Components
//!
//! - **Crawler**: owns the configuration and collects the acknowledgements
//! - **Executor**: the per-worker loop draining one spider at a time
//! - **RequestStrategy**: how a request reaches the network, either directly or
//!   through a leased proxy
//!
//! ## Architecture
//!
//! Intake and acknowledgement are `kanal` MPMC channels. Closing the intake is the
//! cancellation signal: executors finish the spider in hand, find the channel
//! closed and exit, so an in-flight download is never aborted by shutdown.

mod core;
mod executor;
mod strategy;

pub use self::core::Crawler;
pub use strategy::{DirectStrategy, GuardedStrategy, RequestStrategy};

use crate::spider::Spider;
use std::sync::Arc;

/// Called once per spider after its frontier is exhausted, before it is acknowledged.
pub type CompletionHook = Arc<dyn Fn(&dyn Spider) + Send + Sync>;
