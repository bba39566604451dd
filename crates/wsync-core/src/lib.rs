//! wsync-core: Core library for wsync
//!
//! Persists a window's workspace state against a remote store under one
//! window identity, with debounced and conflated writes, URL-driven
//! load/clone/reset commands, and a splash screen that escalates to a
//! recovery prompt when loading stalls.
//!
//! # Architecture
//!
//! ```text
//! route event → WindowResolver → StateOrchestrator → fetch workspace
//!                                       ↓
//!                          TransformGate (overwrite | cancel | clear)
//!                                       ↓
//!                      StateDb ready → change → SaveCoordinator → remote save
//!                                       ↑
//!                        SplashScreen waits on readiness, escalates
//! ```
//!
//! # Modules
//!
//! - `config`: TOML configuration with defaults and validation
//! - `error`: Error taxonomy with remediation guidance
//! - `logging`: `tracing` subscriber setup
//! - `page_config`: Shared option map and the `WindowIdentity` newtype
//! - `storage`: Key-value storage capability and an in-memory area
//! - `transform`: Single-assignment transform directive gate
//! - `state_db`: Namespaced state store gated on the transform
//! - `remote`: Workspace services (memory, file, HTTP)
//! - `save`: Debounced, conflated save coordinator
//! - `route`: Locations, router collaborator and command dispatch
//! - `prompt`: User prompt capability
//! - `resolver`: Window naming oracle and resolver, redirect flow
//! - `splash`: Reference-counted splash with recovery escalation
//! - `orchestrator`: load-state, save-state, recover-state, reset, reset-on-load
//! - `session`: Bootstrap wiring for one window
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod page_config;
pub mod prompt;
pub mod remote;
pub mod resolver;
pub mod route;
pub mod save;
pub mod session;
pub mod splash;
pub mod state_db;
pub mod storage;
pub mod transform;

pub use error::{Error, Result};
pub use page_config::{PageConfig, WindowIdentity};
pub use session::{Session, SessionParts};

/// Version of the wsync-core crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
