#![forbid(unsafe_code)]

//! Client-side session establishment for cluster compute jobs.
//!
//! [`SessionFactory`] allocates a session resource on the scheduler,
//! negotiates credentials across retries, connects a broker (failing over
//! between candidate nodes), and returns a [`Session`] whose
//! [`CallbackManager`](callback::CallbackManager) routes broker responses to
//! a single registered consumer.

pub mod broker;
pub mod callback;
pub mod config;
pub mod credential;
pub mod errors;
pub mod factory;
pub mod files;
pub mod models;
pub mod resource;

pub use broker::{Session, SessionKind};
pub use config::FactoryConfig;
pub use errors::{Result, SessionError};
pub use factory::SessionFactory;
