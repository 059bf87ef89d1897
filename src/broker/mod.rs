//! Broker collaborator and the session handle it produces.

pub mod in_process;
pub mod session;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::models::session_info::SessionInfo;
use crate::models::start_info::{AttachInfo, Binding, StartInfo};
use crate::Result;

pub use in_process::InProcessBrokerFactory;
pub use session::{EstablishmentReport, Session, SessionKind};

/// Broker reached by [`BrokerFactory`], before it is wrapped in a [`Session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConnection {
    /// Endpoint the broker answered on.
    pub endpoint: String,
    /// Descriptor resolved by the broker.
    pub info: SessionInfo,
}

/// Creates or attaches the broker side of a session.
pub trait BrokerFactory: Send + Sync {
    /// Ask the broker launcher at `endpoint` to create a broker for `session_id`.
    ///
    /// # Errors
    ///
    /// `SessionError::Communication` when `endpoint` is unreachable (the
    /// caller fails over to the next candidate); any other error is terminal.
    fn create_broker<'a>(
        &'a self,
        info: &'a StartInfo,
        session_id: u64,
        durable: bool,
        timeout: Duration,
        endpoint: &'a str,
        binding: &'a Binding,
    ) -> Pin<Box<dyn Future<Output = Result<BrokerConnection>> + Send + 'a>>;

    /// Reconnect to the broker already serving `session_info`.
    ///
    /// # Errors
    ///
    /// Returns the broker's failure unchanged.
    fn attach_broker<'a>(
        &'a self,
        info: &'a AttachInfo,
        session_info: &'a SessionInfo,
        timeout: Duration,
        binding: &'a Binding,
    ) -> Pin<Box<dyn Future<Output = Result<BrokerConnection>> + Send + 'a>>;
}
