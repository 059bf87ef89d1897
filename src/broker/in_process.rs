//! Broker hosted inside the client process.
//!
//! Used whenever a session descriptor asks for an in-process broker or the
//! caller runs in debug mode. Nothing crosses the network, so this factory
//! never fails over.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::debug;

use super::{BrokerConnection, BrokerFactory};
use crate::models::session_info::{JobState, SessionInfo};
use crate::models::start_info::{AttachInfo, Binding, StartInfo};
use crate::Result;

/// Broker factory that resolves every session locally.
#[derive(Debug, Clone, Copy, Default)]
pub struct InProcessBrokerFactory;

fn local_endpoint(session_id: u64) -> String {
    format!("inproc://session/{session_id}")
}

impl BrokerFactory for InProcessBrokerFactory {
    fn create_broker<'a>(
        &'a self,
        info: &'a StartInfo,
        session_id: u64,
        durable: bool,
        _timeout: Duration,
        endpoint: &'a str,
        _binding: &'a Binding,
    ) -> Pin<Box<dyn Future<Output = Result<BrokerConnection>> + Send + 'a>> {
        Box::pin(async move {
            debug!(session_id, endpoint, "starting in-process broker");
            let local = local_endpoint(session_id);
            Ok(BrokerConnection {
                endpoint: endpoint.to_owned(),
                info: SessionInfo {
                    id: session_id,
                    service_version: info.service_version.clone(),
                    broker_endpoint: Some(local.clone()),
                    controller_endpoint: Some(format!("{local}/controller")),
                    response_endpoint: Some(format!("{local}/response")),
                    use_in_process_broker: true,
                    durable,
                    job_state: JobState::Running,
                },
            })
        })
    }

    fn attach_broker<'a>(
        &'a self,
        _info: &'a AttachInfo,
        session_info: &'a SessionInfo,
        _timeout: Duration,
        _binding: &'a Binding,
    ) -> Pin<Box<dyn Future<Output = Result<BrokerConnection>> + Send + 'a>> {
        Box::pin(async move {
            let endpoint = session_info
                .broker_endpoint
                .clone()
                .unwrap_or_else(|| local_endpoint(session_info.id));
            debug!(session_id = session_info.id, %endpoint, "attaching in-process broker");
            Ok(BrokerConnection {
                endpoint,
                info: SessionInfo {
                    use_in_process_broker: true,
                    ..session_info.clone()
                },
            })
        })
    }
}
