//! Free port allocation.

#![allow(missing_docs)]

use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};

use tokio::net::TcpListener;

use crate::error::SupervisorError;

/// Produces a TCP port that is currently free on the loopback interface.
pub trait PortAllocator: Send + Sync + 'static {
    fn allocate(&self) -> impl Future<Output = Result<u16, SupervisorError>> + Send;
}

/// Binds port 0 on 127.0.0.1, reads the assigned port and releases it.
///
/// The port is free when returned; another process may still grab it before
/// the backend binds it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopbackPortAllocator;

impl PortAllocator for LoopbackPortAllocator {
    async fn allocate(&self) -> Result<u16, SupervisorError> {
        let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
            .await
            .map_err(|err| SupervisorError::PortAllocation(err.to_string().into()))?;
        let port = listener
            .local_addr()
            .map_err(|err| SupervisorError::PortAllocation(err.to_string().into()))?
            .port();
        drop(listener);
        Ok(port)
    }
}
