use std::sync::Arc;

use async_trait::async_trait;

use shoal_commands::{decode, Command, InvocationContext};
use shoal_remoting::{InboundHandler, Response};
use shoal_types::Address;

use crate::convert::result_to_response;
use crate::interceptor::InterceptorChain;

/// Runs commands received from other members through the local chain.
pub struct RemoteCommandHandler {
    chain: Arc<InterceptorChain>,
}

impl RemoteCommandHandler {
    pub fn new(chain: Arc<InterceptorChain>) -> Self {
        RemoteCommandHandler { chain }
    }
}

#[async_trait]
impl InboundHandler for RemoteCommandHandler {
    async fn handle(&self, origin: Address, payload: Vec<u8>) -> Response {
        let mut cmd = match decode(&payload) {
            Ok(cmd) => cmd,
            Err(e) => {
                tracing::warn!(%origin, error = %e, "dropping undecodable command");
                return Response::Exception { message: e.to_string() };
            }
        };
        // The owner answers a clustered get with a plain local read.
        if let Command::ClusteredGet(c) = &cmd {
            cmd = c.to_local_get().into();
        }
        let mut ctx = InvocationContext::remote(origin);
        result_to_response(self.chain.invoke(&mut ctx, &mut cmd).await)
    }
}
