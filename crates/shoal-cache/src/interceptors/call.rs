use std::sync::Arc;

use async_trait::async_trait;

use shoal_commands::{CacheNotifier, Command, CommandResult, InvocationContext};
use shoal_types::ShoalError;

use crate::interceptor::{Interceptor, Next};

/// Last stage: performs the command against the working entries.
pub struct CallInterceptor {
    notifier: Arc<dyn CacheNotifier>,
}

impl CallInterceptor {
    pub fn new(notifier: Arc<dyn CacheNotifier>) -> Self {
        CallInterceptor { notifier }
    }
}

#[async_trait]
impl Interceptor for CallInterceptor {
    fn name(&self) -> &'static str {
        "call"
    }

    async fn handle(
        &self,
        ctx: &mut InvocationContext,
        cmd: &mut Command,
        _next: Next<'_>,
    ) -> Result<CommandResult, ShoalError> {
        cmd.perform(ctx, self.notifier.as_ref())
    }
}
