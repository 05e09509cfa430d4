use async_trait::async_trait;
use tracing::Instrument;

use shoal_commands::{Command, CommandResult, InvocationContext, Origin};
use shoal_types::ShoalError;

use crate::interceptor::{Interceptor, Next};

/// Opens a span per invocation and logs failures.
pub struct InvocationContextInterceptor;

#[async_trait]
impl Interceptor for InvocationContextInterceptor {
    fn name(&self) -> &'static str {
        "invocation-context"
    }

    async fn handle(
        &self,
        ctx: &mut InvocationContext,
        cmd: &mut Command,
        next: Next<'_>,
    ) -> Result<CommandResult, ShoalError> {
        let kind = cmd.kind();
        let origin = match ctx.origin() {
            Origin::Local => "local".to_string(),
            Origin::Remote(from) => from.to_string(),
        };
        let span = tracing::debug_span!("invoke", %kind, key = ?cmd.key(), %origin);
        let result = next.invoke(ctx, cmd).instrument(span).await;
        match &result {
            Ok(r) => tracing::trace!(%kind, successful = r.successful, "invocation finished"),
            Err(e) if e.is_unavailable() => tracing::debug!(%kind, error = %e, "invocation rejected"),
            Err(e) => tracing::debug!(%kind, error = %e, "invocation failed"),
        }
        result
    }
}
