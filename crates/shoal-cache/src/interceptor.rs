use std::sync::Arc;

use async_trait::async_trait;

use shoal_commands::{Command, CommandResult, InvocationContext};
use shoal_types::ShoalError;

/// One stage of the command pipeline.
///
/// Implementations match exhaustively on `Command`; passing a command on
/// unchanged is an explicit `next.invoke(..)`. Returning an error aborts the
/// rest of the chain.
#[async_trait]
pub trait Interceptor: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn handle(
        &self,
        ctx: &mut InvocationContext,
        cmd: &mut Command,
        next: Next<'_>,
    ) -> Result<CommandResult, ShoalError>;
}

/// The remainder of the chain after the current interceptor.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    rest: &'a [Arc<dyn Interceptor>],
}

impl<'a> Next<'a> {
    pub async fn invoke(
        self,
        ctx: &mut InvocationContext,
        cmd: &mut Command,
    ) -> Result<CommandResult, ShoalError> {
        match self.rest.split_first() {
            Some((head, tail)) => head.handle(ctx, cmd, Next { rest: tail }).await,
            None => Err(ShoalError::Protocol(format!(
                "{} command reached the end of the chain unhandled",
                cmd.kind()
            ))),
        }
    }
}

pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorChain {
    pub async fn invoke(
        &self,
        ctx: &mut InvocationContext,
        cmd: &mut Command,
    ) -> Result<CommandResult, ShoalError> {
        Next { rest: &self.interceptors }.invoke(ctx, cmd).await
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.interceptors.iter().map(|i| i.name()).collect()
    }
}

/// Assembles the chain once at startup.
#[derive(Default)]
pub struct ChainBuilder {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl ChainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn push_if(self, enabled: bool, interceptor: impl FnOnce() -> Arc<dyn Interceptor>) -> Self {
        if enabled {
            self.push(interceptor())
        } else {
            self
        }
    }

    /// Insert `interceptor` right before the one named `before`.
    pub fn insert_before(mut self, before: &str, interceptor: Arc<dyn Interceptor>) -> Result<Self, ShoalError> {
        let pos = self
            .interceptors
            .iter()
            .position(|i| i.name() == before)
            .ok_or_else(|| ShoalError::InvalidArgument(format!("no interceptor named '{before}'")))?;
        self.interceptors.insert(pos, interceptor);
        Ok(self)
    }

    pub fn build(self) -> InterceptorChain {
        InterceptorChain { interceptors: self.interceptors }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use shoal_commands::{GetKeyValueCommand, PutKeyValueCommand};

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Interceptor for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn handle(
            &self,
            ctx: &mut InvocationContext,
            cmd: &mut Command,
            next: Next<'_>,
        ) -> Result<CommandResult, ShoalError> {
            self.log.lock().push(self.name);
            next.invoke(ctx, cmd).await
        }
    }

    struct Terminal;

    #[async_trait]
    impl Interceptor for Terminal {
        fn name(&self) -> &'static str {
            "terminal"
        }

        async fn handle(
            &self,
            _ctx: &mut InvocationContext,
            cmd: &mut Command,
            _next: Next<'_>,
        ) -> Result<CommandResult, ShoalError> {
            match cmd {
                Command::Put(_) => Err(ShoalError::InvalidArgument("read only".into())),
                _ => Ok(CommandResult::ok(Some(b"t".to_vec()))),
            }
        }
    }

    fn recorder(name: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Arc<dyn Interceptor> {
        Arc::new(Recorder { name, log: log.clone() })
    }

    #[tokio::test]
    async fn chain_runs_in_order_and_inserts_before() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = ChainBuilder::new()
            .push(recorder("first", &log))
            .push(recorder("third", &log))
            .push(Arc::new(Terminal))
            .insert_before("third", recorder("second", &log))
            .unwrap()
            .build();
        assert_eq!(chain.names(), vec!["first", "second", "third", "terminal"]);

        let mut cmd: Command = GetKeyValueCommand::new("k").into();
        let r = chain.invoke(&mut InvocationContext::local(), &mut cmd).await.unwrap();
        assert_eq!(r.value, Some(b"t".to_vec()));
        assert_eq!(*log.lock(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn errors_propagate_unchanged() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = ChainBuilder::new().push(recorder("a", &log)).push(Arc::new(Terminal)).build();
        let mut cmd: Command = PutKeyValueCommand::new("k", vec![]).into();
        let err = chain.invoke(&mut InvocationContext::local(), &mut cmd).await.unwrap_err();
        assert_eq!(err, ShoalError::InvalidArgument("read only".into()));
    }

    #[tokio::test]
    async fn empty_tail_is_a_fault() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = ChainBuilder::new().push(recorder("only", &log)).build();
        let mut cmd: Command = GetKeyValueCommand::new("k").into();
        assert!(chain.invoke(&mut InvocationContext::local(), &mut cmd).await.is_err());
    }

    #[test]
    fn insert_before_unknown_name_fails() {
        let res = ChainBuilder::new().insert_before("missing", Arc::new(Terminal));
        assert!(res.is_err());
    }

    #[test]
    fn push_if_skips_disabled_stages() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = ChainBuilder::new()
            .push_if(false, || recorder("off", &log))
            .push_if(true, || recorder("on", &log))
            .build();
        assert_eq!(chain.names(), vec!["on"]);
    }
}
