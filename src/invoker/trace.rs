use async_trait::async_trait;
use opentelemetry::global::{self, BoxedTracer};
use opentelemetry::trace::{Span, Status, Tracer};
use opentelemetry::KeyValue;
use std::borrow::Cow;
use std::fmt;
use tracing::Instrument;

use super::{Next, Stage};
use crate::error::Result;
use crate::executor::{ExecutionContext, Executor};

/// Wraps each invocation in an OpenTelemetry span named after the executor.
///
/// The downstream future also runs inside a `tracing` span so log lines of
/// nested invocations carry the executor chain.
pub struct TraceStage {
    tracer: BoxedTracer,
}

impl fmt::Debug for TraceStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceStage").finish_non_exhaustive()
    }
}

impl TraceStage {
    pub fn new(tracer: BoxedTracer) -> Self {
        Self { tracer }
    }

    /// Use the process-wide tracer provider
    pub fn global(name: impl Into<Cow<'static, str>>) -> Self {
        Self::new(global::tracer(name))
    }
}

#[async_trait]
impl Stage for TraceStage {
    fn name(&self) -> &'static str {
        "trace"
    }

    async fn handle(
        &self,
        executor: &mut dyn Executor,
        ctx: &mut ExecutionContext,
        next: Next<'_>,
    ) -> Result<()> {
        let name = executor.name();
        let invocation_id = ctx.invocation_id();

        let mut span = self.tracer.start(name.clone());
        span.set_attribute(KeyValue::new("iam.invocation_id", invocation_id.to_string()));

        let result = next
            .run(executor, ctx)
            .instrument(tracing::info_span!("invoke", executor = %name, invocation_id = %invocation_id))
            .await;

        if let Err(err) = &result {
            span.record_error(err);
            span.set_status(Status::error(err.to_string()));
        }
        span.end();

        result
    }
}
