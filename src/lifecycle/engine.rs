//! Lifecycle phase state machine
//!
//! Runs `before_request → request → after_request` over one context.
//! Handlers execute strictly sequentially in priority order; the engine
//! awaits each before starting the next, so latency serializes per request
//! while independent requests proceed in parallel. A handler error aborts
//! the entire pipeline — partial response state must never be served — and
//! is routed to the error-fallback render by the assembler.

use crate::error::PluginExecutionError;
use crate::lifecycle::context::{Phase, RequestContext};
use crate::registry::PluginRegistry;
use std::sync::Arc;
use tracing::{debug, error};

/// Terminal result of one lifecycle run.
#[derive(Debug)]
pub enum LifecycleOutcome {
    Completed,
    Aborted(PluginExecutionError),
}

impl LifecycleOutcome {
    pub fn is_aborted(&self) -> bool {
        matches!(self, LifecycleOutcome::Aborted(_))
    }
}

pub struct RequestLifecycleEngine {
    registry: Arc<PluginRegistry>,
}

impl RequestLifecycleEngine {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self { registry }
    }

    /// Drive the context through all phases. Terminal: the context ends in
    /// the `done` phase whether the run completed or aborted.
    pub async fn run(&self, ctx: &mut RequestContext) -> LifecycleOutcome {
        for phase in [Phase::BeforeRequest, Phase::Request, Phase::AfterRequest] {
            ctx.enter_phase(phase);
            let handlers = self.registry.lifecycle_handlers(phase);
            debug!(
                request_id = %ctx.request().id,
                %phase,
                handler_count = handlers.len(),
                "entering phase"
            );

            for (handler, plugin) in handlers {
                if let Err(source) = handler.handle(ctx).await {
                    error!(
                        request_id = %ctx.request().id,
                        plugin = %plugin,
                        %phase,
                        %source,
                        "handler failed, aborting pipeline"
                    );
                    ctx.enter_phase(Phase::Done);
                    return LifecycleOutcome::Aborted(PluginExecutionError {
                        plugin,
                        phase,
                        source,
                    });
                }

                // A send_now short-circuits the remaining request-phase
                // handlers only; after_request still runs in full.
                if phase == Phase::Request && ctx.send_now_requested() {
                    debug!(
                        request_id = %ctx.request().id,
                        plugin = %plugin,
                        "send_now requested, skipping remaining request handlers"
                    );
                    break;
                }
            }
        }

        ctx.enter_phase(Phase::Done);
        LifecycleOutcome::Completed
    }
}
