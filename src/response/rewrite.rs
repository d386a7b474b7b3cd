//! Content rewrite pipeline
//!
//! Composes every registered `html_rewrite` handler into a single streaming
//! document pass. Handler mutations operate at element level against one
//! shared rewriter — the document is never reparsed per handler. Failures
//! here are isolated: a handler that cannot initialize or register is
//! logged and skipped while the rest of the pipeline still runs, in
//! contrast to the lifecycle engine's abort-all policy.

use crate::error::RewriteError;
use crate::lifecycle::RequestHead;
use crate::registry::{HtmlRewriteHandler, PluginRegistry};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use lol_html::html_content::Element;
use lol_html::{ElementContentHandlers, HtmlRewriter, Selector, Settings};
use serde_json::Value;
use std::borrow::Cow;
use std::sync::Arc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};

/// A mutation closure applied to every element matching the selector during
/// the shared pass.
pub type MutationFn =
    Box<dyn for<'r, 't> FnMut(&mut Element<'r, 't>) -> lol_html::HandlerResult + Send>;

/// One element mutation a rewrite handler registers for the current request.
pub struct ElementMutation {
    pub selector: String,
    pub action: MutationFn,
}

impl ElementMutation {
    pub fn new(
        selector: impl Into<String>,
        action: impl for<'r, 't> FnMut(&mut Element<'r, 't>) -> lol_html::HandlerResult
            + Send
            + 'static,
    ) -> Self {
        Self {
            selector: selector.into(),
            action: Box::new(action),
        }
    }
}

/// A handler that survived context initialization and registration, with its
/// private context retained for the after pass.
pub struct PreparedEntry {
    pub plugin: String,
    pub handler: Arc<dyn HtmlRewriteHandler>,
    pub context: Value,
    mutations: Vec<ElementMutation>,
}

/// Outcome of the registration step across all handlers.
pub struct PreparedRewrite {
    pub entries: Vec<PreparedEntry>,
    /// Handlers dropped by partial-failure isolation.
    pub skipped: usize,
}

impl PreparedRewrite {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drain all mutations in handler priority order, leaving the entries
    /// behind for the after pass.
    pub fn take_mutations(&mut self) -> Vec<ElementMutation> {
        self.entries
            .iter_mut()
            .flat_map(|e| std::mem::take(&mut e.mutations))
            .collect()
    }
}

pub struct ContentRewritePipeline {
    handlers: Vec<(Arc<dyn HtmlRewriteHandler>, String)>,
}

impl ContentRewritePipeline {
    pub fn from_registry(registry: &PluginRegistry) -> Self {
        Self {
            handlers: registry.html_rewriters(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Initialize each handler's private context and collect its mutations.
    /// A handler failing either step (including an invalid selector) is
    /// logged and skipped; the remaining handlers still run.
    pub fn prepare(&self, request: &RequestHead) -> PreparedRewrite {
        let mut entries = Vec::new();
        let mut skipped = 0;

        for (handler, plugin) in &self.handlers {
            let context = match handler.init_context(request) {
                Ok(context) => context,
                Err(err) => {
                    warn!(plugin = %plugin, %err, "rewrite context init failed, skipping handler");
                    skipped += 1;
                    continue;
                }
            };

            let mutations = match handler.mutations(&context, request) {
                Ok(mutations) => mutations,
                Err(err) => {
                    warn!(plugin = %plugin, %err, "rewrite registration failed, skipping handler");
                    skipped += 1;
                    continue;
                }
            };

            if let Some(invalid) = mutations
                .iter()
                .find(|m| m.selector.parse::<Selector>().is_err())
            {
                warn!(
                    plugin = %plugin,
                    selector = %invalid.selector,
                    "invalid selector, skipping handler"
                );
                skipped += 1;
                continue;
            }

            entries.push(PreparedEntry {
                plugin: plugin.clone(),
                handler: handler.clone(),
                context,
                mutations,
            });
        }

        PreparedRewrite { entries, skipped }
    }

    /// Second sequential pass: observation callbacks in the same priority
    /// order. `document` is `None` for streaming bodies, which are never
    /// buffered into a full document.
    pub fn run_after(entries: &[PreparedEntry], request: &RequestHead, document: Option<&str>) {
        for entry in entries {
            entry.handler.after(&entry.context, request, document);
        }
    }
}

fn build_handler_list<'h>(
    mutations: Vec<ElementMutation>,
) -> Result<Vec<(Cow<'static, Selector>, ElementContentHandlers<'h>)>, RewriteError> {
    let mut handlers = Vec::with_capacity(mutations.len());
    for mutation in mutations {
        let selector: Selector =
            mutation
                .selector
                .parse()
                .map_err(|e| RewriteError::Selector {
                    selector: mutation.selector.clone(),
                    reason: format!("{e}"),
                })?;
        handlers.push((
            Cow::Owned(selector),
            ElementContentHandlers::default().element(mutation.action),
        ));
    }
    Ok(handlers)
}

/// Run one streaming pass over a fully materialized document.
pub fn apply_mutations(
    mutations: Vec<ElementMutation>,
    document: &str,
) -> Result<String, RewriteError> {
    let handlers = build_handler_list(mutations)?;
    let mut output = Vec::with_capacity(document.len());
    {
        let mut rewriter = HtmlRewriter::new(
            Settings {
                element_content_handlers: handlers,
                ..Settings::default()
            },
            |chunk: &[u8]| output.extend_from_slice(chunk),
        );
        rewriter
            .write(document.as_bytes())
            .map_err(|e| RewriteError::Pass(e.to_string()))?;
        rewriter
            .end()
            .map_err(|e| RewriteError::Pass(e.to_string()))?;
    }
    String::from_utf8(output).map_err(|e| RewriteError::Pass(e.to_string()))
}

/// Apply mutations incrementally to a streaming body.
///
/// The rewriter is not `Send`, so it lives on a dedicated worker thread fed
/// through a channel; transformed chunks flow back through an unbounded
/// channel wrapped as the output stream. Chunks are transformed as they
/// arrive and the stream is never buffered in full. If the rewriter fails
/// mid-stream the remaining chunks pass through unmodified — the rewrite
/// step degrades, the response does not fail. `on_complete` fires once the
/// input is exhausted and the rewriter flushed.
pub fn spawn_stream_rewriter(
    mutations: Vec<ElementMutation>,
    input: BoxStream<'static, std::io::Result<Bytes>>,
    on_complete: impl FnOnce() + Send + 'static,
) -> BoxStream<'static, std::io::Result<Bytes>> {
    let (in_tx, in_rx) = std::sync::mpsc::channel::<std::io::Result<Bytes>>();
    let (out_tx, out_rx) = tokio::sync::mpsc::unbounded_channel::<std::io::Result<Bytes>>();

    std::thread::spawn(move || {
        let sink_tx = out_tx.clone();
        let handlers = match build_handler_list(mutations) {
            Ok(handlers) => handlers,
            Err(err) => {
                warn!(%err, "stream rewriter setup failed, passing stream through");
                for item in in_rx.iter() {
                    let _ = out_tx.send(item);
                }
                on_complete();
                return;
            }
        };

        let mut rewriter = Some(HtmlRewriter::new(
            Settings {
                element_content_handlers: handlers,
                ..Settings::default()
            },
            move |chunk: &[u8]| {
                let _ = sink_tx.send(Ok(Bytes::copy_from_slice(chunk)));
            },
        ));

        for item in in_rx.iter() {
            match item {
                Ok(chunk) => {
                    let pass_through = match rewriter.as_mut() {
                        Some(active) => match active.write(&chunk) {
                            Ok(()) => false,
                            Err(err) => {
                                warn!(%err, "stream rewrite failed, passing remaining chunks through");
                                true
                            }
                        },
                        None => true,
                    };
                    if pass_through {
                        rewriter = None;
                        let _ = out_tx.send(Ok(chunk));
                    }
                }
                Err(err) => {
                    let _ = out_tx.send(Err(err));
                    rewriter = None;
                    break;
                }
            }
        }

        if let Some(active) = rewriter.take() {
            if let Err(err) = active.end() {
                warn!(%err, "stream rewriter flush failed");
            }
        }
        debug!("stream rewrite pass complete");
        on_complete();
    });

    tokio::spawn(async move {
        let mut input = input;
        while let Some(item) = input.next().await {
            if in_tx.send(item).is_err() {
                break;
            }
        }
    });

    UnboundedReceiverStream::new(out_rx).boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{PluginDescriptor, PluginRegistry, RuntimeVersions};
    use futures::stream;
    use lol_html::html_content::ContentType;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    struct AttrTagger {
        attr: &'static str,
    }

    impl HtmlRewriteHandler for AttrTagger {
        fn init_context(&self, request: &RequestHead) -> Result<Value, RewriteError> {
            Ok(json!({ "path": request.path }))
        }

        fn mutations(
            &self,
            context: &Value,
            _request: &RequestHead,
        ) -> Result<Vec<ElementMutation>, RewriteError> {
            let attr = self.attr;
            let value = context["path"].as_str().unwrap_or_default().to_string();
            Ok(vec![ElementMutation::new("div", move |el| {
                el.set_attribute(attr, &value)?;
                Ok(())
            })])
        }
    }

    struct Broken;

    impl HtmlRewriteHandler for Broken {
        fn init_context(&self, _request: &RequestHead) -> Result<Value, RewriteError> {
            Err(RewriteError::Init("broken by design".to_string()))
        }

        fn mutations(
            &self,
            _context: &Value,
            _request: &RequestHead,
        ) -> Result<Vec<ElementMutation>, RewriteError> {
            Ok(Vec::new())
        }
    }

    struct Observer {
        seen: Arc<Mutex<Option<Option<String>>>>,
    }

    impl HtmlRewriteHandler for Observer {
        fn init_context(&self, _request: &RequestHead) -> Result<Value, RewriteError> {
            Ok(Value::Null)
        }

        fn mutations(
            &self,
            _context: &Value,
            _request: &RequestHead,
        ) -> Result<Vec<ElementMutation>, RewriteError> {
            Ok(Vec::new())
        }

        fn after(&self, _context: &Value, _request: &RequestHead, document: Option<&str>) {
            *self.seen.lock().unwrap() = Some(document.map(|d| d.to_string()));
        }

        fn has_after(&self) -> bool {
            true
        }
    }

    fn registry_with(handlers: Vec<(&str, Arc<dyn HtmlRewriteHandler>)>) -> PluginRegistry {
        let mut builder = PluginRegistry::builder();
        for (i, (name, handler)) in handlers.into_iter().enumerate() {
            builder
                .register(
                    PluginDescriptor::builder(name, "1.0.0")
                        .priority(i as i32)
                        .html_rewrite(handler)
                        .build()
                        .unwrap(),
                )
                .unwrap();
        }
        builder.build(&RuntimeVersions::current()).unwrap()
    }

    #[test]
    fn test_single_pass_applies_mutations() {
        let registry = registry_with(vec![("tagger", Arc::new(AttrTagger { attr: "data-page" }))]);
        let pipeline = ContentRewritePipeline::from_registry(&registry);
        let mut prepared = pipeline.prepare(&RequestHead::get("/docs"));
        assert_eq!(prepared.skipped, 0);

        let out = apply_mutations(prepared.take_mutations(), "<div>hello</div>").unwrap();
        assert_eq!(out, r#"<div data-page="/docs">hello</div>"#);
    }

    #[test]
    fn test_broken_handler_is_isolated() {
        let registry = registry_with(vec![
            ("broken", Arc::new(Broken)),
            ("tagger", Arc::new(AttrTagger { attr: "data-ok" })),
        ]);
        let pipeline = ContentRewritePipeline::from_registry(&registry);
        let mut prepared = pipeline.prepare(&RequestHead::get("/"));

        assert_eq!(prepared.skipped, 1);
        assert_eq!(prepared.entries.len(), 1);
        let out = apply_mutations(prepared.take_mutations(), "<div></div>").unwrap();
        assert!(out.contains("data-ok"));
    }

    #[test]
    fn test_invalid_selector_skips_handler() {
        struct BadSelector;
        impl HtmlRewriteHandler for BadSelector {
            fn init_context(&self, _r: &RequestHead) -> Result<Value, RewriteError> {
                Ok(Value::Null)
            }
            fn mutations(
                &self,
                _c: &Value,
                _r: &RequestHead,
            ) -> Result<Vec<ElementMutation>, RewriteError> {
                Ok(vec![ElementMutation::new("div[", |_el| Ok(()))])
            }
        }

        let registry = registry_with(vec![("bad", Arc::new(BadSelector))]);
        let pipeline = ContentRewritePipeline::from_registry(&registry);
        let prepared = pipeline.prepare(&RequestHead::get("/"));
        assert_eq!(prepared.skipped, 1);
        assert!(prepared.is_empty());
    }

    #[test]
    fn test_sub_capability_distinguishes_after_implementers() {
        use crate::registry::Capability;

        let seen = Arc::new(Mutex::new(None));
        let registry = registry_with(vec![
            ("tagger", Arc::new(AttrTagger { attr: "data-x" })),
            ("observer", Arc::new(Observer { seen })),
        ]);

        assert_eq!(
            registry.by_capability(Capability::HtmlRewrite).len(),
            2
        );
        assert_eq!(
            registry
                .sub_capability(Capability::HtmlRewrite, "rewrite")
                .len(),
            2
        );
        let after: Vec<_> = registry
            .sub_capability(Capability::HtmlRewrite, "after")
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        assert_eq!(after, vec!["observer"]);
    }

    #[test]
    fn test_after_pass_sees_transformed_document() {
        let seen = Arc::new(Mutex::new(None));
        let registry = registry_with(vec![
            ("tagger", Arc::new(AttrTagger { attr: "data-x" })),
            ("observer", Arc::new(Observer { seen: seen.clone() })),
        ]);
        let pipeline = ContentRewritePipeline::from_registry(&registry);
        let mut prepared = pipeline.prepare(&RequestHead::get("/p"));

        let doc = apply_mutations(prepared.take_mutations(), "<div></div>").unwrap();
        ContentRewritePipeline::run_after(&prepared.entries, &RequestHead::get("/p"), Some(&doc));

        let observed = seen.lock().unwrap().clone().unwrap();
        assert_eq!(observed.as_deref(), Some(r#"<div data-x="/p"></div>"#));
    }

    #[tokio::test]
    async fn test_stream_rewrite_transforms_chunks_incrementally() {
        let mutations = vec![ElementMutation::new("span", |el: &mut Element| {
            el.set_inner_content("rewritten", ContentType::Text);
            Ok(())
        })];

        let chunks: Vec<std::io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"<p>first</p><span>or")),
            Ok(Bytes::from_static(b"iginal</span><p>last</p>")),
        ];
        let done = Arc::new(AtomicBool::new(false));
        let done_flag = done.clone();

        let out = spawn_stream_rewriter(mutations, stream::iter(chunks).boxed(), move || {
            done_flag.store(true, Ordering::SeqCst);
        });

        let collected: Vec<_> = out.collect().await;
        let body: Vec<u8> = collected
            .into_iter()
            .flat_map(|c| c.unwrap().to_vec())
            .collect();
        let body = String::from_utf8(body).unwrap();
        assert_eq!(body, "<p>first</p><span>rewritten</span><p>last</p>");
        assert!(done.load(Ordering::SeqCst));
    }
}
