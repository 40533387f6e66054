//! Lifecycle hooks
//!
//! Hooks are named, boolean-returning callbacks bound to one of four fixed
//! points in the request lifecycle. Within a stage they run in registration
//! order; a hook returning `false` stops the stage and signals the pipeline
//! to stop advancing (the hook is assumed to have finalized the response
//! itself). Stage sequences are assembled at startup and are read-only while
//! the server is accepting traffic.

use crate::request::Request;
use crate::response::Response;
use std::sync::Arc;

/// Boxed hook callback. Receives the in-progress response and the request,
/// may mutate both, and returns whether the stage should continue.
pub type HookFn = Arc<dyn Fn(&mut Response, &mut Request) -> bool + Send + Sync>;

/// A registered, short-circuiting callback bound to a stage.
#[derive(Clone)]
pub struct NamedHook {
    pub name: String,
    pub apply: HookFn,
}

impl NamedHook {
    pub fn new<F>(name: impl Into<String>, apply: F) -> Self
    where
        F: Fn(&mut Response, &mut Request) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            apply: Arc::new(apply),
        }
    }
}

impl std::fmt::Debug for NamedHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedHook").field("name", &self.name).finish()
    }
}

/// The four fixed points where hooks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStage {
    /// After the connection delivered a request, before routing.
    RequestReceived,
    /// After the router matched (or missed), before handler dispatch.
    RequestRouted,
    /// After the handler produced a response, before it is flushed.
    /// Advisory: the pipeline flushes regardless of the stage outcome.
    ResponseReady,
    /// After the flush, unconditionally; return values are ignored.
    ResponseAlways,
}

/// Ordered hook sequences for all four stages.
#[derive(Default)]
pub struct HookRegistry {
    received: Vec<NamedHook>,
    routed: Vec<NamedHook>,
    ready: Vec<NamedHook>,
    always: Vec<NamedHook>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append hooks to a stage. Contributions from multiple services
    /// concatenate in registration order.
    pub fn append(&mut self, stage: HookStage, hooks: Vec<NamedHook>) {
        self.stage_mut(stage).extend(hooks);
    }

    pub fn len(&self, stage: HookStage) -> usize {
        self.stage_ref(stage).len()
    }

    pub fn is_empty(&self, stage: HookStage) -> bool {
        self.stage_ref(stage).is_empty()
    }

    /// Run a stage in registration order.
    ///
    /// Returns `false` as soon as any hook returns `false`, without running
    /// the rest of the stage. An empty stage reports `true`.
    pub fn run_stage(&self, stage: HookStage, response: &mut Response, request: &mut Request) -> bool {
        for hook in self.stage_ref(stage) {
            if !(hook.apply)(response, request) {
                tracing::debug!(stage = ?stage, hook = %hook.name, "hook aborted stage");
                return false;
            }
        }
        true
    }

    fn stage_ref(&self, stage: HookStage) -> &[NamedHook] {
        match stage {
            HookStage::RequestReceived => &self.received,
            HookStage::RequestRouted => &self.routed,
            HookStage::ResponseReady => &self.ready,
            HookStage::ResponseAlways => &self.always,
        }
    }

    fn stage_mut(&mut self, stage: HookStage) -> &mut Vec<NamedHook> {
        match stage {
            HookStage::RequestReceived => &mut self.received,
            HookStage::RequestRouted => &mut self.routed,
            HookStage::ResponseReady => &mut self.ready,
            HookStage::ResponseAlways => &mut self.always,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::empty_response;
    use bytes::Bytes;
    use http::StatusCode;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn make_request() -> Request {
        let req = http::Request::builder()
            .method(http::Method::GET)
            .uri("/test")
            .body(())
            .unwrap();
        let (parts, _) = req.into_parts();
        Request::new(parts, Bytes::new(), HashMap::new())
    }

    fn tracking_hook(name: &str, result: bool, seen: Arc<Mutex<Vec<String>>>) -> NamedHook {
        let label = name.to_string();
        NamedHook::new(name, move |_res, _req| {
            seen.lock().unwrap().push(label.clone());
            result
        })
    }

    #[test]
    fn empty_stage_reports_true() {
        let registry = HookRegistry::new();
        let mut response = empty_response(StatusCode::OK);
        let mut request = make_request();
        assert!(registry.run_stage(HookStage::RequestReceived, &mut response, &mut request));
    }

    #[test]
    fn false_hook_short_circuits_stage() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HookRegistry::new();
        registry.append(
            HookStage::RequestReceived,
            vec![
                tracking_hook("h1", true, seen.clone()),
                tracking_hook("h2", false, seen.clone()),
                tracking_hook("h3", true, seen.clone()),
            ],
        );

        let mut response = empty_response(StatusCode::OK);
        let mut request = make_request();
        let outcome = registry.run_stage(HookStage::RequestReceived, &mut response, &mut request);

        assert!(!outcome);
        assert_eq!(*seen.lock().unwrap(), vec!["h1", "h2"]);
    }

    #[test]
    fn stages_are_independent_sequences() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HookRegistry::new();
        registry.append(
            HookStage::RequestReceived,
            vec![tracking_hook("received", true, seen.clone())],
        );
        registry.append(
            HookStage::ResponseAlways,
            vec![tracking_hook("always", true, seen.clone())],
        );

        let mut response = empty_response(StatusCode::OK);
        let mut request = make_request();
        assert!(registry.run_stage(HookStage::ResponseAlways, &mut response, &mut request));
        assert_eq!(*seen.lock().unwrap(), vec!["always"]);
        assert_eq!(registry.len(HookStage::RequestReceived), 1);
        assert!(registry.is_empty(HookStage::RequestRouted));
    }

    #[test]
    fn appended_sequences_concatenate_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HookRegistry::new();
        registry.append(
            HookStage::RequestRouted,
            vec![tracking_hook("first", true, seen.clone())],
        );
        registry.append(
            HookStage::RequestRouted,
            vec![tracking_hook("second", true, seen.clone())],
        );

        let mut response = empty_response(StatusCode::OK);
        let mut request = make_request();
        assert!(registry.run_stage(HookStage::RequestRouted, &mut response, &mut request));
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn hooks_mutate_response_and_request() {
        let mut registry = HookRegistry::new();
        registry.append(
            HookStage::RequestReceived,
            vec![NamedHook::new("annotate", |res: &mut Response, req: &mut Request| {
                req.headers_mut()
                    .append("x-gantry-hooks", "Received".parse().unwrap());
                res.headers_mut()
                    .insert("x-stage", "received".parse().unwrap());
                true
            })],
        );

        let mut response = empty_response(StatusCode::OK);
        let mut request = make_request();
        assert!(registry.run_stage(HookStage::RequestReceived, &mut response, &mut request));
        assert_eq!(request.header("x-gantry-hooks"), Some("Received"));
        assert_eq!(response.headers().get("x-stage").unwrap(), "received");
    }
}
