//! Named, ordered interceptor chains ("middleware") wrapping lifecycle
//! operations.
//!
//! A chain is composed of interceptors registered under a hook name plus a
//! terminal operation (the actual persistence or query call). Composition
//! is an onion: each interceptor receives a continuation ([`Next`])
//! representing the rest of the chain and may skip it (short-circuit),
//! invoke it exactly once and transform the result, or fail before or
//! after it. Errors propagate outward unchanged.
//!
//! Hook names are arbitrary strings. The same composition primitive is
//! reused for the save lifecycle, for every query operation name and for
//! user-defined methods; there is no hook-specific logic here, only
//! hook-specific registration.
//!
//! # Example
//!
//! ```ignore
//! registry.register("save", |ctx, next| Box::pin(async move {
//!     // before: runs on the way in, in registration order
//!     let result = next.run(ctx).await?;
//!     // after: runs on the way out, in reverse order
//!     Ok(result)
//! }));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bson::Bson;
use futures::future::BoxFuture;

use crate::error::OdmResult;

/// The value threaded through a chain and returned by it.
pub type HookResult = OdmResult<Bson>;

/// What flows into each interceptor: the hook name and an untyped payload
/// (the document being saved, the accumulated query state, or whatever the
/// caller of a custom method passed in). Interceptors may rewrite the
/// payload before forwarding it.
#[derive(Debug, Clone)]
pub struct HookContext {
    /// The hook this chain was fired for.
    pub hook: String,
    /// The operation payload.
    pub payload: Bson,
}

impl HookContext {
    /// Creates a context for `hook` carrying `payload`.
    pub fn new(hook: impl Into<String>, payload: Bson) -> Self {
        Self { hook: hook.into(), payload }
    }
}

/// The innermost operation a chain ultimately wraps. Terminals own their
/// captures (collection handles are cloned in), so their futures are
/// `'static`.
pub type Terminal = Box<dyn FnOnce(HookContext) -> BoxFuture<'static, HookResult> + Send>;

/// An interceptor function: receives the context and the continuation.
pub type Interceptor =
    Arc<dyn for<'a> Fn(HookContext, Next<'a>) -> BoxFuture<'a, HookResult> + Send + Sync>;

/// The continuation handed to an interceptor: the rest of the chain,
/// ending in the terminal. Consuming it more than once is impossible by
/// construction.
pub struct Next<'a> {
    chain: &'a [Interceptor],
    terminal: Terminal,
}

impl<'a> Next<'a> {
    /// Invokes the rest of the chain with `ctx`.
    pub fn run(self, ctx: HookContext) -> BoxFuture<'a, HookResult> {
        match self.chain.split_first() {
            Some((head, rest)) => head(ctx, Next { chain: rest, terminal: self.terminal }),
            None => (self.terminal)(ctx),
        }
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &self.chain.len())
            .finish()
    }
}

/// Mapping from hook name to its ordered interceptor list.
///
/// Populated by schema configuration calls, read whenever a hook fires,
/// never mutated during a fire. Interceptors run in registration order on
/// the way in and in reverse order on the way out; the last-registered
/// interceptor is the innermost one.
#[derive(Default, Clone)]
pub struct MiddlewareRegistry {
    hooks: HashMap<String, Vec<Interceptor>>,
}

impl MiddlewareRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `interceptor` to the chain registered under `hook`.
    pub fn register<F>(&mut self, hook: impl Into<String>, interceptor: F)
    where
        F: for<'a> Fn(HookContext, Next<'a>) -> BoxFuture<'a, HookResult>
            + Send
            + Sync
            + 'static,
    {
        self.hooks
            .entry(hook.into())
            .or_default()
            .push(Arc::new(interceptor));
    }

    /// Returns the interceptors registered under `hook`, outermost first.
    pub fn interceptors(&self, hook: &str) -> &[Interceptor] {
        self.hooks.get(hook).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Fires `hook`: composes its interceptors around `terminal` and runs
    /// the resulting chain with `payload`. A hook with no registered
    /// interceptors invokes the terminal directly.
    pub async fn dispatch(&self, hook: &str, payload: Bson, terminal: Terminal) -> HookResult {
        let ctx = HookContext::new(hook, payload);
        let chain = self.interceptors(hook);
        Next { chain, terminal }.run(ctx).await
    }
}

impl fmt::Debug for MiddlewareRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_map();
        for (hook, chain) in &self.hooks {
            dbg.entry(hook, &chain.len());
        }
        dbg.finish()
    }
}
