//! Path-based dispatch of inbound messages.
//!
//! Handlers register with a [`PathFilter`]. Every message is offered to a
//! snapshot of the registrations, so a handler may register or unregister
//! handlers (itself included) while being dispatched to. One handler failing
//! or panicking never prevents the others from running.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use sense_types::{paths, Message};

use crate::error::HandlerError;
use crate::locks;

/// Something that reacts to inbound messages.
pub trait MessageHandler: Send + Sync {
    /// Handle one message. Errors are logged by the router.
    fn handle(&self, message: &Message) -> Result<(), HandlerError>;

    /// Extra per-handler gate, checked after the registration's filter.
    fn should_handle(&self, _path: &str) -> bool {
        true
    }
}

impl<F> MessageHandler for F
where
    F: Fn(&Message) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        self(message)
    }
}

/// Shared handle to a registered handler. Identity is the allocation.
pub type HandlerRef = Arc<dyn MessageHandler>;

/// Wrap a closure as a [`HandlerRef`].
pub fn handler_fn<F>(f: F) -> HandlerRef
where
    F: Fn(&Message) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Which paths a registration receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathFilter {
    /// Every path.
    Any,
    /// Only the listed paths. A list containing [`paths::ANY`] matches everything.
    Paths(Vec<String>),
}

impl PathFilter {
    /// Filter for a single path.
    pub fn path(path: &str) -> Self {
        Self::Paths(vec![path.to_string()])
    }

    /// Filter for several paths.
    pub fn paths<'a>(paths: impl IntoIterator<Item = &'a str>) -> Self {
        Self::Paths(paths.into_iter().map(str::to_string).collect())
    }

    /// Whether a message on `path` passes this filter.
    pub fn matches(&self, path: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Paths(list) => list.iter().any(|p| p == paths::ANY || p == path),
        }
    }
}

#[derive(Clone)]
struct Registration {
    handler: HandlerRef,
    filter: PathFilter,
}

/// Dispatches messages to registered handlers.
#[derive(Default)]
pub struct MessageRouter {
    registrations: RwLock<Vec<Registration>>,
}

impl MessageRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler.
    ///
    /// Returns `false` if this exact handler is already registered; the
    /// existing registration is left as it is.
    pub fn register(&self, handler: HandlerRef, filter: PathFilter) -> bool {
        let mut registrations = locks::write(&self.registrations);
        if registrations
            .iter()
            .any(|r| Arc::ptr_eq(&r.handler, &handler))
        {
            return false;
        }
        registrations.push(Registration { handler, filter });
        true
    }

    /// Remove a handler. Returns `false` if it was not registered.
    pub fn unregister(&self, handler: &HandlerRef) -> bool {
        let mut registrations = locks::write(&self.registrations);
        let before = registrations.len();
        registrations.retain(|r| !Arc::ptr_eq(&r.handler, handler));
        registrations.len() != before
    }

    /// Whether this exact handler is registered.
    pub fn is_registered(&self, handler: &HandlerRef) -> bool {
        locks::read(&self.registrations)
            .iter()
            .any(|r| Arc::ptr_eq(&r.handler, handler))
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        locks::read(&self.registrations).len()
    }

    /// Check if nothing is registered.
    pub fn is_empty(&self) -> bool {
        locks::read(&self.registrations).is_empty()
    }

    /// Drop every registration.
    pub fn clear(&self) {
        locks::write(&self.registrations).clear();
    }

    /// Offer `message` to every matching handler.
    ///
    /// Returns how many handlers matched (including ones that failed).
    pub fn dispatch(&self, message: &Message) -> usize {
        let snapshot = locks::read(&self.registrations).clone();
        let mut matched = 0;

        for registration in snapshot {
            if !registration.filter.matches(&message.path)
                || !registration.handler.should_handle(&message.path)
            {
                continue;
            }
            matched += 1;

            let handler = &registration.handler;
            match catch_unwind(AssertUnwindSafe(|| handler.handle(message))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(
                        "Handler failed for {} from {}: {}",
                        message.path,
                        message.source,
                        e
                    );
                }
                Err(panic) => {
                    tracing::warn!(
                        "Handler panicked for {} from {}: {}",
                        message.path,
                        message.source,
                        panic_message(panic.as_ref())
                    );
                }
            }
        }

        if matched == 0 {
            tracing::warn!(
                "No handler for {} from {} ({} bytes dropped)",
                message.path,
                message.source,
                message.payload.len()
            );
        } else {
            tracing::trace!("Dispatched {} to {} handler(s)", message.path, matched);
        }
        matched
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
