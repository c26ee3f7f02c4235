#![forbid(unsafe_code)]

//! Error taxonomy shared by the reactive graph, the tracker, and the locator.
//!
//! Every variant describes a contract violation by the embedding application,
//! not a transient fault. Nothing here is retried; the message says what was
//! expected and how to fix the call site.

use thiserror::Error;

use crate::reactive::tracker::SessionId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error(
        "{target} was used after it was disposed; drop handles to disposed state \
         or recreate it through its owner before reading, writing or subscribing"
    )]
    UseAfterDispose { target: String },

    #[error(
        "{registry} already holds an instance of `{type_name}`; remove the existing \
         entry first or register the new one in a nested scope"
    )]
    DuplicateRegistration {
        type_name: &'static str,
        registry: String,
    },

    #[error(
        "no instance of `{type_name}` is registered (searched {searched} scope(s) and the \
         global registry); register one with `ScopeRegistry::create`, \
         `ScopeRegistry::provide` or `GlobalRegistry::register`"
    )]
    ResolutionNotFound {
        type_name: &'static str,
        searched: usize,
    },

    #[error(
        "tracking session stack corrupted: tried to close {expected} but {}; \
         tracked renders must not suspend or close sessions out of nesting order",
        describe_top(.found)
    )]
    SessionStackCorruption {
        expected: SessionId,
        found: Option<SessionId>,
    },

    #[error(
        "resolver used after construction finished (while resolving `{type_name}`); \
         resolve dependencies inside the constructor passed to `ScopeRegistry::create` \
         and keep the resolved values, not the resolver"
    )]
    ResolverMisuseAfterConstruction { type_name: &'static str },
}

fn describe_top(found: &Option<SessionId>) -> String {
    match found {
        Some(id) => format!("{id} is on top of the stack"),
        None => "the stack is empty".to_string(),
    }
}

impl Error {
    /// Whether this error reports use of disposed state.
    #[must_use]
    pub fn is_use_after_dispose(&self) -> bool {
        matches!(self, Self::UseAfterDispose { .. })
    }

    pub(crate) fn use_after_dispose(target: impl std::fmt::Display) -> Self {
        Self::UseAfterDispose {
            target: target.to_string(),
        }
    }
}
