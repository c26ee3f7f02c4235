#![forbid(unsafe_code)]

//! Runtime: observable state, dependency tracking, commands, and scoped
//! service location.

pub mod command;
pub mod error;
pub mod locator;
#[cfg(feature = "tracing-json")]
pub mod logging;
pub mod reactive;

pub use command::{AsyncRelayCommand, Command, RelayCommand, RelayCommandWith};
pub use error::{Error, Result};
pub use locator::{DisposalOrder, GlobalRegistry, Resolver, ScopeConfig, ScopeRegistry};
pub use reactive::{
    Computed, Disposable, Equality, Observable, ObservableNode, ObservableObject, Subscription,
};
