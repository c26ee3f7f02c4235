#![forbid(unsafe_code)]

//! Weft public facade crate.
//!
//! This crate provides the stable, ergonomic surface area for users.

pub use weft_runtime::{Error, Result};

pub mod prelude {
    pub use weft_runtime as runtime;
    pub use weft_widgets as widgets;

    pub use weft_runtime::{
        AsyncRelayCommand, Command, Computed, Disposable, Equality, Observable, ObservableNode,
        ObservableObject, RelayCommand, RelayCommandWith, ScopeRegistry,
    };
    pub use weft_widgets::{
        Bind, CommandView, LazyList, MountPoint, RenderScheduler, Selection, TrackedView, Watch,
    };
}
