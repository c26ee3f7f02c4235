#![forbid(unsafe_code)]

//! Widgets: render wrappers that turn tracked reads into re-renders.

pub mod bind;
pub mod command_view;
pub mod lazy_list;
pub mod scheduler;
pub mod view;
pub mod watch;

pub use bind::{Bind, BoundValue, Selection, Setter};
pub use command_view::{CommandState, CommandView};
pub use lazy_list::LazyList;
pub use scheduler::{RenderScheduler, Rerender, SchedulerConfig, ViewId};
pub use view::{MountPoint, RenderCx, TrackedView};
pub use watch::Watch;
