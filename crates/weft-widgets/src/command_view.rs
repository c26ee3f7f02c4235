#![forbid(unsafe_code)]

//! Command presentation.
//!
//! A [`CommandView`] picks one command off a view-model and renders its
//! state. The command's predicate is not tracked; the view listens on the
//! command's can-execute-changed channel instead and re-renders whenever the
//! command raises it (explicitly, or when an async run starts or ends).

use std::fmt;
use std::future::Future;

use weft_runtime::{AsyncRelayCommand, Command, RelayCommand, Result};

use crate::view::{MountPoint, RenderCx, TrackedView};

/// Command state handed to the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandState {
    pub can_execute: bool,
    pub is_executing: bool,
}

impl CommandState {
    /// Snapshot of `command`.
    pub fn of(command: &impl Command) -> Self {
        Self {
            can_execute: command.can_execute(),
            is_executing: command.is_executing(),
        }
    }
}

/// A mounted view over one command.
pub struct CommandView<C, O> {
    command: C,
    view: TrackedView<O>,
}

impl<C, O> CommandView<C, O>
where
    C: Command + Clone + 'static,
    O: 'static,
{
    /// Resolve `V` from `point`'s scope, select its command, and mount.
    ///
    /// # Errors
    ///
    /// Resolution errors for `V`, or
    /// [`Error::UseAfterDispose`](weft_runtime::Error::UseAfterDispose) if
    /// the selected command was already disposed.
    pub fn mount<V: 'static>(
        point: &MountPoint,
        selector: impl FnOnce(&V) -> C,
        builder: impl Fn(CommandState, &RenderCx<'_>) -> O + 'static,
    ) -> Result<Self> {
        let vm = point.scope().resolve::<V>()?;
        let command = selector(&*vm);
        let rendered = command.clone();
        let view = TrackedView::mount(point, move |cx| builder(CommandState::of(&rendered), cx));
        let subscription = command.channel().add_listener(view.scheduler_callback());
        match subscription {
            Ok(subscription) => view.hold(subscription),
            Err(err) => {
                view.unmount();
                return Err(err);
            }
        }
        Ok(Self { command, view })
    }

    #[must_use]
    pub fn command(&self) -> &C {
        &self.command
    }

    #[must_use]
    pub fn view(&self) -> &TrackedView<O> {
        &self.view
    }

    /// Current command state, read directly.
    #[must_use]
    pub fn state(&self) -> CommandState {
        CommandState::of(&self.command)
    }

    pub fn unmount(&self) {
        self.view.unmount();
    }
}

impl<C, O: Clone + 'static> CommandView<C, O> {
    #[must_use]
    pub fn output(&self) -> Option<O> {
        self.view.output()
    }
}

impl<O> CommandView<RelayCommand, O> {
    /// Execute the command. Returns whether the action ran.
    ///
    /// # Errors
    ///
    /// [`Error::UseAfterDispose`](weft_runtime::Error::UseAfterDispose) if the
    /// command was disposed after mounting.
    pub fn invoke(&self) -> Result<bool> {
        self.command.try_execute()
    }
}

impl<O> CommandView<AsyncRelayCommand, O> {
    /// Start a run. `None` if the command cannot execute right now.
    ///
    /// # Errors
    ///
    /// [`Error::UseAfterDispose`](weft_runtime::Error::UseAfterDispose) if the
    /// command was disposed after mounting.
    pub fn invoke(&self) -> Result<Option<impl Future<Output = ()> + 'static>> {
        self.command.try_execute()
    }
}

impl<C: fmt::Debug, O> fmt::Debug for CommandView<C, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandView")
            .field("command", &self.command)
            .field("view", &self.view)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::RenderScheduler;
    use std::cell::Cell;
    use std::pin::pin;
    use std::rc::Rc;
    use std::task::{Context, Poll, Waker};
    use weft_runtime::{Observable, ScopeRegistry};

    struct Editor {
        dirty: Rc<Cell<bool>>,
        save: RelayCommand,
        upload: AsyncRelayCommand,
        title: Observable<String>,
    }

    fn point_with_editor() -> (MountPoint, Rc<Editor>) {
        let dirty = Rc::new(Cell::new(false));
        let d = Rc::clone(&dirty);
        let save = RelayCommand::labeled("save", || {}).with_predicate(move || d.get());
        let editor = Rc::new(Editor {
            dirty,
            save,
            upload: AsyncRelayCommand::new(|| async {}),
            title: Observable::new("draft".to_string()),
        });
        let scope = ScopeRegistry::root();
        scope.provide(Rc::clone(&editor)).unwrap();
        (MountPoint::new(RenderScheduler::new(), scope), editor)
    }

    #[test]
    fn renders_on_can_execute_changed() {
        let (point, editor) = point_with_editor();
        let view =
            CommandView::mount(&point, |e: &Editor| e.save.clone(), |state, _| state).unwrap();
        assert_eq!(view.output().map(|s| s.can_execute), Some(false));

        // Predicate inputs are not observed.
        editor.dirty.set(true);
        assert_eq!(point.scheduler().pending(), 0);

        editor.save.notify_can_execute_changed();
        assert_eq!(point.scheduler().flush(), 1);
        assert_eq!(view.output().map(|s| s.can_execute), Some(true));
        assert!(view.invoke().unwrap());
        assert_eq!(editor.save.execution_count(), 1);
    }

    #[test]
    fn builder_reads_are_tracked_too() {
        let (point, editor) = point_with_editor();
        let e = Rc::clone(&editor);
        let view = CommandView::mount(
            &point,
            |e: &Editor| e.save.clone(),
            move |state, _| format!("{} {}", e.title.get(), state.can_execute),
        )
        .unwrap();
        editor.title.set("final".to_string());
        point.scheduler().flush();
        assert_eq!(view.output().as_deref(), Some("final false"));
    }

    #[test]
    fn async_run_toggles_executing() {
        let (point, _editor) = point_with_editor();
        let view =
            CommandView::mount(&point, |e: &Editor| e.upload.clone(), |state, _| state).unwrap();

        let run = view.invoke().unwrap().expect("idle command runs");
        point.scheduler().flush();
        assert_eq!(
            view.output(),
            Some(CommandState {
                can_execute: false,
                is_executing: true
            })
        );

        let mut run = pin!(run);
        let mut cx = Context::from_waker(Waker::noop());
        assert_eq!(run.as_mut().poll(&mut cx), Poll::Ready(()));
        point.scheduler().flush();
        assert_eq!(
            view.output(),
            Some(CommandState {
                can_execute: true,
                is_executing: false
            })
        );
    }

    #[test]
    fn disposed_command_fails_mount() {
        let (point, editor) = point_with_editor();
        weft_runtime::Disposable::dispose(&editor.save);
        let err = CommandView::mount(&point, |e: &Editor| e.save.clone(), |state, _| state)
            .unwrap_err();
        assert!(err.is_use_after_dispose());
    }
}
