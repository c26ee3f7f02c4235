#![forbid(unsafe_code)]

//! Whole-object observation.
//!
//! [`Watch`] is the coarse binding mode: instead of tracking individual
//! reads, the view listens on an [`ObservableObject`]'s own node, which fires
//! whenever any property or computed the object owns directly changes. The
//! render itself runs untracked, so only object-level changes re-render it.

use weft_runtime::reactive::untracked;
use weft_runtime::{ObservableNode, ObservableObject, Result};

use crate::view::{MountPoint, RenderCx, TrackedView};

/// Mounts object-level views.
#[derive(Debug, Clone, Copy, Default)]
pub struct Watch;

impl Watch {
    /// Resolve `V`, select one of its objects, and mount `render` over it.
    ///
    /// # Errors
    ///
    /// Resolution errors for `V`, or
    /// [`Error::UseAfterDispose`](weft_runtime::Error::UseAfterDispose) if the
    /// selected object was already disposed.
    pub fn mount<V, O>(
        point: &MountPoint,
        select_object: impl FnOnce(&V) -> ObservableObject,
        render: impl Fn(&ObservableObject, &RenderCx<'_>) -> O + 'static,
    ) -> Result<TrackedView<O>>
    where
        V: 'static,
        O: 'static,
    {
        let vm = point.scope().resolve::<V>()?;
        let object = select_object(&*vm);
        Self::mount_object(point, object, render)
    }

    /// Mount `render` over `object` directly.
    ///
    /// # Errors
    ///
    /// [`Error::UseAfterDispose`](weft_runtime::Error::UseAfterDispose) if
    /// `object` was already disposed.
    pub fn mount_object<O: 'static>(
        point: &MountPoint,
        object: ObservableObject,
        render: impl Fn(&ObservableObject, &RenderCx<'_>) -> O + 'static,
    ) -> Result<TrackedView<O>> {
        let watched = object.clone();
        let view = TrackedView::mount(point, move |cx| untracked(|| render(&watched, cx)));
        match object.add_listener(view.scheduler_callback()) {
            Ok(subscription) => {
                view.hold(subscription);
                Ok(view)
            }
            Err(err) => {
                view.unmount();
                Err(err)
            }
        }
    }
}
