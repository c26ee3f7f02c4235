#![forbid(unsafe_code)]

//! Virtualized list whose items are built on demand.
//!
//! The host decides which rows are visible and calls [`LazyList::build`] for
//! each of them, typically after the enclosing view's render has returned.
//! Items are built under the render position captured when the list was
//! created, so whatever an item reads is reported to the enclosing view's
//! deferred session and subscribed as it happens.

use std::fmt;
use std::ops::Range;
use std::rc::Rc;

use weft_runtime::reactive::RenderPosition;

/// A list of `len` rows built lazily by an item builder.
///
/// Cloning shares the builder and the captured position.
pub struct LazyList<O> {
    len: usize,
    position: Option<RenderPosition>,
    builder: Rc<dyn Fn(usize) -> O>,
}

impl<O> Clone for LazyList<O> {
    fn clone(&self) -> Self {
        Self {
            len: self.len,
            position: self.position.clone(),
            builder: Rc::clone(&self.builder),
        }
    }
}

impl<O> LazyList<O> {
    /// Capture the render position entered on this thread, if any.
    ///
    /// Outside a render the list still builds items, but nothing observes
    /// their reads.
    pub fn new(len: usize, builder: impl Fn(usize) -> O + 'static) -> Self {
        Self {
            len,
            position: RenderPosition::current(),
            builder: Rc::new(builder),
        }
    }

    /// Bind to an explicit position.
    pub fn at(
        position: RenderPosition,
        len: usize,
        builder: impl Fn(usize) -> O + 'static,
    ) -> Self {
        Self {
            len,
            position: Some(position),
            builder: Rc::new(builder),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn position(&self) -> Option<&RenderPosition> {
        self.position.as_ref()
    }

    /// Build row `index`. `None` past the end.
    pub fn build(&self, index: usize) -> Option<O> {
        if index >= self.len {
            return None;
        }
        Some(match &self.position {
            Some(position) => position.enter(|| (self.builder)(index)),
            None => (self.builder)(index),
        })
    }

    /// Build every row in `range` that exists.
    pub fn build_range(&self, range: Range<usize>) -> Vec<O> {
        let end = range.end.min(self.len);
        let start = range.start.min(end);
        (start..end).filter_map(|i| self.build(i)).collect()
    }

    /// Rows intersecting a viewport of `viewport` rows scrolled to `offset`.
    #[must_use]
    pub fn visible(&self, offset: usize, viewport: usize) -> Range<usize> {
        let start = offset.min(self.len);
        let end = offset.saturating_add(viewport).min(self.len);
        start..end
    }
}

impl<O> fmt::Debug for LazyList<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyList")
            .field("len", &self.len)
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}
