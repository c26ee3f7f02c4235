//! End-to-end tests: view-models in scopes, mounted views, host-driven frames.
//!
//! Each test plays the host: it mounts views, mutates state the way event
//! handlers would, and calls `flush` once per frame.

use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use weft_runtime::reactive::NodeId;
use weft_runtime::{Observable, ObservableNode, ObservableObject, RelayCommand, ScopeRegistry};
use weft_widgets::{Bind, CommandView, MountPoint, RenderScheduler, Selection, TrackedView, Watch};

struct Counter {
    object: ObservableObject,
    count: Observable<i32>,
    step: Observable<i32>,
    increment: RelayCommand,
}

impl Counter {
    fn new() -> Self {
        let object = ObservableObject::labeled("counter");
        let count = object
            .property_labeled("count", 0)
            .expect("fresh object accepts properties");
        let step = object
            .property_labeled("step", 1)
            .expect("fresh object accepts properties");
        let (c, s) = (count.clone(), step.clone());
        let increment = object
            .command(move || c.update(|v| *v += s.get()))
            .expect("fresh object accepts commands");
        Self {
            object,
            count,
            step,
            increment,
        }
    }
}

fn host() -> (MountPoint, Rc<Counter>) {
    let scope = ScopeRegistry::root();
    let counter = Rc::new(Counter::new());
    scope.provide(Rc::clone(&counter)).unwrap();
    (MountPoint::new(RenderScheduler::new(), scope), counter)
}

fn sorted(mut ids: Vec<NodeId>) -> Vec<NodeId> {
    ids.sort();
    ids
}

#[test]
fn burst_of_writes_renders_once_per_frame() {
    let (point, counter) = host();
    let view = Bind::mount(
        &point,
        |c: &Counter| Selection::OneWay(c.count.get()),
        |bound, _| bound.into_value(),
    )
    .unwrap();

    for v in 1..=5 {
        counter.count.set(v);
    }
    assert_eq!(point.scheduler().pending(), 1);
    assert_eq!(point.scheduler().flush(), 1);
    assert_eq!(view.output(), Some(5));
    assert_eq!(view.render_count(), 2);

    // Nothing changed since the last frame.
    assert_eq!(point.scheduler().flush(), 0);
}

#[test]
fn command_invocation_flows_into_bound_view() {
    let (point, counter) = host();
    let label = Bind::mount(
        &point,
        |c: &Counter| Selection::OneWay(format!("count = {}", c.count.get())),
        |bound, _| bound.into_value(),
    )
    .unwrap();
    let button = CommandView::mount(&point, |c: &Counter| c.increment.clone(), |state, _| state)
        .unwrap();

    assert!(button.invoke().unwrap());
    assert!(button.invoke().unwrap());
    point.scheduler().flush();
    assert_eq!(label.output().as_deref(), Some("count = 2"));

    // The command read `step` while executing; that read belongs to no view.
    assert_eq!(label.subscribed_ids(), vec![counter.count.id()]);
    assert_eq!(button.view().subscribed_ids(), Vec::new());
}

#[test]
fn two_way_binding_edits_the_view_model() {
    let (point, counter) = host();
    let editor = Bind::mount(
        &point,
        |c: &Counter| Selection::TwoWay(c.step.clone()),
        |bound, _| bound,
    )
    .unwrap();
    let total = Bind::mount(
        &point,
        |c: &Counter| Selection::OneWay(c.count.get() + c.step.get()),
        |bound, _| bound.into_value(),
    )
    .unwrap();

    let bound = editor.output().unwrap();
    assert_eq!(*bound.value(), 1);
    assert!(bound.set(10));
    assert_eq!(point.scheduler().flush(), 2);
    assert_eq!(total.output(), Some(10));
    assert_eq!(*editor.output().unwrap().value(), 10);

    // Equal value: no notification, no frame.
    assert!(bound.set(10));
    assert_eq!(point.scheduler().pending(), 0);

    counter.increment.execute();
    point.scheduler().flush();
    assert_eq!(total.output(), Some(20));
}

#[test]
fn branch_switch_moves_subscriptions() {
    let (point, _counter) = host();
    let show_a = Observable::new(true);
    let a = Observable::new("a");
    let b = Observable::new("b");
    let (s, ra, rb) = (show_a.clone(), a.clone(), b.clone());
    let view = TrackedView::mount(&point, move |_| if s.get() { ra.get() } else { rb.get() });
    assert_eq!(view.subscribed_ids(), sorted(vec![show_a.id(), a.id()]));

    show_a.set(false);
    point.scheduler().flush();
    assert_eq!(view.output(), Some("b"));
    assert_eq!(view.subscribed_ids(), sorted(vec![show_a.id(), b.id()]));
    let report = view.last_report();
    assert_eq!(report.added, vec![b.id()]);
    assert_eq!(report.removed, vec![a.id()]);
    assert_eq!(report.retained, 1);

    // The dropped branch no longer re-renders the view.
    a.set("A");
    assert_eq!(point.scheduler().pending(), 0);
    assert_eq!(a.listener_count(), 0);
}

#[test]
fn lazy_rows_subscribe_when_the_host_builds_them() {
    let (point, _counter) = host();
    let rows: Rc<Vec<Observable<String>>> = Rc::new(
        ["alpha", "beta", "gamma", "delta"]
            .iter()
            .map(|s| Observable::new((*s).to_string()))
            .collect(),
    );
    let r = Rc::clone(&rows);
    let view = TrackedView::mount(&point, move |cx| {
        let r = Rc::clone(&r);
        cx.lazy_list(r.len(), move |i| r[i].get())
    });
    assert!(view.subscribed_ids().is_empty());

    // The host builds the visible rows after the render returned.
    let list = view.output().unwrap();
    let visible = list.build_range(list.visible(0, 2));
    assert_eq!(visible, vec!["alpha".to_string(), "beta".to_string()]);
    assert_eq!(view.subscribed_ids(), sorted(vec![rows[0].id(), rows[1].id()]));
    assert_eq!(view.deferred().map(|d| d.accessed().len()), Some(2));

    // Off-screen row: no frame. Visible row: one frame.
    rows[3].set("DELTA".to_string());
    assert_eq!(point.scheduler().pending(), 0);
    rows[1].set("BETA".to_string());
    assert_eq!(point.scheduler().flush(), 1);

    // The new render read nothing synchronously; rows subscribe again as they
    // are rebuilt.
    assert!(view.subscribed_ids().is_empty());
    let list = view.output().unwrap();
    assert_eq!(list.build(1).as_deref(), Some("BETA"));
    assert_eq!(view.subscribed_ids(), vec![rows[1].id()]);
}

#[test]
fn failed_render_keeps_last_lazy_rows_live() {
    let (point, _counter) = host();
    let fail = Observable::new(false);
    let row = Observable::new(1);
    let (f, r) = (fail.clone(), row.clone());
    let view = TrackedView::mount(&point, move |cx| {
        assert!(!f.get(), "render failed");
        let r = r.clone();
        cx.lazy_list(1, move |_| r.get())
    });
    let list = view.output().unwrap();

    fail.set(true);
    let frame = panic::catch_unwind(AssertUnwindSafe(|| point.scheduler().flush()));
    assert!(frame.is_err());

    // The host keeps showing the last good list and builds its row.
    assert_eq!(list.build(0), Some(1));
    assert_eq!(view.subscribed_ids(), sorted(vec![fail.id(), row.id()]));
    row.set(2);
    assert_eq!(point.scheduler().pending(), 1);
}

#[test]
fn panicking_view_does_not_starve_the_rest_of_the_frame() {
    let (point, _counter) = host();
    let shared = Observable::new(0);
    let fail = Observable::new(false);
    let (s, f) = (shared.clone(), fail.clone());
    let _bad = TrackedView::mount(&point, move |_| {
        let value = s.get();
        assert!(!f.get(), "render failed");
        value
    });
    let s = shared.clone();
    let good = TrackedView::mount(&point, move |_| s.get());

    fail.set(true);
    shared.set(7);
    let frame = panic::catch_unwind(AssertUnwindSafe(|| point.scheduler().flush()));
    assert!(frame.is_err());
    assert_eq!(point.scheduler().pending(), 1);

    assert_eq!(point.scheduler().flush(), 1);
    assert_eq!(good.output(), Some(7));
}

#[test]
fn nearest_scope_wins_per_mount_point() {
    struct Theme(&'static str);

    let root = ScopeRegistry::root();
    root.provide(Rc::new(Theme("light"))).unwrap();
    let dialog = root.child();
    dialog.provide(Rc::new(Theme("dark"))).unwrap();

    let point = MountPoint::new(RenderScheduler::new(), root);
    let render = |cx: &weft_widgets::RenderCx<'_>| cx.resolve::<Theme>().map(|t| t.0).ok();
    let page = TrackedView::mount(&point, render);
    let modal = TrackedView::mount(&point.with_scope(dialog.clone()), render);
    assert_eq!(page.output().flatten(), Some("light"));
    assert_eq!(modal.output().flatten(), Some("dark"));

    // Removing the override falls back to the parent on the next render.
    assert!(dialog.remove::<Theme>().unwrap());
    modal.rerender();
    assert_eq!(modal.output().flatten(), Some("light"));
}

#[test]
fn watch_and_tracked_views_coexist() {
    let (point, counter) = host();
    let summary = Watch::mount(&point, |c: &Counter| c.object.clone(), {
        let c = Rc::clone(&counter);
        move |_, _| (c.count.get(), c.step.get())
    })
    .unwrap();
    let count_only = Bind::mount(
        &point,
        |c: &Counter| Selection::OneWay(c.count.get()),
        |bound, _| bound.into_value(),
    )
    .unwrap();

    counter.step.set(3);
    assert_eq!(point.scheduler().flush(), 1);
    assert_eq!(summary.output(), Some((0, 3)));
    assert_eq!(count_only.render_count(), 1);

    counter.increment.execute();
    assert_eq!(point.scheduler().flush(), 2);
    assert_eq!(summary.output(), Some((3, 3)));
    assert_eq!(count_only.output(), Some(3));
}

#[test]
fn unmounted_views_survive_view_model_disposal() {
    let (point, counter) = host();
    let view = Bind::mount(
        &point,
        |c: &Counter| Selection::OneWay(c.count.get()),
        |bound, _| bound.into_value(),
    )
    .unwrap();
    view.unmount();
    weft_runtime::Disposable::dispose(&counter.object);
    assert!(counter.count.try_get().is_err());
    assert_eq!(point.scheduler().flush(), 0);
    assert_eq!(view.output(), Some(0));
}

#[cfg(feature = "tracing")]
mod tracing_capture {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tracing::Subscriber;
    use tracing_subscriber::Layer;
    use tracing_subscriber::layer::{Context, SubscriberExt};

    #[derive(Default)]
    struct RenderTraceState {
        render_spans: usize,
        saw_duration_record: bool,
        saw_flush_event: bool,
    }

    struct RenderTraceCapture {
        state: Arc<Mutex<RenderTraceState>>,
    }

    impl<S> Layer<S> for RenderTraceCapture
    where
        S: Subscriber + for<'lookup> tracing_subscriber::registry::LookupSpan<'lookup>,
    {
        fn on_new_span(
            &self,
            attrs: &tracing::span::Attributes<'_>,
            _id: &tracing::Id,
            _ctx: Context<'_, S>,
        ) {
            if attrs.metadata().name() == "weft.render" {
                self.state.lock().expect("render trace lock").render_spans += 1;
            }
        }

        fn on_record(
            &self,
            id: &tracing::Id,
            values: &tracing::span::Record<'_>,
            ctx: Context<'_, S>,
        ) {
            let Some(span) = ctx.span(id) else {
                return;
            };
            if span.metadata().name() != "weft.render" {
                return;
            }
            struct V {
                saw: bool,
            }
            impl tracing::field::Visit for V {
                fn record_u64(&mut self, field: &tracing::field::Field, _value: u64) {
                    if field.name() == "render_duration_us" {
                        self.saw = true;
                    }
                }

                fn record_debug(
                    &mut self,
                    _field: &tracing::field::Field,
                    _value: &dyn std::fmt::Debug,
                ) {
                }
            }
            let mut v = V { saw: false };
            values.record(&mut v);
            if v.saw {
                self.state
                    .lock()
                    .expect("render trace lock")
                    .saw_duration_record = true;
            }
        }

        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            struct Msg {
                message: Option<String>,
            }
            impl tracing::field::Visit for Msg {
                fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
                    if field.name() == "message" {
                        self.message = Some(value.to_string());
                    }
                }

                fn record_debug(
                    &mut self,
                    field: &tracing::field::Field,
                    value: &dyn std::fmt::Debug,
                ) {
                    if field.name() == "message" {
                        self.message = Some(format!("{value:?}").trim_matches('"').to_string());
                    }
                }
            }
            let mut msg = Msg { message: None };
            event.record(&mut msg);
            if msg.message.as_deref() == Some("render flush") {
                self.state.lock().expect("render trace lock").saw_flush_event = true;
            }
        }
    }

    #[test]
    fn render_span_and_flush_event_emitted() {
        let state = Arc::new(Mutex::new(RenderTraceState::default()));
        let subscriber = tracing_subscriber::registry().with(RenderTraceCapture {
            state: Arc::clone(&state),
        });
        let _guard = tracing::subscriber::set_default(subscriber);

        let (point, counter) = host();
        let _view = Bind::mount(
            &point,
            |c: &Counter| Selection::OneWay(c.count.get()),
            |bound, _| bound.into_value(),
        )
        .unwrap();
        counter.count.set(1);
        point.scheduler().flush();

        let snapshot = state.lock().expect("render trace lock");
        assert_eq!(snapshot.render_spans, 2, "expected one weft.render span per render");
        assert!(
            snapshot.saw_duration_record,
            "expected render_duration_us record"
        );
        assert!(snapshot.saw_flush_event, "expected render flush debug event");
    }
}
