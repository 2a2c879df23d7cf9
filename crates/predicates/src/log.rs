use metrics::counter;
use sieve_core::Event;
use tracing::debug;

use crate::Predicate;

pub(crate) fn admit_logged(inner: &Predicate, log_ignored: bool, event: &Event<'_>) -> bool {
    let decision = inner.admit(event);
    let kind = event.kind();
    let obj = event.object();
    let obj_name = obj.name.as_deref().unwrap_or("");
    let obj_ns = obj.namespace.as_deref().unwrap_or("");
    if decision {
        debug!(target: "sieve::event_filter", event = %kind, name = obj_name, namespace = obj_ns, "Event accepted");
    } else if log_ignored {
        debug!(target: "sieve::event_filter", event = %kind, name = obj_name, namespace = obj_ns, "Event ignored");
    }
    counter!("sieve_events_total", 1u64, "kind" => kind.as_str(), "decision" => if decision { "accepted" } else { "ignored" });
    decision
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    use crate::Predicate;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().expect("lock").extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> { Ok(()) }
    }

    fn obj() -> ObjectMeta {
        ObjectMeta { name: Some("baz".into()), namespace: Some("biz".into()), ..Default::default() }
    }

    fn with_capture(f: impl FnOnce()) -> String {
        let cap = Capture::default();
        let writer = cap.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = cap.0.lock().expect("lock").clone();
        String::from_utf8(bytes).expect("utf8")
    }

    #[test]
    fn inner_is_evaluated_once_and_decision_kept() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let p = Predicate::object(move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
            false
        })
        .logged(true);
        let o = obj();
        assert!(!p.create(&o));
        assert!(!p.update(&o, &o));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn accepted_events_are_logged_with_identity() {
        let o = obj();
        let out = with_capture(|| {
            assert!(Predicate::Const(true).logged(false).delete(&o));
        });
        assert!(out.contains("Event accepted"), "{}", out);
        assert!(out.contains("event=DELETE"), "{}", out);
        assert!(out.contains("name=\"baz\""), "{}", out);
        assert!(out.contains("namespace=\"biz\""), "{}", out);
    }

    #[test]
    fn ignored_events_only_logged_on_request() {
        let o = obj();
        let quiet = with_capture(|| {
            assert!(!Predicate::Const(false).logged(false).generic(&o));
        });
        assert!(quiet.is_empty(), "{}", quiet);
        let loud = with_capture(|| {
            assert!(!Predicate::Const(false).logged(true).generic(&o));
        });
        assert!(loud.contains("Event ignored"), "{}", loud);
        assert!(loud.contains("event=GENERIC"), "{}", loud);
    }
}
