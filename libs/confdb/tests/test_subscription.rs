//! Subscription and notification integration tests: per-subscriber
//! filtering, callback isolation, pre-change callbacks, internal actions
//! and wrapper-cache coherence hooks.

mod common;

use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use confdb::dal::{self, DalFunctions, TemplateCache};
use confdb::{Change, ConfigAction, SubscriptionCriteria};

const WAIT: Duration = Duration::from_secs(5);
const SETTLE: Duration = Duration::from_millis(300);

fn class_criteria(class: &str) -> SubscriptionCriteria {
    let mut criteria = SubscriptionCriteria::new();
    criteria.add_class(class);
    criteria
}

fn object_criteria(class: &str, id: &str) -> SubscriptionCriteria {
    let mut criteria = SubscriptionCriteria::new();
    criteria.add_object(class, id);
    criteria
}

fn forward(sender: Sender<Vec<Change>>) -> impl Fn(&[Change]) + Send + Sync + 'static {
    move |changes: &[Change]| {
        sender.send(changes.to_vec()).ok();
    }
}

#[test]
fn test_subscriber_filtering() {
    let db = common::setup("sub_filtering");
    let data = common::data_name("sub_filtering");

    let x = db.create(&data, "Dummy", "#X").unwrap();
    db.create(&data, "Dummy", "#Z").unwrap();
    db.commit("seed").unwrap();

    let (to_a, from_a) = channel();
    let (to_b, from_b) = channel();
    db.subscribe(class_criteria("Dummy"), forward(to_a)).unwrap();
    db.subscribe(object_criteria("Dummy", "#X"), forward(to_b))
        .unwrap();

    x.set_val("sint32", 5i32).unwrap();
    db.create(&data, "Dummy", "#Y").unwrap();
    let z = db.get("Dummy", "#Z").unwrap();
    db.destroy(&z).unwrap();
    db.commit("one batch").unwrap();

    // The class subscriber observes the full batch.
    let batch_a = from_a.recv_timeout(WAIT).expect("class subscriber batch");
    assert_eq!(batch_a.len(), 1);
    assert_eq!(batch_a[0].class_name, "Dummy");
    assert_eq!(batch_a[0].created, vec!["#Y"]);
    assert_eq!(batch_a[0].modified, vec!["#X"]);
    assert_eq!(batch_a[0].removed, vec!["#Z"]);

    // The object subscriber observes only its UID, and no creations.
    let batch_b = from_b.recv_timeout(WAIT).expect("object subscriber batch");
    assert_eq!(batch_b.len(), 1);
    assert!(batch_b[0].created.is_empty());
    assert_eq!(batch_b[0].modified, vec!["#X"]);
    assert!(batch_b[0].removed.is_empty());
}

#[test]
fn test_object_subscriber_skips_foreign_batches() {
    let db = common::setup("sub_skip");
    let data = common::data_name("sub_skip");
    let x = db.create(&data, "Dummy", "#X").unwrap();
    let w = db.create(&data, "Dummy", "#W").unwrap();
    db.commit("seed").unwrap();

    let (to_b, from_b) = channel();
    db.subscribe(object_criteria("Dummy", "#X"), forward(to_b))
        .unwrap();

    // A batch touching only unsubscribed objects is not delivered.
    w.set_val("bool", true).unwrap();
    db.commit("foreign change").unwrap();
    assert_eq!(
        from_b.recv_timeout(SETTLE).unwrap_err(),
        RecvTimeoutError::Timeout
    );

    x.set_val("bool", true).unwrap();
    db.commit("subscribed change").unwrap();
    let batch = from_b.recv_timeout(WAIT).expect("subscribed batch");
    assert_eq!(batch[0].modified, vec!["#X"]);
}

#[test]
fn test_callback_isolation() {
    let db = common::setup("sub_isolation");
    let data = common::data_name("sub_isolation");
    let x = db.create(&data, "Dummy", "#X").unwrap();
    db.commit("seed").unwrap();

    let (to_ok, from_ok) = channel();
    db.subscribe(SubscriptionCriteria::new(), |_changes: &[Change]| {
        panic!("deliberately failing callback");
    })
    .unwrap();
    db.subscribe(class_criteria("Dummy"), forward(to_ok)).unwrap();

    x.set_val("bool", true).unwrap();
    db.commit("after panic").unwrap();

    // The panicking subscriber never prevents delivery to the other one.
    let batch = from_ok.recv_timeout(WAIT).expect("surviving subscriber");
    assert_eq!(batch[0].modified, vec!["#X"]);
}

#[test]
fn test_pre_change_callback_runs_before_batch() {
    let db = common::setup("sub_pre");
    let data = common::data_name("sub_pre");
    let x = db.create(&data, "Dummy", "#X").unwrap();
    db.commit("seed").unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let (to_main, from_main) = channel();
    {
        let order = order.clone();
        db.subscribe_pre(move || order.lock().unwrap().push("pre"));
    }
    {
        let order = order.clone();
        db.subscribe(SubscriptionCriteria::new(), move |_changes: &[Change]| {
            order.lock().unwrap().push("notify");
            to_main.send(()).ok();
        })
        .unwrap();
    }

    x.set_val("bool", true).unwrap();
    db.commit("with pre callback").unwrap();
    from_main.recv_timeout(WAIT).expect("notification");
    assert_eq!(order.lock().unwrap().as_slice(), ["pre", "notify"]);
}

#[test]
fn test_unsubscribe_stops_delivery() {
    let db = common::setup("sub_unsub");
    let data = common::data_name("sub_unsub");
    let x = db.create(&data, "Dummy", "#X").unwrap();
    db.commit("seed").unwrap();

    let (to_a, from_a) = channel();
    let id = db.subscribe(class_criteria("Dummy"), forward(to_a)).unwrap();

    x.set_val("bool", true).unwrap();
    db.commit("first").unwrap();
    from_a.recv_timeout(WAIT).expect("first batch");

    db.unsubscribe(id).unwrap();
    x.set_val("bool", false).unwrap();
    db.commit("second").unwrap();
    assert_eq!(
        from_a.recv_timeout(SETTLE).unwrap_err(),
        RecvTimeoutError::Timeout
    );

    assert!(db.unsubscribe(id).is_err());
}

#[test]
fn test_cache_coherence_on_notification() {
    let db = common::setup("sub_coherence");
    let data = common::data_name("sub_coherence");
    let x = db.create(&data, "Dummy", "#X").unwrap();
    x.set_val("string", "before".to_string()).unwrap();
    db.commit("seed").unwrap();

    let (to_a, from_a) = channel();
    db.subscribe(class_criteria("Dummy"), forward(to_a)).unwrap();

    // Write through a second facade sharing the same backing database.
    let writer = confdb::Configuration::new("memory").unwrap();
    writer.load(&data).unwrap();
    let remote_x = writer.get("Dummy", "#X").unwrap();
    remote_x.set_val("string", "after".to_string()).unwrap();
    writer.commit("remote change").unwrap();

    // Our subscriber fired only after coherence invalidated the cache, so
    // the next read observes the new value.
    from_a.recv_timeout(WAIT).expect("remote batch");
    assert_eq!(x.get_val::<String>("string").unwrap(), "after");
}

#[test]
fn test_remote_removal_marks_cached_object_deleted() {
    let db = common::setup("sub_removal");
    let data = common::data_name("sub_removal");
    let x = db.create(&data, "Dummy", "#X").unwrap();
    db.commit("seed").unwrap();

    let (to_a, from_a) = channel();
    db.subscribe(class_criteria("Dummy"), forward(to_a)).unwrap();

    let writer = confdb::Configuration::new("memory").unwrap();
    writer.load(&data).unwrap();
    let remote_x = writer.get("Dummy", "#X").unwrap();
    writer.destroy(&remote_x).unwrap();
    writer.commit("remote removal").unwrap();

    let batch = from_a.recv_timeout(WAIT).expect("removal batch");
    assert_eq!(batch[0].removed, vec!["#X"]);

    // Coherence marked our cached object deleted before the callback ran.
    assert!(x.is_deleted());
    let err = x.get_val::<bool>("bool").unwrap_err();
    assert!(matches!(err, confdb::ConfigError::DeletedObject { .. }));
}

#[test]
fn test_actions_observe_batches() {
    let db = common::setup("sub_actions");
    let data = common::data_name("sub_actions");
    let x = db.create(&data, "Dummy", "#X").unwrap();
    db.commit("seed").unwrap();

    struct Recorder {
        classes: Arc<Mutex<Vec<String>>>,
    }
    impl ConfigAction for Recorder {
        fn notify(&self, changes: &[Change]) {
            let mut classes = self.classes.lock().unwrap();
            classes.extend(changes.iter().map(|c| c.class_name.clone()));
        }
    }

    let seen = Arc::new(Mutex::new(Vec::new()));
    db.add_action(Arc::new(Recorder {
        classes: seen.clone(),
    }));

    let (to_a, from_a) = channel();
    db.subscribe(SubscriptionCriteria::new(), forward(to_a)).unwrap();

    x.set_val("bool", true).unwrap();
    db.commit("observed").unwrap();
    from_a.recv_timeout(WAIT).expect("batch");

    assert_eq!(seen.lock().unwrap().as_slice(), ["Dummy"]);
}

#[test]
fn test_wrapper_cache_update_hooks() {
    let db = common::setup("sub_wrapper");
    let data = common::data_name("sub_wrapper");
    let second = db.create(&data, "Second", "#S").unwrap();
    db.commit("seed").unwrap();

    struct Probe {
        updates: Arc<Mutex<Vec<String>>>,
        renames: Arc<Mutex<Vec<(String, String)>>>,
    }
    impl TemplateCache for Probe {
        fn update(&mut self, change: &Change) {
            self.updates.lock().unwrap().push(change.class_name.clone());
        }
        fn unread(&mut self) {}
        fn rename(&mut self, old_id: &str, new_id: &str) {
            self.renames
                .lock()
                .unwrap()
                .push((old_id.to_string(), new_id.to_string()));
        }
    }

    let updates = Arc::new(Mutex::new(Vec::new()));
    let renames = Arc::new(Mutex::new(Vec::new()));
    {
        let updates = updates.clone();
        let renames = renames.clone();
        dal::register_class(
            "Dummy",
            DalFunctions {
                cache_factory: Arc::new(move || {
                    Box::new(Probe {
                        updates: updates.clone(),
                        renames: renames.clone(),
                    })
                }),
            },
        );
    }
    db.attach_template_cache("Dummy", false).unwrap();

    // A change to the subclass reaches the superclass wrapper cache.
    let (to_a, from_a) = channel();
    db.subscribe(SubscriptionCriteria::new(), forward(to_a)).unwrap();
    second.set_val("bool", true).unwrap();
    db.commit("subclass change").unwrap();
    from_a.recv_timeout(WAIT).expect("batch");
    assert_eq!(updates.lock().unwrap().as_slice(), ["Second"]);

    // A rename relocates wrapper entries through the same registry.
    second.rename("#S2").unwrap();
    assert_eq!(
        renames.lock().unwrap().as_slice(),
        [("#S".to_string(), "#S2".to_string())]
    );
}

#[test]
fn test_unsubscribe_all() {
    let db = common::setup("sub_unsub_all");
    let data = common::data_name("sub_unsub_all");
    let x = db.create(&data, "Dummy", "#X").unwrap();
    db.commit("seed").unwrap();

    let (to_a, from_a) = channel();
    let (to_b, from_b) = channel();
    db.subscribe(class_criteria("Dummy"), forward(to_a)).unwrap();
    db.subscribe(SubscriptionCriteria::new(), forward(to_b)).unwrap();
    db.unsubscribe_all().unwrap();

    x.set_val("bool", true).unwrap();
    db.commit("after unsubscribe").unwrap();
    assert_eq!(
        from_a.recv_timeout(SETTLE).unwrap_err(),
        RecvTimeoutError::Timeout
    );
    assert_eq!(
        from_b.recv_timeout(SETTLE).unwrap_err(),
        RecvTimeoutError::Timeout
    );
}
