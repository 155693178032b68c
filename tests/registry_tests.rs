use std::sync::Arc;
use std::time::Duration;

use upload_tracker::listener::UploadListener;
use upload_tracker::registry::ListenerRegistry;

fn listener(session_id: &str) -> Arc<UploadListener> {
    Arc::new(UploadListener::new(session_id, 100, Duration::ZERO))
}

#[test]
fn test_register_and_lookup() {
    let registry = ListenerRegistry::new();
    assert!(registry.current("s1").is_none());

    let l = listener("s1");
    assert!(registry.register(l.clone()).is_none());

    let found = registry.current("s1").unwrap();
    assert!(Arc::ptr_eq(&found, &l));
    assert!(registry.current("s2").is_none());
}

#[test]
fn test_register_replaces_previous_upload() {
    let registry = ListenerRegistry::new();
    let old = listener("s1");
    let new = listener("s1");

    registry.register(old.clone());
    let replaced = registry.register(new.clone()).unwrap();
    assert!(Arc::ptr_eq(&replaced, &old));

    let found = registry.current("s1").unwrap();
    assert!(Arc::ptr_eq(&found, &new));
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_remove_is_idempotent() {
    let registry = ListenerRegistry::new();
    registry.register(listener("s1"));

    assert!(registry.remove("s1").is_some());
    assert!(registry.current("s1").is_none());
    assert!(registry.remove("s1").is_none());
    assert!(registry.is_empty());
}

#[test]
fn test_remove_if_same_keeps_newer_listener() {
    let registry = ListenerRegistry::new();
    let old = listener("s1");
    let new = listener("s1");
    registry.register(old.clone());
    registry.register(new.clone());

    assert!(!registry.remove_if_same(&old));
    assert!(Arc::ptr_eq(&registry.current("s1").unwrap(), &new));

    assert!(registry.remove_if_same(&new));
    assert!(registry.current("s1").is_none());
}

#[test]
fn test_concurrent_sessions() {
    let registry = Arc::new(ListenerRegistry::new());

    let workers: Vec<_> = (0..8)
        .map(|n| {
            let registry = registry.clone();
            std::thread::spawn(move || {
                let session = format!("session-{}", n);
                for _ in 0..200 {
                    let l = listener(&session);
                    registry.register(l.clone());
                    let found = registry.current(&session).unwrap();
                    // nobody else writes this session
                    assert!(Arc::ptr_eq(&found, &l));
                }
                if n % 2 == 0 {
                    registry.remove(&session);
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(registry.len(), 4);
    assert!(registry.current("session-1").is_some());
    assert!(registry.current("session-0").is_none());
}
