//! Concurrent readers and writers sharing one tag service.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;

use tempfile::TempDir;

use notetags::{ItemRef, ItemType, RepositoryPaths, TagService};

const WRITER_THREADS: usize = 4;
const ITEMS_PER_WRITER: usize = 50;
const READER_THREADS: usize = 4;

fn set(tags: &[&str]) -> BTreeSet<String> {
    tags.iter().map(|t| t.to_string()).collect()
}

#[test]
fn test_concurrent_reconciles_on_shared_tag() {
    let temp_dir = TempDir::new().unwrap();
    let service = Arc::new(TagService::new(&RepositoryPaths::new(temp_dir.path())));

    let mut handles = Vec::new();
    for w in 0..WRITER_THREADS {
        let service = Arc::clone(&service);
        handles.push(thread::spawn(move || {
            for i in 0..ITEMS_PER_WRITER {
                let item = ItemRef::new(format!("w{}-{}", w, i), ItemType::Note).unwrap();
                let own = format!("writer{}", w);
                service
                    .reconcile(&item, &BTreeSet::new(), &set(&["shared", &own]))
                    .unwrap();
            }
        }));
    }
    for r in 0..READER_THREADS {
        let service = Arc::clone(&service);
        handles.push(thread::spawn(move || {
            for _ in 0..ITEMS_PER_WRITER {
                // Readers must always see a well-formed list
                let members = service.query().item_refs_by_tag("shared").unwrap();
                let unique: BTreeSet<_> = members.iter().collect();
                assert_eq!(unique.len(), members.len(), "reader {} saw duplicates", r);
                service.tag_statistics().unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = service.tag_statistics().unwrap();
    assert_eq!(stats["shared"], WRITER_THREADS * ITEMS_PER_WRITER);
    for w in 0..WRITER_THREADS {
        assert_eq!(stats[&format!("writer{}", w)], ITEMS_PER_WRITER);
    }
}

#[test]
fn test_concurrent_add_and_remove() {
    let temp_dir = TempDir::new().unwrap();
    let service = Arc::new(TagService::new(&RepositoryPaths::new(temp_dir.path())));

    let items: Vec<ItemRef> = (0..40)
        .map(|i| ItemRef::new(format!("n{}", i), ItemType::Note).unwrap())
        .collect();
    for item in &items {
        service.reconcile(item, &BTreeSet::new(), &set(&["busy"])).unwrap();
    }

    // Even-numbered items leave the tag while new items join it
    let mut handles = Vec::new();
    for chunk in items.chunks(10) {
        let service = Arc::clone(&service);
        let chunk = chunk.to_vec();
        handles.push(thread::spawn(move || {
            for item in chunk {
                let n: usize = item.id()[1..].parse().unwrap();
                if n % 2 == 0 {
                    service.reconciler().remove_item(&item, &set(&["busy"])).unwrap();
                }
                let joiner = ItemRef::new(format!("j{}", n), ItemType::Task).unwrap();
                service.reconcile(&joiner, &BTreeSet::new(), &set(&["busy"])).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let members = service.query().item_refs_by_tag("busy").unwrap();
    assert_eq!(members.len(), 20 + 40);
    assert!(members.iter().all(|m| {
        m.kind() == ItemType::Task || m.id()[1..].parse::<usize>().unwrap() % 2 == 1
    }));
}
