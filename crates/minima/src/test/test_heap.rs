// Heap and dict internals: refcounts, free-list reuse, open addressing
// with tombstones, KvRef entry stability.

use crate::heap::{Heap, HeapData};
use crate::value::value::Value;

#[test]
fn test_retain_release_frees_at_zero() {
    let mut heap = Heap::new();
    let v = heap.alloc_str("hello");
    assert_eq!(heap.stats().live_objects, 1);

    heap.retain(v);
    heap.release(v);
    assert_eq!(heap.stats().live_objects, 1);

    heap.release(v);
    assert_eq!(heap.stats().live_objects, 0);
    assert_eq!(heap.stats().bytes_live, 0);

    // Stale ids read as dead, not as garbage.
    let Value::Str(id) = v else { unreachable!() };
    assert_eq!(heap.str_value(id), None);
}

#[test]
fn test_slot_reuse_from_free_list() {
    let mut heap = Heap::new();
    let a = heap.alloc_str("a");
    let Value::Str(a_id) = a else { unreachable!() };
    heap.release(a);

    let b = heap.alloc_str("b");
    let Value::Str(b_id) = b else { unreachable!() };
    assert_eq!(a_id, b_id);
    assert_eq!(heap.str_value(b_id), Some("b"));
}

#[test]
fn test_container_release_cascades() {
    let mut heap = Heap::new();
    let s = heap.alloc_str("payload");
    let list = heap.alloc_list(vec![s]);
    // The list took over the string's count.
    heap.release(list);
    assert_eq!(heap.stats().live_objects, 0);
    assert_eq!(heap.stats().bytes_live, 0);
}

#[test]
fn test_assign_releases_old_value() {
    let mut heap = Heap::new();
    let a = heap.alloc_str("a");
    let b = heap.alloc_str("b");

    let mut slot = Value::Void;
    heap.assign(&mut slot, a);
    heap.release(a);
    heap.assign(&mut slot, b);
    heap.release(b);

    // `a` died on overwrite; `b` lives in the slot.
    assert_eq!(heap.stats().live_objects, 1);
    heap.assign(&mut slot, Value::Void);
    assert_eq!(heap.stats().live_objects, 0);
}

#[test]
fn test_dict_set_get_and_replace() {
    let mut heap = Heap::new();
    let d = heap.alloc_dict();
    let Value::Dict(id) = d else { unreachable!() };

    let k = heap.alloc_str("key");
    assert!(heap.dict_set(id, k, Value::Int(1)));
    heap.release(k);

    let probe = heap.alloc_str("key");
    assert!(matches!(heap.dict_get(id, probe), Some(Value::Int(1))));

    // Replace keeps a single live entry.
    assert!(heap.dict_set(id, probe, Value::Int(2)));
    assert!(matches!(heap.dict_get(id, probe), Some(Value::Int(2))));
    assert_eq!(heap.dict(id).map(|d| d.len()), Some(1));
    heap.release(probe);
}

#[test]
fn test_dict_numeric_keys_compare_promoted() {
    let mut heap = Heap::new();
    let d = heap.alloc_dict();
    let Value::Dict(id) = d else { unreachable!() };

    heap.dict_set(id, Value::Int(1), Value::Int(10));
    assert!(matches!(heap.dict_get(id, Value::Float(1.0)), Some(Value::Int(10))));
}

#[test]
fn test_dict_remove_leaves_tombstone_and_reuses_it() {
    let mut heap = Heap::new();
    let d = heap.alloc_dict();
    let Value::Dict(id) = d else { unreachable!() };

    for i in 0..4 {
        heap.dict_set(id, Value::Int(i), Value::Int(i * 10));
    }
    assert!(heap.dict_remove(id, Value::Int(2)));
    assert_eq!(heap.dict(id).map(|d| d.len()), Some(3));
    assert!(heap.dict_get(id, Value::Int(2)).is_none());
    assert!(!heap.dict_remove(id, Value::Int(2)));

    // Re-inserting finds the tombstone again; the other entries survive.
    heap.dict_set(id, Value::Int(2), Value::Int(99));
    assert_eq!(heap.dict(id).map(|d| d.len()), Some(4));
    assert!(matches!(heap.dict_get(id, Value::Int(0)), Some(Value::Int(0))));
    assert!(matches!(heap.dict_get(id, Value::Int(2)), Some(Value::Int(99))));
}

#[test]
fn test_dict_growth_preserves_entries() {
    let mut heap = Heap::new();
    let d = heap.alloc_dict();
    let Value::Dict(id) = d else { unreachable!() };

    for i in 0..100 {
        heap.dict_set(id, Value::Int(i), Value::Int(i + 1000));
    }
    assert_eq!(heap.dict(id).map(|d| d.len()), Some(100));
    for i in 0..100 {
        match heap.dict_get(id, Value::Int(i)) {
            Some(Value::Int(v)) => assert_eq!(v, i + 1000),
            other => panic!("missing key {i}: {other:?}"),
        }
    }
}

#[test]
fn test_kvref_reads_live_entry_sides() {
    let mut heap = Heap::new();
    let d = heap.alloc_dict();
    let Value::Dict(id) = d else { unreachable!() };

    let k = heap.alloc_str("name");
    heap.dict_set(id, k, Value::Int(7));
    heap.release(k);

    let dict = heap.dict(id).expect("dict is live");
    let entry = dict.next_live(0).expect("one live entry");

    let key = heap.kvref_index(id, entry as u32, 0);
    let value = heap.kvref_index(id, entry as u32, 1);
    match key {
        Some(Value::Str(sid)) => assert_eq!(heap.str_value(sid), Some("name")),
        other => panic!("expected string key, got {other:?}"),
    }
    assert!(matches!(value, Some(Value::Int(7))));
    assert!(heap.kvref_index(id, entry as u32, 2).is_none());
}

#[test]
fn test_kvref_dead_entry_reads_none() {
    let mut heap = Heap::new();
    let d = heap.alloc_dict();
    let Value::Dict(id) = d else { unreachable!() };

    heap.dict_set(id, Value::Int(1), Value::Int(2));
    let entry = heap.dict(id).and_then(|d| d.next_live(0)).expect("live entry");
    assert!(heap.dict_remove(id, Value::Int(1)));
    assert!(heap.kvref_index(id, entry as u32, 0).is_none());
}

#[test]
fn test_dict_releases_keys_and_values() {
    let mut heap = Heap::new();
    let d = heap.alloc_dict();
    let Value::Dict(id) = d else { unreachable!() };

    let k = heap.alloc_str("k");
    let v = heap.alloc_str("v");
    heap.dict_set(id, k, v);
    heap.release(k);
    heap.release(v);

    heap.release(d);
    assert_eq!(heap.stats().live_objects, 0);
    assert_eq!(heap.stats().bytes_live, 0);
}

#[test]
fn test_heap_data_alloc_kinds() {
    let mut heap = Heap::new();
    let p = heap.alloc_pair([Value::Int(1), Value::Bool(true)]);
    let Value::Pair(id) = p else { unreachable!() };
    assert!(matches!(heap.pair(id), Some([Value::Int(1), Value::Bool(true)])));

    let l = heap.alloc(HeapData::List(vec![Value::Int(5)]));
    assert_eq!(heap.list(l).map(|v| v.len()), Some(1));
}
