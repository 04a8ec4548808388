//! Strategy predicates and lock allocation under concurrency.

mod common;

use affinity_core::*;
use common::{inventory, layout};
use crossbeam_utils::thread;
use std::collections::HashSet;
use std::sync::{Arc, Barrier};

#[test]
fn test_strategy_correctness() {
    for desc in ["1/4/2", "4/8/2", "1/4/1", "8/1/1"] {
        let layout = layout(desc);
        for i in 0..layout.cpus() {
            for j in 0..layout.cpus() {
                if i == j {
                    continue;
                }
                let same_socket = layout.socket_id(i) == layout.socket_id(j);
                let same_core = layout.core_id(i) == layout.core_id(j);
                assert_eq!(AffinityStrategy::SameCore.matches(&layout, i, j), same_socket && same_core, "{desc} {i} {j}");
                assert_eq!(AffinityStrategy::SameSocket.matches(&layout, i, j), same_socket && !same_core, "{desc} {i} {j}");
                assert_eq!(AffinityStrategy::DifferentCore.matches(&layout, i, j), !same_core, "{desc} {i} {j}");
                assert_eq!(AffinityStrategy::DifferentSocket.matches(&layout, i, j), !same_socket, "{desc} {i} {j}");
                assert!(AffinityStrategy::Any.matches(&layout, i, j));
            }
        }
    }
}

#[test]
fn test_concurrent_acquire_is_exclusive() {
    let (inventory, _) = inventory("2/4/2");
    let reservable = inventory.locks().iter().filter(|l| l.is_reservable()).count();
    assert_eq!(reservable, 15);

    let barrier = Barrier::new(reservable);
    let cpus: Vec<i32> = thread::scope(|s| {
        let handles: Vec<_> = (0..reservable)
            .map(|_| {
                let inventory = &inventory;
                let barrier = &barrier;
                s.spawn(move |_| {
                    barrier.wait();
                    let lock = inventory.acquire_lock(true, &[AffinityStrategy::Any], &[]);
                    // Hold until everyone has acquired, so no lock is reaped early.
                    barrier.wait();
                    lock.cpu_id()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
    .unwrap();

    let distinct: HashSet<i32> = cpus.iter().copied().collect();
    assert_eq!(distinct.len(), reservable);
    assert!(cpus.iter().all(|&cpu| cpu > 0));
}

#[test]
fn test_release_then_reacquire_reuses_cpu() {
    let (inventory, _) = inventory("1/4/1");
    let inventory = Arc::new(inventory);
    let held: Vec<i32> = (0..3)
        .map(|_| inventory.acquire_lock(false, &[AffinityStrategy::Any], &[]).cpu_id())
        .collect();
    assert_eq!(held, vec![3, 2, 1]);
    assert!(!inventory.acquire_lock(false, &[AffinityStrategy::Any], &[]).is_allocated());

    inventory.release_lock(2).unwrap();
    assert_eq!(inventory.acquire_lock(false, &[AffinityStrategy::Any], &[]).cpu_id(), 2);

    inventory.release();
    inventory.release();
    assert_eq!(inventory.acquire_lock(false, &[AffinityStrategy::Any], &[]).cpu_id(), 3);
    inventory.release();
}

#[test]
fn test_foreign_release_is_an_error() {
    let (inventory, _) = inventory("1/4/1");
    let lock = inventory.acquire_lock(false, &[AffinityStrategy::Any], &[]);
    thread::scope(|s| {
        s.spawn(|_| {
            assert_eq!(
                inventory.release_lock(lock.cpu_id()),
                Err(LockError::NotHeld { cpu: lock.cpu_id() })
            );
        });
    })
    .unwrap();
    assert_eq!(inventory.release_lock(lock.cpu_id()), Ok(()));
}

#[test]
fn test_different_socket_spreads_workers() {
    let (inventory, _) = inventory("2/2/1");
    let first = inventory.acquire_lock(false, &[AffinityStrategy::Any], &[]);
    let second = inventory.acquire_lock(false, &[AffinityStrategy::DifferentSocket], &[first.cpu_id()]);
    let layout = inventory.layout();
    assert_ne!(
        layout.socket_id(first.cpu_id() as usize),
        layout.socket_id(second.cpu_id() as usize)
    );
    inventory.release();
}

#[test]
fn test_acquire_core_then_bind_whole_core() {
    let (inventory, backend) = inventory("1/4/2");
    let lock = inventory.acquire_core(true, &[AffinityStrategy::Any], &[]);
    assert!(lock.is_whole_core());
    assert_eq!(backend.current_cpu_id(), lock.cpu_id());

    inventory.bind_whole_core(lock.cpu_id());
    let layout = inventory.layout();
    let core = layout.physical_core(lock.cpu_id() as usize);
    for l in inventory.locks() {
        let cpu = l.cpu_id() as usize;
        if layout.physical_core(cpu) == core {
            assert!(l.is_bound());
            assert!(l.assigned_thread().unwrap().is_current());
        }
    }
    inventory.release();
    assert!(inventory.locks().iter().all(|l| !l.is_bound()));
}
