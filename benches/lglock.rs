use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use criterion::{black_box, criterion_group, criterion_main, Bencher, Criterion};
use lglock::primitive::{spins, Primitive};
use lglock::sched::Fixed;
use lglock::LgLock;

const PARTITIONS: usize = 8;

type Lock<P> = LgLock<u64, P, Fixed>;

fn new_lock<P: Primitive>(home: usize) -> Lock<P> {
    LgLock::builder("bench").partitions(PARTITIONS).primitive::<P>().scheduler(Fixed(home)).build()
}

fn gen_build(bencher: &mut Bencher) {
    bencher.iter(|| LgLock::builder("bench").partitions(black_box(PARTITIONS)).build::<u64>());
}

fn gen_local_lock_unlock<P: Primitive>(bencher: &mut Bencher) {
    let lock = new_lock::<P>(3);
    bencher.iter(|| {
        let mut guard = lock.local_lock();
        *guard = guard.wrapping_add(1);
    });
}

fn gen_global_lock_unlock<P: Primitive>(bencher: &mut Bencher) {
    let lock = new_lock::<P>(0);
    bencher.iter(|| {
        let mut guard = lock.global_lock();
        guard[PARTITIONS - 1] = guard[0].wrapping_add(1);
    });
}

fn gen_double_lock_unlock<P: Primitive>(bencher: &mut Bencher) {
    let lock = new_lock::<P>(0);
    bencher.iter(|| {
        let mut guard = lock.double_lock(black_box(5), black_box(2));
        let (from, to) = guard.pair_mut();
        *from = from.wrapping_sub(1);
        *to = to.wrapping_add(1);
    });
}

/// Local sections on one partition, while another thread hammers a
/// different partition.
fn gen_local_lock_unlock_disjoint<P>(bencher: &mut Bencher)
where
    P: Primitive + Send + Sync + 'static,
{
    let lock = Arc::new(new_lock::<P>(0));
    let stop = Arc::new(AtomicBool::new(false));

    let thread = thread::spawn({
        let (lock, stop) = (Arc::clone(&lock), Arc::clone(&stop));
        move || {
            while !stop.load(Ordering::Relaxed) {
                for _ in 0..1000 {
                    *lock.local_lock_on(1) += 1;
                }
            }
        }
    });

    bencher.iter(|| {
        let mut guard = lock.local_lock();
        *guard = guard.wrapping_add(1);
    });

    stop.store(true, Ordering::Relaxed);
    thread.join().unwrap();
}

/// Local sections on one partition, while another thread repeatedly takes
/// the global lock.
fn gen_local_lock_unlock_global_contention<P>(bencher: &mut Bencher)
where
    P: Primitive + Send + Sync + 'static,
{
    let lock = Arc::new(new_lock::<P>(0));
    let stop = Arc::new(AtomicBool::new(false));

    let thread = thread::spawn({
        let (lock, stop) = (Arc::clone(&lock), Arc::clone(&stop));
        move || {
            while !stop.load(Ordering::Relaxed) {
                for _ in 0..100 {
                    black_box(lock.global_lock().iter().sum::<u64>());
                }
            }
        }
    });

    bencher.iter(|| {
        let mut guard = lock.local_lock();
        *guard = guard.wrapping_add(1);
    });

    stop.store(true, Ordering::Relaxed);
    thread.join().unwrap();
}

fn bench_build(c: &mut Criterion) {
    c.bench_function("build", gen_build);
}

fn bench_uncontended(c: &mut Criterion) {
    let mut group = c.benchmark_group("uncontended");
    group.bench_function("local/spin", gen_local_lock_unlock::<spins::SpinLock>);
    group.bench_function("local/mcs", gen_local_lock_unlock::<spins::backoff::McsLock>);
    group.bench_function("double/mcs", gen_double_lock_unlock::<spins::backoff::McsLock>);
    group.bench_function("global/spin", gen_global_lock_unlock::<spins::SpinLock>);
    group.bench_function("global/mcs", gen_global_lock_unlock::<spins::backoff::McsLock>);
    group.finish();
}

fn bench_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended");
    group.bench_function(
        "local/disjoint",
        gen_local_lock_unlock_disjoint::<spins::backoff::McsLock>,
    );
    group.bench_function(
        "local/global",
        gen_local_lock_unlock_global_contention::<spins::backoff::McsLock>,
    );
    group.finish();
}

criterion_group!(benches, bench_build, bench_uncontended, bench_contended);
criterion_main!(benches);
