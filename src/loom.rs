pub mod models {
    use core::array;
    use core::sync::atomic::Ordering::Relaxed;

    use loom::sync::atomic::AtomicUsize;
    use loom::sync::Arc;
    use loom::{model, thread};

    use crate::primitive::Primitive;
    use crate::sched::Fixed;
    use crate::LgLock;

    // NOTE: Shared values are loom atomics updated with separate loads and
    // stores, so that a missing exclusion shows up as a lost update or a torn
    // pair in some explored interleaving.

    /// Increments `value` in two separately scheduled steps.
    fn bump(value: &AtomicUsize) {
        let current = value.load(Relaxed);
        value.store(current + 1, Relaxed);
    }

    struct Pair {
        a: AtomicUsize,
        b: AtomicUsize,
    }

    impl Pair {
        fn new() -> Self {
            Self { a: AtomicUsize::new(0), b: AtomicUsize::new(0) }
        }

        fn bump(&self) {
            bump(&self.a);
            bump(&self.b);
        }

        fn is_consistent(&self) -> bool {
            self.a.load(Relaxed) == self.b.load(Relaxed)
        }
    }

    struct Counter<P> {
        raw: P,
        value: AtomicUsize,
    }

    const THREADS: usize = 2;

    /// Evaluates that concurrent `lock` calls on a primitive serialize all
    /// mutations against the shared data.
    pub fn primitive_join<P>()
    where
        P: Primitive + Send + Sync + 'static,
    {
        model(|| {
            let counter = Arc::new(Counter { raw: P::new(), value: AtomicUsize::new(0) });
            let handles: [_; THREADS] = array::from_fn(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    counter.raw.lock();
                    bump(&counter.value);
                    // SAFETY: We hold the primitive.
                    unsafe { counter.raw.unlock() };
                })
            });
            for handle in handles {
                handle.join().unwrap();
            }
            assert_eq!(counter.value.load(Relaxed), THREADS);
        });
    }

    /// Evaluates that a global section never observes an explicit local
    /// section half-way, and that local updates are not lost.
    pub fn local_on_vs_global<P>()
    where
        P: Primitive + Send + Sync + 'static,
    {
        model(|| {
            let lock = LgLock::builder("local_on_vs_global")
                .partitions(2)
                .primitive::<P>()
                .scheduler(Fixed(0))
                .build_with(|_| Pair::new());
            let lock = Arc::new(lock);
            let c_lock = Arc::clone(&lock);
            let local = thread::spawn(move || c_lock.local_lock_on(1).bump());
            let c_lock = Arc::clone(&lock);
            let global = thread::spawn(move || {
                let guard = c_lock.global_lock();
                assert!(guard.iter().all(Pair::is_consistent));
            });
            local.join().unwrap();
            global.join().unwrap();
            let guard = lock.global_lock();
            assert_eq!(guard[1].a.load(Relaxed), 1);
            assert!(guard[1].is_consistent());
        });
    }

    /// Evaluates that double sections requested in opposite orders do not
    /// deadlock, and that both transfers are applied.
    pub fn crossing_double_locks<P>()
    where
        P: Primitive + Send + Sync + 'static,
    {
        model(|| {
            let lock = LgLock::builder("crossing_double_locks")
                .partitions(2)
                .primitive::<P>()
                .scheduler(Fixed(0))
                .build_with(|_| AtomicUsize::new(0));
            let lock = Arc::new(lock);
            let handles: [_; THREADS] = array::from_fn(|run| {
                let lock = Arc::clone(&lock);
                let (a, b) = if run % 2 == 0 { (1, 0) } else { (0, 1) };
                thread::spawn(move || {
                    let guard = lock.double_lock(a, b);
                    bump(guard.get(a));
                    bump(guard.get(b));
                })
            });
            for handle in handles {
                handle.join().unwrap();
            }
            let guard = lock.global_lock();
            assert!(guard.iter().all(|value| value.load(Relaxed) == THREADS));
        });
    }
}
