//! End-to-end cluster scenarios over the in-process mesh.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::time::{Duration, Instant};

use linda::error::Error;
use linda::query::formal;
use linda::runtime::{Options, Runtime};
use linda::transport::local::LocalMesh;
use linda::transport::{Concurrency, Envelope, Rank, ReduceHandle, Tag, Transport};
use linda::{query, tuple};

fn cluster(world: usize) -> Vec<Runtime> {
    // enough owner-side workers that parked blocking searches can never
    // starve the insert that would wake them
    let options = Options::default().with_worker_threads(4);
    LocalMesh::new(world)
        .into_iter()
        .map(|node| Runtime::new(Arc::new(node), options.clone()).unwrap())
        .collect()
}

#[track_caller]
fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(1));
    }
}

////////////////////////////////////////////////////////////////////////////////
// scenario: rank/size handshake
////////////////////////////////////////////////////////////////////////////////

#[test]
fn rank_handshake_delivers_exactly_one() {
    let world = 4;
    let rts = cluster(world);

    std::thread::scope(|scope| {
        for rt in &rts[1..] {
            scope.spawn(move || {
                rt.out(tuple!("rank", (rt.rank() + 1) as i32, "Hello World!"))
                    .unwrap();
            });
        }
        let matched = rts[0].in_(&query!("rank", world as i32, formal::<String>()));
        assert_eq!(matched.get::<String>(2).as_deref(), Some("Hello World!"));
    });

    // the other peers' tuples stay behind
    wait_until("the losing greetings to settle", || {
        rts[0].store().len() == world - 2
    });
    assert_eq!(rts[0].rdp(&query!("rank", world as i32, formal::<String>())), None);
}

////////////////////////////////////////////////////////////////////////////////
// scenario: remote primitives
////////////////////////////////////////////////////////////////////////////////

#[test]
fn remote_out_and_reads_reach_the_owner_shard() {
    let rts = cluster(2);

    rts[1].out(tuple!("cfg", "retries", 3i32)).unwrap();
    wait_until("the insert to land", || !rts[0].store().is_empty());

    // non-destructive from both sides
    assert_eq!(
        rts[1].rd(&query!("cfg", "retries", formal::<i32>())).get::<i32>(2),
        Some(3)
    );
    assert!(rts[0].rdp(&query!("cfg", "retries", 3i32)).is_some());

    // destructive from the remote side
    let taken = rts[1].in_(&query!("cfg", formal::<String>(), formal::<i32>()));
    assert_eq!(taken, tuple!("cfg", "retries", 3i32));
    assert!(rts[0].store().is_empty());
    assert_eq!(rts[1].inp(&query!("cfg", formal::<String>(), formal::<i32>())), None);
}

#[test]
fn blocking_in_suspends_until_production() {
    let rts = cluster(2);

    std::thread::scope(|scope| {
        let consumer = scope.spawn(|| rts[1].in_(&query!("late", formal::<i64>())));
        // give the consumer time to park on the owner side
        std::thread::sleep(Duration::from_millis(30));
        assert!(!consumer.is_finished(), "in must suspend while no match exists");

        rts[0].out(tuple!("late", 7i64)).unwrap();
        assert_eq!(consumer.join().unwrap(), tuple!("late", 7i64));
    });
}

////////////////////////////////////////////////////////////////////////////////
// scenario: contending inp
////////////////////////////////////////////////////////////////////////////////

#[test]
fn contending_inp_delivers_exactly_once() {
    let rounds = 1000usize;
    let rts = cluster(3);
    let barrier = Barrier::new(3);
    let wins = [AtomicUsize::new(0), AtomicUsize::new(0)];

    std::thread::scope(|scope| {
        for (contender, rt) in rts[1..].iter().enumerate() {
            let barrier = &barrier;
            let wins = &wins;
            scope.spawn(move || {
                for round in 0..rounds {
                    barrier.wait();
                    // skew the race a little every round
                    std::thread::sleep(Duration::from_micros(
                        ((round * (contender + 1)) % 5) as u64,
                    ));
                    if rt.inp(&query!("prize", round as i64)).is_some() {
                        wins[contender].fetch_add(1, Ordering::SeqCst);
                    }
                    barrier.wait();
                }
            });
        }

        for round in 0..rounds {
            rts[0].out(tuple!("prize", round as i64)).unwrap();
            wait_until("the prize to land", || !rts[0].store().is_empty());
            barrier.wait();
            barrier.wait();
            assert_eq!(
                rts[0].rdp(&query!("prize", round as i64)),
                None,
                "round {round}: the prize must be gone"
            );
        }
    });

    let total = wins[0].load(Ordering::SeqCst) + wins[1].load(Ordering::SeqCst);
    assert_eq!(total, rounds, "every prize goes to exactly one contender");
}

////////////////////////////////////////////////////////////////////////////////
// scenario: type-only wildcards
////////////////////////////////////////////////////////////////////////////////

#[test]
fn type_only_wildcard_binds_matching_kind_only() {
    let rts = cluster(1);
    let rt = &rts[0];

    rt.out(tuple!("x", 42i32)).unwrap();

    // a string-typed wildcard does not see the i32 tuple
    assert_eq!(rt.rdp(&query!("x", formal::<String>())), None);

    let bound = rt.in_(&query!("x", formal::<i32>()));
    assert_eq!(bound.get::<i32>(1), Some(42));

    // the string-typed `in` stays blocked until a string tuple shows up
    std::thread::scope(|scope| {
        let blocked = scope.spawn(|| rt.in_(&query!("x", formal::<String>())));
        std::thread::sleep(Duration::from_millis(30));
        assert!(!blocked.is_finished());

        rt.out(tuple!("x", "now a string")).unwrap();
        assert_eq!(
            blocked.join().unwrap().get::<String>(1).as_deref(),
            Some("now a string")
        );
    });
}

////////////////////////////////////////////////////////////////////////////////
// scenario: eval round trip
////////////////////////////////////////////////////////////////////////////////

linda::register_function! {
    fn str_size(s: String) -> i64 {
        let rt = linda::current();
        let adage = rt
            .in_(&query!("str_adage", formal::<i32>()))
            .get::<i32>(1)
            .unwrap();
        s.len() as i64 + i64::from(adage)
    }
}

#[test]
fn eval_round_trip_injects_the_result() {
    let rts = cluster(2);
    let coordinator = &rts[0];

    linda::eval!(coordinator, "str_size", str_size(String::from("test"))).unwrap();
    coordinator.out(tuple!("str_adage", 38i32)).unwrap();

    let result = coordinator.in_(&query!("str_size", formal::<i64>()));
    assert_eq!(result.get::<i64>(1), Some(42));
}

linda::register_function! {
    fn double(x: i64) -> i64 {
        x * 2
    }
}

#[test]
fn eval_loops_back_in_a_single_peer_world() {
    let rts = cluster(1);
    linda::eval!(&rts[0], "doubled", double(21i64)).unwrap();
    let result = rts[0].in_(&query!("doubled", formal::<i64>()));
    assert_eq!(result.get::<i64>(1), Some(42));
}

////////////////////////////////////////////////////////////////////////////////
// scenario: build pipeline skeleton
////////////////////////////////////////////////////////////////////////////////

#[test]
fn pipeline_tokens_are_consumed_exactly_once() {
    let compile_jobs = 8i32;
    let link_jobs = 4i32;
    let rts = cluster(3);
    let coordinator = &rts[0];

    for id in 0..compile_jobs {
        coordinator.out(tuple!("CC", id)).unwrap();
    }
    for id in 0..link_jobs {
        coordinator.out(tuple!("LINK", id)).unwrap();
    }
    // workers may only take their done marker once no job tokens remain,
    // which holds because every token is in the store before they start
    for worker in 0..2i32 {
        coordinator.out(tuple!("_DONE", "CC", worker)).unwrap();
        coordinator.out(tuple!("_DONE", "LINK", worker)).unwrap();
    }

    let compiled = Mutex::new(Vec::new());
    let linked = Mutex::new(Vec::new());

    std::thread::scope(|scope| {
        for (worker, rt) in rts[1..].iter().enumerate() {
            let compiled = &compiled;
            let linked = &linked;
            scope.spawn(move || {
                // compile phase: drain CC tokens, emit objects
                loop {
                    if let Some(job) = rt.inp(&query!("CC", formal::<i32>())) {
                        let id = job.get::<i32>(1).unwrap();
                        rt.out(tuple!("obj", id)).unwrap();
                        compiled.lock().unwrap().push(id);
                        continue;
                    }
                    if rt.inp(&query!("_DONE", "CC", worker as i32)).is_some() {
                        break;
                    }
                }
                // link phase: every link job waits for its object first
                loop {
                    if let Some(job) = rt.inp(&query!("LINK", formal::<i32>())) {
                        let id = job.get::<i32>(1).unwrap();
                        rt.rd(&query!("obj", id));
                        rt.out(tuple!("bin", id)).unwrap();
                        linked.lock().unwrap().push(id);
                        continue;
                    }
                    if rt.inp(&query!("_DONE", "LINK", worker as i32)).is_some() {
                        break;
                    }
                }
            });
        }
    });

    let mut compiled = compiled.into_inner().unwrap();
    compiled.sort_unstable();
    assert_eq!(compiled, (0..compile_jobs).collect::<Vec<_>>());

    let mut linked = linked.into_inner().unwrap();
    linked.sort_unstable();
    assert_eq!(linked, (0..link_jobs).collect::<Vec<_>>());

    for id in 0..link_jobs {
        assert!(coordinator.inp(&query!("bin", id)).is_some());
    }
    assert_eq!(coordinator.inp(&query!("CC", formal::<i32>())), None);
    assert_eq!(coordinator.inp(&query!("LINK", formal::<i32>())), None);
}

////////////////////////////////////////////////////////////////////////////////
// scenario: withdrawal consensus
////////////////////////////////////////////////////////////////////////////////

#[test]
fn dissenting_vote_fails_the_withdrawal_closed() {
    let mut nodes = LocalMesh::with_aux_group(3, &[0, 1]).into_iter();
    let owner = Runtime::new(Arc::new(nodes.next().unwrap()), Options::default()).unwrap();
    let dissenter = Arc::new(nodes.next().unwrap());
    let client = Runtime::new(Arc::new(nodes.next().unwrap()), Options::default()).unwrap();

    owner.out(tuple!("guarded", 1i32)).unwrap();

    // the second communicator member votes against round 0 up front, so the
    // owner's tentative removal cannot reach consensus
    let mut dissent = dissenter.start_vote(false).unwrap();

    assert_eq!(client.inp(&query!("guarded", formal::<i32>())), None);
    assert_eq!(dissent.test(), Some(false));

    // failing closed restored the tuple
    assert_eq!(
        owner.rdp(&query!("guarded", formal::<i32>())),
        Some(tuple!("guarded", 1i32))
    );
}

#[test]
fn vote_timeout_fails_the_withdrawal_closed() {
    // rank 1 is in the communicator but never votes: the reduction cannot
    // complete within the poll budget
    let mut nodes = LocalMesh::with_aux_group(2, &[0, 1]).into_iter();
    let owner = Runtime::new(Arc::new(nodes.next().unwrap()), Options::default()).unwrap();
    let client = Runtime::new(Arc::new(nodes.next().unwrap()), Options::default()).unwrap();

    owner.out(tuple!("stuck", 5i64)).unwrap();

    let started = Instant::now();
    assert_eq!(client.inp(&query!("stuck", formal::<i64>())), None);
    assert!(started.elapsed() < Duration::from_secs(1));

    assert_eq!(
        owner.rdp(&query!("stuck", formal::<i64>())),
        Some(tuple!("stuck", 5i64))
    );
}

////////////////////////////////////////////////////////////////////////////////
// scenario: startup & shutdown
////////////////////////////////////////////////////////////////////////////////

struct FunneledTransport;

impl Transport for FunneledTransport {
    fn rank(&self) -> Rank {
        0
    }

    fn world_size(&self) -> usize {
        1
    }

    fn concurrency(&self) -> Concurrency {
        Concurrency::Funneled
    }

    fn send(&self, _to: Rank, _tag: Tag, _payload: Vec<u8>) -> linda::Result<()> {
        unreachable!("never brought up")
    }

    fn recv_any(&self) -> linda::Result<Envelope> {
        unreachable!("never brought up")
    }

    fn send_ack(&self, _to: Rank, _ack: u32, _payload: Vec<u8>) -> linda::Result<()> {
        unreachable!("never brought up")
    }

    fn recv_ack(&self, _from: Rank, _ack: u32) -> linda::Result<Vec<u8>> {
        unreachable!("never brought up")
    }

    fn start_vote(&self, _vote: bool) -> linda::Result<Box<dyn ReduceHandle>> {
        unreachable!("never brought up")
    }
}

#[test]
fn refuses_transports_without_thread_support() {
    let result = Runtime::new(Arc::new(FunneledTransport), Options::default());
    assert!(matches!(result, Err(Error::UnsupportedConcurrency)));
}

#[test]
fn shutdown_fails_subsequent_operations_softly_for_p_variants() {
    let rts = cluster(1);
    let rt = rts.into_iter().next().unwrap();
    rt.out(tuple!("left", 1i32)).unwrap();

    let handle = rt.handle();
    rt.shutdown();

    assert!(matches!(
        handle.out(tuple!("more", 2i32)),
        Err(Error::Terminated)
    ));
    assert_eq!(handle.inp(&query!("left", formal::<i32>())), None);
    assert_eq!(handle.rdp(&query!("left", formal::<i32>())), None);
    assert!(matches!(
        handle.eval(tuple!("k", 1i32)),
        Err(Error::Terminated)
    ));
}
