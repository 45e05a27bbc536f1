use super::*;
use crate::config::ReactorConfig;
use crate::reactor::Reactor;
use crate::sys;
use std::cell::RefCell;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

type Results = Rc<RefCell<Vec<(usize, Option<String>)>>>;

struct AlwaysAlive;

impl WorkerHandle for AlwaysAlive {
    fn is_alive(&mut self) -> bool {
        true
    }

    fn terminate(&mut self) {}

    fn describe(&self) -> String {
        "manual".into()
    }
}

/// Far ends of a worker the test answers by hand.
struct FarEnd {
    requests: BufReader<File>,
    responses: File,
}

impl FarEnd {
    fn read_request(&mut self) -> (RequestId, String) {
        let mut line = String::new();
        self.requests.read_line(&mut line).unwrap();
        let (id, payload) = wire::decode(line.as_bytes()).unwrap();
        (id, payload.to_string())
    }

    fn reply(&mut self, raw: &str) {
        self.responses.write_all(raw.as_bytes()).unwrap();
    }
}

#[derive(Default, Clone)]
struct ManualLauncher {
    ends: Rc<RefCell<Vec<FarEnd>>>,
}

impl WorkerLauncher for ManualLauncher {
    fn launch(&mut self, _kind: CoserverKind) -> Result<WorkerChannel> {
        let (req_r, req_w) = sys::pipe()?;
        let (resp_r, resp_w) = sys::pipe()?;
        self.ends.borrow_mut().push(FarEnd {
            requests: BufReader::new(File::from(req_r)),
            responses: File::from(resp_w),
        });
        Ok(WorkerChannel {
            recv: resp_r,
            send: req_w,
            handle: Box::new(AlwaysAlive),
        })
    }
}

fn config() -> ReactorConfig {
    ReactorConfig::new().tick_interval(Duration::from_secs(3600))
}

fn manual_reactor() -> (Reactor, Rc<RefCell<Vec<FarEnd>>>) {
    let launcher = ManualLauncher::default();
    let ends = launcher.ends.clone();
    (Reactor::with_launcher(config(), Box::new(launcher)).unwrap(), ends)
}

fn pump(r: &mut Reactor, cycles: usize) {
    for _ in 0..cycles {
        r.poll_once(Duration::from_millis(20)).unwrap();
    }
}

fn pump_until<F: FnMut(&Reactor) -> bool>(r: &mut Reactor, mut done: F) -> bool {
    for _ in 0..300 {
        if done(r) {
            return true;
        }
        r.poll_once(Duration::from_millis(10)).unwrap();
    }
    done(r)
}

fn ask(r: &mut Reactor, kind: CoserverKind, payload: &str, tag: usize, results: &Results) -> Option<RequestId> {
    let results = results.clone();
    r.coserver(kind, payload, move |_, result| {
        results.borrow_mut().push((tag, result.map(str::to_string)));
    })
}

#[test]
fn test_thread_worker_resolves() {
    let resolver: Resolver = Arc::new(|kind, payload| match (kind, payload) {
        (CoserverKind::ReverseDns, "1.2.3.4") => Some("host.example".into()),
        _ => None,
    });
    let launcher = ThreadLauncher::with_resolver(resolver);
    let mut r = Reactor::with_launcher(config(), Box::new(launcher)).unwrap();
    r.spawn_coserver(CoserverKind::ReverseDns).unwrap();
    assert_eq!(r.coservers().count(CoserverKind::ReverseDns), 1);

    let results = Results::default();
    ask(&mut r, CoserverKind::ReverseDns, "1.2.3.4", 0, &results).unwrap();
    ask(&mut r, CoserverKind::ReverseDns, "9.9.9.9", 1, &results).unwrap();
    assert_eq!(r.coservers().pending(), 2);

    assert!(pump_until(&mut r, |_| results.borrow().len() == 2));
    let mut got = results.borrow().clone();
    got.sort();
    assert_eq!(got, vec![(0, Some("host.example".to_string())), (1, None)]);
    assert_eq!(r.coservers().pending(), 0);
    assert_eq!(r.coservers().stats()[0].served, 2);
    assert_eq!(r.finalize(), 0);
}

#[test]
fn test_finalize_joins_thread_workers() {
    let finished = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&finished);
    let resolver: Resolver = Arc::new(move |_, _| {
        std::thread::sleep(Duration::from_millis(300));
        flag.store(true, Ordering::SeqCst);
        None
    });
    let launcher = ThreadLauncher::with_resolver(resolver);
    let mut r = Reactor::with_launcher(config(), Box::new(launcher)).unwrap();
    r.spawn_coserver(CoserverKind::Dns).unwrap();

    let results = Results::default();
    ask(&mut r, CoserverKind::Dns, "slow.example", 0, &results).unwrap();
    pump(&mut r, 3);

    // The lookup outlives the reactor; finalize waits for it anyway
    assert_eq!(r.finalize(), 1);
    assert!(finished.load(Ordering::SeqCst));
    assert!(results.borrow().is_empty());
}

#[test]
fn test_out_of_order_responses() {
    let (mut r, ends) = manual_reactor();
    r.spawn_coserver(CoserverKind::ReverseDns).unwrap();

    let results = Results::default();
    for i in 0..5 {
        ask(&mut r, CoserverKind::ReverseDns, &format!("10.0.0.{}", i), i, &results).unwrap();
    }
    pump(&mut r, 2);

    let requests: Vec<(RequestId, String)> = {
        let mut ends = ends.borrow_mut();
        (0..5).map(|_| ends[0].read_request()).collect()
    };
    for i in [3, 0, 4, 1, 2] {
        let (id, payload) = &requests[i];
        ends.borrow_mut()[0].reply(&format!("{}:host-{}\n", id, payload));
    }

    assert!(pump_until(&mut r, |_| results.borrow().len() == 5));
    let got = results.borrow().clone();
    let order: Vec<usize> = got.iter().map(|(tag, _)| *tag).collect();
    assert_eq!(order, vec![3, 0, 4, 1, 2]);
    for (tag, result) in got {
        assert_eq!(result, Some(format!("host-10.0.0.{}", tag)));
    }
    assert_eq!(r.coservers().pending(), 0);
    assert_eq!(r.coservers().stats()[0].busy, 0);
}

#[test]
fn test_unknown_and_malformed_responses_ignored() {
    let (mut r, ends) = manual_reactor();
    r.spawn_coserver(CoserverKind::Dns).unwrap();

    let results = Results::default();
    ask(&mut r, CoserverKind::Dns, "example.org", 0, &results).unwrap();
    pump(&mut r, 2);

    let (id, _) = ends.borrow_mut()[0].read_request();
    ends.borrow_mut()[0].reply("garbage\n999:stray\n");
    pump(&mut r, 2);
    assert!(results.borrow().is_empty());
    assert_eq!(r.coservers().len(), 1);

    ends.borrow_mut()[0].reply(&format!("{}:93.184.216.34\n", id));
    assert!(pump_until(&mut r, |_| !results.borrow().is_empty()));
    assert_eq!(
        *results.borrow(),
        vec![(0, Some("93.184.216.34".to_string()))]
    );
}

#[test]
fn test_requests_go_to_least_busy() {
    let (mut r, _ends) = manual_reactor();
    let first = r.spawn_coserver(CoserverKind::Ident).unwrap();
    let second = r.spawn_coserver(CoserverKind::Ident).unwrap();
    assert_ne!(first, second);

    let results = Results::default();
    for i in 0..3 {
        ask(&mut r, CoserverKind::Ident, "10.0.0.1:1:2", i, &results).unwrap();
    }
    let busy: Vec<(CoserverKey, u32)> = r
        .coservers()
        .stats()
        .iter()
        .map(|s| (s.key, s.busy))
        .collect();
    assert_eq!(busy, vec![(first, 2), (second, 1)]);
}

#[test]
fn test_requests_skip_dying_workers() {
    let (mut r, _ends) = manual_reactor();
    let first = r.spawn_coserver(CoserverKind::Dns).unwrap();
    let second = r.spawn_coserver(CoserverKind::Dns).unwrap();
    let results = Results::default();
    ask(&mut r, CoserverKind::Dns, "a", 0, &results).unwrap();

    // The idle worker's proxy is going away; the busy one still answers
    let proxy = r.coservers().stats()[1].conn;
    r.find_mut(proxy).unwrap().shutdown();
    ask(&mut r, CoserverKind::Dns, "b", 1, &results).unwrap();

    let busy: Vec<(CoserverKey, u32)> = r
        .coservers()
        .stats()
        .iter()
        .map(|s| (s.key, s.busy))
        .collect();
    assert_eq!(busy, vec![(first, 2), (second, 0)]);
}

#[test]
fn test_no_worker_drops_request() {
    let (mut r, _ends) = manual_reactor();
    r.spawn_coserver(CoserverKind::Dns).unwrap();

    let results = Results::default();
    assert!(ask(&mut r, CoserverKind::ReverseDns, "1.2.3.4", 0, &results).is_none());
    assert_eq!(r.coservers().pending(), 0);
    pump(&mut r, 1);
    assert!(results.borrow().is_empty());
}

#[test]
fn test_request_ids_never_repeat() {
    let (mut r, _ends) = manual_reactor();
    r.spawn_coserver(CoserverKind::Dns).unwrap();
    let results = Results::default();
    let ids: Vec<RequestId> = (0..4)
        .map(|i| ask(&mut r, CoserverKind::Dns, "a", i, &results).unwrap())
        .collect();
    let mut unique = ids.clone();
    unique.dedup();
    assert_eq!(unique, ids);
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_worker_death_tears_down() {
    let (mut r, ends) = manual_reactor();
    r.spawn_coserver(CoserverKind::ReverseDns).unwrap();
    let results = Results::default();
    ask(&mut r, CoserverKind::ReverseDns, "1.2.3.4", 0, &results).unwrap();
    pump(&mut r, 2);

    ends.borrow_mut().clear();
    assert!(pump_until(&mut r, |r| r.coservers().is_empty()));
    assert!(r.registry().is_empty());
    assert!(results.borrow().is_empty());
    assert_eq!(r.coservers().pending(), 1);
    assert_eq!(r.finalize(), 1);
}

#[test]
fn test_restart_replaces_workers() {
    let (mut r, _ends) = manual_reactor();
    let old = r.spawn_coserver(CoserverKind::Dns).unwrap();
    let proxy = r.coservers().stats()[0].conn;

    let new = r.restart_coserver(CoserverKind::Dns).unwrap();
    assert_ne!(old, new);
    assert_eq!(r.coservers().count(CoserverKind::Dns), 1);
    assert!(r.find(proxy).unwrap().is_killed());
    pump(&mut r, 1);
    assert!(r.find(proxy).is_none());
    assert_eq!(r.registry().len(), 1);
}

#[test]
fn test_process_worker() {
    let script = r#"while IFS= read -r line; do echo "${line%%:*}:pong-$1"; done"#;
    let launcher = ProcessLauncher::new("/bin/sh")
        .arg("-c")
        .arg(script)
        .arg("sh");
    let mut r = Reactor::with_launcher(config(), Box::new(launcher)).unwrap();
    r.spawn_coserver(CoserverKind::Dns).unwrap();
    assert!(r.coservers().stats()[0].worker.starts_with("pid "));

    let results = Results::default();
    ask(&mut r, CoserverKind::Dns, "anything", 0, &results).unwrap();
    assert!(pump_until(&mut r, |_| !results.borrow().is_empty()));
    assert_eq!(*results.borrow(), vec![(0, Some("pong-dns".to_string()))]);
    assert_eq!(r.finalize(), 0);
}
