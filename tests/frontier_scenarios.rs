use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

use crawl_frontier::{
    Frontier, FrontierConfig, PageFetcher, PolitenessTracker, UrlRecord, WorkerHandle,
};

fn open_frontier(dir: &TempDir, politeness_delay_ms: u64) -> Frontier {
    Frontier::open(FrontierConfig {
        politeness_delay_ms,
        resumable: true,
        storage_folder: dir.path().to_path_buf(),
        max_pages: None,
    })
    .unwrap()
}

fn url(docid: u64, seed: u64, priority: i8, depth: u16) -> UrlRecord {
    url_on(docid, seed, priority, depth, "www.test.com")
}

fn url_on(docid: u64, seed: u64, priority: i8, depth: u16, host: &str) -> UrlRecord {
    let mut rec = UrlRecord::seed(docid, format!("http://{host}/{docid}")).unwrap();
    rec.seed_docid = seed;
    rec.priority = priority;
    rec.depth = depth;
    rec
}

#[test]
fn test_url_priority_order() {
    let dir = TempDir::new().unwrap();
    let frontier = open_frontier(&dir, 2000);
    let fetcher = PolitenessTracker::new(Duration::from_millis(2000));
    let worker = WorkerHandle::new(1);

    assert!(frontier.schedule(url(1, 1, 0, 0)).unwrap());
    assert!(frontier.schedule(url(2, 1, -1, 1)).unwrap());
    assert!(frontier.schedule(url(3, 1, -2, 2)).unwrap());
    assert!(frontier.schedule(url(5, 1, 1, 3)).unwrap());
    assert!(frontier.schedule(url(4, 1, 1, 3)).unwrap());
    assert_eq!(frontier.queue_size(), 5);
    assert_eq!(frontier.num_in_progress(), 0);
    frontier.validate().unwrap();

    // Lower priority first, ties by depth, then by discovery order.
    let expected = [3u64, 2, 1, 4, 5];
    for (i, expected_docid) in expected.iter().enumerate() {
        let selected = frontier.get_next_url(&worker, &fetcher).unwrap();
        assert_eq!(selected.docid, *expected_docid);
        assert_eq!(frontier.num_in_progress(), 1);
        assert_eq!(frontier.queue_size(), (5 - i) as u64);
        frontier.validate().unwrap();

        frontier.set_processed(&worker, &selected).unwrap();
        fetcher.unselect(&selected);
        assert_eq!(frontier.num_in_progress(), 0);
        assert_eq!(frontier.queue_size(), (4 - i) as u64);
        frontier.validate().unwrap();
    }
    assert_eq!(frontier.num_offspring(1), 0);
}

#[test]
fn test_head_tail_on_small_queue() {
    let dir = TempDir::new().unwrap();
    let frontier = open_frontier(&dir, 2000);
    let fetcher = PolitenessTracker::new(Duration::from_millis(2000));
    let worker = WorkerHandle::new(1);

    assert!(frontier.schedule(url(1, 1, -2, 0)).unwrap());
    assert!(frontier.schedule(url(2, 1, -1, 1)).unwrap());

    let selected = frontier.get_next_url(&worker, &fetcher).unwrap();
    assert_eq!(selected.docid, 1);
    assert_eq!(frontier.queue_size(), 2);

    frontier.set_processed(&worker, &selected).unwrap();
    fetcher.unselect(&selected);
    assert_eq!(frontier.queue_size(), 1);
    frontier.validate().unwrap();

    assert!(frontier.schedule(url(3, 1, 0, 2)).unwrap());
    frontier.validate().unwrap();

    let selected = frontier.get_next_url(&worker, &fetcher).unwrap();
    assert_eq!(selected.docid, 2);
    frontier.validate().unwrap();
}

#[test]
fn test_batch_enqueue_and_offspring_removal() {
    let dir = TempDir::new().unwrap();
    let frontier = open_frontier(&dir, 2000);

    assert!(frontier.schedule(url(1, 1, -2, 0)).unwrap());
    assert!(frontier.schedule(url(2, 1, 0, 2)).unwrap());

    let batch = vec![url(3, 1, -1, 2), url(4, 1, -1, 2), url(5, 1, -1, 2)];
    let rejected = frontier.schedule_all(batch).unwrap();
    assert!(rejected.is_empty());
    assert_eq!(frontier.queue_size(), 5);
    assert_eq!(frontier.num_offspring(1), 5);
    frontier.validate().unwrap();

    assert_eq!(frontier.remove_offspring(1).unwrap(), 5);
    assert_eq!(frontier.num_offspring(1), 0);
    assert_eq!(frontier.queue_size(), 0);
    frontier.validate().unwrap();
}

#[test]
fn test_politeness_across_hosts() {
    let dir = TempDir::new().unwrap();
    let frontier = Arc::new(open_frontier(&dir, 400));
    let fetcher = Arc::new(PolitenessTracker::new(Duration::from_millis(400)));

    // Host A carries two URLs so the blocked worker has something to claim
    // once A's politeness window has elapsed.
    assert!(frontier.schedule(url_on(1, 1, 0, 0, "a.test.com")).unwrap());
    assert!(frontier.schedule(url_on(4, 1, 0, 1, "a.test.com")).unwrap());
    assert!(frontier.schedule(url_on(2, 2, 0, 0, "b.test.com")).unwrap());

    let w1 = WorkerHandle::new(1);
    let w2 = WorkerHandle::new(2);
    let w3 = WorkerHandle::new(3);

    let first = frontier.get_next_url(&w1, fetcher.as_ref()).unwrap();
    assert_eq!(first.docid, 1);

    let second = frontier.get_next_url(&w2, fetcher.as_ref()).unwrap();
    assert_eq!(second.docid, 2);

    // W3 blocks: host A is claimed and inside its politeness window, host
    // B is claimed.
    let started = Instant::now();
    let handle = {
        let frontier = Arc::clone(&frontier);
        let fetcher = Arc::clone(&fetcher);
        std::thread::spawn(move || {
            let selected = frontier.get_next_url(&w3, fetcher.as_ref()).unwrap();
            (selected, started.elapsed())
        })
    };

    std::thread::sleep(Duration::from_millis(100));
    frontier.set_processed(&w1, &first).unwrap();
    frontier.validate().unwrap();

    let (selected, waited) = handle.join().unwrap();
    assert_eq!(selected.docid, 4);
    assert!(
        waited >= Duration::from_millis(250),
        "politeness window was not honored: {waited:?}"
    );
    assert_eq!(frontier.num_in_progress(), 2);
    frontier.validate().unwrap();
}

#[test]
fn test_abandon_requeues_at_head() {
    let dir = TempDir::new().unwrap();
    let frontier = open_frontier(&dir, 2000);
    let fetcher = PolitenessTracker::new(Duration::from_millis(2000));
    let worker = WorkerHandle::new(1);

    assert!(frontier.schedule(url(1, 1, 0, 0)).unwrap());
    assert!(frontier.schedule(url(2, 1, 0, 1)).unwrap());

    let selected = frontier.get_next_url(&worker, &fetcher).unwrap();
    assert_eq!(selected.docid, 1);

    frontier.abandon(&worker, &selected, &fetcher);
    assert_eq!(frontier.num_offspring(1), 2);
    assert_eq!(frontier.queue_size(), 2);
    assert_eq!(frontier.num_in_progress(), 0);
    frontier.validate().unwrap();

    // The abandoned URL comes straight back.
    let again = frontier.get_next_url(&worker, &fetcher).unwrap();
    assert_eq!(again.docid, 1);
    frontier.validate().unwrap();
}

#[test]
fn test_offspring_removal_during_crawl() {
    let dir = TempDir::new().unwrap();
    let frontier = open_frontier(&dir, 2000);
    let fetcher = PolitenessTracker::new(Duration::from_millis(2000));
    let worker = WorkerHandle::new(1);

    for docid in 2..=6 {
        assert!(frontier.schedule(url(docid, 1, 0, 1)).unwrap());
    }
    assert_eq!(frontier.num_offspring(1), 5);

    let claimed = frontier.get_next_url(&worker, &fetcher).unwrap();
    assert_eq!(claimed.docid, 2);

    // Deletes the whole brood, the claimed URL included; the worker's slot
    // stays occupied until it reports back.
    assert_eq!(frontier.remove_offspring(1).unwrap(), 5);
    assert_eq!(frontier.num_offspring(1), 0);
    assert_eq!(frontier.queue_size(), 0);
    assert_eq!(frontier.num_in_progress(), 1);
    frontier.validate().unwrap();

    // No-op against the store, but the slot is cleared.
    frontier.set_processed(&worker, &claimed).unwrap();
    assert_eq!(frontier.num_in_progress(), 0);
    frontier.validate().unwrap();
}

#[test]
fn test_enqueue_below_claimed_head() {
    let dir = TempDir::new().unwrap();
    let frontier = open_frontier(&dir, 2000);
    let fetcher = PolitenessTracker::new(Duration::from_millis(2000));
    let worker = WorkerHandle::new(1);

    assert!(frontier.schedule(url(5, 5, 0, 0)).unwrap());
    let claimed = frontier.get_next_url(&worker, &fetcher).unwrap();
    assert_eq!(claimed.docid, 5);

    // Lower key than the claimed head; becomes the head-in-waiting.
    assert!(frontier.schedule(url(6, 5, -1, 0)).unwrap());
    frontier.validate().unwrap();

    frontier.set_processed(&worker, &claimed).unwrap();
    fetcher.unselect(&claimed);

    // The old head is gone, so the newly inserted URL dispatches next.
    let next = frontier.get_next_url(&worker, &fetcher).unwrap();
    assert_eq!(next.docid, 6);
    frontier.validate().unwrap();
}

#[test]
fn test_priority_extremes_dispatch_in_order() {
    let dir = TempDir::new().unwrap();
    let frontier = open_frontier(&dir, 2000);
    let fetcher = PolitenessTracker::new(Duration::from_millis(2000));
    let worker = WorkerHandle::new(1);

    assert!(frontier.schedule(url(1, 1, i8::MAX, 0)).unwrap());
    assert!(frontier.schedule(url(2, 1, i8::MIN, 0)).unwrap());
    assert!(frontier.schedule(url(3, 1, 0, 0)).unwrap());

    for expected in [2u64, 3, 1] {
        let selected = frontier.get_next_url(&worker, &fetcher).unwrap();
        assert_eq!(selected.docid, expected);
        frontier.set_processed(&worker, &selected).unwrap();
        fetcher.unselect(&selected);
    }
}

#[test]
fn test_docid_reusable_once_processed() {
    let dir = TempDir::new().unwrap();
    let frontier = open_frontier(&dir, 2000);
    let fetcher = PolitenessTracker::new(Duration::from_millis(2000));
    let worker = WorkerHandle::new(1);

    let rec = url(1, 1, 0, 0);
    assert!(frontier.schedule(rec.clone()).unwrap());
    assert!(!frontier.schedule(rec.clone()).unwrap());

    let claimed = frontier.get_next_url(&worker, &fetcher).unwrap();
    frontier.set_processed(&worker, &claimed).unwrap();
    fetcher.unselect(&claimed);

    // The store slot is free again, so the same key schedules cleanly.
    assert!(frontier.schedule(rec).unwrap());
    frontier.validate().unwrap();
}

#[test]
fn test_restart_recovers_queue_and_counters() {
    let dir = TempDir::new().unwrap();
    {
        let frontier = open_frontier(&dir, 2000);
        let fetcher = PolitenessTracker::new(Duration::from_millis(2000));
        let worker = WorkerHandle::new(1);

        assert!(frontier.schedule(url_on(1, 1, -1, 0, "a.test.com")).unwrap());
        assert!(frontier.schedule(url_on(2, 1, 0, 1, "b.test.com")).unwrap());
        assert!(frontier.schedule(url_on(3, 1, 0, 1, "a.test.com")).unwrap());

        // Leave one URL claimed; the process "dies" with it in flight.
        let claimed = frontier.get_next_url(&worker, &fetcher).unwrap();
        assert_eq!(claimed.docid, 1);
        frontier.sync().unwrap();
    }

    let frontier = open_frontier(&dir, 2000);
    let fetcher = PolitenessTracker::new(Duration::from_millis(2000));
    let worker = WorkerHandle::new(7);

    // The in-flight URL is indistinguishable from a queued one.
    assert_eq!(frontier.queue_size(), 3);
    assert_eq!(frontier.num_in_progress(), 0);
    assert_eq!(frontier.num_offspring(1), 3);
    assert_eq!(frontier.num_scheduled(), 3);
    frontier.validate().unwrap();

    let snapshot = frontier.snapshot().unwrap();
    assert_eq!(snapshot.len(), 3);
    assert_eq!(snapshot[0].docid, 1);

    let mut drained = Vec::new();
    for _ in 0..3 {
        let selected = frontier.get_next_url(&worker, &fetcher).unwrap();
        frontier.set_processed(&worker, &selected).unwrap();
        fetcher.unselect(&selected);
        drained.push(selected.docid);
        frontier.validate().unwrap();
    }
    drained.sort_unstable();
    assert_eq!(drained, vec![1, 2, 3]);
    assert_eq!(frontier.num_offspring(1), 0);
    assert_eq!(frontier.queue_size(), 0);
}

#[test]
fn test_random_host_queue_utilization() {
    let dir = TempDir::new().unwrap();
    let frontier = open_frontier(&dir, 0);
    let fetcher = PolitenessTracker::new(Duration::from_millis(0));
    let worker = WorkerHandle::new(1);

    let mut rng = StdRng::seed_from_u64(1234);
    let mut next_docid: u64 = 1;
    let mut live: Vec<UrlRecord> = Vec::new();

    add_random_urls(&frontier, &mut rng, &mut live, &mut next_docid, 100, 25);
    frontier.validate().unwrap();

    while frontier.queue_size() > 0 {
        let selected = frontier.get_next_url(&worker, &fetcher).unwrap();
        frontier.validate().unwrap();

        if rng.gen_range(0..100) < 30 {
            frontier.abandon(&worker, &selected, &fetcher);
            frontier.validate().unwrap();
            continue;
        }

        if rng.gen_range(0..100) < 15 {
            // Remove the brood while one of its URLs is still claimed.
            frontier.remove_offspring(selected.seed_docid).unwrap();
            live.retain(|u| u.seed_docid != selected.seed_docid);
            frontier.validate().unwrap();
            frontier.set_processed(&worker, &selected).unwrap();
            frontier.validate().unwrap();
            continue;
        }

        frontier.set_processed(&worker, &selected).unwrap();
        fetcher.unselect(&selected);
        live.retain(|u| u.docid != selected.docid);
        frontier.validate().unwrap();

        if rng.gen_range(0..100) < 20 {
            frontier.remove_offspring(selected.seed_docid).unwrap();
            live.retain(|u| u.seed_docid != selected.seed_docid);
            frontier.validate().unwrap();
        }

        if rng.gen_range(0..100) < 10 {
            let count = rng.gen_range(0..20);
            add_random_urls(&frontier, &mut rng, &mut live, &mut next_docid, count, 15);
            frontier.validate().unwrap();
        }
    }

    assert_eq!(frontier.num_in_progress(), 0);
    assert!(live.is_empty(), "{} urls were never dispatched", live.len());
}

/// Generate a batch of seeds and children the way a crawl would discover
/// them: children stay on their parent's host with a nearby priority.
fn add_random_urls(
    frontier: &Frontier,
    rng: &mut StdRng,
    live: &mut Vec<UrlRecord>,
    next_docid: &mut u64,
    count: usize,
    seed_pct: u32,
) {
    let batch = rng.gen_bool(0.5);
    let mut generated = Vec::with_capacity(count);

    for _ in 0..count {
        let docid = *next_docid;
        *next_docid += 1;

        let rec = if live.is_empty() || rng.gen_range(0..100) < seed_pct {
            let mut seed = UrlRecord::seed(docid, format!("http://host{docid}.test.com/")).unwrap();
            seed.priority = rng.gen_range(-16..16);
            seed
        } else {
            let parent = &live[rng.gen_range(0..live.len())];
            let mut child = UrlRecord::discovered(
                docid,
                format!("http://{}/{docid}", parent.host),
                parent,
            )
            .unwrap();
            child.priority = parent.priority.saturating_add(rng.gen_range(-3..3));
            child
        };
        generated.push(rec.clone());
        live.push(rec);
    }

    if batch {
        let rejected = frontier.schedule_all(generated).unwrap();
        assert!(rejected.is_empty());
    } else {
        for rec in generated {
            assert!(frontier.schedule(rec).unwrap());
        }
    }
}
