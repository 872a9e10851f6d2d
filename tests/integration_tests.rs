use cellstore::prelude::*;
use cellstore::{AbortSignal, FetchBatch, covering_cells, is_fully_enclosed};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn at(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(1_700_000_000 + secs)
}

#[test]
fn test_end_to_end_cell_stats() {
    init_logging();
    let origin = LatLng::new(35.0, 139.0);
    let cell14 = Cell::from_lat_lng(origin, 14).unwrap();

    let key = cell14.key();
    let (face, digits) = key.split_once('/').unwrap();
    assert!(matches!(face, "0" | "1" | "2" | "3" | "4" | "5"));
    assert_eq!(digits.len(), 14);
    assert!(digits.chars().all(|c| ('0'..='3').contains(&c)));

    // a pokestop in the next level-14 cell over
    let elsewhere = cell14.neighbors()[2].center();
    assert_ne!(Cell::from_lat_lng(elsewhere, 14).unwrap(), cell14);

    let store = Store::memory().unwrap();
    let sync = RecordSynchronizer::new(store.clone());
    let stats = StatisticsAggregator::new(store);

    let region = Region::bounding(&[origin, elsewhere]).unwrap();
    let pois = vec![
        FreshPoi::new("gym", origin.lat, origin.lng).with_kind(PoiKind::Gym),
        FreshPoi::new("stop", elsewhere.lat, elsewhere.lng).with_kind(PoiKind::Pokestop),
    ];
    let report = sync.merge(&pois, &region, at(0)).unwrap();
    assert_eq!(report.inserted, 2);

    let result = stats.cell_stats(35.0, 139.0).unwrap().unwrap();
    assert_eq!(result.cell_key, key);
    let gyms = result.pois_of(PoiKind::Gym);
    assert_eq!(gyms.len(), 1);
    assert_eq!(gyms[0].guid, "gym");
    assert!(result.pois_of(PoiKind::Pokestop).is_empty());

    let gym_cells: usize = result
        .level17
        .values()
        .map(|agg| agg.count(PoiKind::Gym))
        .sum();
    assert_eq!(gym_cells, 1);
}

#[test]
fn test_stats_serialize_to_json() {
    let store = Store::memory().unwrap();
    let sync = RecordSynchronizer::new(store.clone());
    let poi = FreshPoi::new("g", 35.0, 139.0)
        .with_kind(PoiKind::Gym)
        .with_payload(serde_json::json!({"team": "blue"}));
    sync.merge(&[poi], &Region::new(34.99, 138.99, 35.01, 139.01), at(0))
        .unwrap();

    let result = StatisticsAggregator::new(store)
        .cell_stats(35.0, 139.0)
        .unwrap()
        .unwrap();
    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["kind_to_pois"]["gym"][0]["payload"]["team"], "blue");
    assert!(json["level17"].as_object().unwrap().len() > 1);
}

#[test]
fn test_staleness_and_locality_across_merges() {
    init_logging();
    let store = Store::memory().unwrap();
    let sync = RecordSynchronizer::new(store.clone());

    let region = Region::new(35.0, 139.0, 35.02, 139.02);
    let p1 = FreshPoi::new("p1", 35.005, 139.005);
    let p2 = FreshPoi::new("p2", 35.015, 139.015);
    let p3 = FreshPoi::new("p3", 35.020_001, 139.01);

    sync.merge(&[p3], &Region::new(35.02, 139.0, 35.03, 139.02), at(0))
        .unwrap();
    sync.merge(&[p1.clone(), p2], &region, at(10)).unwrap();
    let report = sync.merge(&[p1], &region, at(20)).unwrap();

    assert_eq!(report.deleted, 1);
    assert!(store.get_poi("p2").unwrap().is_none());
    assert_eq!(store.get_poi("p1").unwrap().unwrap().last_fetch_date, at(20));
    assert_eq!(store.get_poi("p3").unwrap().unwrap().last_fetch_date, at(0));
}

#[test]
fn test_visible_cells_match_covering() {
    let store = Store::memory().unwrap();
    let sync = RecordSynchronizer::new(store.clone());
    let region = Region::new(35.0, 139.0, 35.003, 139.003);

    let report = sync.merge(&[], &region, at(0)).unwrap();
    let enclosed: Vec<Cell> = covering_cells(&region, 17)
        .unwrap()
        .into_iter()
        .filter(|cell| is_fully_enclosed(cell, &region))
        .collect();
    assert_eq!(report.visible_cells, enclosed.len());

    for cell in &enclosed {
        let record = store.get_cell(&cell.key()).unwrap().unwrap();
        assert_eq!(record.ancestor_ids, cell.ancestor_keys(16).unwrap());
        assert_eq!(record.center(), cell.center());
    }
    assert_eq!(store.stats().unwrap().cell_count, enclosed.len());
}

#[test]
fn test_ingestion_queue_end_to_end() {
    init_logging();
    let store = Store::memory_with_config(Config::default().with_ingest_batch_size(4)).unwrap();
    let queue = IngestionQueue::new(RecordSynchronizer::new(store.clone()));
    let failures = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&failures);
    queue.on_error(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let region = Region::new(35.0, 139.0, 35.01, 139.01);
    for n in 0..6u64 {
        let poi = FreshPoi::new(format!("p{n}"), 35.001 + n as f64 * 0.001, 139.005);
        queue.push(FetchBatch::new(vec![poi], Region::new(35.0, 139.0, 35.0, 139.0), at(n)));
    }
    queue.push(FetchBatch::new(Vec::new(), region, at(100)));

    assert_eq!(queue.drain(), 4);
    assert_eq!(queue.drain(), 3);
    assert!(queue.is_empty());
    assert_eq!(failures.load(Ordering::SeqCst), 0);

    // the final empty fetch of the whole region removed everything
    assert_eq!(store.stats().unwrap().poi_count, 0);
}

#[test]
fn test_concurrent_readers_during_ingest() {
    let store = Store::memory().unwrap();
    let queue = IngestionQueue::new(RecordSynchronizer::new(store.clone()));
    let stats = StatisticsAggregator::new(store.clone());
    let handle = queue.spawn_drainer(Duration::from_millis(2)).unwrap();

    let region = Region::new(34.99, 138.99, 35.01, 139.01);
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let stats = stats.clone();
            std::thread::spawn(move || {
                for _ in 0..20 {
                    stats.cell_stats(35.0, 139.0).unwrap();
                }
            })
        })
        .collect();

    for n in 0..10u64 {
        let poi = FreshPoi::new("g", 35.0, 139.0).with_kind(PoiKind::Gym);
        queue.push(FetchBatch::new(vec![poi], region, at(n)));
    }
    for reader in readers {
        reader.join().unwrap();
    }

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while !queue.is_empty() && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(2));
    }
    handle.stop();

    let poi = store.get_poi("g").unwrap().unwrap();
    assert_eq!(poi.last_fetch_date, at(9));
    assert_eq!(poi.first_fetch_date, at(0));
}

#[test]
fn test_cancelled_merge_leaves_store_untouched() {
    let store = Store::memory().unwrap();
    let sync = RecordSynchronizer::new(store.clone());
    let signal = AbortSignal::new();
    signal.abort();

    let region = Region::new(35.0, 139.0, 35.01, 139.01);
    let result = sync.merge_with_abort(
        &[FreshPoi::new("p", 35.005, 139.005)],
        &region,
        at(0),
        Some(&signal),
    );
    assert!(matches!(result, Err(CellStoreError::Aborted)));

    let stats = store.stats().unwrap();
    assert_eq!(stats.poi_count, 0);
    assert_eq!(stats.cell_count, 0);
    assert_eq!(stats.aborted_transactions, 1);
    assert_eq!(stats.committed_transactions, 0);
}

#[cfg(feature = "snapshot")]
#[test]
fn test_persistence_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pois.snap");
    let region = Region::new(34.99, 138.99, 35.01, 139.01);

    {
        let store = Store::open(&path).unwrap();
        let sync = RecordSynchronizer::new(store.clone());
        let poi = FreshPoi::new("g", 35.0, 139.0)
            .with_name("Shrine")
            .with_kind(PoiKind::Gym);
        sync.merge(&[poi], &region, at(0)).unwrap();
        store.close().unwrap();
        assert!(matches!(store.get_poi("g"), Err(CellStoreError::StoreClosed)));
    }

    let store = Store::builder().path(&path).build().unwrap();
    let poi = store.get_poi("g").unwrap().unwrap();
    assert_eq!(poi.name, "Shrine");
    assert_eq!(poi.first_fetch_date, at(0));

    let result = StatisticsAggregator::new(store)
        .cell_stats(35.0, 139.0)
        .unwrap()
        .unwrap();
    assert_eq!(result.pois_of(PoiKind::Gym).len(), 1);
}
