use std::{
    io,
    ops::RangeInclusive,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use super::{
    archive::ArchiveRow,
    definition::{
        ArchiveSpec, ConsolidationFunction, DataSourceSpec, DataSourceType, HoltWintersParams,
    },
    InfoValue, Rrd, RrdDefinition, RrdDump, RrdState,
};
use crate::{
    backend::{Backend, MemoryBackend},
    buffer::ValueBuffer,
    error::RrdError,
    sample::Sample,
    Timestamp,
};

use ConsolidationFunction::*;

/// Step aligned (and 1200 aligned) reference time.
const T: Timestamp = 920804400;
const STEP: u64 = 300;

fn gauge(name: &str) -> DataSourceSpec {
    DataSourceSpec::new(name, DataSourceType::Gauge, 600)
}

fn create(definition: RrdDefinition) -> Rrd {
    Rrd::create("test", definition, Arc::new(MemoryBackend::new())).unwrap()
}

fn single(spec: DataSourceSpec, archive: ArchiveSpec) -> Rrd {
    create(
        RrdDefinition::new(T - STEP, STEP)
            .data_source(spec)
            .archive(archive),
    )
}

/// Apply `values` one step apart, starting at `T`.
fn feed(rrd: &mut Rrd, values: &[Option<f64>]) {
    let samples: Vec<Sample> = values
        .iter()
        .enumerate()
        .map(|(i, &value)| Sample::new(T + i as u64 * STEP, [value]))
        .collect();

    rrd.update(&samples).unwrap();
}

fn fetch(
    rrd: &Rrd,
    cf: ConsolidationFunction,
    start: Timestamp,
    end: Timestamp,
) -> Vec<(Timestamp, Option<f64>)> {
    let fetch = rrd.fetch(cf, start, end, None).unwrap();
    let name = fetch.names().next().unwrap();

    fetch.series(name).unwrap().collect()
}

fn known(series: &[(Timestamp, Option<f64>)]) -> Vec<f64> {
    series.iter().filter_map(|&(_, value)| value).collect()
}

#[test]
fn fetch_full_range() {
    let mut rrd = single(gauge("speed"), ArchiveSpec::new(Average, 0.5, 1, 3));
    feed(&mut rrd, &[Some(10.0), Some(20.0), Some(30.0)]);

    assert_eq!(
        fetch(&rrd, Average, T, T + 600),
        vec![(T, Some(10.0)), (T + 300, Some(20.0)), (T + 600, Some(30.0))]
    );
}

#[test]
fn oldest_row_overwritten() {
    let mut rrd = single(gauge("speed"), ArchiveSpec::new(Average, 0.5, 1, 2));
    feed(&mut rrd, &[Some(10.0), Some(20.0), Some(30.0)]);

    let series = fetch(&rrd, Average, T, T + 600);
    assert_eq!(series[0], (T, None));
    assert_eq!(known(&series), vec![20.0, 30.0]);
}

#[test]
fn out_of_order_update() {
    let mut rrd = single(gauge("speed"), ArchiveSpec::new(Average, 0.5, 1, 3));
    feed(&mut rrd, &[Some(10.0), Some(20.0), Some(30.0)]);

    let state = rrd.state();
    let before = fetch(&rrd, Average, T, T + 600);

    assert!(matches!(
        rrd.update(&[Sample::new(T + 600, [40.0])]),
        Err(RrdError::OutOfOrderUpdate {
            attempted,
            last
        }) if attempted == T + 600 && last == T + 600
    ));

    // A valid sample followed by an invalid one: nothing is applied.
    assert!(matches!(
        rrd.update(&[Sample::new(T + 900, [40.0]), Sample::new(T + 900, [50.0])]),
        Err(RrdError::OutOfOrderUpdate { .. })
    ));

    assert_eq!(rrd.state(), state);
    assert_eq!(fetch(&rrd, Average, T, T + 600), before);
}

#[test]
fn counter_rate() {
    let mut rrd = single(
        DataSourceSpec::new("packets", DataSourceType::Counter, 600),
        ArchiveSpec::new(Average, 0.5, 1, 4),
    );
    feed(&mut rrd, &[Some(100.0), Some(150.0)]);

    let series = fetch(&rrd, Average, T, T + 300);
    assert_eq!(series[0], (T, None));

    let (timestamp, rate) = series[1];
    assert_eq!(timestamp, T + 300);
    assert!((rate.unwrap() - 50.0 / 300.0).abs() < 1e-9);
}

#[test]
fn arity_mismatch() {
    let mut rrd = create(
        RrdDefinition::new(T - STEP, STEP)
            .data_source(gauge("a"))
            .data_source(gauge("b"))
            .data_source(gauge("c"))
            .archive(ArchiveSpec::new(Average, 0.5, 1, 4)),
    );

    assert!(matches!(
        rrd.update(&[Sample::new(T, [1.0, 2.0])]),
        Err(RrdError::ArityMismatch {
            expected: 3,
            got: 2,
            ..
        })
    ));
    assert_eq!(rrd.last_update(), T - STEP);

    rrd.update(&[Sample::new(T, [1.0, 2.0, 3.0])]).unwrap();
    assert_eq!(rrd.last_update(), T);
}

#[test]
fn fetch_is_idempotent() {
    let mut rrd = single(gauge("speed"), ArchiveSpec::new(Max, 0.5, 2, 5));
    feed(&mut rrd, &[Some(1.0), Some(5.0), Some(2.0), None, Some(7.0)]);

    let fetch = rrd.fetch(Max, T - 3000, T + 3000, None).unwrap();
    let first = fetch.to_result();
    let second = fetch.to_result();

    assert_eq!(first, second);
    assert_eq!(
        fetch.series("speed").unwrap().collect::<Vec<_>>(),
        first.series["speed"]
    );
}

#[test]
fn capacity_law() {
    let mut rrd = single(gauge("speed"), ArchiveSpec::new(Last, 0.5, 1, 3));
    let values: Vec<Option<f64>> = (1..=10).map(|i| Some(i as f64)).collect();
    feed(&mut rrd, &values);

    let series = fetch(&rrd, Last, T - 3000, T + 10 * STEP);
    assert_eq!(known(&series), vec![8.0, 9.0, 10.0]);
}

#[test]
fn consolidation_functions() {
    let mut rrd = create(
        RrdDefinition::new(T - STEP, STEP)
            .data_source(gauge("speed"))
            .archive(ArchiveSpec::new(Average, 0.5, 2, 4))
            .archive(ArchiveSpec::new(Min, 0.5, 2, 4))
            .archive(ArchiveSpec::new(Max, 0.5, 2, 4))
            .archive(ArchiveSpec::new(Last, 0.5, 2, 4))
            .archive(ArchiveSpec::new(First, 0.5, 2, 4)),
    );

    // Rows at T (one unknown primary data point, then 1) and T + 600 (4 and 6),
    // 2 is still being consolidated.
    feed(&mut rrd, &[Some(1.0), Some(4.0), Some(6.0), Some(2.0)]);

    let rows = |cf| known(&fetch(&rrd, cf, T, T + 900));

    assert_eq!(rows(Average), vec![1.0, 5.0]);
    assert_eq!(rows(Min), vec![1.0, 4.0]);
    assert_eq!(rows(Max), vec![1.0, 6.0]);
    assert_eq!(rows(Last), vec![1.0, 6.0]);
    assert_eq!(rows(First), vec![1.0, 4.0]);
}

#[test]
fn xff_threshold() {
    // Start on a row boundary so a row is made of 4 fresh primary data points.
    let mut rrd = create(
        RrdDefinition::new(T, STEP)
            .data_source(gauge("speed"))
            .archive(ArchiveSpec::new(Average, 0.5, 4, 4)),
    );

    let samples: Vec<Sample> = [
        Some(10.0),
        None,
        None,
        Some(30.0),
        Some(1.0),
        None,
        None,
        None,
    ]
    .into_iter()
    .enumerate()
    .map(|(i, value)| Sample::new(T + (i as u64 + 1) * STEP, [value]))
    .collect();

    rrd.update(&samples).unwrap();

    // 2 unknown out of 4 (= xff) is known, 3 out of 4 isn't.
    assert_eq!(
        fetch(&rrd, Average, T + 1200, T + 2400),
        vec![(T + 1200, Some(20.0)), (T + 2400, None)]
    );
}

#[test]
fn heartbeat_gap() {
    let mut rrd = single(gauge("speed"), ArchiveSpec::new(Average, 0.5, 1, 8));
    rrd.update(&[Sample::new(T, [10.0]), Sample::new(T + 900, [20.0])])
        .unwrap();

    assert_eq!(
        fetch(&rrd, Average, T, T + 900),
        vec![(T, Some(10.0)), (T + 300, None), (T + 600, None), (T + 900, None)]
    );
}

#[test]
fn gap_within_heartbeat() {
    let mut rrd = single(
        DataSourceSpec::new("speed", DataSourceType::Gauge, 1000),
        ArchiveSpec::new(Average, 0.5, 1, 8),
    );
    rrd.update(&[Sample::new(T, [10.0]), Sample::new(T + 900, [20.0])])
        .unwrap();

    assert_eq!(
        known(&fetch(&rrd, Average, T, T + 900)),
        vec![10.0, 20.0, 20.0, 20.0]
    );
}

#[test]
fn unaligned_readings() {
    let mut rrd = single(gauge("speed"), ArchiveSpec::new(Average, 0.5, 1, 8));

    // [T, T + 300] is 10 for 150s and 40 for 150s.
    rrd.update(&[
        Sample::new(T, [0.0]),
        Sample::new(T + 150, [10.0]),
        Sample::new(T + 450, [40.0]),
    ])
    .unwrap();

    assert_eq!(
        fetch(&rrd, Average, T + 300, T + 300),
        vec![(T + 300, Some(25.0))]
    );
}

#[test]
fn bounds_reject_readings() {
    let mut rrd = single(
        gauge("temp").with_bounds(Some(0.0), Some(100.0)),
        ArchiveSpec::new(Average, 0.5, 1, 4),
    );
    feed(&mut rrd, &[Some(50.0), Some(150.0), Some(-5.0)]);

    assert_eq!(
        fetch(&rrd, Average, T, T + 600),
        vec![(T, Some(50.0)), (T + 300, None), (T + 600, None)]
    );
}

#[test]
fn holt_winters_pass_through() {
    let mut rrd = single(
        gauge("speed"),
        ArchiveSpec::holt_winters(HwPredict, 4, HoltWintersParams::default()),
    );
    feed(&mut rrd, &[Some(3.0), Some(5.0)]);

    assert_eq!(known(&fetch(&rrd, HwPredict, T, T + 300)), vec![3.0, 5.0]);
}

#[test]
fn resolution_selection() {
    let rrd = create(
        RrdDefinition::new(T, STEP)
            .data_source(gauge("speed"))
            .archive(ArchiveSpec::new(Average, 0.5, 12, 10))
            .archive(ArchiveSpec::new(Average, 0.5, 1, 10))
            .archive(ArchiveSpec::new(Max, 0.5, 1, 10)),
    );

    let span = |resolution| rrd.fetch(Average, T, T + 3600, resolution).unwrap().span();

    assert_eq!(span(None), 300);
    assert_eq!(span(Some(300)), 300);
    assert_eq!(span(Some(301)), 3600);
    assert_eq!(span(Some(7200)), 3600);

    assert_eq!(rrd.fetch(Max, T, T + 3600, Some(3600)).unwrap().span(), 300);
    assert!(matches!(
        rrd.fetch(Min, T, T + 3600, None),
        Err(RrdError::NoMatchingArchive { cf: Min, .. })
    ));
    assert!(matches!(
        rrd.fetch(Average, T + 1, T, None),
        Err(RrdError::InvalidRange { .. })
    ));
}

#[test]
fn update_with_template() {
    let mut rrd = create(
        RrdDefinition::new(T - STEP, STEP)
            .data_source(gauge("a"))
            .data_source(DataSourceSpec::compute("sum", "a,b,+"))
            .data_source(gauge("b"))
            .archive(ArchiveSpec::new(Last, 0.5, 1, 4)),
    );

    rrd.update_with_template(&["b"], &[Sample::new(T, [5.0])])
        .unwrap();
    // Computed data sources take no value.
    rrd.update(&[Sample::new(T + 300, [1.0, 2.0])]).unwrap();

    let result = rrd.fetch(Last, T, T + 300, None).unwrap().to_result();
    assert_eq!(result.series["a"], vec![(T, None), (T + 300, Some(1.0))]);
    assert_eq!(result.series["sum"], vec![(T, None), (T + 300, None)]);
    assert_eq!(result.series["b"], vec![(T, Some(5.0)), (T + 300, Some(2.0))]);

    let by_time = result.by_time();
    assert_eq!(by_time[&(T + 300)]["b"], Some(2.0));

    assert!(matches!(
        rrd.update_with_template(&["c"], &[Sample::new(T + 600, [5.0])]),
        Err(RrdError::UnknownDataSource(_))
    ));
    assert!(matches!(
        rrd.update_with_template(&["sum"], &[Sample::new(T + 600, [5.0])]),
        Err(RrdError::UnknownDataSource(_))
    ));
    assert!(rrd
        .update_with_template(&["a", "a"], &[Sample::new(T + 600, [5.0, 6.0])])
        .is_err());
    assert_eq!(rrd.last_update(), T + 300);
}

#[test]
fn fetch_rows() {
    let mut rrd = create(
        RrdDefinition::new(T - STEP, STEP)
            .data_source(gauge("a"))
            .data_source(gauge("b"))
            .archive(ArchiveSpec::new(Average, 0.5, 1, 4)),
    );
    rrd.update(&[Sample::new(T, [Some(1.0), None])]).unwrap();

    let fetch = rrd.fetch(Average, T - 1, T + 1, None).unwrap();
    let rows: Vec<_> = fetch.rows().map(|(t, values)| (t, values.to_vec())).collect();

    assert_eq!(rows, vec![(T, vec![Some(1.0), None])]);
    assert_eq!(fetch.names().collect::<Vec<_>>(), vec!["a", "b"]);
}

#[test]
fn invalid_definitions() {
    let backend = Arc::new(MemoryBackend::new());
    let try_create =
        |definition: RrdDefinition| Rrd::create("invalid", definition, backend.clone());

    assert!(matches!(
        try_create(RrdDefinition::new(T, 0).data_source(gauge("a"))),
        Err(RrdError::InvalidSpec { .. })
    ));
    assert!(matches!(
        try_create(RrdDefinition::new(T, STEP)),
        Err(RrdError::InvalidSpec { .. })
    ));
    assert!(matches!(
        try_create(
            RrdDefinition::new(T, STEP)
                .data_source(gauge("a"))
                .data_source(gauge("a"))
        ),
        Err(RrdError::InvalidSpec { .. })
    ));
    assert!(matches!(
        try_create(
            RrdDefinition::new(T, STEP)
                .data_source(gauge("a"))
                .archive(ArchiveSpec::new(Average, 1.0, 1, 1))
        ),
        Err(RrdError::InvalidSpec { .. })
    ));
    assert!(matches!(
        try_create(
            RrdDefinition::new(T, 1 << 40)
                .data_source(gauge("a"))
                .archive(ArchiveSpec::new(Average, 0.5, 1 << 30, 4))
        ),
        Err(RrdError::InvalidSpec { field, .. }) if &*field == "rra.steps"
    ));
    assert!(matches!(
        try_create(
            RrdDefinition::new(T, 1 << 40)
                .data_source(gauge("a"))
                .archive(ArchiveSpec::new(Average, 0.5, 1 << 20, u32::MAX))
        ),
        Err(RrdError::InvalidSpec { field, .. }) if &*field == "rra.rows"
    ));
    assert!(!backend.exists("invalid").unwrap());
}

#[test]
fn create_existing() {
    let backend = Arc::new(MemoryBackend::new());
    let definition = RrdDefinition::new(T, STEP).data_source(gauge("a"));

    Rrd::create("set", definition.clone(), backend.clone()).unwrap();
    assert!(matches!(
        Rrd::create("set", definition, backend),
        Err(RrdError::AlreadyExists(_))
    ));
}

#[test]
fn info() {
    let mut rrd = single(
        gauge("speed").with_bounds(Some(0.0), None),
        ArchiveSpec::new(Average, 0.5, 2, 4),
    );
    feed(&mut rrd, &[Some(10.0), Some(20.0)]);

    let info = rrd.info();

    assert_eq!(info["step"], InfoValue::Count(300));
    assert_eq!(info["last_update"], InfoValue::Count(T + 300));
    assert_eq!(info["ds[speed].type"], InfoValue::Text("GAUGE".into()));
    assert_eq!(info["ds[speed].min"], InfoValue::Value(Some(0.0)));
    assert_eq!(info["ds[speed].max"], InfoValue::Value(None));
    assert_eq!(info["ds[speed].last_ds"], InfoValue::Value(Some(20.0)));
    assert_eq!(info["rra[0].cf"], InfoValue::Text("AVERAGE".into()));
    assert_eq!(info["rra[0].pdp_per_row"], InfoValue::Count(2));
    assert_eq!(info["rra[0].cdp_prep[0].value"], InfoValue::Value(Some(20.0)));
    assert_eq!(info["rra[0].cdp_prep[0].primary_value"], InfoValue::Value(Some(10.0)));

    assert_eq!(info["ds[speed].max"].to_string(), "NaN");
    assert_eq!(info["rra[0].cf"].to_string(), "\"AVERAGE\"");
}

#[test]
fn open_and_restore() {
    let backend = Arc::new(MemoryBackend::new());
    let mut rrd = Rrd::create(
        "original",
        RrdDefinition::new(T - STEP, STEP)
            .data_source(gauge("speed"))
            .archive(ArchiveSpec::new(Average, 0.5, 1, 3))
            .archive(ArchiveSpec::new(Max, 0.5, 3, 2)),
        backend.clone(),
    )
    .unwrap();

    feed(&mut rrd, &(1..=7).map(|i| Some(i as f64)).collect::<Vec<_>>());

    let reopened = Rrd::open("original", backend.clone()).unwrap();
    assert_eq!(reopened.state(), rrd.state());
    assert_eq!(reopened.dump(), rrd.dump());
    assert_eq!(
        fetch(&reopened, Max, T - 3000, T + 3000),
        fetch(&rrd, Max, T - 3000, T + 3000)
    );

    let dump = rrd.dump();
    let json = serde_json::to_string(&dump).unwrap();
    let copy =
        Rrd::restore("copy", serde_json::from_str(&json).unwrap(), backend.clone()).unwrap();

    assert_eq!(copy.name(), "copy");
    assert_eq!(copy.state(), rrd.state());
    assert_eq!(
        fetch(&copy, Average, T - 3000, T + 3000),
        fetch(&rrd, Average, T - 3000, T + 3000)
    );
}

#[test]
fn restore_rejects_invalid_dump() {
    let backend = Arc::new(MemoryBackend::new());
    let mut rrd = Rrd::create(
        "original",
        RrdDefinition::new(T - STEP, STEP)
            .data_source(gauge("speed"))
            .archive(ArchiveSpec::new(Average, 0.5, 1, 3)),
        backend.clone(),
    )
    .unwrap();
    feed(&mut rrd, &[Some(1.0), Some(2.0)]);

    let dump = rrd.dump();
    let try_restore = |edit: fn(&mut RrdDump)| {
        let mut dump = dump.clone();
        edit(&mut dump);
        Rrd::restore("copy", dump, backend.clone())
    };

    let edits: [fn(&mut RrdDump); 6] = [
        |dump| dump.step = 0,
        |dump| dump.archives[0].state.spec.rows = 0,
        |dump| dump.archives[0].state.cdp.clear(),
        |dump| dump.archives[0].state.cursor = 3,
        |dump| dump.last_update = dump.start - 1,
        |dump| dump.archives[0].database[0].values = vec![None, None].into(),
    ];

    for edit in edits {
        assert!(matches!(try_restore(edit), Err(RrdError::InvalidSpec { .. })));
        assert!(!backend.exists("copy").unwrap());
    }

    assert_eq!(try_restore(|_| ()).unwrap().state(), rrd.state());
}

/// Memory backend whose next `store_state` fails once armed.
#[derive(Debug, Default)]
struct FailingBackend {
    inner: MemoryBackend,
    fail_next: AtomicBool,
}

impl Backend for FailingBackend {
    fn exists(&self, name: &str) -> Result<bool, RrdError> {
        self.inner.exists(name)
    }

    fn list(&self) -> Result<Vec<String>, RrdError> {
        self.inner.list()
    }

    fn create(&self, name: &str, state: &RrdState) -> Result<(), RrdError> {
        self.inner.create(name, state)
    }

    fn store_state(&self, name: &str, state: &RrdState) -> Result<(), RrdError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(io::Error::other("disk full").into());
        }

        self.inner.store_state(name, state)
    }

    fn load_state(&self, name: &str) -> Result<RrdState, RrdError> {
        self.inner.load_state(name)
    }

    fn append_rows(
        &self,
        name: &str,
        archive: usize,
        rows: &[ArchiveRow],
    ) -> Result<(), RrdError> {
        self.inner.append_rows(name, archive, rows)
    }

    fn read_rows(
        &self,
        name: &str,
        archive: usize,
        range: RangeInclusive<Timestamp>,
    ) -> Result<Vec<ArchiveRow>, RrdError> {
        self.inner.read_rows(name, archive, range)
    }

    fn delete(&self, name: &str) -> Result<(), RrdError> {
        self.inner.delete(name)
    }
}

#[test]
fn failed_commit_rolls_back() {
    let backend = Arc::new(FailingBackend::default());
    let mut rrd = Rrd::create(
        "flaky",
        RrdDefinition::new(T - STEP, STEP)
            .data_source(gauge("speed"))
            .archive(ArchiveSpec::new(Average, 0.5, 1, 4)),
        backend.clone(),
    )
    .unwrap();
    let before = rrd.state();

    let mut buffer = ValueBuffer::new();
    buffer.buffer_value(T, ["10"]);

    backend.fail_next.store(true, Ordering::SeqCst);
    assert!(matches!(buffer.flush(&mut rrd), Err(RrdError::Backend(_))));
    assert_eq!(buffer.len(), 1);
    assert_eq!(rrd.last_update(), T - STEP);
    assert_eq!(rrd.state(), before);
    assert_eq!(backend.load_state("flaky").unwrap().last_update, T - STEP);

    assert_eq!(buffer.flush(&mut rrd).unwrap(), 1);
    assert!(buffer.is_empty());
    assert_eq!(backend.load_state("flaky").unwrap().last_update, T);
    assert_eq!(
        fetch(&Rrd::open("flaky", backend.clone()).unwrap(), Average, T, T),
        [(T, Some(10.0))]
    );
}
