//! End-to-end dispatch chains on a real device.

mod common;

use common::{mmul_source, try_device, vadd3_source, vadd_source};
use gantry_kernels::{MMUL_ENTRY, VADD_ENTRY, VADD3_ENTRY, ValueGenerator, ramp, reference};
use gantry_runtime::{
    AccessMode, ChainPlan, DispatchChain, KernelArg, Ordering, ResultOracle, RuntimeConfig,
    RuntimeError, Scalar, Session, Stage, WorkSize, verify,
};

const LENGTH: usize = 1024;
const TOL: f32 = 0.001;

fn vadd_stage(
    a: gantry_runtime::BufferId,
    b: gantry_runtime::BufferId,
    c: gantry_runtime::BufferId,
    len: usize,
) -> Stage {
    Stage::new(
        VADD_ENTRY,
        vec![
            a.into(),
            b.into(),
            c.into(),
            KernelArg::Scalar(Scalar::U32(len as u32)),
        ],
        WorkSize::One(len as u32),
    )
    .with_input(0)
    .with_output(2)
}

/// `a[i] = i`, `b[i] = 2i`: every one of the 1024 sums is correct.
#[test]
#[ignore] // Requires GPU - ignore in CI or environments without GPU
fn test_vadd_ramp() {
    let config = RuntimeConfig::default();
    let Some(device) = try_device(&config) else {
        return;
    };
    let mut session = Session::open(&device, vadd_source(), &[VADD_ENTRY], &config).unwrap();

    let a = ramp(LENGTH, 1.0);
    let b = ramp(LENGTH, 2.0);
    let da = session.allocate_for::<f32>(LENGTH, AccessMode::ReadOnly).unwrap();
    let db = session.allocate_for::<f32>(LENGTH, AccessMode::ReadOnly).unwrap();
    let dc = session.allocate_for::<f32>(LENGTH, AccessMode::WriteOnly).unwrap();
    session.upload(da, &a).unwrap();
    session.upload(db, &b).unwrap();

    let plan = ChainPlan::new().then(vadd_stage(da, db, dc, LENGTH));
    let report = DispatchChain::run(&mut session, &plan).unwrap();
    assert_eq!(report.stages, 1);

    let c: Vec<f32> = session.download(dc).unwrap();
    assert_eq!(c[1023], 3069.0);
    assert_eq!(verify(&reference::vadd(&a, &b), &c, LENGTH, TOL), LENGTH);

    session.close().unwrap();
}

/// `c = a + b`, `d = c + e`, `f = d + g` with one kernel rebound per stage.
fn run_three_stage_chain(ordering: Ordering) {
    let config = RuntimeConfig::default().with_ordering(ordering);
    let Some(device) = try_device(&config) else {
        return;
    };
    let mut session = Session::open(&device, vadd_source(), &[VADD_ENTRY], &config).unwrap();

    let mut values = ValueGenerator::new(42);
    let a = values.vector(LENGTH);
    let b = values.vector(LENGTH);
    let e = values.vector(LENGTH);
    let g = values.vector(LENGTH);

    let mut alloc = |access| session.allocate_for::<f32>(LENGTH, access).unwrap();
    let [da, db, de, dg] = [(); 4].map(|_| alloc(AccessMode::ReadOnly));
    let [dc, dd, df] = [(); 3].map(|_| alloc(AccessMode::ReadWrite));
    for (buffer, data) in [(da, &a), (db, &b), (de, &e), (dg, &g)] {
        session.upload(buffer, data).unwrap();
    }

    let mut stage = vadd_stage(da, db, dc, LENGTH);
    let mut plan = ChainPlan::new();
    plan.push(stage.clone());
    stage.bind(0, dc);
    stage.bind(1, de);
    stage.bind(2, dd);
    plan.push(stage.clone());
    stage.bind(0, dd);
    stage.bind(1, dg);
    stage.bind(2, df);
    plan.push(stage);

    let report = DispatchChain::run(&mut session, &plan).unwrap();
    assert_eq!(report.stages, 3);

    let c: Vec<f32> = session.download(dc).unwrap();
    let d: Vec<f32> = session.download(dd).unwrap();
    let f: Vec<f32> = session.download(df).unwrap();

    let oracle = ResultOracle::absolute(TOL);
    let expected_c = reference::vadd(&a, &b);
    let expected_d = reference::vadd(&expected_c, &e);
    let expected_f = reference::vadd(&expected_d, &g);
    assert!(oracle.check(&expected_c, &c).all_passed());
    assert!(oracle.check(&expected_d, &d).all_passed());
    assert!(oracle.check(&expected_f, &f).all_passed());

    let combined: Vec<f32> = (0..LENGTH).map(|i| a[i] + b[i] + e[i] + g[i]).collect();
    assert_eq!(verify(&combined, &f, LENGTH, TOL), LENGTH);

    session.close().unwrap();
}

#[test]
#[ignore] // Requires GPU - ignore in CI or environments without GPU
fn test_three_stage_chain_in_order_queue() {
    run_three_stage_chain(Ordering::InOrderQueue);
}

#[test]
#[ignore] // Requires GPU - ignore in CI or environments without GPU
fn test_three_stage_chain_with_barriers() {
    run_three_stage_chain(Ordering::StageBarrier);
}

#[test]
#[ignore] // Requires GPU - ignore in CI or environments without GPU
fn test_broken_chain_enqueues_nothing() {
    let config = RuntimeConfig::default();
    let Some(device) = try_device(&config) else {
        return;
    };
    let mut session = Session::open(&device, vadd_source(), &[VADD_ENTRY], &config).unwrap();

    let ones = vec![1.0f32; LENGTH];
    let zeros = vec![0.0f32; LENGTH];
    let da = session.allocate_for::<f32>(LENGTH, AccessMode::ReadOnly).unwrap();
    let dc = session.allocate_for::<f32>(LENGTH, AccessMode::ReadWrite).unwrap();
    let dd = session.allocate_for::<f32>(LENGTH, AccessMode::ReadWrite).unwrap();
    session.upload(da, &ones).unwrap();
    session.upload(dc, &zeros).unwrap();
    session.upload(dd, &zeros).unwrap();

    // Stage 1 reads `da` although stage 0 produced `dc`.
    let plan = ChainPlan::new()
        .then(vadd_stage(da, da, dc, LENGTH))
        .then(vadd_stage(da, da, dd, LENGTH));

    let err = DispatchChain::run(&mut session, &plan).unwrap_err();
    assert!(matches!(err, RuntimeError::BrokenChain { stage: 1, .. }));
    assert_eq!(session.download::<f32>(dc).unwrap(), zeros);
}

#[test]
#[ignore] // Requires GPU - ignore in CI or environments without GPU
fn test_argument_errors_name_the_stage() {
    let config = RuntimeConfig::default();
    let Some(device) = try_device(&config) else {
        return;
    };
    let mut session = Session::open(&device, vadd_source(), &[VADD_ENTRY], &config).unwrap();

    let da = session.allocate_for::<f32>(LENGTH, AccessMode::ReadOnly).unwrap();
    let dc = session.allocate_for::<f32>(LENGTH, AccessMode::ReadWrite).unwrap();
    let dd = session.allocate_for::<f32>(LENGTH, AccessMode::ReadWrite).unwrap();

    let short = Stage::new(VADD_ENTRY, vec![da.into(), da.into(), dd.into()], WorkSize::One(16));
    let plan = ChainPlan::new()
        .then(vadd_stage(da, da, dc, LENGTH))
        .then(short);
    let err = DispatchChain::run(&mut session, &plan).unwrap_err();
    assert_eq!(err.kind(), "KernelArgumentError");
    assert_eq!(err.stage(), Some(1));

    // Stage 0 was submitted and stays readable.
    let c: Vec<f32> = session.download(dc).unwrap();
    assert_eq!(c.len(), LENGTH);

    let unknown = Stage::new("vsub", vec![], WorkSize::One(16));
    let err = DispatchChain::run(&mut session, &ChainPlan::new().then(unknown)).unwrap_err();
    assert!(matches!(err, RuntimeError::EnqueueError { stage: 0, .. }));

    let empty = vadd_stage(da, da, dc, 0);
    let err = DispatchChain::run(&mut session, &ChainPlan::new().then(empty)).unwrap_err();
    assert!(matches!(err, RuntimeError::EnqueueError { stage: 0, .. }));
}

#[test]
#[ignore] // Requires GPU - ignore in CI or environments without GPU
fn test_triple_vadd() {
    let config = RuntimeConfig::default();
    let Some(device) = try_device(&config) else {
        return;
    };
    let mut session = Session::open(&device, vadd3_source(), &[VADD3_ENTRY], &config).unwrap();

    let mut values = ValueGenerator::new(7);
    let inputs = [values.vector(LENGTH), values.vector(LENGTH), values.vector(LENGTH)];
    let mut args = Vec::new();
    for data in &inputs {
        let buffer = session.allocate_for::<f32>(LENGTH, AccessMode::ReadOnly).unwrap();
        session.upload(buffer, data).unwrap();
        args.push(KernelArg::Buffer(buffer));
    }
    let dd = session.allocate_for::<f32>(LENGTH, AccessMode::WriteOnly).unwrap();
    args.push(dd.into());
    args.push(Scalar::U32(LENGTH as u32).into());

    let plan = ChainPlan::new().then(Stage::new(VADD3_ENTRY, args, WorkSize::One(LENGTH as u32)));
    DispatchChain::run(&mut session, &plan).unwrap();

    let d: Vec<f32> = session.download(dd).unwrap();
    let expected = reference::vadd3(&inputs[0], &inputs[1], &inputs[2]);
    assert!(ResultOracle::relative(TOL).check(&expected, &d).all_passed());
}

#[test]
#[ignore] // Requires GPU - ignore in CI or environments without GPU
fn test_matmul_matches_sequential_reference() {
    let config = RuntimeConfig::default();
    let Some(device) = try_device(&config) else {
        return;
    };
    let mut session = Session::open(&device, mmul_source(), &[MMUL_ENTRY], &config).unwrap();

    let n = 64;
    let mut values = ValueGenerator::new(42);
    let a = values.vector(n * n);
    let b = values.vector(n * n);
    let mut expected = vec![0.0f32; n * n];
    reference::sequential_mat_mul(n, &a, &b, &mut expected);

    let da = session.allocate_for::<f32>(n * n, AccessMode::ReadOnly).unwrap();
    let db = session.allocate_for::<f32>(n * n, AccessMode::ReadOnly).unwrap();
    let dc = session.allocate_for::<f32>(n * n, AccessMode::WriteOnly).unwrap();
    session.upload(da, &a).unwrap();
    session.upload(db, &b).unwrap();

    let stage = Stage::new(
        MMUL_ENTRY,
        vec![da.into(), db.into(), dc.into(), Scalar::U32(n as u32).into()],
        WorkSize::Two(n as u32, n as u32),
    );
    DispatchChain::run(&mut session, &ChainPlan::new().then(stage)).unwrap();

    let c: Vec<f32> = session.download(dc).unwrap();
    let result = ResultOracle::relative(1e-3).check(&expected, &c);
    assert!(result.all_passed(), "{result}");
}

const VEC4_KERNEL: &str = r#"
struct P {
    x: vec4<f32>,
}

@group(0) @binding(0) var<storage, read_write> p: P;

@compute @workgroup_size(1)
fn k() {
    p.x = vec4<f32>(1.0);
}
"#;

/// The host checks pass but the driver rejects a 4-byte buffer for a 16-byte
/// binding: the stage fails with a typed error instead of aborting.
#[test]
#[ignore] // Requires GPU - ignore in CI or environments without GPU
fn test_undersized_binding_is_an_argument_error() {
    let config = RuntimeConfig::default();
    let Some(device) = try_device(&config) else {
        return;
    };
    let mut session = Session::open(&device, VEC4_KERNEL, &["k"], &config).unwrap();

    let fits = session.allocate(16, AccessMode::ReadWrite).unwrap();
    let small = session.allocate(4, AccessMode::ReadWrite).unwrap();

    let plan = ChainPlan::new()
        .then(Stage::new("k", vec![fits.into()], WorkSize::One(1)))
        .then(Stage::new("k", vec![small.into()], WorkSize::One(1)));
    let err = DispatchChain::run(&mut session, &plan).unwrap_err();
    assert!(
        matches!(err, RuntimeError::KernelArgumentError { stage: 1, .. }),
        "expected KernelArgumentError for stage 1, got {err:?}"
    );
    assert_eq!(err.stage(), Some(1));

    // Stage 0 was already submitted and completes normally.
    session.finish().unwrap();
    let p: Vec<f32> = session.download(fits).unwrap();
    assert_eq!(p, vec![1.0; 4]);

    // The session keeps working after the rejection.
    let plan = ChainPlan::new().then(Stage::new("k", vec![fits.into()], WorkSize::One(1)));
    DispatchChain::run(&mut session, &plan).unwrap();

    assert_eq!(session.live_buffers(), 2);
    session
        .close()
        .expect("session should close after a rejected stage");
}
