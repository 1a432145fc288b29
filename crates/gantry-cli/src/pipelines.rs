//! The sample pipelines: select, open, stage, dispatch, read back, verify.
//!
//! Every pipeline opens its own session and closes it before returning, so
//! device resources are released whether the pipeline succeeds or fails.

use anyhow::{Context, Result};
use gantry_kernels::{
    MMUL, MMUL_ENTRY, VADD, VADD_ENTRY, VADD3, VADD3_ENTRY, ValueGenerator, default_tile_defs,
    default_workgroup_defs, load_kernel, ramp, reference,
};
use gantry_runtime::{
    AccessMode, BufferId, ChainPlan, ChainReport, DispatchChain, KernelArg, KernelSource,
    ResultOracle, RuntimeConfig, Scalar, SelectedDevice, Session, Stage, Verification, WorkSize,
};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Sizes, tolerances and seeds shared by the pipelines.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Vector length for the vector pipelines.
    pub length: usize,
    /// Absolute tolerance for vector results.
    pub tolerance: f32,
    /// Relative tolerance for matrix results.
    pub relative_tolerance: f32,
    /// Work-group size substituted into the vector kernels.
    pub workgroup_size: u32,
    /// Work-group edge substituted into the matrix kernel.
    pub tile_size: u32,
    /// Matrix order.
    pub order: usize,
    /// Seed for generated inputs.
    pub seed: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            length: 1024,
            tolerance: 0.001,
            relative_tolerance: 0.001,
            workgroup_size: 64,
            tile_size: 8,
            order: 64,
            seed: 42,
        }
    }
}

/// Some device results fell outside tolerance.
#[derive(Debug, thiserror::Error)]
#[error("{failed} results were outside tolerance")]
pub struct VerificationFailed {
    pub failed: usize,
}

/// Result of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    /// Named checks, in the order they were made.
    pub checks: Vec<(String, Verification)>,
    /// Dispatch timing.
    pub report: ChainReport,
    /// Throughput, for the matrix pipeline.
    pub mflops: Option<f64>,
    /// Extra text to show after the checks (matrices, when requested).
    pub detail: Option<String>,
}

impl PipelineOutcome {
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|(_, v)| v.all_passed())
    }

    /// Fail with [`VerificationFailed`] unless every check passed.
    pub fn ensure_passed(&self) -> Result<()> {
        let failed: usize = self.checks.iter().map(|(_, v)| v.failed()).sum();
        if failed > 0 {
            return Err(VerificationFailed { failed }.into());
        }
        Ok(())
    }
}

impl fmt::Display for PipelineOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(detail) = &self.detail {
            write!(f, "{detail}")?;
        }
        writeln!(
            f,
            "The kernels ran in {:.6} seconds ({} stages)",
            self.report.elapsed.as_secs_f64(),
            self.report.stages
        )?;
        for (name, verification) in &self.checks {
            writeln!(f, "{name}: {verification}")?;
        }
        if let Some(mflops) = self.mflops {
            writeln!(f, "{mflops:.3} MFLOPS")?;
        }
        Ok(())
    }
}

fn upload_input(session: &mut Session, data: &[f32]) -> Result<BufferId> {
    debug!(len = data.len(), "uploading input");
    let buffer = session
        .allocate_for::<f32>(data.len(), AccessMode::ReadOnly)
        .context("Failed to allocate input buffer")?;
    session
        .upload(buffer, data)
        .with_context(|| format!("Failed to upload {buffer}"))?;
    Ok(buffer)
}

fn vector_stage(entry: &str, buffers: &[BufferId], len: usize) -> Stage {
    let mut args: Vec<KernelArg> = buffers.iter().copied().map(KernelArg::from).collect();
    args.push(Scalar::U32(len as u32).into());
    Stage::new(entry, args, WorkSize::One(len as u32))
}

/// `c = a + b`.
///
/// With `use_ramp`, `a[i] = i` and `b[i] = 2i`; otherwise both are drawn
/// from the seeded generator.
pub fn vadd(
    device: &SelectedDevice,
    runtime: &RuntimeConfig,
    config: &PipelineConfig,
    use_ramp: bool,
) -> Result<PipelineOutcome> {
    let len = config.length;
    let (a, b) = if use_ramp {
        (ramp(len, 1.0), ramp(len, 2.0))
    } else {
        let mut values = ValueGenerator::new(config.seed);
        (values.vector(len), values.vector(len))
    };

    let source =
        KernelSource::new(VADD).with_defs(default_workgroup_defs(config.workgroup_size));
    let mut session = Session::open(device, source, &[VADD_ENTRY], runtime)
        .context("Failed to open session for vadd")?;

    let da = upload_input(&mut session, &a)?;
    let db = upload_input(&mut session, &b)?;
    let dc = session
        .allocate_for::<f32>(len, AccessMode::WriteOnly)
        .context("Failed to allocate output buffer")?;

    let plan = ChainPlan::new().then(vector_stage(VADD_ENTRY, &[da, db, dc], len));
    let report = DispatchChain::run(&mut session, &plan).context("vadd dispatch failed")?;
    info!(stages = report.stages, elapsed = ?report.elapsed, "vadd dispatched");

    let c: Vec<f32> = session.download(dc).context("Failed to read back c")?;
    session.close()?;

    let check = ResultOracle::absolute(config.tolerance).check(&reference::vadd(&a, &b), &c);
    Ok(PipelineOutcome {
        checks: vec![("c = a + b".to_string(), check)],
        report,
        mflops: None,
        detail: None,
    })
}

/// `c = a + b`, `d = c + e`, `f = d + g` with one `vadd` kernel rebound per
/// stage.
pub fn chain(
    device: &SelectedDevice,
    runtime: &RuntimeConfig,
    config: &PipelineConfig,
) -> Result<PipelineOutcome> {
    let len = config.length;
    let mut values = ValueGenerator::new(config.seed);
    let a = values.vector(len);
    let b = values.vector(len);
    let e = values.vector(len);
    let g = values.vector(len);

    let source =
        KernelSource::new(VADD).with_defs(default_workgroup_defs(config.workgroup_size));
    let mut session = Session::open(device, source, &[VADD_ENTRY], runtime)
        .context("Failed to open session for chain")?;

    let da = upload_input(&mut session, &a)?;
    let db = upload_input(&mut session, &b)?;
    let de = upload_input(&mut session, &e)?;
    let dg = upload_input(&mut session, &g)?;
    let mut intermediate = || session.allocate_for::<f32>(len, AccessMode::ReadWrite);
    let dc = intermediate().context("Failed to allocate c")?;
    let dd = intermediate().context("Failed to allocate d")?;
    let df = intermediate().context("Failed to allocate f")?;

    let mut stage = vector_stage(VADD_ENTRY, &[da, db, dc], len)
        .with_input(0)
        .with_output(2);
    let mut plan = ChainPlan::new();
    plan.push(stage.clone());
    for (input, other, output) in [(dc, de, dd), (dd, dg, df)] {
        stage.bind(0, input);
        stage.bind(1, other);
        stage.bind(2, output);
        plan.push(stage.clone());
    }

    let report = DispatchChain::run(&mut session, &plan).context("chain dispatch failed")?;
    info!(stages = report.stages, elapsed = ?report.elapsed, "chain dispatched");

    let c: Vec<f32> = session.download(dc).context("Failed to read back c")?;
    let d: Vec<f32> = session.download(dd).context("Failed to read back d")?;
    let f: Vec<f32> = session.download(df).context("Failed to read back f")?;
    session.close()?;

    let oracle = ResultOracle::absolute(config.tolerance);
    let expected_c = reference::vadd(&a, &b);
    let expected_d = reference::vadd(&expected_c, &e);
    let expected_f = reference::vadd(&expected_d, &g);
    let combined: Vec<f32> = a
        .iter()
        .zip(&b)
        .zip(&e)
        .zip(&g)
        .map(|(((a, b), e), g)| a + b + e + g)
        .collect();

    Ok(PipelineOutcome {
        checks: vec![
            ("c = a + b".to_string(), oracle.check(&expected_c, &c)),
            ("d = c + e".to_string(), oracle.check(&expected_d, &d)),
            ("f = d + g".to_string(), oracle.check(&expected_f, &f)),
            ("f = a + b + e + g".to_string(), oracle.check(&combined, &f)),
        ],
        report,
        mflops: None,
        detail: None,
    })
}

/// `d = a + b + c` with one three-input kernel, checked by relative error.
pub fn triple(
    device: &SelectedDevice,
    runtime: &RuntimeConfig,
    config: &PipelineConfig,
) -> Result<PipelineOutcome> {
    let len = config.length;
    let mut values = ValueGenerator::new(config.seed);
    let a = values.vector(len);
    let b = values.vector(len);
    let c = values.vector(len);

    let source =
        KernelSource::new(VADD3).with_defs(default_workgroup_defs(config.workgroup_size));
    let mut session = Session::open(device, source, &[VADD3_ENTRY], runtime)
        .context("Failed to open session for triple")?;

    let da = upload_input(&mut session, &a)?;
    let db = upload_input(&mut session, &b)?;
    let dc = upload_input(&mut session, &c)?;
    let dd = session
        .allocate_for::<f32>(len, AccessMode::WriteOnly)
        .context("Failed to allocate output buffer")?;

    let plan = ChainPlan::new().then(vector_stage(VADD3_ENTRY, &[da, db, dc, dd], len));
    let report = DispatchChain::run(&mut session, &plan).context("triple dispatch failed")?;
    info!(stages = report.stages, elapsed = ?report.elapsed, "triple dispatched");

    let d: Vec<f32> = session.download(dd).context("Failed to read back d")?;
    session.close()?;

    let check = ResultOracle::relative(config.tolerance).check(&reference::vadd3(&a, &b, &c), &d);
    Ok(PipelineOutcome {
        checks: vec![("d = a + b + c".to_string(), check)],
        report,
        mflops: None,
        detail: None,
    })
}

/// Options specific to the matrix pipeline.
#[derive(Debug, Clone, Default)]
pub struct MatmulOptions<'a> {
    /// Kernel source file to use instead of the bundled one.
    pub kernel: Option<&'a Path>,
    /// Entry point in `kernel` (defaults to the bundled kernel's).
    pub entry: Option<&'a str>,
    /// Append A, B and C to the outcome.
    pub print_matrices: bool,
}

/// `c = a * b` for `order x order` matrices over a 2-D work size.
pub fn matmul(
    device: &SelectedDevice,
    runtime: &RuntimeConfig,
    config: &PipelineConfig,
    options: &MatmulOptions<'_>,
) -> Result<PipelineOutcome> {
    let n = config.order;
    let mut values = ValueGenerator::new(config.seed);
    let a = values.vector(n * n);
    let b = values.vector(n * n);
    let mut expected = vec![0.0f32; n * n];
    reference::sequential_mat_mul(n, &a, &b, &mut expected);

    let template = match options.kernel {
        Some(path) => load_kernel(path).context("Failed to load matrix kernel")?,
        None => MMUL.to_string(),
    };
    let path = options
        .kernel
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mmul.wgsl".to_string());
    let source = KernelSource::new(&template)
        .with_path(&path)
        .with_defs(default_tile_defs(config.tile_size));
    let entry = options.entry.unwrap_or(MMUL_ENTRY);

    let mut session = Session::open(device, source, &[entry], runtime)
        .context("Failed to open session for matmul")?;

    let da = upload_input(&mut session, &a)?;
    let db = upload_input(&mut session, &b)?;
    let dc = session
        .allocate_for::<f32>(n * n, AccessMode::WriteOnly)
        .context("Failed to allocate output buffer")?;

    let stage = Stage::new(
        entry,
        vec![da.into(), db.into(), dc.into(), Scalar::U32(n as u32).into()],
        WorkSize::Two(n as u32, n as u32),
    );
    let report = DispatchChain::run(&mut session, &ChainPlan::new().then(stage))
        .context("matmul dispatch failed")?;
    info!(stages = report.stages, elapsed = ?report.elapsed, "matmul dispatched");

    let c: Vec<f32> = session.download(dc).context("Failed to read back c")?;
    session.close()?;

    let check = ResultOracle::relative(config.relative_tolerance).check(&expected, &c);
    let seconds = report.elapsed.max(Duration::from_nanos(1)).as_secs_f64();

    let detail = options.print_matrices.then(|| {
        format!(
            "A:\n{}B:\n{}C:\n{}",
            reference::format_mat(&a, n),
            reference::format_mat(&b, n),
            reference::format_mat(&c, n)
        )
    });

    Ok(PipelineOutcome {
        checks: vec![(format!("c = a * b ({n}x{n})"), check)],
        report,
        mflops: Some(reference::mflops(n, seconds)),
        detail,
    })
}
