//! Ordered multi-stage kernel dispatch.
//!
//! A [`ChainPlan`] is a list of [`Stage`]s. Each stage names a kernel of the
//! session, the arguments to bind to it and the global work size to launch
//! over. Stages run in plan order on the session's in-order queue, so a
//! stage never starts before the stages that produce its inputs.

use crate::buffer::BufferId;
use crate::config::Ordering;
use crate::error::{Result, RuntimeError};
use crate::program::{KernelParam, ParamKind};
use crate::session::{Kernel, Session, capture_errors, wait_idle};
use std::fmt;
use std::time::{Duration, Instant};
use wgpu::util::DeviceExt;

/// Global work size of a launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkSize {
    /// One-dimensional extent.
    One(u32),
    /// Two-dimensional extent.
    Two(u32, u32),
}

impl WorkSize {
    fn extent(self) -> [u32; 2] {
        match self {
            WorkSize::One(x) => [x, 1],
            WorkSize::Two(x, y) => [x, y],
        }
    }
}

/// A by-value kernel argument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    /// Unsigned 32-bit integer.
    U32(u32),
    /// Signed 32-bit integer.
    I32(i32),
    /// 32-bit float.
    F32(f32),
}

impl Scalar {
    /// Size of every scalar in bytes.
    pub const SIZE: u64 = 4;

    fn to_bytes(self) -> [u8; 4] {
        match self {
            Scalar::U32(v) => v.to_le_bytes(),
            Scalar::I32(v) => v.to_le_bytes(),
            Scalar::F32(v) => v.to_le_bytes(),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::U32(v) => write!(f, "{v}u"),
            Scalar::I32(v) => write!(f, "{v}i"),
            Scalar::F32(v) => write!(f, "{v}f"),
        }
    }
}

/// One argument bound to a kernel parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KernelArg {
    /// A device buffer, bound to a storage parameter.
    Buffer(BufferId),
    /// A scalar, staged as a uniform block.
    Scalar(Scalar),
}

impl From<BufferId> for KernelArg {
    fn from(id: BufferId) -> Self {
        KernelArg::Buffer(id)
    }
}

impl From<Scalar> for KernelArg {
    fn from(value: Scalar) -> Self {
        KernelArg::Scalar(value)
    }
}

impl fmt::Display for KernelArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelArg::Buffer(id) => write!(f, "{id}"),
            KernelArg::Scalar(value) => write!(f, "{value}"),
        }
    }
}

/// A kernel invocation: kernel, arguments and work size.
///
/// The argument at index *i* binds to the kernel's *i*-th parameter in binding
/// order. Stages are cheap to clone and can be re-bound, so one kernel can be
/// enqueued several times over different buffers.
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    kernel: String,
    args: Vec<KernelArg>,
    work: WorkSize,
    input: Option<usize>,
    output: Option<usize>,
}

impl Stage {
    /// Launch `kernel` over `work` with `args` in binding order.
    pub fn new(kernel: impl Into<String>, args: Vec<KernelArg>, work: WorkSize) -> Self {
        Self {
            kernel: kernel.into(),
            args,
            work,
            input: None,
            output: None,
        }
    }

    /// Mark argument `index` as the buffer this stage consumes from its
    /// predecessor.
    pub fn with_input(mut self, index: usize) -> Self {
        self.input = Some(index);
        self
    }

    /// Mark argument `index` as the buffer this stage produces for its
    /// successor.
    pub fn with_output(mut self, index: usize) -> Self {
        self.output = Some(index);
        self
    }

    /// Replace argument `index`, returning the previous one.
    ///
    /// Out-of-range indices leave the stage unchanged and return `None`.
    pub fn bind(&mut self, index: usize, arg: impl Into<KernelArg>) -> Option<KernelArg> {
        let slot = self.args.get_mut(index)?;
        Some(std::mem::replace(slot, arg.into()))
    }

    /// Change the global work size.
    pub fn set_work_size(&mut self, work: WorkSize) {
        self.work = work;
    }

    /// Name of the kernel this stage launches.
    pub fn kernel(&self) -> &str {
        &self.kernel
    }

    /// Arguments in binding order.
    pub fn args(&self) -> &[KernelArg] {
        &self.args
    }

    /// Global work size of the launch.
    pub fn work_size(&self) -> WorkSize {
        self.work
    }

    /// Buffer designated as this stage's input.
    pub fn input_buffer(&self) -> Option<BufferId> {
        self.designated(self.input)
    }

    /// Buffer designated as this stage's output.
    pub fn output_buffer(&self) -> Option<BufferId> {
        self.designated(self.output)
    }

    fn designated(&self, index: Option<usize>) -> Option<BufferId> {
        match self.args.get(index?)? {
            KernelArg::Buffer(id) => Some(*id),
            KernelArg::Scalar(_) => None,
        }
    }

    fn check_designations(&self, stage: usize) -> Result<()> {
        for (role, index) in [("input", self.input), ("output", self.output)] {
            let Some(index) = index else { continue };
            if self.designated(Some(index)).is_none() {
                return Err(RuntimeError::KernelArgumentError {
                    stage,
                    reason: format!("designated {role} argument {index} is not a buffer argument"),
                });
            }
        }
        Ok(())
    }
}

/// Ordered stages with producer to consumer links.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChainPlan {
    stages: Vec<Stage>,
}

impl ChainPlan {
    /// Create an empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage.
    pub fn then(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Append a stage in place.
    pub fn push(&mut self, stage: Stage) {
        self.stages.push(stage);
    }

    /// Stages in launch order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether the plan has no stages.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Check the producer to consumer links between adjacent stages.
    ///
    /// Where stage *n* designates an output and stage *n + 1* an input, both
    /// must name the same buffer.
    pub fn validate(&self) -> Result<()> {
        for (index, stage) in self.stages.iter().enumerate() {
            stage.check_designations(index)?;
        }

        for (index, pair) in self.stages.windows(2).enumerate() {
            let (Some(expected), Some(found)) = (pair[0].output_buffer(), pair[1].input_buffer())
            else {
                continue;
            };
            if expected != found {
                return Err(RuntimeError::BrokenChain {
                    stage: index + 1,
                    expected,
                    found,
                });
            }
        }

        Ok(())
    }
}

/// Summary of a completed chain run.
#[derive(Debug, Clone, Copy)]
pub struct ChainReport {
    /// Stages enqueued and completed.
    pub stages: usize,
    /// Wall-clock time from first enqueue to the final barrier.
    pub elapsed: Duration,
}

/// Check a stage's arguments against a kernel's parameter list.
pub fn check_arguments(stage: usize, args: &[KernelArg], params: &[KernelParam]) -> Result<()> {
    let fail = |reason: String| RuntimeError::KernelArgumentError { stage, reason };

    if args.len() != params.len() {
        return Err(fail(format!(
            "kernel takes {} arguments but {} were given",
            params.len(),
            args.len()
        )));
    }

    for (index, (arg, param)) in args.iter().zip(params).enumerate() {
        match (arg, param.kind) {
            (KernelArg::Buffer(_), kind) if kind.is_storage() => {}
            (KernelArg::Scalar(_), ParamKind::Uniform { size }) if size == Scalar::SIZE => {}
            (KernelArg::Scalar(value), ParamKind::Uniform { size }) => {
                return Err(fail(format!(
                    "argument {index} is scalar {value} but binding {} is a {size}-byte block",
                    param.binding
                )));
            }
            (KernelArg::Buffer(id), _) => {
                return Err(fail(format!(
                    "argument {index} is {id} but binding {} takes a scalar",
                    param.binding
                )));
            }
            (KernelArg::Scalar(value), _) => {
                return Err(fail(format!(
                    "argument {index} is scalar {value} but binding {} takes a buffer",
                    param.binding
                )));
            }
        }
    }

    // A writable binding may not alias any other binding of the same launch.
    for (index, (arg, param)) in args.iter().zip(params).enumerate() {
        let KernelArg::Buffer(id) = arg else { continue };
        if param.kind != ParamKind::StorageReadWrite {
            continue;
        }
        if let Some(other) = args
            .iter()
            .enumerate()
            .find_map(|(i, a)| (i != index && *a == KernelArg::Buffer(*id)).then_some(i))
        {
            return Err(fail(format!(
                "{id} is bound to writable argument {index} and to argument {other}"
            )));
        }
    }

    Ok(())
}

/// Number of work-groups to launch for `work` with the given work-group size.
pub fn workgroup_count(
    stage: usize,
    work: WorkSize,
    workgroup_size: [u32; 3],
    limits: &wgpu::Limits,
) -> Result<[u32; 3]> {
    let [x, y] = work.extent();
    if x == 0 || y == 0 {
        return Err(RuntimeError::EnqueueError {
            stage,
            reason: format!("global work size {work:?} is empty"),
        });
    }

    let groups = [
        x.div_ceil(workgroup_size[0].max(1)),
        y.div_ceil(workgroup_size[1].max(1)),
        1,
    ];

    let max = limits.max_compute_workgroups_per_dimension;
    if groups[0] > max || groups[1] > max {
        return Err(RuntimeError::EnqueueError {
            stage,
            reason: format!(
                "global work size {work:?} needs {}x{} work-groups, device allows {max} per dimension",
                groups[0], groups[1]
            ),
        });
    }

    Ok(groups)
}

/// Runs chain plans on a session.
pub struct DispatchChain;

impl DispatchChain {
    /// Enqueue every stage of `plan` in order and wait for the whole chain.
    ///
    /// The plan is validated before anything is enqueued. An error aborts the
    /// remaining stages; stages already submitted complete normally and their
    /// buffers stay readable.
    #[tracing::instrument(skip_all, fields(stages = plan.len()))]
    pub fn run(session: &mut Session, plan: &ChainPlan) -> Result<ChainReport> {
        plan.validate()?;

        let ordering = session.config().ordering;
        let timeout = session.config().wait_timeout;
        let start = Instant::now();

        for (index, stage) in plan.stages().iter().enumerate() {
            let _span = tracing::debug_span!("stage", index, kernel = stage.kernel()).entered();

            let submission = enqueue(session, index, stage)?;

            if ordering == Ordering::StageBarrier {
                wait_idle(
                    session.device(),
                    Some(submission),
                    timeout,
                    &format!("stage {index}"),
                )?;
            }
        }

        session.finish()?;

        let report = ChainReport {
            stages: plan.len(),
            elapsed: start.elapsed(),
        };
        tracing::debug!(elapsed = ?report.elapsed, "chain complete");
        Ok(report)
    }
}

enum Resource<'a> {
    Storage(&'a wgpu::Buffer),
    Uniform(wgpu::Buffer),
}

fn enqueue(session: &Session, index: usize, stage: &Stage) -> Result<wgpu::SubmissionIndex> {
    let kernel = session
        .kernel(stage.kernel())
        .ok_or_else(|| RuntimeError::EnqueueError {
            stage: index,
            reason: format!("unknown kernel '{}'", stage.kernel()),
        })?;

    check_arguments(index, stage.args(), kernel.params())?;
    let groups = workgroup_count(
        index,
        stage.work_size(),
        kernel.workgroup_size(),
        session.limits(),
    )?;

    // The driver checks what the host cannot see, such as binding sizes.
    let (_resources, bind_group) = capture_errors(session.device(), || {
        bind_arguments(session, index, stage, kernel)
    })
    .map_err(|e| RuntimeError::KernelArgumentError {
        stage: index,
        reason: format!("device rejected the bindings: {e}"),
    })??;

    let submission = capture_errors(session.device(), || {
        let mut encoder = session
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(kernel.name()),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(kernel.name()),
                timestamp_writes: None,
            });
            pass.set_pipeline(&kernel.pipeline);
            if let Some(bind_group) = &bind_group {
                pass.set_bind_group(0, bind_group, &[]);
            }
            pass.dispatch_workgroups(groups[0], groups[1], groups[2]);
        }
        session.queue().submit(Some(encoder.finish()))
    })
    .map_err(|e| RuntimeError::EnqueueError {
        stage: index,
        reason: format!("device rejected the launch: {e}"),
    })?;

    tracing::debug!(?groups, args = stage.args().len(), "stage enqueued");
    Ok(submission)
}

/// Resolve a stage's arguments and build the bind group for them.
///
/// Scalar blocks are returned with the bind group and live until the
/// submission that uses them.
fn bind_arguments<'s>(
    session: &'s Session,
    index: usize,
    stage: &Stage,
    kernel: &Kernel,
) -> Result<(Vec<Resource<'s>>, Option<wgpu::BindGroup>)> {
    let resources = stage
        .args()
        .iter()
        .enumerate()
        .map(|(position, arg)| match arg {
            KernelArg::Buffer(id) => session
                .buffer(*id)
                .map(|b| Resource::Storage(&b.buffer))
                .map_err(|e| RuntimeError::KernelArgumentError {
                    stage: index,
                    reason: format!("argument {position}: {e}"),
                }),
            KernelArg::Scalar(value) => Ok(Resource::Uniform(session.device().create_buffer_init(
                &wgpu::util::BufferInitDescriptor {
                    label: Some("scalar argument"),
                    contents: &value.to_bytes(),
                    usage: wgpu::BufferUsages::UNIFORM,
                },
            ))),
        })
        .collect::<Result<Vec<_>>>()?;

    let bind_group = kernel.layout.as_ref().map(|layout| {
        let entries: Vec<wgpu::BindGroupEntry> = resources
            .iter()
            .zip(kernel.params())
            .map(|(resource, param)| wgpu::BindGroupEntry {
                binding: param.binding,
                resource: match resource {
                    Resource::Storage(buffer) => buffer.as_entire_binding(),
                    Resource::Uniform(buffer) => buffer.as_entire_binding(),
                },
            })
            .collect();

        session.device().create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(kernel.name()),
            layout,
            entries: &entries,
        })
    });

    Ok((resources, bind_group))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf(n: u32) -> KernelArg {
        KernelArg::Buffer(BufferId::from_raw(n))
    }

    fn vadd_params() -> Vec<KernelParam> {
        let param = |binding, kind| KernelParam {
            binding,
            name: None,
            kind,
        };
        vec![
            param(0, ParamKind::StorageRead),
            param(1, ParamKind::StorageRead),
            param(2, ParamKind::StorageReadWrite),
            param(3, ParamKind::Uniform { size: 4 }),
        ]
    }

    fn vadd_stage(a: u32, b: u32, c: u32) -> Stage {
        Stage::new(
            "vadd",
            vec![buf(a), buf(b), buf(c), Scalar::U32(1024).into()],
            WorkSize::One(1024),
        )
        .with_input(0)
        .with_output(2)
    }

    #[test]
    fn test_arguments_accepted() {
        let stage = vadd_stage(0, 1, 2);
        assert!(check_arguments(0, stage.args(), &vadd_params()).is_ok());
    }

    #[test]
    fn test_argument_count_mismatch() {
        let err = check_arguments(3, &[buf(0), buf(1)], &vadd_params()).unwrap_err();
        assert_eq!(err.stage(), Some(3));
        assert!(err.to_string().contains("takes 4 arguments but 2"));
    }

    #[test]
    fn test_argument_kind_mismatch() {
        let args = [buf(0), Scalar::F32(1.0).into(), buf(2), Scalar::U32(4).into()];
        let err = check_arguments(1, &args, &vadd_params()).unwrap_err();
        assert!(matches!(err, RuntimeError::KernelArgumentError { stage: 1, .. }));

        let args = [buf(0), buf(1), buf(2), buf(3)];
        let err = check_arguments(2, &args, &vadd_params()).unwrap_err();
        assert!(err.to_string().contains("takes a scalar"));
    }

    #[test]
    fn test_writable_alias_rejected() {
        let args = [buf(0), buf(2), buf(2), Scalar::U32(4).into()];
        let err = check_arguments(0, &args, &vadd_params()).unwrap_err();
        assert!(err.to_string().contains("writable"));

        // Two read-only bindings may share a buffer.
        let args = [buf(0), buf(0), buf(2), Scalar::U32(4).into()];
        assert!(check_arguments(0, &args, &vadd_params()).is_ok());
    }

    #[test]
    fn test_workgroup_count() {
        let limits = wgpu::Limits::default();
        assert_eq!(
            workgroup_count(0, WorkSize::One(1024), [64, 1, 1], &limits).unwrap(),
            [16, 1, 1]
        );
        assert_eq!(
            workgroup_count(0, WorkSize::One(1000), [64, 1, 1], &limits).unwrap(),
            [16, 1, 1]
        );
        assert_eq!(
            workgroup_count(0, WorkSize::Two(100, 30), [8, 8, 1], &limits).unwrap(),
            [13, 4, 1]
        );
    }

    #[test]
    fn test_workgroup_count_rejects_bad_extent() {
        let limits = wgpu::Limits::default();
        let err = workgroup_count(4, WorkSize::One(0), [64, 1, 1], &limits).unwrap_err();
        assert!(matches!(err, RuntimeError::EnqueueError { stage: 4, .. }));

        let too_many = limits.max_compute_workgroups_per_dimension + 1;
        let err = workgroup_count(0, WorkSize::One(too_many), [1, 1, 1], &limits).unwrap_err();
        assert_eq!(err.kind(), "EnqueueError");
    }

    #[test]
    fn test_rebinding() {
        let mut stage = vadd_stage(0, 1, 2);
        assert_eq!(stage.bind(0, BufferId::from_raw(2)), Some(buf(0)));
        assert_eq!(stage.bind(2, BufferId::from_raw(5)), Some(buf(2)));
        assert_eq!(stage.bind(9, BufferId::from_raw(5)), None);
        assert_eq!(stage.input_buffer(), Some(BufferId::from_raw(2)));
        assert_eq!(stage.output_buffer(), Some(BufferId::from_raw(5)));
    }

    #[test]
    fn test_validate_linked_chain() {
        let plan = ChainPlan::new()
            .then(vadd_stage(0, 1, 2))
            .then(vadd_stage(2, 3, 4))
            .then(vadd_stage(4, 5, 6));
        assert!(plan.validate().is_ok());
        assert_eq!(plan.len(), 3);
    }

    #[test]
    fn test_validate_broken_chain() {
        let plan = ChainPlan::new()
            .then(vadd_stage(0, 1, 2))
            .then(vadd_stage(2, 3, 4))
            .then(vadd_stage(5, 3, 6));

        match plan.validate().unwrap_err() {
            RuntimeError::BrokenChain {
                stage,
                expected,
                found,
            } => {
                assert_eq!(stage, 2);
                assert_eq!(expected, BufferId::from_raw(4));
                assert_eq!(found, BufferId::from_raw(5));
            }
            other => panic!("expected BrokenChain, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_ignores_undesignated_stages() {
        let free = Stage::new("vadd", vec![buf(7), buf(8), buf(9)], WorkSize::One(8));
        let plan = ChainPlan::new().then(vadd_stage(0, 1, 2)).then(free);
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_scalar_designation() {
        let stage = vadd_stage(0, 1, 2).with_output(3);
        let err = ChainPlan::new().then(stage).validate().unwrap_err();
        assert!(matches!(err, RuntimeError::KernelArgumentError { stage: 0, .. }));
    }
}
