// Partition planning and the parallel runner: coverage, error reporting,
// and retry after a transient task failure.
use proptest::prelude::*;
use tatami::error::KernelError;
use tatami::parallel::{plan_slices, run_parallel, SharedSlice};
use tatami::runtime::CpuContext;

#[test]
fn test_plan_slices_shapes() {
    assert_eq!(plan_slices(10, 3), vec![0..4, 4..8, 8..10]);
    assert_eq!(plan_slices(2, 4), vec![0..1, 1..2, 2..2, 2..2]);
    assert_eq!(plan_slices(0, 2), vec![0..0, 0..0]);
    assert_eq!(plan_slices(5, 1), vec![0..5]);
    // the planner clamps zero to one; the runner rejects it outright
    assert_eq!(plan_slices(3, 0), vec![0..3]);
}

#[test]
fn test_run_parallel_rejects_zero_thread_count() {
    let ctx = CpuContext::new(2).unwrap();
    let err = run_parallel(ctx.pool(), 10, 0, |_task_id, _range| Ok(())).unwrap_err();
    assert!(matches!(err, KernelError::Precondition(_)));
}

proptest! {
    #[test]
    fn prop_plan_slices_partitions_exactly(total in 0usize..500, threads in 1usize..16) {
        let slices = plan_slices(total, threads);
        prop_assert_eq!(slices.len(), threads);
        let mut next = 0;
        for s in &slices {
            prop_assert_eq!(s.start, next);
            prop_assert!(s.end >= s.start);
            next = s.end;
        }
        prop_assert_eq!(next, total);
    }
}

#[test]
fn test_run_parallel_covers_every_item() {
    let ctx = CpuContext::new(4).unwrap();
    let mut data = vec![0usize; 37];
    let shared = SharedSlice::new(&mut data);
    run_parallel(ctx.pool(), 37, ctx.thread_count(), |task_id, range| {
        let out = unsafe { shared.slice_mut(range.clone()) };
        for (off, v) in out.iter_mut().enumerate() {
            *v = (task_id + 1) * 1000 + range.start + off;
        }
        Ok(())
    })
    .unwrap();
    for (i, &v) in data.iter().enumerate() {
        assert_eq!(v % 1000, i % 1000, "item {} not written by its slice", i);
        assert!(v >= 1000, "item {} never written", i);
    }
}

#[test]
fn test_run_parallel_reports_failing_task() {
    let ctx = CpuContext::new(3).unwrap();
    let err = run_parallel(ctx.pool(), 30, 3, |task_id, _range| {
        if task_id == 1 {
            Err(KernelError::precondition("injected"))
        } else {
            Ok(())
        }
    })
    .unwrap_err();
    match err {
        KernelError::Task { task_id, source } => {
            assert_eq!(task_id, 1);
            assert!(matches!(*source, KernelError::Precondition(_)));
        }
        other => panic!("expected Task error, got {:?}", other),
    }
}

#[test]
fn test_failed_run_leaves_other_slices_intact_and_retries() {
    let ctx = CpuContext::new(4).unwrap();
    let mut data = vec![0u32; 40];

    {
        let shared = SharedSlice::new(&mut data);
        let result = run_parallel(ctx.pool(), 40, 4, |task_id, range| {
            if task_id == 2 {
                return Err(KernelError::precondition("transient"));
            }
            let out = unsafe { shared.slice_mut(range) };
            out.fill(7);
            Ok(())
        });
        assert!(result.is_err());
    }
    // tasks 0, 1 and 3 completed; only task 2's slice is untouched
    assert!(data[..20].iter().all(|&v| v == 7));
    assert!(data[20..30].iter().all(|&v| v == 0));
    assert!(data[30..].iter().all(|&v| v == 7));

    // retry without the fault finishes the job
    let shared = SharedSlice::new(&mut data);
    run_parallel(ctx.pool(), 40, 4, |_task_id, range| {
        let out = unsafe { shared.slice_mut(range) };
        out.fill(7);
        Ok(())
    })
    .unwrap();
    assert!(data.iter().all(|&v| v == 7));
}

#[test]
fn test_empty_work_runs_no_tasks() {
    let ctx = CpuContext::new(2).unwrap();
    run_parallel(ctx.pool(), 0, 2, |_task_id, _range| {
        Err(KernelError::precondition("must not be called"))
    })
    .unwrap();
}
