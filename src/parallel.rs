//! Static work partitioning and a fail-fast parallel runner on top of rayon.
//! The runner never mutates kernel state itself; a failing task surfaces its
//! id and leaves the other tasks' disjoint output regions untouched, so a Run
//! can be retried after a transient failure.

use std::marker::PhantomData;
use std::ops::Range;

use rayon::prelude::*;
use rayon::ThreadPool;

use crate::error::KernelError;
use crate::kernels::utils::up_div;

/// Splits `total` work items into exactly `thread_count` contiguous ranges of
/// ceiling size. Trailing ranges may be empty when total < thread_count.
pub fn plan_slices(total: usize, thread_count: usize) -> Vec<Range<usize>> {
    let threads = thread_count.max(1);
    let per = up_div(total, threads);
    let mut slices = Vec::with_capacity(threads);
    let mut start = 0;
    for _ in 0..threads {
        let end = (start + per).min(total);
        slices.push(start..end);
        start = end;
    }
    slices
}

/// Runs `task` once per non-empty slice on the given pool. All tasks run to
/// completion; the first error in slice order is returned, wrapped with the
/// failing task id. A zero `thread_count` is a caller bug and is rejected.
pub fn run_parallel<F>(
    pool: &ThreadPool,
    total: usize,
    thread_count: usize,
    task: F,
) -> Result<(), KernelError>
where
    F: Fn(usize, Range<usize>) -> Result<(), KernelError> + Sync,
{
    if thread_count == 0 {
        return Err(KernelError::precondition("thread count must be non-zero"));
    }
    let slices = plan_slices(total, thread_count);
    pool.install(|| {
        slices
            .into_par_iter()
            .enumerate()
            .map(|(task_id, range)| {
                if range.is_empty() {
                    return Ok(());
                }
                task(task_id, range).map_err(|source| KernelError::Task {
                    task_id,
                    source: Box::new(source),
                })
            })
            .reduce(|| Ok(()), Result::and)
    })
}

/// A mutable slice that tasks may write concurrently, provided no two tasks
/// ever write the same element.
pub struct SharedSlice<'a, T> {
    ptr: *mut T,
    len: usize,
    _marker: PhantomData<&'a mut [T]>,
}

unsafe impl<T: Send> Send for SharedSlice<'_, T> {}
unsafe impl<T: Send> Sync for SharedSlice<'_, T> {}

impl<'a, T> SharedSlice<'a, T> {
    pub fn new(slice: &'a mut [T]) -> Self {
        SharedSlice {
            ptr: slice.as_mut_ptr(),
            len: slice.len(),
            _marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// # Safety
    ///
    /// `range` must be in bounds and the elements each concurrent caller
    /// actually writes must be disjoint, even when the ranges themselves
    /// overlap (e.g. channel-interleaved writes into a shared plane).
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn slice_mut(&self, range: Range<usize>) -> &mut [T] {
        debug_assert!(range.end <= self.len);
        std::slice::from_raw_parts_mut(self.ptr.add(range.start), range.end - range.start)
    }
}
