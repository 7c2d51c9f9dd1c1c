//! Expansion of a challenge schedule into a per-worker task matrix.
//!
//! The [`Allocator`] decides which tasks run on which worker and where the
//! synchronization barriers sit. Its output is a rectangular matrix: one
//! row per worker, one column per step. Cells are tasks, join points, or
//! idle markers (inserted when a group has fewer sub-tasks than the global
//! worker count; workers skip them).
//!
//! Every worker row starts with an artificial join point so the
//! coordinator can release all workers at the same time, and each group is
//! followed by its closing join point.

use std::{collections::BTreeSet, sync::Arc};

use crate::track::{ParallelGroup, Task};

/// A synchronization point all workers must reach before any may proceed.
#[derive(Debug)]
pub struct JoinPoint {
    /// Monotonically increasing barrier id, unique within an allocation.
    pub id: usize,
    /// Worker indices whose preceding task completes the parallel group.
    /// Empty when no such task exists.
    pub completing_clients: Vec<u32>,
}

impl JoinPoint {
    fn new(id: usize, completing_clients: Vec<u32>) -> Self {
        Self { id, completing_clients }
    }

    /// Whether a task preceding this join point can complete its group.
    pub fn preceding_task_completes_parent(&self) -> bool {
        !self.completing_clients.is_empty()
    }
}

impl PartialEq for JoinPoint {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl std::fmt::Display for JoinPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JoinPoint({})", self.id)
    }
}

/// One cell of the allocation matrix.
#[derive(Debug, Clone)]
pub enum TaskCell {
    /// A task this worker must execute.
    Task(Arc<Task>),
    /// A barrier this worker must report and wait at.
    Barrier(Arc<JoinPoint>),
    /// Keeps the matrix rectangular; workers skip these.
    Idle,
}

/// The expanded allocation: matrix, barriers, and per-step operations.
#[derive(Debug)]
pub struct Allocation {
    /// `clients` rows, each `2 · groups + 1` cells long.
    pub matrix: Vec<Vec<TaskCell>>,
    /// All join points, in barrier order.
    pub join_points: Vec<Arc<JoinPoint>>,
    /// Operation names executed between consecutive barriers, per step.
    pub ops_per_step: Vec<BTreeSet<String>>,
}

impl Allocation {
    /// The number of workers required by this allocation.
    pub fn clients(&self) -> u32 {
        self.matrix.len() as u32
    }

    /// The number of steps, i.e. barriers to cross after the initial one.
    pub fn steps(&self) -> usize {
        self.join_points.len() - 1
    }
}

/// Expands an ordered list of parallel groups into an [`Allocation`].
pub struct Allocator<'a> {
    schedule: &'a [ParallelGroup],
}

impl<'a> Allocator<'a> {
    /// Creates an allocator for the given schedule.
    pub fn new(schedule: &'a [ParallelGroup]) -> Self {
        Self { schedule }
    }

    /// The maximum number of clients over all groups, i.e. the number of
    /// workers the benchmark needs.
    pub fn clients(&self) -> u32 {
        self.schedule.iter().map(|g| g.clients()).max().unwrap_or(1).max(1)
    }

    /// Computes the allocation matrix and its barriers.
    pub fn allocate(&self) -> Allocation {
        let max_clients = self.clients() as usize;
        let mut matrix: Vec<Vec<TaskCell>> = vec![Vec::new(); max_clients];
        let mut join_points = Vec::new();
        let mut ops_per_step = Vec::new();

        // Artificial initial barrier so all workers start in lock-step.
        let mut next = Arc::new(JoinPoint::new(0, Vec::new()));
        join_points.push(next.clone());
        for row in &mut matrix {
            row.push(TaskCell::Barrier(next.clone()));
        }

        for (group_idx, group) in self.schedule.iter().enumerate() {
            let mut cursor = 0usize;
            let mut completing = Vec::new();
            let mut ops = BTreeSet::new();

            for sub_task in &group.tasks {
                ops.insert(sub_task.operation.name.clone());
                for client_index in cursor..cursor + sub_task.clients as usize {
                    let final_index = client_index % max_clients;
                    if sub_task.completes_parent {
                        completing.push(final_index as u32);
                    }
                    matrix[final_index].push(TaskCell::Task(sub_task.clone()));
                }
                cursor += sub_task.clients as usize;
            }

            // Uneven distribution between tasks and workers: pad the short
            // rows so the matrix stays rectangular.
            if cursor % max_clients > 0 {
                for row in matrix.iter_mut().skip(cursor % max_clients) {
                    row.push(TaskCell::Idle);
                }
            }

            next = Arc::new(JoinPoint::new(group_idx + 1, completing));
            join_points.push(next.clone());
            for row in &mut matrix {
                row.push(TaskCell::Barrier(next.clone()));
            }
            ops_per_step.push(ops);
        }

        Allocation { matrix, join_points, ops_per_step }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::{Operation, TaskBounds};
    use rand::{Rng, SeedableRng, rngs::SmallRng};

    fn task(name: &str, clients: u32) -> Task {
        Task::new(
            Operation::new(name, "noop"),
            clients,
            TaskBounds::Iterations { warmup: 0, measure: clients as u64 },
        )
    }

    fn group(tasks: Vec<Task>) -> ParallelGroup {
        ParallelGroup::new(tasks)
    }

    #[test]
    fn single_task_single_worker() {
        let schedule = vec![group(vec![task("a", 1)])];
        let alloc = Allocator::new(&schedule).allocate();

        assert_eq!(alloc.clients(), 1);
        assert_eq!(alloc.steps(), 1);
        assert_eq!(alloc.matrix[0].len(), 3);
        assert!(matches!(alloc.matrix[0][0], TaskCell::Barrier(ref jp) if jp.id == 0));
        assert!(matches!(alloc.matrix[0][1], TaskCell::Task(_)));
        assert!(matches!(alloc.matrix[0][2], TaskCell::Barrier(ref jp) if jp.id == 1));
    }

    #[test]
    fn sequential_groups_share_all_workers() {
        let schedule = vec![group(vec![task("t1", 2)]), group(vec![task("t2", 2)])];
        let alloc = Allocator::new(&schedule).allocate();

        assert_eq!(alloc.clients(), 2);
        assert_eq!(alloc.steps(), 2);
        for row in &alloc.matrix {
            assert_eq!(row.len(), 5);
            assert!(matches!(row[1], TaskCell::Task(_)));
            assert!(matches!(row[3], TaskCell::Task(_)));
        }
        assert_eq!(alloc.ops_per_step.len(), 2);
        assert!(alloc.ops_per_step[0].contains("t1"));
        assert!(alloc.ops_per_step[1].contains("t2"));
    }

    #[test]
    fn uneven_group_pads_with_idle() {
        // Two workers overall, but the second group only occupies one.
        let schedule = vec![group(vec![task("wide", 2)]), group(vec![task("narrow", 1)])];
        let alloc = Allocator::new(&schedule).allocate();

        assert!(matches!(alloc.matrix[0][3], TaskCell::Task(_)));
        assert!(matches!(alloc.matrix[1][3], TaskCell::Idle));
    }

    #[test]
    fn completing_task_records_its_workers_in_the_barrier() {
        let schedule = vec![group(vec![
            task("a", 1).completing_parent(),
            task("b", 1),
        ])];
        let alloc = Allocator::new(&schedule).allocate();

        let closing = &alloc.join_points[1];
        assert!(closing.preceding_task_completes_parent());
        assert_eq!(closing.completing_clients, vec![0]);
        assert!(!alloc.join_points[0].preceding_task_completes_parent());
    }

    #[test]
    fn parallel_group_width_is_the_sum_of_its_sub_task_clients() {
        let schedule =
            vec![group(vec![task("a", 1), task("b", 1)]), group(vec![task("wide", 2)])];
        let alloc = Allocator::new(&schedule).allocate();

        assert_eq!(alloc.clients(), 2);
        assert!(matches!(alloc.matrix[0][1], TaskCell::Task(ref t) if t.operation.name == "a"));
        assert!(matches!(alloc.matrix[1][1], TaskCell::Task(ref t) if t.operation.name == "b"));
    }

    #[test]
    fn more_tasks_than_workers_wrap_around() {
        // Five single-client tasks capped at two workers: one worker runs
        // three, the other two plus an idle marker.
        let schedule =
            vec![group((0..5).map(|i| task(&format!("p{i}"), 1)).collect()).with_clients(2)];
        let alloc = Allocator::new(&schedule).allocate();

        assert_eq!(alloc.clients(), 2);
        let row_len = alloc.matrix[0].len();
        assert!(alloc.matrix.iter().all(|row| row.len() == row_len));

        let tasks_in_row = |row: &Vec<TaskCell>| {
            row.iter().filter(|c| matches!(c, TaskCell::Task(_))).count()
        };
        let mut counts: Vec<usize> = alloc.matrix.iter().map(tasks_in_row).collect();
        counts.sort_unstable();
        assert_eq!(counts, vec![2, 3]);
    }

    /// A small schedule generator for the structural properties below.
    fn random_schedule(rng: &mut SmallRng) -> Vec<ParallelGroup> {
        (0..rng.gen_range(1..5))
            .map(|g| {
                group(
                    (0..rng.gen_range(1..4))
                        .map(|t| {
                            let mut task = task(&format!("g{g}t{t}"), rng.gen_range(1..5));
                            if rng.gen_bool(0.2) {
                                task = task.completing_parent();
                            }
                            task
                        })
                        .collect(),
                )
            })
            .collect()
    }

    #[test]
    fn matrix_is_always_rectangular_with_max_clients_rows() {
        let mut rng = SmallRng::seed_from_u64(42);
        for _ in 0..200 {
            let schedule = random_schedule(&mut rng);
            let max_clients = schedule.iter().map(|g| g.clients()).max().unwrap();

            let alloc = Allocator::new(&schedule).allocate();
            assert_eq!(alloc.clients(), max_clients);
            let width = 2 * schedule.len() + 1;
            assert!(alloc.matrix.iter().all(|row| row.len() == width));
        }
    }

    #[test]
    fn capped_groups_stay_rectangular() {
        let mut rng = SmallRng::seed_from_u64(3);
        for _ in 0..200 {
            let schedule: Vec<ParallelGroup> = random_schedule(&mut rng)
                .into_iter()
                .map(|g| {
                    if rng.gen_bool(0.5) {
                        let cap = rng.gen_range(1..4);
                        ParallelGroup { clients: Some(cap), ..g }
                    } else {
                        g
                    }
                })
                .collect();

            let alloc = Allocator::new(&schedule).allocate();
            assert_eq!(alloc.clients(), schedule.iter().map(|g| g.clients()).max().unwrap());
            let width = alloc.matrix[0].len();
            assert!(alloc.matrix.iter().all(|row| row.len() == width));
        }
    }

    #[test]
    fn columns_are_uniform_across_workers() {
        let mut rng = SmallRng::seed_from_u64(7);
        for _ in 0..200 {
            let schedule = random_schedule(&mut rng);
            let alloc = Allocator::new(&schedule).allocate();

            for col in 0..alloc.matrix[0].len() {
                let mut barrier_id = None;
                let mut saw_task = false;
                for row in &alloc.matrix {
                    match &row[col] {
                        TaskCell::Barrier(jp) => {
                            assert!(!saw_task, "column {col} mixes tasks and barriers");
                            match barrier_id {
                                None => barrier_id = Some(jp.id),
                                Some(id) => assert_eq!(id, jp.id),
                            }
                        }
                        TaskCell::Task(_) | TaskCell::Idle => {
                            assert!(barrier_id.is_none(), "column {col} mixes tasks and barriers");
                            saw_task = true;
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn completing_sets_only_follow_completing_tasks() {
        let mut rng = SmallRng::seed_from_u64(99);
        for _ in 0..200 {
            let schedule = random_schedule(&mut rng);
            let alloc = Allocator::new(&schedule).allocate();

            for (step, jp) in alloc.join_points.iter().enumerate().skip(1) {
                let group_has_completing =
                    schedule[step - 1].tasks.iter().any(|t| t.completes_parent);
                assert_eq!(jp.preceding_task_completes_parent(), group_has_completing);
            }
        }
    }

    #[test]
    fn allocation_is_deterministic() {
        let mut rng = SmallRng::seed_from_u64(1);
        for _ in 0..50 {
            let schedule = random_schedule(&mut rng);
            let a = Allocator::new(&schedule).allocate();
            let b = Allocator::new(&schedule).allocate();

            assert_eq!(a.matrix.len(), b.matrix.len());
            for (ra, rb) in a.matrix.iter().zip(&b.matrix) {
                assert_eq!(ra.len(), rb.len());
                for (ca, cb) in ra.iter().zip(rb) {
                    match (ca, cb) {
                        (TaskCell::Task(ta), TaskCell::Task(tb)) => {
                            assert_eq!(ta.operation.name, tb.operation.name)
                        }
                        (TaskCell::Barrier(ja), TaskCell::Barrier(jb)) => {
                            assert_eq!(ja.id, jb.id);
                            assert_eq!(ja.completing_clients, jb.completing_clients);
                        }
                        (TaskCell::Idle, TaskCell::Idle) => {}
                        _ => panic!("matrices differ in cell type"),
                    }
                }
            }
        }
    }
}
