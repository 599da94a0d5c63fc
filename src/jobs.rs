use std::collections::BTreeMap;
use std::fmt;

/// The lifecycle state of a tracked job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Stopped,
    Done,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Running => write!(f, "Running"),
            JobState::Stopped => write!(f, "Stopped"),
            JobState::Done => write!(f, "Done"),
        }
    }
}

/// A status change reported by `waitpid` for one pipeline member.
/// Signal deaths carry their shell-style exit code (`128 + signo`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChildEvent {
    Exited(i32),
    Stopped,
    Continued,
}

/// One tracked pipeline.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: usize,
    /// Process-group id: the pid of the pipeline's first external child.
    pub pgid: u32,
    /// Members not yet reaped. Kept so a reaped pid can be resolved to its
    /// job after the process itself is gone.
    pids: Vec<u32>,
    pub state: JobState,
    /// The original command line, for display.
    pub cmdline: String,
    /// Monotonic insertion order; job ids are recycled, this is not.
    seq: u64,
}

/// The shell's job table, keyed by job id with a secondary pgid lookup.
///
/// All mutation happens on the main thread; the SIGCHLD handler only sets
/// an atomic flag, and the main loop applies the drained wait statuses here
/// via [`JobTable::apply_event`].
#[derive(Clone, Default)]
pub struct JobTable {
    jobs: BTreeMap<usize, Job>,
    next_seq: u64,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly launched pipeline. The id is the smallest positive
    /// integer not currently in use (ids are recycled after removal).
    pub fn add(&mut self, pgid: u32, pids: Vec<u32>, cmdline: String) -> usize {
        let id = (1..)
            .find(|id| !self.jobs.contains_key(id))
            .expect("job id space exhausted");
        let seq = self.next_seq;
        self.next_seq += 1;
        log::debug!("job [{id}] pgid {pgid} registered: {cmdline}");
        self.jobs.insert(
            id,
            Job {
                id,
                pgid,
                pids,
                state: JobState::Running,
                cmdline,
                seq,
            },
        );
        id
    }

    pub fn by_id(&self, id: usize) -> Option<&Job> {
        self.jobs.get(&id)
    }

    pub fn by_pgid(&self, pgid: u32) -> Option<&Job> {
        self.jobs.values().find(|j| j.pgid == pgid)
    }

    pub fn update_state(&mut self, pgid: u32, state: JobState) {
        if let Some(job) = self.jobs.values_mut().find(|j| j.pgid == pgid) {
            job.state = state;
        }
    }

    pub fn remove(&mut self, id: usize) -> Option<Job> {
        self.jobs.remove(&id)
    }

    /// All jobs ordered by id ascending.
    pub fn list(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    /// Most recently added job, the `fg` default.
    pub fn most_recent_id(&self) -> Option<usize> {
        self.jobs.values().max_by_key(|j| j.seq).map(|j| j.id)
    }

    /// Most recently added stopped job, the `bg` default.
    pub fn most_recent_stopped_id(&self) -> Option<usize> {
        self.jobs
            .values()
            .filter(|j| j.state == JobState::Stopped)
            .max_by_key(|j| j.seq)
            .map(|j| j.id)
    }

    /// Apply one drained wait status to the job owning `pid`.
    pub fn apply_event(&mut self, pid: u32, event: ChildEvent) {
        let Some(job) = self.jobs.values_mut().find(|j| j.pids.contains(&pid)) else {
            // Not ours (e.g. a command-substitution child already collected).
            return;
        };
        match event {
            ChildEvent::Exited(_) => {
                job.pids.retain(|&p| p != pid);
                if job.pids.is_empty() {
                    job.state = JobState::Done;
                }
            }
            ChildEvent::Stopped => job.state = JobState::Stopped,
            ChildEvent::Continued => job.state = JobState::Running,
        }
    }

    /// Mark the reap of `pid` during a synchronous foreground wait.
    /// Returns true when every member of the job has now been reaped.
    pub fn note_foreground_reap(&mut self, pgid: u32, pid: u32) -> bool {
        let Some(job) = self.jobs.values_mut().find(|j| j.pgid == pgid) else {
            return true;
        };
        job.pids.retain(|&p| p != pid);
        if job.pids.is_empty() {
            job.state = JobState::Done;
            true
        } else {
            false
        }
    }

    /// Remove and return all finished jobs, for prompt-time reporting.
    pub fn reap_done(&mut self) -> Vec<Job> {
        let done_ids: Vec<usize> = self
            .jobs
            .values()
            .filter(|j| j.state == JobState::Done)
            .map(|j| j.id)
            .collect();
        done_ids
            .into_iter()
            .filter_map(|id| self.jobs.remove(&id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_assigns_smallest_free_id() {
        let mut t = JobTable::new();
        assert_eq!(t.add(100, vec![100], "a".into()), 1);
        assert_eq!(t.add(200, vec![200], "b".into()), 2);
        assert_eq!(t.add(300, vec![300], "c".into()), 3);

        t.remove(2);
        assert_eq!(t.add(400, vec![400], "d".into()), 2);
        assert_eq!(t.add(500, vec![500], "e".into()), 4);
    }

    #[test]
    fn list_is_ordered_by_id() {
        let mut t = JobTable::new();
        t.add(100, vec![100], "a".into());
        t.add(200, vec![200], "b".into());
        t.add(300, vec![300], "c".into());
        t.remove(1);
        t.add(400, vec![400], "d".into());

        let ids: Vec<usize> = t.list().map(|j| j.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn by_pgid_finds_jobs() {
        let mut t = JobTable::new();
        let id = t.add(4242, vec![4242, 4243], "ls | wc".into());
        assert_eq!(t.by_pgid(4242).unwrap().id, id);
        assert!(t.by_pgid(9999).is_none());
    }

    #[test]
    fn job_is_done_when_all_members_exit() {
        let mut t = JobTable::new();
        let id = t.add(10, vec![10, 11], "a | b".into());

        t.apply_event(11, ChildEvent::Exited(0));
        assert_eq!(t.by_id(id).unwrap().state, JobState::Running);

        t.apply_event(10, ChildEvent::Exited(0));
        assert_eq!(t.by_id(id).unwrap().state, JobState::Done);
    }

    #[test]
    fn stop_and_continue_events_flip_state() {
        let mut t = JobTable::new();
        let id = t.add(10, vec![10], "sleep 100".into());

        t.apply_event(10, ChildEvent::Stopped);
        assert_eq!(t.by_id(id).unwrap().state, JobState::Stopped);

        t.apply_event(10, ChildEvent::Continued);
        assert_eq!(t.by_id(id).unwrap().state, JobState::Running);
    }

    #[test]
    fn events_for_unknown_pids_are_ignored() {
        let mut t = JobTable::new();
        t.add(10, vec![10], "sleep 1".into());
        t.apply_event(999, ChildEvent::Exited(0));
        assert_eq!(t.by_id(1).unwrap().state, JobState::Running);
    }

    #[test]
    fn reap_done_removes_and_returns_finished_jobs() {
        let mut t = JobTable::new();
        t.add(10, vec![10], "fast".into());
        t.add(20, vec![20], "slow".into());

        t.apply_event(10, ChildEvent::Exited(0));
        let done = t.reap_done();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].cmdline, "fast");
        assert!(t.by_id(1).is_none());
        assert_eq!(t.by_id(2).unwrap().state, JobState::Running);
    }

    #[test]
    fn most_recent_tracks_insertion_not_id() {
        let mut t = JobTable::new();
        t.add(10, vec![10], "a".into());
        t.add(20, vec![20], "b".into());
        t.remove(1);
        // Recycles id 1, but it is the most recent addition.
        t.add(30, vec![30], "c".into());
        assert_eq!(t.most_recent_id(), Some(1));
    }

    #[test]
    fn most_recent_stopped_skips_running_jobs() {
        let mut t = JobTable::new();
        t.add(10, vec![10], "a".into());
        t.add(20, vec![20], "b".into());
        t.apply_event(10, ChildEvent::Stopped);
        assert_eq!(t.most_recent_stopped_id(), Some(1));
    }

    #[test]
    fn foreground_reap_marks_done_after_last_member() {
        let mut t = JobTable::new();
        t.add(10, vec![10, 11], "a | b".into());
        assert!(!t.note_foreground_reap(10, 10));
        assert!(t.note_foreground_reap(10, 11));
        assert_eq!(t.by_id(1).unwrap().state, JobState::Done);
    }
}
