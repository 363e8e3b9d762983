use std::time::Instant;

/// A callable with an optional expiration deadline. A task whose deadline
/// has passed by the time the dispatcher gets to it is dropped un-run, but
/// still released (its closure, and anything it captured, is simply
/// dropped normally).
pub struct Task {
    deadline: Option<Instant>,
    job: Box<dyn FnOnce() + Send>,
}

impl Task {
    pub fn new<F>(job: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Task { deadline: None, job: Box::new(job) }
    }

    pub fn with_deadline<F>(deadline: Instant, job: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Task { deadline: Some(deadline), job: Box::new(job) }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.map(|d| now > d).unwrap_or(false)
    }

    pub fn run(self) {
        (self.job)()
    }
}
