// src/engine/timers.rs

//! Timer state of one operator.
//!
//! Deadlines are absolute wall-clock times so re-arming with unchanged task
//! state yields an identical value. The actor loop sleeps until the earliest
//! armed deadline.

use chrono::{DateTime, Utc};

/// When the execute timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    /// As soon as the actor is idle.
    Now,
    At(DateTime<Utc>),
}

impl Deadline {
    /// Deadline for a task's `run_after`; absent means immediately.
    pub fn from_run_after(run_after: Option<DateTime<Utc>>) -> Self {
        match run_after {
            Some(at) => Deadline::At(at),
            None => Deadline::Now,
        }
    }

    fn remaining(&self, now: DateTime<Utc>) -> std::time::Duration {
        match self {
            Deadline::Now => std::time::Duration::ZERO,
            Deadline::At(at) => (*at - now).to_std().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Execute,
    Evaluate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timers {
    execute: Option<Deadline>,
    evaluate: Option<DateTime<Utc>>,
}

impl Timers {
    pub fn arm_execute(&mut self, deadline: Deadline) {
        self.execute = Some(deadline);
    }

    pub fn disarm_execute(&mut self) {
        self.execute = None;
    }

    pub fn arm_evaluate(&mut self, at: DateTime<Utc>) {
        self.evaluate = Some(at);
    }

    pub fn disarm_evaluate(&mut self) {
        self.evaluate = None;
    }

    pub fn disarm_all(&mut self) {
        *self = Self::default();
    }

    pub fn execute(&self) -> Option<Deadline> {
        self.execute
    }

    pub fn evaluate(&self) -> Option<DateTime<Utc>> {
        self.evaluate
    }

    pub fn is_idle(&self) -> bool {
        self.execute.is_none() && self.evaluate.is_none()
    }

    /// Earliest armed timer and how long until it fires.
    ///
    /// Execute wins a tie.
    pub fn next(&self, now: DateTime<Utc>) -> Option<(TimerKind, std::time::Duration)> {
        let execute = self.execute.map(|d| (TimerKind::Execute, d.remaining(now)));
        let evaluate = self
            .evaluate
            .map(|at| (TimerKind::Evaluate, Deadline::At(at).remaining(now)));
        match (execute, evaluate) {
            (Some(x), Some(e)) => Some(if e.1 < x.1 { e } else { x }),
            (x, e) => x.or(e),
        }
    }
}

/// Resolve when `next` is due; never resolves when nothing is armed.
pub async fn fire(next: Option<(TimerKind, std::time::Duration)>) -> TimerKind {
    match next {
        Some((kind, wait)) => {
            tokio::time::sleep(wait).await;
            kind
        }
        None => std::future::pending().await,
    }
}
