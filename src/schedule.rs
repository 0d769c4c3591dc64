//! Interval jobs on a dedicated thread, stopped when their handle is dropped.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc::{RecvTimeoutError, Sender, channel},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{Context, Result};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FirstRun {
    Immediately,
    AfterInterval,
}

enum Control {
    RunNow,
    Stop,
}

/// Handle to a running interval job.
///
/// Dropping it stops the worker and waits for it, so once the handle is gone
/// the job will never run again.
pub struct ScheduledTask {
    name: String,
    control: Sender<Control>,
    pending: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

/// Asks a task to run its job ahead of schedule.
#[derive(Clone)]
pub struct Trigger {
    control: Sender<Control>,
    pending: Arc<AtomicBool>,
}

impl Trigger {
    /// Returns false once the task is gone. Triggers that arrive before the
    /// job gets to run collapse into a single run.
    pub fn fire(&self) -> bool {
        if self.pending.swap(true, Ordering::AcqRel) {
            return true;
        }
        self.control.send(Control::RunNow).is_ok()
    }
}

impl ScheduledTask {
    pub fn every<F>(name: &str, interval: Duration, first: FirstRun, mut job: F) -> Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let (control, rx) = channel();
        let pending = Arc::new(AtomicBool::new(false));
        let worker_pending = Arc::clone(&pending);

        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                if first == FirstRun::Immediately {
                    job();
                }
                loop {
                    match rx.recv_timeout(interval) {
                        Ok(Control::RunNow) => {
                            worker_pending.store(false, Ordering::Release);
                            job();
                        }
                        Err(RecvTimeoutError::Timeout) => job(),
                        Ok(Control::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })
            .with_context(|| format!("spawning scheduled task {name}"))?;

        log::debug!("scheduled task {name} started ({interval:?})");
        Ok(Self {
            name: name.to_string(),
            control,
            pending,
            worker: Some(worker),
        })
    }

    pub fn trigger(&self) -> Trigger {
        Trigger {
            control: self.control.clone(),
            pending: Arc::clone(&self.pending),
        }
    }

    fn shutdown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        let _ = self.control.send(Control::Stop);
        if worker.join().is_err() {
            log::error!("scheduled task {} panicked", self.name);
        } else {
            log::debug!("scheduled task {} stopped", self.name);
        }
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.shutdown();
    }
}
