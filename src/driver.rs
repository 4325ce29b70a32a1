//! Run driver - runs an engine on a tokio task and hands updates over a channel
//!
//! In step mode the task parks after every suspension marker until the
//! handle calls `resume()`. Continuous runs only park on channel backpressure.

use crate::core::{Engine, RunPhase, Update};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Handle to a spawned run; dropping it aborts the run
pub struct RunHandle {
    updates: mpsc::Receiver<Update>,
    resume_tx: mpsc::UnboundedSender<()>,
    waiting: Arc<AtomicBool>,
    step_mode: bool,
    task: JoinHandle<RunPhase>,
}

/// Spawn `engine` on the current runtime
pub fn spawn(mut engine: Engine) -> RunHandle {
    let (tx, rx) = mpsc::channel(1);
    let (resume_tx, mut resume_rx) = mpsc::unbounded_channel();
    let waiting = Arc::new(AtomicBool::new(false));
    let step_mode = engine.is_step_mode();

    let waiting_flag = waiting.clone();
    let task = tokio::spawn(async move {
        while let Some(update) = engine.next_update().await {
            let gate = step_mode && update.is_suspension();
            if gate {
                // Raised before delivery so a resume right after recv is honoured
                waiting_flag.store(true, Ordering::SeqCst);
            }

            if tx.send(update).await.is_err() {
                log::debug!("Update receiver dropped, stopping run");
                engine.stop();
                break;
            }

            if gate && resume_rx.recv().await.is_none() {
                engine.stop();
                break;
            }
        }
        engine.phase()
    });

    RunHandle {
        updates: rx,
        resume_tx,
        waiting,
        step_mode,
        task,
    }
}

impl RunHandle {
    /// Next update, or `None` once the run has ended
    pub async fn recv(&mut self) -> Option<Update> {
        self.updates.recv().await
    }

    /// The run is parked at a suspension marker
    pub fn is_waiting(&self) -> bool {
        self.waiting.load(Ordering::SeqCst)
    }

    pub fn is_step_mode(&self) -> bool {
        self.step_mode
    }

    /// Release a parked run. Returns false if nothing was waiting.
    pub fn resume(&self) -> bool {
        if self
            .waiting
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        self.resume_tx.send(()).is_ok()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Abort the run; its timers and state are dropped with the task
    pub fn stop(self) {
        log::info!("Stopping simulation run");
        drop(self);
    }

    /// Drain remaining updates, resuming any suspension, and report the final phase
    pub async fn join(mut self) -> RunPhase {
        while self.updates.recv().await.is_some() {
            self.resume();
        }
        (&mut self.task).await.unwrap_or(RunPhase::Stopped)
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use crate::core::{Agent, Category, FlowLink, Workflow};
    use std::time::Duration;

    fn chain() -> Workflow {
        Workflow::new(
            "chain",
            vec![
                Agent::new("Start", "start", Category::Core),
                Agent::new("Note", "note", Category::Logic),
                Agent::new("End", "end", Category::Core),
            ],
            vec![
                FlowLink::new("Start", ["Note"]),
                FlowLink::new("Note", ["End"]),
            ],
        )
    }

    fn engine(step_mode: bool) -> Engine {
        Engine::with_config(chain(), step_mode, &SimulationConfig::default().instant())
    }

    #[tokio::test]
    async fn test_continuous_run_drains() {
        let mut handle = spawn(engine(false));
        let mut last = None;
        while let Some(update) = handle.recv().await {
            last = Some(update);
        }
        assert!(last.unwrap().summary.is_some());
        assert!(!handle.resume());
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_mode_waits_for_resume() {
        let mut handle = spawn(engine(true));

        loop {
            let update = handle.recv().await.unwrap();
            if update.is_suspension() {
                assert_eq!(update.suspend.unwrap().node_name, "Start");
                break;
            }
        }

        let parked = tokio::time::timeout(Duration::from_secs(60), handle.recv()).await;
        assert!(parked.is_err());
        assert!(handle.is_waiting());

        assert!(handle.resume());
        assert!(!handle.resume());
        let next = handle.recv().await.unwrap();
        assert_eq!(next.log.unwrap().node_name, "Note");
    }

    #[tokio::test]
    async fn test_join_reports_completion() {
        assert_eq!(spawn(engine(false)).join().await, RunPhase::Completed);
        assert_eq!(spawn(engine(true)).join().await, RunPhase::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_aborts_parked_run() {
        let mut handle = spawn(engine(true));
        while let Some(update) = handle.recv().await {
            if update.is_suspension() {
                break;
            }
        }
        assert!(handle.is_waiting());
        assert!(!handle.is_finished());
        handle.stop();
    }
}
