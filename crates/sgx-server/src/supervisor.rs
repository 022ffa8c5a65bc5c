//! Reset loop driving one controller at a time.
//!
//! The supervisor reacts to control signals coming from the process entry
//! point:
//!
//! - `Reload`: stop the live controller (if any), construct a new one and run
//!   it. A fault reported by the live controller is handled the same way.
//! - `Terminate`: stop the live controller and return.
//!
//! If constructing or running a controller fails, the supervisor parks
//! until the next signal. There is no retry timer.

use crate::controller::{Controller, Lifecycle};
use sgx_core::{PluginConfig, PluginError, PluginResult};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Requests delivered to the reset loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// Tear down and rebuild the plugin (SIGHUP).
    Reload,
    /// Stop the plugin and exit (SIGINT, SIGTERM, SIGQUIT).
    Terminate,
}

/// How the reset loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Terminated and the final Stop completed cleanly.
    Graceful,
    /// Terminated, but the final Stop reported an error.
    StopFailed,
}

impl ExitReason {
    /// Process exit status for this outcome.
    pub fn exit_code(&self) -> u8 {
        match self {
            ExitReason::Graceful => 0,
            ExitReason::StopFailed => 1,
        }
    }
}

enum Event {
    Signal(Option<ControlSignal>),
    Fault(PluginError),
}

/// Owns at most one live [`Lifecycle`] and the factory that builds the next.
pub struct Supervisor<L, F> {
    factory: F,
    current: Option<L>,
}

/// Supervisor building real controllers from `config`.
pub fn controller_supervisor(
    config: PluginConfig,
) -> Supervisor<Controller, impl FnMut() -> PluginResult<Controller> + Send> {
    Supervisor::new(move || Controller::new(config.clone()))
}

impl<L, F> Supervisor<L, F>
where
    L: Lifecycle,
    F: FnMut() -> PluginResult<L> + Send,
{
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            current: None,
        }
    }

    /// Run the reset loop until `Terminate` arrives or `signals` closes.
    pub async fn run(mut self, mut signals: mpsc::Receiver<ControlSignal>) -> ExitReason {
        loop {
            self.reset_cycle().await;

            let event = match self.current.as_mut() {
                Some(lifecycle) => tokio::select! {
                    signal = signals.recv() => Event::Signal(signal),
                    fault = lifecycle.next_fault() => Event::Fault(fault),
                },
                None => Event::Signal(signals.recv().await),
            };

            match event {
                Event::Signal(Some(ControlSignal::Reload)) => {
                    info!("Received SIGHUP signal, resetting...");
                }
                Event::Fault(fault) => {
                    warn!(error = %fault, kind = %fault.kind(), "device plugin fault, resetting...");
                }
                Event::Signal(Some(ControlSignal::Terminate)) => {
                    info!("Received termination signal, stopping...");
                    return self.shutdown().await;
                }
                Event::Signal(None) => {
                    info!("Signal channel closed, stopping...");
                    return self.shutdown().await;
                }
            }
        }
    }

    /// Stop the previous controller, build a new one and run it.
    async fn reset_cycle(&mut self) {
        if let Some(mut previous) = self.current.take() {
            if let Err(e) = previous.stop().await {
                warn!(error = %e, "previous device plugin did not stop cleanly");
            }
        }

        let mut lifecycle = match (self.factory)() {
            Ok(lifecycle) => lifecycle,
            Err(e) => {
                error!(error = %e, "cannot create SGX-LKL device manager");
                error!("Waiting indefinitely...");
                return;
            }
        };

        match lifecycle.run().await {
            Ok(()) => self.current = Some(lifecycle),
            Err(e) => {
                // run() has already rolled back whatever it started.
                error!(error = %e, kind = %e.kind(), "SGX-LKL device plugin failed to run");
                error!("Waiting indefinitely...");
            }
        }
    }

    async fn shutdown(mut self) -> ExitReason {
        let Some(mut lifecycle) = self.current.take() else {
            return ExitReason::Graceful;
        };
        match lifecycle.stop().await {
            Ok(()) => ExitReason::Graceful,
            Err(e) => {
                error!(error = %e, "device plugin stop failed during shutdown");
                ExitReason::StopFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tracing::Instrument;
    use tracing_test::traced_test;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        New(usize),
        Run(usize),
        Stop(usize),
    }

    type Journal = Arc<Mutex<Vec<Call>>>;

    /// Scripted lifecycle recording every call into a shared journal.
    struct FakeLifecycle {
        generation: usize,
        journal: Journal,
        run_result: Option<PluginError>,
        fault_rx: Option<mpsc::UnboundedReceiver<PluginError>>,
    }

    #[async_trait]
    impl Lifecycle for FakeLifecycle {
        async fn run(&mut self) -> PluginResult<()> {
            self.journal.lock().unwrap().push(Call::Run(self.generation));
            match self.run_result.take() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }

        async fn stop(&mut self) -> PluginResult<()> {
            self.journal.lock().unwrap().push(Call::Stop(self.generation));
            Ok(())
        }

        async fn next_fault(&mut self) -> PluginError {
            match self.fault_rx.as_mut() {
                Some(rx) => match rx.recv().await {
                    Some(fault) => fault,
                    None => std::future::pending().await,
                },
                None => std::future::pending().await,
            }
        }
    }

    /// Outcome the factory produces for each successive generation.
    enum Script {
        Ok,
        NewFails,
        RunFails,
        Faulty(mpsc::UnboundedReceiver<PluginError>),
    }

    fn factory(
        journal: Journal,
        script: Vec<Script>,
    ) -> impl FnMut() -> PluginResult<FakeLifecycle> + Send {
        let mut script: VecDeque<Script> = script.into();
        let mut generation = 0;
        move || {
            generation += 1;
            journal.lock().unwrap().push(Call::New(generation));
            let mut lifecycle = FakeLifecycle {
                generation,
                journal: journal.clone(),
                run_result: None,
                fault_rx: None,
            };
            match script.pop_front().unwrap_or(Script::Ok) {
                Script::Ok => {}
                Script::NewFails => {
                    return Err(PluginError::CapabilityUnavailable {
                        path: "/opt/sgxlkl".into(),
                        source: std::io::Error::from(std::io::ErrorKind::NotFound),
                    })
                }
                Script::RunFails => {
                    lifecycle.run_result = Some(PluginError::Registration {
                        socket: "/var/lib/kubelet/device-plugins/kubelet.sock".into(),
                        reason: "unreachable".into(),
                    })
                }
                Script::Faulty(rx) => lifecycle.fault_rx = Some(rx),
            }
            Ok(lifecycle)
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    fn calls(journal: &Journal) -> Vec<Call> {
        journal.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_reload_stops_once_then_starts_once() {
        let journal = Journal::default();
        let supervisor = Supervisor::new(factory(journal.clone(), vec![]));
        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(supervisor.run(rx));

        settle().await;
        tx.send(ControlSignal::Reload).await.unwrap();
        settle().await;
        tx.send(ControlSignal::Terminate).await.unwrap();

        assert_eq!(task.await.unwrap(), ExitReason::Graceful);
        assert_eq!(
            calls(&journal),
            vec![
                Call::New(1),
                Call::Run(1),
                Call::Stop(1),
                Call::New(2),
                Call::Run(2),
                Call::Stop(2),
            ]
        );
    }

    #[tokio::test]
    async fn test_each_reload_builds_exactly_one_generation() {
        let journal = Journal::default();
        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(Supervisor::new(factory(journal.clone(), vec![])).run(rx));

        for _ in 0..2 {
            settle().await;
            tx.send(ControlSignal::Reload).await.unwrap();
        }
        settle().await;
        tx.send(ControlSignal::Terminate).await.unwrap();
        assert_eq!(task.await.unwrap(), ExitReason::Graceful);

        let journal = calls(&journal);
        let built = journal.iter().filter(|c| matches!(c, Call::New(_))).count();
        let stopped = journal.iter().filter(|c| matches!(c, Call::Stop(_))).count();
        assert_eq!(built, 3);
        assert_eq!(stopped, 3);
        assert_eq!(journal.last(), Some(&Call::Stop(3)));
    }

    #[tokio::test]
    async fn test_terminate_stops_before_exit() {
        let journal = Journal::default();
        let (tx, rx) = mpsc::channel(4);
        tx.send(ControlSignal::Terminate).await.unwrap();

        let reason = Supervisor::new(factory(journal.clone(), vec![]))
            .run(rx)
            .await;

        assert_eq!(reason.exit_code(), 0);
        assert_eq!(calls(&journal).last(), Some(&Call::Stop(1)));
    }

    #[traced_test]
    #[tokio::test]
    async fn test_construction_failure_parks_without_stop() {
        let journal = Journal::default();
        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(
            Supervisor::new(factory(journal.clone(), vec![Script::NewFails]))
                .run(rx)
                .in_current_span(),
        );

        settle().await;
        assert_eq!(calls(&journal), vec![Call::New(1)]);
        assert!(logs_contain("Waiting indefinitely"));

        tx.send(ControlSignal::Terminate).await.unwrap();
        assert_eq!(task.await.unwrap(), ExitReason::Graceful);
        // Nothing was ever started, so nothing is stopped.
        assert_eq!(calls(&journal), vec![Call::New(1)]);
    }

    #[tokio::test]
    async fn test_run_failure_parks_until_reload() {
        let journal = Journal::default();
        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(
            Supervisor::new(factory(journal.clone(), vec![Script::RunFails])).run(rx),
        );

        settle().await;
        assert_eq!(calls(&journal), vec![Call::New(1), Call::Run(1)]);

        tx.send(ControlSignal::Reload).await.unwrap();
        settle().await;
        tx.send(ControlSignal::Terminate).await.unwrap();
        assert_eq!(task.await.unwrap(), ExitReason::Graceful);

        // The failed generation rolled itself back and is never stopped again.
        assert_eq!(
            calls(&journal),
            vec![
                Call::New(1),
                Call::Run(1),
                Call::New(2),
                Call::Run(2),
                Call::Stop(2),
            ]
        );
    }

    #[tokio::test]
    async fn test_fault_triggers_reset() {
        let journal = Journal::default();
        let (fault_tx, fault_rx) = mpsc::unbounded_channel();
        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(
            Supervisor::new(factory(journal.clone(), vec![Script::Faulty(fault_rx)])).run(rx),
        );

        settle().await;
        fault_tx
            .send(PluginError::StreamTransport("kubelet went away".into()))
            .unwrap();
        settle().await;
        tx.send(ControlSignal::Terminate).await.unwrap();
        task.await.unwrap();

        assert_eq!(
            calls(&journal),
            vec![
                Call::New(1),
                Call::Run(1),
                Call::Stop(1),
                Call::New(2),
                Call::Run(2),
                Call::Stop(2),
            ]
        );
    }

    #[tokio::test]
    async fn test_closed_channel_is_termination() {
        let journal = Journal::default();
        let (tx, rx) = mpsc::channel(1);
        drop(tx);

        let reason = Supervisor::new(factory(journal.clone(), vec![])).run(rx).await;
        assert_eq!(reason, ExitReason::Graceful);
        assert_eq!(calls(&journal), vec![Call::New(1), Call::Run(1), Call::Stop(1)]);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(ExitReason::Graceful.exit_code(), 0);
        assert_eq!(ExitReason::StopFailed.exit_code(), 1);
    }
}
