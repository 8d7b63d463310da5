//! Service supervisor adapter
//!
//! Managed services are systemd units.  Each operation opens a fresh
//! system bus connection, queues a job with the manager and then waits
//! for the matching `JobRemoved` signal.  Only a `"done"` result counts
//! as success.

use crate::error::SupervisorError;
use async_std::task;
use async_trait::async_trait;
use dbus::{blocking::Connection, message::MatchRule, Path};
use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};
use tracing::{debug, info};

const DEST: &str = "org.freedesktop.systemd1";
const MANAGER_PATH: &str = "/org/freedesktop/systemd1";
const MANAGER: &str = "org.freedesktop.systemd1.Manager";
const UNIT: &str = "org.freedesktop.systemd1.Unit";

/// How long a single job may take before we give up on it
const JOB_TIMEOUT: Duration = Duration::from_secs(90);

#[async_trait]
pub trait Supervisor: Send + Sync {
    async fn start(&self, unit: &str) -> Result<(), SupervisorError>;
    /// Stop a unit, succeeding immediately if it is not active
    async fn stop(&self, unit: &str) -> Result<(), SupervisorError>;
    async fn restart(&self, unit: &str) -> Result<(), SupervisorError>;
    /// Launch a one-shot transient unit.  Reserved, currently a no-op.
    async fn start_transient(&self, unit: &str) -> Result<(), SupervisorError>;
}

/// Talks to systemd over the system bus
#[derive(Clone, Copy, Debug, Default)]
pub struct Systemd;

#[derive(Clone, Copy, Debug)]
enum Job {
    Start,
    Stop,
    Restart,
}

impl Job {
    fn method(self) -> &'static str {
        match self {
            Self::Start => "StartUnit",
            Self::Stop => "StopUnit",
            Self::Restart => "RestartUnit",
        }
    }
}

impl Systemd {
    async fn dispatch(&self, job: Job, unit: &str) -> Result<(), SupervisorError> {
        let owned = unit.to_owned();
        task::spawn_blocking(move || run_job(job, &owned)).await
    }
}

#[async_trait]
impl Supervisor for Systemd {
    async fn start(&self, unit: &str) -> Result<(), SupervisorError> {
        self.dispatch(Job::Start, unit).await
    }

    async fn stop(&self, unit: &str) -> Result<(), SupervisorError> {
        self.dispatch(Job::Stop, unit).await
    }

    async fn restart(&self, unit: &str) -> Result<(), SupervisorError> {
        self.dispatch(Job::Restart, unit).await
    }

    async fn start_transient(&self, unit: &str) -> Result<(), SupervisorError> {
        debug!("transient unit {} requested, ignoring", unit);
        Ok(())
    }
}

/// Read `ActiveState` of a loaded unit.  Units systemd does not know
/// about are reported as inactive.
fn active_state(conn: &Connection, unit: &str) -> Result<String, SupervisorError> {
    use dbus::blocking::stdintf::org_freedesktop_dbus::Properties;

    let manager = conn.with_proxy(DEST, MANAGER_PATH, JOB_TIMEOUT);
    let unit_path: Result<(Path<'static>,), dbus::Error> =
        manager.method_call(MANAGER, "GetUnit", (unit,));
    let unit_path = match unit_path {
        Ok((p,)) => p,
        Err(e) if e.name() == Some("org.freedesktop.systemd1.NoSuchUnit") => {
            return Ok("inactive".to_owned())
        }
        Err(e) => return Err(e.into()),
    };

    let proxy = conn.with_proxy(DEST, unit_path, JOB_TIMEOUT);
    Ok(proxy.get::<String>(UNIT, "ActiveState")?)
}

fn run_job(job: Job, unit: &str) -> Result<(), SupervisorError> {
    let conn = Connection::new_system()?;

    if let Job::Stop = job {
        let state = active_state(&conn, unit)?;
        if state == "inactive" {
            debug!("{} already inactive", unit);
            return Ok(());
        }
    }

    let finished: Arc<Mutex<Vec<(Path<'static>, String)>>> = Arc::default();
    {
        let finished = Arc::clone(&finished);
        let rule = MatchRule::new_signal(MANAGER, "JobRemoved");
        conn.add_match(
            rule,
            move |(_id, job, _unit, result): (u32, Path<'static>, String, String), _, _| {
                if let Ok(mut f) = finished.lock() {
                    f.push((job, result));
                }
                true
            },
        )?;
    }

    let manager = conn.with_proxy(DEST, MANAGER_PATH, JOB_TIMEOUT);
    let () = manager.method_call(MANAGER, "Subscribe", ())?;
    let (job_path,): (Path<'static>,) = manager.method_call(MANAGER, job.method(), (unit, "replace"))?;
    debug!("{} {} queued as {}", job.method(), unit, job_path);

    let deadline = Instant::now() + JOB_TIMEOUT;
    loop {
        conn.process(Duration::from_millis(250))?;

        let result = finished
            .lock()
            .map_err(|_| SupervisorError::Worker(unit.to_owned()))?
            .iter()
            .find(|(p, _)| *p == job_path)
            .map(|(_, r)| r.clone());

        match result {
            Some(r) if r == "done" => {
                info!("{} {}: done", job.method(), unit);
                return Ok(());
            }
            Some(r) => {
                return Err(SupervisorError::JobFailed {
                    unit: unit.to_owned(),
                    result: r,
                })
            }
            None if Instant::now() > deadline => {
                return Err(SupervisorError::JobFailed {
                    unit: unit.to_owned(),
                    result: "timeout".to_owned(),
                })
            }
            None => {}
        }
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! A recording supervisor for tests

    use super::*;
    use std::collections::BTreeSet;

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum Call {
        Start(String),
        Stop(String),
        Restart(String),
    }

    #[derive(Default)]
    pub struct FakeSupervisor {
        pub calls: Mutex<Vec<Call>>,
        pub active: Mutex<BTreeSet<String>>,
        pub failing: Mutex<BTreeSet<String>>,
    }

    impl FakeSupervisor {
        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        pub fn clear(&self) {
            self.calls.lock().unwrap().clear();
        }

        pub fn is_active(&self, unit: &str) -> bool {
            self.active.lock().unwrap().contains(unit)
        }

        pub fn active_units(&self) -> BTreeSet<String> {
            self.active.lock().unwrap().clone()
        }

        pub fn fail(&self, unit: &str) {
            self.failing.lock().unwrap().insert(unit.to_owned());
        }

        fn check(&self, unit: &str) -> Result<(), SupervisorError> {
            if self.failing.lock().unwrap().contains(unit) {
                return Err(SupervisorError::JobFailed {
                    unit: unit.to_owned(),
                    result: "failed".into(),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Supervisor for FakeSupervisor {
        async fn start(&self, unit: &str) -> Result<(), SupervisorError> {
            self.calls.lock().unwrap().push(Call::Start(unit.into()));
            self.check(unit)?;
            self.active.lock().unwrap().insert(unit.into());
            Ok(())
        }

        async fn stop(&self, unit: &str) -> Result<(), SupervisorError> {
            if !self.is_active(unit) {
                return Ok(());
            }
            self.calls.lock().unwrap().push(Call::Stop(unit.into()));
            self.check(unit)?;
            self.active.lock().unwrap().remove(unit);
            Ok(())
        }

        async fn restart(&self, unit: &str) -> Result<(), SupervisorError> {
            self.calls.lock().unwrap().push(Call::Restart(unit.into()));
            self.check(unit)?;
            self.active.lock().unwrap().insert(unit.into());
            Ok(())
        }

        async fn start_transient(&self, _unit: &str) -> Result<(), SupervisorError> {
            Ok(())
        }
    }
}
