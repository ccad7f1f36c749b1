//! Supervision of the auxiliary registry tools and the time master.

use crate::config::SimbusConfig;
use crate::error::{Error, Result};
use crate::session::Session;
use crate::time_sync::TimeMaster;
use crate::transport::{Transport, TransportVersion};
use std::fs::{self, File};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const REGISTRY_LOG: &str = "sil_kit_registry.log";
pub const SYSTEM_CONTROLLER_LOG: &str = "sil_kit_system_controller.log";
pub const SYSTEM_CONTROLLER_NAME: &str = "SystemController";
pub const MONITOR_NAME: &str = "SystemMonitor";

const REGISTRY_POLL_INTERVAL: Duration = Duration::from_millis(50);
const CONNECT_PROBE_TIMEOUT: Duration = Duration::from_millis(250);

/// A launched helper executable, killed when dropped.
#[derive(Debug)]
pub struct AuxProcess {
    name: String,
    child: Option<Child>,
}

impl AuxProcess {
    /// Spawns `program`. Stdout goes to `stdout_log` when given, otherwise it is discarded.
    pub fn spawn(name: &str, program: &Path, args: &[String], stdout_log: Option<&Path>) -> Result<Self> {
        let stdout = match stdout_log {
            Some(path) => Stdio::from(File::create(path)?),
            None => Stdio::null(),
        };
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .spawn()
            .map_err(|source| Error::Process {
                name: name.to_string(),
                source,
            })?;
        info!(process = name, pid = child.id(), program = %program.display(), "process launched");
        Ok(Self {
            name: name.to_string(),
            child: Some(child),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Fails with the exit status if the process has already terminated.
    pub fn ensure_alive(&mut self) -> Result<()> {
        let Some(child) = self.child.as_mut() else {
            return Err(Error::Config(format!("{} was already stopped", self.name)));
        };
        match child.try_wait()? {
            Some(status) => {
                self.child = None;
                Err(Error::ProcessExited {
                    name: self.name.clone(),
                    status,
                })
            }
            None => Ok(()),
        }
    }

    pub fn is_alive(&mut self) -> bool {
        self.ensure_alive().is_ok()
    }

    /// Kills the process and reaps it. Returns `None` if it was already gone.
    pub fn terminate(&mut self) -> Option<ExitStatus> {
        let mut child = self.child.take()?;
        if let Err(e) = child.kill() {
            debug!(process = %self.name, error = %e, "kill failed");
        }
        match child.wait() {
            Ok(status) => {
                info!(process = %self.name, %status, "process stopped");
                Some(status)
            }
            Err(e) => {
                warn!(process = %self.name, error = %e, "could not reap process");
                None
            }
        }
    }
}

impl Drop for AuxProcess {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// A running federation: registry, system controller, optional monitor and time master.
pub struct Federation {
    session: Session,
    registry: Option<AuxProcess>,
    system_controller: Option<AuxProcess>,
    monitor: Option<AuxProcess>,
    time_master: Option<TimeMaster>,
}

impl Federation {
    /// Starts every component in order. Whatever was started is torn down again on failure.
    pub fn start(transport: Arc<dyn Transport>, config: SimbusConfig, participants: &[&str]) -> Result<Self> {
        config.validate()?;
        let mut federation = Self {
            session: Session::new(transport, config),
            registry: None,
            system_controller: None,
            monitor: None,
            time_master: None,
        };
        let config = federation.session.config().clone();
        let fed = &config.federation;
        let uri = config.registry_uri.to_string();

        if fed.launch_processes {
            fs::create_dir_all(&fed.log_dir)?;

            let args = vec![
                "--listen-uri".to_string(),
                uri.clone(),
                "--log".to_string(),
                fed.log_level.as_arg().to_string(),
            ];
            let log = fed.log_dir.join(REGISTRY_LOG);
            let registry = federation
                .registry
                .insert(AuxProcess::spawn("registry", &fed.registry_executable, &args, Some(&log))?);
            settle(registry, fed.startup_grace())?;
            if fed.wait_for_registry {
                wait_for_port(&config.registry_uri.socket_address(), fed.startup_timeout())?;
            }

            let mut args = vec![
                "--name".to_string(),
                SYSTEM_CONTROLLER_NAME.to_string(),
                "--connect-uri".to_string(),
                uri.clone(),
                "--log".to_string(),
                fed.log_level.as_arg().to_string(),
            ];
            args.extend(participants.iter().map(|p| (*p).to_string()));
            let log = fed.log_dir.join(SYSTEM_CONTROLLER_LOG);
            let controller = federation.system_controller.insert(AuxProcess::spawn(
                "system controller",
                &fed.system_controller_executable,
                &args,
                Some(&log),
            )?);
            settle(controller, fed.startup_grace())?;

            if fed.launch_monitor {
                let args = vec![
                    "--name".to_string(),
                    MONITOR_NAME.to_string(),
                    "--connect-uri".to_string(),
                    uri.clone(),
                ];
                let monitor = federation
                    .monitor
                    .insert(AuxProcess::spawn("monitor", &fed.monitor_executable, &args, None)?);
                settle(monitor, fed.startup_grace())?;
            }
        }

        federation.time_master = Some(TimeMaster::start(&federation.session)?);
        info!(version = %federation.version(), %uri, "federation ready");
        Ok(federation)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn version(&self) -> TransportVersion {
        self.session.version()
    }

    pub fn log_files(&self) -> Vec<PathBuf> {
        let dir = &self.session.config().federation.log_dir;
        vec![dir.join(REGISTRY_LOG), dir.join(SYSTEM_CONTROLLER_LOG)]
    }

    /// Checks that every launched process is still running.
    pub fn check_health(&mut self) -> Result<()> {
        for process in [&mut self.registry, &mut self.system_controller, &mut self.monitor]
            .into_iter()
            .flatten()
        {
            process.ensure_alive()?;
        }
        Ok(())
    }

    /// Stops the time master, then the monitor, system controller and registry.
    pub fn shutdown(&mut self) {
        if let Some(mut master) = self.time_master.take() {
            master.stop();
        }
        for process in [&mut self.monitor, &mut self.system_controller, &mut self.registry] {
            if let Some(mut process) = process.take() {
                process.terminate();
            }
        }
    }
}

impl Drop for Federation {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn settle(process: &mut AuxProcess, grace: Duration) -> Result<()> {
    thread::sleep(grace);
    process.ensure_alive()
}

fn wait_for_port(address: &str, timeout: Duration) -> Result<()> {
    let started = Instant::now();
    loop {
        let reachable = address
            .to_socket_addrs()
            .map(|mut addrs| addrs.any(|addr| TcpStream::connect_timeout(&addr, CONNECT_PROBE_TIMEOUT).is_ok()))
            .unwrap_or(false);
        if reachable {
            debug!(address, "registry port is accepting connections");
            return Ok(());
        }
        if started.elapsed() >= timeout {
            return Err(Error::StartTimeout {
                component: format!("registry at {address}"),
                timeout,
            });
        }
        thread::sleep(REGISTRY_POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_executable_reports_process_error() {
        let err = AuxProcess::spawn("registry", Path::new("/nonexistent/simbus-registry"), &[], None).unwrap_err();
        assert!(matches!(err, Error::Process { ref name, .. } if name == "registry"));
    }

    #[test]
    fn test_wait_for_port_times_out() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);
        let err = wait_for_port(&address, Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, Error::StartTimeout { .. }));
    }
}
