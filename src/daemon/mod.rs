//! Supervised daemon definitions.
//!
//! A [`DaemonSpec`] is built once per service build from the global
//! parameters and rendered into a sysvinit control script by
//! [`script::render`].

pub mod script;

use serde::Deserialize;

pub use script::render;

/// Account that may signal any process and never needs `su`.
pub const PRIVILEGED_USER: &str = "root";

const DEFAULT_START_NUM: u8 = 99;
const DEFAULT_WAIT: u32 = 10;

/// Environment variable for the daemon. `None` unsets it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvVar {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
}

/// Daemon record as declared in the site definition.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonParams {
    /// Name of the init script.
    pub name: String,
    pub server_cmd: String,
    pub user: String,
    #[serde(default)]
    pub stop_cmd: Option<String>,
    /// Extra clean-up run after the server has been stopped.
    #[serde(default)]
    pub stop_cmd2: Option<String>,
    #[serde(default)]
    pub reload_cmd: Option<String>,
    /// Process name as shown by `ps -e`.
    #[serde(default)]
    pub procname: Option<String>,
    #[serde(default)]
    pub logfile: Option<String>,
    /// Does `server_cmd` detach by itself?
    #[serde(default)]
    pub forks: bool,
    #[serde(default)]
    pub pidfile: Option<String>,
    /// Should the control script write the pid file?
    #[serde(default)]
    pub write_pid: bool,
    #[serde(default)]
    pub reload_signal: Option<String>,
    #[serde(default)]
    pub stop_signal: Option<String>,
    #[serde(default)]
    pub restart_delay: Option<u32>,
    #[serde(default)]
    pub start_num: Option<u8>,
    #[serde(default)]
    pub kill_num: Option<u8>,
    /// Also start in run-level 2.
    #[serde(default)]
    pub rc2: bool,
    #[serde(default)]
    pub lock_dir: Option<String>,
    #[serde(default)]
    pub start_wait: Option<u32>,
    #[serde(default)]
    pub stop_wait: Option<u32>,
    #[serde(default)]
    pub environ: Vec<EnvVar>,
}

/// Fully defaulted daemon description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonSpec {
    pub name: String,
    pub start_cmd: String,
    pub stop_cmd: Option<String>,
    pub stop_cmd2: Option<String>,
    pub reload_cmd: Option<String>,
    pub proc_name: Option<String>,
    pub user: String,
    pub pid_file: String,
    pub write_pid: bool,
    pub forks: bool,
    pub log_file: Option<String>,
    pub start_num: u8,
    pub kill_num: u8,
    pub lock_dir: String,
    pub stop_signal: String,
    /// Empty means reload is a full restart.
    pub reload_signal: Option<String>,
    pub restart_delay_secs: u32,
    pub start_wait: u32,
    pub stop_wait: u32,
    pub rc2: bool,
    pub env: Vec<EnvVar>,
}

impl DaemonSpec {
    /// A daemon with every optional setting at its default.
    pub fn new(name: impl Into<String>, start_cmd: impl Into<String>, user: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            pid_file: default_pid_file(&name),
            name,
            start_cmd: start_cmd.into(),
            stop_cmd: None,
            stop_cmd2: None,
            reload_cmd: None,
            proc_name: None,
            user: user.into(),
            write_pid: false,
            forks: false,
            log_file: None,
            start_num: DEFAULT_START_NUM,
            kill_num: default_kill_num(DEFAULT_START_NUM),
            lock_dir: "/var/lock/subsys".to_string(),
            stop_signal: "TERM".to_string(),
            reload_signal: None,
            restart_delay_secs: 0,
            start_wait: DEFAULT_WAIT,
            stop_wait: DEFAULT_WAIT,
            rc2: false,
            env: Vec::new(),
        }
    }

    /// Apply declared parameters on top of the defaults.
    ///
    /// Fails with a message if the start priority is out of range.
    pub fn from_params(params: DaemonParams) -> Result<Self, String> {
        let start_num = params.start_num.unwrap_or(DEFAULT_START_NUM);
        if start_num > 99 {
            return Err(format!(
                "daemon {}: start_num {} is not between 0 and 99",
                params.name, start_num
            ));
        }

        let mut spec = Self::new(params.name, params.server_cmd, params.user);
        spec.stop_cmd = non_empty(params.stop_cmd);
        spec.stop_cmd2 = non_empty(params.stop_cmd2);
        spec.reload_cmd = non_empty(params.reload_cmd);
        spec.proc_name = non_empty(params.procname);
        spec.log_file = non_empty(params.logfile);
        spec.forks = params.forks;
        spec.write_pid = params.write_pid;
        if let Some(pidfile) = non_empty(params.pidfile) {
            spec.pid_file = pidfile;
        }
        spec.reload_signal = non_empty(params.reload_signal);
        if let Some(signal) = non_empty(params.stop_signal) {
            spec.stop_signal = signal;
        }
        spec.restart_delay_secs = params.restart_delay.unwrap_or(0);
        spec.start_num = start_num;
        spec.kill_num = params.kill_num.unwrap_or_else(|| default_kill_num(start_num));
        spec.rc2 = params.rc2;
        if let Some(lock_dir) = non_empty(params.lock_dir) {
            spec.lock_dir = lock_dir;
        }
        spec.start_wait = params.start_wait.unwrap_or(DEFAULT_WAIT);
        spec.stop_wait = params.stop_wait.unwrap_or(DEFAULT_WAIT);
        spec.env = params.environ;
        Ok(spec)
    }

    /// File name of the generated control script.
    pub fn script_name(&self) -> String {
        format!("{}.init", self.name)
    }

    pub fn is_privileged(&self) -> bool {
        self.user == PRIVILEGED_USER
    }
}

/// Stop priority mirrors start priority.
pub fn default_kill_num(start_num: u8) -> u8 {
    100 - start_num.min(100)
}

fn default_pid_file(name: &str) -> String {
    format!("/var/run/{}.pid", name)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
