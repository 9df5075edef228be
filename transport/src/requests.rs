//! Requests sent by a driver to a BindServer.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", content = "arguments", rename_all = "camelCase")]
pub enum Request {
    /// Identifies the session in server logs; sent exactly once, directly
    /// after the version handshake. Not replied to.
    TaskId(String),
    LaunchDebugee(LaunchDebugee),
    WaitForDebugee(WaitForDebugee),
    /// Non-blocking probe for the exit status of an already-finished debuggee.
    DebugeeExitCode,
    KillDebugee,
    /// Ends the session cleanly. Not replied to.
    Disconnect,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchDebugee {
    /// argv for the debuggee, with paths as seen from the driver host. The
    /// server translates argv[0] strictly and the rest best-effort.
    pub command: Vec<String>,
    pub work_dir: String,
    /// Classpath entries, driver host view, translated strictly.
    pub classpath: Vec<String>,
    /// Separator the driver host uses between classpath entries.
    pub path_separator: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitForDebugee {
    /// Bounds the wait for the output redirectors to drain after the process
    /// has exited, not the wait for the exit itself.
    pub drain_timeout_secs: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_form_on_the_wire() {
        let request = Request::LaunchDebugee(LaunchDebugee {
            command: vec!["/jdk/bin/java".to_string(), "Main".to_string()],
            work_dir: "/work".to_string(),
            classpath: vec!["/work/classes".to_string()],
            path_separator: ":".to_string(),
        });
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["command"], "launchDebugee");
        assert_eq!(value["arguments"]["workDir"], "/work");
    }

    #[test]
    fn unit_requests_carry_no_arguments() {
        let value = serde_json::to_value(Request::KillDebugee).unwrap();
        assert_eq!(value["command"], "killDebugee");
        assert!(value.get("arguments").is_none());
    }
}
