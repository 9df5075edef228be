//! Bind-file configuration: the `KEY=value` properties file an operator feeds
//! to both the BindServer and the driver so the two hosts agree on ports,
//! peer identity and path prefixes.

use std::collections::HashMap;
use std::path::Path;

use eyre::Context;

const KNOWN_KEYS: &[&str] = &[
    "DEBUGGER_HOST",
    "BINDSERVER_PORT",
    "DEBUGGER_TESTED_JAVA_HOME",
    "DEBUGGER_WORKDIR",
    "DEBUGGER_TESTBASE",
    "DEBUGGEE_TESTED_JAVA_HOME",
    "DEBUGGEE_WORKDIR",
    "DEBUGGEE_TESTBASE",
    "DEBUGGEE_WINDIR",
];

/// One host's view of the three translated path prefixes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostView {
    pub tested_java_home: String,
    pub workdir: String,
    pub testbase: String,
}

#[derive(Debug, Clone)]
pub struct BindConfig {
    /// The only host a BindServer will serve.
    pub debugger_host: String,
    /// Listening port; the command line may override it.
    pub bindserver_port: Option<u16>,
    pub debugger: HostView,
    pub debuggee: HostView,
    /// Set on Windows-style debuggee hosts; also enables WINDIR/SystemRoot in
    /// the launched process environment.
    pub debuggee_windir: Option<String>,
}

pub fn load(mut r: impl std::io::Read) -> eyre::Result<BindConfig> {
    let mut contents = String::new();
    r.read_to_string(&mut contents)
        .wrap_err("reading bind file contents")?;
    from_str(&contents).wrap_err("parsing bind file")
}

pub fn load_from_path(path: impl AsRef<Path>) -> eyre::Result<BindConfig> {
    let path = path.as_ref();
    let f = std::fs::File::open(path)
        .wrap_err_with(|| format!("opening bind file {}", path.display()))?;
    load(f).context("loading bind file")
}

pub fn from_str(contents: &str) -> eyre::Result<BindConfig> {
    let mut values = HashMap::new();
    for (lineno, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            eyre::bail!("line {}: expected KEY=value, got {line:?}", lineno + 1);
        };
        let key = key.trim();
        if !KNOWN_KEYS.contains(&key) {
            tracing::warn!(%key, "unknown bind file key, skipping");
            continue;
        }
        // last assignment wins
        values.insert(key.to_string(), value.trim().to_string());
    }

    let bindserver_port = match values.get("BINDSERVER_PORT") {
        Some(raw) => Some(
            raw.parse::<u16>()
                .wrap_err_with(|| format!("invalid BINDSERVER_PORT value {raw:?}"))?,
        ),
        None => None,
    };

    Ok(BindConfig {
        debugger_host: required(&values, "DEBUGGER_HOST")?,
        bindserver_port,
        debugger: host_view(&values, "DEBUGGER")?,
        debuggee: host_view(&values, "DEBUGGEE")?,
        debuggee_windir: values.get("DEBUGGEE_WINDIR").cloned(),
    })
}

fn required(values: &HashMap<String, String>, key: &str) -> eyre::Result<String> {
    values
        .get(key)
        .cloned()
        .ok_or_else(|| eyre::eyre!("missing required bind file key {key}"))
}

fn host_view(values: &HashMap<String, String>, role: &str) -> eyre::Result<HostView> {
    Ok(HostView {
        tested_java_home: required(values, &format!("{role}_TESTED_JAVA_HOME"))?,
        workdir: required(values, &format!("{role}_WORKDIR"))?,
        testbase: required(values, &format!("{role}_TESTBASE"))?,
    })
}
