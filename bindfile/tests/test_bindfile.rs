use bindfile::BindConfig;

#[test]
fn test_read_example() {
    let path = "./tests/testdata/bindserver.properties";
    let config = bindfile::load_from_path(path).unwrap();

    assert_eq!(config.debugger_host, "quartz");
    assert_eq!(config.bindserver_port, Some(9045));
    assert_eq!(config.debugger.tested_java_home, "/export/jdk/linux");
    assert_eq!(config.debuggee.workdir, r"D:\testbase\WORKDIR");
    assert_eq!(config.debuggee_windir.as_deref(), Some(r"C:\WINNT"));
}

#[test]
fn missing_required_key_is_an_error() {
    let err = bindfile::from_str("DEBUGGER_HOST=quartz\n").unwrap_err();
    assert!(err.to_string().contains("missing required bind file key"));
}

#[test]
fn invalid_port_is_an_error() {
    let contents = std::fs::read_to_string("./tests/testdata/bindserver.properties").unwrap();
    let broken = contents.replace("BINDSERVER_PORT=9045", "BINDSERVER_PORT=lots");
    assert!(bindfile::from_str(&broken).is_err());
}

#[test]
fn comments_blanks_and_duplicates() {
    let contents = std::fs::read_to_string("./tests/testdata/bindserver.properties").unwrap();
    let contents = format!("{contents}\n\n# overridden below\nDEBUGGER_HOST=calcite\n");
    let config: BindConfig = bindfile::from_str(&contents).unwrap();
    assert_eq!(config.debugger_host, "calcite");
}

#[ctor::ctor]
fn init() {
    let _ = color_eyre::install();
}
