use std::thread;
use std::time::Duration;

use eyre::WrapErr;
use tracing_subscriber::EnvFilter;

use transport::bindings::get_random_tcp_port;

#[ctor::ctor]
fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
    let _ = color_eyre::install();
}

#[test]
fn lines_flow_both_ways() -> eyre::Result<()> {
    let port = get_random_tcp_port().wrap_err("getting free port")?;
    let mut driver = iopipe::driver_pipe(port)?;

    let debugee = thread::spawn(move || -> eyre::Result<()> {
        let mut pipe = iopipe::debugee_pipe("127.0.0.1", port);
        pipe.println("ready")?;
        let command = pipe.readln()?;
        assert_eq!(command, "quit");
        pipe.println("done")?;
        Ok(())
    });

    assert_eq!(driver.readln()?, "ready");
    driver.println("quit")?;
    assert_eq!(driver.readln()?, "done");

    debugee.join().unwrap()
}

#[test]
fn prebound_listener_beats_an_eager_peer() -> eyre::Result<()> {
    let port = get_random_tcp_port().wrap_err("getting free port")?;
    // the listening socket exists before the "debuggee" is started
    let mut driver = iopipe::driver_pipe(port)?;

    let debugee = thread::spawn(move || -> eyre::Result<()> {
        let mut pipe = iopipe::debugee_pipe("127.0.0.1", port);
        // connects and speaks immediately, before the driver reads
        pipe.println("first")?;
        Ok(())
    });
    debugee.join().unwrap()?;

    // the line is waiting even though the driver only accepts now
    assert_eq!(driver.readln()?, "first");
    Ok(())
}

#[test]
fn attaching_side_retries_until_the_listener_binds() -> eyre::Result<()> {
    let port = get_random_tcp_port().wrap_err("getting free port")?;

    let late_driver = thread::spawn(move || -> eyre::Result<String> {
        thread::sleep(Duration::from_secs(1));
        let mut pipe = iopipe::driver_pipe(port)?;
        pipe.readln()
    });

    let mut debugee = iopipe::debugee_pipe("127.0.0.1", port);
    debugee.println("patience")?;

    let received = late_driver.join().unwrap()?;
    assert_eq!(received, "patience");
    Ok(())
}

#[test]
fn reading_a_closed_pipe_is_an_error() -> eyre::Result<()> {
    let port = get_random_tcp_port().wrap_err("getting free port")?;
    let mut driver = iopipe::driver_pipe(port)?;

    let debugee = thread::spawn(move || -> eyre::Result<()> {
        let mut pipe = iopipe::debugee_pipe("127.0.0.1", port);
        pipe.println("bye")?;
        pipe.close();
        Ok(())
    });
    debugee.join().unwrap()?;

    assert_eq!(driver.readln()?, "bye");
    let err = driver.readln().unwrap_err();
    assert!(err.to_string().contains("pipe closed"), "got: {err}");
    Ok(())
}
