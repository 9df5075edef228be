use std::sync::Arc;
use std::thread;
use std::time::Duration;

use eyre::WrapErr;
use tracing_subscriber::EnvFilter;

use transport::bindings::get_random_tcp_port;
use transport::requests::Request;
use transport::responses::{Response, StreamKind};
use transport::{Connection, Listener, Message};

#[ctor::ctor]
fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
    let _ = color_eyre::install();
}

fn pair() -> eyre::Result<(Arc<Connection>, Arc<Connection>)> {
    let port = get_random_tcp_port().wrap_err("getting free port")?;
    let listener = Listener::bind(port, Duration::from_secs(5)).wrap_err("binding")?;
    let server = thread::spawn(move || listener.accept(Duration::from_secs(5)));
    let client = Connection::attach_within("127.0.0.1", port, Duration::from_secs(5))
        .wrap_err("attaching")?;
    let accepted = server.join().unwrap().wrap_err("accepting")?;
    Ok((Arc::new(client), Arc::new(accepted)))
}

#[test]
fn request_reply_round_trip() -> eyre::Result<()> {
    let (client, server) = pair()?;

    let echo = thread::spawn(move || -> eyre::Result<()> {
        let message = server.recv()?.expect("request expected");
        assert!(matches!(message, Message::Request(Request::KillDebugee)));
        server.send(&Message::Response(Response::ok(1)))?;
        Ok(())
    });

    client.send(&Message::Request(Request::KillDebugee))?;
    match client.recv()?.expect("reply expected") {
        Message::Response(Response::Ok(ack)) => assert_eq!(ack.info, 1),
        other => panic!("unexpected reply: {other:?}"),
    }

    echo.join().unwrap()
}

#[test]
fn messages_arrive_in_send_order() -> eyre::Result<()> {
    let (client, server) = pair()?;

    let sender = thread::spawn(move || -> eyre::Result<()> {
        for i in 0..20 {
            server.send(&Message::Response(Response::ok(i)))?;
        }
        Ok(())
    });

    for expected in 0..20 {
        match client.recv()?.expect("message expected") {
            Message::Response(Response::Ok(ack)) => assert_eq!(ack.info, expected),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    sender.join().unwrap()
}

#[test]
fn concurrent_senders_do_not_corrupt_framing() -> eyre::Result<()> {
    let (client, server) = pair()?;

    let mut senders = Vec::new();
    for worker in 0..4 {
        let server = Arc::clone(&server);
        senders.push(thread::spawn(move || -> eyre::Result<()> {
            for i in 0..25 {
                server.send(&Message::Response(Response::redirected(
                    StreamKind::Stdout,
                    format!("worker {worker} line {i}"),
                )))?;
            }
            Ok(())
        }));
    }

    for _ in 0..100 {
        let message = client.recv()?.expect("message expected");
        assert!(matches!(
            message,
            Message::Response(Response::RedirectedStream(_))
        ));
    }

    for sender in senders {
        sender.join().unwrap()?;
    }
    Ok(())
}

#[test]
fn peer_shutdown_reads_as_clean_end() -> eyre::Result<()> {
    let (client, server) = pair()?;

    client.close();
    assert!(server.recv()?.is_none());
    Ok(())
}

#[test]
fn close_unblocks_a_reader() -> eyre::Result<()> {
    let (client, _server) = pair()?;

    let reader_side = Arc::clone(&client);
    let reader = thread::spawn(move || reader_side.recv());

    // let the reader block on the socket first
    thread::sleep(Duration::from_millis(200));
    client.close();

    let outcome = reader.join().unwrap()?;
    assert!(outcome.is_none());
    assert!(!client.is_connected());
    Ok(())
}

#[test]
fn attach_retries_until_the_listener_appears() -> eyre::Result<()> {
    let port = get_random_tcp_port().wrap_err("getting free port")?;

    let late_server = thread::spawn(move || -> eyre::Result<()> {
        thread::sleep(Duration::from_secs(1));
        let listener = Listener::bind(port, Duration::from_secs(5))?;
        let connection = listener.accept(Duration::from_secs(10))?;
        connection.send(&Message::Response(Response::ok(0)))?;
        Ok(())
    });

    // connect starts before the listener exists; refused attempts retry
    let client = Connection::attach_within("127.0.0.1", port, Duration::from_secs(10))?;
    assert!(client.recv()?.is_some());

    late_server.join().unwrap()
}
