//! End-to-end scenarios driven over real TCP sockets against a live
//! `Reactor`.

use std::fs::File;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::thread;
use std::time::Duration;

use scatterweb::{Config, Reactor};

fn start_server(docroot: &Path, idle_timeout_ms: u64) -> SocketAddr {
    let config = Config {
        port: 0,
        docroot: docroot.to_path_buf(),
        idle_timeout_ms,
        workers: 2,
        queue_capacity: 64,
        level_triggered: false,
        log_level: "error".to_string(),
    };

    let mut reactor = Reactor::new(&config).expect("reactor should start");
    let addr = reactor.local_addr().expect("listener should be bound");

    thread::spawn(move || {
        let _ = reactor.run();
    });

    // give the reactor thread a moment to enter its poll loop
    thread::sleep(Duration::from_millis(50));
    addr
}

fn write_file(dir: &Path, name: &str, contents: &str) {
    let mut f = File::create(dir.join(name)).unwrap();
    f.write_all(contents.as_bytes()).unwrap();
}

fn request(addr: SocketAddr, raw: &str) -> String {
    let mut stream = TcpStream::connect(addr).expect("connect");
    stream.write_all(raw.as_bytes()).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let mut response = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                response.extend_from_slice(&chunk[..n]);
                // a Content-length-bearing response is complete once we've
                // seen the header/body boundary and at least that many body
                // bytes; for these small fixtures one read is always enough.
                if response.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(e) => panic!("read failed: {e}"),
        }
    }
    String::from_utf8_lossy(&response).into_owned()
}

#[test]
fn serves_an_existing_file_with_200() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "index.html", "<h1>hello</h1>");
    let addr = start_server(dir.path(), 60_000);

    let response = request(
        addr,
        "GET /index.html HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n",
    );
    assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
    assert!(response.contains("<h1>hello</h1>"), "{response}");
}

#[test]
fn root_path_resolves_to_index_html() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "index.html", "welcome");
    let addr = start_server(dir.path(), 60_000);

    let response = request(addr, "GET / HTTP/1.1\r\nConnection: close\r\n\r\n");
    assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
    assert!(response.contains("welcome"), "{response}");
}

#[test]
fn missing_file_yields_404() {
    let dir = tempfile::tempdir().unwrap();
    let addr = start_server(dir.path(), 60_000);

    let response = request(addr, "GET /nope.html HTTP/1.1\r\nConnection: close\r\n\r\n");
    assert!(response.starts_with("HTTP/1.1 404 Not Found"), "{response}");
}

#[test]
fn unreadable_file_yields_403() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "secret.html", "nope");
    let mut perms = std::fs::metadata(dir.path().join("secret.html"))
        .unwrap()
        .permissions();
    perms.set_mode(0o600);
    std::fs::set_permissions(dir.path().join("secret.html"), perms).unwrap();
    let addr = start_server(dir.path(), 60_000);

    let response = request(addr, "GET /secret.html HTTP/1.1\r\nConnection: close\r\n\r\n");
    assert!(response.starts_with("HTTP/1.1 403 Forbidden"), "{response}");
}

#[test]
fn malformed_request_line_yields_400() {
    let dir = tempfile::tempdir().unwrap();
    let addr = start_server(dir.path(), 60_000);

    let response = request(addr, "BOGUS / HTTP/1.1\r\nConnection: close\r\n\r\n");
    assert!(response.starts_with("HTTP/1.1 400 Bad Request"), "{response}");
}

#[test]
fn large_file_round_trips_across_scatter_buffer_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let body = "x".repeat(200_000);
    write_file(dir.path(), "big.txt", &body);
    let addr = start_server(dir.path(), 60_000);

    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .write_all(b"GET /big.txt HTTP/1.1\r\nConnection: close\r\n\r\n")
        .unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).unwrap();

    let text = String::from_utf8_lossy(&response);
    let header_end = text.find("\r\n\r\n").expect("header/body boundary");
    assert!(text.starts_with("HTTP/1.1 200 OK"));
    assert_eq!(&text[header_end + 4..], body);
}

#[test]
fn idle_connection_is_closed_after_its_timeout() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "index.html", "hi");
    let addr = start_server(dir.path(), 100);

    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    thread::sleep(Duration::from_millis(400));

    let mut buf = [0u8; 16];
    let n = stream.read(&mut buf).unwrap_or(0);
    assert_eq!(n, 0, "connection should have been closed by the idle timer");
}

#[test]
fn keep_alive_connection_serves_a_second_request() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "a.html", "A");
    write_file(dir.path(), "b.html", "B");
    let addr = start_server(dir.path(), 60_000);

    let mut stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    stream
        .write_all(b"GET /a.html HTTP/1.1\r\nConnection: keep-alive\r\n\r\n")
        .unwrap();
    let mut buf = [0u8; 4096];
    let n = stream.read(&mut buf).unwrap();
    let first = String::from_utf8_lossy(&buf[..n]);
    assert!(first.starts_with("HTTP/1.1 200 OK"));
    assert!(first.ends_with('A'));

    stream
        .write_all(b"GET /b.html HTTP/1.1\r\nConnection: close\r\n\r\n")
        .unwrap();
    let n = stream.read(&mut buf).unwrap();
    let second = String::from_utf8_lossy(&buf[..n]);
    assert!(second.starts_with("HTTP/1.1 200 OK"));
    assert!(second.ends_with('B'));
}

#[test]
fn post_with_form_body_is_accepted() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "submit.html", "thanks");
    let addr = start_server(dir.path(), 60_000);

    let body = "name=alice&age=30";
    let raw = format!(
        "POST /submit.html HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let response = request(addr, &raw);
    assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
}
