use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// A background plain-TCP server for integration tests. Each accepted
/// connection is handed to `handler` on its own thread; the listener itself
/// runs until the `Server` is dropped.
pub struct Server {
    addr: SocketAddr,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl Server {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        // Dial once to unblock `listener.accept()` if it's parked there.
        let _ = TcpStream::connect_timeout(&self.addr, Duration::from_millis(200));
    }
}

/// Spawns a server that runs `handler` once per accepted connection.
pub fn spawn<F>(handler: F) -> Server
where
    F: Fn(TcpStream) + Send + Clone + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind test listener");
    let addr = listener.local_addr().expect("local_addr");
    let (shutdown_tx, shutdown_rx) = mpsc::channel();

    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }
            let handler = handler.clone();
            thread::spawn(move || handler(stream));
        }
    });

    Server {
        addr,
        shutdown_tx: Some(shutdown_tx),
    }
}

/// Reads a request's head (request line + headers) off `stream`, discarding
/// it, and returns it joined back together as a single string.
pub fn read_request_head(stream: &mut TcpStream) -> String {
    let mut reader = BufReader::new(stream.try_clone().expect("try_clone"));
    let mut head = String::new();
    loop {
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) if line == "\r\n" => break,
            Ok(_) => head.push_str(&line),
        }
    }
    head
}

/// Responds with a minimal `200 OK` and the given body.
pub fn respond_ok(stream: &mut TcpStream, body: &str) {
    let _ = write!(
        stream,
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    );
}
