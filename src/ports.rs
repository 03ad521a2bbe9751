//! Localhost port helpers for daemon configs and readiness checks.

use std::collections::{HashMap, HashSet};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::Result;

/// How long an allocated port is considered taken before it may be handed
/// out again.
const REUSE_GUARD: Duration = Duration::from_secs(1);

/// How long a connectability probe waits for a TCP connection.
const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

fn recently_allocated() -> &'static Mutex<HashMap<u16, Instant>> {
    static CACHE: OnceLock<Mutex<HashMap<u16, Instant>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Ask the kernel for a free localhost port.
///
/// Ports handed out within the last second are not returned again, so a
/// caller allocating several ports in a row gets distinct values even though
/// every probe listener is closed immediately.
pub fn get_unused_localhost_port() -> Result<u16> {
    loop {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
        let port = listener.local_addr()?.port();
        drop(listener);

        let mut cache = recently_allocated()
            .lock()
            .unwrap_or_else(|err| err.into_inner());
        let now = Instant::now();
        cache.retain(|_, allocated_at| now.duration_since(*allocated_at) < REUSE_GUARD);
        if !cache.contains_key(&port) {
            cache.insert(port, now);
            return Ok(port);
        }
        debug!("Port {port} was handed out recently, trying again");
    }
}

/// The subset of `ports` currently accepting TCP connections on localhost.
pub fn connectable_ports<I>(ports: I) -> HashSet<u16>
where
    I: IntoIterator<Item = u16>,
{
    let mut connectable = HashSet::new();
    for port in ports {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        if let Ok(stream) = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
            drop(stream);
            connectable.insert(port);
        }
    }
    connectable
}
