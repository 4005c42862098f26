//! TCP keepalive tuning.
//!
//! OS defaults wait around two hours before the first probe, which is far too
//! slow to notice a dead peer in an interactive protocol. Every new connection
//! gets a 60 second idle time and a 10 second probe interval where the platform
//! lets us set both.

use std::time::Duration;

use socket2::{Socket, TcpKeepalive};

/// Idle time before the first keepalive probe.
pub const KEEPALIVE_IDLE: Duration = Duration::from_secs(60);

/// Interval between unanswered keepalive probes.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

#[cfg(any(
    target_os = "android",
    target_os = "dragonfly",
    target_os = "freebsd",
    target_os = "fuchsia",
    target_os = "illumos",
    target_os = "ios",
    target_os = "linux",
    target_os = "macos",
    target_os = "netbsd",
    target_os = "tvos",
    target_os = "watchos",
    target_os = "windows",
))]
static KEEPALIVE: Option<TcpKeepalive> = Some(
    TcpKeepalive::new()
        .with_time(KEEPALIVE_IDLE)
        .with_interval(KEEPALIVE_INTERVAL),
);

#[cfg(not(any(
    target_os = "android",
    target_os = "dragonfly",
    target_os = "freebsd",
    target_os = "fuchsia",
    target_os = "illumos",
    target_os = "ios",
    target_os = "linux",
    target_os = "macos",
    target_os = "netbsd",
    target_os = "tvos",
    target_os = "watchos",
    target_os = "windows",
)))]
static KEEPALIVE: Option<TcpKeepalive> = None;

/// Whether this platform can tune keepalive idle and probe intervals.
pub fn keepalive_supported() -> bool {
    KEEPALIVE.is_some()
}

/// Apply the keepalive parameters to `socket`.
///
/// Never fails: unsupported platforms are skipped and option errors are logged.
pub(crate) fn apply(socket: &Socket) {
    let Some(params) = KEEPALIVE.as_ref() else {
        return;
    };
    if let Err(e) = socket.set_tcp_keepalive(params) {
        tracing::debug!(error = %e, "Keepalive tuning skipped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use socket2::{Domain, Protocol, Type};

    #[test]
    fn apply_enables_keepalive_when_supported() {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)).unwrap();
        apply(&socket);
        if keepalive_supported() {
            assert!(socket.keepalive().unwrap());
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn linux_gets_tuned_intervals() {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)).unwrap();
        apply(&socket);
        assert_eq!(socket.tcp_keepalive_time().unwrap(), KEEPALIVE_IDLE);
        assert_eq!(socket.tcp_keepalive_interval().unwrap(), KEEPALIVE_INTERVAL);
    }
}
