//! Listener setup and the poll-driven event loop.
//!
//! Single thread, cooperative: each tick builds the readiness set from every
//! live connection's intents, blocks in `poll(2)`, then services whatever
//! became ready. Connections are addressed by their fd value into a flat
//! slot table; closed slots leave gaps that later accepts refill.
//!
//! The listener socket is built through raw socket calls so SO_REUSEADDR is
//! set before bind, then handed to `std::net::TcpListener` for the accept
//! loop. SIGINT flips a flag; the loop notices at its next wakeup and
//! returns, dropping every connection on the way out.

use std::io;
use std::net::TcpListener;
use std::os::fd::{AsFd, AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::socket::{
    bind, listen, setsockopt, socket, sockopt, AddressFamily, Backlog, SockFlag, SockType,
    SockaddrIn,
};

use crate::cmd::Store;
use crate::conn::Conn;

/// Set by the SIGINT handler; checked once per loop tick.
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_signum: i32) {
    SHUTDOWN.store(true, Ordering::Relaxed);
}

/// Route SIGINT to the shutdown flag. Installed without SA_RESTART so a
/// blocked `poll` wakes with EINTR and the loop can notice the flag.
pub fn install_sigint_handler() -> io::Result<()> {
    let action = SigAction::new(SigHandler::Handler(on_sigint), SaFlags::empty(), SigSet::empty());
    // Safety: the handler only touches an atomic flag, which is
    // async-signal-safe.
    unsafe { sigaction(Signal::SIGINT, &action) }.map_err(io::Error::from)?;
    Ok(())
}

/// The listening socket plus the machinery to run the event loop.
pub struct Server {
    listener: TcpListener,
    port: u16,
}

impl Server {
    /// Bind the IPv4 wildcard address on `port` (0 picks an ephemeral port)
    /// with SO_REUSEADDR, non-blocking, full backlog.
    pub fn bind(port: u16) -> io::Result<Self> {
        let sock = socket(AddressFamily::Inet, SockType::Stream, SockFlag::empty(), None)
            .map_err(io::Error::from)?;
        setsockopt(&sock, sockopt::ReuseAddr, &true).map_err(io::Error::from)?;
        let addr = SockaddrIn::new(0, 0, 0, 0, port);
        bind(sock.as_raw_fd(), &addr).map_err(io::Error::from)?;
        listen(&sock, Backlog::MAXCONN).map_err(io::Error::from)?;

        let listener = TcpListener::from(sock);
        listener.set_nonblocking(true)?;
        let port = listener.local_addr()?.port();
        Ok(Server { listener, port })
    }

    /// The bound port; useful when constructed with port 0.
    pub fn local_port(&self) -> u16 {
        self.port
    }

    /// Run the event loop until shutdown is requested or the multiplex
    /// fails. Transient wakeups (EINTR) resume; anything else is fatal.
    pub fn run(&mut self, store: &mut Store) -> io::Result<()> {
        let mut conns: Vec<Option<Conn>> = Vec::new();
        loop {
            if SHUTDOWN.load(Ordering::Relaxed) {
                crate::verbose!(1, "shutdown requested, closing {} connection(s)",
                    conns.iter().flatten().count());
                return Ok(());
            }

            // Readiness set: listener first, then one entry per live
            // connection with interest derived from its intents.
            let mut poll_fds = Vec::with_capacity(conns.len() + 1);
            let mut owners: Vec<RawFd> = Vec::with_capacity(conns.len());
            poll_fds.push(PollFd::new(self.listener.as_fd(), PollFlags::POLLIN));
            for conn in conns.iter().flatten() {
                let mut interest = PollFlags::empty();
                if conn.want_read {
                    interest |= PollFlags::POLLIN;
                }
                if conn.want_write {
                    interest |= PollFlags::POLLOUT;
                }
                poll_fds.push(PollFd::new(conn.as_fd(), interest));
                owners.push(conn.fd());
            }

            match poll(&mut poll_fds, PollTimeout::NONE) {
                Ok(_) => {}
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }

            // Detach the readiness results from the borrow on `conns` before
            // mutating anything.
            let listener_ready = poll_fds[0]
                .revents()
                .unwrap_or(PollFlags::empty())
                .contains(PollFlags::POLLIN);
            let ready: Vec<(RawFd, PollFlags)> = owners
                .iter()
                .zip(poll_fds[1..].iter())
                .map(|(&fd, pfd)| (fd, pfd.revents().unwrap_or(PollFlags::empty())))
                .collect();
            drop(poll_fds);

            if listener_ready {
                self.accept_one(&mut conns);
            }

            for (fd, revents) in ready {
                if revents.is_empty() {
                    continue;
                }
                let slot = fd as usize;
                let mut teardown = false;
                if let Some(conn) = conns.get_mut(slot).and_then(Option::as_mut) {
                    if revents.contains(PollFlags::POLLIN) {
                        conn.handle_read(store);
                    }
                    if revents.contains(PollFlags::POLLOUT) && !conn.want_close {
                        conn.handle_write();
                    }
                    let broken =
                        revents.intersects(PollFlags::POLLERR | PollFlags::POLLNVAL);
                    teardown = broken || conn.want_close;
                    if teardown {
                        crate::verbose!(2, "closing connection to {}", conn.peer());
                    }
                }
                if teardown {
                    // Dropping the Conn closes the fd.
                    conns[slot] = None;
                }
            }
        }
    }

    /// Accept a single pending peer and file it under its fd.
    fn accept_one(&self, conns: &mut Vec<Option<Conn>>) {
        let (stream, peer) = match self.listener.accept() {
            Ok(accepted) => accepted,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
            Err(e) => {
                crate::verbose!(1, "accept error: {e}");
                return;
            }
        };
        match Conn::new(stream, peer) {
            Ok(conn) => {
                crate::verbose!(2, "new client from {peer}");
                let slot = conn.fd() as usize;
                if conns.len() <= slot {
                    conns.resize_with(slot + 1, || None);
                }
                conns[slot] = Some(conn);
            }
            Err(e) => crate::verbose!(1, "failed to set up connection from {peer}: {e}"),
        }
    }
}
