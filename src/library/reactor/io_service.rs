use crate::library::{
    config::ReactorConfig,
    connection::{ConnState, Connection, ConnectionTable},
    error::{Result, ToyError},
    network::make_listening_socket,
    uring::{
        Uring,
        kernel_cmds::{CANCEL_TAG, accept, async_cancel, readv, writev},
    },
};
use io_uring::{squeue::Entry, types};
use std::{
    mem,
    net::TcpListener,
    os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd},
    ptr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};
use tracing::{debug, info, trace, warn};

const SHUTDOWN_WAITS: usize = 10;
const SHUTDOWN_WAIT: Duration = Duration::from_millis(50);
// Pause before re-arming a listener whose accept failed, e.g. on EMFILE.
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Cloneable stop switch, usable from any thread.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// The ring, the connection table and the buffer descriptors handed to the kernel.
///
/// Handlers receive it on every completion to issue the next operation. All state is
/// owned by the one thread running the reactor; nothing here is locked.
pub struct IoService<S = ()> {
    // Dropped first: the ring goes away before any buffer it may reference.
    ring: Uring,
    connections: ConnectionTable<S>,
    // One per slot, never resized, so entries can point into it.
    descriptors: Vec<libc::iovec>,
    listeners: Vec<TcpListener>,
    sq_depth: usize,
    queued: usize,
    draining: bool,
    // Listeners whose accept is not armed: the table was full or the accept failed.
    starved: Vec<RawFd>,
    // Earliest time a failed accept may be retried without a slot being freed.
    retry_at: Option<Instant>,
    wait_timeout: Option<Duration>,
    stop: StopHandle,
}

impl<S: Default> IoService<S> {
    pub fn new(config: &ReactorConfig) -> Result<Self> {
        let ring: Uring = Uring::new(
            config.get_sq_depth(),
            config.ring_cq_depth(),
            config.get_sqpoll_idle(),
            config.get_sqpoll_enabled(),
        )
        .map_err(ToyError::Ring)?;
        let slots: usize = config.slot_count();
        let descriptors: Vec<libc::iovec> = (0..slots)
            .map(|_| libc::iovec {
                iov_base: ptr::null_mut(),
                iov_len: 0,
            })
            .collect();
        Ok(Self {
            ring,
            connections: ConnectionTable::new(slots),
            descriptors,
            listeners: Vec::new(),
            sq_depth: config.get_sq_depth() as usize,
            queued: 0,
            draining: false,
            starved: Vec::new(),
            retry_at: None,
            wait_timeout: config.get_wait_timeout(),
            stop: StopHandle::default(),
        })
    }

    /// Binds and listens on `address:port`. The service keeps the listener open.
    pub fn make_listening_socket(&mut self, address: &str, port: u16) -> Result<RawFd> {
        let listener: TcpListener = make_listening_socket(address, port)?;
        Ok(self.adopt_listener(listener))
    }

    /// Takes ownership of an already listening socket.
    pub fn adopt_listener(&mut self, listener: TcpListener) -> RawFd {
        let fd: RawFd = listener.as_raw_fd();
        self.listeners.push(listener);
        fd
    }

    /// Allocates a slot in Accepting state and submits an accept tagged with it.
    pub fn async_accept(&mut self, listener: RawFd) -> Result<()> {
        if self.connections.is_full() {
            warn!(
                "No free slot for accept on FD:{listener}, waiting for a connection to close"
            );
            self.starve(listener);
            return Ok(());
        }
        let slot: usize = self.connections.allocate(Connection::accepting(listener))?;
        self.submit(Some(slot), accept(listener, slot))
    }

    /// Stores a detached connection in a free slot, e.g. one returned by
    /// [`Self::take_connection`]. Returns the slot it now lives in, which may differ
    /// from the one it left.
    pub fn give_connection(&mut self, conn: Box<Connection<S>>) -> Result<usize> {
        if conn.is_in_flight() {
            return Err(ToyError::InvariantViolation(
                "detached connection marked in flight".into(),
            ));
        }
        self.connections.allocate(conn)
    }
}

impl<S: Default> IoService<S> {
    /// Reads into the free tail of the slot's buffer.
    pub fn async_read(&mut self, slot: usize) -> Result<()> {
        let conn: &mut Connection<S> = live(&mut self.connections, slot)?;
        let fd: RawFd = client_socket(conn, slot)?;
        let (base, len) = conn.read_window();
        if len == 0 {
            return Err(ToyError::BufferFull(slot));
        }
        conn.set_state(ConnState::Reading);
        self.descriptors[slot] = libc::iovec {
            iov_base: base.cast(),
            iov_len: len,
        };
        // SAFETY: the descriptor and the boxed buffer stay in place until the completion
        // clears the in-flight flag; nothing frees or moves a connection while it is set.
        let entry: Entry = unsafe { readv(fd, self.descriptors.as_ptr().add(slot), slot) };
        self.submit(Some(slot), entry)
    }

    /// Writes the slot's content, starting from its first byte.
    pub fn async_write(&mut self, slot: usize) -> Result<()> {
        live(&mut self.connections, slot)?.rewind_write();
        self.submit_write(slot)
    }

    /// Writes whatever part of the content the kernel has not taken yet.
    pub(crate) fn submit_write(&mut self, slot: usize) -> Result<()> {
        let conn: &mut Connection<S> = live(&mut self.connections, slot)?;
        let fd: RawFd = client_socket(conn, slot)?;
        let (base, len) = conn.write_window();
        conn.set_state(ConnState::Writing);
        self.descriptors[slot] = libc::iovec {
            iov_base: base.cast(),
            iov_len: len,
        };
        // SAFETY: see async_read.
        let entry: Entry = unsafe { writev(fd, self.descriptors.as_ptr().add(slot), slot) };
        self.submit(Some(slot), entry)
    }

    /// Detaches the connection from its slot without closing its socket.
    pub fn take_connection(&mut self, slot: usize) -> Result<Box<Connection<S>>> {
        live(&mut self.connections, slot)?;
        self.connections.release(slot)
    }

    /// Closes the connection's socket and frees its slot.
    pub fn close(&mut self, slot: usize) -> Result<()> {
        let mut conn: Box<Connection<S>> = self.take_connection(slot)?;
        conn.set_state(ConnState::Finished);
        debug!("Closing FD:{:?} from slot {slot}", conn.socket());
        drop(conn);
        self.rearm_starved()
    }

    /// Handler access to a connection; refused while its buffer is lent to the kernel.
    pub fn connection(&self, slot: usize) -> Result<&Connection<S>> {
        let conn: &Connection<S> = self.connections.get(slot).ok_or(ToyError::EmptySlot(slot))?;
        if conn.is_in_flight() {
            return Err(ToyError::BufferLent(slot));
        }
        Ok(conn)
    }

    pub fn connection_mut(&mut self, slot: usize) -> Result<&mut Connection<S>> {
        live(&mut self.connections, slot)
    }

    /// State of the connection in `slot`, readable even while an operation is in flight.
    pub fn state_of(&self, slot: usize) -> Option<ConnState> {
        self.connections.get(slot).map(Connection::state)
    }

    #[inline(always)]
    pub fn live_connections(&self) -> usize {
        self.connections.len()
    }
    #[inline(always)]
    pub fn slot_capacity(&self) -> usize {
        self.connections.capacity()
    }
    /// Entries pushed to the submission queue but not yet handed to the kernel.
    #[inline(always)]
    pub fn queued(&self) -> usize {
        self.queued
    }
    /// Listeners currently without an armed accept.
    #[inline(always)]
    pub fn starved_listeners(&self) -> &[RawFd] {
        &self.starved
    }

    /// Requests the run loop to end at the top of its next drain cycle.
    pub fn stop(&self) {
        self.stop.stop();
    }
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }
    #[inline(always)]
    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    /// Hands every queued entry to the kernel.
    pub fn flush(&mut self) -> Result<()> {
        if self.queued == 0 {
            return Ok(());
        }
        trace!("Submit {} queued entries", self.queued);
        self.submit_now()
    }

    fn submit_now(&mut self) -> Result<()> {
        loop {
            match self.ring.uring.submit() {
                Ok(_) => {
                    self.queued = 0;
                    return Ok(());
                }
                Err(err) if err.raw_os_error() == Some(libc::EINTR) => continue,
                Err(err) => return Err(ToyError::Ring(err)),
            }
        }
    }

    /// Queues `entry`. Flushes right away outside a drain cycle, otherwise once the
    /// local queue reaches the submission queue depth.
    fn submit(&mut self, slot: Option<usize>, entry: Entry) -> Result<()> {
        // SAFETY: entries reference only descriptors and buffers owned by this service,
        // which stay put until the matching completion.
        if unsafe { self.ring.uring.submission().push(&entry) }.is_err() {
            self.submit_now()?;
            let retried = unsafe { self.ring.uring.submission().push(&entry) };
            retried.map_err(|_| ToyError::SubmissionQueueFull)?;
        }
        if let Some(conn) = slot.and_then(|slot| self.connections.get_mut(slot)) {
            conn.set_in_flight(true);
        }
        self.queued += 1;
        if !self.draining || self.queued >= self.sq_depth {
            self.flush()?;
        }
        Ok(())
    }

    pub(crate) fn set_draining(&mut self, draining: bool) {
        self.draining = draining;
    }

    /// Blocks until at least one completion is ready or the configured timeout passes.
    /// A pending accept retry shortens the wait.
    pub(crate) fn wait(&mut self) -> Result<()> {
        let timeout: Option<Duration> = match (self.wait_timeout, self.retry_at) {
            (timeout, None) => timeout,
            (None, Some(at)) => Some(at.saturating_duration_since(Instant::now())),
            (Some(timeout), Some(at)) => {
                Some(timeout.min(at.saturating_duration_since(Instant::now())))
            }
        };
        self.wait_for(timeout)
    }

    fn wait_for(&mut self, timeout: Option<Duration>) -> Result<()> {
        let waited = match timeout {
            Some(timeout) => {
                let ts = types::Timespec::new()
                    .sec(timeout.as_secs())
                    .nsec(timeout.subsec_nanos());
                let args = types::SubmitArgs::new().timespec(&ts);
                self.ring.uring.submitter().submit_with_args(1, &args)
            }
            None => self.ring.uring.submit_and_wait(1),
        };
        match waited {
            Ok(_) => {
                self.queued = 0;
                Ok(())
            }
            Err(err) if matches!(err.raw_os_error(), Some(libc::ETIME | libc::EINTR)) => Ok(()),
            Err(err) => Err(ToyError::Ring(err)),
        }
    }

    /// Pops one ready completion as `(tag, result)` without blocking.
    pub(crate) fn next_completion(&mut self) -> Option<(u64, i32)> {
        let cqe = self.ring.uring.completion().next();
        cqe.map(|cqe| (cqe.user_data(), cqe.result()))
    }

    /// Takes the buffer back from the kernel and reports the state the slot was in.
    pub(crate) fn complete(&mut self, slot: usize) -> Result<ConnState> {
        let conn: &mut Connection<S> = self.connections.get_mut(slot).ok_or_else(|| {
            ToyError::InvariantViolation(format!("completion for empty slot {slot}"))
        })?;
        if !conn.is_in_flight() {
            return Err(ToyError::InvariantViolation(format!(
                "completion for slot {slot} with nothing in flight"
            )));
        }
        conn.set_in_flight(false);
        Ok(conn.state())
    }

    /// Stores the accepted socket and returns the listener it came from.
    pub(crate) fn accepted(&mut self, slot: usize, fd: RawFd) -> Result<RawFd> {
        let conn: &mut Connection<S> = live(&mut self.connections, slot)?;
        // SAFETY: a successful accept returns a fresh descriptor owned by nobody else.
        conn.attach_socket(unsafe { OwnedFd::from_raw_fd(fd) });
        Ok(conn.listener())
    }

    pub(crate) fn record_read(&mut self, slot: usize, n: usize) -> Result<()> {
        live(&mut self.connections, slot)?.record_read(n);
        Ok(())
    }

    /// Returns true once the whole content has been written.
    pub(crate) fn record_write(&mut self, slot: usize, n: usize) -> Result<bool> {
        Ok(live(&mut self.connections, slot)?.record_write(n))
    }

    /// Drops a connection after a failure scoped to it, keeping the loop alive.
    ///
    /// A failed accept frees its slot and schedules the listener for a retry after
    /// [`ACCEPT_BACKOFF`]; otherwise the socket is closed. Nothing happens if the slot
    /// is already gone or busy again.
    pub(crate) fn discard(&mut self, slot: usize, state: ConnState) -> Result<()> {
        match self.connections.get(slot) {
            Some(conn) if !conn.is_in_flight() => {}
            _ => return Ok(()),
        }
        if state != ConnState::Accepting {
            return self.close(slot);
        }
        let conn: Box<Connection<S>> = self.connections.release(slot)?;
        let listener: RawFd = conn.listener();
        let accept_failed: bool = conn.socket().is_none();
        drop(conn);
        if accept_failed {
            debug!("Accept on FD:{listener} retried in {ACCEPT_BACKOFF:?}");
            self.starve(listener);
            self.retry_at = Some(Instant::now() + ACCEPT_BACKOFF);
            return Ok(());
        }
        self.rearm_starved()
    }

    fn starve(&mut self, listener: RawFd) {
        if !self.starved.contains(&listener) {
            self.starved.push(listener);
        }
    }

    /// Re-arms starved listeners once the accept backoff has passed.
    pub(crate) fn retry_accepts(&mut self) -> Result<()> {
        match self.retry_at {
            Some(at) if Instant::now() >= at => self.rearm_starved(),
            _ => Ok(()),
        }
    }

    /// Arms an accept for every starved listener that fits in the table.
    fn rearm_starved(&mut self) -> Result<()> {
        self.retry_at = None;
        while !self.starved.is_empty() && !self.connections.is_full() {
            let listener: RawFd = self.starved.remove(0);
            debug!("Re-arming accept on FD:{listener}");
            let slot: usize = self.connections.allocate(Connection::accepting(listener))?;
            self.submit(Some(slot), accept(listener, slot))?;
        }
        Ok(())
    }

    /// Takes a buffer back during shutdown. An accept that won the race against its
    /// cancel still hands over a descriptor, which the connection now owns.
    fn settle(&mut self, slot: usize, result: i32) {
        let Some(conn) = self.connections.get_mut(slot) else {
            return;
        };
        conn.set_in_flight(false);
        if result >= 0 && conn.state() == ConnState::Accepting && conn.socket().is_none() {
            // SAFETY: a successful accept returns a fresh descriptor owned by nobody else.
            conn.attach_socket(unsafe { OwnedFd::from_raw_fd(result) });
        }
    }

    /// Cancels everything still in flight and waits, bounded, for the kernel to let go.
    ///
    /// Connections whose buffer is still lent afterwards are leaked, never freed.
    pub(crate) fn shutdown(&mut self) {
        let in_flight: Vec<usize> = self.connections.in_flight();
        if !in_flight.is_empty() {
            info!("Cancelling {} in-flight operations", in_flight.len());
            self.draining = true;
            for slot in in_flight {
                if let Err(err) = self.submit(None, async_cancel(slot)) {
                    warn!("Cancel for slot {slot} not submitted: {err}");
                    break;
                }
            }
            self.draining = false;
            if let Err(err) = self.flush() {
                warn!("Cancel batch not submitted: {err}");
            }
        }
        for _ in 0..SHUTDOWN_WAITS {
            if self.connections.in_flight().is_empty() {
                break;
            }
            if let Err(err) = self.wait_for(Some(SHUTDOWN_WAIT)) {
                warn!("Waiting for cancellations failed: {err}");
                break;
            }
            while let Some((tag, result)) = self.next_completion() {
                trace!("Shutdown CQE: tag {tag} result {result}");
                if tag == CANCEL_TAG {
                    continue;
                }
                self.settle(tag as usize, result);
            }
        }
        for slot in self.connections.in_flight() {
            warn!("Slot {slot} still lent to the kernel at shutdown, leaking it");
            if let Ok(conn) = self.connections.release(slot) {
                mem::forget(conn);
            }
        }
    }
}

fn live<S>(connections: &mut ConnectionTable<S>, slot: usize) -> Result<&mut Connection<S>> {
    let conn: &mut Connection<S> = connections.get_mut(slot).ok_or(ToyError::EmptySlot(slot))?;
    if conn.is_in_flight() {
        return Err(ToyError::BufferLent(slot));
    }
    Ok(conn)
}

fn client_socket<S>(conn: &Connection<S>, slot: usize) -> Result<RawFd> {
    conn.socket().ok_or_else(|| {
        ToyError::InvariantViolation(format!("slot {slot} has no accepted socket"))
    })
}
