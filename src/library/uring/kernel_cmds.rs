use io_uring::{opcode, squeue, types};
use std::os::fd::RawFd;
use tracing::trace;

/// Tag of cancel requests. Their own completions carry no slot and are skipped.
pub const CANCEL_TAG: u64 = u64::MAX;

#[inline(always)]
pub fn accept(listener: RawFd, slot: usize) -> squeue::Entry {
    // Peer address is not needed, so no sockaddr is handed to the kernel.
    trace!("Kernel Call: Accept (slot {slot})");
    opcode::Accept::new(types::Fd(listener), std::ptr::null_mut(), std::ptr::null_mut())
        .flags(libc::SOCK_CLOEXEC)
        .build()
        .user_data(slot as u64)
}

/// # Safety
/// `iov` and the memory it describes must stay valid until the completion for `slot`.
#[inline(always)]
pub unsafe fn readv(client_fd: RawFd, iov: *const libc::iovec, slot: usize) -> squeue::Entry {
    trace!("Kernel Call: Readv (slot {slot})");
    trace!("    Read up to {} bytes", (*iov).iov_len);
    opcode::Readv::new(types::Fd(client_fd), iov, 1)
        .build()
        .user_data(slot as u64)
}

/// # Safety
/// `iov` and the memory it describes must stay valid until the completion for `slot`.
#[inline(always)]
pub unsafe fn writev(client_fd: RawFd, iov: *const libc::iovec, slot: usize) -> squeue::Entry {
    trace!("Kernel Call: Writev (slot {slot})");
    trace!("    Write {} bytes", (*iov).iov_len);
    opcode::Writev::new(types::Fd(client_fd), iov, 1)
        .build()
        .user_data(slot as u64)
}

#[inline(always)]
pub fn async_cancel(slot: usize) -> squeue::Entry {
    // The cancelled operation completes on its own tag with -ECANCELED.
    trace!("Kernel Call: AsyncCancel (slot {slot})");
    opcode::AsyncCancel::new(slot as u64)
        .build()
        .user_data(CANCEL_TAG)
}
