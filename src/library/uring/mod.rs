pub mod kernel_cmds;

use io_uring::{Builder, IoUring, cqueue, squeue};
use std::io;
use tracing::info;

pub struct Uring {
    pub uring: IoUring<squeue::Entry, cqueue::Entry>,
}

impl Uring {
    pub fn new(
        sq_depth: u32,        // Submission queue entries.
        cq_depth: u32,        // Completion queue entries; must not be smaller than sq_depth.
        sqpoll_idle: u32,     // Milliseconds the SQ thread spins before sleeping.
        sqpoll_enabled: bool, // Let a kernel thread poll the submission queue.
    ) -> io::Result<Uring> {
        let mut builder: Builder = IoUring::builder();
        builder.setup_cqsize(cq_depth);
        if sqpoll_enabled {
            info!("SQPOLL enabled");
            info!("    Uring SQPOLL idle: {}", sqpoll_idle);
            builder.setup_sqpoll(sqpoll_idle);
            builder.dontfork();
        } else {
            // Keep submitting the rest of a batch when one entry fails.
            builder.setup_submit_all();
        }
        info!("    Uring SQ depth: {} CQ depth: {}", sq_depth, cq_depth);
        let uring: IoUring<squeue::Entry, cqueue::Entry> = builder.build(sq_depth)?;
        Ok(Uring { uring })
    }
}
