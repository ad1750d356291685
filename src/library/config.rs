use std::time::Duration;

pub const DEFAULT_SQ_DEPTH: u32 = 16;
pub const DEFAULT_CQ_DEPTH: u32 = 64;
const DEFAULT_SQPOLL_IDLE: u32 = 2000;
const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactorConfig {
    sq_depth: u32,
    cq_depth: u32,
    sqpoll_enabled: bool,
    sqpoll_idle: u32,
    // Upper bound on one wait, so a stop request from another thread is noticed.
    wait_timeout: Option<Duration>,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ReactorConfig {
    pub fn new() -> ReactorConfig {
        ReactorConfig {
            sq_depth: DEFAULT_SQ_DEPTH,
            cq_depth: DEFAULT_CQ_DEPTH,
            sqpoll_enabled: false,
            sqpoll_idle: DEFAULT_SQPOLL_IDLE,
            wait_timeout: Some(DEFAULT_WAIT_TIMEOUT),
        }
    }
    #[inline(always)]
    pub fn get_sq_depth(&self) -> u32 {
        self.sq_depth
    }
    #[inline(always)]
    pub fn set_sq_depth(&mut self, sq_depth: u32) -> &mut Self {
        self.sq_depth = sq_depth.max(1);
        self
    }
    #[inline(always)]
    pub fn get_cq_depth(&self) -> u32 {
        self.cq_depth
    }
    #[inline(always)]
    pub fn set_cq_depth(&mut self, cq_depth: u32) -> &mut Self {
        self.cq_depth = cq_depth.max(1);
        self
    }
    #[inline(always)]
    pub fn get_sqpoll_enabled(&self) -> bool {
        self.sqpoll_enabled
    }
    #[inline(always)]
    pub fn set_sqpoll_enabled(&mut self, enabled: bool) -> &mut Self {
        self.sqpoll_enabled = enabled;
        self
    }
    #[inline(always)]
    pub fn get_sqpoll_idle(&self) -> u32 {
        self.sqpoll_idle
    }
    #[inline(always)]
    pub fn set_sqpoll_idle(&mut self, sqpoll_idle: u32) -> &mut Self {
        self.sqpoll_idle = sqpoll_idle;
        self
    }
    #[inline(always)]
    pub fn get_wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout
    }
    /// `None` blocks until a completion arrives.
    #[inline(always)]
    pub fn set_wait_timeout(&mut self, wait_timeout: Option<Duration>) -> &mut Self {
        self.wait_timeout = wait_timeout;
        self
    }
    /// Connection table size: one slot per submission and completion entry.
    #[inline(always)]
    pub fn slot_count(&self) -> usize {
        (self.sq_depth + self.cq_depth) as usize
    }
    /// Kernel rings need the completion queue at least as deep as the submission queue.
    #[inline(always)]
    pub fn ring_cq_depth(&self) -> u32 {
        self.cq_depth.max(self.sq_depth)
    }
    #[inline(always)]
    pub fn build(&mut self) -> Self {
        self.clone()
    }
}
