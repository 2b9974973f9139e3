use super::VideoNode;
use crate::ioctl::{
    self, BufferCapabilities, DqBufError, DqBufFromError, DqBuffer, GFmtError, MmapError,
    PlaneMapping, QBufError, QBuffer, QueryBufError, QueryBuffer, ReqbufsError, SFmtError,
    StreamOffError, StreamOnError,
};
use crate::memory::{Memory, MemoryType, Mmap, PlaneHandle};
use crate::{bindings, Format, QueueType};

use direction::*;
use log::{debug, warn};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollTimeout};

use std::convert::TryFrom;
use std::marker::PhantomData;
use std::os::unix::io::{AsFd, AsRawFd, RawFd};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod direction {
    use crate::QueueType;
    use nix::poll::PollFlags;

    /// Represents the direction of a queue, and the events to poll for when waiting for one of
    /// its buffers to be done.
    pub trait Direction {
        const QUEUE_TYPE: QueueType;
        const POLL_EVENTS: PollFlags;
    }

    /// Type for OUTPUT queues, which take frames from user-space.
    pub struct Output;
    impl Direction for Output {
        const QUEUE_TYPE: QueueType = QueueType::VideoOutputMplane;
        const POLL_EVENTS: PollFlags = PollFlags::POLLOUT;
    }

    /// Type for CAPTURE queues, which hand frames to user-space.
    pub struct Capture;
    impl Direction for Capture {
        const QUEUE_TYPE: QueueType = QueueType::VideoCaptureMplane;
        const POLL_EVENTS: PollFlags = PollFlags::POLLIN;
    }
}

/// Base values of a queue, that are always valid no matter the state the queue is in.
struct QueueBase {
    node: Arc<VideoNode>,
    type_: QueueType,
    capabilities: BufferCapabilities,
}

impl AsRawFd for QueueBase {
    fn as_raw_fd(&self) -> RawFd {
        self.node.as_raw_fd()
    }
}

/// Trait for the different states a queue can be in. This allows us to limit the available
/// queue methods to the one that make sense at a given point of the queue's lifecycle.
pub trait QueueState {}

/// V4L2 queue object. Specialized according to its configuration state so that only valid
/// methods can be called from a given point.
pub struct Queue<D, S>
where
    D: Direction,
    S: QueueState,
{
    inner: QueueBase,
    _d: PhantomData<D>,
    state: S,
}

#[derive(Debug, Error)]
pub enum SetFormatError {
    #[error("error while setting format: {0}")]
    SFmt(#[from] SFmtError),
    #[error("error while reading back format: {0}")]
    GFmt(#[from] GFmtError),
    #[error("driver applied {applied:?} instead of {requested:?}")]
    FormatMismatch { requested: Format, applied: Format },
}

/// Methods of `Queue` that are available no matter the state.
impl<D, S> Queue<D, S>
where
    D: Direction,
    S: QueueState,
{
    pub fn get_capabilities(&self) -> BufferCapabilities {
        self.inner.capabilities
    }

    pub fn get_type(&self) -> QueueType {
        self.inner.type_
    }

    pub fn get_format<T: TryFrom<bindings::v4l2_format>>(&self) -> Result<T, GFmtError> {
        ioctl::g_fmt(&self.inner, self.inner.type_)
    }

    /// Applies `format`, then reads the active format back and checks that the driver did not
    /// adjust any of its width, height, field, pixel format, number of planes or flags.
    ///
    /// Returns the active format, which includes the plane layouts computed by the driver.
    pub fn set_format(&mut self, format: Format) -> Result<Format, SetFormatError> {
        let type_ = self.inner.type_;
        let _: Format = ioctl::s_fmt(&mut self.inner, (type_, &format))?;
        let applied: Format = ioctl::g_fmt(&self.inner, type_)?;

        debug!("{} queue format set to {:?}", type_, applied);

        if !format.matches(&applied) {
            return Err(SetFormatError::FormatMismatch {
                requested: format,
                applied,
            });
        }

        Ok(applied)
    }
}

/// Initial state of the queue when created. Streaming and queuing are not supported since
/// buffers have not been allocated yet. Allocating buffers makes the queue switch to the
/// `BuffersAllocated` state.
pub struct QueueInit;
impl QueueState for QueueInit {}

#[derive(Debug, Error)]
pub enum CreateQueueError {
    #[error("error while querying queue capabilities: {0}")]
    ReqbufsError(#[from] ReqbufsError),
}

#[derive(Debug, Error)]
pub enum RequestBuffersError {
    #[error("error while requesting buffers: {0}")]
    ReqbufsError(#[from] ReqbufsError),
    #[error("driver does not support {0} memory on this queue")]
    UnsupportedMemory(MemoryType),
    #[error("requested {requested} buffers but the driver allocated none")]
    NoBuffers { requested: u32 },
}

impl<D: Direction> Queue<D, QueueInit> {
    /// Obtains the queue of direction `D` from `node`.
    ///
    /// To test whether the queue is supported, a REQBUFS(0) is issued on the node. If it is not
    /// successful, the node is deemed to not support this kind of queue and this method will
    /// fail.
    pub fn get_queue(node: Arc<VideoNode>) -> Result<Self, CreateQueueError> {
        let queue_type = D::QUEUE_TYPE;

        let capabilities: BufferCapabilities =
            ioctl::reqbufs(&*node, queue_type, MemoryType::Mmap, 0)
                // In the unlikely case that MMAP buffers are not supported, try DMABUF.
                .or_else(|e| match e {
                    ReqbufsError::InvalidBufferType(_, _) => {
                        ioctl::reqbufs(&*node, queue_type, MemoryType::DmaBuf, 0)
                    }
                    _ => Err(e),
                })?;

        debug!(
            "Obtained {} queue of {}, capabilities {:?}",
            queue_type,
            node.path().display(),
            capabilities
        );

        Ok(Queue {
            inner: QueueBase {
                node,
                type_: queue_type,
                capabilities,
            },
            _d: PhantomData,
            state: QueueInit,
        })
    }

    /// Allocate `count` buffers of memory type `M` for this queue and make it transition to the
    /// `BuffersAllocated` state.
    pub fn request_buffers<M: Memory>(
        self,
        count: u32,
    ) -> Result<Queue<D, BuffersAllocated<M>>, RequestBuffersError> {
        let type_ = self.inner.type_;
        let memory = M::MEMORY_TYPE;

        if !self.inner.capabilities.supports(memory) {
            return Err(RequestBuffersError::UnsupportedMemory(memory));
        }

        let num_buffers: usize = ioctl::reqbufs(&self.inner, type_, memory, count)?;

        debug!(
            "Requested {} {} buffers on {} queue, obtained {}",
            count, memory, type_, num_buffers
        );

        if count > 0 && num_buffers == 0 {
            return Err(RequestBuffersError::NoBuffers { requested: count });
        }

        let guard = AllocationGuard {
            node: Arc::clone(&self.inner.node),
            queue: type_,
            memory,
            armed: true,
        };

        Ok(Queue {
            inner: self.inner,
            _d: PhantomData,
            state: BuffersAllocated {
                num_buffers,
                guard,
                _m: PhantomData,
            },
        })
    }
}

impl Queue<Output, QueueInit> {
    /// Acquires the OUTPUT_MPLANE queue from `node`.
    pub fn get_output_mplane_queue(node: Arc<VideoNode>) -> Result<Self, CreateQueueError> {
        Self::get_queue(node)
    }
}

impl Queue<Capture, QueueInit> {
    /// Acquires the CAPTURE_MPLANE queue from `node`.
    pub fn get_capture_mplane_queue(node: Arc<VideoNode>) -> Result<Self, CreateQueueError> {
        Self::get_queue(node)
    }
}

/// Stops the queue and releases its buffers when dropped, unless disarmed. This makes sure a
/// queue abandoned on an error path does not keep its buffers allocated.
struct AllocationGuard {
    node: Arc<VideoNode>,
    queue: QueueType,
    memory: MemoryType,
    armed: bool,
}

impl AllocationGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for AllocationGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        if let Err(e) = ioctl::streamoff(&*self.node, self.queue) {
            warn!("Implicit streamoff of {} queue failed: {}", self.queue, e);
        }
        if let Err(e) = ioctl::reqbufs::<()>(&*self.node, self.queue, self.memory, 0) {
            warn!("Implicit release of {} queue buffers failed: {}", self.queue, e);
        }
    }
}

/// Allocated state for a queue. A queue with its buffers allocated can be streamed on and off,
/// and buffers can be queued and dequeued.
pub struct BuffersAllocated<M: Memory> {
    num_buffers: usize,
    guard: AllocationGuard,
    _m: PhantomData<M>,
}
impl<M: Memory> QueueState for BuffersAllocated<M> {}

#[derive(Debug, Error)]
pub enum QueueBufferError {
    #[error("buffer with provided index {0} does not exist")]
    InvalidIndex(usize),
    #[error("error while queueing buffer: {0}")]
    QBuf(#[from] QBufError<()>),
}

#[derive(Debug, Error)]
pub enum DequeueError {
    #[error("no buffer done after {0:?}")]
    Timeout(Duration),
    #[error("error while polling: {0}")]
    Poll(Errno),
    #[error("error while dequeueing buffer: {0}")]
    DqBuf(#[from] DqBufError<DqBufFromError>),
}

impl<D: Direction, M: Memory> Queue<D, BuffersAllocated<M>> {
    pub fn num_buffers(&self) -> usize {
        self.state.num_buffers
    }

    pub fn memory_type(&self) -> MemoryType {
        M::MEMORY_TYPE
    }

    pub fn query_buffer(&self, index: usize) -> Result<QueryBuffer, QueryBufError<QueryBuffer>> {
        ioctl::querybuf(&self.inner, self.inner.type_, index)
    }

    /// Queues buffer `index`, backed by `handle` with `bytes_used` bytes of payload.
    ///
    /// For imported memory, the memory referenced by `handle` must remain valid until the buffer
    /// is dequeued or the queue is streamed off.
    pub fn queue_buffer<H: PlaneHandle<Memory = M>>(
        &self,
        index: usize,
        handle: &H,
        bytes_used: usize,
    ) -> Result<(), QueueBufferError> {
        if index >= self.state.num_buffers {
            return Err(QueueBufferError::InvalidIndex(index));
        }

        debug!(
            "Queueing buffer {} on {} queue, {} bytes used",
            index, self.inner.type_, bytes_used
        );
        ioctl::qbuf::<H, ()>(
            &self.inner,
            self.inner.type_,
            index,
            QBuffer::from_handle(handle, bytes_used),
        )?;

        Ok(())
    }

    pub fn stream_on(&self) -> Result<(), StreamOnError> {
        debug!("{} queue streaming on", self.get_type());
        ioctl::streamon(&self.inner, self.inner.type_)
    }

    /// Stop streaming. All the buffers that were queued are returned to user-space.
    pub fn stream_off(&self) -> Result<(), StreamOffError> {
        debug!("{} queue streaming off", self.get_type());
        ioctl::streamoff(&self.inner, self.inner.type_)
    }

    /// Waits until a buffer is done and dequeues it.
    ///
    /// With a `timeout`, the node is polled first and `DequeueError::Timeout` is returned if no
    /// buffer is done in time. Without one, the call blocks in `VIDIOC_DQBUF`.
    pub fn dequeue_buffer(&self, timeout: Option<Duration>) -> Result<DqBuffer, DequeueError> {
        if let Some(timeout) = timeout {
            if !self.wait_ready(timeout)? {
                return Err(DequeueError::Timeout(timeout));
            }
        }

        let buffer: DqBuffer = ioctl::dqbuf(&self.inner, self.inner.type_, M::MEMORY_TYPE)?;
        debug!(
            "Dequeued buffer {} (sequence {}) from {} queue, flags {:?}",
            buffer.index, buffer.sequence, self.inner.type_, buffer.flags
        );

        Ok(buffer)
    }

    fn wait_ready(&self, timeout: Duration) -> Result<bool, DequeueError> {
        let timeout = poll_timeout(timeout);

        loop {
            let mut poll_fd = [PollFd::new(self.inner.node.as_fd(), D::POLL_EVENTS)];

            match poll(&mut poll_fd, timeout) {
                Ok(0) => return Ok(false),
                // POLLERR is also reported here, and DQBUF will tell us what went wrong.
                Ok(_) => return Ok(true),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(DequeueError::Poll(e)),
            }
        }
    }

    /// Releases all the allocated buffers and returns the queue to the `QueueInit` state.
    /// Releasing the buffers implies a stream off.
    pub fn free_buffers(mut self) -> Result<Queue<D, QueueInit>, ReqbufsError> {
        let type_ = self.inner.type_;
        ioctl::reqbufs::<()>(&self.inner, type_, M::MEMORY_TYPE, 0)?;
        self.state.guard.disarm();

        debug!("Freed all buffers on {} queue", type_);

        Ok(Queue {
            inner: self.inner,
            _d: PhantomData,
            state: QueueInit,
        })
    }
}

/// Converts `timeout` to milliseconds for `poll`, saturating at the largest supported value.
fn poll_timeout(timeout: Duration) -> PollTimeout {
    PollTimeout::try_from(timeout).unwrap_or(PollTimeout::MAX)
}

#[derive(Debug, Error)]
pub enum MapBufferError {
    #[error("error while querying buffer: {0}")]
    QueryBuf(#[from] QueryBufError<QueryBuffer>),
    #[error("buffer {0} has no plane")]
    NoPlane(usize),
    #[error("error while mapping buffer: {0}")]
    Mmap(#[from] MmapError),
}

impl<D: Direction> Queue<D, BuffersAllocated<Mmap>> {
    /// Maps the first plane of MMAP buffer `index` into our address space.
    pub fn map_buffer(&self, index: usize) -> Result<PlaneMapping, MapBufferError> {
        let buffer = self.query_buffer(index)?;
        let plane = buffer.planes.first().ok_or(MapBufferError::NoPlane(index))?;

        debug!(
            "Mapping buffer {} of {} queue: offset 0x{:x}, length {}",
            index, self.inner.type_, plane.mem_offset, plane.length
        );

        Ok(ioctl::mmap(
            &*self.inner.node,
            plane.mem_offset,
            plane.length as usize,
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::poll::PollFlags;

    #[test]
    fn directions() {
        assert_eq!(Output::QUEUE_TYPE, QueueType::VideoOutputMplane);
        assert_eq!(Capture::QUEUE_TYPE, QueueType::VideoCaptureMplane);
        assert_eq!(Output::POLL_EVENTS, PollFlags::POLLOUT);
        assert_eq!(Capture::POLL_EVENTS, PollFlags::POLLIN);
    }

    #[test]
    fn poll_timeouts() {
        assert_eq!(poll_timeout(Duration::ZERO), PollTimeout::ZERO);
        assert_eq!(poll_timeout(Duration::from_millis(500)).as_millis(), Some(500));
        assert_eq!(poll_timeout(Duration::from_secs(u64::MAX)), PollTimeout::MAX);
    }
}
