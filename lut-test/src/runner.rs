//! One processing run through the LUT pipeline.
//!
//! The sequence of operations is the same for every memory type: only the way buffer memory is
//! obtained, handed to the driver and released differs. These differences are captured by the
//! [`FrameBacking`] trait, which is implemented once per memory type. Queues are driven through
//! [`RunQueue`], so the ordering of a run can be checked without a device.
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, ensure, Context, Result};
use log::{debug, info, warn};

use vsp2r::contig::{ContiguousAllocator, ContiguousBuffer};
use vsp2r::device::direction::Direction;
use vsp2r::device::{BuffersAllocated, Queue};
use vsp2r::ioctl::{DmaBufSyncAccess, DqBuffer, PlaneMapping};
use vsp2r::lut::LutConfig;
use vsp2r::media::MediaDevice;
use vsp2r::memory::{
    BorrowedDmaBuf, DmaBuf, DmaBufHandle, Memory, MemoryType, Mmap, MmapHandle, PlaneHandle,
    UserPtr, UserPtrHandle,
};
use vsp2r::pipeline::{video_format, LutPipeline, PipelineNode, FRAME_SIZE, HEIGHT, WIDTH};

/// Parameters shared by all runs.
#[derive(Debug)]
pub struct RunConfig {
    pub media_device: PathBuf,
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub lut: LutConfig,
    /// How long to wait for a processed buffer. `None` waits forever.
    pub timeout: Option<Duration>,
}

/// Name of the file a run with `memory` writes its processed frame to.
pub fn output_file_name(memory: MemoryType) -> String {
    format!("{}_{}_ARGB32_LUT_{}.argb", WIDTH, HEIGHT, memory)
}

/// Operations a run performs on a queue once its buffer is allocated.
trait RunQueue {
    type Memory: Memory;

    fn enqueue<H: PlaneHandle<Memory = Self::Memory>>(
        &self,
        index: usize,
        handle: &H,
        bytes_used: usize,
    ) -> Result<()>;
    fn start(&self) -> Result<()>;
    fn wait_done(&self, timeout: Option<Duration>) -> Result<DqBuffer>;
    fn stop(&self) -> Result<()>;
    /// Releases the buffers of the queue with `REQBUFS(0)`.
    fn release_buffers(self) -> Result<()>;
}

impl<D: Direction, M: Memory> RunQueue for Queue<D, BuffersAllocated<M>> {
    type Memory = M;

    fn enqueue<H: PlaneHandle<Memory = M>>(
        &self,
        index: usize,
        handle: &H,
        bytes_used: usize,
    ) -> Result<()> {
        Ok(self.queue_buffer(index, handle, bytes_used)?)
    }

    fn start(&self) -> Result<()> {
        Ok(self.stream_on()?)
    }

    fn wait_done(&self, timeout: Option<Duration>) -> Result<DqBuffer> {
        Ok(self.dequeue_buffer(timeout)?)
    }

    fn stop(&self) -> Result<()> {
        Ok(self.stream_off()?)
    }

    fn release_buffers(self) -> Result<()> {
        self.free_buffers()?;
        Ok(())
    }
}

/// Memory backing the single buffer of a queue.
trait FrameBacking: Sized {
    type Memory: Memory;
    /// What remains to be freed once the driver has released the buffer.
    type Allocation;

    /// Obtains the memory for buffer `index` of `queue`.
    fn obtain<D: Direction>(
        queue: &Queue<D, BuffersAllocated<Self::Memory>>,
        index: usize,
        allocator: Option<&dyn ContiguousAllocator>,
    ) -> Result<Self>;

    fn as_slice(&self) -> &[u8];
    fn as_mut_slice(&mut self) -> &mut [u8];

    /// Queues buffer `index` of `queue` with this memory attached.
    fn queue<Q: RunQueue<Memory = Self::Memory>>(
        &mut self,
        queue: &Q,
        index: usize,
        bytes_used: usize,
    ) -> Result<()>;

    fn begin_cpu_access(&self, _access: DmaBufSyncAccess) -> Result<()> {
        Ok(())
    }

    fn end_cpu_access(&self, _access: DmaBufSyncAccess) -> Result<()> {
        Ok(())
    }

    /// Detaches the memory from the driver's view. The allocation is returned even if detaching
    /// fails, so it can be kept alive until the queue buffers are released.
    fn release(self) -> (Self::Allocation, Result<()>);
}

fn contiguous_buffer(
    allocator: Option<&dyn ContiguousAllocator>,
) -> Result<Box<dyn ContiguousBuffer>> {
    let allocator = allocator.ok_or_else(|| anyhow!("no contiguous allocator available"))?;
    let buffer = allocator
        .allocate(FRAME_SIZE)
        .context("failed to allocate contiguous buffer")?;
    debug!("Allocated contiguous buffer {:?}", buffer);

    Ok(buffer)
}

/// Driver-allocated memory mapped into our address space.
struct MmapBacking(PlaneMapping);

impl FrameBacking for MmapBacking {
    type Memory = Mmap;
    type Allocation = ();

    fn obtain<D: Direction>(
        queue: &Queue<D, BuffersAllocated<Mmap>>,
        index: usize,
        _allocator: Option<&dyn ContiguousAllocator>,
    ) -> Result<Self> {
        let mapping = queue
            .map_buffer(index)
            .with_context(|| format!("failed to map buffer {}", index))?;

        Ok(MmapBacking(mapping))
    }

    fn as_slice(&self) -> &[u8] {
        &self.0
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.0
    }

    fn queue<Q: RunQueue<Memory = Mmap>>(
        &mut self,
        queue: &Q,
        index: usize,
        bytes_used: usize,
    ) -> Result<()> {
        queue.enqueue(index, &MmapHandle, bytes_used)
    }

    fn release(self) -> ((), Result<()>) {
        // Unmaps the buffer.
        drop(self);
        ((), Ok(()))
    }
}

/// Contiguous memory passed by address.
struct UserPtrBacking(Box<dyn ContiguousBuffer>);

impl FrameBacking for UserPtrBacking {
    type Memory = UserPtr;
    type Allocation = Box<dyn ContiguousBuffer>;

    fn obtain<D: Direction>(
        _queue: &Queue<D, BuffersAllocated<UserPtr>>,
        _index: usize,
        allocator: Option<&dyn ContiguousAllocator>,
    ) -> Result<Self> {
        Ok(UserPtrBacking(contiguous_buffer(allocator)?))
    }

    fn as_slice(&self) -> &[u8] {
        self.0.as_slice()
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        self.0.as_mut_slice()
    }

    fn queue<Q: RunQueue<Memory = UserPtr>>(
        &mut self,
        queue: &Q,
        index: usize,
        bytes_used: usize,
    ) -> Result<()> {
        let handle = UserPtrHandle::from(self.0.as_slice());
        queue.enqueue(index, &handle, bytes_used)
    }

    fn begin_cpu_access(&self, access: DmaBufSyncAccess) -> Result<()> {
        Ok(self.0.begin_cpu_access(access)?)
    }

    fn end_cpu_access(&self, access: DmaBufSyncAccess) -> Result<()> {
        Ok(self.0.end_cpu_access(access)?)
    }

    fn release(self) -> (Box<dyn ContiguousBuffer>, Result<()>) {
        (self.0, Ok(()))
    }
}

/// Contiguous memory passed as an exported DMABUF.
struct DmaBufBacking(Box<dyn ContiguousBuffer>);

impl FrameBacking for DmaBufBacking {
    type Memory = DmaBuf;
    type Allocation = Box<dyn ContiguousBuffer>;

    fn obtain<D: Direction>(
        _queue: &Queue<D, BuffersAllocated<DmaBuf>>,
        _index: usize,
        allocator: Option<&dyn ContiguousAllocator>,
    ) -> Result<Self> {
        let mut buffer = contiguous_buffer(allocator)?;
        let fd = buffer.dmabuf().context("failed to export buffer as DMABUF")?;
        debug!("Buffer exported as DMABUF {:?}", fd);

        Ok(DmaBufBacking(buffer))
    }

    fn as_slice(&self) -> &[u8] {
        self.0.as_slice()
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        self.0.as_mut_slice()
    }

    fn queue<Q: RunQueue<Memory = DmaBuf>>(
        &mut self,
        queue: &Q,
        index: usize,
        bytes_used: usize,
    ) -> Result<()> {
        let len = self.0.len() as u64;
        let fd = self.0.dmabuf()?;
        let handle = DmaBufHandle::from(BorrowedDmaBuf { fd, len });

        queue.enqueue(index, &handle, bytes_used)
    }

    fn begin_cpu_access(&self, access: DmaBufSyncAccess) -> Result<()> {
        Ok(self.0.begin_cpu_access(access)?)
    }

    fn end_cpu_access(&self, access: DmaBufSyncAccess) -> Result<()> {
        Ok(self.0.end_cpu_access(access)?)
    }

    fn release(mut self) -> (Box<dyn ContiguousBuffer>, Result<()>) {
        let ended = self
            .0
            .release_dmabuf()
            .context("failed to end DMABUF export");
        (self.0, ended)
    }
}

/// Performs one run with `memory` buffers, and returns the path of the processed frame.
///
/// `allocator` is only needed for `USERPTR` and `DMABUF` runs.
pub fn run(
    config: &RunConfig,
    memory: MemoryType,
    allocator: Option<&dyn ContiguousAllocator>,
) -> Result<PathBuf> {
    info!("exec {}", memory);

    match memory {
        MemoryType::Mmap => run_with::<MmapBacking>(config, allocator),
        MemoryType::UserPtr => run_with::<UserPtrBacking>(config, allocator),
        MemoryType::DmaBuf => run_with::<DmaBufBacking>(config, allocator),
    }
    .with_context(|| format!("{} run failed", memory))
}

fn run_with<B: FrameBacking>(
    config: &RunConfig,
    allocator: Option<&dyn ContiguousAllocator>,
) -> Result<PathBuf> {
    let memory = B::Memory::MEMORY_TYPE;
    let output = config.output_dir.join(output_file_name(memory));

    let mut media = MediaDevice::open(&config.media_device)
        .with_context(|| format!("cannot open {}", config.media_device.display()))?;
    let pipeline =
        LutPipeline::configure(&mut media).context("failed to configure the pipeline")?;

    let src_node = Arc::new(open_node(&pipeline, &media, PipelineNode::RpfInput)?);
    let dst_node = Arc::new(open_node(&pipeline, &media, PipelineNode::WpfOutput)?);
    src_node.require(PipelineNode::RpfInput.required_capabilities())?;
    dst_node.require(PipelineNode::WpfOutput.required_capabilities())?;

    pipeline
        .program_lut(&media, &config.lut)
        .context("failed to program the LUT")?;

    let mut src_queue = Queue::get_output_mplane_queue(Arc::clone(&src_node))
        .context("cannot obtain source queue")?;
    src_queue
        .set_format(video_format())
        .context("cannot set source format")?;
    let src_queue = src_queue
        .request_buffers::<B::Memory>(1)
        .context("cannot allocate source buffer")?;
    let src = B::obtain(&src_queue, 0, allocator)?;
    ensure!(
        src.as_slice().len() >= FRAME_SIZE,
        "source buffer is too small: {} bytes",
        src.as_slice().len()
    );

    let mut dst_queue = Queue::get_capture_mplane_queue(Arc::clone(&dst_node))
        .context("cannot obtain destination queue")?;
    dst_queue
        .set_format(video_format())
        .context("cannot set destination format")?;
    let dst_queue = dst_queue
        .request_buffers::<B::Memory>(1)
        .context("cannot allocate destination buffer")?;
    let dst = B::obtain(&dst_queue, 0, allocator)?;
    ensure!(
        dst.as_slice().len() >= FRAME_SIZE,
        "destination buffer is too small: {} bytes",
        dst.as_slice().len()
    );

    process(config, &output, (src_queue, src), (dst_queue, dst))?;

    info!("{} run complete, output written to {}", memory, output.display());

    Ok(output)
}

/// Processes the input frame into `output`, then tears both queues down.
///
/// Nothing is queued before this is called. The teardown happens whether processing succeeded or
/// not, source side first.
fn process<S, C, B>(
    config: &RunConfig,
    output: &Path,
    (src_queue, mut src): (S, B),
    (dst_queue, mut dst): (C, B),
) -> Result<()>
where
    B: FrameBacking,
    S: RunQueue<Memory = B::Memory>,
    C: RunQueue<Memory = B::Memory>,
{
    let processed = stream(config, output, (&src_queue, &mut src), (&dst_queue, &mut dst));

    let src_finished = finish(src_queue, src, "source");
    let dst_finished = finish(dst_queue, dst, "destination");

    processed.and(src_finished).and(dst_finished)
}

fn stream<S, C, B>(
    config: &RunConfig,
    output: &Path,
    (src_queue, src): (&S, &mut B),
    (dst_queue, dst): (&C, &mut B),
) -> Result<()>
where
    B: FrameBacking,
    S: RunQueue<Memory = B::Memory>,
    C: RunQueue<Memory = B::Memory>,
{
    // Source side: fill the frame to process and queue it.
    src.begin_cpu_access(DmaBufSyncAccess::WRITE)?;
    read_input(&config.input, src)?;
    src.end_cpu_access(DmaBufSyncAccess::WRITE)?;
    src.queue(src_queue, 0, FRAME_SIZE)
        .context("cannot queue source buffer")?;
    src_queue.start().context("cannot start source queue")?;

    // Destination side: provide a buffer to write the processed frame into.
    dst.queue(dst_queue, 0, FRAME_SIZE)
        .context("cannot queue destination buffer")?;
    dst_queue
        .start()
        .context("cannot start destination queue")?;

    let done = dst_queue
        .wait_done(config.timeout)
        .context("cannot dequeue destination buffer")?;
    if done.has_error() {
        warn!("Destination buffer {} completed with an error", done.index);
    }
    if let Some(plane) = done.first_plane() {
        if (plane.bytesused as usize) < FRAME_SIZE {
            warn!(
                "Destination buffer only holds {} bytes out of {}",
                plane.bytesused, FRAME_SIZE
            );
        }
    }
    dst.begin_cpu_access(DmaBufSyncAccess::READ)?;
    crate::image::write_frame(output, &dst.as_slice()[..FRAME_SIZE])?;
    dst.end_cpu_access(DmaBufSyncAccess::READ)?;

    src_queue
        .wait_done(config.timeout)
        .context("cannot dequeue source buffer")?;

    Ok(())
}

/// Stops `queue`, detaches `backing`, releases the queue buffers and finally frees the backing
/// memory. Every step is attempted even if a previous one failed, and the first error is returned.
fn finish<Q, B>(queue: Q, backing: B, side: &str) -> Result<()>
where
    B: FrameBacking,
    Q: RunQueue<Memory = B::Memory>,
{
    let stopped = queue
        .stop()
        .with_context(|| format!("cannot stop {} queue", side));
    let (allocation, detached) = backing.release();
    let released = queue
        .release_buffers()
        .with_context(|| format!("cannot release {} buffer", side));
    // The driver no longer references the memory.
    drop(allocation);

    stopped.and(detached).and(released)
}

fn open_node(
    pipeline: &LutPipeline,
    media: &MediaDevice,
    node: PipelineNode,
) -> Result<vsp2r::device::VideoNode> {
    pipeline
        .video_node(media, node)
        .with_context(|| format!("cannot open {} node", node.entity_suffix()))
}

fn read_input<B: FrameBacking>(input: &Path, backing: &mut B) -> Result<()> {
    crate::image::read_frame(input, &mut backing.as_mut_slice()[..FRAME_SIZE])
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use anyhow::bail;
    use nix::sys::time::TimeVal;
    use vsp2r::ioctl::{BufferFlags, DqBufPlane};
    use vsp2r::lut::LutTable;

    use super::*;

    type Events = Rc<RefCell<Vec<String>>>;

    fn record(events: &Events, side: &str, what: &str) {
        events.borrow_mut().push(format!("{} {}", side, what));
    }

    /// Queue recording the operations performed on it.
    struct FakeQueue {
        side: &'static str,
        events: Events,
        times_out: bool,
    }

    impl RunQueue for FakeQueue {
        type Memory = Mmap;

        fn enqueue<H: PlaneHandle<Memory = Mmap>>(
            &self,
            _index: usize,
            _handle: &H,
            _bytes_used: usize,
        ) -> Result<()> {
            record(&self.events, self.side, "qbuf");
            Ok(())
        }

        fn start(&self) -> Result<()> {
            record(&self.events, self.side, "streamon");
            Ok(())
        }

        fn wait_done(&self, timeout: Option<Duration>) -> Result<DqBuffer> {
            if self.times_out {
                record(&self.events, self.side, "timeout");
                bail!("no buffer done after {:?}", timeout);
            }
            record(&self.events, self.side, "dqbuf");
            Ok(DqBuffer {
                index: 0,
                flags: BufferFlags::empty(),
                sequence: 0,
                timestamp: TimeVal::new(0, 0),
                planes: vec![DqBufPlane {
                    bytesused: FRAME_SIZE as u32,
                    length: FRAME_SIZE as u32,
                    data_offset: 0,
                }],
            })
        }

        fn stop(&self) -> Result<()> {
            record(&self.events, self.side, "streamoff");
            Ok(())
        }

        fn release_buffers(self) -> Result<()> {
            record(&self.events, self.side, "reqbufs 0");
            Ok(())
        }
    }

    /// Memory whose release and freeing are recorded.
    struct FakeBacking {
        side: &'static str,
        events: Events,
        data: Vec<u8>,
    }

    struct FakeAllocation {
        side: &'static str,
        events: Events,
    }

    impl Drop for FakeAllocation {
        fn drop(&mut self) {
            record(&self.events, self.side, "free");
        }
    }

    impl FrameBacking for FakeBacking {
        type Memory = Mmap;
        type Allocation = FakeAllocation;

        fn obtain<D: Direction>(
            _queue: &Queue<D, BuffersAllocated<Mmap>>,
            _index: usize,
            _allocator: Option<&dyn ContiguousAllocator>,
        ) -> Result<Self> {
            bail!("fake backings are built directly")
        }

        fn as_slice(&self) -> &[u8] {
            &self.data
        }

        fn as_mut_slice(&mut self) -> &mut [u8] {
            &mut self.data
        }

        fn queue<Q: RunQueue<Memory = Mmap>>(
            &mut self,
            queue: &Q,
            index: usize,
            bytes_used: usize,
        ) -> Result<()> {
            queue.enqueue(index, &MmapHandle, bytes_used)
        }

        fn release(self) -> (FakeAllocation, Result<()>) {
            record(&self.events, self.side, "release");
            (
                FakeAllocation {
                    side: self.side,
                    events: self.events,
                },
                Ok(()),
            )
        }
    }

    fn side(events: &Events, side: &'static str, times_out: bool) -> (FakeQueue, FakeBacking) {
        (
            FakeQueue {
                side,
                events: Rc::clone(events),
                times_out,
            },
            FakeBacking {
                side,
                events: Rc::clone(events),
                data: vec![0; FRAME_SIZE],
            },
        )
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("vsp2-lut-test-runner-{}-{}", std::process::id(), name))
    }

    fn test_config(name: &str) -> RunConfig {
        let input = temp_path(&format!("{}-input", name));
        std::fs::write(&input, vec![0x20u8; FRAME_SIZE]).unwrap();

        RunConfig {
            media_device: PathBuf::from("/dev/null"),
            input,
            output_dir: std::env::temp_dir(),
            lut: LutConfig {
                table: LutTable::negative(),
                fxa: 0x80,
            },
            timeout: Some(Duration::from_millis(10)),
        }
    }

    fn teardown(side: &str) -> Vec<String> {
        ["streamoff", "release", "reqbufs 0", "free"]
            .iter()
            .map(|what| format!("{} {}", side, what))
            .collect()
    }

    #[test]
    fn processing_order() {
        let events = Events::default();
        let config = test_config("order");
        let output = temp_path("order-output");

        process(
            &config,
            &output,
            side(&events, "src", false),
            side(&events, "dst", false),
        )
        .unwrap();

        let mut expected: Vec<String> = [
            "src qbuf",
            "src streamon",
            "dst qbuf",
            "dst streamon",
            "dst dqbuf",
            "src dqbuf",
        ]
        .iter()
        .map(|e| e.to_string())
        .collect();
        expected.extend(teardown("src"));
        expected.extend(teardown("dst"));
        assert_eq!(*events.borrow(), expected);

        // The fake driver does not touch the destination buffer.
        assert_eq!(std::fs::read(&output).unwrap(), vec![0u8; FRAME_SIZE]);

        std::fs::remove_file(&config.input).unwrap();
        std::fs::remove_file(&output).unwrap();
    }

    #[test]
    fn teardown_after_timeout() {
        let events = Events::default();
        let config = test_config("timeout");
        let output = temp_path("timeout-output");

        let err = process(
            &config,
            &output,
            side(&events, "src", false),
            side(&events, "dst", true),
        )
        .unwrap_err();
        assert!(err.to_string().contains("cannot dequeue destination buffer"));

        let mut expected: Vec<String> = [
            "src qbuf",
            "src streamon",
            "dst qbuf",
            "dst streamon",
            "dst timeout",
        ]
        .iter()
        .map(|e| e.to_string())
        .collect();
        expected.extend(teardown("src"));
        expected.extend(teardown("dst"));
        assert_eq!(*events.borrow(), expected);

        assert!(!output.exists());
        std::fs::remove_file(&config.input).unwrap();
    }

    #[test]
    fn teardown_after_missing_input() {
        let events = Events::default();
        let mut config = test_config("missing");
        std::fs::remove_file(&config.input).unwrap();
        config.input = temp_path("does-not-exist");

        assert!(process(
            &config,
            &temp_path("missing-output"),
            side(&events, "src", false),
            side(&events, "dst", false),
        )
        .is_err());

        let mut expected = teardown("src");
        expected.extend(teardown("dst"));
        assert_eq!(*events.borrow(), expected);
    }

    #[test]
    fn output_names() {
        assert_eq!(
            output_file_name(MemoryType::Mmap),
            "1280_720_ARGB32_LUT_MMAP.argb"
        );
        assert_eq!(
            output_file_name(MemoryType::UserPtr),
            "1280_720_ARGB32_LUT_USERPTR.argb"
        );
        assert_eq!(
            output_file_name(MemoryType::DmaBuf),
            "1280_720_ARGB32_LUT_DMABUF.argb"
        );
    }

    #[test]
    fn contiguous_runs_need_an_allocator() {
        let err = contiguous_buffer(None).unwrap_err();
        assert!(err.to_string().contains("no contiguous allocator"));
    }
}
