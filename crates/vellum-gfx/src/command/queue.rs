use super::cmd::Command;
use super::merge::try_merge;
use crate::error::{Error, Result};

/// Batching knobs.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Merge adjacent compatible draws.
    pub merge_draws: bool,
    /// Merges stop once a draw would exceed this many vertices.
    /// Capped at 65 536, the `u16` index range.
    pub max_vertices_per_draw: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            merge_draws: true,
            max_vertices_per_draw: 1 << 16,
        }
    }
}

/// What one flush did.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct FlushStats {
    /// Commands executed.
    pub commands: usize,
    /// Draw commands among them.
    pub draws: usize,
    /// Draws folded into a previous one at enqueue time.
    pub merged: usize,
}

/// Runs commands during a flush.
pub trait Executor {
    fn execute(&mut self, command: Command) -> Result<()>;
}

/// Ordered command buffer with greedy draw merging.
///
/// `enqueue` never touches the device. `flush` hands every buffered command
/// to an [`Executor`] in order; the first failure stops the flush, drops the
/// rest and poisons the queue until [`CommandQueue::reset`].
#[derive(Debug, Default)]
pub struct CommandQueue {
    commands: Vec<Command>,
    config: QueueConfig,
    merged: usize,
    poisoned: bool,
}

impl CommandQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            commands: Vec::new(),
            config,
            merged: 0,
            poisoned: false,
        }
    }

    #[inline]
    pub fn config(&self) -> QueueConfig {
        self.config
    }

    #[inline]
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    #[inline]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    #[inline]
    fn max_vertices(&self) -> usize {
        self.config.max_vertices_per_draw.min(1 << 16)
    }

    pub fn enqueue(&mut self, command: Command) -> Result<()> {
        if self.poisoned {
            return Err(Error::Poisoned);
        }

        let draw = match command {
            Command::DrawTriangles(draw) => draw,
            other => {
                self.commands.push(other);
                return Ok(());
            }
        };

        if draw.is_empty() {
            log::trace!("dropping draw without triangles");
            return Ok(());
        }

        if self.config.merge_draws {
            let max = self.max_vertices();
            if let Some(Command::DrawTriangles(last)) = self.commands.last_mut() {
                match try_merge(last, draw, max) {
                    Ok(()) => {
                        self.merged += 1;
                        log::trace!("merged draw; batch now {} vertices", last.vertices.len());
                        return Ok(());
                    }
                    Err(draw) => {
                        self.commands.push(Command::DrawTriangles(draw));
                        return Ok(());
                    }
                }
            }
        }

        self.commands.push(Command::DrawTriangles(draw));
        Ok(())
    }

    /// Executes and clears the buffer. An empty buffer returns immediately.
    pub fn flush(&mut self, executor: &mut impl Executor) -> Result<FlushStats> {
        if self.poisoned {
            return Err(Error::Poisoned);
        }
        if self.commands.is_empty() {
            return Ok(FlushStats::default());
        }

        let commands = std::mem::take(&mut self.commands);
        let mut stats = FlushStats {
            commands: commands.len(),
            draws: 0,
            merged: std::mem::take(&mut self.merged),
        };

        for (i, command) in commands.into_iter().enumerate() {
            let name = command.name();
            if matches!(command, Command::DrawTriangles(_)) {
                stats.draws += 1;
            }
            if let Err(err) = executor.execute(command) {
                log::warn!(
                    "flush aborted at {name} ({} of {}): {err}; queue poisoned",
                    i + 1,
                    stats.commands
                );
                self.poisoned = true;
                return Err(err);
            }
        }

        Ok(stats)
    }

    /// Drops buffered commands and clears the poisoned state.
    pub fn reset(&mut self) {
        if self.poisoned {
            log::debug!("command queue reset after failure");
        }
        self.commands.clear();
        self.merged = 0;
        self.poisoned = false;
    }
}

#[cfg(test)]
mod tests {
    use slotmap::SlotMap;

    use super::*;
    use crate::command::DrawTriangles;
    use crate::coords::{quad, QUAD_INDICES};
    use crate::device::DeviceError;
    use crate::image::ImageId;

    /// Records command names; fails on the `fail_at`-th command.
    #[derive(Default)]
    struct Recorder {
        seen: Vec<&'static str>,
        fail_at: Option<usize>,
    }

    impl Executor for Recorder {
        fn execute(&mut self, command: Command) -> Result<()> {
            if self.fail_at == Some(self.seen.len()) {
                return Err(DeviceError::OutOfMemory("texture").into());
            }
            self.seen.push(command.name());
            Ok(())
        }
    }

    fn ids(n: usize) -> Vec<ImageId> {
        let mut map: SlotMap<ImageId, ()> = SlotMap::with_key();
        (0..n).map(|_| map.insert(())).collect()
    }

    fn draw(dst: ImageId, src: ImageId, x: f32) -> Command {
        Command::DrawTriangles(DrawTriangles::new(
            dst,
            [src],
            quad([x, 0.0, 1.0, 1.0], [0.0, 0.0, 1.0, 1.0]),
            QUAD_INDICES,
        ))
    }

    #[test]
    fn empty_flush_never_calls_executor() {
        let mut q = CommandQueue::default();
        let mut rec = Recorder::default();
        assert_eq!(q.flush(&mut rec).unwrap(), FlushStats::default());
        assert!(rec.seen.is_empty());
    }

    #[test]
    fn compatible_draws_merge() {
        let id = ids(2);
        let mut q = CommandQueue::new(QueueConfig::default());
        q.enqueue(draw(id[0], id[1], 0.0)).unwrap();
        q.enqueue(draw(id[0], id[1], 2.0)).unwrap();
        assert_eq!(q.len(), 1);
        match q.commands() {
            [Command::DrawTriangles(d)] => assert_eq!(d.vertices.len(), 8),
            other => panic!("unexpected buffer {other:?}"),
        }

        let stats = q.flush(&mut Recorder::default()).unwrap();
        assert_eq!(stats, FlushStats { commands: 1, draws: 1, merged: 1 });
        assert!(q.is_empty());
    }

    #[test]
    fn merging_can_be_disabled() {
        let id = ids(2);
        let mut q = CommandQueue::new(QueueConfig {
            merge_draws: false,
            ..Default::default()
        });
        q.enqueue(draw(id[0], id[1], 0.0)).unwrap();
        q.enqueue(draw(id[0], id[1], 2.0)).unwrap();
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn non_draw_commands_break_batches() {
        let id = ids(2);
        let mut q = CommandQueue::default();
        q.enqueue(draw(id[0], id[1], 0.0)).unwrap();
        q.enqueue(Command::CopyPixels { source: id[1], destination: id[0] }).unwrap();
        q.enqueue(draw(id[0], id[1], 2.0)).unwrap();

        let mut rec = Recorder::default();
        q.flush(&mut rec).unwrap();
        assert_eq!(rec.seen, vec!["draw-triangles", "copy-pixels", "draw-triangles"]);
    }

    #[test]
    fn empty_draws_are_dropped() {
        let id = ids(1);
        let mut q = CommandQueue::default();
        q.enqueue(Command::DrawTriangles(DrawTriangles::new(id[0], [], Vec::new(), Vec::new())))
            .unwrap();
        assert!(q.is_empty());
    }

    #[test]
    fn failure_poisons_and_drops_the_rest() {
        let id = ids(3);
        let mut q = CommandQueue::default();
        q.enqueue(draw(id[0], id[2], 0.0)).unwrap();
        q.enqueue(draw(id[1], id[2], 0.0)).unwrap();
        q.enqueue(Command::Dispose { image: id[2] }).unwrap();

        let mut rec = Recorder { fail_at: Some(1), ..Default::default() };
        let err = q.flush(&mut rec).unwrap_err();
        assert_eq!(err, Error::Device(DeviceError::OutOfMemory("texture")));
        assert_eq!(rec.seen, vec!["draw-triangles"]);
        assert!(q.is_poisoned());
        assert!(q.is_empty());

        assert_eq!(q.enqueue(draw(id[0], id[2], 0.0)), Err(Error::Poisoned));
        assert_eq!(q.flush(&mut rec), Err(Error::Poisoned));

        q.reset();
        q.enqueue(draw(id[0], id[2], 0.0)).unwrap();
        assert_eq!(q.flush(&mut Recorder::default()).unwrap().commands, 1);
    }
}
