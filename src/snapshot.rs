//! Snapshot orchestration: collect roots, walk them, hand the buffer to the writer.
pub mod buffer;
pub mod encode;
pub mod handler;
pub mod identity;
pub mod roots;

use std::path::Path;

use tracing::{debug, info};

use crate::artifact::write::ArtifactWriter;
use crate::config::SnapshotOptions;
use crate::error::Result;
use crate::ir::{Allocation, Instruction};
use crate::runtime::Runtime;
use buffer::InstructionBuffer;
use encode::{ValueEncoder, Walk};
use handler::ValueHandler;
use roots::RootCollector;

/// Counts for one written snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotReport {
    pub static_roots: usize,
    pub global_roots: usize,
    pub allocations: usize,
    /// Allocations that will not restore the original contents.
    pub placeholders: usize,
}

impl SnapshotReport {
    pub fn from_buffer(buffer: &InstructionBuffer) -> Self {
        let placeholders = buffer
            .allocations()
            .iter()
            .filter(|i| {
                matches!(
                    i,
                    Instruction::Allocate {
                        allocation: Allocation::Placeholder(_) | Allocation::Unavailable { .. },
                        ..
                    }
                )
            })
            .count();
        Self {
            static_roots: buffer.static_roots().len(),
            global_roots: buffer.global_roots().len(),
            allocations: buffer.allocations().len(),
            placeholders,
        }
    }
}

pub struct Snapshotter {
    collector: RootCollector,
    encoder: ValueEncoder,
    writer: ArtifactWriter,
}

impl Snapshotter {
    pub fn new(options: &SnapshotOptions, additional_handlers: Vec<Box<dyn ValueHandler>>) -> Self {
        Self {
            collector: RootCollector::new(options),
            encoder: ValueEncoder::new(additional_handlers),
            writer: ArtifactWriter::new(),
        }
    }

    /// Walk every root once. Statics are encoded before globals.
    pub fn capture(&self, runtime: &Runtime) -> Result<InstructionBuffer> {
        let mut walk = Walk::new(runtime.types());

        for root in self.collector.static_roots(runtime) {
            let root = root?;
            debug!(ty = %root.ty, slots = root.slots.len(), "visiting static root");
            for (field, value) in root.slots {
                let Some(value) = value else { continue };
                let value = self.encoder.encode(&value, &mut walk)?;
                walk.buffer.push_static_root(Instruction::SetRootStatic {
                    ty: root.ty.clone(),
                    field,
                    value,
                });
            }
        }
        for (name, value) in self.collector.global_roots(runtime) {
            debug!(name, "visiting global root");
            let value = self.encoder.encode(value, &mut walk)?;
            walk.buffer.push_global_root(Instruction::SetRootGlobal { name: name.to_string(), value });
        }

        debug!(symbols = walk.identities.len(), instructions = walk.buffer.len(), "walk finished");
        Ok(walk.into_buffer())
    }

    /// Capture and write the artifact. Nothing is written if the walk fails.
    pub fn take_snapshot(&self, runtime: &Runtime, path: impl AsRef<Path>) -> Result<SnapshotReport> {
        let path = path.as_ref();
        let buffer = self.capture(runtime)?;
        self.writer.write(path, &buffer)?;
        let report = SnapshotReport::from_buffer(&buffer);
        info!(
            path = %path.display(),
            statics = report.static_roots,
            globals = report.global_roots,
            allocations = report.allocations,
            placeholders = report.placeholders,
            "snapshot written"
        );
        Ok(report)
    }
}

impl Default for Snapshotter {
    fn default() -> Self {
        Self::new(&SnapshotOptions::default(), Vec::new())
    }
}
