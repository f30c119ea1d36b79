use std::fmt::Write as _;
use std::path::Path;

use tracing::debug;

use super::FORMAT_MARKER;
use crate::error::{Error, Result};
use crate::snapshot::buffer::InstructionBuffer;

/// Renders an instruction buffer to artifact text and persists it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArtifactWriter;

impl ArtifactWriter {
    pub fn new() -> Self {
        Self
    }

    /// Header, then each non-empty section in fixed order, one statement per line.
    pub fn render(&self, buffer: &InstructionBuffer) -> String {
        let mut out = String::new();
        let generated = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let _ = writeln!(out, "{FORMAT_MARKER}");
        let _ = writeln!(out, "# generated at: {generated}");
        let _ = writeln!(out, "# do not edit manually");

        for (section, instructions) in buffer.sections() {
            if instructions.is_empty() {
                continue;
            }
            out.push('\n');
            let _ = writeln!(out, "{}", section.header());
            for instruction in instructions {
                let _ = writeln!(out, "{instruction}");
            }
        }
        out
    }

    pub fn write(&self, path: &Path, buffer: &InstructionBuffer) -> Result<()> {
        let text = self.render(buffer);
        let io_error = |source| Error::ArtifactWrite { path: path.to_path_buf(), source };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        std::fs::write(path, &text).map_err(io_error)?;
        debug!(path = %path.display(), bytes = text.len(), "artifact written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Expr, Instruction};

    #[test]
    fn empty_sections_are_omitted() {
        let mut buffer = InstructionBuffer::new();
        buffer.push_global_root(Instruction::SetRootGlobal { name: "counter".into(), value: Expr::Int(42) });

        let text = ArtifactWriter::new().render(&buffer);
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], FORMAT_MARKER);
        assert!(lines[1].starts_with("# generated at: "));
        assert_eq!(&lines[3..], &["", "[globals]", "global 'counter' = 42"]);
    }

    #[test]
    fn write_failures_name_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"").unwrap();
        let target = blocker.join("nested.snap");

        let err = ArtifactWriter::new().write(&target, &InstructionBuffer::new()).unwrap_err();
        assert!(matches!(err, Error::ArtifactWrite { path, .. } if path == target));
    }
}
