//! Ordered instruction buffer with four append-only sections.
use crate::ir::Instruction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Section {
    Allocation,
    FieldSetup,
    StaticRoots,
    GlobalRoots,
}

impl Section {
    pub const ALL: [Section; 4] =
        [Section::Allocation, Section::FieldSetup, Section::StaticRoots, Section::GlobalRoots];

    /// Header line used in the artifact.
    pub fn header(self) -> &'static str {
        match self {
            Section::Allocation => "[allocate]",
            Section::FieldSetup => "[fields]",
            Section::StaticRoots => "[statics]",
            Section::GlobalRoots => "[globals]",
        }
    }

    pub fn from_header(line: &str) -> Option<Section> {
        Section::ALL.into_iter().find(|s| s.header() == line)
    }

    pub fn name(self) -> &'static str {
        match self {
            Section::Allocation => "allocate",
            Section::FieldSetup => "fields",
            Section::StaticRoots => "statics",
            Section::GlobalRoots => "globals",
        }
    }
}

/// Instructions in section-major order. Performs no validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstructionBuffer {
    allocations: Vec<Instruction>,
    field_setup: Vec<Instruction>,
    static_roots: Vec<Instruction>,
    global_roots: Vec<Instruction>,
}

impl InstructionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_allocation(&mut self, instruction: Instruction) {
        self.allocations.push(instruction);
    }

    pub fn push_field_setup(&mut self, instruction: Instruction) {
        self.field_setup.push(instruction);
    }

    pub fn push_static_root(&mut self, instruction: Instruction) {
        self.static_roots.push(instruction);
    }

    pub fn push_global_root(&mut self, instruction: Instruction) {
        self.global_roots.push(instruction);
    }

    pub(crate) fn push(&mut self, section: Section, instruction: Instruction) {
        match section {
            Section::Allocation => self.push_allocation(instruction),
            Section::FieldSetup => self.push_field_setup(instruction),
            Section::StaticRoots => self.push_static_root(instruction),
            Section::GlobalRoots => self.push_global_root(instruction),
        }
    }

    pub fn allocations(&self) -> &[Instruction] {
        &self.allocations
    }

    pub fn field_setup(&self) -> &[Instruction] {
        &self.field_setup
    }

    pub fn static_roots(&self) -> &[Instruction] {
        &self.static_roots
    }

    pub fn global_roots(&self) -> &[Instruction] {
        &self.global_roots
    }

    pub fn section(&self, section: Section) -> &[Instruction] {
        match section {
            Section::Allocation => &self.allocations,
            Section::FieldSetup => &self.field_setup,
            Section::StaticRoots => &self.static_roots,
            Section::GlobalRoots => &self.global_roots,
        }
    }

    pub fn sections(&self) -> impl Iterator<Item = (Section, &[Instruction])> {
        Section::ALL.into_iter().map(move |s| (s, self.section(s)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instruction> {
        self.sections().flat_map(|(_, instructions)| instructions.iter())
    }

    pub fn len(&self) -> usize {
        self.allocations.len() + self.field_setup.len() + self.static_roots.len() + self.global_roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Allocation, Expr, Symbol};

    #[test]
    fn iteration_is_section_major() {
        let mut buffer = InstructionBuffer::new();
        buffer.push_global_root(Instruction::SetRootGlobal { name: "g".into(), value: Expr::Null });
        buffer.push_allocation(Instruction::Allocate {
            symbol: Symbol(0),
            allocation: Allocation::Unavailable { reason: "test".into() },
        });

        let order: Vec<_> = buffer.iter().map(|i| matches!(i, Instruction::Allocate { .. })).collect();
        assert_eq!(order, vec![true, false]);
        assert_eq!(buffer.len(), 2);
        assert_eq!(Section::from_header("[fields]"), Some(Section::FieldSetup));
    }
}
