//! Instruction arena plus block layout, with the splice primitives passes rely on.

use super::data::{BasicBlock, BlockId, CompiledMethod, InstrId, InstrKind, Instruction, ValueType};
use crate::error::DevirtError;

type GraphResult<T> = Result<T, DevirtError>;

/// The IR of one method.
///
/// Instructions live in an arena indexed by [`InstrId`]; blocks list the ids that are
/// currently scheduled. Removing an instruction detaches it from its block but keeps
/// the arena slot so ids stay stable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Graph {
    owner: Option<CompiledMethod>,
    instructions: Vec<Instruction>,
    blocks: Vec<BasicBlock>,
    current_method: Option<InstrId>,
}

/// Restore point taken before a group of speculative edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphCheckpoint {
    instructions: usize,
    current_method: Option<InstrId>,
}

impl Graph {
    #[must_use]
    pub fn new(owner: Option<CompiledMethod>) -> Self {
        Self {
            owner,
            instructions: Vec::new(),
            blocks: Vec::new(),
            current_method: None,
        }
    }

    /// The method being compiled, when known.
    #[must_use]
    pub fn owner(&self) -> Option<CompiledMethod> {
        self.owner
    }

    pub fn add_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len());
        self.blocks.push(BasicBlock {
            id,
            instructions: Vec::new(),
        });
        id
    }

    #[must_use]
    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    #[must_use]
    pub fn instruction(&self, id: InstrId) -> Option<&Instruction> {
        self.instructions.get(id.0)
    }

    pub fn instruction_mut(&mut self, id: InstrId) -> Option<&mut Instruction> {
        self.instructions.get_mut(id.0)
    }

    /// Number of arena slots, including detached instructions.
    #[must_use]
    pub fn arena_len(&self) -> usize {
        self.instructions.len()
    }

    /// Allocate an instruction without scheduling it.
    pub fn add_detached(&mut self, mut instr: Instruction) -> InstrId {
        instr.block = None;
        let id = InstrId(self.instructions.len());
        self.instructions.push(instr);
        id
    }

    /// Allocate an instruction at the end of `block`.
    ///
    /// # Errors
    ///
    /// Fails when `block` does not exist.
    pub fn append(&mut self, block: BlockId, instr: Instruction) -> GraphResult<InstrId> {
        if block.0 >= self.blocks.len() {
            return Err(DevirtError::malformed(format!("unknown block {block}")));
        }
        let id = self.add_detached(instr);
        self.blocks[block.0].instructions.push(id);
        self.instructions[id.0].block = Some(block);
        Ok(id)
    }

    /// Block and position of a scheduled instruction.
    #[must_use]
    pub fn position(&self, id: InstrId) -> Option<(BlockId, usize)> {
        let block = self.instruction(id)?.block?;
        let index = self
            .blocks
            .get(block.0)?
            .instructions
            .iter()
            .position(|entry| *entry == id)?;
        Some((block, index))
    }

    /// Schedule the detached `instr` immediately before `cursor`, in `cursor`'s block.
    ///
    /// # Errors
    ///
    /// Fails when `cursor` is not scheduled or `instr` is not detached.
    pub fn insert_before(&mut self, instr: InstrId, cursor: InstrId) -> GraphResult<()> {
        let (block, index) = self.scheduled(cursor)?;
        self.schedule_at(instr, block, index)
    }

    /// Schedule the detached `instr` immediately after `anchor`, in `anchor`'s block.
    ///
    /// # Errors
    ///
    /// Fails when `anchor` is not scheduled or `instr` is not detached.
    pub fn insert_after(&mut self, instr: InstrId, anchor: InstrId) -> GraphResult<()> {
        let (block, index) = self.scheduled(anchor)?;
        self.schedule_at(instr, block, index + 1)
    }

    /// Put the detached `replacement` where `old` is, redirect every use of `old` to it,
    /// and detach `old`.
    ///
    /// # Errors
    ///
    /// Fails when `old` is not scheduled or `replacement` is not detached.
    pub fn replace_and_remove(&mut self, old: InstrId, replacement: InstrId) -> GraphResult<()> {
        let (block, index) = self.scheduled(old)?;
        self.ensure_detached(replacement)?;
        self.blocks[block.0].instructions[index] = replacement;
        self.instructions[replacement.0].block = Some(block);
        self.instructions[old.0].block = None;
        for (slot, instr) in self.instructions.iter_mut().enumerate() {
            if slot == replacement.0 || slot == old.0 {
                continue;
            }
            instr.kind.replace_input(old, replacement);
            if let Some(env) = instr.env.as_mut() {
                for value in env.values.iter_mut().flatten() {
                    if *value == old {
                        *value = replacement;
                    }
                }
            }
        }
        Ok(())
    }

    /// Detach a scheduled instruction.
    ///
    /// # Errors
    ///
    /// Fails when `id` is not scheduled.
    pub fn remove(&mut self, id: InstrId) -> GraphResult<()> {
        let (block, index) = self.scheduled(id)?;
        self.blocks[block.0].instructions.remove(index);
        self.instructions[id.0].block = None;
        Ok(())
    }

    #[must_use]
    pub fn checkpoint(&self) -> GraphCheckpoint {
        GraphCheckpoint {
            instructions: self.instructions.len(),
            current_method: self.current_method,
        }
    }

    /// Undo every instruction allocated since `checkpoint`.
    ///
    /// Only valid when no instruction older than the checkpoint was rewired in between.
    pub fn rollback(&mut self, checkpoint: GraphCheckpoint) {
        for block in &mut self.blocks {
            block
                .instructions
                .retain(|id| id.0 < checkpoint.instructions);
        }
        self.instructions.truncate(checkpoint.instructions);
        self.current_method = checkpoint.current_method;
    }

    /// The `CurrentMethod` instruction, created at the top of the entry block on first use.
    ///
    /// # Errors
    ///
    /// Fails when the graph has no blocks.
    pub fn current_method(&mut self) -> GraphResult<InstrId> {
        if let Some(existing) = self.current_method {
            return Ok(existing);
        }
        let entry = self
            .blocks
            .first()
            .map(|block| block.id)
            .ok_or_else(|| DevirtError::malformed("graph has no entry block"))?;
        let id = self.add_detached(Instruction::new(
            InstrKind::CurrentMethod,
            ValueType::Reference,
            0,
        ));
        self.schedule_at(id, entry, 0)?;
        self.current_method = Some(id);
        Ok(id)
    }

    /// Scheduled instructions in block order.
    pub fn scheduled_instructions(&self) -> impl Iterator<Item = (InstrId, &Instruction)> + '_ {
        self.blocks.iter().flat_map(move |block| {
            block
                .instructions
                .iter()
                .map(move |id| (*id, &self.instructions[id.0]))
        })
    }

    /// Scheduled invokes in block order.
    #[must_use]
    pub fn invokes(&self) -> Vec<InstrId> {
        self.scheduled_instructions()
            .filter(|(_, instr)| matches!(instr.kind, InstrKind::Invoke(_)))
            .map(|(id, _)| id)
            .collect()
    }

    fn scheduled(&self, id: InstrId) -> GraphResult<(BlockId, usize)> {
        self.position(id)
            .ok_or_else(|| DevirtError::malformed(format!("{id} is not scheduled in any block")))
    }

    fn ensure_detached(&self, id: InstrId) -> GraphResult<()> {
        match self.instruction(id) {
            Some(instr) if instr.block.is_none() => Ok(()),
            Some(_) => Err(DevirtError::malformed(format!("{id} is already scheduled"))),
            None => Err(DevirtError::malformed(format!("unknown instruction {id}"))),
        }
    }

    fn schedule_at(&mut self, id: InstrId, block: BlockId, index: usize) -> GraphResult<()> {
        self.ensure_detached(id)?;
        self.blocks[block.0].instructions.insert(index, id);
        self.instructions[id.0].block = Some(block);
        Ok(())
    }
}
