//! The intermediate representation: functions composed of basic blocks
//! terminated by explicit control-flow instructions, with
//! predecessor/successor edges.
//!
//! Blocks accumulate serialized assembly text during emission; the block
//! graph exists so the optimizer can drop unreachable blocks and fuse
//! linear chains before the text is written out.

pub mod emit;
pub mod opt;

use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::idx::{IdxVec, mk_id};
use crate::operand::{Cond, Operand};
use crate::sym::SymId;

mk_id! {
  /// An index into the IR context's function arena.
  FnId,
  /// An index into a function's block arena.
  BlockId
}

/// The control-flow instruction ending a block.
#[derive(Clone, Debug)]
pub enum Term {
  Jump(BlockId),
  /// Conditional jump: `cond` is flags whose condition selects the FALSE
  /// path, so the branch jumps to `if_false` and falls to `if_true`.
  Branch { cond: Operand, if_true: BlockId, if_false: BlockId },
  /// Call a known function, continuing in `ret`.
  Call { target: SymId, ret: BlockId },
  /// Call through an operand, continuing in `ret`. The call instruction
  /// itself is emitted into the block body while its registers are still
  /// live.
  CallIndirect { target: Operand, ret: BlockId },
  Return,
}

/// A basic block.
#[derive(Debug, Default)]
pub struct Block {
  /// The block's local label.
  pub label: String,
  /// Pending instructions, as assembly text.
  pub instrs: String,
  pub term: Option<Term>,
  pub preds: SmallVec<[BlockId; 2]>,
  pub succs: SmallVec<[BlockId; 2]>,
}

impl Block {
  /// Append one instruction line.
  pub fn out(&mut self, line: &str) {
    log::trace!("| {line}");
    self.instrs.push_str(line);
    self.instrs.push('\n');
  }
}

/// A function: an arena of blocks with three distinguished members.
/// Deleted blocks leave tombstones so ids stay stable.
#[derive(Debug)]
pub struct Fn {
  /// Mangled name.
  pub name: String,
  pub blocks: IdxVec<BlockId, Option<Block>>,
  pub prologue: BlockId,
  pub entry: BlockId,
  pub epilogue: BlockId,
}

/// The initial value of a static allocation.
#[derive(Clone, Debug)]
pub enum StaticInit {
  Int(i32),
  /// The address of another labeled allocation (a string constant).
  Addr(String),
}

/// Labeled static storage.
#[derive(Debug)]
pub enum StaticData {
  /// A read-only string constant, escapes preserved.
  StringConstant { label: String, value: String },
  /// A zero- or value-initialized global.
  Global { label: String, global: bool, size: i32, init: Option<StaticInit> },
}

/// The IR context: owns every function and all static data, and hands
/// out labels.
pub struct IrCtx {
  pub fns: IdxVec<FnId, Fn>,
  pub sdata: Vec<StaticData>,
  label_no: u32,
  /// String constants are deduplicated: equal strings share a label.
  string_labels: HashMap<String, String>,
  pub internal_errors: u32,
}

impl Default for IrCtx {
  fn default() -> Self { Self::new() }
}

impl IrCtx {
  #[must_use] pub fn new() -> IrCtx {
    IrCtx {
      fns: IdxVec::new(),
      sdata: vec![],
      label_no: 0,
      string_labels: HashMap::new(),
      internal_errors: 0,
    }
  }

  /// A fresh anonymous label.
  pub fn create_label(&mut self) -> String {
    let label = format!(".{:04X}", self.label_no);
    self.label_no += 1;
    label
  }

  /// Create a function with prologue, entry and epilogue blocks wired up:
  /// the prologue establishes the frame and jumps to the entry; the
  /// epilogue tears it down and returns.
  pub fn create_fn(&mut self, name: &str, stacksize: i32) -> FnId {
    let mut blocks = IdxVec::new();

    let mut prologue_block = Block {
      label: self.create_label(),
      ..Block::default()
    };
    crate::asm::fn_prologue(&mut prologue_block, stacksize);

    let entry_block = Block { label: self.create_label(), ..Block::default() };

    let mut epilogue_block = Block { label: self.create_label(), ..Block::default() };
    crate::asm::fn_epilogue(&mut epilogue_block);

    let prologue = blocks.push(Some(prologue_block));
    let entry = blocks.push(Some(entry_block));
    let epilogue = blocks.push(Some(epilogue_block));

    let id = self.fns.push(Fn { name: name.to_owned(), blocks, prologue, entry, epilogue });

    self.jump(id, prologue, entry);
    self.terminate(id, epilogue, Term::Return);

    id
  }

  /// Create a fresh block in a function.
  pub fn create_block(&mut self, fun: FnId) -> BlockId {
    let label = self.create_label();
    self.fns[fun].blocks.push(Some(Block { label, ..Block::default() }))
  }

  /// Access a block. Panics on a deleted block; the emitter never holds
  /// onto blocks across optimization.
  pub fn block_mut(&mut self, fun: FnId, block: BlockId) -> &mut Block {
    self.fns[fun].blocks[block].as_mut().expect("deleted block")
  }

  /// Append formatted assembly text to a block.
  pub fn block_out(&mut self, fun: FnId, block: BlockId, line: &str) {
    self.block_mut(fun, block).out(line);
  }

  /// Register a string constant, returning the address of its storage.
  /// Equal strings share one label.
  pub fn string_constant(&mut self, value: &str) -> Operand {
    if let Some(label) = self.string_labels.get(value) {
      return Operand::LabelOffset(label.clone());
    }

    let label = self.create_label();
    self.string_labels.insert(value.to_owned(), label.clone());
    self.sdata.push(StaticData::StringConstant { label: label.clone(), value: value.to_owned() });
    Operand::LabelOffset(label)
  }

  /// Register a global variable's storage.
  pub fn global(&mut self, label: &str, global: bool, size: i32, init: Option<StaticInit>) {
    self.sdata.push(StaticData::Global { label: label.to_owned(), global, size, init });
  }

  fn terminate(&mut self, fun: FnId, block: BlockId, term: Term) {
    let b = self.block_mut(fun, block);
    if b.term.is_some() {
      log::error!("internal error(terminate): block {} already terminated", b.label);
      self.internal_errors += 1;
      return;
    }
    self.block_mut(fun, block).term = Some(term);
  }

  fn link(&mut self, fun: FnId, from: BlockId, to: BlockId) {
    self.block_mut(fun, from).succs.push(to);
    self.block_mut(fun, to).preds.push(from);
  }

  /// Terminate a block with an unconditional jump.
  pub fn jump(&mut self, fun: FnId, block: BlockId, to: BlockId) {
    self.terminate(fun, block, Term::Jump(to));
    self.link(fun, block, to);
  }

  /// Terminate a block with a conditional branch. `cond` selects the
  /// false path.
  pub fn branch(&mut self, fun: FnId, block: BlockId, cond: Cond,
                if_true: BlockId, if_false: BlockId) {
    self.terminate(fun, block,
                   Term::Branch { cond: Operand::Flags(cond), if_true, if_false });
    self.link(fun, block, if_true);
    self.link(fun, block, if_false);
  }

  /// Terminate a block with a call to a known function.
  pub fn call(&mut self, fun: FnId, block: BlockId, target: SymId, ret: BlockId) {
    self.terminate(fun, block, Term::Call { target, ret });
    self.link(fun, block, ret);
  }

  /// Terminate a block with an indirect call. The `call` instruction goes
  /// into the block now, while the operand's registers are still valid.
  pub fn call_indirect(&mut self, fun: FnId, block: BlockId,
                       target: Operand, target_str: &str, ret: BlockId) {
    self.block_out(fun, block, &format!("call {target_str}"));
    self.terminate(fun, block, Term::CallIndirect { target, ret });
    self.link(fun, block, ret);
  }

  /// A block's predecessor count; the synthetic edge from the caller into
  /// the prologue counts.
  #[must_use] pub fn pred_count(&self, fun: FnId, block: BlockId) -> usize {
    let f = &self.fns[fun];
    let b = f.blocks[block].as_ref().expect("deleted block");
    b.preds.len() + usize::from(block == f.prologue)
  }

  /// A block's successor count; a call terminator's exit into the callee
  /// counts alongside its return edge.
  #[must_use] pub fn succ_count(&self, fun: FnId, block: BlockId) -> usize {
    let b = self.fns[fun].blocks[block].as_ref().expect("deleted block");
    let call = matches!(b.term, Some(Term::Call { .. } | Term::CallIndirect { .. }));
    b.succs.len() + usize::from(call)
  }

  /// Remove a block, unlinking it from its neighbours' edge vectors.
  pub fn block_delete(&mut self, fun: FnId, block: BlockId) {
    let Some(removed) = self.fns[fun].blocks[block].take() else { return };

    for pred in removed.preds {
      if let Some(p) = self.fns[fun].blocks[pred].as_mut() {
        p.succs.retain(|&mut s| s != block);
      }
    }
    for succ in removed.succs {
      if let Some(s) = self.fns[fun].blocks[succ].as_mut() {
        s.preds.retain(|&mut p| p != block);
      }
    }
  }

  /// Fuse `succ` into `pred`: concatenate the instruction text, take the
  /// successor's terminator, and relink the successor's successors.
  pub fn blocks_combine(&mut self, fun: FnId, pred: BlockId, succ: BlockId) {
    let succ_block = self.fns[fun].blocks[succ].as_mut().expect("deleted block");
    let instrs = std::mem::take(&mut succ_block.instrs);
    let term = succ_block.term.take();
    let succ_succs: Vec<BlockId> = succ_block.succs.iter().copied().collect();

    let pred_block = self.fns[fun].blocks[pred].as_mut().expect("deleted block");
    pred_block.instrs.push_str(&instrs);
    pred_block.term = term;

    for s in succ_succs {
      self.link(fun, pred, s);
    }

    // Keep the distinguished blocks valid
    if self.fns[fun].epilogue == succ { self.fns[fun].epilogue = pred }
    if self.fns[fun].entry == succ { self.fns[fun].entry = pred }

    self.block_delete(fun, succ);
  }

  /// Live block ids of a function, in creation order.
  pub fn block_ids(&self, fun: FnId) -> Vec<BlockId> {
    self.fns[fun].blocks.enum_iter()
      .filter_map(|(id, b)| b.as_ref().map(|_| id))
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn create_fn_wires_prologue_to_entry() {
    let mut ir = IrCtx::new();
    let f = ir.create_fn("main", 16);
    let fun = &ir.fns[f];

    let prologue = fun.blocks[fun.prologue].as_ref().unwrap();
    assert!(matches!(prologue.term, Some(Term::Jump(to)) if to == fun.entry));
    assert!(prologue.instrs.contains("push rbp"));
    assert!(prologue.instrs.contains("sub rsp, 16"));

    let epilogue = fun.blocks[fun.epilogue].as_ref().unwrap();
    assert!(matches!(epilogue.term, Some(Term::Return)));

    // Prologue has the synthetic caller edge
    assert_eq!(ir.pred_count(f, fun.prologue), 1);
  }

  #[test]
  fn edges_match_terminators() {
    let mut ir = IrCtx::new();
    let f = ir.create_fn("f", 0);
    let entry = ir.fns[f].entry;
    let a = ir.create_block(f);
    let b = ir.create_block(f);

    ir.branch(f, entry, Cond::Equal, a, b);

    for (block, succs) in [(entry, vec![a, b])] {
      let bl = ir.fns[f].blocks[block].as_ref().unwrap();
      assert_eq!(bl.succs.to_vec(), succs);
    }
    assert_eq!(ir.fns[f].blocks[a].as_ref().unwrap().preds.to_vec(), vec![entry]);
    assert_eq!(ir.fns[f].blocks[b].as_ref().unwrap().preds.to_vec(), vec![entry]);
  }

  #[test]
  fn string_constants_are_interned() {
    let mut ir = IrCtx::new();
    let a = ir.string_constant("hello");
    let b = ir.string_constant("hello");
    let c = ir.string_constant("world");
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(ir.sdata.len(), 2);
  }

  #[test]
  fn labels_are_unique_and_hex() {
    let mut ir = IrCtx::new();
    let a = ir.create_label();
    let b = ir.create_label();
    assert_ne!(a, b);
    assert!(a.starts_with('.'));
  }
}
