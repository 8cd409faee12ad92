//! Program-level code generation orchestration.
//!
//! Implements `Codegen::emit_program`, which walks every allocated function
//! in layout order and lays out the static data section.

use super::lowering::block_label;
use super::Codegen;
use crate::backend::instruction::{AsmItem, DataValue};
use crate::ir::{IrFunction, IrRoot, StaticInit};
use crate::CompileError;
use tracing::trace;

impl Codegen {
    pub fn emit_program(&mut self, root: &IrRoot) -> Result<(), CompileError> {
        self.static_labels = root.statics.iter().map(|s| s.label.clone()).collect();
        self.func_labels = root.functions.iter().map(|f| f.label.clone()).collect();
        self.entry_label = root.entry.map(|id| root.function(id).label.clone());

        for func in &root.functions {
            self.emit_function(func)?;
        }
        self.emit_statics(root);
        Ok(())
    }

    fn emit_function(&mut self, func: &IrFunction) -> Result<(), CompileError> {
        self.start_function(func.label.clone(), func.slot_count);
        for (pos, &bb) in func.layout.iter().enumerate() {
            // The entry block is only reachable by falling into the function.
            if bb != func.entry || !func.block(bb).preds.is_empty() {
                self.push_label(block_label(func, bb));
            }
            let next = func.layout.get(pos + 1).copied();
            for instr in &func.block(bb).instrs {
                self.lower_instr(func, instr, next)?;
            }
        }
        self.flush_function();
        trace!(function = %func.name, slots = func.slot_count, "emitted");
        Ok(())
    }

    fn emit_statics(&mut self, root: &IrRoot) {
        for s in &root.statics {
            self.data.push(AsmItem::Directive("align 8".to_string()));
            match &s.init {
                StaticInit::Word => {
                    self.data.push(AsmItem::Data { label: Some(s.label.clone()), value: DataValue::Quad(0) });
                }
                StaticInit::Str(text) => {
                    let mut bytes = text.as_bytes().to_vec();
                    bytes.push(0);
                    self.data.push(AsmItem::Data {
                        label: Some(s.label.clone()),
                        value: DataValue::Quad(text.len() as i64),
                    });
                    self.data.push(AsmItem::Data { label: None, value: DataValue::Bytes(bytes) });
                }
            }
        }
    }
}
