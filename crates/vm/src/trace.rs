//! Defines the [`Trace`] trait, used to observe the execution of a Cairo
//! program within the virtual machine.

use crate::cpu::Cpu;
use crate::instr::Instruction;

/// A collection of callbacks invoked during the execution of a Cairo program.
///
/// All callbacks have empty default implementations, so implementors only
/// override the events they care about.
#[allow(unused_variables)]
pub trait Trace {
    /// Called after an instruction has executed successfully.
    ///
    /// `cpu` holds the register values the instruction executed with, i.e.
    /// the state *before* the register update was committed.
    fn on_step(&mut self, cpu: &Cpu, instruction: &Instruction) {}
}

/// An implementation of [`Trace`] that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTrace;

impl Trace for NoopTrace {}
