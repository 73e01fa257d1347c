// src/process/fake.rs

//! Scripted command runner for tests and dry runs

use std::cell::RefCell;

use super::{CommandOutput, CommandRunner, Invocation};
use crate::error::Result;

type Handler<'a> = Box<dyn Fn(&Invocation) -> Result<CommandOutput> + 'a>;

/// Records every invocation and answers it from a handler closure
pub struct FakeRunner<'a> {
    handler: Handler<'a>,
    calls: RefCell<Vec<Invocation>>,
}

impl<'a> FakeRunner<'a> {
    /// Create a runner answering every invocation with `handler`
    pub fn new(handler: impl Fn(&Invocation) -> Result<CommandOutput> + 'a) -> Self {
        Self {
            handler: Box::new(handler),
            calls: RefCell::new(Vec::new()),
        }
    }

    /// A runner where every command succeeds with empty output
    pub fn succeeding() -> Self {
        Self::new(|_| Ok(CommandOutput::ok(Vec::new())))
    }

    /// All invocations seen so far, in order
    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.borrow().clone()
    }

    /// Invocations of a given program
    pub fn calls_to(&self, program: &str) -> Vec<Invocation> {
        self.calls
            .borrow()
            .iter()
            .filter(|inv| inv.program() == program)
            .cloned()
            .collect()
    }
}

impl CommandRunner for FakeRunner<'_> {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        self.calls.borrow_mut().push(invocation.clone());
        (self.handler)(invocation)
    }
}
