//! # Commands
//!
//! Typed commands dispatched through prioritized handler lists. Handlers at
//! a higher priority run first; within a priority, registration order wins.
//! The first handler returning `true` stops propagation.

use crate::errors::EditorResult;
use crate::listeners::ListenerId;
use crate::node::TextFormat;
use crate::transaction::Transaction;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use tracing::trace;

/// A command name bound to its payload type.
pub struct Command<P> {
    name: &'static str,
    _payload: PhantomData<fn(P)>,
}

impl<P> Command<P> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _payload: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<P> Clone for Command<P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P> Copy for Command<P> {}

impl<P> fmt::Debug for Command<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Command({})", self.name)
    }
}

pub const SELECTION_CHANGE: Command<()> = Command::new("selection-change");
pub const INSERT_TEXT: Command<String> = Command::new("insert-text");
/// Payload: `true` deletes backward.
pub const DELETE_CHARACTER: Command<bool> = Command::new("delete-character");
pub const DELETE_WORD: Command<bool> = Command::new("delete-word");
pub const DELETE_LINE: Command<bool> = Command::new("delete-line");
pub const FORMAT_TEXT: Command<TextFormat> = Command::new("format-text");
pub const INSERT_PARAGRAPH: Command<()> = Command::new("insert-paragraph");
/// Payload: `true` keeps the caret before the break.
pub const INSERT_LINE_BREAK: Command<bool> = Command::new("insert-line-break");
pub const UNDO: Command<()> = Command::new("undo");
pub const REDO: Command<()> = Command::new("redo");

/// Handler priority, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CommandPriority {
    Editor = 0,
    Low = 1,
    Normal = 2,
    High = 3,
    Critical = 4,
}

impl CommandPriority {
    const ALL: [CommandPriority; 5] = [
        CommandPriority::Editor,
        CommandPriority::Low,
        CommandPriority::Normal,
        CommandPriority::High,
        CommandPriority::Critical,
    ];
}

type ErasedHandler = Box<dyn FnMut(&dyn Any, &mut Transaction<'_>) -> EditorResult<bool>>;
type HandlerLists = [Vec<(ListenerId, ErasedHandler)>; 5];

#[derive(Default)]
pub(crate) struct CommandTable {
    entries: HashMap<&'static str, HandlerLists>,
}

impl CommandTable {
    pub fn register<P, F>(&mut self, command: Command<P>, priority: CommandPriority, id: ListenerId, mut handler: F)
    where
        P: 'static,
        F: FnMut(&P, &mut Transaction<'_>) -> EditorResult<bool> + 'static,
    {
        let erased: ErasedHandler = Box::new(move |payload, tx| match payload.downcast_ref::<P>() {
            Some(payload) => handler(payload, tx),
            None => Ok(false),
        });
        self.entries.entry(command.name).or_default()[priority as usize].push((id, erased));
    }

    /// Drops the handler and, once a command has no handlers left, the
    /// command entry itself.
    pub fn remove(&mut self, id: ListenerId) -> bool {
        let mut removed = false;
        self.entries.retain(|_, lists| {
            for list in lists.iter_mut() {
                let before = list.len();
                list.retain(|(i, _)| *i != id);
                removed |= list.len() != before;
            }
            lists.iter().any(|l| !l.is_empty())
        });
        removed
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    #[cfg(test)]
    pub fn handler_count(&self, name: &str) -> usize {
        self.entries
            .get(name)
            .map(|lists| lists.iter().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Runs handlers from the highest priority down. Returns whether one of
    /// them handled the command.
    pub fn dispatch<P: 'static>(&mut self, command: Command<P>, payload: &P, tx: &mut Transaction<'_>) -> EditorResult<bool> {
        let Some(lists) = self.entries.get_mut(command.name) else {
            trace!(command = command.name, "no handlers");
            return Ok(false);
        };
        for priority in CommandPriority::ALL.iter().rev() {
            for (_, handler) in lists[*priority as usize].iter_mut() {
                if handler(payload, tx)? {
                    trace!(command = command.name, ?priority, "handled");
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

impl fmt::Debug for CommandTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&&str> = self.entries.keys().collect();
        names.sort();
        f.debug_struct("CommandTable").field("commands", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PING: Command<u32> = Command::new("ping");

    #[test]
    fn test_unregistering_last_handler_drops_command() {
        let mut table = CommandTable::default();
        table.register(PING, CommandPriority::Low, ListenerId(1), |_, _| Ok(false));
        table.register(PING, CommandPriority::High, ListenerId(2), |_, _| Ok(true));
        assert_eq!(table.handler_count("ping"), 2);

        assert!(table.remove(ListenerId(1)));
        assert!(table.contains("ping"));
        assert!(table.remove(ListenerId(2)));
        assert!(!table.contains("ping"));
    }

    #[test]
    fn test_priorities_order() {
        assert!(CommandPriority::Critical > CommandPriority::Editor);
        assert_eq!(CommandPriority::ALL.len(), 5);
        assert_eq!(PING.name(), "ping");
    }
}
