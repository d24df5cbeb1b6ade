//! One ordered partition of the queue set

use std::collections::{BTreeMap, HashMap};

use crate::command::{Command, CommandKey, OrderKey};
use crate::types::{CommandId, QueueType};

/// Ordered collection of commands with identity and id indexes
///
/// Iteration follows [`OrderKey`]. Looking up an equal command (same
/// [`CommandKey`]) or an id is a hash lookup, so cross-partition duplicate
/// checks never scan.
#[derive(Debug)]
pub struct CommandQueue {
    queue_type: QueueType,
    entries: BTreeMap<OrderKey, Command>,
    by_key: HashMap<CommandKey, OrderKey>,
    by_id: HashMap<CommandId, OrderKey>,
}

impl CommandQueue {
    pub(crate) fn new(queue_type: QueueType) -> Self {
        Self {
            queue_type,
            entries: BTreeMap::new(),
            by_key: HashMap::new(),
            by_id: HashMap::new(),
        }
    }

    /// Which partition this is
    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    /// Number of commands
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether an equal command is present
    pub fn contains(&self, command: &Command) -> bool {
        self.by_key.contains_key(&command.key())
    }

    /// Whether the id is present
    pub fn contains_id(&self, id: CommandId) -> bool {
        self.by_id.contains_key(&id)
    }

    /// Commands in scheduling order
    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.entries.values()
    }

    /// Equal command, if present
    pub fn get_equal(&self, command: &Command) -> Option<&Command> {
        self.by_key
            .get(&command.key())
            .and_then(|order| self.entries.get(order))
    }

    /// Command by id
    pub fn get(&self, id: CommandId) -> Option<&Command> {
        self.by_id.get(&id).and_then(|order| self.entries.get(order))
    }

    /// Insert unless an equal command is already present; returns whether it was inserted
    pub(crate) fn insert(&mut self, command: Command) -> bool {
        let key = command.key();
        if self.by_key.contains_key(&key) || self.by_id.contains_key(&command.id) {
            return false;
        }
        let order = command.order_key();
        self.by_key.insert(key, order);
        self.by_id.insert(command.id, order);
        self.entries.insert(order, command);
        true
    }

    /// Insert, replacing an equal command if there is one
    pub(crate) fn replace(&mut self, command: Command) -> Option<Command> {
        let previous = self.remove_equal(&command);
        self.insert(command);
        previous
    }

    /// Remove the command with this id
    pub(crate) fn remove(&mut self, id: CommandId) -> Option<Command> {
        let order = self.by_id.remove(&id)?;
        let command = self.entries.remove(&order)?;
        self.by_key.remove(&command.key());
        Some(command)
    }

    /// Remove the command equal to `command`
    pub(crate) fn remove_equal(&mut self, command: &Command) -> Option<Command> {
        let order = *self.by_key.get(&command.key())?;
        self.remove(order.id)
    }

    /// Remove every command for which `take` returns true, in order
    pub(crate) fn take_where(&mut self, mut take: impl FnMut(&Command) -> bool) -> Vec<Command> {
        let ids: Vec<CommandId> = self
            .entries
            .values()
            .filter(|c| take(c))
            .map(|c| c.id)
            .collect();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    /// Update the result of the command with this id in place
    ///
    /// The result does not take part in ordering or identity, so no index changes.
    pub(crate) fn update_result(
        &mut self,
        id: CommandId,
        update: impl FnOnce(&mut crate::command::CommandResult),
    ) -> bool {
        let Some(order) = self.by_id.get(&id) else {
            return false;
        };
        match self.entries.get_mut(order) {
            Some(command) => {
                update(&mut command.result);
                true
            }
            None => false,
        }
    }
}
