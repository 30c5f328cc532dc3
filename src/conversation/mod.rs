//! Conversation Store — the single-session short-term memory linking
//! successive turns to the same skill.
//!
//! Holds at most one active context. All operations are synchronous; the
//! dispatcher serializes access per session.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::nlu::types::{Entity, SlotValue};

// ── Slots ──────────────────────────────────────────────

/// A slot as tracked inside the active context.
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub name: String,
    pub expected_entity: String,
    pub picked_question: String,
    pub suggestions: Vec<String>,
    pub is_filled: bool,
    pub value: Option<Entity>,
}

impl Slot {
    pub fn empty(
        name: impl Into<String>,
        expected_entity: impl Into<String>,
        picked_question: impl Into<String>,
        suggestions: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            expected_entity: expected_entity.into(),
            picked_question: picked_question.into(),
            suggestions,
            is_filled: false,
            value: None,
        }
    }
}

/// Next action descriptor carried by the context.
#[derive(Debug, Clone, PartialEq)]
pub struct NextAction {
    pub name: String,
    /// Whether the action's config declares a loop.
    pub has_loop: bool,
}

// ── Active context ─────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ActiveContext {
    /// `"{domain}.{skill}"`
    pub name: String,
    pub lang: String,
    /// `"{skill}.{action}"`
    pub intent: String,
    pub domain: String,
    pub action_name: String,
    /// Utterance that first activated this context; used to restart the
    /// cycle.
    pub original_utterance: String,
    pub config_data_file_path: PathBuf,
    pub slots: Vec<Slot>,
    pub is_in_action_loop: bool,
    pub next_action: Option<NextAction>,
    /// Entities accumulated over the lifetime of the context.
    pub entities: Vec<Entity>,
    /// Entities of the latest turn only.
    pub current_entities: Vec<Entity>,
}

impl ActiveContext {
    /// Skill segment of the context name.
    pub fn skill(&self) -> &str {
        self.name
            .strip_prefix(&format!("{}.", self.domain))
            .unwrap_or(&self.name)
    }

    /// Slot ledger in the shape `NluResult` exposes.
    pub fn slot_values(&self) -> HashMap<String, SlotValue> {
        self.slots
            .iter()
            .map(|slot| {
                (
                    slot.name.clone(),
                    SlotValue {
                        entity: slot.expected_entity.clone(),
                        value: slot
                            .value
                            .as_ref()
                            .map(|e| e.value.clone())
                            .unwrap_or(serde_json::Value::Null),
                        is_filled: slot.is_filled,
                    },
                )
            })
            .collect()
    }
}

// ── Store ──────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    active: Option<ActiveContext>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_active_context(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_context(&self) -> Option<&ActiveContext> {
        self.active.as_ref()
    }

    pub fn active_context_mut(&mut self) -> Option<&mut ActiveContext> {
        self.active.as_mut()
    }

    /// Install or merge a context. A different name discards the current
    /// context; the same name merges, preserving the original utterance and
    /// accumulating entities.
    pub fn set_active_context(&mut self, ctx: ActiveContext) {
        match &mut self.active {
            Some(current) if current.name == ctx.name => {
                current.lang = ctx.lang;
                current.intent = ctx.intent;
                current.action_name = ctx.action_name;
                current.config_data_file_path = ctx.config_data_file_path;
                current.next_action = ctx.next_action;
                current.is_in_action_loop = ctx.is_in_action_loop;
                current.entities.extend(ctx.current_entities.iter().cloned());
                current.current_entities = ctx.current_entities;
                // new slot declarations win, filled values survive
                if !ctx.slots.is_empty() {
                    let mut slots = ctx.slots;
                    for slot in &mut slots {
                        if let Some(existing) = current
                            .slots
                            .iter()
                            .find(|s| s.name == slot.name && s.is_filled)
                        {
                            slot.is_filled = true;
                            slot.value = existing.value.clone();
                        }
                    }
                    current.slots = slots;
                }
            }
            _ => self.active = Some(ctx),
        }
    }

    pub fn clean_active_context(&mut self) {
        self.active = None;
    }

    /// Record every entity that matches a slot's expected entity and mark
    /// those slots filled.
    pub fn set_slots(&mut self, entities: &[Entity]) {
        let Some(ctx) = self.active.as_mut() else {
            return;
        };
        for slot in &mut ctx.slots {
            if let Some(found) = entities.iter().find(|e| e.entity == slot.expected_entity) {
                slot.value = Some(found.clone());
                slot.is_filled = true;
            }
        }
    }

    /// First unfilled slot in declaration order.
    pub fn get_not_filled_slot(&self) -> Option<&Slot> {
        self.active
            .as_ref()
            .and_then(|ctx| ctx.slots.iter().find(|slot| !slot.is_filled))
    }

    pub fn are_slots_all_filled(&self) -> bool {
        self.active
            .as_ref()
            .map(|ctx| ctx.slots.iter().all(|slot| slot.is_filled))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(name: &str) -> ActiveContext {
        ActiveContext {
            name: name.to_string(),
            lang: "en-US".into(),
            intent: "list.create".into(),
            domain: name.split('.').next().unwrap().to_string(),
            action_name: "create".into(),
            original_utterance: "create a list".into(),
            config_data_file_path: PathBuf::from("skills/productivity/list/config/en.json"),
            slots: Vec::new(),
            is_in_action_loop: false,
            next_action: None,
            entities: Vec::new(),
            current_entities: Vec::new(),
        }
    }

    fn product_slot() -> Slot {
        Slot::empty("item", "product", "Which item?", vec!["milk".into()])
    }

    #[test]
    fn holds_at_most_one_context() {
        let mut store = ConversationStore::new();
        assert!(!store.has_active_context());

        store.set_active_context(context("productivity.list"));
        store.set_active_context(context("games.quiz"));

        assert_eq!(store.active_context().unwrap().name, "games.quiz");
    }

    #[test]
    fn same_name_merge_preserves_original_utterance_and_entities() {
        let mut store = ConversationStore::new();
        let mut first = context("productivity.list");
        first.current_entities = vec![Entity::resolved("list_name", "groceries")];
        first.entities = first.current_entities.clone();
        store.set_active_context(first);

        let mut second = context("productivity.list");
        second.original_utterance = "something else".into();
        second.current_entities = vec![Entity::resolved("list_name", "movies")];
        store.set_active_context(second);

        let ctx = store.active_context().unwrap();
        assert_eq!(ctx.original_utterance, "create a list");
        assert_eq!(ctx.entities.len(), 2);
        assert_eq!(ctx.current_entities.len(), 1);
    }

    #[test]
    fn merge_keeps_filled_slot_values() {
        let mut store = ConversationStore::new();
        let mut first = context("productivity.list");
        first.slots = vec![product_slot()];
        store.set_active_context(first);
        store.set_slots(&[Entity::resolved("product", "milk")]);

        let mut second = context("productivity.list");
        second.slots = vec![product_slot()];
        store.set_active_context(second);

        assert!(store.are_slots_all_filled());
    }

    #[test]
    fn set_slots_fills_matching_entities_only() {
        let mut store = ConversationStore::new();
        let mut ctx = context("productivity.list");
        ctx.slots = vec![
            product_slot(),
            Slot::empty("quantity", "number", "How many?", Vec::new()),
        ];
        store.set_active_context(ctx);

        store.set_slots(&[Entity::resolved("product", "milk")]);

        assert!(!store.are_slots_all_filled());
        let unfilled = store.get_not_filled_slot().unwrap();
        assert_eq!(unfilled.name, "quantity");

        store.set_slots(&[Entity::resolved("number", "2")]);
        assert!(store.are_slots_all_filled());
        assert!(store.get_not_filled_slot().is_none());
    }

    #[test]
    fn not_filled_slot_respects_declaration_order() {
        let mut store = ConversationStore::new();
        let mut ctx = context("productivity.list");
        ctx.slots = vec![
            Slot::empty("first", "alpha", "?", Vec::new()),
            Slot::empty("second", "beta", "?", Vec::new()),
        ];
        store.set_active_context(ctx);
        assert_eq!(store.get_not_filled_slot().unwrap().name, "first");
    }

    #[test]
    fn clean_discards_everything() {
        let mut store = ConversationStore::new();
        store.set_active_context(context("productivity.list"));
        store.clean_active_context();
        assert!(!store.has_active_context());
        assert!(!store.are_slots_all_filled());
    }

    #[test]
    fn slot_values_expose_the_ledger() {
        let mut store = ConversationStore::new();
        let mut ctx = context("productivity.list");
        ctx.slots = vec![product_slot()];
        store.set_active_context(ctx);
        store.set_slots(&[Entity::resolved("product", "milk")]);

        let values = store.active_context().unwrap().slot_values();
        let item = &values["item"];
        assert!(item.is_filled);
        assert_eq!(item.entity, "product");
        assert_eq!(item.value, serde_json::json!("milk"));
    }
}
