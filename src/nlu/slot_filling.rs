//! Slot Filler — asks the user for missing mandatory entities, one
//! question per turn, until the action can run.

use std::collections::HashMap;
use tracing::{error, info, warn};

use super::dispatcher::TurnFlow;
use super::types::{Classification, CompletedTurn, NluResult, ProcessOutcome};
use super::{NluError, NluSession};
use crate::conversation::{ActiveContext, NextAction, Slot};
use crate::ner::NerSeverity;
use crate::nlu::types::Entity;

impl NluSession {
    /// Decide whether slot filling should begin after a fresh
    /// classification. When the intent declares mandatory slots, seed the
    /// active context with them, ask the first question, and short-circuit
    /// the turn.
    ///
    /// Note: the triggering utterance is not mined for slot values; filling
    /// starts on the next turn even when the answer is already in it.
    pub(crate) async fn route_slot_filling(&self, intent: &str, nlu_result: &NluResult) -> bool {
        let Some(main) = self.models.main().await else {
            return false;
        };
        let mandatory = main.mandatory_slots(intent);
        if mandatory.is_empty() {
            return false;
        }

        let classification = &nlu_result.classification;
        let first_question = mandatory[0].picked_question.clone();
        let first_suggestions = mandatory[0].suggestions.clone();

        let ctx = ActiveContext {
            name: classification.context_name(),
            lang: self.current_lang().await,
            intent: intent.to_string(),
            domain: classification.domain.clone(),
            action_name: classification.action.clone(),
            original_utterance: nlu_result.utterance.clone(),
            config_data_file_path: nlu_result
                .config_data_file_path
                .clone()
                .unwrap_or_default(),
            slots: mandatory
                .into_iter()
                .map(|slot| {
                    Slot::empty(
                        slot.name,
                        slot.expected_entity,
                        slot.picked_question,
                        slot.suggestions,
                    )
                })
                .collect(),
            is_in_action_loop: false,
            next_action: Some(NextAction {
                name: classification.action.clone(),
                has_loop: false,
            }),
            entities: nlu_result.current_entities.clone(),
            current_entities: nlu_result.current_entities.clone(),
        };

        {
            let mut store = self.conversation.lock().await;
            if store
                .active_context()
                .map_or(false, |current| current.name != ctx.name)
            {
                store.clean_active_context();
            }
            store.set_active_context(ctx);
        }

        info!("slot filling started for {intent}");
        self.socket.suggest(&first_suggestions);
        self.brain.talk(&first_question, false).await;
        self.socket.is_typing(false);
        true
    }

    /// One slot-filling turn: record matching entities, ask the next
    /// question, drop the context on an off-topic utterance, or run the
    /// pending action once everything is filled.
    pub(crate) async fn handle_slot_filling(&self, utterance: &str) -> Result<TurnFlow, NluError> {
        let snapshot = self.conversation.lock().await.active_context().cloned();
        let Some(ctx) = snapshot else {
            self.socket.is_typing(false);
            return Ok(TurnFlow::Done(ProcessOutcome::Consumed));
        };
        if ctx.next_action.is_none() {
            // nothing to fill
            self.socket.is_typing(false);
            return Ok(TurnFlow::Done(ProcessOutcome::Consumed));
        }

        let lang = self.current_lang().await;
        let probe = NluResult {
            utterance: utterance.to_string(),
            ..Default::default()
        };
        let entities = match self
            .ner
            .extract_entities(&lang, &ctx.config_data_file_path, &probe)
            .await
        {
            Ok(entities) => entities,
            Err(err) => {
                match err.severity {
                    NerSeverity::Warning => warn!("{err}"),
                    NerSeverity::Error => error!("{err}"),
                }
                Vec::new()
            }
        };

        {
            let mut store = self.conversation.lock().await;
            let expected_matched = store.get_not_filled_slot().map_or(false, |slot| {
                entities.iter().any(|e| e.entity == slot.expected_entity)
            });

            if expected_matched {
                store.set_slots(&entities);
                if let Some(next) = store.get_not_filled_slot() {
                    let question = next.picked_question.clone();
                    let suggestions = next.suggestions.clone();
                    drop(store);
                    self.socket.suggest(&suggestions);
                    self.brain.talk(&question, false).await;
                    self.socket.is_typing(false);
                    return Ok(TurnFlow::Done(ProcessOutcome::Consumed));
                }
            }

            if !store.are_slots_all_filled() {
                store.clean_active_context();
                drop(store);
                let phrase = self
                    .brain
                    .wernicke("random_context_out_of_topic", None, &HashMap::new());
                self.brain.talk(&phrase, false).await;
                self.socket.is_typing(false);
                return Ok(TurnFlow::Done(ProcessOutcome::Consumed));
            }
        }

        self.finish_slot_filling(entities).await
    }

    /// All slots filled: rebuild the result around the original utterance
    /// and hand it to the executor.
    async fn finish_slot_filling(&self, current_entities: Vec<Entity>) -> Result<TurnFlow, NluError> {
        let ctx = {
            let mut store = self.conversation.lock().await;
            let ctx = store.active_context().cloned();
            store.clean_active_context();
            ctx
        };
        let Some(ctx) = ctx else {
            self.socket.is_typing(false);
            return Ok(TurnFlow::Done(ProcessOutcome::Consumed));
        };

        let action = ctx
            .next_action
            .as_ref()
            .map(|next| next.name.clone())
            .unwrap_or_else(|| ctx.action_name.clone());
        let mut entities = ctx.entities.clone();
        entities.extend(current_entities.iter().cloned());

        let nlu_result = NluResult {
            utterance: ctx.original_utterance.clone(),
            current_entities,
            entities,
            slots: ctx.slot_values(),
            config_data_file_path: Some(ctx.config_data_file_path.clone()),
            classification: Classification::certain(
                ctx.domain.clone(),
                ctx.skill().to_string(),
                action,
            ),
            ..Default::default()
        };

        info!("slots filled, running {}", nlu_result.classification.action);
        match self.brain.execute(&nlu_result).await {
            Ok(skill) => Ok(TurnFlow::Done(ProcessOutcome::Answered(Box::new(
                CompletedTurn {
                    processing_time: 0,
                    nlu_processing_time: 0,
                    nlu: nlu_result,
                    skill,
                },
            )))),
            Err(err) => {
                error!("skill executor failed after slot filling: {err}");
                self.socket.is_typing(false);
                Err(NluError::Executor(err))
            }
        }
    }
}
